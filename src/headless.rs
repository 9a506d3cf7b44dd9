//! In-memory page backend built on `image`.
//!
//! A [`HeadlessPage`] holds canvases as RGBA buffers and plain elements as
//! tagged nodes, so the resolver, the raster planner and the sequence
//! exporter can run outside a browser. There is no WebGL and no DOM
//! rasterizer: Three.js re-renders and DOM snapshots are reported as
//! unavailable.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::{ready, Future};
use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};

use crate::data::DataUrl;
use crate::error::{ExportError, ExportResult};
use crate::raster::{RasterHost, Smoothing, SnapshotOptions, Snapshotter};
use crate::sequence::FrameCapture;
use crate::sizing::{check_canvas_size, ThreeRenderPlan};
use crate::target::{CanvasTraits, Globals, Page};

/// Handle to a node in a [`HeadlessPage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeadlessElement(usize);

const BODY: HeadlessElement = HeadlessElement(0);

#[derive(Debug)]
enum NodeKind {
    Element { tag: String },
    Canvas { image: RgbaImage, traits: CanvasTraits },
}

#[derive(Debug)]
struct Node {
    id: String,
    /// Selectors this node answers to besides `#id` and its tag
    selectors: Vec<String>,
    parent: Option<HeadlessElement>,
    kind: NodeKind,
}

/// A render hook: draws into the scratch buffer and returns `false` to decline.
pub type RenderHook = Box<dyn Fn(&mut RgbaImage, f64) -> bool>;

/// In-memory page.
pub struct HeadlessPage {
    nodes: Vec<Node>,
    globals: Globals,
    hooks: HashMap<String, RenderHook>,
}

impl Default for HeadlessPage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HeadlessPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessPage")
            .field("nodes", &self.nodes.len())
            .field("globals", &self.globals)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HeadlessPage {
    /// Create a page containing only a body.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                id: String::new(),
                selectors: Vec::new(),
                parent: None,
                kind: NodeKind::Element {
                    tag: "body".to_string(),
                },
            }],
            globals: Globals::default(),
            hooks: HashMap::new(),
        }
    }

    /// The body element.
    pub fn body_element(&self) -> HeadlessElement {
        BODY
    }

    /// Add a canvas under the body.
    pub fn add_canvas(&mut self, id: &str, image: RgbaImage) -> HeadlessElement {
        self.add_canvas_in(BODY, id, image)
    }

    /// Add a canvas under `parent`.
    pub fn add_canvas_in(&mut self, parent: HeadlessElement, id: &str, image: RgbaImage) -> HeadlessElement {
        let traits = CanvasTraits {
            id: id.to_string(),
            ..Default::default()
        };
        self.push(id, Some(parent), NodeKind::Canvas { image, traits })
    }

    /// Add a non-canvas element under the body.
    pub fn add_element(&mut self, tag: &str, id: &str, selectors: &[&str]) -> HeadlessElement {
        let element = self.push(
            id,
            Some(BODY),
            NodeKind::Element {
                tag: tag.to_string(),
            },
        );
        self.nodes[element.0].selectors = selectors.iter().map(|s| s.to_string()).collect();
        element
    }

    /// Override the classification facts of a canvas.
    pub fn set_canvas_traits(&mut self, canvas: HeadlessElement, traits: CanvasTraits) {
        if let Some(NodeKind::Canvas { traits: t, .. }) = self.nodes.get_mut(canvas.0).map(|n| &mut n.kind) {
            *t = traits;
        }
    }

    /// Replace a canvas's pixel buffer.
    pub fn set_canvas_image(&mut self, canvas: HeadlessElement, image: RgbaImage) {
        if let Some(NodeKind::Canvas { image: i, .. }) = self.nodes.get_mut(canvas.0).map(|n| &mut n.kind) {
            *i = image;
        }
    }

    /// Set page-global symbols.
    pub fn set_globals(&mut self, globals: Globals) {
        self.globals = globals;
    }

    /// Install a named render hook.
    pub fn set_render_hook<F>(&mut self, name: &str, hook: F)
    where
        F: Fn(&mut RgbaImage, f64) -> bool + 'static,
    {
        self.hooks.insert(name.to_string(), Box::new(hook));
    }

    /// Borrow a canvas's pixel buffer.
    pub fn canvas_image(&self, canvas: HeadlessElement) -> ExportResult<&RgbaImage> {
        match self.nodes.get(canvas.0).map(|n| &n.kind) {
            Some(NodeKind::Canvas { image, .. }) => Ok(image),
            _ => Err(ExportError::Canvas(format!("{canvas:?} is not a canvas"))),
        }
    }

    /// Start a frame capture of `canvas`.
    pub fn capture(&self, canvas: HeadlessElement) -> HeadlessCapture<'_> {
        HeadlessCapture {
            page: self,
            canvas,
            export: RefCell::new(None),
        }
    }

    fn push(&mut self, id: &str, parent: Option<HeadlessElement>, kind: NodeKind) -> HeadlessElement {
        self.nodes.push(Node {
            id: id.to_string(),
            selectors: Vec::new(),
            parent,
            kind,
        });
        HeadlessElement(self.nodes.len() - 1)
    }

    fn is_descendant(&self, node: HeadlessElement, ancestor: HeadlessElement) -> bool {
        let mut current = self.nodes[node.0].parent;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.nodes[parent.0].parent;
        }
        false
    }
}

/// Encode an RGBA buffer as a PNG data URL.
pub fn encode_png(image: &RgbaImage) -> ExportResult<DataUrl> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(|e| ExportError::Canvas(format!("PNG encoding failed: {e}")))?;
    Ok(DataUrl::png(bytes.into_inner()))
}

impl Page for HeadlessPage {
    type Element = HeadlessElement;

    fn element_by_id(&self, id: &str) -> Option<HeadlessElement> {
        if id.is_empty() {
            return None;
        }
        self.nodes.iter().position(|n| n.id == id).map(HeadlessElement)
    }

    fn query_selector(&self, selector: &str) -> Option<HeadlessElement> {
        self.nodes
            .iter()
            .position(|n| {
                let by_tag = match &n.kind {
                    NodeKind::Element { tag } => tag == selector,
                    NodeKind::Canvas { .. } => selector == "canvas",
                };
                let by_id = selector.strip_prefix('#').is_some_and(|id| !id.is_empty() && n.id == id);
                by_tag || by_id || n.selectors.iter().any(|s| s == selector)
            })
            .map(HeadlessElement)
    }

    fn body(&self) -> Option<HeadlessElement> {
        Some(BODY)
    }

    fn canvases(&self) -> Vec<HeadlessElement> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Canvas { .. }))
            .map(|(i, _)| HeadlessElement(i))
            .collect()
    }

    fn is_canvas(&self, element: &HeadlessElement) -> bool {
        matches!(self.nodes.get(element.0).map(|n| &n.kind), Some(NodeKind::Canvas { .. }))
    }

    fn inner_canvas(&self, element: &HeadlessElement) -> Option<HeadlessElement> {
        self.canvases()
            .into_iter()
            .find(|canvas| self.is_descendant(*canvas, *element))
    }

    fn canvas_size(&self, canvas: &HeadlessElement) -> (u32, u32) {
        self.canvas_image(*canvas).map(|i| i.dimensions()).unwrap_or((0, 0))
    }

    fn canvas_traits(&self, canvas: &HeadlessElement) -> CanvasTraits {
        match self.nodes.get(canvas.0).map(|n| &n.kind) {
            Some(NodeKind::Canvas { traits, .. }) => traits.clone(),
            _ => CanvasTraits::default(),
        }
    }

    fn globals(&self) -> Globals {
        self.globals
    }
}

impl RasterHost for HeadlessPage {
    fn encode_canvas(&self, canvas: &HeadlessElement) -> ExportResult<DataUrl> {
        encode_png(self.canvas_image(*canvas)?)
    }

    fn scaled_copy(
        &self,
        canvas: &HeadlessElement,
        width: u32,
        height: u32,
        smoothing: Smoothing,
    ) -> ExportResult<DataUrl> {
        check_canvas_size(width, height)?;
        let filter = match smoothing {
            Smoothing::Smooth => FilterType::Triangle,
            Smoothing::Crisp => FilterType::Nearest,
        };
        let scaled = imageops::resize(self.canvas_image(*canvas)?, width, height, filter);
        encode_png(&scaled)
    }

    fn has_render_hook(&self, hook: &str) -> bool {
        self.hooks.contains_key(hook)
    }

    fn render_hook(
        &self,
        hook: &str,
        _canvas: &HeadlessElement,
        width: u32,
        height: u32,
        multiplier: f64,
    ) -> ExportResult<Option<DataUrl>> {
        let Some(hook) = self.hooks.get(hook) else {
            return Ok(None);
        };
        check_canvas_size(width, height)?;
        let mut scratch = RgbaImage::new(width, height);
        if hook(&mut scratch, multiplier) {
            encode_png(&scratch).map(Some)
        } else {
            Ok(None)
        }
    }

    fn three_renderer_size(&self) -> Option<(f64, f64)> {
        None
    }

    fn three_rerender(&self, _plan: &ThreeRenderPlan) -> ExportResult<DataUrl> {
        Err(ExportError::Canvas("no WebGL renderer in headless mode".to_string()))
    }
}

/// Snapshotter for pages without a DOM rasterizer; always fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSnapshot;

impl<E> Snapshotter<E> for NoSnapshot {
    fn snapshot(&self, _element: &E, _options: &SnapshotOptions) -> impl Future<Output = ExportResult<DataUrl>> {
        ready(Err(ExportError::Canvas(
            "DOM snapshots are not available without a browser".to_string(),
        )))
    }
}

/// Frame capture over a headless canvas.
#[derive(Debug)]
pub struct HeadlessCapture<'a> {
    page: &'a HeadlessPage,
    canvas: HeadlessElement,
    export: RefCell<Option<RgbaImage>>,
}

impl FrameCapture for HeadlessCapture<'_> {
    fn prepare(&self) -> ExportResult<(u32, u32)> {
        let (width, height) = self.page.canvas_image(self.canvas)?.dimensions();
        *self.export.borrow_mut() = Some(RgbaImage::new(width, height));
        Ok((width, height))
    }

    fn capture_frame(&self) -> ExportResult<DataUrl> {
        let mut export = self.export.borrow_mut();
        let export = export
            .as_mut()
            .ok_or_else(|| ExportError::Canvas("capture canvas not prepared".to_string()))?;
        // Source-over onto a cleared buffer is an exact copy.
        for pixel in export.pixels_mut() {
            pixel.0 = [0, 0, 0, 0];
        }
        imageops::replace(export, self.page.canvas_image(self.canvas)?, 0, 0);
        encode_png(export)
    }

    fn release(&self) {
        self.export.borrow_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::config::ExportConfig;
    use crate::target::TargetResolver;
    use crate::FrameworkTag;

    #[test]
    fn test_wrapper_resolution_uses_descendants() {
        let mut page = HeadlessPage::new();
        let wrapper = page.add_element("div", "chatooly-container", &[]);
        let inner = page.add_canvas_in(wrapper, "", RgbaImage::new(20, 20));
        page.add_canvas("", RgbaImage::new(500, 500));

        let config = ExportConfig::default();
        let target = TargetResolver::new(&config).resolve(&page).unwrap();
        assert_eq!(target.element, inner);
    }

    #[test]
    fn test_fallback_selector_by_class() {
        let mut page = HeadlessPage::new();
        let container = page.add_element("div", "", &[".canvas-container"]);

        let config = ExportConfig::default();
        let target = TargetResolver::new(&config).resolve(&page).unwrap();
        assert_eq!(target.element, container);
        assert!(!target.is_canvas());
    }

    #[test]
    fn test_p5_traits_classify() {
        let mut page = HeadlessPage::new();
        let canvas = page.add_canvas("defaultCanvas0", RgbaImage::new(100, 100));
        page.set_globals(Globals {
            p5: true,
            ..Default::default()
        });

        let config = ExportConfig::default();
        let target = TargetResolver::new(&config).resolve(&page).unwrap();
        assert_eq!(target.element, canvas);
        assert_eq!(target.framework(), Some(FrameworkTag::P5));
    }

    #[test]
    fn test_crisp_copy_keeps_hard_edges() {
        let mut page = HeadlessPage::new();
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        image.put_pixel(1, 0, Rgba([0, 0, 0, 255]));
        let canvas = page.add_canvas("", image);

        let url = page.scaled_copy(&canvas, 8, 4, Smoothing::Crisp).unwrap();
        let scaled = image::load_from_memory(&url.bytes).unwrap().to_rgba8();
        assert_eq!(scaled.dimensions(), (8, 4));
        assert_eq!(scaled.get_pixel(3, 2), &Rgba([255, 255, 255, 255]));
        assert_eq!(scaled.get_pixel(4, 2), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_capture_preserves_alpha() {
        let mut page = HeadlessPage::new();
        let canvas = page.add_canvas("", RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 128])));
        let capture = page.capture(canvas);

        assert!(capture.capture_frame().is_err());
        assert_eq!(capture.prepare().unwrap(), (3, 2));
        let frame = capture.capture_frame().unwrap();
        let decoded = image::load_from_memory(&frame.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(1, 1)[3], 128);
        capture.release();
        assert!(capture.capture_frame().is_err());
    }
}
