//! Export target resolution and framework classification.
//!
//! The resolver is re-run on every export because tools may mutate the DOM
//! between user actions. It inspects the page through the [`Page`] trait, so
//! the same rules apply to the browser backend and to in-memory pages.

use crate::config::ExportConfig;
use crate::data::{ExportTarget, FrameworkTag};
use crate::error::{ExportError, ExportResult};

/// Canvas id p5.js assigns to the first sketch canvas.
pub const P5_DEFAULT_CANVAS_ID: &str = "defaultCanvas0";
/// Class p5.js adds to canvases it owns.
pub const P5_CANVAS_CLASS: &str = "p5Canvas";
/// Attribute Three.js sets on its renderer canvas, e.g. `three.js r150`.
pub const THREE_ENGINE_ATTRIBUTE: &str = "data-engine";

/// Check a canvas's [`THREE_ENGINE_ATTRIBUTE`] value for a Three.js renderer.
pub fn is_three_engine(attribute: Option<&str>) -> bool {
    attribute.is_some_and(|value| value.trim_start().starts_with("three.js"))
}

/// Per-canvas facts used for framework classification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CanvasTraits {
    pub id: String,
    /// Canvas carries p5 back-references (`_pInst`)
    pub p5_back_reference: bool,
    /// Canvas class list contains `p5Canvas`
    pub p5_class: bool,
    /// Canvas is drawn by a WebGL renderer. Detected without calling
    /// `getContext`, which would bind a context to a fresh canvas.
    pub webgl_context: bool,
}

/// Page-global symbols relevant to classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Globals {
    /// `window.p5`
    pub p5: bool,
    /// A p5 global-mode function such as `createCanvas`
    pub p5_global_function: bool,
    /// `window.THREE`
    pub three: bool,
    /// A known renderer global (`renderer`, `threeRenderer`)
    pub three_renderer: bool,
}

/// Read-only view of the page DOM.
///
/// Implemented by the web backend over `web_sys::Document` and by the
/// headless backend over an in-memory element list.
pub trait Page {
    /// Element handle; equality means "same element".
    type Element: Clone + PartialEq + std::fmt::Debug;

    /// Look up an element by id.
    fn element_by_id(&self, id: &str) -> Option<Self::Element>;

    /// First element matching a CSS selector.
    fn query_selector(&self, selector: &str) -> Option<Self::Element>;

    /// The document body.
    fn body(&self) -> Option<Self::Element>;

    /// All canvas elements in document order.
    fn canvases(&self) -> Vec<Self::Element>;

    /// Check if an element is a canvas.
    fn is_canvas(&self, element: &Self::Element) -> bool;

    /// First canvas inside an element.
    fn inner_canvas(&self, element: &Self::Element) -> Option<Self::Element>;

    /// Backing-store size of a canvas in pixels.
    fn canvas_size(&self, canvas: &Self::Element) -> (u32, u32);

    /// Classification facts for a canvas.
    fn canvas_traits(&self, canvas: &Self::Element) -> CanvasTraits;

    /// Classification facts for the page.
    fn globals(&self) -> Globals;
}

/// Classify the framework that produced a canvas.
///
/// Plain is the default. The Three.js rule is deliberately permissive: any
/// WebGL canvas on a page that has loaded THREE is treated as a Three canvas,
/// which can misclassify an unrelated WebGL canvas. This is a known
/// approximation of the heuristic and is kept as is.
///
/// ## Example
///
/// ```rust
/// use chatooly_export::target::{classify, CanvasTraits, Globals};
/// use chatooly_export::FrameworkTag;
///
/// let traits = CanvasTraits { id: "defaultCanvas0".into(), ..Default::default() };
/// let globals = Globals { p5: true, ..Default::default() };
/// assert_eq!(classify(&traits, &globals), FrameworkTag::P5);
/// ```
pub fn classify(traits: &CanvasTraits, globals: &Globals) -> FrameworkTag {
    if is_p5(traits, globals) {
        FrameworkTag::P5
    } else if is_three(traits, globals) {
        FrameworkTag::Three
    } else {
        FrameworkTag::Plain
    }
}

fn is_p5(traits: &CanvasTraits, globals: &Globals) -> bool {
    globals.p5
        && (traits.id == P5_DEFAULT_CANVAS_ID
            || globals.p5_global_function
            || traits.p5_back_reference
            || traits.p5_class)
}

fn is_three(traits: &CanvasTraits, globals: &Globals) -> bool {
    globals.three && (globals.three_renderer || traits.webgl_context)
}

/// Finds the element to export.
#[derive(Clone, Debug)]
pub struct TargetResolver<'a> {
    config: &'a ExportConfig,
}

impl<'a> TargetResolver<'a> {
    pub fn new(config: &'a ExportConfig) -> Self {
        Self { config }
    }

    /// Resolve the export target.
    ///
    /// First match wins:
    /// 1. the canonical canvas (by id)
    /// 2. the wrapper element: its inner canvas, else the wrapper itself
    /// 3. the largest canvas by pixel area
    /// 4. the fallback selectors, in order
    /// 5. the document body
    pub fn resolve<P: Page>(&self, page: &P) -> ExportResult<ExportTarget<P::Element>> {
        let canvas_id = &self.config.canvas_id;
        if let Some(element) = page.element_by_id(canvas_id) {
            if page.is_canvas(&element) {
                tracing::debug!(id = %canvas_id, "resolved canonical canvas");
                return Ok(self.canvas_target(page, element));
            }
        }

        let container_id = &self.config.container_id;
        if let Some(wrapper) = page.element_by_id(container_id) {
            return Ok(match page.inner_canvas(&wrapper) {
                Some(canvas) => {
                    tracing::debug!(id = %container_id, "resolved canvas inside wrapper");
                    self.canvas_target(page, canvas)
                }
                None => {
                    tracing::debug!(id = %container_id, "resolved wrapper as DOM subtree");
                    ExportTarget::dom(wrapper)
                }
            });
        }

        if let Some(canvas) = largest_canvas(page) {
            tracing::debug!("resolved largest canvas on page");
            return Ok(self.canvas_target(page, canvas));
        }

        for selector in &self.config.fallback_selectors {
            if let Some(element) = page.query_selector(selector) {
                tracing::debug!(%selector, "resolved fallback container");
                return Ok(ExportTarget::dom(element));
            }
        }

        match page.body() {
            Some(body) => {
                tracing::debug!("resolved document body");
                Ok(ExportTarget::dom(body))
            }
            None => {
                let tried = self.tried();
                tracing::error!(?tried, "no export target found");
                Err(ExportError::TargetNotFound { tried })
            }
        }
    }

    /// Resolve a live canvas for recording and sequence capture.
    ///
    /// Returns the canvas with its classification, or `None` for the tag when
    /// the canvas had to be dug out of a DOM target.
    pub fn resolve_canvas<P: Page>(
        &self,
        page: &P,
    ) -> ExportResult<(P::Element, Option<FrameworkTag>)> {
        let target = self.resolve(page)?;
        if let Some(tag) = target.framework() {
            return Ok((target.element, Some(tag)));
        }
        page.inner_canvas(&target.element)
            .or_else(|| largest_canvas(page))
            .map(|canvas| (canvas, None))
            .ok_or(ExportError::CanvasNotFound)
    }

    fn canvas_target<P: Page>(&self, page: &P, canvas: P::Element) -> ExportTarget<P::Element> {
        let tag = classify(&page.canvas_traits(&canvas), &page.globals());
        ExportTarget::canvas(canvas, tag)
    }

    fn tried(&self) -> Vec<String> {
        let mut tried = vec![
            format!("#{}", self.config.canvas_id),
            format!("#{}", self.config.container_id),
            "canvas".to_string(),
        ];
        tried.extend(self.config.fallback_selectors.iter().cloned());
        tried.push("body".to_string());
        tried
    }
}

/// Canvas with the largest `width * height`; the first one wins ties.
pub fn largest_canvas<P: Page>(page: &P) -> Option<P::Element> {
    let mut best: Option<(u64, P::Element)> = None;
    for canvas in page.canvases() {
        let (w, h) = page.canvas_size(&canvas);
        let area = w as u64 * h as u64;
        if best.as_ref().map_or(true, |(a, _)| area > *a) {
            best = Some((area, canvas));
        }
    }
    best.map(|(_, canvas)| canvas)
}

/// [`Page`] over the live browser document.
#[cfg(feature = "web")]
pub mod web {
    use wasm_bindgen::{JsCast, JsValue};
    use web_sys::{Document, Element, HtmlCanvasElement, Window};

    use super::{is_three_engine, CanvasTraits, Globals, Page, P5_CANVAS_CLASS, THREE_ENGINE_ATTRIBUTE};
    use crate::error::{ExportError, ExportResult};
    use crate::loader::web::lookup_global;

    /// Globals a Three.js tool may expose its renderer under.
    pub const THREE_RENDERER_GLOBALS: &[&str] = &["renderer", "threeRenderer"];

    #[derive(Clone, Debug)]
    pub struct WebPage {
        window: Window,
        document: Document,
    }

    impl WebPage {
        pub fn new() -> ExportResult<Self> {
            let window = web_sys::window().ok_or_else(|| ExportError::Canvas("No window available".to_string()))?;
            let document = window
                .document()
                .ok_or_else(|| ExportError::Canvas("No document available".to_string()))?;
            Ok(Self { window, document })
        }

        #[inline]
        pub fn window(&self) -> &Window {
            &self.window
        }

        #[inline]
        pub fn document(&self) -> &Document {
            &self.document
        }

        /// Cast an element handle to a canvas.
        pub fn as_canvas(element: &Element) -> ExportResult<HtmlCanvasElement> {
            element
                .clone()
                .dyn_into::<HtmlCanvasElement>()
                .map_err(|_| ExportError::CanvasNotFound)
        }

        fn drawn_by_three(canvas: &Element) -> bool {
            is_three_engine(canvas.get_attribute(THREE_ENGINE_ATTRIBUTE).as_deref())
                || THREE_RENDERER_GLOBALS.iter().any(|name| {
                    lookup_global(name)
                        .and_then(|renderer| js_sys::Reflect::get(&renderer, &JsValue::from_str("domElement")).ok())
                        .is_some_and(|dom| dom == JsValue::from(canvas.clone()))
                })
        }
    }

    impl Page for WebPage {
        type Element = Element;

        fn element_by_id(&self, id: &str) -> Option<Element> {
            self.document.get_element_by_id(id)
        }

        fn query_selector(&self, selector: &str) -> Option<Element> {
            self.document.query_selector(selector).ok().flatten()
        }

        fn body(&self) -> Option<Element> {
            self.document.body().map(Element::from)
        }

        fn canvases(&self) -> Vec<Element> {
            let list = self.document.get_elements_by_tag_name("canvas");
            (0..list.length()).filter_map(|i| list.item(i)).collect()
        }

        fn is_canvas(&self, element: &Element) -> bool {
            element.dyn_ref::<HtmlCanvasElement>().is_some()
        }

        fn inner_canvas(&self, element: &Element) -> Option<Element> {
            element.query_selector("canvas").ok().flatten()
        }

        fn canvas_size(&self, canvas: &Element) -> (u32, u32) {
            canvas
                .dyn_ref::<HtmlCanvasElement>()
                .map_or((0, 0), |c| (c.width(), c.height()))
        }

        fn canvas_traits(&self, canvas: &Element) -> CanvasTraits {
            let webgl_context = lookup_global("THREE").is_some() && Self::drawn_by_three(canvas);
            CanvasTraits {
                id: canvas.id(),
                p5_back_reference: js_sys::Reflect::has(canvas, &JsValue::from_str("_pInst")).unwrap_or(false),
                p5_class: canvas.class_list().contains(P5_CANVAS_CLASS),
                webgl_context,
            }
        }

        fn globals(&self) -> Globals {
            Globals {
                p5: lookup_global("p5").is_some(),
                p5_global_function: lookup_global("createCanvas").is_some_and(|f| f.is_function()),
                three: lookup_global("THREE").is_some(),
                three_renderer: THREE_RENDERER_GLOBALS
                    .iter()
                    .any(|name| lookup_global(name).is_some()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct FakeElement {
        id: String,
        tag: &'static str,
        selector: Option<&'static str>,
        size: (u32, u32),
        parent: Option<usize>,
        traits: CanvasTraits,
    }

    #[derive(Default)]
    struct FakePage {
        elements: Vec<FakeElement>,
        globals: Globals,
        no_body: bool,
    }

    impl FakePage {
        fn add(&mut self, tag: &'static str, id: &str, size: (u32, u32), parent: Option<usize>) -> usize {
            self.elements.push(FakeElement {
                id: id.to_string(),
                tag,
                selector: None,
                size,
                parent,
                traits: CanvasTraits {
                    id: id.to_string(),
                    ..Default::default()
                },
            });
            self.elements.len() - 1
        }
    }

    impl Page for FakePage {
        type Element = usize;

        fn element_by_id(&self, id: &str) -> Option<usize> {
            self.elements.iter().position(|e| e.id == id)
        }

        fn query_selector(&self, selector: &str) -> Option<usize> {
            self.elements.iter().position(|e| e.selector == Some(selector))
        }

        fn body(&self) -> Option<usize> {
            if self.no_body {
                None
            } else {
                Some(usize::MAX)
            }
        }

        fn canvases(&self) -> Vec<usize> {
            (0..self.elements.len())
                .filter(|&i| self.elements[i].tag == "canvas")
                .collect()
        }

        fn is_canvas(&self, element: &usize) -> bool {
            self.elements.get(*element).map_or(false, |e| e.tag == "canvas")
        }

        fn inner_canvas(&self, element: &usize) -> Option<usize> {
            self.canvases()
                .into_iter()
                .find(|&i| self.elements[i].parent == Some(*element))
        }

        fn canvas_size(&self, canvas: &usize) -> (u32, u32) {
            self.elements[*canvas].size
        }

        fn canvas_traits(&self, canvas: &usize) -> CanvasTraits {
            self.elements[*canvas].traits.clone()
        }

        fn globals(&self) -> Globals {
            self.globals
        }
    }

    #[test]
    fn test_largest_canvas_wins() {
        let mut page = FakePage::default();
        page.add("canvas", "", (100, 100), None);
        let big = page.add("canvas", "", (300, 200), None);

        let config = ExportConfig::default();
        let target = TargetResolver::new(&config).resolve(&page).unwrap();
        assert_eq!(target.element, big);
        assert_eq!(target.framework(), Some(FrameworkTag::Plain));
    }

    #[test]
    fn test_largest_canvas_tie_keeps_first() {
        let mut page = FakePage::default();
        let first = page.add("canvas", "", (200, 100), None);
        page.add("canvas", "", (100, 200), None);
        assert_eq!(largest_canvas(&page), Some(first));
    }

    #[test]
    fn test_canonical_canvas_beats_larger() {
        let mut page = FakePage::default();
        page.add("canvas", "", (2000, 2000), None);
        let canonical = page.add("canvas", "chatooly-canvas", (10, 10), None);

        let config = ExportConfig::default();
        let target = TargetResolver::new(&config).resolve(&page).unwrap();
        assert_eq!(target.element, canonical);
    }

    #[test]
    fn test_wrapper_inner_canvas_and_dom_fallback() {
        let config = ExportConfig::default();

        let mut page = FakePage::default();
        let wrapper = page.add("div", "chatooly-container", (0, 0), None);
        let inner = page.add("canvas", "", (50, 50), Some(wrapper));
        page.add("canvas", "", (500, 500), None);
        let target = TargetResolver::new(&config).resolve(&page).unwrap();
        assert_eq!(target.element, inner);
        assert!(target.is_canvas());

        let mut page = FakePage::default();
        let wrapper = page.add("div", "chatooly-container", (0, 0), None);
        page.add("canvas", "", (500, 500), None);
        let target = TargetResolver::new(&config).resolve(&page).unwrap();
        assert_eq!(target, ExportTarget::dom(wrapper));
    }

    #[test]
    fn test_fallback_selectors_then_body() {
        let config = ExportConfig::default();

        let mut page = FakePage::default();
        let main = page.add("main", "", (0, 0), None);
        page.elements[main].selector = Some("main");
        let app = page.add("div", "", (0, 0), None);
        page.elements[app].selector = Some("#app");
        let target = TargetResolver::new(&config).resolve(&page).unwrap();
        assert_eq!(target, ExportTarget::dom(main));

        let page = FakePage::default();
        let target = TargetResolver::new(&config).resolve(&page).unwrap();
        assert_eq!(target, ExportTarget::dom(usize::MAX));
    }

    #[test]
    fn test_no_body_reports_tried_selectors() {
        let config = ExportConfig::default();
        let page = FakePage {
            no_body: true,
            ..Default::default()
        };
        match TargetResolver::new(&config).resolve(&page) {
            Err(ExportError::TargetNotFound { tried }) => {
                assert_eq!(tried.first().map(String::as_str), Some("#chatooly-canvas"));
                assert_eq!(tried.last().map(String::as_str), Some("body"));
            }
            other => panic!("expected TargetNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut page = FakePage::default();
        page.add("canvas", "", (640, 480), None);
        page.add("canvas", "", (320, 240), None);

        let config = ExportConfig::default();
        let resolver = TargetResolver::new(&config);
        let first = resolver.resolve(&page).unwrap();
        let second = resolver.resolve(&page).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_canvas_from_dom_target() {
        let config = ExportConfig::default();
        let mut page = FakePage::default();
        page.add("div", "chatooly-container", (0, 0), None);
        let stray = page.add("canvas", "", (80, 60), None);

        let (canvas, tag) = TargetResolver::new(&config).resolve_canvas(&page).unwrap();
        assert_eq!(canvas, stray);
        assert_eq!(tag, None);

        let page = FakePage::default();
        assert!(matches!(
            TargetResolver::new(&config).resolve_canvas(&page),
            Err(ExportError::CanvasNotFound)
        ));
    }

    #[test]
    fn test_classify_p5_signals() {
        let p5 = Globals {
            p5: true,
            ..Default::default()
        };
        let plain = CanvasTraits::default();
        assert_eq!(classify(&plain, &p5), FrameworkTag::Plain);

        let by_class = CanvasTraits {
            p5_class: true,
            ..Default::default()
        };
        assert_eq!(classify(&by_class, &p5), FrameworkTag::P5);

        let by_ref = CanvasTraits {
            p5_back_reference: true,
            ..Default::default()
        };
        assert_eq!(classify(&by_ref, &p5), FrameworkTag::P5);

        let global_mode = Globals {
            p5: true,
            p5_global_function: true,
            ..Default::default()
        };
        assert_eq!(classify(&plain, &global_mode), FrameworkTag::P5);

        // Without the p5 global nothing counts.
        assert_eq!(classify(&by_class, &Globals::default()), FrameworkTag::Plain);
    }

    #[test]
    fn test_classify_three_is_permissive() {
        let webgl = CanvasTraits {
            webgl_context: true,
            ..Default::default()
        };
        let three = Globals {
            three: true,
            ..Default::default()
        };
        // Any WebGL canvas counts once THREE is loaded.
        assert_eq!(classify(&webgl, &three), FrameworkTag::Three);
        assert_eq!(classify(&webgl, &Globals::default()), FrameworkTag::Plain);

        let with_renderer = Globals {
            three: true,
            three_renderer: true,
            ..Default::default()
        };
        assert_eq!(
            classify(&CanvasTraits::default(), &with_renderer),
            FrameworkTag::Three
        );
    }

    #[test]
    fn test_three_engine_attribute() {
        assert!(is_three_engine(Some("three.js r150")));
        assert!(is_three_engine(Some(" three.js r160")));
        assert!(!is_three_engine(Some("babylon")));
        assert!(!is_three_engine(Some("")));
        assert!(!is_three_engine(None));
    }

    #[test]
    fn test_p5_takes_precedence_over_three() {
        let traits = CanvasTraits {
            id: P5_DEFAULT_CANVAS_ID.into(),
            webgl_context: true,
            ..Default::default()
        };
        let globals = Globals {
            p5: true,
            three: true,
            ..Default::default()
        };
        assert_eq!(classify(&traits, &globals), FrameworkTag::P5);
    }
}
