//! Still-image export at an arbitrary resolution multiplier.
//!
//! Exporting is split in two steps, like rendering in a display pipeline:
//! [`plan_still`] decides *how* a target is rasterized, producing an ordered
//! fallback chain of [`RasterPlan`]s, and [`RasterExporter`] executes the
//! chain against a [`RasterHost`]. The planning step is pure and knows every
//! framework rule; hosts only provide canvas primitives.

use std::future::Future;

use chrono::NaiveDate;

use crate::config::ExportConfig;
use crate::data::{DataUrl, ExportTarget, FrameworkTag, ResolutionRequest, TargetKind};
use crate::download::{still_filename, Downloader};
use crate::error::{ExportError, ExportResult};
use crate::notify::{report, Notifier};
use crate::sizing::{check_canvas_size, scaled_dimensions, ThreeRenderPlan};
use crate::target::{Page, TargetResolver};

/// Image smoothing used when scaling a canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Smoothing {
    /// Bilinear, high quality
    Smooth,
    /// Nearest neighbour, keeps pixels crisp
    Crisp,
}

/// Which window-level render hook to call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    /// Implemented by the tool
    Tool,
    /// Provided by the Chatooly library
    Library,
}

/// One way of producing a still image.
#[derive(Clone, Debug, PartialEq)]
pub enum RasterPlan {
    /// Encode the current pixel buffer as is
    Direct,
    /// Let a render hook redraw into a pre-sized scratch canvas
    Hook {
        kind: HookKind,
        width: u32,
        height: u32,
    },
    /// Draw the current canvas scaled onto a scratch canvas
    Upscale {
        width: u32,
        height: u32,
        smoothing: Smoothing,
    },
    /// Re-render the Three.js scene with a temporary renderer
    ThreeRerender(ThreeRenderPlan),
    /// Screenshot a DOM subtree with the snapshot library
    DomSnapshot(SnapshotOptions),
}

impl RasterPlan {
    /// Pixel size of the scratch canvas this plan allocates, if it allocates one.
    pub fn output_size(&self) -> Option<(u32, u32)> {
        match self {
            RasterPlan::Hook { width, height, .. } | RasterPlan::Upscale { width, height, .. } => Some((*width, *height)),
            RasterPlan::ThreeRerender(plan) => Some((plan.target_width, plan.target_height)),
            RasterPlan::Direct | RasterPlan::DomSnapshot(_) => None,
        }
    }
}

/// Live Three.js renderer settings carried over to the temporary export
/// renderer, as dotted property paths.
///
/// Each group lists alternatives; the first one the live renderer has wins.
/// `outputColorSpace` replaced `outputEncoding` in r152, and reading the old
/// name on a newer renderer logs a deprecation warning.
pub const THREE_RENDERER_SETTINGS: &[&[&str]] = &[
    &["shadowMap.enabled"],
    &["shadowMap.type"],
    &["toneMapping"],
    &["toneMappingExposure"],
    &["outputColorSpace", "outputEncoding"],
];

/// Copy [`THREE_RENDERER_SETTINGS`] from a live renderer to a fresh one.
///
/// `read` returns `None` for a setting the live renderer lacks; such
/// settings are left at the fresh renderer's default. Returns the paths
/// that were copied.
pub fn copy_renderer_settings<V>(
    mut read: impl FnMut(&str) -> Option<V>,
    mut write: impl FnMut(&str, V),
) -> Vec<&'static str> {
    let mut copied = Vec::with_capacity(THREE_RENDERER_SETTINGS.len());
    for group in THREE_RENDERER_SETTINGS {
        if let Some((path, value)) = group.iter().find_map(|path| read(path).map(|v| (*path, v))) {
            write(path, value);
            copied.push(path);
        }
    }
    copied
}

/// What the page offers for high-resolution rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RasterCapabilities {
    pub tool_hook: bool,
    pub library_hook: bool,
    /// Live Three.js renderer size when renderer, scene and camera are all discoverable
    pub three_renderer_size: Option<(f64, f64)>,
}

/// Options passed to the snapshot library.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotOptions {
    /// Pixel density multiplier
    pub scale: f64,
    /// Background override; `None` keeps the page default
    pub background: Option<String>,
}

/// Decide how to rasterize a target.
///
/// Returns a fallback chain; the executor tries each plan in order and only
/// moves on when a render hook declines.
///
/// ## Example
///
/// ```rust
/// use chatooly_export::raster::{plan_still, RasterCapabilities, RasterPlan, Smoothing};
/// use chatooly_export::{FrameworkTag, TargetKind};
///
/// let plans = plan_still(
///     TargetKind::Canvas(FrameworkTag::Plain),
///     (400, 300),
///     2.0,
///     &RasterCapabilities::default(),
///     None,
/// );
/// assert_eq!(
///     plans,
///     vec![RasterPlan::Upscale { width: 800, height: 600, smoothing: Smoothing::Smooth }]
/// );
/// ```
pub fn plan_still(
    kind: TargetKind,
    size: (u32, u32),
    multiplier: f64,
    caps: &RasterCapabilities,
    background: Option<&str>,
) -> Vec<RasterPlan> {
    let (width, height) = scaled_dimensions(size.0, size.1, multiplier);
    let upscale = |smoothing| RasterPlan::Upscale {
        width,
        height,
        smoothing,
    };

    match kind {
        TargetKind::DomSubtree => vec![RasterPlan::DomSnapshot(SnapshotOptions {
            scale: multiplier,
            background: background.map(str::to_string),
        })],
        // p5 keeps the already-rendered frame and scales it without blur.
        TargetKind::Canvas(FrameworkTag::P5) => vec![upscale(Smoothing::Crisp)],
        _ if multiplier <= 1.0 => vec![RasterPlan::Direct],
        TargetKind::Canvas(FrameworkTag::Three) => match caps.three_renderer_size {
            Some((w, h)) => vec![RasterPlan::ThreeRerender(ThreeRenderPlan::new(w, h, multiplier))],
            None => vec![upscale(Smoothing::Smooth)],
        },
        TargetKind::Canvas(FrameworkTag::Plain) => {
            let mut plans = Vec::with_capacity(3);
            if caps.tool_hook {
                plans.push(RasterPlan::Hook {
                    kind: HookKind::Tool,
                    width,
                    height,
                });
            }
            if caps.library_hook {
                plans.push(RasterPlan::Hook {
                    kind: HookKind::Library,
                    width,
                    height,
                });
            }
            plans.push(upscale(Smoothing::Smooth));
            plans
        }
    }
}

/// Canvas primitives needed for still export.
pub trait RasterHost: Page {
    /// Encode a canvas's current pixel buffer as PNG.
    fn encode_canvas(&self, canvas: &Self::Element) -> ExportResult<DataUrl>;

    /// Draw `canvas` onto a new `width`×`height` scratch canvas and encode it.
    fn scaled_copy(
        &self,
        canvas: &Self::Element,
        width: u32,
        height: u32,
        smoothing: Smoothing,
    ) -> ExportResult<DataUrl>;

    /// Check whether a named window-level hook exists.
    fn has_render_hook(&self, hook: &str) -> bool;

    /// Call a render hook with a pre-sized scratch canvas.
    ///
    /// Returns `Ok(None)` when the hook declines to render.
    fn render_hook(
        &self,
        hook: &str,
        canvas: &Self::Element,
        width: u32,
        height: u32,
        multiplier: f64,
    ) -> ExportResult<Option<DataUrl>>;

    /// Live renderer size when a Three.js renderer, scene and camera are discoverable.
    fn three_renderer_size(&self) -> Option<(f64, f64)>;

    /// Re-render the Three.js scene at the plan's target size.
    fn three_rerender(&self, plan: &ThreeRenderPlan) -> ExportResult<DataUrl>;
}

/// Screenshots DOM subtrees (html2canvas in the browser).
pub trait Snapshotter<E> {
    fn snapshot(&self, element: &E, options: &SnapshotOptions) -> impl Future<Output = ExportResult<DataUrl>>;
}

/// Executes still exports.
pub struct RasterExporter<'a, H, S> {
    config: &'a ExportConfig,
    host: &'a H,
    snapshotter: &'a S,
}

impl<'a, H, S> RasterExporter<'a, H, S>
where
    H: RasterHost,
    S: Snapshotter<H::Element>,
{
    pub fn new(config: &'a ExportConfig, host: &'a H, snapshotter: &'a S) -> Self {
        Self {
            config,
            host,
            snapshotter,
        }
    }

    /// Capabilities the page currently offers.
    pub fn capabilities(&self) -> RasterCapabilities {
        RasterCapabilities {
            tool_hook: self.host.has_render_hook(&self.config.hooks.tool),
            library_hook: self.host.has_render_hook(&self.config.hooks.library),
            three_renderer_size: self.host.three_renderer_size(),
        }
    }

    /// Rasterize a target with the configured snapshot background.
    pub async fn render(&self, target: &ExportTarget<H::Element>, multiplier: f64) -> ExportResult<DataUrl> {
        self.render_with_background(target, multiplier, self.config.background_color.as_deref())
            .await
    }

    /// Rasterize a target; `background` fills DOM snapshots (`None` keeps the page's own).
    pub async fn render_with_background(
        &self,
        target: &ExportTarget<H::Element>,
        multiplier: f64,
        background: Option<&str>,
    ) -> ExportResult<DataUrl> {
        ResolutionRequest::new(multiplier).validate()?;

        let size = if target.is_canvas() {
            self.host.canvas_size(&target.element)
        } else {
            (0, 0)
        };
        let plans = plan_still(
            target.kind,
            size,
            multiplier,
            &self.capabilities(),
            background,
        );

        for plan in &plans {
            if let Some((width, height)) = plan.output_size() {
                check_canvas_size(width, height)?;
            }
            if let Some(image) = self.execute(target, plan, multiplier).await? {
                return Ok(image);
            }
        }
        Err(ExportError::Canvas("no render path produced an image".to_string()))
    }

    async fn execute(
        &self,
        target: &ExportTarget<H::Element>,
        plan: &RasterPlan,
        multiplier: f64,
    ) -> ExportResult<Option<DataUrl>> {
        let element = &target.element;
        match plan {
            RasterPlan::Direct => self.host.encode_canvas(element).map(Some),
            RasterPlan::Hook {
                kind,
                width,
                height,
            } => {
                let hook = match kind {
                    HookKind::Tool => &self.config.hooks.tool,
                    HookKind::Library => &self.config.hooks.library,
                };
                match self.host.render_hook(hook, element, *width, *height, multiplier) {
                    Ok(Some(image)) => {
                        tracing::debug!(%hook, width, height, "rendered with high-resolution hook");
                        Ok(Some(image))
                    }
                    Ok(None) => Ok(None),
                    Err(e) => {
                        tracing::warn!(%hook, error = %e, "render hook failed, trying next method");
                        Ok(None)
                    }
                }
            }
            RasterPlan::Upscale {
                width,
                height,
                smoothing,
            } => {
                if *smoothing == Smoothing::Smooth {
                    tracing::warn!(
                        width,
                        height,
                        "no high-resolution hook available, falling back to canvas upscale"
                    );
                }
                self.host
                    .scaled_copy(element, *width, *height, *smoothing)
                    .map(Some)
            }
            RasterPlan::ThreeRerender(three) => {
                tracing::debug!(
                    width = three.target_width,
                    height = three.target_height,
                    "re-rendering Three.js scene"
                );
                self.host.three_rerender(three).map(Some)
            }
            RasterPlan::DomSnapshot(options) => self.snapshotter.snapshot(element, options).await.map(Some),
        }
    }

    /// Rasterize and download a target.
    ///
    /// Failures are reported through the notifier and never propagate.
    /// Returns whether a download was triggered.
    pub async fn export_still<D, N>(
        &self,
        target: &ExportTarget<H::Element>,
        request: &ResolutionRequest,
        today: NaiveDate,
        downloader: &D,
        notifier: &N,
    ) -> bool
    where
        D: Downloader + ?Sized,
        N: Notifier + ?Sized,
    {
        let filename = request
            .filename
            .clone()
            .unwrap_or_else(|| still_filename(&self.config.tool_name, today));

        let result = async {
            let background = request
                .background
                .as_deref()
                .or(self.config.background_color.as_deref());
            let image = self
                .render_with_background(target, request.multiplier, background)
                .await?;
            downloader.download_url(&image.to_url(), &filename)
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!(%filename, multiplier = request.multiplier, "still exported");
                true
            }
            Err(e) => {
                report(notifier, "PNG export", &e);
                false
            }
        }
    }

    /// Resolve the current target, then export it.
    pub async fn export_page<D, N>(&self, request: &ResolutionRequest, today: NaiveDate, downloader: &D, notifier: &N) -> bool
    where
        D: Downloader + ?Sized,
        N: Notifier + ?Sized,
    {
        match TargetResolver::new(self.config).resolve(self.host) {
            Ok(target) => self.export_still(&target, request, today, downloader, notifier).await,
            Err(e) => {
                report(notifier, "PNG export", &e);
                false
            }
        }
    }
}

/// Canvas primitives over web-sys, plus the html2canvas snapshotter.
#[cfg(feature = "web")]
pub mod web {
    use std::future::Future;

    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{CanvasRenderingContext2d, Element, HtmlCanvasElement, ImageSmoothingQuality};

    use super::{copy_renderer_settings, RasterHost, Smoothing, SnapshotOptions, Snapshotter};
    use crate::config::LibrarySource;
    use crate::data::DataUrl;
    use crate::error::{describe_js, ExportError, ExportResult};
    use crate::loader::load_with_fallback;
    use crate::loader::web::{call_global, call_method, lookup_global, WebScriptLoader, WebTimer};
    use crate::sizing::ThreeRenderPlan;
    use crate::target::web::{WebPage, THREE_RENDERER_GLOBALS};

    fn canvas_err(e: JsValue) -> ExportError {
        ExportError::Canvas(describe_js(&e))
    }

    fn set(target: &JsValue, key: &str, value: &JsValue) -> ExportResult<()> {
        js_sys::Reflect::set(target, &JsValue::from_str(key), value)
            .map(|_| ())
            .map_err(canvas_err)
    }

    fn get(target: &JsValue, key: &str) -> Option<JsValue> {
        js_sys::Reflect::get(target, &JsValue::from_str(key))
            .ok()
            .filter(|v| !v.is_undefined() && !v.is_null())
    }

    fn get_path(target: &JsValue, path: &str) -> Option<JsValue> {
        path.split('.').try_fold(target.clone(), |value, key| get(&value, key))
    }

    fn set_path(target: &JsValue, path: &str, value: &JsValue) -> ExportResult<()> {
        let (parent, key) = match path.rsplit_once('.') {
            Some((parent, key)) => (
                get_path(target, parent)
                    .ok_or_else(|| ExportError::Canvas(format!("renderer has no {parent}")))?,
                key,
            ),
            None => (target.clone(), path),
        };
        set(&parent, key, value)
    }

    /// Encode a canvas as a PNG data URL.
    pub fn encode_png(canvas: &HtmlCanvasElement) -> ExportResult<DataUrl> {
        let url = canvas.to_data_url_with_type("image/png").map_err(canvas_err)?;
        DataUrl::parse(&url)
    }

    /// Get the 2d context of a canvas.
    pub fn context_2d(canvas: &HtmlCanvasElement) -> ExportResult<CanvasRenderingContext2d> {
        canvas
            .get_context("2d")
            .map_err(canvas_err)?
            .ok_or_else(|| ExportError::Canvas("No 2d context available".to_string()))?
            .dyn_into::<CanvasRenderingContext2d>()
            .map_err(|_| ExportError::Canvas("Failed to cast to CanvasRenderingContext2d".to_string()))
    }

    /// Create a detached canvas of the given size.
    pub fn scratch_canvas(page: &WebPage, width: u32, height: u32) -> ExportResult<HtmlCanvasElement> {
        let canvas = page
            .document()
            .create_element("canvas")
            .map_err(canvas_err)?
            .dyn_into::<HtmlCanvasElement>()
            .map_err(|_| ExportError::Canvas("Failed to cast element to HtmlCanvasElement".to_string()))?;
        canvas.set_width(width);
        canvas.set_height(height);
        Ok(canvas)
    }

    fn three_parts() -> Option<(JsValue, JsValue, JsValue)> {
        let renderer = THREE_RENDERER_GLOBALS.iter().find_map(|name| lookup_global(name))?;
        Some((renderer, lookup_global("scene")?, lookup_global("camera")?))
    }

    impl RasterHost for WebPage {
        fn encode_canvas(&self, canvas: &Element) -> ExportResult<DataUrl> {
            encode_png(&WebPage::as_canvas(canvas)?)
        }

        fn scaled_copy(&self, canvas: &Element, width: u32, height: u32, smoothing: Smoothing) -> ExportResult<DataUrl> {
            let source = WebPage::as_canvas(canvas)?;
            let scratch = scratch_canvas(self, width, height)?;
            let ctx = context_2d(&scratch)?;
            match smoothing {
                Smoothing::Smooth => {
                    ctx.set_image_smoothing_enabled(true);
                    ctx.set_image_smoothing_quality(ImageSmoothingQuality::High);
                }
                Smoothing::Crisp => ctx.set_image_smoothing_enabled(false),
            }
            ctx.draw_image_with_html_canvas_element_and_dw_and_dh(&source, 0.0, 0.0, width as f64, height as f64)
                .map_err(canvas_err)?;
            encode_png(&scratch)
        }

        fn has_render_hook(&self, hook: &str) -> bool {
            lookup_global(hook).is_some_and(|f| f.is_function())
        }

        fn render_hook(
            &self,
            hook: &str,
            _canvas: &Element,
            width: u32,
            height: u32,
            multiplier: f64,
        ) -> ExportResult<Option<DataUrl>> {
            let scratch = scratch_canvas(self, width, height)?;
            let rendered = call_global(hook, &[scratch.clone().into(), JsValue::from_f64(multiplier)])
                .map_err(canvas_err)?;
            // An explicit `false` means the hook declined.
            if rendered.as_bool() == Some(false) {
                return Ok(None);
            }
            encode_png(&scratch).map(Some)
        }

        fn three_renderer_size(&self) -> Option<(f64, f64)> {
            let (renderer, _, _) = three_parts()?;
            let vector = lookup_global("THREE.Vector2")?.dyn_into::<js_sys::Function>().ok()?;
            let target = js_sys::Reflect::construct(&vector, &js_sys::Array::new()).ok()?;
            let size = call_method(&renderer, "getSize", &[target]).ok()?;
            let width = get(&size, "x")?.as_f64()?;
            let height = get(&size, "y")?.as_f64()?;
            (width > 0.0 && height > 0.0).then_some((width, height))
        }

        fn three_rerender(&self, plan: &ThreeRenderPlan) -> ExportResult<DataUrl> {
            let missing = || ExportError::Canvas("Three.js scene is not available".to_string());
            let (renderer, scene, camera) = three_parts().ok_or_else(missing)?;
            let ctor = lookup_global("THREE.WebGLRenderer")
                .and_then(|c| c.dyn_into::<js_sys::Function>().ok())
                .ok_or_else(missing)?;

            let options = js_sys::Object::new();
            set(&options, "antialias", &JsValue::TRUE)?;
            set(&options, "alpha", &JsValue::TRUE)?;
            set(&options, "preserveDrawingBuffer", &JsValue::TRUE)?;
            let temp = js_sys::Reflect::construct(&ctor, &js_sys::Array::of1(&options)).map_err(canvas_err)?;

            let saved_aspect = get(&camera, "aspect").and_then(|a| a.as_f64());
            let result = (|| -> ExportResult<DataUrl> {
                call_method(&temp, "setPixelRatio", &[JsValue::from_f64(1.0)]).map_err(canvas_err)?;
                call_method(
                    &temp,
                    "setSize",
                    &[
                        JsValue::from_f64(plan.target_width as f64),
                        JsValue::from_f64(plan.target_height as f64),
                        JsValue::FALSE,
                    ],
                )
                .map_err(canvas_err)?;
                if let (Some(color), Ok(alpha)) = (
                    lookup_global("THREE.Color")
                        .and_then(|c| c.dyn_into::<js_sys::Function>().ok())
                        .and_then(|c| js_sys::Reflect::construct(&c, &js_sys::Array::new()).ok()),
                    call_method(&renderer, "getClearAlpha", &[]),
                ) {
                    if let Ok(color) = call_method(&renderer, "getClearColor", &[color]) {
                        let _ = call_method(&temp, "setClearColor", &[color, alpha]);
                    }
                }
                let copied = copy_renderer_settings(
                    |path| get_path(&renderer, path),
                    |path, value| {
                        if let Err(e) = set_path(&temp, path, &value) {
                            tracing::warn!(%path, error = %e, "could not copy renderer setting");
                        }
                    },
                );
                tracing::debug!(?copied, "copied live renderer settings");
                if saved_aspect.is_some() {
                    set(&camera, "aspect", &JsValue::from_f64(plan.target_aspect()))?;
                    call_method(&camera, "updateProjectionMatrix", &[]).map_err(canvas_err)?;
                }
                call_method(&temp, "render", &[scene.clone(), camera.clone()]).map_err(canvas_err)?;
                let canvas = get(&temp, "domElement")
                    .and_then(|c| c.dyn_into::<HtmlCanvasElement>().ok())
                    .ok_or_else(|| ExportError::Canvas("renderer has no canvas".to_string()))?;
                encode_png(&canvas)
            })();

            if let Some(aspect) = saved_aspect {
                let _ = set(&camera, "aspect", &JsValue::from_f64(aspect));
                let _ = call_method(&camera, "updateProjectionMatrix", &[]);
            }
            let _ = call_method(&temp, "dispose", &[]);
            result
        }
    }

    /// DOM snapshots through html2canvas, loaded on first use.
    #[derive(Clone, Debug)]
    pub struct Html2Canvas {
        source: LibrarySource,
    }

    impl Html2Canvas {
        pub fn new(source: LibrarySource) -> Self {
            Self { source }
        }

        async fn capture(&self, element: &Element, options: &SnapshotOptions) -> ExportResult<DataUrl> {
            load_with_fallback(&WebScriptLoader, &WebTimer, &self.source).await?;

            let settings = js_sys::Object::new();
            set(&settings, "scale", &JsValue::from_f64(options.scale))?;
            let background = options
                .background
                .as_deref()
                .map_or(JsValue::NULL, JsValue::from_str);
            set(&settings, "backgroundColor", &background)?;
            set(&settings, "useCORS", &JsValue::TRUE)?;
            set(&settings, "logging", &JsValue::FALSE)?;

            let promise = call_global(&self.source.global, &[element.clone().into(), settings.into()])
                .map_err(canvas_err)?
                .dyn_into::<js_sys::Promise>()
                .map_err(|_| ExportError::Canvas("html2canvas did not return a promise".to_string()))?;
            let canvas = JsFuture::from(promise)
                .await
                .map_err(canvas_err)?
                .dyn_into::<HtmlCanvasElement>()
                .map_err(|_| ExportError::Canvas("html2canvas did not produce a canvas".to_string()))?;
            encode_png(&canvas)
        }
    }

    impl Snapshotter<Element> for Html2Canvas {
        fn snapshot(&self, element: &Element, options: &SnapshotOptions) -> impl Future<Output = ExportResult<DataUrl>> {
            self.capture(element, options)
        }
    }
}
