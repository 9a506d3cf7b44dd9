//! JavaScript-facing export API.
//!
//! Every method reports failures to the user itself; promises resolve to
//! `true` when a download was triggered and never reject.

use std::future::Future;
use std::rc::Rc;

use chrono::Local;
use js_sys::Promise;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::HtmlCanvasElement;

use crate::codec::{FormatChoice, QualityTier};
use crate::config::ExportConfig;
use crate::data::{FrameworkTag, ResolutionRequest};
use crate::download::web::WebDownloader;
use crate::download::{recording_filename, Downloader};
use crate::error::{ExportError, ExportResult};
use crate::loader::web::{sleep, WebTimer};
use crate::loader::Timer;
use crate::notify::web::WebNotifier;
use crate::notify::{report, Notifier};
use crate::raster::web::Html2Canvas;
use crate::raster::RasterExporter;
use crate::recording::web::WebRecorder;
use crate::recording::RecordingRequest;
use crate::remote::web::{page_source, FetchTransport};
use crate::remote::{output_extension, LibraryCache, RemoteRenderClient, SnapshotBuilder, SubmitRequest};
use crate::sequence::web::{CanvasCapture, JsZipArchiver};
use crate::sequence::{SequenceExporter, SequenceOutcome, SequenceRequest};
use crate::target::web::WebPage;
use crate::target::{Page, TargetResolver};

/// Timers, downloads and notifications of the browser window.
#[derive(Clone, Copy, Debug, Default)]
struct Browser;

impl Timer for Browser {
    fn sleep(&self, ms: u32) -> impl Future<Output = ()> {
        sleep(ms)
    }

    fn now_ms(&self) -> Option<f64> {
        WebTimer.now_ms()
    }
}

impl Downloader for Browser {
    fn download_url(&self, url: &str, filename: &str) -> ExportResult<()> {
        WebDownloader.download_url(url, filename)
    }

    fn download_bytes(&self, bytes: &[u8], mime: &str, filename: &str) -> ExportResult<()> {
        WebDownloader.download_bytes(bytes, mime, filename)
    }
}

impl Notifier for Browser {
    fn alert(&self, message: &str) {
        WebNotifier.alert(message);
    }

    fn progress(&self, message: Option<&str>) {
        WebNotifier.progress(message);
    }

    fn set_recording_indicator(&self, recording: bool) {
        WebNotifier.set_recording_indicator(recording);
    }
}

fn live_canvas(config: &ExportConfig) -> ExportResult<(HtmlCanvasElement, Option<FrameworkTag>)> {
    let page = WebPage::new()?;
    let (element, framework) = TargetResolver::new(config).resolve_canvas(&page)?;
    Ok((WebPage::as_canvas(&element)?, framework))
}

fn resolved(value: bool) -> Promise {
    Promise::resolve(&JsValue::from_bool(value))
}

/// Export entry points for one page.
#[wasm_bindgen]
pub struct WebExporter {
    config: Rc<ExportConfig>,
    recorder: WebRecorder,
    sequence: Rc<SequenceExporter>,
    library_cache: Rc<LibraryCache>,
}

#[wasm_bindgen]
impl WebExporter {
    /// Create an exporter from an optional JSON configuration.
    ///
    /// Invalid configuration falls back to the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config: Option<String>) -> WebExporter {
        let config = match config.as_deref().map(ExportConfig::from_json_str) {
            Some(Ok(config)) => config,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "invalid export configuration, using defaults");
                web_sys::console::warn_1(&JsValue::from_str(&format!("Chatooly: invalid export configuration: {e}")));
                ExportConfig::default()
            }
            None => ExportConfig::default(),
        };
        WebExporter {
            recorder: WebRecorder::new(&config.tool_name),
            config: Rc::new(config),
            sequence: Rc::new(SequenceExporter::new()),
            library_cache: Rc::new(LibraryCache::new()),
        }
    }

    /// Download the export target as PNG at `multiplier` times its resolution.
    ///
    /// `background` fills DOM snapshots for this export only; `None` uses
    /// the configured background.
    #[wasm_bindgen(js_name = exportPng)]
    pub fn export_png(&self, multiplier: f64, filename: Option<String>, background: Option<String>) -> Promise {
        let config = Rc::clone(&self.config);
        future_to_promise(async move {
            let mut request = ResolutionRequest::new(multiplier);
            if let Some(filename) = filename {
                request = request.with_filename(filename);
            }
            if let Some(background) = background {
                request = request.with_background(background);
            }
            let exported = match WebPage::new() {
                Ok(page) => {
                    let snapshotter = Html2Canvas::new(config.snapshot.clone());
                    RasterExporter::new(&config, &page, &snapshotter)
                        .export_page(&request, Local::now().date_naive(), &Browser, &Browser)
                        .await
                }
                Err(e) => {
                    report(&Browser, "PNG export", &e);
                    false
                }
            };
            Ok(JsValue::from_bool(exported))
        })
    }

    /// Start recording the live canvas.
    ///
    /// A `png-sequence` format runs a sequence export instead.
    #[wasm_bindgen(js_name = startRecording)]
    pub fn start_recording(
        &self,
        duration: f64,
        fps: f64,
        format: String,
        quality: String,
        custom_mbps: Option<f64>,
    ) -> Promise {
        let format = match format.parse::<FormatChoice>() {
            Ok(format) => format,
            Err(e) => {
                report(&Browser, "Recording", &e);
                return resolved(false);
            }
        };
        if format == FormatChoice::PngSequence {
            return self.export_sequence(duration, fps);
        }

        let request = RecordingRequest::new(duration, fps)
            .with_format(format)
            .with_quality(QualityTier::parse(&quality, custom_mbps));
        let started = live_canvas(&self.config).and_then(|(canvas, framework)| self.recorder.start(canvas, framework, request));
        match started {
            Ok(()) => resolved(true),
            Err(e @ ExportError::InvalidState { .. }) => {
                tracing::warn!(error = %e, "recording already in progress");
                resolved(false)
            }
            Err(e) => {
                report(&Browser, "Recording", &e);
                resolved(false)
            }
        }
    }

    /// Stop the running recording; the file downloads once the recorder finishes.
    #[wasm_bindgen(js_name = stopRecording)]
    pub fn stop_recording(&self) -> bool {
        self.recorder.stop()
    }

    #[wasm_bindgen(js_name = isRecording)]
    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Capture `duration` seconds at `fps` as a ZIP of PNG frames.
    #[wasm_bindgen(js_name = exportSequence)]
    pub fn export_sequence(&self, duration: f64, fps: f64) -> Promise {
        if self.sequence.is_exporting() {
            tracing::warn!("PNG sequence export already in progress, ignoring request");
            return resolved(false);
        }
        let config = Rc::clone(&self.config);
        let sequence = Rc::clone(&self.sequence);
        future_to_promise(async move {
            let (canvas, _) = match live_canvas(&config) {
                Ok(found) => found,
                Err(e) => {
                    report(&Browser, "PNG sequence export", &e);
                    return Ok(JsValue::FALSE);
                }
            };
            let capture = CanvasCapture::new(canvas);
            let archiver = JsZipArchiver::new(config.archive.clone());
            let outcome = sequence
                .export(&config, &capture, &archiver, &Browser, SequenceRequest::new(duration, fps), Local::now())
                .await;
            Ok(JsValue::from_bool(matches!(outcome, SequenceOutcome::Completed { .. })))
        })
    }

    #[wasm_bindgen(js_name = isExporting)]
    pub fn is_exporting(&self) -> bool {
        self.sequence.is_exporting()
    }

    /// Render the page on the remote render server and download the result.
    #[wasm_bindgen(js_name = renderRemote)]
    pub fn render_remote(&self, duration: f64, fps: f64, transparent: bool, format: String) -> Promise {
        let config = Rc::clone(&self.config);
        let cache = Rc::clone(&self.library_cache);
        future_to_promise(async move {
            let result = render_remote(&config, &cache, duration, fps, transparent, &format).await;
            Browser.progress(None);
            match result {
                Ok(()) => Ok(JsValue::TRUE),
                Err(e) => {
                    report(&Browser, "Remote render", &e);
                    Ok(JsValue::FALSE)
                }
            }
        })
    }
}

async fn render_remote(
    config: &ExportConfig,
    cache: &LibraryCache,
    duration: f64,
    fps: f64,
    transparent: bool,
    format: &str,
) -> ExportResult<()> {
    let page = WebPage::new()?;
    let (width, height) = match TargetResolver::new(config).resolve_canvas(&page) {
        Ok((canvas, _)) => page.canvas_size(&canvas),
        Err(_) => page
            .document()
            .document_element()
            .map_or((0, 0), |root| (root.client_width().max(0) as u32, root.client_height().max(0) as u32)),
    };

    let html = SnapshotBuilder::new(&FetchTransport, cache)
        .transparent(transparent)
        .build(&page_source(page.document()))
        .await;
    let request = SubmitRequest {
        html,
        duration,
        fps,
        width,
        height,
        transparent,
        format: format.to_string(),
    };
    let url = RemoteRenderClient::new(&config.remote, &FetchTransport, &WebTimer)
        .render(&request, &Browser)
        .await?;
    let filename = recording_filename(&config.tool_name, &Local::now(), output_extension(format));
    Browser.download_url(&url, &filename)
}
