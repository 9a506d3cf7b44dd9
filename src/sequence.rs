//! PNG-sequence export: timed frame capture assembled into a ZIP archive.
//!
//! Frames are paced by wall-clock delays, not by the source's render loop,
//! so a source that renders slower than the requested fps produces
//! duplicate frames. All frames stay in memory until the archive is built.

use std::cell::Cell;
use std::fmt::Write as _;
use std::future::Future;

use chrono::{DateTime, TimeZone};

use crate::config::ExportConfig;
use crate::data::DataUrl;
use crate::download::{sequence_folder, Downloader};
use crate::error::{ExportError, ExportResult};
use crate::loader::Timer;
use crate::notify::Notifier;

/// Captures frames from the live source canvas.
///
/// Implementations own an offscreen export canvas with alpha enabled,
/// allocated by [`prepare`](Self::prepare) and dropped by
/// [`release`](Self::release).
pub trait FrameCapture {
    /// Allocate the export canvas sized to the source; returns that size.
    fn prepare(&self) -> ExportResult<(u32, u32)>;

    /// Clear the export canvas, draw the source onto it and encode as PNG.
    fn capture_frame(&self) -> ExportResult<DataUrl>;

    /// Release the export canvas and its context.
    fn release(&self);
}

/// Builds ZIP archives (JSZip in the browser).
pub trait Archiver {
    fn build_zip(&self, layout: &ArchiveLayout, compression_level: u8) -> impl Future<Output = ExportResult<Vec<u8>>>;
}

/// A file inside the archive folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Archive contents: one folder holding frames and a readme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub folder: String,
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveLayout {
    /// Archive filename, `{folder}.zip`.
    pub fn zip_name(&self) -> String {
        format!("{}.zip", self.folder)
    }

    /// Full path of every entry, `{folder}/{name}`.
    pub fn paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| format!("{}/{}", self.folder, e.name))
            .collect()
    }
}

/// Longest sequence accepted, ten minutes at 60 fps.
pub const MAX_FRAMES: usize = 36_000;

/// Settings of one sequence export.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SequenceRequest {
    pub duration_secs: f64,
    pub fps: f64,
}

impl SequenceRequest {
    pub fn new(duration_secs: f64, fps: f64) -> Self {
        Self { duration_secs, fps }
    }

    fn validate(&self) -> ExportResult<()> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if valid(self.duration_secs) && valid(self.fps) && (self.duration_secs * self.fps).ceil() <= MAX_FRAMES as f64 {
            Ok(())
        } else {
            Err(ExportError::InvalidCapture {
                duration: self.duration_secs,
                fps: self.fps,
            })
        }
    }

    /// Number of frames to capture, `ceil(duration * fps)`, at most [`MAX_FRAMES`].
    pub fn total_frames(&self) -> usize {
        ((self.duration_secs * self.fps).ceil().max(0.0) as usize).min(MAX_FRAMES)
    }

    /// Delay between captures in milliseconds.
    pub fn frame_interval_ms(&self) -> u32 {
        (1000.0 / self.fps).round().max(0.0) as u32
    }
}

/// Filename of frame `index` (zero-based), `frame_0001.png` onwards.
///
/// Padding is four digits, widened when the sequence needs more.
pub fn frame_name(index: usize, total: usize) -> String {
    let width = total.to_string().len().max(4);
    format!("frame_{:0width$}.png", index + 1)
}

/// Text of the readme stored next to the frames.
pub fn readme(tool_name: &str, request: &SequenceRequest, frames: usize, size: (u32, u32), exported_at: &str) -> String {
    let mut text = String::new();
    let title = format!("{tool_name} - PNG sequence");
    let _ = writeln!(text, "{title}");
    let _ = writeln!(text, "{}", "=".repeat(title.chars().count()));
    let _ = writeln!(text);
    let _ = writeln!(text, "Frames:     {frames}");
    let _ = writeln!(text, "Frame rate: {} fps", request.fps);
    let _ = writeln!(text, "Duration:   {} s", request.duration_secs);
    let _ = writeln!(text, "Dimensions: {}x{} px", size.0, size.1);
    let _ = writeln!(text, "Format:     PNG, RGBA (transparency preserved)");
    if frames > 0 {
        let _ = writeln!(
            text,
            "Files:      {} .. {}",
            frame_name(0, frames),
            frame_name(frames - 1, frames)
        );
    }
    let _ = writeln!(text, "Exported:   {exported_at}");
    let _ = writeln!(text);
    let _ = writeln!(text, "Encode with ffmpeg:");
    let pattern = format!("frame_%0{}d.png", frames.to_string().len().max(4));
    let _ = writeln!(
        text,
        "  ffmpeg -framerate {} -i {pattern} -c:v libx264 -pix_fmt yuv420p output.mp4",
        request.fps
    );
    text
}

/// Result of a sequence export call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Archive downloaded
    Completed { frames: usize },
    /// Another export was running; nothing was done
    Busy,
    /// Export failed and the user was told
    Failed,
}

/// Clears the in-flight flag and releases the capture when dropped, so a
/// panicking or cancelled export cannot leave the exporter busy.
struct InFlight<'a, C: FrameCapture + ?Sized> {
    flag: &'a Cell<bool>,
    capture: &'a C,
}

impl<C: FrameCapture + ?Sized> Drop for InFlight<'_, C> {
    fn drop(&mut self) {
        self.capture.release();
        self.flag.set(false);
    }
}

/// Single-flight PNG-sequence exporter.
#[derive(Debug, Default)]
pub struct SequenceExporter {
    is_exporting: Cell<bool>,
}

impl SequenceExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an export is in flight.
    #[inline]
    pub fn is_exporting(&self) -> bool {
        self.is_exporting.get()
    }

    /// Capture `request.total_frames()` frames and download them as a ZIP.
    ///
    /// A call made while another export is in flight logs a warning and
    /// returns [`SequenceOutcome::Busy`] without touching the running job.
    pub async fn export<C, A, H, Tz>(
        &self,
        config: &ExportConfig,
        capture: &C,
        archiver: &A,
        host: &H,
        request: SequenceRequest,
        now: DateTime<Tz>,
    ) -> SequenceOutcome
    where
        C: FrameCapture + ?Sized,
        A: Archiver + ?Sized,
        H: Timer + Downloader + Notifier + ?Sized,
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        if self.is_exporting.replace(true) {
            tracing::warn!("PNG sequence export already in progress, ignoring request");
            return SequenceOutcome::Busy;
        }

        let in_flight = InFlight {
            flag: &self.is_exporting,
            capture,
        };
        let result = self.run(config, capture, archiver, host, request, &now).await;
        drop(in_flight);

        match result {
            Ok(frames) => {
                host.progress(None);
                tracing::info!(frames, "PNG sequence exported");
                SequenceOutcome::Completed { frames }
            }
            Err(e) => {
                tracing::error!(error = %e, "PNG sequence export failed");
                host.progress(None);
                host.alert(&format!(
                    "PNG sequence export failed: {}\n\nTry the video export instead.",
                    e.user_message()
                ));
                SequenceOutcome::Failed
            }
        }
    }

    async fn run<C, A, H, Tz>(
        &self,
        config: &ExportConfig,
        capture: &C,
        archiver: &A,
        host: &H,
        request: SequenceRequest,
        now: &DateTime<Tz>,
    ) -> ExportResult<usize>
    where
        C: FrameCapture + ?Sized,
        A: Archiver + ?Sized,
        H: Timer + Downloader + Notifier + ?Sized,
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        request.validate()?;
        let total = request.total_frames();
        let interval = request.frame_interval_ms();
        let size = capture.prepare()?;
        tracing::info!(total, fps = request.fps, width = size.0, height = size.1, "capturing PNG sequence");

        let mut frames: Vec<DataUrl> = Vec::with_capacity(total);
        for index in 0..total {
            host.progress(Some(&format!("Capturing frame {}/{}...", index + 1, total)));
            frames.push(capture.capture_frame()?);
            if index + 1 < total {
                host.sleep(interval).await;
            }
        }

        host.progress(Some("Creating ZIP..."));
        let folder = sequence_folder(&config.tool_name, now);
        let exported_at = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let mut entries: Vec<ArchiveEntry> = frames
            .into_iter()
            .enumerate()
            .map(|(index, frame)| ArchiveEntry {
                name: frame_name(index, total),
                bytes: frame.bytes,
            })
            .collect();
        entries.push(ArchiveEntry {
            name: "README.txt".to_string(),
            bytes: readme(&config.tool_name, &request, total, size, &exported_at).into_bytes(),
        });
        let layout = ArchiveLayout { folder, entries };

        let zip = archiver
            .build_zip(&layout, config.archive.compression_level)
            .await?;
        host.download_bytes(&zip, "application/zip", &layout.zip_name())?;
        Ok(total)
    }
}

/// Canvas frame capture and JSZip archives.
#[cfg(feature = "web")]
pub mod web {
    use std::cell::RefCell;
    use std::future::Future;

    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement};

    use super::{ArchiveLayout, Archiver, FrameCapture};
    use crate::config::ArchiveSource;
    use crate::data::DataUrl;
    use crate::error::{describe_js, ExportError, ExportResult};
    use crate::loader::load_once;
    use crate::loader::web::{call_method, lookup_global, WebScriptLoader};
    use crate::raster::web::{encode_png, scratch_canvas};
    use crate::target::web::WebPage;

    /// Captures a live canvas through an alpha-enabled offscreen copy.
    #[derive(Debug)]
    pub struct CanvasCapture {
        source: HtmlCanvasElement,
        export: RefCell<Option<(HtmlCanvasElement, CanvasRenderingContext2d)>>,
    }

    impl CanvasCapture {
        pub fn new(source: HtmlCanvasElement) -> Self {
            Self {
                source,
                export: RefCell::new(None),
            }
        }
    }

    fn canvas_err(e: JsValue) -> ExportError {
        ExportError::Canvas(describe_js(&e))
    }

    impl FrameCapture for CanvasCapture {
        fn prepare(&self) -> ExportResult<(u32, u32)> {
            let (width, height) = (self.source.width(), self.source.height());
            let canvas = scratch_canvas(&WebPage::new()?, width, height)?;

            let options = js_sys::Object::new();
            js_sys::Reflect::set(&options, &JsValue::from_str("alpha"), &JsValue::TRUE).map_err(canvas_err)?;
            let ctx = canvas
                .get_context_with_context_options("2d", &options)
                .map_err(canvas_err)?
                .ok_or_else(|| ExportError::Canvas("No 2d context available".to_string()))?
                .dyn_into::<CanvasRenderingContext2d>()
                .map_err(|_| ExportError::Canvas("Failed to cast to CanvasRenderingContext2d".to_string()))?;

            *self.export.borrow_mut() = Some((canvas, ctx));
            Ok((width, height))
        }

        fn capture_frame(&self) -> ExportResult<DataUrl> {
            let export = self.export.borrow();
            let (canvas, ctx) = export
                .as_ref()
                .ok_or_else(|| ExportError::Canvas("export canvas not prepared".to_string()))?;
            ctx.clear_rect(0.0, 0.0, canvas.width() as f64, canvas.height() as f64);
            ctx.draw_image_with_html_canvas_element(&self.source, 0.0, 0.0)
                .map_err(canvas_err)?;
            encode_png(canvas)
        }

        fn release(&self) {
            if let Some((canvas, _)) = self.export.borrow_mut().take() {
                canvas.set_width(0);
                canvas.set_height(0);
            }
        }
    }

    /// Builds archives with JSZip, loaded from a single URL on first use.
    #[derive(Clone, Debug)]
    pub struct JsZipArchiver {
        source: ArchiveSource,
    }

    impl JsZipArchiver {
        pub fn new(source: ArchiveSource) -> Self {
            Self { source }
        }

        async fn zip(&self, layout: &ArchiveLayout, compression_level: u8) -> ExportResult<Vec<u8>> {
            load_once(&WebScriptLoader, &self.source).await?;
            let err = |e: JsValue| ExportError::Archive(describe_js(&e));

            let ctor = lookup_global(&self.source.global)
                .and_then(|c| c.dyn_into::<js_sys::Function>().ok())
                .ok_or_else(|| ExportError::Archive(format!("{} is not available", self.source.global)))?;
            let zip = js_sys::Reflect::construct(&ctor, &js_sys::Array::new()).map_err(err)?;
            let folder = call_method(&zip, "folder", &[JsValue::from_str(&layout.folder)]).map_err(err)?;
            for entry in &layout.entries {
                let data = js_sys::Uint8Array::from(entry.bytes.as_slice());
                call_method(&folder, "file", &[JsValue::from_str(&entry.name), data.into()]).map_err(err)?;
            }

            let level = js_sys::Object::new();
            js_sys::Reflect::set(&level, &JsValue::from_str("level"), &JsValue::from(compression_level)).map_err(err)?;
            let options = js_sys::Object::new();
            js_sys::Reflect::set(&options, &JsValue::from_str("type"), &JsValue::from_str("uint8array")).map_err(err)?;
            js_sys::Reflect::set(&options, &JsValue::from_str("compression"), &JsValue::from_str("DEFLATE")).map_err(err)?;
            js_sys::Reflect::set(&options, &JsValue::from_str("compressionOptions"), &level).map_err(err)?;

            let promise = call_method(&zip, "generateAsync", &[options.into()])
                .map_err(err)?
                .dyn_into::<js_sys::Promise>()
                .map_err(|_| ExportError::Archive("generateAsync did not return a promise".to_string()))?;
            let bytes = JsFuture::from(promise).await.map_err(err)?;
            Ok(js_sys::Uint8Array::new(&bytes).to_vec())
        }
    }

    impl Archiver for JsZipArchiver {
        fn build_zip(&self, layout: &ArchiveLayout, compression_level: u8) -> impl Future<Output = ExportResult<Vec<u8>>> {
            self.zip(layout, compression_level)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use chrono::Utc;
    use futures::executor::block_on;
    use futures::future;

    use super::*;

    /// Host whose sleeps yield to the executor once, so concurrent calls interleave.
    #[derive(Default)]
    struct FakeHost {
        sleeps: RefCell<Vec<u32>>,
        downloads: RefCell<Vec<(usize, String)>>,
        progress: RefCell<Vec<Option<String>>>,
        alerts: RefCell<Vec<String>>,
    }

    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    impl Timer for FakeHost {
        fn sleep(&self, ms: u32) -> impl Future<Output = ()> {
            self.sleeps.borrow_mut().push(ms);
            YieldOnce(false)
        }
    }

    impl Downloader for FakeHost {
        fn download_url(&self, _url: &str, _filename: &str) -> ExportResult<()> {
            Ok(())
        }

        fn download_bytes(&self, bytes: &[u8], mime: &str, filename: &str) -> ExportResult<()> {
            assert_eq!(mime, "application/zip");
            self.downloads.borrow_mut().push((bytes.len(), filename.to_string()));
            Ok(())
        }
    }

    impl Notifier for FakeHost {
        fn alert(&self, message: &str) {
            self.alerts.borrow_mut().push(message.to_string());
        }

        fn progress(&self, message: Option<&str>) {
            self.progress.borrow_mut().push(message.map(str::to_string));
        }
    }

    #[derive(Default)]
    struct CountingCapture {
        captured: Cell<usize>,
        released: Cell<usize>,
    }

    impl FrameCapture for CountingCapture {
        fn prepare(&self) -> ExportResult<(u32, u32)> {
            Ok((400, 300))
        }

        fn capture_frame(&self) -> ExportResult<DataUrl> {
            let n = self.captured.get() + 1;
            self.captured.set(n);
            Ok(DataUrl::png(vec![n as u8]))
        }

        fn release(&self) {
            self.released.set(self.released.get() + 1);
        }
    }

    #[derive(Default)]
    struct FakeArchiver {
        layouts: RefCell<Vec<ArchiveLayout>>,
        fail: bool,
    }

    impl Archiver for FakeArchiver {
        fn build_zip(&self, layout: &ArchiveLayout, compression_level: u8) -> impl Future<Output = ExportResult<Vec<u8>>> {
            assert_eq!(compression_level, 6);
            self.layouts.borrow_mut().push(layout.clone());
            future::ready(if self.fail {
                Err(ExportError::Archive("generate failed".into()))
            } else {
                Ok(vec![0x50, 0x4b, 0x03, 0x04])
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_frame_math() {
        let request = SequenceRequest::new(2.5, 24.0);
        assert_eq!(request.total_frames(), 60);
        assert_eq!(request.frame_interval_ms(), 42);
        assert_eq!(SequenceRequest::new(1.0, 30.0).frame_interval_ms(), 33);
        assert_eq!(SequenceRequest::new(0.35, 10.0).total_frames(), 4);
    }

    #[test]
    fn test_frame_names_pad() {
        assert_eq!(frame_name(0, 10), "frame_0001.png");
        assert_eq!(frame_name(9, 10), "frame_0010.png");
        assert_eq!(frame_name(11_999, 12_000), "frame_12000.png");
        assert_eq!(frame_name(0, 12_000), "frame_00001.png");
    }

    #[test]
    fn test_one_second_at_ten_fps() {
        let config = ExportConfig::default();
        let exporter = SequenceExporter::new();
        let capture = CountingCapture::default();
        let archiver = FakeArchiver::default();
        let host = FakeHost::default();

        assert!(!exporter.is_exporting());
        let outcome = block_on(exporter.export(
            &config,
            &capture,
            &archiver,
            &host,
            SequenceRequest::new(1.0, 10.0),
            now(),
        ));
        assert!(!exporter.is_exporting());
        assert_eq!(outcome, SequenceOutcome::Completed { frames: 10 });
        assert_eq!(capture.captured.get(), 10);
        assert_eq!(capture.released.get(), 1);

        let layouts = archiver.layouts.borrow();
        let layout = &layouts[0];
        assert_eq!(layout.folder, "chatooly-tool-frames-20261019-093000");
        assert_eq!(layout.entries.len(), 11);
        let names: Vec<&str> = layout.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names[0], "frame_0001.png");
        assert_eq!(names[9], "frame_0010.png");
        assert_eq!(names[10], "README.txt");
        // Frames keep capture order.
        assert_eq!(layout.entries[0].bytes, vec![1]);
        assert_eq!(layout.entries[9].bytes, vec![10]);

        let readme = String::from_utf8(layout.entries[10].bytes.clone()).unwrap();
        assert!(readme.contains("Frames:     10"));
        assert!(readme.contains("Dimensions: 400x300 px"));

        // Delays only between frames.
        assert_eq!(*host.sleeps.borrow(), vec![100; 9]);
        assert_eq!(
            *host.downloads.borrow(),
            vec![(4, "chatooly-tool-frames-20261019-093000.zip".to_string())]
        );
        let progress = host.progress.borrow();
        assert_eq!(progress.first().cloned().flatten().as_deref(), Some("Capturing frame 1/10..."));
        assert!(progress.contains(&Some("Creating ZIP...".to_string())));
        assert_eq!(progress.last(), Some(&None));
    }

    #[test]
    fn test_concurrent_call_is_a_noop() {
        let config = ExportConfig::default();
        let exporter = SequenceExporter::new();
        let capture = CountingCapture::default();
        let archiver = FakeArchiver::default();
        let host = FakeHost::default();

        let (first, second) = block_on(async {
            let first = exporter.export(&config, &capture, &archiver, &host, SequenceRequest::new(0.5, 10.0), now());
            let second = async {
                // Runs while the first export is waiting between frames.
                assert!(exporter.is_exporting());
                exporter
                    .export(&config, &capture, &archiver, &host, SequenceRequest::new(1.0, 10.0), now())
                    .await
            };
            futures::join!(first, second)
        });

        assert_eq!(first, SequenceOutcome::Completed { frames: 5 });
        assert_eq!(second, SequenceOutcome::Busy);
        assert_eq!(capture.captured.get(), 5);
        assert_eq!(capture.released.get(), 1);
        assert_eq!(archiver.layouts.borrow()[0].entries.len(), 6);
        assert!(!exporter.is_exporting());
    }

    #[test]
    fn test_archive_failure_discards_frames() {
        let config = ExportConfig::default();
        let exporter = SequenceExporter::new();
        let capture = CountingCapture::default();
        let archiver = FakeArchiver {
            fail: true,
            ..Default::default()
        };
        let host = FakeHost::default();

        let outcome = block_on(exporter.export(
            &config,
            &capture,
            &archiver,
            &host,
            SequenceRequest::new(0.3, 10.0),
            now(),
        ));
        assert_eq!(outcome, SequenceOutcome::Failed);
        assert!(host.downloads.borrow().is_empty());
        assert_eq!(capture.released.get(), 1);
        assert!(!exporter.is_exporting());
        let alerts = host.alerts.borrow();
        assert!(alerts[0].contains("video export"));
        assert_eq!(host.progress.borrow().last(), Some(&None));
    }

    #[test]
    fn test_invalid_request_fails_before_capture() {
        let config = ExportConfig::default();
        let exporter = SequenceExporter::new();
        let capture = CountingCapture::default();
        let archiver = FakeArchiver::default();
        let host = FakeHost::default();

        let outcome = block_on(exporter.export(
            &config,
            &capture,
            &archiver,
            &host,
            SequenceRequest::new(1.0, 0.0),
            now(),
        ));
        assert_eq!(outcome, SequenceOutcome::Failed);
        assert_eq!(capture.captured.get(), 0);
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        let config = ExportConfig::default();
        let exporter = SequenceExporter::new();
        let capture = CountingCapture::default();
        let archiver = FakeArchiver::default();
        let host = FakeHost::default();

        let outcome = block_on(exporter.export(
            &config,
            &capture,
            &archiver,
            &host,
            SequenceRequest::new(1e12, 1e9),
            now(),
        ));
        assert_eq!(outcome, SequenceOutcome::Failed);
        assert_eq!(capture.captured.get(), 0);
        assert_eq!(capture.released.get(), 1);
        assert!(!exporter.is_exporting());
        assert!(host.alerts.borrow()[0].contains("Invalid capture settings"));
        assert_eq!(SequenceRequest::new(1e12, 1e9).total_frames(), MAX_FRAMES);

        // The longest accepted sequence still passes validation.
        assert!(SequenceRequest::new(600.0, 60.0).validate().is_ok());
        assert!(SequenceRequest::new(600.1, 60.0).validate().is_err());
    }

    #[test]
    fn test_dropped_export_clears_busy_flag() {
        let config = ExportConfig::default();
        let exporter = SequenceExporter::new();
        let capture = CountingCapture::default();
        let archiver = FakeArchiver::default();
        let host = FakeHost::default();

        {
            let export = exporter.export(&config, &capture, &archiver, &host, SequenceRequest::new(1.0, 10.0), now());
            futures::pin_mut!(export);
            let waker = futures::task::noop_waker();
            let mut cx = Context::from_waker(&waker);
            // Stops at the first delay between frames.
            assert!(export.as_mut().poll(&mut cx).is_pending());
            assert!(exporter.is_exporting());
        }
        assert!(!exporter.is_exporting());
        assert_eq!(capture.released.get(), 1);
        assert!(host.downloads.borrow().is_empty());
    }

    #[cfg(feature = "headless")]
    #[test]
    fn test_headless_capture_produces_png_frames() {
        use image::{Rgba, RgbaImage};

        use crate::headless::HeadlessPage;

        let mut page = HeadlessPage::new();
        let canvas = page.add_canvas("", RgbaImage::from_pixel(16, 8, Rgba([0, 128, 255, 200])));
        let capture = page.capture(canvas);
        let config = ExportConfig::default();
        let exporter = SequenceExporter::new();
        let archiver = FakeArchiver::default();
        let host = FakeHost::default();

        let outcome = block_on(exporter.export(
            &config,
            &capture,
            &archiver,
            &host,
            SequenceRequest::new(0.2, 10.0),
            now(),
        ));
        assert_eq!(outcome, SequenceOutcome::Completed { frames: 2 });
        let layout = &archiver.layouts.borrow()[0];
        let frame = image::load_from_memory(&layout.entries[0].bytes).unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 8));
    }
}
