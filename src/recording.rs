//! Recording controller for canvas-to-video capture.
//!
//! The controller owns the session state and decides what happens next; a
//! [`RecorderHost`] performs the side effects (mirror canvas, media
//! recorder, timers, download). The host reports recorder events back by
//! calling [`RecordingController::on_recorder_started`],
//! [`RecordingController::on_data`] and
//! [`RecordingController::on_recorder_stopped`], and drives the draw pump
//! by calling [`RecordingController::tick`] at the interval it was given.

use std::fmt;

use chrono::{DateTime, TimeZone};

use crate::codec::{negotiate, CodecChoice, FormatChoice, QualityTier};
use crate::data::FrameworkTag;
use crate::download::recording_filename;
use crate::error::{ExportError, ExportResult};

/// Pump interval for recognized frameworks (~60 Hz).
pub const PUMP_INTERVAL_MS: u32 = 16;

/// Pump interval when the source framework is unknown (~30 Hz).
pub const SLOW_PUMP_INTERVAL_MS: u32 = 33;

/// Lifecycle of a recording session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordingState {
    /// No session
    #[default]
    Idle,
    /// Recorder constructed, waiting for its start event
    Starting,
    /// Recorder running and the pump copying frames
    Recording,
    /// Stop requested, waiting for the recorder's stop event
    Stopping,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Starting => "starting",
            RecordingState::Recording => "recording",
            RecordingState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of one recording.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecordingRequest {
    pub duration_secs: f64,
    pub fps: f64,
    pub format: FormatChoice,
    pub quality: QualityTier,
}

impl RecordingRequest {
    pub fn new(duration_secs: f64, fps: f64) -> Self {
        Self {
            duration_secs,
            fps,
            format: FormatChoice::Auto,
            quality: QualityTier::High,
        }
    }

    pub fn with_format(mut self, format: FormatChoice) -> Self {
        self.format = format;
        self
    }

    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }

    /// Automatic stop delay in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        (self.duration_secs * 1000.0).round().max(0.0) as u32
    }

    fn validate(&self) -> ExportResult<()> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if valid(self.duration_secs) && valid(self.fps) {
            Ok(())
        } else {
            Err(ExportError::InvalidCapture {
                duration: self.duration_secs,
                fps: self.fps,
            })
        }
    }
}

/// Side effects of a recording session.
///
/// No method may call back into the controller synchronously; recorder
/// events and timer callbacks are delivered later from the event loop.
pub trait RecorderHost {
    /// Canvas handle (source and mirror)
    type Canvas;
    /// Encoded data chunk emitted by the recorder
    type Chunk;

    /// Whether the recorder accepts a MIME type.
    fn is_type_supported(&self, mime: &str) -> bool;

    /// Allocate the offscreen mirror canvas.
    fn create_mirror(&mut self, width: u32, height: u32) -> ExportResult<Self::Canvas>;

    /// Capture a stream from the mirror and construct the recorder.
    fn open_recorder(&mut self, mirror: &Self::Canvas, fps: f64, codec: &CodecChoice, bitrate: u32) -> ExportResult<()>;

    /// Start the recorder; its start event arrives later.
    fn start_recorder(&mut self) -> ExportResult<()>;

    /// Call [`RecordingController::tick`] every `interval_ms`.
    fn start_pump(&mut self, interval_ms: u32);

    /// Call [`RecordingController::stop`] once after `after_ms`.
    fn schedule_stop(&mut self, after_ms: u32);

    /// Ask the recorder to stop; its stop event arrives later.
    fn stop_recorder(&mut self) -> ExportResult<()>;

    /// Clear the mirror and draw the source onto it 1:1 without smoothing.
    fn copy_frame(&mut self, source: &Self::Canvas, mirror: &Self::Canvas) -> ExportResult<()>;

    /// Join the chunks into one file and download it.
    fn save(&mut self, chunks: Vec<Self::Chunk>, mime: &str, filename: &str) -> ExportResult<()>;

    /// Cancel the pump and the scheduled stop.
    fn cancel_timers(&mut self);

    /// Detach recorder event handlers and stop the captured stream.
    ///
    /// Called on every cleanup, including from inside the recorder's own
    /// stop event; must be harmless when no recorder is open.
    fn close_recorder(&mut self);

    /// Drop the mirror canvas and its context.
    fn release_mirror(&mut self, mirror: Self::Canvas);

    /// Show or hide the recording indicator.
    fn set_indicator(&mut self, recording: bool);
}

struct Session<C> {
    source: C,
    mirror: Option<C>,
    codec: CodecChoice,
    pump_interval_ms: u32,
    duration_ms: u32,
}

/// Platform-agnostic recording controller.
///
/// Walks `Idle -> Starting -> Recording -> Stopping -> Idle`. Only one
/// session can be live at a time.
///
/// ## Example
///
/// ```rust,ignore
/// let mut controller = RecordingController::new(host, "Wave");
/// controller.start(canvas, (400, 300), Some(FrameworkTag::Plain), RecordingRequest::new(2.0, 30.0))?;
/// // host: recorder start event
/// controller.on_recorder_started();
/// // host: pump timer
/// controller.tick();
/// // host: duration timer
/// controller.stop();
/// // host: recorder stop event
/// controller.on_recorder_stopped(chrono::Local::now())?;
/// ```
pub struct RecordingController<H: RecorderHost> {
    host: H,
    tool_name: String,
    state: RecordingState,
    session: Option<Session<H::Canvas>>,
    chunks: Vec<H::Chunk>,
}

impl<H: RecorderHost> RecordingController<H> {
    pub fn new(host: H, tool_name: impl Into<String>) -> Self {
        Self {
            host,
            tool_name: tool_name.into(),
            state: RecordingState::Idle,
            session: None,
            chunks: Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Check if a session is live (any state but `Idle`).
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.state != RecordingState::Idle
    }

    /// Codec of the live session.
    pub fn codec(&self) -> Option<&CodecChoice> {
        self.session.as_ref().map(|s| &s.codec)
    }

    #[inline]
    pub fn host(&self) -> &H {
        &self.host
    }

    #[inline]
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Number of chunks buffered so far.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Begin a session recording `source` (of pixel size `size`).
    ///
    /// `framework` is `None` when the canvas was not classified, which
    /// selects the slower pump. On any failure the session is torn down
    /// before the recorder starts.
    pub fn start(
        &mut self,
        source: H::Canvas,
        size: (u32, u32),
        framework: Option<FrameworkTag>,
        request: RecordingRequest,
    ) -> ExportResult<()> {
        if self.state != RecordingState::Idle {
            return Err(ExportError::InvalidState {
                expected: RecordingState::Idle.as_str(),
                actual: self.state.as_str(),
            });
        }
        if request.format == FormatChoice::PngSequence {
            return Err(ExportError::UnsupportedFormat {
                format: request.format.to_string(),
            });
        }
        request.validate()?;

        self.state = RecordingState::Starting;
        match self.open(source, size, framework, &request) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "failed to start recording");
                self.cleanup();
                Err(e)
            }
        }
    }

    fn open(
        &mut self,
        source: H::Canvas,
        (width, height): (u32, u32),
        framework: Option<FrameworkTag>,
        request: &RecordingRequest,
    ) -> ExportResult<()> {
        let host = &self.host;
        let codec = negotiate(request.format, |mime| host.is_type_supported(mime))?;
        let mirror = self.host.create_mirror(width, height)?;
        let bitrate = request.quality.bitrate();
        let pump_interval_ms = if framework.is_some() {
            PUMP_INTERVAL_MS
        } else {
            SLOW_PUMP_INTERVAL_MS
        };

        tracing::info!(
            mime = %codec.mime,
            bitrate,
            width,
            height,
            fps = request.fps,
            duration_secs = request.duration_secs,
            "starting recording"
        );

        let session = self.session.insert(Session {
            source,
            mirror: Some(mirror),
            codec,
            pump_interval_ms,
            duration_ms: request.duration_ms(),
        });
        if let Some(mirror) = session.mirror.as_ref() {
            self.host.open_recorder(mirror, request.fps, &session.codec, bitrate)?;
        }
        self.host.start_recorder()?;
        self.host.set_indicator(true);
        Ok(())
    }

    /// Recorder start event: begin pumping frames and arm the automatic stop.
    pub fn on_recorder_started(&mut self) {
        if self.state != RecordingState::Starting {
            tracing::warn!(state = %self.state, "unexpected recorder start event");
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let (interval, duration) = (session.pump_interval_ms, session.duration_ms);
        self.state = RecordingState::Recording;
        self.host.start_pump(interval);
        self.host.schedule_stop(duration);
        tracing::debug!(interval_ms = interval, stop_after_ms = duration, "recording");
    }

    /// One pump iteration: copy the source onto the mirror.
    pub fn tick(&mut self) {
        if !matches!(self.state, RecordingState::Starting | RecordingState::Recording) {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Some(mirror) = session.mirror.as_ref() {
            if let Err(e) = self.host.copy_frame(&session.source, mirror) {
                tracing::warn!(error = %e, "failed to copy frame");
            }
        }
    }

    /// Recorder data event.
    pub fn on_data(&mut self, chunk: H::Chunk) {
        if self.state == RecordingState::Idle {
            tracing::debug!("dropping recorder data outside a session");
            return;
        }
        self.chunks.push(chunk);
    }

    /// Request the recorder to stop.
    ///
    /// Returns `false` (and does nothing) when no running session exists.
    pub fn stop(&mut self) -> bool {
        if !matches!(self.state, RecordingState::Starting | RecordingState::Recording) {
            return false;
        }
        self.state = RecordingState::Stopping;
        tracing::info!("stopping recording");
        if let Err(e) = self.host.stop_recorder() {
            // The stop event will never arrive.
            tracing::error!(error = %e, "failed to stop recorder");
            self.cleanup();
        }
        true
    }

    /// Recorder stop event: save the recording and tear the session down.
    ///
    /// Returns the saved filename, or `None` when no session was live.
    pub fn on_recorder_stopped<Tz>(&mut self, now: DateTime<Tz>) -> ExportResult<Option<String>>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let Some(session) = self.session.as_ref() else {
            return Ok(None);
        };
        if self.state != RecordingState::Stopping {
            tracing::warn!(state = %self.state, "recorder stopped on its own");
        }

        let chunks = std::mem::take(&mut self.chunks);
        let result = if chunks.is_empty() {
            Err(ExportError::Recorder("no data was recorded".to_string()))
        } else {
            let filename = recording_filename(&self.tool_name, &now, session.codec.extension);
            let mime = session.codec.container_mime().to_string();
            tracing::info!(%filename, chunks = chunks.len(), "saving recording");
            self.host.save(chunks, &mime, &filename).map(|()| Some(filename))
        };
        self.cleanup();
        result
    }

    /// Tear the session down. Safe to call more than once.
    pub fn cleanup(&mut self) {
        self.host.cancel_timers();
        self.host.close_recorder();
        if let Some(mirror) = self.session.take().and_then(|s| s.mirror) {
            self.host.release_mirror(mirror);
        }
        self.chunks.clear();
        self.state = RecordingState::Idle;
        self.host.set_indicator(false);
    }
}

impl<H: RecorderHost> fmt::Debug for RecordingController<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingController")
            .field("tool_name", &self.tool_name)
            .field("state", &self.state)
            .field("codec", &self.codec())
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

/// MediaRecorder-backed host.
///
/// Recorder events and timers reach the controller through weak handles,
/// so a dropped [`WebRecorder`] silently ignores late callbacks.
#[cfg(feature = "web")]
pub mod web {
    use std::cell::RefCell;
    use std::rc::{Rc, Weak};

    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::{JsCast, JsValue};
    use web_sys::{
        Blob, BlobEvent, BlobPropertyBag, HtmlCanvasElement, MediaRecorder, MediaRecorderOptions, MediaStream,
        MediaStreamTrack,
    };

    use super::{RecorderHost, RecordingController, RecordingRequest, RecordingState};
    use crate::codec::CodecChoice;
    use crate::data::FrameworkTag;
    use crate::download::web::download_blob;
    use crate::error::{describe_js, ExportError, ExportResult};
    use crate::notify::web::WebNotifier;
    use crate::notify::{report, Notifier};
    use crate::raster::web::{context_2d, scratch_canvas};
    use crate::target::web::WebPage;

    type Controller = RecordingController<WebRecorderHost>;
    type Handle = Weak<RefCell<Controller>>;

    fn recorder_err(e: JsValue) -> ExportError {
        ExportError::Recorder(describe_js(&e))
    }

    fn with_controller(handle: &Handle, f: impl FnOnce(&mut Controller)) {
        let Some(controller) = handle.upgrade() else {
            return;
        };
        match controller.try_borrow_mut() {
            Ok(mut controller) => f(&mut controller),
            Err(_) => tracing::warn!("recording controller busy, event dropped"),
        };
    }

    struct RecorderHandlers {
        start: Closure<dyn FnMut()>,
        data: Closure<dyn FnMut(BlobEvent)>,
        stop: Closure<dyn FnMut()>,
        error: Closure<dyn FnMut(JsValue)>,
    }

    impl RecorderHandlers {
        fn new(handle: &Handle) -> Self {
            let on_start = handle.clone();
            let on_data = handle.clone();
            let on_stop = handle.clone();
            Self {
                start: Closure::<dyn FnMut()>::new(move || {
                    with_controller(&on_start, |c| c.on_recorder_started());
                }),
                data: Closure::<dyn FnMut(BlobEvent)>::new(move |event: BlobEvent| {
                    if let Some(blob) = event.data().filter(|b| b.size() > 0.0) {
                        with_controller(&on_data, |c| c.on_data(blob));
                    }
                }),
                stop: Closure::<dyn FnMut()>::new(move || {
                    with_controller(&on_stop, |c| {
                        if let Err(e) = c.on_recorder_stopped(chrono::Local::now()) {
                            report(&WebNotifier, "Recording", &e);
                        }
                    });
                }),
                error: Closure::<dyn FnMut(JsValue)>::new(move |event: JsValue| {
                    tracing::error!(error = %describe_js(&event), "media recorder error");
                }),
            }
        }

        fn attach(&self, recorder: &MediaRecorder) {
            recorder.set_onstart(Some(self.start.as_ref().unchecked_ref()));
            recorder.set_ondataavailable(Some(self.data.as_ref().unchecked_ref()));
            recorder.set_onstop(Some(self.stop.as_ref().unchecked_ref()));
            recorder.set_onerror(Some(self.error.as_ref().unchecked_ref()));
        }
    }

    fn detach(recorder: &MediaRecorder) {
        recorder.set_onstart(None);
        recorder.set_ondataavailable(None);
        recorder.set_onstop(None);
        recorder.set_onerror(None);
    }

    /// Side effects of a browser recording session.
    pub struct WebRecorderHost {
        controller: Handle,
        recorder: Option<MediaRecorder>,
        stream: Option<MediaStream>,
        handlers: Option<RecorderHandlers>,
        pump: Option<(i32, Closure<dyn FnMut()>)>,
        stop_timer: Option<i32>,
    }

    impl WebRecorderHost {
        fn new(controller: Handle) -> Self {
            Self {
                controller,
                recorder: None,
                stream: None,
                handlers: None,
                pump: None,
                stop_timer: None,
            }
        }

        fn recorder(&self) -> ExportResult<&MediaRecorder> {
            self.recorder
                .as_ref()
                .ok_or_else(|| ExportError::Recorder("recorder not opened".to_string()))
        }
    }

    impl RecorderHost for WebRecorderHost {
        type Canvas = HtmlCanvasElement;
        type Chunk = Blob;

        fn is_type_supported(&self, mime: &str) -> bool {
            MediaRecorder::is_type_supported(mime)
        }

        fn create_mirror(&mut self, width: u32, height: u32) -> ExportResult<HtmlCanvasElement> {
            scratch_canvas(&WebPage::new()?, width, height)
        }

        fn open_recorder(&mut self, mirror: &HtmlCanvasElement, fps: f64, codec: &CodecChoice, bitrate: u32) -> ExportResult<()> {
            if let Some(previous) = self.recorder.take() {
                detach(&previous);
            }
            let stream = mirror.capture_stream_with_frame_request_rate(fps).map_err(recorder_err)?;
            let options = MediaRecorderOptions::new();
            options.set_mime_type(&codec.mime);
            options.set_video_bits_per_second(bitrate);
            let recorder =
                MediaRecorder::new_with_media_stream_and_media_recorder_options(&stream, &options).map_err(recorder_err)?;

            let handlers = RecorderHandlers::new(&self.controller);
            handlers.attach(&recorder);
            self.handlers = Some(handlers);
            self.stream = Some(stream);
            self.recorder = Some(recorder);
            Ok(())
        }

        fn start_recorder(&mut self) -> ExportResult<()> {
            self.recorder()?.start().map_err(recorder_err)
        }

        fn start_pump(&mut self, interval_ms: u32) {
            let Some(window) = web_sys::window() else {
                return;
            };
            let handle = self.controller.clone();
            let tick = Closure::<dyn FnMut()>::new(move || with_controller(&handle, |c| c.tick()));
            match window.set_interval_with_callback_and_timeout_and_arguments_0(
                tick.as_ref().unchecked_ref(),
                interval_ms as i32,
            ) {
                Ok(id) => self.pump = Some((id, tick)),
                Err(e) => tracing::error!(error = %describe_js(&e), "failed to start draw pump"),
            }
        }

        fn schedule_stop(&mut self, after_ms: u32) {
            let Some(window) = web_sys::window() else {
                return;
            };
            let handle = self.controller.clone();
            let stop = Closure::once_into_js(move || {
                with_controller(&handle, |c| {
                    c.stop();
                });
            });
            let timeout = i32::try_from(after_ms).unwrap_or(i32::MAX);
            match window.set_timeout_with_callback_and_timeout_and_arguments_0(stop.unchecked_ref(), timeout) {
                Ok(id) => self.stop_timer = Some(id),
                Err(e) => tracing::error!(error = %describe_js(&e), "failed to schedule automatic stop"),
            }
        }

        fn stop_recorder(&mut self) -> ExportResult<()> {
            self.recorder()?.stop().map_err(recorder_err)
        }

        fn copy_frame(&mut self, source: &HtmlCanvasElement, mirror: &HtmlCanvasElement) -> ExportResult<()> {
            let ctx = context_2d(mirror)?;
            ctx.set_image_smoothing_enabled(false);
            ctx.clear_rect(0.0, 0.0, mirror.width() as f64, mirror.height() as f64);
            ctx.draw_image_with_html_canvas_element(source, 0.0, 0.0)
                .map_err(|e| ExportError::Canvas(describe_js(&e)))
        }

        fn save(&mut self, chunks: Vec<Blob>, mime: &str, filename: &str) -> ExportResult<()> {
            let parts: js_sys::Array = chunks.iter().collect();
            let options = BlobPropertyBag::new();
            options.set_type(mime);
            let blob = Blob::new_with_blob_sequence_and_options(&parts, &options).map_err(recorder_err)?;
            download_blob(&blob, filename)
        }

        fn cancel_timers(&mut self) {
            let Some(window) = web_sys::window() else {
                return;
            };
            if let Some((id, _tick)) = self.pump.take() {
                window.clear_interval_with_handle(id);
            }
            if let Some(id) = self.stop_timer.take() {
                window.clear_timeout_with_handle(id);
            }
        }

        fn close_recorder(&mut self) {
            if let Some(recorder) = self.recorder.take() {
                detach(&recorder);
            }
            if let Some(handlers) = self.handlers.take() {
                // Cleanup may run inside one of these handlers, so they are
                // dropped on a later turn of the event loop.
                match web_sys::window() {
                    Some(window) => {
                        let release = Closure::once_into_js(move || drop(handlers));
                        if let Err(e) = window.set_timeout_with_callback_and_timeout_and_arguments_0(release.unchecked_ref(), 0) {
                            tracing::warn!(error = %describe_js(&e), "could not schedule handler release");
                        }
                    }
                    None => self.handlers = Some(handlers),
                }
            }
            if let Some(stream) = self.stream.take() {
                for track in stream.get_tracks().iter() {
                    if let Ok(track) = track.dyn_into::<MediaStreamTrack>() {
                        track.stop();
                    }
                }
            }
        }

        fn release_mirror(&mut self, mirror: HtmlCanvasElement) {
            mirror.set_width(0);
            mirror.set_height(0);
        }

        fn set_indicator(&mut self, recording: bool) {
            WebNotifier.set_recording_indicator(recording);
        }
    }

    /// Shared handle to the page's recording controller.
    #[derive(Clone)]
    pub struct WebRecorder {
        controller: Rc<RefCell<Controller>>,
    }

    impl WebRecorder {
        pub fn new(tool_name: &str) -> Self {
            let tool_name = tool_name.to_string();
            let controller = Rc::new_cyclic(|handle: &Handle| {
                RefCell::new(RecordingController::new(WebRecorderHost::new(handle.clone()), tool_name))
            });
            Self { controller }
        }

        /// Start recording `source`; its pixel size becomes the video size.
        pub fn start(&self, source: HtmlCanvasElement, framework: Option<FrameworkTag>, request: RecordingRequest) -> ExportResult<()> {
            let size = (source.width(), source.height());
            let mut controller = self.controller.try_borrow_mut().map_err(|_| ExportError::InvalidState {
                expected: RecordingState::Idle.as_str(),
                actual: "busy",
            })?;
            controller.start(source, size, framework, request)
        }

        pub fn stop(&self) -> bool {
            self.controller
                .try_borrow_mut()
                .map(|mut c| c.stop())
                .unwrap_or(false)
        }

        pub fn is_recording(&self) -> bool {
            self.controller.try_borrow().map_or(true, |c| c.is_recording())
        }

        pub fn state(&self) -> Option<RecordingState> {
            self.controller.try_borrow().ok().map(|c| c.state())
        }
    }
}
