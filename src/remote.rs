//! Client for the out-of-process render server.
//!
//! The page is serialized into a self-contained HTML document, submitted
//! as a job, polled until the server finishes, and the result downloaded.
//! Endpoints, relative to the configured base URL:
//!
//! - `POST /export` submits a job
//! - `GET /status/{id}` reports progress
//! - `GET /download/{id}` serves the finished file

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::error::{ExportError, ExportResult};
use crate::loader::Timer;
use crate::notify::Notifier;

/// Job submission payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Self-contained HTML snapshot of the page
    pub html: String,
    pub duration: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub transparent: bool,
    pub format: String,
}

/// Server reply to a submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    #[serde(default)]
    pub total_frames: u32,
}

/// Server-side job state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Reply to a status poll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub status: JobState,
    /// Fraction complete, 0.0 - 1.0
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// JSON over HTTP.
///
/// Bodies are passed as text; the client does the (de)serialization.
pub trait HttpTransport {
    /// POST a JSON body and return the response body.
    fn post_json(&self, url: &str, body: String) -> impl Future<Output = ExportResult<String>>;

    /// GET a URL and return the response body.
    fn get_json(&self, url: &str) -> impl Future<Output = ExportResult<String>>;
}

/// Client for one render server.
pub struct RemoteRenderClient<'a, T, C> {
    config: &'a RemoteConfig,
    transport: &'a T,
    timer: &'a C,
}

impl<'a, T, C> RemoteRenderClient<'a, T, C>
where
    T: HttpTransport,
    C: Timer,
{
    pub fn new(config: &'a RemoteConfig, transport: &'a T, timer: &'a C) -> Self {
        Self {
            config,
            transport,
            timer,
        }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// URL of the finished file for a job.
    pub fn download_url(&self, job_id: &str) -> String {
        format!("{}/download/{job_id}", self.base())
    }

    /// Submit a render job.
    pub async fn submit(&self, request: &SubmitRequest) -> ExportResult<SubmitResponse> {
        let url = format!("{}/export", self.base());
        let body = serde_json::to_string(request)?;
        tracing::info!(%url, bytes = body.len(), fps = request.fps, duration = request.duration, "submitting remote render");
        let reply = self.transport.post_json(&url, body).await?;
        let response: SubmitResponse = serde_json::from_str(&reply)?;
        tracing::debug!(job_id = %response.job_id, total_frames = response.total_frames, "job accepted");
        Ok(response)
    }

    /// Fetch the status of a job once.
    pub async fn status(&self, job_id: &str) -> ExportResult<JobStatus> {
        let url = format!("{}/status/{job_id}", self.base());
        let reply = self.transport.get_json(&url).await?;
        Ok(serde_json::from_str(&reply)?)
    }

    /// Poll a job until it completes; returns its download URL.
    ///
    /// A `failed` job yields [`ExportError::Remote`] with the server's
    /// message. Giving up after the configured timeout yields
    /// [`ExportError::RemoteTimeout`] instead.
    pub async fn poll_until_done<F>(&self, job_id: &str, mut on_progress: F) -> ExportResult<String>
    where
        F: FnMut(&JobStatus),
    {
        let interval = self.config.poll_interval_ms.max(1);
        let started = self.timer.now_ms();
        let mut slept: u64 = 0;
        loop {
            let status = self.status(job_id).await?;
            on_progress(&status);
            match status.status {
                JobState::Completed => {
                    return Ok(status
                        .download_url
                        .map(|url| self.absolute(&url))
                        .unwrap_or_else(|| self.download_url(job_id)));
                }
                JobState::Failed => {
                    return Err(ExportError::Remote(
                        status.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                JobState::Queued | JobState::Running => {}
            }
            // Wall-clock time when the timer has a clock, so slow requests count too.
            let elapsed = match (started, self.timer.now_ms()) {
                (Some(start), Some(now)) => (now - start).max(0.0) as u64,
                _ => slept,
            };
            if elapsed >= self.config.timeout_ms {
                tracing::warn!(%job_id, elapsed_ms = elapsed, "gave up waiting for remote render");
                return Err(ExportError::RemoteTimeout {
                    ms: self.config.timeout_ms,
                });
            }
            self.timer.sleep(interval).await;
            slept += u64::from(interval);
        }
    }

    /// Submit and wait, mirroring progress to the notifier.
    pub async fn render<N: Notifier + ?Sized>(&self, request: &SubmitRequest, notifier: &N) -> ExportResult<String> {
        notifier.progress(Some("Uploading to render server..."));
        let job = self.submit(request).await?;
        self.poll_until_done(&job.job_id, |status| {
            let percent = (status.progress.clamp(0.0, 1.0) * 100.0).round();
            let message = match status.status {
                JobState::Queued => "Waiting for render server...".to_string(),
                _ => format!("Rendering {} frames... {percent}%", job.total_frames),
            };
            notifier.progress(Some(&message));
        })
        .await
    }

    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base(), url.trim_start_matches('/'))
        }
    }
}

/// File extension of a finished remote render.
pub fn output_extension(format: &str) -> &'static str {
    match format.trim().to_lowercase().as_str() {
        "webm" => "webm",
        "mov" => "mov",
        "gif" => "gif",
        "png" | "png-sequence" => "zip",
        _ => "mp4",
    }
}

/// Fetches text resources (scripts, stylesheets).
pub trait Fetcher {
    fn fetch_text(&self, url: &str) -> impl Future<Output = ExportResult<String>>;
}

/// A library too heavy to re-fetch for every snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KnownLibrary {
    pub name: &'static str,
    /// Script filenames that identify the library
    pub filenames: &'static [&'static str],
    /// Pinned copy that replaces the page's reference
    pub url: &'static str,
}

pub const KNOWN_LIBRARIES: &[KnownLibrary] = &[
    KnownLibrary {
        name: "p5",
        filenames: &["p5.js", "p5.min.js"],
        url: "https://cdn.jsdelivr.net/npm/p5@1.9.0/lib/p5.min.js",
    },
    KnownLibrary {
        name: "three",
        filenames: &["three.js", "three.min.js"],
        url: "https://cdn.jsdelivr.net/npm/three@0.150.1/build/three.min.js",
    },
    KnownLibrary {
        name: "gsap",
        filenames: &["gsap.js", "gsap.min.js"],
        url: "https://cdn.jsdelivr.net/npm/gsap@3.12.5/dist/gsap.min.js",
    },
];

/// Which known library a script URL loads, if any.
pub fn known_library(url: &str) -> Option<&'static KnownLibrary> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let filename = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    KNOWN_LIBRARIES
        .iter()
        .find(|lib| lib.filenames.contains(&filename.as_str()))
}

/// In-memory copies of known libraries, kept for the page session.
#[derive(Debug, Default)]
pub struct LibraryCache {
    entries: RefCell<HashMap<&'static str, Rc<str>>>,
}

impl LibraryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Return the cached source of `library`, fetching it on first use.
    pub async fn get_or_fetch<F: Fetcher>(&self, fetcher: &F, library: &KnownLibrary) -> ExportResult<Rc<str>> {
        if let Some(source) = self.entries.borrow().get(library.name) {
            return Ok(Rc::clone(source));
        }
        tracing::debug!(library = library.name, url = library.url, "fetching library for snapshot");
        let source: Rc<str> = fetcher.fetch_text(library.url).await?.into();
        self.entries
            .borrow_mut()
            .insert(library.name, Rc::clone(&source));
        Ok(source)
    }
}

/// A script or stylesheet on the page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Asset {
    Inline(String),
    External(String),
}

/// What the snapshot is built from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageSource {
    pub title: String,
    pub styles: Vec<Asset>,
    pub scripts: Vec<Asset>,
    /// Body markup without script tags
    pub body_html: String,
}

/// Builds a self-contained HTML document for the render server.
///
/// External scripts and stylesheets are fetched and inlined. Known heavy
/// libraries come from the session cache. An asset that cannot be fetched
/// stays a plain reference so the server can still try it.
pub struct SnapshotBuilder<'a, F> {
    fetcher: &'a F,
    cache: &'a LibraryCache,
    transparent: bool,
}

impl<'a, F: Fetcher> SnapshotBuilder<'a, F> {
    pub fn new(fetcher: &'a F, cache: &'a LibraryCache) -> Self {
        Self {
            fetcher,
            cache,
            transparent: false,
        }
    }

    pub fn transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub async fn build(&self, page: &PageSource) -> String {
        let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str(&format!("<title>{}</title>\n", escape_text(&page.title)));
        html.push_str("<style>html,body{margin:0;padding:0;");
        if self.transparent {
            html.push_str("background:transparent;");
        }
        html.push_str("}</style>\n");

        for style in &page.styles {
            match style {
                Asset::Inline(css) => push_style(&mut html, css),
                Asset::External(url) => match self.fetcher.fetch_text(url).await {
                    Ok(css) => push_style(&mut html, &css),
                    Err(e) => {
                        tracing::warn!(%url, error = %e, "keeping stylesheet as a reference");
                        html.push_str(&format!("<link rel=\"stylesheet\" href=\"{}\">\n", escape_attr(url)));
                    }
                },
            }
        }

        html.push_str("</head>\n<body>\n");
        html.push_str(&page.body_html);
        html.push('\n');

        for script in &page.scripts {
            match script {
                Asset::Inline(js) => push_script(&mut html, js),
                Asset::External(url) => {
                    let fetched = match known_library(url) {
                        Some(library) => self.cache.get_or_fetch(self.fetcher, library).await,
                        None => self.fetcher.fetch_text(url).await.map(Rc::from),
                    };
                    match fetched {
                        Ok(js) => push_script(&mut html, &js),
                        Err(e) => {
                            tracing::warn!(%url, error = %e, "keeping script as a reference");
                            html.push_str(&format!("<script src=\"{}\"></script>\n", escape_attr(url)));
                        }
                    }
                }
            }
        }

        html.push_str("</body>\n</html>\n");
        html
    }
}

fn push_style(html: &mut String, css: &str) {
    html.push_str("<style>\n");
    html.push_str(&css.replace("</style", "<\\/style"));
    html.push_str("\n</style>\n");
}

fn push_script(html: &mut String, js: &str) {
    html.push_str("<script>\n");
    html.push_str(&js.replace("</script", "<\\/script"));
    html.push_str("\n</script>\n");
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

/// `fetch`-based transport and page collection.
#[cfg(feature = "web")]
pub mod web {
    use std::future::Future;

    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{Document, Element, Headers, HtmlLinkElement, HtmlScriptElement, Request, RequestInit, Response};

    use super::{Asset, Fetcher, HttpTransport, PageSource};
    use crate::error::{describe_js, ExportError, ExportResult};

    fn http_err(e: JsValue) -> ExportError {
        ExportError::Http(describe_js(&e))
    }

    /// HTTP through `window.fetch`.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct FetchTransport;

    impl FetchTransport {
        async fn send(&self, url: &str, method: &str, body: Option<String>) -> ExportResult<String> {
            let init = RequestInit::new();
            init.set_method(method);
            if let Some(body) = body {
                let headers = Headers::new().map_err(http_err)?;
                headers.set("Content-Type", "application/json").map_err(http_err)?;
                init.set_headers(&headers);
                init.set_body(&JsValue::from_str(&body));
            }
            let request = Request::new_with_str_and_init(url, &init).map_err(http_err)?;
            let window = web_sys::window().ok_or_else(|| ExportError::Http("No window available".to_string()))?;

            let response = JsFuture::from(window.fetch_with_request(&request))
                .await
                .map_err(http_err)?
                .dyn_into::<Response>()
                .map_err(|_| ExportError::Http("fetch did not return a Response".to_string()))?;
            if !response.ok() {
                return Err(ExportError::Http(format!("{method} {url}: HTTP {}", response.status())));
            }
            let text = JsFuture::from(response.text().map_err(http_err)?)
                .await
                .map_err(http_err)?;
            text.as_string()
                .ok_or_else(|| ExportError::Http(format!("{method} {url}: body is not text")))
        }
    }

    impl HttpTransport for FetchTransport {
        fn post_json(&self, url: &str, body: String) -> impl Future<Output = ExportResult<String>> {
            self.send(url, "POST", Some(body))
        }

        fn get_json(&self, url: &str) -> impl Future<Output = ExportResult<String>> {
            self.send(url, "GET", None)
        }
    }

    impl Fetcher for FetchTransport {
        fn fetch_text(&self, url: &str) -> impl Future<Output = ExportResult<String>> {
            self.send(url, "GET", None)
        }
    }

    fn select_all(root: &Document, selector: &str) -> Vec<Element> {
        let Ok(list) = root.query_selector_all(selector) else {
            return Vec::new();
        };
        (0..list.length())
            .filter_map(|i| list.item(i))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect()
    }

    /// Collect the page's styles, scripts and body markup.
    ///
    /// Export UI elements (ids starting with `chatooly-export`) are left out.
    pub fn page_source(document: &Document) -> PageSource {
        let styles = select_all(document, "style, link[rel=stylesheet]")
            .into_iter()
            .filter_map(|element| match element.dyn_ref::<HtmlLinkElement>() {
                Some(link) => Some(Asset::External(link.href())),
                None => element.text_content().map(Asset::Inline),
            })
            .collect();

        let scripts = select_all(document, "script")
            .into_iter()
            .filter_map(|element| element.dyn_into::<HtmlScriptElement>().ok())
            .filter(|script| script.type_().is_empty() || script.type_() == "text/javascript")
            .map(|script| {
                let src = script.src();
                if src.is_empty() {
                    Asset::Inline(script.text().unwrap_or_default())
                } else {
                    Asset::External(src)
                }
            })
            .collect();

        let body_html = document
            .body()
            .and_then(|body| body.clone_node_with_deep(true).ok())
            .and_then(|node| node.dyn_into::<Element>().ok())
            .map(|body| {
                if let Ok(list) = body.query_selector_all("script, [id^=chatooly-export]") {
                    for i in 0..list.length() {
                        if let Some(element) = list.item(i).and_then(|n| n.dyn_into::<Element>().ok()) {
                            element.remove();
                        }
                    }
                }
                body.inner_html()
            })
            .unwrap_or_default();

        PageSource {
            title: document.title(),
            styles,
            scripts,
            body_html,
        }
    }
}
