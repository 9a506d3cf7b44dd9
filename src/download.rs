//! Output filenames and the download trigger.

use chrono::{DateTime, NaiveDate, TimeZone};

use crate::error::ExportResult;

/// Reduce a tool name to a filename-safe slug.
///
/// ## Example
///
/// ```rust
/// use chatooly_export::download::sanitize_name;
///
/// assert_eq!(sanitize_name("My Cool Tool!"), "my-cool-tool");
/// assert_eq!(sanitize_name("  "), "export");
/// ```
pub fn sanitize_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            slug.push(ch);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "export".to_string()
    } else {
        slug.to_string()
    }
}

/// Filename for a still export: `{tool}-{YYYY-MM-DD}.png`.
pub fn still_filename(tool_name: &str, date: NaiveDate) -> String {
    format!("{}-{}.png", sanitize_name(tool_name), date.format("%Y-%m-%d"))
}

/// Filename for a recording: `{tool}-animation-{YYYYMMDD-HHMMSS}.{ext}`.
pub fn recording_filename<Tz: TimeZone>(tool_name: &str, now: &DateTime<Tz>, extension: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}-animation-{}.{}",
        sanitize_name(tool_name),
        now.format("%Y%m%d-%H%M%S"),
        extension
    )
}

/// Folder (and archive stem) for a PNG sequence: `{tool}-frames-{YYYYMMDD-HHMMSS}`.
pub fn sequence_folder<Tz: TimeZone>(tool_name: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}-frames-{}", sanitize_name(tool_name), now.format("%Y%m%d-%H%M%S"))
}

/// Triggers a browser-style file download.
///
/// The web implementation clicks an ephemeral anchor with a `download`
/// attribute; object URLs it creates are revoked shortly after the click.
pub trait Downloader {
    /// Download a URL (data URL or object URL) under `filename`.
    fn download_url(&self, url: &str, filename: &str) -> ExportResult<()>;

    /// Download raw bytes under `filename`.
    fn download_bytes(&self, bytes: &[u8], mime: &str, filename: &str) -> ExportResult<()>;
}

/// Browser downloads through an ephemeral anchor element.
#[cfg(feature = "web")]
pub mod web {
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;
    use web_sys::{Blob, BlobPropertyBag, HtmlAnchorElement, Url};

    use super::Downloader;
    use crate::error::{describe_js, ExportError, ExportResult};

    /// Object URLs outlive the click by this long.
    const REVOKE_DELAY_MS: i32 = 100;

    #[derive(Clone, Copy, Debug, Default)]
    pub struct WebDownloader;

    impl Downloader for WebDownloader {
        fn download_url(&self, url: &str, filename: &str) -> ExportResult<()> {
            click_anchor(url, filename)
        }

        fn download_bytes(&self, bytes: &[u8], mime: &str, filename: &str) -> ExportResult<()> {
            let blob = bytes_to_blob(bytes, mime)?;
            download_blob(&blob, filename)
        }
    }

    /// Wrap bytes in a typed blob.
    pub fn bytes_to_blob(bytes: &[u8], mime: &str) -> ExportResult<Blob> {
        let parts = js_sys::Array::of1(&js_sys::Uint8Array::from(bytes));
        let options = BlobPropertyBag::new();
        options.set_type(mime);
        Blob::new_with_u8_array_sequence_and_options(&parts, &options)
            .map_err(|e| ExportError::Download(describe_js(&e)))
    }

    /// Download a blob through a temporary object URL.
    pub fn download_blob(blob: &Blob, filename: &str) -> ExportResult<()> {
        let url = Url::create_object_url_with_blob(blob).map_err(|e| ExportError::Download(describe_js(&e)))?;
        let result = click_anchor(&url, filename);
        revoke_later(url);
        result
    }

    fn revoke_later(url: String) {
        let Some(window) = web_sys::window() else {
            let _ = Url::revoke_object_url(&url);
            return;
        };
        let revoke = {
            let url = url.clone();
            Closure::once_into_js(move || {
                let _ = Url::revoke_object_url(&url);
            })
        };
        if window
            .set_timeout_with_callback_and_timeout_and_arguments_0(revoke.unchecked_ref(), REVOKE_DELAY_MS)
            .is_err()
        {
            let _ = Url::revoke_object_url(&url);
        }
    }

    fn click_anchor(href: &str, filename: &str) -> ExportResult<()> {
        let err = |e: wasm_bindgen::JsValue| ExportError::Download(describe_js(&e));
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| ExportError::Download("No document available".to_string()))?;
        let body = document
            .body()
            .ok_or_else(|| ExportError::Download("No body available".to_string()))?;
        let anchor = document
            .create_element("a")
            .map_err(err)?
            .dyn_into::<HtmlAnchorElement>()
            .map_err(|_| ExportError::Download("Failed to cast to HtmlAnchorElement".to_string()))?;
        anchor.set_href(href);
        anchor.set_download(filename);
        anchor.style().set_property("display", "none").map_err(err)?;

        body.append_child(&anchor).map_err(err)?;
        anchor.click();
        anchor.remove();
        tracing::debug!(%filename, "download triggered");
        Ok(())
    }
}
