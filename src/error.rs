//! Error type shared by every export path.

use thiserror::Error;

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Errors that can occur while exporting.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Nothing on the page could be exported
    #[error("No export target found (tried: {})", tried.join(", "))]
    TargetNotFound {
        /// Identifiers and selectors that were consulted, in order
        tried: Vec<String>,
    },

    /// Recording or sequence export needs a canvas and none exists
    #[error("No canvas found to capture")]
    CanvasNotFound,

    /// No codec in the requested format family is available
    #[error("Format '{format}' is not supported in this browser")]
    UnsupportedFormat {
        /// The requested format family
        format: String,
    },

    /// Resolution multiplier was not a positive number
    #[error("Invalid resolution multiplier: {0}")]
    InvalidMultiplier(f64),

    /// Duration or frame rate was not positive
    #[error("Invalid capture settings: duration {duration}s at {fps} fps")]
    InvalidCapture {
        /// Requested duration in seconds
        duration: f64,
        /// Requested frames per second
        fps: f64,
    },

    /// Canvas API failure (missing context, tainted canvas, ...)
    #[error("Canvas error: {0}")]
    Canvas(String),

    /// A CDN library could not be loaded
    #[error("Failed to load {library} ({})", attempts.join("; "))]
    LibraryLoad {
        /// Library name
        library: String,
        /// One entry per failed attempt
        attempts: Vec<String>,
    },

    /// Archive assembly failed
    #[error("Failed to create archive: {0}")]
    Archive(String),

    /// Media recorder failure
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// Operation invoked from the wrong recording state
    #[error("Invalid recording state: expected {expected}, was {actual}")]
    InvalidState {
        /// State the operation requires
        expected: &'static str,
        /// State the controller was in
        actual: &'static str,
    },

    /// The remote renderer reported a failure
    #[error("Remote render failed: {0}")]
    Remote(String),

    /// The client stopped waiting for the remote renderer
    #[error("Remote render timed out after {ms}ms")]
    RemoteTimeout {
        /// Overall timeout in milliseconds
        ms: u64,
    },

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON encode/decode failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Download could not be triggered
    #[error("Download failed: {0}")]
    Download(String),
}

impl ExportError {
    /// Message suitable for a user-facing alert.
    pub fn user_message(&self) -> String {
        match self {
            ExportError::TargetNotFound { .. } | ExportError::CanvasNotFound => {
                "Nothing to export was found on this page.".to_string()
            }
            ExportError::Canvas(detail) if detail.to_lowercase().contains("tainted") => {
                "The canvas contains cross-origin content and cannot be exported.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Readable text for a thrown JavaScript value.
#[cfg(feature = "web")]
pub(crate) fn describe_js(value: &wasm_bindgen::JsValue) -> String {
    use wasm_bindgen::JsCast;

    if let Some(text) = value.as_string() {
        return text;
    }
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return String::from(err.message());
    }
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_message() {
        let err = ExportError::UnsupportedFormat {
            format: "mkv".into(),
        };
        assert!(err.to_string().contains("not supported in this browser"));
    }

    #[test]
    fn test_target_not_found_lists_tried() {
        let err = ExportError::TargetNotFound {
            tried: vec!["#chatooly-canvas".into(), "body".into()],
        };
        assert_eq!(
            err.to_string(),
            "No export target found (tried: #chatooly-canvas, body)"
        );
    }

    #[test]
    fn test_tainted_canvas_user_message() {
        let err = ExportError::Canvas("canvas is tainted".into());
        assert!(err.user_message().contains("cross-origin"));
    }
}
