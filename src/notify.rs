//! User-facing notifications: alerts, progress text and the recording indicator.

use crate::error::ExportError;

/// Surface for everything the user sees outside the exported file.
pub trait Notifier {
    /// Show a modal message.
    fn alert(&self, message: &str);

    /// Show (`Some`) or remove (`None`) the on-page progress indicator.
    fn progress(&self, message: Option<&str>);

    /// Toggle the recording indicator.
    fn set_recording_indicator(&self, _recording: bool) {}
}

/// Report a failed export to the log and to the user.
///
/// Public entry points call this instead of propagating, so a failed export
/// never reaches the page's global error handler.
pub fn report<N: Notifier + ?Sized>(notifier: &N, action: &str, error: &ExportError) {
    tracing::error!(action, error = %error, "export failed");
    notifier.progress(None);
    notifier.alert(&format!("{action} failed: {}", error.user_message()));
}

/// A notifier that only logs. Useful for headless use.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, message: &str) {
        tracing::warn!(message, "alert");
    }

    fn progress(&self, message: Option<&str>) {
        if let Some(message) = message {
            tracing::debug!(message, "progress");
        }
    }
}

/// Browser notifications: `alert()`, console errors and an on-page progress badge.
#[cfg(feature = "web")]
pub mod web {
    use wasm_bindgen::JsValue;
    use web_sys::{Document, Element};

    use super::Notifier;

    /// Id of the progress badge element.
    pub const PROGRESS_ID: &str = "chatooly-export-progress";
    /// Class set on `<body>` while recording.
    pub const RECORDING_CLASS: &str = "chatooly-recording";

    const PROGRESS_STYLE: &str = "position:fixed;bottom:16px;right:16px;z-index:2147483647;\
        padding:8px 12px;border-radius:6px;background:rgba(0,0,0,0.8);color:#fff;\
        font:13px/1.4 system-ui,sans-serif;pointer-events:none;";

    #[derive(Clone, Copy, Debug, Default)]
    pub struct WebNotifier;

    impl WebNotifier {
        fn document() -> Option<Document> {
            web_sys::window()?.document()
        }

        fn progress_element(document: &Document) -> Option<Element> {
            if let Some(existing) = document.get_element_by_id(PROGRESS_ID) {
                return Some(existing);
            }
            let element = document.create_element("div").ok()?;
            element.set_id(PROGRESS_ID);
            element.set_attribute("style", PROGRESS_STYLE).ok()?;
            document.body()?.append_child(&element).ok()?;
            Some(element)
        }
    }

    impl Notifier for WebNotifier {
        fn alert(&self, message: &str) {
            web_sys::console::error_1(&JsValue::from_str(message));
            if let Some(window) = web_sys::window() {
                let _ = window.alert_with_message(message);
            }
        }

        fn progress(&self, message: Option<&str>) {
            let Some(document) = Self::document() else {
                return;
            };
            match message {
                Some(text) => {
                    if let Some(element) = Self::progress_element(&document) {
                        element.set_text_content(Some(text));
                    }
                }
                None => {
                    if let Some(element) = document.get_element_by_id(PROGRESS_ID) {
                        element.remove();
                    }
                }
            }
        }

        fn set_recording_indicator(&self, recording: bool) {
            if let Some(body) = Self::document().and_then(|d| d.body()) {
                let _ = body.class_list().toggle_with_force(RECORDING_CLASS, recording);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::Notifier;

    /// Notifier that records every call.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub alerts: RefCell<Vec<String>>,
        pub progress: RefCell<Vec<Option<String>>>,
        pub indicator: RefCell<Vec<bool>>,
    }

    impl Notifier for RecordingNotifier {
        fn alert(&self, message: &str) {
            self.alerts.borrow_mut().push(message.to_string());
        }

        fn progress(&self, message: Option<&str>) {
            self.progress.borrow_mut().push(message.map(str::to_string));
        }

        fn set_recording_indicator(&self, recording: bool) {
            self.indicator.borrow_mut().push(recording);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;

    #[test]
    fn test_report_alerts_and_clears_progress() {
        let notifier = RecordingNotifier::default();
        report(&notifier, "PNG export", &ExportError::CanvasNotFound);

        let alerts = notifier.alerts.borrow();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].starts_with("PNG export failed"));
        assert_eq!(*notifier.progress.borrow(), vec![None]);
    }
}
