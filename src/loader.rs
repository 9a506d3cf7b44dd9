//! On-demand loading of third-party libraries.
//!
//! The snapshot library is tried mirror by mirror, each attempt racing its
//! own timeout. The archive library gets exactly one attempt.

use std::future::Future;

use futures::future::{select, Either};

use crate::config::{ArchiveSource, LibrarySource};
use crate::error::{ExportError, ExportResult};

/// Loads scripts into the page.
///
/// No `Send` bounds, so it works in single-threaded WASM contexts.
pub trait ScriptLoader {
    /// Check whether a library global is already installed.
    fn is_loaded(&self, global: &str) -> bool;

    /// Load a script; resolves when it has loaded or failed.
    fn load_script(&self, url: &str) -> impl Future<Output = ExportResult<()>>;
}

/// Source of event-loop delays.
pub trait Timer {
    /// Resolve after `ms` milliseconds.
    fn sleep(&self, ms: u32) -> impl Future<Output = ()>;

    /// Current time in milliseconds, if this timer has a clock.
    ///
    /// Without one, callers measure elapsed time by the delays they request.
    fn now_ms(&self) -> Option<f64> {
        None
    }
}

/// Load a library, falling back through its mirror list.
///
/// An attempt that neither succeeds nor fails within `timeout_ms` is
/// abandoned and the next mirror is tried.
pub async fn load_with_fallback<L, T>(loader: &L, timer: &T, source: &LibrarySource) -> ExportResult<()>
where
    L: ScriptLoader,
    T: Timer,
{
    if loader.is_loaded(&source.global) {
        return Ok(());
    }

    let mut attempts = Vec::with_capacity(source.urls.len());
    for url in &source.urls {
        let attempt = loader.load_script(url);
        let timeout = timer.sleep(source.timeout_ms);
        futures::pin_mut!(attempt, timeout);

        match select(attempt, timeout).await {
            Either::Left((Ok(()), _)) if loader.is_loaded(&source.global) => {
                tracing::debug!(library = %source.global, %url, "library loaded");
                return Ok(());
            }
            Either::Left((Ok(()), _)) => {
                tracing::warn!(library = %source.global, %url, "script loaded without installing its global");
                attempts.push(format!("{url}: global missing after load"));
            }
            Either::Left((Err(e), _)) => {
                tracing::warn!(library = %source.global, %url, error = %e, "mirror failed");
                attempts.push(format!("{url}: {e}"));
            }
            Either::Right(((), _)) => {
                tracing::warn!(library = %source.global, %url, timeout_ms = source.timeout_ms, "mirror timed out");
                attempts.push(format!("{url}: timed out after {}ms", source.timeout_ms));
            }
        }
    }

    Err(ExportError::LibraryLoad {
        library: source.global.clone(),
        attempts,
    })
}

/// Load the archive library with a single attempt and no fallback.
pub async fn load_once<L: ScriptLoader>(loader: &L, source: &ArchiveSource) -> ExportResult<()> {
    if loader.is_loaded(&source.global) {
        return Ok(());
    }
    let failed = |reason: String| ExportError::LibraryLoad {
        library: source.global.clone(),
        attempts: vec![format!("{}: {reason}", source.url)],
    };
    loader.load_script(&source.url).await.map_err(|e| failed(e.to_string()))?;
    if loader.is_loaded(&source.global) {
        Ok(())
    } else {
        Err(failed("global missing after load".to_string()))
    }
}

/// Browser script loading and timers.
#[cfg(feature = "web")]
pub mod web {
    use std::future::Future;

    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::HtmlScriptElement;

    use super::{ScriptLoader, Timer};
    use crate::error::{describe_js, ExportError, ExportResult};

    /// Resolve after `ms` milliseconds of event-loop time.
    pub async fn sleep(ms: u32) {
        let timeout = i32::try_from(ms).unwrap_or(i32::MAX);
        let promise = js_sys::Promise::new(&mut |resolve, _| {
            if let Some(window) = web_sys::window() {
                let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, timeout);
            } else {
                let _ = resolve.call0(&JsValue::NULL);
            }
        });
        let _ = JsFuture::from(promise).await;
    }

    /// [`Timer`] backed by `setTimeout`.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct WebTimer;

    impl Timer for WebTimer {
        fn sleep(&self, ms: u32) -> impl Future<Output = ()> {
            sleep(ms)
        }

        fn now_ms(&self) -> Option<f64> {
            Some(js_sys::Date::now())
        }
    }

    /// Resolve a dotted property path from `window`, e.g. `"Chatooly.renderHighResolution"`.
    ///
    /// Returns `None` when any segment is `undefined` or `null`.
    pub fn lookup_global(path: &str) -> Option<JsValue> {
        let mut value: JsValue = web_sys::window()?.into();
        for key in path.split('.') {
            value = js_sys::Reflect::get(&value, &JsValue::from_str(key)).ok()?;
            if value.is_undefined() || value.is_null() {
                return None;
            }
        }
        Some(value)
    }

    /// Call a method of a JavaScript object by name.
    pub fn call_method(target: &JsValue, name: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
        let method = js_sys::Reflect::get(target, &JsValue::from_str(name))?
            .dyn_into::<js_sys::Function>()
            .map_err(|_| JsValue::from_str(&format!("{name} is not a function")))?;
        let args: js_sys::Array = args.iter().collect();
        js_sys::Reflect::apply(&method, target, &args)
    }

    /// Call the function at a dotted path from `window`, bound to its parent object.
    pub fn call_global(path: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
        let missing = |what: &str| JsValue::from_str(&format!("{what} is not defined"));
        let (parent, name) = match path.rsplit_once('.') {
            Some((parent, name)) => (lookup_global(parent).ok_or_else(|| missing(parent))?, name),
            None => (web_sys::window().map(JsValue::from).ok_or_else(|| missing("window"))?, path),
        };
        call_method(&parent, name, args)
    }

    /// Loads scripts by appending `<script>` tags to the document head.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct WebScriptLoader;

    impl ScriptLoader for WebScriptLoader {
        fn is_loaded(&self, global: &str) -> bool {
            lookup_global(global).is_some()
        }

        fn load_script(&self, url: &str) -> impl Future<Output = ExportResult<()>> {
            let url = url.to_string();
            async move { inject(&url).await }
        }
    }

    async fn inject(url: &str) -> ExportResult<()> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| ExportError::Http("No document available".to_string()))?;
        let script = document
            .create_element("script")
            .map_err(|e| ExportError::Http(describe_js(&e)))?
            .dyn_into::<HtmlScriptElement>()
            .map_err(|_| ExportError::Http("Failed to cast to HtmlScriptElement".to_string()))?;
        script.set_src(url);
        script.set_async(true);
        script.set_cross_origin(Some("anonymous"));

        let promise = js_sys::Promise::new(&mut |resolve, reject| {
            script.set_onload(Some(&resolve));
            script.set_onerror(Some(&reject));
        });
        match document.head() {
            Some(head) => head.append_child(&script),
            None => document
                .document_element()
                .ok_or_else(|| ExportError::Http("No document element".to_string()))?
                .append_child(&script),
        }
        .map_err(|e| ExportError::Http(describe_js(&e)))?;

        let result = JsFuture::from(promise).await;
        script.set_onload(None);
        script.set_onerror(None);
        result
            .map(|_| ())
            .map_err(|_| ExportError::Http(format!("script failed to load: {url}")))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::future::Future;

    use futures::future::{self, Either};

    use super::{ScriptLoader, Timer};
    use crate::error::{ExportError, ExportResult};

    /// Timer that resolves immediately and records requested delays.
    #[derive(Debug, Default)]
    pub struct InstantTimer {
        pub sleeps: RefCell<Vec<u32>>,
    }

    impl Timer for InstantTimer {
        fn sleep(&self, ms: u32) -> impl Future<Output = ()> {
            self.sleeps.borrow_mut().push(ms);
            future::ready(())
        }
    }

    /// How a fake mirror behaves.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Mirror {
        Loads,
        Fails,
        Hangs,
    }

    /// Script loader keyed by URL substring.
    #[derive(Debug, Default)]
    pub struct FakeLoader {
        pub mirrors: Vec<(&'static str, Mirror)>,
        pub loaded: Cell<bool>,
        pub requested: RefCell<Vec<String>>,
    }

    impl ScriptLoader for FakeLoader {
        fn is_loaded(&self, _global: &str) -> bool {
            self.loaded.get()
        }

        fn load_script(&self, url: &str) -> impl Future<Output = ExportResult<()>> {
            self.requested.borrow_mut().push(url.to_string());
            let behaviour = self
                .mirrors
                .iter()
                .find(|(key, _)| url.contains(key))
                .map(|(_, b)| *b)
                .unwrap_or(Mirror::Fails);
            match behaviour {
                Mirror::Loads => {
                    self.loaded.set(true);
                    Either::Left(future::ready(Ok(())))
                }
                Mirror::Fails => Either::Left(future::ready(Err(ExportError::Http(
                    "script error".to_string(),
                )))),
                Mirror::Hangs => Either::Right(future::pending()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::testing::{FakeLoader, InstantTimer, Mirror};
    use super::*;

    fn source() -> LibrarySource {
        LibrarySource {
            global: "html2canvas".into(),
            urls: vec!["https://a/lib.js".into(), "https://b/lib.js".into(), "https://c/lib.js".into()],
            timeout_ms: 5_000,
        }
    }

    #[test]
    fn test_hanging_mirror_times_out_and_next_is_tried() {
        let loader = FakeLoader {
            mirrors: vec![("//a/", Mirror::Hangs), ("//b/", Mirror::Loads)],
            ..Default::default()
        };
        let timer = InstantTimer::default();

        block_on(load_with_fallback(&loader, &timer, &source())).unwrap();
        assert_eq!(*loader.requested.borrow(), vec!["https://a/lib.js", "https://b/lib.js"]);
    }

    #[test]
    fn test_all_mirrors_fail() {
        let loader = FakeLoader {
            mirrors: vec![("//a/", Mirror::Fails), ("//b/", Mirror::Hangs), ("//c/", Mirror::Fails)],
            ..Default::default()
        };
        let timer = InstantTimer::default();

        match block_on(load_with_fallback(&loader, &timer, &source())) {
            Err(ExportError::LibraryLoad { library, attempts }) => {
                assert_eq!(library, "html2canvas");
                assert_eq!(attempts.len(), 3);
                assert!(attempts[1].contains("timed out after 5000ms"));
            }
            other => panic!("expected LibraryLoad, got {other:?}"),
        }
    }

    #[test]
    fn test_already_loaded_skips_network() {
        let loader = FakeLoader::default();
        loader.loaded.set(true);
        let timer = InstantTimer::default();

        block_on(load_with_fallback(&loader, &timer, &source())).unwrap();
        assert!(loader.requested.borrow().is_empty());
    }

    #[test]
    fn test_archive_loader_single_attempt() {
        let loader = FakeLoader::default();
        let archive = ArchiveSource::default();

        assert!(block_on(load_once(&loader, &archive)).is_err());
        assert_eq!(loader.requested.borrow().len(), 1);
    }
}
