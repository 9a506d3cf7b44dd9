//! Export configuration.
//!
//! Every field has a default, so partial configuration files are accepted.

use serde::{Deserialize, Serialize};

/// Configuration shared by all export components.
///
/// An `ExportConfig` is created once per page and handed to each component by
/// reference; components never reach into page globals for settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Tool name used as the filename prefix
    pub tool_name: String,
    /// Id of the canonical export canvas
    pub canvas_id: String,
    /// Id of the legacy wrapper element
    pub container_id: String,
    /// Selectors tried in order when no canvas exists
    pub fallback_selectors: Vec<String>,
    /// Background override for DOM snapshots (`None` keeps the page default)
    pub background_color: Option<String>,
    /// Snapshot library source (tried mirror by mirror)
    pub snapshot: LibrarySource,
    /// Archive library source (single attempt)
    pub archive: ArchiveSource,
    /// Window-level high-resolution render hooks
    pub hooks: RenderHooks,
    /// Remote renderer endpoint
    pub remote: RemoteConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            tool_name: "chatooly-tool".to_string(),
            canvas_id: "chatooly-canvas".to_string(),
            container_id: "chatooly-container".to_string(),
            fallback_selectors: vec![
                "#canvas-container".to_string(),
                ".canvas-container".to_string(),
                "main".to_string(),
                "#app".to_string(),
            ],
            background_color: None,
            snapshot: LibrarySource::default(),
            archive: ArchiveSource::default(),
            hooks: RenderHooks::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl ExportConfig {
    /// Parse a TOML string into an `ExportConfig`.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Parse a JSON string into an `ExportConfig`.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// A CDN library with mirror URLs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySource {
    /// Global symbol the library installs on load
    pub global: String,
    /// Mirror URLs in preference order
    pub urls: Vec<String>,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u32,
}

impl Default for LibrarySource {
    fn default() -> Self {
        Self {
            global: "html2canvas".to_string(),
            urls: vec![
                "https://cdn.jsdelivr.net/npm/html2canvas@1.4.1/dist/html2canvas.min.js".to_string(),
                "https://unpkg.com/html2canvas@1.4.1/dist/html2canvas.min.js".to_string(),
                "https://cdnjs.cloudflare.com/ajax/libs/html2canvas/1.4.1/html2canvas.min.js"
                    .to_string(),
            ],
            timeout_ms: 10_000,
        }
    }
}

/// The archive library, loaded from a single URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSource {
    /// Global symbol the library installs on load
    pub global: String,
    pub url: String,
    /// Deflate level used for frame archives (0-9)
    pub compression_level: u8,
}

impl Default for ArchiveSource {
    fn default() -> Self {
        Self {
            global: "JSZip".to_string(),
            url: "https://cdnjs.cloudflare.com/ajax/libs/jszip/3.10.1/jszip.min.js".to_string(),
            compression_level: 6,
        }
    }
}

/// Names of the window-level high-resolution render hooks.
///
/// Dotted names are resolved as property paths from `window`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderHooks {
    /// Hook a tool may implement to redraw at native resolution
    pub tool: String,
    /// Hook provided by the Chatooly library itself
    pub library: String,
}

impl Default for RenderHooks {
    fn default() -> Self {
        Self {
            tool: "renderHighResolution".to_string(),
            library: "Chatooly.renderHighResolution".to_string(),
        }
    }
}

/// Remote renderer endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Interval between status polls in milliseconds
    pub poll_interval_ms: u32,
    /// Overall client-side timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            poll_interval_ms: 1_000,
            timeout_ms: 300_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identifiers() {
        let config = ExportConfig::default();
        assert_eq!(config.canvas_id, "chatooly-canvas");
        assert_eq!(config.container_id, "chatooly-container");
        assert_eq!(config.snapshot.urls.len(), 3);
        assert_eq!(config.archive.compression_level, 6);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ExportConfig::from_json_str(r#"{"tool_name": "Gradient Lab"}"#).unwrap();
        assert_eq!(config.tool_name, "Gradient Lab");
        assert_eq!(config.canvas_id, "chatooly-canvas");
        assert_eq!(config.remote.poll_interval_ms, 1_000);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_toml_nested_sections() {
        let config = ExportConfig::from_toml_str(
            r#"
            tool_name = "noise"

            [remote]
            base_url = "https://render.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.tool_name, "noise");
        assert_eq!(config.remote.base_url, "https://render.example.com");
        assert_eq!(config.remote.timeout_ms, 300_000);
    }
}
