//! Core data structures for export targets and encoded images.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{ExportError, ExportResult};

/// Rendering framework that produced a canvas.
///
/// Derived from heuristics, so not guaranteed correct (see
/// [`classify`](crate::target::classify)).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameworkTag {
    /// Plain 2D or WebGL canvas
    #[default]
    Plain,
    /// p5.js sketch canvas
    P5,
    /// Three.js renderer canvas
    Three,
}

impl FrameworkTag {
    /// Short lowercase name used in logs and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameworkTag::Plain => "canvas",
            FrameworkTag::P5 => "p5",
            FrameworkTag::Three => "three",
        }
    }
}

/// What kind of element an export target is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// A canvas element with its framework classification
    Canvas(FrameworkTag),
    /// Any other element, exported with the snapshot library
    DomSubtree,
}

/// The single element chosen for export.
///
/// Created fresh on every export call; never cached.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportTarget<E> {
    pub kind: TargetKind,
    pub element: E,
}

impl<E> ExportTarget<E> {
    /// Create a canvas target.
    pub fn canvas(element: E, framework: FrameworkTag) -> Self {
        Self {
            kind: TargetKind::Canvas(framework),
            element,
        }
    }

    /// Create a DOM subtree target.
    pub fn dom(element: E) -> Self {
        Self {
            kind: TargetKind::DomSubtree,
            element,
        }
    }

    /// Check if this target is a canvas.
    #[inline]
    pub fn is_canvas(&self) -> bool {
        matches!(self.kind, TargetKind::Canvas(_))
    }

    /// Framework tag when the target is a canvas.
    #[inline]
    pub fn framework(&self) -> Option<FrameworkTag> {
        match self.kind {
            TargetKind::Canvas(tag) => Some(tag),
            TargetKind::DomSubtree => None,
        }
    }
}

/// A still-export request.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolutionRequest {
    /// Scale factor; any positive value is accepted
    pub multiplier: f64,
    /// Output filename, generated from the tool name when `None`
    pub filename: Option<String>,
    /// DOM snapshot background for this export; overrides the configured one
    pub background: Option<String>,
}

impl ResolutionRequest {
    pub fn new(multiplier: f64) -> Self {
        Self {
            multiplier,
            filename: None,
            background: None,
        }
    }

    /// Set an explicit filename.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Set the DOM snapshot background for this export.
    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = Some(background.into());
        self
    }

    /// Validate the multiplier.
    ///
    /// There is no upper bound here; the scaled size is checked against
    /// [`MAX_CANVAS_AREA`](crate::sizing::MAX_CANVAS_AREA) before rendering.
    pub fn validate(&self) -> ExportResult<()> {
        if self.multiplier.is_finite() && self.multiplier > 0.0 {
            Ok(())
        } else {
            Err(ExportError::InvalidMultiplier(self.multiplier))
        }
    }
}

/// An encoded image held as `data:<mime>;base64,<payload>`.
#[derive(Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// Wrap PNG bytes.
    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new("image/png", bytes)
    }

    /// Parse a base64 data URL.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use chatooly_export::DataUrl;
    ///
    /// let url = DataUrl::parse("data:image/png;base64,iVBORw==").unwrap();
    /// assert_eq!(url.mime, "image/png");
    /// assert_eq!(url.bytes, vec![0x89, b'P', b'N', b'G']);
    /// ```
    pub fn parse(s: &str) -> ExportResult<Self> {
        let rest = s
            .strip_prefix("data:")
            .ok_or_else(|| ExportError::Canvas("not a data URL".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| ExportError::Canvas("data URL has no payload".to_string()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| ExportError::Canvas("data URL is not base64".to_string()))?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| ExportError::Canvas(format!("invalid base64 payload: {e}")))?;
        Ok(Self::new(mime, bytes))
    }

    /// Encode as a `data:` URL string.
    pub fn to_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    /// Size of the decoded payload in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for DataUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataUrl")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_roundtrip() {
        let url = DataUrl::png(vec![1, 2, 3, 4, 5]);
        let encoded = url.to_url();
        assert!(encoded.starts_with("data:image/png;base64,"));
        assert_eq!(DataUrl::parse(&encoded).unwrap(), url);
    }

    #[test]
    fn test_data_url_rejects_plain_urls() {
        assert!(DataUrl::parse("https://example.com/a.png").is_err());
        assert!(DataUrl::parse("data:image/png,rawtext").is_err());
    }

    #[test]
    fn test_multiplier_validation() {
        assert!(ResolutionRequest::new(0.5).validate().is_ok());
        assert!(ResolutionRequest::new(64.0).validate().is_ok());
        assert!(ResolutionRequest::new(0.0).validate().is_err());
        assert!(ResolutionRequest::new(-2.0).validate().is_err());
        assert!(ResolutionRequest::new(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_target_accessors() {
        let target = ExportTarget::canvas("c", FrameworkTag::P5);
        assert!(target.is_canvas());
        assert_eq!(target.framework(), Some(FrameworkTag::P5));

        let target = ExportTarget::dom("div");
        assert!(!target.is_canvas());
        assert_eq!(target.framework(), None);
    }
}
