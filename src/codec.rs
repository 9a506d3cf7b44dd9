//! Video format selection, codec negotiation and bitrate tiers.

use std::fmt;
use std::str::FromStr;

use crate::error::{ExportError, ExportResult};

/// Format family chosen in the export UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatChoice {
    /// Best available: MP4 first, then WebM
    #[default]
    Auto,
    Mp4,
    WebmVp9,
    WebmVp8,
    WebmAv1,
    WebmH264,
    Mkv,
    /// Not a recorder format; routed to the sequence exporter
    PngSequence,
}

impl FormatChoice {
    /// UI identifier, e.g. `"webm-vp9"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatChoice::Auto => "auto",
            FormatChoice::Mp4 => "mp4",
            FormatChoice::WebmVp9 => "webm-vp9",
            FormatChoice::WebmVp8 => "webm-vp8",
            FormatChoice::WebmAv1 => "webm-av1",
            FormatChoice::WebmH264 => "webm-h264",
            FormatChoice::Mkv => "mkv",
            FormatChoice::PngSequence => "png-sequence",
        }
    }

    /// Ordered MIME candidates for this family.
    pub fn candidates(&self) -> &'static [&'static str] {
        match self {
            FormatChoice::Auto => &[
                "video/mp4;codecs=avc1.42E01E",
                "video/mp4",
                "video/webm;codecs=vp9",
                "video/webm;codecs=vp8",
                "video/webm",
            ],
            FormatChoice::Mp4 => &[
                "video/mp4;codecs=avc1.42E01E",
                "video/mp4;codecs=avc1",
                "video/mp4;codecs=h264",
                "video/mp4",
            ],
            FormatChoice::WebmVp9 => &["video/webm;codecs=vp9", "video/webm;codecs=vp09.00.10.08"],
            FormatChoice::WebmVp8 => &["video/webm;codecs=vp8", "video/webm"],
            FormatChoice::WebmAv1 => &["video/webm;codecs=av01.0.05M.08", "video/webm;codecs=av1"],
            FormatChoice::WebmH264 => &["video/webm;codecs=h264", "video/webm;codecs=avc1"],
            FormatChoice::Mkv => &["video/x-matroska;codecs=avc1", "video/x-matroska"],
            FormatChoice::PngSequence => &[],
        }
    }
}

impl fmt::Display for FormatChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatChoice {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(FormatChoice::Auto),
            "mp4" => Ok(FormatChoice::Mp4),
            "webm-vp9" | "webm" => Ok(FormatChoice::WebmVp9),
            "webm-vp8" => Ok(FormatChoice::WebmVp8),
            "webm-av1" => Ok(FormatChoice::WebmAv1),
            "webm-h264" => Ok(FormatChoice::WebmH264),
            "mkv" => Ok(FormatChoice::Mkv),
            "png-sequence" | "png" => Ok(FormatChoice::PngSequence),
            other => Err(ExportError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}

/// The concrete codec a recording uses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecChoice {
    /// Full MIME string passed to the recorder
    pub mime: String,
    /// File extension without the dot
    pub extension: &'static str,
}

impl CodecChoice {
    /// Container MIME type (codec parameters stripped) used for the saved blob.
    pub fn container_mime(&self) -> &str {
        self.mime.split(';').next().unwrap_or(&self.mime)
    }
}

/// Pick the first candidate of a family the browser supports.
///
/// There is no fallback across families: a family with no supported
/// candidate is an error.
///
/// ## Example
///
/// ```rust
/// use chatooly_export::codec::{negotiate, FormatChoice};
///
/// let codec = negotiate(FormatChoice::Auto, |mime| mime.starts_with("video/webm")).unwrap();
/// assert_eq!(codec.mime, "video/webm;codecs=vp9");
/// assert_eq!(codec.extension, "webm");
///
/// assert!(negotiate(FormatChoice::Mkv, |_| false).is_err());
/// ```
pub fn negotiate<F>(choice: FormatChoice, is_supported: F) -> ExportResult<CodecChoice>
where
    F: Fn(&str) -> bool,
{
    let mime = choice
        .candidates()
        .iter()
        .find(|mime| is_supported(mime))
        .ok_or_else(|| ExportError::UnsupportedFormat {
            format: choice.to_string(),
        })?;
    tracing::debug!(format = %choice, %mime, "negotiated codec");
    Ok(CodecChoice {
        mime: mime.to_string(),
        extension: extension_for(mime),
    })
}

/// File extension for a recorder MIME type.
pub fn extension_for(mime: &str) -> &'static str {
    if mime.starts_with("video/mp4") {
        "mp4"
    } else if mime.starts_with("video/x-matroska") {
        "mkv"
    } else {
        "webm"
    }
}

/// Recording quality tier.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum QualityTier {
    #[default]
    High,
    Medium,
    Standard,
    Low,
    /// Caller-supplied megabits per second
    Custom(f64),
}

impl QualityTier {
    /// Parse a UI tier name; `custom` takes the supplied megabit value.
    pub fn parse(tier: &str, custom_mbps: Option<f64>) -> Self {
        match tier.trim().to_lowercase().as_str() {
            "medium" => QualityTier::Medium,
            "standard" => QualityTier::Standard,
            "low" => QualityTier::Low,
            "custom" => QualityTier::Custom(custom_mbps.unwrap_or(10.0)),
            _ => QualityTier::High,
        }
    }

    /// Video bitrate in bits per second.
    pub fn bitrate(&self) -> u32 {
        match self {
            QualityTier::High => 25_000_000,
            QualityTier::Medium => 10_000_000,
            QualityTier::Standard => 8_000_000,
            QualityTier::Low => 4_000_000,
            QualityTier::Custom(mbps) => (mbps.max(0.1) * 1_000_000.0).round() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_supported_candidate_wins() {
        let codec = negotiate(FormatChoice::Mp4, |m| m == "video/mp4" || m == "video/mp4;codecs=h264")
            .unwrap();
        assert_eq!(codec.mime, "video/mp4;codecs=h264");
        assert_eq!(codec.extension, "mp4");
        assert_eq!(codec.container_mime(), "video/mp4");
    }

    #[test]
    fn test_no_downgrade_across_families() {
        // WebM is available, but MP4 was asked for.
        let result = negotiate(FormatChoice::Mp4, |m| m.starts_with("video/webm"));
        match result {
            Err(ExportError::UnsupportedFormat { format }) => assert_eq!(format, "mp4"),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_png_sequence_has_no_codecs() {
        assert!(negotiate(FormatChoice::PngSequence, |_| true).is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("webm-av1".parse::<FormatChoice>().unwrap(), FormatChoice::WebmAv1);
        assert_eq!("MKV".parse::<FormatChoice>().unwrap(), FormatChoice::Mkv);
        assert_eq!("png-sequence".parse::<FormatChoice>().unwrap(), FormatChoice::PngSequence);
        assert!("gif".parse::<FormatChoice>().is_err());
    }

    #[test]
    fn test_extensions() {
        assert_eq!(extension_for("video/x-matroska;codecs=avc1"), "mkv");
        assert_eq!(extension_for("video/webm;codecs=vp8"), "webm");
        assert_eq!(extension_for("video/mp4"), "mp4");
    }

    #[test]
    fn test_bitrates() {
        assert_eq!(QualityTier::parse("high", None).bitrate(), 25_000_000);
        assert_eq!(QualityTier::parse("standard", None).bitrate(), 8_000_000);
        assert_eq!(QualityTier::parse("custom", Some(12.5)).bitrate(), 12_500_000);
        assert_eq!(QualityTier::parse("unknown", None), QualityTier::High);
    }
}
