//! # chatooly-export
//!
//! Export pipeline for Chatooly canvas tools.
//!
//! This crate provides platform-agnostic logic for:
//! - Finding what to export on a page (canvas or DOM subtree) and which
//!   framework drew it
//! - Still-image export at arbitrary resolution multipliers
//! - Canvas-to-video recording through a sans-IO state machine
//! - PNG-sequence export packed into a ZIP archive
//! - Handing renders off to an out-of-process render server
//!
//! ## Features
//!
//! - `headless` (default) - In-memory canvas backend built on `image`
//! - `web` - Browser backend and the `WebExporter` JavaScript API
//! - `toml` - Load [`ExportConfig`] from TOML
//!
//! ## Example
//!
//! ```rust
//! use chatooly_export::{plan_still, RasterCapabilities, RasterPlan, Smoothing};
//! use chatooly_export::{FrameworkTag, TargetKind};
//!
//! // A plain 400x300 canvas exported at 2x with no render hooks
//! let plans = plan_still(
//!     TargetKind::Canvas(FrameworkTag::Plain),
//!     (400, 300),
//!     2.0,
//!     &RasterCapabilities::default(),
//!     None,
//! );
//! assert_eq!(
//!     plans,
//!     vec![RasterPlan::Upscale { width: 800, height: 600, smoothing: Smoothing::Smooth }]
//! );
//! ```

pub mod codec;
pub mod config;
mod data;
pub mod download;
mod error;
pub mod loader;
pub mod notify;
pub mod raster;
pub mod recording;
pub mod remote;
pub mod sequence;
pub mod sizing;
pub mod target;

#[cfg(feature = "headless")]
pub mod headless;

#[cfg(feature = "web")]
mod exporter;

pub use codec::{negotiate, CodecChoice, FormatChoice, QualityTier};
pub use config::ExportConfig;
pub use data::{DataUrl, ExportTarget, FrameworkTag, ResolutionRequest, TargetKind};
pub use error::{ExportError, ExportResult};
pub use raster::{plan_still, RasterCapabilities, RasterExporter, RasterPlan, Smoothing};
pub use recording::{RecordingController, RecordingRequest, RecordingState};
pub use remote::{RemoteRenderClient, SnapshotBuilder};
pub use sequence::{SequenceExporter, SequenceOutcome, SequenceRequest};
pub use target::{classify, TargetResolver};

#[cfg(feature = "web")]
pub use exporter::WebExporter;
