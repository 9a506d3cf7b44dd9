//! Pixel dimension calculations for scaled exports.

use crate::error::{ExportError, ExportResult};

/// Largest canvas area, in pixels, an export may allocate.
///
/// 16384 x 16384 is the common browser canvas limit.
pub const MAX_CANVAS_AREA: u64 = 16_384 * 16_384;

/// Scale pixel dimensions by a resolution multiplier.
///
/// Results are truncated the same way a canvas truncates an assigned
/// `width`/`height`, and never drop below one pixel.
///
/// ## Example
///
/// ```rust
/// use chatooly_export::sizing::scaled_dimensions;
///
/// assert_eq!(scaled_dimensions(400, 300, 2.0), (800, 600));
/// assert_eq!(scaled_dimensions(333, 100, 1.5), (499, 150));
/// ```
pub fn scaled_dimensions(width: u32, height: u32, multiplier: f64) -> (u32, u32) {
    (scale_axis(width, multiplier), scale_axis(height, multiplier))
}

#[inline]
fn scale_axis(value: u32, multiplier: f64) -> u32 {
    let scaled = (value as f64 * multiplier).floor();
    if scaled < 1.0 {
        1
    } else if scaled > u32::MAX as f64 {
        u32::MAX
    } else {
        scaled as u32
    }
}

/// Reject canvas sizes above [`MAX_CANVAS_AREA`] before anything is allocated.
///
/// ## Example
///
/// ```rust
/// use chatooly_export::sizing::check_canvas_size;
///
/// assert!(check_canvas_size(3840, 2160).is_ok());
/// assert!(check_canvas_size(u32::MAX, 2).is_err());
/// ```
pub fn check_canvas_size(width: u32, height: u32) -> ExportResult<()> {
    let area = u64::from(width) * u64::from(height);
    if area > MAX_CANVAS_AREA {
        return Err(ExportError::Canvas(format!(
            "{width}x{height} exceeds the maximum canvas area of {MAX_CANVAS_AREA} pixels"
        )));
    }
    Ok(())
}

/// Geometry for a high-resolution Three.js re-render.
///
/// The temporary renderer is created at `target_*` with a device pixel
/// ratio of 1, so the multiplier is exact.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThreeRenderPlan {
    /// Live renderer size (CSS pixels, as reported by `getSize`)
    pub base_width: f64,
    pub base_height: f64,
    /// Output size in pixels
    pub target_width: u32,
    pub target_height: u32,
    pub multiplier: f64,
}

impl ThreeRenderPlan {
    /// Compute target dimensions from the live renderer size.
    pub fn new(base_width: f64, base_height: f64, multiplier: f64) -> Self {
        let target_width = (base_width * multiplier).floor().max(1.0) as u32;
        let target_height = (base_height * multiplier).floor().max(1.0) as u32;
        Self {
            base_width,
            base_height,
            target_width,
            target_height,
            multiplier,
        }
    }

    /// Camera aspect ratio used during the re-render.
    #[inline]
    pub fn target_aspect(&self) -> f64 {
        self.target_width as f64 / self.target_height as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_dimensions_integer_multiplier() {
        assert_eq!(scaled_dimensions(400, 300, 2.0), (800, 600));
        assert_eq!(scaled_dimensions(400, 300, 1.0), (400, 300));
    }

    #[test]
    fn test_scaled_dimensions_never_zero() {
        assert_eq!(scaled_dimensions(1, 1, 0.1), (1, 1));
    }

    #[test]
    fn test_canvas_size_limit() {
        assert!(check_canvas_size(16_384, 16_384).is_ok());
        assert!(check_canvas_size(16_385, 16_384).is_err());
        let (w, h) = scaled_dimensions(400, 300, 2e9);
        assert_eq!(w, u32::MAX);
        assert!(matches!(check_canvas_size(w, h), Err(ExportError::Canvas(_))));
    }

    #[test]
    fn test_three_plan() {
        let plan = ThreeRenderPlan::new(960.0, 540.0, 4.0);
        assert_eq!(plan.target_width, 3840);
        assert_eq!(plan.target_height, 2160);
        assert!((plan.target_aspect() - 16.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_three_plan_fractional_size() {
        let plan = ThreeRenderPlan::new(640.5, 480.0, 2.0);
        assert_eq!(plan.target_width, 1281);
        assert_eq!(plan.target_height, 960);
    }
}
