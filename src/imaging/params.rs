//! Parameter types for pixel operations.
//!
//! These describe *what* the pipeline should do, not *how*. The
//! [`backend`](super::backend) turns them into pixel work.
//!
//! - [`ScaleQuality`]: resampling quality level (0–2, default 2). Clamped on construction.
//! - [`Interpolation`]: the resampling filter a quality level maps to.
//! - [`ColorOp`]: whole-image color operations selected by `colop`.

use serde::Serialize;

/// Resampling quality level, `q0`..`q2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ScaleQuality(pub u8);

impl ScaleQuality {
    pub const MAX: u8 = 2;

    pub fn new(value: u8) -> Self {
        Self(value.min(Self::MAX))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Nearest neighbour at level 0, bilinear above.
    pub fn interpolation(self) -> Interpolation {
        if self.0 == 0 {
            Interpolation::Nearest
        } else {
            Interpolation::Bilinear
        }
    }
}

impl Default for ScaleQuality {
    fn default() -> Self {
        Self(Self::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

impl From<Interpolation> for image::imageops::FilterType {
    fn from(value: Interpolation) -> Self {
        match value {
            Interpolation::Nearest => image::imageops::FilterType::Nearest,
            Interpolation::Bilinear => image::imageops::FilterType::Triangle,
        }
    }
}

/// Whole-image color operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorOp {
    /// Average of the three channels.
    Grayscale,
    /// Luma with NTSC weights (0.299, 0.587, 0.114).
    NtscGray,
    Invert,
}

impl ColorOp {
    /// Case-insensitive lookup by name. `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "grayscale" => Some(ColorOp::Grayscale),
            "ntsc_gray" => Some(ColorOp::NtscGray),
            "invert" => Some(ColorOp::Invert),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(ScaleQuality::new(0).value(), 0);
        assert_eq!(ScaleQuality::new(1).value(), 1);
        assert_eq!(ScaleQuality::new(9).value(), 2);
    }

    #[test]
    fn quality_default_is_2() {
        assert_eq!(ScaleQuality::default().value(), 2);
    }

    #[test]
    fn quality_zero_is_nearest() {
        assert_eq!(ScaleQuality::new(0).interpolation(), Interpolation::Nearest);
        assert_eq!(ScaleQuality::new(1).interpolation(), Interpolation::Bilinear);
        assert_eq!(ScaleQuality::new(2).interpolation(), Interpolation::Bilinear);
    }

    #[test]
    fn color_op_parse_is_case_insensitive() {
        assert_eq!(ColorOp::parse("GrayScale"), Some(ColorOp::Grayscale));
        assert_eq!(ColorOp::parse("NTSC_GRAY"), Some(ColorOp::NtscGray));
        assert_eq!(ColorOp::parse("invert"), Some(ColorOp::Invert));
        assert_eq!(ColorOp::parse("sepia"), None);
    }
}
