//! Sizes and rectangles used by the planner and the pixel pipeline.
//!
//! Two coordinate spaces meet here:
//!
//! - **Relative** `[0, 1]` window coordinates as sent by the client (`wx`, `wy`,
//!   `ww`, `wh`).
//! - **Source pixel** coordinates of one concrete asset of the pyramid.
//!
//! [`Rect`] is floating point so projections between the two stay exact until
//! the very last step, where [`Rect::enclosing_pixels`] turns the result into a
//! [`PixelRect`] the decoder can read.

use serde::Serialize;

/// Immutable pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size multiplied by `factor`, each dimension rounded to the nearest pixel.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            width: (self.width as f64 * factor).round() as u32,
            height: (self.height as f64 * factor).round() as u32,
        }
    }

    /// Width divided by height. Zero when the height is unknown.
    pub fn aspect(self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    /// Both dimensions are less than or equal to `other`'s.
    pub fn fits_in(self, other: ImageSize) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// Both dimensions are strictly less than `other`'s.
    pub fn is_smaller_than(self, other: ImageSize) -> bool {
        self.width < other.width && self.height < other.height
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle with floating point origin and extent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle at the origin covering a whole image.
    pub fn from_size(size: ImageSize) -> Self {
        Self::new(0.0, 0.0, size.width as f64, size.height as f64)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Apply a scale-only transform (`x' = x * sx`, `y' = y * sy`).
    ///
    /// This is how a relative window is projected onto an asset: scale by the
    /// asset's pixel width and height.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self::new(
            self.x * sx,
            self.y * sy,
            self.width * sx,
            self.height * sy,
        )
    }

    /// Same origin, new extent.
    pub fn with_size(&self, width: f64, height: f64) -> Self {
        Self::new(self.x, self.y, width, height)
    }

    /// Overlap of two rectangles. Disjoint rectangles produce a zero-sized
    /// result rather than a negative extent.
    pub fn intersection(&self, other: &Rect) -> Self {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Self::new(x, y, (right - x).max(0.0), (bottom - y).max(0.0))
    }

    /// Bounding box of this rectangle after rotating it by `angle_degrees`
    /// about `(cx, cy)`.
    ///
    /// Positive angles rotate clockwise in image coordinates (y pointing down).
    pub fn rotated_bounds(&self, angle_degrees: f64, cx: f64, cy: f64) -> Self {
        let rad = angle_degrees.to_radians();
        let (sin, cos) = rad.sin_cos();
        let corners = [
            (self.x, self.y),
            (self.right(), self.y),
            (self.x, self.bottom()),
            (self.right(), self.bottom()),
        ];

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for (px, py) in corners {
            let dx = px - cx;
            let dy = py - cy;
            let rx = cx + dx * cos - dy * sin;
            let ry = cy + dx * sin + dy * cos;
            min_x = min_x.min(rx);
            min_y = min_y.min(ry);
            max_x = max_x.max(rx);
            max_y = max_y.max(ry);
        }
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Smallest integer pixel rectangle that contains this one.
    pub fn enclosing_pixels(&self) -> PixelRect {
        let x = self.x.max(0.0).floor();
        let y = self.y.max(0.0).floor();
        let right = self.right().ceil().max(x);
        let bottom = self.bottom().ceil().max(y);
        PixelRect {
            x: x as u32,
            y: y as u32,
            width: (right - x) as u32,
            height: (bottom - y) as u32,
        }
    }
}

/// Integer pixel rectangle handed to the decoder and to `crop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Whether the rectangle lies completely inside an image of `size`.
    pub fn is_within(&self, size: ImageSize) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= size.width as u64
            && self.y as u64 + self.height as u64 <= size.height as u64
    }

    /// Shrink the rectangle so it fits inside an image of `size`.
    pub fn clamped_to(&self, size: ImageSize) -> Self {
        let x = self.x.min(size.width);
        let y = self.y.min(size.height);
        Self {
            x,
            y,
            width: self.width.min(size.width - x),
            height: self.height.min(size.height - y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    // =========================================================================
    // ImageSize
    // =========================================================================

    #[test]
    fn scaled_rounds_each_dimension() {
        assert_eq!(ImageSize::new(1000, 750).scaled(0.5), ImageSize::new(500, 375));
        assert_eq!(ImageSize::new(3, 3).scaled(0.5), ImageSize::new(2, 2));
    }

    #[test]
    fn aspect_of_landscape() {
        assert!((ImageSize::new(450, 300).aspect() - 1.5).abs() < EPS);
    }

    #[test]
    fn aspect_of_zero_height_is_zero() {
        assert_eq!(ImageSize::new(450, 0).aspect(), 0.0);
    }

    #[test]
    fn fits_in_requires_both_dimensions() {
        let a = ImageSize::new(100, 200);
        assert!(a.fits_in(ImageSize::new(100, 200)));
        assert!(!a.fits_in(ImageSize::new(99, 500)));
        assert!(!a.fits_in(ImageSize::new(500, 199)));
    }

    #[test]
    fn is_smaller_than_is_strict() {
        let a = ImageSize::new(100, 200);
        assert!(a.is_smaller_than(ImageSize::new(101, 201)));
        assert!(!a.is_smaller_than(ImageSize::new(100, 201)));
    }

    proptest! {
        #[test]
        fn scaled_matches_rounded_product(w in 0u32..20_000, h in 0u32..20_000, s in 0.001f64..8.0) {
            let scaled = ImageSize::new(w, h).scaled(s);
            prop_assert_eq!(scaled.width, (w as f64 * s).round() as u32);
            prop_assert_eq!(scaled.height, (h as f64 * s).round() as u32);
        }

        #[test]
        fn fits_in_is_reflexive(w in 0u32..20_000, h in 0u32..20_000) {
            let a = ImageSize::new(w, h);
            prop_assert!(a.fits_in(a));
        }

        #[test]
        fn fits_in_is_transitive(
            aw in 0u32..5_000, ah in 0u32..5_000,
            bw in 0u32..5_000, bh in 0u32..5_000,
            cw in 0u32..5_000, ch in 0u32..5_000
        ) {
            let (a, b, c) = (ImageSize::new(aw, ah), ImageSize::new(bw, bh), ImageSize::new(cw, ch));
            if a.fits_in(b) && b.fits_in(c) {
                prop_assert!(a.fits_in(c));
            }
        }
    }

    // =========================================================================
    // Rect
    // =========================================================================

    #[test]
    fn relative_window_projects_onto_asset() {
        let rel = Rect::new(0.25, 0.5, 0.5, 0.25);
        let abs = rel.scaled(2000.0, 1000.0);
        assert_eq!(abs, Rect::new(500.0, 500.0, 1000.0, 250.0));
    }

    #[test]
    fn intersection_clips_to_bounds() {
        let area = Rect::new(-10.0, 50.0, 100.0, 100.0);
        let bounds = Rect::new(0.0, 0.0, 80.0, 120.0);
        assert_eq!(area.intersection(&bounds), Rect::new(0.0, 50.0, 80.0, 70.0));
    }

    #[test]
    fn intersection_of_disjoint_is_empty_not_negative() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 20.0, 10.0, 10.0);
        let i = a.intersection(&b);
        assert_eq!(i.width, 0.0);
        assert_eq!(i.height, 0.0);
    }

    #[test]
    fn rotated_bounds_quarter_turn_swaps_extent() {
        let r = Rect::new(0.0, 0.0, 200.0, 100.0);
        let (cx, cy) = r.center();
        let b = r.rotated_bounds(90.0, cx, cy);
        assert!((b.width - 100.0).abs() < 1e-6);
        assert!((b.height - 200.0).abs() < 1e-6);
        assert!((b.x - 50.0).abs() < 1e-6);
        assert!((b.y + 50.0).abs() < 1e-6);
    }

    #[test]
    fn rotated_bounds_diagonal_grows() {
        let r = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = r.rotated_bounds(45.0, 50.0, 50.0);
        let diag = 100.0 * std::f64::consts::SQRT_2;
        assert!((b.width - diag).abs() < 1e-6);
        assert!((b.height - diag).abs() < 1e-6);
    }

    #[test]
    fn enclosing_pixels_rounds_outward() {
        let r = Rect::new(10.4, 20.6, 5.2, 5.0);
        assert_eq!(r.enclosing_pixels(), PixelRect::new(10, 20, 6, 6));
    }

    // =========================================================================
    // PixelRect
    // =========================================================================

    #[test]
    fn pixel_rect_within_bounds() {
        let size = ImageSize::new(100, 50);
        assert!(PixelRect::new(0, 0, 100, 50).is_within(size));
        assert!(!PixelRect::new(1, 0, 100, 50).is_within(size));
        assert!(!PixelRect::new(0, 0, 0, 10).is_within(size));
    }

    #[test]
    fn pixel_rect_clamped_to_image() {
        let size = ImageSize::new(100, 50);
        assert_eq!(
            PixelRect::new(90, 40, 20, 20).clamped_to(size),
            PixelRect::new(90, 40, 10, 10)
        );
    }
}
