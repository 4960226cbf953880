//! Rectangles and frame orientation.

use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a full `width` x `height` surface.
    #[inline]
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive right edge, saturating at `u32::MAX`.
    #[inline]
    pub fn right(self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge, saturating at `u32::MAX`.
    #[inline]
    pub fn bottom(self) -> u32 {
        self.y.saturating_add(self.height)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rectangle lies within a `width` x `height` surface.
    pub fn fits(self, width: u32, height: u32) -> bool {
        match (self.x.checked_add(self.width), self.y.checked_add(self.height)) {
            (Some(right), Some(bottom)) => right <= width && bottom <= height,
            _ => false,
        }
    }

    /// Whether the rectangle covers a `width` x `height` surface entirely.
    pub fn covers(self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width >= width && self.height >= height
    }

    /// Check if a pixel is inside the rectangle.
    #[inline]
    pub fn contains(self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Compute intersection with another rectangle.
    pub fn intersection(self, other: Self) -> Option<Self> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x1 < x2 && y1 < y2 {
            Some(Self::new(x1, y1, x2 - x1, y2 - y1))
        } else {
            None
        }
    }

    /// Scale down by power-of-two subsampling factors, rounding outward.
    pub fn subsampled(self, w_sub: u8, h_sub: u8) -> Self {
        let x = self.x >> w_sub;
        let y = self.y >> h_sub;
        let right = crate::format::subsample(self.right(), w_sub);
        let bottom = crate::format::subsample(self.bottom(), h_sub);
        Self::new(x, y, right - x, bottom - y)
    }
}

/// Orientation applied while converting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoDirection {
    #[default]
    Identity,
    /// Rotate 90 degrees clockwise
    Rotate90R,
    Rotate180,
    /// Rotate 90 degrees counter-clockwise
    Rotate90L,
    HorizontalFlip,
    VerticalFlip,
    /// Flip across the upper-left to lower-right diagonal
    UpperLeftLowerRight,
    /// Flip across the upper-right to lower-left diagonal
    UpperRightLowerLeft,
}

impl VideoDirection {
    pub const ALL: [VideoDirection; 8] = [
        Self::Identity,
        Self::Rotate90R,
        Self::Rotate180,
        Self::Rotate90L,
        Self::HorizontalFlip,
        Self::VerticalFlip,
        Self::UpperLeftLowerRight,
        Self::UpperRightLowerLeft,
    ];

    /// Output width and height are swapped relative to the input.
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Self::Rotate90R | Self::Rotate90L | Self::UpperLeftLowerRight | Self::UpperRightLowerLeft
        )
    }

    /// 2x2 matrix acting on normalized device coordinates (x right, y up).
    ///
    /// Columns are the images of the x and y axes.
    pub fn ndc_matrix(self) -> [[f32; 2]; 2] {
        match self {
            Self::Identity => [[1.0, 0.0], [0.0, 1.0]],
            Self::Rotate90R => [[0.0, -1.0], [1.0, 0.0]],
            Self::Rotate180 => [[-1.0, 0.0], [0.0, -1.0]],
            Self::Rotate90L => [[0.0, 1.0], [-1.0, 0.0]],
            Self::HorizontalFlip => [[-1.0, 0.0], [0.0, 1.0]],
            Self::VerticalFlip => [[1.0, 0.0], [0.0, -1.0]],
            Self::UpperLeftLowerRight => [[0.0, -1.0], [-1.0, 0.0]],
            Self::UpperRightLowerLeft => [[0.0, 1.0], [1.0, 0.0]],
        }
    }

    /// Map a normalized source coordinate (u right, v down, both in 0..=1)
    /// to where it lands in the destination.
    pub fn map_uv(self, u: f32, v: f32) -> (f32, f32) {
        let [c0, c1] = self.ndc_matrix();
        let x = 2.0 * u - 1.0;
        let y = 1.0 - 2.0 * v;
        let nx = c0[0] * x + c1[0] * y;
        let ny = c0[1] * x + c1[1] * y;
        ((nx + 1.0) * 0.5, (1.0 - ny) * 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersection(b), Some(Rect::new(5, 5, 5, 5)));
        assert_eq!(a.intersection(Rect::new(20, 20, 1, 1)), None);
    }

    #[test]
    fn test_subsampled_rounds_outward() {
        let r = Rect::new(3, 3, 5, 5).subsampled(1, 1);
        assert_eq!(r, Rect::new(1, 1, 3, 3));
    }

    #[test]
    fn test_covers() {
        assert!(Rect::full(64, 64).covers(64, 64));
        assert!(!Rect::new(8, 8, 48, 48).covers(64, 64));
        assert!(Rect::new(8, 8, 48, 48).fits(64, 64));
    }

    #[test]
    fn test_fits_rejects_wrapping_edges() {
        assert!(!Rect::new(u32::MAX, 0, 2, 2).fits(16, 16));
        assert!(!Rect::new(0, u32::MAX, 2, 2).fits(16, 16));
        assert!(!Rect::new(1, 1, u32::MAX, 1).fits(u32::MAX, 16));
        assert_eq!(Rect::new(u32::MAX, 0, 2, 2).right(), u32::MAX);
    }

    #[test]
    fn test_rotate_90r_moves_top_left_to_top_right() {
        let (s, t) = VideoDirection::Rotate90R.map_uv(0.0, 0.0);
        assert!((s - 1.0).abs() < 1e-6 && t.abs() < 1e-6);
        // bottom-left ends up at top-left
        let (s, t) = VideoDirection::Rotate90R.map_uv(0.0, 1.0);
        assert!(s.abs() < 1e-6 && t.abs() < 1e-6);
    }

    #[test]
    fn test_transpose_swaps_axes() {
        let (s, t) = VideoDirection::UpperLeftLowerRight.map_uv(0.25, 0.75);
        assert!((s - 0.75).abs() < 1e-6 && (t - 0.25).abs() < 1e-6);
        let (s, t) = VideoDirection::UpperRightLowerLeft.map_uv(0.25, 0.75);
        assert!((s - 0.25).abs() < 1e-6 && (t - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_matrices_are_orthogonal() {
        for dir in VideoDirection::ALL {
            let [c0, c1] = dir.ndc_matrix();
            let det = c0[0] * c1[1] - c1[0] * c0[1];
            assert!((det.abs() - 1.0).abs() < 1e-6, "{:?}", dir);
            assert_eq!(dir.swaps_dimensions(), c0[0] == 0.0, "{:?}", dir);
        }
    }
}
