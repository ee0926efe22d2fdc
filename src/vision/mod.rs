//! Vision layer
//!
//! Turns a captured pixel buffer into recognized text blocks: probability-map
//! based region detection, CTC glyph recognition and block aggregation.

pub mod aggregate;
pub mod detection;
pub mod dictionary;
pub mod prob_map;
pub mod recognition;
pub mod session;

pub use aggregate::{is_useful_text, merge_blocks, union_bounds};
pub use detection::{DetectorParams, TextRegionDetector};
pub use dictionary::{load_label_table, LabelTable};
pub use prob_map::{sigmoid, ProbabilityMap};
pub use recognition::GlyphRecognizer;
pub use session::{LoadedOcr, OcrModelPaths, OcrSessionManager};

/// Axis-aligned rectangle in source-image pixel coordinates.
///
/// Invariant once constructed through the detector: clamped to image bounds
/// with strictly positive width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Clamp to `[0, width) x [0, height)` image bounds.
    pub fn clamped(&self, image_width: u32, image_height: u32) -> Rect {
        Rect {
            left: self.left.clamp(0, image_width as i32),
            top: self.top.clamp(0, image_height as i32),
            right: self.right.clamp(0, image_width as i32),
            bottom: self.bottom.clamp(0, image_height as i32),
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    /// Key for reading order: rows bucketed into 16-pixel bands so boxes on
    /// the same visual line sort left-to-right despite vertical jitter.
    pub fn reading_order_key(&self) -> (i32, i32) {
        (self.top / 16, self.left)
    }
}

/// One recognized text region, pre-aggregation.
#[derive(Debug, Clone)]
pub struct RecognizedBlock {
    pub rect: Rect,
    pub text: String,
    pub confidence: f32,
}

/// Final output record for the overlay layer.
#[derive(Debug, Clone)]
pub struct TranslatedBlock {
    pub original_text: String,
    pub translated_text: String,
    pub bounds: Rect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_dimensions() {
        let r = Rect::new(10, 20, 110, 50);
        assert_eq!(r.width(), 100);
        assert_eq!(r.height(), 30);
    }

    #[test]
    fn test_rect_clamp() {
        let r = Rect::new(-10, -5, 700, 500).clamped(640, 480);
        assert_eq!(r, Rect::new(0, 0, 640, 480));
    }

    #[test]
    fn test_rect_union() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 20, 8);
        assert_eq!(a.union(&b), Rect::new(0, 0, 20, 10));
    }

    #[test]
    fn test_rect_intersects() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.intersects(&Rect::new(9, 9, 20, 20)));
        assert!(!a.intersects(&Rect::new(10, 0, 20, 10)));
        assert!(!a.intersects(&Rect::new(0, 10, 10, 20)));
    }

    #[test]
    fn test_reading_order_banding() {
        // 15px of vertical jitter keeps two boxes in the same row band.
        let a = Rect::new(50, 2, 60, 12);
        let b = Rect::new(5, 14, 15, 24);
        let mut rects = vec![a, b];
        rects.sort_by_key(|r| r.reading_order_key());
        assert_eq!(rects[0], b);
        assert_eq!(rects[1], a);
    }
}
