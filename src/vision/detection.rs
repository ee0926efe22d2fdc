//! Text region detection
//!
//! Post-processes a detection model's probability map into reading-ordered
//! text boxes: thresholding, 4-connected flood fill, blob filtering, unclip
//! expansion, coordinate scale-up, merging and row-band sorting. The detector
//! never fails: anything it cannot interpret degrades to one box covering the
//! whole image.

use std::collections::VecDeque;

use tracing::debug;

use super::prob_map::ProbabilityMap;
use super::Rect;
use crate::inference::TensorData;

/// Tunable detection parameters. These encode empirically-tuned behavior;
/// the horizontal-only merge padding is deliberate and keeps separate text
/// lines from fusing.
#[derive(Debug, Clone)]
pub struct DetectorParams {
    /// Probability above which a cell counts as text.
    pub binarize_threshold: f32,
    /// Minimum blob area as a fraction of the probability-map area.
    pub min_area_ratio: f32,
    /// Minimum blob width/height in map cells.
    pub min_blob_dim: i32,
    /// Unclip expansion factor applied as `area * ratio / perimeter`.
    pub unclip_ratio: f32,
    /// Boxes with scaled width or height at or below this are dropped.
    pub min_box_px: i32,
    /// Hard cap on collected blobs.
    pub max_boxes: usize,
    /// Horizontal expansion applied when testing boxes for merging.
    pub merge_pad_x: i32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            binarize_threshold: 0.3,
            min_area_ratio: 0.00005,
            min_blob_dim: 3,
            unclip_ratio: 1.6,
            min_box_px: 6,
            max_boxes: 256,
            merge_pad_x: 5,
        }
    }
}

/// Converts detection model output into reading-ordered text boxes.
pub struct TextRegionDetector {
    params: DetectorParams,
}

#[derive(Debug)]
struct Blob {
    min_x: usize,
    max_x: usize,
    min_y: usize,
    max_y: usize,
    area: usize,
}

impl TextRegionDetector {
    pub fn new() -> Self {
        Self::with_params(DetectorParams::default())
    }

    pub fn with_params(params: DetectorParams) -> Self {
        Self { params }
    }

    /// Detect text boxes from a raw model output tensor.
    ///
    /// `image_width`/`image_height` are the original image dimensions; the
    /// probability map may be a downsampled grid and box coordinates are
    /// scaled back up. At least one box is always returned.
    pub fn detect(
        &self,
        output: &TensorData,
        image_width: u32,
        image_height: u32,
    ) -> Vec<Rect> {
        let full_image = Rect::new(0, 0, image_width as i32, image_height as i32);

        let Some(map) = ProbabilityMap::from_tensor(output) else {
            debug!(
                "Unrecognized detection output layout {:?}, falling back to full image",
                output.shape()
            );
            return vec![full_image];
        };

        let boxes = self.boxes_from_map(&map, image_width, image_height);
        if boxes.is_empty() {
            debug!("No text blobs above threshold, falling back to full image");
            return vec![full_image];
        }

        let merged = self.merge_boxes(boxes);
        let mut sorted = merged;
        sorted.sort_by_key(|r| r.reading_order_key());
        debug!("Detected {} text regions", sorted.len());
        sorted
    }

    fn boxes_from_map(&self, map: &ProbabilityMap, image_width: u32, image_height: u32) -> Vec<Rect> {
        let p = &self.params;
        let min_area =
            ((map.width * map.height) as f32 * p.min_area_ratio).max(1.0) as usize;
        let scale_x = image_width as f32 / map.width as f32;
        let scale_y = image_height as f32 / map.height as f32;

        let mut visited = vec![false; map.width * map.height];
        let mut boxes = Vec::new();

        'scan: for y in 0..map.height {
            for x in 0..map.width {
                if visited[y * map.width + x] || map.get(x, y) <= p.binarize_threshold {
                    continue;
                }
                let blob = self.flood_fill(map, &mut visited, x, y);

                let blob_w = (blob.max_x - blob.min_x + 1) as i32;
                let blob_h = (blob.max_y - blob.min_y + 1) as i32;
                if blob.area < min_area || blob_w < p.min_blob_dim || blob_h < p.min_blob_dim {
                    continue;
                }

                // Unclip: grow the box to recover glyph extent lost to the
                // detection target's shrink transform.
                let perimeter = 2.0 * (blob_w + blob_h) as f32;
                let expand = (blob.area as f32 * p.unclip_ratio / perimeter).max(0.0);

                let rect = Rect::new(
                    ((blob.min_x as f32 - expand) * scale_x).floor() as i32,
                    ((blob.min_y as f32 - expand) * scale_y).floor() as i32,
                    ((blob.max_x as f32 + 1.0 + expand) * scale_x).ceil() as i32,
                    ((blob.max_y as f32 + 1.0 + expand) * scale_y).ceil() as i32,
                )
                .clamped(image_width, image_height);

                if rect.width() <= p.min_box_px || rect.height() <= p.min_box_px {
                    continue;
                }

                boxes.push(rect);
                if boxes.len() >= p.max_boxes {
                    break 'scan;
                }
            }
        }
        boxes
    }

    /// Breadth-first 4-connected flood fill over above-threshold cells.
    fn flood_fill(&self, map: &ProbabilityMap, visited: &mut [bool], sx: usize, sy: usize) -> Blob {
        let threshold = self.params.binarize_threshold;
        let mut blob = Blob {
            min_x: sx,
            max_x: sx,
            min_y: sy,
            max_y: sy,
            area: 0,
        };

        let mut queue = VecDeque::new();
        visited[sy * map.width + sx] = true;
        queue.push_back((sx, sy));

        while let Some((x, y)) = queue.pop_front() {
            blob.area += 1;
            blob.min_x = blob.min_x.min(x);
            blob.max_x = blob.max_x.max(x);
            blob.min_y = blob.min_y.min(y);
            blob.max_y = blob.max_y.max(y);

            let neighbors = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for (nx, ny) in neighbors {
                if nx >= map.width || ny >= map.height {
                    continue;
                }
                let idx = ny * map.width + nx;
                if !visited[idx] && map.get(nx, ny) > threshold {
                    visited[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }
        blob
    }

    /// Iteratively union boxes whose horizontally-expanded bounds intersect.
    /// No vertical expansion: adjacent lines must stay separate.
    fn merge_boxes(&self, mut boxes: Vec<Rect>) -> Vec<Rect> {
        let pad = self.params.merge_pad_x;
        loop {
            let mut merged_any = false;
            let mut out: Vec<Rect> = Vec::with_capacity(boxes.len());

            for rect in boxes {
                let expanded = Rect::new(rect.left - pad, rect.top, rect.right + pad, rect.bottom);
                if let Some(target) = out.iter_mut().find(|existing| {
                    let e = Rect::new(
                        existing.left - pad,
                        existing.top,
                        existing.right + pad,
                        existing.bottom,
                    );
                    e.intersects(&expanded)
                }) {
                    *target = target.union(&rect);
                    merged_any = true;
                } else {
                    out.push(rect);
                }
            }

            boxes = out;
            if !merged_any {
                return boxes;
            }
        }
    }
}

impl Default for TextRegionDetector {
    fn default() -> Self {
        Self::new()
    }
}
