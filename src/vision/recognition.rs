//! Glyph recognition
//!
//! Crops a detected region, normalizes it into the recognition model's input
//! shape and greedily decodes the CTC output. Recognition never fails: any
//! internal error yields an empty string with zero confidence, which the
//! usefulness filter discards downstream.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::{debug, warn};

use super::dictionary::LabelTable;
use super::prob_map::sigmoid;
use super::Rect;
use crate::inference::{InferenceEngine, TensorData};

/// Model input height.
const INPUT_HEIGHT: u32 = 48;
/// Width bounds after aspect-preserving resize.
const MIN_WIDTH: u32 = 16;
const MAX_WIDTH: u32 = 1536;
/// Width is padded up to a multiple of this.
const WIDTH_STRIDE: u32 = 32;
/// Mean crop luminance below which a light-on-dark inversion is also tried.
const DARK_LUMA_THRESHOLD: f32 = 120.0;

/// Recognizes the text inside one detected region.
pub struct GlyphRecognizer;

impl GlyphRecognizer {
    pub fn new() -> Self {
        Self
    }

    /// Recognize text in `rect`. Returns `("", 0.0)` when nothing usable is
    /// decoded; never returns an error.
    pub fn recognize(
        &self,
        image: &RgbaImage,
        rect: Rect,
        engine: &mut dyn InferenceEngine,
        table: &LabelTable,
    ) -> (String, f32) {
        match self.recognize_inner(image, rect, engine, table) {
            Ok(result) => result,
            Err(e) => {
                warn!("Recognition failed for {:?}: {:#}", rect, e);
                (String::new(), 0.0)
            }
        }
    }

    fn recognize_inner(
        &self,
        image: &RgbaImage,
        rect: Rect,
        engine: &mut dyn InferenceEngine,
        table: &LabelTable,
    ) -> Result<(String, f32)> {
        let rect = rect.clamped(image.width(), image.height());
        if rect.width() <= 0 || rect.height() <= 0 {
            return Ok((String::new(), 0.0));
        }

        let crop = imageops::crop_imm(
            image,
            rect.left as u32,
            rect.top as u32,
            rect.width() as u32,
            rect.height() as u32,
        )
        .to_image();

        let (best_text, best_conf) = {
            let normal = self.run_variant(&crop, engine, table)?;
            if mean_luminance(&crop) < DARK_LUMA_THRESHOLD {
                // Likely light text on a dark background; try inverted too
                // and keep whichever decode is stronger.
                let inverted_img = invert_rgb(&crop);
                let inverted = self.run_variant(&inverted_img, engine, table)?;
                pick_better(normal, inverted)
            } else {
                normal
            }
        };

        debug!(
            "Recognized {:?}: {:?} (conf {:.2})",
            rect, best_text, best_conf
        );
        Ok((best_text, best_conf))
    }

    fn run_variant(
        &self,
        crop: &RgbaImage,
        engine: &mut dyn InferenceEngine,
        table: &LabelTable,
    ) -> Result<(String, f32)> {
        let tensor = prepare_input(crop);
        let input_name = engine
            .input_names()
            .first()
            .cloned()
            .unwrap_or_else(|| "x".to_string());
        let outputs = engine
            .run(&[(input_name.as_str(), tensor)])
            .context("Recognition inference failed")?;
        let output = outputs.first().context("Recognition model produced no output")?;
        Ok(ctc_decode_auto(output, table))
    }
}

impl Default for GlyphRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Perceptual mean luminance of a crop.
fn mean_luminance(img: &RgbaImage) -> f32 {
    if img.width() == 0 || img.height() == 0 {
        return 255.0;
    }
    let mut sum = 0.0f64;
    for p in img.pixels() {
        let [r, g, b, _] = p.0;
        sum += 0.2126 * r as f64 + 0.7152 * g as f64 + 0.0722 * b as f64;
    }
    (sum / (img.width() * img.height()) as f64) as f32
}

fn invert_rgb(img: &RgbaImage) -> RgbaImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = 255 - p.0[0];
        p.0[1] = 255 - p.0[1];
        p.0[2] = 255 - p.0[2];
    }
    out
}

/// Resize to the fixed input height preserving aspect ratio, clamp and pad
/// the width, normalize to a CHW float tensor in [-1,1].
fn prepare_input(crop: &RgbaImage) -> TensorData {
    let (w, h) = (crop.width().max(1), crop.height().max(1));
    let scaled_w = ((w * INPUT_HEIGHT) as f32 / h as f32).round() as u32;
    let scaled_w = scaled_w.clamp(MIN_WIDTH, MAX_WIDTH);
    let padded_w = scaled_w.div_ceil(WIDTH_STRIDE) * WIDTH_STRIDE;

    let resized = imageops::resize(crop, scaled_w, INPUT_HEIGHT, FilterType::Triangle);

    let (hh, ww) = (INPUT_HEIGHT as usize, padded_w as usize);
    let mut data = vec![0.0f32; 3 * hh * ww];
    for y in 0..hh {
        for x in 0..scaled_w as usize {
            let [r, g, b, _] = resized.get_pixel(x as u32, y as u32).0;
            data[y * ww + x] = (r as f32 / 255.0 - 0.5) / 0.5;
            data[hh * ww + y * ww + x] = (g as f32 / 255.0 - 0.5) / 0.5;
            data[2 * hh * ww + y * ww + x] = (b as f32 / 255.0 - 0.5) / 0.5;
        }
    }

    TensorData::F32 {
        shape: vec![1, 3, hh, ww],
        data,
    }
}

/// Greedy CTC decode with trailing-axis auto-detection.
///
/// The model's last two dimensions are either `(sequence, classes)` or
/// `(classes, sequence)`. Both interpretations are decoded; the one whose
/// class-dimension size is plausible against the label table wins. If both
/// or neither are plausible, the longer decoded string wins, tie-broken by
/// confidence.
pub(crate) fn ctc_decode_auto(output: &TensorData, table: &LabelTable) -> (String, f32) {
    let Some(data) = output.as_f32() else {
        return (String::new(), 0.0);
    };
    let shape = output.shape();
    if shape.len() < 2 {
        return (String::new(), 0.0);
    }
    // Leading axes must be singleton batch dimensions.
    if shape[..shape.len() - 2].iter().any(|&d| d != 1) {
        return (String::new(), 0.0);
    }
    let d0 = shape[shape.len() - 2];
    let d1 = shape[shape.len() - 1];
    if data.len() != d0 * d1 || d0 == 0 || d1 == 0 {
        return (String::new(), 0.0);
    }

    let seq_major = ctc_decode(data, d0, d1, false, table);
    let class_major = ctc_decode(data, d1, d0, true, table);

    let d1_plausible = plausible_class_count(d1, table.len());
    let d0_plausible = plausible_class_count(d0, table.len());

    match (d1_plausible, d0_plausible) {
        (true, false) => seq_major,
        (false, true) => class_major,
        _ => pick_longer(seq_major, class_major),
    }
}

fn plausible_class_count(classes: usize, table_len: usize) -> bool {
    classes.abs_diff(table_len) <= 64.max(table_len / 5)
}

/// Decode one interpretation. `transposed` means the buffer is laid out
/// class-major, i.e. element `(t, c)` lives at `c * seq + t`.
fn ctc_decode(
    data: &[f32],
    seq: usize,
    classes: usize,
    transposed: bool,
    table: &LabelTable,
) -> (String, f32) {
    let mut text = String::new();
    let mut prob_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut prev_class = 0usize;

    for t in 0..seq {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for c in 0..classes {
            let v = if transposed {
                data[c * seq + t]
            } else {
                data[t * classes + c]
            };
            if v > best_score {
                best_score = v;
                best_class = c;
            }
        }

        // Blank and repeat suppression.
        if best_class == 0 || best_class == prev_class {
            prev_class = best_class;
            continue;
        }
        prev_class = best_class;

        text.push_str(table.get(best_class));
        let p = if (0.0..=1.0).contains(&best_score) {
            best_score
        } else {
            sigmoid(best_score)
        };
        prob_sum += p;
        emitted += 1;
    }

    if emitted == 0 {
        (String::new(), 0.0)
    } else {
        (text, prob_sum / emitted as f32)
    }
}

fn pick_longer(a: (String, f32), b: (String, f32)) -> (String, f32) {
    let (la, lb) = (a.0.chars().count(), b.0.chars().count());
    if la != lb {
        if la > lb {
            a
        } else {
            b
        }
    } else if a.1 >= b.1 {
        a
    } else {
        b
    }
}

/// Prefer higher confidence; a non-empty result always beats an empty one.
fn pick_better(a: (String, f32), b: (String, f32)) -> (String, f32) {
    if a.0.is_empty() {
        return b;
    }
    if b.0.is_empty() {
        return a;
    }
    if a.1 >= b.1 {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn table() -> LabelTable {
        LabelTable::from_lines(["a", "b", "c"])
    }

    /// Build a (seq, classes) tensor where each step's argmax follows `steps`.
    fn seq_major_tensor(steps: &[usize], classes: usize) -> TensorData {
        let mut data = vec![0.01f32; steps.len() * classes];
        for (t, &cls) in steps.iter().enumerate() {
            data[t * classes + cls] = 0.9;
        }
        TensorData::F32 {
            shape: vec![1, steps.len(), classes],
            data,
        }
    }

    #[test]
    fn test_ctc_blank_and_repeat_suppression() {
        // a a blank a b b -> "aab"
        let t = seq_major_tensor(&[1, 1, 0, 1, 2, 2], 4);
        let (text, conf) = ctc_decode_auto(&t, &table());
        assert_eq!(text, "aab");
        assert!(conf > 0.8);
    }

    #[test]
    fn test_ctc_never_repeats_without_blank() {
        // Property: consecutive identical emissions only occur across a blank.
        let t = seq_major_tensor(&[3, 3, 3, 0, 3], 4);
        let (text, _) = ctc_decode_auto(&t, &table());
        assert_eq!(text, "cc");
    }

    #[test]
    fn test_ctc_all_blank_is_empty() {
        let t = seq_major_tensor(&[0, 0, 0, 0], 4);
        let (text, conf) = ctc_decode_auto(&t, &table());
        assert_eq!(text, "");
        assert_eq!(conf, 0.0);
    }

    #[test]
    fn test_ctc_class_major_layout() {
        // Same logical sequence as the seq-major test, stored (classes, seq).
        // With a 4-entry table, the 4-sized axis is the plausible class dim
        // in both interpretations, so the longer decode wins.
        let steps = [1usize, 0, 2, 0, 1, 0, 2, 0];
        let seq = steps.len();
        let classes = 4usize;
        let mut data = vec![0.01f32; seq * classes];
        for (t, &cls) in steps.iter().enumerate() {
            data[cls * seq + t] = 0.9;
        }
        let tensor = TensorData::F32 {
            shape: vec![1, classes, seq],
            data,
        };
        let (text, _) = ctc_decode_auto(&tensor, &table());
        assert_eq!(text, "abab");
    }

    #[test]
    fn test_ctc_plausibility_selects_class_axis() {
        // 200 classes vs a 100-entry table is within max(64, 20) = 64? No:
        // |200-100| = 100 > 64, so only the 100-sized axis is plausible.
        let table = LabelTable::from_lines((0..99).map(|i| i.to_string()));
        assert!(plausible_class_count(100, table.len()));
        assert!(!plausible_class_count(200, table.len()));
    }

    #[test]
    fn test_ctc_logit_scores_squashed() {
        // Scores outside [0,1] are treated as logits for confidence.
        let mut data = vec![-10.0f32; 2 * 4];
        data[1] = 5.0; // step 0 -> class 1
        data[4 + 2] = 5.0; // step 1 -> class 2
        let t = TensorData::F32 {
            shape: vec![1, 2, 4],
            data,
        };
        let (text, conf) = ctc_decode_auto(&t, &table());
        assert_eq!(text, "ab");
        assert!(conf > 0.9 && conf <= 1.0);
    }

    #[test]
    fn test_rank1_output_rejected() {
        let t = TensorData::F32 {
            shape: vec![4],
            data: vec![0.0; 4],
        };
        assert_eq!(ctc_decode_auto(&t, &table()), (String::new(), 0.0));
    }

    #[test]
    fn test_prepare_input_shape() {
        let crop = RgbaImage::from_pixel(100, 25, image::Rgba([128, 128, 128, 255]));
        let t = prepare_input(&crop);
        // 100 * 48/25 = 192, already a multiple of 32.
        assert_eq!(t.shape(), &[1, 3, 48, 192]);
    }

    #[test]
    fn test_prepare_input_width_clamped_and_padded() {
        // Very wide strip: width clamps to 1536.
        let crop = RgbaImage::from_pixel(4000, 10, image::Rgba([0, 0, 0, 255]));
        let t = prepare_input(&crop);
        assert_eq!(t.shape(), &[1, 3, 48, 1536]);

        // Very narrow strip: width clamps up to 16 then pads to 32.
        let crop = RgbaImage::from_pixel(2, 100, image::Rgba([0, 0, 0, 255]));
        let t = prepare_input(&crop);
        assert_eq!(t.shape(), &[1, 3, 48, 32]);
    }

    #[test]
    fn test_mean_luminance() {
        let dark = RgbaImage::from_pixel(4, 4, image::Rgba([10, 10, 10, 255]));
        assert!(mean_luminance(&dark) < DARK_LUMA_THRESHOLD);
        let light = RgbaImage::from_pixel(4, 4, image::Rgba([240, 240, 240, 255]));
        assert!(mean_luminance(&light) > DARK_LUMA_THRESHOLD);
    }

    #[test]
    fn test_pick_better_prefers_non_empty() {
        let a = ("".to_string(), 0.0);
        let b = ("hi".to_string(), 0.2);
        assert_eq!(pick_better(a, b).0, "hi");
    }

    /// Engine that always returns a fixed recognition output.
    struct FixedEngine {
        names: Vec<String>,
        output: TensorData,
    }

    impl InferenceEngine for FixedEngine {
        fn run(&mut self, _inputs: &[(&str, TensorData)]) -> Result<Vec<TensorData>> {
            Ok(vec![self.output.clone()])
        }

        fn input_names(&self) -> &[String] {
            &self.names
        }
    }

    #[test]
    fn test_recognize_end_to_end_with_fake_engine() {
        let image = RgbaImage::from_pixel(64, 64, image::Rgba([250, 250, 250, 255]));
        let mut engine = FixedEngine {
            names: vec!["x".to_string()],
            output: seq_major_tensor(&[1, 0, 2], 4),
        };
        let rec = GlyphRecognizer::new();
        let (text, conf) = rec.recognize(
            &image,
            Rect::new(0, 0, 64, 32),
            &mut engine,
            &table(),
        );
        assert_eq!(text, "ab");
        assert!(conf > 0.5);
    }

    #[test]
    fn test_recognize_failure_yields_empty() {
        struct FailingEngine {
            names: Vec<String>,
        }
        impl InferenceEngine for FailingEngine {
            fn run(&mut self, _inputs: &[(&str, TensorData)]) -> Result<Vec<TensorData>> {
                anyhow::bail!("session lost")
            }
            fn input_names(&self) -> &[String] {
                &self.names
            }
        }
        let image = RgbaImage::from_pixel(32, 32, image::Rgba([255, 255, 255, 255]));
        let mut engine = FailingEngine { names: vec![] };
        let rec = GlyphRecognizer::new();
        let result = rec.recognize(&image, Rect::new(0, 0, 32, 32), &mut engine, &table());
        assert_eq!(result, (String::new(), 0.0));
    }

    #[test]
    fn test_recognize_degenerate_rect() {
        let image = RgbaImage::from_pixel(32, 32, image::Rgba([255, 255, 255, 255]));
        let mut engine = FixedEngine {
            names: vec!["x".to_string()],
            output: seq_major_tensor(&[1], 4),
        };
        let rec = GlyphRecognizer::new();
        let result = rec.recognize(&image, Rect::new(40, 40, 50, 50), &mut engine, &table());
        assert_eq!(result, (String::new(), 0.0));
    }
}
