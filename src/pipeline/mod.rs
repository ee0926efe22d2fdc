//! Analysis pipeline
//!
//! One logical background task per request: pixels in, translated blocks
//! out. Detection, recognition and aggregation run under the session lock;
//! translation happens after it is released. Cancellation is checked at the
//! stage boundaries and is the only error the caller ever sees.

use std::sync::Arc;

use image::{imageops::FilterType, RgbaImage};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::inference::TensorData;
use crate::translate::{TranslationBackend, TranslationDispatcher};
use crate::vision::{
    is_useful_text, merge_blocks, union_bounds, GlyphRecognizer, LoadedOcr, Rect, RecognizedBlock,
    TextRegionDetector, TranslatedBlock,
};
use crate::vision::OcrSessionManager;

/// Longest side the detection input is scaled to.
const DET_TARGET_SIZE: u32 = 960;
/// Detection model dimensions must be multiples of this.
const DET_STRIDE: u32 = 32;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("analysis cancelled")]
    Cancelled,
}

/// Runs the full screenshot-to-translation pass.
pub struct Analyzer {
    detector: TextRegionDetector,
    recognizer: GlyphRecognizer,
    sessions: Arc<OcrSessionManager>,
}

impl Analyzer {
    pub fn new(sessions: Arc<OcrSessionManager>) -> Self {
        Self {
            detector: TextRegionDetector::new(),
            recognizer: GlyphRecognizer::new(),
            sessions,
        }
    }

    /// Analyze one captured frame.
    ///
    /// Every internal failure degrades: missing models yield an empty result,
    /// backend faults resolve inside the dispatcher. Only cancellation
    /// surfaces as an error.
    pub async fn analyze(
        &self,
        image: &RgbaImage,
        config: &EngineConfig,
        backend: &dyn TranslationBackend,
        cancel: &CancellationToken,
    ) -> Result<Vec<TranslatedBlock>, AnalyzeError> {
        if cancel.is_cancelled() {
            return Err(AnalyzeError::Cancelled);
        }

        let source = config.translation.source_language;
        let target = config.translation.target_language;

        let paths = config.ocr.paths_for(source);
        if let Err(e) = self.sessions.ensure_loaded(source, &paths) {
            warn!("Could not load OCR sessions for {}: {:#}", source.code(), e);
            return Ok(Vec::new());
        }

        let recognized = match self
            .sessions
            .with_loaded(|ocr| self.recognize_all(image, ocr, cancel))
        {
            Some(result) => result?,
            None => return Ok(Vec::new()),
        };

        let Some(block) = merge_blocks(recognized) else {
            info!("No usable text found in frame");
            return Ok(Vec::new());
        };

        if cancel.is_cancelled() {
            return Err(AnalyzeError::Cancelled);
        }

        let dispatcher = TranslationDispatcher::new(source, target);
        let translated = dispatcher
            .dispatch(&block.text, backend, cancel)
            .await
            .map_err(|_| AnalyzeError::Cancelled)?;

        Ok(vec![TranslatedBlock {
            original_text: block.text,
            translated_text: translated,
            bounds: block.rect,
        }])
    }

    /// Detection plus per-box recognition and the usefulness filter, with the
    /// union-box / whole-image retry chain when everything is filtered out.
    fn recognize_all(
        &self,
        image: &RgbaImage,
        ocr: &mut LoadedOcr,
        cancel: &CancellationToken,
    ) -> Result<Vec<RecognizedBlock>, AnalyzeError> {
        if cancel.is_cancelled() {
            return Err(AnalyzeError::Cancelled);
        }

        let boxes = self.detect_regions(image, ocr);

        let mut accepted = Vec::new();
        for rect in &boxes {
            if cancel.is_cancelled() {
                return Err(AnalyzeError::Cancelled);
            }
            let (text, confidence) =
                self.recognizer
                    .recognize(image, *rect, ocr.recognition.as_mut(), &ocr.table);
            if is_useful_text(&text, confidence) {
                accepted.push(RecognizedBlock {
                    rect: *rect,
                    text,
                    confidence,
                });
            }
        }

        if accepted.is_empty() {
            debug!("All {} regions filtered, retrying coarser crops", boxes.len());
            let full = Rect::new(0, 0, image.width() as i32, image.height() as i32);
            let retries = [union_bounds(&boxes), Some(full)];
            for rect in retries.into_iter().flatten() {
                if cancel.is_cancelled() {
                    return Err(AnalyzeError::Cancelled);
                }
                let (text, confidence) =
                    self.recognizer
                        .recognize(image, rect, ocr.recognition.as_mut(), &ocr.table);
                if is_useful_text(&text, confidence) {
                    accepted.push(RecognizedBlock {
                        rect,
                        text,
                        confidence,
                    });
                    break;
                }
            }
        }

        Ok(accepted)
    }

    fn detect_regions(&self, image: &RgbaImage, ocr: &mut LoadedOcr) -> Vec<Rect> {
        let full_image = Rect::new(0, 0, image.width() as i32, image.height() as i32);

        let input = prepare_detection_input(image);
        let input_name = ocr
            .detection
            .input_names()
            .first()
            .cloned()
            .unwrap_or_else(|| "x".to_string());
        let outputs = match ocr.detection.run(&[(input_name.as_str(), input.tensor)]) {
            Ok(o) => o,
            Err(e) => {
                warn!("Detection inference failed: {:#}", e);
                return vec![full_image];
            }
        };
        let Some(output) = outputs.first() else {
            return vec![full_image];
        };

        // The probability map covers the padded canvas, so boxes come back in
        // padded-canvas source coordinates; clamping trims the pad strips.
        let boxes: Vec<Rect> = self
            .detector
            .detect(output, input.canvas_source_width, input.canvas_source_height)
            .into_iter()
            .map(|r| r.clamped(image.width(), image.height()))
            .filter(|r| r.width() > 0 && r.height() > 0)
            .collect();
        if boxes.is_empty() {
            return vec![full_image];
        }
        boxes
    }
}

/// Normalized NCHW detection input plus the geometry needed to map model
/// output back onto the frame.
struct DetectionInput {
    tensor: TensorData,
    /// Padded canvas width expressed in source-image pixels.
    canvas_source_width: u32,
    /// Padded canvas height expressed in source-image pixels.
    canvas_source_height: u32,
}

/// Scale the frame so its longest side fits the detection target, pad to a
/// stride multiple and emit a normalized NCHW tensor ([0,255] -> [-1,1]).
///
/// The right/bottom pad strips are part of the model input, so the
/// probability map spans the padded canvas, not just the frame. The returned
/// canvas-in-source dimensions carry that pad through the detector's
/// scale-up; without them every box shrinks by the pad ratio.
fn prepare_detection_input(image: &RgbaImage) -> DetectionInput {
    let (w, h) = (image.width().max(1), image.height().max(1));
    let scale = (DET_TARGET_SIZE as f32 / w.max(h) as f32).min(1.0);
    let new_w = ((w as f32 * scale) as u32).max(1);
    let new_h = ((h as f32 * scale) as u32).max(1);
    let padded_w = new_w.div_ceil(DET_STRIDE) * DET_STRIDE;
    let padded_h = new_h.div_ceil(DET_STRIDE) * DET_STRIDE;

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut data = vec![0.0f32; 3 * (padded_h * padded_w) as usize];
    let plane = (padded_h * padded_w) as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y * padded_w + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = (pixel.0[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }

    // Back-map: one canvas pixel is 1/scale source pixels.
    let canvas_source_width = (padded_w as f32 * w as f32 / new_w as f32).round() as u32;
    let canvas_source_height = (padded_h as f32 * h as f32 / new_h as f32).round() as u32;

    DetectionInput {
        tensor: TensorData::F32 {
            shape: vec![1, 3, padded_h as usize, padded_w as usize],
            data,
        },
        canvas_source_width,
        canvas_source_height,
    }
}
