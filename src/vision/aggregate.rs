//! Block aggregation
//!
//! Filters noisy recognitions and merges the survivors into one
//! reading-ordered multi-line block with union bounds. The retry chain for a
//! fully-filtered image (union box, then whole image) lives in the pipeline,
//! which owns the recognizer.

use tracing::debug;

use super::{RecognizedBlock, Rect};
use crate::lang::is_meaningful_char;

/// Character emitted by lossy decoding when bytes could not be interpreted.
const DECODE_FAILURE_MARKER: char = '\u{FFFD}';
/// Generic unknown-glyph marker, also used for label-table padding.
const UNKNOWN_MARKER: char = '□';

/// Confidence floors for the usefulness filter.
const MIN_CONFIDENCE: f32 = 0.10;
const SHORT_TEXT_CONFIDENCE: f32 = 0.35;
const MEDIUM_TEXT_CONFIDENCE: f32 = 0.5;

/// Whether a recognition result is worth keeping.
///
/// Rejects empty or low-confidence text, decode-failure artifacts,
/// punctuation-only strings, unknown-marker noise, text with too few
/// letters/digits/CJK characters, and very short low-confidence fragments.
pub fn is_useful_text(text: &str, confidence: f32) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if confidence < MIN_CONFIDENCE {
        return false;
    }
    if trimmed.contains(DECODE_FAILURE_MARKER) {
        return false;
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let total = chars.len();
    let meaningful = chars.iter().filter(|&&c| is_meaningful_char(c)).count();

    if meaningful == 0 {
        // Entirely punctuation or symbols.
        return false;
    }

    let unknown = chars.iter().filter(|&&c| c == UNKNOWN_MARKER).count();
    if unknown * 3 >= total {
        return false;
    }

    let non_space = chars.iter().filter(|c| !c.is_whitespace()).count();
    if non_space > 0 && (meaningful as f32 / non_space as f32) < 0.5 {
        return false;
    }

    if total <= 2 && meaningful == 1 && confidence < SHORT_TEXT_CONFIDENCE {
        return false;
    }
    if total <= 4 && confidence < MEDIUM_TEXT_CONFIDENCE {
        return false;
    }

    true
}

/// Merge accepted blocks into one multi-line block in reading order.
///
/// Returns `None` for an empty input. The merged confidence is the mean of
/// the member confidences.
pub fn merge_blocks(mut blocks: Vec<RecognizedBlock>) -> Option<RecognizedBlock> {
    if blocks.is_empty() {
        return None;
    }
    blocks.sort_by_key(|b| b.rect.reading_order_key());

    let bounds = blocks
        .iter()
        .skip(1)
        .fold(blocks[0].rect, |acc, b| acc.union(&b.rect));
    let text = blocks
        .iter()
        .map(|b| b.text.trim())
        .collect::<Vec<_>>()
        .join("\n");
    let confidence = blocks.iter().map(|b| b.confidence).sum::<f32>() / blocks.len() as f32;

    debug!(
        "Merged {} blocks into one ({} chars)",
        blocks.len(),
        text.chars().count()
    );

    Some(RecognizedBlock {
        rect: bounds,
        text,
        confidence,
    })
}

/// Convenience union over arbitrary rects, used by the pipeline's retry pass.
pub fn union_bounds(rects: &[Rect]) -> Option<Rect> {
    let mut it = rects.iter();
    let first = *it.next()?;
    Some(it.fold(first, |acc, r| acc.union(r)))
}
