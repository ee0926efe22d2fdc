//! Recognition label table loading
//!
//! Dictionary files are newline-delimited, one label per line, usually UTF-8
//! but occasionally shipped in a legacy multi-byte code page. Loading never
//! fails: strict UTF-8, lenient UTF-8 and GB18030 are tried in order with a
//! validation pass after each, and the last resort is a lenient decode with
//! no validation at all. Index 0 is always the reserved CTC blank.

use std::path::Path;

use tracing::{debug, warn};

/// Placeholder label used when the model expects more classes than the
/// dictionary provides. Rendered as the generic unknown marker so the
/// usefulness filter discards text dominated by it.
pub const UNKNOWN_LABEL: &str = "□";

/// Realignment is only attempted when the model/table class counts differ by
/// at most this much; a larger gap means the wrong dictionary is loaded.
const REALIGN_MAX_DELTA: usize = 16;

/// Ordered label table for CTC decoding. Index 0 is the blank symbol.
#[derive(Debug, Clone)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// Build a table from dictionary lines; prepends the blank at index 0.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut labels = vec![String::new()];
        labels.extend(lines.into_iter().map(Into::into));
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label for a class index; out-of-range indices map to the empty string.
    pub fn get(&self, index: usize) -> &str {
        self.labels.get(index).map(String::as_str).unwrap_or("")
    }

    /// Bring the table size in line with the model's class dimension.
    ///
    /// A small positive delta appends a space token followed by unknown-marker
    /// placeholders; a small negative delta truncates. Deltas beyond the
    /// realignment window leave the table untouched (decode then clamps
    /// indices instead).
    pub fn realign(&mut self, model_classes: usize) {
        let current = self.labels.len();
        if model_classes == current {
            return;
        }
        let delta = model_classes.abs_diff(current);
        if delta > REALIGN_MAX_DELTA {
            warn!(
                "Label table size {} too far from model class count {}, leaving as-is",
                current, model_classes
            );
            return;
        }
        if model_classes > current {
            debug!(
                "Padding label table from {} to {} entries",
                current, model_classes
            );
            self.labels.push(" ".to_string());
            while self.labels.len() < model_classes {
                self.labels.push(UNKNOWN_LABEL.to_string());
            }
        } else {
            debug!(
                "Truncating label table from {} to {} entries",
                current, model_classes
            );
            self.labels.truncate(model_classes);
        }
    }
}

/// Heuristic check that a decode produced a plausible character dictionary:
/// enough lines, no replacement characters, and almost every non-empty line
/// being a single character.
fn looks_like_dictionary(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 1000 {
        return false;
    }
    if text.contains('\u{FFFD}') {
        return false;
    }
    let non_empty: Vec<&&str> = lines.iter().filter(|l| !l.is_empty()).collect();
    if non_empty.is_empty() {
        return false;
    }
    let single = non_empty
        .iter()
        .filter(|l| l.chars().count() == 1)
        .count();
    single as f32 / non_empty.len() as f32 >= 0.9
}

/// Load a label table from a dictionary file. Never fails: undecodable or
/// unreadable input degrades to the best available interpretation, down to
/// an empty table with just the blank entry.
pub fn load_label_table(path: &Path) -> LabelTable {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!("Failed to read dictionary {:?}: {}", path, e);
            return LabelTable::from_lines(Vec::<String>::new());
        }
    };

    // Strict UTF-8 first; most dictionaries are fine.
    if let Ok(text) = std::str::from_utf8(&bytes) {
        if looks_like_dictionary(text) {
            return LabelTable::from_lines(text.lines().map(str::to_string));
        }
    }

    // Lenient UTF-8: tolerates a few mangled bytes but still validates.
    let lossy = String::from_utf8_lossy(&bytes);
    if looks_like_dictionary(&lossy) {
        return LabelTable::from_lines(lossy.lines().map(str::to_string));
    }

    // Legacy multi-byte code page.
    let (decoded, _, had_errors) = encoding_rs::GB18030.decode(&bytes);
    if !had_errors && looks_like_dictionary(&decoded) {
        debug!("Dictionary {:?} decoded via GB18030", path);
        return LabelTable::from_lines(decoded.lines().map(str::to_string));
    }

    // Last resort: lenient UTF-8 without validation.
    warn!(
        "Dictionary {:?} failed validation in every encoding, using lenient UTF-8",
        path
    );
    LabelTable::from_lines(lossy.lines().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid_dict_content(lines: usize) -> String {
        // Distinct single-character lines drawn from the CJK block.
        (0..lines)
            .map(|i| char::from_u32(0x4E00 + i as u32).unwrap().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_blank_at_index_zero() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", valid_dict_content(1200)).unwrap();
        let table = load_label_table(file.path());
        assert_eq!(table.get(0), "");
        assert_eq!(table.len(), 1201);
    }

    #[test]
    fn test_blank_present_even_on_missing_file() {
        let table = load_label_table(Path::new("/nonexistent/dict.txt"));
        assert_eq!(table.get(0), "");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_short_dictionary_falls_back_to_lenient() {
        // Under 1000 lines fails validation but still loads leniently.
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "a\nb\nc").unwrap();
        let table = load_label_table(file.path());
        assert_eq!(table.get(0), "");
        assert_eq!(table.get(1), "a");
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_gb18030_fallback() {
        // "中文" in GB18030 bytes repeated across enough lines to validate.
        let mut bytes = Vec::new();
        for _ in 0..1200 {
            bytes.extend_from_slice(&[0xD6, 0xD0]); // 中
            bytes.push(b'\n');
        }
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        let table = load_label_table(file.path());
        assert_eq!(table.get(1), "中");
        assert_eq!(table.len(), 1201);
    }

    #[test]
    fn test_realign_exact_match_is_noop() {
        // 1200-line dictionary plus blank is 1201 entries; a model class
        // dimension of 1201 needs no edit.
        let mut table = LabelTable::from_lines((0..1200).map(|i| i.to_string()));
        assert_eq!(table.len(), 1201);
        table.realign(1201);
        assert_eq!(table.len(), 1201);
        assert_ne!(table.get(1200), UNKNOWN_LABEL);
    }

    #[test]
    fn test_realign_pads_with_space_then_placeholders() {
        let mut table = LabelTable::from_lines(["a", "b"]);
        table.realign(6);
        assert_eq!(table.len(), 6);
        assert_eq!(table.get(3), " ");
        assert_eq!(table.get(4), UNKNOWN_LABEL);
        assert_eq!(table.get(5), UNKNOWN_LABEL);
    }

    #[test]
    fn test_realign_truncates() {
        let mut table = LabelTable::from_lines((0..20).map(|i| i.to_string()));
        table.realign(10);
        assert_eq!(table.len(), 10);
    }

    #[test]
    fn test_realign_large_delta_ignored() {
        let mut table = LabelTable::from_lines(["a", "b"]);
        table.realign(500);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_out_of_range_index_is_empty() {
        let table = LabelTable::from_lines(["a"]);
        assert_eq!(table.get(99), "");
    }
}
