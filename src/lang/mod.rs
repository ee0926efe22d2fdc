//! Language and script classification
//!
//! Shared character-class predicates used by the recognition filter, the
//! translation bypass rule and result validation. All ratio helpers ignore
//! whitespace so that layout padding never skews a decision.

use serde::{Deserialize, Serialize};

/// Supported languages for OCR and translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    En,
    Ja,
    Ko,
    ZhHans,
    ZhHant,
    Ru,
}

impl Language {
    /// BCP-47 style code used in prompts and seq2seq marker tokens.
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ja => "ja",
            Language::Ko => "ko",
            Language::ZhHans => "zh-Hans",
            Language::ZhHant => "zh-Hant",
            Language::Ru => "ru",
        }
    }

    /// English name used when building instruction prompts.
    pub fn english_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Ja => "Japanese",
            Language::Ko => "Korean",
            Language::ZhHans => "Simplified Chinese",
            Language::ZhHant => "Traditional Chinese",
            Language::Ru => "Russian",
        }
    }

    /// Fixed placeholder shown when nothing safe survives fallback sanitizing.
    pub fn unreadable_placeholder(&self) -> &'static str {
        match self {
            Language::En => "[unreadable]",
            Language::Ja => "[判読不能]",
            Language::Ko => "[판독 불가]",
            Language::ZhHans | Language::ZhHant => "[无法识别]",
            Language::Ru => "[нечитаемо]",
        }
    }
}

/// CJK unified ideograph (incl. extension A and compatibility block).
pub fn is_cjk_ideograph(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}')
}

/// Hiragana, katakana or halfwidth katakana.
pub fn is_kana(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{309F}'
        | '\u{30A0}'..='\u{30FF}'
        | '\u{31F0}'..='\u{31FF}'
        | '\u{FF66}'..='\u{FF9D}')
}

/// Hangul syllables and jamo.
pub fn is_hangul(c: char) -> bool {
    matches!(c,
        '\u{AC00}'..='\u{D7A3}'
        | '\u{1100}'..='\u{11FF}'
        | '\u{3130}'..='\u{318F}')
}

/// Basic and extended Latin letters.
pub fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || (matches!(c, '\u{00C0}'..='\u{024F}') && c.is_alphabetic())
}

/// Cyrillic letters.
pub fn is_cyrillic(c: char) -> bool {
    matches!(c, '\u{0400}'..='\u{04FF}')
}

/// Characters that carry linguistic content: letters, digits, CJK, kana,
/// hangul. Everything else (punctuation, symbols, box art) is noise for the
/// usefulness filter.
pub fn is_meaningful_char(c: char) -> bool {
    c.is_alphanumeric() || is_cjk_ideograph(c) || is_kana(c) || is_hangul(c)
}

/// Whether a character belongs to the native script of `lang`.
///
/// For English this includes digits and ASCII punctuation, so ordinary UI
/// strings like "Save as..." count as fully English.
pub fn is_script_char(c: char, lang: Language) -> bool {
    match lang {
        Language::En => is_latin_letter(c) || c.is_ascii_digit() || c.is_ascii_punctuation(),
        Language::Ja => is_kana(c) || is_cjk_ideograph(c),
        Language::Ko => is_hangul(c),
        Language::ZhHans | Language::ZhHant => is_cjk_ideograph(c),
        Language::Ru => is_cyrillic(c) || c.is_ascii_digit() || c.is_ascii_punctuation(),
    }
}

/// Fraction of non-space characters belonging to the native script of `lang`.
/// Returns 0.0 for whitespace-only input.
pub fn script_fraction(text: &str, lang: Language) -> f32 {
    let mut total = 0usize;
    let mut hits = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if is_script_char(c, lang) {
            hits += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        hits as f32 / total as f32
    }
}

/// Ratio of characters (non-space) satisfying `pred`.
pub fn char_ratio(text: &str, pred: impl Fn(char) -> bool) -> f32 {
    let mut total = 0usize;
    let mut hits = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if pred(c) {
            hits += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        hits as f32 / total as f32
    }
}

pub fn contains_kana(text: &str) -> bool {
    text.chars().any(is_kana)
}

pub fn contains_hangul(text: &str) -> bool {
    text.chars().any(is_hangul)
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_ideograph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_predicates() {
        assert!(is_cjk_ideograph('漢'));
        assert!(!is_cjk_ideograph('あ'));
        assert!(is_kana('あ'));
        assert!(is_kana('カ'));
        assert!(is_hangul('한'));
        assert!(is_latin_letter('é'));
        assert!(is_latin_letter('A'));
        assert!(!is_latin_letter('1'));
        assert!(is_cyrillic('ж'));
    }

    #[test]
    fn test_script_fraction_english() {
        // "Hello World" is entirely Latin once the space is dropped.
        let f = script_fraction("Hello World", Language::En);
        assert!(f > 0.99, "expected ~1.0, got {}", f);
    }

    #[test]
    fn test_script_fraction_mixed() {
        let f = script_fraction("abこん", Language::Ja);
        assert!((f - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_script_fraction_empty() {
        assert_eq!(script_fraction("   ", Language::En), 0.0);
        assert_eq!(script_fraction("", Language::Ja), 0.0);
    }

    #[test]
    fn test_meaningful_chars() {
        assert!(is_meaningful_char('a'));
        assert!(is_meaningful_char('7'));
        assert!(is_meaningful_char('語'));
        assert!(is_meaningful_char('ま'));
        assert!(!is_meaningful_char('.'));
        assert!(!is_meaningful_char('□'));
    }

    #[test]
    fn test_contains_helpers() {
        assert!(contains_kana("テスト"));
        assert!(!contains_kana("test"));
        assert!(contains_hangul("안녕 hello"));
        assert!(contains_cjk("漢字 mixed"));
        assert!(!contains_cjk("plain latin"));
    }

    #[test]
    fn test_language_codes() {
        assert_eq!(Language::Ja.code(), "ja");
        assert_eq!(Language::ZhHans.code(), "zh-Hans");
        assert_eq!(Language::En.unreadable_placeholder(), "[unreadable]");
    }
}
