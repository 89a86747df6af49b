//! Target languages and how generated text is cut into checkable units.
//!
//! Each language maps to one [`Script`]. Han characters and kana are checked
//! one character at a time; every other letter run is checked as one
//! case-folded word. Anything that is not a letter (digits, punctuation,
//! whitespace, emoji and other pictographs) is universally legible and never
//! checked.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Language {
    Chinese,
    Japanese,
    Spanish,
    French,
    German,
    Italian,
    Portuguese,
    English,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Han characters only (Chinese).
    Han,
    /// Han characters plus kana, both checked per character (Japanese).
    HanWithKana,
    /// Space-delimited words written in an alphabet.
    Alphabetic,
}

const LANGUAGE_CODES: [(&str, Language); 8] = [
    ("zh", Language::Chinese),
    ("ja", Language::Japanese),
    ("es", Language::Spanish),
    ("fr", Language::French),
    ("de", Language::German),
    ("it", Language::Italian),
    ("pt", Language::Portuguese),
    ("en", Language::English),
];

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Chinese => "zh",
            Language::Japanese => "ja",
            Language::Spanish => "es",
            Language::French => "fr",
            Language::German => "de",
            Language::Italian => "it",
            Language::Portuguese => "pt",
            Language::English => "en",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_lowercase();
        let primary = code.split(['-', '_']).next().unwrap_or_default();
        LANGUAGE_CODES
            .iter()
            .find(|(c, _)| *c == primary)
            .map(|(_, lang)| *lang)
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::Chinese => "Chinese",
            Language::Japanese => "Japanese",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
            Language::Italian => "Italian",
            Language::Portuguese => "Portuguese",
            Language::English => "English",
        }
    }

    pub fn script(self) -> Script {
        match self {
            Language::Chinese => Script::Han,
            Language::Japanese => Script::HanWithKana,
            Language::Spanish
            | Language::French
            | Language::German
            | Language::Italian
            | Language::Portuguese
            | Language::English => Script::Alphabetic,
        }
    }

    /// Languages whose surface form is usually paired with a separate phonetic
    /// reading (pinyin, kana).
    pub fn has_phonetic_reading(self) -> bool {
        matches!(self.script(), Script::Han | Script::HanWithKana)
    }

    /// Splits `text` into the units that the known-vocabulary constraint is
    /// checked against. Units come back in order of appearance and may repeat.
    pub fn checked_units(self, text: &str) -> Vec<String> {
        segment(text)
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language code: {0}")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::from_code(s).ok_or_else(|| UnsupportedLanguage(s.to_string()))
    }
}

impl TryFrom<String> for Language {
    type Error = UnsupportedLanguage;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Language> for String {
    fn from(lang: Language) -> String {
        lang.code().to_string()
    }
}

pub fn is_han(c: char) -> bool {
    matches!(
        c as u32,
        0x3005 | 0x3007 | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2EBEF
    )
}

pub fn is_kana(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x309F | 0x30A0..=0x30FF | 0x31F0..=0x31FF | 0xFF66..=0xFF9F
    )
}

/// Digits, punctuation, whitespace, emoji and other pictographs.
pub fn is_universal_glyph(c: char) -> bool {
    !c.is_alphabetic()
}

fn is_word_joiner(c: char) -> bool {
    matches!(c, '\'' | '\u{2019}' | '-')
}

fn is_syllabic(c: char) -> bool {
    is_han(c) || is_kana(c)
}

fn segment(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut word = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if is_syllabic(c) {
            flush_word(&mut word, &mut units);
            units.push(c.to_string());
        } else if c.is_alphabetic() {
            word.extend(c.to_lowercase());
        } else if is_word_joiner(c)
            && !word.is_empty()
            && chars.peek().is_some_and(|next| next.is_alphabetic() && !is_syllabic(*next))
        {
            word.push(c);
        } else {
            flush_word(&mut word, &mut units);
        }
    }
    flush_word(&mut word, &mut units);
    units
}

fn flush_word(word: &mut String, units: &mut Vec<String>) {
    if !word.is_empty() {
        units.push(std::mem::take(word));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_the_table() {
        for (code, lang) in LANGUAGE_CODES {
            assert_eq!(lang.code(), code);
            assert_eq!(Language::from_code(code), Some(lang));
        }
        assert_eq!(Language::from_code("zh-CN"), Some(Language::Chinese));
        assert_eq!(Language::from_code("pt_BR"), Some(Language::Portuguese));
        assert_eq!(Language::from_code("tlh"), None);
    }

    #[test]
    fn language_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Language::Japanese).unwrap(), "\"ja\"");
        let lang: Language = serde_json::from_str("\"es\"").unwrap();
        assert_eq!(lang, Language::Spanish);
        assert!(serde_json::from_str::<Language>("\"xx\"").is_err());
    }

    #[test]
    fn chinese_is_checked_per_character() {
        let units = Language::Chinese.checked_units("我是学生。123 🙂");
        assert_eq!(units, vec!["我", "是", "学", "生"]);
    }

    #[test]
    fn chinese_reports_latin_runs_as_words() {
        let units = Language::Chinese.checked_units("这是Apple的");
        assert_eq!(units, vec!["这", "是", "apple", "的"]);
    }

    #[test]
    fn japanese_kana_are_checked_per_character() {
        let units = Language::Japanese.checked_units("ネコは学生です。");
        assert_eq!(units, vec!["ネ", "コ", "は", "学", "生", "で", "す"]);
    }

    #[test]
    fn hangul_runs_are_words() {
        let units = Language::Chinese.checked_units("猫 고양이!");
        assert_eq!(units, vec!["猫", "고양이"]);
    }

    #[test]
    fn alphabetic_words_are_case_folded() {
        let units = Language::French.checked_units("L'eau est très-bonne, Marie!");
        assert_eq!(units, vec!["l'eau", "est", "très-bonne", "marie"]);
    }

    #[test]
    fn trailing_joiners_are_not_part_of_words() {
        let units = Language::Spanish.checked_units("hola- ¿qué tal?");
        assert_eq!(units, vec!["hola", "qué", "tal"]);
    }

    #[test]
    fn pictographs_and_digits_are_universal() {
        assert!(is_universal_glyph('7'));
        assert!(is_universal_glyph('🐱'));
        assert!(is_universal_glyph('。'));
        assert!(!is_universal_glyph('a'));
        assert!(!is_universal_glyph('猫'));
    }
}
