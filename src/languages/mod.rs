use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Share of Japanese-script characters (over non-whitespace) at which text counts as Japanese.
pub const JAPANESE_RATIO_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Japanese,
    English,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Japanese => "ja",
            Language::English => "en",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Japanese => "Japanese",
            Language::English => "English",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum Direction {
    #[value(name = "ja-to-en")]
    #[serde(rename = "ja-to-en")]
    JaToEn,
    #[value(name = "en-to-ja")]
    #[serde(rename = "en-to-ja")]
    EnToJa,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::JaToEn => "ja-to-en",
            Direction::EnToJa => "en-to-ja",
        }
    }

    pub fn source(&self) -> Language {
        match self {
            Direction::JaToEn => Language::Japanese,
            Direction::EnToJa => Language::English,
        }
    }

    pub fn target(&self) -> Language {
        match self {
            Direction::JaToEn => Language::English,
            Direction::EnToJa => Language::Japanese,
        }
    }

    /// Direction that translates away from the detected source language.
    pub fn from_source(source: Language) -> Self {
        match source {
            Language::Japanese => Direction::JaToEn,
            Language::English => Direction::EnToJa,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hiragana, Katakana or CJK Unified Ideograph.
pub fn is_japanese_char(ch: char) -> bool {
    matches!(ch as u32, 0x3040..=0x309F | 0x30A0..=0x30FF | 0x4E00..=0x9FFF)
}

pub fn contains_japanese(text: &str) -> bool {
    text.chars().any(is_japanese_char)
}

pub fn detect_language(text: &str) -> Language {
    let mut total = 0usize;
    let mut japanese = 0usize;
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        total += 1;
        if is_japanese_char(ch) {
            japanese += 1;
        }
    }
    if total == 0 {
        return Language::English;
    }
    if japanese as f32 / total as f32 >= JAPANESE_RATIO_THRESHOLD {
        Language::Japanese
    } else {
        Language::English
    }
}
