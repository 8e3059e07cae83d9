use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A dictionary row. Read-only as far as the engine is concerned; the
/// validator and scorer consume it as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WordEntry {
    pub word: String,
    pub definition: String,
    /// 1 = common, 2 = intermediate, 3 = advanced.
    pub difficulty: u8,
    /// 0..=100, higher means more frequent in the corpus.
    pub frequency_score: u8,
    pub first_char: String,
    pub last_char: String,
    /// Length in syllables, not bytes.
    pub length: u32,
}

impl WordEntry {
    pub fn new(word: &str, definition: &str, difficulty: u8, frequency_score: u8) -> Self {
        let first_char = word.chars().next().map(String::from).unwrap_or_default();
        let last_char = word.chars().last().map(String::from).unwrap_or_default();
        Self {
            word: word.to_string(),
            definition: definition.to_string(),
            difficulty,
            frequency_score,
            first_char,
            last_char,
            length: word.chars().count() as u32,
        }
    }
}
