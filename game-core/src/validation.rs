use std::sync::Arc;

use anyhow::Result;

use game_types::{GameSettings, RejectReason, WordChainState, WordEntry};

use crate::dictionary::DictionaryService;
use crate::hangul;

/// Outcome of the validation pipeline. A valid word carries its dictionary
/// entry so the scorer does not have to look it up again.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid(WordEntry),
    Rejected(RejectReason),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }
}

/// Checks a submission against the room's chain state. Order matters: the
/// first failing check names the rejection, and the dictionary is only
/// consulted for words that pass everything else.
pub struct WordValidator {
    dictionary: Arc<DictionaryService>,
}

impl WordValidator {
    pub fn new(dictionary: Arc<DictionaryService>) -> Self {
        Self { dictionary }
    }

    /// All checks that need no dictionary access.
    pub fn check_static(
        word: &str,
        chain: &WordChainState,
        settings: &GameSettings,
    ) -> Result<(), RejectReason> {
        let length = hangul::syllable_count(word);
        if length < settings.min_word_length {
            return Err(RejectReason::TooShort);
        }
        if length > settings.max_word_length {
            return Err(RejectReason::TooLong);
        }
        if !hangul::is_hangul_word(word) {
            return Err(RejectReason::InvalidCharacter);
        }
        if settings
            .forbidden_words
            .iter()
            .any(|banned| !banned.is_empty() && word.contains(banned.as_str()))
        {
            return Err(RejectReason::Forbidden);
        }
        if !chain.current_last_char.is_empty() && !word.starts_with(&chain.current_last_char) {
            return Err(RejectReason::InvalidChain);
        }
        if chain.contains(word) {
            return Err(RejectReason::AlreadyUsed);
        }
        if settings.long_words_only && length < 5 {
            return Err(RejectReason::ModeViolation);
        }
        Ok(())
    }

    pub async fn validate(
        &self,
        word: &str,
        chain: &WordChainState,
        settings: &GameSettings,
    ) -> Result<ValidationOutcome> {
        let word = word.trim();
        if let Err(reason) = Self::check_static(word, chain, settings) {
            return Ok(ValidationOutcome::Rejected(reason));
        }
        match self.dictionary.lookup(word).await? {
            Some(entry) => Ok(ValidationOutcome::Valid(entry)),
            None => Ok(ValidationOutcome::Rejected(RejectReason::InvalidWord)),
        }
    }
}
