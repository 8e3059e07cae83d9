use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

/// Why the validator turned a submission down. Serialized verbatim into
/// the `reason` field of `word_rejected` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    TooShort,
    TooLong,
    InvalidCharacter,
    Forbidden,
    InvalidChain,
    AlreadyUsed,
    ModeViolation,
    InvalidWord,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::TooShort => "too_short",
            RejectReason::TooLong => "too_long",
            RejectReason::InvalidCharacter => "invalid_character",
            RejectReason::Forbidden => "forbidden",
            RejectReason::InvalidChain => "invalid_chain",
            RejectReason::AlreadyUsed => "already_used",
            RejectReason::ModeViolation => "mode_violation",
            RejectReason::InvalidWord => "invalid_word",
        }
    }
}

/// Domain errors surfaced by engine operations. The wire representation is
/// the snake_case `reason()` code carried in `*_failed` events.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GameError {
    #[error("room {0} not found")]
    NotFound(String),
    #[error("room {0} already exists")]
    AlreadyExists(String),
    #[error("operation not allowed while room is {0}")]
    InvalidState(String),
    #[error("user {0} is not the host")]
    NotHost(i64),
    #[error("not your turn")]
    NotYourTurn,
    #[error("game is not in progress")]
    NotPlaying,
    #[error("room is full")]
    Full,
    #[error("user {0} is already in the room")]
    Duplicate(i64),
    #[error("user {0} already has an active game")]
    ElsewhereActive(i64),
    #[error("not enough players to start")]
    NotEnoughPlayers,
    #[error("not all players are ready")]
    NotReady,
    #[error("word rejected: {}", .0.as_str())]
    WordRejected(RejectReason),
    #[error("concurrent updates exhausted the retry budget")]
    ConcurrencyAborted,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("dictionary unavailable: {0}")]
    Dictionary(String),
}

impl GameError {
    /// Stable snake_case code for `*_failed` events.
    pub fn reason(&self) -> &'static str {
        match self {
            GameError::NotFound(_) => "not_found",
            GameError::AlreadyExists(_) => "already_exists",
            GameError::InvalidState(_) => "invalid_state",
            GameError::NotHost(_) => "not_host",
            GameError::NotYourTurn => "not_your_turn",
            GameError::NotPlaying => "not_playing",
            GameError::Full => "full",
            GameError::Duplicate(_) => "duplicate",
            GameError::ElsewhereActive(_) => "elsewhere_active",
            GameError::NotEnoughPlayers => "not_enough_players",
            GameError::NotReady => "not_ready",
            GameError::WordRejected(reason) => reason.as_str(),
            GameError::ConcurrencyAborted => "concurrency_aborted",
            GameError::Storage(_) => "internal_error",
            GameError::Dictionary(_) => "internal_error",
        }
    }

    /// Infrastructure failures fail closed and reach clients only as a
    /// generic `internal_error`.
    pub fn is_internal(&self) -> bool {
        matches!(self, GameError::Storage(_) | GameError::Dictionary(_))
    }
}
