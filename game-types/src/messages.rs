use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    GameSettings, GameMode, GameRoom, Player, RankingEntry, RejectReason, ScoreBreakdown,
};

/// Raw inbound envelope. The payload stays untyped until the handler has
/// matched the `type` discriminator, so an unknown type can be answered with
/// `error {reason: "unsupported"}` instead of a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateGamePayload {
    pub room_id: String,
    pub user_id: i64,
    pub nickname: String,
    #[serde(default)]
    pub mode: Option<GameMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct JoinGamePayload {
    pub room_id: String,
    pub user_id: i64,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReadyPayload {
    pub room_id: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StartGamePayload {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubmitWordPayload {
    pub room_id: String,
    pub word: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LeaveGamePayload {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChatPayload {
    pub room_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SetUsernamePayload {
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GetHintsPayload {
    pub room_id: String,
    #[serde(default)]
    pub count: Option<usize>,
}

/// Urgency classification for the timer-tick event family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    // Lifecycle
    GameCreated {
        room_id: String,
        host_id: i64,
        settings: GameSettings,
    },
    PlayerJoined {
        room_id: String,
        user_id: i64,
        nickname: String,
        players: Vec<Player>,
    },
    PlayerLeftRoom {
        room_id: String,
        user_id: i64,
        nickname: String,
    },
    HostChanged {
        room_id: String,
        user_id: i64,
        nickname: String,
    },
    PlayerReadyStatus {
        room_id: String,
        user_id: i64,
        ready: bool,
        all_ready: bool,
    },
    GameStartingCountdown {
        room_id: String,
        seconds_remaining: u32,
    },
    GameStarted {
        room_id: String,
        round: u32,
        players: Vec<Player>,
        current_turn_user_id: i64,
        turn_time_limit: u64,
    },
    RoundCompleted {
        room_id: String,
        round: u32,
        rankings: Vec<RankingEntry>,
    },
    RoundTransition {
        room_id: String,
        next_round: u32,
    },
    RoundStartingCountdown {
        room_id: String,
        seconds_remaining: u32,
    },
    NextRoundStarting {
        room_id: String,
        round: u32,
        current_turn_user_id: i64,
        turn_time_limit: u64,
    },
    GameCompleted {
        room_id: String,
        rankings: Vec<RankingEntry>,
        reason: String,
    },
    GameEnded {
        room_id: String,
        reason: String,
    },
    HostLeftGame {
        room_id: String,
        user_id: i64,
    },
    GameStateUpdate {
        room: GameRoom,
    },

    // Turn
    TurnTimerStarted {
        room_id: String,
        user_id: i64,
        timer_id: String,
        duration_ms: u64,
        possible_words: Option<u64>,
    },
    GameTimeUpdate {
        room_id: String,
        remaining_seconds: u64,
        urgency: Urgency,
        timestamp: String,
    },
    GameTimeWarning {
        room_id: String,
        remaining_seconds: u64,
        urgency: Urgency,
        timestamp: String,
    },
    GameTimeCritical {
        room_id: String,
        remaining_seconds: u64,
        urgency: Urgency,
        timestamp: String,
    },
    GameTimeUrgent {
        room_id: String,
        remaining_seconds: u64,
        urgency: Urgency,
        timestamp: String,
    },
    TurnTimeout {
        room_id: String,
        user_id: i64,
        nickname: String,
    },

    // Submission
    WordSubmitted {
        room_id: String,
        user_id: i64,
        nickname: String,
        word: String,
        status: String,
        next_char: String,
        current_turn_user_id: i64,
        current_turn_time_limit: u64,
        score_breakdown: ScoreBreakdown,
        scores: BTreeMap<String, i64>,
    },
    WordRejected {
        room_id: String,
        user_id: i64,
        word: String,
        reason: RejectReason,
    },

    // Session-level
    Chat {
        room_id: String,
        user_id: i64,
        nickname: String,
        message: String,
        timestamp: String,
    },
    Pong,
    UsernameSet {
        nickname: String,
    },
    Hints {
        room_id: String,
        last_char: String,
        words: Vec<String>,
    },

    // Failures
    CreateFailed {
        reason: String,
    },
    JoinFailed {
        reason: String,
    },
    ReadyFailed {
        reason: String,
    },
    StartFailed {
        reason: String,
    },
    LeaveFailed {
        reason: String,
    },
    InternalError {
        reason: String,
    },
    Error {
        reason: String,
    },
}

impl ServerMessage {
    /// The wire `type` discriminator, used by the dispatcher's dedup cache.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::GameCreated { .. } => "game_created",
            ServerMessage::PlayerJoined { .. } => "player_joined",
            ServerMessage::PlayerLeftRoom { .. } => "player_left_room",
            ServerMessage::HostChanged { .. } => "host_changed",
            ServerMessage::PlayerReadyStatus { .. } => "player_ready_status",
            ServerMessage::GameStartingCountdown { .. } => "game_starting_countdown",
            ServerMessage::GameStarted { .. } => "game_started",
            ServerMessage::RoundCompleted { .. } => "round_completed",
            ServerMessage::RoundTransition { .. } => "round_transition",
            ServerMessage::RoundStartingCountdown { .. } => "round_starting_countdown",
            ServerMessage::NextRoundStarting { .. } => "next_round_starting",
            ServerMessage::GameCompleted { .. } => "game_completed",
            ServerMessage::GameEnded { .. } => "game_ended",
            ServerMessage::HostLeftGame { .. } => "host_left_game",
            ServerMessage::GameStateUpdate { .. } => "game_state_update",
            ServerMessage::TurnTimerStarted { .. } => "turn_timer_started",
            ServerMessage::GameTimeUpdate { .. } => "game_time_update",
            ServerMessage::GameTimeWarning { .. } => "game_time_warning",
            ServerMessage::GameTimeCritical { .. } => "game_time_critical",
            ServerMessage::GameTimeUrgent { .. } => "game_time_urgent",
            ServerMessage::TurnTimeout { .. } => "turn_timeout",
            ServerMessage::WordSubmitted { .. } => "word_submitted",
            ServerMessage::WordRejected { .. } => "word_rejected",
            ServerMessage::Chat { .. } => "chat",
            ServerMessage::Pong => "pong",
            ServerMessage::UsernameSet { .. } => "username_set",
            ServerMessage::Hints { .. } => "hints",
            ServerMessage::CreateFailed { .. } => "create_failed",
            ServerMessage::JoinFailed { .. } => "join_failed",
            ServerMessage::ReadyFailed { .. } => "ready_failed",
            ServerMessage::StartFailed { .. } => "start_failed",
            ServerMessage::LeaveFailed { .. } => "leave_failed",
            ServerMessage::InternalError { .. } => "internal_error",
            ServerMessage::Error { .. } => "error",
        }
    }
}
