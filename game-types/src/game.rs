use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::player::{Player, PlayerStatus};

/// Wall-clock ceiling for a single game.
pub const GAME_DURATION_CAP_MS: i64 = 30 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Lobby,
    Waiting,
    Ready,
    Starting,
    Playing,
    Paused,
    RoundTransition,
    Finished,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Lobby => "lobby",
            RoomStatus::Waiting => "waiting",
            RoomStatus::Ready => "ready",
            RoomStatus::Starting => "starting",
            RoomStatus::Playing => "playing",
            RoomStatus::Paused => "paused",
            RoomStatus::RoundTransition => "round_transition",
            RoomStatus::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Classic,
    Blitz,
    Marathon,
    TeamBattle,
    Survival,
    Challenge,
    Practice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GameSettings {
    pub mode: GameMode,
    pub min_players: usize,
    pub max_players: usize,
    pub initial_turn_time_ms: u64,
    pub turn_time_reduction_ms: u64,
    pub min_turn_time_ms: u64,
    pub max_rounds: u32,
    pub min_word_length: usize,
    pub max_word_length: usize,
    pub score_multiplier: f64,
    pub target_score: Option<i64>,
    pub long_words_only: bool,
    pub allow_items: bool,
    pub forbidden_words: Vec<String>,
    /// Feature flag: close the round when the turn index wraps to 0 instead
    /// of only on timeout.
    pub rounds_by_rotation: bool,
}

impl GameSettings {
    fn base(mode: GameMode) -> Self {
        Self {
            mode,
            min_players: 2,
            max_players: 8,
            initial_turn_time_ms: 30_000,
            turn_time_reduction_ms: 5_000,
            min_turn_time_ms: 100,
            max_rounds: 5,
            min_word_length: 2,
            max_word_length: 10,
            score_multiplier: 1.0,
            target_score: None,
            long_words_only: false,
            allow_items: false,
            forbidden_words: Vec::new(),
            rounds_by_rotation: false,
        }
    }

    pub fn for_mode(mode: GameMode) -> Self {
        let mut settings = Self::base(mode);
        match mode {
            GameMode::Classic => {}
            GameMode::Blitz => {
                settings.initial_turn_time_ms = 15_000;
                settings.turn_time_reduction_ms = 3_000;
                settings.score_multiplier = 1.5;
            }
            GameMode::Marathon => {
                settings.initial_turn_time_ms = 40_000;
                settings.turn_time_reduction_ms = 2_000;
                settings.max_rounds = 10;
                settings.score_multiplier = 1.2;
            }
            GameMode::TeamBattle => {
                settings.score_multiplier = 2.0;
                settings.target_score = Some(500);
            }
            GameMode::Survival => {
                settings.initial_turn_time_ms = 20_000;
                settings.max_rounds = 10;
                settings.score_multiplier = 1.5;
                settings.rounds_by_rotation = true;
            }
            GameMode::Challenge => {
                settings.long_words_only = true;
                settings.max_word_length = 15;
                settings.score_multiplier = 2.5;
            }
            GameMode::Practice => {
                settings.min_players = 1;
                settings.max_rounds = 3;
            }
        }
        settings
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self::for_mode(GameMode::Classic)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PlayedWord {
    pub word: String,
    pub user_id: i64,
    pub score: i64,
    pub played_at: String, // ISO 8601 string
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WordChainState {
    pub words: Vec<PlayedWord>,
    pub used_words: HashSet<String>,
    pub current_last_char: String,
}

impl WordChainState {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            used_words: HashSet::new(),
            current_last_char: String::new(),
        }
    }

    pub fn reset(&mut self) {
        self.words.clear();
        self.used_words.clear();
        self.current_last_char.clear();
    }

    pub fn contains(&self, word: &str) -> bool {
        self.used_words.contains(&word.to_lowercase())
    }

    pub fn push(&mut self, word: &str, user_id: i64, score: i64) {
        self.words.push(PlayedWord {
            word: word.to_string(),
            user_id,
            score,
            played_at: Utc::now().to_rfc3339(),
        });
        self.used_words.insert(word.to_lowercase());
        self.current_last_char = word.chars().last().map(String::from).unwrap_or_default();
    }
}

impl Default for WordChainState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TurnTimerInfo {
    pub timer_id: String,
    pub user_id: i64,
    pub expires_at: i64, // epoch millis
    pub duration_ms: u64,
}

impl TurnTimerInfo {
    pub fn remaining_ms(&self, now_ms: i64) -> u64 {
        (self.expires_at - now_ms).max(0) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RankingEntry {
    pub rank: u32,
    pub user_id: i64,
    pub nickname: String,
    pub score: i64,
    pub max_combo: u32,
    pub words_submitted: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GameEndReason {
    Completed,
    HostLeft,
    NotEnoughPlayers,
    DurationExceeded,
    TooManySkips,
    TargetScoreReached,
    Aborted,
}

impl GameEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameEndReason::Completed => "completed",
            GameEndReason::HostLeft => "host_left",
            GameEndReason::NotEnoughPlayers => "not_enough_players",
            GameEndReason::DurationExceeded => "duration_exceeded",
            GameEndReason::TooManySkips => "too_many_skips",
            GameEndReason::TargetScoreReached => "target_score_reached",
            GameEndReason::Aborted => "aborted",
        }
    }
}

/// Per-word score audit trail, broadcast with `word_submitted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScoreBreakdown {
    pub base: i64,
    pub rarity_bonus: i64,
    pub length_bonus: i64,
    pub combo_multiplier: f64,
    pub response_time_factor: f64,
    pub mode_multiplier: f64,
    #[serde(rename = "final")]
    pub final_score: i64,
}

/// The authoritative record of one room. Serialized whole into the KV store
/// under `game:{room_id}`; mutated only through the game engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GameRoom {
    pub room_id: String,
    pub status: RoomStatus,
    pub players: Vec<Player>,
    pub current_turn_index: usize,
    pub current_round: u32,
    pub total_turns_in_round: u32,
    pub turn_time_limit_ms: u64,
    pub word_chain: WordChainState,
    pub timer: Option<TurnTimerInfo>,
    pub settings: GameSettings,
    pub consecutive_timeouts: u32,
    pub created_at: String, // ISO 8601 string
    pub started_at: Option<i64>,      // epoch millis
    pub turn_started_at: Option<i64>, // epoch millis
}

impl GameRoom {
    pub fn new(room_id: &str, settings: GameSettings) -> Self {
        let initial = settings.initial_turn_time_ms;
        Self {
            room_id: room_id.to_string(),
            status: RoomStatus::Lobby,
            players: Vec::new(),
            current_turn_index: 0,
            current_round: 1,
            total_turns_in_round: 0,
            turn_time_limit_ms: initial,
            word_chain: WordChainState::new(),
            timer: None,
            settings,
            consecutive_timeouts: 0,
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            turn_started_at: None,
        }
    }

    pub fn host(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_host)
    }

    pub fn player(&self, user_id: i64) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn player_mut(&mut self, user_id: i64) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.players.get(self.current_turn_index)
    }

    pub fn active_player_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_active()).count()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.settings.max_players
    }

    pub fn all_ready(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .iter()
                .all(|p| p.status == PlayerStatus::Ready)
    }

    /// `turn_time_limit_ms = max(min, initial − total_turns_in_round × reduction)`
    pub fn recompute_turn_limit(&mut self) {
        let s = &self.settings;
        let shrunk = s
            .initial_turn_time_ms
            .saturating_sub(self.total_turns_in_round as u64 * s.turn_time_reduction_ms);
        self.turn_time_limit_ms = shrunk.max(s.min_turn_time_ms);
    }

    /// Rotate to the next seat and shrink the deadline. Returns true when the
    /// index wrapped back to seat 0 (a closed lap); whether that ends the
    /// round is the caller's decision via `rounds_by_rotation`.
    pub fn advance_turn(&mut self) -> bool {
        if self.players.is_empty() {
            return false;
        }
        self.total_turns_in_round += 1;
        self.current_turn_index = (self.current_turn_index + 1) % self.players.len();
        self.recompute_turn_limit();
        self.current_turn_index == 0
    }

    pub fn complete_round(&mut self) {
        self.current_round += 1;
        self.current_turn_index = 0;
        self.total_turns_in_round = 0;
        self.turn_time_limit_ms = self.settings.initial_turn_time_ms;
        self.word_chain.reset();
    }

    /// Append an accepted word and bump the submitter's counter. Combo and
    /// score bookkeeping happens in `Player::record_accepted`.
    pub fn add_word(&mut self, word: &str, user_id: i64, score: i64) {
        self.word_chain.push(word, user_id, score);
        self.consecutive_timeouts = 0;
        if let Some(player) = self.player_mut(user_id) {
            player.words_submitted += 1;
        }
    }

    pub fn reset_for_new_game(&mut self) {
        self.status = RoomStatus::Waiting;
        self.current_turn_index = 0;
        self.current_round = 1;
        self.total_turns_in_round = 0;
        self.turn_time_limit_ms = self.settings.initial_turn_time_ms;
        self.word_chain.reset();
        self.timer = None;
        self.consecutive_timeouts = 0;
        self.started_at = None;
        self.turn_started_at = None;
        for player in &mut self.players {
            player.reset_for_new_game();
        }
    }

    /// Remove a player, keeping `current_turn_index` pointing at the same
    /// seat when possible. Returns the removed player.
    pub fn remove_player(&mut self, user_id: i64) -> Option<Player> {
        let index = self.players.iter().position(|p| p.user_id == user_id)?;
        let removed = self.players.remove(index);
        if !self.players.is_empty() {
            if index < self.current_turn_index {
                self.current_turn_index -= 1;
            }
            self.current_turn_index %= self.players.len();
        } else {
            self.current_turn_index = 0;
        }
        Some(removed)
    }

    /// Hand the host flag to the first remaining player. Returns the new
    /// host's user id if one was assigned.
    pub fn transfer_host(&mut self) -> Option<i64> {
        if self.players.iter().any(|p| p.is_host) {
            return self.host().map(|p| p.user_id);
        }
        let next = self.players.first_mut()?;
        next.is_host = true;
        Some(next.user_id)
    }

    pub fn rankings(&self) -> Vec<RankingEntry> {
        let mut sorted: Vec<&Player> = self.players.iter().collect();
        sorted.sort_by(|a, b| b.score.cmp(&a.score).then(a.user_id.cmp(&b.user_id)));
        sorted
            .into_iter()
            .enumerate()
            .map(|(i, p)| RankingEntry {
                rank: i as u32 + 1,
                user_id: p.user_id,
                nickname: p.nickname.clone(),
                score: p.score,
                max_combo: p.max_combo,
                words_submitted: p.words_submitted,
            })
            .collect()
    }

    /// Game-over predicates, checked after every committed mutation while
    /// playing. Any hit finishes the game.
    pub fn game_over_reason(&self, now_ms: i64) -> Option<GameEndReason> {
        if self.current_round > self.settings.max_rounds {
            return Some(GameEndReason::Completed);
        }
        if self.status == RoomStatus::Playing && self.active_player_count() <= 1 {
            return Some(GameEndReason::NotEnoughPlayers);
        }
        if let Some(started) = self.started_at {
            if now_ms - started >= GAME_DURATION_CAP_MS {
                return Some(GameEndReason::DurationExceeded);
            }
        }
        let active = self.active_player_count() as u32;
        if active > 0 && self.consecutive_timeouts >= 2 * active {
            return Some(GameEndReason::TooManySkips);
        }
        if let Some(target) = self.settings.target_score {
            if self.players.iter().any(|p| p.score >= target) {
                return Some(GameEndReason::TargetScoreReached);
            }
        }
        None
    }
}
