use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use game_core::dictionary::DictionaryService;
use game_core::scoring::ScoreCalculator;
use game_core::validation::WordValidator;
use game_persistence::{FinishedGameRecord, FinishedGameSink};
use game_types::{
    GameEndReason, GameError, GameRoom, GameSettings, Player, PlayerStatus, RankingEntry,
    RejectReason, RoomStatus, ScoreBreakdown, ServerMessage, TurnTimerInfo,
};

use crate::dispatcher::{EventDispatcher, should_emit_tick, time_update_message};
use crate::metrics::EngineMetrics;
use crate::store::{GameStore, TxControl};
use crate::timer::{TimerEvent, TimerKind, TimerSignal, TimerService};

const START_COUNTDOWN_SECS: u32 = 3;
const ROUND_COUNTDOWN_SECS: u32 = 2;
const DISBAND_DELAY: Duration = Duration::from_secs(5);

/// What `submit_word` did, for callers that want more than events.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResult {
    Accepted(ScoreBreakdown),
    Rejected(RejectReason),
}

struct AcceptedTurn {
    breakdown: ScoreBreakdown,
    last_char: String,
    next_timer: Option<TurnTimerInfo>,
    round_closed: bool,
    finished: Option<GameEndReason>,
    room: GameRoom,
}

enum SubmitCommit {
    Rejected {
        reason: RejectReason,
        room: GameRoom,
    },
    Accepted(Box<AcceptedTurn>),
}

struct TimeoutCommit {
    nickname: String,
    completed_round: u32,
    rankings: Vec<RankingEntry>,
    finished: Option<GameEndReason>,
    room: GameRoom,
}

struct LeaveCommit {
    nickname: String,
    room_empty: bool,
    new_host: Option<(i64, String)>,
    finished: Option<GameEndReason>,
    handoff: Option<TurnTimerInfo>,
    room: GameRoom,
}

/// The authoritative driver of one room's state machine. Every operation is
/// serialised per room through the optimistic transaction on `game:{room_id}`.
pub struct GameEngine {
    store: Arc<GameStore>,
    dictionary: Arc<DictionaryService>,
    timers: Arc<TimerService>,
    dispatcher: Arc<EventDispatcher>,
    sink: Arc<dyn FinishedGameSink>,
    metrics: Arc<EngineMetrics>,
}

impl GameEngine {
    pub fn new(
        store: Arc<GameStore>,
        dictionary: Arc<DictionaryService>,
        timers: Arc<TimerService>,
        dispatcher: Arc<EventDispatcher>,
        sink: Arc<dyn FinishedGameSink>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            dictionary,
            timers,
            dispatcher,
            sink,
            metrics,
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    pub fn store(&self) -> Arc<GameStore> {
        self.store.clone()
    }

    pub async fn create_game(
        &self,
        room_id: &str,
        creator_id: i64,
        nickname: &str,
        settings: GameSettings,
    ) -> Result<GameRoom, GameError> {
        let elsewhere = self.store.player_games(creator_id).await?;
        if elsewhere.iter().any(|r| r != room_id) {
            return Err(GameError::ElsewhereActive(creator_id));
        }

        let mut room = GameRoom::new(room_id, settings);
        room.players.push(Player::new(creator_id, nickname, true));
        self.store.create_room(&room).await?;
        self.store.register_active(room_id).await?;
        self.store.add_player_game(creator_id, room_id).await?;

        info!(room_id, user_id = creator_id, "game created");
        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::GameCreated {
                    room_id: room_id.to_string(),
                    host_id: creator_id,
                    settings: room.settings.clone(),
                },
            )
            .await;
        Ok(room)
    }

    pub async fn join(
        &self,
        room_id: &str,
        user_id: i64,
        nickname: &str,
    ) -> Result<GameRoom, GameError> {
        let elsewhere = self.store.player_games(user_id).await?;
        if elsewhere.iter().any(|r| r != room_id) {
            return Err(GameError::ElsewhereActive(user_id));
        }

        let nickname = nickname.to_string();
        let room = self
            .store
            .transact_room(room_id, |room| {
                if !matches!(room.status, RoomStatus::Lobby | RoomStatus::Waiting) {
                    return Err(GameError::InvalidState(room.status.as_str().to_string()));
                }
                if room.player(user_id).is_some() {
                    return Err(GameError::Duplicate(user_id));
                }
                if room.is_full() {
                    return Err(GameError::Full);
                }
                let is_host = room.players.is_empty();
                room.players.push(Player::new(user_id, &nickname, is_host));
                room.status = RoomStatus::Waiting;
                Ok(TxControl::Commit(room.clone()))
            })
            .await?;
        self.store.add_player_game(user_id, room_id).await?;

        info!(room_id, user_id, "player joined");
        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::PlayerJoined {
                    room_id: room_id.to_string(),
                    user_id,
                    nickname,
                    players: room.players.clone(),
                },
            )
            .await;
        Ok(room)
    }

    pub async fn ready(
        &self,
        room_id: &str,
        user_id: i64,
        ready: bool,
    ) -> Result<(), GameError> {
        let all_ready = self
            .store
            .transact_room(room_id, |room| {
                if !matches!(room.status, RoomStatus::Waiting | RoomStatus::Ready) {
                    return Err(GameError::InvalidState(room.status.as_str().to_string()));
                }
                let min_players = room.settings.min_players;
                let player = room
                    .player_mut(user_id)
                    .ok_or_else(|| GameError::NotFound(format!("user {}", user_id)))?;
                player.status = if ready {
                    PlayerStatus::Ready
                } else {
                    PlayerStatus::Waiting
                };
                let all_ready = room.players.len() >= min_players && room.all_ready();
                room.status = if all_ready {
                    RoomStatus::Ready
                } else {
                    RoomStatus::Waiting
                };
                Ok(TxControl::Commit(all_ready))
            })
            .await?;

        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::PlayerReadyStatus {
                    room_id: room_id.to_string(),
                    user_id,
                    ready,
                    all_ready,
                },
            )
            .await;
        Ok(())
    }

    /// Shuffle seats, then count down 3 seconds before play begins.
    pub async fn start(self: &Arc<Self>, room_id: &str, host_id: i64) -> Result<(), GameError> {
        self.store
            .transact_room(room_id, |room| {
                if room.host().map(|h| h.user_id) != Some(host_id) {
                    return Err(GameError::NotHost(host_id));
                }
                if room.players.len() < room.settings.min_players {
                    return Err(GameError::NotEnoughPlayers);
                }
                if room.status != RoomStatus::Ready || !room.all_ready() {
                    return Err(GameError::NotReady);
                }
                room.players.shuffle(&mut rand::thread_rng());
                room.status = RoomStatus::Starting;
                Ok(TxControl::Commit(()))
            })
            .await?;

        info!(room_id, host_id, "game starting");
        let engine = self.clone();
        let room = room_id.to_string();
        tokio::spawn(async move {
            for seconds_remaining in (1..=START_COUNTDOWN_SECS).rev() {
                engine
                    .dispatcher
                    .broadcast(
                        &room,
                        &ServerMessage::GameStartingCountdown {
                            room_id: room.clone(),
                            seconds_remaining,
                        },
                    )
                    .await;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if let Err(e) = engine.begin_playing(&room).await {
                warn!(room_id = %room, error = %e, "failed to begin play");
            }
        });
        Ok(())
    }

    /// Countdown finished: flip to playing and arm the first turn timer.
    pub async fn begin_playing(self: &Arc<Self>, room_id: &str) -> Result<(), GameError> {
        let outcome = self
            .store
            .transact_room(room_id, |room| {
                if room.status != RoomStatus::Starting {
                    return Ok(TxControl::NoChange(None));
                }
                let now = Utc::now().timestamp_millis();
                room.status = RoomStatus::Playing;
                for player in &mut room.players {
                    if player.status != PlayerStatus::Disconnected {
                        player.status = PlayerStatus::Playing;
                    }
                }
                room.current_round = 1;
                room.current_turn_index = 0;
                room.total_turns_in_round = 0;
                room.turn_time_limit_ms = room.settings.initial_turn_time_ms;
                room.word_chain.reset();
                room.consecutive_timeouts = 0;
                room.started_at = Some(now);
                room.turn_started_at = Some(now);

                let first = room
                    .current_player()
                    .ok_or(GameError::NotEnoughPlayers)?
                    .user_id;
                let info = TurnTimerInfo {
                    timer_id: Uuid::new_v4().to_string(),
                    user_id: first,
                    expires_at: now + room.turn_time_limit_ms as i64,
                    duration_ms: room.turn_time_limit_ms,
                };
                room.timer = Some(info.clone());
                Ok(TxControl::Commit(Some((room.clone(), info))))
            })
            .await?;

        let Some((room, info)) = outcome else {
            return Ok(());
        };

        self.store.save_timer(room_id, &info).await?;
        self.timers
            .start_with_id(
                room_id,
                info.user_id,
                TimerKind::Turn,
                Duration::from_millis(info.duration_ms),
                &info.timer_id,
            )
            .await;
        self.timers
            .start(
                room_id,
                0,
                TimerKind::Game,
                Duration::from_millis(game_types::GAME_DURATION_CAP_MS as u64),
            )
            .await;

        info!(room_id, first_turn = info.user_id, "game started");
        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::GameStarted {
                    room_id: room_id.to_string(),
                    round: room.current_round,
                    players: room.players.clone(),
                    current_turn_user_id: info.user_id,
                    turn_time_limit: room.turn_time_limit_ms / 1000,
                },
            )
            .await;
        self.broadcast_turn_timer(room_id, &info, None).await;
        Ok(())
    }

    /// The core concurrency-sensitive pipeline. Validation runs against the
    /// watched snapshot; the dictionary entry is prefetched so the
    /// transaction itself never waits on external services.
    pub async fn submit_word(
        self: &Arc<Self>,
        room_id: &str,
        user_id: i64,
        word: &str,
    ) -> Result<SubmitResult, GameError> {
        let op_started = std::time::Instant::now();
        EngineMetrics::incr(&self.metrics.submissions);
        let word = word.trim().to_string();
        let entry = self
            .dictionary
            .lookup(&word)
            .await
            .map_err(|e| GameError::Dictionary(e.to_string()))?;

        let result = self
            .store
            .transact_room(room_id, |room| {
                if room.status != RoomStatus::Playing {
                    return Err(GameError::NotPlaying);
                }
                let current = room.current_player().ok_or(GameError::NotPlaying)?;
                if current.user_id != user_id {
                    return Err(GameError::NotYourTurn);
                }
                let now = Utc::now().timestamp_millis();
                let response_ms = room
                    .turn_started_at
                    .map(|t| (now - t).max(0) as u64)
                    .unwrap_or(0);

                let static_check =
                    WordValidator::check_static(&word, &room.word_chain, &room.settings);
                let entry = match static_check {
                    Err(reason) => {
                        if let Some(player) = room.player_mut(user_id) {
                            player.break_combo();
                        }
                        return Ok(TxControl::Commit(SubmitCommit::Rejected {
                            reason,
                            room: room.clone(),
                        }));
                    }
                    Ok(()) => match entry.as_ref() {
                        Some(entry) => entry.clone(),
                        None => {
                            if let Some(player) = room.player_mut(user_id) {
                                player.break_combo();
                            }
                            return Ok(TxControl::Commit(SubmitCommit::Rejected {
                                reason: RejectReason::InvalidWord,
                                room: room.clone(),
                            }));
                        }
                    },
                };

                let combo = room
                    .player(user_id)
                    .map(|p| p.consecutive_success + 1)
                    .unwrap_or(1);
                let breakdown =
                    ScoreCalculator::calculate(&entry, response_ms, combo, &room.settings);
                room.add_word(&word, user_id, breakdown.final_score);
                if let Some(player) = room.player_mut(user_id) {
                    player.record_accepted(&word, breakdown.final_score, response_ms);
                }

                let wrapped = room.advance_turn();
                let mut round_closed = false;
                if wrapped && room.settings.rounds_by_rotation {
                    room.complete_round();
                    round_closed = true;
                }

                let finished = room.game_over_reason(now);
                let next_timer = if finished.is_some() {
                    room.status = RoomStatus::Finished;
                    room.timer = None;
                    None
                } else if round_closed {
                    room.status = RoomStatus::RoundTransition;
                    room.timer = None;
                    room.turn_started_at = None;
                    None
                } else {
                    room.turn_started_at = Some(now);
                    let next_user = room
                        .current_player()
                        .ok_or(GameError::NotPlaying)?
                        .user_id;
                    let info = TurnTimerInfo {
                        timer_id: Uuid::new_v4().to_string(),
                        user_id: next_user,
                        expires_at: now + room.turn_time_limit_ms as i64,
                        duration_ms: room.turn_time_limit_ms,
                    };
                    room.timer = Some(info.clone());
                    Some(info)
                };

                Ok(TxControl::Commit(SubmitCommit::Accepted(Box::new(
                    AcceptedTurn {
                        breakdown,
                        last_char: entry.last_char.clone(),
                        next_timer,
                        round_closed,
                        finished,
                        room: room.clone(),
                    },
                ))))
            })
            .await;

        let commit = match result {
            Ok(commit) => commit,
            Err(GameError::ConcurrencyAborted) => {
                EngineMetrics::incr(&self.metrics.concurrency_aborts);
                warn!(room_id, user_id, "submission aborted after retries");
                return Err(GameError::ConcurrencyAborted);
            }
            Err(e) if e.is_internal() => {
                error!(room_id, user_id, error = %e, "submission failed closed");
                self.pause_room(room_id).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match commit {
            SubmitCommit::Rejected { reason, room } => {
                EngineMetrics::incr(&self.metrics.rejected);
                info!(
                    room_id,
                    user_id,
                    word = %word,
                    reason = reason.as_str(),
                    latency_ms = op_started.elapsed().as_millis() as u64,
                    "word rejected"
                );
                self.dispatcher
                    .broadcast(
                        room_id,
                        &ServerMessage::WordRejected {
                            room_id: room_id.to_string(),
                            user_id,
                            word,
                            reason,
                        },
                    )
                    .await;
                self.dispatcher
                    .broadcast(room_id, &ServerMessage::GameStateUpdate { room })
                    .await;
                Ok(SubmitResult::Rejected(reason))
            }
            SubmitCommit::Accepted(turn) => {
                EngineMetrics::incr(&self.metrics.accepted);
                info!(
                    room_id,
                    user_id,
                    word = %word,
                    score = turn.breakdown.final_score,
                    latency_ms = op_started.elapsed().as_millis() as u64,
                    "word accepted"
                );
                self.announce_accepted(room_id, user_id, &word, &turn).await;

                if let Some(reason) = turn.finished {
                    self.timers.cancel(room_id, TimerKind::Turn).await;
                    self.finish_game(turn.room.clone(), reason).await;
                } else if turn.round_closed {
                    self.timers.cancel(room_id, TimerKind::Turn).await;
                    let _ = self.store.clear_timer(room_id).await;
                    self.announce_round_end(&turn.room, turn.room.current_round - 1)
                        .await;
                    self.spawn_round_countdown(room_id);
                } else if let Some(info) = &turn.next_timer {
                    self.store.save_timer(room_id, info).await?;
                    self.timers
                        .start_with_id(
                            room_id,
                            info.user_id,
                            TimerKind::Turn,
                            Duration::from_millis(info.duration_ms),
                            &info.timer_id,
                        )
                        .await;
                    self.broadcast_turn_timer(room_id, info, Some(&turn.last_char))
                        .await;
                }
                Ok(SubmitResult::Accepted(turn.breakdown.clone()))
            }
        }
    }

    async fn announce_accepted(
        &self,
        room_id: &str,
        user_id: i64,
        word: &str,
        turn: &AcceptedTurn,
    ) {
        let room = &turn.room;
        let nickname = room
            .player(user_id)
            .map(|p| p.nickname.clone())
            .unwrap_or_default();
        let scores: BTreeMap<String, i64> = room
            .players
            .iter()
            .map(|p| (p.user_id.to_string(), p.score))
            .collect();
        let current_turn_user_id = room.current_player().map(|p| p.user_id).unwrap_or(user_id);

        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::WordSubmitted {
                    room_id: room_id.to_string(),
                    user_id,
                    nickname,
                    word: word.to_string(),
                    status: "accepted".to_string(),
                    next_char: turn.last_char.clone(),
                    current_turn_user_id,
                    current_turn_time_limit: room.turn_time_limit_ms / 1000,
                    score_breakdown: turn.breakdown.clone(),
                    scores,
                },
            )
            .await;
        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::GameStateUpdate { room: room.clone() },
            )
            .await;
    }

    /// Timer expiry for the current turn: penalty, then the round ends.
    pub async fn turn_timeout(
        self: &Arc<Self>,
        room_id: &str,
        user_id: i64,
        timer_id: &str,
    ) -> Result<(), GameError> {
        let outcome = self
            .store
            .transact_room(room_id, |room| {
                if room.status != RoomStatus::Playing {
                    return Ok(TxControl::NoChange(None));
                }
                // A stale expiry (the turn already moved on) is a no-op.
                let timer_matches = room
                    .timer
                    .as_ref()
                    .is_some_and(|t| t.timer_id == timer_id);
                let is_current = room
                    .current_player()
                    .is_some_and(|p| p.user_id == user_id);
                if !timer_matches || !is_current {
                    return Ok(TxControl::NoChange(None));
                }

                let now = Utc::now().timestamp_millis();
                let nickname = room
                    .player(user_id)
                    .map(|p| p.nickname.clone())
                    .unwrap_or_default();
                if let Some(player) = room.player_mut(user_id) {
                    player.break_combo();
                }
                room.consecutive_timeouts += 1;
                room.timer = None;
                room.turn_started_at = None;

                let completed_round = room.current_round;
                let rankings = room.rankings();

                let finished = if room.current_round >= room.settings.max_rounds {
                    Some(GameEndReason::Completed)
                } else {
                    room.game_over_reason(now)
                };

                if let Some(reason) = finished {
                    room.status = RoomStatus::Finished;
                    return Ok(TxControl::Commit(Some(TimeoutCommit {
                        nickname,
                        completed_round,
                        rankings,
                        finished: Some(reason),
                        room: room.clone(),
                    })));
                }

                room.complete_round();
                room.status = RoomStatus::RoundTransition;
                Ok(TxControl::Commit(Some(TimeoutCommit {
                    nickname,
                    completed_round,
                    rankings,
                    finished: None,
                    room: room.clone(),
                })))
            })
            .await?;

        let Some(outcome) = outcome else {
            debug!(room_id, timer_id, "stale turn timeout ignored");
            return Ok(());
        };

        EngineMetrics::incr(&self.metrics.timeouts);
        info!(room_id, user_id, round = outcome.completed_round, "turn timed out");
        let _ = self.store.clear_timer(room_id).await;

        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::TurnTimeout {
                    room_id: room_id.to_string(),
                    user_id,
                    nickname: outcome.nickname.clone(),
                },
            )
            .await;
        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::RoundCompleted {
                    room_id: room_id.to_string(),
                    round: outcome.completed_round,
                    rankings: outcome.rankings.clone(),
                },
            )
            .await;

        match outcome.finished {
            Some(reason) => self.finish_game(outcome.room, reason).await,
            None => {
                self.dispatcher
                    .broadcast(
                        room_id,
                        &ServerMessage::RoundTransition {
                            room_id: room_id.to_string(),
                            next_round: outcome.room.current_round,
                        },
                    )
                    .await;
                self.spawn_round_countdown(room_id);
            }
        }
        Ok(())
    }

    async fn announce_round_end(&self, room: &GameRoom, completed_round: u32) {
        self.dispatcher
            .broadcast(
                &room.room_id,
                &ServerMessage::RoundCompleted {
                    room_id: room.room_id.clone(),
                    round: completed_round,
                    rankings: room.rankings(),
                },
            )
            .await;
        self.dispatcher
            .broadcast(
                &room.room_id,
                &ServerMessage::RoundTransition {
                    room_id: room.room_id.clone(),
                    next_round: room.current_round,
                },
            )
            .await;
    }

    fn spawn_round_countdown(self: &Arc<Self>, room_id: &str) {
        let engine = self.clone();
        let room = room_id.to_string();
        tokio::spawn(async move {
            for seconds_remaining in (1..=ROUND_COUNTDOWN_SECS).rev() {
                engine
                    .dispatcher
                    .broadcast(
                        &room,
                        &ServerMessage::RoundStartingCountdown {
                            room_id: room.clone(),
                            seconds_remaining,
                        },
                    )
                    .await;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if let Err(e) = engine.begin_next_round(&room).await {
                warn!(room_id = %room, error = %e, "failed to start next round");
            }
        });
    }

    /// Round-transition countdown finished: back to playing with the full
    /// initial limit and seat 0 on turn.
    pub async fn begin_next_round(self: &Arc<Self>, room_id: &str) -> Result<(), GameError> {
        let outcome = self
            .store
            .transact_room(room_id, |room| {
                if room.status != RoomStatus::RoundTransition {
                    return Ok(TxControl::NoChange(None));
                }
                let now = Utc::now().timestamp_millis();
                room.status = RoomStatus::Playing;
                room.turn_started_at = Some(now);
                let user_id = room
                    .current_player()
                    .ok_or(GameError::NotEnoughPlayers)?
                    .user_id;
                let info = TurnTimerInfo {
                    timer_id: Uuid::new_v4().to_string(),
                    user_id,
                    expires_at: now + room.turn_time_limit_ms as i64,
                    duration_ms: room.turn_time_limit_ms,
                };
                room.timer = Some(info.clone());
                Ok(TxControl::Commit(Some((room.clone(), info))))
            })
            .await?;

        let Some((room, info)) = outcome else {
            return Ok(());
        };

        self.store.save_timer(room_id, &info).await?;
        self.timers
            .start_with_id(
                room_id,
                info.user_id,
                TimerKind::Turn,
                Duration::from_millis(info.duration_ms),
                &info.timer_id,
            )
            .await;

        info!(room_id, round = room.current_round, "next round starting");
        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::NextRoundStarting {
                    room_id: room_id.to_string(),
                    round: room.current_round,
                    current_turn_user_id: info.user_id,
                    turn_time_limit: room.turn_time_limit_ms / 1000,
                },
            )
            .await;
        self.broadcast_turn_timer(room_id, &info, None).await;
        Ok(())
    }

    pub async fn leave(self: &Arc<Self>, room_id: &str, user_id: i64) -> Result<(), GameError> {
        let outcome = self
            .store
            .transact_room(room_id, |room| {
                let Some(leaving) = room.player(user_id) else {
                    return Ok(TxControl::NoChange(None));
                };
                let nickname = leaving.nickname.clone();
                let was_host = leaving.is_host;
                let in_play = matches!(
                    room.status,
                    RoomStatus::Starting | RoomStatus::Playing | RoomStatus::RoundTransition
                );
                let had_turn = room
                    .current_player()
                    .is_some_and(|p| p.user_id == user_id);

                room.remove_player(user_id);

                if room.players.is_empty() {
                    room.status = RoomStatus::Finished;
                    return Ok(TxControl::Commit(Some(LeaveCommit {
                        nickname,
                        room_empty: true,
                        new_host: None,
                        finished: None,
                        handoff: None,
                        room: room.clone(),
                    })));
                }

                if in_play && was_host {
                    room.status = RoomStatus::Finished;
                    room.timer = None;
                    return Ok(TxControl::Commit(Some(LeaveCommit {
                        nickname,
                        room_empty: false,
                        new_host: None,
                        finished: Some(GameEndReason::HostLeft),
                        handoff: None,
                        room: room.clone(),
                    })));
                }

                if in_play && room.active_player_count() <= 1 {
                    room.status = RoomStatus::Finished;
                    room.timer = None;
                    return Ok(TxControl::Commit(Some(LeaveCommit {
                        nickname,
                        room_empty: false,
                        new_host: None,
                        finished: Some(GameEndReason::NotEnoughPlayers),
                        handoff: None,
                        room: room.clone(),
                    })));
                }

                let new_host = if was_host {
                    room.transfer_host().and_then(|id| {
                        room.player(id).map(|p| (id, p.nickname.clone()))
                    })
                } else {
                    None
                };

                let handoff = if room.status == RoomStatus::Playing && had_turn {
                    let now = Utc::now().timestamp_millis();
                    room.turn_started_at = Some(now);
                    let next_user = room
                        .current_player()
                        .ok_or(GameError::NotEnoughPlayers)?
                        .user_id;
                    let info = TurnTimerInfo {
                        timer_id: Uuid::new_v4().to_string(),
                        user_id: next_user,
                        expires_at: now + room.turn_time_limit_ms as i64,
                        duration_ms: room.turn_time_limit_ms,
                    };
                    room.timer = Some(info.clone());
                    Some(info)
                } else {
                    None
                };

                Ok(TxControl::Commit(Some(LeaveCommit {
                    nickname,
                    room_empty: false,
                    new_host,
                    finished: None,
                    handoff,
                    room: room.clone(),
                })))
            })
            .await?;

        let Some(outcome) = outcome else {
            return Ok(());
        };

        self.store.remove_player_game(user_id, room_id).await?;
        info!(room_id, user_id, "player left");
        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::PlayerLeftRoom {
                    room_id: room_id.to_string(),
                    user_id,
                    nickname: outcome.nickname.clone(),
                },
            )
            .await;

        if outcome.room_empty {
            self.disband_room(&outcome.room).await;
            return Ok(());
        }

        if let Some((host_id, host_nickname)) = &outcome.new_host {
            self.dispatcher
                .broadcast(
                    room_id,
                    &ServerMessage::HostChanged {
                        room_id: room_id.to_string(),
                        user_id: *host_id,
                        nickname: host_nickname.clone(),
                    },
                )
                .await;
        }

        match outcome.finished {
            Some(GameEndReason::HostLeft) => {
                self.dispatcher
                    .broadcast(
                        room_id,
                        &ServerMessage::HostLeftGame {
                            room_id: room_id.to_string(),
                            user_id,
                        },
                    )
                    .await;
                self.finish_game(outcome.room, GameEndReason::HostLeft).await;
            }
            Some(reason) => {
                self.finish_game(outcome.room, reason).await;
            }
            None => {
                if let Some(info) = &outcome.handoff {
                    self.store.save_timer(room_id, info).await?;
                    self.timers
                        .start_with_id(
                            room_id,
                            info.user_id,
                            TimerKind::Turn,
                            Duration::from_millis(info.duration_ms),
                            &info.timer_id,
                        )
                        .await;
                    self.broadcast_turn_timer(room_id, info, None).await;
                }
            }
        }
        Ok(())
    }

    pub async fn end_game(
        self: &Arc<Self>,
        room_id: &str,
        reason: GameEndReason,
    ) -> Result<(), GameError> {
        let outcome = self
            .store
            .transact_room(room_id, |room| {
                if room.status == RoomStatus::Finished {
                    return Ok(TxControl::NoChange(None));
                }
                room.status = RoomStatus::Finished;
                room.timer = None;
                Ok(TxControl::Commit(Some(room.clone())))
            })
            .await?;

        if let Some(room) = outcome {
            self.finish_game(room, reason).await;
        }
        Ok(())
    }

    /// Common tail of every game-over path: stop the clocks, hand the record
    /// to the sink, tell the room, then either reset for a rematch or
    /// schedule disbanding.
    async fn finish_game(self: &Arc<Self>, room: GameRoom, reason: GameEndReason) {
        let room_id = room.room_id.clone();
        self.timers.cancel_all(&room_id).await;
        let _ = self.store.clear_timer(&room_id).await;

        let rankings = room.rankings();
        if let Err(e) = self
            .sink
            .persist_finished_game(FinishedGameRecord::new(&room_id, room.clone(), rankings.clone()))
            .await
        {
            warn!(room_id = %room_id, error = %e, "failed to persist finished game");
        }
        info!(room_id = %room_id, reason = reason.as_str(), "game finished");

        match reason {
            GameEndReason::HostLeft => {
                self.dispatcher
                    .broadcast(
                        &room_id,
                        &ServerMessage::GameEnded {
                            room_id: room_id.clone(),
                            reason: reason.as_str().to_string(),
                        },
                    )
                    .await;
                let engine = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(DISBAND_DELAY).await;
                    engine.disband_room(&room).await;
                });
            }
            _ => {
                self.dispatcher
                    .broadcast(
                        &room_id,
                        &ServerMessage::GameCompleted {
                            room_id: room_id.clone(),
                            rankings,
                            reason: reason.as_str().to_string(),
                        },
                    )
                    .await;
                let reset = self
                    .store
                    .transact_room(&room_id, |room| {
                        room.reset_for_new_game();
                        Ok(TxControl::Commit(room.clone()))
                    })
                    .await;
                match reset {
                    Ok(room) => {
                        self.dispatcher
                            .broadcast(&room_id, &ServerMessage::GameStateUpdate { room })
                            .await;
                    }
                    Err(e) => warn!(room_id = %room_id, error = %e, "post-game reset failed"),
                }
                self.dispatcher.purge_room(&room_id).await;
            }
        }
    }

    async fn disband_room(&self, room: &GameRoom) {
        let room_id = &room.room_id;
        self.timers.cancel_all(room_id).await;
        for player in &room.players {
            let _ = self.store.remove_player_game(player.user_id, room_id).await;
        }
        let _ = self.store.delete_room(room_id).await;
        let _ = self.store.unregister_active(room_id).await;
        self.dispatcher.purge_room(room_id).await;
        info!(room_id = %room_id, "room disbanded");
    }

    /// Fatal write failure: stop the clock and park the room for manual
    /// recovery rather than running on stale state.
    async fn pause_room(&self, room_id: &str) {
        self.timers.cancel(room_id, TimerKind::Turn).await;
        let paused = self
            .store
            .transact_room(room_id, |room| {
                room.status = RoomStatus::Paused;
                room.timer = None;
                Ok(TxControl::Commit(()))
            })
            .await;
        if let Err(e) = paused {
            error!(room_id, error = %e, "failed to pause room after fatal error");
        }
        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::InternalError {
                    reason: "internal_error".to_string(),
                },
            )
            .await;
    }

    async fn broadcast_turn_timer(
        &self,
        room_id: &str,
        info: &TurnTimerInfo,
        chain_char: Option<&str>,
    ) {
        let possible_words = match chain_char {
            Some(c) if !c.is_empty() => self.dictionary.possible_count(c).await.ok(),
            _ => None,
        };
        self.dispatcher
            .broadcast(
                room_id,
                &ServerMessage::TurnTimerStarted {
                    room_id: room_id.to_string(),
                    user_id: info.user_id,
                    timer_id: info.timer_id.clone(),
                    duration_ms: info.duration_ms,
                    possible_words,
                },
            )
            .await;
    }

    /// Hint lookup for the room's current chain position.
    pub async fn hints(
        &self,
        room_id: &str,
        count: usize,
    ) -> Result<(String, Vec<String>), GameError> {
        let room = self.store.load_room(room_id).await?;
        let last_char = room.word_chain.current_last_char.clone();
        if last_char.is_empty() {
            return Ok((last_char, Vec::new()));
        }
        let words = self
            .dictionary
            .hints(&last_char, count)
            .await
            .map_err(|e| GameError::Dictionary(e.to_string()))?;
        Ok((last_char, words))
    }

    pub async fn handle_timer_event(self: &Arc<Self>, event: TimerEvent) {
        match (event.kind, &event.signal) {
            (TimerKind::Turn, TimerSignal::Tick { remaining_ms }) => {
                let secs = (remaining_ms + 500) / 1000;
                if should_emit_tick(secs) {
                    self.dispatcher
                        .broadcast(&event.room_id, &time_update_message(&event.room_id, secs))
                        .await;
                }
            }
            (TimerKind::Turn, TimerSignal::Warning { remaining_ms }) => {
                debug!(room_id = %event.room_id, remaining_ms, "turn timer warning");
            }
            (TimerKind::Turn, TimerSignal::Expired) => {
                if let Err(e) = self
                    .turn_timeout(&event.room_id, event.user_id, &event.timer_id)
                    .await
                {
                    warn!(room_id = %event.room_id, error = %e, "turn timeout handling failed");
                }
            }
            (TimerKind::Game, TimerSignal::Warning { remaining_ms }) => {
                let secs = remaining_ms / 1000;
                info!(room_id = %event.room_id, remaining_secs = secs, "game duration warning");
            }
            (TimerKind::Game, TimerSignal::Expired) => {
                if let Err(e) = self
                    .end_game(&event.room_id, GameEndReason::DurationExceeded)
                    .await
                {
                    warn!(room_id = %event.room_id, error = %e, "duration cap handling failed");
                }
            }
            (TimerKind::Game, TimerSignal::Tick { .. }) => {}
        }
    }
}

/// Drives timer signals into the engine for the life of the process.
pub fn spawn_timer_event_loop(
    engine: Arc<GameEngine>,
    mut events: mpsc::UnboundedReceiver<TimerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            engine.handle_timer_event(event).await;
        }
    })
}
