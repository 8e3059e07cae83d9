use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use game_core::dictionary::WordCache;
use game_types::{GameError, GameRoom, TurnTimerInfo};

use crate::kv::{KvError, KvStore, TX_BACKOFF_MS, TX_MAX_RETRIES};

/// Rooms evaporate after a day without a finish.
pub const GAME_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const TIMER_TTL_SLACK: Duration = Duration::from_secs(10);
const TIMER_TTL_FLOOR: Duration = Duration::from_secs(60);

pub const ACTIVE_GAMES_KEY: &str = "active_games";

pub fn game_key(room_id: &str) -> String {
    format!("game:{}", room_id)
}

pub fn timer_key(room_id: &str) -> String {
    format!("timer:{}", room_id)
}

pub fn player_games_key(user_id: i64) -> String {
    format!("player_games:{}", user_id)
}

fn storage_err(e: KvError) -> GameError {
    GameError::Storage(e.to_string())
}

/// What a transaction closure wants done with its mutated snapshot.
pub enum TxControl<T> {
    /// Write the snapshot back (optimistically) and return the value.
    Commit(T),
    /// Return the value without writing; used by no-op paths such as a
    /// stale timeout observing that the turn already moved on.
    NoChange(T),
}

/// Typed gateway over the raw KV store: room snapshots, timer records,
/// membership sets, and the per-room optimistic transaction loop.
pub struct GameStore {
    kv: Arc<dyn KvStore>,
    conflict_retries: AtomicU64,
}

impl GameStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            conflict_retries: AtomicU64::new(0),
        }
    }

    pub fn kv(&self) -> Arc<dyn KvStore> {
        self.kv.clone()
    }

    /// Write-conflict retries since startup, for the metrics log.
    pub fn conflict_retries(&self) -> u64 {
        self.conflict_retries.load(Ordering::Relaxed)
    }

    fn parse_room(raw: &str) -> Result<GameRoom, GameError> {
        serde_json::from_str(raw)
            .map_err(|e| GameError::Storage(format!("unreadable room snapshot: {}", e)))
    }

    fn encode_room(room: &GameRoom) -> Result<String, GameError> {
        serde_json::to_string(room)
            .map_err(|e| GameError::Storage(format!("unencodable room snapshot: {}", e)))
    }

    pub async fn try_load_room(&self, room_id: &str) -> Result<Option<GameRoom>, GameError> {
        match self.kv.get(&game_key(room_id)).await.map_err(storage_err)? {
            Some(raw) => Ok(Some(Self::parse_room(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn load_room(&self, room_id: &str) -> Result<GameRoom, GameError> {
        self.try_load_room(room_id)
            .await?
            .ok_or_else(|| GameError::NotFound(room_id.to_string()))
    }

    /// Create the room iff the key is absent; a lost creation race reads as
    /// `AlreadyExists` just like an observed existing room.
    pub async fn create_room(&self, room: &GameRoom) -> Result<(), GameError> {
        let tx = self
            .kv
            .watch(&game_key(&room.room_id))
            .await
            .map_err(storage_err)?;
        if tx.value().is_some() {
            return Err(GameError::AlreadyExists(room.room_id.clone()));
        }
        let raw = Self::encode_room(room)?;
        if tx.commit(&raw, Some(GAME_TTL)).await.map_err(storage_err)? {
            Ok(())
        } else {
            Err(GameError::AlreadyExists(room.room_id.clone()))
        }
    }

    /// Run `f` against the watched room snapshot and write the result back.
    /// On a write collision the closure is re-run against a fresh snapshot,
    /// up to the retry budget, then `ConcurrencyAborted`.
    pub async fn transact_room<T, F>(&self, room_id: &str, mut f: F) -> Result<T, GameError>
    where
        F: FnMut(&mut GameRoom) -> Result<TxControl<T>, GameError>,
    {
        for attempt in 0..=TX_MAX_RETRIES {
            let tx = self
                .kv
                .watch(&game_key(room_id))
                .await
                .map_err(storage_err)?;
            let raw = tx
                .value()
                .ok_or_else(|| GameError::NotFound(room_id.to_string()))?;
            let mut room = Self::parse_room(raw)?;

            match f(&mut room)? {
                TxControl::NoChange(value) => return Ok(value),
                TxControl::Commit(value) => {
                    let encoded = Self::encode_room(&room)?;
                    if tx
                        .commit(&encoded, Some(GAME_TTL))
                        .await
                        .map_err(storage_err)?
                    {
                        return Ok(value);
                    }
                    self.conflict_retries.fetch_add(1, Ordering::Relaxed);
                    debug!(room_id, attempt, "room transaction collided, retrying");
                    if attempt < TX_MAX_RETRIES {
                        tokio::time::sleep(Duration::from_millis(TX_BACKOFF_MS[attempt])).await;
                    }
                }
            }
        }
        Err(GameError::ConcurrencyAborted)
    }

    pub async fn delete_room(&self, room_id: &str) -> Result<(), GameError> {
        self.kv.del(&game_key(room_id)).await.map_err(storage_err)?;
        self.kv.del(&timer_key(room_id)).await.map_err(storage_err)?;
        Ok(())
    }

    pub async fn register_active(&self, room_id: &str) -> Result<(), GameError> {
        self.kv
            .sadd(ACTIVE_GAMES_KEY, room_id)
            .await
            .map_err(storage_err)
    }

    pub async fn unregister_active(&self, room_id: &str) -> Result<(), GameError> {
        self.kv
            .srem(ACTIVE_GAMES_KEY, room_id)
            .await
            .map_err(storage_err)
    }

    pub async fn active_games(&self) -> Result<Vec<String>, GameError> {
        self.kv.smembers(ACTIVE_GAMES_KEY).await.map_err(storage_err)
    }

    pub async fn add_player_game(&self, user_id: i64, room_id: &str) -> Result<(), GameError> {
        self.kv
            .sadd(&player_games_key(user_id), room_id)
            .await
            .map_err(storage_err)
    }

    pub async fn remove_player_game(&self, user_id: i64, room_id: &str) -> Result<(), GameError> {
        self.kv
            .srem(&player_games_key(user_id), room_id)
            .await
            .map_err(storage_err)
    }

    pub async fn player_games(&self, user_id: i64) -> Result<Vec<String>, GameError> {
        self.kv
            .smembers(&player_games_key(user_id))
            .await
            .map_err(storage_err)
    }

    /// Mirror the live turn timer so an engine restart can reconstruct it.
    /// TTL covers the remaining time plus slack, never below the floor.
    pub async fn save_timer(&self, room_id: &str, info: &TurnTimerInfo) -> Result<(), GameError> {
        let raw = serde_json::to_string(info)
            .map_err(|e| GameError::Storage(format!("unencodable timer: {}", e)))?;
        let now_ms = Utc::now().timestamp_millis();
        let ttl = Duration::from_millis(info.remaining_ms(now_ms))
            .saturating_add(TIMER_TTL_SLACK)
            .max(TIMER_TTL_FLOOR);
        self.kv
            .setex(&timer_key(room_id), &raw, ttl)
            .await
            .map_err(storage_err)
    }

    pub async fn clear_timer(&self, room_id: &str) -> Result<(), GameError> {
        self.kv.del(&timer_key(room_id)).await.map_err(storage_err)
    }
}

/// Adapter exposing the KV store as the dictionary's shared cache layer.
/// Cache writes are best-effort; a failing cache never fails a lookup.
pub struct KvWordCache {
    kv: Arc<dyn KvStore>,
}

impl KvWordCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl WordCache for KvWordCache {
    async fn get(&self, key: &str) -> Option<String> {
        match self.kv.get(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "word cache read failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        if let Err(e) = self.kv.setex(key, value, ttl).await {
            debug!(key, error = %e, "word cache write failed");
        }
    }
}
