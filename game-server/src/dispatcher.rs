use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use game_types::{ServerMessage, Urgency};

use crate::websocket::connection::ConnectionManager;

/// The dedup cache remembers the last payload per event type for this many
/// rooms.
pub const DEDUP_ROOM_CAPACITY: usize = 100;
/// Timer events inside this window are always delivered.
pub const CRITICAL_WINDOW_SECS: u64 = 10;
/// Event types carrying turn-timer ticks share this prefix.
pub const TURN_TIMER_EVENT_PREFIX: &str = "game_time";

/// Room broadcast and per-user send, with last-message deduplication so the
/// high-frequency timer ticks do not flood idle clients.
pub struct EventDispatcher {
    connections: Arc<ConnectionManager>,
    recent: Mutex<LruCache<String, HashMap<String, serde_json::Value>>>,
}

impl EventDispatcher {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        let capacity = NonZeroUsize::new(DEDUP_ROOM_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            connections,
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn broadcast(&self, room_id: &str, message: &ServerMessage) {
        if self.should_suppress(room_id, message).await {
            debug!(room_id, kind = message.kind(), "suppressed duplicate event");
            return;
        }
        self.connections.send_to_room(room_id, message).await;
    }

    pub async fn send_to_user(&self, user_id: i64, message: ServerMessage) {
        if let Err(e) = self.connections.send_to_user(user_id, message).await {
            debug!(user_id, error = %e, "personal send failed");
        }
    }

    /// Forget a finished room so the cache cannot leak entries past the
    /// game's lifetime.
    pub async fn purge_room(&self, room_id: &str) {
        self.recent.lock().await.pop(room_id);
    }

    /// True when an identical payload (timestamps aside) was already sent
    /// for this room and event type. Timer events in the critical window
    /// are never suppressed.
    async fn should_suppress(&self, room_id: &str, message: &ServerMessage) -> bool {
        let kind = message.kind();
        let mut value = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(_) => return false,
        };
        if let Some(data) = value.get_mut("data").and_then(|d| d.as_object_mut()) {
            data.remove("timestamp");
        }

        if kind.starts_with(TURN_TIMER_EVENT_PREFIX) {
            let remaining = value
                .get("data")
                .and_then(|d| d.get("remaining_seconds"))
                .and_then(|r| r.as_u64());
            if matches!(remaining, Some(r) if r <= CRITICAL_WINDOW_SECS) {
                return false;
            }
        }

        let mut recent = self.recent.lock().await;
        let room_entry = recent.get_or_insert_mut(room_id.to_string(), HashMap::new);
        match room_entry.get(kind) {
            Some(previous) if *previous == value => true,
            _ => {
                room_entry.insert(kind.to_string(), value);
                false
            }
        }
    }
}

pub fn classify_urgency(remaining_secs: u64) -> Urgency {
    match remaining_secs {
        0..=10 => Urgency::Critical,
        11..=15 => Urgency::High,
        16..=30 => Urgency::Medium,
        _ => Urgency::Low,
    }
}

/// Emission cadence for turn-timer ticks: every 30 s while comfortable,
/// every 5 s through {30, 25, 20, 15}, every second inside the last 10 s.
pub fn should_emit_tick(remaining_secs: u64) -> bool {
    match remaining_secs {
        0..=10 => true,
        15 | 20 | 25 | 30 => true,
        s if s > 30 => s % 30 == 0,
        _ => false,
    }
}

/// The tick event, typed by urgency.
pub fn time_update_message(room_id: &str, remaining_secs: u64) -> ServerMessage {
    let urgency = classify_urgency(remaining_secs);
    let room_id = room_id.to_string();
    let timestamp = Utc::now().to_rfc3339();
    match urgency {
        Urgency::Low => ServerMessage::GameTimeUpdate {
            room_id,
            remaining_seconds: remaining_secs,
            urgency,
            timestamp,
        },
        Urgency::Medium => ServerMessage::GameTimeWarning {
            room_id,
            remaining_seconds: remaining_secs,
            urgency,
            timestamp,
        },
        Urgency::High => ServerMessage::GameTimeCritical {
            room_id,
            remaining_seconds: remaining_secs,
            urgency,
            timestamp,
        },
        Urgency::Critical => ServerMessage::GameTimeUrgent {
            room_id,
            remaining_seconds: remaining_secs,
            urgency,
            timestamp,
        },
    }
}
