use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use game_types::{GameRoom, PlayedWord, RankingEntry};

/// Everything worth keeping about a finished game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedGameRecord {
    pub room_id: String,
    pub state: GameRoom,
    pub rankings: Vec<RankingEntry>,
    pub word_timeline: Vec<PlayedWord>,
    pub finished_at: String, // ISO 8601 string
}

impl FinishedGameRecord {
    pub fn new(room_id: &str, state: GameRoom, rankings: Vec<RankingEntry>) -> Self {
        let word_timeline = state.word_chain.words.clone();
        Self {
            room_id: room_id.to_string(),
            state,
            rankings,
            word_timeline,
            finished_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Downstream sink for finished games. The engine only knows this interface;
/// durable storage lives behind it.
#[async_trait]
pub trait FinishedGameSink: Send + Sync {
    async fn persist_finished_game(&self, record: FinishedGameRecord) -> Result<()>;
}

/// Sink that logs and forgets.
pub struct NullSink;

#[async_trait]
impl FinishedGameSink for NullSink {
    async fn persist_finished_game(&self, record: FinishedGameRecord) -> Result<()> {
        info!(
            room_id = %record.room_id,
            players = record.rankings.len(),
            words = record.word_timeline.len(),
            "discarding finished game (no persistence configured)"
        );
        Ok(())
    }
}

/// Sink that keeps records in memory, for tests and inspection.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<FinishedGameRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<FinishedGameRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl FinishedGameSink for MemorySink {
    async fn persist_finished_game(&self, record: FinishedGameRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_types::GameSettings;

    #[tokio::test]
    async fn test_memory_sink_keeps_records() {
        let sink = MemorySink::new();
        let room = GameRoom::new("R", GameSettings::default());
        let record = FinishedGameRecord::new("R", room.clone(), room.rankings());

        sink.persist_finished_game(record).await.unwrap();

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].room_id, "R");
    }

    #[tokio::test]
    async fn test_timeline_copied_from_chain() {
        let mut room = GameRoom::new("R", GameSettings::default());
        room.add_word("사과", 1, 24);
        room.add_word("과일", 2, 30);

        let record = FinishedGameRecord::new("R", room.clone(), room.rankings());
        assert_eq!(record.word_timeline.len(), 2);
        assert_eq!(record.word_timeline[0].word, "사과");
    }
}
