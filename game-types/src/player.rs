use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Waiting,
    Ready,
    Playing,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Player {
    pub user_id: i64,
    pub nickname: String,
    pub status: PlayerStatus,
    pub is_host: bool,
    pub score: i64,
    pub current_combo: u32,
    pub max_combo: u32,
    pub words_submitted: u32,
    pub items_used: u32,
    pub consecutive_success: u32,
    pub longest_word: String,
    pub total_response_ms: u64,
    pub fastest_response_ms: Option<u64>,
}

impl Player {
    pub fn new(user_id: i64, nickname: &str, is_host: bool) -> Self {
        Self {
            user_id,
            nickname: nickname.to_string(),
            status: PlayerStatus::Waiting,
            is_host,
            score: 0,
            current_combo: 0,
            max_combo: 0,
            words_submitted: 0,
            items_used: 0,
            consecutive_success: 0,
            longest_word: String::new(),
            total_response_ms: 0,
            fastest_response_ms: None,
        }
    }

    /// A player keeps their seat while disconnected but no longer counts
    /// toward game-over predicates.
    pub fn is_active(&self) -> bool {
        self.status != PlayerStatus::Disconnected
    }

    /// Fold an accepted submission into the running stats. The word count
    /// itself is kept by `GameRoom::add_word`.
    pub fn record_accepted(&mut self, word: &str, score: i64, response_ms: u64) {
        self.score += score;
        self.consecutive_success += 1;
        self.current_combo = self.consecutive_success;
        self.max_combo = self.max_combo.max(self.current_combo);
        if word.chars().count() > self.longest_word.chars().count() {
            self.longest_word = word.to_string();
        }
        self.total_response_ms += response_ms;
        self.fastest_response_ms = Some(match self.fastest_response_ms {
            Some(best) => best.min(response_ms),
            None => response_ms,
        });
    }

    /// Rejections and timeouts break the combo.
    pub fn break_combo(&mut self) {
        self.consecutive_success = 0;
        self.current_combo = 0;
    }

    pub fn reset_for_new_game(&mut self) {
        self.status = PlayerStatus::Waiting;
        self.score = 0;
        self.current_combo = 0;
        self.max_combo = 0;
        self.words_submitted = 0;
        self.items_used = 0;
        self.consecutive_success = 0;
        self.longest_word.clear();
        self.total_response_ms = 0;
        self.fastest_response_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accepted_updates_stats() {
        let mut player = Player::new(7, "철수", true);
        player.record_accepted("사과", 24, 1200);
        player.record_accepted("과일", 30, 800);

        assert_eq!(player.score, 54);
        assert_eq!(player.consecutive_success, 2);
        assert_eq!(player.max_combo, 2);
        assert_eq!(player.fastest_response_ms, Some(800));
        assert_eq!(player.total_response_ms, 2000);
    }

    #[test]
    fn test_break_combo_keeps_max() {
        let mut player = Player::new(7, "철수", false);
        player.record_accepted("사과", 24, 1000);
        player.record_accepted("과일", 30, 1000);
        player.break_combo();

        assert_eq!(player.consecutive_success, 0);
        assert_eq!(player.current_combo, 0);
        assert_eq!(player.max_combo, 2);
        assert_eq!(player.score, 54);
    }

    #[test]
    fn test_longest_word_tracked_in_syllables() {
        let mut player = Player::new(1, "영희", false);
        player.record_accepted("사과", 10, 500);
        player.record_accepted("일요일", 10, 500);
        player.record_accepted("과일", 10, 500);
        assert_eq!(player.longest_word, "일요일");
    }

    #[test]
    fn test_reset_for_new_game() {
        let mut player = Player::new(1, "영희", true);
        player.record_accepted("사과", 24, 500);
        player.status = PlayerStatus::Playing;
        player.reset_for_new_game();

        assert_eq!(player.status, PlayerStatus::Waiting);
        assert_eq!(player.score, 0);
        assert_eq!(player.words_submitted, 0);
        assert!(player.is_host);
        assert_eq!(player.nickname, "영희");
    }
}
