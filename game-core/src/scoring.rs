use game_types::{GameSettings, ScoreBreakdown, WordEntry};

/// Combo can at most triple a word's value.
pub const MAX_COMBO_MULTIPLIER: f64 = 3.0;
/// Hard cap on the per-mode score multiplier.
pub const MAX_MODE_MULTIPLIER: f64 = 5.0;
/// Submissions slower than this earn no speed bonus.
pub const RESPONSE_BONUS_WINDOW_MS: u64 = 5_000;
/// Bounded speed-up; stays well under the 1.5x ceiling.
pub const MAX_RESPONSE_FACTOR: f64 = 1.25;

pub struct ScoreCalculator;

impl ScoreCalculator {
    pub fn difficulty_multiplier(difficulty: u8) -> f64 {
        match difficulty {
            2 => 1.5,
            3 => 2.0,
            _ => 1.0,
        }
    }

    /// Rarer words are worth more; the tiers follow frequency_score.
    pub fn rarity_bonus(frequency_score: u8) -> i64 {
        match frequency_score {
            90..=u8::MAX => 10,
            70..=89 => 20,
            50..=69 => 30,
            _ => 50,
        }
    }

    pub fn length_bonus(length: u32) -> i64 {
        ((length as i64) - 3).max(0) * 5
    }

    pub fn combo_multiplier(consecutive_success: u32) -> f64 {
        (1.0 + 0.1 * consecutive_success as f64).min(MAX_COMBO_MULTIPLIER)
    }

    /// 1.0 at or beyond the bonus window, rising linearly to
    /// MAX_RESPONSE_FACTOR for an instant answer.
    pub fn response_time_factor(response_ms: u64) -> f64 {
        if response_ms >= RESPONSE_BONUS_WINDOW_MS {
            return 1.0;
        }
        let saved = (RESPONSE_BONUS_WINDOW_MS - response_ms) as f64;
        1.0 + (MAX_RESPONSE_FACTOR - 1.0) * saved / RESPONSE_BONUS_WINDOW_MS as f64
    }

    /// Score an accepted word. `consecutive_success` must already include
    /// this submission.
    pub fn calculate(
        entry: &WordEntry,
        response_ms: u64,
        consecutive_success: u32,
        settings: &GameSettings,
    ) -> ScoreBreakdown {
        let base = entry.length as f64 * Self::difficulty_multiplier(entry.difficulty);
        let rarity_bonus = Self::rarity_bonus(entry.frequency_score);
        let length_bonus = Self::length_bonus(entry.length);
        let combo_multiplier = Self::combo_multiplier(consecutive_success);
        let response_time_factor = Self::response_time_factor(response_ms);
        let mode_multiplier = settings.score_multiplier.min(MAX_MODE_MULTIPLIER);

        let final_score = ((base + rarity_bonus as f64 + length_bonus as f64)
            * combo_multiplier
            * response_time_factor
            * mode_multiplier)
            .round() as i64;

        ScoreBreakdown {
            base: base.round() as i64,
            rarity_bonus,
            length_bonus,
            combo_multiplier,
            response_time_factor,
            mode_multiplier,
            final_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_types::{GameMode, GameSettings};

    fn classic() -> GameSettings {
        GameSettings::default()
    }

    #[test]
    fn test_two_player_happy_path_numbers() {
        // "사과": 2 syllables, difficulty 1, frequency 80.
        let entry = WordEntry::new("사과", "apple", 1, 80);
        let breakdown = ScoreCalculator::calculate(&entry, 10_000, 1, &classic());

        assert_eq!(breakdown.base, 2);
        assert_eq!(breakdown.rarity_bonus, 20);
        assert_eq!(breakdown.length_bonus, 0);
        assert_eq!(breakdown.combo_multiplier, 1.1);
        assert_eq!(breakdown.response_time_factor, 1.0);
        assert_eq!(breakdown.final_score, 24); // round((2 + 20) * 1.1)
    }

    #[test]
    fn test_rarity_tiers() {
        assert_eq!(ScoreCalculator::rarity_bonus(95), 10);
        assert_eq!(ScoreCalculator::rarity_bonus(90), 10);
        assert_eq!(ScoreCalculator::rarity_bonus(89), 20);
        assert_eq!(ScoreCalculator::rarity_bonus(70), 20);
        assert_eq!(ScoreCalculator::rarity_bonus(69), 30);
        assert_eq!(ScoreCalculator::rarity_bonus(50), 30);
        assert_eq!(ScoreCalculator::rarity_bonus(49), 50);
        assert_eq!(ScoreCalculator::rarity_bonus(0), 50);
    }

    #[test]
    fn test_length_bonus() {
        assert_eq!(ScoreCalculator::length_bonus(2), 0);
        assert_eq!(ScoreCalculator::length_bonus(3), 0);
        assert_eq!(ScoreCalculator::length_bonus(4), 5);
        assert_eq!(ScoreCalculator::length_bonus(7), 20);
    }

    #[test]
    fn test_difficulty_multiplier() {
        let easy = WordEntry::new("가방", "bag", 1, 84);
        let hard = WordEntry::new("위성", "satellite", 3, 35);

        let easy_score = ScoreCalculator::calculate(&easy, 10_000, 0, &classic());
        let hard_score = ScoreCalculator::calculate(&hard, 10_000, 0, &classic());

        assert_eq!(easy_score.base, 2);
        assert_eq!(hard_score.base, 4); // 2 syllables * 2.0
        assert_eq!(hard_score.rarity_bonus, 50);
    }

    #[test]
    fn test_combo_multiplier_caps() {
        assert_eq!(ScoreCalculator::combo_multiplier(0), 1.0);
        assert_eq!(ScoreCalculator::combo_multiplier(5), 1.5);
        assert_eq!(ScoreCalculator::combo_multiplier(20), 3.0);
        assert_eq!(ScoreCalculator::combo_multiplier(100), 3.0);
    }

    #[test]
    fn test_response_factor_bounds() {
        assert_eq!(ScoreCalculator::response_time_factor(10_000), 1.0);
        assert_eq!(ScoreCalculator::response_time_factor(5_000), 1.0);
        assert_eq!(ScoreCalculator::response_time_factor(0), MAX_RESPONSE_FACTOR);

        let mid = ScoreCalculator::response_time_factor(2_500);
        assert!(mid > 1.0 && mid < MAX_RESPONSE_FACTOR);
        assert!(MAX_RESPONSE_FACTOR <= 1.5);
    }

    #[test]
    fn test_mode_multiplier_capped() {
        let entry = WordEntry::new("사과", "apple", 1, 80);
        let mut settings = GameSettings::for_mode(GameMode::TeamBattle);
        settings.score_multiplier = 9.0;

        let breakdown = ScoreCalculator::calculate(&entry, 10_000, 0, &settings);
        assert_eq!(breakdown.mode_multiplier, 5.0);
        assert_eq!(breakdown.final_score, 110); // (2 + 20) * 5.0
    }
}
