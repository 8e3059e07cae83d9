mod test_helpers;

use std::time::Duration;

use test_helpers::{drain, harness, kinds, quick_settings};

use game_server::engine::SubmitResult;
use game_server::timer::TimerKind;
use game_types::{GameError, GameSettings, PlayerStatus, RejectReason, RoomStatus, ServerMessage};

#[tokio::test]
async fn test_lobby_flow_create_join_ready() {
    let h = harness().await;
    let mut rx_a = h.add_session(1, "A", "R").await;

    let room = h
        .engine
        .create_game("R", 1, "A", GameSettings::default())
        .await
        .unwrap();
    assert_eq!(room.status, RoomStatus::Lobby);
    assert_eq!(room.host().unwrap().user_id, 1);

    let mut rx_b = h.add_session(2, "B", "R").await;
    h.engine.join("R", 2, "B").await.unwrap();

    let room = h.room("R").await;
    assert_eq!(room.status, RoomStatus::Waiting);
    assert_eq!(room.players.len(), 2);
    assert_eq!(room.players.iter().filter(|p| p.is_host).count(), 1);

    h.engine.ready("R", 1, true).await.unwrap();
    assert_eq!(h.room("R").await.status, RoomStatus::Waiting);
    h.engine.ready("R", 2, true).await.unwrap();
    assert_eq!(h.room("R").await.status, RoomStatus::Ready);

    // Unready drops the room back to waiting.
    h.engine.ready("R", 2, false).await.unwrap();
    assert_eq!(h.room("R").await.status, RoomStatus::Waiting);

    let a_kinds = kinds(&drain(&mut rx_a));
    assert!(a_kinds.contains(&"game_created"));
    assert!(a_kinds.contains(&"player_joined"));
    assert!(a_kinds.contains(&"player_ready_status"));
    assert!(kinds(&drain(&mut rx_b)).contains(&"player_ready_status"));
}

#[tokio::test]
async fn test_join_guards() {
    let h = harness().await;
    let mut settings = GameSettings::default();
    settings.max_players = 2;

    h.engine.create_game("R", 1, "A", settings).await.unwrap();
    assert_eq!(
        h.engine.create_game("R", 3, "C", GameSettings::default()).await,
        Err(GameError::AlreadyExists("R".to_string()))
    );

    h.engine.join("R", 2, "B").await.unwrap();
    assert_eq!(h.engine.join("R", 2, "B").await, Err(GameError::Duplicate(2)));
    assert_eq!(h.engine.join("R", 3, "C").await, Err(GameError::Full));

    // A player with another active room cannot join elsewhere.
    h.engine
        .create_game("S", 9, "H", GameSettings::default())
        .await
        .unwrap();
    assert_eq!(
        h.engine.join("R", 9, "H").await,
        Err(GameError::ElsewhereActive(9))
    );
}

#[tokio::test]
async fn test_start_requires_ready_host() {
    let h = harness().await;
    h.engine
        .create_game("R", 1, "A", GameSettings::default())
        .await
        .unwrap();

    assert_eq!(
        h.engine.start("R", 1).await,
        Err(GameError::NotEnoughPlayers)
    );

    h.engine.join("R", 2, "B").await.unwrap();
    assert_eq!(h.engine.start("R", 2).await, Err(GameError::NotHost(2)));
    assert_eq!(h.engine.start("R", 1).await, Err(GameError::NotReady));

    h.engine.ready("R", 1, true).await.unwrap();
    h.engine.ready("R", 2, true).await.unwrap();
    h.engine.start("R", 1).await.unwrap();

    let room = h.room("R").await;
    assert_eq!(room.status, RoomStatus::Starting);
}

// S1: classic two-player happy path with chained submissions.
#[tokio::test]
async fn test_happy_path_chain_and_scores() {
    let h = harness().await;
    let (mut rx_a, _rx_b) = h.start_two_player("R", quick_settings(1, 30_000)).await;

    let room = h.room("R").await;
    assert_eq!(room.status, RoomStatus::Playing);
    assert_eq!(room.current_round, 1);
    assert_eq!(room.turn_time_limit_ms, 30_000);
    assert!(room.players.iter().all(|p| p.status == PlayerStatus::Playing));
    assert!(room.timer.is_some());

    // Seats are shuffled; follow whoever actually holds the turn.
    let first = h.current_user("R").await;
    let result = h.engine.submit_word("R", first, "사과").await.unwrap();
    let breakdown = match result {
        SubmitResult::Accepted(b) => b,
        other => panic!("expected acceptance, got {:?}", other),
    };
    // 2 syllables, difficulty 1, frequency 80: base 2, rarity 20, combo 1.1.
    assert_eq!(breakdown.base, 2);
    assert_eq!(breakdown.rarity_bonus, 20);
    assert_eq!(breakdown.length_bonus, 0);
    assert_eq!(breakdown.combo_multiplier, 1.1);
    let expected = ((2.0 + 20.0) * 1.1 * breakdown.response_time_factor).round() as i64;
    assert_eq!(breakdown.final_score, expected);

    let room = h.room("R").await;
    assert_eq!(room.word_chain.current_last_char, "과");
    assert_eq!(room.turn_time_limit_ms, 25_000);
    assert_eq!(room.total_turns_in_round, 1);

    let second = h.current_user("R").await;
    assert_ne!(second, first);
    h.engine.submit_word("R", second, "과일").await.unwrap();

    let room = h.room("R").await;
    assert_eq!(room.word_chain.current_last_char, "일");
    assert_eq!(room.turn_time_limit_ms, 20_000);
    assert_eq!(room.player(first).unwrap().words_submitted, 1);
    assert_eq!(room.player(second).unwrap().words_submitted, 1);
    assert!(room.player(first).unwrap().score > 0);

    let a_kinds = kinds(&drain(&mut rx_a));
    assert!(a_kinds.contains(&"game_started"));
    assert!(a_kinds.contains(&"turn_timer_started"));
    assert!(a_kinds.iter().filter(|k| **k == "word_submitted").count() >= 2);
}

// S2: chain violation is rejected, the turn does not advance.
#[tokio::test]
async fn test_chain_violation_keeps_turn() {
    let h = harness().await;
    let (_rx_a, mut rx_b) = h.start_two_player("R", quick_settings(1, 30_000)).await;

    let first = h.current_user("R").await;
    h.engine.submit_word("R", first, "사과").await.unwrap();

    let second = h.current_user("R").await;
    let timer_before = h.room("R").await.timer.clone().unwrap();

    let result = h.engine.submit_word("R", second, "사자").await.unwrap();
    assert!(matches!(
        result,
        SubmitResult::Rejected(RejectReason::InvalidChain)
    ));

    let room = h.room("R").await;
    // Still the same player's turn, same deadline, combo broken.
    assert_eq!(room.current_player().unwrap().user_id, second);
    assert_eq!(room.timer.as_ref().unwrap().timer_id, timer_before.timer_id);
    assert_eq!(room.player(second).unwrap().consecutive_success, 0);
    assert_eq!(room.total_turns_in_round, 1);

    let b_events = drain(&mut rx_b);
    assert!(b_events.iter().any(|e| matches!(
        e,
        ServerMessage::WordRejected {
            reason: RejectReason::InvalidChain,
            ..
        }
    )));
}

// S3: a word used earlier in the round is rejected.
#[tokio::test]
async fn test_duplicate_word_rejected() {
    let h = harness().await;
    let (_rx_a, _rx_b) = h.start_two_player("R", quick_settings(1, 30_000)).await;

    let first = h.current_user("R").await;
    h.engine.submit_word("R", first, "생일").await.unwrap();
    let second = h.current_user("R").await;
    h.engine.submit_word("R", second, "일요일").await.unwrap();

    // Chain is back at "일", so the word itself would fit the chain.
    let third = h.current_user("R").await;
    let result = h.engine.submit_word("R", third, "일요일").await.unwrap();
    assert!(matches!(
        result,
        SubmitResult::Rejected(RejectReason::AlreadyUsed)
    ));
}

#[tokio::test]
async fn test_unknown_word_rejected() {
    let h = harness().await;
    let (_rx_a, _rx_b) = h.start_two_player("R", quick_settings(1, 30_000)).await;

    let first = h.current_user("R").await;
    let result = h.engine.submit_word("R", first, "없는말임").await.unwrap();
    assert!(matches!(
        result,
        SubmitResult::Rejected(RejectReason::InvalidWord)
    ));
}

#[tokio::test]
async fn test_turn_exclusivity() {
    let h = harness().await;
    let (_rx_a, _rx_b) = h.start_two_player("R", quick_settings(1, 30_000)).await;

    let first = h.current_user("R").await;
    let other = if first == 1 { 2 } else { 1 };

    assert_eq!(
        h.engine.submit_word("R", other, "사과").await,
        Err(GameError::NotYourTurn)
    );
    // The rightful player is unaffected.
    let result = h.engine.submit_word("R", first, "사과").await.unwrap();
    assert!(matches!(result, SubmitResult::Accepted(_)));
}

// S4: timeout ends the round; the next round starts fresh after the
// transition countdown; the last round's timeout finishes the game.
#[tokio::test]
async fn test_timeout_ends_round_then_game() {
    let h = harness().await;
    let (mut rx_a, _rx_b) = h.start_two_player("R", quick_settings(2, 500)).await;

    let idle = h.current_user("R").await;

    // Round 1 dies by timeout, the transition countdown runs, round 2 begins.
    h.wait_for_status("R", RoomStatus::RoundTransition, Duration::from_secs(3))
        .await;
    let room = h.room("R").await;
    assert_eq!(room.current_round, 2);
    assert!(room.word_chain.words.is_empty());
    assert_eq!(room.word_chain.current_last_char, "");
    assert_eq!(room.turn_time_limit_ms, 500);
    assert_eq!(room.player(idle).unwrap().consecutive_success, 0);

    h.wait_for_status("R", RoomStatus::Playing, Duration::from_secs(4)).await;

    // Round 2 is the last round; its timeout completes the game, and the
    // finish path resets the room for a rematch.
    h.wait_for_status("R", RoomStatus::Waiting, Duration::from_secs(4)).await;

    let records = h.sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].room_id, "R");
    assert_eq!(records[0].rankings.len(), 2);

    let events = kinds(&drain(&mut rx_a));
    assert!(events.contains(&"turn_timeout"));
    assert!(events.contains(&"round_completed"));
    assert!(events.contains(&"round_transition"));
    assert!(events.contains(&"next_round_starting"));
    assert!(events.contains(&"game_completed"));
}

// S5: the host walking out mid-game terminates it and disbands the room.
#[tokio::test]
async fn test_host_leaves_during_play() {
    let h = harness().await;
    let (_rx_a, mut rx_b) = h.start_two_player("R", quick_settings(3, 30_000)).await;

    h.engine.leave("R", 1).await.unwrap();

    let room = h.room("R").await;
    assert_eq!(room.status, RoomStatus::Finished);
    assert!(!h.timers.is_active("R", TimerKind::Turn));
    assert!(!h.timers.is_active("R", TimerKind::Game));

    let b_kinds = kinds(&drain(&mut rx_b));
    assert!(b_kinds.contains(&"player_left_room"));
    assert!(b_kinds.contains(&"host_left_game"));
    assert!(b_kinds.contains(&"game_ended"));

    // Disbanding is scheduled 5 seconds out.
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert!(h.store.try_load_room("R").await.unwrap().is_none());
    assert!(h.store.player_games(2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_host_leave_transfers_turn() {
    let h = harness().await;
    let mut settings = quick_settings(3, 30_000);
    settings.max_players = 3;

    let _rx_a = h.add_session(1, "A", "R").await;
    h.engine.create_game("R", 1, "A", settings).await.unwrap();
    let _rx_b = h.add_session(2, "B", "R").await;
    h.engine.join("R", 2, "B").await.unwrap();
    let _rx_c = h.add_session(3, "C", "R").await;
    h.engine.join("R", 3, "C").await.unwrap();
    for user in 1..=3 {
        h.engine.ready("R", user, true).await.unwrap();
    }
    h.engine.start("R", 1).await.unwrap();
    h.wait_for_status("R", RoomStatus::Playing, Duration::from_secs(6)).await;

    // A non-host, non-current player leaving keeps the game running.
    let current = h.current_user("R").await;
    let bystander = (1..=3).find(|u| *u != current && *u != 1).unwrap();
    h.engine.leave("R", bystander).await.unwrap();

    let room = h.room("R").await;
    assert_eq!(room.status, RoomStatus::Playing);
    assert_eq!(room.players.len(), 2);
    assert_eq!(room.current_player().unwrap().user_id, current);
    assert_eq!(room.players.iter().filter(|p| p.is_host).count(), 1);
}

#[tokio::test]
async fn test_host_leave_before_start_transfers_host() {
    let h = harness().await;
    h.engine
        .create_game("R", 1, "A", GameSettings::default())
        .await
        .unwrap();
    h.engine.join("R", 2, "B").await.unwrap();

    h.engine.leave("R", 1).await.unwrap();

    let room = h.room("R").await;
    assert_eq!(room.status, RoomStatus::Waiting);
    assert_eq!(room.host().unwrap().user_id, 2);
}

// S6: a turn timer that lost the race against a submission is a no-op.
#[tokio::test]
async fn test_stale_timeout_is_noop() {
    let h = harness().await;
    let (_rx_a, _rx_b) = h.start_two_player("R", quick_settings(2, 30_000)).await;

    let first = h.current_user("R").await;
    let stale_timer = h.room("R").await.timer.clone().unwrap();
    h.engine.submit_word("R", first, "사과").await.unwrap();

    // The expiry for the replaced timer arrives late and must change nothing.
    h.engine
        .turn_timeout("R", first, &stale_timer.timer_id)
        .await
        .unwrap();

    let room = h.room("R").await;
    assert_eq!(room.status, RoomStatus::Playing);
    assert_eq!(room.current_round, 1);
    assert_ne!(room.current_player().unwrap().user_id, first);
    assert_eq!(room.word_chain.words.len(), 1);
}

#[tokio::test]
async fn test_end_game_resets_for_rematch() {
    let h = harness().await;
    let (_rx_a, _rx_b) = h.start_two_player("R", quick_settings(3, 30_000)).await;

    let first = h.current_user("R").await;
    h.engine.submit_word("R", first, "사과").await.unwrap();

    h.engine
        .end_game("R", game_types::GameEndReason::Aborted)
        .await
        .unwrap();

    h.wait_for_status("R", RoomStatus::Waiting, Duration::from_secs(2)).await;
    let room = h.room("R").await;
    assert!(room.word_chain.words.is_empty());
    assert!(room.players.iter().all(|p| p.score == 0));
    assert!(room.players.iter().all(|p| p.status == PlayerStatus::Waiting));
    assert_eq!(h.sink.records().await.len(), 1);
}

#[tokio::test]
async fn test_hints_follow_chain() {
    let h = harness().await;
    let (_rx_a, _rx_b) = h.start_two_player("R", quick_settings(1, 30_000)).await;

    // No chain yet: no constraint, no hints.
    let (last_char, words) = h.engine.hints("R", 5).await.unwrap();
    assert_eq!(last_char, "");
    assert!(words.is_empty());

    let first = h.current_user("R").await;
    h.engine.submit_word("R", first, "사과").await.unwrap();

    let (last_char, words) = h.engine.hints("R", 5).await.unwrap();
    assert_eq!(last_char, "과");
    assert!(!words.is_empty());
    assert!(words.iter().all(|w| w.starts_with('과')));
}
