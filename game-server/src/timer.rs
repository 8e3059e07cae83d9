use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Turn timers warn 5 seconds before expiry, game timers a minute before.
pub const TURN_WARNING_THRESHOLD: Duration = Duration::from_secs(5);
pub const GAME_WARNING_THRESHOLD: Duration = Duration::from_secs(60);

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const PAUSE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Turn,
    Game,
}

#[derive(Debug, Clone)]
pub enum TimerSignal {
    Tick { remaining_ms: u64 },
    Warning { remaining_ms: u64 },
    Expired,
}

/// Emitted by timer tasks into the engine's event loop.
#[derive(Debug, Clone)]
pub struct TimerEvent {
    pub room_id: String,
    pub user_id: i64,
    pub timer_id: String,
    pub kind: TimerKind,
    pub signal: TimerSignal,
}

struct TimerState {
    deadline: Instant,
    paused_remaining: Option<Duration>,
}

struct ActiveTimer {
    id: String,
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<TimerState>>,
    task: JoinHandle<()>,
}

/// Countdown tasks keyed by room and kind. A room holds at most one timer
/// per kind; starting a new one replaces (cancels and awaits) the old.
pub struct TimerService {
    timers: Arc<DashMap<(String, TimerKind), ActiveTimer>>,
    events: mpsc::UnboundedSender<TimerEvent>,
}

impl TimerService {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TimerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                timers: Arc::new(DashMap::new()),
                events,
            }),
            receiver,
        )
    }

    /// Start a timer, replacing any prior one of the same kind. Returns the
    /// new timer's id; the replaced task is fully terminated before the new
    /// one exists, so the old id can never fire again.
    pub async fn start(
        &self,
        room_id: &str,
        user_id: i64,
        kind: TimerKind,
        duration: Duration,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.start_with_id(room_id, user_id, kind, duration, &id).await;
        id
    }

    pub async fn start_with_id(
        &self,
        room_id: &str,
        user_id: i64,
        kind: TimerKind,
        duration: Duration,
        timer_id: &str,
    ) {
        self.cancel(room_id, kind).await;

        let cancelled = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(TimerState {
            deadline: Instant::now() + duration,
            paused_remaining: None,
        }));
        let warn_threshold = match kind {
            TimerKind::Turn => TURN_WARNING_THRESHOLD,
            TimerKind::Game => GAME_WARNING_THRESHOLD,
        };
        let task = tokio::spawn(run_timer(
            room_id.to_string(),
            user_id,
            timer_id.to_string(),
            kind,
            warn_threshold,
            cancelled.clone(),
            state.clone(),
            self.events.clone(),
            self.timers.clone(),
        ));
        self.timers.insert(
            (room_id.to_string(), kind),
            ActiveTimer {
                id: timer_id.to_string(),
                cancelled,
                state,
                task,
            },
        );
        debug!(room_id, timer_id, ?kind, ?duration, "timer started");
    }

    /// Cancel and await the task. After this returns, none of the timer's
    /// signals will be delivered.
    pub async fn cancel(&self, room_id: &str, kind: TimerKind) -> bool {
        let removed = self.timers.remove(&(room_id.to_string(), kind));
        match removed {
            Some((_, timer)) => {
                timer.cancelled.store(true, Ordering::SeqCst);
                timer.task.abort();
                let _ = timer.task.await;
                debug!(room_id, timer_id = %timer.id, ?kind, "timer cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self, room_id: &str) {
        self.cancel(room_id, TimerKind::Turn).await;
        self.cancel(room_id, TimerKind::Game).await;
    }

    fn state_of(&self, room_id: &str, kind: TimerKind) -> Option<Arc<Mutex<TimerState>>> {
        self.timers
            .get(&(room_id.to_string(), kind))
            .map(|t| t.state.clone())
    }

    pub async fn extend(&self, room_id: &str, kind: TimerKind, by: Duration) -> bool {
        let Some(state) = self.state_of(room_id, kind) else {
            return false;
        };
        let mut st = state.lock().await;
        match st.paused_remaining.as_mut() {
            Some(remaining) => *remaining += by,
            None => st.deadline += by,
        }
        true
    }

    pub async fn reduce(&self, room_id: &str, kind: TimerKind, by: Duration) -> bool {
        let Some(state) = self.state_of(room_id, kind) else {
            return false;
        };
        let mut st = state.lock().await;
        match st.paused_remaining.as_mut() {
            Some(remaining) => *remaining = remaining.saturating_sub(by),
            None => {
                st.deadline = st
                    .deadline
                    .checked_sub(by)
                    .map(|d| d.max(Instant::now()))
                    .unwrap_or_else(Instant::now);
            }
        }
        true
    }

    pub async fn pause(&self, room_id: &str, kind: TimerKind) -> bool {
        let Some(state) = self.state_of(room_id, kind) else {
            return false;
        };
        let mut st = state.lock().await;
        if st.paused_remaining.is_none() {
            st.paused_remaining = Some(st.deadline.saturating_duration_since(Instant::now()));
        }
        true
    }

    pub async fn resume(&self, room_id: &str, kind: TimerKind) -> bool {
        let Some(state) = self.state_of(room_id, kind) else {
            return false;
        };
        let mut st = state.lock().await;
        if let Some(remaining) = st.paused_remaining.take() {
            st.deadline = Instant::now() + remaining;
        }
        true
    }

    pub async fn remaining(&self, room_id: &str, kind: TimerKind) -> Option<Duration> {
        let state = self.state_of(room_id, kind)?;
        let st = state.lock().await;
        Some(match st.paused_remaining {
            Some(remaining) => remaining,
            None => st.deadline.saturating_duration_since(Instant::now()),
        })
    }

    pub fn is_active(&self, room_id: &str, kind: TimerKind) -> bool {
        self.timers.contains_key(&(room_id.to_string(), kind))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_timer(
    room_id: String,
    user_id: i64,
    timer_id: String,
    kind: TimerKind,
    warn_threshold: Duration,
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<TimerState>>,
    events: mpsc::UnboundedSender<TimerEvent>,
    timers: Arc<DashMap<(String, TimerKind), ActiveTimer>>,
) {
    let mut warned = false;
    let event = |signal: TimerSignal| TimerEvent {
        room_id: room_id.clone(),
        user_id,
        timer_id: timer_id.clone(),
        kind,
        signal,
    };

    loop {
        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        let (remaining, paused) = {
            let st = state.lock().await;
            match st.paused_remaining {
                Some(remaining) => (remaining, true),
                None => (st.deadline.saturating_duration_since(Instant::now()), false),
            }
        };

        if paused {
            tokio::time::sleep(PAUSE_POLL).await;
            continue;
        }

        if remaining.is_zero() {
            if !cancelled.load(Ordering::SeqCst) {
                let _ = events.send(event(TimerSignal::Expired));
            }
            // Drop our own registry entry, but never a replacement's.
            timers.remove_if(&(room_id.clone(), kind), |_, t| t.id == timer_id);
            return;
        }

        if !warned && remaining <= warn_threshold {
            warned = true;
            let _ = events.send(event(TimerSignal::Warning {
                remaining_ms: remaining.as_millis() as u64,
            }));
        }

        let _ = events.send(event(TimerSignal::Tick {
            remaining_ms: remaining.as_millis() as u64,
        }));

        // Wake at whichever comes first: the next tick, the warning moment,
        // or the deadline itself.
        let until_warning = if warned {
            None
        } else {
            remaining.checked_sub(warn_threshold)
        };
        let sleep_for = [Some(remaining), Some(TICK_INTERVAL), until_warning]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(TICK_INTERVAL);
        tokio::time::sleep(sleep_for).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn next_signal(
        rx: &mut mpsc::UnboundedReceiver<TimerEvent>,
        want_expired: bool,
    ) -> Option<TimerEvent> {
        loop {
            match timeout(Duration::from_millis(2_000), rx.recv()).await {
                Ok(Some(event)) => {
                    if !want_expired || matches!(event.signal, TimerSignal::Expired) {
                        return Some(event);
                    }
                }
                _ => return None,
            }
        }
    }

    #[tokio::test]
    async fn test_timer_expires_once() {
        let (service, mut rx) = TimerService::new();
        let id = service
            .start("R", 7, TimerKind::Turn, Duration::from_millis(60))
            .await;

        let expired = next_signal(&mut rx, true).await.expect("expiry");
        assert_eq!(expired.timer_id, id);
        assert_eq!(expired.user_id, 7);
        assert!(!service.is_active("R", TimerKind::Turn));

        // Nothing else arrives after expiry.
        assert!(next_signal(&mut rx, true).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_prevents_expiry() {
        let (service, mut rx) = TimerService::new();
        service
            .start("R", 7, TimerKind::Turn, Duration::from_millis(80))
            .await;

        assert!(service.cancel("R", TimerKind::Turn).await);
        assert!(!service.is_active("R", TimerKind::Turn));

        // Once cancel has returned, no expiry may be delivered.
        assert!(next_signal(&mut rx, true).await.is_none());
    }

    #[tokio::test]
    async fn test_replacement_silences_old_timer() {
        let (service, mut rx) = TimerService::new();
        service
            .start_with_id("R", 7, TimerKind::Turn, Duration::from_millis(40), "old")
            .await;
        service
            .start_with_id("R", 9, TimerKind::Turn, Duration::from_millis(40), "new")
            .await;

        // The old task may have ticked before the swap, but once cancel has
        // completed only the replacement may expire.
        let expiry = next_signal(&mut rx, true).await.expect("an expiry");
        assert_eq!(expiry.timer_id, "new", "old timer must not expire");
        assert!(next_signal(&mut rx, true).await.is_none());
    }

    #[tokio::test]
    async fn test_extend_postpones_expiry() {
        let (service, mut rx) = TimerService::new();
        service
            .start("R", 7, TimerKind::Turn, Duration::from_millis(100))
            .await;
        service
            .extend("R", TimerKind::Turn, Duration::from_millis(300))
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        let mut saw_early_expiry = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.signal, TimerSignal::Expired) {
                saw_early_expiry = true;
            }
        }
        assert!(!saw_early_expiry, "extended timer expired early");

        assert!(next_signal(&mut rx, true).await.is_some());
    }

    #[tokio::test]
    async fn test_reduce_hastens_expiry() {
        let (service, mut rx) = TimerService::new();
        service
            .start("R", 7, TimerKind::Turn, Duration::from_secs(30))
            .await;
        service.reduce("R", TimerKind::Turn, Duration::from_secs(30)).await;

        assert!(next_signal(&mut rx, true).await.is_some());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (service, mut rx) = TimerService::new();
        service
            .start("R", 7, TimerKind::Turn, Duration::from_millis(80))
            .await;
        service.pause("R", TimerKind::Turn).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        let remaining = service.remaining("R", TimerKind::Turn).await.unwrap();
        assert!(remaining > Duration::ZERO, "paused timer kept counting down");

        service.resume("R", TimerKind::Turn).await;
        assert!(next_signal(&mut rx, true).await.is_some());
    }

    #[tokio::test]
    async fn test_turn_and_game_timers_coexist() {
        let (service, _rx) = TimerService::new();
        service
            .start("R", 7, TimerKind::Turn, Duration::from_secs(30))
            .await;
        service
            .start("R", 0, TimerKind::Game, Duration::from_secs(60))
            .await;

        assert!(service.is_active("R", TimerKind::Turn));
        assert!(service.is_active("R", TimerKind::Game));

        service.cancel_all("R").await;
        assert!(!service.is_active("R", TimerKind::Turn));
        assert!(!service.is_active("R", TimerKind::Game));
    }

    #[tokio::test]
    async fn test_warning_precedes_expiry() {
        let (service, mut rx) = TimerService::new();
        service
            .start("R", 7, TimerKind::Turn, Duration::from_millis(50))
            .await;

        let mut saw_warning = false;
        while let Some(event) = next_signal(&mut rx, false).await {
            match event.signal {
                TimerSignal::Warning { .. } => saw_warning = true,
                TimerSignal::Expired => break,
                TimerSignal::Tick { .. } => {}
            }
        }
        assert!(saw_warning);
    }
}
