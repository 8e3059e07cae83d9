use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use game_core::dictionary::{DictionaryService, MemoryDictionary};
use game_persistence::MemorySink;
use game_server::dispatcher::EventDispatcher;
use game_server::engine::{GameEngine, spawn_timer_event_loop};
use game_server::kv::MemoryKv;
use game_server::metrics::EngineMetrics;
use game_server::store::{GameStore, KvWordCache};
use game_server::timer::TimerService;
use game_server::websocket::{ConnectionManager, SessionId};
use game_types::{GameRoom, GameSettings, RoomStatus, ServerMessage};

pub struct Harness {
    pub engine: Arc<GameEngine>,
    pub store: Arc<GameStore>,
    pub connections: Arc<ConnectionManager>,
    pub timers: Arc<TimerService>,
    pub sink: Arc<MemorySink>,
}

pub async fn harness() -> Harness {
    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(GameStore::new(kv.clone()));
    let dictionary = Arc::new(DictionaryService::new(
        Arc::new(MemoryDictionary::seed()),
        Arc::new(KvWordCache::new(kv)),
    ));
    let (timers, timer_events) = TimerService::new();
    let connections = Arc::new(ConnectionManager::new());
    let dispatcher = Arc::new(EventDispatcher::new(connections.clone()));
    let sink = Arc::new(MemorySink::new());
    let metrics = Arc::new(EngineMetrics::new());

    let engine = Arc::new(GameEngine::new(
        store.clone(),
        dictionary,
        timers.clone(),
        dispatcher,
        sink.clone(),
        metrics,
    ));
    spawn_timer_event_loop(engine.clone(), timer_events);

    Harness {
        engine,
        store,
        connections,
        timers,
        sink,
    }
}

impl Harness {
    /// A connected session already joined to the room's broadcast channel.
    pub async fn add_session(
        &self,
        user_id: i64,
        nickname: &str,
        room_id: &str,
    ) -> UnboundedReceiver<ServerMessage> {
        let id = SessionId::new();
        let rx = self.connections.create_session(id).await;
        self.connections.bind_user(id, user_id).await.unwrap();
        self.connections.set_nickname(id, nickname).await;
        self.connections.set_room(id, Some(room_id.to_string())).await;
        rx
    }

    pub async fn room(&self, room_id: &str) -> GameRoom {
        self.store.load_room(room_id).await.unwrap()
    }

    pub async fn current_user(&self, room_id: &str) -> i64 {
        self.room(room_id).await.current_player().unwrap().user_id
    }

    /// Create a two-player room, ready both, start, and wait through the
    /// countdown until the room is playing.
    pub async fn start_two_player(
        &self,
        room_id: &str,
        settings: GameSettings,
    ) -> (
        UnboundedReceiver<ServerMessage>,
        UnboundedReceiver<ServerMessage>,
    ) {
        let rx_a = self.add_session(1, "A", room_id).await;
        self.engine
            .create_game(room_id, 1, "A", settings)
            .await
            .unwrap();
        let rx_b = self.add_session(2, "B", room_id).await;
        self.engine.join(room_id, 2, "B").await.unwrap();
        self.engine.ready(room_id, 1, true).await.unwrap();
        self.engine.ready(room_id, 2, true).await.unwrap();
        self.engine.start(room_id, 1).await.unwrap();
        self.wait_for_status(room_id, RoomStatus::Playing, Duration::from_secs(6))
            .await;
        (rx_a, rx_b)
    }

    pub async fn wait_for_status(&self, room_id: &str, status: RoomStatus, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(Some(room)) = self.store.try_load_room(room_id).await {
                if room.status == status {
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("room {} never reached {:?}", room_id, status);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

pub fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[ServerMessage]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}

/// Classic settings squeezed for tests: short turns, few rounds.
pub fn quick_settings(max_rounds: u32, initial_turn_time_ms: u64) -> GameSettings {
    let mut settings = GameSettings::default();
    settings.max_rounds = max_rounds;
    settings.initial_turn_time_ms = initial_turn_time_ms;
    settings.turn_time_reduction_ms = initial_turn_time_ms / 6;
    settings
}
