use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use game_types::{
    ChatPayload, CreateGamePayload, GameMode, GameSettings, GetHintsPayload, InboundFrame,
    JoinGamePayload, LeaveGamePayload, ReadyPayload, ServerMessage, SetUsernamePayload,
    StartGamePayload, SubmitWordPayload,
};

use crate::engine::GameEngine;
use crate::websocket::connection::{ConnectionManager, SessionId};

const DEFAULT_HINT_COUNT: usize = 5;

/// Demultiplexes one session's inbound frames into engine calls and answers
/// with typed events. Unknown frame types keep the session open.
#[derive(Clone)]
pub struct MessageHandler {
    session_id: SessionId,
    connections: Arc<ConnectionManager>,
    engine: Arc<GameEngine>,
}

impl MessageHandler {
    pub fn new(
        session_id: SessionId,
        connections: Arc<ConnectionManager>,
        engine: Arc<GameEngine>,
    ) -> Self {
        Self {
            session_id,
            connections,
            engine,
        }
    }

    pub async fn handle_frame(&self, frame: InboundFrame) {
        self.connections.update_activity(self.session_id).await;

        match frame.kind.as_str() {
            "ping" => self.send(ServerMessage::Pong).await,
            "set_username" => self.handle_set_username(frame).await,
            "chat" => self.handle_chat(frame).await,
            "create_game" => self.handle_create_game(frame).await,
            "join_game" => self.handle_join_game(frame).await,
            "ready" => self.handle_ready(frame).await,
            "start_game" => self.handle_start_game(frame).await,
            "submit_word" => self.handle_submit_word(frame).await,
            "leave_game" => self.handle_leave_game(frame).await,
            "get_hints" => self.handle_get_hints(frame).await,
            other => {
                info!(session_id = %self.session_id, kind = other, "unsupported frame");
                self.send(ServerMessage::Error {
                    reason: "unsupported".to_string(),
                })
                .await;
            }
        }
    }

    /// A dropped connection is a best-effort leave.
    pub async fn handle_disconnect(&self) {
        let Some(session) = self.connections.get_session(self.session_id).await else {
            return;
        };
        if let (Some(user_id), Some(room_id)) = (session.user_id, session.room_id) {
            if let Err(e) = self.engine.leave(&room_id, user_id).await {
                warn!(
                    session_id = %self.session_id,
                    room_id = %room_id,
                    error = %e,
                    "leave on disconnect failed"
                );
            }
        }
    }

    fn parse<T: DeserializeOwned>(&self, frame: InboundFrame) -> Option<T> {
        frame
            .data
            .and_then(|data| serde_json::from_value(data).ok())
    }

    pub(crate) async fn send(&self, message: ServerMessage) {
        let _ = self
            .connections
            .send_to_session(self.session_id, message)
            .await;
    }

    async fn send_malformed(&self) {
        self.send(ServerMessage::Error {
            reason: "malformed".to_string(),
        })
        .await;
    }

    async fn bound_user(&self) -> Option<i64> {
        self.connections
            .get_session(self.session_id)
            .await
            .and_then(|s| s.user_id)
    }

    async fn handle_set_username(&self, frame: InboundFrame) {
        let Some(payload) = self.parse::<SetUsernamePayload>(frame) else {
            return self.send_malformed().await;
        };
        self.connections
            .set_nickname(self.session_id, &payload.nickname)
            .await;
        self.send(ServerMessage::UsernameSet {
            nickname: payload.nickname,
        })
        .await;
    }

    async fn handle_chat(&self, frame: InboundFrame) {
        let Some(payload) = self.parse::<ChatPayload>(frame) else {
            return self.send_malformed().await;
        };
        let Some(session) = self.connections.get_session(self.session_id).await else {
            return;
        };
        let Some(user_id) = session.user_id else {
            return self
                .send(ServerMessage::Error {
                    reason: "not_joined".to_string(),
                })
                .await;
        };
        // Chat passes through without touching game state.
        self.connections
            .send_to_room(
                &payload.room_id,
                &ServerMessage::Chat {
                    room_id: payload.room_id.clone(),
                    user_id,
                    nickname: session.nickname.clone(),
                    message: payload.message,
                    timestamp: Utc::now().to_rfc3339(),
                },
            )
            .await;
    }

    async fn handle_create_game(&self, frame: InboundFrame) {
        let Some(payload) = self.parse::<CreateGamePayload>(frame) else {
            return self.send_malformed().await;
        };
        if let Err(e) = self.connections.bind_user(self.session_id, payload.user_id).await {
            return self.send(ServerMessage::CreateFailed { reason: e }).await;
        }
        self.connections
            .set_nickname(self.session_id, &payload.nickname)
            .await;
        // Join the room channel first so the creator hears game_created.
        self.connections
            .set_room(self.session_id, Some(payload.room_id.clone()))
            .await;

        let settings = GameSettings::for_mode(payload.mode.unwrap_or(GameMode::Classic));
        match self
            .engine
            .create_game(&payload.room_id, payload.user_id, &payload.nickname, settings)
            .await
        {
            Ok(_) => {}
            Err(e) => {
                self.connections.set_room(self.session_id, None).await;
                self.send(ServerMessage::CreateFailed {
                    reason: e.reason().to_string(),
                })
                .await;
            }
        }
    }

    async fn handle_join_game(&self, frame: InboundFrame) {
        let Some(payload) = self.parse::<JoinGamePayload>(frame) else {
            return self.send_malformed().await;
        };
        if let Err(e) = self.connections.bind_user(self.session_id, payload.user_id).await {
            return self.send(ServerMessage::JoinFailed { reason: e }).await;
        }
        self.connections
            .set_nickname(self.session_id, &payload.nickname)
            .await;
        self.connections
            .set_room(self.session_id, Some(payload.room_id.clone()))
            .await;

        match self
            .engine
            .join(&payload.room_id, payload.user_id, &payload.nickname)
            .await
        {
            Ok(_) => {}
            Err(e) => {
                self.connections.set_room(self.session_id, None).await;
                self.send(ServerMessage::JoinFailed {
                    reason: e.reason().to_string(),
                })
                .await;
            }
        }
    }

    async fn handle_ready(&self, frame: InboundFrame) {
        let Some(payload) = self.parse::<ReadyPayload>(frame) else {
            return self.send_malformed().await;
        };
        let Some(user_id) = self.bound_user().await else {
            return self
                .send(ServerMessage::ReadyFailed {
                    reason: "not_joined".to_string(),
                })
                .await;
        };
        if let Err(e) = self
            .engine
            .ready(&payload.room_id, user_id, payload.ready)
            .await
        {
            self.send(ServerMessage::ReadyFailed {
                reason: e.reason().to_string(),
            })
            .await;
        }
    }

    async fn handle_start_game(&self, frame: InboundFrame) {
        let Some(payload) = self.parse::<StartGamePayload>(frame) else {
            return self.send_malformed().await;
        };
        let Some(user_id) = self.bound_user().await else {
            return self
                .send(ServerMessage::StartFailed {
                    reason: "not_joined".to_string(),
                })
                .await;
        };
        if let Err(e) = self.engine.start(&payload.room_id, user_id).await {
            self.send(ServerMessage::StartFailed {
                reason: e.reason().to_string(),
            })
            .await;
        }
    }

    async fn handle_submit_word(&self, frame: InboundFrame) {
        let Some(payload) = self.parse::<SubmitWordPayload>(frame) else {
            return self.send_malformed().await;
        };
        let Some(user_id) = self.bound_user().await else {
            return self
                .send(ServerMessage::Error {
                    reason: "not_joined".to_string(),
                })
                .await;
        };
        match self
            .engine
            .submit_word(&payload.room_id, user_id, &payload.word)
            .await
        {
            // Accepted and rejected words are broadcast by the engine.
            Ok(_) => {}
            // Internal failures were already announced as internal_error.
            Err(e) if e.is_internal() => {}
            Err(e) => {
                self.send(ServerMessage::Error {
                    reason: e.reason().to_string(),
                })
                .await;
            }
        }
    }

    async fn handle_leave_game(&self, frame: InboundFrame) {
        let Some(payload) = self.parse::<LeaveGamePayload>(frame) else {
            return self.send_malformed().await;
        };
        let Some(user_id) = self.bound_user().await else {
            return self
                .send(ServerMessage::LeaveFailed {
                    reason: "not_joined".to_string(),
                })
                .await;
        };
        match self.engine.leave(&payload.room_id, user_id).await {
            Ok(()) => {
                self.connections.set_room(self.session_id, None).await;
            }
            Err(e) => {
                self.send(ServerMessage::LeaveFailed {
                    reason: e.reason().to_string(),
                })
                .await;
            }
        }
    }

    async fn handle_get_hints(&self, frame: InboundFrame) {
        let Some(payload) = self.parse::<GetHintsPayload>(frame) else {
            return self.send_malformed().await;
        };
        let count = payload.count.unwrap_or(DEFAULT_HINT_COUNT);
        match self.engine.hints(&payload.room_id, count).await {
            Ok((last_char, words)) => {
                self.send(ServerMessage::Hints {
                    room_id: payload.room_id,
                    last_char,
                    words,
                })
                .await;
            }
            Err(e) => {
                self.send(ServerMessage::Error {
                    reason: e.reason().to_string(),
                })
                .await;
            }
        }
    }
}
