use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};
use warp::ws::{Message, WebSocket};

use game_types::{InboundFrame, ServerMessage};

use crate::engine::GameEngine;

pub mod connection;
pub mod handlers;
pub mod rate_limiter;


pub use connection::{ConnectionManager, SessionId};
use handlers::MessageHandler;
use rate_limiter::FrameLimiter;

pub async fn handle_connection(
    websocket: WebSocket,
    connections: Arc<ConnectionManager>,
    engine: Arc<GameEngine>,
) {
    let session_id = SessionId::new();
    info!(session_id = %session_id, "new websocket session");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let mut limiter = FrameLimiter::new();

    let outbound = connections.create_session(session_id).await;
    let handler = MessageHandler::new(session_id, connections.clone(), engine);

    // Inbound frames, one at a time in arrival order.
    let inbound_task = {
        let handler = handler.clone();
        async move {
            while let Some(result) = ws_receiver.next().await {
                let msg = match result {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "websocket error");
                        break;
                    }
                };
                handle_frame(msg, &mut limiter, &handler, session_id).await;
            }
        }
    };

    // Outbound events from the engine and dispatcher.
    let outbound_task = async move {
        let mut receiver = outbound;
        while let Some(message) = receiver.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "failed to serialize event");
                    continue;
                }
            };
            if ws_sender.send(Message::text(json)).await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = inbound_task => {},
        _ = outbound_task => {},
    }

    info!(session_id = %session_id, "websocket session closed");
    handler.handle_disconnect().await;
    connections.remove_session(session_id).await;
}

async fn handle_frame(
    msg: Message,
    limiter: &mut FrameLimiter,
    handler: &MessageHandler,
    session_id: SessionId,
) {
    if !limiter.allow() {
        warn!(session_id = %session_id, "rate limit exceeded, dropping frame");
        return;
    }

    if !msg.is_text() {
        return;
    }
    let Ok(text) = msg.to_str() else {
        return;
    };

    // Malformed envelopes answer with an error event; the session stays open.
    match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) => handler.handle_frame(frame).await,
        Err(e) => {
            info!(session_id = %session_id, error = %e, "malformed frame");
            handler
                .send(ServerMessage::Error {
                    reason: "malformed".to_string(),
                })
                .await;
        }
    }
}
