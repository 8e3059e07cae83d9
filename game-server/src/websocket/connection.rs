use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use game_types::ServerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: Option<i64>,
    pub nickname: String,
    pub room_id: Option<String>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
}

impl Session {
    fn new(id: SessionId) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let now = Instant::now();
        let session = Self {
            id,
            user_id: None,
            nickname: String::new(),
            room_id: None,
            connected_at: now,
            last_activity: now,
            sender,
        };
        (session, receiver)
    }

    pub fn send(&self, message: ServerMessage) -> Result<(), String> {
        self.sender
            .send(message)
            .map_err(|_| "session closed".to_string())
    }

    pub fn is_inactive(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }
}

/// Registry of live sessions and their outbound channels.
pub struct ConnectionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
    user_to_session: RwLock<HashMap<i64, SessionId>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            user_to_session: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_session(&self, id: SessionId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (session, receiver) = Session::new(id);
        self.sessions.write().await.insert(id, session);
        receiver
    }

    pub async fn remove_session(&self, id: SessionId) {
        let user_id = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&id).and_then(|s| s.user_id)
        };
        if let Some(user_id) = user_id {
            self.user_to_session.write().await.remove(&user_id);
        }
    }

    pub async fn get_session(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Attach a user identity. A user may only hold one live session.
    pub async fn bind_user(&self, id: SessionId, user_id: i64) -> Result<(), String> {
        {
            let users = self.user_to_session.read().await;
            if let Some(existing) = users.get(&user_id) {
                if *existing != id {
                    return Err("user already connected".to_string());
                }
            }
        }
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(&id) {
                Some(session) => session.user_id = Some(user_id),
                None => return Err("session not found".to_string()),
            }
        }
        self.user_to_session.write().await.insert(user_id, id);
        Ok(())
    }

    pub async fn set_nickname(&self, id: SessionId, nickname: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            session.nickname = nickname.to_string();
        }
    }

    pub async fn set_room(&self, id: SessionId, room_id: Option<String>) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            session.room_id = room_id;
        }
    }

    pub async fn update_activity(&self, id: SessionId) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            session.last_activity = Instant::now();
        }
    }

    pub async fn send_to_session(&self, id: SessionId, message: ServerMessage) -> Result<(), String> {
        let sessions = self.sessions.read().await;
        match sessions.get(&id) {
            Some(session) => session.send(message),
            None => Err("session not found".to_string()),
        }
    }

    pub async fn send_to_user(&self, user_id: i64, message: ServerMessage) -> Result<(), String> {
        let session_id = {
            let users = self.user_to_session.read().await;
            users.get(&user_id).copied()
        };
        match session_id {
            Some(id) => self.send_to_session(id, message).await,
            None => Err("user not connected".to_string()),
        }
    }

    /// Deliver to every session joined to the room. Sessions whose channel
    /// is gone are dropped from the registry.
    pub async fn send_to_room(&self, room_id: &str, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for session in sessions.values() {
                if session.room_id.as_deref() == Some(room_id) {
                    match session.send(message.clone()) {
                        Ok(()) => delivered += 1,
                        Err(_) => dead.push(session.id),
                    }
                }
            }
        }
        for id in dead {
            self.remove_session(id).await;
        }
        delivered
    }

    pub async fn sessions_in_room(&self, room_id: &str) -> Vec<SessionId> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.room_id.as_deref() == Some(room_id))
            .map(|s| s.id)
            .collect()
    }

    pub async fn cleanup_inactive_sessions(&self, timeout: Duration) {
        let inactive: Vec<SessionId> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.is_inactive(timeout))
                .map(|s| s.id)
                .collect()
        };
        for id in inactive {
            tracing::info!(session_id = %id, "removing inactive session");
            self.remove_session(id).await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn user_count(&self) -> usize {
        self.user_to_session.read().await.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let manager = ConnectionManager::new();
        let id = SessionId::new();

        let _rx = manager.create_session(id).await;
        assert_eq!(manager.session_count().await, 1);

        manager.bind_user(id, 7).await.unwrap();
        assert_eq!(manager.user_count().await, 1);

        manager.remove_session(id).await;
        assert_eq!(manager.session_count().await, 0);
        assert_eq!(manager.user_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_user_binding_rejected() {
        let manager = ConnectionManager::new();
        let first = SessionId::new();
        let second = SessionId::new();
        let _rx1 = manager.create_session(first).await;
        let _rx2 = manager.create_session(second).await;

        manager.bind_user(first, 7).await.unwrap();
        assert!(manager.bind_user(second, 7).await.is_err());
        // Re-binding the same session is idempotent.
        assert!(manager.bind_user(first, 7).await.is_ok());
    }

    #[tokio::test]
    async fn test_room_broadcast_reaches_members_only() {
        let manager = ConnectionManager::new();
        let in_room = SessionId::new();
        let outside = SessionId::new();
        let mut rx_in = manager.create_session(in_room).await;
        let mut rx_out = manager.create_session(outside).await;
        manager.set_room(in_room, Some("R".to_string())).await;

        let delivered = manager
            .send_to_room("R", &ServerMessage::Pong)
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_in.try_recv().is_ok());
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_sessions_dropped_on_broadcast() {
        let manager = ConnectionManager::new();
        let id = SessionId::new();
        let rx = manager.create_session(id).await;
        manager.set_room(id, Some("R".to_string())).await;
        drop(rx);

        let delivered = manager.send_to_room("R", &ServerMessage::Pong).await;
        assert_eq!(delivered, 0);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_user() {
        let manager = ConnectionManager::new();
        let id = SessionId::new();
        let mut rx = manager.create_session(id).await;
        manager.bind_user(id, 7).await.unwrap();

        manager.send_to_user(7, ServerMessage::Pong).await.unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(manager.send_to_user(8, ServerMessage::Pong).await.is_err());
    }
}
