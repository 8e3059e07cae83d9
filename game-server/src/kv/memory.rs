use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{KvError, KvStore, KvTransaction};

#[derive(Debug, Clone)]
struct VersionedValue {
    value: String,
    version: u64,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct MemoryState {
    strings: HashMap<String, VersionedValue>,
    sets: HashMap<String, HashSet<String>>,
    next_version: u64,
}

impl MemoryState {
    fn live_value(&mut self, key: &str) -> Option<&VersionedValue> {
        let expired = match self.strings.get(key) {
            Some(entry) => entry
                .expires_at
                .is_some_and(|expires_at| Instant::now() >= expires_at),
            None => return None,
        };
        if expired {
            self.strings.remove(key);
            return None;
        }
        self.strings.get(key)
    }
}

/// In-process store with compare-and-swap watch semantics. Backs tests and
/// single-node dev runs where no Redis is configured.
#[derive(Clone, Default)]
pub struct MemoryKv {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    key: String,
    snapshot: Option<String>,
    /// Version seen under watch; None when the key was absent.
    watched_version: Option<u64>,
}

#[async_trait]
impl KvTransaction for MemoryTransaction {
    fn value(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    async fn commit(
        self: Box<Self>,
        new_value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let mut state = self.state.lock().await;
        let current_version = state.live_value(&self.key).map(|v| v.version);
        if current_version != self.watched_version {
            return Ok(false);
        }
        state.next_version += 1;
        let version = state.next_version;
        state.strings.insert(
            self.key.clone(),
            VersionedValue {
                value: new_value.to_string(),
                version,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(true)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut state = self.state.lock().await;
        Ok(state.live_value(key).map(|v| v.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        state.next_version += 1;
        let version = state.next_version;
        state.strings.insert(
            key.to_string(),
            VersionedValue {
                value: value.to_string(),
                version,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        state.next_version += 1;
        let version = state.next_version;
        state.strings.insert(
            key.to_string(),
            VersionedValue {
                value: value.to_string(),
                version,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        state.strings.remove(key);
        state.sets.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        let emptied = match state.sets.get_mut(key) {
            Some(set) => {
                set.remove(member);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            state.sets.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.strings.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn watch(&self, key: &str) -> Result<Box<dyn KvTransaction>, KvError> {
        let mut state = self.state.lock().await;
        let entry = state.live_value(key);
        let snapshot = entry.map(|v| v.value.clone());
        let watched_version = entry.map(|v| v.version);
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            key: key.to_string(),
            snapshot,
            watched_version,
        }))
    }

    async fn health_check(&self) -> Result<(), KvError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_del() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get("k").await.unwrap(), None);

        kv.set("k", "v").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));

        kv.del("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_setex_expires() {
        let kv = MemoryKv::new();
        kv.setex("k", "v", Duration::from_millis(20)).await.unwrap();
        assert!(kv.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sets() {
        let kv = MemoryKv::new();
        kv.sadd("s", "a").await.unwrap();
        kv.sadd("s", "b").await.unwrap();
        kv.sadd("s", "a").await.unwrap();

        let mut members = kv.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        kv.srem("s", "a").await.unwrap();
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_transaction_commits_when_unchanged() {
        let kv = MemoryKv::new();
        kv.set("k", "old").await.unwrap();

        let tx = kv.watch("k").await.unwrap();
        assert_eq!(tx.value(), Some("old"));
        assert!(tx.commit("new", None).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_transaction_detects_collision() {
        let kv = MemoryKv::new();
        kv.set("k", "old").await.unwrap();

        let loser = kv.watch("k").await.unwrap();
        let winner = kv.watch("k").await.unwrap();

        assert!(winner.commit("w", None).await.unwrap());
        assert!(!loser.commit("l", None).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), Some("w".to_string()));
    }

    #[tokio::test]
    async fn test_transaction_on_absent_key() {
        let kv = MemoryKv::new();

        let tx = kv.watch("fresh").await.unwrap();
        assert_eq!(tx.value(), None);
        assert!(tx.commit("created", None).await.unwrap());

        // Creation races: the second creator must lose.
        let t1 = kv.watch("other").await.unwrap();
        let t2 = kv.watch("other").await.unwrap();
        assert!(t1.commit("first", None).await.unwrap());
        assert!(!t2.commit("second", None).await.unwrap());
    }
}
