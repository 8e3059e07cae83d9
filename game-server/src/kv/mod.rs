use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryKv;
pub use redis_store::RedisKv;

/// Every KV operation must answer within this window.
pub const KV_IO_TIMEOUT: Duration = Duration::from_secs(5);
/// Optimistic transactions retry this many times before giving up.
pub const TX_MAX_RETRIES: usize = 3;
/// Backoff between transaction retries, indexed by attempt.
pub const TX_BACKOFF_MS: [u64; 3] = [10, 20, 30];

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv connection error: {0}")]
    Connection(String),
    #[error("kv operation timed out")]
    Timeout,
    #[error("kv server error: {0}")]
    Server(String),
}

/// One optimistic transaction: the key was read under watch, and `commit`
/// succeeds only if nobody else wrote the key in between. Dropping the
/// transaction abandons the watch.
#[async_trait]
pub trait KvTransaction: Send {
    /// Snapshot taken when the watch was placed.
    fn value(&self) -> Option<&str>;

    /// Write the new value iff the key is untouched since `value()` was
    /// read. Returns false on a write collision.
    async fn commit(
        self: Box<Self>,
        new_value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError>;
}

/// Typed access to the shared key/value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;
    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;
    async fn watch(&self, key: &str) -> Result<Box<dyn KvTransaction>, KvError>;
    async fn health_check(&self) -> Result<(), KvError>;
}
