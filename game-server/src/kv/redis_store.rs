use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::{info, warn};

use super::{KV_IO_TIMEOUT, KvError, KvStore, KvTransaction};

/// Connection attempts back off 1s/2s/4s before giving up.
const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

fn map_err(e: RedisError) -> KvError {
    if e.is_timeout() {
        KvError::Timeout
    } else if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        KvError::Connection(e.to_string())
    } else {
        KvError::Server(e.to_string())
    }
}

async fn with_timeout<T, F>(fut: F) -> Result<T, KvError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match tokio::time::timeout(KV_IO_TIMEOUT, fut).await {
        Ok(result) => result.map_err(map_err),
        Err(_) => Err(KvError::Timeout),
    }
}

/// Redis-backed store. Plain operations go through a multiplexed
/// `ConnectionManager`; each optimistic transaction takes a dedicated
/// connection because WATCH state is per-connection.
pub struct RedisKv {
    client: Client,
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = Client::open(url).map_err(map_err)?;

        let mut delay = CONNECT_BASE_DELAY;
        let mut last_err = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match ConnectionManager::new(client.clone()).await {
                Ok(conn) => {
                    info!(url, attempt, "connected to redis");
                    return Ok(Self { client, conn });
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "redis connection failed");
                    last_err = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_err.map(map_err).unwrap_or(KvError::Timeout))
    }
}

struct RedisTransaction {
    conn: redis::aio::Connection,
    key: String,
    snapshot: Option<String>,
}

#[async_trait]
impl KvTransaction for RedisTransaction {
    fn value(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    async fn commit(
        mut self: Box<Self>,
        new_value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        match ttl {
            Some(ttl) => {
                pipe.cmd("SET")
                    .arg(&self.key)
                    .arg(new_value)
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .ignore();
            }
            None => {
                pipe.cmd("SET").arg(&self.key).arg(new_value).ignore();
            }
        }
        // EXEC answers nil when the watched key changed under us.
        let result: Option<()> = with_timeout(pipe.query_async(&mut self.conn)).await?;
        Ok(result.is_some())
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.set(key, value)).await
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.set_ex(key, value, ttl.as_secs().max(1) as u64)).await
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.del(key)).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.sadd(key, member)).await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.srem(key, member)).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.smembers(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.expire(key, ttl.as_secs().max(1) as i64)).await
    }

    async fn watch(&self, key: &str) -> Result<Box<dyn KvTransaction>, KvError> {
        let mut conn = with_timeout(self.client.get_async_connection()).await?;
        with_timeout(redis::cmd("WATCH").arg(key).query_async::<_, ()>(&mut conn)).await?;
        let snapshot: Option<String> =
            with_timeout(redis::cmd("GET").arg(key).query_async(&mut conn)).await?;
        Ok(Box::new(RedisTransaction {
            conn,
            key: key.to_string(),
            snapshot,
        }))
    }

    async fn health_check(&self) -> Result<(), KvError> {
        let mut delay = CONNECT_BASE_DELAY;
        let mut last_err = KvError::Timeout;
        for attempt in 1..=CONNECT_ATTEMPTS {
            let mut conn = self.conn.clone();
            match with_timeout(redis::cmd("PING").query_async::<_, String>(&mut conn)).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "redis health check failed");
                    last_err = e;
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_err)
    }
}
