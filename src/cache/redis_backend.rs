use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::backend::CacheBackend;

/// Upper bound on connecting and on each command, so an unreachable server degrades to a miss.
pub const DEFAULT_REDIS_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisBackend {
    client: Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl RedisBackend {
    pub fn open(url: &str) -> Result<Self> {
        let client =
            Client::open(url).with_context(|| format!("invalid redis url: {url}"))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            timeout: DEFAULT_REDIS_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = bounded(self.timeout, "connect", async {
            self.client
                .get_multiplexed_async_connection()
                .await
                .context("failed connecting to redis")
        })
        .await?;
        debug!("opened redis connection");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        *self.conn.lock().await = None;
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        let result = bounded(self.timeout, "command", async {
            op(conn).await.map_err(anyhow::Error::from)
        })
        .await;
        if result.is_err() {
            self.reset().await;
        }
        result
    }
}

async fn bounded<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| anyhow!("redis {what} timed out after {timeout:?}"))?
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn ping(&self) -> Result<()> {
        self.run(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.run(|mut conn| async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(key, value, ttl_secs).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run(|mut conn| async move { conn.del::<_, ()>(key).await })
            .await
    }
}
