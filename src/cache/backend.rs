use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Remote key-value service with per-key expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn ping(&self) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local backend, used for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory cache mutex poisoned"))?;
        let Some(entry) = guard.get(key) else {
            return Ok(None);
        };
        if entry.expires_at <= Instant::now() {
            guard.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory cache mutex poisoned"))?;
        let now = Instant::now();
        guard.retain(|_, entry| entry.expires_at > now);
        guard.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: now + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory cache mutex poisoned"))?;
        guard.remove(key);
        Ok(())
    }
}

/// Backend that is never reachable. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBackend;

#[async_trait]
impl CacheBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn ping(&self) -> Result<()> {
        Err(anyhow!("cache disabled"))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(anyhow!("cache disabled"))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
        Err(anyhow!("cache disabled"))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(anyhow!("cache disabled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_expires_zero_ttl_entries() {
        let backend = MemoryBackend::new();
        backend.set("a", "1", 0).await.expect("set");
        assert_eq!(backend.get("a").await.expect("get"), None);
        backend.set("b", "2", 60).await.expect("set");
        assert_eq!(backend.get("b").await.expect("get").as_deref(), Some("2"));
        backend.delete("b").await.expect("delete");
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn set_sweeps_expired_keys_never_read_again() {
        let backend = MemoryBackend::new();
        backend.set("range:1", "1", 0).await.expect("set");
        backend.set("range:2", "2", 0).await.expect("set");
        backend.set("live", "3", 60).await.expect("set");
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn disabled_backend_always_errors() {
        let backend = DisabledBackend;
        assert!(backend.ping().await.is_err());
        assert!(backend.get("k").await.is_err());
    }
}
