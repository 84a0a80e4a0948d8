pub mod backend;
pub mod redis_backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::backend::{CacheBackend, DisabledBackend, MemoryBackend};
use crate::error::IndexError;

pub const ONE_DAY_SECS: u64 = 86_400;
pub const THIRTY_DAYS_SECS: u64 = ONE_DAY_SECS * 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheErrorKind {
    Unavailable,
    Decode,
}

/// Outcome of a cache read. `Error` is informational only; callers treat it as a miss.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead<T> {
    Found(T),
    Empty,
    Error(CacheErrorKind),
}

impl<T> CacheRead<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Empty | Self::Error(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheRead<U> {
        match self {
            Self::Found(value) => CacheRead::Found(f(value)),
            Self::Empty => CacheRead::Empty,
            Self::Error(kind) => CacheRead::Error(kind),
        }
    }
}

/// A value read back without a target type: JSON when it parses, otherwise the raw string.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Json(Value),
    Raw(String),
}

pub fn date_key(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}:{}", date.format("%Y-%m-%d"))
}

pub fn range_key(prefix: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{prefix}:{}:{}",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    )
}

/// Best-effort accelerator in front of the persistent store.
///
/// Connectivity is proven lazily with a ping and remembered; a failing call clears the
/// flag so the next call re-verifies. No method returns an error.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    connected: AtomicBool,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            connected: AtomicBool::new(false),
        }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledBackend))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn ensure_connected(&self) -> bool {
        if self.connected.load(Ordering::Relaxed) {
            return true;
        }
        match self.backend.ping().await {
            Ok(()) => {
                self.connected.store(true, Ordering::Relaxed);
                true
            }
            Err(err) => {
                debug!(backend = self.backend.name(), "cache unreachable: {err}");
                false
            }
        }
    }

    fn degrade(&self, op: &str, key: &str, err: anyhow::Error) {
        self.connected.store(false, Ordering::Relaxed);
        let err = IndexError::CacheUnavailable(err.to_string());
        warn!(backend = self.backend.name(), key, "cache {op} failed: {err}");
    }

    /// Raw read: the stored string, never JSON-decoded.
    pub async fn get_raw(&self, key: &str) -> CacheRead<String> {
        if !self.ensure_connected().await {
            return CacheRead::Error(CacheErrorKind::Unavailable);
        }
        match self.backend.get(key).await {
            Ok(Some(value)) if !value.is_empty() => CacheRead::Found(value),
            Ok(_) => CacheRead::Empty,
            Err(err) => {
                self.degrade("get", key, err);
                CacheRead::Error(CacheErrorKind::Unavailable)
            }
        }
    }

    pub async fn get(&self, key: &str) -> CacheRead<CachedValue> {
        self.get_raw(key).await.map(|raw| {
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => CachedValue::Json(value),
                Err(_) => CachedValue::Raw(raw),
            }
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheRead<T> {
        match self.get_raw(key).await {
            CacheRead::Found(raw) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => CacheRead::Found(value),
                Err(err) => {
                    debug!(key, "discarding undecodable cache entry: {err}");
                    CacheRead::Error(CacheErrorKind::Decode)
                }
            },
            CacheRead::Empty => CacheRead::Empty,
            CacheRead::Error(kind) => CacheRead::Error(kind),
        }
    }

    /// Reads a number stored in raw mode. Anything unparsable counts as a miss.
    pub async fn get_f64(&self, key: &str) -> CacheRead<f64> {
        match self.get_raw(key).await {
            CacheRead::Found(raw) => match raw.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => CacheRead::Found(value),
                _ => CacheRead::Error(CacheErrorKind::Decode),
            },
            CacheRead::Empty => CacheRead::Empty,
            CacheRead::Error(kind) => CacheRead::Error(kind),
        }
    }

    pub async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        if !self.ensure_connected().await {
            return false;
        }
        match self.backend.set(key, value, ttl_secs).await {
            Ok(()) => true,
            Err(err) => {
                self.degrade("set", key, err);
                false
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        match serde_json::to_string(value) {
            Ok(encoded) => self.set_raw(key, &encoded, ttl_secs).await,
            Err(err) => {
                warn!(key, "failed encoding cache value: {err}");
                false
            }
        }
    }

    pub async fn set_f64(&self, key: &str, value: f64, ttl_secs: u64) -> bool {
        self.set_raw(key, &value.to_string(), ttl_secs).await
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.ensure_connected().await {
            return false;
        }
        match self.backend.delete(key).await {
            Ok(()) => true,
            Err(err) => {
                self.degrade("delete", key, err);
                false
            }
        }
    }
}
