//! Key-value cache for rendered images and calibration data.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::TransportResult;

/// Key-value store shared with the hub's consumers.
///
/// A `ttl` of `None` means the entry never expires.
pub trait KeyValueCache: Send + Sync {
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> TransportResult<()>;

    fn get(&self, key: &str) -> TransportResult<Option<Vec<u8>>>;

    fn exists(&self, key: &str) -> TransportResult<bool>;

    fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> TransportResult<()> {
        self.set(key, value.as_bytes(), ttl)
    }
}

/// Redis-backed cache.
///
/// The connection is opened on first use and reopened after a failure.
pub struct RedisCache {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
}

impl RedisCache {
    /// Create a cache for a `redis://` URL without connecting.
    pub fn open(url: &str) -> TransportResult<Self> {
        let client = redis::Client::open(url)?;
        info!(url = %url, "Redis cache configured");
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> TransportResult<T> {
        let mut guard = self.connection.lock();
        let mut connection = match guard.take() {
            Some(connection) => connection,
            None => {
                debug!("Opening Redis connection");
                self.client.get_connection()?
            }
        };

        let result = f(&mut connection);
        match &result {
            Err(e) if e.is_io_error() || e.is_connection_dropped() => {}
            _ => *guard = Some(connection),
        }
        result.map_err(Into::into)
    }
}

impl KeyValueCache for RedisCache {
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> TransportResult<()> {
        self.with_connection(|connection| {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
            }
            cmd.query::<()>(connection)
        })
    }

    fn get(&self, key: &str) -> TransportResult<Option<Vec<u8>>> {
        self.with_connection(|connection| redis::cmd("GET").arg(key).query(connection))
    }

    fn exists(&self, key: &str) -> TransportResult<bool> {
        self.with_connection(|connection| redis::cmd("EXISTS").arg(key).query(connection))
    }
}

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process cache with the same expiry semantics as Redis.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remaining lifetime of a key, `None` if it never expires or is absent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

impl KeyValueCache for MemoryCache {
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> TransportResult<()> {
        let entry = MemoryEntry {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    fn get(&self, key: &str) -> TransportResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn exists(&self, key: &str) -> TransportResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_cache_roundtrip() {
        let cache = MemoryCache::new();
        assert!(!cache.exists("a").unwrap());

        cache.set("a", b"hello", None).unwrap();
        assert!(cache.exists("a").unwrap());
        assert_eq!(cache.get("a").unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(cache.ttl("a"), None);

        cache.set_string("b", "[1,2]", Some(Duration::from_secs(30))).unwrap();
        assert_eq!(cache.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(cache.ttl("b").unwrap() <= Duration::from_secs(30));
    }

    #[test]
    fn test_memory_cache_expiry() {
        let cache = MemoryCache::new();
        cache.set("short", b"x", Some(Duration::from_millis(10))).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert!(!cache.exists("short").unwrap());
        assert_eq!(cache.get("short").unwrap(), None);
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_redis_cache_rejects_bad_url() {
        assert!(RedisCache::open("not-a-redis-url").is_err());
    }

    #[test]
    fn test_redis_cache_unreachable_server_is_an_error() {
        let cache = RedisCache::open("redis://127.0.0.1:1/").unwrap();
        assert!(cache.set("k", b"v", None).is_err());
        assert!(cache.exists("k").is_err());
    }
}
