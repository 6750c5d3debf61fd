//! Durable TTL-based IP blocklist.
//!
//! Backed by a single JSON object file mapping normalized IP → ISO-8601
//! expiry, read-modify-written on every mutation. Failure policy is
//! asymmetric on purpose: storage reads fail open (a glitch must never keep
//! legitimate users blocked), storage writes report failure (so a blocking
//! instruction is never silently lost).
//!
//! Concurrent mutations of the same IP are last-write-wins; `extend` re-reads
//! the file immediately before writing. No locks are held across I/O.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::ip::{is_loopback, normalize_ip};

/// Default block duration applied by `POST /block`.
pub const DEFAULT_BLOCK_MINUTES: i64 = 10;

/// A currently-active block, as returned by [`BlockStore::list`].
#[derive(Debug, Clone, Serialize)]
pub struct BlockEntry {
    pub ip: String,
    #[serde(rename = "blockedUntil")]
    pub blocked_until: DateTime<Utc>,
}

/// Observer invoked after an IP is newly blocked.
///
/// Hook point for application-level consequences of blocking (the platform
/// cancels the IP's in-flight orders and broadcasts each cancellation); the
/// gate itself stays independent of the orders domain.
pub trait BlockObserver: Send + Sync {
    fn ip_blocked(&self, ip: &str, blocked_until: DateTime<Utc>);
}

/// File-backed block store.
pub struct BlockStore {
    path: PathBuf,
    observers: RwLock<Vec<Arc<dyn BlockObserver>>>,
}

/// Single expiry predicate shared by `is_blocked` and `list`, so the two
/// paths can never diverge on what "expired" means.
fn active_at(blocked_until: &DateTime<Utc>, now: DateTime<Utc>) -> bool {
    *blocked_until > now
}

impl BlockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer for newly-created blocks.
    pub fn add_observer(&self, observer: Arc<dyn BlockObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    /// Block an IP until now + `minutes`. Overwrites any existing entry
    /// outright. Returns false for empty/loopback IPs and on write failure.
    pub fn block(&self, ip: &str, minutes: i64) -> bool {
        let Some(normalized) = self.blockable_target(ip) else {
            return false;
        };

        let blocked_until = Utc::now() + Duration::minutes(minutes);
        let mut list = self.load();
        list.insert(normalized.clone(), blocked_until);
        if !self.persist(&list) {
            return false;
        }

        info!("Blocked {} until {}", normalized, blocked_until);
        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer.ip_blocked(&normalized, blocked_until);
            }
        }
        true
    }

    /// Whether the IP is currently blocked. Loopback is never blocked.
    /// An expired entry is removed (and persisted) before returning false.
    pub fn is_blocked(&self, ip: &str) -> bool {
        let Some(normalized) = self.blockable_target(ip) else {
            return false;
        };

        let mut list = self.load();
        let Some(blocked_until) = list.get(&normalized) else {
            return false;
        };

        if active_at(blocked_until, Utc::now()) {
            return true;
        }

        // Lazy purge of the expired entry.
        list.remove(&normalized);
        self.persist(&list);
        false
    }

    /// Remove a block. Not an error when the entry was absent.
    pub fn unblock(&self, ip: &str) -> bool {
        let normalized = normalize_ip(ip);
        if normalized.is_empty() {
            return false;
        }

        let mut list = self.load();
        list.remove(normalized);
        self.persist(&list)
    }

    /// Extend an existing block by `minutes`, based on whichever is later:
    /// now or the current expiry. Fails when no entry exists — a block that
    /// does not exist cannot be extended.
    pub fn extend(&self, ip: &str, minutes: i64) -> bool {
        let normalized = normalize_ip(ip);
        if normalized.is_empty() || minutes <= 0 {
            return false;
        }

        let mut list = self.load();
        let Some(current) = list.get(normalized).copied() else {
            return false;
        };

        let now = Utc::now();
        let base = if current > now { current } else { now };
        list.insert(normalized.to_string(), base + Duration::minutes(minutes));
        self.persist(&list)
    }

    /// All non-expired entries. Pure read: never mutates the store.
    pub fn list(&self) -> Vec<BlockEntry> {
        let now = Utc::now();
        self.load()
            .into_iter()
            .filter(|(_, until)| active_at(until, now))
            .map(|(ip, blocked_until)| BlockEntry { ip, blocked_until })
            .collect()
    }

    /// Normalize and reject targets that can never be blocked.
    fn blockable_target(&self, ip: &str) -> Option<String> {
        let normalized = normalize_ip(ip);
        if normalized.is_empty() || is_loopback(normalized) {
            return None;
        }
        Some(normalized.to_string())
    }

    /// Read the store file. Any failure yields an empty map: reads fail open.
    fn load(&self) -> HashMap<String, DateTime<Utc>> {
        if !self.path.exists() {
            return HashMap::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(list) => list,
                Err(e) => {
                    warn!("Unreadable blocklist at {:?}: {}", self.path, e);
                    HashMap::new()
                }
            },
            Err(e) => {
                warn!("Failed to read blocklist at {:?}: {}", self.path, e);
                HashMap::new()
            }
        }
    }

    /// Write the store file. Failures are reported to the caller so the
    /// mutating operation can signal it did not take effect.
    fn persist(&self, list: &HashMap<String, DateTime<Utc>>) -> bool {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(dir) {
                    warn!("Failed to create blocklist dir {:?}: {}", dir, e);
                    return false;
                }
            }
        }

        let json = match serde_json::to_string_pretty(list) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize blocklist: {}", e);
                return false;
            }
        };

        match fs::write(&self.path, json) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write blocklist at {:?}: {}", self.path, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn make_store() -> (TempDir, BlockStore) {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::new(dir.path().join("blocked.json"));
        (dir, store)
    }

    fn raw_entry(store_dir: &TempDir, ip: &str) -> Option<DateTime<Utc>> {
        let data = fs::read_to_string(store_dir.path().join("blocked.json")).ok()?;
        let list: HashMap<String, DateTime<Utc>> = serde_json::from_str(&data).unwrap();
        list.get(ip).copied()
    }

    #[test]
    fn test_block_then_is_blocked() {
        let (_dir, store) = make_store();
        assert!(store.block("10.0.0.9", DEFAULT_BLOCK_MINUTES));
        assert!(store.is_blocked("10.0.0.9"));
        assert!(!store.is_blocked("10.0.0.10"));
    }

    #[test]
    fn test_loopback_is_never_blockable() {
        let (dir, store) = make_store();
        assert!(!store.block("127.0.0.1", 10));
        assert!(!store.block("::1", 10));
        assert!(!store.is_blocked("127.0.0.1"));

        // Even a hand-written loopback entry is ignored.
        fs::write(
            dir.path().join("blocked.json"),
            json!({"127.0.0.1": "2099-01-01T00:00:00Z"}).to_string(),
        )
        .unwrap();
        assert!(!store.is_blocked("127.0.0.1"));
    }

    #[test]
    fn test_invalid_targets_rejected() {
        let (_dir, store) = make_store();
        assert!(!store.block("", 10));
        assert!(!store.is_blocked(""));
        assert!(!store.unblock(""));
        assert!(!store.extend("", 10));
    }

    #[test]
    fn test_mapped_ipv6_collapses_to_ipv4() {
        let (_dir, store) = make_store();
        assert!(store.block("::ffff:10.0.0.5", 10));
        assert!(store.is_blocked("10.0.0.5"));
        assert!(store.is_blocked("::ffff:10.0.0.5"));
    }

    #[test]
    fn test_expired_entry_is_lazily_purged() {
        let (dir, store) = make_store();
        fs::write(
            dir.path().join("blocked.json"),
            json!({"10.0.0.9": "2020-01-01T00:00:00Z"}).to_string(),
        )
        .unwrap();

        assert!(!store.is_blocked("10.0.0.9"));
        // The expired entry was removed and the removal persisted.
        assert!(raw_entry(&dir, "10.0.0.9").is_none());
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_list_filters_without_mutating() {
        let (dir, store) = make_store();
        fs::write(
            dir.path().join("blocked.json"),
            json!({
                "10.0.0.9": "2020-01-01T00:00:00Z",
                "10.0.0.10": "2099-01-01T00:00:00Z",
            })
            .to_string(),
        )
        .unwrap();

        let entries = store.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ip, "10.0.0.10");

        // The expired entry survives in the file: listing is a pure read.
        assert!(raw_entry(&dir, "10.0.0.9").is_some());
    }

    #[test]
    fn test_extend_adds_to_current_expiry() {
        let (dir, store) = make_store();
        assert!(store.block("10.0.0.9", 10));
        let before = raw_entry(&dir, "10.0.0.9").unwrap();

        assert!(store.extend("10.0.0.9", 5));
        let after = raw_entry(&dir, "10.0.0.9").unwrap();
        // Expiry is in the future, so the base is the expiry, not now.
        assert_eq!(after, before + Duration::minutes(5));
    }

    #[test]
    fn test_extend_requires_existing_entry() {
        let (dir, store) = make_store();
        assert!(!store.extend("10.0.0.42", 5));
        assert!(raw_entry(&dir, "10.0.0.42").is_none());
    }

    #[test]
    fn test_extend_rejects_non_positive_minutes() {
        let (_dir, store) = make_store();
        assert!(store.block("10.0.0.9", 10));
        assert!(!store.extend("10.0.0.9", 0));
        assert!(!store.extend("10.0.0.9", -5));
    }

    #[test]
    fn test_unblock_is_idempotent() {
        let (_dir, store) = make_store();
        assert!(store.block("10.0.0.9", 10));
        assert!(store.unblock("10.0.0.9"));
        assert!(!store.is_blocked("10.0.0.9"));
        assert!(store.list().is_empty());

        // Absent entry: no error, store unchanged.
        assert!(store.unblock("10.0.0.9"));
    }

    #[test]
    fn test_reblock_overwrites_instead_of_stacking() {
        let (dir, store) = make_store();
        assert!(store.block("10.0.0.9", 60));
        let first = raw_entry(&dir, "10.0.0.9").unwrap();

        assert!(store.block("10.0.0.9", 10));
        let second = raw_entry(&dir, "10.0.0.9").unwrap();
        // The second call replaces the expiry outright (shorter, not added).
        assert!(second < first);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_corrupt_file_fails_open() {
        let (dir, store) = make_store();
        fs::write(dir.path().join("blocked.json"), "{not json").unwrap();
        assert!(!store.is_blocked("10.0.0.9"));
        assert!(store.list().is_empty());
        // Mutations still work, replacing the corrupt file.
        assert!(store.block("10.0.0.9", 10));
        assert!(store.is_blocked("10.0.0.9"));
    }

    struct RecordingObserver {
        seen: Mutex<Vec<String>>,
    }

    impl BlockObserver for RecordingObserver {
        fn ip_blocked(&self, ip: &str, _blocked_until: DateTime<Utc>) {
            self.seen.lock().unwrap().push(ip.to_string());
        }
    }

    #[test]
    fn test_observer_fires_with_normalized_ip() {
        let (_dir, store) = make_store();
        let observer = Arc::new(RecordingObserver {
            seen: Mutex::new(Vec::new()),
        });
        store.add_observer(observer.clone());

        assert!(store.block("::ffff:10.0.0.7", 10));
        assert_eq!(*observer.seen.lock().unwrap(), vec!["10.0.0.7".to_string()]);

        // Rejected blocks never reach observers.
        assert!(!store.block("127.0.0.1", 10));
        assert_eq!(observer.seen.lock().unwrap().len(), 1);
    }
}
