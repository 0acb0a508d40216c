//! last-known-good discovery cache and per-realm site-name records
//!
//! Both stores sit on a generic TTL key-value backend. Discovery payloads
//! are the raw netlogon response bytes of the last accepted probe, written
//! with a fresh 15-minute expiry; site-name records have no expiry and live
//! until overwritten. Keys are the upper-cased realm name, so the flat and
//! DNS forms of one realm occupy separate keys.
//!
//! A missing or unreachable backend is always treated as a cache miss:
//! discovery falls through to the network, never to an error.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Local};

/// Time source, injectable so expiry is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// The backing-store contract: a TTL key-value store with atomic per-key
/// operations.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn put(&self, key: &str, value: &[u8], expires: Option<DateTime<Local>>);
    fn delete(&self, key: &str);
}

struct StoredValue {
    value: Vec<u8>,
    expires: Option<DateTime<Local>>,
}

/// Process-lifetime in-memory store.
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, StoredValue>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKvStore {
    pub fn new() -> MemoryKvStore {
        MemoryKvStore::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> MemoryKvStore {
        MemoryKvStore {
            entries: RwLock::new(BTreeMap::new()),
            clock,
        }
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().ok()?;
        let stored = entries.get(key)?;

        if let Some(expires) = stored.expires {
            if expires < self.clock.now() {
                return None;
            }
        }

        Some(stored.value.clone())
    }

    fn put(&self, key: &str, value: &[u8], expires: Option<DateTime<Local>>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key.to_string(),
                StoredValue {
                    value: value.to_vec(),
                    expires,
                },
            );
        }
    }

    fn delete(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }
}

/// How long a discovery payload stays fresh.
pub fn discovery_ttl() -> Duration {
    Duration::minutes(15)
}

const DOMAIN_KEY_PREFIX: &str = "DCLOCATOR/DOMAIN/";
const SITENAME_KEY_PREFIX: &str = "DCLOCATOR/SITENAME/";

/// Serialized last-known-good discovery results, keyed by realm.
pub struct DiscoveryCache {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl DiscoveryCache {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> DiscoveryCache {
        DiscoveryCache { store, clock }
    }

    fn key(domain: &str) -> String {
        format!("{}{}", DOMAIN_KEY_PREFIX, domain.to_uppercase())
    }

    pub fn get(&self, domain: &str) -> Option<Vec<u8>> {
        self.store.get(&DiscoveryCache::key(domain))
    }

    pub fn put(&self, domain: &str, payload: &[u8]) {
        let expires = self.clock.now() + discovery_ttl();
        self.store
            .put(&DiscoveryCache::key(domain), payload, Some(expires));
        log::debug!("cached discovery result for {}", domain);
    }

    /// Corruption defense: drop an entry whose payload no longer decodes.
    pub fn delete(&self, domain: &str) {
        self.store.delete(&DiscoveryCache::key(domain));
    }
}

/// Per-realm client site affinity, stored until overwritten.
pub struct SiteNameCache {
    store: Arc<dyn KvStore>,
}

impl SiteNameCache {
    pub fn new(store: Arc<dyn KvStore>) -> SiteNameCache {
        SiteNameCache { store }
    }

    fn key(domain: &str) -> String {
        format!("{}{}", SITENAME_KEY_PREFIX, domain.to_uppercase())
    }

    pub fn get(&self, domain: &str) -> Option<String> {
        let bytes = self.store.get(&SiteNameCache::key(domain))?;
        String::from_utf8(bytes).ok().filter(|s| !s.is_empty())
    }

    pub fn put(&self, domain: &str, site: &str) {
        self.store
            .put(&SiteNameCache::key(domain), site.as_bytes(), None);
    }

    pub fn delete(&self, domain: &str) {
        self.store.delete(&SiteNameCache::key(domain));
    }
}

#[cfg(test)]
pub mod tests {

    use super::*;
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    pub struct ManualClock {
        now: Mutex<DateTime<Local>>,
    }

    impl ManualClock {
        pub fn new() -> ManualClock {
            ManualClock {
                now: Mutex::new(Local::now()),
            }
        }

        pub fn advance(&self, delta: Duration) {
            let mut now = self.now.lock().unwrap();
            *now = *now + delta;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Local> {
            *self.now.lock().unwrap()
        }
    }

    #[test]
    fn test_discovery_roundtrip_is_byte_identical() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let cache = DiscoveryCache::new(store, clock);

        let payload = vec![0x17, 0x00, 0xFF, 0x80, 0x00, 0x01];
        cache.put("example.com", &payload);

        assert_eq!(Some(payload), cache.get("example.com"));
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let cache = DiscoveryCache::new(store, clock);

        cache.put("Example.Com", b"payload");
        assert_eq!(Some(b"payload".to_vec()), cache.get("EXAMPLE.COM"));
        assert_eq!(Some(b"payload".to_vec()), cache.get("example.com"));
        assert_eq!(None, cache.get("other.com"));
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let cache = DiscoveryCache::new(store, clock.clone());

        cache.put("example.com", b"payload");
        clock.advance(Duration::minutes(14));
        assert!(cache.get("example.com").is_some());

        clock.advance(Duration::minutes(2));
        assert_eq!(None, cache.get("example.com"));
    }

    #[test]
    fn test_put_refreshes_expiry() {
        let clock = Arc::new(ManualClock::new());
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let cache = DiscoveryCache::new(store, clock.clone());

        cache.put("example.com", b"one");
        clock.advance(Duration::minutes(10));
        cache.put("example.com", b"two");
        clock.advance(Duration::minutes(10));

        // rewritten 10 minutes ago, still fresh
        assert_eq!(Some(b"two".to_vec()), cache.get("example.com"));
    }

    #[test]
    fn test_delete_removes_entry() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let cache = DiscoveryCache::new(store, clock);

        cache.put("example.com", b"payload");
        cache.delete("example.com");
        assert_eq!(None, cache.get("example.com"));
    }

    #[test]
    fn test_site_names_do_not_expire() {
        let clock = Arc::new(ManualClock::new());
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let sites = SiteNameCache::new(store);

        sites.put("EXAMPLE", "Branch-Site");
        clock.advance(Duration::days(30));

        assert_eq!(Some("Branch-Site".to_string()), sites.get("example"));
    }

    #[test]
    fn test_unavailable_store_reads_as_miss() {
        struct DeadStore;

        impl KvStore for DeadStore {
            fn get(&self, _key: &str) -> Option<Vec<u8>> {
                None
            }
            fn put(&self, _key: &str, _value: &[u8], _expires: Option<DateTime<Local>>) {}
            fn delete(&self, _key: &str) {}
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = DiscoveryCache::new(Arc::new(DeadStore), clock);

        cache.put("example.com", b"payload");
        assert_eq!(None, cache.get("example.com"));
    }
}
