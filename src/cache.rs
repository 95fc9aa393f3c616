//! Change-broadcast cache: a keyed snapshot with a deep-equality gate on
//! updates. Two independent instances are kept at the application level —
//! one feeding the websocket listeners, one feeding MQTT.

use crate::models::CacheValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type OnChange = Arc<dyn Fn(&str, &CacheValue) + Send + Sync>;

pub struct Cache {
    name: &'static str,
    map: Mutex<HashMap<String, CacheValue>>,
    on_change: OnChange,
}

impl Cache {
    pub fn new(name: &'static str, on_change: OnChange) -> Cache {
        Cache { name, map: Mutex::new(HashMap::new()), on_change }
    }

    /// Lock-protected snapshot of a single key.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        self.map.lock().unwrap().get(key).cloned()
    }

    /// Deep-compare to the existing value; store and fire a change event iff
    /// unequal. Structural equality, not reference identity — nested
    /// records and fixed-length arrays are covered by `CacheValue`'s
    /// derived `PartialEq`.
    pub fn update(&self, key: impl Into<String>, value: CacheValue) {
        let key = key.into();
        let changed = {
            let mut map = self.map.lock().unwrap();
            match map.get(&key) {
                Some(existing) if *existing == value => false,
                _ => {
                    map.insert(key.clone(), value.clone());
                    true
                }
            }
        };
        if changed {
            log::trace!("{} cache updated: {key}", self.name);
            (self.on_change)(&key, &value);
        }
    }

    pub fn clear(&self) {
        self.map.lock().unwrap().clear();
    }

    /// A fresh copy of the whole map, used at websocket attach time to seed
    /// new subscribers.
    pub fn dump(&self) -> HashMap<String, CacheValue> {
        self.map.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_cache() -> (Cache, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let cache = Cache::new("test", Arc::new(move |_k: &str, _v: &CacheValue| {
            inner.fetch_add(1, Ordering::SeqCst);
        }));
        (cache, count)
    }

    #[test]
    fn dedup_fires_once() {
        let (cache, count) = counting_cache();
        cache.update("k", CacheValue::Scalar(5.into()));
        cache.update("k", CacheValue::Scalar(5.into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("k"), Some(CacheValue::Scalar(5.into())));
    }

    #[test]
    fn changed_value_fires_again() {
        let (cache, count) = counting_cache();
        cache.update("k", CacheValue::Scalar(5.into()));
        cache.update("k", CacheValue::Scalar(6.into()));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("k"), Some(CacheValue::Scalar(6.into())));
    }

    #[test]
    fn clear_empties_the_map() {
        let (cache, _count) = counting_cache();
        cache.update("k", CacheValue::Scalar(1.into()));
        cache.clear();
        assert_eq!(cache.get("k"), None);
        assert!(cache.dump().is_empty());
    }

    #[test]
    fn dump_is_a_snapshot_copy() {
        let (cache, _count) = counting_cache();
        cache.update("a", CacheValue::Scalar(1.into()));
        let snapshot = cache.dump();
        cache.update("a", CacheValue::Scalar(2.into()));
        assert_eq!(snapshot.get("a"), Some(&CacheValue::Scalar(1.into())));
        assert_eq!(cache.get("a"), Some(CacheValue::Scalar(2.into())));
    }
}
