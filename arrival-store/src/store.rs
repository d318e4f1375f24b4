use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Composite dedup key. The same identifier seen in two different
/// aggregation windows is two independent arrivals; entries keyed to a
/// rotated-out epoch go stale on their own and are reclaimed by the
/// sweeper.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct DedupKey {
    pub epoch: u64,
    pub identifier: String,
}

impl DedupKey {
    pub fn new(epoch: u64, identifier: impl Into<String>) -> Self {
        Self {
            epoch,
            identifier: identifier.into(),
        }
    }
}

/// Last-seen table for (epoch, identifier) pairs. Unbounded in
/// principle; the sweep engine keeps it bounded in practice.
#[derive(Debug, Default)]
pub struct DedupStore {
    entries: HashMap<DedupKey, Instant>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Determines novelty and records the sighting in one step: true
    /// only when the key was not present. A repeat sighting re-stamps
    /// the entry, so the dedup window slides with the most recent
    /// arrival rather than the first.
    pub fn check_and_record(&mut self, key: DedupKey, now: Instant) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                *occupied.get_mut() = now;
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    /// Remove entries whose last sighting aged past `window`, stopping
    /// after `max_evictions` removals. Entries beyond the cap are left
    /// for the next sweep. Returns the number removed.
    pub fn sweep_expired(
        &mut self,
        now: Instant,
        window: Duration,
        max_evictions: usize,
    ) -> usize {
        let expired: Vec<DedupKey> = self
            .entries
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) > window)
            .take(max_evictions)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn first_sight_is_new_repeat_is_not() {
        let mut store = DedupStore::new();
        let now = Instant::now();
        assert!(store.check_and_record(DedupKey::new(0, "a"), now));
        assert!(!store.check_and_record(DedupKey::new(0, "a"), now));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn same_identifier_in_new_epoch_is_new_again() {
        let mut store = DedupStore::new();
        let now = Instant::now();
        assert!(store.check_and_record(DedupKey::new(0, "a"), now));
        assert!(store.check_and_record(DedupKey::new(1, "a"), now));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn sweep_removes_aged_entries() {
        let mut store = DedupStore::new();
        let start = Instant::now();
        store.check_and_record(DedupKey::new(0, "old"), start);
        store.check_and_record(DedupKey::new(0, "fresh"), start + WINDOW);
        let removed = store.sweep_expired(start + WINDOW + Duration::from_secs(1), WINDOW, 100);
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        // the survivor is the freshly stamped one
        assert!(!store.check_and_record(DedupKey::new(0, "fresh"), start + WINDOW));
    }

    #[test]
    fn restamp_slides_the_expiry_forward() {
        let mut store = DedupStore::new();
        let start = Instant::now();
        store.check_and_record(DedupKey::new(0, "a"), start);
        // seen again 50s in; window measured from the re-stamp
        store.check_and_record(DedupKey::new(0, "a"), start + Duration::from_secs(50));
        let removed = store.sweep_expired(start + Duration::from_secs(70), WINDOW, 100);
        assert_eq!(removed, 0);
        let removed = store.sweep_expired(start + Duration::from_secs(111), WINDOW, 100);
        assert_eq!(removed, 1);
    }

    #[test]
    fn sweep_honors_the_eviction_cap() {
        let mut store = DedupStore::new();
        let start = Instant::now();
        for i in 0..10 {
            store.check_and_record(DedupKey::new(0, format!("id-{i}")), start);
        }
        let later = start + WINDOW + Duration::from_secs(1);
        assert_eq!(store.sweep_expired(later, WINDOW, 4), 4);
        assert_eq!(store.len(), 6);
        assert_eq!(store.sweep_expired(later, WINDOW, 4), 4);
        assert_eq!(store.sweep_expired(later, WINDOW, 4), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn sweep_with_nothing_expired_is_a_noop() {
        let mut store = DedupStore::new();
        let now = Instant::now();
        store.check_and_record(DedupKey::new(0, "a"), now);
        assert_eq!(store.sweep_expired(now, WINDOW, 100), 0);
        assert_eq!(store.len(), 1);
    }
}
