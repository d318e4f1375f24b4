use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use core_types::config::EngineConfig;
use core_types::types::ArrivalOutcome;
use parking_lot::{Mutex, RwLock};

use crate::store::{DedupKey, DedupStore};

/// One closed aggregation window: the epoch that just ended and the
/// number of distinct identifiers first seen during it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFlush {
    pub epoch: u64,
    pub unique: u64,
}

/// Process-wide arrival state. The store, the window epoch, and the
/// unique counter live behind one controller so lock scope stays
/// auditable; the three workers each hold an `Arc` to it.
pub struct ArrivalController {
    store: Mutex<DedupStore>,
    // Shared at ingest, exclusive at rotation. An ingest call holds the
    // read guard across key composition, check_and_record, and the
    // counter bump, so rotation never observes a half-applied arrival.
    epoch: RwLock<u64>,
    unique: AtomicU64,
    dedup_window: Duration,
    max_evictions_per_sweep: usize,
}

impl ArrivalController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            store: Mutex::new(DedupStore::new()),
            epoch: RwLock::new(0),
            unique: AtomicU64::new(0),
            dedup_window: config.dedup_window(),
            max_evictions_per_sweep: config.max_evictions_per_sweep,
        }
    }

    /// Classify one arrival against the current window and commit its
    /// sighting. The store lock is released before this returns; any
    /// downstream notification happens outside it.
    pub fn record_arrival(&self, identifier: &str) -> ArrivalOutcome {
        self.record_arrival_at(identifier, Instant::now())
    }

    pub fn record_arrival_at(&self, identifier: &str, now: Instant) -> ArrivalOutcome {
        let epoch = self.epoch.read();
        let key = DedupKey::new(*epoch, identifier);
        let newly_unique = self.store.lock().check_and_record(key, now);
        if newly_unique {
            self.unique.fetch_add(1, Ordering::Relaxed);
            ArrivalOutcome::Unique
        } else {
            ArrivalOutcome::Duplicate
        }
    }

    /// Close the current window: advance the epoch, then capture and
    /// zero the counter, all under the exclusive epoch guard. The epoch
    /// moves first so an arrival admitted after rotation keys against
    /// the new window before the reset becomes visible to it.
    pub fn rotate_window(&self) -> WindowFlush {
        let mut epoch = self.epoch.write();
        let closed = *epoch;
        *epoch += 1;
        let unique = self.unique.swap(0, Ordering::AcqRel);
        WindowFlush {
            epoch: closed,
            unique,
        }
    }

    /// One bounded eviction pass; returns the number of entries
    /// reclaimed. Never fails.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        self.store
            .lock()
            .sweep_expired(now, self.dedup_window, self.max_evictions_per_sweep)
    }

    /// Running count of uniques in the open window.
    pub fn unique_count(&self) -> u64 {
        self.unique.load(Ordering::Relaxed)
    }

    pub fn current_epoch(&self) -> u64 {
        *self.epoch.read()
    }

    pub fn live_entries(&self) -> usize {
        self.store.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn controller(dedup_window_s: u64, max_evictions: usize) -> ArrivalController {
        ArrivalController::new(&EngineConfig {
            dedup_window_s,
            sweep_interval_s: 1,
            aggregation_window_s: 1,
            max_evictions_per_sweep: max_evictions,
        })
    }

    #[test]
    fn counts_each_identifier_once_per_window() {
        let ctl = controller(60, 10_000);
        let now = Instant::now();
        assert_eq!(ctl.record_arrival_at("a", now), ArrivalOutcome::Unique);
        assert_eq!(ctl.record_arrival_at("a", now), ArrivalOutcome::Duplicate);
        assert_eq!(ctl.record_arrival_at("b", now), ArrivalOutcome::Unique);
        assert_eq!(ctl.record_arrival_at("a", now), ArrivalOutcome::Duplicate);
        assert_eq!(ctl.unique_count(), 2);
    }

    #[test]
    fn rotation_captures_and_zeroes_the_counter() {
        let ctl = controller(60, 10_000);
        let now = Instant::now();
        ctl.record_arrival_at("a", now);
        ctl.record_arrival_at("b", now);
        let flush = ctl.rotate_window();
        assert_eq!(flush, WindowFlush { epoch: 0, unique: 2 });
        assert_eq!(ctl.unique_count(), 0);
        assert_eq!(ctl.current_epoch(), 1);
        // same identifier counts again in the new window
        assert_eq!(ctl.record_arrival_at("a", now), ArrivalOutcome::Unique);
        let flush = ctl.rotate_window();
        assert_eq!(flush, WindowFlush { epoch: 1, unique: 1 });
    }

    #[test]
    fn eviction_makes_an_identifier_unique_again_within_one_epoch() {
        let ctl = controller(1, 10_000);
        let start = Instant::now();
        assert_eq!(ctl.record_arrival_at("a", start), ArrivalOutcome::Unique);
        // aged past the 1s dedup window with no epoch rotation
        let later = start + Duration::from_secs(2);
        assert_eq!(ctl.sweep_expired_at(later), 1);
        assert_eq!(ctl.record_arrival_at("a", later), ArrivalOutcome::Unique);
        assert_eq!(ctl.unique_count(), 2);
        assert_eq!(ctl.live_entries(), 1);
    }

    #[test]
    fn orphaned_epochs_are_reclaimed_by_the_sweeper() {
        let ctl = controller(1, 10_000);
        let start = Instant::now();
        ctl.record_arrival_at("a", start);
        ctl.rotate_window();
        ctl.record_arrival_at("a", start);
        assert_eq!(ctl.live_entries(), 2);
        assert_eq!(ctl.sweep_expired_at(start + Duration::from_secs(2)), 2);
        assert_eq!(ctl.live_entries(), 0);
    }

    #[test]
    fn sweep_cap_spreads_reclamation_across_passes() {
        let ctl = controller(1, 3);
        let start = Instant::now();
        for i in 0..8 {
            ctl.record_arrival_at(&format!("id-{i}"), start);
        }
        let later = start + Duration::from_secs(2);
        assert_eq!(ctl.sweep_expired_at(later), 3);
        assert_eq!(ctl.sweep_expired_at(later), 3);
        assert_eq!(ctl.sweep_expired_at(later), 2);
        assert_eq!(ctl.sweep_expired_at(later), 0);
    }

    #[test]
    fn flush_scenario_from_the_wire() {
        // window = 1s: A,A,B,A then flush -> 2; idle 2s, sweep, one
        // more A -> 1 with a single live entry.
        let ctl = controller(1, 10_000);
        let start = Instant::now();
        for id in ["A", "A", "B", "A"] {
            ctl.record_arrival_at(id, start);
        }
        assert_eq!(ctl.rotate_window().unique, 2);
        let later = start + Duration::from_secs(2);
        ctl.sweep_expired_at(later);
        assert_eq!(ctl.record_arrival_at("A", later), ArrivalOutcome::Unique);
        assert_eq!(ctl.rotate_window().unique, 1);
        assert_eq!(ctl.live_entries(), 1);
    }

    #[test]
    fn concurrent_arrivals_of_one_identifier_yield_one_unique() {
        let ctl = Arc::new(controller(60, 10_000));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ctl = Arc::clone(&ctl);
            handles.push(thread::spawn(move || {
                (0..100)
                    .filter(|_| ctl.record_arrival("contended").is_unique())
                    .count()
            }));
        }
        let uniques: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(uniques, 1);
        assert_eq!(ctl.unique_count(), 1);
    }

    #[test]
    fn rotation_racing_ingest_attributes_each_arrival_to_one_window() {
        // Arrivals racing rotate_window land wholly before or wholly
        // after it; the totals across both windows always add up.
        let ctl = Arc::new(controller(60, 10_000));
        let writers: Vec<_> = (0..4)
            .map(|worker| {
                let ctl = Arc::clone(&ctl);
                thread::spawn(move || {
                    for i in 0..500 {
                        ctl.record_arrival(&format!("w{worker}-{i}"));
                    }
                })
            })
            .collect();
        let rotator = {
            let ctl = Arc::clone(&ctl);
            thread::spawn(move || {
                let mut flushed = 0u64;
                for _ in 0..50 {
                    flushed += ctl.rotate_window().unique;
                    thread::yield_now();
                }
                flushed
            })
        };
        for handle in writers {
            handle.join().unwrap();
        }
        let flushed = rotator.join().unwrap();
        assert_eq!(flushed + ctl.rotate_window().unique, 2_000);
    }
}
