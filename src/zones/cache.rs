//! Snapshot cache for zone reference data.
//!
//! ## Design
//!
//! - One immutable `ZoneSnapshot` (a `HashMap<i64, Arc<ZoneLookup>>`) is shared
//!   behind a `parking_lot::RwLock<Arc<_>>`; the write lock is only held for the
//!   pointer swap, never while querying the source
//! - Each snapshot is bounded by an approximate cost budget; entries past the
//!   budget are left out, so a lookup may miss even though the row exists
//! - A `watch` channel flips to `true` after the first successful load, which is
//!   what `wait_ready` blocks on

use super::{ZoneLoadError, ZoneLookup, ZoneSource};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Default budget, roughly 1 MiB of zone attributes.
pub const DEFAULT_MAX_COST: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct ZoneSnapshot {
    zones: HashMap<i64, Arc<ZoneLookup>>,
    cost: usize,
    loaded_at: Option<DateTime<Utc>>,
}

/// Outcome of a (re)load, mostly for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped_placeholder: usize,
    pub skipped_over_budget: usize,
    pub cost: usize,
    pub duration: Duration,
}

struct Inner {
    snapshot: RwLock<Arc<ZoneSnapshot>>,
    ready: watch::Sender<bool>,
    max_cost: usize,
}

/// Shared, cheaply cloneable handle to the zone snapshot.
#[derive(Clone)]
pub struct ZoneCache {
    inner: Arc<Inner>,
}

impl ZoneCache {
    pub fn new(max_cost: usize) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                snapshot: RwLock::new(Arc::new(ZoneSnapshot::default())),
                ready,
                max_cost,
            }),
        }
    }

    /// Fetch every qualifying row from `source` and replace the snapshot.
    ///
    /// On error the current snapshot is untouched.
    pub async fn load(&self, source: &dyn ZoneSource) -> Result<LoadSummary, ZoneLoadError> {
        let start = Instant::now();
        let zones = source.fetch_zones().await?;
        let mut summary = self.replace(zones);
        summary.duration = start.elapsed();
        Ok(summary)
    }

    /// Build a snapshot from `zones` and swap it in.
    pub fn replace(&self, zones: impl IntoIterator<Item = ZoneLookup>) -> LoadSummary {
        let mut snapshot = ZoneSnapshot::default();
        let mut skipped_placeholder = 0;
        let mut skipped_over_budget = 0;

        for zone in zones {
            if zone.is_placeholder() {
                skipped_placeholder += 1;
                continue;
            }
            let cost = zone.cost();
            if snapshot.cost + cost > self.inner.max_cost {
                skipped_over_budget += 1;
                continue;
            }
            snapshot.cost += cost;
            snapshot.zones.insert(zone.id, Arc::new(zone));
        }
        snapshot.loaded_at = Some(Utc::now());

        if skipped_over_budget > 0 {
            log::warn!(
                "zone cache budget of {} exceeded, {} zones not cached",
                self.inner.max_cost,
                skipped_over_budget
            );
        }

        let summary = LoadSummary {
            loaded: snapshot.zones.len(),
            skipped_placeholder,
            skipped_over_budget,
            cost: snapshot.cost,
            duration: Duration::ZERO,
        };

        *self.inner.snapshot.write() = Arc::new(snapshot);
        self.inner.ready.send_replace(true);
        summary
    }

    /// Look up a location id in the current snapshot.
    ///
    /// `None` covers both unknown ids and ids left out by the cost budget.
    pub fn get(&self, id: i64) -> Option<Arc<ZoneLookup>> {
        self.inner.snapshot.read().zones.get(&id).cloned()
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Block until the first load has completed.
    pub async fn wait_ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        // The sender lives as long as `self`, so this only returns once ready.
        let _ = ready.wait_for(|is_ready| *is_ready).await;
    }

    pub fn len(&self) -> usize {
        self.inner.snapshot.read().zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.inner.snapshot.read().loaded_at
    }
}

impl Default for ZoneCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct ScriptedSource {
        responses: Mutex<Vec<Result<Vec<ZoneLookup>, ZoneLoadError>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<ZoneLookup>, ZoneLoadError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl ZoneSource for ScriptedSource {
        async fn fetch_zones(&self) -> Result<Vec<ZoneLookup>, ZoneLoadError> {
            self.responses.lock().remove(0)
        }
    }

    fn manhattan() -> Vec<ZoneLookup> {
        vec![
            ZoneLookup::new(4, "Manhattan", "Alphabet City", "Yellow Zone"),
            ZoneLookup::new(13, "Manhattan", "Battery Park City", "Yellow Zone"),
        ]
    }

    #[tokio::test]
    async fn load_populates_snapshot_and_marks_ready() {
        let cache = ZoneCache::default();
        assert!(!cache.is_ready());

        let source = ScriptedSource::new(vec![Ok(manhattan())]);
        let summary = cache.load(&source).await.expect("load succeeds");

        assert_eq!(summary.loaded, 2);
        assert!(cache.is_ready());
        assert_eq!(cache.get(4).unwrap().zone, "Alphabet City");
        assert!(cache.get(999).is_none());
    }

    #[tokio::test]
    async fn repeated_lookups_return_identical_entries() {
        let cache = ZoneCache::default();
        cache.replace(manhattan());

        let first = cache.get(13).unwrap();
        let second = cache.get(13).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn placeholder_rows_are_filtered() {
        let cache = ZoneCache::default();
        let summary = cache.replace(vec![
            ZoneLookup::new(264, "Unknown", "N/A", "N/A"),
            ZoneLookup::new(265, "", "Outside of NYC", "N/A"),
            ZoneLookup::new(1, "EWR", "Newark Airport", "EWR"),
        ]);

        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.skipped_placeholder, 2);
        assert!(cache.get(264).is_none());
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn entries_past_the_cost_budget_are_left_out() {
        let zones = manhattan();
        let budget = zones[0].cost();
        let cache = ZoneCache::new(budget);

        let summary = cache.replace(zones);
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.skipped_over_budget, 1);
        assert!(summary.cost <= budget);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_snapshot() {
        let cache = ZoneCache::default();
        let source = ScriptedSource::new(vec![
            Ok(manhattan()),
            Err(ZoneLoadError::Unavailable("connection reset".into())),
        ]);

        cache.load(&source).await.expect("initial load");
        assert!(cache.load(&source).await.is_err());

        assert!(cache.is_ready());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(4).unwrap().region, "Manhattan");
    }

    #[tokio::test]
    async fn reload_replaces_rather_than_merges() {
        let cache = ZoneCache::default();
        cache.replace(manhattan());
        cache.replace(vec![ZoneLookup::new(1, "EWR", "Newark Airport", "EWR")]);

        assert_eq!(cache.len(), 1);
        assert!(cache.get(4).is_none());
    }

    #[tokio::test]
    async fn wait_ready_unblocks_after_first_load() {
        let cache = ZoneCache::default();
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.wait_ready().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        cache.replace(manhattan());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .expect("waiter task");
    }
}
