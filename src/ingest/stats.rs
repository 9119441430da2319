//! Per-run counters shared by both worker pools.

use super::error::IngestError;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Running extremum over timestamps, stored as epoch microseconds.
///
/// Updated with a compare-and-swap loop so any number of workers can observe
/// values concurrently without a lock.
#[derive(Debug)]
struct AtomicExtremum {
    micros: AtomicI64,
    unset: i64,
}

impl AtomicExtremum {
    fn min() -> Self {
        Self {
            micros: AtomicI64::new(i64::MAX),
            unset: i64::MAX,
        }
    }

    fn max() -> Self {
        Self {
            micros: AtomicI64::new(i64::MIN),
            unset: i64::MIN,
        }
    }

    fn observe(&self, value: i64, better: impl Fn(i64, i64) -> bool) {
        let mut current = self.micros.load(Ordering::Relaxed);
        while better(value, current) {
            match self.micros.compare_exchange_weak(
                current,
                value,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn get(&self) -> Option<DateTime<Utc>> {
        let micros = self.micros.load(Ordering::Acquire);
        if micros == self.unset {
            return None;
        }
        DateTime::from_timestamp_micros(micros)
    }
}

/// Mutable state of one ingest run.
#[derive(Debug)]
pub struct RunStats {
    total: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    inserted: AtomicU64,
    min_pickup: AtomicExtremum,
    max_dropoff: AtomicExtremum,
    failed: AtomicBool,
    error: Mutex<Option<IngestError>>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            inserted: AtomicU64::new(0),
            min_pickup: AtomicExtremum::min(),
            max_dropoff: AtomicExtremum::max(),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_seen(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inserted(&self, rows: u64) {
        self.inserted.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn observe_min(&self, pickup: NaiveDateTime) {
        let micros = pickup.and_utc().timestamp_micros();
        self.min_pickup.observe(micros, |candidate, current| candidate < current);
    }

    pub fn observe_max(&self, dropoff: NaiveDateTime) {
        let micros = dropoff.and_utc().timestamp_micros();
        self.max_dropoff.observe(micros, |candidate, current| candidate > current);
    }

    /// Record a terminal error. Only the first one is kept.
    pub fn fail(&self, err: IngestError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            log::error!("ingest run failed: {}", err);
            *slot = Some(err);
            self.failed.store(true, Ordering::Release);
        } else {
            log::debug!("ignoring subsequent ingest error: {}", err);
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn take_error(&self) -> Option<IngestError> {
        self.error.lock().take()
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            total_rows: self.total.load(Ordering::Relaxed),
            processed_rows: self.processed.load(Ordering::Relaxed),
            dropped_rows: self.dropped.load(Ordering::Relaxed),
            inserted_rows: self.inserted.load(Ordering::Relaxed),
            min_time: self.min_pickup.get(),
            max_time: self.max_dropoff.get(),
        }
    }
}

/// Final counters of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub total_rows: u64,
    pub processed_rows: u64,
    pub dropped_rows: u64,
    pub inserted_rows: u64,
    pub min_time: Option<DateTime<Utc>>,
    pub max_time: Option<DateTime<Utc>>,
}
