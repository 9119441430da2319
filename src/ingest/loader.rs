//! BulkLoader pool.
//!
//! Workers accumulate `TripRecord`s into a local [`Batch`] and hand each full
//! batch to a [`BatchSink`], which commits it as one transaction. The final
//! partial batch is flushed when the input queue closes. After any flush
//! failure no further batches are written by any worker and the remaining
//! input is drained so the parser pool can finish.

use super::error::IngestError;
use super::queue::{Recv, SharedReceiver};
use super::record::{Row, TripRecord};
use super::stats::RunStats;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default number of records per bulk-load transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Rows of one bulk-load transaction, in [`TRIP_COLUMNS`](super::record::TRIP_COLUMNS) order.
#[derive(Debug, Default)]
pub struct Batch {
    rows: Vec<Row>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

/// Destination for committed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Write `batch` atomically, returning the number of rows actually inserted.
    async fn write_batch(&self, batch: &Batch) -> Result<u64, IngestError>;
}

#[derive(Clone)]
pub struct LoaderContext {
    pub input: SharedReceiver<TripRecord>,
    pub sink: Arc<dyn BatchSink>,
    pub stats: Arc<RunStats>,
    pub cancel: CancellationToken,
    pub batch_size: usize,
}

/// Start `workers` loader tasks on `set`.
pub fn spawn_loaders(set: &mut JoinSet<()>, workers: usize, ctx: LoaderContext) {
    for worker_id in 0..workers.max(1) {
        set.spawn(loader_worker(worker_id, ctx.clone()));
    }
}

async fn flush(worker_id: usize, batch: &mut Batch, ctx: &LoaderContext) -> Result<(), IngestError> {
    // Another worker already failed; committing more would go past the failure point.
    if ctx.stats.has_failed() {
        return Err(IngestError::Worker("run already failed".into()));
    }

    let inserted = tokio::select! {
        result = ctx.sink.write_batch(batch) => result?,
        _ = ctx.cancel.cancelled() => return Err(IngestError::Cancelled),
    };

    log::debug!(
        "loader {}: committed batch of {} rows ({} inserted)",
        worker_id,
        batch.len(),
        inserted
    );
    ctx.stats.record_inserted(inserted);
    batch.clear();
    Ok(())
}

async fn loader_worker(worker_id: usize, ctx: LoaderContext) {
    let batch_size = ctx.batch_size.max(1);
    let mut batch = Batch::with_capacity(batch_size);

    loop {
        let record = match ctx.input.recv(&ctx.cancel).await {
            Recv::Item(record) => record,
            Recv::Closed => break,
            Recv::Cancelled => {
                ctx.stats.fail(IngestError::Cancelled);
                return;
            }
        };

        if ctx.stats.has_failed() {
            ctx.input.drain(&ctx.cancel).await;
            return;
        }

        batch.push(record.to_row());
        if batch.len() < batch_size {
            continue;
        }

        if let Err(err) = flush(worker_id, &mut batch, &ctx).await {
            ctx.stats.fail(err);
            let discarded = ctx.input.drain(&ctx.cancel).await;
            log::debug!("loader {}: drained {} records after failure", worker_id, discarded);
            return;
        }
    }

    if !batch.is_empty() && !ctx.stats.has_failed() {
        if let Err(err) = flush(worker_id, &mut batch, &ctx).await {
            ctx.stats.fail(err);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ingest::record::{Fares, TripRecord};
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use rocket_db_pools::sqlx;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Records batch sizes; optionally fails on the n-th call (1-based).
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) batches: Mutex<Vec<usize>>,
        pub(crate) fail_on: Option<usize>,
    }

    impl RecordingSink {
        pub(crate) fn failing_on(call: usize) -> Self {
            Self {
                fail_on: Some(call),
                ..Default::default()
            }
        }

        pub(crate) fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn write_batch(&self, batch: &Batch) -> Result<u64, IngestError> {
            let mut batches = self.batches.lock();
            if self.fail_on == Some(batches.len() + 1) {
                return Err(IngestError::BulkLoad {
                    table: "nyc_trip".into(),
                    source: sqlx::Error::PoolTimedOut,
                });
            }
            batches.push(batch.len());
            Ok(batch.len() as u64)
        }
    }

    pub(crate) fn record() -> TripRecord {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        TripRecord {
            vendor: "Helix".into(),
            pickup_time: at,
            dropoff_time: at,
            passenger_count: 1,
            trip_distance: 0.8,
            pickup_region: "Manhattan".into(),
            pickup_zone: "Midtown Center".into(),
            dropoff_region: "Manhattan".into(),
            dropoff_zone: "Midtown East".into(),
            payment_type: "Cash".into(),
            fares: Fares::default(),
        }
    }

    async fn run_loaders(
        sink: Arc<RecordingSink>,
        records: usize,
        batch_size: usize,
        workers: usize,
    ) -> Arc<RunStats> {
        let (tx, rx) = mpsc::channel(8);
        let stats = Arc::new(RunStats::new());
        let mut set = JoinSet::new();
        spawn_loaders(
            &mut set,
            workers,
            LoaderContext {
                input: SharedReceiver::new(rx),
                sink,
                stats: stats.clone(),
                cancel: CancellationToken::new(),
                batch_size,
            },
        );

        for _ in 0..records {
            tx.send(record()).await.expect("loaders keep consuming");
        }
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while set.join_next().await.is_some() {}
        })
        .await
        .expect("loaders finish");
        stats
    }

    #[tokio::test]
    async fn single_worker_issues_ceil_batches() {
        let sink = Arc::new(RecordingSink::default());
        let stats = run_loaders(sink.clone(), 25, 10, 1).await;

        assert_eq!(sink.batch_sizes(), vec![10, 10, 5]);
        assert_eq!(stats.report().inserted_rows, 25);
        assert!(!stats.has_failed());
    }

    #[tokio::test]
    async fn evenly_divisible_input_has_no_partial_batch() {
        let sink = Arc::new(RecordingSink::default());
        run_loaders(sink.clone(), 30, 10, 1).await;

        assert_eq!(sink.batch_sizes(), vec![10, 10, 10]);
    }

    #[tokio::test]
    async fn failure_stops_further_batches_and_drains() {
        let sink = Arc::new(RecordingSink::failing_on(2));
        let stats = run_loaders(sink.clone(), 100, 10, 1).await;

        assert_eq!(sink.batch_sizes(), vec![10]);
        assert_eq!(stats.report().inserted_rows, 10);
        assert!(matches!(
            stats.take_error(),
            Some(IngestError::BulkLoad { .. })
        ));
    }

    /// Never finishes a write; signals once a batch is in flight.
    #[derive(Default)]
    struct StalledSink {
        entered: tokio::sync::Notify,
    }

    #[async_trait]
    impl BatchSink for StalledSink {
        async fn write_batch(&self, _batch: &Batch) -> Result<u64, IngestError> {
            self.entered.notify_one();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancel_interrupts_an_in_flight_write() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(StalledSink::default());
        let stats = Arc::new(RunStats::new());
        let cancel = CancellationToken::new();
        let mut set = JoinSet::new();
        spawn_loaders(
            &mut set,
            1,
            LoaderContext {
                input: SharedReceiver::new(rx),
                sink: sink.clone(),
                stats: stats.clone(),
                cancel: cancel.clone(),
                batch_size: 2,
            },
        );

        tx.send(record()).await.unwrap();
        tx.send(record()).await.unwrap();
        sink.entered.notified().await;
        cancel.cancel();

        // The sender stays open: only cancellation can end the worker.
        tokio::time::timeout(Duration::from_secs(5), async {
            while set.join_next().await.is_some() {}
        })
        .await
        .expect("loader exits after cancel");

        assert_eq!(stats.report().inserted_rows, 0);
        assert!(matches!(stats.take_error(), Some(IngestError::Cancelled)));
        drop(tx);
    }

    #[tokio::test]
    async fn multiple_workers_insert_everything() {
        let sink = Arc::new(RecordingSink::default());
        let stats = run_loaders(sink.clone(), 95, 10, 3).await;

        assert_eq!(sink.batch_sizes().iter().sum::<usize>(), 95);
        assert_eq!(stats.report().inserted_rows, 95);
    }
}
