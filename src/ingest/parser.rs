//! LineParser pool.
//!
//! Each worker waits for the zone cache, then pulls `RawRow`s off the shared
//! input queue, validates them with [`parse_row`] and forwards the resulting
//! `TripRecord`s to the loader queue. Invalid rows only bump the dropped
//! counter. Once the run has a terminal error, workers stop parsing and drain
//! their input so the producer is never left blocked on a full queue.

use super::error::IngestError;
use super::queue::{Recv, SharedReceiver};
use super::record::{RawRow, TripRecord, parse_row};
use super::stats::RunStats;
use crate::zones::ZoneCache;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Everything a parser worker needs, cloned once per worker.
#[derive(Clone)]
pub struct ParserContext {
    pub input: SharedReceiver<RawRow>,
    pub output: mpsc::Sender<TripRecord>,
    pub zones: ZoneCache,
    pub stats: Arc<RunStats>,
    pub cancel: CancellationToken,
}

/// Start `workers` parser tasks on `set`.
pub fn spawn_parsers(set: &mut JoinSet<()>, workers: usize, ctx: ParserContext) {
    for worker_id in 0..workers.max(1) {
        set.spawn(parser_worker(worker_id, ctx.clone()));
    }
}

async fn parser_worker(worker_id: usize, ctx: ParserContext) {
    let ParserContext {
        input,
        output,
        zones,
        stats,
        cancel,
    } = ctx;

    tokio::select! {
        _ = zones.wait_ready() => {}
        _ = cancel.cancelled() => {
            stats.fail(IngestError::Cancelled);
            return;
        }
    }

    loop {
        let row = match input.recv(&cancel).await {
            Recv::Item(row) => row,
            Recv::Closed => break,
            Recv::Cancelled => {
                stats.fail(IngestError::Cancelled);
                return;
            }
        };

        if stats.has_failed() {
            let discarded = input.drain(&cancel).await + 1;
            log::debug!("parser {}: run failed, drained {} rows", worker_id, discarded);
            return;
        }

        let record = match parse_row(&row, &zones) {
            Ok(record) => record,
            Err(reason) => {
                log::trace!("parser {}: dropped row: {:?}", worker_id, reason);
                stats.record_dropped();
                continue;
            }
        };

        stats.observe_min(record.pickup_time);
        stats.observe_max(record.dropoff_time);
        stats.record_processed();

        let sent = tokio::select! {
            result = output.send(record) => result.is_ok(),
            _ = cancel.cancelled() => {
                stats.fail(IngestError::Cancelled);
                return;
            }
        };

        if !sent {
            stats.fail(IngestError::Worker("loader queue closed unexpectedly".into()));
            input.drain(&cancel).await;
            return;
        }
    }

    log::debug!("parser {}: input exhausted", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::record::HeaderIndex;
    use crate::ingest::record::tests::{HEADER, line, zones};
    use crate::zones::ZoneLookup;
    use std::time::Duration;

    fn rows(lines: &[String]) -> Vec<RawRow> {
        let header = Arc::new(HeaderIndex::from_fields(HEADER.split('\t')));
        lines
            .iter()
            .map(|l| RawRow::new(l, header.clone()))
            .collect()
    }

    #[tokio::test]
    async fn parses_valid_rows_and_counts_drops() {
        let (row_tx, row_rx) = mpsc::channel(4);
        let (record_tx, mut record_rx) = mpsc::channel(16);
        let stats = Arc::new(RunStats::new());
        let mut set = JoinSet::new();

        spawn_parsers(
            &mut set,
            2,
            ParserContext {
                input: SharedReceiver::new(row_rx),
                output: record_tx,
                zones: zones(),
                stats: stats.clone(),
                cancel: CancellationToken::new(),
            },
        );

        for row in rows(&[
            line("2024-01-01 00:00:00", "2024-01-01 00:10:00", "161", "237"),
            line("bogus", "2024-01-01 00:10:00", "161", "237"),
            line("2024-01-02 00:00:00", "2024-01-02 00:10:00", "161", "1"),
            line("2024-01-03 00:00:00", "2024-01-03 00:10:00", "132", "161"),
        ]) {
            row_tx.send(row).await.unwrap();
        }
        drop(row_tx);
        while set.join_next().await.is_some() {}

        let mut received = Vec::new();
        while let Ok(record) = record_rx.try_recv() {
            received.push(record);
        }

        let report = stats.report();
        assert_eq!(received.len(), 2);
        assert_eq!(report.processed_rows, 2);
        assert_eq!(report.dropped_rows, 2);
        assert_eq!(report.min_time.unwrap().to_string(), "2024-01-01 00:00:00 UTC");
        assert_eq!(report.max_time.unwrap().to_string(), "2024-01-03 00:10:00 UTC");
    }

    #[tokio::test]
    async fn workers_wait_for_the_zone_cache() {
        let (row_tx, row_rx) = mpsc::channel(4);
        let (record_tx, mut record_rx) = mpsc::channel(4);
        let cache = ZoneCache::default();
        let stats = Arc::new(RunStats::new());
        let mut set = JoinSet::new();

        spawn_parsers(
            &mut set,
            1,
            ParserContext {
                input: SharedReceiver::new(row_rx),
                output: record_tx,
                zones: cache.clone(),
                stats: stats.clone(),
                cancel: CancellationToken::new(),
            },
        );

        for row in rows(&[line("2024-01-01 00:00:00", "2024-01-01 00:10:00", "161", "237")]) {
            row_tx.send(row).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stats.report().processed_rows + stats.report().dropped_rows, 0);

        cache.replace(vec![
            ZoneLookup::new(161, "Manhattan", "Midtown Center", "Yellow Zone"),
            ZoneLookup::new(237, "Manhattan", "Upper East Side South", "Yellow Zone"),
        ]);
        drop(row_tx);
        while set.join_next().await.is_some() {}

        assert!(record_rx.try_recv().is_ok());
        assert_eq!(stats.report().processed_rows, 1);
    }

    #[tokio::test]
    async fn failed_run_drains_input_without_parsing() {
        let (row_tx, row_rx) = mpsc::channel(1);
        let (record_tx, _record_rx) = mpsc::channel(1);
        let stats = Arc::new(RunStats::new());
        stats.fail(IngestError::Worker("loader gave up".into()));
        let mut set = JoinSet::new();

        spawn_parsers(
            &mut set,
            1,
            ParserContext {
                input: SharedReceiver::new(row_rx),
                output: record_tx,
                zones: zones(),
                stats: stats.clone(),
                cancel: CancellationToken::new(),
            },
        );

        let producer = tokio::spawn(async move {
            for row in rows(&vec![
                line("2024-01-01 00:00:00", "2024-01-01 00:10:00", "161", "237");
                50
            ]) {
                row_tx.send(row).await.unwrap();
            }
        });

        tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .expect("producer never blocks")
            .unwrap();
        while set.join_next().await.is_some() {}
        assert_eq!(stats.report().processed_rows, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_workers_waiting_for_zones() {
        let (_row_tx, row_rx) = mpsc::channel::<RawRow>(1);
        let (record_tx, _record_rx) = mpsc::channel(1);
        let stats = Arc::new(RunStats::new());
        let cancel = CancellationToken::new();
        let mut set = JoinSet::new();

        spawn_parsers(
            &mut set,
            3,
            ParserContext {
                input: SharedReceiver::new(row_rx),
                output: record_tx,
                zones: ZoneCache::default(),
                stats: stats.clone(),
                cancel: cancel.clone(),
            },
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while set.join_next().await.is_some() {}
        })
        .await
        .expect("workers exit promptly");
        assert!(matches!(stats.take_error(), Some(IngestError::Cancelled)));
    }
}
