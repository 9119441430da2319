//! Pipeline coordination.
//!
//! ```text
//! files ──producer──▶ [row queue] ──parser pool──▶ [record queue] ──loader pool──▶ BatchSink
//! ```
//!
//! Both pools are started before the first line is produced. Queues are closed
//! in dependency order: the producer finishes and drops the row sender, the
//! parser pool is joined, and only then is the record sender dropped and the
//! loader pool joined. The first terminal error recorded by any stage becomes
//! the result of the run.

use super::error::IngestError;
use super::loader::{BatchSink, DEFAULT_BATCH_SIZE, LoaderContext, spawn_loaders};
use super::parser::{ParserContext, spawn_parsers};
use super::queue::SharedReceiver;
use super::record::{HeaderIndex, RawRow};
use super::stats::{RunReport, RunStats};
use crate::zones::ZoneCache;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Pool and queue sizing, fixed for the lifetime of a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub parser_workers: usize,
    pub loader_workers: usize,
    pub queue_capacity: usize,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parser_workers: 3,
            loader_workers: 3,
            queue_capacity: 100,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Runs extracted files through the parser and loader pools.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    zones: ZoneCache,
    sink: Arc<dyn BatchSink>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, zones: ZoneCache, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            config,
            zones,
            sink,
        }
    }

    /// Process every file and return the aggregate counters.
    ///
    /// Batches committed before a failure stay committed; the error is still
    /// returned instead of a partial report.
    pub async fn run(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<RunReport, IngestError> {
        let capacity = self.config.queue_capacity.max(1);
        let stats = Arc::new(RunStats::new());

        let (row_tx, row_rx) = mpsc::channel(capacity);
        let (record_tx, record_rx) = mpsc::channel(capacity);

        let mut loaders = JoinSet::new();
        spawn_loaders(
            &mut loaders,
            self.config.loader_workers,
            LoaderContext {
                input: SharedReceiver::new(record_rx),
                sink: self.sink.clone(),
                stats: stats.clone(),
                cancel: cancel.clone(),
                batch_size: self.config.batch_size,
            },
        );

        let mut parsers = JoinSet::new();
        spawn_parsers(
            &mut parsers,
            self.config.parser_workers,
            ParserContext {
                input: SharedReceiver::new(row_rx),
                output: record_tx.clone(),
                zones: self.zones.clone(),
                stats: stats.clone(),
                cancel: cancel.clone(),
            },
        );

        produce(files, row_tx, &stats, cancel).await;

        join_all(&mut parsers, &stats).await;
        drop(record_tx);
        join_all(&mut loaders, &stats).await;

        match stats.take_error() {
            Some(err) => Err(err),
            None => Ok(stats.report()),
        }
    }
}

async fn join_all(set: &mut JoinSet<()>, stats: &RunStats) {
    while let Some(result) = set.join_next().await {
        if let Err(err) = result {
            stats.fail(IngestError::Worker(err.to_string()));
        }
    }
}

/// Feed every data line of every file into the row queue.
///
/// The first line of each file is its header and is not forwarded. Dropping
/// `row_tx` on return closes the queue.
async fn produce(
    files: &BTreeMap<String, Vec<u8>>,
    row_tx: mpsc::Sender<RawRow>,
    stats: &RunStats,
    cancel: &CancellationToken,
) {
    for (name, content) in files {
        let mut lines = split_lines(content);
        let Some(header_line) = lines.next() else {
            log::warn!("input member {} is empty", name);
            continue;
        };
        let header = Arc::new(HeaderIndex::from_fields(header_line.split('\t')));

        for line in lines {
            // Remaining rows would only be drained.
            if stats.has_failed() {
                return;
            }

            stats.record_seen();
            let row = RawRow::new(&line, header.clone());
            tokio::select! {
                result = row_tx.send(row) => {
                    if result.is_err() {
                        stats.fail(IngestError::Worker("parser queue closed unexpectedly".into()));
                        return;
                    }
                }
                _ = cancel.cancelled() => {
                    stats.fail(IngestError::Cancelled);
                    return;
                }
            }
        }
    }
}

/// Split on `\n`, stripping a trailing `\r`. A final newline does not yield an empty line.
fn split_lines(content: &[u8]) -> impl Iterator<Item = Cow<'_, str>> {
    let content = content.strip_suffix(b"\n").unwrap_or(content);
    let empty = content.is_empty();
    content
        .split(|byte| *byte == b'\n')
        .filter(move |_| !empty)
        .map(|line| String::from_utf8_lossy(line.strip_suffix(b"\r").unwrap_or(line)))
}
