use super::archive::extract;
use super::error::IngestError;
use super::object_cache::ObjectCache;
use super::pipeline::Pipeline;
use super::stats::RunReport;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request orchestration: fetch the staged blob, unpack it, run the
/// pipeline and remove the blob afterwards.
#[derive(Clone)]
pub struct IngestService {
    objects: Arc<dyn ObjectCache>,
    pipeline: Pipeline,
    shutdown: CancellationToken,
}

impl IngestService {
    pub fn new(
        objects: Arc<dyn ObjectCache>,
        pipeline: Pipeline,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            objects,
            pipeline,
            shutdown,
        }
    }

    /// Process the object stored under `input_file`.
    ///
    /// `remote_path` is where the uploader originally found the file and is only
    /// used for logging. Once the object has been fetched it is deleted whatever
    /// the outcome; a failed delete is logged and does not change the result.
    pub async fn process_file(
        &self,
        input_file: &str,
        remote_path: &str,
    ) -> Result<RunReport, IngestError> {
        let started = Instant::now();
        log::info!("processing {} (remote {})", input_file, remote_path);

        let data = self.objects.get(input_file).await?;
        let result = self.run(data, input_file).await;

        if let Err(err) = self.objects.delete(input_file).await {
            log::error!("failed deleting {} from object cache: {}", input_file, err);
        }

        let elapsed = started.elapsed();
        match &result {
            Ok(report) => log::info!(
                "processed {} in {:.2?}: total={} processed={} dropped={} inserted={}",
                input_file,
                elapsed,
                report.total_rows,
                report.processed_rows,
                report.dropped_rows,
                report.inserted_rows
            ),
            Err(err) => log::error!("failed processing {} after {:.2?}: {}", input_file, elapsed, err),
        }

        result
    }

    async fn run(&self, data: Vec<u8>, input_file: &str) -> Result<RunReport, IngestError> {
        let files = extract(data, input_file)?;
        log::debug!("{} unpacked into {} member(s)", input_file, files.len());
        // Child token: a finished request never cancels the service itself.
        let cancel = self.shutdown.child_token();
        self.pipeline.run(&files, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::archive::tests::tar_gz;
    use crate::ingest::loader::tests::RecordingSink;
    use crate::ingest::object_cache::MemoryObjectCache;
    use crate::ingest::pipeline::PipelineConfig;
    use crate::ingest::record::tests::{HEADER, line, zones};
    use async_trait::async_trait;

    fn body() -> Vec<u8> {
        format!(
            "{HEADER}\n{}\n{}\n",
            line("2024-01-01 00:00:00", "2024-01-01 00:10:00", "161", "237"),
            line("2024-01-01 01:00:00", "2024-01-01 01:10:00", "161", "999"),
        )
        .into_bytes()
    }

    fn service(objects: Arc<dyn ObjectCache>, sink: Arc<RecordingSink>) -> IngestService {
        IngestService::new(
            objects,
            Pipeline::new(PipelineConfig::default(), zones(), sink),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn processes_and_removes_the_object() {
        let objects = Arc::new(MemoryObjectCache::new());
        objects.insert("trips.csv", body());
        let sink = Arc::new(RecordingSink::default());

        let report = service(objects.clone(), sink.clone())
            .process_file("trips.csv", "/incoming/trips.csv")
            .await
            .unwrap();

        assert_eq!(report.total_rows, 2);
        assert_eq!(report.processed_rows, 1);
        assert_eq!(report.dropped_rows, 1);
        assert_eq!(sink.batch_sizes(), vec![1]);
        assert!(!objects.contains("trips.csv"));
    }

    #[tokio::test]
    async fn tarball_members_are_processed() {
        let objects = Arc::new(MemoryObjectCache::new());
        objects.insert("trips.tar.gz", tar_gz(&[("a.csv", &body()), ("b.csv", &body())]));

        let report = service(objects, Arc::new(RecordingSink::default()))
            .process_file("trips.tar.gz", "")
            .await
            .unwrap();

        assert_eq!(report.total_rows, 4);
        assert_eq!(report.inserted_rows, 2);
    }

    #[tokio::test]
    async fn missing_object_is_reported() {
        let err = service(
            Arc::new(MemoryObjectCache::new()),
            Arc::new(RecordingSink::default()),
        )
        .process_file("gone.csv", "")
        .await
        .unwrap_err();

        assert!(matches!(err, IngestError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn unsupported_format_still_removes_the_object() {
        let objects = Arc::new(MemoryObjectCache::new());
        objects.insert("trips.parquet", vec![0, 1, 2]);
        let sink = Arc::new(RecordingSink::default());

        let err = service(objects.clone(), sink.clone())
            .process_file("trips.parquet", "")
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
        assert!(sink.batch_sizes().is_empty());
        assert!(!objects.contains("trips.parquet"));
    }

    struct StickyCache(MemoryObjectCache);

    #[async_trait]
    impl ObjectCache for StickyCache {
        async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
            self.0.get(key).await
        }

        async fn delete(&self, _key: &str) -> Result<(), IngestError> {
            Err(IngestError::ObjectCache("READONLY".into()))
        }
    }

    #[tokio::test]
    async fn delete_failure_does_not_fail_the_run() {
        let inner = MemoryObjectCache::new();
        inner.insert("trips.csv", body());

        let report = service(Arc::new(StickyCache(inner)), Arc::new(RecordingSink::default()))
            .process_file("trips.csv", "")
            .await
            .unwrap();

        assert_eq!(report.inserted_rows, 1);
    }
}
