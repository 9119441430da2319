//! Trip-record ingestion.
//!
//! Turns one staged input file into validated rows in the `nyc_trip` table.
//!
//! ## Components
//!
//! - **`archive`**: detects the input format from the file name and unpacks
//!   `.tar.gz` uploads into their member files.
//! - **`record`**: raw and validated row types, enumeration tables, and the
//!   explicit record-to-tuple mapping used by the loader.
//! - **`parser`**: pool of workers validating rows and resolving zone ids
//!   through the shared [`ZoneCache`](crate::zones::ZoneCache).
//! - **`loader`**: pool of workers grouping records into batches and handing
//!   them to a [`BatchSink`].
//! - **`storage`**: the Postgres sink (staging table, COPY, insert-select).
//! - **`pipeline`**: wires producer, queues and both pools together and owns
//!   the shutdown ordering.
//! - **`stats`**: run counters and the min/max timestamp extrema.
//! - **`object_cache`** / **`service`**: the request-level flow around a run.
//!
//! ## Data Flow
//!
//! 1. Fetch the blob from the object cache
//! 2. Extract it into one or more tab-separated member files
//! 3. Producer splits lines; the first line of each member is its header
//! 4. Parser pool validates and transforms rows, dropping invalid ones
//! 5. Loader pool commits batches, one transaction each
//! 6. Return the aggregate report and delete the blob
//!
//! Queues between stages are bounded; a stalled loader pool backs up into the
//! parser pool and from there into the producer.

pub mod archive;
pub mod error;
pub mod loader;
pub mod object_cache;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod service;
pub mod stats;
pub mod storage;

pub use archive::{InputFormat, extract};
pub use error::IngestError;
pub use loader::{Batch, BatchSink};
pub use object_cache::{MemoryObjectCache, ObjectCache, RedisObjectCache};
pub use pipeline::{Pipeline, PipelineConfig};
pub use service::IngestService;
pub use stats::RunReport;
pub use storage::PgBatchSink;
