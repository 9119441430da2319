//! Object cache client.
//!
//! Input files are staged in a key/value store by an upstream uploader and
//! addressed by file name. The service fetches a blob once and deletes it
//! after the run.

use super::error::IngestError;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;

/// Port the object cache listens on; only the host is configurable.
pub const REDIS_PORT: u16 = 6379;

#[async_trait]
pub trait ObjectCache: Send + Sync {
    /// Fetch the blob stored under `key`, or [`IngestError::ObjectNotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError>;

    async fn delete(&self, key: &str) -> Result<(), IngestError>;
}

/// Redis-backed object cache.
#[derive(Clone)]
pub struct RedisObjectCache {
    conn: MultiplexedConnection,
}

impl RedisObjectCache {
    /// Connect to `redis://<host>:6379/<db>` and verify the server answers a PING.
    pub async fn connect(host: &str, db: i64) -> Result<Self, IngestError> {
        let url = format!("redis://{}:{}/{}", host, REDIS_PORT, db);
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        log::info!("object cache at {}:{} db {} answered {}", host, REDIS_PORT, db, pong);

        Ok(Self { conn })
    }
}

#[async_trait]
impl ObjectCache for RedisObjectCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        value.ok_or_else(|| IngestError::ObjectNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), IngestError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        if removed == 0 {
            log::debug!("object {} was already gone", key);
        }
        Ok(())
    }
}

/// Process-local object cache, used by the offline CLI and in tests.
#[derive(Default)]
pub struct MemoryObjectCache {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.objects.lock().insert(key.into(), data);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().contains_key(key)
    }
}

#[async_trait]
impl ObjectCache for MemoryObjectCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| IngestError::ObjectNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), IngestError> {
        self.objects.lock().remove(key);
        Ok(())
    }
}
