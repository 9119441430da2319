use async_trait::async_trait;
use rocket_db_pools::sqlx::{self, FromRow, PgPool};

use super::{ZoneLoadError, ZoneLookup};

/// Anything that can produce the full set of zone reference rows.
#[async_trait]
pub trait ZoneSource: Send + Sync {
    async fn fetch_zones(&self) -> Result<Vec<ZoneLookup>, ZoneLoadError>;
}

#[derive(Debug, FromRow)]
struct ZoneRow {
    id: i64,
    borough: String,
    zone: String,
    service_zone: String,
}

/// Reads zones from the `taxi_zone_lookup` table.
#[derive(Clone)]
pub struct PgZoneSource {
    pool: PgPool,
}

impl PgZoneSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ZoneSource for PgZoneSource {
    async fn fetch_zones(&self) -> Result<Vec<ZoneLookup>, ZoneLoadError> {
        let rows: Vec<ZoneRow> = sqlx::query_as(
            r#"SELECT location_id::BIGINT AS id, borough, zone, service_zone
               FROM taxi_zone_lookup
               WHERE borough <> 'N/A'
                 AND zone <> 'N/A'
                 AND service_zone <> 'N/A'"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ZoneLookup::new(row.id, row.borough, row.zone, row.service_zone))
            .collect())
    }
}
