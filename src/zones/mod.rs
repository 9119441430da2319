//! Taxi zone reference data.
//!
//! Trip rows carry integer location ids; the loader writes descriptive
//! region/zone names instead. This module keeps the `taxi_zone_lookup` table in
//! memory so the parser pool can resolve ids without touching the database:
//!
//! - **`source`**: where zone rows come from (`ZoneSource`, Postgres-backed in production)
//! - **`cache`**: the cost-bounded snapshot cache shared by every parser worker
//! - **`refresh`**: background task reloading the whole table on a fixed period
//!
//! Snapshots are replaced wholesale. A reload builds a fresh map off to the side
//! and swaps it in, so lookups running during a refresh always see one complete
//! snapshot, and a failed reload leaves the previous snapshot in place.

pub mod cache;
pub mod refresh;
pub mod source;

use rocket_db_pools::sqlx;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::{LoadSummary, ZoneCache};
pub use refresh::run_refresh_loop;
pub use source::{PgZoneSource, ZoneSource};

/// Descriptive attributes for one taxi zone location id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneLookup {
    pub id: i64,
    pub region: String,
    pub zone: String,
    pub service_area: String,
}

impl ZoneLookup {
    pub fn new(
        id: i64,
        region: impl Into<String>,
        zone: impl Into<String>,
        service_area: impl Into<String>,
    ) -> Self {
        Self {
            id,
            region: region.into(),
            zone: zone.into(),
            service_area: service_area.into(),
        }
    }

    /// Placeholder rows (`N/A` or blank attributes) are never cached.
    pub fn is_placeholder(&self) -> bool {
        [&self.region, &self.zone, &self.service_area]
            .iter()
            .any(|value| value.trim().is_empty() || value.as_str() == PLACEHOLDER)
    }

    /// Approximate memory cost used against the cache budget.
    pub fn cost(&self) -> usize {
        std::mem::size_of::<i64>() + self.region.len() + self.zone.len() + self.service_area.len()
    }
}

/// Sentinel value used by the reference table for unassigned attributes.
pub const PLACEHOLDER: &str = "N/A";

#[derive(Debug, Error)]
pub enum ZoneLoadError {
    #[error("failed querying taxi_zone_lookup: {0}")]
    Query(#[from] sqlx::Error),
    #[error("zone source unavailable: {0}")]
    Unavailable(String),
}
