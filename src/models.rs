use crate::ingest::RunReport;
use crate::zones::ZoneLookup;
use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ===== Trip Processing =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFileRequest {
    /// Key of the staged upload in the object cache; its suffix selects the format.
    pub input_file: String,
    /// Where the uploader originally found the file.
    #[serde(default)]
    pub remote_file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFileResponse {
    pub total_rows: u64,
    pub processed_rows: u64,
    pub dropped_rows: u64,
    pub inserted_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time: Option<DateTime<Utc>>,
}

impl From<RunReport> for ProcessFileResponse {
    fn from(report: RunReport) -> Self {
        Self {
            total_rows: report.total_rows,
            processed_rows: report.processed_rows,
            dropped_rows: report.dropped_rows,
            inserted_rows: report.inserted_rows,
            min_time: report.min_time,
            max_time: report.max_time,
        }
    }
}

// ===== Zones =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZoneResponse {
    pub region: String,
    pub zone: String,
    pub service_area: String,
}

impl From<&ZoneLookup> for ZoneResponse {
    fn from(lookup: &ZoneLookup) -> Self {
        Self {
            region: lookup.region.clone(),
            zone: lookup.zone.clone(),
            service_area: lookup.service_area.clone(),
        }
    }
}

// ===== Health =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok` once the zone cache is loaded, `starting` before that.
    pub status: String,
    pub zone_cache_ready: bool,
    pub zone_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones_loaded_at: Option<DateTime<Utc>>,
}
