//! Readiness endpoint used by orchestration probes and tests.

use crate::models::HealthResponse;
use crate::zones::ZoneCache;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

/// Report whether the zone cache has been loaded and how many zones it holds.
#[openapi(tag = "Health")]
#[get("/health")]
pub fn health_check(zones: &State<ZoneCache>) -> Json<HealthResponse> {
    let ready = zones.is_ready();
    Json(HealthResponse {
        status: if ready { "ok" } else { "starting" }.to_string(),
        zone_cache_ready: ready,
        zone_count: zones.len(),
        zones_loaded_at: zones.loaded_at(),
    })
}
