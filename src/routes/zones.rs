use crate::error::ApiError;
use crate::models::ZoneResponse;
use crate::zones::ZoneCache;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

/// Resolve a location id through the in-memory zone cache.
#[openapi(tag = "Zones")]
#[get("/zones/<id>")]
pub fn get_zone(id: i64, zones: &State<ZoneCache>) -> Result<Json<ZoneResponse>, ApiError> {
    zones
        .get(id)
        .map(|lookup| Json(ZoneResponse::from(lookup.as_ref())))
        .ok_or_else(|| ApiError::NotFound(format!("Zone {} not found", id)))
}
