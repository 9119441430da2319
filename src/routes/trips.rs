use crate::error::ApiError;
use crate::ingest::IngestService;
use crate::models::{ProcessFileRequest, ProcessFileResponse};
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

/// Ingest a staged trip file and report the row counters.
///
/// The file is fetched from the object cache by `inputFile` and deleted once
/// the run finishes, whether it succeeded or not.
#[openapi(tag = "Trips")]
#[post("/trips/process", data = "<request>")]
pub async fn process_file(
    request: Json<ProcessFileRequest>,
    service: &State<IngestService>,
) -> Result<Json<ProcessFileResponse>, ApiError> {
    let request = request.into_inner();
    if request.input_file.trim().is_empty() {
        return Err(ApiError::BadRequest("inputFile must not be empty".to_string()));
    }

    let report = service
        .process_file(&request.input_file, &request.remote_file_path)
        .await?;

    Ok(Json(report.into()))
}
