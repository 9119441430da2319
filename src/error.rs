use crate::ingest::IngestError;
use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::response::OpenApiResponderInner;
use serde::Serialize;
use std::io::Cursor;

#[derive(Debug)]
pub enum ApiError {
    Ingest(IngestError),
    NotFound(String),
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ApiError {
    fn status(&self) -> (Status, &'static str) {
        match self {
            ApiError::Ingest(err) => match err {
                IngestError::UnsupportedFormat(_) => (Status::BadRequest, "UnsupportedFormat"),
                IngestError::CorruptArchive { .. } => (Status::BadRequest, "CorruptArchive"),
                IngestError::ObjectNotFound(_) => (Status::NotFound, "ObjectNotFound"),
                IngestError::Cancelled => (Status::ServiceUnavailable, "Cancelled"),
                _ => (Status::InternalServerError, "IngestFailed"),
            },
            ApiError::NotFound(_) => (Status::NotFound, "NotFound"),
            ApiError::BadRequest(_) => (Status::BadRequest, "BadRequest"),
        }
    }

    fn message(self) -> String {
        match self {
            ApiError::Ingest(err) => err.to_string(),
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error_type) = self.status();
        let message = self.message();

        if status.code >= 500 {
            log::error!("{}: {}", error_type, message);
        } else {
            log::debug!("{}: {}", error_type, message);
        }

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        let json = serde_json::to_string(&error_response).unwrap_or_else(|_| {
            r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string()
        });

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Unsupported or corrupt input file"),
            ("404", "Requested object or zone does not exist"),
            ("500", "Ingest run failed"),
            ("503", "Service is shutting down"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::Ingest(err)
    }
}
