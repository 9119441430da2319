//! HTTP route handlers.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive the
//! OpenAPI document served next to the Swagger UI.

pub mod health;
pub mod trips;
pub mod zones;
