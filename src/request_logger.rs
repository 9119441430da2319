use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::Instant;

/// Request start time, stored in the request-local cache.
struct Started(Instant);

/// Fairing logging one line per HTTP request with its duration.
///
/// Health probes are logged at `debug` so they don't drown out ingest traffic.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(|| Started(Instant::now()));
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let Started(start) = request.local_cache(|| Started(Instant::now()));
        let millis = start.elapsed().as_secs_f64() * 1000.0;
        let status = response.status().code;

        if request.uri().path().ends_with("/health") && status < 400 {
            log::debug!("{} {} -> {} ({:.2}ms)", request.method(), request.uri(), status, millis);
        } else {
            log::info!("{} {} -> {} ({:.2}ms)", request.method(), request.uri(), status, millis);
        }
    }
}
