use rocket::http::Status;
use rocket::routes;
use trip_processor::models::ZoneResponse;
use trip_processor::routes::zones::get_zone;
use trip_processor::test_support::{TestRocketBuilder, sample_zones};

fn client() -> rocket::local::blocking::Client {
    TestRocketBuilder::new()
        .with_zones(sample_zones())
        .mount_api_routes(routes![get_zone])
        .blocking_client()
}

#[test]
fn known_zone_resolves() {
    let client = client();
    let response = client.get("/api/v1/zones/132").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let zone: ZoneResponse = response.into_json().expect("valid JSON payload");
    assert_eq!(
        zone,
        ZoneResponse {
            region: "Queens".into(),
            zone: "JFK Airport".into(),
            service_area: "Airports".into(),
        }
    );
}

#[test]
fn response_uses_service_area_key() {
    let body: serde_json::Value = client()
        .get("/api/v1/zones/161")
        .dispatch()
        .into_json()
        .expect("valid JSON payload");
    assert_eq!(body["serviceArea"], "Yellow Zone");
}

#[test]
fn unknown_and_placeholder_zones_are_not_found() {
    let client = client();
    for id in [999, 264] {
        let response = client.get(format!("/api/v1/zones/{id}")).dispatch();
        assert_eq!(response.status(), Status::NotFound, "zone {id}");

        let body: serde_json::Value = response.into_json().expect("error payload");
        assert_eq!(body["error"], "NotFound");
    }
}

#[test]
fn non_numeric_id_does_not_match() {
    let client = client();
    let response = client.get("/api/v1/zones/midtown").dispatch();
    assert_eq!(response.status(), Status::UnprocessableEntity);
}
