#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    trip_processor::rocket()
}
