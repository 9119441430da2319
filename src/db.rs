use rocket_db_pools::sqlx::{self, PgPool, migrate::Migrator};
use rocket_db_pools::Database;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Database)]
#[database("trip_db")]
pub struct TripDb(sqlx::PgPool);

/// Apply pending migrations for `taxi_zone_lookup` and `nyc_trip`.
///
/// Both tables are created with `IF NOT EXISTS`, so this is safe against a
/// database whose schema was provisioned elsewhere.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("checking database migration state");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}
