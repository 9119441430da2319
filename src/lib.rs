#[macro_use]
extern crate rocket;

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod zones;

use crate::config::{Environment, ProcessorConfig};
use crate::db::TripDb;
use crate::ingest::{IngestService, PgBatchSink, Pipeline, RedisObjectCache};
use crate::request_logger::RequestLogger;
use crate::zones::{PgZoneSource, ZoneCache, ZoneSource, run_refresh_loop};
use env_logger::{Env, WriteStyle};
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::{
    openapi_get_routes,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};
use tokio_util::sync::CancellationToken;

static LOGGER: Once = Once::new();

fn init_logger(level: &str, environment: Environment) {
    LOGGER.call_once(|| {
        let filter = format!("{},rocket::server=warn,rocket::request=warn", level);
        let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(filter));
        if environment != Environment::Development {
            builder.format_timestamp_millis().write_style(WriteStyle::Never);
        }
        let _ = builder.try_init();
    });
}

/// Cancelled when Rocket shuts down; observed by the refresh task and every ingest run.
#[derive(Clone)]
pub struct ShutdownToken(pub CancellationToken);

/// Build the service from the process environment.
///
/// A configuration error is logged and turned into an ignition failure.
pub fn rocket() -> Rocket<Build> {
    match ProcessorConfig::from_env() {
        Ok(config) => build(config),
        Err(err) => {
            init_logger("info", Environment::Development);
            log::error!("invalid configuration: {}", err);
            rocket::build().attach(AdHoc::try_on_ignite("Configuration", |rocket| async {
                Err(rocket)
            }))
        }
    }
}

pub fn build(config: ProcessorConfig) -> Rocket<Build> {
    init_logger(&config.log_level, config.environment);
    log::info!("starting trip processor ({} environment)", config.environment);

    let cors = match CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .to_cors()
    {
        Ok(cors) => cors,
        Err(err) => {
            log::error!("invalid CORS configuration: {}", err);
            return rocket::build().attach(AdHoc::try_on_ignite("CORS", |rocket| async {
                Err(rocket)
            }));
        }
    };

    let figment = rocket::Config::figment()
        .merge(("databases.trip_db.url", config.database_url.clone()));
    let zone_config = config.clone();
    let service_config = config.clone();
    let refresh_interval = config.zone_refresh_interval;
    let shutdown = CancellationToken::new();

    rocket::custom(figment)
        .attach(RequestLogger)
        .attach(TripDb::init())
        .attach(cors)
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match TripDb::fetch(&rocket) {
                Some(trip_db) => {
                    let pool = (**trip_db).clone();
                    match db::run_migrations(&pool).await {
                        Ok(()) => Ok(rocket),
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        // The parser pool cannot run without zones, so a failed first load aborts startup.
        .attach(AdHoc::try_on_ignite("Load Zone Cache", move |rocket| async move {
            let Some(trip_db) = TripDb::fetch(&rocket) else {
                log::error!("database pool not available for zone cache");
                return Err(rocket);
            };
            let pool: PgPool = (**trip_db).clone();
            let cache = ZoneCache::new(zone_config.zone_cache_max_cost);

            match cache.load(&PgZoneSource::new(pool.clone())).await {
                Ok(summary) => {
                    log::info!(
                        "zone cache loaded: {} zones ({} placeholders, {} over budget) in {:?}",
                        summary.loaded,
                        summary.skipped_placeholder,
                        summary.skipped_over_budget,
                        summary.duration
                    );
                    Ok(rocket.manage(pool).manage(cache))
                }
                Err(err) => {
                    log::error!("initial zone cache load failed: {}", err);
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite("Ingest Service", move |rocket| async move {
            let (Some(pool), Some(cache)) = (
                rocket.state::<PgPool>().cloned(),
                rocket.state::<ZoneCache>().cloned(),
            ) else {
                log::error!("ingest service needs the database pool and zone cache");
                return Err(rocket);
            };

            let objects = match RedisObjectCache::connect(
                &service_config.redis_host,
                service_config.redis_db,
            )
            .await
            {
                Ok(objects) => objects,
                Err(err) => {
                    log::error!("object cache unavailable: {}", err);
                    return Err(rocket);
                }
            };

            let pipeline = Pipeline::new(
                service_config.pipeline.clone(),
                cache,
                Arc::new(PgBatchSink::new(pool)),
            );
            let service =
                IngestService::new(Arc::new(objects), pipeline, shutdown.clone());

            Ok(rocket
                .manage(service)
                .manage(ShutdownToken(shutdown)))
        }))
        .attach(AdHoc::on_liftoff("Spawn Zone Refresh", move |rocket| {
            Box::pin(async move {
                let (Some(pool), Some(cache), Some(ShutdownToken(token))) = (
                    rocket.state::<PgPool>(),
                    rocket.state::<ZoneCache>(),
                    rocket.state::<ShutdownToken>(),
                ) else {
                    log::error!("failed to spawn zone refresh: managed state missing");
                    return;
                };

                let source: Arc<dyn ZoneSource> = Arc::new(PgZoneSource::new(pool.clone()));
                log::info!("refreshing zone cache every {:?}", refresh_interval);
                tokio::spawn(run_refresh_loop(
                    cache.clone(),
                    source,
                    refresh_interval,
                    token.clone(),
                ));
            })
        }))
        .attach(AdHoc::on_shutdown("Cancel Ingest", |rocket| {
            Box::pin(async move {
                if let Some(ShutdownToken(token)) = rocket.state::<ShutdownToken>() {
                    log::info!("shutdown requested, cancelling in-flight ingest runs");
                    token.cancel();
                }
            })
        }))
        .mount(
            "/api/v1",
            openapi_get_routes![
                routes::health::health_check,
                routes::trips::process_file,
                routes::zones::get_zone,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::ingest::{BatchSink, IngestService, ObjectCache, Pipeline, PipelineConfig};
    use crate::zones::{ZoneCache, ZoneLookup};
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Zones used across integration tests.
    pub fn sample_zones() -> Vec<ZoneLookup> {
        vec![
            ZoneLookup::new(132, "Queens", "JFK Airport", "Airports"),
            ZoneLookup::new(161, "Manhattan", "Midtown Center", "Yellow Zone"),
            ZoneLookup::new(237, "Manhattan", "Upper East Side South", "Yellow Zone"),
            ZoneLookup::new(264, "N/A", "N/A", "N/A"),
        ]
    }

    /// Seed `taxi_zone_lookup` with `zones`.
    pub async fn insert_zones(pool: &PgPool, zones: &[ZoneLookup]) -> Result<(), sqlx::Error> {
        for zone in zones {
            sqlx::query(
                "INSERT INTO taxi_zone_lookup (location_id, borough, zone, service_zone) VALUES ($1, $2, $3, $4)",
            )
            .bind(zone.id as i32)
            .bind(&zone.region)
            .bind(&zone.zone)
            .bind(&zone.service_area)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner};
        use testcontainers_modules::postgres::Postgres;
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("neither TEST_DATABASE_URL nor TEST_USE_CONTAINERS=1 set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral, migrated database for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Use `TEST_DATABASE_URL` when set, otherwise a disposable Postgres
            /// container if `TEST_USE_CONTAINERS=1`.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
                    return Self::on_server(&url, None).await;
                }

                let use_containers = std::env::var("TEST_USE_CONTAINERS")
                    .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                    .unwrap_or(false);
                if !use_containers {
                    return Err(TestDatabaseError::MissingUrl);
                }

                let container = Postgres::default().start().await?;
                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
                Self::on_server(&url, Some(container)).await
            }

            async fn on_server(
                admin_url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = admin_url.parse()?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let database_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                sqlx::query(&format!(
                    "CREATE DATABASE \"{}\" TEMPLATE template0",
                    database_name
                ))
                .execute(&admin_pool)
                .await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.database(&database_name))
                    .await?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name,
                    container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database(self.admin_options.clone(), &self.database_name).await?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", database_name))
                .execute(&admin_pool)
                .await?;
            Ok(())
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database(admin_options, &db_name).await;
                        });
                    }
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        zones: Option<ZoneCache>,
        service: Option<IngestService>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                ..Default::default()
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a zone cache holding exactly `zones`.
        pub fn with_zones(mut self, zones: Vec<ZoneLookup>) -> Self {
            let cache = ZoneCache::default();
            cache.replace(zones);
            self.zones = Some(cache);
            self
        }

        /// Manage an [`IngestService`] over the given collaborators.
        ///
        /// Requires [`with_zones`](Self::with_zones) to have been called first.
        pub fn with_ingest(
            mut self,
            objects: Arc<dyn ObjectCache>,
            sink: Arc<dyn BatchSink>,
            config: PipelineConfig,
        ) -> Self {
            let zones = self.zones.clone().unwrap_or_default();
            let pipeline = Pipeline::new(config, zones.clone(), sink);
            self.service = Some(IngestService::new(objects, pipeline, CancellationToken::new()));
            self.zones = Some(zones);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(zones) = self.zones {
                rocket = rocket.manage(zones);
            }
            if let Some(service) = self.service {
                rocket = rocket.manage(service);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }
    }
}
