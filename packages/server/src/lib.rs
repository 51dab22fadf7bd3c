#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for batch address geocoding.
//!
//! Accepts a CSV body on `POST /api/geocode` and answers with the
//! geocoded CSV. Run counters travel back as `x-geocoder-*` headers.
//! Every request shares one provider chain, so the providers' rate
//! budgets hold across concurrent requests.

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use address_geocoder_pipeline::{Geocoder, GeocoderConfig, PipelineError};
use address_geocoder_spatial::{SpatialError, ZoneIndex};
use tokio::sync::OnceCell;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Engine without zones; requests derive their own copy from it.
    pub geocoder: Geocoder,
    /// Language used when a request does not name one.
    pub default_language: String,
    /// Whether requests enrich with IRIS zones unless told otherwise.
    pub iris_by_default: bool,
    iris_dir: PathBuf,
    zones: OnceCell<Arc<ZoneIndex>>,
}

impl AppState {
    /// Builds the state from `config`. When enrichment is on by default
    /// the zone index is loaded now, so a bad dataset stops startup.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the configuration is invalid, the
    /// providers cannot be built or the zone index fails to load.
    pub fn from_config(config: &GeocoderConfig) -> Result<Self, PipelineError> {
        let base = GeocoderConfig {
            iris_geocoding_enabled: false,
            ..config.clone()
        };
        let geocoder = Geocoder::from_config(&base)?;

        let zones = if config.iris_geocoding_enabled {
            Some(Arc::new(ZoneIndex::load(&config.iris_geojson_dir)?))
        } else {
            None
        };

        Ok(Self::with_zones(geocoder, config, zones))
    }

    /// Wraps an already-built engine. Zones load lazily on first use.
    #[must_use]
    pub fn new(geocoder: Geocoder, config: &GeocoderConfig) -> Self {
        Self::with_zones(geocoder, config, None)
    }

    fn with_zones(
        geocoder: Geocoder,
        config: &GeocoderConfig,
        zones: Option<Arc<ZoneIndex>>,
    ) -> Self {
        Self {
            geocoder,
            default_language: config.language.clone(),
            iris_by_default: config.iris_geocoding_enabled,
            iris_dir: config.iris_geojson_dir.clone(),
            zones: OnceCell::new_with(zones),
        }
    }

    /// The zone index, loaded on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the dataset cannot be loaded. A failed
    /// load is retried on the next call.
    pub async fn zones(&self) -> Result<Arc<ZoneIndex>, SpatialError> {
        self.zones
            .get_or_try_init(|| async {
                let dir = self.iris_dir.clone();
                log::info!("Loading IRIS zones from {}", dir.display());
                tokio::task::spawn_blocking(move || ZoneIndex::load(&dir))
                    .await
                    .map_err(|e| SpatialError::Io {
                        path: self.iris_dir.clone(),
                        source: std::io::Error::other(e),
                    })?
                    .map(Arc::new)
            })
            .await
            .cloned()
    }
}

/// Starts the geocoding API server.
///
/// Reads [`GeocoderConfig`] from the environment, builds the provider
/// chain and serves on `BIND_ADDR:PORT` (default `127.0.0.1:8080`). The
/// caller provides the async runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the configuration is invalid,
/// the HTTP server fails to bind or it encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    let config = GeocoderConfig::from_env().map_err(std::io::Error::other)?;
    let state = web::Data::new(AppState::from_config(&config).map_err(std::io::Error::other)?);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_BODY_BYTES)).service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/providers", web::get().to(handlers::providers))
            .route("/geocode", web::post().to(handlers::geocode)),
    );
}
