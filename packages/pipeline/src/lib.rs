#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch geocoding engine.
//!
//! Takes a table of `(id, address)` rows and produces one output row per
//! valid input row, in input order:
//!
//! 1. Rows are validated; malformed rows are reported and excluded.
//! 2. Valid records are split into fixed-size chunks.
//! 3. A pool of workers resolves each chunk through the provider
//!    fallback chain, under per-provider rate governors.
//! 4. Results are optionally enriched with the containing IRIS zone.
//! 5. Chunk outputs are reassembled in input order.
//!
//! Geocoding failures are data (`encoder = "none"`), not run failures.
//! Configuration and zone-loading problems abort before any request is
//! sent.

pub mod aggregate;
pub mod config;
pub mod input;
pub mod progress;
pub mod scheduler;
pub mod table;

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use address_geocoder::SetupError;
use address_geocoder::fallback::FallbackResolver;
use address_geocoder::service_registry::{build_providers, select_services};
use address_geocoder_models::{InputRowError, OutputRow};
use address_geocoder_spatial::{SpatialError, ZoneIndex};
use thiserror::Error;

pub use crate::config::{ConfigError, GeocoderConfig};
use crate::input::{InputRow, validate_rows};
use crate::progress::ProgressCallback;
use crate::scheduler::{ChunkWorker, RetryPolicy, run_pool, split_chunks};
pub use crate::table::TableError;

/// Errors that stop a run. Per-address failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Providers could not be set up (unknown id, missing API key...).
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// The IRIS dataset could not be loaded.
    #[error("failed to load IRIS zones: {0}")]
    Spatial(#[from] SpatialError),

    /// Reading the input or writing the output failed.
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Counters describing a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Rows read from the input.
    pub total_rows: usize,
    /// Rows rejected by validation.
    pub rejected_rows: usize,
    /// Rows resolved by some provider.
    pub geocoded: usize,
    /// Rows no provider could resolve.
    pub failed: usize,
    /// Number of chunks scheduled.
    pub chunks: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// `geocoded / (geocoded + failed)`, or 0 for an empty run.
    pub success_ratio: f64,
    /// `failed / (geocoded + failed)`, or 0 for an empty run.
    pub error_ratio: f64,
}

impl RunSummary {
    #[allow(clippy::cast_precision_loss)]
    fn new(
        total_rows: usize,
        rejected_rows: usize,
        rows: &[OutputRow],
        chunks: usize,
        elapsed: Duration,
    ) -> Self {
        let geocoded = rows
            .iter()
            .filter(|r| r.enriched.result.is_resolved())
            .count();
        let failed = rows.len() - geocoded;
        let (success_ratio, error_ratio) = if rows.is_empty() {
            (0.0, 0.0)
        } else {
            (
                geocoded as f64 / rows.len() as f64,
                failed as f64 / rows.len() as f64,
            )
        };

        Self {
            total_rows,
            rejected_rows,
            geocoded,
            failed,
            chunks,
            elapsed,
            success_ratio,
            error_ratio,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct GeocodeOutput {
    /// One row per valid input row, in input order.
    pub rows: Vec<OutputRow>,
    /// Rows excluded by validation.
    pub rejected: Vec<InputRowError>,
    /// Run counters.
    pub summary: RunSummary,
}

/// The configured engine: provider chain, optional zone index and pool
/// sizing. Cheap to clone; clones share rate governors and zones.
#[derive(Debug, Clone)]
pub struct Geocoder {
    resolver: FallbackResolver,
    zones: Option<Arc<ZoneIndex>>,
    max_workers: usize,
    chunk_size: usize,
    chunk_concurrency: usize,
    retry: RetryPolicy,
}

impl Geocoder {
    /// Assembles an engine from already-built parts.
    #[must_use]
    pub fn new(
        config: &GeocoderConfig,
        resolver: FallbackResolver,
        zones: Option<Arc<ZoneIndex>>,
    ) -> Self {
        Self {
            resolver,
            zones,
            max_workers: config.max_workers,
            chunk_size: config.chunk_size,
            chunk_concurrency: config.chunk_concurrency,
            retry: RetryPolicy {
                max_attempts: config.max_retry_no,
                initial_delay: config.retry_delay,
            },
        }
    }

    /// Builds the provider chain and, if enrichment is enabled, the zone
    /// index described by `config`.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::Config`] if `config` is invalid
    /// * [`PipelineError::Setup`] if providers cannot be built
    /// * [`PipelineError::Spatial`] if the IRIS dataset fails to load
    pub fn from_config(config: &GeocoderConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let services = select_services(&config.providers, config.opencage_api_key.as_deref())?;
        let client = address_geocoder::build_http_client(&config.user_agent, config.request_timeout)?;
        let providers = build_providers(&services, &client, config.opencage_api_key.as_deref())?;
        log::info!(
            "Provider chain: {}",
            providers
                .iter()
                .map(address_geocoder::GovernedProvider::name)
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        let resolver =
            FallbackResolver::new(providers, config.request_timeout, config.max_address_length)
                .with_language(&config.language);

        let zones = if config.iris_geocoding_enabled {
            Some(Arc::new(ZoneIndex::load(&config.iris_geojson_dir)?))
        } else {
            None
        };

        Ok(Self::new(config, resolver, zones))
    }

    /// A copy of this engine with a different result language and zone
    /// index. Rate governors stay shared with `self`.
    #[must_use]
    pub fn with_options(&self, language: &str, zones: Option<Arc<ZoneIndex>>) -> Self {
        Self {
            resolver: self.resolver.with_language(language),
            zones,
            ..self.clone()
        }
    }

    /// The provider fallback chain.
    #[must_use]
    pub const fn resolver(&self) -> &FallbackResolver {
        &self.resolver
    }

    /// Whether output rows carry IRIS attributes.
    #[must_use]
    pub const fn enrichment_enabled(&self) -> bool {
        self.zones.is_some()
    }

    /// Geocodes `rows`.
    pub async fn run(
        &self,
        rows: Vec<InputRow>,
        progress: Arc<dyn ProgressCallback>,
    ) -> GeocodeOutput {
        let start = Instant::now();
        let total_rows = rows.len();

        let (records, rejected) = validate_rows(rows);
        if !rejected.is_empty() {
            log::warn!("{} input rows rejected", rejected.len());
        }

        progress.set_total(records.len() as u64);
        let chunks: Arc<[_]> = split_chunks(records, self.chunk_size).into();
        log::info!(
            "Geocoding {} addresses in {} chunks with {} workers",
            total_rows - rejected.len(),
            chunks.len(),
            self.max_workers
        );

        let worker = Arc::new(ChunkWorker::new(
            self.resolver.clone(),
            self.zones.clone(),
            self.chunk_concurrency,
            self.retry,
        ));
        let outputs = run_pool(
            Arc::clone(&chunks),
            worker,
            self.max_workers,
            Arc::clone(&progress),
        )
        .await;
        let rows = aggregate::assemble(&chunks, outputs);

        let summary = RunSummary::new(
            total_rows,
            rejected.len(),
            &rows,
            chunks.len(),
            start.elapsed(),
        );
        log::info!(
            "Geocoding finished in {:.1?}: {} geocoded, {} failed, {} rejected ({:.1}% success)",
            summary.elapsed,
            summary.geocoded,
            summary.failed,
            summary.rejected_rows,
            summary.success_ratio * 100.0
        );
        progress.finish(format!(
            "{} geocoded, {} failed",
            summary.geocoded, summary.failed
        ));

        GeocodeOutput {
            rows,
            rejected,
            summary,
        }
    }

    /// Reads CSV from `input`, geocodes it, and writes CSV to `output`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Table`] if the input cannot be read or
    /// the output cannot be written.
    pub async fn geocode_csv<R: Read, W: Write>(
        &self,
        input: R,
        output: W,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<GeocodeOutput, PipelineError> {
        let rows = table::read_rows(input)?;
        let result = self.run(rows, progress).await;
        table::write_rows(output, &result.rows, self.enrichment_enabled())?;
        Ok(result)
    }

    /// Reads a CSV or Parquet file, geocodes it, and writes CSV to
    /// `output`. `output` is only replaced once the whole table has been
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Table`] if the input cannot be read or
    /// the output cannot be written.
    pub async fn geocode_file(
        &self,
        input: &Path,
        output: &Path,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<GeocodeOutput, PipelineError> {
        let rows = table::read_path(input)?;
        log::info!("Read {} rows from {}", rows.len(), input.display());
        let result = self.run(rows, progress).await;
        table::write_path(output, &result.rows, self.enrichment_enabled())?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use address_geocoder::normalize::{FieldMapping, NOMINATIM};
    use address_geocoder::rate_limit::{RateBudget, RateGovernor};
    use address_geocoder::{GeocodeProvider, GovernedProvider, ProviderError};
    use address_geocoder_models::UNRESOLVED_ENCODER;
    use async_trait::async_trait;

    use super::*;
    use crate::progress::null_progress;

    /// Answers from a table; records the instant of every call.
    struct TableProvider {
        name: String,
        answers: BTreeMap<String, (f64, f64)>,
        calls: Mutex<Vec<tokio::time::Instant>>,
        latency: Duration,
    }

    impl TableProvider {
        fn new(name: &str, answers: &[(&str, (f64, f64))]) -> Self {
            Self {
                name: name.to_string(),
                answers: answers
                    .iter()
                    .map(|(a, c)| ((*a).to_string(), *c))
                    .collect(),
                calls: Mutex::new(Vec::new()),
                latency: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl GeocodeProvider for TableProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn field_mapping(&self) -> &FieldMapping {
            &NOMINATIM
        }

        async fn geocode(
            &self,
            query: &str,
            _language: &str,
        ) -> Result<serde_json::Value, ProviderError> {
            self.calls.lock().unwrap().push(tokio::time::Instant::now());
            assert_ne!(query, "boom", "provider crashed");

            // Vary completion order between addresses.
            let jitter = query.len() as u64 % 7;
            tokio::time::sleep(self.latency + Duration::from_millis(jitter)).await;

            match self.answers.get(query) {
                Some((lat, lon)) => Ok(serde_json::json!({
                    "lat": lat,
                    "lon": lon,
                    "address": { "city": "Test" }
                })),
                None => Err(ProviderError::NotFound),
            }
        }
    }

    fn governed(provider: &Arc<TableProvider>, budget: RateBudget) -> GovernedProvider {
        GovernedProvider::new(
            Arc::clone(provider) as Arc<dyn GeocodeProvider>,
            Arc::new(RateGovernor::new(&provider.name, budget)),
        )
    }

    fn engine(providers: Vec<GovernedProvider>, config: &GeocoderConfig) -> Geocoder {
        let resolver = FallbackResolver::new(
            providers,
            config.request_timeout,
            config.max_address_length,
        );
        Geocoder::new(config, resolver, None)
    }

    fn config(max_workers: usize, chunk_size: usize) -> GeocoderConfig {
        GeocoderConfig {
            max_workers,
            chunk_size,
            ..GeocoderConfig::default()
        }
    }

    fn batch(n: usize) -> (Vec<InputRow>, Vec<(String, (f64, f64))>) {
        let rows = (0..n)
            .map(|i| InputRow::new(i as u64 + 1, &format!("r{i}"), &format!("{i} Rue de Test")))
            .collect();
        // Every third address is unknown to the provider.
        let answers = (0..n)
            .filter(|i| i % 3 != 0)
            .map(|i| (format!("{i} Rue de Test"), (48.0 + i as f64 / 1000.0, 2.0)))
            .collect();
        (rows, answers)
    }

    fn table_provider(name: &str, answers: &[(String, (f64, f64))]) -> Arc<TableProvider> {
        let answers: Vec<(&str, (f64, f64))> =
            answers.iter().map(|(a, c)| (a.as_str(), *c)).collect();
        Arc::new(TableProvider::new(name, &answers))
    }

    #[tokio::test]
    async fn downing_street_single_provider() {
        let p1 = Arc::new(TableProvider::new(
            "P1",
            &[("10 Downing Street, London", (51.5034, -0.1276))],
        ));
        let geocoder = engine(vec![governed(&p1, RateBudget::unlimited())], &config(4, 100));

        let output = geocoder
            .run(
                vec![InputRow::new(1, "1", "10 Downing Street, London")],
                null_progress(),
            )
            .await;

        assert_eq!(output.rows.len(), 1);
        let row = &output.rows[0];
        assert_eq!(row.id, "1");
        assert_eq!(row.enriched.result.encoder, "P1");
        assert_eq!(row.enriched.result.latitude, Some(51.5034));
        assert_eq!(row.enriched.result.longitude, Some(-0.1276));
        assert_eq!(row.enriched.result.raw_address, "10 Downing Street, London");
        assert!(row.enriched.zone.is_none());
        assert_eq!(output.summary.geocoded, 1);
        assert!((output.summary.success_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_address_row_is_rejected_others_processed() {
        let p1 = Arc::new(TableProvider::new("P1", &[("Tour Eiffel", (48.85, 2.29))]));
        let geocoder = engine(vec![governed(&p1, RateBudget::unlimited())], &config(2, 1));

        let output = geocoder
            .run(
                vec![
                    InputRow::new(1, "2", ""),
                    InputRow::new(2, "3", "Tour Eiffel"),
                ],
                null_progress(),
            )
            .await;

        assert_eq!(output.rejected.len(), 1);
        assert_eq!(output.rejected[0].id.as_deref(), Some("2"));
        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.rows[0].id, "3");
        assert_eq!(output.summary.total_rows, 2);
        assert_eq!(output.summary.rejected_rows, 1);
        assert_eq!(p1.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn output_preserves_input_order() {
        let (rows, answers) = batch(50);
        let p1 = table_provider("P1", &answers);
        let geocoder = engine(vec![governed(&p1, RateBudget::unlimited())], &config(6, 4));

        let output = geocoder.run(rows, null_progress()).await;

        assert_eq!(output.rows.len(), 50);
        for (i, row) in output.rows.iter().enumerate() {
            assert_eq!(row.id, format!("r{i}"));
            assert_eq!(row.enriched.result.raw_address, format!("{i} Rue de Test"));
            let expected = if i % 3 == 0 { UNRESOLVED_ENCODER } else { "P1" };
            assert_eq!(row.enriched.result.encoder, expected);
        }
        assert_eq!(output.summary.chunks, 13);
        assert_eq!(output.summary.failed, 17);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_count_does_not_change_output() {
        let (rows, answers) = batch(40);

        let single = {
            let p = table_provider("P1", &answers);
            engine(vec![governed(&p, RateBudget::unlimited())], &config(1, 7))
                .run(rows.clone(), null_progress())
                .await
        };
        let many = {
            let p = table_provider("P1", &answers);
            engine(vec![governed(&p, RateBudget::unlimited())], &config(8, 7))
                .run(rows, null_progress())
                .await
        };

        assert_eq!(single.rows, many.rows);
    }

    #[derive(Default)]
    struct RecordingProgress {
        total: Mutex<u64>,
        done: Mutex<u64>,
        messages: Mutex<Vec<String>>,
    }

    impl ProgressCallback for RecordingProgress {
        fn set_total(&self, total: u64) {
            *self.total.lock().unwrap() = total;
        }
        fn inc(&self, delta: u64) {
            *self.done.lock().unwrap() += delta;
        }
        fn set_message(&self, msg: String) {
            self.messages.lock().unwrap().push(msg);
        }
        fn finish(&self, _msg: String) {}
    }

    #[tokio::test(start_paused = true)]
    async fn pool_shapes_keep_order_and_report_every_chunk() {
        // (workers, chunk size, rows): more workers than chunks, a chunk
        // count that is not a multiple of the worker count, one chunk.
        for (workers, chunk_size, n) in [(8, 10, 25), (3, 2, 21), (4, 100, 9), (5, 1, 5)] {
            let (rows, answers) = batch(n);
            let p = table_provider("P1", &answers);
            let geocoder = engine(
                vec![governed(&p, RateBudget::unlimited())],
                &config(workers, chunk_size),
            );
            let progress = Arc::new(RecordingProgress::default());

            let output = geocoder
                .run(rows, Arc::clone(&progress) as Arc<dyn ProgressCallback>)
                .await;

            let ids: Vec<String> = output.rows.iter().map(|r| r.id.clone()).collect();
            let expected: Vec<String> = (0..n).map(|i| format!("r{i}")).collect();
            assert_eq!(ids, expected, "workers={workers} chunk_size={chunk_size}");

            let chunks = n.div_ceil(chunk_size);
            assert_eq!(output.summary.chunks, chunks);
            assert_eq!(*progress.total.lock().unwrap(), n as u64);
            assert_eq!(*progress.done.lock().unwrap(), n as u64);
            let messages = progress.messages.lock().unwrap();
            assert_eq!(messages.len(), chunks);
            assert_eq!(messages.last().unwrap(), &format!("chunk {chunks}/{chunks}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_concurrency_keeps_order() {
        let (rows, answers) = batch(30);
        let p = table_provider("P1", &answers);
        let cfg = GeocoderConfig {
            chunk_concurrency: 5,
            ..config(2, 10)
        };

        let output = engine(vec![governed(&p, RateBudget::unlimited())], &cfg)
            .run(rows, null_progress())
            .await;

        let ids: Vec<String> = output.rows.iter().map(|r| r.id.clone()).collect();
        let expected: Vec<String> = (0..30).map(|i| format!("r{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn falls_back_across_providers() {
        let a = Arc::new(TableProvider::new("A", &[]));
        let b = Arc::new(TableProvider::new("B", &[("somewhere", (1.0, 2.0))]));
        let geocoder = engine(
            vec![
                governed(&a, RateBudget::unlimited()),
                governed(&b, RateBudget::unlimited()),
            ],
            &config(2, 10),
        );

        let output = geocoder
            .run(
                vec![
                    InputRow::new(1, "1", "somewhere"),
                    InputRow::new(2, "2", "nowhere"),
                ],
                null_progress(),
            )
            .await;

        assert_eq!(output.rows[0].enriched.result.encoder, "B");
        assert_eq!(output.rows[1].enriched.result.encoder, UNRESOLVED_ENCODER);
        assert!(output.rows[1].enriched.result.latitude.is_none());
        assert_eq!(a.calls.lock().unwrap().len(), 2);
        assert_eq!(b.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_budget_holds_under_concurrency() {
        let (rows, answers) = batch(24);
        let p = table_provider("P1", &answers);
        let interval = Duration::from_millis(250);
        let cfg = GeocoderConfig {
            chunk_concurrency: 3,
            ..config(8, 2)
        };

        let output = engine(vec![governed(&p, RateBudget::interval(interval))], &cfg)
            .run(rows, null_progress())
            .await;
        assert_eq!(output.rows.len(), 24);

        let mut calls = p.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls.len(), 24);
        for pair in calls.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn crashing_address_fails_alone_and_worker_continues() {
        let p = Arc::new(TableProvider::new(
            "P1",
            &[("a", (1.0, 1.0)), ("c", (3.0, 3.0)), ("d", (4.0, 4.0))],
        ));
        let cfg = config(1, 1);
        let geocoder = engine(vec![governed(&p, RateBudget::unlimited())], &cfg);

        let output = geocoder
            .run(
                vec![
                    InputRow::new(1, "1", "boom"),
                    InputRow::new(2, "2", "a"),
                    InputRow::new(3, "3", "c"),
                    InputRow::new(4, "4", "d"),
                ],
                null_progress(),
            )
            .await;

        let encoders: Vec<&str> = output
            .rows
            .iter()
            .map(|r| r.enriched.result.encoder.as_str())
            .collect();
        assert_eq!(encoders, vec!["none", "P1", "P1", "P1"]);
        assert_eq!(output.rows[0].enriched.result.raw_address, "boom");
        assert_eq!(output.summary.failed, 1);
        // Every attempt on "boom" reaches the provider, then one call each.
        assert_eq!(p.calls.lock().unwrap().len(), cfg.max_retry_no + 3);
    }

    /// Panics on the first call for each address, then answers.
    struct FlakyProvider {
        seen: Mutex<std::collections::BTreeSet<String>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl GeocodeProvider for FlakyProvider {
        fn name(&self) -> &str {
            "Flaky"
        }

        fn field_mapping(&self) -> &FieldMapping {
            &NOMINATIM
        }

        async fn geocode(
            &self,
            query: &str,
            _language: &str,
        ) -> Result<serde_json::Value, ProviderError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let first = self.seen.lock().unwrap().insert(query.to_string());
            assert!(!first, "connection reset");
            Ok(serde_json::json!({ "lat": 10.0, "lon": 20.0, "address": {} }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_failure_is_retried_with_backoff() {
        let flaky = Arc::new(FlakyProvider {
            seen: Mutex::new(std::collections::BTreeSet::new()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let cfg = GeocoderConfig {
            max_retry_no: 3,
            retry_delay: Duration::from_secs(2),
            ..config(1, 10)
        };
        let provider = GovernedProvider::new(
            Arc::clone(&flaky) as Arc<dyn GeocodeProvider>,
            Arc::new(RateGovernor::new("Flaky", RateBudget::unlimited())),
        );
        let geocoder = engine(vec![provider], &cfg);

        let start = tokio::time::Instant::now();
        let output = geocoder
            .run(vec![InputRow::new(1, "1", "1 Rue de la Paix")], null_progress())
            .await;

        assert_eq!(output.rows[0].enriched.result.encoder, "Flaky");
        assert_eq!(output.rows[0].enriched.result.latitude, Some(10.0));
        assert_eq!(flaky.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_doubles_between_attempts() {
        let p = Arc::new(TableProvider::new("P1", &[]));
        let cfg = GeocoderConfig {
            max_retry_no: 3,
            retry_delay: Duration::from_secs(1),
            ..config(1, 1)
        };
        let geocoder = engine(vec![governed(&p, RateBudget::unlimited())], &cfg);

        let output = geocoder
            .run(vec![InputRow::new(1, "1", "boom")], null_progress())
            .await;

        assert_eq!(output.rows[0].enriched.result.encoder, UNRESOLVED_ENCODER);
        let calls = p.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls[1] - calls[0] >= Duration::from_secs(1));
        assert!(calls[2] - calls[1] >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn enriches_with_containing_zone() {
        let zones = address_geocoder_spatial::loader::parse_collection(
            r#"{
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": {
                        "CODE_IRIS": "751072801", "INSEE_COM": "75107",
                        "NOM_COM": "Paris 7e Arrondissement", "IRIS": "2801",
                        "NOM_IRIS": "Gros Caillou 1", "TYP_IRIS": "H"
                    },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[2.28, 48.85], [2.30, 48.85], [2.30, 48.87], [2.28, 48.87], [2.28, 48.85]]]
                    }
                }]
            }"#,
            Path::new("test.geojson"),
        )
        .unwrap();
        let zones = Arc::new(ZoneIndex::new(zones));

        let p = Arc::new(TableProvider::new(
            "P1",
            &[
                ("Tour Eiffel", (48.8583, 2.2945)),
                ("10 Downing Street", (51.5034, -0.1276)),
            ],
        ));
        let cfg = config(2, 1);
        let resolver = FallbackResolver::new(
            vec![governed(&p, RateBudget::unlimited())],
            cfg.request_timeout,
            cfg.max_address_length,
        );
        let geocoder = Geocoder::new(&cfg, resolver, Some(zones));

        let mut out = Vec::new();
        let input = "id,address\n1,Tour Eiffel\n2,10 Downing Street\n3,Atlantis\n";
        let output = geocoder
            .geocode_csv(input.as_bytes(), &mut out, null_progress())
            .await
            .unwrap();

        let inside = output.rows[0].enriched.zone.as_ref().unwrap();
        assert_eq!(inside.iris_code, "751072801");
        assert_eq!(inside.iris_name, "Gros Caillou 1");
        assert!(output.rows[1].enriched.zone.is_none());
        assert!(output.rows[2].enriched.zone.is_none());

        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().next().unwrap().ends_with(",iris_type"));
        assert_eq!(text.lines().count(), 4);
    }

    #[tokio::test]
    async fn geocode_file_keeps_previous_output_on_failure() {
        let dir = std::env::temp_dir().join("address_geocoder_pipeline_geocode_file");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("in.csv");
        let output = dir.join("out.csv");
        std::fs::write(&output, "previous run").unwrap();

        let p = Arc::new(TableProvider::new("P1", &[("Tour Eiffel", (48.85, 2.29))]));
        let geocoder = engine(vec![governed(&p, RateBudget::unlimited())], &config(1, 10));

        std::fs::write(&input, "id,street\n1,x\n").unwrap();
        let result = geocoder.geocode_file(&input, &output, null_progress()).await;
        assert!(matches!(
            result,
            Err(PipelineError::Table(TableError::MissingColumn("address")))
        ));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "previous run");

        std::fs::write(&input, "id,address\n1,Tour Eiffel\n").unwrap();
        let result = geocoder
            .geocode_file(&input, &output, null_progress())
            .await
            .unwrap();
        assert_eq!(result.summary.geocoded, 1);
        let text = std::fs::read_to_string(&output).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with("Tour Eiffel,P1,true"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn csv_missing_column_is_an_error() {
        let p = Arc::new(TableProvider::new("P1", &[]));
        let geocoder = engine(vec![governed(&p, RateBudget::unlimited())], &config(1, 1));
        let result = geocoder
            .geocode_csv("id,street\n1,x\n".as_bytes(), Vec::<u8>::new(), null_progress())
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::Table(TableError::MissingColumn("address")))
        ));
    }

    #[tokio::test]
    async fn empty_input_produces_empty_output() {
        let p = Arc::new(TableProvider::new("P1", &[]));
        let geocoder = engine(vec![governed(&p, RateBudget::unlimited())], &config(4, 10));
        let output = geocoder.run(Vec::new(), null_progress()).await;
        assert!(output.rows.is_empty());
        assert_eq!(output.summary, RunSummary {
            elapsed: output.summary.elapsed,
            ..RunSummary::default()
        });
    }

    #[test]
    fn missing_zone_dataset_is_fatal() {
        let cfg = GeocoderConfig {
            iris_geocoding_enabled: true,
            iris_geojson_dir: std::env::temp_dir().join("address_geocoder_no_such_iris_dir"),
            providers: vec!["nominatim".to_string()],
            ..GeocoderConfig::default()
        };
        assert!(matches!(
            Geocoder::from_config(&cfg),
            Err(PipelineError::Spatial(SpatialError::NotFound(_)))
        ));
    }

    #[test]
    fn default_chain_leaves_out_opencage_without_key() {
        let geocoder = Geocoder::from_config(&GeocoderConfig::default()).unwrap();
        let names: Vec<&str> = geocoder
            .resolver()
            .providers()
            .iter()
            .map(GovernedProvider::name)
            .collect();
        assert_eq!(names, vec!["Nominatim", "Photon"]);
    }

    #[test]
    fn opencage_without_key_is_fatal() {
        let cfg = GeocoderConfig {
            providers: vec!["opencage".to_string()],
            ..GeocoderConfig::default()
        };
        assert!(matches!(
            Geocoder::from_config(&cfg),
            Err(PipelineError::Setup(SetupError::MissingApiKey { .. }))
        ));
    }
}
