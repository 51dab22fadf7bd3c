#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the batch address geocoder.
//!
//! Settings come from the environment (see
//! [`GeocoderConfig::from_env`]) and are overridden by flags. Uses
//! `indicatif-log-bridge` (via [`address_geocoder_cli_utils::init_logger`])
//! so log lines and the progress bar never fight for the terminal.

use std::path::PathBuf;

use address_geocoder::fallback::FallbackResolver;
use address_geocoder::service_registry::{
    RegistryError, all_services, build_providers, select_services,
};
use address_geocoder_cli_utils::GeocodeProgress;
use address_geocoder_pipeline::config::parse_list;
use address_geocoder_pipeline::{Geocoder, GeocoderConfig};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "address_geocoder", about = "Batch address geocoder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Geocode a CSV or Parquet file with `id` and `address` columns
    Geocode {
        /// Input file (`.parquet`/`.pq` read as Parquet, anything else as CSV)
        #[arg(long, short)]
        input: PathBuf,
        /// Output CSV file
        #[arg(long, short)]
        output: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Send a known address to every selected provider and report which
    /// ones answer (detects a bad API key before a long run)
    Check {
        /// Comma-separated provider ids (overrides `GEOCODER_PROVIDERS`)
        #[arg(long)]
        providers: Option<String>,
    },
    /// List all configured geocoding providers
    Providers,
    /// Start the HTTP API server (`BIND_ADDR`, `PORT`)
    Serve,
}

/// Flags overriding the environment configuration of a run.
#[derive(Args)]
struct RunOptions {
    /// Attach IRIS zone attributes to every result
    #[arg(long)]
    iris: bool,
    /// Directory of IRIS `GeoJSON` files (overrides `IRIS_GEOJSON_DIR`)
    #[arg(long)]
    iris_dir: Option<PathBuf>,
    /// Number of concurrent workers (overrides `MAX_WORKERS`)
    #[arg(long)]
    workers: Option<usize>,
    /// Addresses per chunk (overrides `CHUNKSIZE`)
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Addresses in flight per chunk (overrides `CHUNK_CONCURRENCY`)
    #[arg(long)]
    chunk_concurrency: Option<usize>,
    /// Comma-separated provider ids in fallback order (overrides
    /// `GEOCODER_PROVIDERS`)
    #[arg(long)]
    providers: Option<String>,
    /// Result language (overrides `GEOCODER_LANGUAGE`)
    #[arg(long)]
    language: Option<String>,
}

impl RunOptions {
    fn apply(self, config: &mut GeocoderConfig) {
        config.iris_geocoding_enabled |= self.iris;
        if let Some(dir) = self.iris_dir {
            config.iris_geojson_dir = dir;
        }
        if let Some(n) = self.workers {
            config.max_workers = n;
        }
        if let Some(n) = self.chunk_size {
            config.chunk_size = n;
        }
        if let Some(n) = self.chunk_concurrency {
            config.chunk_concurrency = n;
        }
        if let Some(ids) = self.providers {
            config.providers = parse_list(&ids);
        }
        if let Some(language) = self.language {
            config.language = language;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = address_geocoder_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Geocode {
            input,
            output,
            options,
        } => {
            let mut config = GeocoderConfig::from_env()?;
            options.apply(&mut config);
            let geocoder = Geocoder::from_config(&config)?;

            let progress = GeocodeProgress::new(&multi, "Reading input...");

            let result = geocoder.geocode_file(&input, &output, progress).await?;
            let summary = &result.summary;

            println!();
            println!("Wrote {}", output.display());
            println!("  rows read:  {}", summary.total_rows);
            println!("  rejected:   {}", summary.rejected_rows);
            println!("  geocoded:   {}", summary.geocoded);
            println!("  failed:     {}", summary.failed);
            println!("  success:    {:.1}%", summary.success_ratio * 100.0);
            println!("  elapsed:    {:.1?}", summary.elapsed);

            for rejected in &result.rejected {
                log::debug!("Rejected {rejected}");
            }
        }
        Commands::Check { providers } => {
            let mut config = GeocoderConfig::from_env()?;
            if let Some(ids) = providers {
                config.providers = parse_list(&ids);
            }
            check(&config).await?;
        }
        Commands::Providers => list_providers()?,
        Commands::Serve => {
            // The server uses actix-web's runtime, so we need to run it
            // in a blocking task to avoid nesting tokio runtimes.
            tokio::task::spawn_blocking(|| {
                actix_web::rt::System::new().block_on(address_geocoder_server::run_server())
            })
            .await??;
        }
    }

    Ok(())
}

fn list_providers() -> Result<(), RegistryError> {
    println!(
        "{:<12} {:<14} {:<9} {:<8} BUDGET",
        "ID", "NAME", "PRIORITY", "ENABLED"
    );
    println!("{}", "-".repeat(64));
    for service in all_services()? {
        let budget = service.budget();
        let mut limits = Vec::new();
        if let Some(interval) = budget.min_interval {
            limits.push(format!("1 req / {interval:?}"));
        }
        if let Some(quota) = budget.quota {
            limits.push(format!("{} req / {:?}", quota.max_requests, quota.window));
        }
        if let Some(env_var) = service.api_key_env() {
            limits.push(format!("key: {env_var}"));
        }
        println!(
            "{:<12} {:<14} {:<9} {:<8} {}",
            service.id,
            service.name,
            service.priority,
            if service.enabled { "yes" } else { "no" },
            limits.join(", ")
        );
    }
    Ok(())
}

/// Probes every selected provider once.
async fn check(config: &GeocoderConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let services = select_services(&config.providers, config.opencage_api_key.as_deref())?;
    let client = address_geocoder::build_http_client(&config.user_agent, config.request_timeout)?;
    let providers = build_providers(&services, &client, config.opencage_api_key.as_deref())?;
    let resolver =
        FallbackResolver::new(providers, config.request_timeout, config.max_address_length)
            .with_language(&config.language);

    println!("Probing {} provider(s)...", resolver.providers().len());
    let mut failed = 0;
    for attempt in resolver.probe().await {
        match &attempt.error {
            None => println!("  {:<12} ok ({:.0?})", attempt.provider, attempt.latency),
            Some(e) => {
                failed += 1;
                println!("  {:<12} FAILED: {e}", attempt.provider);
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} provider(s) failed the check").into());
    }
    Ok(())
}
