//! HTTP handler functions for the geocoding API.

use actix_web::{HttpResponse, web};
use address_geocoder_pipeline::progress::null_progress;
use address_geocoder_pipeline::{GeocodeOutput, PipelineError, TableError};
use address_geocoder_server_models::{ApiError, ApiHealth, ApiProvider, GeocodeParams};

use crate::AppState;

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/providers`
///
/// Lists the fallback chain in the order providers are tried.
pub async fn providers(state: web::Data<AppState>) -> HttpResponse {
    let chain: Vec<ApiProvider> = state
        .geocoder
        .resolver()
        .providers()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let budget = p.governor().budget();
            ApiProvider {
                name: p.name().to_string(),
                priority: i + 1,
                min_interval_ms: budget
                    .min_interval
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                quota: budget.quota.map(|q| q.max_requests),
                quota_window_secs: budget.quota.map(|q| q.window.as_secs()),
            }
        })
        .collect();

    HttpResponse::Ok().json(chain)
}

/// `POST /api/geocode`
///
/// Geocodes the CSV request body and answers with the output CSV. Run
/// counters are returned as `x-geocoder-*` headers.
pub async fn geocode(
    state: web::Data<AppState>,
    params: web::Query<GeocodeParams>,
    body: web::Bytes,
) -> HttpResponse {
    let language = params
        .language
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(state.default_language.as_str());

    let zones = if params.iris_geocoding.unwrap_or(state.iris_by_default) {
        match state.zones().await {
            Ok(zones) => Some(zones),
            Err(e) => {
                log::error!("IRIS enrichment unavailable: {e}");
                return error_response(HttpResponse::InternalServerError(), &e);
            }
        }
    } else {
        None
    };

    let geocoder = state.geocoder.with_options(language, zones);
    let mut csv = Vec::new();

    match geocoder
        .geocode_csv(body.as_ref(), &mut csv, null_progress())
        .await
    {
        Ok(output) => csv_response(&output, csv),
        Err(e @ PipelineError::Table(TableError::MissingColumn(_) | TableError::Read(_))) => {
            log::warn!("Rejected geocode request: {e}");
            error_response(HttpResponse::BadRequest(), &e)
        }
        Err(e) => {
            log::error!("Geocode request failed: {e}");
            error_response(HttpResponse::InternalServerError(), &e)
        }
    }
}

fn csv_response(output: &GeocodeOutput, csv: Vec<u8>) -> HttpResponse {
    let summary = &output.summary;
    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(("x-geocoder-total-rows", summary.total_rows.to_string()))
        .insert_header(("x-geocoder-rejected-rows", summary.rejected_rows.to_string()))
        .insert_header(("x-geocoder-geocoded", summary.geocoded.to_string()))
        .insert_header(("x-geocoder-failed", summary.failed.to_string()))
        .insert_header((
            "x-geocoder-success-ratio",
            format!("{:.4}", summary.success_ratio),
        ))
        .insert_header((
            "x-geocoder-elapsed-ms",
            summary.elapsed.as_millis().to_string(),
        ))
        .body(csv)
}

fn error_response(
    mut builder: actix_web::HttpResponseBuilder,
    error: &dyn std::error::Error,
) -> HttpResponse {
    builder.json(ApiError {
        error: error.to_string(),
    })
}
