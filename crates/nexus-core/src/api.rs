//! HTTP surface: trigger, ingest, health, stats and metrics.

use crate::event::Event;
use crate::metrics::{self, INGEST_TOTAL};
use crate::notify::{Channel, HubStats, NotificationHub, emit_json};
use crate::records::Hotspot;
use crate::scanner::{BatchScanner, ScanTotals};
use crate::store::{MemoryStore, StoreCounts};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Hotspots echoed back by the trigger endpoint.
const TRIGGER_PREVIEW: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub scanner: Arc<BatchScanner>,
    pub store: Arc<MemoryStore>,
    pub hub: Arc<NotificationHub>,
    pub trigger_limit: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/trigger-analysis", post(trigger_analysis))
        .route("/ingest", post(ingest))
        .route("/ingest/batch", post(ingest_batch))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

// SIMD-JSON extractor

pub struct SimdJson<T>(pub T);

impl<T, S> FromRequest<S> for SimdJson<T>
where
    T: for<'de> Deserialize<'de> + Send,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| e.into_response())?;
        let mut buf = bytes.to_vec();

        let value = simd_json::from_slice::<T>(&mut buf).map_err(|e| {
            debug!(error = %e, "Rejected request body");
            (StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}")).into_response()
        })?;

        Ok(SimdJson(value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub status: String,
    pub message: String,
    pub hotspots_detected: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictions_generated: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotspots: Option<Vec<Hotspot>>,
}

/// Always 200; a failed scan is reported in the body.
pub async fn trigger_analysis(State(state): State<AppState>) -> Json<TriggerResponse> {
    info!(limit = state.trigger_limit, "Manual analysis triggered");

    match state.scanner.scan(state.trigger_limit).await {
        Ok(report) => {
            let detected = report.hotspots.len();
            let update = json!({
                "status": "analysis_complete",
                "hotspots_detected": detected,
                "timestamp": Utc::now(),
            });
            let delivered = emit_json(
                state.hub.as_ref(),
                Channel::Emissions,
                "emissions",
                &update,
            );
            if let Err(e) = delivered {
                debug!(error = %e, "Emissions update not delivered");
            }

            let mut hotspots = report.hotspots;
            hotspots.truncate(TRIGGER_PREVIEW);
            Json(TriggerResponse {
                status: "success".into(),
                message: format!("Analysis complete. Detected {detected} hotspots."),
                hotspots_detected: detected,
                predictions_generated: Some(report.predictions_generated),
                hotspots: Some(hotspots),
            })
        }
        Err(e) => {
            error!(error = %e, "Analysis failed");
            Json(TriggerResponse {
                status: "error".into(),
                message: e.to_string(),
                hotspots_detected: 0,
                predictions_generated: None,
                hotspots: None,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub duplicates: usize,
}

fn store_events(state: &AppState, events: Vec<Event>) -> Response {
    let blank = |e: &Event| e.id.trim().is_empty() || e.event_type.trim().is_empty();
    if let Some(bad) = events.iter().find(|e| blank(e)) {
        warn!(event_id = %bad.id, "Rejected event without id or type");
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            "event id and event_type are required",
        )
            .into_response();
    }

    let total = events.len();
    match state.store.insert_events(events) {
        Ok(accepted) => {
            INGEST_TOTAL.inc_by(accepted as u64);
            (
                StatusCode::ACCEPTED,
                Json(IngestResponse {
                    accepted,
                    duplicates: total - accepted,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to store events");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

pub async fn ingest(State(state): State<AppState>, SimdJson(event): SimdJson<Event>) -> Response {
    store_events(&state, vec![event])
}

pub async fn ingest_batch(
    State(state): State<AppState>,
    SimdJson(events): SimdJson<Vec<Event>>,
) -> Response {
    store_events(&state, events)
}

pub async fn metrics_handler() -> Result<String, StatusCode> {
    metrics::render().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub version: &'static str,
    pub status: &'static str,
    pub store: StoreCounts,
    pub scans: ScanTotals,
    pub notifications: HubStats,
}

pub async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, StatusCode> {
    let store = state.store.counts().map_err(|e| {
        error!(error = %e, "Failed to read store counts");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok(Json(StatsResponse {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        store,
        scans: state.scanner.totals(),
        notifications: state.hub.stats(),
    }))
}
