//! HTTP API server for event ingestion and recommendations

use super::state::AppState;
use crate::error::PulseError;
use crate::recommend::{FailedStrategy, StrategyStats};
use crate::types::{FeedbackRecord, RecommendationCandidate, RecommendationRequest, StrategyKind};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

impl IntoResponse for PulseError {
    fn into_response(self) -> Response {
        let status = match &self {
            PulseError::Validation(_) => StatusCode::BAD_REQUEST,
            PulseError::Forbidden(_) => StatusCode::FORBIDDEN,
            PulseError::ServiceUnavailable(_) | PulseError::Strategy(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// API server
pub struct ApiServer {
    addr: SocketAddr,
    state: AppState,
}

impl ApiServer {
    /// Create new API server
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Build router
    pub fn router(state: AppState) -> Router {
        Router::new()
            // Collection
            .route("/events", post(ingest_handler))
            // Scoring
            .route("/recommendations", get(recommendations_handler))
            .route("/recommendations/feedback", post(feedback_handler))
            .route("/recommendations/stats", get(stats_handler))
            // Health check
            .route("/health", get(health_handler))
            // State
            .with_state(state)
            // Middleware
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = Self::router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("API server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        info!("API server stopped");
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct IngestResponse {
    accepted: usize,
    dropped: usize,
}

/// Event batch handler
async fn ingest_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<IngestResponse>, PulseError> {
    let events = body
        .get("events")
        .and_then(Value::as_array)
        .ok_or_else(|| PulseError::Validation("body must contain an events array".to_string()))?;
    if events.len() > state.max_batch {
        return Err(PulseError::Validation(format!(
            "batch of {} events exceeds the limit of {}",
            events.len(),
            state.max_batch
        )));
    }

    let report = state.recommender.ingest(events.clone()).await?;
    if report.dropped > 0 {
        warn!("Dropped {} of {} events", report.dropped, events.len());
    }
    Ok(Json(IngestResponse {
        accepted: report.accepted,
        dropped: report.dropped,
    }))
}

/// Query string of `GET /recommendations`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationQuery {
    subject_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<usize>,
    category_id: Option<String>,
    content_id: Option<String>,
    exclude_seen: Option<bool>,
    diversity: Option<f32>,
    freshness: Option<f32>,
}

/// Resolve the query into a request and the label echoed back as `type`
fn build_request(
    query: RecommendationQuery,
    state: &AppState,
) -> Result<(String, RecommendationRequest), PulseError> {
    let label = query
        .kind
        .as_deref()
        .map(|k| k.trim().to_ascii_lowercase())
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| "mixed".to_string());

    let strategies: BTreeSet<StrategyKind> = if label == "mixed" {
        let mut set: BTreeSet<StrategyKind> = [StrategyKind::Personal, StrategyKind::Trending]
            .into_iter()
            .collect();
        if query.content_id.is_some() {
            set.insert(StrategyKind::Similar);
        }
        if query.category_id.is_some() {
            set.insert(StrategyKind::Category);
        }
        if query.subject_id.is_some() {
            set.insert(StrategyKind::Collaborative);
        }
        set
    } else {
        let kind: StrategyKind = label.parse().map_err(PulseError::Validation)?;
        [kind].into_iter().collect()
    };

    let limit = query.limit.unwrap_or(state.default_limit);
    if limit == 0 || limit > state.max_limit {
        return Err(PulseError::Validation(format!(
            "limit must be between 1 and {}",
            state.max_limit
        )));
    }

    let request = RecommendationRequest {
        subject_id: query.subject_id,
        strategies,
        diversity_factor: query.diversity.unwrap_or(state.default_diversity),
        freshness_factor: query.freshness.unwrap_or(state.default_freshness),
        exclude_seen: query.exclude_seen.unwrap_or(true),
        limit,
        category_filter: query.category_id,
        seed_content_id: query.content_id,
    };
    request.validate().map_err(PulseError::Validation)?;
    Ok((label, request))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseMetadata {
    #[serde(rename = "type")]
    kind: String,
    count: usize,
    generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    failed_strategies: Vec<FailedStrategy>,
}

#[derive(Debug, Serialize)]
struct RecommendationsResponse {
    recommendations: Vec<RecommendationCandidate>,
    metadata: ResponseMetadata,
}

/// Recommendations handler
async fn recommendations_handler(
    State(state): State<AppState>,
    Query(query): Query<RecommendationQuery>,
) -> Result<Json<RecommendationsResponse>, PulseError> {
    let (label, request) = build_request(query, &state)?;
    let out = state.recommender.recommend(request).await?;
    Ok(Json(RecommendationsResponse {
        metadata: ResponseMetadata {
            kind: label,
            count: out.candidates.len(),
            generated_at: out.generated_at,
            reason: out.reason,
            failed_strategies: out.failed_strategies,
        },
        recommendations: out.candidates,
    }))
}

/// Feedback handler
async fn feedback_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, PulseError> {
    let record: FeedbackRecord = serde_json::from_value(body)
        .map_err(|e| PulseError::Validation(format!("invalid feedback: {}", e)))?;
    let ack = state.recommender.feedback().record(record).await?;
    Ok(Json(ack))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    strategies: BTreeMap<StrategyKind, StrategyStats>,
}

/// Per-strategy metrics handler
async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        strategies: state.recommender.feedback().stats(),
    })
}

/// Health check handler
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
    catalog_version: u64,
    events: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, events) = match state.recommender.events().count().await {
        Ok(count) => ("ok", count),
        Err(e) => {
            warn!("Event store unavailable: {}", e);
            ("degraded", 0)
        }
    };
    Json(HealthResponse {
        status: status.to_string(),
        service: "readerpulse".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        catalog_version: state.recommender.catalog().snapshot().version,
        events,
    })
}
