use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::browser::SessionPool;
use crate::enrich::{EnrichmentClient, EnrichmentResult, RecommendationResult, WineOffer};
use crate::error::{Result, ScraperError};
use crate::extract::{DetailRecord, ExtractionEngine, SearchResultRecord};
use crate::retry::{self, RetryPolicy};

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<SessionPool>,
    pub engine: Arc<ExtractionEngine>,
    pub enrichment: Option<Arc<EnrichmentClient>>,
    pub extraction_retry: RetryPolicy,
    pub enrichment_retry: RetryPolicy,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/search", get(search_wines))
        .route("/details", get(wine_details))
        .route("/description", post(generate_description))
        .route("/pairings", post(recommend_pairings))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ScraperError::Network(format!("Failed to bind {}: {}", addr, e)))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| ScraperError::Network(format!("Server error: {}", e)))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailParams {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptionRequest {
    #[serde(default)]
    facts: Vec<String>,
    #[serde(default)]
    reviews: Vec<String>,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PairingRequest {
    dish: String,
    wines: Vec<WineOffer>,
}

async fn search_wines(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> (StatusCode, Json<ApiResponse<Vec<SearchResultRecord>>>) {
    let Some(query) = params.query.filter(|q| !q.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Missing query param".to_string())),
        );
    };

    match run_search(&state, &query).await {
        Ok(records) => (StatusCode::OK, Json(ApiResponse::success(records))),
        Err(e) => {
            error!("Search for '{}' failed: {}", query, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Search failed".to_string())),
            )
        }
    }
}

async fn wine_details(
    State(state): State<AppState>,
    Query(params): Query<DetailParams>,
) -> (StatusCode, Json<ApiResponse<DetailRecord>>) {
    let Some(path) = params.url.filter(|u| !u.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Missing url param".to_string())),
        );
    };

    match run_detail(&state, &path).await {
        Ok(record) => (StatusCode::OK, Json(ApiResponse::success(record))),
        Err(e) => {
            error!("Detail fetch for '{}' failed: {}", path, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Detail fetch failed".to_string())),
            )
        }
    }
}

async fn generate_description(
    State(state): State<AppState>,
    Json(payload): Json<DescriptionRequest>,
) -> (StatusCode, Json<ApiResponse<EnrichmentResult>>) {
    if payload.facts.is_empty() && payload.reviews.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "Request must carry facts or reviews".to_string(),
            )),
        );
    }

    let Some(client) = state.enrichment.clone() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("Enrichment not configured".to_string())),
        );
    };

    let language = crate::enrich::Language::from_code(payload.language.as_deref().unwrap_or("it"));

    let facts = &payload.facts;
    let reviews = &payload.reviews;
    let result = retry::execute(
        || {
            let client = client.clone();
            async move { client.describe(facts, reviews, language).await }
        },
        state.enrichment_retry,
    )
    .await;

    match result {
        Ok(enrichment) => (StatusCode::OK, Json(ApiResponse::success(enrichment))),
        Err(e) => {
            error!("Description generation failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Description failed".to_string())),
            )
        }
    }
}

async fn recommend_pairings(
    State(state): State<AppState>,
    Json(payload): Json<PairingRequest>,
) -> (StatusCode, Json<ApiResponse<RecommendationResult>>) {
    if payload.dish.trim().is_empty() || payload.wines.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "Request must carry a dish and candidate wines".to_string(),
            )),
        );
    }

    let Some(client) = state.enrichment.clone() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("Enrichment not configured".to_string())),
        );
    };

    let dish = payload.dish.as_str();
    let wines = &payload.wines;
    let result = retry::execute(
        || {
            let client = client.clone();
            async move { client.recommend(dish, wines).await }
        },
        state.enrichment_retry,
    )
    .await;

    match result {
        Ok(recommendations) => (StatusCode::OK, Json(ApiResponse::success(recommendations))),
        Err(e) => {
            error!("Pairing recommendation for '{}' failed: {}", payload.dish, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Pairing recommendation failed".to_string())),
            )
        }
    }
}

/// Acquire a session, run one search attempt against it, and recycle the
/// session when the attempt left it unusable. The whole cycle repeats under
/// the extraction retry budget, so a fresh attempt gets a fresh session.
async fn run_search(state: &AppState, query: &str) -> Result<Vec<SearchResultRecord>> {
    retry::execute(
        || {
            let pool = state.pool.clone();
            let engine = state.engine.clone();
            async move {
                let mut lease = pool.acquire().await?;
                match engine.search(lease.session(), query).await {
                    Ok(records) => Ok(records),
                    Err(e) => {
                        if poisons_session(&e) {
                            lease.mark_broken();
                        }
                        Err(e)
                    }
                }
            }
        },
        state.extraction_retry,
    )
    .await
}

async fn run_detail(state: &AppState, path: &str) -> Result<DetailRecord> {
    retry::execute(
        || {
            let pool = state.pool.clone();
            let engine = state.engine.clone();
            async move {
                let mut lease = pool.acquire().await?;
                match engine.fetch_detail(lease.session(), path).await {
                    Ok(record) => Ok(record),
                    Err(e) => {
                        if poisons_session(&e) {
                            lease.mark_broken();
                        }
                        Err(e)
                    }
                }
            }
        },
        state.extraction_retry,
    )
    .await
}

fn poisons_session(error: &Box<dyn std::error::Error + Send + Sync>) -> bool {
    error
        .downcast_ref::<ScraperError>()
        .map(ScraperError::poisons_session)
        .unwrap_or(true)
}
