use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use trolley_common::{ProductQuery, VerifiedProduct, DEFAULT_RESULT_LIMIT, MAX_RESULT_LIMIT};
use trolley_search::pipeline::PipelineStats;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    query: String,
    description: Option<String>,
    limit: Option<usize>,
    #[serde(default)]
    bypass_cache: bool,
}

#[derive(Serialize)]
struct SearchMetadata {
    query: String,
    limit: usize,
    results_count: usize,
    execution_time_ms: u64,
    cache_hit: bool,
    used_fallback_key: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct SearchResponse {
    success: bool,
    products: Vec<VerifiedProduct>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    products_without_price: Vec<VerifiedProduct>,
    metadata: SearchMetadata,
    debug: PipelineStats,
}

/// Requested limit clamped to something the pipeline will honour.
fn effective_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_RESULT_LIMIT).clamp(1, MAX_RESULT_LIMIT)
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"success": false, "error": message})),
    )
        .into_response()
}

pub async fn api_product_search(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(json) => json,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };

    let text = body.query.trim().to_string();
    if text.is_empty() {
        return bad_request("query must not be empty");
    }

    let query = ProductQuery {
        text,
        description: body.description,
        limit: effective_limit(body.limit),
        bypass_cache: body.bypass_cache,
    };

    let started = Instant::now();
    match state.pipeline.run(&query).await {
        Ok(outcome) => {
            let metadata = SearchMetadata {
                query: query.text,
                limit: query.limit,
                results_count: outcome.products.len(),
                execution_time_ms: outcome.stats.execution_ms,
                cache_hit: outcome.stats.cache_hit,
                used_fallback_key: outcome.stats.used_fallback_key,
                timestamp: Utc::now(),
            };
            Json(SearchResponse {
                success: true,
                products: outcome.products,
                products_without_price: outcome.products_without_price,
                metadata,
                debug: outcome.stats,
            })
            .into_response()
        }
        Err(e) => {
            error!(query = %query.text, error = %e, "Product search failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                    "metadata": { "execution_time_ms": started.elapsed().as_millis() as u64 },
                })),
            )
                .into_response()
        }
    }
}
