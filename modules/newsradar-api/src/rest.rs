use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use newsradar_common::{EventKind, TrendingError};
use newsradar_trending::simulate::{DEFAULT_NUM_EVENTS, NUM_EVENTS_RANGE};

use crate::AppState;

// --- Request structs ---

#[derive(Deserialize)]
pub struct EventRequest {
    article_id: Uuid,
    user_id: Option<Uuid>,
    event_type: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Deserialize)]
pub struct TrendingQuery {
    lat: f64,
    lon: f64,
    radius: Option<f64>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct SimulateQuery {
    num_events: Option<usize>,
}

// --- Helpers ---

/// Validation → 400, store trouble → 503.
fn error_response(e: &TrendingError) -> Response {
    let status = match e {
        TrendingError::Validation(_) => StatusCode::BAD_REQUEST,
        TrendingError::Upstream(_) | TrendingError::Degraded { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        TrendingError::Config(_) | TrendingError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status != StatusCode::BAD_REQUEST {
        warn!(error = %e, "Trending request failed");
    }
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

fn bad_request(message: String) -> Response {
    error_response(&TrendingError::Validation(message))
}

// --- Handlers ---

pub async fn api_ingest_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EventRequest>,
) -> impl IntoResponse {
    let kind: EventKind = match body.event_type.parse() {
        Ok(kind) => kind,
        Err(e) => return error_response(&e),
    };

    match state
        .engine
        .ingest_event(body.article_id, body.user_id, kind, body.lat, body.lon)
        .await
    {
        Ok(event) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "seq": event.seq,
                "id": event.id,
                "cell": event.cell,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn api_trending(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendingQuery>,
) -> impl IntoResponse {
    let settings = state.engine.settings();
    let radius = params.radius.unwrap_or(settings.default_radius_km);
    let limit = params.limit.unwrap_or(10);
    if !(1..=settings.max_limit).contains(&limit) {
        return bad_request(format!("limit must be in 1..={}", settings.max_limit));
    }

    match state
        .engine
        .query_trending(params.lat, params.lon, radius, limit)
        .await
    {
        Ok(result) => Json(serde_json::json!({
            "total": result.articles.len(),
            "articles": result.articles,
            "stale": result.stale,
            "query_info": {
                "lat": params.lat,
                "lon": params.lon,
                "radius": radius,
                "limit": limit,
                "cells": result.cells,
            },
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn api_simulate_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SimulateQuery>,
) -> impl IntoResponse {
    let num_events = params.num_events.unwrap_or(DEFAULT_NUM_EVENTS);
    if !NUM_EVENTS_RANGE.contains(&num_events) {
        return bad_request(format!(
            "num_events must be in {}..={}",
            NUM_EVENTS_RANGE.start(),
            NUM_EVENTS_RANGE.end()
        ));
    }

    match state.engine.simulate_events(num_events).await {
        Ok(summary) => Json(serde_json::json!({
            "message": format!("Generated {} simulated events", summary.generated),
            "summary": summary,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn api_cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.cache_stats())
}
