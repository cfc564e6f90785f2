use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use newsradar_common::Config;
use newsradar_events::{InteractionStore, MemoryInteractionStore, PgInteractionStore};
use newsradar_trending::simulate::SAMPLE_ARTICLES;
use newsradar_trending::{ArticleStore, MemoryArticleStore, PgArticleStore, TrendingEngine};

mod rest;

pub struct AppState {
    pub engine: TrendingEngine,
}

async fn connect_stores(
    config: &Config,
) -> Result<(Arc<dyn InteractionStore>, Arc<dyn ArticleStore>)> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await?;
            let events = PgInteractionStore::new(pool.clone());
            events.migrate().await?;
            Ok((Arc::new(events), Arc::new(PgArticleStore::new(pool))))
        }
        None => {
            warn!(
                articles = SAMPLE_ARTICLES,
                "No DATABASE_URL, using in-memory stores with generated article ids"
            );
            let ids = (0..SAMPLE_ARTICLES).map(|_| Uuid::new_v4());
            Ok((
                Arc::new(MemoryInteractionStore::new()),
                Arc::new(MemoryArticleStore::with_ids(ids)),
            ))
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Trending API
        .route("/api/events", post(rest::api_ingest_event))
        .route("/api/trending", get(rest::api_trending))
        .route("/api/trending/simulate-events", post(rest::api_simulate_events))
        .route("/api/trending/stats", get(rest::api_cache_stats))
        .with_state(state)
        // CORS
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Rankings change every few seconds; never cache them downstream
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Logging layer: method + path + status + latency only
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                }),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("newsradar=info".parse()?))
        .init();

    let config = Config::from_env()?;
    let (events, articles) = connect_stores(&config).await?;

    let engine = TrendingEngine::new(config.trending.clone(), events, articles)?;
    engine.spawn_sweep_loop();

    let state = Arc::new(AppState { engine });
    let app = build_router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("Newsradar API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
