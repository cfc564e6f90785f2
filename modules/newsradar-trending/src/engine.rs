use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use newsradar_common::{
    EventKind, GeoPoint, InteractionEvent, NewInteraction, TrendingError, TrendingSettings,
};
use newsradar_events::InteractionStore;

use crate::articles::ArticleStore;
use crate::cache::{CacheStats, EventDisposition, TrendingCache};
use crate::decay::DecayPolicy;
use crate::geo::GeoBucketer;
use crate::resolver::{QueryResolver, TrendingResult};
use crate::simulate::{generate_events, SimulationSummary, SAMPLE_ARTICLES};

/// The two operations exposed to the outside (event ingestion and the
/// trending query) plus the event simulator, wired over one cache.
pub struct TrendingEngine {
    settings: TrendingSettings,
    bucketer: GeoBucketer,
    events: Arc<dyn InteractionStore>,
    articles: Arc<dyn ArticleStore>,
    cache: Arc<TrendingCache>,
    resolver: QueryResolver,
}

impl TrendingEngine {
    pub fn new(
        settings: TrendingSettings,
        events: Arc<dyn InteractionStore>,
        articles: Arc<dyn ArticleStore>,
    ) -> Result<Self, TrendingError> {
        settings.validate()?;
        let policy = Arc::new(DecayPolicy::from_settings(&settings)?);
        let bucketer = GeoBucketer::from_settings(&settings);
        let cache = Arc::new(TrendingCache::new(Arc::clone(&events), policy, &settings));
        let resolver = QueryResolver::new(bucketer.clone(), Arc::clone(&cache), Arc::clone(&articles));

        Ok(Self {
            settings,
            bucketer,
            events,
            articles,
            cache,
            resolver,
        })
    }

    pub fn settings(&self) -> &TrendingSettings {
        &self.settings
    }

    pub fn bucketer(&self) -> &GeoBucketer {
        &self.bucketer
    }

    pub fn cache(&self) -> &Arc<TrendingCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn spawn_sweep_loop(&self) -> JoinHandle<()> {
        self.cache.spawn_sweep_loop(self.settings.sweep_interval())
    }

    /// Validate, persist, then fold into the cached ranking of the event's cell.
    /// Nothing is stored if validation fails.
    pub async fn ingest_event(
        &self,
        article_id: Uuid,
        user_id: Option<Uuid>,
        kind: EventKind,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> Result<InteractionEvent, TrendingError> {
        let point = GeoPoint::from_optional(lat, lon)?;

        let mut event = NewInteraction::new(article_id, kind);
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        if let Some(point) = point {
            let cell = self.bucketer.cell_of(point.lat, point.lon)?;
            event = event.located(point, cell);
        }

        let stored = self
            .events
            .append(event)
            .await
            .map_err(|e| TrendingError::Upstream(format!("event append failed: {e}")))?;

        let disposition = self.cache.apply_event(&stored);
        debug!(
            seq = stored.seq,
            kind = %stored.kind,
            cell = ?stored.cell,
            ?disposition,
            "Interaction ingested"
        );
        Ok(stored)
    }

    /// Ranked articles for the disc of `radius_km` around (lat, lon).
    pub async fn query_trending(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<TrendingResult, TrendingError> {
        if limit > self.settings.max_limit {
            return Err(TrendingError::Validation(format!(
                "limit {limit} exceeds the maximum of {}",
                self.settings.max_limit
            )));
        }
        self.resolver.trending(lat, lon, radius_km, limit).await
    }

    /// Generate and ingest synthetic events over the first articles in the store.
    pub async fn simulate_events(&self, num_events: usize) -> Result<SimulationSummary, TrendingError> {
        let article_ids = self
            .articles
            .sample_ids(SAMPLE_ARTICLES)
            .await
            .map_err(|e| TrendingError::Upstream(format!("article sample failed: {e}")))?;

        let events = generate_events(
            &mut rand::rng(),
            &self.bucketer,
            &article_ids,
            num_events,
            Utc::now(),
            self.settings.retention(),
        )?;
        let summary = SimulationSummary::of(&events, article_ids.len());

        let stored = self
            .events
            .append_batch(events)
            .await
            .map_err(|e| TrendingError::Upstream(format!("simulated event append failed: {e}")))?;

        let applied = stored
            .iter()
            .filter(|e| self.cache.apply_event(e) != EventDisposition::Skipped)
            .count();

        info!(
            generated = summary.generated,
            articles = summary.articles,
            applied,
            "Simulated events ingested"
        );
        Ok(summary)
    }
}
