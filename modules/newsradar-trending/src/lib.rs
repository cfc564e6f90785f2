//! Trending Engine: geo-bucketed, time-decayed article rankings.
//!
//! Interactions are bucketed into fixed-precision geohash cells. Each cell keeps
//! a ranking of articles by decayed engagement score, cached with a TTL and
//! recomputed from the event store on a single-flight basis. Fresh rankings are
//! kept current between recomputes by folding in newly ingested events. A query
//! merges the rankings of every cell covering its radius.

pub mod articles;
pub mod cache;
pub mod decay;
pub mod engine;
pub mod geo;
pub mod ranking;
pub mod resolver;
pub mod simulate;

pub use articles::{ArticleStore, MemoryArticleStore, PgArticleStore};
pub use cache::{CacheStats, CellLookup, EventDisposition, LookupSource, TrendingCache};
pub use decay::{decayed_contribution, DecayPolicy};
pub use engine::TrendingEngine;
pub use geo::{GeoBucketer, MAX_COVERING_CELLS};
pub use ranking::{rank_order, recompute, CellRanking};
pub use resolver::{QueryResolver, TrendingResult};
pub use simulate::SimulationSummary;
