pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, EventWeights, TrendingSettings};
pub use error::TrendingError;
pub use types::*;
