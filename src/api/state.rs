//! Shared handler state

use crate::config::PulseConfig;
use crate::recommend::Recommender;
use std::sync::Arc;

/// State cloned into every handler
#[derive(Clone)]
pub struct AppState {
    /// Scorer facade
    pub recommender: Arc<Recommender>,
    /// Largest accepted event batch
    pub max_batch: usize,
    /// Limit used when the query has none
    pub default_limit: usize,
    pub max_limit: usize,
    pub default_diversity: f32,
    pub default_freshness: f32,
}

impl AppState {
    /// Create new state from the loaded configuration
    pub fn new(config: &PulseConfig, recommender: Arc<Recommender>) -> Self {
        Self {
            recommender,
            max_batch: config.server.max_batch,
            default_limit: config.recommender.default_limit,
            max_limit: config.recommender.max_limit,
            default_diversity: config.recommender.default_diversity,
            default_freshness: config.recommender.default_freshness,
        }
    }
}
