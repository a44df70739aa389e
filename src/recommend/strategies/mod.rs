//! Recommendation strategy providers
//!
//! Strategies are pure and synchronous: everything they need is gathered into
//! a [`SubjectContext`] beforehand, so the engine can run them on the blocking
//! pool under a timeout. Each returns candidates sorted by
//! [`rank_order`](super::scoring::rank_order).

pub mod category;
pub mod collaborative;
pub mod personal;
pub mod similar;
pub mod trending;

pub use category::CategoryStrategy;
pub use collaborative::CollaborativeStrategy;
pub use personal::PersonalStrategy;
pub use similar::SimilarStrategy;
pub use trending::TrendingStrategy;

use super::scoring::clamp_unit;
use crate::config::RecommenderConfig;
use crate::types::{ContentItem, Event, RecommendationCandidate, StrategyKind};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("similar recommendations need a seed content id")]
    MissingSeed,

    #[error("seed content {0} is not in the catalog")]
    UnknownSeed(String),

    #[error("category recommendations need a category id")]
    MissingCategory,

    #[error("strategy timed out after {0}ms")]
    Timeout(u64),

    #[error("strategy failed: {0}")]
    Failed(String),
}

/// Feedback multipliers keyed by (strategy, category)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackWeights {
    multipliers: HashMap<(StrategyKind, String), f32>,
}

impl FeedbackWeights {
    pub fn new(multipliers: HashMap<(StrategyKind, String), f32>) -> Self {
        Self { multipliers }
    }

    /// 1.0 when no feedback applies
    pub fn multiplier(&self, strategy: StrategyKind, category_id: &str) -> f32 {
        self.multipliers
            .get(&(strategy, category_id.to_string()))
            .copied()
            .unwrap_or(1.0)
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty()
    }
}

/// Everything a strategy may read about the request and the subject
#[derive(Debug, Clone)]
pub struct SubjectContext {
    /// Pseudonymized subject, None for anonymous requests
    pub subject_key: Option<String>,
    pub now: DateTime<Utc>,
    /// Latest content interactions, newest first
    pub history: Vec<Event>,
    pub viewed: HashSet<String>,
    /// Content events of every subject inside the trending window
    pub activity: Vec<Event>,
    pub seed_content_id: Option<String>,
    pub category_filter: Option<String>,
    pub exclude_seen: bool,
    pub feedback: FeedbackWeights,
}

impl SubjectContext {
    /// Anonymous context with no signals
    pub fn anonymous(now: DateTime<Utc>) -> Self {
        Self {
            subject_key: None,
            now,
            history: Vec::new(),
            viewed: HashSet::new(),
            activity: Vec::new(),
            seed_content_id: None,
            category_filter: None,
            exclude_seen: false,
            feedback: FeedbackWeights::default(),
        }
    }

    /// Apply the subject's feedback multiplier, then clamp into [0, 1]
    pub fn adjust(&self, strategy: StrategyKind, category_id: &str, raw: f32) -> f32 {
        clamp_unit(raw * self.feedback.multiplier(strategy, category_id))
    }
}

/// A ranking algorithm
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Score the catalog for one request
    fn score(
        &self,
        ctx: &SubjectContext,
        catalog: &[ContentItem],
    ) -> Result<Vec<RecommendationCandidate>, StrategyError>;
}

/// One instance of every strategy, configured
#[derive(Clone)]
pub struct StrategySet {
    strategies: HashMap<StrategyKind, Arc<dyn Strategy>>,
}

impl StrategySet {
    /// Create the standard strategy set
    pub fn new(config: &RecommenderConfig) -> Self {
        let trending = TrendingStrategy::new(config.trending_window, config.trending_half_life);
        let personal = PersonalStrategy::new(trending.clone());
        let mut strategies: HashMap<StrategyKind, Arc<dyn Strategy>> = HashMap::new();
        strategies.insert(
            StrategyKind::Collaborative,
            Arc::new(CollaborativeStrategy::new(personal.clone())),
        );
        strategies.insert(StrategyKind::Personal, Arc::new(personal));
        strategies.insert(StrategyKind::Trending, Arc::new(trending));
        strategies.insert(StrategyKind::Similar, Arc::new(SimilarStrategy));
        strategies.insert(StrategyKind::Category, Arc::new(CategoryStrategy));
        Self { strategies }
    }

    /// Replace one strategy (tests inject slow or failing ones)
    pub fn with(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(&kind).cloned()
    }
}
