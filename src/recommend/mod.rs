//! Recommendation scoring service
//!
//! Strategies score a catalog snapshot independently; the merger reconciles
//! their outputs into one ranked list; the feedback recorder turns reactions
//! into decaying per-subject multipliers that strategies read back.

pub mod catalog;
pub mod engine;
pub mod feedback;
pub mod merger;
pub mod scoring;
pub mod strategies;

pub use catalog::{CandidateCache, CatalogSnapshot, ContentSource, JsonFileContentSource, StaticContentSource};
pub use engine::{FailedStrategy, IngestReport, Recommendations, Recommender};
pub use feedback::{FeedbackAck, FeedbackLedger, FeedbackRecorder, ServedRecommendation, ServedRegistry, StrategyStats};
pub use merger::{merge, MergeOutcome, NO_CANDIDATES};
pub use strategies::{
    CategoryStrategy, CollaborativeStrategy, FeedbackWeights, PersonalStrategy, SimilarStrategy, Strategy, StrategyError,
    StrategySet, SubjectContext, TrendingStrategy,
};
