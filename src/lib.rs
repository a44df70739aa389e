//! Readerpulse - reader telemetry and content recommendations
//!
//! Two cooperating halves:
//! - **Collector**: instrumentation hooks and a tracker that turn page
//!   activity into timestamped events, buffered by an at-least-once queue
//!   and delivered in batches to the collection endpoint
//! - **Scorer**: independent ranking strategies (personal, trending,
//!   similar, category) merged into one list, with feedback that adjusts
//!   future scores per subject
//!
//! # Architecture
//!
//! - **Types**: Core data structures (Event, ContentItem, RecommendationCandidate)
//! - **Collector**: Hooks, session register, event queue, HTTP transport
//! - **Recommend**: Catalog cache, strategies, merger, feedback recorder
//! - **Store**: Event store and feedback log behind async traits
//! - **API**: axum endpoints for ingestion, recommendations and feedback
//!
//! # Example
//!
//! ```ignore
//! use readerpulse_core::{PulseConfig, RecommendationRequest, Recommender};
//!
//! let recommendations = recommender
//!     .recommend(RecommendationRequest {
//!         subject_id: Some("reader-42".to_string()),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

pub mod api;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod privacy;
pub mod recommend;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::PulseConfig;
pub use error::{DeliveryError, PulseError, Result};
pub use privacy::{PrivacyGuard, PseudonymizingGuard};
pub use recommend::{CandidateCache, FeedbackRecorder, Recommender};
pub use store::{EventStore, FeedbackLog, MemoryEventStore, MemoryFeedbackLog};
pub use types::{
    ContentItem, DeviceInfo, Event, EventType, FeedbackAction, FeedbackRecord,
    RecommendationCandidate, RecommendationRequest, StrategyKind,
};
