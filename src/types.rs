//! Core data structures shared by the collection pipeline and the scorer
//!
//! Wire format is camelCase JSON; event types travel as SCREAMING_SNAKE_CASE.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Kind of telemetry record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PageView,
    PageExit,
    Click,
    Search,
    ScrollDepth,
    ReadingProgress,
    ReadingTime,
    ReadingEnd,
    PerformanceTiming,
    LargestPaint,
    ErrorOccurred,
    SessionStart,
    SessionEnd,
    Like,
    Share,
    Comment,
    Bookmark,
    RecommendationFeedback,
}

impl EventType {
    /// Critical events bypass batching and flush immediately
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            EventType::SessionStart
                | EventType::SessionEnd
                | EventType::ErrorOccurred
                | EventType::Like
        )
    }

    /// Weight of this event as an interest signal for affinity building
    pub fn interaction_weight(&self) -> f32 {
        match self {
            EventType::Like => 1.0,
            EventType::Comment | EventType::Bookmark => 0.9,
            EventType::Share => 0.8,
            EventType::ReadingTime | EventType::ReadingEnd => 0.6,
            EventType::ReadingProgress => 0.4,
            EventType::PageView => 0.2,
            EventType::ScrollDepth => 0.1,
            _ => 0.1,
        }
    }

    /// Whether the event means the subject has seen the content
    pub fn marks_viewed(&self) -> bool {
        matches!(
            self,
            EventType::PageView
                | EventType::ReadingProgress
                | EventType::ReadingTime
                | EventType::ReadingEnd
        )
    }

    /// Stable wire name, also used as the rate-limit key
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "PAGE_VIEW",
            EventType::PageExit => "PAGE_EXIT",
            EventType::Click => "CLICK",
            EventType::Search => "SEARCH",
            EventType::ScrollDepth => "SCROLL_DEPTH",
            EventType::ReadingProgress => "READING_PROGRESS",
            EventType::ReadingTime => "READING_TIME",
            EventType::ReadingEnd => "READING_END",
            EventType::PerformanceTiming => "PERFORMANCE_TIMING",
            EventType::LargestPaint => "LARGEST_PAINT",
            EventType::ErrorOccurred => "ERROR_OCCURRED",
            EventType::SessionStart => "SESSION_START",
            EventType::SessionEnd => "SESSION_END",
            EventType::Like => "LIKE",
            EventType::Share => "SHARE",
            EventType::Comment => "COMMENT",
            EventType::Bookmark => "BOOKMARK",
            EventType::RecommendationFeedback => "RECOMMENDATION_FEEDBACK",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse device class derived from the environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Tablet,
    Mobile,
}

/// Viewport size in CSS pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Device snapshot taken once per session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_class: DeviceClass,
    pub os: String,
    pub browser: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_class: DeviceClass::Desktop,
            os: "unknown".to_string(),
            browser: "unknown".to_string(),
            viewport: Viewport::default(),
            locale: "und".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// A single timestamped telemetry record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: EventType,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    pub page_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default)]
    pub device_info: DeviceInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Event {
    /// Create an event with an empty payload
    pub fn new(
        event_type: EventType,
        session_id: impl Into<String>,
        page_url: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            payload: Map::new(),
            timestamp,
            session_id: session_id.into(),
            subject_id: None,
            content_id: None,
            page_url: page_url.into(),
            referrer: None,
            device_info: DeviceInfo::default(),
            context: None,
        }
    }

    pub fn with_subject(mut self, subject_id: Option<String>) -> Self {
        self.subject_id = subject_id;
        self
    }

    pub fn with_content(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Check the invariants an ingested event must hold
    ///
    /// `max_skew` bounds how far in the future a client clock may be.
    pub fn validate(&self, now: DateTime<Utc>, max_skew: Duration) -> Result<(), String> {
        if self.session_id.trim().is_empty() {
            return Err("sessionId is required".to_string());
        }
        if self.page_url.trim().is_empty() {
            return Err("pageUrl is required".to_string());
        }
        if self.timestamp > now + max_skew {
            return Err(format!("timestamp {} is in the future", self.timestamp));
        }
        if matches!(&self.content_id, Some(id) if id.trim().is_empty()) {
            return Err("contentId must not be blank".to_string());
        }
        Ok(())
    }
}

/// Bounded window of activity identified by a single session id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub max_scroll_depth_percent: u8,
    #[serde(default)]
    pub device_info: DeviceInfo,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity_at >= ttl
    }
}

/// Catalog record provided by the content-metadata store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub content_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub category_id: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub published_at: DateTime<Utc>,
    /// View count
    #[serde(default)]
    pub popularity: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub featured: bool,
}

/// The independent ranking algorithms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Personal,
    Trending,
    Similar,
    Category,
    Collaborative,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Personal,
        StrategyKind::Trending,
        StrategyKind::Similar,
        StrategyKind::Category,
        StrategyKind::Collaborative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Personal => "personal",
            StrategyKind::Trending => "trending",
            StrategyKind::Similar => "similar",
            StrategyKind::Category => "category",
            StrategyKind::Collaborative => "collaborative",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "personal" => Ok(StrategyKind::Personal),
            "trending" => Ok(StrategyKind::Trending),
            "similar" => Ok(StrategyKind::Similar),
            "category" => Ok(StrategyKind::Category),
            "collaborative" => Ok(StrategyKind::Collaborative),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

/// Content facts carried along with a candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMetadata {
    pub category_id: String,
    pub tags: BTreeSet<String>,
    pub published_at: DateTime<Utc>,
    pub popularity: u64,
}

impl From<&ContentItem> for CandidateMetadata {
    fn from(item: &ContentItem) -> Self {
        Self {
            category_id: item.category_id.clone(),
            tags: item.tags.clone(),
            published_at: item.published_at,
            popularity: item.popularity,
        }
    }
}

/// One scored recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationCandidate {
    pub content_id: String,
    pub score: f32,
    pub strategy: StrategyKind,
    /// Every strategy that proposed this content
    pub attribution: Vec<StrategyKind>,
    pub explanation: String,
    pub metadata: CandidateMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_id: Option<String>,
}

impl RecommendationCandidate {
    /// Build a candidate for `item`, clamping the score into [0, 1]
    pub fn new(
        item: &ContentItem,
        score: f32,
        strategy: StrategyKind,
        explanation: impl Into<String>,
    ) -> Self {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            content_id: item.content_id.clone(),
            score,
            strategy,
            attribution: vec![strategy],
            explanation: explanation.into(),
            metadata: CandidateMetadata::from(item),
            recommendation_id: None,
        }
    }
}

/// Parameters of one recommendation call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub subject_id: Option<String>,
    pub strategies: BTreeSet<StrategyKind>,
    pub diversity_factor: f32,
    pub freshness_factor: f32,
    pub exclude_seen: bool,
    pub limit: usize,
    pub category_filter: Option<String>,
    pub seed_content_id: Option<String>,
}

impl Default for RecommendationRequest {
    fn default() -> Self {
        Self {
            subject_id: None,
            strategies: [StrategyKind::Personal, StrategyKind::Trending]
                .into_iter()
                .collect(),
            diversity_factor: 0.0,
            freshness_factor: 0.0,
            exclude_seen: true,
            limit: 5,
            category_filter: None,
            seed_content_id: None,
        }
    }
}

impl RecommendationRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.limit == 0 {
            return Err("limit must be greater than zero".to_string());
        }
        if self.strategies.is_empty() {
            return Err("at least one strategy is required".to_string());
        }
        if !(0.0..=1.0).contains(&self.diversity_factor) {
            return Err("diversityFactor must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.freshness_factor) {
            return Err("freshnessFactor must be within [0, 1]".to_string());
        }
        Ok(())
    }
}

/// User reaction to a served recommendation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Clicked,
    Liked,
    Shared,
    NotInterested,
    Disliked,
    AlreadyRead,
}

impl FeedbackAction {
    /// Weight delta applied to the (subject, strategy, category) pairing
    pub fn weight_delta(&self) -> f32 {
        match self {
            FeedbackAction::Clicked => 0.05,
            FeedbackAction::Liked => 0.25,
            FeedbackAction::Shared => 0.35,
            FeedbackAction::NotInterested => -0.5,
            FeedbackAction::Disliked => -0.4,
            FeedbackAction::AlreadyRead => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Clicked => "clicked",
            FeedbackAction::Liked => "liked",
            FeedbackAction::Shared => "shared",
            FeedbackAction::NotInterested => "not_interested",
            FeedbackAction::Disliked => "disliked",
            FeedbackAction::AlreadyRead => "already_read",
        }
    }
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only feedback entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub recommendation_id: String,
    pub content_id: String,
    #[serde(default)]
    pub subject_id: Option<String>,
    pub action: FeedbackAction,
    pub timestamp: DateTime<Utc>,
    /// Category hint used when the served recommendation is unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Strategy hint used when the served recommendation is unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
}

impl FeedbackRecord {
    pub fn validate(&self) -> Result<(), String> {
        if self.recommendation_id.trim().is_empty() {
            return Err("recommendationId is required".to_string());
        }
        if self.content_id.trim().is_empty() {
            return Err("contentId is required".to_string());
        }
        Ok(())
    }
}
