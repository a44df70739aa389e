//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use readerpulse_core::collector::Transport;
use readerpulse_core::config::CollectorConfig;
use readerpulse_core::recommend::{CandidateCache, StaticContentSource};
use readerpulse_core::{
    ContentItem, DeliveryError, Event, EventType, ManualClock, MemoryEventStore,
    MemoryFeedbackLog, PseudonymizingGuard, PulseConfig, Recommender, SharedClock,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Fixed start instant so runs are reproducible
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn manual_clock() -> (ManualClock, SharedClock) {
    let clock = ManualClock::new(start_time());
    let shared: SharedClock = Arc::new(clock.clone());
    (clock, shared)
}

/// Collector settings with a fast request timeout
pub fn collector_config(batch_size: usize, flush_ms: u64, max_retries: u32) -> CollectorConfig {
    CollectorConfig {
        batch_size,
        flush_interval: std::time::Duration::from_millis(flush_ms),
        request_timeout: std::time::Duration::from_millis(200),
        max_retries,
        ..Default::default()
    }
}

pub fn page_view(n: usize, at: DateTime<Utc>) -> Event {
    Event::new(EventType::PageView, "s-1", format!("/articles/{}", n), at)
        .with_content(format!("c{}", n))
}

/// Transport that records batches and answers from a script
///
/// Once the script is exhausted every send succeeds.
#[derive(Default)]
pub struct RecordingTransport {
    script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    sent: Mutex<Vec<Vec<Event>>>,
    beacons: Mutex<Vec<Vec<Event>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: Vec<Result<(), DeliveryError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Every awaited attempt, failed ones included
    pub fn attempts(&self) -> Vec<Vec<Event>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn beacons(&self) -> Vec<Vec<Event>> {
        self.beacons.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, batch: &[Event]) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(batch.to_vec());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    fn beacon(&self, batch: Vec<Event>) {
        self.beacons.lock().unwrap().push(batch);
    }
}

/// Transport that never answers successfully
pub struct FailingTransport {
    pub error: DeliveryError,
}

#[async_trait]
impl Transport for FailingTransport {
    async fn send(&self, _batch: &[Event]) -> Result<(), DeliveryError> {
        Err(self.error.clone())
    }

    fn beacon(&self, _batch: Vec<Event>) {}
}

/// Transport that holds every send until a permit is released
pub struct GatedTransport {
    pub gate: Semaphore,
    pub entered: AtomicBool,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            entered: AtomicBool::new(false),
        }
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, _batch: &[Event]) -> Result<(), DeliveryError> {
        self.entered.store(true, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        permit.forget();
        Ok(())
    }

    fn beacon(&self, _batch: Vec<Event>) {}
}

/// Catalog item published `age_days` before `now`
pub fn item(
    id: &str,
    category: &str,
    tags: &[&str],
    age_days: i64,
    views: u64,
    now: DateTime<Utc>,
) -> ContentItem {
    ContentItem {
        content_id: id.to_string(),
        title: Some(format!("Article {}", id)),
        category_id: category.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        published_at: now - Duration::days(age_days),
        popularity: views,
        like_count: views / 20,
        featured: false,
    }
}

/// A small news catalog across sports, tech and food
pub fn news_catalog(now: DateTime<Utc>) -> Vec<ContentItem> {
    vec![
        item("sports-1", "sports", &["football", "league"], 1, 1200, now),
        item("sports-2", "sports", &["football", "transfer"], 2, 900, now),
        item("sports-3", "sports", &["tennis"], 3, 400, now),
        item("tech-1", "tech", &["rust", "async"], 1, 800, now),
        item("tech-2", "tech", &["rust", "compilers"], 2, 650, now),
        item("tech-3", "tech", &["ai"], 4, 300, now),
        item("food-1", "food", &["pasta"], 1, 500, now),
        item("food-2", "food", &["baking"], 5, 200, now),
    ]
}

/// Scorer over an in-memory stack
pub struct Harness {
    pub clock: ManualClock,
    pub recommender: Arc<Recommender>,
    pub events: Arc<MemoryEventStore>,
    pub config: PulseConfig,
}

pub async fn harness_with(config: PulseConfig, catalog: Vec<ContentItem>) -> Harness {
    let (clock, shared) = manual_clock();
    let cache = Arc::new(CandidateCache::new(Arc::new(StaticContentSource::new(catalog))));
    cache.refresh().await.expect("static catalog loads");
    let events = Arc::new(MemoryEventStore::new(
        shared.clone(),
        config.store.retention,
        config.store.max_history_per_subject,
    ));
    let recommender = Recommender::new(
        &config,
        cache,
        events.clone(),
        Arc::new(MemoryFeedbackLog::new()),
        Arc::new(PseudonymizingGuard::new(
            config.privacy.salt.clone(),
            config.privacy.pseudonymize_subjects,
        )),
        shared,
    );
    Harness {
        clock,
        recommender: Arc::new(recommender),
        events,
        config,
    }
}

pub async fn harness() -> Harness {
    harness_with(PulseConfig::default(), news_catalog(start_time())).await
}
