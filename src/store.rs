//! Event store seam
//!
//! Ingested events and feedback records are persisted by an external store in
//! production. [`MemoryEventStore`] and [`MemoryFeedbackLog`] are the bundled
//! implementations, bounded by a retention window.

use crate::clock::{to_std, SharedClock};
use crate::error::Result;
use crate::types::{Event, EventType, FeedbackAction, FeedbackRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

/// Storage for ingested telemetry
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist already-anonymized events, returning how many were kept
    async fn append(&self, events: Vec<Event>) -> Result<usize>;

    /// Latest content interactions of a subject, newest first
    async fn recent_interactions(&self, subject_key: &str, limit: usize) -> Result<Vec<Event>>;

    /// Content the subject has viewed or marked as read
    async fn viewed(&self, subject_key: &str) -> Result<HashSet<String>>;

    /// Content events of every subject at or after `since`
    async fn activity_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>>;

    /// Number of retained events
    async fn count(&self) -> Result<usize>;
}

/// Append-only log of feedback records
#[async_trait]
pub trait FeedbackLog: Send + Sync {
    async fn append(&self, record: FeedbackRecord) -> Result<()>;

    async fn for_subject(&self, subject_key: &str) -> Result<Vec<FeedbackRecord>>;

    async fn count(&self) -> Result<usize>;
}

fn marks_seen(event: &Event) -> bool {
    if event.event_type.marks_viewed() {
        return true;
    }
    event.event_type == EventType::RecommendationFeedback
        && event.payload.get("action").and_then(|v| v.as_str())
            == Some(FeedbackAction::AlreadyRead.as_str())
}

#[derive(Default)]
struct StoreInner {
    /// Per-subject content events, oldest first
    by_subject: HashMap<String, VecDeque<Event>>,
    /// Every content event, oldest first
    timeline: VecDeque<Event>,
    total: usize,
}

/// In-process event store with retention
pub struct MemoryEventStore {
    inner: RwLock<StoreInner>,
    clock: SharedClock,
    retention: Duration,
    max_history_per_subject: usize,
}

impl MemoryEventStore {
    /// Create new in-memory store
    pub fn new(clock: SharedClock, retention: std::time::Duration, max_history_per_subject: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            clock,
            retention: Duration::from_std(retention).unwrap_or_else(|_| Duration::days(30)),
            max_history_per_subject: max_history_per_subject.max(1),
        }
    }

    fn evict(&self, inner: &mut StoreInner) {
        let cutoff = self.clock.now() - self.retention;
        let mut evicted = 0;
        while matches!(inner.timeline.front(), Some(e) if e.timestamp < cutoff) {
            inner.timeline.pop_front();
            evicted += 1;
        }
        inner.by_subject.retain(|_, history| {
            while matches!(history.front(), Some(e) if e.timestamp < cutoff) {
                history.pop_front();
            }
            !history.is_empty()
        });
        if evicted > 0 {
            inner.total = inner.total.saturating_sub(evicted);
            debug!(
                "Evicted {} events older than {:?}",
                evicted,
                to_std(self.retention)
            );
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, events: Vec<Event>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut kept = 0;
        for event in events {
            if event.content_id.is_none() {
                continue;
            }
            if let Some(subject) = event.subject_id.clone() {
                let history = inner.by_subject.entry(subject).or_default();
                history.push_back(event.clone());
                while history.len() > self.max_history_per_subject {
                    history.pop_front();
                }
            }
            // Out-of-order arrivals are placed by timestamp so eviction stays a prefix pop
            let pos = inner
                .timeline
                .iter()
                .rposition(|e| e.timestamp <= event.timestamp)
                .map(|p| p + 1)
                .unwrap_or(0);
            inner.timeline.insert(pos, event);
            inner.total += 1;
            kept += 1;
        }
        self.evict(&mut inner);
        Ok(kept)
    }

    async fn recent_interactions(&self, subject_key: &str, limit: usize) -> Result<Vec<Event>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_subject
            .get(subject_key)
            .map(|history| {
                history
                    .iter()
                    .rev()
                    .filter(|e| e.event_type != EventType::RecommendationFeedback)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn viewed(&self, subject_key: &str) -> Result<HashSet<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_subject
            .get(subject_key)
            .map(|history| {
                history
                    .iter()
                    .filter(|e| marks_seen(e))
                    .filter_map(|e| e.content_id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn activity_since(&self, since: DateTime<Utc>) -> Result<Vec<Event>> {
        let inner = self.inner.read().await;
        Ok(inner
            .timeline
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.total)
    }
}

/// In-process feedback log
#[derive(Default)]
pub struct MemoryFeedbackLog {
    records: RwLock<Vec<FeedbackRecord>>,
}

impl MemoryFeedbackLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedbackLog for MemoryFeedbackLog {
    async fn append(&self, record: FeedbackRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn for_subject(&self, subject_key: &str) -> Result<Vec<FeedbackRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.subject_id.as_deref() == Some(subject_key))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use serde_json::json;
    use std::sync::Arc;

    fn store(clock: &ManualClock) -> MemoryEventStore {
        MemoryEventStore::new(
            Arc::new(clock.clone()),
            std::time::Duration::from_secs(86400),
            3,
        )
    }

    fn view(subject: &str, content: &str, at: DateTime<Utc>) -> Event {
        Event::new(EventType::PageView, "s-1", "/a", at)
            .with_subject(Some(subject.to_string()))
            .with_content(content)
    }

    #[tokio::test]
    async fn test_recent_interactions_newest_first_and_capped() {
        let clock = ManualClock::new(Utc::now());
        let store = store(&clock);
        let t0 = clock.now();
        let events = (0..5)
            .map(|i| view("r1", &format!("c{}", i), t0 + Duration::seconds(i)))
            .collect();
        store.append(events).await.unwrap();

        let recent = store.recent_interactions("r1", 10).await.unwrap();
        let ids: Vec<_> = recent.iter().filter_map(|e| e.content_id.clone()).collect();
        assert_eq!(ids, vec!["c4", "c3", "c2"]);
    }

    #[tokio::test]
    async fn test_events_without_content_are_not_kept() {
        let clock = ManualClock::new(Utc::now());
        let store = store(&clock);
        let bare = Event::new(EventType::PerformanceTiming, "s-1", "/a", clock.now());
        assert_eq!(store.append(vec![bare]).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retention_evicts_old_events() {
        let clock = ManualClock::new(Utc::now());
        let store = store(&clock);
        store.append(vec![view("r1", "old", clock.now())]).await.unwrap();

        clock.advance(Duration::days(2));
        store.append(vec![view("r2", "new", clock.now())]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.viewed("r1").await.unwrap().is_empty());
        let since = clock.now() - Duration::days(7);
        assert_eq!(store.activity_since(since).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_already_read_feedback_marks_seen() {
        let clock = ManualClock::new(Utc::now());
        let store = store(&clock);
        let payload = json!({"action": "already_read"}).as_object().cloned().unwrap();
        let feedback = Event::new(EventType::RecommendationFeedback, "s-1", "/a", clock.now())
            .with_subject(Some("r1".to_string()))
            .with_content("c9")
            .with_payload(payload);
        store.append(vec![feedback]).await.unwrap();

        assert!(store.viewed("r1").await.unwrap().contains("c9"));
        assert!(store.recent_interactions("r1", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_feedback_log_filters_by_subject() {
        let log = MemoryFeedbackLog::new();
        for subject in ["a", "b", "a"] {
            tokio_test::block_on(log.append(FeedbackRecord {
                recommendation_id: "r".to_string(),
                content_id: "c".to_string(),
                subject_id: Some(subject.to_string()),
                action: FeedbackAction::Clicked,
                timestamp: Utc::now(),
                category_id: None,
                strategy: None,
            }))
            .unwrap();
        }
        assert_eq!(tokio_test::block_on(log.for_subject("a")).unwrap().len(), 2);
        assert_eq!(tokio_test::block_on(log.count()).unwrap(), 3);
    }
}
