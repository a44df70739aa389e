//! Feedback recorder
//!
//! Feedback is append-only. Every accepted record lands in the feedback log
//! and, as a RECOMMENDATION_FEEDBACK event, in the event store. Weight
//! deltas keyed by (subject, strategy, category) are appended to a
//! per-subject ledger and folded with exponential decay whenever
//! multipliers are read.
//!
//! A delta goes to every strategy that proposed the recommendation. When
//! nothing names a strategy but the category is known, every strategy's
//! weight for that category moves.

use super::catalog::CandidateCache;
use super::scoring::half_life_decay;
use super::strategies::FeedbackWeights;
use crate::clock::SharedClock;
use crate::config::FeedbackConfig;
use crate::error::{PulseError, Result};
use crate::privacy::{normalize_subject_id, PrivacyGuard};
use crate::store::{EventStore, FeedbackLog};
use crate::types::{Event, EventType, FeedbackAction, FeedbackRecord, StrategyKind};
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Decay factor below which a delta no longer matters
const PRUNE_BELOW: f32 = 0.01;

/// Appends between sweeps for fully decayed subjects
const SWEEP_EVERY: u64 = 128;

/// A recommendation handed to a client
#[derive(Debug, Clone, PartialEq)]
pub struct ServedRecommendation {
    pub subject_key: Option<String>,
    pub content_id: String,
    /// Strategy whose entry won the merge
    pub strategy: StrategyKind,
    /// Every strategy that proposed the content
    pub attribution: Vec<StrategyKind>,
    pub category_id: String,
    pub served_at: DateTime<Utc>,
}

/// Bounded memory of served recommendation ids
pub struct ServedRegistry {
    entries: Mutex<LruCache<String, ServedRecommendation>>,
    ttl: Duration,
}

impl ServedRegistry {
    /// Create new registry
    pub fn new(capacity: usize, ttl: std::time::Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(7)),
        }
    }

    pub fn register(&self, recommendation_id: String, served: ServedRecommendation) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(recommendation_id, served);
    }

    /// Entry for `recommendation_id` if it has not expired
    pub fn lookup(&self, recommendation_id: &str, now: DateTime<Utc>) -> Option<ServedRecommendation> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let served = entries.get(recommendation_id)?.clone();
        if now - served.served_at > self.ttl {
            entries.pop(recommendation_id);
            return None;
        }
        Some(served)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct WeightDelta {
    strategy: StrategyKind,
    category_id: String,
    delta: f32,
    at: DateTime<Utc>,
}

type Slot = Arc<tokio::sync::Mutex<Vec<WeightDelta>>>;

/// Per-subject append-only weight deltas
///
/// At most `max_subjects` subjects are kept, least recently used first out.
/// Subjects whose deltas have all decayed away are swept periodically.
pub struct FeedbackLedger {
    subjects: Mutex<LruCache<String, Slot>>,
    appends: AtomicU64,
    half_life_secs: f32,
    min_multiplier: f32,
    max_multiplier: f32,
}

impl FeedbackLedger {
    /// Create new ledger
    pub fn new(config: &FeedbackConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_subjects).unwrap_or(NonZeroUsize::MIN);
        Self {
            subjects: Mutex::new(LruCache::new(capacity)),
            appends: AtomicU64::new(0),
            half_life_secs: config.half_life.as_secs_f32(),
            min_multiplier: config.min_multiplier,
            max_multiplier: config.max_multiplier,
        }
    }

    fn slot(&self, subject_key: &str) -> Slot {
        self.subjects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert(subject_key.to_string(), Slot::default)
            .clone()
    }

    fn existing(&self, subject_key: &str) -> Option<Slot> {
        self.subjects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(subject_key)
            .cloned()
    }

    fn decay(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
        let age = (now - at).num_seconds() as f32;
        half_life_decay(age, self.half_life_secs)
    }

    /// Append one delta, pruning the subject's fully decayed entries
    pub async fn append(
        &self,
        subject_key: &str,
        strategy: StrategyKind,
        category_id: &str,
        delta: f32,
        at: DateTime<Utc>,
    ) {
        {
            let slot = self.slot(subject_key);
            let mut deltas = slot.lock().await;
            deltas.retain(|d| self.decay(d.at, at) >= PRUNE_BELOW);
            deltas.push(WeightDelta {
                strategy,
                category_id: category_id.to_string(),
                delta,
                at,
            });
        }
        if self.appends.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.evict_decayed(at);
        }
    }

    /// Drop subjects whose every delta has decayed below the prune threshold
    ///
    /// A slot someone else holds, or whose lock is taken, is left alone so
    /// an in-flight append is never orphaned.
    pub fn evict_decayed(&self, now: DateTime<Utc>) -> usize {
        let mut subjects = self.subjects.lock().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<String> = subjects
            .iter()
            .filter(|(_, slot)| Slot::strong_count(slot) == 1)
            .filter(|(_, slot)| match slot.try_lock() {
                Ok(deltas) => deltas.iter().all(|d| self.decay(d.at, now) < PRUNE_BELOW),
                Err(_) => false,
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            subjects.pop(key);
        }
        if !stale.is_empty() {
            debug!("Evicted {} decayed feedback subjects", stale.len());
        }
        stale.len()
    }

    /// Fold the subject's deltas into multipliers as of `now`
    pub async fn multipliers(&self, subject_key: &str, now: DateTime<Utc>) -> FeedbackWeights {
        let Some(slot) = self.existing(subject_key) else {
            return FeedbackWeights::default();
        };
        let deltas = slot.lock().await;

        let mut adjustments: HashMap<(StrategyKind, String), f32> = HashMap::new();
        for d in deltas.iter() {
            *adjustments
                .entry((d.strategy, d.category_id.clone()))
                .or_default() += d.delta * self.decay(d.at, now);
        }
        let multipliers = adjustments
            .into_iter()
            .map(|(key, adj)| {
                let m = (1.0 + adj).clamp(self.min_multiplier, self.max_multiplier);
                (key, m)
            })
            .collect();
        FeedbackWeights::new(multipliers)
    }

    /// Retained deltas for a subject
    pub async fn len(&self, subject_key: &str) -> usize {
        match self.existing(subject_key) {
            Some(slot) => slot.lock().await.len(),
            None => 0,
        }
    }

    /// Subjects currently tracked
    pub fn subjects(&self) -> usize {
        self.subjects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Counters for one strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyStats {
    pub shown: u64,
    pub clicked: u64,
    pub liked: u64,
    pub shared: u64,
    pub not_interested: u64,
    pub disliked: u64,
    pub already_read: u64,
    pub ctr: f64,
    pub satisfaction: f64,
}

impl StrategyStats {
    fn count(&mut self, action: FeedbackAction) {
        match action {
            FeedbackAction::Clicked => self.clicked += 1,
            FeedbackAction::Liked => self.liked += 1,
            FeedbackAction::Shared => self.shared += 1,
            FeedbackAction::NotInterested => self.not_interested += 1,
            FeedbackAction::Disliked => self.disliked += 1,
            FeedbackAction::AlreadyRead => self.already_read += 1,
        }
    }

    fn derive(mut self) -> Self {
        self.ctr = if self.shown > 0 {
            self.clicked as f64 / self.shown as f64
        } else {
            0.0
        };
        let rated = self.liked + self.disliked + self.not_interested;
        self.satisfaction = if rated > 0 {
            self.liked as f64 / rated as f64
        } else {
            0.0
        };
        self
    }
}

/// Acknowledgement returned to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAck {
    pub accepted: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Validates, persists and learns from feedback
pub struct FeedbackRecorder {
    events: Arc<dyn EventStore>,
    log: Arc<dyn FeedbackLog>,
    privacy: Arc<dyn PrivacyGuard>,
    served: Arc<ServedRegistry>,
    catalog: Arc<CandidateCache>,
    ledger: FeedbackLedger,
    stats: Mutex<BTreeMap<StrategyKind, StrategyStats>>,
    clock: SharedClock,
}

impl FeedbackRecorder {
    /// Create new recorder
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &FeedbackConfig,
        events: Arc<dyn EventStore>,
        log: Arc<dyn FeedbackLog>,
        privacy: Arc<dyn PrivacyGuard>,
        served: Arc<ServedRegistry>,
        catalog: Arc<CandidateCache>,
        clock: SharedClock,
    ) -> Self {
        Self {
            events,
            log,
            privacy,
            served,
            catalog,
            ledger: FeedbackLedger::new(config),
            stats: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    pub async fn record(&self, record: FeedbackRecord) -> Result<FeedbackAck> {
        record.validate().map_err(PulseError::Validation)?;
        let now = self.clock.now();
        let subject_key = record
            .subject_id
            .as_deref()
            .and_then(normalize_subject_id)
            .map(|id| self.privacy.subject_key(id));

        let served = self.served.lookup(&record.recommendation_id, now);
        if let Some(served) = &served {
            if served.subject_key.is_some() && served.subject_key != subject_key {
                warn!(
                    "Feedback for {} rejected: subject does not match",
                    record.recommendation_id
                );
                return Err(PulseError::Forbidden(
                    "recommendation was served to another subject".to_string(),
                ));
            }
            if served.content_id != record.content_id {
                return Err(PulseError::Validation(format!(
                    "recommendation {} was for different content",
                    record.recommendation_id
                )));
            }
        }

        let strategy = served.as_ref().map(|s| s.strategy).or(record.strategy);
        let category_id = served
            .as_ref()
            .map(|s| s.category_id.clone())
            .or_else(|| record.category_id.clone())
            .or_else(|| {
                self.catalog
                    .snapshot()
                    .get(&record.content_id)
                    .map(|item| item.category_id.clone())
            });

        let stored = FeedbackRecord {
            subject_id: subject_key.clone(),
            timestamp: record.timestamp.min(now),
            strategy,
            category_id: category_id.clone(),
            ..record.clone()
        };
        self.log.append(stored).await?;

        let mut payload = json!({
            "action": record.action.as_str(),
            "recommendationId": record.recommendation_id,
        });
        if let Some(strategy) = strategy {
            payload["strategy"] = json!(strategy.as_str());
        }
        let event = Event::new(
            EventType::RecommendationFeedback,
            format!("feedback:{}", record.recommendation_id),
            "/recommendations/feedback",
            now,
        )
        .with_subject(subject_key.clone())
        .with_content(record.content_id.clone())
        .with_payload(payload.as_object().cloned().unwrap_or_default());
        self.events.append(vec![event]).await?;

        let delta = record.action.weight_delta();
        if let (Some(subject), Some(category)) = (&subject_key, &category_id) {
            if delta != 0.0 {
                let targets: Vec<StrategyKind> = match (&served, strategy) {
                    (Some(served), _) if !served.attribution.is_empty() => served.attribution.clone(),
                    (_, Some(strategy)) => vec![strategy],
                    (_, None) => StrategyKind::ALL.to_vec(),
                };
                for target in &targets {
                    self.ledger.append(subject, *target, category, delta, now).await;
                }
                debug!(
                    "Feedback {} on {:?} / {}: delta {:+.2}",
                    record.action, targets, category, delta
                );
            }
        }

        if let Some(strategy) = strategy {
            self.stats
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(strategy)
                .or_default()
                .count(record.action);
        }

        info!(
            "Recorded {} feedback for {}",
            record.action, record.recommendation_id
        );
        Ok(FeedbackAck {
            accepted: true,
            recorded_at: now,
        })
    }

    /// Count recommendations served by each strategy
    pub fn record_shown(&self, strategies: impl IntoIterator<Item = StrategyKind>) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        for strategy in strategies {
            stats.entry(strategy).or_default().shown += 1;
        }
    }

    /// Multipliers for a pseudonymized subject
    pub async fn weights_for(&self, subject_key: &str) -> FeedbackWeights {
        self.ledger.multipliers(subject_key, self.clock.now()).await
    }

    pub fn ledger(&self) -> &FeedbackLedger {
        &self.ledger
    }

    pub fn stats(&self) -> BTreeMap<StrategyKind, StrategyStats> {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: BTreeMap<StrategyKind, StrategyStats> = StrategyKind::ALL
            .iter()
            .map(|kind| (*kind, StrategyStats::default().derive()))
            .collect();
        for (kind, counters) in stats.iter() {
            all.insert(*kind, counters.derive());
        }
        all
    }
}
