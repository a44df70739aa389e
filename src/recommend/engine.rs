//! Recommendation engine
//!
//! Gathers the subject's signals once, fans the requested strategies out to
//! the blocking pool with independent timeouts, and merges whatever finished
//! before the request deadline. A request fails only when every strategy did.

use super::catalog::CandidateCache;
use super::feedback::{FeedbackRecorder, ServedRecommendation, ServedRegistry};
use super::merger::merge;
use super::scoring::clamp_unit;
use super::strategies::{StrategyError, StrategySet, SubjectContext};
use crate::clock::SharedClock;
use crate::config::{PulseConfig, RecommenderConfig};
use crate::error::{PulseError, Result};
use crate::privacy::{normalize_subject_id, PrivacyGuard};
use crate::store::{EventStore, FeedbackLog};
use crate::types::{Event, RecommendationCandidate, RecommendationRequest, StrategyKind};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A strategy left out of the merge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedStrategy {
    pub strategy: StrategyKind,
    pub error: String,
}

/// Ranked result of one request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    pub candidates: Vec<RecommendationCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub failed_strategies: Vec<FailedStrategy>,
    pub generated_at: DateTime<Utc>,
}

/// Outcome of an event batch ingest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub dropped: usize,
}

/// Scorer facade over the catalog, the stores and the strategies
pub struct Recommender {
    config: RecommenderConfig,
    max_clock_skew: Duration,
    catalog: Arc<CandidateCache>,
    events: Arc<dyn EventStore>,
    privacy: Arc<dyn PrivacyGuard>,
    strategies: StrategySet,
    served: Arc<ServedRegistry>,
    feedback: FeedbackRecorder,
    clock: SharedClock,
}

impl Recommender {
    /// Create new recommender with the standard strategy set
    pub fn new(
        config: &PulseConfig,
        catalog: Arc<CandidateCache>,
        events: Arc<dyn EventStore>,
        feedback_log: Arc<dyn FeedbackLog>,
        privacy: Arc<dyn PrivacyGuard>,
        clock: SharedClock,
    ) -> Self {
        let served = Arc::new(ServedRegistry::new(
            config.recommender.served_capacity,
            config.recommender.served_ttl,
        ));
        let feedback = FeedbackRecorder::new(
            &config.feedback,
            events.clone(),
            feedback_log,
            privacy.clone(),
            served.clone(),
            catalog.clone(),
            clock.clone(),
        );
        Self {
            config: config.recommender.clone(),
            max_clock_skew: Duration::from_std(config.server.max_clock_skew)
                .unwrap_or_else(|_| Duration::minutes(5)),
            catalog,
            events,
            privacy,
            strategies: StrategySet::new(&config.recommender),
            served,
            feedback,
            clock,
        }
    }

    /// Replace the strategy set
    pub fn with_strategies(mut self, strategies: StrategySet) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn catalog(&self) -> &Arc<CandidateCache> {
        &self.catalog
    }

    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    pub fn feedback(&self) -> &FeedbackRecorder {
        &self.feedback
    }

    pub fn config(&self) -> &RecommenderConfig {
        &self.config
    }

    /// Validate, anonymize and store a batch of raw events
    ///
    /// Invalid entries are dropped individually; the rest are stored.
    pub async fn ingest(&self, raw: Vec<Value>) -> Result<IngestReport> {
        let now = self.clock.now();
        let mut report = IngestReport::default();
        let mut accepted = Vec::with_capacity(raw.len());

        for value in raw {
            let event: Event = match serde_json::from_value(value) {
                Ok(event) => event,
                Err(e) => {
                    debug!("Dropping malformed event: {}", e);
                    report.dropped += 1;
                    continue;
                }
            };
            if let Err(reason) = event.validate(now, self.max_clock_skew) {
                debug!("Dropping invalid {} event: {}", event.event_type, reason);
                report.dropped += 1;
                continue;
            }
            accepted.push(self.privacy.anonymize(event));
        }

        report.accepted = accepted.len();
        if !accepted.is_empty() {
            self.events.append(accepted).await?;
        }
        Ok(report)
    }

    pub async fn recommend(&self, request: RecommendationRequest) -> Result<Recommendations> {
        request.validate().map_err(PulseError::Validation)?;
        if request.limit > self.config.max_limit {
            return Err(PulseError::Validation(format!(
                "limit must be at most {}",
                self.config.max_limit
            )));
        }

        let deadline = Instant::now() + self.config.request_deadline;
        let now = self.clock.now();
        let ctx = Arc::new(self.context(&request, now).await);
        let snapshot = self.catalog.snapshot();

        let mut pending: BTreeSet<StrategyKind> = BTreeSet::new();
        let mut failed: Vec<FailedStrategy> = Vec::new();
        let mut tasks = JoinSet::new();
        let strategy_timeout = self.config.strategy_timeout;

        for kind in &request.strategies {
            let Some(strategy) = self.strategies.get(*kind) else {
                failed.push(FailedStrategy {
                    strategy: *kind,
                    error: "strategy not registered".to_string(),
                });
                continue;
            };
            pending.insert(*kind);
            let ctx = ctx.clone();
            let snapshot = snapshot.clone();
            let kind = *kind;
            tasks.spawn(async move {
                let handle =
                    tokio::task::spawn_blocking(move || strategy.score(&ctx, &snapshot.items));
                let result = match timeout(strategy_timeout, handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => Err(StrategyError::Failed(format!("strategy panicked: {}", e))),
                    Err(_) => Err(StrategyError::Timeout(strategy_timeout.as_millis() as u64)),
                };
                (kind, result)
            });
        }

        let mut outputs: Vec<(StrategyKind, Vec<RecommendationCandidate>)> = Vec::new();
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((kind, Ok(candidates))))) => {
                    pending.remove(&kind);
                    debug!("Strategy {} produced {} candidates", kind, candidates.len());
                    outputs.push((kind, candidates));
                }
                Ok(Some(Ok((kind, Err(e))))) => {
                    pending.remove(&kind);
                    warn!("Strategy {} failed: {}", kind, e);
                    failed.push(FailedStrategy {
                        strategy: kind,
                        error: e.to_string(),
                    });
                }
                Ok(Some(Err(e))) => {
                    warn!("Strategy task error: {}", e);
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    let ms = self.config.request_deadline.as_millis() as u64;
                    for kind in std::mem::take(&mut pending) {
                        warn!("Strategy {} missed the {}ms request deadline", kind, ms);
                        failed.push(FailedStrategy {
                            strategy: kind,
                            error: StrategyError::Timeout(ms).to_string(),
                        });
                    }
                    break;
                }
            }
        }
        // A join error loses its kind; anything still pending failed that way
        for kind in pending {
            failed.push(FailedStrategy {
                strategy: kind,
                error: "strategy task aborted".to_string(),
            });
        }

        if outputs.is_empty() && !failed.is_empty() {
            failed.sort_by_key(|f| f.strategy);
            let summary = failed
                .iter()
                .map(|f| format!("{}: {}", f.strategy, f.error))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PulseError::ServiceUnavailable(format!(
                "all strategies failed ({})",
                summary
            )));
        }

        // Merge input order must not depend on completion order
        outputs.sort_by_key(|(kind, _)| *kind);
        let weighted: Vec<Vec<RecommendationCandidate>> = outputs
            .into_iter()
            .map(|(_, candidates)| {
                candidates
                    .into_iter()
                    .map(|mut c| {
                        c.score = clamp_unit(c.score * self.weight(c.strategy));
                        c
                    })
                    .collect()
            })
            .collect();

        let outcome = merge(&request, &weighted, &ctx.viewed, now);
        let mut candidates = outcome.candidates;
        for candidate in candidates.iter_mut() {
            let id = Uuid::new_v4().to_string();
            self.served.register(
                id.clone(),
                ServedRecommendation {
                    subject_key: ctx.subject_key.clone(),
                    content_id: candidate.content_id.clone(),
                    strategy: candidate.strategy,
                    attribution: candidate.attribution.clone(),
                    category_id: candidate.metadata.category_id.clone(),
                    served_at: now,
                },
            );
            candidate.recommendation_id = Some(id);
        }
        self.feedback
            .record_shown(candidates.iter().map(|c| c.strategy));

        failed.sort_by_key(|f| f.strategy);
        info!(
            "Served {} recommendations ({} strategies failed)",
            candidates.len(),
            failed.len()
        );
        Ok(Recommendations {
            candidates,
            reason: outcome.reason,
            failed_strategies: failed,
            generated_at: now,
        })
    }

    fn weight(&self, kind: StrategyKind) -> f32 {
        let weights = &self.config.weights;
        match kind {
            StrategyKind::Personal => weights.personal,
            StrategyKind::Trending => weights.trending,
            StrategyKind::Similar => weights.similar,
            StrategyKind::Category => weights.category,
            StrategyKind::Collaborative => weights.collaborative,
        }
    }

    /// Load everything the strategies may read; store failures degrade to empty signals
    async fn context(&self, request: &RecommendationRequest, now: DateTime<Utc>) -> SubjectContext {
        let mut ctx = SubjectContext::anonymous(now);
        ctx.seed_content_id = request.seed_content_id.clone();
        ctx.category_filter = request.category_filter.clone();
        ctx.exclude_seen = request.exclude_seen;

        let window = Duration::from_std(self.config.trending_window).unwrap_or_else(|_| Duration::days(7));
        match self.events.activity_since(now - window).await {
            Ok(activity) => ctx.activity = activity,
            Err(e) => warn!("Activity unavailable: {}", e),
        }

        let subject_key = request
            .subject_id
            .as_deref()
            .and_then(normalize_subject_id)
            .map(|id| self.privacy.subject_key(id));
        if let Some(key) = &subject_key {
            match self.events.recent_interactions(key, self.config.history_limit).await {
                Ok(history) => ctx.history = history,
                Err(e) => warn!("History unavailable: {}", e),
            }
            match self.events.viewed(key).await {
                Ok(viewed) => ctx.viewed = viewed,
                Err(e) => warn!("Viewed set unavailable: {}", e),
            }
            ctx.feedback = self.feedback.weights_for(key).await;
        }
        ctx.subject_key = subject_key;
        ctx
    }
}
