//! Collaborative: what readers with overlapping likes also liked
//!
//! Like sets come from the activity window, plus the subject's own history.
//! Neighbour similarity is the mean of Jaccard and cosine overlap; a
//! candidate's raw weight is the summed similarity of the neighbours who
//! liked it.

use super::{PersonalStrategy, Strategy, StrategyError, SubjectContext};
use crate::recommend::scoring::{recency, sort_candidates};
use crate::types::{ContentItem, EventType, RecommendationCandidate, StrategyKind};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Most similar readers consulted per request
const MAX_NEIGHBOURS: usize = 20;

#[derive(Debug, Clone)]
pub struct CollaborativeStrategy {
    fallback: PersonalStrategy,
}

impl CollaborativeStrategy {
    /// Create new collaborative strategy falling back to `fallback` without likes
    pub fn new(fallback: PersonalStrategy) -> Self {
        Self { fallback }
    }
}

fn similarity(own: &HashSet<&str>, other: &HashSet<&str>) -> f32 {
    let common = own.intersection(other).count() as f32;
    if common == 0.0 {
        return 0.0;
    }
    let union = own.union(other).count() as f32;
    let cosine = common / ((own.len() * other.len()) as f32).sqrt();
    (common / union + cosine) / 2.0
}

impl Strategy for CollaborativeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Collaborative
    }

    fn score(
        &self,
        ctx: &SubjectContext,
        catalog: &[ContentItem],
    ) -> Result<Vec<RecommendationCandidate>, StrategyError> {
        let Some(subject) = ctx.subject_key.as_deref() else {
            return self.fallback.score(ctx, catalog);
        };

        let mut likes: HashMap<&str, HashSet<&str>> = HashMap::new();
        for event in ctx.activity.iter().chain(ctx.history.iter()) {
            if event.event_type != EventType::Like {
                continue;
            }
            let owner = match event.subject_id.as_deref() {
                Some(owner) => owner,
                // History is already filtered to the subject
                None => continue,
            };
            if let Some(content_id) = event.content_id.as_deref() {
                likes.entry(owner).or_default().insert(content_id);
            }
        }
        let own = likes.remove(subject).unwrap_or_default();
        if own.is_empty() {
            debug!("No likes recorded, serving personal instead");
            return self.fallback.score(ctx, catalog);
        }

        let mut neighbours: Vec<(&str, f32)> = likes
            .iter()
            .map(|(owner, liked)| (*owner, similarity(&own, liked)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        neighbours.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        neighbours.truncate(MAX_NEIGHBOURS);

        let mut weights: HashMap<&str, f32> = HashMap::new();
        for (owner, s) in &neighbours {
            for content_id in &likes[owner] {
                if !own.contains(content_id) {
                    *weights.entry(*content_id).or_default() += s;
                }
            }
        }
        let max_weight = weights.values().copied().fold(0.0_f32, f32::max);
        if max_weight <= 0.0 {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<RecommendationCandidate> = catalog
            .iter()
            .filter_map(|item| {
                let weight = weights.get(item.content_id.as_str()).copied()?;
                let raw = 0.8 * weight / max_weight + 0.2 * recency(item.published_at, ctx.now);
                let score = ctx.adjust(StrategyKind::Collaborative, &item.category_id, raw);
                Some(RecommendationCandidate::new(
                    item,
                    score,
                    StrategyKind::Collaborative,
                    "Readers with similar taste liked this".to_string(),
                ))
            })
            .collect();

        sort_candidates(&mut candidates);
        Ok(candidates)
    }
}
