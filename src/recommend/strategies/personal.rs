//! Personal: category and tag affinities from the subject's own history

use super::{Strategy, StrategyError, SubjectContext, TrendingStrategy};
use crate::recommend::scoring::{item_popularity, recency, sort_candidates};
use crate::types::{ContentItem, RecommendationCandidate, StrategyKind};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PersonalStrategy {
    fallback: TrendingStrategy,
}

/// Affinities normalized to [0, 1] by their maximum
#[derive(Debug, Default)]
struct Affinities {
    categories: HashMap<String, f32>,
    tags: HashMap<String, f32>,
}

impl Affinities {
    fn build(ctx: &SubjectContext, catalog: &HashMap<&str, &ContentItem>) -> Self {
        let mut affinities = Affinities::default();
        for event in &ctx.history {
            let Some(item) = event
                .content_id
                .as_deref()
                .and_then(|id| catalog.get(id))
            else {
                continue;
            };
            let weight = event.event_type.interaction_weight();
            *affinities
                .categories
                .entry(item.category_id.clone())
                .or_default() += weight;
            for tag in &item.tags {
                *affinities.tags.entry(tag.clone()).or_default() += weight;
            }
        }
        normalize(&mut affinities.categories);
        normalize(&mut affinities.tags);
        affinities
    }

    fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.tags.is_empty()
    }

    fn category(&self, item: &ContentItem) -> f32 {
        self.categories.get(&item.category_id).copied().unwrap_or(0.0)
    }

    fn mean_tag(&self, item: &ContentItem) -> f32 {
        if item.tags.is_empty() {
            return 0.0;
        }
        let total: f32 = item
            .tags
            .iter()
            .map(|t| self.tags.get(t).copied().unwrap_or(0.0))
            .sum();
        total / item.tags.len() as f32
    }
}

fn normalize(values: &mut HashMap<String, f32>) {
    let max = values.values().copied().fold(0.0_f32, f32::max);
    if max > 0.0 {
        for v in values.values_mut() {
            *v /= max;
        }
    }
}

impl PersonalStrategy {
    /// Create new personal strategy falling back to `fallback` without history
    pub fn new(fallback: TrendingStrategy) -> Self {
        Self { fallback }
    }
}

impl Strategy for PersonalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Personal
    }

    fn score(
        &self,
        ctx: &SubjectContext,
        catalog: &[ContentItem],
    ) -> Result<Vec<RecommendationCandidate>, StrategyError> {
        if ctx.subject_key.is_none() || ctx.history.is_empty() {
            debug!("No reading history, serving trending instead");
            return self.fallback.score(ctx, catalog);
        }

        let index: HashMap<&str, &ContentItem> = catalog
            .iter()
            .map(|item| (item.content_id.as_str(), item))
            .collect();
        let affinities = Affinities::build(ctx, &index);
        if affinities.is_empty() {
            // History only touches content no longer in the catalog
            return self.fallback.score(ctx, catalog);
        }

        let mut candidates: Vec<RecommendationCandidate> = catalog
            .iter()
            .filter_map(|item| {
                let category = affinities.category(item);
                let tags = affinities.mean_tag(item);
                if category == 0.0 && tags == 0.0 {
                    return None;
                }
                let raw = 0.4 * category
                    + 0.3 * tags
                    + 0.2 * recency(item.published_at, ctx.now)
                    + 0.1 * item_popularity(item);
                let score = ctx.adjust(StrategyKind::Personal, &item.category_id, raw);
                let explanation = if category >= tags {
                    format!("Because you read {}", item.category_id)
                } else {
                    "Matches topics you follow".to_string()
                };
                Some(RecommendationCandidate::new(
                    item,
                    score,
                    StrategyKind::Personal,
                    explanation,
                ))
            })
            .collect();

        sort_candidates(&mut candidates);
        Ok(candidates)
    }
}
