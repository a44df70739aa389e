//! Category: featured first, then popularity, inside one category

use super::{Strategy, StrategyError, SubjectContext};
use crate::recommend::scoring::{item_popularity, sort_candidates};
use crate::types::{ContentItem, RecommendationCandidate, StrategyKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryStrategy;

impl Strategy for CategoryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Category
    }

    fn score(
        &self,
        ctx: &SubjectContext,
        catalog: &[ContentItem],
    ) -> Result<Vec<RecommendationCandidate>, StrategyError> {
        let category = ctx
            .category_filter
            .as_deref()
            .ok_or(StrategyError::MissingCategory)?;

        let members: Vec<&ContentItem> = catalog
            .iter()
            .filter(|item| item.category_id == category)
            .filter(|item| !(ctx.exclude_seen && ctx.viewed.contains(&item.content_id)))
            .collect();
        let max_popularity = members
            .iter()
            .map(|item| item_popularity(item))
            .fold(0.0_f32, f32::max);

        let mut candidates: Vec<RecommendationCandidate> = members
            .into_iter()
            .map(|item| {
                let p = if max_popularity > 0.0 {
                    item_popularity(item) / max_popularity
                } else {
                    0.0
                };
                // Featured items always sit above the rest of the category
                let (raw, explanation) = if item.featured {
                    (0.5 + 0.5 * p, format!("Featured in {}", category))
                } else {
                    (0.49 * p, format!("Popular in {}", category))
                };
                let score = ctx.adjust(StrategyKind::Category, &item.category_id, raw);
                RecommendationCandidate::new(item, score, StrategyKind::Category, explanation)
            })
            .collect();

        sort_candidates(&mut candidates);
        Ok(candidates)
    }
}
