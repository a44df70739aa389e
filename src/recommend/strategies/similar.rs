//! Similar: same category and shared tags with a seed item

use super::{Strategy, StrategyError, SubjectContext};
use crate::recommend::scoring::{jaccard, sort_candidates};
use crate::types::{ContentItem, RecommendationCandidate, StrategyKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarStrategy;

impl Strategy for SimilarStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Similar
    }

    fn score(
        &self,
        ctx: &SubjectContext,
        catalog: &[ContentItem],
    ) -> Result<Vec<RecommendationCandidate>, StrategyError> {
        let seed_id = ctx
            .seed_content_id
            .as_deref()
            .ok_or(StrategyError::MissingSeed)?;
        let seed = catalog
            .iter()
            .find(|item| item.content_id == seed_id)
            .ok_or_else(|| StrategyError::UnknownSeed(seed_id.to_string()))?;
        let seed_label = seed.title.as_deref().unwrap_or(&seed.content_id);

        let mut candidates: Vec<RecommendationCandidate> = catalog
            .iter()
            .filter(|item| item.content_id != seed.content_id)
            .filter_map(|item| {
                let same_category = if item.category_id == seed.category_id { 1.0 } else { 0.0 };
                let raw = 0.5 * same_category + 0.5 * jaccard(&item.tags, &seed.tags);
                if raw <= 0.0 {
                    return None;
                }
                let score = ctx.adjust(StrategyKind::Similar, &item.category_id, raw);
                Some(RecommendationCandidate::new(
                    item,
                    score,
                    StrategyKind::Similar,
                    format!("Similar to {}", seed_label),
                ))
            })
            .collect();

        sort_candidates(&mut candidates);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommend::strategies::fixtures::item;
    use chrono::Utc;

    #[test]
    fn test_requires_known_seed() {
        let now = Utc::now();
        let catalog = vec![item("a", "tech", &["rust"], 1, 0, now)];
        let mut ctx = SubjectContext::anonymous(now);
        assert_eq!(
            SimilarStrategy.score(&ctx, &catalog).unwrap_err(),
            StrategyError::MissingSeed
        );

        ctx.seed_content_id = Some("ghost".to_string());
        assert!(matches!(
            SimilarStrategy.score(&ctx, &catalog),
            Err(StrategyError::UnknownSeed(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_scores_category_and_tag_overlap() {
        let now = Utc::now();
        let catalog = vec![
            item("seed", "tech", &["rust", "async"], 1, 0, now),
            item("twin", "tech", &["rust", "async"], 1, 0, now),
            item("cousin", "tech", &["go"], 1, 0, now),
            item("tagged", "science", &["rust"], 1, 0, now),
            item("unrelated", "food", &["pasta"], 1, 0, now),
        ];
        let mut ctx = SubjectContext::anonymous(now);
        ctx.seed_content_id = Some("seed".to_string());

        let out = SimilarStrategy.score(&ctx, &catalog).unwrap();
        let ids: Vec<_> = out.iter().map(|c| c.content_id.as_str()).collect();
        assert_eq!(ids, vec!["twin", "cousin", "tagged"]);
        assert!((out[0].score - 1.0).abs() < 1e-6);
        assert!((out[1].score - 0.5).abs() < 1e-6);
    }
}
