//! Trending: decayed views and likes over a recent window

use super::{Strategy, StrategyError, SubjectContext};
use crate::recommend::scoring::{half_life_decay, recency, sort_candidates};
use crate::types::{ContentItem, EventType, RecommendationCandidate, StrategyKind};
use chrono::Duration;
use std::collections::HashMap;

/// Likes count twice as much as views
const LIKE_WEIGHT: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct TrendingStrategy {
    window: Duration,
    half_life: Duration,
}

impl TrendingStrategy {
    /// Create new trending strategy
    pub fn new(window: std::time::Duration, half_life: std::time::Duration) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::days(7)),
            half_life: Duration::from_std(half_life).unwrap_or_else(|_| Duration::days(1)),
        }
    }

    /// Heat per content id from recorded activity
    fn activity_heat(&self, ctx: &SubjectContext) -> HashMap<String, f32> {
        let since = ctx.now - self.window;
        let half_life = self.half_life.num_seconds() as f32;
        let mut heat: HashMap<String, f32> = HashMap::new();

        for event in &ctx.activity {
            let Some(content_id) = &event.content_id else {
                continue;
            };
            if event.timestamp < since {
                continue;
            }
            let weight = match event.event_type {
                EventType::PageView => 1.0,
                EventType::Like => LIKE_WEIGHT,
                _ => continue,
            };
            let age = (ctx.now - event.timestamp).num_seconds() as f32;
            *heat.entry(content_id.clone()).or_default() += weight * half_life_decay(age, half_life);
        }
        heat
    }

    /// Heat from catalog counters, for items published inside the window
    fn catalog_heat(&self, ctx: &SubjectContext, catalog: &[ContentItem]) -> HashMap<String, f32> {
        let since = ctx.now - self.window;
        catalog
            .iter()
            .filter(|item| item.published_at >= since)
            .map(|item| {
                let heat = item.popularity as f32 + LIKE_WEIGHT * item.like_count as f32;
                (item.content_id.clone(), heat)
            })
            .collect()
    }
}

impl Strategy for TrendingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Trending
    }

    fn score(
        &self,
        ctx: &SubjectContext,
        catalog: &[ContentItem],
    ) -> Result<Vec<RecommendationCandidate>, StrategyError> {
        let mut heat = self.activity_heat(ctx);
        if heat.is_empty() {
            heat = self.catalog_heat(ctx, catalog);
        }

        let max_heat = heat.values().copied().fold(0.0_f32, f32::max);
        if max_heat <= 0.0 {
            return Ok(Vec::new());
        }
        let denominator = (1.0 + max_heat).ln();

        let mut candidates: Vec<RecommendationCandidate> = catalog
            .iter()
            .filter_map(|item| {
                let h = heat.get(&item.content_id).copied().unwrap_or(0.0);
                if h <= 0.0 {
                    return None;
                }
                let raw = 0.8 * (1.0 + h).ln() / denominator + 0.2 * recency(item.published_at, ctx.now);
                let score = ctx.adjust(StrategyKind::Trending, &item.category_id, raw);
                Some(RecommendationCandidate::new(
                    item,
                    score,
                    StrategyKind::Trending,
                    "Popular with readers right now",
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
    use crate::types::Event;
    use chrono::Utc;

    fn strategy() -> TrendingStrategy {
        TrendingStrategy::new(
            std::time::Duration::from_secs(7 * 86400),
            std::time::Duration::from_secs(86400),
        )
    }

    fn activity(kind: EventType, content: &str, hours_ago: i64, now: chrono::DateTime<Utc>) -> Event {
        Event::new(kind, "s", "/", now - Duration::hours(hours_ago)).with_content(content)
    }

    #[test]
    fn test_recent_activity_outranks_old() {
        let now = Utc::now();
        let catalog = vec![
            item("fresh", "news", &[], 1, 0, now),
            item("stale", "news", &[], 1, 0, now),
            item("quiet", "news", &[], 1, 0, now),
        ];
        let mut ctx = SubjectContext::anonymous(now);
        ctx.activity = vec![
            activity(EventType::PageView, "fresh", 1, now),
            activity(EventType::Like, "fresh", 2, now),
            activity(EventType::PageView, "stale", 96, now),
            activity(EventType::PageView, "stale", 100, now),
        ];

        let out = strategy().score(&ctx, &catalog).unwrap();
        let ids: Vec<_> = out.iter().map(|c| c.content_id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "stale"]);
        assert!(out.iter().all(|c| (0.0..=1.0).contains(&c.score)));
    }

    #[test]
    fn test_falls_back_to_catalog_counters() {
        let now = Utc::now();
        let catalog = vec![
            item("new-popular", "news", &[], 2, 500, now),
            item("new-unread", "news", &[], 2, 0, now),
            item("old-popular", "news", &[], 20, 5000, now),
        ];
        let ctx = SubjectContext::anonymous(now);

        let out = strategy().score(&ctx, &catalog).unwrap();
        let ids: Vec<_> = out.iter().map(|c| c.content_id.as_str()).collect();
        assert_eq!(ids, vec!["new-popular"]);
    }

    #[test]
    fn test_empty_when_nothing_is_warm() {
        let now = Utc::now();
        let catalog = vec![item("a", "news", &[], 30, 100, now)];
        let out = strategy()
            .score(&SubjectContext::anonymous(now), &catalog)
            .unwrap();
        assert!(out.is_empty());
    }
}
