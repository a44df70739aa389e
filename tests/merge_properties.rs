//! Property checks for merging strategy outputs

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use readerpulse_core::recommend::merge;
use readerpulse_core::types::CandidateMetadata;
use readerpulse_core::{RecommendationCandidate, RecommendationRequest, StrategyKind};
use std::collections::{BTreeSet, HashMap, HashSet};

const CATEGORIES: [&str; 3] = ["sports", "tech", "food"];

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn strategy_from_code(code: u8) -> StrategyKind {
    match code % 4 {
        0 => StrategyKind::Personal,
        1 => StrategyKind::Trending,
        2 => StrategyKind::Similar,
        _ => StrategyKind::Category,
    }
}

/// Category and age are functions of the id so duplicates agree on metadata
fn candidate(id: u8, score: f32, strategy: u8) -> RecommendationCandidate {
    let strategy = strategy_from_code(strategy);
    RecommendationCandidate {
        content_id: format!("c{}", id),
        score,
        strategy,
        attribution: vec![strategy],
        explanation: format!("from {}", strategy),
        metadata: CandidateMetadata {
            category_id: CATEGORIES[id as usize % CATEGORIES.len()].to_string(),
            tags: BTreeSet::new(),
            published_at: now() - Duration::days(id as i64),
            popularity: 0,
        },
        recommendation_id: None,
    }
}

fn output() -> impl Strategy<Value = Vec<RecommendationCandidate>> {
    prop::collection::vec((0u8..12, 0.01f32..1.0, 0u8..4), 0..10)
        .prop_map(|raw| raw.into_iter().map(|(id, s, k)| candidate(id, s, k)).collect())
}

fn request(limit: usize, diversity: f32, freshness: f32) -> RecommendationRequest {
    RecommendationRequest {
        limit,
        diversity_factor: diversity,
        freshness_factor: freshness,
        exclude_seen: false,
        ..Default::default()
    }
}

fn dominant_count(candidates: &[RecommendationCandidate]) -> usize {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for c in candidates {
        *counts.entry(c.metadata.category_id.as_str()).or_default() += 1;
    }
    counts.values().copied().max().unwrap_or(0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_repeating_an_output_changes_nothing(
        a in output(),
        limit in 1usize..20,
        d in 0.0f32..=1.0,
        f in 0.0f32..=1.0,
    ) {
        let r = request(limit, d, f);
        let once = merge(&r, &[a.clone()], &HashSet::new(), now());
        let twice = merge(&r, &[a.clone(), a], &HashSet::new(), now());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_output_is_bounded_and_unique(
        outputs in prop::collection::vec(output(), 0..4),
        limit in 1usize..20,
        d in 0.0f32..=1.0,
        f in 0.0f32..=1.0,
    ) {
        let outcome = merge(&request(limit, d, f), &outputs, &HashSet::new(), now());
        prop_assert!(outcome.candidates.len() <= limit);

        let ids: HashSet<&str> = outcome.candidates.iter().map(|c| c.content_id.as_str()).collect();
        prop_assert_eq!(ids.len(), outcome.candidates.len());
        for c in &outcome.candidates {
            prop_assert!((0.0..=1.0).contains(&c.score));
        }
        prop_assert_eq!(outcome.reason.is_some(), outcome.candidates.is_empty());
    }

    #[test]
    fn prop_duplicates_keep_the_highest_score(
        outputs in prop::collection::vec(output(), 1..4),
        f in 0.0f32..=1.0,
    ) {
        let outcome = merge(&request(50, 0.0, f), &outputs, &HashSet::new(), now());

        let mut best: HashMap<&str, f32> = HashMap::new();
        let mut proposers: HashMap<&str, BTreeSet<StrategyKind>> = HashMap::new();
        for c in outputs.iter().flatten() {
            let entry = best.entry(c.content_id.as_str()).or_insert(c.score);
            *entry = entry.max(c.score);
            proposers.entry(c.content_id.as_str()).or_default().insert(c.strategy);
        }

        prop_assert_eq!(outcome.candidates.len(), best.len());
        for c in &outcome.candidates {
            prop_assert_eq!(c.score, best[c.content_id.as_str()]);
            let attributed: BTreeSet<StrategyKind> = c.attribution.iter().copied().collect();
            prop_assert_eq!(&attributed, &proposers[c.content_id.as_str()]);
        }
    }

    #[test]
    fn prop_diversity_never_concentrates_more(
        outputs in prop::collection::vec(output(), 1..4),
        limit in 1usize..10,
        d in 0.05f32..0.95,
    ) {
        let plain = merge(&request(limit, 0.0, 0.0), &outputs, &HashSet::new(), now());
        let partial = merge(&request(limit, d, 0.0), &outputs, &HashSet::new(), now());
        let full = merge(&request(limit, 1.0, 0.0), &outputs, &HashSet::new(), now());

        prop_assert_eq!(plain.candidates.len(), partial.candidates.len());
        prop_assert_eq!(plain.candidates.len(), full.candidates.len());
        prop_assert!(dominant_count(&partial.candidates) <= dominant_count(&plain.candidates));
        prop_assert!(dominant_count(&full.candidates) <= dominant_count(&plain.candidates));
    }

    #[test]
    fn prop_seen_content_is_excluded(
        a in output(),
        seen_ids in prop::collection::hash_set(0u8..12, 0..6),
    ) {
        let seen: HashSet<String> = seen_ids.iter().map(|id| format!("c{}", id)).collect();
        let mut r = request(50, 0.5, 0.5);
        r.exclude_seen = true;

        let outcome = merge(&r, &[a], &seen, now());
        for c in &outcome.candidates {
            prop_assert!(!seen.contains(&c.content_id));
        }
    }
}
