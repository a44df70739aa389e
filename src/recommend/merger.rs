//! Merging strategy outputs into one ranked list
//!
//! Pure function of its inputs. Candidates are reconciled per content id,
//! seen content is dropped, and a greedy pass picks the final order using a
//! rank key that blends score with freshness and penalizes repeated
//! categories. The reported `score` of each candidate is never changed by
//! freshness or diversity; only the order is.

use super::scoring::{freshness, rank_order};
use crate::types::{RecommendationCandidate, RecommendationRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Reason attached to an empty result
pub const NO_CANDIDATES: &str = "no_candidates";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub candidates: Vec<RecommendationCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Union by content id: max score wins, attributions accumulate
fn reconcile(outputs: &[Vec<RecommendationCandidate>]) -> Vec<RecommendationCandidate> {
    let mut merged: BTreeMap<String, RecommendationCandidate> = BTreeMap::new();

    for candidate in outputs.iter().flatten() {
        match merged.get_mut(&candidate.content_id) {
            None => {
                let mut first = candidate.clone();
                first.attribution.sort();
                first.attribution.dedup();
                merged.insert(candidate.content_id.clone(), first);
            }
            Some(existing) => {
                let mut attribution = existing.attribution.clone();
                attribution.extend(candidate.attribution.iter().copied());
                attribution.sort();
                attribution.dedup();

                if candidate.score > existing.score {
                    *existing = candidate.clone();
                }
                existing.attribution = attribution;
            }
        }
    }

    merged.into_values().collect()
}

struct Ranked {
    candidate: RecommendationCandidate,
    key: f32,
}

/// Key descending, then the canonical candidate order
fn by_key(a: &Ranked, b: &Ranked) -> Ordering {
    b.key
        .partial_cmp(&a.key)
        .unwrap_or(Ordering::Equal)
        .then_with(|| rank_order(&a.candidate, &b.candidate))
}

/// Merge strategy outputs for `request`
pub fn merge(
    request: &RecommendationRequest,
    outputs: &[Vec<RecommendationCandidate>],
    seen: &HashSet<String>,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let f = request.freshness_factor.clamp(0.0, 1.0);
    let d = request.diversity_factor.clamp(0.0, 1.0);

    let mut pool: Vec<Ranked> = reconcile(outputs)
        .into_iter()
        .filter(|c| !(request.exclude_seen && seen.contains(&c.content_id)))
        .map(|candidate| {
            let key = (1.0 - f) * candidate.score + f * freshness(candidate.metadata.published_at, now);
            Ranked { candidate, key }
        })
        .collect();
    pool.sort_by(by_key);

    let mut selected: Vec<RecommendationCandidate> = Vec::with_capacity(request.limit.min(pool.len()));
    let mut per_category: HashMap<String, i32> = HashMap::new();

    while selected.len() < request.limit && !pool.is_empty() {
        // Pool is sorted by key, so on equal penalized keys the earlier entry wins
        let mut best = 0;
        let mut best_key = f32::NEG_INFINITY;
        for (i, ranked) in pool.iter().enumerate() {
            let k = per_category
                .get(&ranked.candidate.metadata.category_id)
                .copied()
                .unwrap_or(0);
            let penalized = ranked.key * (1.0 - d).powi(k);
            if penalized > best_key {
                best = i;
                best_key = penalized;
            }
        }
        let chosen = pool.remove(best).candidate;
        *per_category
            .entry(chosen.metadata.category_id.clone())
            .or_default() += 1;
        selected.push(chosen);
    }

    let reason = selected.is_empty().then(|| NO_CANDIDATES.to_string());
    MergeOutcome {
        candidates: selected,
        reason,
    }
}
