// Scoring helpers shared by the strategies and the merger
//
// All helpers return values in [0, 1] and never panic on odd input:
// future publication dates count as age zero, NaN collapses to zero.

use crate::types::{ContentItem, RecommendationCandidate};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Age in fractional days, floored at zero
pub fn age_days(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let secs = (now - published_at).num_seconds().max(0) as f32;
    secs / 86_400.0
}

/// Linear recency: max(0, 1 - ageDays / 30)
pub fn recency(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    (1.0 - age_days(published_at, now) / 30.0).max(0.0)
}

/// Popularity from raw counters: min(1, (0.1*ln(v+1) + 0.2*ln(l+1)) / 2)
pub fn popularity(views: u64, likes: u64) -> f32 {
    let v = 0.1 * (views as f32 + 1.0).ln();
    let l = 0.2 * (likes as f32 + 1.0).ln();
    ((v + l) / 2.0).min(1.0)
}

/// Exponential decay: 0.5^(age / half_life)
pub fn half_life_decay(age_secs: f32, half_life_secs: f32) -> f32 {
    if half_life_secs <= 0.0 {
        return 0.0;
    }
    0.5_f32.powf(age_secs.max(0.0) / half_life_secs).clamp(0.0, 1.0)
}

/// Freshness used by the merger: 0.5^(ageDays / 7)
pub fn freshness(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    half_life_decay(age_days(published_at, now), 7.0)
}

/// |A ∩ B| / |A ∪ B|, zero when both are empty
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Clamp into [0, 1], mapping NaN to zero
pub fn clamp_unit(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Score descending, then newer publication, then content id
pub fn rank_order(a: &RecommendationCandidate, b: &RecommendationCandidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.metadata.published_at.cmp(&a.metadata.published_at))
        .then_with(|| a.content_id.cmp(&b.content_id))
}

/// Sort a strategy output into its canonical order
pub fn sort_candidates(candidates: &mut [RecommendationCandidate]) {
    candidates.sort_by(rank_order);
}

/// Catalog popularity of an item
pub fn item_popularity(item: &ContentItem) -> f32 {
    popularity(item.popularity, item.like_count)
}
