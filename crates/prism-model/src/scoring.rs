// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Confidence scoring and ranking.
//!
//! A candidate's confidence is `exp(mean(token logprobs))`, clamped to
//! `[MIN_CONFIDENCE, MAX_CONFIDENCE]`.  Providers that report no logprobs
//! yield [`Confidence::Unknown`]; no number is ever fabricated for them.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::Confidence;

pub const MIN_CONFIDENCE: f64 = 0.01;
pub const MAX_CONFIDENCE: f64 = 0.99;

/// Turn optional per-token log-probabilities into a bounded probability.
///
/// Total: never panics.  Non-finite entries are dropped from the mean; if
/// nothing usable remains the result is `Unknown`.
pub fn score_from_logprobs(logprobs: Option<&[f64]>) -> Confidence {
    let Some(logprobs) = logprobs else {
        return Confidence::Unknown;
    };

    let finite: Vec<f64> = logprobs.iter().copied().filter(|v| v.is_finite()).collect();
    let dropped = logprobs.len() - finite.len();
    if dropped > 0 {
        debug!(dropped, total = logprobs.len(), "ignoring non-finite logprobs");
    }
    if finite.is_empty() {
        return Confidence::Unknown;
    }

    let positive = finite.iter().filter(|v| **v > 0.0).count();
    if positive > 0 {
        warn!(positive, "logprobs above zero; score will be clamped");
    }

    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    Confidence::Score(mean.exp().clamp(MIN_CONFIDENCE, MAX_CONFIDENCE))
}

/// Ranking order: known scores descending, then every `Unknown`.
/// Two unknowns compare equal so a stable sort keeps their arrival order.
pub fn compare_for_ranking(a: Confidence, b: Confidence) -> Ordering {
    match (a, b) {
        (Confidence::Unknown, Confidence::Unknown) => Ordering::Equal,
        (Confidence::Unknown, Confidence::Score(_)) => Ordering::Greater,
        (Confidence::Score(_), Confidence::Unknown) => Ordering::Less,
        (Confidence::Score(x), Confidence::Score(y)) => y.total_cmp(&x),
    }
}

/// Stable in-place sort of `items` by the confidence `key` returns.
pub fn rank_by<T>(items: &mut [T], key: impl Fn(&T) -> Confidence) {
    items.sort_by(|a, b| compare_for_ranking(key(a), key(b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(c: Confidence, expected: f64) -> bool {
        matches!(c, Confidence::Score(v) if (v - expected).abs() < 1e-9)
    }

    #[test]
    fn mean_logprob_is_exponentiated() {
        let c = score_from_logprobs(Some(&[-0.1, -0.2]));
        assert!(approx(c, (-0.15f64).exp()), "got {c:?}");
        assert!(matches!(c, Confidence::Score(v) if (v - 0.8607).abs() < 1e-4));
    }

    #[test]
    fn absent_and_empty_are_unknown() {
        assert_eq!(score_from_logprobs(None), Confidence::Unknown);
        assert_eq!(score_from_logprobs(Some(&[])), Confidence::Unknown);
    }

    #[test]
    fn very_unlikely_tokens_clamp_to_floor() {
        let c = score_from_logprobs(Some(&[-50.0, -60.0]));
        assert_eq!(c, Confidence::Score(MIN_CONFIDENCE));
    }

    #[test]
    fn certain_tokens_clamp_to_ceiling() {
        assert_eq!(score_from_logprobs(Some(&[0.0, 0.0])), Confidence::Score(MAX_CONFIDENCE));
        assert_eq!(score_from_logprobs(Some(&[3.0])), Confidence::Score(MAX_CONFIDENCE));
    }

    #[test]
    fn non_finite_entries_are_excluded() {
        let c = score_from_logprobs(Some(&[-0.1, f64::NAN, -0.2, f64::NEG_INFINITY]));
        assert!(approx(c, (-0.15f64).exp()), "got {c:?}");
    }

    #[test]
    fn only_non_finite_entries_is_unknown() {
        let c = score_from_logprobs(Some(&[f64::NAN, f64::INFINITY]));
        assert_eq!(c, Confidence::Unknown);
    }

    #[test]
    fn ranking_puts_unknown_last_and_is_stable() {
        let mut items = vec![
            ("a", Confidence::Score(0.9)),
            ("b", Confidence::Unknown),
            ("c", Confidence::Score(0.4)),
            ("d", Confidence::Unknown),
        ];
        rank_by(&mut items, |(_, c)| *c);
        let order: Vec<&str> = items.iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn ranking_sorts_scores_descending() {
        let mut items = vec![Confidence::Score(0.3), Confidence::Score(0.6), Confidence::Score(0.5)];
        rank_by(&mut items, |c| *c);
        assert_eq!(
            items,
            vec![Confidence::Score(0.6), Confidence::Score(0.5), Confidence::Score(0.3)]
        );
    }

    #[test]
    fn comparator_cases() {
        use Confidence::*;
        assert_eq!(compare_for_ranking(Unknown, Unknown), Ordering::Equal);
        assert_eq!(compare_for_ranking(Unknown, Score(0.1)), Ordering::Greater);
        assert_eq!(compare_for_ranking(Score(0.1), Unknown), Ordering::Less);
        assert_eq!(compare_for_ranking(Score(0.8), Score(0.2)), Ordering::Less);
        assert_eq!(compare_for_ranking(Score(0.2), Score(0.2)), Ordering::Equal);
    }
}
