// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic temperature sweeps.

pub const SWEEP_MIN: f32 = 0.3;
pub const SWEEP_MAX: f32 = 1.0;

/// `count` temperatures, non-decreasing, within `[SWEEP_MIN, SWEEP_MAX]`.
///
/// Small counts use hand-picked curves; larger ones are evenly spaced.
pub fn temperature_sweep(count: usize) -> Vec<f32> {
    match count {
        0 => Vec::new(),
        1 => vec![0.7],
        2 => vec![0.3, 1.0],
        3 => vec![0.3, 0.7, 1.0],
        5 => vec![0.7, 0.75, 0.8, 0.9, 1.0],
        n => {
            let step = (SWEEP_MAX - SWEEP_MIN) / (n - 1) as f32;
            (0..n)
                .map(|i| {
                    let t = SWEEP_MIN + step * i as f32;
                    // Round to two decimals so values print and compare cleanly.
                    ((t * 100.0).round() / 100.0).min(SWEEP_MAX)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_curves() {
        assert_eq!(temperature_sweep(1), vec![0.7]);
        assert_eq!(temperature_sweep(3), vec![0.3, 0.7, 1.0]);
        assert_eq!(temperature_sweep(5), vec![0.7, 0.75, 0.8, 0.9, 1.0]);
    }

    #[test]
    fn zero_is_empty() {
        assert!(temperature_sweep(0).is_empty());
    }

    #[test]
    fn every_count_is_monotonic_bounded_and_exact_length() {
        for count in 1..=40 {
            let s = temperature_sweep(count);
            assert_eq!(s.len(), count, "count {count}");
            assert!(s.windows(2).all(|w| w[0] <= w[1]), "count {count}: {s:?}");
            assert!(s.iter().all(|t| (SWEEP_MIN..=SWEEP_MAX).contains(t)), "count {count}: {s:?}");
        }
    }

    #[test]
    fn linear_sweep_spans_the_range() {
        let s = temperature_sweep(8);
        assert_eq!(s.first(), Some(&0.3));
        assert_eq!(s.last(), Some(&1.0));
    }

    #[test]
    fn sweep_is_deterministic() {
        assert_eq!(temperature_sweep(7), temperature_sweep(7));
    }
}
