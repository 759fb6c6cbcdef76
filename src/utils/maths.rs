//! # Numerical Helpers
//!
//! Log-space probability arithmetic, Phred conversions, and posterior
//! interval helpers shared by the likelihood model and the callers.

use bio::stats::{LogProb, Prob};
use statrs::distribution::{Beta, ContinuousCDF};

use crate::error::{NautilusError, Result};

/// Numerically stable `ln(sum(exp(xs)))` over natural-log values.
pub fn ln_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Normalize natural-log weights into probabilities summing to one.
pub fn normalize_ln(values: &[f64]) -> Vec<f64> {
    let total = ln_sum_exp(values);
    if !total.is_finite() {
        // All mass vanished; fall back to uniform.
        return vec![1.0 / values.len().max(1) as f64; values.len()];
    }
    values.iter().map(|v| (v - total).exp()).collect()
}

/// Convert an error probability to a Phred score, capped for display.
pub fn probability_to_phred(p: f64) -> f64 {
    const MAX_PHRED: f64 = 3000.0;
    if p <= 0.0 {
        return MAX_PHRED;
    }
    (-10.0 * p.log10()).clamp(0.0, MAX_PHRED)
}

/// Convert a Phred score to the error probability it encodes.
pub fn phred_to_probability(phred: f64) -> f64 {
    10f64.powf(-phred / 10.0)
}

/// A base quality as the natural-log probability the base is wrong.
pub fn base_quality_to_ln_error(quality: u8) -> f64 {
    LogProb::from(Prob(phred_to_probability(quality as f64))).0
}

/// Mapping quality as the probability the alignment position is wrong.
pub fn mapping_quality_to_prob_mismapped(mapping_quality: u8) -> f64 {
    phred_to_probability(mapping_quality as f64)
}

/// An equal-tailed Beta credible interval with the given mass, from
/// `successes` out of `trials` observations (uniform prior).
pub fn beta_credible_interval(successes: u32, trials: u32, mass: f64) -> Result<(f64, f64)> {
    if trials == 0 {
        return Ok((0.0, 1.0));
    }
    let alpha = successes as f64 + 1.0;
    let beta = (trials - successes) as f64 + 1.0;
    let dist = Beta::new(alpha, beta).map_err(|e| {
        NautilusError::program(format!("invalid beta parameters ({}, {}): {}", alpha, beta, e))
    })?;
    let tail = (1.0 - mass) / 2.0;
    Ok((dist.inverse_cdf(tail), dist.inverse_cdf(1.0 - tail)))
}

/// The minimum finite natural-log probability the likelihood model returns
/// for unalignable reads.
pub const MIN_LN_PROBABILITY: f64 = -1.0e6;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ln_sum_exp_matches_direct() {
        let values = [-1.0f64, -2.0, -3.0];
        let direct: f64 = values.iter().map(|v| v.exp()).sum::<f64>().ln();
        assert!((ln_sum_exp(&values) - direct).abs() < 1e-12);
    }

    #[test]
    fn test_ln_sum_exp_handles_extremes() {
        assert_eq!(ln_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
        let big = ln_sum_exp(&[-1000.0, -1000.0]);
        assert!((big - (-1000.0 + 2f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_ln_sums_to_one() {
        let probs = normalize_ln(&[-1.0, -2.0, -3.0]);
        let total: f64 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
    }

    #[test]
    fn test_phred_round_trip() {
        for q in [1.0, 10.0, 20.0, 30.0, 60.0] {
            let p = phred_to_probability(q);
            assert!((probability_to_phred(p) - q).abs() < 1e-9);
        }
        assert_eq!(probability_to_phred(0.0), 3000.0);
    }

    #[test]
    fn test_beta_credible_interval() {
        // 50 alt reads out of 1000: interval should bracket 0.05.
        let (lo, hi) = beta_credible_interval(50, 1000, 0.99).unwrap();
        assert!(lo < 0.05 && 0.05 < hi);
        assert!(lo > 0.02 && hi < 0.09);

        // Degenerate depth
        assert_eq!(beta_credible_interval(0, 0, 0.99).unwrap(), (0.0, 1.0));
    }
}
