//! Probability normalization that refuses to paper over degenerate mass.

use crate::core::errors::{Result, RqsError};

/// Turn unnormalized log-weights into a probability vector.
///
/// Subtracts the maximum before exponentiating so large log-densities do not
/// overflow. `-inf` entries become zero; NaN, `+inf`, or an all-`-inf` vector
/// are rejected.
pub fn normalize_log_weights(log_weights: &[f64]) -> Result<Vec<f64>> {
    if log_weights.is_empty() {
        return Err(RqsError::degenerate("normalize_log_weights", "empty weight vector"));
    }
    if log_weights.iter().any(|w| w.is_nan() || *w == f64::INFINITY) {
        return Err(RqsError::degenerate(
            "normalize_log_weights",
            "non-finite log-weight",
        ));
    }
    let max = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return Err(RqsError::degenerate(
            "normalize_log_weights",
            "every particle has zero density",
        ));
    }
    let mut probs: Vec<f64> = log_weights.iter().map(|w| (w - max).exp()).collect();
    let total: f64 = probs.iter().sum();
    for p in &mut probs {
        *p /= total;
    }
    Ok(probs)
}

/// Divide a non-negative mass vector by its sum.
pub fn normalize_probabilities(mass: &[f64]) -> Result<Vec<f64>> {
    if mass.is_empty() {
        return Err(RqsError::degenerate("normalize_probabilities", "empty vector"));
    }
    if mass.iter().any(|m| !m.is_finite() || *m < 0.0) {
        return Err(RqsError::degenerate(
            "normalize_probabilities",
            "mass must be finite and non-negative",
        ));
    }
    let total: f64 = mass.iter().sum();
    if total <= 0.0 {
        return Err(RqsError::degenerate(
            "normalize_probabilities",
            "total mass is zero",
        ));
    }
    Ok(mass.iter().map(|m| m / total).collect())
}

/// `ln(Σ exp(x_i))`, stable for large magnitudes.
#[must_use]
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Index of the largest value; first index wins ties. NaN never wins.
#[must_use]
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, value) in values.iter().copied().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}
