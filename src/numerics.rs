//! Shared numerically-stable helpers: log-sum-exp and softmax (spec §4.2,
//! §4.4 "Numerical discipline").

/// Returns `(max, log(sum(exp(v - max))))` so callers can reconstruct
/// `log(sum(exp(v)))` as `max + result.1` without ever exponentiating an
/// unshifted value.
pub(crate) fn log_sum_exp(values: &[f64]) -> (f64, f64) {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return (max, 0.0);
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    (max, sum.ln())
}

/// Numerically stable softmax over natural-log-domain inputs.
pub(crate) fn softmax(values: &[f64]) -> Vec<f64> {
    let (max, lse) = log_sum_exp(values);
    values.iter().map(|&v| (v - max - lse).exp()).collect()
}
