//! CRF gradient evaluator (spec §4.4) — the performance-critical routine.
//!
//! Per-pair work is parallelized with the same order-stable chunked
//! reduction used by the EM driver (spec §5): pairs are split into
//! contiguous chunks, each chunk folds its pairs sequentially, and the
//! chunk partials are combined in chunk order regardless of completion
//! order.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    alphabet::Background,
    crf::Crf,
    error::{EngineError, Result},
    pair::{Corpus, TrainingPair},
    weights::PositionalWeights,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientOptions {
    pub sigma_context: f64,
    pub sigma_decay: f64,
    pub sigma_bias: f64,
    pub weight_center: f64,
    pub weight_decay: f64,
}

impl Default for GradientOptions {
    fn default() -> Self {
        Self {
            sigma_context: 0.3,
            sigma_decay: 0.9,
            sigma_bias: 10.0,
            weight_center: 1.6,
            weight_decay: 0.85,
        }
    }
}

impl GradientOptions {
    pub fn sigma_context(mut self, s: f64) -> Self {
        self.sigma_context = s;
        self
    }

    pub fn sigma_decay(mut self, s: f64) -> Self {
        self.sigma_decay = s;
        self
    }

    pub fn sigma_bias(mut self, s: f64) -> Self {
        self.sigma_bias = s;
        self
    }

    pub fn weight_center(mut self, w: f64) -> Self {
        self.weight_center = w;
        self
    }

    pub fn weight_decay(mut self, w: f64) -> Self {
        self.weight_decay = w;
        self
    }

    fn validate(&self) -> Result<()> {
        for sigma in [self.sigma_context, self.sigma_decay, self.sigma_bias] {
            if sigma <= 0.0 {
                return Err(EngineError::NonPositiveSigma(sigma));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GradientResult {
    pub log_likelihood: f64,
    pub prior: f64,
    pub grad_log_likelihood: Vec<f64>,
    pub grad_prior: Vec<f64>,
}

impl GradientResult {
    pub(crate) fn zeros(param_len: usize) -> Self {
        Self {
            log_likelihood: 0.0,
            prior: 0.0,
            grad_log_likelihood: vec![0.0; param_len],
            grad_prior: vec![0.0; param_len],
        }
    }

    fn add_assign(&mut self, other: &GradientResult) {
        self.log_likelihood += other.log_likelihood;
        self.prior += other.prior;
        for (a, b) in self
            .grad_log_likelihood
            .iter_mut()
            .zip(other.grad_log_likelihood.iter())
        {
            *a += b;
        }
        for (a, b) in self.grad_prior.iter_mut().zip(other.grad_prior.iter()) {
            *a += b;
        }
    }
}

/// A callable "evaluate at theta over a subsample of training indices"
/// oracle (spec §4.5). `indices` names the exact training pairs in the
/// subsample (in order); callers pass either `0..whole_corpus_len` for a
/// full-batch evaluation or a shuffled block for HMC subsampling.
pub trait GradientOracle {
    fn param_len(&self) -> usize;
    fn evaluate(&self, theta: &[f64], indices: &[usize], whole_corpus_len: usize) -> Result<GradientResult>;
}

pub struct CrfGradientEvaluator<'a> {
    corpus: &'a Corpus,
    background: &'a Background,
    options: GradientOptions,
    num_states: usize,
    weights: PositionalWeights,
}

impl<'a> CrfGradientEvaluator<'a> {
    pub fn new(corpus: &'a Corpus, background: &'a Background, num_states: usize, options: GradientOptions) -> Result<Self> {
        options.validate()?;
        let weights = PositionalWeights::new(corpus.window(), options.weight_center, options.weight_decay)?;
        Ok(Self {
            corpus,
            background,
            options,
            num_states,
            weights,
        })
    }

    fn window(&self) -> usize {
        self.corpus.window()
    }

    fn alphabet_size(&self) -> usize {
        self.corpus.alphabet_size()
    }

    fn param_len(&self) -> usize {
        self.num_states * (1 + self.window() * self.alphabet_size() + self.alphabet_size())
    }

    /// Evaluates `(L, grad_L)` and `(Pi, grad_Pi)` over the training pairs
    /// named by `indices`, with `indices.len() / whole_corpus_len` scaling
    /// the prior so that whole-corpus gradients equal the sum of block
    /// gradients (spec §4.4 "Prior gradient").
    pub fn evaluate(&self, crf: &Crf, indices: &[usize], whole_corpus_len: usize) -> Result<GradientResult> {
        if crf.num_states() != self.num_states
            || crf.window() != self.window()
            || crf.alphabet_size() != self.alphabet_size()
        {
            return Err(EngineError::ShapeMismatch {
                what: "CRF",
                rows: crf.window(),
                cols: crf.alphabet_size(),
                expected_rows: self.window(),
                expected_cols: self.alphabet_size(),
            });
        }
        let pairs: Vec<&TrainingPair> = indices.iter().map(|&i| &self.corpus.pairs()[i]).collect();
        let mut likelihood = self.likelihood_over(crf, &pairs)?;

        let fraction = if whole_corpus_len == 0 {
            0.0
        } else {
            indices.len() as f64 / whole_corpus_len as f64
        };
        let prior_result = self.prior_over(crf, fraction);
        likelihood.prior = prior_result.prior;
        likelihood.grad_prior = prior_result.grad_prior;
        log::debug!(
            "gradient evaluate: {} pairs, fraction={fraction:.4}, log-likelihood={:.6}",
            pairs.len(),
            likelihood.log_likelihood
        );
        Ok(likelihood)
    }

    fn likelihood_over(&self, crf: &Crf, pairs: &[&TrainingPair]) -> Result<GradientResult> {
        if pairs.is_empty() {
            return Ok(GradientResult::zeros(self.param_len()));
        }
        let chunk_count = rayon::current_num_threads().max(1).min(pairs.len());
        let chunk_size = (pairs.len() + chunk_count - 1) / chunk_count;
        let partials: Vec<Result<GradientResult>> = pairs
            .par_chunks(chunk_size.max(1))
            .map(|chunk| self.likelihood_over_chunk(crf, chunk))
            .collect();

        let mut total = GradientResult::zeros(self.param_len());
        for partial in partials {
            total.add_assign(&partial?);
        }
        Ok(total)
    }

    fn likelihood_over_chunk(&self, crf: &Crf, pairs: &[&TrainingPair]) -> Result<GradientResult> {
        let any_index = self.alphabet_size();
        let per_state = 1 + self.window() * self.alphabet_size() + self.alphabet_size();
        let mut result = GradientResult::zeros(self.param_len());

        for pair in pairs {
            let posterior = crate::posterior::crf_posterior(crf, &self.weights, pair.x(), pair.center() as i64, any_index);
            let pc: Vec<Vec<f64>> = crf.states().iter().map(|s| s.softmax_pseudocounts()).collect();

            let mut r = vec![0.0; self.alphabet_size()];
            for a in 0..self.alphabet_size() {
                for k in 0..crf.num_states() {
                    r[a] += posterior.posteriors[k] * pc[k][a];
                }
            }

            let y = pair.y();
            for a in 0..self.alphabet_size() {
                if y[a] > 0.0 && r[a] <= 0.0 {
                    return Err(EngineError::ZeroPseudocountMass { letter: a });
                }
            }

            for a in 0..self.alphabet_size() {
                if y[a] > 0.0 {
                    result.log_likelihood += y[a] * (r[a].ln() - self.background.f(a).ln());
                }
            }

            for k in 0..crf.num_states() {
                let p_k = posterior.posteriors[k];
                let phi_k: f64 = (0..self.alphabet_size())
                    .map(|a| y[a] * (pc[k][a] / r[a].max(f64::MIN_POSITIVE) - 1.0))
                    .sum();
                let psi_k: f64 = (0..self.alphabet_size())
                    .map(|a| pc[k][a] * y[a] / r[a].max(f64::MIN_POSITIVE))
                    .sum();

                let base = k * per_state;
                result.grad_log_likelihood[base] += p_k * phi_k;

                for (j, &symbol) in pair.x().iter().enumerate() {
                    if symbol == any_index {
                        continue;
                    }
                    let idx = base + 1 + j * self.alphabet_size() + symbol;
                    result.grad_log_likelihood[idx] += p_k * phi_k;
                }

                for a in 0..self.alphabet_size() {
                    let idx = base + 1 + self.window() * self.alphabet_size() + a;
                    result.grad_log_likelihood[idx] += p_k * pc[k][a] * (y[a] / r[a].max(f64::MIN_POSITIVE) - psi_k);
                }
            }
        }
        Ok(result)
    }

    /// Sum of three Gaussian penalties per state (spec §4.4 "Prior"), scaled
    /// by `fraction` for block-additivity (spec §8 item 6).
    fn prior_over(&self, crf: &Crf, fraction: f64) -> GradientResult {
        let per_state = 1 + self.window() * self.alphabet_size() + self.alphabet_size();
        let mut result = GradientResult::zeros(self.param_len());
        let center = self.weights.center();

        for (k, state) in crf.states().iter().enumerate() {
            let base = k * per_state;
            let b = state.bias();
            result.prior += fraction * (-(b * b) / (2.0 * self.options.sigma_bias * self.options.sigma_bias));
            result.grad_prior[base] += fraction * (-b / (self.options.sigma_bias * self.options.sigma_bias));

            for j in 0..self.window() {
                let sigma_jk = self.options.sigma_context
                    * self
                        .options
                        .sigma_decay
                        .powi((j as i64 - center as i64).unsigned_abs() as i32);
                let var = sigma_jk * sigma_jk;
                for a in 0..self.alphabet_size() {
                    let c = state.context_weights()[[j, a]];
                    result.prior += fraction * (-(c * c) / (2.0 * var));
                    let idx = base + 1 + j * self.alphabet_size() + a;
                    result.grad_prior[idx] += fraction * (-c / var);
                }
            }
        }
        result
    }
}

impl<'a> GradientOracle for CrfGradientEvaluator<'a> {
    fn param_len(&self) -> usize {
        CrfGradientEvaluator::param_len(self)
    }

    fn evaluate(&self, theta: &[f64], indices: &[usize], whole_corpus_len: usize) -> Result<GradientResult> {
        let crf = Crf::from_flat(theta, self.num_states, self.window(), self.alphabet_size())?;
        CrfGradientEvaluator::evaluate(self, &crf, indices, whole_corpus_len)
    }
}

#[cfg(test)]
fn numeric_gradient(
    evaluator: &CrfGradientEvaluator,
    crf: &Crf,
    indices: &[usize],
    whole_corpus_len: usize,
    epsilon: f64,
) -> Vec<f64> {
    let theta = crf.to_flat();
    let mut grad = vec![0.0; theta.len()];
    for i in 0..theta.len() {
        let mut plus = theta.clone();
        plus[i] += epsilon;
        let mut minus = theta.clone();
        minus[i] -= epsilon;
        let crf_plus = Crf::from_flat(&plus, crf.num_states(), crf.window(), crf.alphabet_size()).unwrap();
        let crf_minus = Crf::from_flat(&minus, crf.num_states(), crf.window(), crf.alphabet_size()).unwrap();
        let f_plus = evaluator.evaluate(&crf_plus, indices, whole_corpus_len).unwrap();
        let f_minus = evaluator.evaluate(&crf_minus, indices, whole_corpus_len).unwrap();
        let total_plus = f_plus.log_likelihood + f_plus.prior;
        let total_minus = f_minus.log_likelihood + f_minus.prior;
        grad[i] = (total_plus - total_minus) / (2.0 * epsilon);
    }
    grad
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pair::TrainingPair;
    use float_eq::assert_float_eq;

    fn uniform_corpus(window: usize, alphabet_size: usize, len: usize) -> Corpus {
        let center = (window - 1) / 2;
        let mut x = vec![0usize; window];
        x[center] = 0;
        let y = vec![1.0 / alphabet_size as f64; alphabet_size];
        let pair = TrainingPair::new(x, y).unwrap();
        Corpus::new(vec![pair; len]).unwrap()
    }

    fn all_indices(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test_log::test]
    fn test_s3_zero_theta_gives_zero_likelihood_and_zero_gradient() {
        let corpus = uniform_corpus(1, 20, 4);
        let background = Background::uniform(20);
        let evaluator = CrfGradientEvaluator::new(&corpus, &background, 3, GradientOptions::default()).unwrap();
        let crf = Crf::zeroed(3, 1, 20);
        let result = evaluator.evaluate(&crf, &all_indices(corpus.len()), corpus.len()).unwrap();
        assert!(result.log_likelihood.abs() < 1e-9);
        for g in result.grad_log_likelihood {
            assert!(g.abs() < 1e-9);
        }
    }

    #[test]
    fn test_s4_bias_prior_matches_closed_form() {
        let corpus = uniform_corpus(1, 20, 2);
        let background = Background::uniform(20);
        let evaluator = CrfGradientEvaluator::new(&corpus, &background, 2, GradientOptions::default()).unwrap();
        let state = crate::crf::CrfState::new(2.0, Array2::zeros((1, 20)), vec![0.0; 20]).unwrap();
        let crf = Crf::new(vec![state.clone(), state]).unwrap();
        let result = evaluator.evaluate(&crf, &all_indices(corpus.len()), corpus.len()).unwrap();
        let expected_prior = -2.0 * (4.0 / 200.0);
        assert_float_eq!(result.prior, expected_prior, abs <= 1e-9);
        let expected_grad = -2.0 / 100.0;
        assert_float_eq!(result.grad_prior[0], expected_grad, abs <= 1e-9);
    }

    #[test]
    fn test_prior_gradient_block_additivity() {
        let corpus = uniform_corpus(1, 4, 9);
        let background = Background::uniform(4);
        let evaluator = CrfGradientEvaluator::new(&corpus, &background, 2, GradientOptions::default()).unwrap();
        let crf = Crf::zeroed(2, 1, 4);
        let state = crate::crf::CrfState::new(0.7, Array2::from_elem((1, 4), 0.1), vec![0.1; 4]).unwrap();
        let crf = Crf::new(vec![state.clone(), state]).unwrap_or(crf);

        let whole = evaluator.evaluate(&crf, &all_indices(9), 9).unwrap();
        let parts = [
            evaluator.evaluate(&crf, &[0, 1, 2], 9).unwrap(),
            evaluator.evaluate(&crf, &[3, 4, 5], 9).unwrap(),
            evaluator.evaluate(&crf, &[6, 7, 8], 9).unwrap(),
        ];
        let mut summed = vec![0.0; whole.grad_prior.len()];
        for part in &parts {
            for (s, g) in summed.iter_mut().zip(part.grad_prior.iter()) {
                *s += g;
            }
        }
        for (a, b) in whole.grad_prior.iter().zip(summed.iter()) {
            assert_float_eq!(*a, *b, abs <= 1e-9);
        }
    }

    #[test_log::test]
    fn test_gradient_matches_numeric_central_difference() {
        let corpus_pairs = vec![
            TrainingPair::new(vec![0, 1, 2], vec![0.5, 0.3, 0.2]).unwrap(),
            TrainingPair::new(vec![2, 1, 0], vec![0.2, 0.3, 0.5]).unwrap(),
        ];
        let corpus = Corpus::new(corpus_pairs).unwrap();
        let background = Background::uniform(3);
        let evaluator = CrfGradientEvaluator::new(&corpus, &background, 2, GradientOptions::default()).unwrap();
        let state1 = crate::crf::CrfState::new(0.3, Array2::from_elem((3, 3), 0.05), vec![0.1, -0.1, 0.05]).unwrap();
        let state2 = crate::crf::CrfState::new(-0.2, Array2::from_elem((3, 3), -0.02), vec![-0.1, 0.2, 0.0]).unwrap();
        let crf = Crf::new(vec![state1, state2]).unwrap();

        let indices = all_indices(corpus.len());
        let analytic = evaluator.evaluate(&crf, &indices, corpus.len()).unwrap();
        let mut analytic_total = analytic.grad_log_likelihood.clone();
        for (a, b) in analytic_total.iter_mut().zip(analytic.grad_prior.iter()) {
            *a += b;
        }
        let numeric = numeric_gradient(&evaluator, &crf, &indices, corpus.len(), 1e-5);

        for (a, n) in analytic_total.iter().zip(numeric.iter()) {
            let denom = n.abs().max(1e-6);
            assert!((a - n).abs() / denom < 1e-2, "analytic {a} numeric {n}");
        }
    }
}
