//! Optimizer façade: batched L-BFGS and an HMC-style leapfrog sampler, both
//! consuming the §4.4 value+gradient oracle (spec §4.5).

use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rv::dist::Gaussian;
use rv::traits::Rv;

use crate::{
    error::{EngineError, Result},
    gradient::GradientOracle,
};

struct OracleAdapter<'a, O: GradientOracle> {
    oracle: &'a O,
    whole_corpus_len: usize,
}

impl<'a, O: GradientOracle> OracleAdapter<'a, O> {
    fn full_batch_indices(&self) -> Vec<usize> {
        (0..self.whole_corpus_len).collect()
    }
}

impl<'a, O: GradientOracle> CostFunction for OracleAdapter<'a, O> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        let result = self
            .oracle
            .evaluate(theta, &self.full_batch_indices(), self.whole_corpus_len)
            .map_err(|e| ArgminError::msg(e.to_string()))?;
        Ok(-(result.log_likelihood + result.prior))
    }
}

impl<'a, O: GradientOracle> Gradient for OracleAdapter<'a, O> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, theta: &Self::Param) -> std::result::Result<Self::Gradient, ArgminError> {
        let result = self
            .oracle
            .evaluate(theta, &self.full_batch_indices(), self.whole_corpus_len)
            .map_err(|e| ArgminError::msg(e.to_string()))?;
        Ok(result
            .grad_log_likelihood
            .iter()
            .zip(result.grad_prior.iter())
            .map(|(l, p)| -(l + p))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct LbfgsOptions {
    pub max_iters: u64,
    pub tolerance_grad: f64,
    pub history_size: usize,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            tolerance_grad: 1e-6,
            history_size: 8,
        }
    }
}

/// Full-corpus L-BFGS over the oracle, as in spec §4.5 item 1.
pub struct LbfgsOptimizer {
    options: LbfgsOptions,
}

impl LbfgsOptimizer {
    pub fn new(options: LbfgsOptions) -> Self {
        Self { options }
    }

    pub fn minimize<O: GradientOracle>(&self, oracle: &O, init: Vec<f64>, whole_corpus_len: usize) -> Result<Vec<f64>> {
        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.options.history_size)
            .with_tolerance_grad(self.options.tolerance_grad)
            .map_err(|e| EngineError::OptimizerFailure(e.to_string()))?;
        let problem = OracleAdapter {
            oracle,
            whole_corpus_len,
        };
        let result = Executor::new(problem, solver)
            .configure(|state| state.param(init).max_iters(self.options.max_iters))
            .run()
            .map_err(|e| EngineError::OptimizerFailure(e.to_string()))?;
        result
            .state
            .best_param
            .ok_or_else(|| EngineError::OptimizerFailure("L-BFGS produced no best parameter".into()))
    }
}

#[derive(Debug, Clone)]
pub struct HmcOptions {
    pub step_size: f64,
    pub num_leapfrog_steps: usize,
    pub seed: u64,
}

impl Default for HmcOptions {
    fn default() -> Self {
        Self {
            step_size: 1e-3,
            num_leapfrog_steps: 20,
            seed: 0,
        }
    }
}

/// Hybrid Monte-Carlo leapfrog sampler over a shuffled subsample of training
/// indices (spec §4.5 item 2). The shuffle vector is supplied by the caller
/// so repeated runs with the same seed reproduce identical block sequences
/// (spec §8 item 8, determinism).
pub struct HmcSampler {
    options: HmcOptions,
    rng: SmallRng,
}

impl HmcSampler {
    pub fn new(options: HmcOptions) -> Self {
        let rng = SmallRng::seed_from_u64(options.seed);
        Self { options, rng }
    }

    /// Runs one leapfrog trajectory against block `b` of `shuffle` — `shuffle`
    /// is a permutation over `0..whole_corpus_len`, and the training indices
    /// actually evaluated are `shuffle[block_ranges(shuffle.len(),
    /// num_blocks)[b]]`, not a contiguous slice of the corpus itself. Updates
    /// `theta` in place when the Metropolis step accepts. Returns the
    /// acceptance log-probability.
    pub fn step<O: GradientOracle>(
        &mut self,
        oracle: &O,
        theta: &mut Vec<f64>,
        shuffle: &[usize],
        block: usize,
        num_blocks: usize,
        whole_corpus_len: usize,
    ) -> Result<f64> {
        let block_range = crate::pair::block_ranges(shuffle.len(), num_blocks)[block].clone();
        let block_indices = &shuffle[block_range];

        let momentum_dist = Gaussian::new(0.0, 1.0).expect("standard normal parameters are valid");
        let mut momentum: Vec<f64> = (0..theta.len())
            .map(|_| momentum_dist.draw(&mut self.rng))
            .collect();

        let eval = |t: &[f64]| -> Result<(f64, Vec<f64>)> {
            let result = oracle.evaluate(t, block_indices, whole_corpus_len)?;
            let u = -(result.log_likelihood + result.prior);
            let grad_u: Vec<f64> = result
                .grad_log_likelihood
                .iter()
                .zip(result.grad_prior.iter())
                .map(|(l, p)| -(l + p))
                .collect();
            Ok((u, grad_u))
        };

        let (u0, grad0) = eval(theta)?;
        let kinetic0: f64 = momentum.iter().map(|p| p * p / 2.0).sum();

        let mut current = theta.clone();
        let mut grad = grad0;
        for (p, g) in momentum.iter_mut().zip(grad.iter()) {
            *p -= self.options.step_size * g / 2.0;
        }
        for step in 0..self.options.num_leapfrog_steps {
            for (t, p) in current.iter_mut().zip(momentum.iter()) {
                *t += self.options.step_size * p;
            }
            let (_, new_grad) = eval(&current)?;
            grad = new_grad;
            let is_last = step + 1 == self.options.num_leapfrog_steps;
            let scale = if is_last { 1.0 } else { 2.0 };
            for (p, g) in momentum.iter_mut().zip(grad.iter()) {
                *p -= scale * self.options.step_size * g / 2.0;
            }
        }

        let (u1, _) = eval(&current)?;
        let kinetic1: f64 = momentum.iter().map(|p| p * p / 2.0).sum();

        let log_accept = (u0 + kinetic0) - (u1 + kinetic1);
        let accept = log_accept >= 0.0 || self.rng.gen::<f64>().ln() < log_accept;
        if accept {
            *theta = current;
        }
        Ok(log_accept.min(0.0))
    }
}
