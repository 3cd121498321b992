//! EM driver for context libraries (spec §4.3).
//!
//! Mirrors the online mini-batch accumulate/merge/normalize shape: each scan
//! walks the corpus in contiguous blocks, accumulates block statistics in
//! parallel with an order-stable reduction (spec §5), blends them into the
//! running global statistics, then runs a single-threaded M-step.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::{
    emission::{score_component, Subject},
    error::{EngineError, Result},
    library::Library,
    pair::Corpus,
    progress::ProgressCallback,
    weights::PositionalWeights,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmOptions {
    pub num_profiles: usize,
    pub max_scans: usize,
    pub min_scans: usize,
    pub log_likelihood_change: f64,
    pub blending: f64,
    pub num_blocks: usize,
    pub weight_center: f64,
    pub weight_decay: f64,
}

impl Default for EmOptions {
    fn default() -> Self {
        Self {
            num_profiles: 10,
            max_scans: 100,
            min_scans: 1,
            log_likelihood_change: 1e-4,
            blending: 1.0,
            num_blocks: 1,
            weight_center: 1.6,
            weight_decay: 0.85,
        }
    }
}

impl EmOptions {
    pub fn num_profiles(mut self, k: usize) -> Self {
        self.num_profiles = k;
        self
    }

    pub fn max_scans(mut self, n: usize) -> Self {
        self.max_scans = n;
        self
    }

    pub fn min_scans(mut self, n: usize) -> Self {
        self.min_scans = n;
        self
    }

    pub fn log_likelihood_change(mut self, delta: f64) -> Self {
        self.log_likelihood_change = delta;
        self
    }

    pub fn blending(mut self, eta: f64) -> Self {
        self.blending = eta;
        self
    }

    pub fn num_blocks(mut self, b: usize) -> Self {
        self.num_blocks = b;
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
        if self.num_profiles == 0 {
            return Err(EngineError::ConfigConflict(
                "num_profiles must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.blending) {
            return Err(EngineError::ConfigConflict(format!(
                "blending factor {} out of range (0, 1]",
                self.blending
            )));
        }
        Ok(())
    }
}

/// Per-component accumulator: a prior scalar and a W x A emission matrix
/// (spec §3 "Sufficient-statistics block").
#[derive(Debug, Clone)]
struct SufficientStats {
    prior: f64,
    emissions: Array2<f64>,
}

impl SufficientStats {
    fn zeros(window: usize, alphabet_size: usize) -> Self {
        Self {
            prior: 0.0,
            emissions: Array2::zeros((window, alphabet_size)),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BlockStats {
    components: Vec<SufficientStats>,
    log_likelihood: f64,
}

impl BlockStats {
    fn zeros(num_components: usize, window: usize, alphabet_size: usize) -> Self {
        Self {
            components: (0..num_components)
                .map(|_| SufficientStats::zeros(window, alphabet_size))
                .collect(),
            log_likelihood: 0.0,
        }
    }

    fn merge(&mut self, other: &BlockStats) {
        self.log_likelihood += other.log_likelihood;
        for (mine, theirs) in self.components.iter_mut().zip(other.components.iter()) {
            mine.prior += theirs.prior;
            mine.emissions += &theirs.emissions;
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub scans_run: usize,
    pub converged: bool,
    pub log_likelihood_history: Vec<f64>,
}

pub struct EmDriver {
    library: Library,
    options: EmOptions,
    weights: PositionalWeights,
    global_stats: Vec<SufficientStats>,
}

impl EmDriver {
    /// Profiles are kept in log-space for the duration of training so the
    /// M-step's in-place log-frequency replacement (spec §4.3) never leaves
    /// the profile and its `log_space` flag out of sync.
    pub fn new(library: Library, options: EmOptions) -> Result<Self> {
        options.validate()?;
        let library = library.to_log_space();
        let weights =
            PositionalWeights::new(library.window(), options.weight_center, options.weight_decay)?;
        let global_stats = (0..library.num_components())
            .map(|_| SufficientStats::zeros(library.window(), library.alphabet_size()))
            .collect();
        Ok(Self {
            library,
            options,
            weights,
            global_stats,
        })
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn into_library(self) -> Library {
        self.library
    }

    /// Runs the scan loop of spec §4.3 to convergence or `max_scans`.
    pub fn train(&mut self, corpus: &Corpus, progress: &mut dyn ProgressCallback) -> Result<TrainReport> {
        if corpus.window() != self.library.window() || corpus.alphabet_size() != self.library.alphabet_size() {
            return Err(EngineError::ShapeMismatch {
                what: "corpus",
                rows: corpus.window(),
                cols: corpus.alphabet_size(),
                expected_rows: self.library.window(),
                expected_cols: self.library.alphabet_size(),
            });
        }
        let any_index = self.library.alphabet_size();
        let mut history = Vec::new();
        let mut scans_run = 0;
        let mut converged = false;
        let num_blocks = self.options.num_blocks.max(1);
        let blocks = corpus.blocks(num_blocks);

        for scan in 0..self.options.max_scans {
            let mut scan_log_likelihood = 0.0;
            let mut block_log_likelihoods = Vec::with_capacity(blocks.len());
            let last_block = blocks.len().saturating_sub(1);
            for (block_index, range) in blocks.iter().enumerate() {
                let pairs = &corpus.pairs()[range.clone()];
                if pairs.is_empty() {
                    continue;
                }
                let chunk_count = rayon::current_num_threads().max(1).min(pairs.len().max(1));
                let chunk_size = (pairs.len() + chunk_count - 1) / chunk_count;
                let chunk_partials: Vec<BlockStats> = pairs
                    .par_chunks(chunk_size.max(1))
                    .map(|chunk| self.e_step_chunk(chunk, any_index))
                    .collect();

                let mut block_stats =
                    BlockStats::zeros(self.library.num_components(), self.library.window(), self.library.alphabet_size());
                for partial in &chunk_partials {
                    block_stats.merge(partial);
                }

                for (global, block) in self.global_stats.iter_mut().zip(block_stats.components.iter()) {
                    global.prior = self.options.blending * global.prior + block.prior;
                    global.emissions = self.options.blending * &global.emissions + &block.emissions;
                }
                self.m_step();

                scan_log_likelihood += block_stats.log_likelihood;
                block_log_likelihoods.push(block_stats.log_likelihood);
                progress.advance(pairs.len() as u64);
                log::debug!(
                    "scan {scan} block {block_index}/{last_block}: block log-likelihood {}",
                    block_stats.log_likelihood
                );
            }

            scans_run = scan + 1;
            let previous = history.last().copied();
            history.push(scan_log_likelihood);
            log::info!(
                "scan {scan} complete: log-likelihood {scan_log_likelihood:.6}, mean block log-likelihood {:.6}",
                block_log_likelihoods.as_slice().mean()
            );

            // Spec §5: the termination predicate, including a caller-requested
            // stop, is only checked at scan boundaries, never mid-scan.
            if progress.report(scan, last_block, scan_log_likelihood, 0.0) {
                converged = false;
                break;
            }
            if scan + 1 >= self.options.min_scans {
                if let Some(prev) = previous {
                    let denom = prev.abs().max(1e-12);
                    let relative_change = (scan_log_likelihood - prev).abs() / denom;
                    if relative_change < self.options.log_likelihood_change {
                        converged = true;
                        break;
                    }
                }
            }
        }

        Ok(TrainReport {
            scans_run,
            converged,
            log_likelihood_history: history,
        })
    }

    fn e_step_chunk(&self, pairs: &[crate::pair::TrainingPair], any_index: usize) -> BlockStats {
        let mut stats = BlockStats::zeros(self.library.num_components(), self.library.window(), self.library.alphabet_size());
        for pair in pairs {
            let posterior = match crate::posterior::library_posterior(
                &self.library,
                &self.weights,
                Subject::Sequence(pair.x()),
                pair.center() as i64,
                any_index,
            ) {
                Ok(p) => p,
                Err(_) => continue,
            };
            for k in 0..self.library.num_components() {
                let p_k = posterior.posteriors[k];
                stats.components[k].prior += p_k;
                for (i, &symbol) in pair.x().iter().enumerate() {
                    if symbol == any_index {
                        continue;
                    }
                    stats.components[k].emissions[[i, symbol]] += p_k;
                }
            }
            let score_sum: f64 = self
                .library
                .components()
                .iter()
                .enumerate()
                .map(|(k, c)| {
                    posterior.posteriors[k]
                        * score_component(c, &self.weights, Subject::Sequence(pair.x()), pair.center() as i64, any_index)
                })
                .sum();
            stats.log_likelihood += score_sum;
        }
        stats
    }

    /// Normalizes priors across all components; for each component whose
    /// accumulated evidence is nonzero, normalizes its emission columns and
    /// replaces the profile in log-space (spec §4.3 M-step). A component with
    /// zero evidence keeps its previous profile unchanged. A row with zero
    /// evidence within an otherwise-evidenced component falls back to uniform
    /// rather than producing -inf log-frequencies (DESIGN.md).
    fn m_step(&mut self) {
        let prior_total: f64 = self.global_stats.iter().map(|s| s.prior).sum();
        let alphabet_size = self.library.alphabet_size();
        for (component, stats) in self
            .library
            .components_mut()
            .iter_mut()
            .zip(self.global_stats.iter())
        {
            if prior_total > 0.0 {
                component.set_prior(stats.prior / prior_total);
            }
            if stats.emissions.sum() <= 0.0 {
                continue;
            }
            let mut new_profile = stats.emissions.clone();
            for mut row in new_profile.rows_mut() {
                let total: f64 = row.sum();
                if total > 0.0 {
                    row.mapv_inplace(|v| (v / total).log2());
                } else {
                    row.fill((1.0 / alphabet_size as f64).log2());
                }
            }
            component.set_profile(new_profile);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{library::ContextComponent, pair::TrainingPair, progress::NoopProgress};
    use ndarray::array;

    fn two_component_library() -> Library {
        let profile = array![[0.5, 0.5]];
        let c1 = ContextComponent::new(profile.clone(), 0.5, vec![0.5, 0.5], false).unwrap();
        let c2 = ContextComponent::new(profile, 0.5, vec![0.5, 0.5], false).unwrap();
        Library::new(vec![c1, c2]).unwrap()
    }

    #[test]
    fn test_s5_deterministic_single_point_corpus_captures_component() {
        let library = two_component_library();
        let options = EmOptions::default().max_scans(1).min_scans(1).num_blocks(1);
        let mut driver = EmDriver::new(library, options).unwrap();
        let pair = TrainingPair::new(vec![0], vec![1.0, 0.0]).unwrap();
        let corpus = Corpus::new(vec![pair; 5]).unwrap();
        let mut progress = NoopProgress;
        let report = driver.train(&corpus, &mut progress).unwrap();
        assert_eq!(report.scans_run, 1);
        let library = driver.into_library();
        let prior_total: f64 = library.components().iter().map(|c| c.prior()).sum();
        assert!((prior_total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_columns_normalized_after_m_step() {
        let library = two_component_library();
        let options = EmOptions::default().max_scans(2).min_scans(1).num_blocks(2);
        let mut driver = EmDriver::new(library, options).unwrap();
        let pairs = vec![
            TrainingPair::new(vec![0], vec![1.0, 0.0]).unwrap(),
            TrainingPair::new(vec![1], vec![0.0, 1.0]).unwrap(),
        ];
        let corpus = Corpus::new(pairs).unwrap();
        let mut progress = NoopProgress;
        driver.train(&corpus, &mut progress).unwrap();
        let library = driver.into_library();
        for component in library.components() {
            for i in 0..component.window() {
                let row = component.profile();
                let row = row.row(i);
                let total: f64 = row.iter().map(|&v| 2f64.powf(v)).sum();
                assert!((total - 1.0).abs() < 1e-6);
            }
        }
    }
}
