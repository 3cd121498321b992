//! Training pairs and the corpus they form (spec §3, §5).
//!
//! A `Corpus` is the EM driver's and CRF gradient evaluator's shared view of
//! the training data; both consumers partition it into contiguous,
//! static-sized blocks, so the partition lives here once rather than being
//! duplicated in each driver.

use std::ops::Range;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct TrainingPair {
    x: Vec<usize>,
    y: Vec<f64>,
}

const NORMALIZATION_EPS: f64 = 1e-6;

impl TrainingPair {
    pub fn new(x: Vec<usize>, y: Vec<f64>) -> Result<Self> {
        if x.is_empty() || x.len() % 2 == 0 {
            return Err(EngineError::WindowNotOdd(x.len()));
        }
        let total: f64 = y.iter().sum();
        if (total - 1.0).abs() > NORMALIZATION_EPS {
            return Err(EngineError::NotNormalized(total));
        }
        Ok(Self { x, y })
    }

    pub fn window(&self) -> usize {
        self.x.len()
    }

    pub fn alphabet_size(&self) -> usize {
        self.y.len()
    }

    pub fn center(&self) -> usize {
        (self.x.len() - 1) / 2
    }

    pub fn center_symbol(&self) -> usize {
        self.x[self.center()]
    }

    pub fn x(&self) -> &[usize] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }
}

#[derive(Debug, Clone)]
pub struct Corpus {
    pairs: Vec<TrainingPair>,
    window: usize,
    alphabet_size: usize,
}

impl Corpus {
    pub fn new(pairs: Vec<TrainingPair>) -> Result<Self> {
        let window = pairs.first().map(|p| p.window()).unwrap_or(0);
        let alphabet_size = pairs.first().map(|p| p.alphabet_size()).unwrap_or(0);
        for pair in &pairs {
            if pair.window() != window || pair.alphabet_size() != alphabet_size {
                return Err(EngineError::ShapeMismatch {
                    what: "training pair",
                    rows: pair.window(),
                    cols: pair.alphabet_size(),
                    expected_rows: window,
                    expected_cols: alphabet_size,
                });
            }
        }
        Ok(Self {
            pairs,
            window,
            alphabet_size,
        })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    pub fn pairs(&self) -> &[TrainingPair] {
        &self.pairs
    }

    /// Static contiguous partition into `num_blocks` equal-sized chunks (the
    /// last chunk absorbs the remainder). Used identically by the EM driver's
    /// mini-batches and the CRF evaluator's HMC block subsampling (spec §5).
    pub fn blocks(&self, num_blocks: usize) -> Vec<Range<usize>> {
        block_ranges(self.len(), num_blocks)
    }

    /// The contiguous range for block `b` of `num_blocks` (spec §4.5: block
    /// `b=0, B=1` denotes full-corpus evaluation).
    pub fn block_range(&self, b: usize, num_blocks: usize) -> Range<usize> {
        block_ranges(self.len(), num_blocks)[b.min(num_blocks.saturating_sub(1))].clone()
    }
}

pub(crate) fn block_ranges(len: usize, num_blocks: usize) -> Vec<Range<usize>> {
    let num_blocks = num_blocks.max(1);
    let base = len / num_blocks;
    let remainder = len % num_blocks;
    let mut ranges = Vec::with_capacity(num_blocks);
    let mut start = 0;
    for b in 0..num_blocks {
        let size = base + if b < remainder { 1 } else { 0 };
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}
