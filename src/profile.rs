//! Count profile: a W x A matrix of residue counts or frequencies plus a
//! per-column effective-sequence-count (spec §3).

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{EngineError, Result};

const NORMALIZATION_EPS: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct CountProfile {
    data: Array2<f64>,
    n_eff: Array1<f64>,
    is_counts: bool,
}

impl CountProfile {
    pub fn from_counts(data: Array2<f64>, n_eff: Vec<f64>) -> Result<Self> {
        Self::new(data, n_eff, true)
    }

    pub fn from_frequencies(data: Array2<f64>, n_eff: Vec<f64>) -> Result<Self> {
        Self::new(data, n_eff, false)
    }

    fn new(data: Array2<f64>, n_eff: Vec<f64>, is_counts: bool) -> Result<Self> {
        let w = data.nrows();
        if n_eff.len() != w {
            return Err(EngineError::ShapeMismatch {
                what: "n_eff",
                rows: n_eff.len(),
                cols: 1,
                expected_rows: w,
                expected_cols: 1,
            });
        }
        if n_eff.iter().any(|&n| n < 1.0) {
            return Err(EngineError::ConfigConflict(
                "n_eff must be >= 1 for every column".into(),
            ));
        }
        if data.iter().any(|&v| v < 0.0) {
            return Err(EngineError::ConfigConflict(
                "count profile entries must be non-negative".into(),
            ));
        }
        if !is_counts {
            for row in data.rows() {
                let total: f64 = row.sum();
                if (total - 1.0).abs() > NORMALIZATION_EPS {
                    return Err(EngineError::NotNormalized(total));
                }
            }
        }
        Ok(Self {
            data,
            n_eff: Array1::from_vec(n_eff),
            is_counts,
        })
    }

    pub fn window(&self) -> usize {
        self.data.nrows()
    }

    pub fn alphabet_size(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_counts(&self) -> bool {
        self.is_counts
    }

    pub fn n_eff(&self, i: usize) -> f64 {
        self.n_eff[i]
    }

    pub fn row(&self, i: usize) -> ArrayView1<f64> {
        self.data.row(i)
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Converts to a frequency profile (columns summing to 1), dividing each
    /// row by its N_eff when currently stored as counts.
    pub fn to_frequencies(&self) -> CountProfile {
        if !self.is_counts {
            return self.clone();
        }
        let mut data = self.data.clone();
        for (mut row, &n) in data.rows_mut().into_iter().zip(self.n_eff.iter()) {
            let total: f64 = row.sum();
            if total > 0.0 {
                row.mapv_inplace(|v| v / total);
            } else {
                let _ = n;
            }
        }
        CountProfile {
            data,
            n_eff: self.n_eff.clone(),
            is_counts: false,
        }
    }

    /// Converts to a counts profile, scaling each row by its N_eff.
    pub fn to_counts(&self) -> CountProfile {
        if self.is_counts {
            return self.clone();
        }
        let mut data = self.data.clone();
        for (mut row, &n) in data.rows_mut().into_iter().zip(self.n_eff.iter()) {
            row.mapv_inplace(|v| v * n);
        }
        CountProfile {
            data,
            n_eff: self.n_eff.clone(),
            is_counts: true,
        }
    }
}
