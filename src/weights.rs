//! Positional weighting scheme shared by the emission kernel, EM driver, and
//! CRF gradient evaluator (spec §4.1).

use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct PositionalWeights {
    weights: Vec<f64>,
    center: usize,
}

impl PositionalWeights {
    pub fn new(window: usize, weight_center: f64, weight_decay: f64) -> Result<Self> {
        if window == 0 || window % 2 == 0 {
            return Err(EngineError::WindowNotOdd(window));
        }
        if weight_center <= 0.0 {
            return Err(EngineError::ConfigConflict(
                "weight_center must be positive".into(),
            ));
        }
        if weight_decay <= 0.0 || weight_decay > 1.0 {
            return Err(EngineError::ConfigConflict(
                "weight_decay must be in (0, 1]".into(),
            ));
        }
        let center = (window - 1) / 2;
        let mut weights = vec![0.0; window];
        weights[center] = weight_center;
        for i in 1..=center {
            let w = weight_center * weight_decay.powi(i as i32);
            weights[center - i] = w;
            weights[center + i] = w;
        }
        Ok(Self { weights, center })
    }

    pub fn window(&self) -> usize {
        self.weights.len()
    }

    pub fn center(&self) -> usize {
        self.center
    }

    pub fn get(&self, i: usize) -> f64 {
        self.weights[i]
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rejects_even_window() {
        assert!(PositionalWeights::new(4, 1.6, 0.85).is_err());
    }

    #[test]
    fn test_center_weight() {
        let w = PositionalWeights::new(5, 1.6, 0.85).unwrap();
        assert_eq!(w.center(), 2);
        assert!((w.get(2) - 1.6).abs() < 1e-12);
        assert!((w.get(1) - 1.6 * 0.85).abs() < 1e-12);
        assert!((w.get(3) - 1.6 * 0.85).abs() < 1e-12);
        assert!((w.get(0) - 1.6 * 0.85 * 0.85).abs() < 1e-12);
        assert!((w.get(4) - 1.6 * 0.85 * 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_single_column_window() {
        let w = PositionalWeights::new(1, 1.6, 0.85).unwrap();
        assert_eq!(w.center(), 0);
        assert!((w.get(0) - 1.6).abs() < 1e-12);
    }
}
