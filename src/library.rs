//! Context library component and library (spec §3 "Context component C_k" /
//! "Library L").
//!
//! Deep inheritance in the source tool (abstract application class, base
//! profile, context profile) collapses to one concrete value type bundling a
//! profile with a prior and a pseudocount vector (DESIGN.md).

use ndarray::{Array2, ArrayView2};

use crate::error::{EngineError, Result};

const NORMALIZATION_EPS: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct ContextComponent {
    profile: Array2<f64>,
    prior: f64,
    pseudocounts: Vec<f64>,
    log_space: bool,
}

impl ContextComponent {
    pub fn new(
        profile: Array2<f64>,
        prior: f64,
        pseudocounts: Vec<f64>,
        log_space: bool,
    ) -> Result<Self> {
        let a = profile.ncols();
        if pseudocounts.len() != a {
            return Err(EngineError::ShapeMismatch {
                what: "pseudocounts",
                rows: pseudocounts.len(),
                cols: 1,
                expected_rows: a,
                expected_cols: 1,
            });
        }
        if !(0.0..=1.0).contains(&prior) {
            return Err(EngineError::ConfigConflict(format!(
                "prior weight {prior} out of range [0, 1]"
            )));
        }
        let total: f64 = pseudocounts.iter().sum();
        if (total - 1.0).abs() > NORMALIZATION_EPS {
            return Err(EngineError::NotNormalized(total));
        }
        if !log_space {
            for row in profile.rows() {
                let total: f64 = row.sum();
                if (total - 1.0).abs() > NORMALIZATION_EPS {
                    return Err(EngineError::NotNormalized(total));
                }
            }
        }
        Ok(Self {
            profile,
            prior,
            pseudocounts,
            log_space,
        })
    }

    pub fn window(&self) -> usize {
        self.profile.nrows()
    }

    pub fn alphabet_size(&self) -> usize {
        self.profile.ncols()
    }

    pub fn prior(&self) -> f64 {
        self.prior
    }

    pub fn pseudocounts(&self) -> &[f64] {
        &self.pseudocounts
    }

    pub fn profile(&self) -> ArrayView2<f64> {
        self.profile.view()
    }

    pub fn is_log_space(&self) -> bool {
        self.log_space
    }

    pub(crate) fn set_prior(&mut self, prior: f64) {
        self.prior = prior;
    }

    pub(crate) fn set_profile(&mut self, profile: Array2<f64>) {
        self.profile = profile;
    }

    pub fn to_log_space(&self) -> ContextComponent {
        if self.log_space {
            return self.clone();
        }
        ContextComponent {
            profile: self.profile.mapv(f64::log2),
            prior: self.prior,
            pseudocounts: self.pseudocounts.clone(),
            log_space: true,
        }
    }

    pub fn to_linear_space(&self) -> ContextComponent {
        if !self.log_space {
            return self.clone();
        }
        ContextComponent {
            profile: self.profile.mapv(|v| 2f64.powf(v)),
            prior: self.prior,
            pseudocounts: self.pseudocounts.clone(),
            log_space: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Library {
    components: Vec<ContextComponent>,
    window: usize,
    alphabet_size: usize,
    log_space: bool,
}

impl Library {
    pub fn new(components: Vec<ContextComponent>) -> Result<Self> {
        let first = components.first().ok_or_else(|| {
            EngineError::ConfigConflict("library must contain at least one component".into())
        })?;
        let window = first.window();
        let alphabet_size = first.alphabet_size();
        let log_space = first.is_log_space();
        for (index, component) in components.iter().enumerate() {
            if component.window() != window
                || component.alphabet_size() != alphabet_size
                || component.is_log_space() != log_space
            {
                return Err(EngineError::HeterogeneousComponent {
                    index,
                    window: component.window(),
                    alphabet: component.alphabet_size(),
                    expected_window: window,
                    expected_alphabet: alphabet_size,
                });
            }
        }
        let prior_sum: f64 = components.iter().map(|c| c.prior()).sum();
        if (prior_sum - 1.0).abs() > NORMALIZATION_EPS {
            return Err(EngineError::PriorNotNormalized(prior_sum));
        }
        Ok(Self {
            components,
            window,
            alphabet_size,
            log_space,
        })
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[ContextComponent] {
        &self.components
    }

    pub(crate) fn components_mut(&mut self) -> &mut [ContextComponent] {
        &mut self.components
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    pub fn is_log_space(&self) -> bool {
        self.log_space
    }

    pub fn to_log_space(&self) -> Library {
        if self.log_space {
            return self.clone();
        }
        Library {
            components: self.components.iter().map(|c| c.to_log_space()).collect(),
            window: self.window,
            alphabet_size: self.alphabet_size,
            log_space: true,
        }
    }

    pub fn to_linear_space(&self) -> Library {
        if !self.log_space {
            return self.clone();
        }
        Library {
            components: self
                .components
                .iter()
                .map(|c| c.to_linear_space())
                .collect(),
            window: self.window,
            alphabet_size: self.alphabet_size,
            log_space: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn uniform_component(prior: f64) -> ContextComponent {
        let profile = array![[0.25, 0.25, 0.25, 0.25]];
        ContextComponent::new(profile, prior, vec![0.25, 0.25, 0.25, 0.25], false).unwrap()
    }

    #[test]
    fn test_library_requires_priors_sum_to_one() {
        let components = vec![uniform_component(0.5), uniform_component(0.4)];
        assert!(Library::new(components).is_err());
    }

    #[test]
    fn test_library_accepts_normalized_priors() {
        let components = vec![uniform_component(0.5), uniform_component(0.5)];
        let library = Library::new(components).unwrap();
        assert_eq!(library.num_components(), 2);
    }

    #[test]
    fn test_log_space_roundtrip() {
        let component = uniform_component(1.0);
        let log = component.to_log_space();
        assert!(log.is_log_space());
        let linear = log.to_linear_space();
        for (a, b) in component.profile().iter().zip(linear.profile().iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rejects_heterogeneous_components() {
        let a = uniform_component(0.5);
        let small_profile = array![[0.5, 0.5]];
        let b = ContextComponent::new(small_profile, 0.5, vec![0.5, 0.5], false).unwrap();
        assert!(Library::new(vec![a, b]).is_err());
    }
}
