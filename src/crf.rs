//! CRF state and CRF model (spec §3 "CRF state S_k").

use ndarray::{Array2, ArrayView2};

use crate::{
    error::{EngineError, Result},
    library::{ContextComponent, Library},
    numerics::softmax,
};

#[derive(Debug, Clone)]
pub struct CrfState {
    bias: f64,
    context_weights: Array2<f64>,
    pc_weights: Vec<f64>,
}

impl CrfState {
    pub fn new(bias: f64, context_weights: Array2<f64>, pc_weights: Vec<f64>) -> Result<Self> {
        let a = context_weights.ncols();
        if pc_weights.len() != a {
            return Err(EngineError::ShapeMismatch {
                what: "pc_weights",
                rows: pc_weights.len(),
                cols: 1,
                expected_rows: a,
                expected_cols: 1,
            });
        }
        Ok(Self {
            bias,
            context_weights,
            pc_weights,
        })
    }

    pub fn zeroed(window: usize, alphabet_size: usize) -> Self {
        Self {
            bias: 0.0,
            context_weights: Array2::zeros((window, alphabet_size)),
            pc_weights: vec![0.0; alphabet_size],
        }
    }

    /// Log-space initialization from a sampled library component (spec §3:
    /// "created zeroed or from a sampled component (log-space init)").
    pub fn from_component(component: &ContextComponent) -> Self {
        let log_component = component.to_log_space();
        let bias = component.prior().max(f64::MIN_POSITIVE).ln();
        let context_weights = log_component.profile().mapv(|v| v * std::f64::consts::LN_2);
        let pc_weights = component
            .pseudocounts()
            .iter()
            .map(|&p| p.max(f64::MIN_POSITIVE).ln())
            .collect();
        Self {
            bias,
            context_weights,
            pc_weights,
        }
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn context_weights(&self) -> ArrayView2<f64> {
        self.context_weights.view()
    }

    pub fn pc_weights(&self) -> &[f64] {
        &self.pc_weights
    }

    pub fn window(&self) -> usize {
        self.context_weights.nrows()
    }

    pub fn alphabet_size(&self) -> usize {
        self.context_weights.ncols()
    }

    /// The effective pseudocount distribution: `softmax(q_k)`.
    pub fn softmax_pseudocounts(&self) -> Vec<f64> {
        softmax(&self.pc_weights)
    }
}

#[derive(Debug, Clone)]
pub struct Crf {
    states: Vec<CrfState>,
    window: usize,
    alphabet_size: usize,
}

impl Crf {
    pub fn new(states: Vec<CrfState>) -> Result<Self> {
        let first = states
            .first()
            .ok_or_else(|| EngineError::ConfigConflict("CRF must contain at least one state".into()))?;
        let window = first.window();
        let alphabet_size = first.alphabet_size();
        for (index, state) in states.iter().enumerate() {
            if state.window() != window || state.alphabet_size() != alphabet_size {
                return Err(EngineError::HeterogeneousComponent {
                    index,
                    window: state.window(),
                    alphabet: state.alphabet_size(),
                    expected_window: window,
                    expected_alphabet: alphabet_size,
                });
            }
        }
        Ok(Self {
            states,
            window,
            alphabet_size,
        })
    }

    pub fn zeroed(num_states: usize, window: usize, alphabet_size: usize) -> Self {
        let states = (0..num_states)
            .map(|_| CrfState::zeroed(window, alphabet_size))
            .collect();
        Self {
            states,
            window,
            alphabet_size,
        }
    }

    /// Jumpstart a CRF of the same cardinality as `library` from its
    /// components (spec §3: CRF states may be "created ... from a sampled
    /// component").
    pub fn from_library(library: &Library) -> Self {
        let states = library
            .components()
            .iter()
            .map(CrfState::from_component)
            .collect();
        Self {
            states,
            window: library.window(),
            alphabet_size: library.alphabet_size(),
        }
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> &[CrfState] {
        &self.states
    }

    pub fn states_mut(&mut self) -> &mut [CrfState] {
        &mut self.states
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    /// Length of the flat parameter vector: `K * (1 + W*A + A)` (spec §4.4
    /// Outputs).
    pub fn param_len(&self) -> usize {
        self.num_states() * (1 + self.window * self.alphabet_size + self.alphabet_size)
    }

    /// Flattens all weights ordered per state as `[b_k, c_k row-major, q_k]`
    /// (spec §4.4 Outputs).
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.param_len());
        for state in &self.states {
            flat.push(state.bias());
            flat.extend(state.context_weights().iter().copied());
            flat.extend(state.pc_weights().iter().copied());
        }
        flat
    }

    pub fn from_flat(
        flat: &[f64],
        num_states: usize,
        window: usize,
        alphabet_size: usize,
    ) -> Result<Self> {
        let per_state = 1 + window * alphabet_size + alphabet_size;
        let expected = num_states * per_state;
        if flat.len() != expected {
            return Err(EngineError::ShapeMismatch {
                what: "flat CRF parameter vector",
                rows: flat.len(),
                cols: 1,
                expected_rows: expected,
                expected_cols: 1,
            });
        }
        let mut states = Vec::with_capacity(num_states);
        for k in 0..num_states {
            let base = k * per_state;
            let bias = flat[base];
            let weights_slice = &flat[base + 1..base + 1 + window * alphabet_size];
            let context_weights =
                Array2::from_shape_vec((window, alphabet_size), weights_slice.to_vec())
                    .expect("slice length matches window * alphabet_size by construction");
            let pc_weights = flat[base + 1 + window * alphabet_size..base + per_state].to_vec();
            states.push(CrfState::new(bias, context_weights, pc_weights)?);
        }
        Crf::new(states)
    }
}
