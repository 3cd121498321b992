//! Error taxonomy for the engine, grounded on the `FilterError`/`region.rs`
//! pattern: a single `thiserror`-derived enum naming every fatal condition
//! from spec §7, with `#[from] io::Error` for surfaced I/O faults.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("window length {0} must be odd and positive")]
    WindowNotOdd(usize),

    #[error("expected alphabet size {expected}, got {actual}")]
    AlphabetSizeMismatch { expected: usize, actual: usize },

    #[error("{what} has shape {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    ShapeMismatch {
        what: &'static str,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error("library is homogeneous in window/alphabet but component {index} has window {window} alphabet {alphabet}, expected {expected_window}/{expected_alphabet}")]
    HeterogeneousComponent {
        index: usize,
        window: usize,
        alphabet: usize,
        expected_window: usize,
        expected_alphabet: usize,
    },

    #[error("declared {declared} components but found {found} while deserializing")]
    ComponentCountMismatch { declared: usize, found: usize },

    #[error("prior weights sum to {0}, expected 1 +/- epsilon")]
    PriorNotNormalized(f64),

    #[error("distribution sums to {0}, expected 1 +/- epsilon")]
    NotNormalized(f64),

    #[error("posterior normalizer is zero: every component/state assigned zero probability")]
    ZeroPosteriorMass,

    #[error("predicted pseudocount mass for letter index {letter} is zero but target mass is positive")]
    ZeroPseudocountMass { letter: usize },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("truncated record: expected a '//' terminator before end of input")]
    TruncatedRecord,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    #[error("admixture tau={0} out of range [0, 1]")]
    AdmixtureOutOfRange(f64),

    #[error("sigma must be positive, got {0}")]
    NonPositiveSigma(f64),

    #[error("optimizer failure: {0}")]
    OptimizerFailure(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
