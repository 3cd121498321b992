//! Core statistical-learning engine: context-specific pseudocount
//! distributions for protein-sequence homology detection, trained either as
//! a generative context library (EM) or a discriminative CRF (hybrid
//! HMC/L-BFGS).

pub mod alphabet;
pub mod crf;
pub mod em;
pub mod emission;
pub mod error;
pub mod gradient;
pub mod library;
pub mod numerics;
pub mod optimizer;
pub mod pair;
pub mod posterior;
pub mod profile;
pub mod progress;
pub mod serialize;
pub mod weights;

pub use alphabet::{Alphabet, Background};
pub use crf::{Crf, CrfState};
pub use em::{EmDriver, EmOptions, TrainReport};
pub use emission::{score_component, score_crf_state, Subject};
pub use error::{EngineError, Result};
pub use gradient::{CrfGradientEvaluator, GradientOptions, GradientOracle, GradientResult};
pub use library::{ContextComponent, Library};
pub use optimizer::{HmcOptions, HmcSampler, LbfgsOptimizer, LbfgsOptions};
pub use pair::{Corpus, TrainingPair};
pub use posterior::{crf_posterior, library_posterior, mix_with_admixture, Admixture, CrfPosterior, LibraryPosterior};
pub use profile::CountProfile;
pub use progress::{IndicatifProgress, NoopProgress, ProgressCallback};
pub use weights::PositionalWeights;
