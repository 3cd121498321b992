//! Posterior and pseudocount mixer (spec §4.2).

use crate::{
    crf::Crf,
    emission::{score_component, score_crf_state, Subject},
    error::{EngineError, Result},
    library::Library,
    numerics::log_sum_exp,
    weights::PositionalWeights,
};

/// Admixture coefficient between observed and predicted pseudocounts (spec
/// §6 "Configuration", glossary "Admixture τ").
#[derive(Debug, Clone, Copy)]
pub enum Admixture {
    Constant(f64),
    DivergenceDependent { a: f64, b: f64 },
}

impl Admixture {
    pub fn tau(&self, n_eff: f64) -> Result<f64> {
        let tau = match *self {
            Admixture::Constant(c) => c,
            Admixture::DivergenceDependent { a, b } => a / (1.0 + (n_eff - 1.0) / b),
        };
        if !(0.0..=1.0).contains(&tau) {
            return Err(EngineError::AdmixtureOutOfRange(tau));
        }
        Ok(tau)
    }
}

pub struct LibraryPosterior {
    pub posteriors: Vec<f64>,
    pub pseudocounts: Vec<f64>,
}

/// Library-path posterior: `r_k = pi_k * 2^score(k,.)`, normalized across
/// `k`; mixed pseudocount `p(a) = sum_k P(z=k) * p_k[a]` (spec §4.2).
pub fn library_posterior(
    library: &Library,
    weights: &PositionalWeights,
    subject: Subject,
    j: i64,
    any_index: usize,
) -> Result<LibraryPosterior> {
    let log2_unnormalized: Vec<f64> = library
        .components()
        .iter()
        .map(|c| c.prior().max(f64::MIN_POSITIVE).log2() + score_component(c, weights, subject, j, any_index))
        .collect();
    let max = log2_unnormalized
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return Err(EngineError::ZeroPosteriorMass);
    }
    let unnormalized: Vec<f64> = log2_unnormalized
        .iter()
        .map(|&v| 2f64.powf(v - max))
        .collect();
    let total: f64 = unnormalized.iter().sum();
    if total <= 0.0 {
        return Err(EngineError::ZeroPosteriorMass);
    }
    let posteriors: Vec<f64> = unnormalized.iter().map(|&v| v / total).collect();

    let alphabet_size = library.alphabet_size();
    let mut pseudocounts = vec![0.0; alphabet_size];
    for (k, component) in library.components().iter().enumerate() {
        for a in 0..alphabet_size {
            pseudocounts[a] += posteriors[k] * component.pseudocounts()[a];
        }
    }
    Ok(LibraryPosterior {
        posteriors,
        pseudocounts,
    })
}

pub struct CrfPosterior {
    pub posteriors: Vec<f64>,
    pub pseudocounts: Vec<f64>,
}

/// CRF-path posterior: log-sum-exp normalized softmax over state scores;
/// mixed pseudocount `p(a) = sum_k P(z=k) * softmax(q_k)[a]` (spec §4.2).
pub fn crf_posterior(crf: &Crf, weights: &PositionalWeights, seq: &[usize], j: i64, any_index: usize) -> CrfPosterior {
    let u: Vec<f64> = crf
        .states()
        .iter()
        .map(|s| score_crf_state(s, weights, seq, j, any_index))
        .collect();
    let (max, lse) = log_sum_exp(&u);
    let posteriors: Vec<f64> = u.iter().map(|&uk| (uk - max - lse).exp()).collect();

    let alphabet_size = crf.alphabet_size();
    let mut pseudocounts = vec![0.0; alphabet_size];
    for (k, state) in crf.states().iter().enumerate() {
        let pc = state.softmax_pseudocounts();
        for a in 0..alphabet_size {
            pseudocounts[a] += posteriors[k] * pc[a];
        }
    }
    CrfPosterior {
        posteriors,
        pseudocounts,
    }
}

/// Blends observed center-letter identity with predicted pseudocounts:
/// `p'(a) = (1-tau)*delta(x[center]=a) + tau*p(a)` (spec §4.2).
pub fn mix_with_admixture(
    pseudocounts: &[f64],
    center_letter: usize,
    admixture: &Admixture,
    n_eff: f64,
) -> Result<Vec<f64>> {
    let tau = admixture.tau(n_eff)?;
    Ok(pseudocounts
        .iter()
        .enumerate()
        .map(|(a, &p)| {
            let delta = if a == center_letter { 1.0 } else { 0.0 };
            (1.0 - tau) * delta + tau * p
        })
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::library::ContextComponent;
    use ndarray::array;

    #[test]
    fn test_s1_single_uniform_component_mixes_to_uniform_pseudocount() {
        let profile = array![[0.05; 20]];
        let component = ContextComponent::new(profile, 1.0, vec![0.05; 20], false).unwrap();
        let library = Library::new(vec![component]).unwrap();
        let weights = PositionalWeights::new(1, 1.6, 0.85).unwrap();
        let seq = [0usize];
        let subject_profile = array![[1.0f64, 0.0].iter().cloned().chain(std::iter::repeat(0.0)).take(20).collect::<Vec<_>>()];
        // Build a one-hot profile on letter A (index 0) to stand in for the query window.
        let mut onehot = vec![0.0; 20];
        onehot[0] = 1.0;
        let subject = crate::profile::CountProfile::from_frequencies(
            ndarray::Array2::from_shape_vec((1, 20), onehot).unwrap(),
            vec![1.0],
        )
        .unwrap();
        let _ = subject_profile;
        let posterior =
            library_posterior(&library, &weights, Subject::Profile(&subject), 0, 20).unwrap();
        assert_eq!(posterior.posteriors.len(), 1);
        assert!((posterior.posteriors[0] - 1.0).abs() < 1e-9);
        let mixed = mix_with_admixture(&posterior.pseudocounts, seq[0], &Admixture::Constant(1.0), 1.0).unwrap();
        for &p in &mixed {
            assert!((p - 0.05).abs() < 1e-9);
        }
    }

    #[test]
    fn test_s2_two_component_tie_splits_posterior_evenly() {
        let profile = array![[1.0, 0.0]];
        let mut p1 = vec![0.0; 2];
        p1[0] = 1.0;
        let mut p2 = vec![0.0; 2];
        p2[1] = 1.0;
        let c1 = ContextComponent::new(profile.clone(), 0.5, p1, false).unwrap();
        let c2 = ContextComponent::new(profile, 0.5, p2, false).unwrap();
        let library = Library::new(vec![c1, c2]).unwrap();
        let weights = PositionalWeights::new(1, 1.6, 0.85).unwrap();
        let subject = crate::profile::CountProfile::from_frequencies(
            ndarray::Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap(),
            vec![1.0],
        )
        .unwrap();
        let posterior =
            library_posterior(&library, &weights, Subject::Profile(&subject), 0, 2).unwrap();
        assert!((posterior.posteriors[0] - 0.5).abs() < 1e-9);
        assert!((posterior.posteriors[1] - 0.5).abs() < 1e-9);
        assert!((posterior.pseudocounts[0] - 0.5).abs() < 1e-9);
        assert!((posterior.pseudocounts[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_s3_zero_weight_crf_gives_uniform_posterior() {
        let crf = Crf::zeroed(3, 1, 20);
        let weights = PositionalWeights::new(1, 1.6, 0.85).unwrap();
        let seq = [0usize];
        let posterior = crf_posterior(&crf, &weights, &seq, 0, 20);
        for p in posterior.posteriors {
            assert!((p - 1.0 / 3.0).abs() < 1e-9);
        }
        for p in posterior.pseudocounts {
            assert!((p - 1.0 / 20.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_posterior_is_distribution() {
        let profile = array![[0.1, 0.2, 0.7]];
        let c1 = ContextComponent::new(profile.clone(), 0.3, vec![0.2, 0.3, 0.5], false).unwrap();
        let c2 = ContextComponent::new(profile, 0.7, vec![0.1, 0.1, 0.8], false).unwrap();
        let library = Library::new(vec![c1, c2]).unwrap();
        let weights = PositionalWeights::new(1, 1.6, 0.85).unwrap();
        let subject = crate::profile::CountProfile::from_frequencies(
            ndarray::Array2::from_shape_vec((1, 3), vec![0.2, 0.3, 0.5]).unwrap(),
            vec![1.0],
        )
        .unwrap();
        let posterior =
            library_posterior(&library, &weights, Subject::Profile(&subject), 0, 3).unwrap();
        let total: f64 = posterior.posteriors.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
