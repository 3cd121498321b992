use libcsprofile::{
    em::{EmDriver, EmOptions},
    library::{ContextComponent, Library},
    pair::{Corpus, TrainingPair},
    posterior::{library_posterior, mix_with_admixture, Admixture},
    progress::NoopProgress,
    weights::PositionalWeights,
    emission::Subject,
    profile::CountProfile,
};
use ndarray::{array, Array2};
use pretty_assertions::assert_eq as passert_eq;

/// S1: a single uniform component admixed with tau=1 reproduces its
/// pseudocount distribution for any query.
#[test]
fn s1_single_uniform_component_reproduces_pseudocount() {
    let profile = Array2::from_elem((1, 20), 0.05);
    let component = ContextComponent::new(profile, 1.0, vec![0.05; 20], false).unwrap();
    let library = Library::new(vec![component]).unwrap();
    let weights = PositionalWeights::new(1, 1.6, 0.85).unwrap();

    let mut onehot = vec![0.0; 20];
    onehot[3] = 1.0;
    let subject = CountProfile::from_frequencies(Array2::from_shape_vec((1, 20), onehot).unwrap(), vec![1.0]).unwrap();

    let posterior = library_posterior(&library, &weights, Subject::Profile(&subject), 0, 20).unwrap();
    let mixed = mix_with_admixture(&posterior.pseudocounts, 3, &Admixture::Constant(1.0), 1.0).unwrap();
    for &p in &mixed {
        assert!((p - 0.05).abs() < 1e-9);
    }
}

/// S2: two components with identical profiles and equal priors split the
/// posterior 50/50 and mix their one-hot pseudocounts evenly.
#[test]
fn s2_tied_components_split_posterior_evenly() {
    let profile = array![[1.0, 0.0]];
    let mut p1 = vec![0.0; 2];
    p1[0] = 1.0;
    let mut p2 = vec![0.0; 2];
    p2[1] = 1.0;
    let c1 = ContextComponent::new(profile.clone(), 0.5, p1, false).unwrap();
    let c2 = ContextComponent::new(profile, 0.5, p2, false).unwrap();
    let library = Library::new(vec![c1, c2]).unwrap();
    let weights = PositionalWeights::new(1, 1.6, 0.85).unwrap();

    let subject = CountProfile::from_frequencies(Array2::from_shape_vec((1, 2), vec![1.0, 0.0]).unwrap(), vec![1.0]).unwrap();
    let posterior = library_posterior(&library, &weights, Subject::Profile(&subject), 0, 2).unwrap();

    assert!((posterior.posteriors[0] - 0.5).abs() < 1e-9);
    assert!((posterior.posteriors[1] - 0.5).abs() < 1e-9);
    assert!((posterior.pseudocounts[0] - 0.5).abs() < 1e-9);
    assert!((posterior.pseudocounts[1] - 0.5).abs() < 1e-9);
}

/// S5: batch EM (eta=1) on a deterministic single-point corpus captures one
/// component with pi=1 and an emission column matching the target exactly.
/// The two starting components are seeded with distinct profiles so the
/// winner-take-all behavior is genuinely exercised: two identical starting
/// components would stay perfectly tied by symmetry on every scan.
#[test]
fn s5_deterministic_corpus_captures_single_component() {
    let matching_profile = array![[1.0, 0.0]];
    let mismatched_profile = array![[0.0, 1.0]];
    let c1 = ContextComponent::new(matching_profile, 0.5, vec![0.9, 0.1], false).unwrap();
    let c2 = ContextComponent::new(mismatched_profile, 0.5, vec![0.1, 0.9], false).unwrap();
    let library = Library::new(vec![c1, c2]).unwrap();

    let options = EmOptions::default().max_scans(1).min_scans(1).num_blocks(1);
    let mut driver = EmDriver::new(library, options).unwrap();

    let pair = TrainingPair::new(vec![0], vec![1.0, 0.0]).unwrap();
    let corpus = Corpus::new(vec![pair; 8]).unwrap();
    let mut progress = NoopProgress;
    driver.train(&corpus, &mut progress).unwrap();

    let library = driver.into_library();
    let prior_total: f64 = library.components().iter().map(|c| c.prior()).sum();
    passert_eq!((prior_total * 1e6).round() / 1e6, 1.0);

    let (winner, max_prior) = library
        .components()
        .iter()
        .enumerate()
        .map(|(i, c)| (i, c.prior()))
        .fold((0, 0.0_f64), |best, cur| if cur.1 > best.1 { cur } else { best });
    assert!(max_prior > 0.9, "one component should dominate: {max_prior}");

    let winning_column: Vec<f64> = (0..2).map(|a| 2f64.powf(library.components()[winner].profile()[[0, a]])).collect();
    passert_eq!((winning_column[0] * 1e6).round() / 1e6, 1.0);
    passert_eq!((winning_column[1] * 1e6).round() / 1e6, 0.0);
}
