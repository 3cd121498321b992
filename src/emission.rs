//! Emission kernel: positional-weighted log-score of a window against a
//! library component or CRF state (spec §4.1).
//!
//! Two overloads (profile subject, sequence subject) satisfy the "subject
//! kind" polymorphism the source expressed through inheritance; here it is a
//! tagged enum rather than dynamic dispatch (DESIGN.md).

use crate::{
    crf::CrfState,
    library::ContextComponent,
    profile::CountProfile,
    weights::PositionalWeights,
};

/// What the emission kernel is scored against at a given alignment offset.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Profile(&'a CountProfile),
    Sequence(&'a [usize]),
}

impl<'a> Subject<'a> {
    fn len(&self) -> usize {
        match self {
            Subject::Profile(p) => p.window(),
            Subject::Sequence(s) => s.len(),
        }
    }
}

fn overlap_range(weights: &PositionalWeights, subject_len: usize, j: i64) -> (usize, usize) {
    let c = weights.center() as i64;
    let lo = (j - c).max(0);
    let hi = (j + c).min(subject_len as i64 - 1);
    if hi < lo {
        (0, 0)
    } else {
        (lo as usize, hi as usize)
    }
}

/// Score a component against either a count/frequency profile or a discrete
/// sequence at subject index `j`. Always returns a base-2 log score (spec
/// §4.1 invariant).
pub fn score_component(component: &ContextComponent, weights: &PositionalWeights, subject: Subject, j: i64, any_index: usize) -> f64 {
    let c = weights.center() as i64;
    let (lo, hi) = overlap_range(weights, subject.len(), j);
    let empty = lo > hi;
    match subject {
        Subject::Profile(profile) => {
            if empty {
                return if component.is_log_space() { 0.0 } else { 1.0f64.log2() };
            }
            let mut total = 0.0;
            for i in lo..=hi {
                let w = weights.get((i as i64 - j + c) as usize);
                let mut column_term = 0.0;
                for a in 0..component.alphabet_size() {
                    column_term += profile.row(i)[a] * component.profile()[[i, a]];
                }
                total += w * column_term;
            }
            if component.is_log_space() {
                total
            } else {
                total.log2()
            }
        }
        Subject::Sequence(seq) => {
            if empty {
                return 0.0;
            }
            let mut total = 0.0;
            for i in lo..=hi {
                let symbol = seq[i];
                if symbol == any_index {
                    continue;
                }
                let w = weights.get((i as i64 - j + c) as usize);
                total += w * component.profile()[[i, symbol]];
            }
            total
        }
    }
}

/// Score a CRF state against a discrete sequence at subject index `j` (spec
/// §4.1: `score(k,j) = b_k + sum w * c_k[i, x[i]]`, skipping `any` symbols).
pub fn score_crf_state(state: &CrfState, weights: &PositionalWeights, seq: &[usize], j: i64, any_index: usize) -> f64 {
    let c = weights.center() as i64;
    let (lo, hi) = overlap_range(weights, seq.len(), j);
    let mut total = state.bias();
    if lo > hi {
        return total;
    }
    for i in lo..=hi {
        let symbol = seq[i];
        if symbol == any_index {
            continue;
        }
        let w = weights.get((i as i64 - j + c) as usize);
        total += w * state.context_weights()[[i, symbol]];
    }
    total
}
