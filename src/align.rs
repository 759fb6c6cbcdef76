//! # Global Pairwise Alignment
//!
//! Needleman-Wunsch with affine gap penalties. Translates assembler bubble
//! paths into reference-coordinated variants and gives the realigner exact
//! per-base alignments against inferred haplotypes.

use crate::data::read::{Cigar, CigarOp, CigarOpKind};
use crate::error::Result;

/// Scoring model. Gap cost is `gap_open` for the first base and
/// `gap_extend` for each further base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlignmentModel {
    pub match_: i32,
    pub mismatch: i32,
    pub gap_open: i32,
    pub gap_extend: i32,
}

impl Default for AlignmentModel {
    fn default() -> Self {
        Self {
            match_: 2,
            mismatch: -3,
            gap_open: -8,
            gap_extend: -1,
        }
    }
}

/// A finished global alignment of query against target.
#[derive(Clone, Debug, PartialEq)]
pub struct Alignment {
    /// CIGAR in target coordinates using `=`, `X`, `I` (query-only), and
    /// `D` (target-only) operations.
    pub cigar: Cigar,
    pub score: i32,
}

const NEG: i32 = i32::MIN / 2;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Diag,
    /// Gap in query: consumes target only (deletion)
    Del,
    /// Gap in target: consumes query only (insertion)
    Ins,
}

/// Globally align `query` against `target`.
///
/// Ties prefer gap states over the diagonal, which walks gaps as far left
/// as they will go ("left-aligned" indels).
pub fn align(target: &[u8], query: &[u8], model: AlignmentModel) -> Result<Alignment> {
    let n = target.len();
    let m = query.len();

    // Row-major (n+1) x (m+1) score matrices for the three states.
    let idx = |i: usize, j: usize| i * (m + 1) + j;
    let mut mat = vec![NEG; (n + 1) * (m + 1)];
    let mut del = vec![NEG; (n + 1) * (m + 1)];
    let mut ins = vec![NEG; (n + 1) * (m + 1)];

    mat[idx(0, 0)] = 0;
    for i in 1..=n {
        del[idx(i, 0)] = model.gap_open + (i as i32 - 1) * model.gap_extend;
    }
    for j in 1..=m {
        ins[idx(0, j)] = model.gap_open + (j as i32 - 1) * model.gap_extend;
    }

    for i in 1..=n {
        for j in 1..=m {
            let sub = if target[i - 1] == query[j - 1] {
                model.match_
            } else {
                model.mismatch
            };
            let best_prev = mat[idx(i - 1, j - 1)]
                .max(del[idx(i - 1, j - 1)])
                .max(ins[idx(i - 1, j - 1)]);
            mat[idx(i, j)] = best_prev.saturating_add(sub);

            del[idx(i, j)] = (mat[idx(i - 1, j)].saturating_add(model.gap_open))
                .max(ins[idx(i - 1, j)].saturating_add(model.gap_open))
                .max(del[idx(i - 1, j)].saturating_add(model.gap_extend));

            ins[idx(i, j)] = (mat[idx(i, j - 1)].saturating_add(model.gap_open))
                .max(del[idx(i, j - 1)].saturating_add(model.gap_open))
                .max(ins[idx(i, j - 1)].saturating_add(model.gap_extend));
        }
    }

    let final_scores = [
        (State::Del, del[idx(n, m)]),
        (State::Ins, ins[idx(n, m)]),
        (State::Diag, mat[idx(n, m)]),
    ];
    let (mut state, score) = final_scores
        .iter()
        .copied()
        .max_by_key(|&(_, s)| s)
        .expect("three candidate states");

    // Traceback, gap states first on ties.
    let mut ops_reversed: Vec<CigarOp> = Vec::new();
    let mut i = n;
    let mut j = m;
    while i > 0 || j > 0 {
        match state {
            State::Diag => {
                debug_assert!(i > 0 && j > 0);
                let kind = if target[i - 1] == query[j - 1] {
                    CigarOpKind::SequenceMatch
                } else {
                    CigarOpKind::Mismatch
                };
                ops_reversed.push(CigarOp::new(1, kind));
                let sub = if target[i - 1] == query[j - 1] {
                    model.match_
                } else {
                    model.mismatch
                };
                let want = mat[idx(i, j)] - sub;
                i -= 1;
                j -= 1;
                state = if del[idx(i, j)] == want {
                    State::Del
                } else if ins[idx(i, j)] == want {
                    State::Ins
                } else {
                    State::Diag
                };
            }
            State::Del => {
                debug_assert!(i > 0);
                ops_reversed.push(CigarOp::new(1, CigarOpKind::Deletion));
                let want_extend = del[idx(i, j)] - model.gap_extend;
                let want_open = del[idx(i, j)] - model.gap_open;
                i -= 1;
                state = if i > 0 && del[idx(i, j)] == want_extend {
                    State::Del
                } else if ins[idx(i, j)] == want_open {
                    State::Ins
                } else {
                    State::Diag
                };
                if i == 0 && j == 0 {
                    state = State::Diag;
                }
            }
            State::Ins => {
                debug_assert!(j > 0);
                ops_reversed.push(CigarOp::new(1, CigarOpKind::Insertion));
                let want_extend = ins[idx(i, j)] - model.gap_extend;
                let want_open = ins[idx(i, j)] - model.gap_open;
                j -= 1;
                state = if j > 0 && ins[idx(i, j)] == want_extend {
                    State::Ins
                } else if del[idx(i, j)] == want_open {
                    State::Del
                } else {
                    State::Diag
                };
                if i == 0 && j == 0 {
                    state = State::Diag;
                }
            }
        }
    }

    let cigar = Cigar::from_raw_ops(ops_reversed.into_iter().rev())?;
    Ok(Alignment { cigar, score })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(target: &str, query: &str) -> Alignment {
        align(target.as_bytes(), query.as_bytes(), AlignmentModel::default()).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let a = run("ACGTACGT", "ACGTACGT");
        assert_eq!(a.cigar.to_string(), "8=");
        assert_eq!(a.score, 16);
    }

    #[test]
    fn test_single_mismatch() {
        let a = run("ACGTACGT", "ACCTACGT");
        assert_eq!(a.cigar.to_string(), "2=1X5=");
        assert_eq!(a.score, 7 * 2 - 3);
    }

    #[test]
    fn test_deletion_left_aligned() {
        // Deleting one A from the homopolymer: the gap must sit at the
        // leftmost equivalent position.
        let a = run("CTAAAG", "CTAAG");
        assert_eq!(a.cigar.to_string(), "2=1D3=");
    }

    #[test]
    fn test_insertion_left_aligned() {
        let a = run("CTAAG", "CTAAAG");
        assert_eq!(a.cigar.to_string(), "2=1I3=");
    }

    #[test]
    fn test_affine_prefers_one_long_gap() {
        // One 2-base gap (-8 -1) beats two 1-base gaps (-16).
        let a = run("AACCGGTT", "AAGGTT");
        assert_eq!(a.cigar.to_string(), "2=2D4=");
    }

    #[test]
    fn test_empty_query() {
        let a = run("ACGT", "");
        assert_eq!(a.cigar.to_string(), "4D");
        assert_eq!(a.score, -8 - 3);
    }

    #[test]
    fn test_spans_consistent() {
        let a = run("ACGTAAACGT", "ACGTCGT");
        assert_eq!(a.cigar.reference_span(), 10);
        assert_eq!(a.cigar.query_span(), 7);
    }
}
