//! # Haplotype Likelihood Model
//!
//! Computes `ln P(read | haplotype)` with a three-state pair-HMM (match,
//! insert, delete) in log space. The read must be consumed in full; the
//! haplotype's ends are free, so reads may sit anywhere on the padded
//! evaluation window. Mapping quality optionally mixes in the probability
//! that the read belongs somewhere else entirely.

use crate::data::read::AlignedRead;
use crate::data::haplotype::Haplotype;
use crate::model::error_model::{homopolymer_lengths, SequenceErrorModel};
use crate::utils::maths::{ln_sum_exp, mapping_quality_to_prob_mismapped, MIN_LN_PROBABILITY};

/// Model configuration.
#[derive(Clone, Debug)]
pub struct HaplotypeLikelihoodModel {
    pub error_model: SequenceErrorModel,
    /// Mix mapping quality into the likelihood
    pub use_mapping_quality: bool,
    /// Reads at or above the trigger are treated as having the cap quality;
    /// aligners saturate their reported quality (BWA caps at 60)
    pub mapping_quality_cap_trigger: u8,
    pub mapping_quality_cap: u8,
    /// Score the flank bases; very-fast mode turns this off and restricts
    /// the alignment band to the expected offset
    pub use_flank_scoring: bool,
}

impl Default for HaplotypeLikelihoodModel {
    fn default() -> Self {
        Self {
            error_model: SequenceErrorModel::default(),
            use_mapping_quality: true,
            mapping_quality_cap_trigger: 60,
            mapping_quality_cap: 120,
            use_flank_scoring: true,
        }
    }
}

/// Band half-width around the mapped offset used when flank scoring is off.
const FAST_BAND: i64 = 16;

impl HaplotypeLikelihoodModel {
    /// `ln P(read | haplotype)`. Always finite: unalignable reads score
    /// the minimum representable probability.
    pub fn evaluate(&self, read: &AlignedRead, haplotype: &Haplotype) -> f64 {
        let ln_aligned = self.forward(read, haplotype);
        let ln_aligned = ln_aligned.max(MIN_LN_PROBABILITY);
        if !self.use_mapping_quality {
            return ln_aligned;
        }
        let mapping_quality = self.effective_mapping_quality(read.mapping_quality());
        let p_mismapped = mapping_quality_to_prob_mismapped(mapping_quality);
        if p_mismapped <= 0.0 {
            return ln_aligned;
        }
        // Mismapped reads are uniform noise over the alphabet.
        let ln_random = (0.25f64).ln() * read.len() as f64;
        ln_sum_exp(&[
            (1.0 - p_mismapped).ln() + ln_aligned,
            p_mismapped.ln() + ln_random,
        ])
        .max(MIN_LN_PROBABILITY)
    }

    /// The cap kicks in only when the reported quality is at or above the
    /// trigger (the aligner's own saturation point).
    fn effective_mapping_quality(&self, reported: u8) -> u8 {
        if reported >= self.mapping_quality_cap_trigger {
            self.mapping_quality_cap.max(reported)
        } else {
            reported
        }
    }

    /// Three-state forward pass. Returns negative infinity when the read
    /// cannot be placed.
    fn forward(&self, read: &AlignedRead, haplotype: &Haplotype) -> f64 {
        let query = read.sequence();
        let qualities = read.qualities();
        let target = haplotype.sequence();
        let n = query.len();
        let m = target.len();
        if n == 0 || m == 0 || n > m {
            return f64::NEG_INFINITY;
        }

        // Column band: everything with flank scoring, otherwise a window
        // around the read's mapped offset.
        let (col_lo, col_hi) = if self.use_flank_scoring {
            (0usize, m)
        } else {
            let offset = read.region().begin() as i64 - haplotype.region().begin() as i64;
            let lo = (offset - FAST_BAND).max(0) as usize;
            let hi = ((offset + n as i64 + FAST_BAND).max(0) as usize).min(m);
            if lo >= hi {
                (0usize, m)
            } else {
                (lo, hi)
            }
        };
        let width = col_hi - col_lo;

        // Per-column gap-open probabilities from homopolymer context.
        let homopolymers = homopolymer_lengths(target);
        let p_extend = self.error_model.gap_extend_probability();
        let ln_extend = p_extend.ln();
        let ln_end_extend = (1.0 - p_extend).ln();

        let neg = f64::NEG_INFINITY;
        // Uniform prior over start columns.
        let ln_start = -( width as f64).ln();

        let mut match_prev = vec![neg; width + 1];
        let mut insert_prev = vec![neg; width + 1];
        let mut match_cur = vec![neg; width + 1];
        let mut insert_cur = vec![neg; width + 1];
        let mut delete_cur = vec![neg; width + 1];
        let mut delete_prev = vec![neg; width + 1];

        // Row 0: positioned before any column, no read consumed.
        for slot in match_prev.iter_mut() {
            *slot = ln_start;
        }

        for i in 1..=n {
            let base = query[i - 1];
            let error = self.error_model.snv_error_probability(qualities[i - 1]);
            for slot in match_cur.iter_mut() {
                *slot = neg;
            }
            for slot in insert_cur.iter_mut() {
                *slot = neg;
            }
            for slot in delete_cur.iter_mut() {
                *slot = neg;
            }
            for j in 1..=width {
                let col = col_lo + j - 1;
                let p_open = self.error_model.gap_open_probability(homopolymers[col] as usize);
                let ln_open = p_open.ln();
                let ln_continue = (1.0 - 2.0 * p_open).max(f64::MIN_POSITIVE).ln();

                let emit = if base == target[col] || base == b'N' {
                    (1.0 - error).ln()
                } else {
                    (error / 3.0).ln()
                };
                match_cur[j] = emit
                    + ln_sum_exp(&[
                        match_prev[j - 1] + ln_continue,
                        insert_prev[j - 1] + ln_end_extend,
                        delete_prev[j - 1] + ln_end_extend,
                    ]);

                insert_cur[j] = ln_sum_exp(&[
                    match_prev[j] + ln_open,
                    insert_prev[j] + ln_extend,
                ]);

                delete_cur[j] = ln_sum_exp(&[
                    match_cur[j - 1] + ln_open,
                    delete_cur[j - 1] + ln_extend,
                ]);
            }
            std::mem::swap(&mut match_prev, &mut match_cur);
            std::mem::swap(&mut insert_prev, &mut insert_cur);
            std::mem::swap(&mut delete_prev, &mut delete_cur);
        }

        // Free end: the read may finish at any column.
        let mut finals = Vec::with_capacity(2 * width);
        finals.extend(match_prev[1..].iter().copied());
        finals.extend(insert_prev[1..].iter().copied());
        ln_sum_exp(&finals)
    }
}

/// The likelihood matrix for one window: `matrix[h][r]` is the
/// log-likelihood of read `r` under haplotype `h`.
#[derive(Clone, Debug, Default)]
pub struct LikelihoodMatrix {
    pub values: Vec<Vec<f64>>,
}

impl LikelihoodMatrix {
    /// Evaluate all reads against all haplotypes.
    pub fn compute(
        model: &HaplotypeLikelihoodModel,
        haplotypes: &[std::sync::Arc<Haplotype>],
        reads: &[AlignedRead],
    ) -> Self {
        let values = haplotypes
            .iter()
            .map(|haplotype| {
                reads
                    .iter()
                    .map(|read| model.evaluate(read, haplotype))
                    .collect()
            })
            .collect();
        Self { values }
    }

    pub fn n_haplotypes(&self) -> usize {
        self.values.len()
    }

    pub fn n_reads(&self) -> usize {
        self.values.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn get(&self, haplotype: usize, read: usize) -> f64 {
        self.values[haplotype][read]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::haplotype::HaplotypeBuilder;
    use crate::data::read::{Cigar, ReadFlags};
    use crate::data::region::GenomicRegion;
    use crate::data::variant::Allele;

    const WINDOW: &str = "ACGGTTACGATCGATTGCAGGCTACTGAAGTC";

    fn haplotype(alt_at: Option<(u32, u8)>) -> Haplotype {
        let region = GenomicRegion::new("chr1", 0, WINDOW.len() as u32);
        let mut builder =
            HaplotypeBuilder::new(region, WINDOW.as_bytes().to_vec(), 0).unwrap();
        if let Some((pos, base)) = alt_at {
            builder
                .push(Allele::new(
                    GenomicRegion::new("chr1", pos, pos + 1),
                    vec![base],
                ))
                .unwrap();
        }
        builder.build()
    }

    fn read(begin: u32, seq: &str, mapping_quality: u8) -> AlignedRead {
        let cigar: Cigar = format!("{}M", seq.len()).parse().unwrap();
        AlignedRead::new(
            "r",
            GenomicRegion::new("chr1", begin, begin + seq.len() as u32),
            seq.as_bytes().to_vec(),
            vec![35; seq.len()],
            cigar,
            mapping_quality,
            ReadFlags::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_matching_read_beats_mismatching() {
        let model = HaplotypeLikelihoodModel {
            use_mapping_quality: false,
            ..HaplotypeLikelihoodModel::default()
        };
        let reference = haplotype(None);
        let alt = haplotype(Some((10, b'G')));

        let ref_read = read(5, &WINDOW[5..25], 60);
        let ln_ref = model.evaluate(&ref_read, &reference);
        let ln_alt = model.evaluate(&ref_read, &alt);
        assert!(ln_ref > ln_alt);
        // One mismatch costs roughly the base error probability.
        assert!((ln_ref - ln_alt) > 2.0);
    }

    #[test]
    fn test_supporting_read_prefers_alt_haplotype() {
        let model = HaplotypeLikelihoodModel {
            use_mapping_quality: false,
            ..HaplotypeLikelihoodModel::default()
        };
        let reference = haplotype(None);
        let alt = haplotype(Some((10, b'G')));

        let mut seq = WINDOW[5..25].as_bytes().to_vec();
        seq[5] = b'G'; // window position 10
        let alt_read = read(5, std::str::from_utf8(&seq).unwrap(), 60);
        assert!(model.evaluate(&alt_read, &alt) > model.evaluate(&alt_read, &reference));
    }

    #[test]
    fn test_values_finite_and_negative() {
        let model = HaplotypeLikelihoodModel::default();
        let hap = haplotype(None);
        let r = read(0, &WINDOW[0..20], 60);
        let ln = model.evaluate(&r, &hap);
        assert!(ln.is_finite());
        assert!(ln < 0.0);
    }

    #[test]
    fn test_unalignable_read_gets_floor() {
        let model = HaplotypeLikelihoodModel::default();
        let hap = haplotype(None);
        // Read longer than the haplotype cannot be placed.
        let long_seq = "A".repeat(WINDOW.len() + 10);
        let r = read(0, &long_seq, 60);
        assert_eq!(model.evaluate(&r, &hap), MIN_LN_PROBABILITY);
    }

    #[test]
    fn test_mapping_quality_mixing_softens_mismatches() {
        let with_mq = HaplotypeLikelihoodModel::default();
        let without_mq = HaplotypeLikelihoodModel {
            use_mapping_quality: false,
            ..HaplotypeLikelihoodModel::default()
        };
        let hap = haplotype(None);
        // A read full of mismatches: the mismapping branch dominates for a
        // low-quality alignment.
        let noisy = read(0, &"T".repeat(20), 10);
        let mixed = with_mq.evaluate(&noisy, &hap);
        let pure = without_mq.evaluate(&noisy, &hap);
        assert!(mixed >= pure);
    }

    #[test]
    fn test_fast_band_close_to_full_model_on_clean_reads() {
        let full = HaplotypeLikelihoodModel {
            use_mapping_quality: false,
            ..HaplotypeLikelihoodModel::default()
        };
        let banded = HaplotypeLikelihoodModel {
            use_mapping_quality: false,
            use_flank_scoring: false,
            ..HaplotypeLikelihoodModel::default()
        };
        let hap = haplotype(None);
        let r = read(5, &WINDOW[5..25], 60);
        let a = full.evaluate(&r, &hap);
        let b = banded.evaluate(&r, &hap);
        // The banded model sees fewer start positions; scores stay within
        // a small constant of each other for well-placed reads.
        assert!((a - b).abs() < 1.5);
    }

    #[test]
    fn test_likelihood_matrix_shape() {
        let model = HaplotypeLikelihoodModel::default();
        let haplotypes = vec![
            std::sync::Arc::new(haplotype(None)),
            std::sync::Arc::new(haplotype(Some((10, b'G')))),
        ];
        let reads = vec![read(0, &WINDOW[0..20], 60), read(5, &WINDOW[5..30], 60)];
        let matrix = LikelihoodMatrix::compute(&model, &haplotypes, &reads);
        assert_eq!(matrix.n_haplotypes(), 2);
        assert_eq!(matrix.n_reads(), 2);
        assert!(matrix.get(0, 0).is_finite());
    }
}
