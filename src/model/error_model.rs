//! # Sequence Error Model
//!
//! SNV and indel error penalties for the haplotype likelihood model. Indel
//! penalties are context dependent: gap opening gets cheaper as the local
//! homopolymer run grows, which is where polymerase slippage concentrates.
//! Models are selected by preset name or parsed from an `open:extend`
//! penalty specification.

use crate::error::{NautilusError, Result};
use crate::utils::maths::phred_to_probability;

/// Phred-scaled penalties for one library preparation.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceErrorModel {
    /// Gap-open penalty by homopolymer run length (index 0 = no run);
    /// lengths beyond the table use the last entry.
    gap_open_by_homopolymer: Vec<u8>,
    /// Gap extension penalty
    gap_extend: u8,
    /// Floor on the base mismatch error probability
    min_snv_error_phred: u8,
}

impl SequenceErrorModel {
    /// The default Illumina-like PCR-free preset.
    pub fn pcr_free() -> Self {
        Self {
            gap_open_by_homopolymer: vec![
                45, 45, 43, 41, 38, 35, 31, 27, 23, 20, 17, 15, 13, 12, 11, 10, 9, 8, 7, 6,
            ],
            gap_extend: 3,
            min_snv_error_phred: 2,
        }
    }

    /// PCR libraries slip more in homopolymers.
    pub fn pcr() -> Self {
        Self {
            gap_open_by_homopolymer: vec![
                42, 42, 39, 36, 32, 28, 24, 20, 17, 14, 12, 10, 9, 8, 7, 6, 6, 5, 5, 4,
            ],
            gap_extend: 2,
            min_snv_error_phred: 2,
        }
    }

    /// Select a preset by name, parse `open:extend` Phred penalties, or
    /// load the spec from a file holding either form.
    pub fn from_spec(spec: &str) -> Result<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "pcr-free" | "pcrf" | "default" => return Ok(Self::pcr_free()),
            "pcr" => return Ok(Self::pcr()),
            _ => {}
        }
        let path = std::path::Path::new(spec);
        if path.is_file() {
            let text = std::fs::read_to_string(path)?;
            let line = text.lines().next().unwrap_or("").trim();
            return Self::from_spec(line);
        }
        if let Some((open, extend)) = spec.split_once(':') {
            let open: u8 = open.trim().parse().map_err(|_| {
                NautilusError::config(format!("bad gap-open penalty in '{}'", spec))
            })?;
            let extend: u8 = extend.trim().parse().map_err(|_| {
                NautilusError::config(format!("bad gap-extend penalty in '{}'", spec))
            })?;
            return Ok(Self {
                gap_open_by_homopolymer: vec![open],
                gap_extend: extend,
                min_snv_error_phred: 2,
            });
        }
        Err(NautilusError::config(format!(
            "unknown sequence error model '{}'; use a preset name or 'open:extend'",
            spec
        )))
    }

    /// Gap-open probability in a context with the given homopolymer length.
    pub fn gap_open_probability(&self, homopolymer_length: usize) -> f64 {
        let index = homopolymer_length.min(self.gap_open_by_homopolymer.len() - 1);
        phred_to_probability(self.gap_open_by_homopolymer[index] as f64)
    }

    /// Gap extension probability.
    pub fn gap_extend_probability(&self) -> f64 {
        phred_to_probability(self.gap_extend as f64)
    }

    /// Base error probability from a base quality, floored by the model.
    pub fn snv_error_probability(&self, base_quality: u8) -> f64 {
        let quality = base_quality.max(self.min_snv_error_phred);
        phred_to_probability(quality as f64)
    }
}

impl Default for SequenceErrorModel {
    fn default() -> Self {
        Self::pcr_free()
    }
}

/// The homopolymer run length touching each position of `sequence`.
pub fn homopolymer_lengths(sequence: &[u8]) -> Vec<u8> {
    let n = sequence.len();
    let mut out = vec![0u8; n];
    let mut run_start = 0usize;
    for i in 0..n {
        if i > 0 && sequence[i] != sequence[i - 1] {
            run_start = i;
        }
        let run_len = (i - run_start + 1).min(u8::MAX as usize) as u8;
        out[i] = run_len;
        // Back-fill the whole run with its final length.
        if i + 1 == n || sequence[i + 1] != sequence[i] {
            for slot in out.iter_mut().take(i + 1).skip(run_start) {
                *slot = run_len;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_selection() {
        assert_eq!(
            SequenceErrorModel::from_spec("PCR-FREE").unwrap(),
            SequenceErrorModel::pcr_free()
        );
        assert_eq!(
            SequenceErrorModel::from_spec("pcr").unwrap(),
            SequenceErrorModel::pcr()
        );
        assert!(SequenceErrorModel::from_spec("nanopore").is_err());
    }

    #[test]
    fn test_penalty_spec_parsing() {
        let model = SequenceErrorModel::from_spec("30:4").unwrap();
        assert!(
            (model.gap_open_probability(0) - phred_to_probability(30.0)).abs() < 1e-12
        );
        assert!(
            (model.gap_extend_probability() - phred_to_probability(4.0)).abs() < 1e-12
        );
    }

    #[test]
    fn test_homopolymer_context_lowers_penalty() {
        let model = SequenceErrorModel::default();
        assert!(model.gap_open_probability(10) > model.gap_open_probability(1));
        // Beyond the table: last entry.
        assert_eq!(
            model.gap_open_probability(100),
            model.gap_open_probability(19)
        );
    }

    #[test]
    fn test_homopolymer_lengths() {
        assert_eq!(homopolymer_lengths(b"ACGT"), vec![1, 1, 1, 1]);
        assert_eq!(homopolymer_lengths(b"AAAC"), vec![3, 3, 3, 1]);
        assert_eq!(homopolymer_lengths(b"CAAAAG"), vec![1, 4, 4, 4, 4, 1]);
        assert!(homopolymer_lengths(b"").is_empty());
    }

    #[test]
    fn test_snv_error_floor() {
        let model = SequenceErrorModel::default();
        assert_eq!(
            model.snv_error_probability(0),
            phred_to_probability(2.0)
        );
        assert!(model.snv_error_probability(30) < model.snv_error_probability(10));
    }
}
