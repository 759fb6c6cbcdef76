//! # Repeat Scanner
//!
//! Detects tandem repeats in the reference over the active region and emits
//! one-unit expansion and contraction candidates. Polymerase slippage makes
//! these events common even when read support is thin, so the scanner
//! proposes them directly from the reference.

use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::Result;

#[derive(Clone, Copy, Debug)]
pub struct RepeatScanner {
    /// Largest repeat unit considered
    pub max_unit_size: usize,
    /// Minimum copies of the unit before candidates are emitted
    pub min_units: usize,
    /// Minimum total run length in bases
    pub min_run_length: usize,
    /// Candidates above this size are discarded
    pub max_variant_size: usize,
}

impl Default for RepeatScanner {
    fn default() -> Self {
        Self {
            max_unit_size: 6,
            min_units: 4,
            min_run_length: 8,
            max_variant_size: 2000,
        }
    }
}

/// A detected tandem run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TandemRepeat {
    pub region: GenomicRegion,
    pub unit: Vec<u8>,
    pub copies: usize,
}

impl RepeatScanner {
    /// Find tandem runs in `window` (reference bases for `region`).
    pub fn find_repeats(&self, region: &GenomicRegion, window: &[u8]) -> Vec<TandemRepeat> {
        let mut out: Vec<TandemRepeat> = Vec::new();
        for unit_size in 1..=self.max_unit_size.min(window.len()) {
            let mut start = 0usize;
            while start + unit_size <= window.len() {
                let unit = &window[start..start + unit_size];
                if unit.contains(&b'N') {
                    start += 1;
                    continue;
                }
                let mut end = start + unit_size;
                while end + unit_size <= window.len()
                    && &window[end..end + unit_size] == unit
                {
                    end += unit_size;
                }
                let copies = (end - start) / unit_size;
                if copies >= self.min_units && end - start >= self.min_run_length {
                    // Skip runs of a repeated smaller unit (an AA run is a
                    // homopolymer, not a dinucleotide repeat).
                    if !has_smaller_period(unit) {
                        out.push(TandemRepeat {
                            region: GenomicRegion::new(
                                region.contig_arc(),
                                region.begin() + start as u32,
                                region.begin() + end as u32,
                            ),
                            unit: unit.to_vec(),
                            copies,
                        });
                    }
                    start = end;
                } else {
                    start += 1;
                }
            }
        }
        out.sort_by(|a, b| a.region.cmp(&b.region));
        out
    }

    /// Candidate one-unit expansions and contractions for each run.
    pub fn candidates(&self, region: &GenomicRegion, window: &[u8]) -> Result<Vec<Variant>> {
        let mut out = Vec::new();
        for repeat in self.find_repeats(region, window) {
            let unit_len = repeat.unit.len();
            if unit_len > self.max_variant_size {
                continue;
            }
            let begin = repeat.region.begin();
            // Contraction: drop the first unit copy.
            let deletion_region =
                GenomicRegion::new(region.contig_arc(), begin, begin + unit_len as u32);
            out.push(Variant::new(
                deletion_region,
                repeat.unit.clone(),
                Vec::new(),
            )?);
            // Expansion: add one unit copy before the run.
            let insertion_region = GenomicRegion::point(region.contig_arc(), begin);
            out.push(Variant::new(
                insertion_region,
                Vec::new(),
                repeat.unit.clone(),
            )?);
        }
        Ok(out)
    }
}

/// True when `unit` is itself a tandem repeat of a shorter unit.
fn has_smaller_period(unit: &[u8]) -> bool {
    for period in 1..unit.len() {
        if unit.len() % period == 0 && unit.chunks(period).all(|c| c == &unit[..period]) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(len: usize) -> GenomicRegion {
        GenomicRegion::new("chr1", 1000, 1000 + len as u32)
    }

    #[test]
    fn test_homopolymer_run() {
        let window = b"ACGTAAAAAAAAACGT";
        let scanner = RepeatScanner::default();
        let repeats = scanner.find_repeats(&region(window.len()), window);
        assert_eq!(repeats.len(), 1);
        assert_eq!(repeats[0].unit, b"A");
        assert_eq!(repeats[0].copies, 9);
        assert_eq!(repeats[0].region.begin(), 1004);
    }

    #[test]
    fn test_dinucleotide_run() {
        let window = b"GGATATATATATGG";
        let scanner = RepeatScanner::default();
        let repeats = scanner.find_repeats(&region(window.len()), window);
        assert_eq!(repeats.len(), 1);
        assert_eq!(repeats[0].unit, b"AT");
        assert_eq!(repeats[0].copies, 5);
    }

    #[test]
    fn test_no_short_runs() {
        let window = b"ACGTAAACGT"; // only 3 A's
        let scanner = RepeatScanner::default();
        assert!(scanner.find_repeats(&region(window.len()), window).is_empty());
    }

    #[test]
    fn test_candidates_expansion_contraction() {
        let window = b"ACGTAAAAAAAAACGT";
        let scanner = RepeatScanner::default();
        let candidates = scanner.candidates(&region(window.len()), window).unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().any(|v| v.is_deletion()));
        assert!(candidates.iter().any(|v| v.is_insertion()));
        for candidate in &candidates {
            assert_eq!(candidate.region().begin(), 1004);
        }
    }

    #[test]
    fn test_smaller_period_suppressed() {
        // An 8-base A run must not also be reported as AA, AAA, or AAAA.
        let window = b"CCAAAAAAAACC";
        let scanner = RepeatScanner::default();
        let repeats = scanner.find_repeats(&region(window.len()), window);
        assert_eq!(repeats.len(), 1);
        assert_eq!(repeats[0].unit, b"A");
    }
}
