//! # Alleles and Variants
//!
//! An `Allele` is a concrete sequence occupying a genomic region; a
//! `Variant` pairs a reference allele with an alternative over the same
//! region. Normalization left-aligns indels and trims shared context so
//! candidates from different sources compare equal when they describe the
//! same event.

use std::fmt;

use crate::data::mappable::Mappable;
use crate::data::region::GenomicRegion;
use crate::error::{NautilusError, Result};

/// A concrete sequence at a genomic region. The sequence length may differ
/// from the region length (indels).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Allele {
    region: GenomicRegion,
    sequence: Vec<u8>,
}

impl Allele {
    pub fn new(region: GenomicRegion, sequence: impl Into<Vec<u8>>) -> Self {
        Self {
            region,
            sequence: sequence.into(),
        }
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    /// True if this allele substitutes the region with an equal-length
    /// sequence (no size change).
    pub fn preserves_length(&self) -> bool {
        self.sequence.len() == self.region.len() as usize
    }
}

impl Mappable for Allele {
    fn region(&self) -> &GenomicRegion {
        &self.region
    }
}

impl Allele {
    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}",
            self.region,
            String::from_utf8_lossy(&self.sequence)
        )
    }
}

/// A reference/alternative allele pair over one region.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variant {
    region: GenomicRegion,
    ref_sequence: Vec<u8>,
    alt_sequence: Vec<u8>,
}

impl Variant {
    pub fn new(
        region: GenomicRegion,
        ref_sequence: impl Into<Vec<u8>>,
        alt_sequence: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        let ref_sequence = ref_sequence.into();
        let alt_sequence = alt_sequence.into();
        if ref_sequence.len() != region.len() as usize {
            return Err(NautilusError::program(format!(
                "variant reference sequence length {} does not match region {}",
                ref_sequence.len(),
                region
            )));
        }
        if ref_sequence == alt_sequence {
            return Err(NautilusError::program(format!(
                "variant at {} has identical reference and alternative sequences",
                region
            )));
        }
        Ok(Self {
            region,
            ref_sequence,
            alt_sequence,
        })
    }

    pub fn ref_sequence(&self) -> &[u8] {
        &self.ref_sequence
    }

    pub fn alt_sequence(&self) -> &[u8] {
        &self.alt_sequence
    }

    pub fn ref_allele(&self) -> Allele {
        Allele::new(self.region.clone(), self.ref_sequence.clone())
    }

    pub fn alt_allele(&self) -> Allele {
        Allele::new(self.region.clone(), self.alt_sequence.clone())
    }

    pub fn is_snv(&self) -> bool {
        self.ref_sequence.len() == 1 && self.alt_sequence.len() == 1
    }

    pub fn is_mnv(&self) -> bool {
        self.ref_sequence.len() == self.alt_sequence.len() && self.ref_sequence.len() > 1
    }

    pub fn is_insertion(&self) -> bool {
        self.alt_sequence.len() > self.ref_sequence.len()
    }

    pub fn is_deletion(&self) -> bool {
        self.alt_sequence.len() < self.ref_sequence.len()
    }

    pub fn is_indel(&self) -> bool {
        self.is_insertion() || self.is_deletion()
    }

    /// The larger of the two allele lengths; candidates above the configured
    /// maximum variant size are discarded on this measure.
    pub fn size(&self) -> usize {
        self.ref_sequence.len().max(self.alt_sequence.len())
    }

    /// Left-align and trim against a reference window.
    ///
    /// `window` holds reference bases starting at `window_begin` on the
    /// variant's contig and must cover the variant region. The result is
    /// left-anchored with no shared prefix or suffix beyond the single
    /// anchor base indels require. Idempotent.
    pub fn normalize(&self, window: &[u8], window_begin: u32) -> Result<Self> {
        let contig = self.region.contig_arc();
        if self.region.begin() < window_begin
            || (self.region.end() - window_begin) as usize > window.len()
        {
            return Err(NautilusError::program(format!(
                "normalization window does not cover variant at {}",
                self.region
            )));
        }

        let mut pos = self.region.begin();
        let mut ref_seq = self.ref_sequence.clone();
        let mut alt_seq = self.alt_sequence.clone();

        // Trim shared suffix, extending left through the reference when one
        // allele empties out.
        loop {
            if !ref_seq.is_empty()
                && !alt_seq.is_empty()
                && ref_seq.last() == alt_seq.last()
            {
                ref_seq.pop();
                alt_seq.pop();
            } else if ref_seq.is_empty() || alt_seq.is_empty() {
                if pos == window_begin {
                    break;
                }
                pos -= 1;
                let prev = window[(pos - window_begin) as usize];
                ref_seq.insert(0, prev);
                alt_seq.insert(0, prev);
            } else {
                break;
            }
        }

        // Trim shared prefix down to the indel anchor base.
        while ref_seq.len() > 1 && alt_seq.len() > 1 && ref_seq[0] == alt_seq[0] {
            ref_seq.remove(0);
            alt_seq.remove(0);
            pos += 1;
        }

        let region = GenomicRegion::new(contig, pos, pos + ref_seq.len() as u32);
        Variant::new(region, ref_seq, alt_seq)
    }
}

impl Mappable for Variant {
    fn region(&self) -> &GenomicRegion {
        &self.region
    }
}

impl Variant {
    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}>{}",
            self.region,
            String::from_utf8_lossy(&self.ref_sequence),
            String::from_utf8_lossy(&self.alt_sequence)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(begin: u32, ref_seq: &str, alt_seq: &str) -> Variant {
        Variant::new(
            GenomicRegion::new("chr1", begin, begin + ref_seq.len() as u32),
            ref_seq.as_bytes().to_vec(),
            alt_seq.as_bytes().to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn test_variant_kind_predicates() {
        assert!(var(10, "A", "G").is_snv());
        assert!(var(10, "AC", "GT").is_mnv());
        assert!(var(10, "A", "ACC").is_insertion());
        assert!(var(10, "ACC", "A").is_deletion());
        assert!(!var(10, "A", "G").is_indel());
    }

    #[test]
    fn test_rejects_identical_alleles() {
        let result = Variant::new(
            GenomicRegion::new("chr1", 10, 11),
            b"A".to_vec(),
            b"A".to_vec(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_normalize_trims_shared_context() {
        //       0123456789
        // ref = ACGTACGTAC
        let window = b"ACGTACGTAC";
        // "TAC" -> "TGC" at [3,6): really a SNV A>G at 4
        let v = var(3, "TAC", "TGC").normalize(window, 0).unwrap();
        assert_eq!(v.region(), &GenomicRegion::new("chr1", 4, 5));
        assert_eq!(v.ref_sequence(), b"A");
        assert_eq!(v.alt_sequence(), b"G");
    }

    #[test]
    fn test_normalize_left_aligns_deletion() {
        // Reference with a homopolymer run: pos 2..6 are all A.
        //       0123456
        // ref = CTAAAAG
        let window = b"CTAAAAG";
        // Deleting one A at position 5 is the same event as deleting at 2.
        let v = var(4, "AA", "A").normalize(window, 0).unwrap();
        assert_eq!(v.region().begin(), 1);
        assert_eq!(v.ref_sequence(), b"TA");
        assert_eq!(v.alt_sequence(), b"T");
    }

    #[test]
    fn test_normalize_idempotent() {
        let window = b"CTAAAAG";
        let once = var(4, "AA", "A").normalize(window, 0).unwrap();
        let twice = once.normalize(window, 0).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_insertion_keeps_anchor() {
        //       01234
        // ref = CTGAC
        let window = b"CTGAC";
        let v = var(2, "G", "GTT").normalize(window, 0).unwrap();
        assert!(v.is_insertion());
        assert_eq!(v.region().len(), 1);
        assert_eq!(v.ref_sequence().len(), 1);
    }

    #[test]
    fn test_size_measure() {
        assert_eq!(var(10, "A", "G").size(), 1);
        assert_eq!(var(10, "A", "ACCT").size(), 4);
        assert_eq!(var(10, "ACCT", "A").size(), 4);
    }
}
