//! # Haplotypes and Genotypes
//!
//! A `Haplotype` is a concrete reference-coordinated sequence: a bounding
//! region plus an ordered set of explicit alleles, with gaps filled from the
//! reference. The concrete sequence is materialized once at construction so
//! equality, hashing, and likelihood evaluation never re-walk the reference.
//!
//! `Genotype<T>` is a fixed-ploidy multiset, canonically sorted so equal
//! genotypes hash and compare equal regardless of construction order.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::data::mappable::Mappable;
use crate::data::region::GenomicRegion;
use crate::data::variant::{Allele, Variant};
use crate::error::{NautilusError, Result};

/// A concrete haplotype over a bounding region.
#[derive(Clone, Debug)]
pub struct Haplotype {
    region: GenomicRegion,
    explicit_alleles: Vec<Allele>,
    sequence: Vec<u8>,
    hash: u64,
}

impl Haplotype {
    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }

    /// The concrete bases over the whole bounding region.
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn explicit_alleles(&self) -> &[Allele] {
        &self.explicit_alleles
    }

    /// Stable digest of region and explicit alleles; identical across runs.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// True if no explicit allele differs from the reference.
    pub fn is_reference(&self) -> bool {
        self.explicit_alleles.is_empty()
    }

    /// True if an explicit allele with this exact region and sequence is
    /// carried.
    pub fn contains_exact(&self, allele: &Allele) -> bool {
        self.explicit_alleles
            .binary_search_by(|a| {
                a.region()
                    .cmp(allele.region())
                    .then_with(|| a.sequence().cmp(allele.sequence()))
            })
            .is_ok()
    }

    /// True if the haplotype expresses `allele`: either an exact explicit
    /// match, or the concrete sequence over the allele's region equals the
    /// allele's sequence.
    pub fn contains(&self, allele: &Allele) -> bool {
        if self.contains_exact(allele) {
            return true;
        }
        match self.copy_sequence(allele.region()) {
            Some(seq) => seq == allele.sequence(),
            None => false,
        }
    }

    /// True if the haplotype carries the variant's alternative allele.
    pub fn includes(&self, variant: &Variant) -> bool {
        self.contains(&variant.alt_allele())
    }

    /// Extract the concrete sequence over a sub-region. Returns `None` when
    /// the region is outside the bounding region or splits an explicit
    /// length-changing allele.
    pub fn copy_sequence(&self, region: &GenomicRegion) -> Option<Vec<u8>> {
        if !self.region.contains(region) {
            return None;
        }
        let mut out = Vec::with_capacity(region.len() as usize);
        let mut ref_cursor = self.region.begin();
        let mut seq_cursor = 0usize;

        let mut emit = |seq: &[u8], seg_begin: u32, seg_end: u32, out: &mut Vec<u8>| {
            let want_begin = region.begin().max(seg_begin);
            let want_end = region.end().min(seg_end);
            if want_begin >= want_end {
                return true;
            }
            if seq.len() == (seg_end - seg_begin) as usize {
                let a = (want_begin - seg_begin) as usize;
                let b = (want_end - seg_begin) as usize;
                out.extend_from_slice(&seq[a..b]);
                true
            } else if want_begin == seg_begin && want_end == seg_end {
                // Length-changing alleles are all-or-nothing.
                out.extend_from_slice(seq);
                true
            } else {
                false
            }
        };

        for allele in &self.explicit_alleles {
            let gap_len = (allele.region().begin() - ref_cursor) as usize;
            if gap_len > 0 {
                let gap_seq = &self.sequence[seq_cursor..seq_cursor + gap_len];
                if !emit(gap_seq, ref_cursor, allele.region().begin(), &mut out) {
                    return None;
                }
                seq_cursor += gap_len;
                ref_cursor = allele.region().begin();
            }
            let allele_len = allele.sequence().len();
            let allele_seq = &self.sequence[seq_cursor..seq_cursor + allele_len];
            if !emit(
                allele_seq,
                allele.region().begin(),
                allele.region().end(),
                &mut out,
            ) {
                return None;
            }
            seq_cursor += allele_len;
            ref_cursor = allele.region().end();
        }
        let tail_len = (self.region.end() - ref_cursor) as usize;
        if tail_len > 0 {
            let tail_seq = &self.sequence[seq_cursor..seq_cursor + tail_len];
            if !emit(tail_seq, ref_cursor, self.region.end(), &mut out) {
                return None;
            }
        }
        Some(out)
    }

    /// Variants carried by `self` that `other` does not express.
    pub fn difference(&self, other: &Haplotype) -> Vec<Variant> {
        self.explicit_alleles
            .iter()
            .filter(|allele| !other.contains(allele))
            .filter_map(|allele| {
                let ref_seq = other.copy_sequence(allele.region())?;
                if ref_seq == allele.sequence() {
                    return None;
                }
                Variant::new(allele.region().clone(), ref_seq, allele.sequence().to_vec()).ok()
            })
            .collect()
    }

    fn compute_hash(region: &GenomicRegion, alleles: &[Allele]) -> u64 {
        let mut hasher = FxHasher::default();
        region.contig().as_bytes().hash(&mut hasher);
        region.begin().hash(&mut hasher);
        region.end().hash(&mut hasher);
        for allele in alleles {
            allele.region().begin().hash(&mut hasher);
            allele.region().end().hash(&mut hasher);
            allele.sequence().hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Equality is by concrete sequence and region.
impl PartialEq for Haplotype {
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region && self.sequence == other.sequence
    }
}

impl Eq for Haplotype {}

impl PartialOrd for Haplotype {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Haplotype {
    fn cmp(&self, other: &Self) -> Ordering {
        self.region
            .cmp(&other.region)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl Hash for Haplotype {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl Mappable for Haplotype {
    fn region(&self) -> &GenomicRegion {
        &self.region
    }
}

impl fmt::Display for Haplotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} alleles]", self.region, self.explicit_alleles.len())
    }
}

/// Incremental haplotype construction against a reference window.
///
/// Alleles must be pushed in genomic order, each strictly after the last;
/// the builder fills reference gaps and materializes the concrete sequence.
pub struct HaplotypeBuilder {
    region: GenomicRegion,
    window: Vec<u8>,
    window_begin: u32,
    alleles: Vec<Allele>,
}

impl HaplotypeBuilder {
    /// `window` holds reference bases starting at `window_begin`, covering
    /// all of `region`.
    pub fn new(region: GenomicRegion, window: Vec<u8>, window_begin: u32) -> Result<Self> {
        if region.begin() < window_begin
            || (region.end() - window_begin) as usize > window.len()
        {
            return Err(NautilusError::program(format!(
                "reference window does not cover haplotype region {}",
                region
            )));
        }
        Ok(Self {
            region,
            window,
            window_begin,
            alleles: Vec::new(),
        })
    }

    /// Append an allele; it must lie within the bounding region and after
    /// any previously pushed allele. Alleles identical to the reference are
    /// dropped.
    pub fn push(&mut self, allele: Allele) -> Result<&mut Self> {
        if !self.region.contains(allele.region()) {
            return Err(NautilusError::program(format!(
                "allele {} outside haplotype region {}",
                allele, self.region
            )));
        }
        if let Some(last) = self.alleles.last() {
            if allele.region().begin() < last.region().end() {
                return Err(NautilusError::program(format!(
                    "allele {} overlaps or precedes previous allele {}",
                    allele, last
                )));
            }
        }
        let ref_slice = self.reference_slice(allele.region());
        if ref_slice != allele.sequence() {
            self.alleles.push(allele);
        }
        Ok(self)
    }

    fn reference_slice(&self, region: &GenomicRegion) -> &[u8] {
        let a = (region.begin() - self.window_begin) as usize;
        let b = (region.end() - self.window_begin) as usize;
        &self.window[a..b]
    }

    pub fn build(self) -> Haplotype {
        let mut sequence = Vec::with_capacity(self.region.len() as usize);
        let mut cursor = self.region.begin();
        for allele in &self.alleles {
            if allele.region().begin() > cursor {
                let gap = GenomicRegion::new(
                    self.region.contig_arc(),
                    cursor,
                    allele.region().begin(),
                );
                sequence.extend_from_slice(self.reference_slice(&gap));
            }
            sequence.extend_from_slice(allele.sequence());
            cursor = allele.region().end();
        }
        if cursor < self.region.end() {
            let tail = GenomicRegion::new(self.region.contig_arc(), cursor, self.region.end());
            sequence.extend_from_slice(self.reference_slice(&tail));
        }
        let hash = Haplotype::compute_hash(&self.region, &self.alleles);
        Haplotype {
            region: self.region,
            explicit_alleles: self.alleles,
            sequence,
            hash,
        }
    }
}

/// A fixed-ploidy multiset of `T`, canonically sorted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Genotype<T: Ord> {
    elements: Vec<T>,
}

impl<T: Ord + Clone> Genotype<T> {
    pub fn new(mut elements: Vec<T>) -> Self {
        elements.sort();
        Self { elements }
    }

    pub fn ploidy(&self) -> usize {
        self.elements.len()
    }

    pub fn is_homozygous(&self) -> bool {
        self.elements.windows(2).all(|w| w[0] == w[1])
    }

    pub fn get(&self, index: usize) -> &T {
        &self.elements[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.elements.iter()
    }

    pub fn elements(&self) -> &[T] {
        &self.elements
    }

    pub fn contains(&self, element: &T) -> bool {
        self.elements.binary_search(element).is_ok()
    }

    /// Count of elements equal to `element`.
    pub fn count(&self, element: &T) -> usize {
        self.elements.iter().filter(|e| *e == element).count()
    }

    /// Number of distinct elements.
    pub fn zygosity(&self) -> usize {
        let mut n = 0;
        let mut prev: Option<&T> = None;
        for e in &self.elements {
            if prev != Some(e) {
                n += 1;
            }
            prev = Some(e);
        }
        n
    }
}

/// Enumerate every multiset of size `ploidy` drawn from `pool`.
///
/// The count is C(n + p - 1, p); callers cap the pool before expanding.
pub fn all_genotypes<T: Ord + Clone>(pool: &[T], ploidy: usize) -> Vec<Genotype<T>> {
    fn recurse<T: Ord + Clone>(
        pool: &[T],
        ploidy: usize,
        start: usize,
        current: &mut Vec<usize>,
        out: &mut Vec<Genotype<T>>,
    ) {
        if current.len() == ploidy {
            out.push(Genotype::new(
                current.iter().map(|&i| pool[i].clone()).collect(),
            ));
            return;
        }
        for i in start..pool.len() {
            current.push(i);
            recurse(pool, ploidy, i, current, out);
            current.pop();
        }
    }
    let mut out = Vec::new();
    if ploidy == 0 || pool.is_empty() {
        return out;
    }
    let mut current: Vec<usize> = Vec::with_capacity(ploidy);
    recurse(pool, ploidy, 0, &mut current, &mut out);
    out
}

/// Number of multisets of size `ploidy` from a pool of `n` — the genotype
/// count used for cap checks before expansion.
pub fn genotype_count(n: usize, ploidy: usize) -> usize {
    let mut result: usize = 1;
    for i in 0..ploidy {
        result = result.saturating_mul(n + i) / (i + 1);
    }
    result
}

/// A germline genotype extended with somatic haplotypes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CancerGenotype {
    pub germline: Genotype<Arc<Haplotype>>,
    pub somatic: Vec<Arc<Haplotype>>,
}

impl CancerGenotype {
    pub fn new(germline: Genotype<Arc<Haplotype>>, mut somatic: Vec<Arc<Haplotype>>) -> Self {
        somatic.sort();
        Self { germline, somatic }
    }

    pub fn ploidy(&self) -> usize {
        self.germline.ploidy() + self.somatic.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(begin: u32, window: &str) -> HaplotypeBuilder {
        HaplotypeBuilder::new(
            GenomicRegion::new("chr1", begin, begin + window.len() as u32),
            window.as_bytes().to_vec(),
            begin,
        )
        .unwrap()
    }

    fn snv(pos: u32, base: &str) -> Allele {
        Allele::new(GenomicRegion::new("chr1", pos, pos + 1), base.as_bytes())
    }

    #[test]
    fn test_reference_haplotype_sequence() {
        let hap = builder(100, "ACGTACGT").build();
        assert_eq!(hap.sequence(), b"ACGTACGT");
        assert!(hap.is_reference());
    }

    #[test]
    fn test_haplotype_with_snvs() {
        let mut b = builder(100, "ACGTACGT");
        b.push(snv(102, "C")).unwrap();
        b.push(snv(106, "A")).unwrap();
        let hap = b.build();
        assert_eq!(hap.sequence(), b"ACCTACAT");
        assert_eq!(hap.explicit_alleles().len(), 2);
    }

    #[test]
    fn test_haplotype_with_deletion() {
        let mut b = builder(0, "ACGTACGT");
        b.push(Allele::new(GenomicRegion::new("chr1", 2, 4), b"".to_vec()))
            .unwrap();
        let hap = b.build();
        assert_eq!(hap.sequence(), b"ACACGT");
    }

    #[test]
    fn test_reference_identical_allele_dropped() {
        let mut b = builder(100, "ACGTACGT");
        b.push(snv(102, "G")).unwrap(); // reference base at 102 is G
        let hap = b.build();
        assert!(hap.is_reference());
    }

    #[test]
    fn test_out_of_order_allele_rejected() {
        let mut b = builder(100, "ACGTACGT");
        b.push(snv(106, "A")).unwrap();
        assert!(b.push(snv(102, "C")).is_err());
    }

    #[test]
    fn test_contains_and_copy_sequence() {
        let mut b = builder(100, "ACGTACGT");
        b.push(snv(102, "C")).unwrap();
        let hap = b.build();

        assert!(hap.contains(&snv(102, "C")));
        assert!(!hap.contains(&snv(102, "G")));
        // Implied reference allele
        assert!(hap.contains(&snv(104, "A")));

        let seq = hap
            .copy_sequence(&GenomicRegion::new("chr1", 101, 105))
            .unwrap();
        assert_eq!(seq, b"CCTA");
    }

    #[test]
    fn test_hash_stability_and_equality() {
        let make = || {
            let mut b = builder(100, "ACGTACGT");
            b.push(snv(102, "C")).unwrap();
            b.build()
        };
        let h1 = make();
        let h2 = make();
        assert_eq!(h1, h2);
        assert_eq!(h1.hash(), h2.hash());
    }

    #[test]
    fn test_difference() {
        let mut b1 = builder(100, "ACGTACGT");
        b1.push(snv(102, "C")).unwrap();
        let h1 = b1.build();
        let h2 = builder(100, "ACGTACGT").build();

        let diff = h1.difference(&h2);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].alt_sequence(), b"C");
        assert_eq!(diff[0].ref_sequence(), b"G");

        assert!(h2.difference(&h1).is_empty());
    }

    #[test]
    fn test_genotype_canonical_order() {
        let g1 = Genotype::new(vec![2, 1]);
        let g2 = Genotype::new(vec![1, 2]);
        assert_eq!(g1, g2);
        assert_eq!(g1.ploidy(), 2);
        assert!(!g1.is_homozygous());
        assert!(Genotype::new(vec![3, 3]).is_homozygous());
    }

    #[test]
    fn test_all_genotypes_count() {
        let pool = vec![0, 1, 2];
        let genotypes = all_genotypes(&pool, 2);
        assert_eq!(genotypes.len(), 6);
        assert_eq!(genotype_count(3, 2), 6);
        assert_eq!(genotype_count(10, 2), 55);
    }

    #[test]
    fn test_cancer_genotype_ploidy() {
        let hap = Arc::new(builder(0, "ACGT").build());
        let germline = Genotype::new(vec![Arc::clone(&hap), Arc::clone(&hap)]);
        let cg = CancerGenotype::new(germline, vec![hap]);
        assert_eq!(cg.ploidy(), 3);
    }
}
