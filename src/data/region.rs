//! # Genomic Region Algebra
//!
//! Contig-qualified, zero-based, half-open intervals and their set algebra.
//! Regions are the common coordinate currency of the whole engine: reads,
//! alleles, haplotypes, and calls are all addressed by `GenomicRegion`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{NautilusError, Result};

/// A contig-qualified half-open interval `[begin, end)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GenomicRegion {
    /// Contig name, shared between the many regions on one contig
    contig: Arc<str>,
    /// Zero-based inclusive start
    begin: u32,
    /// Zero-based exclusive end
    end: u32,
}

impl GenomicRegion {
    /// Create a new region. Panics in debug builds if `begin > end`.
    pub fn new(contig: impl Into<Arc<str>>, begin: u32, end: u32) -> Self {
        debug_assert!(begin <= end, "region begin must not exceed end");
        Self {
            contig: contig.into(),
            begin,
            end,
        }
    }

    /// A zero-length region at `position`.
    pub fn point(contig: impl Into<Arc<str>>, position: u32) -> Self {
        Self::new(contig, position, position)
    }

    pub fn contig(&self) -> &str {
        &self.contig
    }

    pub fn contig_arc(&self) -> Arc<str> {
        Arc::clone(&self.contig)
    }

    pub fn begin(&self) -> u32 {
        self.begin
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of reference positions covered.
    pub fn len(&self) -> u32 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn same_contig(&self, other: &Self) -> bool {
        self.contig == other.contig
    }

    /// True if the two regions share at least one position. Empty regions
    /// overlap a region that strictly contains their position.
    pub fn overlaps(&self, other: &Self) -> bool {
        if !self.same_contig(other) {
            return false;
        }
        if self.is_empty() || other.is_empty() {
            // A point region overlaps anything covering that point.
            let (p, r) = if self.is_empty() {
                (self, other)
            } else {
                (other, self)
            };
            return r.begin <= p.begin && p.begin <= r.end;
        }
        self.begin < other.end && other.begin < self.end
    }

    /// True if `other` lies entirely within this region.
    pub fn contains(&self, other: &Self) -> bool {
        self.same_contig(other) && self.begin <= other.begin && other.end <= self.end
    }

    /// True if this region covers the single position `pos`.
    pub fn contains_position(&self, pos: u32) -> bool {
        self.begin <= pos && pos < self.end
    }

    /// The smallest region covering both inputs. Both must share a contig.
    pub fn encompassing(&self, other: &Self) -> Result<Self> {
        if !self.same_contig(other) {
            return Err(NautilusError::program(format!(
                "cannot encompass regions on different contigs: {} and {}",
                self, other
            )));
        }
        Ok(Self::new(
            Arc::clone(&self.contig),
            self.begin.min(other.begin),
            self.end.max(other.end),
        ))
    }

    /// Positions of `self` strictly before `other` begins.
    pub fn left_overhang(&self, other: &Self) -> Self {
        let end = other.begin.clamp(self.begin, self.end);
        Self::new(Arc::clone(&self.contig), self.begin, end)
    }

    /// Positions of `self` strictly after `other` ends.
    pub fn right_overhang(&self, other: &Self) -> Self {
        let begin = other.end.clamp(self.begin, self.end);
        Self::new(Arc::clone(&self.contig), begin, self.end)
    }

    /// The gap between two non-overlapping regions; empty if they touch.
    pub fn intervening(&self, other: &Self) -> Result<Self> {
        if !self.same_contig(other) {
            return Err(NautilusError::program(format!(
                "cannot compute intervening region across contigs: {} and {}",
                self, other
            )));
        }
        let (lhs, rhs) = if self.end <= other.begin {
            (self, other)
        } else {
            (other, self)
        };
        let begin = lhs.end.min(rhs.begin);
        let end = rhs.begin.max(begin);
        Ok(Self::new(Arc::clone(&self.contig), begin, end))
    }

    /// Translate by a signed offset, saturating at zero.
    pub fn shift(&self, delta: i64) -> Self {
        let begin = (self.begin as i64 + delta).max(0) as u32;
        let end = (self.end as i64 + delta).max(begin as i64) as u32;
        Self::new(Arc::clone(&self.contig), begin, end)
    }

    /// Grow the region by `pad` on both sides, saturating at zero on the left.
    pub fn expand(&self, pad: u32) -> Self {
        Self::new(
            Arc::clone(&self.contig),
            self.begin.saturating_sub(pad),
            self.end.saturating_add(pad),
        )
    }

    /// The overlap of two regions; `None` if they do not overlap.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self::new(
            Arc::clone(&self.contig),
            self.begin.max(other.begin),
            self.end.min(other.end),
        ))
    }

    /// Subtract `other`, yielding zero, one, or two remaining pieces.
    pub fn difference(&self, other: &Self) -> Vec<Self> {
        if !self.overlaps(other) {
            return vec![self.clone()];
        }
        let mut out = Vec::with_capacity(2);
        if other.begin > self.begin {
            out.push(Self::new(Arc::clone(&self.contig), self.begin, other.begin));
        }
        if other.end < self.end {
            out.push(Self::new(Arc::clone(&self.contig), other.end, self.end));
        }
        out
    }
}

impl PartialOrd for GenomicRegion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GenomicRegion {
    /// Within-contig ordering is positional; across contigs the ordering is
    /// lexicographic. Cross-contig output order is decided by `ContigIndex`.
    fn cmp(&self, other: &Self) -> Ordering {
        self.contig
            .cmp(&other.contig)
            .then(self.begin.cmp(&other.begin))
            .then(self.end.cmp(&other.end))
    }
}

impl fmt::Display for GenomicRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.contig, self.begin, self.end)
    }
}

impl FromStr for GenomicRegion {
    type Err = NautilusError;

    /// Parse `contig:begin-end` with zero-based coordinates.
    fn from_str(s: &str) -> Result<Self> {
        let (contig, range) = s
            .rsplit_once(':')
            .ok_or_else(|| NautilusError::bad_region(s, "expected 'contig:begin-end'"))?;
        let (begin, end) = range
            .split_once('-')
            .ok_or_else(|| NautilusError::bad_region(s, "expected 'begin-end' range"))?;
        let begin: u32 = begin
            .replace(',', "")
            .parse()
            .map_err(|_| NautilusError::bad_region(s, "begin is not a number"))?;
        let end: u32 = end
            .replace(',', "")
            .parse()
            .map_err(|_| NautilusError::bad_region(s, "end is not a number"))?;
        if begin > end {
            return Err(NautilusError::bad_region(s, "begin exceeds end"));
        }
        Ok(Self::new(contig, begin, end))
    }
}

/// Dense contig indexing for cross-contig ordering.
///
/// Built once from the reference contig list; regions on unknown contigs
/// sort after all known ones.
#[derive(Clone, Debug, Default)]
pub struct ContigIndex {
    names: Vec<Arc<str>>,
    index: FxHashMap<Arc<str>, u32>,
}

impl ContigIndex {
    pub fn new(names: impl IntoIterator<Item = impl Into<Arc<str>>>) -> Self {
        let names: Vec<Arc<str>> = names.into_iter().map(Into::into).collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (Arc::clone(n), i as u32))
            .collect();
        Self { names, index }
    }

    pub fn get(&self, contig: &str) -> Option<u32> {
        self.index.get(contig).copied()
    }

    pub fn names(&self) -> &[Arc<str>] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Compare two regions by `(contig index, begin, end)`.
    pub fn compare(&self, a: &GenomicRegion, b: &GenomicRegion) -> Ordering {
        let ia = self.get(a.contig()).unwrap_or(u32::MAX);
        let ib = self.get(b.contig()).unwrap_or(u32::MAX);
        ia.cmp(&ib)
            .then(a.begin().cmp(&b.begin()))
            .then(a.end().cmp(&b.end()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(begin: u32, end: u32) -> GenomicRegion {
        GenomicRegion::new("chr1", begin, end)
    }

    #[test]
    fn test_overlap_and_containment() {
        assert!(r(10, 20).overlaps(&r(15, 25)));
        assert!(!r(10, 20).overlaps(&r(20, 30)));
        assert!(!r(10, 20).overlaps(&GenomicRegion::new("chr2", 10, 20)));
        assert!(r(10, 30).contains(&r(15, 25)));
        assert!(!r(10, 30).contains(&r(15, 35)));
    }

    #[test]
    fn test_point_region_overlap() {
        let point = GenomicRegion::point("chr1", 15);
        assert!(point.overlaps(&r(10, 20)));
        assert!(r(10, 20).overlaps(&point));
        assert!(!point.overlaps(&r(20, 30)));
    }

    #[test]
    fn test_encompassing_and_intervening() {
        let joined = r(10, 20).encompassing(&r(30, 40)).unwrap();
        assert_eq!(joined, r(10, 40));

        let gap = r(10, 20).intervening(&r(30, 40)).unwrap();
        assert_eq!(gap, r(20, 30));

        // Order independent
        let gap2 = r(30, 40).intervening(&r(10, 20)).unwrap();
        assert_eq!(gap2, gap);
    }

    #[test]
    fn test_overhangs() {
        let a = r(10, 30);
        let b = r(15, 25);
        assert_eq!(a.left_overhang(&b), r(10, 15));
        assert_eq!(a.right_overhang(&b), r(25, 30));
        assert_eq!(b.left_overhang(&a), r(15, 15));
    }

    #[test]
    fn test_shift_and_expand() {
        assert_eq!(r(10, 20).shift(5), r(15, 25));
        assert_eq!(r(10, 20).shift(-15), r(0, 5));
        assert_eq!(r(10, 20).expand(5), r(5, 25));
        assert_eq!(r(3, 20).expand(5), r(0, 25));
    }

    #[test]
    fn test_difference() {
        assert_eq!(r(10, 30).difference(&r(15, 20)), vec![r(10, 15), r(20, 30)]);
        assert_eq!(r(10, 30).difference(&r(5, 15)), vec![r(15, 30)]);
        assert_eq!(r(10, 30).difference(&r(0, 40)), Vec::<GenomicRegion>::new());
        assert_eq!(r(10, 30).difference(&r(40, 50)), vec![r(10, 30)]);
    }

    #[test]
    fn test_parse_format_round_trip() {
        for s in ["chr1:100-200", "chrX:0-0", "scaffold_12:5-1000"] {
            let region: GenomicRegion = s.parse().unwrap();
            assert_eq!(region.to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("chr1".parse::<GenomicRegion>().is_err());
        assert!("chr1:20-10".parse::<GenomicRegion>().is_err());
        assert!("chr1:a-b".parse::<GenomicRegion>().is_err());
    }

    #[test]
    fn test_contig_index_ordering() {
        let index = ContigIndex::new(["chr2", "chr10", "chr1"]);
        let a = GenomicRegion::new("chr10", 5, 10);
        let b = GenomicRegion::new("chr1", 0, 1);
        // Reference order puts chr10 before chr1.
        assert_eq!(index.compare(&a, &b), Ordering::Less);
    }
}
