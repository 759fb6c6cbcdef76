//! # Region-Indexed Containers
//!
//! Ordered collections keyed by genomic region with overlap and containment
//! range queries. Backed by a sorted `Vec`; queries binary-search the begin
//! coordinate and walk a bounded neighbourhood, which is fast for the
//! short-span records (reads, alleles) the engine stores.

use crate::data::region::GenomicRegion;

/// Anything that occupies a genomic region.
pub trait Mappable {
    fn region(&self) -> &GenomicRegion;
}

impl Mappable for GenomicRegion {
    fn region(&self) -> &GenomicRegion {
        self
    }
}

/// An ordered multimap from region to values.
///
/// Entries are kept sorted by `(contig, begin, end)`. `max_span` tracks the
/// longest entry per contig so overlap queries know how far left to scan.
#[derive(Clone, Debug)]
pub struct RegionMap<T: Mappable> {
    entries: Vec<T>,
    sorted: bool,
    max_span: u32,
}

impl<T: Mappable> Default for RegionMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Mappable> RegionMap<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            sorted: true,
            max_span: 0,
        }
    }

    pub fn from_vec(mut entries: Vec<T>) -> Self {
        entries.sort_by(|a, b| a.region().cmp(b.region()));
        let max_span = entries.iter().map(|e| e.region().len()).max().unwrap_or(0);
        Self {
            entries,
            sorted: true,
            max_span,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry; ordering is restored lazily on the next query.
    pub fn insert(&mut self, value: T) {
        self.max_span = self.max_span.max(value.region().len());
        if let Some(last) = self.entries.last() {
            if last.region() > value.region() {
                self.sorted = false;
            }
        }
        self.entries.push(value);
    }

    fn ensure_sorted(&mut self) {
        if !self.sorted {
            self.entries.sort_by(|a, b| a.region().cmp(b.region()));
            self.sorted = true;
        }
    }

    /// All entries in genomic order.
    pub fn iter(&mut self) -> impl Iterator<Item = &T> {
        self.ensure_sorted();
        self.entries.iter()
    }

    /// Consume into a genomically-sorted vector.
    pub fn into_sorted_vec(mut self) -> Vec<T> {
        self.ensure_sorted();
        self.entries
    }

    /// Entries whose region overlaps `query`.
    pub fn overlapping(&mut self, query: &GenomicRegion) -> Vec<&T> {
        self.ensure_sorted();
        let from = self.scan_start(query);
        self.entries[from..]
            .iter()
            .take_while(|e| {
                e.region().contig() != query.contig() || e.region().begin() < query.end()
            })
            .filter(|e| e.region().overlaps(query))
            .collect()
    }

    /// Entries whose region is fully contained in `query`.
    pub fn contained_in(&mut self, query: &GenomicRegion) -> Vec<&T> {
        self.ensure_sorted();
        let from = self.scan_start(query);
        self.entries[from..]
            .iter()
            .take_while(|e| {
                e.region().contig() != query.contig() || e.region().begin() < query.end()
            })
            .filter(|e| query.contains(e.region()))
            .collect()
    }

    /// Count of entries overlapping `query` without materializing them.
    pub fn count_overlapping(&mut self, query: &GenomicRegion) -> usize {
        self.overlapping(query).len()
    }

    /// Remove all entries overlapping `query`, returning them in order.
    pub fn extract_overlapping(&mut self, query: &GenomicRegion) -> Vec<T> {
        self.ensure_sorted();
        let mut kept = Vec::with_capacity(self.entries.len());
        let mut taken = Vec::new();
        for entry in self.entries.drain(..) {
            if entry.region().overlaps(query) {
                taken.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        taken
    }

    /// Drop every entry that ends before `position` on `contig`. Used to
    /// advance window buffers.
    pub fn trim_before(&mut self, contig: &str, position: u32) {
        self.ensure_sorted();
        self.entries
            .retain(|e| e.region().contig() != contig || e.region().end() > position);
    }

    /// Index of the first entry that could overlap `query`, accounting for
    /// the longest span seen on insert.
    fn scan_start(&self, query: &GenomicRegion) -> usize {
        let probe_begin = query.begin().saturating_sub(self.max_span);
        self.entries
            .partition_point(|e| {
                let r = e.region();
                (r.contig(), r.begin()) < (query.contig(), probe_begin)
            })
            .min(self.entries.len())
    }
}

impl<T: Mappable> FromIterator<T> for RegionMap<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(begin: u32, end: u32) -> GenomicRegion {
        GenomicRegion::new("chr1", begin, end)
    }

    #[test]
    fn test_overlap_query() {
        let mut map: RegionMap<GenomicRegion> =
            RegionMap::from_vec(vec![r(0, 10), r(5, 15), r(20, 30), r(25, 26)]);

        let hits = map.overlapping(&r(8, 22));
        assert_eq!(hits.len(), 3);
        assert_eq!(*hits[0], r(0, 10));
        assert_eq!(*hits[2], r(20, 30));
    }

    #[test]
    fn test_contained_query() {
        let mut map: RegionMap<GenomicRegion> =
            RegionMap::from_vec(vec![r(0, 10), r(5, 15), r(6, 9)]);
        let hits = map.contained_in(&r(4, 16));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_lazy_sorting_on_insert() {
        let mut map = RegionMap::new();
        map.insert(r(20, 30));
        map.insert(r(0, 10));
        map.insert(r(10, 20));
        let all: Vec<_> = map.iter().cloned().collect();
        assert_eq!(all, vec![r(0, 10), r(10, 20), r(20, 30)]);
    }

    #[test]
    fn test_long_span_entry_found() {
        // A long read spanning the whole query neighbourhood must still be
        // found despite starting far left of the query begin.
        let mut map: RegionMap<GenomicRegion> =
            RegionMap::from_vec(vec![r(0, 1000), r(500, 510)]);
        let hits = map.overlapping(&r(505, 506));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_trim_before() {
        let mut map: RegionMap<GenomicRegion> =
            RegionMap::from_vec(vec![r(0, 10), r(5, 15), r(20, 30)]);
        map.trim_before("chr1", 12);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_extract_overlapping() {
        let mut map: RegionMap<GenomicRegion> =
            RegionMap::from_vec(vec![r(0, 10), r(5, 15), r(20, 30)]);
        let taken = map.extract_overlapping(&r(0, 12));
        assert_eq!(taken.len(), 2);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_cross_contig_isolation() {
        let mut map: RegionMap<GenomicRegion> = RegionMap::from_vec(vec![
            GenomicRegion::new("chr1", 0, 10),
            GenomicRegion::new("chr2", 0, 10),
        ]);
        let hits = map.overlapping(&GenomicRegion::new("chr2", 5, 6));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].contig(), "chr2");
    }
}
