//! # Read Filters
//!
//! A closed family of per-read predicates applied in order. Filters are a
//! tagged enum rather than trait objects; the set is fixed and the check
//! sits on a hot path.

use crate::data::read::AlignedRead;

/// One read-admission predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadFilter {
    MinMappingQuality(u8),
    /// At least `min_count` bases with quality >= `quality`
    GoodBaseCount { quality: u8, min_count: usize },
    /// At least `min_fraction` of bases with quality >= `quality`
    GoodBaseFraction { quality: u8, min_fraction: f64 },
    MinReadLength(usize),
    MaxReadLength(usize),
    NoUnmapped,
    NoDuplicates,
    NoQcFails,
    NoSecondary,
    NoSupplementary,
    /// Reject reads whose mate is unmapped
    NoUnmappedSegments,
    /// Reject reads whose mate maps to another contig or beyond `max_insert`
    NoDistantSegments { max_insert: u32 },
    /// Reject reads whose clipped tail suggests read-through into adapter
    NoAdapterContaminated,
}

impl ReadFilter {
    /// Whether the read passes this predicate.
    pub fn passes(&self, read: &AlignedRead) -> bool {
        match self {
            Self::MinMappingQuality(min) => read.mapping_quality() >= *min,
            Self::GoodBaseCount { quality, min_count } => {
                read.count_good_bases(*quality) >= *min_count
            }
            Self::GoodBaseFraction {
                quality,
                min_fraction,
            } => {
                if read.is_empty() {
                    return false;
                }
                read.count_good_bases(*quality) as f64 / read.len() as f64 >= *min_fraction
            }
            Self::MinReadLength(min) => read.len() >= *min,
            Self::MaxReadLength(max) => read.len() <= *max,
            Self::NoUnmapped => !read.flags().unmapped,
            Self::NoDuplicates => !read.flags().duplicate,
            Self::NoQcFails => !read.flags().qc_fail,
            Self::NoSecondary => !read.flags().secondary,
            Self::NoSupplementary => !read.flags().supplementary,
            Self::NoUnmappedSegments => {
                !(read.flags().paired && read.flags().mate_unmapped)
            }
            Self::NoDistantSegments { max_insert } => !read.has_distant_mate(*max_insert),
            Self::NoAdapterContaminated => !is_adapter_contaminated(read),
        }
    }
}

/// A read pair shorter than the read length clips both ends; a fully
/// soft-clipped tail on a proper pair is the usual signature.
fn is_adapter_contaminated(read: &AlignedRead) -> bool {
    if !read.flags().paired || !read.flags().proper_pair {
        return false;
    }
    let Some(mate) = read.mate() else {
        return false;
    };
    if mate.unmapped || mate.contig != read.region().contig_arc() {
        return false;
    }
    // Template shorter than the read: the mate starts inside this read's
    // aligned span on the appropriate side.
    let clip = read.cigar().leading_soft_clip().max(read.cigar().trailing_soft_clip());
    clip > 0 && mate.begin >= read.region().begin() && mate.begin < read.region().end()
}

/// Ordered filter pipeline with pass/fail accounting.
#[derive(Clone, Debug, Default)]
pub struct ReadFilterPipeline {
    filters: Vec<ReadFilter>,
}

impl ReadFilterPipeline {
    pub fn new(filters: Vec<ReadFilter>) -> Self {
        Self { filters }
    }

    pub fn push(&mut self, filter: ReadFilter) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn passes(&self, read: &AlignedRead) -> bool {
        self.filters.iter().all(|f| f.passes(read))
    }

    /// Filter in place, returning the number of removed reads.
    pub fn apply(&self, reads: &mut Vec<AlignedRead>) -> usize {
        let before = reads.len();
        reads.retain(|read| self.passes(read));
        before - reads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read::{Cigar, ReadFlags};
    use crate::data::region::GenomicRegion;

    fn read_with(mapping_quality: u8, qualities: Vec<u8>, flags: ReadFlags) -> AlignedRead {
        let n = qualities.len();
        let cigar: Cigar = format!("{}M", n).parse().unwrap();
        AlignedRead::new(
            "r1",
            GenomicRegion::new("chr1", 100, 100 + n as u32),
            vec![b'A'; n],
            qualities,
            cigar,
            mapping_quality,
            flags,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_mapping_quality_filter() {
        let read = read_with(10, vec![30; 50], ReadFlags::default());
        assert!(!ReadFilter::MinMappingQuality(20).passes(&read));
        assert!(ReadFilter::MinMappingQuality(10).passes(&read));
    }

    #[test]
    fn test_good_base_filters() {
        let mut qualities = vec![30; 40];
        qualities.extend(vec![5; 10]);
        let read = read_with(60, qualities, ReadFlags::default());
        assert!(ReadFilter::GoodBaseCount {
            quality: 20,
            min_count: 40
        }
        .passes(&read));
        assert!(!ReadFilter::GoodBaseCount {
            quality: 20,
            min_count: 41
        }
        .passes(&read));
        assert!(ReadFilter::GoodBaseFraction {
            quality: 20,
            min_fraction: 0.8
        }
        .passes(&read));
        assert!(!ReadFilter::GoodBaseFraction {
            quality: 20,
            min_fraction: 0.9
        }
        .passes(&read));
    }

    #[test]
    fn test_flag_filters() {
        let flags = ReadFlags {
            duplicate: true,
            secondary: true,
            ..ReadFlags::default()
        };
        let read = read_with(60, vec![30; 50], flags);
        assert!(!ReadFilter::NoDuplicates.passes(&read));
        assert!(!ReadFilter::NoSecondary.passes(&read));
        assert!(ReadFilter::NoQcFails.passes(&read));
    }

    #[test]
    fn test_pipeline_apply() {
        let pipeline = ReadFilterPipeline::new(vec![
            ReadFilter::MinMappingQuality(20),
            ReadFilter::MinReadLength(10),
        ]);
        let mut reads = vec![
            read_with(60, vec![30; 50], ReadFlags::default()),
            read_with(5, vec![30; 50], ReadFlags::default()),
            read_with(60, vec![30; 5], ReadFlags::default()),
        ];
        let removed = pipeline.apply(&mut reads);
        assert_eq!(removed, 2);
        assert_eq!(reads.len(), 1);
    }
}
