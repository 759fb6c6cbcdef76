//! # Aligned Read Model
//!
//! The in-memory representation of an aligned sequencing read: sequence,
//! base qualities, CIGAR, mapping quality, SAM-style flags, and an optional
//! mate segment. Construction validates the CIGAR/sequence/region
//! consistency invariants so downstream code never re-checks them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::data::mappable::Mappable;
use crate::data::region::GenomicRegion;
use crate::error::{NautilusError, Result};

/// One CIGAR operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CigarOpKind {
    /// Alignment match or mismatch (M)
    Match,
    /// Insertion to the reference (I)
    Insertion,
    /// Deletion from the reference (D)
    Deletion,
    /// Skipped reference region (N)
    Skip,
    /// Soft clip (S): bases present in the read, absent from the alignment
    SoftClip,
    /// Hard clip (H)
    HardClip,
    /// Padding (P)
    Padding,
    /// Sequence match (=)
    SequenceMatch,
    /// Sequence mismatch (X)
    Mismatch,
}

impl CigarOpKind {
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            Self::Match | Self::Insertion | Self::SoftClip | Self::SequenceMatch | Self::Mismatch
        )
    }

    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            Self::Match | Self::Deletion | Self::Skip | Self::SequenceMatch | Self::Mismatch
        )
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Match => 'M',
            Self::Insertion => 'I',
            Self::Deletion => 'D',
            Self::Skip => 'N',
            Self::SoftClip => 'S',
            Self::HardClip => 'H',
            Self::Padding => 'P',
            Self::SequenceMatch => '=',
            Self::Mismatch => 'X',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'M' => Some(Self::Match),
            'I' => Some(Self::Insertion),
            'D' => Some(Self::Deletion),
            'N' => Some(Self::Skip),
            'S' => Some(Self::SoftClip),
            'H' => Some(Self::HardClip),
            'P' => Some(Self::Padding),
            '=' => Some(Self::SequenceMatch),
            'X' => Some(Self::Mismatch),
            _ => None,
        }
    }
}

/// A run-length CIGAR operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CigarOp {
    pub len: u32,
    pub kind: CigarOpKind,
}

impl CigarOp {
    pub fn new(len: u32, kind: CigarOpKind) -> Self {
        Self { len, kind }
    }
}

/// A validated CIGAR string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Cigar(Vec<CigarOp>);

impl Cigar {
    /// Build from operations, enforcing well-formedness: no zero-length ops
    /// and no adjacent same-kind runs. Read alignments additionally forbid
    /// edge deletions; `AlignedRead::new` checks that, since the pairwise
    /// aligner's internal CIGARs may start or end in a gap.
    pub fn new(ops: Vec<CigarOp>) -> Result<Self> {
        if ops.iter().any(|op| op.len == 0) {
            return Err(NautilusError::bad_read("CIGAR contains a zero-length operation"));
        }
        if ops.windows(2).any(|w| w[0].kind == w[1].kind) {
            return Err(NautilusError::bad_read("CIGAR contains adjacent same-kind runs"));
        }
        Ok(Self(ops))
    }

    /// True if the first or last non-clip operation is a deletion or skip.
    pub fn has_edge_gap(&self) -> bool {
        let is_gap = |k: CigarOpKind| matches!(k, CigarOpKind::Deletion | CigarOpKind::Skip);
        let mut alignment_ops = self
            .0
            .iter()
            .filter(|op| !matches!(op.kind, CigarOpKind::SoftClip | CigarOpKind::HardClip));
        let first = alignment_ops.next();
        let last = alignment_ops.last().or(first);
        matches!((first, last), (Some(f), Some(l)) if is_gap(f.kind) || is_gap(l.kind))
    }

    /// Build from operations, merging adjacent same-kind runs and dropping
    /// zero-length ops first. Used by the aligner and realigner, whose raw
    /// traceback may produce unnormalized runs.
    pub fn from_raw_ops(ops: impl IntoIterator<Item = CigarOp>) -> Result<Self> {
        let mut merged: Vec<CigarOp> = Vec::new();
        for op in ops {
            if op.len == 0 {
                continue;
            }
            match merged.last_mut() {
                Some(last) if last.kind == op.kind => last.len += op.len,
                _ => merged.push(op),
            }
        }
        Self::new(merged)
    }

    pub fn ops(&self) -> &[CigarOp] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of reference positions spanned.
    pub fn reference_span(&self) -> u32 {
        self.0
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| op.len)
            .sum()
    }

    /// Number of read bases consumed.
    pub fn query_span(&self) -> u32 {
        self.0
            .iter()
            .filter(|op| op.kind.consumes_query())
            .map(|op| op.len)
            .sum()
    }

    /// Soft-clipped bases at the front.
    pub fn leading_soft_clip(&self) -> u32 {
        match self.0.first() {
            Some(op) if op.kind == CigarOpKind::SoftClip => op.len,
            _ => 0,
        }
    }

    /// Soft-clipped bases at the back.
    pub fn trailing_soft_clip(&self) -> u32 {
        match self.0.last() {
            Some(op) if op.kind == CigarOpKind::SoftClip => op.len,
            _ => 0,
        }
    }

    pub fn is_all_match(&self) -> bool {
        self.0
            .iter()
            .all(|op| matches!(op.kind, CigarOpKind::Match | CigarOpKind::SequenceMatch))
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.0 {
            write!(f, "{}{}", op.len, op.kind.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for Cigar {
    type Err = NautilusError;

    fn from_str(s: &str) -> Result<Self> {
        let mut ops = Vec::new();
        let mut len: u32 = 0;
        let mut saw_digit = false;
        for c in s.chars() {
            if let Some(d) = c.to_digit(10) {
                len = len
                    .checked_mul(10)
                    .and_then(|l| l.checked_add(d))
                    .ok_or_else(|| NautilusError::bad_read("CIGAR length overflows"))?;
                saw_digit = true;
            } else if let Some(kind) = CigarOpKind::from_char(c) {
                if !saw_digit {
                    return Err(NautilusError::bad_read("CIGAR operation without a length"));
                }
                ops.push(CigarOp::new(len, kind));
                len = 0;
                saw_digit = false;
            } else {
                return Err(NautilusError::bad_read(format!(
                    "unknown CIGAR operation '{}'",
                    c
                )));
            }
        }
        if saw_digit {
            return Err(NautilusError::bad_read("CIGAR ends mid-operation"));
        }
        Self::new(ops)
    }
}

/// SAM-style read flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadFlags {
    pub paired: bool,
    pub proper_pair: bool,
    pub unmapped: bool,
    pub mate_unmapped: bool,
    pub reversed: bool,
    pub mate_reversed: bool,
    pub first_of_pair: bool,
    pub second_of_pair: bool,
    pub secondary: bool,
    pub qc_fail: bool,
    pub duplicate: bool,
    pub supplementary: bool,
}

impl ReadFlags {
    pub fn from_sam_bits(bits: u16) -> Self {
        Self {
            paired: bits & 0x1 != 0,
            proper_pair: bits & 0x2 != 0,
            unmapped: bits & 0x4 != 0,
            mate_unmapped: bits & 0x8 != 0,
            reversed: bits & 0x10 != 0,
            mate_reversed: bits & 0x20 != 0,
            first_of_pair: bits & 0x40 != 0,
            second_of_pair: bits & 0x80 != 0,
            secondary: bits & 0x100 != 0,
            qc_fail: bits & 0x200 != 0,
            duplicate: bits & 0x400 != 0,
            supplementary: bits & 0x800 != 0,
        }
    }
}

/// The mate's mapped location, if the read is paired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MateSegment {
    pub contig: Arc<str>,
    pub begin: u32,
    pub unmapped: bool,
}

/// An aligned sequencing read.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedRead {
    name: Arc<str>,
    region: GenomicRegion,
    sequence: Vec<u8>,
    qualities: Vec<u8>,
    cigar: Cigar,
    mapping_quality: u8,
    flags: ReadFlags,
    mate: Option<MateSegment>,
    /// Linked-read barcode, when the library provides one
    barcode: Option<Arc<str>>,
}

impl AlignedRead {
    /// Construct a read, validating the span invariants:
    /// `query_span(cigar) == len(sequence) == len(qualities)` and
    /// `reference_span(cigar) == region.len()`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<Arc<str>>,
        region: GenomicRegion,
        sequence: Vec<u8>,
        qualities: Vec<u8>,
        cigar: Cigar,
        mapping_quality: u8,
        flags: ReadFlags,
        mate: Option<MateSegment>,
    ) -> Result<Self> {
        if sequence.len() != qualities.len() {
            return Err(NautilusError::bad_read(format!(
                "sequence length {} does not match quality length {}",
                sequence.len(),
                qualities.len()
            )));
        }
        if cigar.query_span() as usize != sequence.len() {
            return Err(NautilusError::bad_read(format!(
                "CIGAR query span {} does not match sequence length {}",
                cigar.query_span(),
                sequence.len()
            )));
        }
        if cigar.reference_span() != region.len() {
            return Err(NautilusError::bad_read(format!(
                "CIGAR reference span {} does not match region length {}",
                cigar.reference_span(),
                region.len()
            )));
        }
        if cigar.has_edge_gap() {
            return Err(NautilusError::bad_read(
                "read CIGAR starts or ends with a deletion or skip",
            ));
        }
        Ok(Self {
            name: name.into(),
            region,
            sequence,
            qualities,
            cigar,
            mapping_quality,
            flags,
            mate,
            barcode: None,
        })
    }

    pub fn with_barcode(mut self, barcode: impl Into<Arc<str>>) -> Self {
        self.barcode = Some(barcode.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn qualities(&self) -> &[u8] {
        &self.qualities
    }

    /// Mutable base qualities, for read transformers. The length is fixed.
    pub fn qualities_mut(&mut self) -> &mut [u8] {
        &mut self.qualities
    }

    pub fn cigar(&self) -> &Cigar {
        &self.cigar
    }

    pub fn mapping_quality(&self) -> u8 {
        self.mapping_quality
    }

    pub fn flags(&self) -> ReadFlags {
        self.flags
    }

    pub fn mate(&self) -> Option<&MateSegment> {
        self.mate.as_ref()
    }

    pub fn barcode(&self) -> Option<&str> {
        self.barcode.as_deref()
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Mean base quality over the whole read.
    pub fn mean_base_quality(&self) -> f64 {
        if self.qualities.is_empty() {
            return 0.0;
        }
        self.qualities.iter().map(|&q| q as f64).sum::<f64>() / self.qualities.len() as f64
    }

    /// Count of bases with quality at least `threshold`.
    pub fn count_good_bases(&self, threshold: u8) -> usize {
        self.qualities.iter().filter(|&&q| q >= threshold).count()
    }

    /// True if either end of the alignment is soft-clipped.
    pub fn is_soft_clipped(&self) -> bool {
        self.cigar.leading_soft_clip() > 0 || self.cigar.trailing_soft_clip() > 0
    }

    /// The mate maps to a different contig, or unreasonably far away.
    pub fn has_distant_mate(&self, max_insert: u32) -> bool {
        match &self.mate {
            Some(mate) if !mate.unmapped => {
                mate.contig != self.region.contig_arc()
                    || mate.begin.abs_diff(self.region.begin()) > max_insert
            }
            _ => false,
        }
    }

    /// Replace the alignment, revalidating spans. Used by the realigner.
    pub fn realigned(&self, region: GenomicRegion, cigar: Cigar) -> Result<Self> {
        Self::new(
            Arc::clone(&self.name),
            region,
            self.sequence.clone(),
            self.qualities.clone(),
            cigar,
            self.mapping_quality,
            self.flags,
            self.mate.clone(),
        )
        .map(|mut read| {
            read.barcode = self.barcode.clone();
            read
        })
    }

    /// The read base aligned to reference position `pos`, if any.
    pub fn base_at(&self, pos: u32) -> Option<u8> {
        if !self.region.contains_position(pos) {
            return None;
        }
        let mut ref_pos = self.region.begin();
        let mut read_pos = 0usize;
        for op in self.cigar.ops() {
            let advance_ref = op.kind.consumes_reference();
            let advance_query = op.kind.consumes_query();
            if advance_ref && advance_query {
                if pos < ref_pos + op.len {
                    return self.sequence.get(read_pos + (pos - ref_pos) as usize).copied();
                }
            } else if advance_ref && pos < ref_pos + op.len {
                // Deletion covers the position
                return None;
            }
            if advance_ref {
                ref_pos += op.len;
            }
            if advance_query {
                read_pos += op.len as usize;
            }
        }
        None
    }
}

impl Mappable for AlignedRead {
    fn region(&self) -> &GenomicRegion {
        &self.region
    }
}

impl AlignedRead {
    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }
}
