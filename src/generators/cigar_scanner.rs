//! # CIGAR Scanner
//!
//! Pileup-style candidate discovery: walks the CIGAR of every read
//! overlapping the active region and turns mismatches, insertions, and
//! deletions into candidate variants with support statistics. Soft-clipped
//! coverage is tracked separately as an assembly trigger signal.

use rustc_hash::FxHashMap;

use crate::data::read::{AlignedRead, CigarOpKind};
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::Result;

/// A candidate variant with its pileup support evidence.
#[derive(Clone, Debug)]
pub struct CandidateObservation {
    pub variant: Variant,
    /// Number of supporting reads
    pub support: u32,
    /// Sum of base qualities over the event bases of supporting reads
    pub base_quality_sum: f64,
    /// Sum of supporting reads' mapping qualities
    pub mapping_quality_sum: u64,
    /// Read depth at the event's begin position
    pub depth: u32,
}

impl CandidateObservation {
    /// Supporting-read fraction at the site.
    pub fn allele_fraction(&self) -> f64 {
        if self.depth == 0 {
            return 0.0;
        }
        (self.support as f64 / self.depth as f64).min(1.0)
    }

    /// Mean base quality of the supporting observations.
    pub fn mean_base_quality(&self) -> f64 {
        if self.support == 0 {
            return 0.0;
        }
        self.base_quality_sum / self.support as f64
    }
}

/// Summary of one scan over an active region.
#[derive(Clone, Debug, Default)]
pub struct ScanResult {
    pub candidates: Vec<CandidateObservation>,
    /// Mean read depth over the region
    pub mean_depth: f64,
    /// Largest candidate allele fraction seen
    pub max_allele_fraction: f64,
    /// Fraction of covered positions with soft-clip evidence
    pub clipped_fraction: f64,
}

/// Scanner configuration.
#[derive(Clone, Copy, Debug)]
pub struct CigarScanner {
    /// Bases below this quality do not count as mismatch support
    pub min_base_quality: u8,
    /// Events larger than this are ignored
    pub max_variant_size: usize,
}

impl Default for CigarScanner {
    fn default() -> Self {
        Self {
            min_base_quality: 10,
            max_variant_size: 2000,
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
struct EventKey {
    begin: u32,
    end: u32,
    alt: Vec<u8>,
}

struct EventStats {
    ref_seq: Vec<u8>,
    support: u32,
    base_quality_sum: f64,
    mapping_quality_sum: u64,
}

impl CigarScanner {
    /// Scan reads over `region`; `reference_window` holds the reference
    /// bases for `region`.
    pub fn scan(
        &self,
        reads: &[AlignedRead],
        region: &GenomicRegion,
        reference_window: &[u8],
    ) -> Result<ScanResult> {
        let len = region.len() as usize;
        let mut coverage = vec![0u32; len];
        let mut clipped = vec![0u32; len];
        let mut events: FxHashMap<EventKey, EventStats> = FxHashMap::default();

        for read in reads {
            self.scan_read(read, region, reference_window, &mut coverage, &mut clipped, &mut events);
        }

        let depth_at = |begin: u32| -> u32 {
            if begin < region.begin() || begin >= region.end() {
                // Events at the very end of the window anchor on the last
                // covered position.
                let idx = (begin.saturating_sub(region.begin()) as usize).min(len.saturating_sub(1));
                return coverage.get(idx).copied().unwrap_or(0);
            }
            coverage[(begin - region.begin()) as usize]
        };

        let mut candidates: Vec<CandidateObservation> = events
            .into_iter()
            .filter_map(|(key, stats)| {
                let variant = Variant::new(
                    GenomicRegion::new(region.contig_arc(), key.begin, key.end),
                    stats.ref_seq,
                    key.alt,
                )
                .ok()?;
                Some(CandidateObservation {
                    depth: depth_at(variant.region().begin()).max(stats.support),
                    variant,
                    support: stats.support,
                    base_quality_sum: stats.base_quality_sum,
                    mapping_quality_sum: stats.mapping_quality_sum,
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.variant
                .region()
                .cmp(b.variant.region())
                .then_with(|| a.variant.alt_sequence().cmp(b.variant.alt_sequence()))
        });

        let covered = coverage.iter().filter(|&&c| c > 0).count();
        let mean_depth = if len > 0 {
            coverage.iter().map(|&c| c as u64).sum::<u64>() as f64 / len as f64
        } else {
            0.0
        };
        let clipped_fraction = if covered > 0 {
            clipped.iter().filter(|&&c| c > 0).count() as f64 / covered as f64
        } else {
            0.0
        };
        let max_allele_fraction = candidates
            .iter()
            .map(|c| c.allele_fraction())
            .fold(0.0, f64::max);

        Ok(ScanResult {
            candidates,
            mean_depth,
            max_allele_fraction,
            clipped_fraction,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_read(
        &self,
        read: &AlignedRead,
        region: &GenomicRegion,
        reference_window: &[u8],
        coverage: &mut [u32],
        clipped: &mut [u32],
        events: &mut FxHashMap<EventKey, EventStats>,
    ) {
        if !read.region().overlaps(region) {
            return;
        }
        let mut ref_pos = read.region().begin();
        let mut read_pos = 0usize;
        let window_at = |pos: u32| -> Option<u8> {
            if pos < region.begin() || pos >= region.end() {
                return None;
            }
            reference_window.get((pos - region.begin()) as usize).copied()
        };

        for op in read.cigar().ops() {
            match op.kind {
                CigarOpKind::Match | CigarOpKind::SequenceMatch | CigarOpKind::Mismatch => {
                    for offset in 0..op.len {
                        let pos = ref_pos + offset;
                        let Some(ref_base) = window_at(pos) else {
                            continue;
                        };
                        let idx = (pos - region.begin()) as usize;
                        coverage[idx] += 1;
                        let read_base = read.sequence()[read_pos + offset as usize];
                        let quality = read.qualities()[read_pos + offset as usize];
                        if read_base != ref_base
                            && read_base != b'N'
                            && quality >= self.min_base_quality
                        {
                            self.record(
                                events,
                                pos,
                                pos + 1,
                                vec![ref_base],
                                vec![read_base],
                                quality as f64,
                                read.mapping_quality(),
                            );
                        }
                    }
                }
                CigarOpKind::Insertion => {
                    let inserted =
                        &read.sequence()[read_pos..read_pos + op.len as usize];
                    if (op.len as usize) <= self.max_variant_size
                        && region.contains_position(ref_pos.saturating_sub(1))
                    {
                        let mean_quality = read.qualities()
                            [read_pos..read_pos + op.len as usize]
                            .iter()
                            .map(|&q| q as f64)
                            .sum::<f64>()
                            / op.len as f64;
                        self.record(
                            events,
                            ref_pos,
                            ref_pos,
                            Vec::new(),
                            inserted.to_vec(),
                            mean_quality,
                            read.mapping_quality(),
                        );
                    }
                }
                CigarOpKind::Deletion => {
                    if (op.len as usize) <= self.max_variant_size {
                        let begin = ref_pos.max(region.begin());
                        let end = (ref_pos + op.len).min(region.end());
                        if begin == ref_pos && end == ref_pos + op.len {
                            let a = (begin - region.begin()) as usize;
                            let b = (end - region.begin()) as usize;
                            let ref_seq = reference_window[a..b].to_vec();
                            // Deletion quality is the flanking base quality.
                            let quality = read
                                .qualities()
                                .get(read_pos.saturating_sub(1))
                                .copied()
                                .unwrap_or(0) as f64;
                            self.record(
                                events,
                                begin,
                                end,
                                ref_seq,
                                Vec::new(),
                                quality,
                                read.mapping_quality(),
                            );
                        }
                    }
                }
                CigarOpKind::SoftClip => {
                    // Clip evidence lands on the clip's anchor position.
                    let anchor = if read_pos == 0 {
                        ref_pos.saturating_sub(1)
                    } else {
                        ref_pos
                    };
                    if region.contains_position(anchor) {
                        clipped[(anchor - region.begin()) as usize] += 1;
                    }
                }
                CigarOpKind::Skip | CigarOpKind::HardClip | CigarOpKind::Padding => {}
            }
            if op.kind.consumes_reference() {
                ref_pos += op.len;
            }
            if op.kind.consumes_query() {
                read_pos += op.len as usize;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        events: &mut FxHashMap<EventKey, EventStats>,
        begin: u32,
        end: u32,
        ref_seq: Vec<u8>,
        alt: Vec<u8>,
        quality: f64,
        mapping_quality: u8,
    ) {
        let entry = events
            .entry(EventKey { begin, end, alt })
            .or_insert_with(|| EventStats {
                ref_seq,
                support: 0,
                base_quality_sum: 0.0,
                mapping_quality_sum: 0,
            });
        entry.support += 1;
        entry.base_quality_sum += quality;
        entry.mapping_quality_sum += mapping_quality as u64;
    }
}
