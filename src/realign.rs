//! # Read Realignment
//!
//! Assigns each read to its most likely called haplotype, realigns it
//! against that haplotype, and rebases the resulting CIGAR onto the
//! reference coordinate system. Reads in one template (read pair or linked
//! barcode) are assigned together; ambiguous assignments are resolved by a
//! seeded generator and flagged.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHasher;

use crate::align::{align, AlignmentModel};
use crate::data::haplotype::Haplotype;
use crate::data::read::{AlignedRead, Cigar, CigarOp, CigarOpKind};
use crate::data::region::GenomicRegion;
use crate::error::Result;
use crate::model::likelihood::HaplotypeLikelihoodModel;
use crate::utils::maths::MIN_LN_PROBABILITY;

/// Annotations attached to each realigned read.
#[derive(Clone, Debug, Default)]
pub struct RealignmentAnnotations {
    /// `hi`: index of the assigned haplotype
    pub haplotype_index: Option<usize>,
    /// `hc`: the read's CIGAR against the inferred haplotype
    pub haplotype_cigar: Option<Cigar>,
    /// `md`: MD string against the inferred haplotype
    pub md_haplotype: Option<String>,
    /// MD string against the reference
    pub md_reference: Option<String>,
    /// `PS`: the phase set of the assigned haplotype's window
    pub phase_set: Option<GenomicRegion>,
    /// `LK`: Phred-scaled assignment log-likelihood
    pub log_likelihood: Option<f64>,
    /// The assignment was a seeded tie-break among equals
    pub randomly_assigned: bool,
    /// No haplotype could align this read; it is passed through unchanged
    pub unassigned: bool,
}

/// A read after realignment, with its annotations.
#[derive(Clone, Debug)]
pub struct RealignedRead {
    pub read: AlignedRead,
    pub annotations: RealignmentAnnotations,
}

/// How reads are grouped into templates for joint assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateLinkage {
    /// Every read assigned independently
    None,
    /// Reads sharing a name (read pairs) assigned together
    Paired,
    /// Reads sharing a barcode assigned together; falls back to pairing
    Linked,
}

pub struct ReadRealigner {
    pub model: HaplotypeLikelihoodModel,
    pub linkage: TemplateLinkage,
    pub seed: u64,
}

impl ReadRealigner {
    pub fn new(model: HaplotypeLikelihoodModel, linkage: TemplateLinkage, seed: u64) -> Self {
        Self {
            model,
            linkage,
            seed,
        }
    }

    /// Realign `reads` against the called haplotypes. `reference_window`
    /// must cover every haplotype's region, starting at `window_begin`;
    /// `phase_set` is attached to assigned reads.
    pub fn realign(
        &self,
        reads: &[AlignedRead],
        haplotypes: &[Arc<Haplotype>],
        reference_window: &[u8],
        window_begin: u32,
        phase_set: Option<&GenomicRegion>,
    ) -> Result<Vec<RealignedRead>> {
        if haplotypes.is_empty() {
            return Ok(reads
                .iter()
                .map(|read| RealignedRead {
                    read: read.clone(),
                    annotations: RealignmentAnnotations {
                        unassigned: true,
                        ..RealignmentAnnotations::default()
                    },
                })
                .collect());
        }

        // Group into templates.
        let mut templates: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, read) in reads.iter().enumerate() {
            let key = match self.linkage {
                TemplateLinkage::None => format!("{}#{}", read.name(), index),
                TemplateLinkage::Paired => read.name().to_string(),
                TemplateLinkage::Linked => read
                    .barcode()
                    .map(|b| format!("bx:{}", b))
                    .unwrap_or_else(|| read.name().to_string()),
            };
            templates.entry(key).or_default().push(index);
        }

        let mut out: Vec<Option<RealignedRead>> = vec![None; reads.len()];
        for (key, members) in &templates {
            // Template likelihood: sum across member reads.
            let mut scores: Vec<f64> = vec![0.0; haplotypes.len()];
            for (h, haplotype) in haplotypes.iter().enumerate() {
                for &member in members {
                    scores[h] += self.model.evaluate(&reads[member], haplotype);
                }
            }
            let best = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let unalignable = best <= MIN_LN_PROBABILITY * members.len() as f64 + 1.0;

            if unalignable {
                for &member in members {
                    out[member] = Some(RealignedRead {
                        read: reads[member].clone(),
                        annotations: RealignmentAnnotations {
                            unassigned: true,
                            ..RealignmentAnnotations::default()
                        },
                    });
                }
                continue;
            }

            // Ties within epsilon resolve by a template-seeded draw.
            const EPSILON: f64 = 1e-6;
            let tied: Vec<usize> = scores
                .iter()
                .enumerate()
                .filter(|(_, &s)| (best - s).abs() <= EPSILON)
                .map(|(h, _)| h)
                .collect();
            let (assigned, randomly_assigned) = if tied.len() == 1 {
                (tied[0], false)
            } else {
                let mut hasher = FxHasher::default();
                key.hash(&mut hasher);
                let mut rng = StdRng::seed_from_u64(self.seed ^ hasher.finish());
                (tied[rng.gen_range(0..tied.len())], true)
            };

            for &member in members {
                let realigned = self.realign_one(
                    &reads[member],
                    assigned,
                    &haplotypes[assigned],
                    reference_window,
                    window_begin,
                    phase_set,
                    scores[assigned],
                    randomly_assigned,
                )?;
                out[member] = Some(realigned);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn realign_one(
        &self,
        read: &AlignedRead,
        haplotype_index: usize,
        haplotype: &Haplotype,
        reference_window: &[u8],
        window_begin: u32,
        phase_set: Option<&GenomicRegion>,
        score: f64,
        randomly_assigned: bool,
    ) -> Result<RealignedRead> {
        // Align the read against the haplotype sub-sequence around its
        // mapped position; global edge deletions become the placement.
        let pad = 2 * (read.len() as u32 / 4).max(8);
        let hap_region = haplotype.region();
        let slice_begin = read
            .region()
            .begin()
            .saturating_sub(pad)
            .max(hap_region.begin());
        let slice_end = (read.region().end() + pad).min(hap_region.end());
        let hap_offsets = haplotype_offsets(haplotype);
        let Some((seq_begin, seq_end)) = sequence_span(&hap_offsets, slice_begin, slice_end)
        else {
            return Ok(passthrough(read, randomly_assigned));
        };
        let hap_slice = &haplotype.sequence()[seq_begin..seq_end];
        if hap_slice.is_empty() || read.is_empty() {
            return Ok(passthrough(read, randomly_assigned));
        }

        let alignment = align(hap_slice, read.sequence(), AlignmentModel::default())?;
        let (leading, interior, _trailing) = split_edge_deletions(&alignment.cigar);
        let Ok(haplotype_cigar) = Cigar::from_raw_ops(interior.clone()) else {
            return Ok(passthrough(read, randomly_assigned));
        };
        if haplotype_cigar.has_edge_gap() || haplotype_cigar.query_span() as usize != read.len() {
            return Ok(passthrough(read, randomly_assigned));
        }

        // Rebase onto the reference through the haplotype's own alignment.
        let read_start_in_sequence = seq_begin + leading as usize;
        let Some((ref_begin, ref_cigar)) = rebase_to_reference(
            haplotype,
            &hap_offsets,
            read_start_in_sequence,
            &haplotype_cigar,
        ) else {
            return Ok(passthrough(read, randomly_assigned));
        };

        let ref_span = ref_cigar.reference_span();
        let new_region = GenomicRegion::new(hap_region.contig_arc(), ref_begin, ref_begin + ref_span);
        let Ok(new_read) = read.realigned(new_region.clone(), ref_cigar.clone()) else {
            return Ok(passthrough(read, randomly_assigned));
        };

        // MD strings against both targets.
        let md_haplotype = md_string(
            &haplotype_cigar,
            read.sequence(),
            &haplotype.sequence()[read_start_in_sequence..],
        );
        let md_reference = if new_region.begin() >= window_begin
            && (new_region.end() - window_begin) as usize <= reference_window.len()
        {
            Some(md_string(
                &ref_cigar,
                new_read.sequence(),
                &reference_window[(new_region.begin() - window_begin) as usize..],
            ))
        } else {
            None
        };

        Ok(RealignedRead {
            read: new_read,
            annotations: RealignmentAnnotations {
                haplotype_index: Some(haplotype_index),
                haplotype_cigar: Some(haplotype_cigar),
                md_haplotype: Some(md_haplotype),
                md_reference,
                phase_set: phase_set.cloned(),
                log_likelihood: Some(-10.0 * score / std::f64::consts::LN_10),
                randomly_assigned,
                unassigned: false,
            },
        })
    }
}

fn passthrough(read: &AlignedRead, randomly_assigned: bool) -> RealignedRead {
    RealignedRead {
        read: read.clone(),
        annotations: RealignmentAnnotations {
            unassigned: true,
            randomly_assigned,
            ..RealignmentAnnotations::default()
        },
    }
}

/// Per-haplotype-sequence-base reference bookkeeping: for each base of the
/// concrete sequence, the reference position it sits on (`None` for
/// inserted bases) plus the count of reference bases deleted immediately
/// before it.
struct HaplotypeOffsets {
    ref_position: Vec<Option<u32>>,
    deleted_before: Vec<u32>,
}

fn haplotype_offsets(haplotype: &Haplotype) -> HaplotypeOffsets {
    let mut ref_position = Vec::with_capacity(haplotype.sequence().len());
    let mut deleted_before = Vec::with_capacity(haplotype.sequence().len());
    let mut pending_deleted = 0u32;
    let mut ref_cursor = haplotype.region().begin();

    let mut emit_segment = |seq_len: usize, ref_len: u32, ref_position: &mut Vec<Option<u32>>, deleted_before: &mut Vec<u32>, ref_cursor: &mut u32, pending_deleted: &mut u32| {
        // Aligned prefix: min(seq_len, ref_len) bases sit on reference.
        let aligned = seq_len.min(ref_len as usize);
        for i in 0..aligned {
            ref_position.push(Some(*ref_cursor + i as u32));
            deleted_before.push(*pending_deleted);
            *pending_deleted = 0;
        }
        // Surplus sequence: insertion.
        for _ in aligned..seq_len {
            ref_position.push(None);
            deleted_before.push(*pending_deleted);
            *pending_deleted = 0;
        }
        // Surplus reference: deletion.
        if ref_len as usize > aligned {
            *pending_deleted += ref_len - aligned as u32;
        }
        *ref_cursor += ref_len;
    };

    for allele in haplotype.explicit_alleles() {
        let gap = allele.region().begin() - ref_cursor;
        if gap > 0 {
            emit_segment(
                gap as usize,
                gap,
                &mut ref_position,
                &mut deleted_before,
                &mut ref_cursor,
                &mut pending_deleted,
            );
        }
        emit_segment(
            allele.sequence().len(),
            allele.region().len(),
            &mut ref_position,
            &mut deleted_before,
            &mut ref_cursor,
            &mut pending_deleted,
        );
    }
    let tail = haplotype.region().end() - ref_cursor;
    if tail > 0 {
        emit_segment(
            tail as usize,
            tail,
            &mut ref_position,
            &mut deleted_before,
            &mut ref_cursor,
            &mut pending_deleted,
        );
    }

    HaplotypeOffsets {
        ref_position,
        deleted_before,
    }
}

/// Map a reference sub-range onto haplotype sequence indices.
fn sequence_span(
    offsets: &HaplotypeOffsets,
    ref_begin: u32,
    ref_end: u32,
) -> Option<(usize, usize)> {
    let begin = offsets
        .ref_position
        .iter()
        .position(|p| matches!(p, Some(pos) if *pos >= ref_begin))?;
    let end = offsets
        .ref_position
        .iter()
        .rposition(|p| matches!(p, Some(pos) if *pos < ref_end))
        .map(|i| i + 1)?;
    if begin >= end {
        None
    } else {
        Some((begin, end))
    }
}

/// Separate edge deletions (placement offsets) from the interior CIGAR.
fn split_edge_deletions(cigar: &Cigar) -> (u32, Vec<CigarOp>, u32) {
    let ops = cigar.ops();
    let mut start = 0usize;
    let mut leading = 0u32;
    while start < ops.len() && ops[start].kind == CigarOpKind::Deletion {
        leading += ops[start].len;
        start += 1;
    }
    let mut end = ops.len();
    let mut trailing = 0u32;
    while end > start && ops[end - 1].kind == CigarOpKind::Deletion {
        trailing += ops[end - 1].len;
        end -= 1;
    }
    (leading, ops[start..end].to_vec(), trailing)
}

/// Compose the read-vs-haplotype CIGAR with the haplotype's reference
/// alignment, yielding a reference begin position and CIGAR.
fn rebase_to_reference(
    haplotype: &Haplotype,
    offsets: &HaplotypeOffsets,
    start_in_sequence: usize,
    haplotype_cigar: &Cigar,
) -> Option<(u32, Cigar)> {
    let sequence_len = haplotype.sequence().len();
    let mut ops: Vec<CigarOp> = Vec::new();
    let mut seq_pos = start_in_sequence;

    // The read must start on a reference-aligned base; slide forward over
    // inserted context.
    while seq_pos < sequence_len && offsets.ref_position[seq_pos].is_none() {
        seq_pos += 1;
    }
    let ref_begin = match offsets.ref_position.get(seq_pos) {
        Some(Some(pos)) => *pos,
        _ => return None,
    };
    let mut first = true;

    for op in haplotype_cigar.ops() {
        match op.kind {
            CigarOpKind::SequenceMatch | CigarOpKind::Mismatch | CigarOpKind::Match => {
                for _ in 0..op.len {
                    if seq_pos >= sequence_len {
                        return None;
                    }
                    if !first && offsets.deleted_before[seq_pos] > 0 {
                        ops.push(CigarOp::new(
                            offsets.deleted_before[seq_pos],
                            CigarOpKind::Deletion,
                        ));
                    }
                    match offsets.ref_position[seq_pos] {
                        Some(_) => ops.push(CigarOp::new(1, CigarOpKind::Match)),
                        None => ops.push(CigarOp::new(1, CigarOpKind::Insertion)),
                    }
                    seq_pos += 1;
                    first = false;
                }
            }
            CigarOpKind::Insertion => {
                // Read-only bases stay insertions in reference space.
                ops.push(CigarOp::new(op.len, CigarOpKind::Insertion));
                first = false;
            }
            CigarOpKind::Deletion => {
                // Haplotype bases skipped by the read.
                for _ in 0..op.len {
                    if seq_pos >= sequence_len {
                        return None;
                    }
                    if !first && offsets.deleted_before[seq_pos] > 0 {
                        ops.push(CigarOp::new(
                            offsets.deleted_before[seq_pos],
                            CigarOpKind::Deletion,
                        ));
                    }
                    if offsets.ref_position[seq_pos].is_some() {
                        ops.push(CigarOp::new(1, CigarOpKind::Deletion));
                    }
                    seq_pos += 1;
                }
            }
            _ => return None,
        }
    }

    let cigar = Cigar::from_raw_ops(ops).ok()?;
    if cigar.has_edge_gap() {
        return None;
    }
    Some((ref_begin, cigar))
}

/// Write realigned reads as SAM text with the annotation tags.
pub fn write_sam(
    path: &std::path::Path,
    contigs: &[(String, u32)],
    reads: &[RealignedRead],
) -> Result<()> {
    use std::io::Write;
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(out, "@HD\tVN:1.6\tSO:coordinate")?;
    for (name, size) in contigs {
        writeln!(out, "@SQ\tSN:{}\tLN:{}", name, size)?;
    }
    writeln!(out, "@PG\tID:nautilus\tPN:nautilus\tVN:{}", env!("CARGO_PKG_VERSION"))?;
    for realigned in reads {
        let read = &realigned.read;
        let annotations = &realigned.annotations;
        write!(
            out,
            "{}\t0\t{}\t{}\t{}\t{}\t*\t0\t0\t{}\t{}",
            read.name(),
            read.region().contig(),
            read.region().begin() + 1,
            read.mapping_quality(),
            read.cigar(),
            String::from_utf8_lossy(read.sequence()),
            read.qualities()
                .iter()
                .map(|&q| (q + 33) as char)
                .collect::<String>(),
        )?;
        if let Some(index) = annotations.haplotype_index {
            write!(out, "\thi:i:{}", index)?;
        }
        if let Some(cigar) = &annotations.haplotype_cigar {
            write!(out, "\thc:Z:{}", cigar)?;
        }
        if let Some(md) = &annotations.md_haplotype {
            write!(out, "\tmd:Z:{}", md)?;
        }
        if let Some(phase_set) = &annotations.phase_set {
            write!(out, "\tPS:Z:{}", phase_set)?;
        }
        if let Some(lk) = annotations.log_likelihood {
            write!(out, "\tLK:f:{:.2}", lk)?;
        }
        if annotations.randomly_assigned {
            write!(out, "\tra:i:1")?;
        }
        if annotations.unassigned {
            write!(out, "\tua:i:1")?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// Standard MD string: matched-run lengths, mismatched target bases, and
/// `^`-prefixed deleted runs, computed from a CIGAR whose target starts at
/// `target[0]`.
fn md_string(cigar: &Cigar, query: &[u8], target: &[u8]) -> String {
    let mut out = String::new();
    let mut match_run = 0usize;
    let mut query_pos = 0usize;
    let mut target_pos = 0usize;
    for op in cigar.ops() {
        match op.kind {
            CigarOpKind::Match | CigarOpKind::SequenceMatch | CigarOpKind::Mismatch => {
                for _ in 0..op.len {
                    let (Some(&q), Some(&t)) = (query.get(query_pos), target.get(target_pos))
                    else {
                        break;
                    };
                    if q == t {
                        match_run += 1;
                    } else {
                        out.push_str(&match_run.to_string());
                        match_run = 0;
                        out.push(t as char);
                    }
                    query_pos += 1;
                    target_pos += 1;
                }
            }
            CigarOpKind::Insertion => {
                query_pos += op.len as usize;
            }
            CigarOpKind::Deletion => {
                out.push_str(&match_run.to_string());
                match_run = 0;
                out.push('^');
                for _ in 0..op.len {
                    if let Some(&t) = target.get(target_pos) {
                        out.push(t as char);
                    }
                    target_pos += 1;
                }
            }
            _ => {}
        }
    }
    out.push_str(&match_run.to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::haplotype::HaplotypeBuilder;
    use crate::data::read::ReadFlags;
    use crate::data::variant::Allele;

    const WINDOW: &str = "ACGGTTACGATCGATTGCAGGCTACTGAAGTC";

    fn reference_haplotype() -> Arc<Haplotype> {
        let region = GenomicRegion::new("chr1", 0, WINDOW.len() as u32);
        Arc::new(
            HaplotypeBuilder::new(region, WINDOW.as_bytes().to_vec(), 0)
                .unwrap()
                .build(),
        )
    }

    fn deletion_haplotype() -> Arc<Haplotype> {
        // Deletes reference bases 10..13.
        let region = GenomicRegion::new("chr1", 0, WINDOW.len() as u32);
        let mut builder =
            HaplotypeBuilder::new(region, WINDOW.as_bytes().to_vec(), 0).unwrap();
        builder
            .push(Allele::new(GenomicRegion::new("chr1", 10, 13), b"".to_vec()))
            .unwrap();
        Arc::new(builder.build())
    }

    fn read_matching(seq: &[u8], begin: u32) -> AlignedRead {
        let cigar: Cigar = format!("{}M", seq.len()).parse().unwrap();
        AlignedRead::new(
            format!("r{}", begin),
            GenomicRegion::new("chr1", begin, begin + seq.len() as u32),
            seq.to_vec(),
            vec![35; seq.len()],
            cigar,
            60,
            ReadFlags::default(),
            None,
        )
        .unwrap()
    }

    fn realigner() -> ReadRealigner {
        ReadRealigner::new(
            HaplotypeLikelihoodModel {
                use_mapping_quality: false,
                ..HaplotypeLikelihoodModel::default()
            },
            TemplateLinkage::None,
            42,
        )
    }

    #[test]
    fn test_reference_read_assigned_to_reference() {
        let haplotypes = vec![reference_haplotype(), deletion_haplotype()];
        let read = read_matching(&WINDOW.as_bytes()[4..28], 4);
        let out = realigner()
            .realign(&[read], &haplotypes, WINDOW.as_bytes(), 0, None)
            .unwrap();
        assert_eq!(out.len(), 1);
        let annotations = &out[0].annotations;
        assert_eq!(annotations.haplotype_index, Some(0));
        assert!(!annotations.unassigned);
        assert!(!annotations.randomly_assigned);
        // A clean reference read keeps an all-match alignment.
        assert!(out[0].read.cigar().is_all_match());
        assert_eq!(out[0].read.region().begin(), 4);
        // MD is a single run.
        assert_eq!(annotations.md_reference.as_deref(), Some("24"));
    }

    #[test]
    fn test_deletion_read_rebased_with_deletion() {
        let haplotypes = vec![reference_haplotype(), deletion_haplotype()];
        // A read spelling the deletion haplotype across the event.
        let hap = deletion_haplotype();
        let seq = &hap.sequence()[4..24];
        let read = read_matching(seq, 4);
        let out = realigner()
            .realign(&[read], &haplotypes, WINDOW.as_bytes(), 0, None)
            .unwrap();
        let annotations = &out[0].annotations;
        assert_eq!(annotations.haplotype_index, Some(1));
        // The reference-space CIGAR contains the 3-base deletion.
        let cigar = out[0].read.cigar().to_string();
        assert!(cigar.contains("3D"), "cigar was {}", cigar);
        assert_eq!(out[0].read.cigar().query_span() as usize, out[0].read.len());
        // MD records the deleted bases.
        let md = annotations.md_reference.as_deref().unwrap();
        assert!(md.contains('^'), "md was {}", md);
    }

    #[test]
    fn test_ambiguous_read_randomly_assigned_deterministically() {
        // Two identical haplotypes: any read ties.
        let haplotypes = vec![reference_haplotype(), reference_haplotype()];
        let read = read_matching(&WINDOW.as_bytes()[4..28], 4);
        let first = realigner()
            .realign(&[read.clone()], &haplotypes, WINDOW.as_bytes(), 0, None)
            .unwrap();
        let second = realigner()
            .realign(&[read], &haplotypes, WINDOW.as_bytes(), 0, None)
            .unwrap();
        assert!(first[0].annotations.randomly_assigned);
        assert_eq!(
            first[0].annotations.haplotype_index,
            second[0].annotations.haplotype_index
        );
    }

    #[test]
    fn test_unalignable_read_preserved() {
        let haplotypes = vec![reference_haplotype()];
        let read = read_matching(&vec![b'T'; WINDOW.len() + 20], 0);
        let out = realigner()
            .realign(&[read.clone()], &haplotypes, WINDOW.as_bytes(), 0, None)
            .unwrap();
        assert!(out[0].annotations.unassigned);
        assert_eq!(out[0].read, read);
    }

    #[test]
    fn test_paired_reads_share_haplotype() {
        let haplotypes = vec![reference_haplotype(), deletion_haplotype()];
        let hap = deletion_haplotype();
        // Two mates of one template; the second is short and on its own
        // would tie between haplotypes.
        let informative = read_matching(&hap.sequence()[4..24], 4);
        let mut short = read_matching(&WINDOW.as_bytes()[0..8], 0);
        short = AlignedRead::new(
            informative.name(),
            short.region().clone(),
            short.sequence().to_vec(),
            short.qualities().to_vec(),
            short.cigar().clone(),
            60,
            ReadFlags::default(),
            None,
        )
        .unwrap();

        let realigner = ReadRealigner::new(
            HaplotypeLikelihoodModel {
                use_mapping_quality: false,
                ..HaplotypeLikelihoodModel::default()
            },
            TemplateLinkage::Paired,
            42,
        );
        let out = realigner
            .realign(
                &[informative, short],
                &haplotypes,
                WINDOW.as_bytes(),
                0,
                None,
            )
            .unwrap();
        assert_eq!(out[0].annotations.haplotype_index, Some(1));
        assert_eq!(out[1].annotations.haplotype_index, Some(1));
    }

    #[test]
    fn test_md_string_forms() {
        let cigar: Cigar = "4M".parse().unwrap();
        assert_eq!(md_string(&cigar, b"ACGT", b"ACGT"), "4");
        assert_eq!(md_string(&cigar, b"ACCT", b"ACGT"), "2G1");

        let cigar: Cigar = "2M2D2M".parse().unwrap();
        assert_eq!(md_string(&cigar, b"ACGT", b"ACTTGT"), "2^TT2");
    }
}
