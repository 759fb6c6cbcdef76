//! # Local Reassembler
//!
//! De-novo candidate discovery over a colored de Bruijn graph. The
//! reference path and read observations share one graph; paths that diverge
//! from and re-merge with the reference path (bubbles) are aligned back to
//! the reference to produce candidate variants.
//!
//! Multiple k-mer sizes run in cascade: when a k produces an ambiguous
//! reference path or an over-budget bubble set, the next fallback size is
//! tried.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::align::{align, AlignmentModel};
use crate::data::read::{AlignedRead, CigarOpKind};
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::Result;

/// How bubbles are scored before the `min_bubble_score` gate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BubbleScoreSetter {
    /// Mean alt-path k-mer depth
    Depth,
    /// Depth damped by the expected reference allele fraction; bubbles in
    /// high-depth reference context need proportionally more support
    DepthWithReferenceFraction { reference_allele_fraction: f64 },
}

impl BubbleScoreSetter {
    fn score(&self, alt_mean_depth: f64, ref_mean_depth: f64) -> f64 {
        match self {
            Self::Depth => alt_mean_depth,
            Self::DepthWithReferenceFraction {
                reference_allele_fraction,
            } => {
                let weighted_ref = reference_allele_fraction * ref_mean_depth.max(1.0);
                alt_mean_depth * (alt_mean_depth / (alt_mean_depth + weighted_ref))
            }
        }
    }
}

/// Reassembler parameters.
#[derive(Clone, Debug)]
pub struct LocalReassembler {
    /// Primary k plus fallbacks, tried in order
    pub kmer_sizes: Vec<usize>,
    /// Active regions are subdivided into bins of this many bases
    pub bin_size: u32,
    pub bin_overlap: u32,
    /// Read bases below this quality are masked before k-mer extraction
    pub mask_threshold: u8,
    /// Vertices with fewer observations are pruned (reference excluded)
    pub min_kmer_observations: u32,
    pub min_bubble_score: f64,
    pub max_bubbles: usize,
    pub max_variant_size: usize,
    pub score_setter: BubbleScoreSetter,
}

impl Default for LocalReassembler {
    fn default() -> Self {
        Self {
            kmer_sizes: default_kmer_sizes(10, 2, 10),
            bin_size: 1000,
            bin_overlap: 200,
            mask_threshold: 10,
            min_kmer_observations: 2,
            min_bubble_score: 2.0,
            max_bubbles: 30,
            max_variant_size: 2000,
            score_setter: BubbleScoreSetter::Depth,
        }
    }
}

/// Expand a primary k into the fallback cascade.
pub fn default_kmer_sizes(primary: usize, num_fallbacks: usize, interval: usize) -> Vec<usize> {
    let mut sizes = vec![primary];
    for i in 1..=num_fallbacks {
        sizes.push(primary + i * interval);
    }
    sizes
}

struct VertexData {
    observations: u32,
    is_reference: bool,
    /// Position on the reference path (first occurrence)
    ref_index: Option<usize>,
    /// Out-edges: next base -> observation count
    out: FxHashMap<u8, u32>,
}

struct DeBruijnGraph {
    vertices: FxHashMap<Vec<u8>, VertexData>,
    ref_path: Vec<Vec<u8>>,
}

enum GraphBuild {
    Ok(DeBruijnGraph),
    /// The reference path repeats a k-mer; a larger k is needed
    AmbiguousReference,
}

struct Bubble {
    /// Reference path index where the bubble diverges
    from: usize,
    /// Reference path index where it re-merges
    to: usize,
    alt_sequence: Vec<u8>,
    score: f64,
}

impl DeBruijnGraph {
    fn build(k: usize, reference: &[u8], reads: &[&AlignedRead], mask_threshold: u8) -> GraphBuild {
        let mut graph = DeBruijnGraph {
            vertices: FxHashMap::default(),
            ref_path: Vec::new(),
        };
        if reference.len() < k {
            return GraphBuild::AmbiguousReference;
        }

        // Reference path
        let mut seen: FxHashSet<&[u8]> = FxHashSet::default();
        for (index, kmer) in reference.windows(k).enumerate() {
            if kmer.iter().any(|&b| b == b'N') {
                return GraphBuild::AmbiguousReference;
            }
            if !seen.insert(kmer) {
                return GraphBuild::AmbiguousReference;
            }
            let entry = graph
                .vertices
                .entry(kmer.to_vec())
                .or_insert_with(|| VertexData {
                    observations: 0,
                    is_reference: true,
                    ref_index: None,
                    out: FxHashMap::default(),
                });
            entry.is_reference = true;
            entry.ref_index = Some(index);
            graph.ref_path.push(kmer.to_vec());
            if index + k < reference.len() {
                *entry.out.entry(reference[index + k]).or_insert(0) += 0;
            }
        }

        // Read paths, with low-quality bases masked
        let mut masked: Vec<u8> = Vec::new();
        for read in reads {
            masked.clear();
            masked.extend(
                read.sequence()
                    .iter()
                    .zip(read.qualities())
                    .map(|(&b, &q)| if q < mask_threshold { b'N' } else { b }),
            );
            if masked.len() < k {
                continue;
            }
            for i in 0..=masked.len() - k {
                let kmer = &masked[i..i + k];
                if kmer.iter().any(|&b| b == b'N') {
                    continue;
                }
                let entry = graph
                    .vertices
                    .entry(kmer.to_vec())
                    .or_insert_with(|| VertexData {
                        observations: 0,
                        is_reference: false,
                        ref_index: None,
                        out: FxHashMap::default(),
                    });
                entry.observations += 1;
                if i + k < masked.len() && masked[i + k] != b'N' {
                    *entry.out.entry(masked[i + k]).or_insert(0) += 1;
                }
            }
        }
        GraphBuild::Ok(graph)
    }

    /// Remove non-reference vertices below the observation floor.
    fn prune(&mut self, min_observations: u32) {
        self.vertices
            .retain(|_, v| v.is_reference || v.observations >= min_observations);
    }

    fn successor(kmer: &[u8], base: u8) -> Vec<u8> {
        let mut next = Vec::with_capacity(kmer.len());
        next.extend_from_slice(&kmer[1..]);
        next.push(base);
        next
    }

    /// Locate bubbles by walking divergent out-edges until they re-merge
    /// with the reference path. Returns `None` when a walk cycles, which
    /// signals the k fallback.
    fn find_bubbles(
        &self,
        max_path_length: usize,
        score_setter: BubbleScoreSetter,
    ) -> Option<Vec<Bubble>> {
        let mut bubbles = Vec::new();
        let ref_mean_depth = self.reference_mean_depth();

        for (from, ref_kmer) in self.ref_path.iter().enumerate() {
            let Some(vertex) = self.vertices.get(ref_kmer) else {
                continue;
            };
            let next_ref_base = self
                .ref_path
                .get(from + 1)
                .map(|next| next[next.len() - 1]);

            for (&base, &edge_count) in &vertex.out {
                if Some(base) == next_ref_base || edge_count == 0 {
                    continue;
                }
                if let Some(bubble) = self.walk_bubble(
                    from,
                    base,
                    max_path_length,
                    ref_mean_depth,
                    score_setter,
                )? {
                    bubbles.push(bubble);
                }
            }
        }
        bubbles.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.from.cmp(&b.from))
        });
        Some(bubbles)
    }

    /// One greedy walk from a divergence point. Outer `Option` is the cycle
    /// signal; inner `Option` is whether the walk closed into a bubble.
    fn walk_bubble(
        &self,
        from: usize,
        first_base: u8,
        max_path_length: usize,
        ref_mean_depth: f64,
        score_setter: BubbleScoreSetter,
    ) -> Option<Option<Bubble>> {
        let mut current = Self::successor(&self.ref_path[from], first_base);
        let mut alt_bases = vec![first_base];
        let mut depth_sum = 0.0;
        let mut steps = 0usize;
        let mut visited: FxHashSet<Vec<u8>> = FxHashSet::default();

        loop {
            let Some(vertex) = self.vertices.get(&current) else {
                return Some(None); // pruned away: dead end
            };
            if let Some(to) = vertex.ref_index {
                if to > from {
                    let alt_mean = if steps > 0 {
                        depth_sum / steps as f64
                    } else {
                        vertex.observations as f64
                    };
                    return Some(Some(Bubble {
                        from,
                        to,
                        alt_sequence: alt_bases,
                        score: score_setter.score(alt_mean, ref_mean_depth),
                    }));
                }
                return Some(None); // merged backwards: not a forward bubble
            }
            if !visited.insert(current.clone()) {
                return None; // cycle
            }
            steps += 1;
            depth_sum += vertex.observations as f64;
            if steps > max_path_length {
                return Some(None);
            }
            // Greedy: follow the best-supported out-edge.
            let Some((&base, _)) = vertex
                .out
                .iter()
                .filter(|&(_, &count)| count > 0)
                .max_by_key(|&(&base, &count)| (count, std::cmp::Reverse(base)))
            else {
                return Some(None);
            };
            alt_bases.push(base);
            current = Self::successor(&current, base);
        }
    }

    fn reference_mean_depth(&self) -> f64 {
        if self.ref_path.is_empty() {
            return 0.0;
        }
        let sum: u64 = self
            .ref_path
            .iter()
            .filter_map(|k| self.vertices.get(k))
            .map(|v| v.observations as u64)
            .sum();
        sum as f64 / self.ref_path.len() as f64
    }
}

impl LocalReassembler {
    /// Assemble candidates over `region`. `reference_window` holds the
    /// reference bases for `region`; reads should overlap the region.
    pub fn assemble(
        &self,
        region: &GenomicRegion,
        reference_window: &[u8],
        reads: &[AlignedRead],
    ) -> Result<Vec<Variant>> {
        let mut out: Vec<Variant> = Vec::new();
        let step = self.bin_size.saturating_sub(self.bin_overlap).max(1);
        let mut bin_begin = region.begin();
        while bin_begin < region.end() {
            let bin_end = (bin_begin + self.bin_size).min(region.end());
            let bin = GenomicRegion::new(region.contig_arc(), bin_begin, bin_end);
            out.extend(self.assemble_bin(&bin, region, reference_window, reads)?);
            if bin_end == region.end() {
                break;
            }
            bin_begin += step;
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn assemble_bin(
        &self,
        bin: &GenomicRegion,
        region: &GenomicRegion,
        reference_window: &[u8],
        reads: &[AlignedRead],
    ) -> Result<Vec<Variant>> {
        let bin_reads: Vec<&AlignedRead> = reads
            .iter()
            .filter(|r| r.region().overlaps(bin))
            .collect();
        if bin_reads.is_empty() {
            return Ok(Vec::new());
        }
        let bin_offset = (bin.begin() - region.begin()) as usize;
        let bin_reference =
            &reference_window[bin_offset..bin_offset + bin.len() as usize];

        for &k in &self.kmer_sizes {
            match self.try_k(k, bin, bin_reference, &bin_reads)? {
                Some(variants) => return Ok(variants),
                None => {
                    debug!(k, bin = %bin, "assembly fell back to next k-mer size");
                }
            }
        }
        Ok(Vec::new())
    }

    /// One k attempt; `None` requests the next fallback size.
    fn try_k(
        &self,
        k: usize,
        bin: &GenomicRegion,
        bin_reference: &[u8],
        reads: &[&AlignedRead],
    ) -> Result<Option<Vec<Variant>>> {
        let mut graph =
            match DeBruijnGraph::build(k, bin_reference, reads, self.mask_threshold) {
                GraphBuild::Ok(graph) => graph,
                GraphBuild::AmbiguousReference => return Ok(None),
            };
        graph.prune(self.min_kmer_observations);

        let max_path_length = bin_reference.len() + self.max_variant_size + 2 * k;
        let Some(bubbles) = graph.find_bubbles(max_path_length, self.score_setter) else {
            return Ok(None); // cyclic walk
        };
        if bubbles.len() > self.max_bubbles {
            return Ok(None);
        }

        let mut variants = Vec::new();
        for bubble in bubbles
            .into_iter()
            .filter(|b| b.score >= self.min_bubble_score)
        {
            variants.extend(self.bubble_to_variants(&bubble, k, bin, bin_reference)?);
        }
        variants.retain(|v| v.size() <= self.max_variant_size);
        Ok(Some(variants))
    }

    /// Align the bubble's alternative path to the reference span it brackets
    /// and cut the alignment into variants.
    fn bubble_to_variants(
        &self,
        bubble: &Bubble,
        k: usize,
        bin: &GenomicRegion,
        bin_reference: &[u8],
    ) -> Result<Vec<Variant>> {
        // Anchor after the shared divergence k-mer.
        let target_begin = bubble.from + k;
        let target_end = bubble.to + k;
        if target_begin > target_end || target_end > bin_reference.len() {
            return Ok(Vec::new());
        }
        let target = &bin_reference[target_begin..target_end];
        let query = &bubble.alt_sequence;

        let alignment = align(target, query, AlignmentModel::default())?;
        let mut variants = Vec::new();
        let mut ref_pos = bin.begin() + target_begin as u32;
        let mut query_pos = 0usize;
        let mut target_pos = 0usize;
        for op in alignment.cigar.ops() {
            match op.kind {
                CigarOpKind::SequenceMatch | CigarOpKind::Match => {}
                CigarOpKind::Mismatch => {
                    // Per-base SNVs, matching the pileup scanner's shape.
                    for offset in 0..op.len as usize {
                        variants.push(Variant::new(
                            GenomicRegion::new(
                                bin.contig_arc(),
                                ref_pos + offset as u32,
                                ref_pos + offset as u32 + 1,
                            ),
                            vec![target[target_pos + offset]],
                            vec![query[query_pos + offset]],
                        )?);
                    }
                }
                CigarOpKind::Insertion => {
                    variants.push(Variant::new(
                        GenomicRegion::point(bin.contig_arc(), ref_pos),
                        Vec::new(),
                        query[query_pos..query_pos + op.len as usize].to_vec(),
                    )?);
                }
                CigarOpKind::Deletion => {
                    variants.push(Variant::new(
                        GenomicRegion::new(bin.contig_arc(), ref_pos, ref_pos + op.len),
                        target[target_pos..target_pos + op.len as usize].to_vec(),
                        Vec::new(),
                    )?);
                }
                _ => {}
            }
            if op.kind.consumes_reference() {
                ref_pos += op.len;
                target_pos += op.len as usize;
            }
            if op.kind.consumes_query() {
                query_pos += op.len as usize;
            }
        }
        Ok(variants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read::{Cigar, ReadFlags};

    fn read(begin: u32, seq: &str) -> AlignedRead {
        let cigar: Cigar = format!("{}M", seq.len()).parse().unwrap();
        AlignedRead::new(
            format!("r{}-{}", begin, seq.len()),
            GenomicRegion::new("chr1", begin, begin + seq.len() as u32),
            seq.as_bytes().to_vec(),
            vec![30; seq.len()],
            cigar,
            60,
            ReadFlags::default(),
            None,
        )
        .unwrap()
    }

    fn reassembler(k: usize) -> LocalReassembler {
        LocalReassembler {
            kmer_sizes: vec![k, k + 4],
            min_kmer_observations: 1,
            min_bubble_score: 1.0,
            ..LocalReassembler::default()
        }
    }

    // A 40bp reference with all-distinct 5-mers.
    const REFERENCE: &str = "ACGGTTACGATCGATTGCAGGCTACTGAAGTCCAGTGGCA";

    #[test]
    fn test_assemble_snv_bubble() {
        let region = GenomicRegion::new("chr1", 0, REFERENCE.len() as u32);
        // Reads with a G->T substitution at position 20.
        let mut alt = REFERENCE.to_string();
        alt.replace_range(20..21, "T");
        let reads: Vec<AlignedRead> = (0..4).map(|_| read(0, &alt)).collect();

        let variants = reassembler(5)
            .assemble(&region, REFERENCE.as_bytes(), &reads)
            .unwrap();
        assert_eq!(variants.len(), 1);
        assert!(variants[0].is_snv());
        assert_eq!(variants[0].region().begin(), 20);
        assert_eq!(variants[0].ref_sequence(), &REFERENCE.as_bytes()[20..21]);
        assert_eq!(variants[0].alt_sequence(), b"T");
    }

    #[test]
    fn test_assemble_deletion_bubble() {
        let region = GenomicRegion::new("chr1", 0, REFERENCE.len() as u32);
        // Delete bases 18..21 from the read sequence.
        let mut alt = REFERENCE.to_string();
        alt.replace_range(18..21, "");
        let reads: Vec<AlignedRead> = (0..4).map(|_| read(0, &alt)).collect();

        let variants = reassembler(5)
            .assemble(&region, REFERENCE.as_bytes(), &reads)
            .unwrap();
        assert_eq!(variants.len(), 1);
        assert!(variants[0].is_deletion());
        assert_eq!(variants[0].region().len(), 3);
    }

    #[test]
    fn test_no_reads_no_variants() {
        let region = GenomicRegion::new("chr1", 0, REFERENCE.len() as u32);
        let variants = reassembler(5)
            .assemble(&region, REFERENCE.as_bytes(), &[])
            .unwrap();
        assert!(variants.is_empty());
    }

    #[test]
    fn test_reference_only_reads_no_variants() {
        let region = GenomicRegion::new("chr1", 0, REFERENCE.len() as u32);
        let reads: Vec<AlignedRead> = (0..4).map(|_| read(0, REFERENCE)).collect();
        let variants = reassembler(5)
            .assemble(&region, REFERENCE.as_bytes(), &reads)
            .unwrap();
        assert!(variants.is_empty());
    }

    #[test]
    fn test_repeat_reference_falls_back() {
        // 5-mers repeat in this reference; k=5 must be rejected and k=9
        // tried instead.
        let repeat_ref = "ACGTACGTACGTACGTAAACCCGGGTTTAAACCCGGGTTT";
        let region = GenomicRegion::new("chr1", 0, repeat_ref.len() as u32);
        let reads: Vec<AlignedRead> = (0..4).map(|_| read(0, repeat_ref)).collect();
        // No variants, but also no panic; the cascade handles the repeat.
        let variants = reassembler(5)
            .assemble(&region, repeat_ref.as_bytes(), &reads)
            .unwrap();
        assert!(variants.is_empty());
    }

    #[test]
    fn test_low_support_pruned() {
        let region = GenomicRegion::new("chr1", 0, REFERENCE.len() as u32);
        let mut alt = REFERENCE.to_string();
        alt.replace_range(20..21, "T");
        // One alt read among many reference reads, with pruning at 2.
        let mut reads: Vec<AlignedRead> = (0..6).map(|_| read(0, REFERENCE)).collect();
        reads.push(read(0, &alt));

        let mut assembler = reassembler(5);
        assembler.min_kmer_observations = 2;
        let variants = assembler
            .assemble(&region, REFERENCE.as_bytes(), &reads)
            .unwrap();
        assert!(variants.is_empty());
    }

    #[test]
    fn test_default_kmer_cascade() {
        assert_eq!(default_kmer_sizes(10, 2, 10), vec![10, 20, 30]);
    }
}
