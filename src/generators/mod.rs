//! # Candidate Variant Generation
//!
//! Orchestrates the candidate sources over each active region: the CIGAR
//! scanner (always on by default), the repeat scanner, the local
//! reassembler (gated by the active-region trigger), and external VCF
//! candidates. Produces a normalized, deduplicated, sorted candidate set.

pub mod assembler;
pub mod cigar_scanner;
pub mod repeat_scanner;

pub use assembler::{BubbleScoreSetter, LocalReassembler};
pub use cigar_scanner::{CandidateObservation, CigarScanner, ScanResult};
pub use repeat_scanner::RepeatScanner;

use std::collections::BTreeMap;

use tracing::debug;

use crate::data::read::AlignedRead;
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::Result;
use crate::io::vcf::VcfExtractor;

/// Candidate admission rules, computed from pileup support.
#[derive(Clone, Debug)]
pub enum InclusionPredicate {
    /// Depth-dependent support threshold for germline calling
    Germline,
    /// Germline rule plus a minimum VAF, with the normal sample (when
    /// present) restricted to background noise
    Somatic { min_vaf: f64 },
    /// Rare alleles at any non-zero fraction
    SingleCell,
    /// A constant read-count floor
    SimpleThreshold { min_support: u32 },
}

impl InclusionPredicate {
    /// Whether an observation is admitted. `normal_fraction` is the allele
    /// fraction of the same candidate in the normal sample, when a normal
    /// is configured and covers the site.
    pub fn admits(&self, observation: &CandidateObservation, normal_fraction: Option<f64>) -> bool {
        match self {
            Self::Germline => Self::germline_sufficient(observation),
            Self::Somatic { min_vaf } => {
                if !Self::germline_sufficient(observation) {
                    return false;
                }
                if observation.allele_fraction() < *min_vaf {
                    return false;
                }
                match normal_fraction {
                    // Noise floor: half the somatic threshold.
                    Some(fraction) => fraction <= (min_vaf / 2.0).max(0.01),
                    None => true,
                }
            }
            Self::SingleCell => observation.support > 0,
            Self::SimpleThreshold { min_support } => observation.support >= *min_support,
        }
    }

    /// Base-quality-adjusted support against a depth-dependent floor: at
    /// least two confident reads, and at least 1% of the local depth.
    fn germline_sufficient(observation: &CandidateObservation) -> bool {
        let quality_factor = (observation.mean_base_quality() / 30.0).min(1.0);
        let adjusted = observation.support as f64 * quality_factor;
        let depth_floor = (observation.depth as f64 * 0.01).ceil();
        adjusted >= 2.0f64.max(depth_floor)
    }
}

/// The assembly trigger for the active-region policy.
#[derive(Clone, Copy, Debug)]
pub struct ActiveRegionPolicy {
    /// Approximate allele fraction at which a window becomes
    /// assembly-worthy
    pub trigger_frequency: f64,
    /// Assemble every window regardless of the trigger
    pub assemble_all: bool,
}

impl ActiveRegionPolicy {
    /// The mode-dependent trigger: cancer and polyclone use their minimum
    /// somatic/clone VAF; other modes use 0.1 below tetraploidy and 0.05
    /// otherwise.
    pub fn trigger_for(min_mode_vaf: Option<f64>, organism_ploidy: u32) -> f64 {
        match min_mode_vaf {
            Some(vaf) => vaf,
            None if organism_ploidy < 4 => 0.1,
            None => 0.05,
        }
    }

    pub fn is_assembly_worthy(&self, scan: &ScanResult) -> bool {
        self.assemble_all || scan.max_allele_fraction >= self.trigger_frequency
    }
}

/// The configured candidate generator for one run.
#[derive(Clone)]
pub struct VariantGenerator {
    pub scanner: Option<CigarScanner>,
    pub repeat_scanner: Option<RepeatScanner>,
    pub reassembler: Option<LocalReassembler>,
    pub extractors: Vec<VcfExtractor>,
    pub inclusion: InclusionPredicate,
    pub policy: ActiveRegionPolicy,
    pub max_variant_size: usize,
    /// The normal sample, for somatic noise gating
    pub normal_sample: Option<String>,
}

impl Default for VariantGenerator {
    fn default() -> Self {
        Self {
            scanner: Some(CigarScanner::default()),
            repeat_scanner: None,
            reassembler: None,
            extractors: Vec::new(),
            inclusion: InclusionPredicate::Germline,
            policy: ActiveRegionPolicy {
                trigger_frequency: 0.1,
                assemble_all: false,
            },
            max_variant_size: 2000,
            normal_sample: None,
        }
    }
}

impl VariantGenerator {
    /// Generate the candidate set for an active region.
    ///
    /// `reference_window` holds reference bases for `region`; `reads` maps
    /// each sample to its piped reads over the region.
    pub fn generate(
        &mut self,
        region: &GenomicRegion,
        reference_window: &[u8],
        reads: &BTreeMap<String, Vec<AlignedRead>>,
    ) -> Result<Vec<Variant>> {
        let mut candidates: Vec<Variant> = Vec::new();
        let mut scan: Option<ScanResult> = None;

        if let Some(scanner) = &self.scanner {
            // Pool every non-normal sample for discovery.
            let pooled: Vec<AlignedRead> = reads
                .iter()
                .filter(|(sample, _)| Some(sample.as_str()) != self.normal_sample.as_deref())
                .flat_map(|(_, reads)| reads.iter().cloned())
                .collect();
            let result = scanner.scan(&pooled, region, reference_window)?;

            // The normal sample's fractions, for the somatic predicate.
            let normal_scan = match (&self.normal_sample, &self.inclusion) {
                (Some(normal), InclusionPredicate::Somatic { .. }) => reads
                    .get(normal)
                    .map(|normal_reads| scanner.scan(normal_reads, region, reference_window))
                    .transpose()?,
                _ => None,
            };

            for observation in &result.candidates {
                let normal_fraction = normal_scan.as_ref().map(|ns| {
                    ns.candidates
                        .iter()
                        .find(|c| c.variant == observation.variant)
                        .map(|c| c.allele_fraction())
                        .unwrap_or(0.0)
                });
                if self.inclusion.admits(observation, normal_fraction) {
                    candidates.push(observation.variant.clone());
                }
            }
            scan = Some(result);
        }

        if let Some(repeat_scanner) = &self.repeat_scanner {
            candidates.extend(repeat_scanner.candidates(region, reference_window)?);
        }

        if let Some(reassembler) = &self.reassembler {
            let worthy = scan
                .as_ref()
                .map(|s| self.policy.is_assembly_worthy(s))
                .unwrap_or(self.policy.assemble_all);
            if worthy {
                let pooled: Vec<AlignedRead> = reads
                    .values()
                    .flat_map(|reads| reads.iter().cloned())
                    .collect();
                let assembled = reassembler.assemble(region, reference_window, &pooled)?;
                debug!(region = %region, n = assembled.len(), "assembly candidates");
                candidates.extend(assembled);
            }
        }

        for extractor in &mut self.extractors {
            candidates.extend(extractor.variants_in(region));
        }

        self.finalize(region, reference_window, candidates)
    }

    /// Normalize, clip to the region, enforce the size cap, deduplicate by
    /// the match predicate (identical normalized region and sequences), and
    /// sort.
    fn finalize(
        &self,
        region: &GenomicRegion,
        reference_window: &[u8],
        candidates: Vec<Variant>,
    ) -> Result<Vec<Variant>> {
        let mut out: Vec<Variant> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.size() > self.max_variant_size {
                continue;
            }
            if !region.contains(candidate.region()) {
                continue;
            }
            let normalized = candidate.normalize(reference_window, region.begin())?;
            if region.contains(normalized.region()) {
                out.push(normalized);
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read::{Cigar, ReadFlags};

    fn read(begin: u32, seq: &str) -> AlignedRead {
        let cigar: Cigar = format!("{}M", seq.len()).parse().unwrap();
        AlignedRead::new(
            format!("r{}-{}", begin, seq),
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

    const REF: &str = "ACGTACGTAC";

    fn reads_map(sample: &str, reads: Vec<AlignedRead>) -> BTreeMap<String, Vec<AlignedRead>> {
        let mut map = BTreeMap::new();
        map.insert(sample.to_string(), reads);
        map
    }

    #[test]
    fn test_germline_inclusion() {
        let region = GenomicRegion::new("chr1", 0, 10);
        let mut generator = VariantGenerator::default();
        // Three alt reads out of four: admitted.
        let mut reads = vec![read(0, "ACCTACGTAC"); 3];
        reads.push(read(0, REF));
        let candidates = generator
            .generate(&region, REF.as_bytes(), &reads_map("S1", reads))
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_snv());

        // A single supporting read: rejected by the depth floor.
        let mut reads = vec![read(0, "ACCTACGTAC")];
        reads.push(read(0, REF));
        let candidates = generator
            .generate(&region, REF.as_bytes(), &reads_map("S1", reads))
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_simple_threshold_inclusion() {
        let region = GenomicRegion::new("chr1", 0, 10);
        let mut generator = VariantGenerator {
            inclusion: InclusionPredicate::SimpleThreshold { min_support: 1 },
            ..VariantGenerator::default()
        };
        let reads = vec![read(0, "ACCTACGTAC"), read(0, REF)];
        let candidates = generator
            .generate(&region, REF.as_bytes(), &reads_map("S1", reads))
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_somatic_normal_noise_gate() {
        let region = GenomicRegion::new("chr1", 0, 10);
        let mut generator = VariantGenerator {
            inclusion: InclusionPredicate::Somatic { min_vaf: 0.1 },
            normal_sample: Some("NORMAL".to_string()),
            ..VariantGenerator::default()
        };

        let tumour: Vec<AlignedRead> = (0..10)
            .map(|i| {
                if i < 3 {
                    read(0, "ACCTACGTAC")
                } else {
                    read(0, REF)
                }
            })
            .collect();
        // Clean normal: candidate admitted.
        let mut reads = reads_map("TUMOUR", tumour.clone());
        reads.insert("NORMAL".to_string(), vec![read(0, REF); 10]);
        let candidates = generator
            .generate(&region, REF.as_bytes(), &reads)
            .unwrap();
        assert_eq!(candidates.len(), 1);

        // Contaminated normal: candidate rejected.
        let mut contaminated: Vec<AlignedRead> = vec![read(0, "ACCTACGTAC"); 5];
        contaminated.extend(vec![read(0, REF); 5]);
        let mut reads = reads_map("TUMOUR", tumour);
        reads.insert("NORMAL".to_string(), contaminated);
        let candidates = generator
            .generate(&region, REF.as_bytes(), &reads)
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_dedup_across_sources() {
        // The scanner and the repeat scanner can propose the same deletion;
        // it must come out once.
        let window = "ACAAAAAAAAGT";
        let region = GenomicRegion::new("chr1", 0, window.len() as u32);
        let mut generator = VariantGenerator {
            repeat_scanner: Some(RepeatScanner::default()),
            inclusion: InclusionPredicate::SimpleThreshold { min_support: 1 },
            ..VariantGenerator::default()
        };
        // Reads with one A deleted.
        let del_read = {
            let cigar: Cigar = "2M1D9M".parse().unwrap();
            AlignedRead::new(
                "rdel",
                GenomicRegion::new("chr1", 0, 12),
                b"ACAAAAAAAGT".to_vec(),
                vec![30; 11],
                cigar,
                60,
                ReadFlags::default(),
                None,
            )
            .unwrap()
        };
        let candidates = generator
            .generate(
                &region,
                window.as_bytes(),
                &reads_map("S1", vec![del_read.clone(), del_read]),
            )
            .unwrap();
        let deletions: Vec<_> = candidates.iter().filter(|v| v.is_deletion()).collect();
        assert_eq!(deletions.len(), 1);
        // Normalized to the leftmost anchored position.
        assert_eq!(deletions[0].region().begin(), 1);
    }

    #[test]
    fn test_trigger_frequency_rules() {
        assert_eq!(ActiveRegionPolicy::trigger_for(Some(0.03), 2), 0.03);
        assert_eq!(ActiveRegionPolicy::trigger_for(None, 2), 0.1);
        assert_eq!(ActiveRegionPolicy::trigger_for(None, 4), 0.05);
    }
}
