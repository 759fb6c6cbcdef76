//! # Calling Pipeline
//!
//! Per-contig orchestration: streams each search region through the read
//! pipe, generates candidates and haplotype windows, evaluates likelihoods,
//! invokes the configured caller, phases across windows, and collects calls
//! in emission order. Contigs run data-parallel on the worker pool; windows
//! within a contig are sequential because lagging carries state forward.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::callers::Caller;
use crate::data::calls::VariantCall;
use crate::data::read::AlignedRead;
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};
use crate::generators::VariantGenerator;
use crate::haplogen::HaplotypeGenerator;
use crate::io::reads::ReadManager;
use crate::io::reference::ReferenceGenome;
use crate::io::vcf::VcfWriter;
use crate::model::likelihood::{HaplotypeLikelihoodModel, LikelihoodMatrix};
use crate::phaser::{PhaseSetState, Phaser};
use crate::pipelines::profile::DataProfile;
use crate::readpipe::ReadPipe;
use crate::realign::{ReadRealigner, RealignedRead};
use crate::utils::advisory::{Advisory, AdvisoryChannel};
use crate::utils::threading::build_thread_pool;

/// Cross-contig emission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContigOutputOrder {
    LexicographicAscending,
    LexicographicDescending,
    ContigSizeAscending,
    ContigSizeDescending,
    AsInReferenceIndex,
    AsInReferenceIndexReversed,
}

impl ContigOutputOrder {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lexicographical-ascending" | "lex-ascending" => Ok(Self::LexicographicAscending),
            "lexicographical-descending" | "lex-descending" => Ok(Self::LexicographicDescending),
            "contig-size-ascending" => Ok(Self::ContigSizeAscending),
            "contig-size-descending" => Ok(Self::ContigSizeDescending),
            "as-in-reference" => Ok(Self::AsInReferenceIndex),
            "as-in-reference-reversed" => Ok(Self::AsInReferenceIndexReversed),
            other => Err(NautilusError::config(format!(
                "unknown contig output order '{}'",
                other
            ))),
        }
    }

    /// Order contig names for emission.
    pub fn apply(self, mut contigs: Vec<String>, reference: &dyn ReferenceGenome) -> Vec<String> {
        match self {
            Self::LexicographicAscending => contigs.sort(),
            Self::LexicographicDescending => {
                contigs.sort();
                contigs.reverse();
            }
            Self::ContigSizeAscending => {
                contigs.sort_by_key(|c| (reference.contig_size(c).unwrap_or(0), c.clone()));
            }
            Self::ContigSizeDescending => {
                contigs.sort_by_key(|c| (reference.contig_size(c).unwrap_or(0), c.clone()));
                contigs.reverse();
            }
            Self::AsInReferenceIndex | Self::AsInReferenceIndexReversed => {
                let index: BTreeMap<String, usize> = reference
                    .contig_names()
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| (name, i))
                    .collect();
                contigs.sort_by_key(|c| index.get(c).copied().unwrap_or(usize::MAX));
                if self == Self::AsInReferenceIndexReversed {
                    contigs.reverse();
                }
            }
        }
        contigs
    }
}

/// The assembled engine for one run.
pub struct CallingComponents {
    pub reference: Arc<dyn ReferenceGenome>,
    pub read_manager: Arc<ReadManager>,
    pub read_pipe: ReadPipe,
    pub generator: VariantGenerator,
    pub haplotype_generator: HaplotypeGenerator,
    pub likelihood_model: HaplotypeLikelihoodModel,
    pub caller: Arc<dyn Caller>,
    pub phaser: Phaser,
    pub realigner: Option<ReadRealigner>,
}

pub struct CallingPipeline {
    pub components: CallingComponents,
    pub samples: Vec<String>,
    pub contig_order: ContigOutputOrder,
    pub threads: usize,
    pub cancellation: Arc<AtomicBool>,
    pub advisories: AdvisoryChannel,
    pub collect_profile: bool,
}

/// One contig's results, already in within-contig order.
#[derive(Debug, Default)]
pub struct ContigOutput {
    pub contig: String,
    pub calls: Vec<VariantCall>,
    pub realigned: Vec<RealignedRead>,
    pub profile: DataProfile,
}

#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Contig outputs in the configured emission order
    pub contigs: Vec<ContigOutput>,
    pub cancelled: bool,
}

impl PipelineOutput {
    pub fn all_calls(&self) -> impl Iterator<Item = &VariantCall> {
        self.contigs.iter().flat_map(|c| c.calls.iter())
    }
}

impl CallingPipeline {
    /// Run the engine over the resolved search regions.
    pub fn run(&self, search: &BTreeMap<String, Vec<GenomicRegion>>) -> Result<PipelineOutput> {
        let contigs = self.contig_order.apply(
            search.keys().cloned().collect(),
            self.components.reference.as_ref(),
        );
        info!(n_contigs = contigs.len(), "starting calling pipeline");

        let pool = build_thread_pool(self.threads.max(1))?;
        let results: Result<Vec<ContigOutput>> = pool.install(|| {
            contigs
                .par_iter()
                .map(|contig| {
                    if self.cancellation.load(Ordering::Relaxed) {
                        return Ok(ContigOutput {
                            contig: contig.clone(),
                            ..ContigOutput::default()
                        });
                    }
                    self.call_contig(contig, &search[contig])
                })
                .collect()
        });

        Ok(PipelineOutput {
            contigs: results?,
            cancelled: self.cancellation.load(Ordering::Relaxed),
        })
    }

    /// Sequential window walk over one contig.
    fn call_contig(&self, contig: &str, regions: &[GenomicRegion]) -> Result<ContigOutput> {
        let mut output = ContigOutput {
            contig: contig.to_string(),
            ..ContigOutput::default()
        };
        let contig_size = self
            .components
            .reference
            .contig_size(contig)
            .ok_or_else(|| NautilusError::UnmatchedReference {
                contig: contig.to_string(),
            })?;
        let flank = self.components.haplotype_generator.config.flank_pad();

        for region in regions {
            if self.cancellation.load(Ordering::Relaxed) {
                break;
            }
            self.call_search_region(region, contig_size, flank, &mut output)?;
        }

        // Within-contig emission order is non-decreasing by construction;
        // holdout sub-windows can interleave, so make it explicit.
        output
            .calls
            .sort_by(|a, b| a.variant.region().cmp(b.variant.region()));
        Ok(output)
    }

    fn call_search_region(
        &self,
        region: &GenomicRegion,
        contig_size: u32,
        flank: u32,
        output: &mut ContigOutput,
    ) -> Result<()> {
        let components = &self.components;
        let fetch_region = GenomicRegion::new(
            region.contig_arc(),
            region.begin().saturating_sub(flank),
            (region.end() + flank).min(contig_size),
        );

        // Reads per sample over the padded search region.
        let mut reads: BTreeMap<String, Vec<AlignedRead>> = BTreeMap::new();
        for sample in &self.samples {
            let sample_reads = components.read_pipe.fetch(
                &components.read_manager,
                sample,
                &fetch_region,
                &self.advisories,
            )?;
            if self.collect_profile {
                output.profile.sample(&sample_reads, region);
            }
            reads.insert(sample.clone(), sample_reads);
        }

        // Candidates over the padded region, clipped to the search region
        // so adjacent regions never call the same site twice.
        let window_bytes = components.reference.fetch(&fetch_region)?;
        let mut generator = components.generator.clone();
        let mut candidates =
            generator.generate(&fetch_region, &window_bytes, &reads)?;
        candidates.retain(|v| {
            v.region().begin() >= region.begin() && v.region().begin() < region.end()
        });
        debug!(region = %region, n = candidates.len(), "candidates");
        if candidates.is_empty() {
            return Ok(());
        }

        // Window queue; holdout sub-windows are re-introduced at the front.
        let mut queue: VecDeque<(Vec<Variant>, usize)> = components
            .haplotype_generator
            .plan_windows(&candidates)
            .into_iter()
            .map(|window| (window, 0usize))
            .collect();

        let mut phase_state: Option<PhaseSetState> = None;
        let mut indicators: Vec<Variant> = Vec::new();
        let max_holdout_depth = components.haplotype_generator.config.max_holdout_depth;

        while let Some((window, depth)) = queue.pop_front() {
            if self.cancellation.load(Ordering::Relaxed) {
                return Ok(());
            }
            let reference = Arc::clone(&components.reference);
            let set = components.haplotype_generator.generate(
                &window,
                &indicators,
                |r| reference.fetch(r),
                contig_size,
            )?;

            if !set.holdouts.is_empty() {
                if depth < max_holdout_depth {
                    for sub_window in components
                        .haplotype_generator
                        .plan_windows(&set.holdouts)
                        .into_iter()
                        .rev()
                    {
                        queue.push_front((sub_window, depth + 1));
                    }
                } else {
                    warn!(region = %set.evaluation_region, "holdout depth exhausted");
                    self.advisories.report(Advisory::HaplotypeOverflow);
                }
            }
            if set.overflowed {
                self.advisories.report(Advisory::HaplotypeOverflow);
                indicators.clear();
                continue;
            }

            // Likelihoods over reads clipped to the evaluation window.
            let mut window_reads: BTreeMap<String, Vec<AlignedRead>> = BTreeMap::new();
            let mut likelihoods: BTreeMap<String, LikelihoodMatrix> = BTreeMap::new();
            for (sample, sample_reads) in &reads {
                let clipped: Vec<AlignedRead> = sample_reads
                    .iter()
                    .filter(|r| r.region().overlaps(&set.evaluation_region))
                    .cloned()
                    .collect();
                likelihoods.insert(
                    sample.clone(),
                    LikelihoodMatrix::compute(
                        &components.likelihood_model,
                        &set.haplotypes,
                        &clipped,
                    ),
                );
                window_reads.insert(sample.clone(), clipped);
            }

            let context = crate::callers::CallerContext {
                haplotypes: &set.haplotypes,
                reads: &window_reads,
                likelihoods: &likelihoods,
                region: &set.evaluation_region,
            };
            let latents = components.caller.infer_latents(&context)?;
            let mut calls = components
                .caller
                .call_variants(&window, latents.as_ref(), &context)?;

            phase_state = components.phaser.phase(
                phase_state,
                &mut calls,
                latents.genotype_posteriors(),
                !indicators.is_empty(),
            );

            if let Some(realigner) = &components.realigner {
                let phase_region = phase_state.as_ref().map(|s| &s.region);
                let eval_window = components.reference.fetch(&set.evaluation_region)?;
                let pooled: Vec<AlignedRead> = window_reads
                    .values()
                    .flat_map(|rs| rs.iter().cloned())
                    .collect();
                let realigned = realigner.realign(
                    &pooled,
                    &set.haplotypes,
                    &eval_window,
                    set.evaluation_region.begin(),
                    phase_region,
                )?;
                output.realigned.extend(realigned);
            }

            output.calls.extend(calls);
            indicators = components.haplotype_generator.indicators(&window);
        }
        Ok(())
    }

    /// Run and stream the output through the staging writer into the final
    /// VCF, in the configured contig order.
    #[allow(clippy::too_many_arguments)]
    pub fn run_and_emit(
        &self,
        search: &BTreeMap<String, Vec<GenomicRegion>>,
        staging_dir: &Path,
        output_path: &Path,
        reference_id: &str,
        sites_only: bool,
        somatic: bool,
        denovo: bool,
    ) -> Result<PipelineOutput> {
        let output = self.run(search)?;

        let contigs: Vec<(String, u32)> = self
            .components
            .reference
            .contig_names()
            .into_iter()
            .map(|name| {
                let size = self.components.reference.contig_size(&name).unwrap_or(0);
                (name, size)
            })
            .collect();

        let staging_path = staging_dir.join(
            output_path
                .file_name()
                .ok_or_else(|| NautilusError::config("output path has no file name"))?,
        );
        let mut writer = VcfWriter::create(
            &staging_path,
            reference_id,
            &contigs,
            &self.samples,
            sites_only,
            somatic,
            denovo,
        )?;
        for contig in &output.contigs {
            for call in &contig.calls {
                writer.write_call(call)?;
            }
        }
        writer.finish()?;
        std::fs::copy(&staging_path, output_path).map_err(|e| {
            NautilusError::system(
                "output",
                format!(
                    "could not move staged output to {}: {}",
                    output_path.display(),
                    e
                ),
                "check the --output path is writable",
            )
        })?;
        info!(output = %output_path.display(), "wrote calls");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::reference::InMemoryReference;

    fn reference() -> Arc<InMemoryReference> {
        Arc::new(InMemoryReference::new(vec![
            ("chr1".to_string(), vec![b'A'; 500]),
            ("chr2".to_string(), vec![b'C'; 1000]),
            ("chr10".to_string(), vec![b'G'; 200]),
        ]))
    }

    #[test]
    fn test_contig_order_variants() {
        let r = reference();
        let names = vec![
            "chr2".to_string(),
            "chr10".to_string(),
            "chr1".to_string(),
        ];

        assert_eq!(
            ContigOutputOrder::LexicographicAscending.apply(names.clone(), r.as_ref()),
            vec!["chr1", "chr10", "chr2"]
        );
        assert_eq!(
            ContigOutputOrder::ContigSizeAscending.apply(names.clone(), r.as_ref()),
            vec!["chr10", "chr1", "chr2"]
        );
        assert_eq!(
            ContigOutputOrder::AsInReferenceIndex.apply(names.clone(), r.as_ref()),
            vec!["chr1", "chr2", "chr10"]
        );
        // The reversed reference order is a true reverse.
        assert_eq!(
            ContigOutputOrder::AsInReferenceIndexReversed.apply(names, r.as_ref()),
            vec!["chr10", "chr2", "chr1"]
        );
    }

    #[test]
    fn test_order_parse() {
        assert_eq!(
            ContigOutputOrder::parse("contig-size-descending").unwrap(),
            ContigOutputOrder::ContigSizeDescending
        );
        assert!(ContigOutputOrder::parse("random").is_err());
    }
}
