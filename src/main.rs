//! # Application Entry Point
//!
//! Parses options, wires the engine components, runs the calling pipeline,
//! and maps errors to `(where, why, help)` renderings with sysexits-style
//! exit codes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use nautilus::callers::{
    select_caller, CallerKind, CancerCaller, CellCaller, CommonParameters, IndividualCaller,
    PolycloneCaller, PopulationCaller, RefCallType, TrioCaller,
};
use nautilus::callers::cancer::{CancerParameters, NormalContaminationRisk};
use nautilus::callers::cell::CellParameters;
use nautilus::callers::polyclone::PolycloneParameters;
use nautilus::callers::trio::TrioParameters;
use nautilus::config::Config;
use nautilus::data::pedigree::{Pedigree, Trio};
use nautilus::data::region::GenomicRegion;
use nautilus::error::{NautilusError, Result};
use nautilus::generators::{
    ActiveRegionPolicy, CigarScanner, InclusionPredicate, LocalReassembler, RepeatScanner,
    VariantGenerator,
};
use nautilus::generators::assembler::default_kmer_sizes;
use nautilus::haplogen::{
    DenseRegionTolerance, ExtensionPolicy, HaplotypeGenerator, HaplotypeGeneratorConfig,
    LaggingPolicy,
};
use nautilus::io::reads::{ReadManager, ReadSource};
use nautilus::io::reference::{CachedReference, InMemoryReference, ReferenceGenome};
use nautilus::io::regions::{load_regions_file, parse_region_specs, resolve_search_regions};
use nautilus::io::sam::SamTextSource;
use nautilus::io::vcf::VcfExtractor;
use nautilus::model::likelihood::HaplotypeLikelihoodModel;
use nautilus::model::priors::GenotypePriorModel;
use nautilus::model::SequenceErrorModel;
use nautilus::phaser::Phaser;
use nautilus::pipelines::calling::{CallingComponents, CallingPipeline, ContigOutputOrder};
use nautilus::readpipe::{
    Downsampler, ReadFilter, ReadFilterPipeline, ReadPipe, ReadTransformPipeline, ReadTransformer,
};
use nautilus::realign::{ReadRealigner, TemplateLinkage};
use nautilus::utils::advisory::{Advisory, AdvisoryChannel};
use nautilus::utils::threading::resolve_thread_count;
use nautilus::utils::workspace::TempDirGuard;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::parse_and_validate() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e.render());
            std::process::exit(e.category().exit_code());
        }
    };

    match run(config) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{}", e.render());
            std::process::exit(e.category().exit_code());
        }
    }
}

fn run(config: Config) -> Result<()> {
    let advisories = AdvisoryChannel::new();

    // Reference with the LRU cache bound.
    let fasta = std::fs::read_to_string(&config.reference)?;
    let reference: Arc<dyn ReferenceGenome> = Arc::new(CachedReference::new(
        Arc::new(InMemoryReference::from_fasta(&fasta)?),
        config.reference_cache_footprint()?,
        &advisories,
    ));

    // Read sources behind the bounded handle pool.
    let read_paths = config.read_paths(&advisories)?;
    let mut sources: Vec<Arc<dyn ReadSource>> = Vec::with_capacity(read_paths.len());
    for path in &read_paths {
        sources.push(Arc::new(SamTextSource::open(path)?));
    }
    let n_outputs = 1 + config.bamout.is_some() as usize + config.legacy as usize;
    let max_open = ReadManager::estimate_max_open_files(config.max_open_read_files, n_outputs);
    let read_manager = Arc::new(ReadManager::new(sources, max_open)?);

    // Samples, restricted when requested.
    let samples: Vec<String> = if config.samples.is_empty() {
        read_manager.samples().to_vec()
    } else {
        for sample in &config.samples {
            if !read_manager.samples().contains(sample) {
                return Err(NautilusError::user(
                    "samples",
                    format!("sample '{}' is not in any read file", sample),
                    "check --samples against the read headers",
                ));
            }
        }
        config.samples.clone()
    };

    // Search regions: requested minus skipped.
    let requested = {
        let mut regions =
            parse_region_specs(reference.as_ref(), &config.regions, config.one_based_indexing)?;
        if let Some(path) = &config.regions_file {
            regions.extend(load_regions_file(
                reference.as_ref(),
                path,
                config.one_based_indexing,
                &advisories,
            )?);
        }
        regions
    };
    let skipped = {
        let mut regions = parse_region_specs(
            reference.as_ref(),
            &config.skip_regions,
            config.one_based_indexing,
        )?;
        if let Some(path) = &config.skip_regions_file {
            regions.extend(load_regions_file(
                reference.as_ref(),
                path,
                config.one_based_indexing,
                &advisories,
            )?);
        }
        regions
    };
    let search: BTreeMap<String, Vec<GenomicRegion>> =
        resolve_search_regions(reference.as_ref(), requested, skipped);

    // Contigs without mapped reads either drop out or abort.
    let mapped = read_manager.mapped_contigs();
    let search = nautilus::io::regions::filter_unmapped_contigs(
        search,
        &mapped,
        config.ignore_unmapped_contigs,
    )?;

    // Trio and caller selection.
    let trio = resolve_trio(&config, &samples)?;
    let caller_kind = select_caller(
        config.requested_caller()?,
        &samples,
        config.normal_sample.as_deref(),
        trio.is_some(),
    )?;
    info!(caller = caller_kind.as_str(), n_samples = samples.len(), "selected caller");
    if matches!(caller_kind, CallerKind::Polyclone | CallerKind::Cell) {
        advisories.report(Advisory::ExperimentalCaller);
    }

    let ploidies = config.ploidies()?;
    let common = CommonParameters {
        ploidies: ploidies.clone(),
        prior_model: GenotypePriorModel {
            snp_heterozygosity: config.snp_heterozygosity,
            indel_heterozygosity: config.indel_heterozygosity,
            uniform: config.use_uniform_genotype_priors,
        },
        min_variant_posterior: config.min_variant_posterior,
        refcall: match config.refcall.to_ascii_lowercase().as_str() {
            "none" => RefCallType::None,
            "positional" => RefCallType::Positional,
            "blocked" => RefCallType::Blocked,
            other => {
                return Err(NautilusError::config(format!(
                    "unknown refcall type '{}'",
                    other
                )))
            }
        },
        min_refcall_posterior: config.min_refcall_posterior,
        max_genotypes: config.max_genotypes,
        max_joint_genotypes: config.max_joint_genotypes,
    };

    let caller: Arc<dyn nautilus::callers::Caller> = match caller_kind {
        CallerKind::Individual => Arc::new(IndividualCaller::new(samples[0].clone(), common.clone())),
        CallerKind::Population => {
            Arc::new(PopulationCaller::new(samples.clone(), common.clone()))
        }
        CallerKind::Trio => {
            let trio = trio.ok_or_else(|| {
                NautilusError::program("trio caller selected without a resolved trio")
            })?;
            Arc::new(TrioCaller::new(
                trio,
                common.clone(),
                TrioParameters {
                    denovo_snv_rate: config.denovo_snv_mutation_rate,
                    denovo_indel_rate: config.denovo_indel_mutation_rate,
                    min_denovo_posterior: config.min_denovo_posterior,
                    denovos_only: config.denovos_only,
                },
            ))
        }
        CallerKind::Cancer => Arc::new(CancerCaller::new(
            samples.clone(),
            common.clone(),
            CancerParameters {
                normal_sample: config.normal_sample.clone(),
                max_somatic_haplotypes: config.max_somatic_haplotypes,
                somatic_snv_rate: config.somatic_snv_mutation_rate,
                somatic_indel_rate: config.somatic_indel_mutation_rate,
                min_expected_vaf: config.min_expected_somatic_frequency,
                credible_mass: config.credible_mass,
                min_credible_vaf: config.min_credible_somatic_frequency,
                min_somatic_posterior: config.min_somatic_posterior,
                tumour_germline_concentration: config.tumour_germline_concentration,
                normal_contamination_risk: match config
                    .normal_contamination_risk
                    .to_ascii_lowercase()
                    .as_str()
                {
                    "high" => NormalContaminationRisk::High,
                    _ => NormalContaminationRisk::Low,
                },
                somatics_only: config.somatics_only,
            },
        )),
        CallerKind::Polyclone => Arc::new(PolycloneCaller::new(
            samples[0].clone(),
            common.clone(),
            PolycloneParameters {
                max_clones: config.max_clones,
                min_clone_frequency: config.min_clone_frequency,
            },
        )),
        CallerKind::Cell => Arc::new(CellCaller::new(
            samples.clone(),
            common.clone(),
            CellParameters {
                dropout_concentration: config.dropout_concentration,
            },
        )),
    };

    // Candidate generation.
    let min_mode_vaf = match caller_kind {
        CallerKind::Cancer => Some(config.min_expected_somatic_frequency),
        CallerKind::Polyclone => Some(config.min_clone_frequency),
        _ => None,
    };
    let inclusion = if let Some(min_support) = config.min_supporting_reads {
        InclusionPredicate::SimpleThreshold { min_support }
    } else {
        match caller_kind {
            CallerKind::Cancer => InclusionPredicate::Somatic {
                min_vaf: config.min_expected_somatic_frequency,
            },
            CallerKind::Polyclone => InclusionPredicate::Somatic {
                min_vaf: config.min_clone_frequency,
            },
            CallerKind::Cell => InclusionPredicate::SingleCell,
            _ => InclusionPredicate::Germline,
        }
    };
    let mut extractors = Vec::new();
    for path in config.source_candidate_paths(&advisories)? {
        extractors.push(VcfExtractor::open(
            &path,
            config.max_variant_size,
            config.min_source_candidate_quality,
            config.use_filtered_source_candidates,
        )?);
    }
    let generator = VariantGenerator {
        scanner: (config.raw_cigar_candidate_generator && !config.regenotype)
            .then(|| CigarScanner {
                min_base_quality: 10,
                max_variant_size: config.max_variant_size,
            }),
        repeat_scanner: (config.repeat_candidate_generator && !config.regenotype)
            .then(RepeatScanner::default),
        reassembler: (config.assembly_candidate_generator && !config.regenotype).then(|| {
            let primary = config.kmer_sizes.first().copied().unwrap_or(10);
            LocalReassembler {
                kmer_sizes: default_kmer_sizes(
                    primary,
                    config.num_fallback_kmers,
                    config.fallback_kmer_gap,
                ),
                bin_size: config.max_region_to_assemble,
                bin_overlap: config
                    .max_assemble_region_overlap
                    .min(config.max_region_to_assemble.saturating_sub(1)),
                min_kmer_observations: config.min_kmer_prune,
                min_bubble_score: config.min_bubble_score,
                max_bubbles: config.max_bubbles,
                max_variant_size: config.max_variant_size,
                ..LocalReassembler::default()
            }
        }),
        extractors,
        inclusion,
        policy: ActiveRegionPolicy {
            trigger_frequency: ActiveRegionPolicy::trigger_for(
                min_mode_vaf,
                config.organism_ploidy,
            ),
            assemble_all: config.assemble_all,
        },
        max_variant_size: config.max_variant_size,
        normal_sample: config.normal_sample.clone(),
    };

    // Haplotype generation, with the fast modes trading lagging away.
    let mut lagging = parse_lagging(&config.lagging_level)?;
    if config.very_fast {
        lagging = LaggingPolicy::None;
    } else if config.fast {
        lagging = LaggingPolicy::Conservative;
    }
    let haplotype_generator = HaplotypeGenerator::new(HaplotypeGeneratorConfig {
        extension: parse_extension(&config.extension_level)?,
        lagging,
        target_limit: config.max_haplotypes,
        holdout_limit: config.haplotype_holdout_threshold,
        overflow_limit: config.haplotype_overflow,
        max_holdout_depth: config.max_holdout_depth,
        pad_requirement: 11,
        snp_heterozygosity: config.snp_heterozygosity,
        snp_heterozygosity_stdev: config.snp_heterozygosity_stdev,
        dense_tolerance: DenseRegionTolerance::Normal,
    });

    let likelihood_model = HaplotypeLikelihoodModel {
        error_model: SequenceErrorModel::from_spec(&config.sequence_error_model)?,
        use_mapping_quality: config.model_mapping_quality,
        mapping_quality_cap_trigger: 60,
        mapping_quality_cap: 120,
        use_flank_scoring: config.inactive_flank_scoring && !config.very_fast,
    };

    let read_pipe = build_read_pipe(&config);
    let realigner = config.bamout.is_some().then(|| {
        ReadRealigner::new(
            likelihood_model.clone(),
            TemplateLinkage::Paired,
            config.seed,
        )
    });

    let pipeline = CallingPipeline {
        components: CallingComponents {
            reference: Arc::clone(&reference),
            read_manager: Arc::clone(&read_manager),
            read_pipe,
            generator,
            haplotype_generator,
            likelihood_model,
            caller,
            phaser: Phaser {
                min_phase_score: config.min_phase_score,
            },
            realigner,
        },
        samples: samples.clone(),
        contig_order: ContigOutputOrder::parse(&config.contig_output_order)?,
        threads: resolve_thread_count(config.threads),
        cancellation: Arc::new(AtomicBool::new(false)),
        advisories: advisories.clone(),
        collect_profile: config.data_profile.is_some(),
    };

    let workers = resolve_thread_count(config.threads);
    let worker_memory =
        nautilus::utils::workspace::worker_memory_budget(config.working_memory()?, workers);
    info!(
        workers,
        worker_memory_mb = worker_memory / (1024 * 1024),
        "resource budget"
    );

    // Scoped temp directory; removed on every exit path.
    let temp_dir = TempDirGuard::create(&config.working_directory(), &config.temp_directory_prefix)?;
    let output_path = config
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("/dev/stdout"));
    let reference_id = config
        .reference
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let output = pipeline.run_and_emit(
        &search,
        temp_dir.path(),
        &output_path,
        &reference_id,
        config.sites_only,
        matches!(caller_kind, CallerKind::Cancer),
        matches!(caller_kind, CallerKind::Trio),
    )?;

    if config.legacy {
        if let Some(parent_output) = config.output.as_ref() {
            let legacy_path = parent_output.with_extension("legacy.vcf");
            std::fs::copy(&output_path, &legacy_path)?;
        }
    }

    if let Some(bamout) = &config.bamout {
        let contigs: Vec<(String, u32)> = reference
            .contig_names()
            .into_iter()
            .map(|name| {
                let size = reference.contig_size(&name).unwrap_or(0);
                (name, size)
            })
            .collect();
        let mut realigned: Vec<_> = output
            .contigs
            .iter()
            .flat_map(|c| c.realigned.iter().cloned())
            .collect();
        if !config.full_bamout {
            realigned.retain(|r| !r.annotations.unassigned);
        }
        nautilus::realign::write_sam(bamout, &contigs, &realigned)?;
    }

    if let Some(profile_path) = &config.data_profile {
        let mut profile = nautilus::pipelines::DataProfile::default();
        for contig in &output.contigs {
            profile.merge(contig.profile.clone());
        }
        profile.write(profile_path)?;
    }

    let n_calls: usize = output.contigs.iter().map(|c| c.calls.len()).sum();
    info!(n_calls, "finished");
    Ok(())
}

fn resolve_trio(config: &Config, samples: &[String]) -> Result<Option<Trio>> {
    if let (Some(mother), Some(father)) = (&config.maternal_sample, &config.paternal_sample) {
        let child = samples
            .iter()
            .find(|s| *s != mother && *s != father)
            .ok_or_else(|| {
                NautilusError::user(
                    "trio configuration",
                    "no child sample remains after the parental samples",
                    "a trio run needs exactly the child and both parents",
                )
            })?;
        let trio = Trio {
            mother: mother.clone(),
            father: father.clone(),
            child: child.clone(),
        };
        trio.validate(samples)?;
        return Ok(Some(trio));
    }
    if let Some(path) = &config.pedigree {
        let pedigree = Pedigree::load(path)?;
        if let Some(trio) = pedigree.trio(&samples.to_vec())? {
            trio.validate(samples)?;
            return Ok(Some(trio));
        }
    }
    Ok(None)
}

fn parse_extension(name: &str) -> Result<ExtensionPolicy> {
    match name.to_ascii_lowercase().as_str() {
        "conservative" => Ok(ExtensionPolicy::Conservative),
        "normal" => Ok(ExtensionPolicy::Normal),
        "optimistic" => Ok(ExtensionPolicy::Optimistic),
        "aggressive" => Ok(ExtensionPolicy::Aggressive),
        other => Err(NautilusError::config(format!(
            "unknown extension level '{}'",
            other
        ))),
    }
}

fn parse_lagging(name: &str) -> Result<LaggingPolicy> {
    match name.to_ascii_lowercase().as_str() {
        "none" => Ok(LaggingPolicy::None),
        "conservative" => Ok(LaggingPolicy::Conservative),
        "moderate" => Ok(LaggingPolicy::Moderate),
        "normal" => Ok(LaggingPolicy::Normal),
        "aggressive" => Ok(LaggingPolicy::Aggressive),
        other => Err(NautilusError::config(format!(
            "unknown lagging level '{}'",
            other
        ))),
    }
}

fn build_read_pipe(config: &Config) -> ReadPipe {
    let downsampler = (!config.disable_downsampling).then(|| {
        Downsampler::new(config.downsample_above, config.downsample_target, config.seed)
    });
    if !config.read_filtering {
        return ReadPipe::new(
            ReadTransformPipeline::default(),
            ReadFilterPipeline::default(),
            downsampler,
        );
    }

    let mut filters = vec![
        ReadFilter::NoUnmapped,
        ReadFilter::MinMappingQuality(config.min_mapping_quality),
        ReadFilter::GoodBaseCount {
            quality: config.good_base_quality,
            min_count: config.min_good_bases,
        },
    ];
    if let Some(fraction) = config.min_good_base_fraction {
        filters.push(ReadFilter::GoodBaseFraction {
            quality: config.good_base_quality,
            min_fraction: fraction,
        });
    }
    if let Some(min) = config.min_read_length {
        filters.push(ReadFilter::MinReadLength(min));
    }
    if let Some(max) = config.max_read_length {
        filters.push(ReadFilter::MaxReadLength(max));
    }
    if !config.allow_marked_duplicates {
        filters.push(ReadFilter::NoDuplicates);
    }
    if !config.allow_qc_fails {
        filters.push(ReadFilter::NoQcFails);
    }
    if !config.allow_secondary_alignments {
        filters.push(ReadFilter::NoSecondary);
    }
    if !config.allow_supplementary_alignments {
        filters.push(ReadFilter::NoSupplementary);
    }
    if config.no_reads_with_unmapped_segments {
        filters.push(ReadFilter::NoUnmappedSegments);
    }
    if config.no_reads_with_distant_segments {
        filters.push(ReadFilter::NoDistantSegments { max_insert: 10_000 });
    }
    if config.no_adapter_contaminated_reads {
        filters.push(ReadFilter::NoAdapterContaminated);
    }

    ReadPipe::new(
        ReadTransformPipeline::new(vec![ReadTransformer::MaskSoftClippedBases]),
        ReadFilterPipeline::new(filters),
        downsampler,
    )
}
