//! # Configuration Logic
//!
//! CLI argument parsing and validation using clap derive. The option
//! surface mirrors the engine's components: I/O, concurrency and memory,
//! calling mode, candidate generation, read filtering, and the per-mode
//! model parameters.

use clap::Parser;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::callers::CallerKind;
use crate::data::ploidy::PloidyMap;
use crate::error::{NautilusError, Result};
use crate::utils::advisory::{Advisory, AdvisoryChannel};
use crate::utils::workspace::MemoryFootprint;

/// Nautilus: haplotype-based small-variant calling
#[derive(Parser, Debug, Clone)]
#[command(name = "nautilus")]
#[command(author = "Nautilus Authors")]
#[command(version)]
#[command(about = "Haplotype-based small-variant caller", long_about = None)]
pub struct Config {
    // ============ I/O ============
    /// Reference FASTA file (required)
    #[arg(long, value_name = "FILE")]
    pub reference: PathBuf,

    /// Aligned read files (BAM/CRAM/SAM)
    #[arg(long, value_name = "FILE", num_args = 1..)]
    pub reads: Vec<PathBuf>,

    /// File of read file paths, one per line
    #[arg(long = "reads-file", value_name = "FILE")]
    pub reads_file: Option<PathBuf>,

    /// Regions to call, e.g. chr1 chr2:1,000,000- chr3:5000-6000
    #[arg(long, value_name = "REGION", num_args = 1..)]
    pub regions: Vec<String>,

    /// File of regions to call, one per line
    #[arg(long = "regions-file", value_name = "FILE")]
    pub regions_file: Option<PathBuf>,

    /// Regions to skip
    #[arg(long = "skip-regions", value_name = "REGION", num_args = 1..)]
    pub skip_regions: Vec<String>,

    /// File of regions to skip, one per line
    #[arg(long = "skip-regions-file", value_name = "FILE")]
    pub skip_regions_file: Option<PathBuf>,

    /// Restrict calling to these samples
    #[arg(long, value_name = "SAMPLE", num_args = 1..)]
    pub samples: Vec<String>,

    /// PLINK-format pedigree file
    #[arg(long, value_name = "FILE")]
    pub pedigree: Option<PathBuf>,

    /// Output VCF path (stdout if omitted)
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Prefix for the temporary working directory name
    #[arg(long = "temp-directory-prefix", value_name = "NAME", default_value = "nautilus-temp")]
    pub temp_directory_prefix: String,

    /// Directory in which the temporary directory is created
    #[arg(long = "working-directory", value_name = "DIR")]
    pub working_directory: Option<PathBuf>,

    /// Also write a legacy plain-VCF copy of the output
    #[arg(long)]
    pub legacy: bool,

    /// Write realigned evidence reads to this file
    #[arg(long, value_name = "FILE")]
    pub bamout: Option<PathBuf>,

    /// Realign all reads, not only those overlapping calls
    #[arg(long = "full-bamout")]
    pub full_bamout: bool,

    /// Write a data profile summary to this file
    #[arg(long = "data-profile", value_name = "FILE")]
    pub data_profile: Option<PathBuf>,

    /// Treat reference contigs without mapped reads as skipped
    #[arg(long = "ignore-unmapped-contigs")]
    pub ignore_unmapped_contigs: bool,

    /// Input coordinates are one-based
    #[arg(long = "one-based-indexing")]
    pub one_based_indexing: bool,

    /// Contig emission order
    #[arg(long = "contig-output-order", value_name = "ORDER", default_value = "as-in-reference")]
    pub contig_output_order: String,

    // ============ Concurrency & memory ============
    /// Worker threads; 0 means all hardware threads
    #[arg(long, default_value = "0")]
    pub threads: usize,

    /// Target memory for read buffering
    #[arg(long = "target-read-buffer-footprint", value_name = "SIZE", default_value = "6GB")]
    pub target_read_buffer_footprint: String,

    /// Target working memory for computation
    #[arg(long = "target-working-memory", value_name = "SIZE", default_value = "16GB")]
    pub target_working_memory: String,

    /// Cap on concurrently open read files
    #[arg(long = "max-open-read-files", default_value = "250")]
    pub max_open_read_files: usize,

    /// Cap on the reference cache size
    #[arg(long = "max-reference-cache-footprint", value_name = "SIZE", default_value = "500MB")]
    pub max_reference_cache_footprint: String,

    // ============ Modes ============
    /// Calling model
    #[arg(long, default_value = "population")]
    pub caller: String,

    /// Trade accuracy for speed
    #[arg(long)]
    pub fast: bool,

    /// Trade more accuracy for more speed
    #[arg(long = "very-fast")]
    pub very_fast: bool,

    /// Suppress per-sample FORMAT fields in the output
    #[arg(long = "sites-only")]
    pub sites_only: bool,

    /// Only evaluate candidates from the source VCFs
    #[arg(long)]
    pub regenotype: bool,

    // ============ Candidate generation ============
    /// Enable the pileup (CIGAR) candidate generator
    #[arg(long = "raw-cigar-candidate-generator", default_value = "true", action = clap::ArgAction::Set)]
    pub raw_cigar_candidate_generator: bool,

    /// Enable the tandem-repeat candidate generator
    #[arg(long = "repeat-candidate-generator")]
    pub repeat_candidate_generator: bool,

    /// Enable the local-assembly candidate generator
    #[arg(long = "assembly-candidate-generator", default_value = "true", action = clap::ArgAction::Set)]
    pub assembly_candidate_generator: bool,

    /// Source VCFs of candidate variants
    #[arg(long = "source-candidates", value_name = "FILE", num_args = 1..)]
    pub source_candidates: Vec<PathBuf>,

    /// File of source VCF paths, one per line
    #[arg(long = "source-candidates-file", value_name = "FILE")]
    pub source_candidates_file: Option<PathBuf>,

    /// Minimum QUAL for source candidates
    #[arg(long = "min-source-candidate-quality", value_name = "QUAL")]
    pub min_source_candidate_quality: Option<f64>,

    /// Use source candidates whose FILTER is not PASS
    #[arg(long = "use-filtered-source-candidates")]
    pub use_filtered_source_candidates: bool,

    /// Primary assembly k-mer sizes
    #[arg(long = "kmer-sizes", value_name = "K", num_args = 1.., default_values_t = vec![10usize])]
    pub kmer_sizes: Vec<usize>,

    /// Number of fallback k-mer sizes
    #[arg(long = "num-fallback-kmers", default_value = "2")]
    pub num_fallback_kmers: usize,

    /// Gap between fallback k-mer sizes
    #[arg(long = "fallback-kmer-gap", default_value = "10")]
    pub fallback_kmer_gap: usize,

    /// Maximum region size assembled in one bin
    #[arg(long = "max-region-to-assemble", default_value = "400")]
    pub max_region_to_assemble: u32,

    /// Overlap between assembly bins
    #[arg(long = "max-assemble-region-overlap", default_value = "200")]
    pub max_assemble_region_overlap: u32,

    /// Minimum k-mer observations before pruning
    #[arg(long = "min-kmer-prune", default_value = "2")]
    pub min_kmer_prune: u32,

    /// Maximum bubbles per assembly graph
    #[arg(long = "max-bubbles", default_value = "30")]
    pub max_bubbles: usize,

    /// Minimum bubble score
    #[arg(long = "min-bubble-score", default_value = "2.0")]
    pub min_bubble_score: f64,

    /// Maximum candidate variant size
    #[arg(long = "max-variant-size", default_value = "2000")]
    pub max_variant_size: usize,

    /// Assemble every window regardless of the trigger
    #[arg(long = "assemble-all")]
    pub assemble_all: bool,

    /// Constant read-count floor for candidate admission
    #[arg(long = "min-supporting-reads")]
    pub min_supporting_reads: Option<u32>,

    // ============ Read filtering ============
    /// Enable the read filter pipeline
    #[arg(long = "read-filtering", default_value = "true", action = clap::ArgAction::Set)]
    pub read_filtering: bool,

    /// Minimum mapping quality
    #[arg(long = "min-mapping-quality", default_value = "20")]
    pub min_mapping_quality: u8,

    /// Base quality counted as good
    #[arg(long = "good-base-quality", default_value = "20")]
    pub good_base_quality: u8,

    /// Minimum count of good bases per read
    #[arg(long = "min-good-bases", default_value = "20")]
    pub min_good_bases: usize,

    /// Minimum fraction of good bases per read
    #[arg(long = "min-good-base-fraction", value_name = "FRACTION")]
    pub min_good_base_fraction: Option<f64>,

    /// Minimum read length
    #[arg(long = "min-read-length")]
    pub min_read_length: Option<usize>,

    /// Maximum read length
    #[arg(long = "max-read-length")]
    pub max_read_length: Option<usize>,

    /// Keep reads marked as duplicates
    #[arg(long = "allow-marked-duplicates")]
    pub allow_marked_duplicates: bool,

    /// Keep duplicate reads found by the internal check
    #[arg(long = "allow-octopus-duplicates")]
    pub allow_internal_duplicates: bool,

    /// Keep reads failing vendor QC
    #[arg(long = "allow-qc-fails")]
    pub allow_qc_fails: bool,

    /// Keep secondary alignments
    #[arg(long = "allow-secondary-alignments")]
    pub allow_secondary_alignments: bool,

    /// Keep supplementary alignments
    #[arg(long = "allow-supplementary-alignments")]
    pub allow_supplementary_alignments: bool,

    /// Drop reads whose mate is unmapped
    #[arg(long = "no-reads-with-unmapped-segments")]
    pub no_reads_with_unmapped_segments: bool,

    /// Drop reads whose mate maps far away or to another contig
    #[arg(long = "no-reads-with-distant-segments")]
    pub no_reads_with_distant_segments: bool,

    /// Drop reads with adapter read-through
    #[arg(long = "no-adapter-contaminated-reads")]
    pub no_adapter_contaminated_reads: bool,

    /// Disable coverage-based downsampling
    #[arg(long = "disable-downsampling")]
    pub disable_downsampling: bool,

    /// Coverage above which downsampling starts
    #[arg(long = "downsample-above", default_value = "1000")]
    pub downsample_above: u32,

    /// Coverage aimed for when downsampling
    #[arg(long = "downsample-target", default_value = "500")]
    pub downsample_target: u32,

    // ============ Calling ============
    /// Organism ploidy
    #[arg(long = "organism-ploidy", default_value = "2")]
    pub organism_ploidy: u32,

    /// Inline contig ploidies: CONTIG=PLOIDY or SAMPLE:CONTIG=PLOIDY
    #[arg(long = "contig-ploidies", value_name = "SPEC", num_args = 1..)]
    pub contig_ploidies: Vec<String>,

    /// File of contig ploidy specs, one per line
    #[arg(long = "contig-ploidies-file", value_name = "FILE")]
    pub contig_ploidies_file: Option<PathBuf>,

    /// Soft cap on haplotypes per window
    #[arg(long = "max-haplotypes", default_value = "200")]
    pub max_haplotypes: usize,

    /// Haplotype count at which holdout starts
    #[arg(long = "haplotype-holdout-threshold", default_value = "2500")]
    pub haplotype_holdout_threshold: usize,

    /// Hard haplotype cap; windows beyond it are not called
    #[arg(long = "haplotype-overflow", default_value = "200000")]
    pub haplotype_overflow: usize,

    /// Maximum holdout rounds per window
    #[arg(long = "max-holdout-depth", default_value = "20")]
    pub max_holdout_depth: usize,

    /// Haplotype window extension policy
    #[arg(long = "extension-level", default_value = "normal")]
    pub extension_level: String,

    /// Cross-window indicator (lagging) policy
    #[arg(long = "lagging-level", default_value = "normal")]
    pub lagging_level: String,

    /// Minimum Phred phase score to join calls into a phase set
    #[arg(long = "min-phase-score", default_value = "10.0")]
    pub min_phase_score: f64,

    /// Expected SNV heterozygosity
    #[arg(long = "snp-heterozygosity", default_value = "0.001")]
    pub snp_heterozygosity: f64,

    /// Expected indel heterozygosity
    #[arg(long = "indel-heterozygosity", default_value = "0.0001")]
    pub indel_heterozygosity: f64,

    /// Standard deviation of the SNV heterozygosity
    #[arg(long = "snp-heterozygosity-stdev", default_value = "0.01")]
    pub snp_heterozygosity_stdev: f64,

    /// Minimum posterior probability to call a variant
    #[arg(long = "min-variant-posterior", default_value = "0.98")]
    pub min_variant_posterior: f64,

    /// Reference call reporting: none, positional, or blocked
    #[arg(long, default_value = "none")]
    pub refcall: String,

    /// Minimum posterior for reference calls
    #[arg(long = "min-refcall-posterior", default_value = "0.9")]
    pub min_refcall_posterior: f64,

    /// Quality difference below which adjacent refcall blocks merge
    #[arg(long = "refcall-block-merge-threshold", default_value = "10.0")]
    pub refcall_block_merge_threshold: f64,

    /// Cap on genotypes per sample per window
    #[arg(long = "max-genotypes", default_value = "5000")]
    pub max_genotypes: usize,

    /// Cap on joint genotype combinations
    #[arg(long = "max-joint-genotypes", default_value = "1000000")]
    pub max_joint_genotypes: usize,

    /// Cap on variational-Bayes seeds
    #[arg(long = "max-vb-seeds", default_value = "12")]
    pub max_vb_seeds: usize,

    /// Use uniform genotype priors
    #[arg(long = "use-uniform-genotype-priors")]
    pub use_uniform_genotype_priors: bool,

    /// Use independent genotype priors in joint models
    #[arg(long = "use-independent-genotype-priors")]
    pub use_independent_genotype_priors: bool,

    /// Deduplicate haplotypes with the caller prior model
    #[arg(long = "dedup-haplotypes-with-prior-model", default_value = "true", action = clap::ArgAction::Set)]
    pub dedup_haplotypes_with_prior_model: bool,

    /// Never drop the reference haplotype from the evaluated set
    #[arg(long = "protect-reference-haplotype", default_value = "true", action = clap::ArgAction::Set)]
    pub protect_reference_haplotype: bool,

    /// Mix mapping quality into the likelihood model
    #[arg(long = "model-mapping-quality", default_value = "true", action = clap::ArgAction::Set)]
    pub model_mapping_quality: bool,

    /// Annotate calls with the model posterior
    #[arg(long = "model-posterior")]
    pub model_posterior: bool,

    /// Sequence error model preset or open:extend penalties
    #[arg(long = "sequence-error-model", default_value = "pcr-free")]
    pub sequence_error_model: String,

    /// Score flank bases in the likelihood model
    #[arg(long = "inactive-flank-scoring", default_value = "true", action = clap::ArgAction::Set)]
    pub inactive_flank_scoring: bool,

    // ============ Cancer ============
    /// The normal sample; implies the cancer caller
    #[arg(long = "normal-sample", value_name = "SAMPLE")]
    pub normal_sample: Option<String>,

    /// Maximum somatic haplotypes per window
    #[arg(long = "max-somatic-haplotypes", default_value = "1")]
    pub max_somatic_haplotypes: usize,

    /// Somatic SNV mutation rate
    #[arg(long = "somatic-snv-mutation-rate", default_value = "1e-4")]
    pub somatic_snv_mutation_rate: f64,

    /// Somatic indel mutation rate
    #[arg(long = "somatic-indel-mutation-rate", default_value = "1e-6")]
    pub somatic_indel_mutation_rate: f64,

    /// Minimum expected somatic allele frequency
    #[arg(long = "min-expected-somatic-frequency", default_value = "0.03")]
    pub min_expected_somatic_frequency: f64,

    /// Mass of the reported credible interval
    #[arg(long = "credible-mass", default_value = "0.9")]
    pub credible_mass: f64,

    /// Minimum credible somatic allele frequency
    #[arg(long = "min-credible-somatic-frequency", default_value = "0.01")]
    pub min_credible_somatic_frequency: f64,

    /// Minimum somatic posterior probability
    #[arg(long = "min-somatic-posterior", default_value = "0.98")]
    pub min_somatic_posterior: f64,

    /// Concentration of the tumour-germline mixture prior
    #[arg(long = "tumour-germline-concentration", default_value = "3.0")]
    pub tumour_germline_concentration: f64,

    /// Risk of tumour contamination in the normal: low or high
    #[arg(long = "normal-contamination-risk", default_value = "low")]
    pub normal_contamination_risk: String,

    /// Emit only somatic calls
    #[arg(long = "somatics-only")]
    pub somatics_only: bool,

    // ============ Trio ============
    /// The maternal sample; with --paternal-sample implies the trio caller
    #[arg(long = "maternal-sample", value_name = "SAMPLE")]
    pub maternal_sample: Option<String>,

    /// The paternal sample
    #[arg(long = "paternal-sample", value_name = "SAMPLE")]
    pub paternal_sample: Option<String>,

    /// De novo SNV mutation rate
    #[arg(long = "denovo-snv-mutation-rate", default_value = "1.3e-8")]
    pub denovo_snv_mutation_rate: f64,

    /// De novo indel mutation rate
    #[arg(long = "denovo-indel-mutation-rate", default_value = "1e-9")]
    pub denovo_indel_mutation_rate: f64,

    /// Minimum de novo posterior probability
    #[arg(long = "min-denovo-posterior", default_value = "0.9")]
    pub min_denovo_posterior: f64,

    /// Emit only de novo calls
    #[arg(long = "denovos-only")]
    pub denovos_only: bool,

    // ============ Polyclone ============
    /// Maximum clones in the mixture
    #[arg(long = "max-clones", default_value = "3")]
    pub max_clones: usize,

    /// Minimum clone frequency
    #[arg(long = "min-clone-frequency", default_value = "0.01")]
    pub min_clone_frequency: f64,

    // ============ Cell ============
    /// Allelic-dropout concentration; higher means less dropout
    #[arg(long = "dropout-concentration", default_value = "20.0")]
    pub dropout_concentration: f64,

    /// Random seed for all stochastic tie-breaking
    #[arg(long, default_value = "42")]
    pub seed: u64,
}

impl Config {
    /// Parse command line arguments and validate.
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters and option conflicts.
    pub fn validate(&self) -> Result<()> {
        if !self.reference.exists() {
            return Err(NautilusError::FileNotFound {
                path: self.reference.clone(),
            });
        }
        for path in &self.reads {
            if !path.exists() {
                return Err(NautilusError::FileNotFound { path: path.clone() });
            }
        }
        if self.reads.is_empty() && self.reads_file.is_none() {
            return Err(NautilusError::config(
                "no read files given; use --reads or --reads-file",
            ));
        }

        // A source candidate file equal to the output is a destructive
        // conflict.
        if let Some(output) = &self.output {
            if self.source_candidates.iter().any(|p| p == output) {
                return Err(NautilusError::user(
                    "options",
                    format!(
                        "--source-candidates includes the output path {}",
                        output.display()
                    ),
                    "write the output somewhere else",
                ));
            }
        }

        if self.maternal_sample.is_some() != self.paternal_sample.is_some() {
            return Err(NautilusError::config(
                "--maternal-sample and --paternal-sample must be given together",
            ));
        }
        if self.downsample_target > self.downsample_above {
            return Err(NautilusError::config(
                "--downsample-target must not exceed --downsample-above",
            ));
        }
        if self.max_haplotypes == 0 {
            return Err(NautilusError::config("--max-haplotypes must be positive"));
        }
        if !(0.0..=1.0).contains(&self.min_variant_posterior) {
            return Err(NautilusError::config(
                "--min-variant-posterior must be a probability",
            ));
        }
        if !(0.0..1.0).contains(&(1.0 - self.credible_mass)) {
            return Err(NautilusError::config(
                "--credible-mass must be in (0, 1]",
            ));
        }
        CallerKind::parse(&self.caller)?;
        crate::pipelines::ContigOutputOrder::parse(&self.contig_output_order)?;
        crate::model::SequenceErrorModel::from_spec(&self.sequence_error_model)?;
        Ok(())
    }

    /// All read file paths, deduplicated, from --reads and --reads-file.
    pub fn read_paths(&self, advisories: &AdvisoryChannel) -> Result<Vec<PathBuf>> {
        let mut paths = self.reads.clone();
        if let Some(list) = &self.reads_file {
            paths.extend(load_path_file(list, advisories)?);
        }
        Ok(dedup_paths(paths, advisories))
    }

    /// All source candidate VCF paths, deduplicated.
    pub fn source_candidate_paths(&self, advisories: &AdvisoryChannel) -> Result<Vec<PathBuf>> {
        let mut paths = self.source_candidates.clone();
        if let Some(list) = &self.source_candidates_file {
            paths.extend(load_path_file(list, advisories)?);
        }
        Ok(dedup_paths(paths, advisories))
    }

    /// The layered ploidy map from the ploidy options. Conflicts are fatal.
    pub fn ploidies(&self) -> Result<PloidyMap> {
        let mut map = PloidyMap::new(self.organism_ploidy);
        for spec in &self.contig_ploidies {
            map.insert_spec(spec)?;
        }
        if let Some(path) = &self.contig_ploidies_file {
            let text = std::fs::read_to_string(path).map_err(|e| {
                NautilusError::user(
                    "ploidy configuration",
                    format!("could not read {}: {}", path.display(), e),
                    "check the --contig-ploidies-file path",
                )
            })?;
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                // Files use whitespace-delimited "CONTIG PLOIDY" columns.
                let spec = match line.split_once(char::is_whitespace) {
                    Some((contig, ploidy)) => format!("{}={}", contig, ploidy.trim()),
                    None => line.to_string(),
                };
                map.insert_spec(&spec)?;
            }
        }
        Ok(map)
    }

    pub fn reference_cache_footprint(&self) -> Result<MemoryFootprint> {
        self.max_reference_cache_footprint.parse()
    }

    pub fn working_memory(&self) -> Result<MemoryFootprint> {
        self.target_working_memory.parse()
    }

    /// The working directory for the temp staging directory.
    pub fn working_directory(&self) -> PathBuf {
        self.working_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// The requested caller kind (before selection rules).
    pub fn requested_caller(&self) -> Result<CallerKind> {
        CallerKind::parse(&self.caller)
    }
}

fn load_path_file(path: &Path, advisories: &AdvisoryChannel) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        NautilusError::user(
            "paths file",
            format!("could not read {}: {}", path.display(), e),
            "check the file path",
        )
    })?;
    let paths: Vec<PathBuf> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(PathBuf::from)
        .collect();
    if paths.is_empty() {
        advisories.report(Advisory::EmptyPathsFile);
    }
    Ok(paths)
}

fn dedup_paths(paths: Vec<PathBuf>, advisories: &AdvisoryChannel) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(paths.len());
    let mut duplicates = false;
    for path in paths {
        if seen.insert(path.clone()) {
            out.push(path);
        } else {
            duplicates = true;
        }
    }
    if duplicates {
        advisories.report(Advisory::DuplicateInputPaths);
    }
    out
}
