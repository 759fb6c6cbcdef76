//! # Calling Models
//!
//! Six inference modes behind one interface: `infer_latents` turns the
//! likelihood matrix into posterior distributions, `call_variants` turns
//! posteriors plus candidates into call records. `Latents` is the only
//! state passed between the two.

pub mod cancer;
pub mod cell;
pub mod individual;
pub mod polyclone;
pub mod population;
pub mod trio;

pub use cancer::CancerCaller;
pub use cell::CellCaller;
pub use individual::IndividualCaller;
pub use polyclone::PolycloneCaller;
pub use population::PopulationCaller;
pub use trio::TrioCaller;

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data::calls::{GenotypeCall, VariantCall};
use crate::data::haplotype::{all_genotypes, genotype_count, Genotype, Haplotype};
use crate::data::ploidy::PloidyMap;
use crate::data::read::AlignedRead;
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};
use crate::model::likelihood::LikelihoodMatrix;
use crate::model::priors::GenotypePriorModel;
use crate::utils::maths::{normalize_ln, probability_to_phred};

/// Everything a caller sees for one evaluation window.
pub struct CallerContext<'a> {
    pub haplotypes: &'a [Arc<Haplotype>],
    /// Per-sample piped reads over the window
    pub reads: &'a BTreeMap<String, Vec<AlignedRead>>,
    /// Per-sample likelihood matrices (haplotype x read)
    pub likelihoods: &'a BTreeMap<String, LikelihoodMatrix>,
    pub region: &'a GenomicRegion,
}

/// A posterior distribution over a genotype space.
#[derive(Clone, Debug, Default)]
pub struct GenotypePosteriors {
    pub genotypes: Vec<Genotype<Arc<Haplotype>>>,
    /// Probabilities, normalized over `genotypes`
    pub posteriors: Vec<f64>,
}

impl GenotypePosteriors {
    /// The maximum a posteriori genotype.
    pub fn map_genotype(&self) -> Option<(&Genotype<Arc<Haplotype>>, f64)> {
        let (index, &posterior) = self
            .posteriors
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        Some((&self.genotypes[index], posterior))
    }

    /// Posterior mass of genotypes expressing the variant's alt allele.
    pub fn variant_posterior(&self, variant: &Variant) -> f64 {
        let allele = variant.alt_allele();
        self.genotypes
            .iter()
            .zip(&self.posteriors)
            .filter(|(genotype, _)| genotype.iter().any(|h| h.contains(&allele)))
            .map(|(_, &p)| p)
            .sum()
    }

    /// Posterior mass of genotypes expressing no alt at the variant site.
    pub fn reference_posterior(&self, variant: &Variant) -> f64 {
        (1.0 - self.variant_posterior(variant)).max(0.0)
    }
}

/// Inference output handed from `infer_latents` to `call_variants`.
pub trait Latents: Any + Send {
    /// Per-sample genotype posteriors.
    fn genotype_posteriors(&self) -> &BTreeMap<String, GenotypePosteriors>;

    fn as_any(&self) -> &dyn Any;
}

/// The common caller interface.
pub trait Caller: Send + Sync {
    fn infer_latents(&self, context: &CallerContext) -> Result<Box<dyn Latents>>;

    fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &dyn Latents,
        context: &CallerContext,
    ) -> Result<Vec<VariantCall>>;
}

/// Whether and how reference sites are reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefCallType {
    None,
    /// One record per uncalled candidate site
    Positional,
    /// Adjacent reference sites merged into blocks by the emitter
    Blocked,
}

/// Parameters shared by every calling model.
#[derive(Clone, Debug)]
pub struct CommonParameters {
    pub ploidies: PloidyMap,
    pub prior_model: GenotypePriorModel,
    /// Minimum posterior probability to call a variant
    pub min_variant_posterior: f64,
    pub refcall: RefCallType,
    pub min_refcall_posterior: f64,
    /// Cap on the per-sample genotype space
    pub max_genotypes: usize,
    /// Cap on joint genotype combinations (trio, population)
    pub max_joint_genotypes: usize,
}

impl Default for CommonParameters {
    fn default() -> Self {
        Self {
            ploidies: PloidyMap::default(),
            prior_model: GenotypePriorModel::default(),
            min_variant_posterior: 0.98,
            refcall: RefCallType::None,
            min_refcall_posterior: 0.9,
            max_genotypes: 5000,
            max_joint_genotypes: 1_000_000,
        }
    }
}

/// Index-space genotypes over the window's haplotype list, truncated to the
/// configured cap.
pub(crate) fn indexed_genotypes(
    n_haplotypes: usize,
    ploidy: usize,
    max_genotypes: usize,
) -> Vec<Genotype<usize>> {
    let indices: Vec<usize> = (0..n_haplotypes).collect();
    if genotype_count(n_haplotypes, ploidy) <= max_genotypes {
        return all_genotypes(&indices, ploidy);
    }
    let mut genotypes = all_genotypes(&indices, ploidy);
    genotypes.truncate(max_genotypes);
    genotypes
}

/// `ln P(reads | genotype)`: reads draw a haplotype uniformly from the
/// genotype.
pub(crate) fn ln_genotype_likelihood(
    genotype: &Genotype<usize>,
    likelihoods: &LikelihoodMatrix,
) -> f64 {
    let ln_ploidy = (genotype.ploidy() as f64).ln();
    let mut total = 0.0;
    for read in 0..likelihoods.n_reads() {
        let per_haplotype: Vec<f64> = genotype
            .iter()
            .map(|&h| likelihoods.get(h, read) - ln_ploidy)
            .collect();
        total += crate::utils::maths::ln_sum_exp(&per_haplotype);
    }
    total
}

/// Materialize an indexed genotype into haplotype space.
pub(crate) fn materialize(
    genotype: &Genotype<usize>,
    haplotypes: &[Arc<Haplotype>],
) -> Genotype<Arc<Haplotype>> {
    Genotype::new(
        genotype
            .iter()
            .map(|&i| Arc::clone(&haplotypes[i]))
            .collect(),
    )
}

/// Posterior over one sample's genotype space under the content prior.
pub(crate) fn sample_posteriors(
    haplotypes: &[Arc<Haplotype>],
    likelihoods: &LikelihoodMatrix,
    ploidy: usize,
    params: &CommonParameters,
) -> GenotypePosteriors {
    let genotypes = indexed_genotypes(haplotypes.len(), ploidy, params.max_genotypes);
    let ln_weights: Vec<f64> = genotypes
        .iter()
        .map(|genotype| {
            let materialized = materialize(genotype, haplotypes);
            params.prior_model.ln_prior(&materialized)
                + ln_genotype_likelihood(genotype, likelihoods)
        })
        .collect();
    let posteriors = normalize_ln(&ln_weights);
    GenotypePosteriors {
        genotypes: genotypes
            .iter()
            .map(|g| materialize(g, haplotypes))
            .collect(),
        posteriors,
    }
}

/// Read depth for a sample over a variant's region.
pub(crate) fn depth_at(reads: &[AlignedRead], region: &GenomicRegion) -> u32 {
    reads
        .iter()
        .filter(|read| read.region().overlaps(region))
        .count() as u32
}

/// The shared calling contract: emit a call per candidate whose posterior
/// clears the threshold, and reference calls where configured.
pub(crate) fn calls_from_posteriors(
    candidates: &[Variant],
    posteriors: &BTreeMap<String, GenotypePosteriors>,
    context: &CallerContext,
    params: &CommonParameters,
) -> Vec<VariantCall> {
    let mut calls = Vec::new();
    for candidate in candidates {
        let site_posterior = posteriors
            .values()
            .map(|p| p.variant_posterior(candidate))
            .fold(0.0, f64::max);

        if site_posterior >= params.min_variant_posterior {
            let mut call = VariantCall::new(
                candidate.clone(),
                probability_to_phred(1.0 - site_posterior),
            );
            for (sample, sample_posteriors) in posteriors {
                let Some((genotype, genotype_posterior)) = sample_posteriors.map_genotype()
                else {
                    continue;
                };
                let alleles = genotype_alleles(genotype, candidate);
                let depth = context
                    .reads
                    .get(sample)
                    .map(|reads| depth_at(reads, candidate.region()))
                    .unwrap_or(0);
                call.genotypes.insert(
                    sample.clone(),
                    GenotypeCall {
                        alleles,
                        posterior: genotype_posterior,
                        depth,
                        phased: false,
                    },
                );
            }
            calls.push(call);
        } else if params.refcall != RefCallType::None {
            let reference_posterior = posteriors
                .values()
                .map(|p| p.reference_posterior(candidate))
                .fold(1.0, f64::min);
            if reference_posterior >= params.min_refcall_posterior {
                let mut call = VariantCall::new(
                    candidate.clone(),
                    probability_to_phred(1.0 - reference_posterior),
                );
                call.is_refcall = true;
                for (sample, sample_posteriors) in posteriors {
                    let Some((genotype, genotype_posterior)) = sample_posteriors.map_genotype()
                    else {
                        continue;
                    };
                    let depth = context
                        .reads
                        .get(sample)
                        .map(|reads| depth_at(reads, candidate.region()))
                        .unwrap_or(0);
                    call.genotypes.insert(
                        sample.clone(),
                        GenotypeCall {
                            alleles: Genotype::new(vec![
                                candidate.ref_allele();
                                genotype.ploidy()
                            ]),
                            posterior: genotype_posterior,
                            depth,
                            phased: false,
                        },
                    );
                }
                calls.push(call);
            }
        }
    }
    calls
}

/// Map each genotype haplotype to the candidate's ref or alt allele.
pub(crate) fn genotype_alleles(
    genotype: &Genotype<Arc<Haplotype>>,
    candidate: &Variant,
) -> Genotype<crate::data::variant::Allele> {
    let alt = candidate.alt_allele();
    Genotype::new(
        genotype
            .iter()
            .map(|haplotype| {
                if haplotype.contains(&alt) {
                    alt.clone()
                } else {
                    candidate.ref_allele()
                }
            })
            .collect(),
    )
}

/// The calling mode, selected once per run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallerKind {
    Individual,
    Population,
    Trio,
    Cancer,
    Polyclone,
    Cell,
}

impl CallerKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "individual" => Ok(Self::Individual),
            "population" => Ok(Self::Population),
            "trio" => Ok(Self::Trio),
            "cancer" => Ok(Self::Cancer),
            "polyclone" => Ok(Self::Polyclone),
            "cell" => Ok(Self::Cell),
            other => Err(NautilusError::config(format!(
                "unknown caller '{}'",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Population => "population",
            Self::Trio => "trio",
            Self::Cancer => "cancer",
            Self::Polyclone => "polyclone",
            Self::Cell => "cell",
        }
    }
}

/// Resolve the caller from the options, in the documented priority order:
/// a normal sample implies cancer; trio samples or a pedigree-implied trio
/// imply trio; the explicit caller otherwise, with population collapsing to
/// individual for one sample. Sample-count validity is enforced here.
pub fn select_caller(
    requested: CallerKind,
    samples: &[String],
    normal_sample: Option<&str>,
    has_trio: bool,
) -> Result<CallerKind> {
    let kind = if normal_sample.is_some() {
        CallerKind::Cancer
    } else if has_trio {
        CallerKind::Trio
    } else if requested == CallerKind::Population && samples.len() == 1 {
        CallerKind::Individual
    } else {
        requested
    };

    let n = samples.len();
    let valid = match kind {
        CallerKind::Individual => n == 1,
        CallerKind::Polyclone => n == 1,
        CallerKind::Trio => n == 3,
        CallerKind::Population | CallerKind::Cancer | CallerKind::Cell => n >= 1,
    };
    if !valid {
        return Err(NautilusError::user(
            "caller selection",
            format!(
                "the {} caller cannot run with {} sample(s)",
                kind.as_str(),
                n
            ),
            "check --caller against the samples in the read files",
        ));
    }
    if let Some(normal) = normal_sample {
        if !samples.iter().any(|s| s == normal) {
            return Err(NautilusError::user(
                "caller selection",
                format!("normal sample '{}' is not among the input samples", normal),
                "check --normal-sample against the read headers",
            ));
        }
    }
    Ok(kind)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_kind_parse() {
        assert_eq!(CallerKind::parse("cancer").unwrap(), CallerKind::Cancer);
        assert_eq!(CallerKind::parse("INDIVIDUAL").unwrap(), CallerKind::Individual);
        assert!(CallerKind::parse("magic").is_err());
    }

    #[test]
    fn test_selection_rules() {
        let one = vec!["A".to_string()];
        let three = vec!["A".to_string(), "B".to_string(), "C".to_string()];

        // Normal sample forces cancer.
        assert_eq!(
            select_caller(CallerKind::Individual, &three, Some("A"), false).unwrap(),
            CallerKind::Cancer
        );
        // Trio configuration forces trio.
        assert_eq!(
            select_caller(CallerKind::Individual, &three, None, true).unwrap(),
            CallerKind::Trio
        );
        // Population with one sample collapses to individual.
        assert_eq!(
            select_caller(CallerKind::Population, &one, None, false).unwrap(),
            CallerKind::Individual
        );
    }

    #[test]
    fn test_sample_count_validation() {
        let two = vec!["A".to_string(), "B".to_string()];
        assert!(select_caller(CallerKind::Polyclone, &two, None, false).is_err());
        assert!(select_caller(CallerKind::Individual, &two, None, false).is_err());
        assert!(select_caller(CallerKind::Trio, &two, None, true).is_err());
        // Unknown normal sample.
        assert!(select_caller(CallerKind::Cancer, &two, Some("X"), false).is_err());
    }

    #[test]
    fn test_indexed_genotypes_cap() {
        assert_eq!(indexed_genotypes(3, 2, 100).len(), 6);
        assert_eq!(indexed_genotypes(100, 2, 10).len(), 10);
    }
}
