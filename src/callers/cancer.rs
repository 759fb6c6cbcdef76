//! # Cancer Caller
//!
//! Somatic calling with an optional matched normal. Each tumour sample is
//! modelled as a mixture of a germline genotype and at most
//! `max_somatic_haplotypes` somatic haplotypes at a latent allele fraction;
//! the fraction is integrated over a grid with a Beta prior whose shape is
//! set by the tumour-germline concentration. Somatic calls require the
//! somatic posterior and the credible VAF interval to clear their gates.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data::calls::{CredibleInterval, SomaticAnnotation, VariantCall};
use crate::data::haplotype::{Genotype, Haplotype};
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};
use crate::model::likelihood::LikelihoodMatrix;
use crate::utils::maths::{ln_sum_exp, normalize_ln, probability_to_phred};

use super::{
    calls_from_posteriors, depth_at, indexed_genotypes, ln_genotype_likelihood, materialize,
    sample_posteriors, Caller, CallerContext, CommonParameters, GenotypePosteriors, Latents,
};

/// Tolerance of normal-sample contamination by tumour cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormalContaminationRisk {
    Low,
    High,
}

/// Cancer-specific parameters.
#[derive(Clone, Debug)]
pub struct CancerParameters {
    pub normal_sample: Option<String>,
    pub max_somatic_haplotypes: usize,
    pub somatic_snv_rate: f64,
    pub somatic_indel_rate: f64,
    /// Minimum expected (posterior-mean) somatic VAF
    pub min_expected_vaf: f64,
    /// Mass of the reported credible interval
    pub credible_mass: f64,
    /// The credible interval's lower bound must reach this VAF
    pub min_credible_vaf: f64,
    pub min_somatic_posterior: f64,
    pub tumour_germline_concentration: f64,
    pub normal_contamination_risk: NormalContaminationRisk,
    pub somatics_only: bool,
}

impl Default for CancerParameters {
    fn default() -> Self {
        Self {
            normal_sample: None,
            max_somatic_haplotypes: 1,
            somatic_snv_rate: 1e-4,
            somatic_indel_rate: 1e-6,
            min_expected_vaf: 0.03,
            credible_mass: 0.9,
            min_credible_vaf: 0.01,
            min_somatic_posterior: 0.98,
            tumour_germline_concentration: 3.0,
            normal_contamination_risk: NormalContaminationRisk::Low,
            somatics_only: false,
        }
    }
}

/// VAF grid resolution for the latent-fraction integral.
const VAF_GRID: usize = 50;

pub struct CancerCaller {
    pub samples: Vec<String>,
    pub params: CommonParameters,
    pub cancer_params: CancerParameters,
}

/// One somatic hypothesis: a germline genotype extended by one haplotype.
#[derive(Debug)]
struct SomaticHypothesis {
    somatic_haplotype: Arc<Haplotype>,
    /// Posterior probability of this hypothesis against germline-only
    posterior: f64,
    /// Posterior over the VAF grid, per tumour sample
    vaf_posteriors: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug)]
pub struct CancerLatents {
    germline: BTreeMap<String, GenotypePosteriors>,
    hypotheses: Vec<SomaticHypothesis>,
}

impl Latents for CancerLatents {
    fn genotype_posteriors(&self) -> &BTreeMap<String, GenotypePosteriors> {
        &self.germline
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl CancerLatents {
    /// The somatic posterior for a variant: mass of hypotheses whose
    /// somatic haplotype expresses it.
    pub fn somatic_posterior(&self, variant: &Variant) -> f64 {
        let allele = variant.alt_allele();
        self.hypotheses
            .iter()
            .filter(|h| h.somatic_haplotype.contains(&allele))
            .map(|h| h.posterior)
            .fold(0.0, f64::max)
    }

    fn best_hypothesis(&self, variant: &Variant) -> Option<&SomaticHypothesis> {
        let allele = variant.alt_allele();
        self.hypotheses
            .iter()
            .filter(|h| h.somatic_haplotype.contains(&allele))
            .max_by(|a, b| {
                a.posterior
                    .partial_cmp(&b.posterior)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

impl CancerCaller {
    pub fn new(
        samples: Vec<String>,
        params: CommonParameters,
        cancer_params: CancerParameters,
    ) -> Self {
        Self {
            samples,
            params,
            cancer_params,
        }
    }

    fn tumour_samples(&self) -> Vec<&String> {
        self.samples
            .iter()
            .filter(|s| Some(s.as_str()) != self.cancer_params.normal_sample.as_deref())
            .collect()
    }

    /// `ln` Beta(1, concentration) weights over the VAF grid.
    fn ln_vaf_prior(&self) -> Vec<f64> {
        let beta = self.cancer_params.tumour_germline_concentration.max(1.0);
        let weights: Vec<f64> = (0..VAF_GRID)
            .map(|i| {
                let f = grid_point(i);
                (beta - 1.0) * (1.0 - f).ln()
            })
            .collect();
        let total = ln_sum_exp(&weights);
        weights.iter().map(|w| w - total).collect()
    }

    /// `ln P(reads | germline, somatic, f)` for one sample.
    fn ln_mixture_likelihood(
        germline: &Genotype<usize>,
        somatic: usize,
        fraction: f64,
        likelihoods: &LikelihoodMatrix,
    ) -> f64 {
        let ploidy = germline.ploidy() as f64;
        let ln_germline_weight = ((1.0 - fraction) / ploidy).ln();
        let ln_somatic_weight = fraction.max(f64::MIN_POSITIVE).ln();
        let mut total = 0.0;
        for read in 0..likelihoods.n_reads() {
            let mut terms: Vec<f64> = germline
                .iter()
                .map(|&h| likelihoods.get(h, read) + ln_germline_weight)
                .collect();
            terms.push(likelihoods.get(somatic, read) + ln_somatic_weight);
            total += ln_sum_exp(&terms);
        }
        total
    }

    /// `ln` prior mass of a somatic haplotype: the per-variant somatic
    /// rates of its novel content.
    fn ln_somatic_prior(&self, somatic: &Haplotype) -> f64 {
        if somatic.is_reference() {
            return f64::NEG_INFINITY;
        }
        somatic
            .explicit_alleles()
            .iter()
            .map(|allele| {
                let is_snv = allele.region().len() == 1 && allele.sequence().len() == 1;
                if is_snv {
                    self.cancer_params.somatic_snv_rate.ln()
                } else {
                    self.cancer_params.somatic_indel_rate.ln()
                }
            })
            .sum()
    }
}

impl Caller for CancerCaller {
    fn infer_latents(&self, context: &CallerContext) -> Result<Box<dyn Latents>> {
        // Germline posteriors: driven by the normal when present, else by
        // all samples pooled per-sample.
        let mut germline = BTreeMap::new();
        for sample in &self.samples {
            let likelihoods = context.likelihoods.get(sample).ok_or_else(|| {
                NautilusError::program(format!("no likelihoods for sample {}", sample))
            })?;
            let ploidy = self.params.ploidies.of(sample, context.region.contig()) as usize;
            germline.insert(
                sample.clone(),
                sample_posteriors(context.haplotypes, likelihoods, ploidy, &self.params),
            );
        }

        // The MAP germline genotype of the normal (or the first sample)
        // anchors the somatic hypotheses.
        let anchor_sample = self
            .cancer_params
            .normal_sample
            .clone()
            .unwrap_or_else(|| self.samples[0].clone());
        let anchor_ploidy = self
            .params
            .ploidies
            .of(&anchor_sample, context.region.contig()) as usize;
        let anchor_likelihoods = &context.likelihoods[&anchor_sample];
        let germline_genotypes =
            indexed_genotypes(context.haplotypes.len(), anchor_ploidy, self.params.max_genotypes);
        let anchor_ln: Vec<f64> = germline_genotypes
            .iter()
            .map(|genotype| {
                self.params
                    .prior_model
                    .ln_prior(&materialize(genotype, context.haplotypes))
                    + ln_genotype_likelihood(genotype, anchor_likelihoods)
            })
            .collect();
        let map_germline = anchor_ln
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| germline_genotypes[i].clone())
            .ok_or_else(|| NautilusError::program("empty germline genotype space"))?;

        let ln_vaf_prior = self.ln_vaf_prior();
        let tumours = self.tumour_samples();

        // One hypothesis per candidate somatic haplotype.
        let mut hypotheses = Vec::new();
        for (somatic_index, somatic) in context.haplotypes.iter().enumerate() {
            let ln_somatic_prior = self.ln_somatic_prior(somatic);
            if !ln_somatic_prior.is_finite() {
                continue;
            }

            // Germline-only evidence vs somatic-mixture evidence, summed
            // over tumour samples.
            let mut ln_somatic_evidence = ln_somatic_prior;
            let mut ln_germline_evidence = 0.0;
            let mut vaf_posteriors = BTreeMap::new();
            for sample in &tumours {
                let likelihoods = &context.likelihoods[*sample];
                let per_f: Vec<f64> = (0..VAF_GRID)
                    .map(|i| {
                        ln_vaf_prior[i]
                            + Self::ln_mixture_likelihood(
                                &map_germline,
                                somatic_index,
                                grid_point(i),
                                likelihoods,
                            )
                    })
                    .collect();
                ln_somatic_evidence += ln_sum_exp(&per_f);
                ln_germline_evidence +=
                    ln_genotype_likelihood(&map_germline, likelihoods);
                vaf_posteriors.insert((*sample).clone(), normalize_ln(&per_f));
            }

            let posterior = {
                let weights = normalize_ln(&[ln_somatic_evidence, ln_germline_evidence]);
                weights[0]
            };
            hypotheses.push(SomaticHypothesis {
                somatic_haplotype: Arc::clone(somatic),
                posterior,
                vaf_posteriors,
            });
        }

        // Respect the somatic haplotype cap: keep the strongest.
        hypotheses.sort_by(|a, b| {
            b.posterior
                .partial_cmp(&a.posterior)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hypotheses.truncate(self.cancer_params.max_somatic_haplotypes.max(1));

        Ok(Box::new(CancerLatents {
            germline,
            hypotheses,
        }))
    }

    fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &dyn Latents,
        context: &CallerContext,
    ) -> Result<Vec<VariantCall>> {
        let cancer_latents = latents
            .as_any()
            .downcast_ref::<CancerLatents>()
            .ok_or_else(|| NautilusError::program("cancer caller received foreign latents"))?;

        // Germline calls follow the shared contract.
        let mut calls = calls_from_posteriors(
            candidates,
            latents.genotype_posteriors(),
            context,
            &self.params,
        );

        // Somatic calls: posterior gate plus credible-interval gate.
        for candidate in candidates {
            let somatic_posterior = cancer_latents.somatic_posterior(candidate);
            if somatic_posterior < self.cancer_params.min_somatic_posterior {
                continue;
            }
            let Some(hypothesis) = cancer_latents.best_hypothesis(candidate) else {
                continue;
            };
            let mut credible = BTreeMap::new();
            let mut all_pass = true;
            for (sample, vaf_posterior) in &hypothesis.vaf_posteriors {
                let (lower, upper) =
                    grid_credible_interval(vaf_posterior, self.cancer_params.credible_mass);
                let expected = expected_vaf(vaf_posterior);
                if lower < self.cancer_params.min_credible_vaf
                    || expected < self.cancer_params.min_expected_vaf
                {
                    all_pass = false;
                }
                credible.insert(
                    sample.clone(),
                    CredibleInterval {
                        lower,
                        upper,
                        mass: self.cancer_params.credible_mass,
                    },
                );
            }
            if !all_pass {
                continue;
            }

            let annotation = SomaticAnnotation {
                posterior: probability_to_phred(1.0 - somatic_posterior),
                credible_vaf: credible,
            };
            if let Some(call) = calls
                .iter_mut()
                .find(|c| !c.is_refcall && c.variant == *candidate)
            {
                call.somatic = Some(annotation);
            } else {
                let mut call = VariantCall::new(
                    candidate.clone(),
                    probability_to_phred(1.0 - somatic_posterior),
                );
                for sample in self.tumour_samples() {
                    let depth = context
                        .reads
                        .get(sample)
                        .map(|reads| depth_at(reads, candidate.region()))
                        .unwrap_or(0);
                    call.genotypes.insert(
                        sample.clone(),
                        crate::data::calls::GenotypeCall {
                            alleles: Genotype::new(vec![
                                candidate.ref_allele(),
                                candidate.alt_allele(),
                            ]),
                            posterior: somatic_posterior,
                            depth,
                            phased: false,
                        },
                    );
                }
                call.somatic = Some(annotation);
                calls.push(call);
            }
        }

        if self.cancer_params.somatics_only {
            calls.retain(|call| call.somatic.is_some());
        }
        calls.sort_by(|a, b| a.variant.region().cmp(b.variant.region()));
        Ok(calls)
    }
}

fn grid_point(index: usize) -> f64 {
    (index as f64 + 0.5) / VAF_GRID as f64
}

/// Posterior mean VAF over the grid.
fn expected_vaf(posterior: &[f64]) -> f64 {
    posterior
        .iter()
        .enumerate()
        .map(|(i, &p)| p * grid_point(i))
        .sum()
}

/// Equal-tailed credible interval over the grid posterior.
fn grid_credible_interval(posterior: &[f64], mass: f64) -> (f64, f64) {
    let tail = (1.0 - mass) / 2.0;
    let mut cumulative = 0.0;
    let mut lower = grid_point(0);
    for (i, &p) in posterior.iter().enumerate() {
        cumulative += p;
        if cumulative >= tail {
            lower = grid_point(i);
            break;
        }
    }
    let mut cumulative = 0.0;
    let mut upper = grid_point(posterior.len().saturating_sub(1));
    for (i, &p) in posterior.iter().enumerate().rev() {
        cumulative += p;
        if cumulative >= tail {
            upper = grid_point(i);
            break;
        }
    }
    (lower.min(upper), upper.max(lower))
}
