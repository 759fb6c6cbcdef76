//! # Population Caller
//!
//! Joint multi-sample germline calling. A first pass computes independent
//! per-sample posteriors; the expected haplotype frequencies they imply
//! become a shared frequency prior for the second pass, which couples the
//! samples. The latents carry the per-sample marginals of that coupled
//! posterior plus the frequency estimates.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::data::calls::VariantCall;
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};
use crate::utils::maths::normalize_ln;

use super::{
    calls_from_posteriors, indexed_genotypes, ln_genotype_likelihood, materialize,
    sample_posteriors, Caller, CallerContext, CommonParameters, GenotypePosteriors, Latents,
};

pub struct PopulationCaller {
    pub samples: Vec<String>,
    pub params: CommonParameters,
}

#[derive(Debug)]
pub struct PopulationLatents {
    posteriors: BTreeMap<String, GenotypePosteriors>,
    /// Posterior-expected frequency of each window haplotype
    pub haplotype_frequencies: Vec<f64>,
}

impl Latents for PopulationLatents {
    fn genotype_posteriors(&self) -> &BTreeMap<String, GenotypePosteriors> {
        &self.posteriors
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl PopulationCaller {
    pub fn new(samples: Vec<String>, params: CommonParameters) -> Self {
        Self { samples, params }
    }

    /// Expected haplotype frequencies under independent posteriors.
    fn expected_frequencies(
        &self,
        context: &CallerContext,
        independent: &BTreeMap<String, GenotypePosteriors>,
    ) -> Vec<f64> {
        let mut index_of: FxHashMap<u64, usize> = FxHashMap::default();
        for (i, haplotype) in context.haplotypes.iter().enumerate() {
            index_of.insert(haplotype.hash(), i);
        }
        let mut counts = vec![0.0f64; context.haplotypes.len()];
        let mut total = 0.0f64;
        for posteriors in independent.values() {
            for (genotype, &p) in posteriors.genotypes.iter().zip(&posteriors.posteriors) {
                for haplotype in genotype.iter() {
                    if let Some(&i) = index_of.get(&haplotype.hash()) {
                        counts[i] += p;
                    }
                }
                total += p * genotype.ploidy() as f64;
            }
        }
        if total <= 0.0 {
            let uniform = 1.0 / context.haplotypes.len().max(1) as f64;
            return vec![uniform; context.haplotypes.len()];
        }
        // Light smoothing keeps unseen haplotypes callable.
        let pseudo = 0.5;
        let denom = total + pseudo * context.haplotypes.len() as f64;
        counts
            .iter()
            .map(|&c| (c + pseudo) / denom)
            .collect()
    }
}

impl Caller for PopulationCaller {
    fn infer_latents(&self, context: &CallerContext) -> Result<Box<dyn Latents>> {
        // Pass 1: independent posteriors.
        let mut independent = BTreeMap::new();
        for sample in &self.samples {
            let likelihoods = context.likelihoods.get(sample).ok_or_else(|| {
                NautilusError::program(format!("no likelihoods for sample {}", sample))
            })?;
            let ploidy = self.params.ploidies.of(sample, context.region.contig()) as usize;
            independent.insert(
                sample.clone(),
                sample_posteriors(context.haplotypes, likelihoods, ploidy, &self.params),
            );
        }

        let frequencies = self.expected_frequencies(context, &independent);
        let ln_frequencies: Vec<f64> = frequencies.iter().map(|&f| f.ln()).collect();

        // Pass 2: frequency-coupled posteriors.
        let mut coupled = BTreeMap::new();
        for sample in &self.samples {
            let likelihoods = &context.likelihoods[sample];
            let ploidy = self.params.ploidies.of(sample, context.region.contig()) as usize;
            let genotypes =
                indexed_genotypes(context.haplotypes.len(), ploidy, self.params.max_genotypes);
            let ln_weights: Vec<f64> = genotypes
                .iter()
                .map(|genotype| {
                    let ln_frequency_prior: f64 =
                        genotype.iter().map(|&h| ln_frequencies[h]).sum();
                    ln_frequency_prior + ln_genotype_likelihood(genotype, likelihoods)
                })
                .collect();
            let posteriors = normalize_ln(&ln_weights);
            coupled.insert(
                sample.clone(),
                GenotypePosteriors {
                    genotypes: genotypes
                        .iter()
                        .map(|g| materialize(g, context.haplotypes))
                        .collect(),
                    posteriors,
                },
            );
        }

        Ok(Box::new(PopulationLatents {
            posteriors: coupled,
            haplotype_frequencies: frequencies,
        }))
    }

    fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &dyn Latents,
        context: &CallerContext,
    ) -> Result<Vec<VariantCall>> {
        Ok(calls_from_posteriors(
            candidates,
            latents.genotype_posteriors(),
            context,
            &self.params,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callers::tests_support::*;

    fn caller(samples: &[&str]) -> PopulationCaller {
        PopulationCaller::new(
            samples.iter().map(|s| s.to_string()).collect(),
            CommonParameters::default(),
        )
    }

    #[test]
    fn test_shared_variant_called_in_both_samples() {
        let fixture = WindowFixture::het_snv("S1", 10, 10).with_sample("S2", 10, 10);
        let caller = caller(&["S1", "S2"]);
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].genotypes.len(), 2);
        for genotype in calls[0].genotypes.values() {
            assert!(!genotype.alleles.is_homozygous());
        }
    }

    #[test]
    fn test_frequencies_sum_to_one() {
        let fixture = WindowFixture::het_snv("S1", 10, 10).with_sample("S2", 20, 0);
        let caller = caller(&["S1", "S2"]);
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let population = latents
            .as_any()
            .downcast_ref::<PopulationLatents>()
            .unwrap();
        let total: f64 = population.haplotype_frequencies.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(population.haplotype_frequencies.len(), 2);
    }

    #[test]
    fn test_reference_only_cohort_stays_silent() {
        let fixture = WindowFixture::het_snv("S1", 15, 0).with_sample("S2", 15, 0);
        let caller = caller(&["S1", "S2"]);
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert!(calls.is_empty());
    }
}
