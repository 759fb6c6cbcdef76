//! # Polyclone Caller
//!
//! Single-sample calling for unknown-ploidy mixtures (bacterial or viral
//! populations). Haplotypes are added greedily to a clone mixture while
//! they improve the evidence, up to `max_clones`; mixture weights come from
//! a short EM refinement. Variants carried by clones above the minimum
//! clone frequency are called.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data::calls::{GenotypeCall, VariantCall};
use crate::data::haplotype::{Genotype, Haplotype};
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};
use crate::model::likelihood::LikelihoodMatrix;
use crate::utils::maths::{ln_sum_exp, probability_to_phred};

use super::{depth_at, Caller, CallerContext, CommonParameters, GenotypePosteriors, Latents};

/// Polyclone-specific parameters.
#[derive(Clone, Debug)]
pub struct PolycloneParameters {
    pub max_clones: usize,
    /// Clones below this mixture weight do not contribute calls
    pub min_clone_frequency: f64,
}

impl Default for PolycloneParameters {
    fn default() -> Self {
        Self {
            max_clones: 3,
            min_clone_frequency: 0.01,
        }
    }
}

pub struct PolycloneCaller {
    pub sample: String,
    pub params: CommonParameters,
    pub polyclone_params: PolycloneParameters,
}

#[derive(Debug)]
pub struct PolycloneLatents {
    posteriors: BTreeMap<String, GenotypePosteriors>,
    /// The inferred clones with their mixture weights
    pub clones: Vec<(Arc<Haplotype>, f64)>,
    /// Evidence gain of the final mixture over the single best clone
    pub ln_evidence: f64,
}

impl Latents for PolycloneLatents {
    fn genotype_posteriors(&self) -> &BTreeMap<String, GenotypePosteriors> {
        &self.posteriors
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

const EM_ITERATIONS: usize = 20;
/// Minimum evidence gain (nats) to accept an extra clone.
const MIN_CLONE_GAIN: f64 = 4.0;

impl PolycloneCaller {
    pub fn new(
        sample: String,
        params: CommonParameters,
        polyclone_params: PolycloneParameters,
    ) -> Self {
        Self {
            sample,
            params,
            polyclone_params,
        }
    }

    /// Mixture log evidence with EM-refined weights.
    fn fit_mixture(clones: &[usize], likelihoods: &LikelihoodMatrix) -> (Vec<f64>, f64) {
        let k = clones.len();
        let n_reads = likelihoods.n_reads();
        let mut weights = vec![1.0 / k as f64; k];
        if n_reads == 0 {
            return (weights, 0.0);
        }
        for _ in 0..EM_ITERATIONS {
            let mut responsibilities = vec![0.0f64; k];
            for read in 0..n_reads {
                let terms: Vec<f64> = clones
                    .iter()
                    .zip(&weights)
                    .map(|(&h, &w)| likelihoods.get(h, read) + w.max(f64::MIN_POSITIVE).ln())
                    .collect();
                let total = ln_sum_exp(&terms);
                for (slot, term) in responsibilities.iter_mut().zip(&terms) {
                    *slot += (term - total).exp();
                }
            }
            for (w, r) in weights.iter_mut().zip(&responsibilities) {
                *w = r / n_reads as f64;
            }
        }
        let mut ln_evidence = 0.0;
        for read in 0..n_reads {
            let terms: Vec<f64> = clones
                .iter()
                .zip(&weights)
                .map(|(&h, &w)| likelihoods.get(h, read) + w.max(f64::MIN_POSITIVE).ln())
                .collect();
            ln_evidence += ln_sum_exp(&terms);
        }
        (weights, ln_evidence)
    }
}

impl Caller for PolycloneCaller {
    fn infer_latents(&self, context: &CallerContext) -> Result<Box<dyn Latents>> {
        let likelihoods = context.likelihoods.get(&self.sample).ok_or_else(|| {
            NautilusError::program(format!("no likelihoods for sample {}", self.sample))
        })?;
        let n = context.haplotypes.len();
        if n == 0 {
            return Err(NautilusError::program("no haplotypes to evaluate"));
        }

        // Seed with the single best haplotype.
        let mut best = 0usize;
        let mut best_ln = f64::NEG_INFINITY;
        for h in 0..n {
            let (_, ln) = Self::fit_mixture(&[h], likelihoods);
            if ln > best_ln {
                best_ln = ln;
                best = h;
            }
        }
        let mut clones = vec![best];
        let mut current_ln = best_ln;

        // Greedy clone addition.
        while clones.len() < self.polyclone_params.max_clones.max(1) {
            let mut best_addition: Option<(usize, f64)> = None;
            for h in 0..n {
                if clones.contains(&h) {
                    continue;
                }
                let mut trial = clones.clone();
                trial.push(h);
                let (_, ln) = Self::fit_mixture(&trial, likelihoods);
                if ln > current_ln + MIN_CLONE_GAIN
                    && best_addition.map(|(_, b)| ln > b).unwrap_or(true)
                {
                    best_addition = Some((h, ln));
                }
            }
            match best_addition {
                Some((h, ln)) => {
                    clones.push(h);
                    current_ln = ln;
                }
                None => break,
            }
        }

        let (weights, ln_evidence) = Self::fit_mixture(&clones, likelihoods);
        let clone_haplotypes: Vec<(Arc<Haplotype>, f64)> = clones
            .iter()
            .zip(&weights)
            .map(|(&h, &w)| (Arc::clone(&context.haplotypes[h]), w))
            .collect();

        // Expose the mixture as a genotype "posterior" with the clone set
        // as the single genotype.
        let genotype = Genotype::new(
            clone_haplotypes
                .iter()
                .map(|(h, _)| Arc::clone(h))
                .collect(),
        );
        let mut posteriors = BTreeMap::new();
        posteriors.insert(
            self.sample.clone(),
            GenotypePosteriors {
                genotypes: vec![genotype],
                posteriors: vec![1.0],
            },
        );

        Ok(Box::new(PolycloneLatents {
            posteriors,
            clones: clone_haplotypes,
            ln_evidence: ln_evidence - best_ln,
        }))
    }

    fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &dyn Latents,
        context: &CallerContext,
    ) -> Result<Vec<VariantCall>> {
        let polyclone_latents = latents
            .as_any()
            .downcast_ref::<PolycloneLatents>()
            .ok_or_else(|| NautilusError::program("polyclone caller received foreign latents"))?;

        let likelihoods = context.likelihoods.get(&self.sample).ok_or_else(|| {
            NautilusError::program(format!("no likelihoods for sample {}", self.sample))
        })?;
        let index_of = |haplotype: &Arc<Haplotype>| {
            context
                .haplotypes
                .iter()
                .position(|h| h == haplotype)
                .unwrap_or(0)
        };

        let mut calls = Vec::new();
        for candidate in candidates {
            let allele = candidate.alt_allele();
            let supporting: Vec<usize> = polyclone_latents
                .clones
                .iter()
                .filter(|(haplotype, _)| haplotype.contains(&allele))
                .map(|(haplotype, _)| index_of(haplotype))
                .collect();
            let supporting_weight: f64 = polyclone_latents
                .clones
                .iter()
                .filter(|(haplotype, _)| haplotype.contains(&allele))
                .map(|(_, weight)| weight)
                .sum();
            if supporting.is_empty()
                || supporting_weight < self.polyclone_params.min_clone_frequency
            {
                continue;
            }

            // Evidence for the mixture with vs without the supporting
            // clones; the posterior is the normalized odds.
            let with_indices: Vec<usize> = polyclone_latents
                .clones
                .iter()
                .map(|(haplotype, _)| index_of(haplotype))
                .collect();
            let mut without_indices: Vec<usize> = with_indices
                .iter()
                .copied()
                .filter(|i| !supporting.contains(i))
                .collect();
            if without_indices.is_empty() {
                // Fall back to the best non-supporting haplotype.
                let fallback = (0..context.haplotypes.len())
                    .filter(|&h| !context.haplotypes[h].contains(&allele))
                    .max_by(|&a, &b| {
                        let ln_a = Self::fit_mixture(&[a], likelihoods).1;
                        let ln_b = Self::fit_mixture(&[b], likelihoods).1;
                        ln_a.partial_cmp(&ln_b).unwrap_or(std::cmp::Ordering::Equal)
                    });
                match fallback {
                    Some(h) => without_indices.push(h),
                    None => {
                        // Every haplotype carries the allele; certain call.
                        without_indices.clear();
                    }
                }
            }
            let (_, ln_with) = Self::fit_mixture(&with_indices, likelihoods);
            let posterior = if without_indices.is_empty() {
                1.0
            } else {
                let (_, ln_without) = Self::fit_mixture(&without_indices, likelihoods);
                1.0 / (1.0 + (ln_without - ln_with).exp())
            };
            if posterior < self.params.min_variant_posterior {
                continue;
            }
            let mut call =
                VariantCall::new(candidate.clone(), probability_to_phred(1.0 - posterior));
            let depth = context
                .reads
                .get(&self.sample)
                .map(|reads| depth_at(reads, candidate.region()))
                .unwrap_or(0);
            call.genotypes.insert(
                self.sample.clone(),
                GenotypeCall {
                    alleles: Genotype::new(vec![candidate.ref_allele(), allele.clone()]),
                    posterior,
                    depth,
                    phased: false,
                },
            );
            calls.push(call);
        }
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callers::tests_support::*;

    fn caller() -> PolycloneCaller {
        PolycloneCaller::new(
            "S1".to_string(),
            CommonParameters::default(),
            PolycloneParameters::default(),
        )
    }

    #[test]
    fn test_two_clone_mixture_recovered() {
        let fixture = WindowFixture::het_snv("S1", 30, 30);
        let context = fixture.context();
        let latents = caller().infer_latents(&context).unwrap();
        let polyclone = latents
            .as_any()
            .downcast_ref::<PolycloneLatents>()
            .unwrap();
        assert_eq!(polyclone.clones.len(), 2);
        let total: f64 = polyclone.clones.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-6);
        // Roughly even mixture.
        for (_, weight) in &polyclone.clones {
            assert!(*weight > 0.3 && *weight < 0.7, "weight {}", weight);
        }
    }

    #[test]
    fn test_minor_clone_called() {
        let fixture = WindowFixture::het_snv("S1", 90, 10);
        let context = fixture.context();
        let latents = caller().infer_latents(&context).unwrap();
        let calls = caller()
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn test_single_clone_no_false_call() {
        let fixture = WindowFixture::het_snv("S1", 40, 0);
        let context = fixture.context();
        let latents = caller().infer_latents(&context).unwrap();
        let polyclone = latents
            .as_any()
            .downcast_ref::<PolycloneLatents>()
            .unwrap();
        assert_eq!(polyclone.clones.len(), 1);
        let calls = caller()
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert!(calls.is_empty());
    }
}
