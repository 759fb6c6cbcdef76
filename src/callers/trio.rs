//! # Trio Caller
//!
//! Joint mother-father-child genotyping with Mendelian transmission and
//! explicit de-novo mutation rates. The joint posterior is computed over
//! the product of the per-sample genotype spaces (pruned to the best
//! genotypes per sample under independent posteriors); marginals drive the
//! per-sample genotype calls and the de-novo posterior gates the DENOVO
//! annotation.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data::calls::{DenovoAnnotation, VariantCall};
use crate::data::haplotype::{Genotype, Haplotype};
use crate::data::pedigree::Trio;
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};
use crate::utils::maths::{ln_sum_exp, normalize_ln, probability_to_phred};

use super::{
    calls_from_posteriors, indexed_genotypes, ln_genotype_likelihood, materialize, Caller,
    CallerContext, CommonParameters, GenotypePosteriors, Latents,
};

/// Trio-specific parameters.
#[derive(Clone, Debug)]
pub struct TrioParameters {
    pub denovo_snv_rate: f64,
    pub denovo_indel_rate: f64,
    /// Minimum de-novo posterior for the DENOVO annotation
    pub min_denovo_posterior: f64,
    /// Emit only de-novo calls
    pub denovos_only: bool,
}

impl Default for TrioParameters {
    fn default() -> Self {
        Self {
            denovo_snv_rate: 1.3e-8,
            denovo_indel_rate: 1e-9,
            min_denovo_posterior: 0.9,
            denovos_only: false,
        }
    }
}

pub struct TrioCaller {
    pub trio: Trio,
    pub params: CommonParameters,
    pub trio_params: TrioParameters,
}

#[derive(Debug)]
pub struct TrioLatents {
    marginals: BTreeMap<String, GenotypePosteriors>,
    /// Joint table: genotype indices per member and the joint posterior
    joint: Vec<(usize, usize, usize, f64)>,
    mother_genotypes: Vec<Genotype<Arc<Haplotype>>>,
    father_genotypes: Vec<Genotype<Arc<Haplotype>>>,
    child_genotypes: Vec<Genotype<Arc<Haplotype>>>,
}

impl Latents for TrioLatents {
    fn genotype_posteriors(&self) -> &BTreeMap<String, GenotypePosteriors> {
        &self.marginals
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl TrioLatents {
    /// Posterior mass where the child expresses the variant and neither
    /// parent does.
    pub fn denovo_posterior(&self, variant: &Variant) -> f64 {
        let allele = variant.alt_allele();
        let expresses = |genotype: &Genotype<Arc<Haplotype>>| {
            genotype.iter().any(|h| h.contains(&allele))
        };
        self.joint
            .iter()
            .filter(|&&(m, f, c, _)| {
                expresses(&self.child_genotypes[c])
                    && !expresses(&self.mother_genotypes[m])
                    && !expresses(&self.father_genotypes[f])
            })
            .map(|&(_, _, _, p)| p)
            .sum()
    }
}

impl TrioCaller {
    pub fn new(trio: Trio, params: CommonParameters, trio_params: TrioParameters) -> Self {
        Self {
            trio,
            params,
            trio_params,
        }
    }

    /// `ln T(child_allele | gamete)`: identity keeps nearly all the mass;
    /// a mutated copy pays the per-variant de-novo rates.
    fn ln_transmission(&self, child: &Haplotype, gamete: &Haplotype) -> f64 {
        if child == gamete {
            return (1.0 - self.trio_params.denovo_snv_rate).ln();
        }
        let differences = child.difference(gamete);
        if differences.is_empty() {
            // Same expressed sequence through different explicit alleles.
            return (1.0 - self.trio_params.denovo_snv_rate).ln();
        }
        differences
            .iter()
            .map(|v| {
                if v.is_snv() {
                    self.trio_params.denovo_snv_rate.ln()
                } else {
                    self.trio_params.denovo_indel_rate.ln()
                }
            })
            .sum()
    }

    /// `ln P(child genotype | parents)` for diploid members: gametes are
    /// uniform over each parent's two alleles, each copy independently
    /// subject to de-novo mutation.
    fn ln_mendelian(
        &self,
        mother: &Genotype<Arc<Haplotype>>,
        father: &Genotype<Arc<Haplotype>>,
        child: &Genotype<Arc<Haplotype>>,
    ) -> f64 {
        let c1 = child.get(0).as_ref();
        let c2 = child.get(1).as_ref();
        let ln_quarter = (0.25f64).ln();
        let mut terms = Vec::with_capacity(8);
        for maternal in mother.iter() {
            for paternal in father.iter() {
                // Either child copy may come from either parent; a
                // homozygous child has only one distinct ordering.
                let a = self.ln_transmission(c1, maternal)
                    + self.ln_transmission(c2, paternal);
                let term = if c1 == c2 {
                    a
                } else {
                    let b = self.ln_transmission(c2, maternal)
                        + self.ln_transmission(c1, paternal);
                    ln_sum_exp(&[a, b])
                };
                terms.push(ln_quarter + term);
            }
        }
        ln_sum_exp(&terms)
    }

    /// The best genotypes for one member under an independent posterior,
    /// with their `ln(prior * likelihood)` weights.
    fn member_genotypes(
        &self,
        sample: &str,
        context: &CallerContext,
        keep: usize,
    ) -> Result<(Vec<Genotype<Arc<Haplotype>>>, Vec<f64>)> {
        let likelihoods = context.likelihoods.get(sample).ok_or_else(|| {
            NautilusError::program(format!("no likelihoods for sample {}", sample))
        })?;
        let ploidy = self.params.ploidies.of(sample, context.region.contig()) as usize;
        if ploidy != 2 {
            return Err(NautilusError::program(format!(
                "the trio caller requires diploid members; sample {} has ploidy {}",
                sample, ploidy
            )));
        }
        let genotypes =
            indexed_genotypes(context.haplotypes.len(), ploidy, self.params.max_genotypes);
        let mut weighted: Vec<(Genotype<Arc<Haplotype>>, f64)> = genotypes
            .iter()
            .map(|genotype| {
                let materialized = materialize(genotype, context.haplotypes);
                let ln = self.params.prior_model.ln_prior(&materialized)
                    + ln_genotype_likelihood(genotype, likelihoods);
                (materialized, ln)
            })
            .collect();
        weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        weighted.truncate(keep.max(1));
        Ok(weighted.into_iter().unzip())
    }
}

impl Caller for TrioCaller {
    fn infer_latents(&self, context: &CallerContext) -> Result<Box<dyn Latents>> {
        // Per-member pruning keeps the joint space within the cap.
        let keep = (self.params.max_joint_genotypes as f64)
            .cbrt()
            .floor()
            .max(1.0) as usize;

        let (mother_genotypes, mother_ln) =
            self.member_genotypes(&self.trio.mother, context, keep)?;
        let (father_genotypes, father_ln) =
            self.member_genotypes(&self.trio.father, context, keep)?;
        let (child_genotypes, child_ln) =
            self.member_genotypes(&self.trio.child, context, keep)?;

        // Joint posterior. The child's independent weight already includes
        // the content prior; the Mendelian term replaces it.
        let mut combos: Vec<(usize, usize, usize)> = Vec::new();
        let mut ln_weights: Vec<f64> = Vec::new();
        for (m, _) in mother_genotypes.iter().enumerate() {
            for (f, _) in father_genotypes.iter().enumerate() {
                for (c, _) in child_genotypes.iter().enumerate() {
                    let child_likelihood = child_ln[c]
                        - self.params.prior_model.ln_prior(&child_genotypes[c]);
                    let ln = mother_ln[m]
                        + father_ln[f]
                        + child_likelihood
                        + self.ln_mendelian(
                            &mother_genotypes[m],
                            &father_genotypes[f],
                            &child_genotypes[c],
                        );
                    combos.push((m, f, c));
                    ln_weights.push(ln);
                }
            }
        }
        let posteriors = normalize_ln(&ln_weights);
        let joint: Vec<(usize, usize, usize, f64)> = combos
            .into_iter()
            .zip(&posteriors)
            .map(|((m, f, c), &p)| (m, f, c, p))
            .collect();

        // Per-member marginals.
        let marginal = |member: usize, genotypes: &[Genotype<Arc<Haplotype>>]| {
            let mut mass = vec![0.0f64; genotypes.len()];
            for &(m, f, c, p) in &joint {
                let index = [m, f, c][member];
                mass[index] += p;
            }
            GenotypePosteriors {
                genotypes: genotypes.to_vec(),
                posteriors: mass,
            }
        };
        let mut marginals = BTreeMap::new();
        marginals.insert(self.trio.mother.clone(), marginal(0, &mother_genotypes));
        marginals.insert(self.trio.father.clone(), marginal(1, &father_genotypes));
        marginals.insert(self.trio.child.clone(), marginal(2, &child_genotypes));

        Ok(Box::new(TrioLatents {
            marginals,
            joint,
            mother_genotypes,
            father_genotypes,
            child_genotypes,
        }))
    }

    fn call_variants(
        &self,
        candidates: &[Variant],
        latents: &dyn Latents,
        context: &CallerContext,
    ) -> Result<Vec<VariantCall>> {
        let trio_latents = latents
            .as_any()
            .downcast_ref::<TrioLatents>()
            .ok_or_else(|| NautilusError::program("trio caller received foreign latents"))?;

        let mut calls = calls_from_posteriors(
            candidates,
            latents.genotype_posteriors(),
            context,
            &self.params,
        );

        for call in &mut calls {
            if call.is_refcall {
                continue;
            }
            let denovo_posterior = trio_latents.denovo_posterior(&call.variant);
            if denovo_posterior >= self.trio_params.min_denovo_posterior {
                call.denovo = Some(DenovoAnnotation {
                    posterior: probability_to_phred(1.0 - denovo_posterior),
                });
            }
        }
        if self.trio_params.denovos_only {
            calls.retain(|call| call.denovo.is_some());
        }
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callers::tests_support::*;

    fn trio() -> Trio {
        Trio {
            mother: "MUM".to_string(),
            father: "DAD".to_string(),
            child: "KID".to_string(),
        }
    }

    fn caller(trio_params: TrioParameters) -> TrioCaller {
        TrioCaller::new(trio(), CommonParameters::default(), trio_params)
    }

    #[test]
    fn test_denovo_in_child_annotated() {
        // Parents homozygous reference, child carries the alt in half its
        // reads: a de-novo heterozygous call.
        let fixture = WindowFixture::het_snv("MUM", 30, 0)
            .with_sample("DAD", 30, 0)
            .with_sample("KID", 10, 10);
        let caller = caller(TrioParameters::default());
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();

        let trio_latents = latents.as_any().downcast_ref::<TrioLatents>().unwrap();
        let denovo = trio_latents.denovo_posterior(&fixture.candidates[0]);
        assert!(denovo > 0.9, "de novo posterior was {}", denovo);

        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].denovo.is_some());
        assert!(!calls[0].genotypes["KID"].alleles.is_homozygous());
    }

    #[test]
    fn test_inherited_variant_not_denovo() {
        // Mother heterozygous, child heterozygous: inherited, not de novo.
        let fixture = WindowFixture::het_snv("MUM", 10, 10)
            .with_sample("DAD", 20, 0)
            .with_sample("KID", 10, 10);
        let caller = caller(TrioParameters::default());
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();

        let trio_latents = latents.as_any().downcast_ref::<TrioLatents>().unwrap();
        let denovo = trio_latents.denovo_posterior(&fixture.candidates[0]);
        assert!(denovo < 0.5, "de novo posterior was {}", denovo);

        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].denovo.is_none());
    }

    #[test]
    fn test_raised_threshold_suppresses_annotation() {
        let fixture = WindowFixture::het_snv("MUM", 20, 0)
            .with_sample("DAD", 20, 0)
            .with_sample("KID", 10, 10);
        let caller = caller(TrioParameters {
            min_denovo_posterior: 0.999_999_999,
            ..TrioParameters::default()
        });
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].denovo.is_none());
    }

    #[test]
    fn test_denovos_only_filter() {
        let fixture = WindowFixture::het_snv("MUM", 10, 10)
            .with_sample("DAD", 20, 0)
            .with_sample("KID", 10, 10);
        let caller = caller(TrioParameters {
            denovos_only: true,
            ..TrioParameters::default()
        });
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert!(calls.is_empty());
    }
}
