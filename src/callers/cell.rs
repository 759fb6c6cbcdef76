//! # Single-Cell Caller
//!
//! Per-cell genotyping under allelic dropout. Amplification in single-cell
//! libraries frequently samples only one allele of a heterozygous site, so
//! the read likelihood of a genotype is a mixture: with the dropout
//! probability the cell expresses a single allele, otherwise all alleles
//! contribute. The dropout probability derives from the configured
//! concentration: `P(dropout) = 1 / (1 + concentration)`, the mean of a
//! symmetric Beta(1, concentration) balance prior.

use std::collections::BTreeMap;

use crate::data::calls::VariantCall;
use crate::data::haplotype::Genotype;
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};
use crate::model::likelihood::LikelihoodMatrix;
use crate::utils::maths::{ln_sum_exp, normalize_ln};

use super::{
    calls_from_posteriors, indexed_genotypes, materialize, Caller, CallerContext,
    CommonParameters, GenotypePosteriors, Latents,
};

/// Cell-specific parameters.
#[derive(Clone, Debug)]
pub struct CellParameters {
    /// Concentration of the allelic-balance prior; higher means less
    /// dropout
    pub dropout_concentration: f64,
}

impl Default for CellParameters {
    fn default() -> Self {
        Self {
            dropout_concentration: 20.0,
        }
    }
}

pub struct CellCaller {
    /// Each sample is one cell
    pub cells: Vec<String>,
    pub params: CommonParameters,
    pub cell_params: CellParameters,
}

#[derive(Debug)]
pub struct CellLatents {
    posteriors: BTreeMap<String, GenotypePosteriors>,
}

impl Latents for CellLatents {
    fn genotype_posteriors(&self) -> &BTreeMap<String, GenotypePosteriors> {
        &self.posteriors
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl CellCaller {
    pub fn new(cells: Vec<String>, params: CommonParameters, cell_params: CellParameters) -> Self {
        Self {
            cells,
            params,
            cell_params,
        }
    }

    fn dropout_probability(&self) -> f64 {
        1.0 / (1.0 + self.cell_params.dropout_concentration.max(0.0))
    }

    /// `ln P(reads | genotype)` under the dropout mixture: either one
    /// allele dropped to a single expressed haplotype, or the plain
    /// equal-mixture emission.
    fn ln_dropout_likelihood(
        &self,
        genotype: &Genotype<usize>,
        likelihoods: &LikelihoodMatrix,
    ) -> f64 {
        let dropout = self.dropout_probability();
        let ploidy = genotype.ploidy() as f64;
        let ln_no_dropout = (1.0 - dropout).ln();
        let ln_dropout_each = (dropout / ploidy).ln();

        // Full-expression branch.
        let mut ln_full = 0.0;
        for read in 0..likelihoods.n_reads() {
            let terms: Vec<f64> = genotype
                .iter()
                .map(|&h| likelihoods.get(h, read) - ploidy.ln())
                .collect();
            ln_full += ln_sum_exp(&terms);
        }

        // One branch per haplotype that could remain after dropout.
        let mut branches = vec![ln_no_dropout + ln_full];
        for &survivor in genotype.iter() {
            let mut ln_single = 0.0;
            for read in 0..likelihoods.n_reads() {
                ln_single += likelihoods.get(survivor, read);
            }
            branches.push(ln_dropout_each + ln_single);
        }
        ln_sum_exp(&branches)
    }
}

impl Caller for CellCaller {
    fn infer_latents(&self, context: &CallerContext) -> Result<Box<dyn Latents>> {
        let mut posteriors = BTreeMap::new();
        for cell in &self.cells {
            let likelihoods = context.likelihoods.get(cell).ok_or_else(|| {
                NautilusError::program(format!("no likelihoods for cell {}", cell))
            })?;
            let ploidy = self.params.ploidies.of(cell, context.region.contig()) as usize;
            let genotypes =
                indexed_genotypes(context.haplotypes.len(), ploidy, self.params.max_genotypes);
            let ln_weights: Vec<f64> = genotypes
                .iter()
                .map(|genotype| {
                    let materialized = materialize(genotype, context.haplotypes);
                    self.params.prior_model.ln_prior(&materialized)
                        + self.ln_dropout_likelihood(genotype, likelihoods)
                })
                .collect();
            let normalized = normalize_ln(&ln_weights);
            posteriors.insert(
                cell.clone(),
                GenotypePosteriors {
                    genotypes: genotypes
                        .iter()
                        .map(|g| materialize(g, context.haplotypes))
                        .collect(),
                    posteriors: normalized,
                },
            );
        }
        Ok(Box::new(CellLatents { posteriors }))
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

    fn caller(cells: &[&str]) -> CellCaller {
        CellCaller::new(
            cells.iter().map(|s| s.to_string()).collect(),
            CommonParameters::default(),
            CellParameters::default(),
        )
    }

    #[test]
    fn test_balanced_het_called() {
        let fixture = WindowFixture::het_snv("CELL1", 15, 15);
        let caller = caller(&["CELL1"]);
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].genotypes["CELL1"].alleles.is_homozygous());
    }

    #[test]
    fn test_skewed_het_called() {
        // Heavy allelic imbalance: 28 ref reads, 6 alt reads.
        let fixture = WindowFixture::het_snv("CELL1", 28, 6);
        let caller = caller(&["CELL1"]);
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let posteriors = &latents.genotype_posteriors()["CELL1"];
        let het_posterior = posteriors.variant_posterior(&fixture.candidates[0]);
        assert!(het_posterior > 0.98, "het posterior was {}", het_posterior);
    }

    #[test]
    fn test_dropout_mixture_dominates_plain_model_at_full_skew() {
        // All reads from one allele: the dropout branch explains the data
        // far better than the equal-mixture emission.
        use crate::callers::ln_genotype_likelihood;
        use crate::data::haplotype::Genotype;

        let fixture = WindowFixture::het_snv("CELL1", 28, 0);
        let likelihoods = &fixture.likelihoods["CELL1"];
        let het = Genotype::new(vec![0usize, 1usize]);
        let with_dropout = caller(&["CELL1"]).ln_dropout_likelihood(&het, likelihoods);
        let plain = ln_genotype_likelihood(&het, likelihoods);
        assert!(with_dropout > plain + 5.0);
    }

    #[test]
    fn test_multiple_cells_called_independently() {
        let fixture = WindowFixture::het_snv("CELL1", 10, 10).with_sample("CELL2", 20, 0);
        let caller = caller(&["CELL1", "CELL2"]);
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert!(!call.genotypes["CELL1"].alleles.is_homozygous());
        assert!(call.genotypes["CELL2"].alleles.is_homozygous());
    }
}
