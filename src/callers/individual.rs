//! # Individual Caller
//!
//! Single-sample germline genotyping: the genotype posterior is the
//! heterozygosity prior times the read likelihood, normalized over the
//! window's genotype space.

use std::collections::BTreeMap;

use crate::data::calls::VariantCall;
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};

use super::{
    calls_from_posteriors, sample_posteriors, Caller, CallerContext, CommonParameters,
    GenotypePosteriors, Latents,
};

pub struct IndividualCaller {
    pub sample: String,
    pub params: CommonParameters,
}

#[derive(Debug)]
pub struct IndividualLatents {
    posteriors: BTreeMap<String, GenotypePosteriors>,
}

impl Latents for IndividualLatents {
    fn genotype_posteriors(&self) -> &BTreeMap<String, GenotypePosteriors> {
        &self.posteriors
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl IndividualCaller {
    pub fn new(sample: String, params: CommonParameters) -> Self {
        Self { sample, params }
    }
}

impl Caller for IndividualCaller {
    fn infer_latents(&self, context: &CallerContext) -> Result<Box<dyn Latents>> {
        let likelihoods = context.likelihoods.get(&self.sample).ok_or_else(|| {
            NautilusError::program(format!("no likelihoods for sample {}", self.sample))
        })?;
        let ploidy = self
            .params
            .ploidies
            .of(&self.sample, context.region.contig()) as usize;
        let posteriors = sample_posteriors(context.haplotypes, likelihoods, ploidy, &self.params);
        let mut map = BTreeMap::new();
        map.insert(self.sample.clone(), posteriors);
        Ok(Box::new(IndividualLatents { posteriors: map }))
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

    #[test]
    fn test_het_snv_called() {
        let fixture = WindowFixture::het_snv("S1", 10, 10);
        let caller = IndividualCaller::new("S1".to_string(), CommonParameters::default());
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();

        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert!(call.quality > 20.0);
        let genotype = &call.genotypes["S1"];
        assert_eq!(genotype.alleles.ploidy(), 2);
        assert!(!genotype.alleles.is_homozygous());
        assert!(genotype.posterior > 0.9);
    }

    #[test]
    fn test_hom_ref_not_called() {
        let fixture = WindowFixture::het_snv("S1", 20, 0);
        let caller = IndividualCaller::new("S1".to_string(), CommonParameters::default());
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert!(calls.is_empty());
    }

    #[test]
    fn test_refcall_emitted_when_enabled() {
        let fixture = WindowFixture::het_snv("S1", 20, 0);
        let params = CommonParameters {
            refcall: super::super::RefCallType::Positional,
            ..CommonParameters::default()
        };
        let caller = IndividualCaller::new("S1".to_string(), params);
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_refcall);
    }

    #[test]
    fn test_hom_alt_genotype() {
        let fixture = WindowFixture::het_snv("S1", 0, 20);
        let caller = IndividualCaller::new("S1".to_string(), CommonParameters::default());
        let context = fixture.context();
        let latents = caller.infer_latents(&context).unwrap();
        let calls = caller
            .call_variants(&fixture.candidates, latents.as_ref(), &context)
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].genotypes["S1"].alleles.is_homozygous());
    }
}
