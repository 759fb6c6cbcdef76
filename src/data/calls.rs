//! # Call Records
//!
//! The engine's output currency: a `VariantCall` binds a normalized variant
//! to per-sample genotype calls, optional phase and somatic/de-novo
//! annotations, and a Phred site quality. A `CallSet` collects the calls of
//! one evaluation region in genomic order.

use std::collections::BTreeMap;

use crate::data::haplotype::Genotype;
use crate::data::mappable::Mappable;
use crate::data::region::GenomicRegion;
use crate::data::variant::{Allele, Variant};

/// One sample's genotype at a called site.
#[derive(Clone, Debug)]
pub struct GenotypeCall {
    /// The called alleles; ploidy is the multiset size.
    pub alleles: Genotype<Allele>,
    /// Posterior probability of this genotype.
    pub posterior: f64,
    /// Read depth over the site.
    pub depth: u32,
    /// Whether the genotype is phased with the previous call in its set.
    pub phased: bool,
}

impl GenotypeCall {
    /// Genotype quality as Phred of the posterior's complement.
    pub fn quality(&self) -> f64 {
        crate::utils::maths::probability_to_phred(1.0 - self.posterior)
    }
}

/// Membership of a call in a phase set.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseCall {
    /// Region identifying the phase set (its leftmost call position).
    pub phase_set: GenomicRegion,
    /// Phred-scaled phasing score.
    pub score: f64,
}

/// A posterior credible interval on an allele frequency.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CredibleInterval {
    pub lower: f64,
    pub upper: f64,
    /// The posterior mass the interval contains.
    pub mass: f64,
}

/// Somatic annotation attached by the cancer caller.
#[derive(Clone, Debug)]
pub struct SomaticAnnotation {
    /// Phred-scaled somatic posterior.
    pub posterior: f64,
    /// Credible interval on the somatic allele frequency, per tumour sample.
    pub credible_vaf: BTreeMap<String, CredibleInterval>,
}

/// De-novo annotation attached by the trio caller.
#[derive(Clone, Debug)]
pub struct DenovoAnnotation {
    /// Phred-scaled de-novo posterior.
    pub posterior: f64,
}

/// A called variant (or reference site) with per-sample genotypes.
#[derive(Clone, Debug)]
pub struct VariantCall {
    pub variant: Variant,
    /// Phred-scaled site quality.
    pub quality: f64,
    /// Per-sample genotype calls, keyed by sample name.
    pub genotypes: BTreeMap<String, GenotypeCall>,
    pub phase: Option<PhaseCall>,
    pub somatic: Option<SomaticAnnotation>,
    pub denovo: Option<DenovoAnnotation>,
    /// True when this records reference support rather than a variant.
    pub is_refcall: bool,
    /// FILTER column entries; empty means PASS.
    pub filters: Vec<String>,
}

impl VariantCall {
    pub fn new(variant: Variant, quality: f64) -> Self {
        Self {
            variant,
            quality,
            genotypes: BTreeMap::new(),
            phase: None,
            somatic: None,
            denovo: None,
            is_refcall: false,
            filters: Vec::new(),
        }
    }

    /// The alt allele this call asserts.
    pub fn alt_allele(&self) -> Allele {
        self.variant.alt_allele()
    }

    /// Highest genotype posterior across samples.
    pub fn max_genotype_posterior(&self) -> f64 {
        self.genotypes
            .values()
            .map(|g| g.posterior)
            .fold(0.0, f64::max)
    }
}

impl Mappable for VariantCall {
    fn region(&self) -> &GenomicRegion {
        self.variant.region()
    }
}

/// The calls of one evaluation region, kept in genomic order.
#[derive(Clone, Debug, Default)]
pub struct CallSet {
    calls: Vec<VariantCall>,
}

impl CallSet {
    pub fn new(mut calls: Vec<VariantCall>) -> Self {
        calls.sort_by(|a, b| a.variant.region().cmp(b.variant.region()));
        Self { calls }
    }

    pub fn push(&mut self, call: VariantCall) {
        let pos = self
            .calls
            .partition_point(|c| c.variant.region() <= call.variant.region());
        self.calls.insert(pos, call);
    }

    pub fn calls(&self) -> &[VariantCall] {
        &self.calls
    }

    pub fn calls_mut(&mut self) -> &mut [VariantCall] {
        &mut self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn into_calls(self) -> Vec<VariantCall> {
        self.calls
    }

    /// Bounding region of all calls, if any.
    pub fn span(&self) -> Option<GenomicRegion> {
        let first = self.calls.first()?;
        let last = self.calls.last()?;
        first.variant.region().encompassing(last.variant.region()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(begin: u32) -> VariantCall {
        let variant = Variant::new(
            GenomicRegion::new("chr1", begin, begin + 1),
            b"A".to_vec(),
            b"G".to_vec(),
        )
        .unwrap();
        VariantCall::new(variant, 50.0)
    }

    #[test]
    fn test_callset_maintains_order() {
        let mut set = CallSet::new(vec![call(30), call(10)]);
        set.push(call(20));
        let begins: Vec<u32> = set
            .calls()
            .iter()
            .map(|c| c.variant.region().begin())
            .collect();
        assert_eq!(begins, vec![10, 20, 30]);
    }

    #[test]
    fn test_callset_span() {
        let set = CallSet::new(vec![call(10), call(30)]);
        assert_eq!(set.span().unwrap(), GenomicRegion::new("chr1", 10, 31));
        assert!(CallSet::default().span().is_none());
    }
}
