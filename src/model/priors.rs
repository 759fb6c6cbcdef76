//! # Genotype Priors
//!
//! Heterozygosity-based priors over haplotype genotypes. Each novel variant
//! allele a genotype carries costs one factor of the per-class mutation
//! density; the reference genotype takes the remaining mass. A uniform
//! switch turns the model off for regenotyping workflows.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::data::haplotype::{Genotype, Haplotype};

#[derive(Clone, Debug)]
pub struct GenotypePriorModel {
    pub snp_heterozygosity: f64,
    pub indel_heterozygosity: f64,
    /// Ignore variant content and weight genotypes equally
    pub uniform: bool,
}

impl Default for GenotypePriorModel {
    fn default() -> Self {
        Self {
            snp_heterozygosity: 0.001,
            indel_heterozygosity: 0.0001,
            uniform: false,
        }
    }
}

impl GenotypePriorModel {
    /// `ln P(genotype)` up to a window-constant normalizer.
    pub fn ln_prior(&self, genotype: &Genotype<Arc<Haplotype>>) -> f64 {
        if self.uniform {
            return 0.0;
        }
        let mut ln = 0.0;
        for haplotype in self.distinct_haplotypes(genotype) {
            ln += self.ln_haplotype_weight(haplotype);
        }
        // Heterozygous configurations split mass across orderings.
        if !genotype.is_homozygous() {
            ln += (genotype.zygosity() as f64).ln() - (genotype.ploidy() as f64).ln();
        }
        ln
    }

    /// `ln` weight of one haplotype by its variant content.
    pub fn ln_haplotype_weight(&self, haplotype: &Haplotype) -> f64 {
        let mut ln = 0.0;
        for allele in haplotype.explicit_alleles() {
            let is_snv =
                allele.region().len() == 1 && allele.sequence().len() == 1;
            ln += if is_snv {
                self.snp_heterozygosity.ln()
            } else {
                self.indel_heterozygosity.ln()
            };
        }
        ln
    }

    fn distinct_haplotypes<'a>(
        &self,
        genotype: &'a Genotype<Arc<Haplotype>>,
    ) -> impl Iterator<Item = &'a Haplotype> {
        let mut seen: BTreeSet<&Arc<Haplotype>> = BTreeSet::new();
        genotype
            .iter()
            .filter(move |h| seen.insert(h))
            .map(|h| h.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::haplotype::HaplotypeBuilder;
    use crate::data::region::GenomicRegion;
    use crate::data::variant::Allele;

    fn haplotype(snvs: &[u32]) -> Arc<Haplotype> {
        let region = GenomicRegion::new("chr1", 0, 50);
        let mut builder =
            HaplotypeBuilder::new(region, vec![b'A'; 50], 0).unwrap();
        for &pos in snvs {
            builder
                .push(Allele::new(
                    GenomicRegion::new("chr1", pos, pos + 1),
                    b"C".to_vec(),
                ))
                .unwrap();
        }
        Arc::new(builder.build())
    }

    #[test]
    fn test_reference_preferred() {
        let model = GenotypePriorModel::default();
        let reference = haplotype(&[]);
        let alt = haplotype(&[10]);

        let hom_ref = Genotype::new(vec![Arc::clone(&reference), Arc::clone(&reference)]);
        let het = Genotype::new(vec![reference, Arc::clone(&alt)]);
        let hom_alt = Genotype::new(vec![Arc::clone(&alt), alt]);

        assert!(model.ln_prior(&hom_ref) > model.ln_prior(&het));
        // More variant content always costs prior mass.
        assert!(model.ln_prior(&hom_ref) > model.ln_prior(&hom_alt));
    }

    #[test]
    fn test_more_variants_cost_more() {
        let model = GenotypePriorModel::default();
        let one = haplotype(&[10]);
        let two = haplotype(&[10, 20]);
        assert!(model.ln_haplotype_weight(&one) > model.ln_haplotype_weight(&two));
    }

    #[test]
    fn test_uniform_prior() {
        let model = GenotypePriorModel {
            uniform: true,
            ..GenotypePriorModel::default()
        };
        let alt = haplotype(&[10, 20, 30]);
        let genotype = Genotype::new(vec![Arc::clone(&alt), alt]);
        assert_eq!(model.ln_prior(&genotype), 0.0);
    }
}
