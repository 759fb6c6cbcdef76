//! # Phaser
//!
//! Phase-set inference over adjacent evaluation windows. Within a window,
//! phasing certainty is the concentration of the genotype posterior; across
//! a window boundary, calls may join the previous phase set only when the
//! lagging policy carried indicators over the boundary and the joint score
//! clears `min_phase_score`. Phase sets never span contigs.

use std::collections::BTreeMap;

use crate::callers::GenotypePosteriors;
use crate::data::calls::{PhaseCall, VariantCall};
use crate::data::region::GenomicRegion;
use crate::utils::maths::probability_to_phred;

#[derive(Clone, Debug)]
pub struct Phaser {
    /// Phred-scaled minimum joint phasing score
    pub min_phase_score: f64,
}

impl Default for Phaser {
    fn default() -> Self {
        Self {
            min_phase_score: 10.0,
        }
    }
}

/// The open phase set at the trailing edge of processed windows.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseSetState {
    pub region: GenomicRegion,
    pub n_calls: usize,
}

impl Phaser {
    /// The window's joint phasing score: the weakest sample's MAP-genotype
    /// concentration, Phred-scaled.
    pub fn window_phase_score(
        &self,
        posteriors: &BTreeMap<String, GenotypePosteriors>,
    ) -> f64 {
        posteriors
            .values()
            .filter_map(|p| p.map_genotype().map(|(_, posterior)| posterior))
            .map(|posterior| probability_to_phred(1.0 - posterior))
            .fold(f64::INFINITY, f64::min)
            .min(3000.0)
    }

    /// Assign phase sets to the window's calls, merging with the previous
    /// window's set when indicators crossed the boundary with enough
    /// score. Returns the new open phase-set state.
    pub fn phase(
        &self,
        previous: Option<PhaseSetState>,
        calls: &mut [VariantCall],
        posteriors: &BTreeMap<String, GenotypePosteriors>,
        had_indicators: bool,
    ) -> Option<PhaseSetState> {
        let variant_calls: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_refcall)
            .map(|(i, _)| i)
            .collect();
        if variant_calls.is_empty() {
            return previous;
        }

        let score = self.window_phase_score(posteriors);
        let first_region = calls[variant_calls[0]].variant.region().clone();
        let last_region = calls[*variant_calls.last().expect("nonempty")]
            .variant
            .region()
            .clone();

        // Merge across the boundary only with indicator overlap, enough
        // score, and a same-contig previous set.
        let merged = match &previous {
            Some(state)
                if had_indicators
                    && score >= self.min_phase_score
                    && state.region.contig() == first_region.contig() =>
            {
                Some(state.clone())
            }
            _ => None,
        };

        let (set_begin, inherited_calls) = match &merged {
            Some(state) => (state.region.begin(), state.n_calls),
            None => (first_region.begin(), 0),
        };
        let set_region = GenomicRegion::new(
            first_region.contig_arc(),
            set_begin,
            last_region.end().max(set_begin),
        );

        // Calls within one window phase together when the score clears the
        // threshold; otherwise each becomes its own singleton set.
        let within_window_phased = score >= self.min_phase_score;
        let n_in_set = inherited_calls + variant_calls.len();

        for &index in &variant_calls {
            let call = &mut calls[index];
            if within_window_phased {
                call.phase = Some(PhaseCall {
                    phase_set: set_region.clone(),
                    score,
                });
                let phased = n_in_set > 1;
                for genotype in call.genotypes.values_mut() {
                    genotype.phased = phased;
                }
            } else {
                // Singleton set anchored at the call itself.
                let own = call.variant.region().clone();
                call.phase = Some(PhaseCall {
                    phase_set: own,
                    score,
                });
            }
        }

        if within_window_phased {
            Some(PhaseSetState {
                region: set_region,
                n_calls: n_in_set,
            })
        } else {
            // The next window cannot join a low-confidence set.
            let last = calls[*variant_calls.last().expect("nonempty")]
                .variant
                .region()
                .clone();
            Some(PhaseSetState {
                region: last,
                n_calls: 1,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callers::tests_support::*;
    use crate::callers::{sample_posteriors, CommonParameters};
    use crate::data::calls::VariantCall;
    use crate::data::variant::Variant;

    fn call_at(begin: u32) -> VariantCall {
        let variant = Variant::new(
            GenomicRegion::new("chr1", begin, begin + 1),
            b"A".to_vec(),
            b"C".to_vec(),
        )
        .unwrap();
        let mut call = VariantCall::new(variant, 50.0);
        call.genotypes.insert(
            "S1".to_string(),
            crate::data::calls::GenotypeCall {
                alleles: crate::data::haplotype::Genotype::new(vec![
                    call.variant.ref_allele(),
                    call.variant.alt_allele(),
                ]),
                posterior: 0.99,
                depth: 20,
                phased: false,
            },
        );
        call
    }

    fn confident_posteriors() -> BTreeMap<String, GenotypePosteriors> {
        // A decisive read mix gives a concentrated genotype posterior.
        let fixture = WindowFixture::het_snv("S1", 20, 20);
        let mut map = BTreeMap::new();
        map.insert(
            "S1".to_string(),
            sample_posteriors(
                &fixture.haplotypes,
                &fixture.likelihoods["S1"],
                2,
                &CommonParameters::default(),
            ),
        );
        map
    }

    #[test]
    fn test_window_calls_share_phase_set() {
        let phaser = Phaser::default();
        let posteriors = confident_posteriors();
        let mut calls = vec![call_at(100), call_at(110)];
        let state = phaser.phase(None, &mut calls, &posteriors, false).unwrap();

        assert_eq!(state.n_calls, 2);
        let ps0 = calls[0].phase.as_ref().unwrap();
        let ps1 = calls[1].phase.as_ref().unwrap();
        assert_eq!(ps0.phase_set, ps1.phase_set);
        assert!(calls[0].genotypes["S1"].phased);
        assert!(ps0.score >= phaser.min_phase_score);
    }

    #[test]
    fn test_merge_requires_indicators() {
        let phaser = Phaser::default();
        let posteriors = confident_posteriors();

        let mut first = vec![call_at(100)];
        let state = phaser.phase(None, &mut first, &posteriors, false).unwrap();

        // Without indicators the next window starts its own set.
        let mut second = vec![call_at(200)];
        let state_no_lag = phaser
            .phase(Some(state.clone()), &mut second, &posteriors, false)
            .unwrap();
        assert_eq!(state_no_lag.region.begin(), 200);

        // With indicators it extends the previous set.
        let mut third = vec![call_at(200)];
        let state_lag = phaser
            .phase(Some(state), &mut third, &posteriors, true)
            .unwrap();
        assert_eq!(state_lag.region.begin(), 100);
        assert_eq!(state_lag.n_calls, 2);
        assert!(third[0].genotypes["S1"].phased);
    }

    #[test]
    fn test_phase_sets_never_span_contigs() {
        let phaser = Phaser::default();
        let posteriors = confident_posteriors();

        let mut first = vec![call_at(100)];
        let state = phaser.phase(None, &mut first, &posteriors, true).unwrap();

        let variant = Variant::new(
            GenomicRegion::new("chr2", 50, 51),
            b"A".to_vec(),
            b"C".to_vec(),
        )
        .unwrap();
        let mut other_contig = vec![VariantCall::new(variant, 50.0)];
        let merged = phaser
            .phase(Some(state), &mut other_contig, &posteriors, true)
            .unwrap();
        assert_eq!(merged.region.contig(), "chr2");
        assert_eq!(merged.n_calls, 1);
    }

    #[test]
    fn test_refcalls_do_not_open_sets() {
        let phaser = Phaser::default();
        let posteriors = confident_posteriors();
        let mut refcall = call_at(100);
        refcall.is_refcall = true;
        let mut calls = vec![refcall];
        assert!(phaser.phase(None, &mut calls, &posteriors, false).is_none());
        assert!(calls[0].phase.is_none());
    }
}
