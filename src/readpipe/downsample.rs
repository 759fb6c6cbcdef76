//! # Downsampling
//!
//! Coverage-triggered read thinning. When mean coverage over a fetch region
//! exceeds the trigger, reads are kept with probability `target / coverage`
//! using a seeded generator so reruns are identical.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::read::AlignedRead;
use crate::data::region::GenomicRegion;
use crate::utils::advisory::{Advisory, AdvisoryChannel};

#[derive(Clone, Copy, Debug)]
pub struct Downsampler {
    /// Mean coverage above which thinning starts
    pub trigger: u32,
    /// Mean coverage aimed for after thinning
    pub target: u32,
    /// Base seed mixed with the region for deterministic selection
    pub seed: u64,
}

impl Downsampler {
    pub fn new(trigger: u32, target: u32, seed: u64) -> Self {
        Self {
            trigger,
            target,
            seed,
        }
    }

    /// Mean coverage of `reads` over `region`.
    pub fn mean_coverage(reads: &[AlignedRead], region: &GenomicRegion) -> f64 {
        if region.is_empty() {
            return 0.0;
        }
        let covered: u64 = reads
            .iter()
            .filter_map(|r| r.region().intersect(region))
            .map(|overlap| overlap.len() as u64)
            .sum();
        covered as f64 / region.len() as f64
    }

    /// Thin `reads` in place when coverage exceeds the trigger. Returns the
    /// number of removed reads.
    pub fn apply(
        &self,
        reads: &mut Vec<AlignedRead>,
        region: &GenomicRegion,
        advisories: &AdvisoryChannel,
    ) -> usize {
        let coverage = Self::mean_coverage(reads, region);
        if coverage <= self.trigger as f64 || coverage == 0.0 {
            return 0;
        }
        let keep_probability = (self.target as f64 / coverage).clamp(0.0, 1.0);
        // Region-derived seed: the same window always thins identically.
        let mut seed = self.seed ^ ((region.begin() as u64) << 32 | region.end() as u64);
        for b in region.contig().bytes() {
            seed = seed.wrapping_mul(31).wrapping_add(b as u64);
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let before = reads.len();
        reads.retain(|_| rng.gen::<f64>() < keep_probability);
        let removed = before - reads.len();
        if removed > 0 {
            advisories.report(Advisory::Downsampled);
        }
        removed
    }
}
