//! # Haplotype Generation
//!
//! Builds the haplotype population for each evaluation window: candidate
//! variants are packed into windows by the extension policy, combined into
//! haplotypes (every compatible take/skip combination), deduplicated, and
//! capped. When a window would blow the soft cap, the newest candidates are
//! held out and re-introduced in smaller sub-windows; the hard cap bails
//! out of the window entirely.

use std::sync::Arc;

use tracing::debug;

use crate::data::haplotype::{Haplotype, HaplotypeBuilder};
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};

/// How far the window reaches forward when merging candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionPolicy {
    Conservative,
    Normal,
    Optimistic,
    Aggressive,
}

impl ExtensionPolicy {
    /// Maximum gap between consecutive candidates merged into one window.
    pub fn merge_distance(self) -> u32 {
        match self {
            Self::Conservative => 15,
            Self::Normal => 30,
            Self::Optimistic => 75,
            Self::Aggressive => 150,
        }
    }

    /// Upper bound on candidates per window before packing stops.
    pub fn max_window_candidates(self) -> usize {
        match self {
            Self::Conservative => 8,
            Self::Normal => 12,
            Self::Optimistic => 16,
            Self::Aggressive => 24,
        }
    }
}

/// How many of the previous window's variants carry forward as indicators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaggingPolicy {
    None,
    Conservative,
    Moderate,
    Normal,
    Aggressive,
}

impl LaggingPolicy {
    pub fn indicator_count(self) -> usize {
        match self {
            Self::None => 0,
            Self::Conservative => 1,
            Self::Moderate => 2,
            Self::Normal => 3,
            Self::Aggressive => 5,
        }
    }
}

/// Tolerance for candidate-dense windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenseRegionTolerance {
    Low,
    Normal,
}

/// Generator parameters.
#[derive(Clone, Debug)]
pub struct HaplotypeGeneratorConfig {
    pub extension: ExtensionPolicy,
    pub lagging: LaggingPolicy,
    /// Soft cap on the haplotype population
    pub target_limit: usize,
    /// Population size at which holdout starts
    pub holdout_limit: usize,
    /// Hard cap; beyond it the window is abandoned
    pub overflow_limit: usize,
    pub max_holdout_depth: usize,
    /// Flank pad parameter; windows gain `2 * (2 * pad - 1)` reference
    /// flank on each side
    pub pad_requirement: u32,
    /// Expected per-base SNV heterozygosity, for dense-window detection
    pub snp_heterozygosity: f64,
    pub snp_heterozygosity_stdev: f64,
    pub dense_tolerance: DenseRegionTolerance,
}

impl Default for HaplotypeGeneratorConfig {
    fn default() -> Self {
        Self {
            extension: ExtensionPolicy::Normal,
            lagging: LaggingPolicy::Normal,
            target_limit: 200,
            holdout_limit: 2500,
            overflow_limit: 200_000,
            max_holdout_depth: 20,
            pad_requirement: 11,
            snp_heterozygosity: 0.001,
            snp_heterozygosity_stdev: 0.01,
            dense_tolerance: DenseRegionTolerance::Normal,
        }
    }
}

impl HaplotypeGeneratorConfig {
    /// Reference flank added to each side of the evaluation region so the
    /// likelihood model's boundary states stay off the variants.
    pub fn flank_pad(&self) -> u32 {
        2 * (2 * self.pad_requirement).saturating_sub(1)
    }
}

/// One window's generated haplotype population.
#[derive(Clone, Debug)]
pub struct HaplotypeSet {
    pub haplotypes: Vec<Arc<Haplotype>>,
    /// The padded region all haplotypes span
    pub evaluation_region: GenomicRegion,
    /// Candidates excluded to meet the caps, for re-introduction
    pub holdouts: Vec<Variant>,
    /// The hard cap was hit; no haplotypes were produced
    pub overflowed: bool,
}

pub struct HaplotypeGenerator {
    pub config: HaplotypeGeneratorConfig,
}

impl HaplotypeGenerator {
    pub fn new(config: HaplotypeGeneratorConfig) -> Self {
        Self { config }
    }

    /// Pack sorted candidates into evaluation windows by the extension
    /// policy: consecutive candidates merge while the gap stays within the
    /// merge distance and the window stays under the candidate bound.
    pub fn plan_windows(&self, candidates: &[Variant]) -> Vec<Vec<Variant>> {
        let mut windows: Vec<Vec<Variant>> = Vec::new();
        for candidate in candidates {
            match windows.last_mut() {
                Some(window) => {
                    let last = window.last().expect("windows are never empty");
                    let close_enough = candidate.region().contig() == last.region().contig()
                        && candidate
                            .region()
                            .begin()
                            .saturating_sub(last.region().end())
                            <= self.config.extension.merge_distance();
                    if close_enough
                        && window.len() < self.config.extension.max_window_candidates()
                    {
                        window.push(candidate.clone());
                    } else {
                        windows.push(vec![candidate.clone()]);
                    }
                }
                None => windows.push(vec![candidate.clone()]),
            }
        }
        windows
    }

    /// Indicators to carry into the next window under the lagging policy:
    /// the last N variants expressed by the current window.
    pub fn indicators(&self, window: &[Variant]) -> Vec<Variant> {
        let n = self.config.lagging.indicator_count().min(window.len());
        window[window.len() - n..].to_vec()
    }

    /// A window is dense when its candidate count is significantly above
    /// the heterozygosity expectation.
    pub fn is_dense(&self, n_candidates: usize, span: u32) -> bool {
        let span = span.max(1) as f64;
        let expected = self.config.snp_heterozygosity * span;
        let spread = (self.config.snp_heterozygosity_stdev * span).max(expected.sqrt());
        n_candidates as f64 > expected + 3.0 * spread
    }

    /// Generate the haplotype population for one window.
    ///
    /// `indicators` are the lagged variants from the previous window;
    /// `fetch_reference` supplies reference bases for the padded region.
    pub fn generate(
        &self,
        window: &[Variant],
        indicators: &[Variant],
        fetch_reference: impl Fn(&GenomicRegion) -> Result<Vec<u8>>,
        contig_size: u32,
    ) -> Result<HaplotypeSet> {
        let mut variants: Vec<Variant> = indicators
            .iter()
            .chain(window.iter())
            .cloned()
            .collect();
        variants.sort();
        variants.dedup();
        if variants.is_empty() {
            return Err(NautilusError::program(
                "haplotype generation invoked with no candidates",
            ));
        }

        let span = {
            let first = variants.first().expect("nonempty").region().clone();
            let last = variants.last().expect("nonempty").region();
            first.encompassing(last)?
        };

        // Dense windows get a pre-emptively lowered soft cap.
        let mut target_limit = self.config.target_limit;
        if self.is_dense(variants.len(), span.len()) {
            target_limit = match self.config.dense_tolerance {
                DenseRegionTolerance::Low => target_limit / 4,
                DenseRegionTolerance::Normal => target_limit / 2,
            };
            debug!(window = %span, n = variants.len(), "dense window; lowering target");
        }
        let target_limit = target_limit.max(2);

        // Holdout rounds: shed the newest candidates until the projected
        // population fits. Indicators are never held out.
        let mut holdouts: Vec<Variant> = Vec::new();
        let n_protected = indicators.len().min(variants.len());
        let mut rounds = 0;
        while projected_population(&variants) > self.config.holdout_limit.max(target_limit)
            && rounds < self.config.max_holdout_depth
            && variants.len() > n_protected.max(1)
        {
            let remove = ((variants.len() - n_protected) / 2).max(1);
            for _ in 0..remove {
                if variants.len() <= n_protected.max(1) {
                    break;
                }
                holdouts.push(variants.pop().expect("nonempty"));
            }
            rounds += 1;
        }
        holdouts.reverse(); // keep genomic order

        if projected_population(&variants) > self.config.overflow_limit {
            return Ok(HaplotypeSet {
                haplotypes: Vec::new(),
                evaluation_region: span,
                holdouts,
                overflowed: true,
            });
        }

        // Padded evaluation region.
        let pad = self.config.flank_pad();
        let span = {
            let first = variants.first().expect("nonempty").region().clone();
            let last = variants.last().expect("nonempty").region();
            first.encompassing(last)?
        };
        let evaluation_region = GenomicRegion::new(
            span.contig_arc(),
            span.begin().saturating_sub(pad),
            (span.end() + pad).min(contig_size),
        );
        let reference_window = fetch_reference(&evaluation_region)?;

        // Expand every compatible take/skip combination.
        let mut haplotypes: Vec<Arc<Haplotype>> = Vec::new();
        let mut selection: Vec<usize> = Vec::new();
        self.expand(
            &variants,
            0,
            &mut selection,
            &evaluation_region,
            &reference_window,
            &mut haplotypes,
        )?;

        // Dedup by concrete sequence.
        haplotypes.sort();
        haplotypes.dedup();

        if haplotypes.len() > self.config.overflow_limit {
            return Ok(HaplotypeSet {
                haplotypes: Vec::new(),
                evaluation_region,
                holdouts,
                overflowed: true,
            });
        }

        Ok(HaplotypeSet {
            haplotypes,
            evaluation_region,
            holdouts,
            overflowed: false,
        })
    }

    fn expand(
        &self,
        variants: &[Variant],
        index: usize,
        selection: &mut Vec<usize>,
        region: &GenomicRegion,
        reference_window: &[u8],
        out: &mut Vec<Arc<Haplotype>>,
    ) -> Result<()> {
        if out.len() > self.config.overflow_limit {
            return Ok(()); // bail; caller reports overflow
        }
        if index == variants.len() {
            let mut builder = HaplotypeBuilder::new(
                region.clone(),
                reference_window.to_vec(),
                region.begin(),
            )?;
            for &i in selection.iter() {
                builder.push(variants[i].alt_allele())?;
            }
            out.push(Arc::new(builder.build()));
            return Ok(());
        }
        // Skip this variant.
        self.expand(variants, index + 1, selection, region, reference_window, out)?;
        // Take it, when compatible with the previous taken allele.
        let compatible = selection
            .last()
            .map(|&last| {
                variants[index].region().begin() >= variants[last].region().end()
            })
            .unwrap_or(true);
        if compatible {
            selection.push(index);
            self.expand(variants, index + 1, selection, region, reference_window, out)?;
            selection.pop();
        }
        Ok(())
    }
}

/// Upper bound on the population size: every variant taken or skipped.
fn projected_population(variants: &[Variant]) -> usize {
    1usize
        .checked_shl(variants.len().min(63) as u32)
        .unwrap_or(usize::MAX)
}
