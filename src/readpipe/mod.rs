//! # Read Pipeline
//!
//! The per-sample read path: fetch from the read manager, transform,
//! filter, and optionally downsample, streaming by region.

pub mod downsample;
pub mod filters;
pub mod transforms;

pub use downsample::Downsampler;
pub use filters::{ReadFilter, ReadFilterPipeline};
pub use transforms::{ReadTransformPipeline, ReadTransformer};

use crate::data::read::AlignedRead;
use crate::data::region::GenomicRegion;
use crate::error::Result;
use crate::io::reads::ReadManager;
use crate::utils::advisory::AdvisoryChannel;

/// The configured read path for one run.
#[derive(Clone, Debug, Default)]
pub struct ReadPipe {
    pub transforms: ReadTransformPipeline,
    pub filters: ReadFilterPipeline,
    pub downsampler: Option<Downsampler>,
}

impl ReadPipe {
    pub fn new(
        transforms: ReadTransformPipeline,
        filters: ReadFilterPipeline,
        downsampler: Option<Downsampler>,
    ) -> Self {
        Self {
            transforms,
            filters,
            downsampler,
        }
    }

    /// The default germline pipeline: BWA-capped mapping quality floor,
    /// basic quality gates, duplicate and QC-fail rejection.
    pub fn default_pipeline(downsampler: Option<Downsampler>) -> Self {
        Self {
            transforms: ReadTransformPipeline::new(vec![ReadTransformer::MaskSoftClippedBases]),
            filters: ReadFilterPipeline::new(vec![
                ReadFilter::NoUnmapped,
                ReadFilter::MinMappingQuality(20),
                ReadFilter::GoodBaseFraction {
                    quality: 20,
                    min_fraction: 0.5,
                },
                ReadFilter::NoDuplicates,
                ReadFilter::NoQcFails,
                ReadFilter::NoSecondary,
                ReadFilter::NoSupplementary,
            ]),
            downsampler,
        }
    }

    /// Fetch, transform, filter, and downsample reads for one sample over a
    /// region.
    pub fn fetch(
        &self,
        manager: &ReadManager,
        sample: &str,
        region: &GenomicRegion,
        advisories: &AdvisoryChannel,
    ) -> Result<Vec<AlignedRead>> {
        let mut reads = manager.fetch(sample, region)?;
        self.transforms.apply(&mut reads);
        self.filters.apply(&mut reads);
        if let Some(downsampler) = &self.downsampler {
            downsampler.apply(&mut reads, region, advisories);
        }
        Ok(reads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read::{Cigar, ReadFlags};
    use crate::io::reads::{BufferedReadSource, ReadManager};
    use std::sync::Arc;

    fn read(begin: u32, mapping_quality: u8) -> AlignedRead {
        let cigar: Cigar = "10M".parse().unwrap();
        AlignedRead::new(
            format!("r{}", begin),
            GenomicRegion::new("chr1", begin, begin + 10),
            vec![b'A'; 10],
            vec![30; 10],
            cigar,
            mapping_quality,
            ReadFlags::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_pipe_filters_on_fetch() {
        let source = Arc::new(BufferedReadSource::new(
            "S1",
            vec![read(100, 60), read(105, 5)],
        ));
        let manager = ReadManager::new(vec![source], 4).unwrap();
        let pipe = ReadPipe::default_pipeline(None);
        let advisories = AdvisoryChannel::new();
        let reads = pipe
            .fetch(
                &manager,
                "S1",
                &GenomicRegion::new("chr1", 90, 130),
                &advisories,
            )
            .unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].mapping_quality(), 60);
    }
}
