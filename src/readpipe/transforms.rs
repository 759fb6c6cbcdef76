//! # Read Transformers
//!
//! In-place read mutations applied before filtering: base-quality capping
//! and masking of untrustworthy bases. Like the filters, transformers are a
//! closed enum applied in order.

use crate::data::read::AlignedRead;

/// One in-place read mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadTransformer {
    /// Clamp all base qualities to at most `cap`
    CapBaseQualities { cap: u8 },
    /// Zero the qualities of soft-clipped bases so they cannot support
    /// candidates
    MaskSoftClippedBases,
    /// Zero the qualities of the first and last `size` bases
    MaskTails { size: usize },
    /// Zero qualities below `threshold` entirely
    MaskLowQualityBases { threshold: u8 },
}

impl ReadTransformer {
    pub fn apply(&self, read: &mut AlignedRead) {
        match self {
            Self::CapBaseQualities { cap } => {
                for q in read.qualities_mut() {
                    *q = (*q).min(*cap);
                }
            }
            Self::MaskSoftClippedBases => {
                let lead = read.cigar().leading_soft_clip() as usize;
                let trail = read.cigar().trailing_soft_clip() as usize;
                let len = read.len();
                let qualities = read.qualities_mut();
                for q in qualities.iter_mut().take(lead) {
                    *q = 0;
                }
                for q in qualities.iter_mut().skip(len.saturating_sub(trail)) {
                    *q = 0;
                }
            }
            Self::MaskTails { size } => {
                let len = read.len();
                let qualities = read.qualities_mut();
                for q in qualities.iter_mut().take(*size) {
                    *q = 0;
                }
                for q in qualities.iter_mut().skip(len.saturating_sub(*size)) {
                    *q = 0;
                }
            }
            Self::MaskLowQualityBases { threshold } => {
                for q in read.qualities_mut() {
                    if *q < *threshold {
                        *q = 0;
                    }
                }
            }
        }
    }
}

/// Ordered transformer pipeline.
#[derive(Clone, Debug, Default)]
pub struct ReadTransformPipeline {
    transformers: Vec<ReadTransformer>,
}

impl ReadTransformPipeline {
    pub fn new(transformers: Vec<ReadTransformer>) -> Self {
        Self { transformers }
    }

    pub fn push(&mut self, transformer: ReadTransformer) {
        self.transformers.push(transformer);
    }

    pub fn apply(&self, reads: &mut [AlignedRead]) {
        for read in reads {
            for transformer in &self.transformers {
                transformer.apply(read);
            }
        }
    }
}
