//! # Input / Output
//!
//! Typed access to external resources: the reference genome, aligned-read
//! sources, user region specifications, and VCF reading and writing.

pub mod reads;
pub mod reference;
pub mod regions;
pub mod sam;
pub mod vcf;

pub use reads::{BufferedReadSource, ReadManager, ReadSource};
pub use sam::SamTextSource;
pub use reference::{CachedReference, InMemoryReference, ReferenceGenome};
pub use vcf::{VcfExtractor, VcfWriter};
