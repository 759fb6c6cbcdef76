//! # Nautilus Library
//!
//! Haplotype-based small-variant calling engine.
//!
//! ## Modules
//! - `config`: CLI argument parsing and validation
//! - `data`: In-memory representations of genomic data
//! - `error`: Error types and result aliases
//! - `io`: Reference, read, region, and VCF access
//! - `readpipe`: Read transform/filter/downsample pipeline
//! - `generators`: Candidate-variant generation
//! - `align`: Global pairwise alignment
//! - `haplogen`: Haplotype generation
//! - `model`: Error, likelihood, and prior models
//! - `callers`: The six calling models
//! - `phaser`: Phase-set inference
//! - `realign`: Read-to-haplotype realignment
//! - `pipelines`: Per-contig orchestration
//! - `utils`: Shared utilities (maths, workspace, threading, advisories)

pub mod align;
pub mod callers;
pub mod config;
pub mod data;
pub mod error;
pub mod generators;
pub mod haplogen;
pub mod io;
pub mod model;
pub mod phaser;
pub mod pipelines;
pub mod readpipe;
pub mod realign;
pub mod utils;

// Re-export commonly used types
pub use callers::{Caller, CallerKind};
pub use config::Config;
pub use data::{AlignedRead, GenomicRegion, Haplotype, Variant};
pub use error::{NautilusError, Result};
pub use generators::VariantGenerator;
pub use haplogen::HaplotypeGenerator;
pub use io::{ReadManager, ReferenceGenome, VcfWriter};
pub use model::HaplotypeLikelihoodModel;
pub use phaser::Phaser;
pub use pipelines::{CallingPipeline, ContigOutputOrder};
