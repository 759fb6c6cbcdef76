//! # Data Model
//!
//! In-memory representations of genomic data: regions, region-indexed
//! containers, reads, alleles and variants, haplotypes and genotypes,
//! ploidy, pedigrees, and call records.

pub mod calls;
pub mod haplotype;
pub mod mappable;
pub mod pedigree;
pub mod ploidy;
pub mod read;
pub mod region;
pub mod variant;

pub use calls::{CallSet, CredibleInterval, GenotypeCall, PhaseCall, VariantCall};
pub use haplotype::{CancerGenotype, Genotype, Haplotype, HaplotypeBuilder};
pub use mappable::{Mappable, RegionMap};
pub use pedigree::{Pedigree, Trio};
pub use ploidy::PloidyMap;
pub use read::{AlignedRead, Cigar, CigarOp, CigarOpKind, ReadFlags};
pub use region::{ContigIndex, GenomicRegion};
pub use variant::{Allele, Variant};
