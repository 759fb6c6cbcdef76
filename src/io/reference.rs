//! # Reference Genome Access
//!
//! The engine borrows the reference through the `ReferenceGenome` trait;
//! FASTA random access itself is an external collaborator. An in-memory
//! implementation backs tests and small runs, and `CachedReference` adds the
//! block LRU cache that bounds the memory footprint of repeated fetches.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::data::region::GenomicRegion;
use crate::error::{NautilusError, Result};
use crate::utils::advisory::{Advisory, AdvisoryChannel};
use crate::utils::workspace::MemoryFootprint;

/// Read-only random access to reference bases.
pub trait ReferenceGenome: Send + Sync {
    /// Contig names in reference index order.
    fn contig_names(&self) -> Vec<String>;

    fn contig_size(&self, contig: &str) -> Option<u32>;

    /// Bases over `region`; errors when the region is unknown or out of
    /// bounds.
    fn fetch(&self, region: &GenomicRegion) -> Result<Vec<u8>>;

    /// The whole contig as a region.
    fn contig_region(&self, contig: &str) -> Option<GenomicRegion> {
        self.contig_size(contig)
            .map(|size| GenomicRegion::new(contig.to_string(), 0, size))
    }
}

/// A reference held entirely in memory.
pub struct InMemoryReference {
    names: Vec<String>,
    sequences: FxHashMap<String, Vec<u8>>,
}

impl InMemoryReference {
    pub fn new(contigs: Vec<(String, Vec<u8>)>) -> Self {
        let names = contigs.iter().map(|(n, _)| n.clone()).collect();
        let sequences = contigs.into_iter().collect();
        Self { names, sequences }
    }

    /// Parse FASTA-formatted text. Header lines take the first word as the
    /// contig name.
    pub fn from_fasta(text: &str) -> Result<Self> {
        let mut contigs: Vec<(String, Vec<u8>)> = Vec::new();
        for line in text.lines() {
            if let Some(header) = line.strip_prefix('>') {
                let name = header
                    .split_whitespace()
                    .next()
                    .ok_or_else(|| NautilusError::user(
                        "reference parsing",
                        "FASTA header with no contig name",
                        "check the reference file",
                    ))?
                    .to_string();
                contigs.push((name, Vec::new()));
            } else {
                let Some((_, seq)) = contigs.last_mut() else {
                    return Err(NautilusError::user(
                        "reference parsing",
                        "sequence data before the first FASTA header",
                        "check the reference file",
                    ));
                };
                seq.extend(line.trim().bytes().map(|b| b.to_ascii_uppercase()));
            }
        }
        Ok(Self::new(contigs))
    }
}

impl ReferenceGenome for InMemoryReference {
    fn contig_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn contig_size(&self, contig: &str) -> Option<u32> {
        self.sequences.get(contig).map(|s| s.len() as u32)
    }

    fn fetch(&self, region: &GenomicRegion) -> Result<Vec<u8>> {
        let seq = self.sequences.get(region.contig()).ok_or_else(|| {
            NautilusError::user(
                "reference access",
                format!("unknown contig '{}'", region.contig()),
                "check region specifications against the reference",
            )
        })?;
        if region.end() as usize > seq.len() {
            return Err(NautilusError::user(
                "reference access",
                format!(
                    "region {} is beyond the end of contig '{}' (size {})",
                    region,
                    region.contig(),
                    seq.len()
                ),
                "check region specifications against the reference",
            ));
        }
        Ok(seq[region.begin() as usize..region.end() as usize].to_vec())
    }
}

/// Cache block size; fetches are rounded out to block boundaries.
const CACHE_BLOCK_SIZE: u32 = 1 << 16;

/// Reference caches below this size trigger an advisory.
const MIN_EFFECTIVE_CACHE_BYTES: u64 = 1024 * 1024;

#[derive(Clone, PartialEq, Eq, Hash)]
struct BlockKey {
    contig: String,
    index: u32,
}

struct CacheState {
    blocks: FxHashMap<BlockKey, Vec<u8>>,
    order: VecDeque<BlockKey>,
    bytes: u64,
}

/// An LRU block cache over any `ReferenceGenome`.
pub struct CachedReference {
    inner: Arc<dyn ReferenceGenome>,
    capacity_bytes: u64,
    state: Mutex<CacheState>,
}

impl CachedReference {
    pub fn new(
        inner: Arc<dyn ReferenceGenome>,
        capacity: MemoryFootprint,
        advisories: &AdvisoryChannel,
    ) -> Self {
        if capacity.bytes() > 0 && capacity.bytes() < MIN_EFFECTIVE_CACHE_BYTES {
            advisories.report(Advisory::SmallReferenceCache);
        }
        Self {
            inner,
            capacity_bytes: capacity.bytes(),
            state: Mutex::new(CacheState {
                blocks: FxHashMap::default(),
                order: VecDeque::new(),
                bytes: 0,
            }),
        }
    }

    fn fetch_block(&self, contig: &str, index: u32, contig_size: u32) -> Result<Vec<u8>> {
        let key = BlockKey {
            contig: contig.to_string(),
            index,
        };
        {
            let mut state = self.state.lock().expect("reference cache poisoned");
            if let Some(block) = state.blocks.get(&key) {
                let block = block.clone();
                // Refresh recency.
                state.order.retain(|k| k != &key);
                state.order.push_back(key);
                return Ok(block);
            }
        }
        let begin = index * CACHE_BLOCK_SIZE;
        let end = (begin + CACHE_BLOCK_SIZE).min(contig_size);
        let block = self
            .inner
            .fetch(&GenomicRegion::new(contig.to_string(), begin, end))?;
        if self.capacity_bytes > 0 {
            let mut state = self.state.lock().expect("reference cache poisoned");
            state.bytes += block.len() as u64;
            state.blocks.insert(key.clone(), block.clone());
            state.order.push_back(key);
            while state.bytes > self.capacity_bytes {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                if let Some(evicted) = state.blocks.remove(&oldest) {
                    state.bytes -= evicted.len() as u64;
                    debug!(contig = %oldest.contig, block = oldest.index, "evicted reference block");
                }
            }
        }
        Ok(block)
    }
}

impl ReferenceGenome for CachedReference {
    fn contig_names(&self) -> Vec<String> {
        self.inner.contig_names()
    }

    fn contig_size(&self, contig: &str) -> Option<u32> {
        self.inner.contig_size(contig)
    }

    fn fetch(&self, region: &GenomicRegion) -> Result<Vec<u8>> {
        let contig_size = self.contig_size(region.contig()).ok_or_else(|| {
            NautilusError::user(
                "reference access",
                format!("unknown contig '{}'", region.contig()),
                "check region specifications against the reference",
            )
        })?;
        if region.end() > contig_size {
            return Err(NautilusError::user(
                "reference access",
                format!("region {} exceeds contig size {}", region, contig_size),
                "check region specifications against the reference",
            ));
        }
        if region.is_empty() {
            return Ok(Vec::new());
        }
        let first_block = region.begin() / CACHE_BLOCK_SIZE;
        let last_block = (region.end() - 1) / CACHE_BLOCK_SIZE;
        let mut out = Vec::with_capacity(region.len() as usize);
        for index in first_block..=last_block {
            let block = self.fetch_block(region.contig(), index, contig_size)?;
            let block_begin = index * CACHE_BLOCK_SIZE;
            let from = region.begin().saturating_sub(block_begin) as usize;
            let to = ((region.end() - block_begin) as usize).min(block.len());
            out.extend_from_slice(&block[from..to]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> InMemoryReference {
        InMemoryReference::new(vec![
            ("chr1".to_string(), b"ACGTACGTACGT".to_vec()),
            ("chr2".to_string(), b"TTTT".to_vec()),
        ])
    }

    #[test]
    fn test_in_memory_fetch() {
        let r = reference();
        assert_eq!(
            r.fetch(&GenomicRegion::new("chr1", 2, 6)).unwrap(),
            b"GTAC"
        );
        assert_eq!(r.contig_size("chr2"), Some(4));
        assert!(r.fetch(&GenomicRegion::new("chr2", 0, 10)).is_err());
        assert!(r.fetch(&GenomicRegion::new("chrX", 0, 1)).is_err());
    }

    #[test]
    fn test_fasta_parsing() {
        let r = InMemoryReference::from_fasta(">chr1 description\nacgt\nACGT\n>chr2\nTT\n").unwrap();
        assert_eq!(r.contig_names(), vec!["chr1", "chr2"]);
        assert_eq!(
            r.fetch(&GenomicRegion::new("chr1", 0, 8)).unwrap(),
            b"ACGTACGT"
        );
        assert!(InMemoryReference::from_fasta("ACGT\n").is_err());
    }

    #[test]
    fn test_cached_reference_round_trip() {
        let advisories = AdvisoryChannel::new();
        let cached = CachedReference::new(
            Arc::new(reference()),
            MemoryFootprint(10 * 1024 * 1024),
            &advisories,
        );
        let region = GenomicRegion::new("chr1", 1, 11);
        assert_eq!(cached.fetch(&region).unwrap(), b"CGTACGTACG");
        // Second fetch comes from cache and matches.
        assert_eq!(cached.fetch(&region).unwrap(), b"CGTACGTACG");
        assert!(!advisories.has_fired(Advisory::SmallReferenceCache));
    }

    #[test]
    fn test_small_cache_advisory() {
        let advisories = AdvisoryChannel::new();
        let _ = CachedReference::new(Arc::new(reference()), MemoryFootprint(1024), &advisories);
        assert!(advisories.has_fired(Advisory::SmallReferenceCache));
    }
}
