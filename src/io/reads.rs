//! # Read Access
//!
//! Aligned-read file decoding is an external collaborator; the engine sees
//! read data through the `ReadSource` trait. `ReadManager` multiplexes the
//! registered sources behind a bounded open-handle pool, closing the least
//! recently used source when the cap is exceeded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::data::mappable::RegionMap;
use crate::data::read::AlignedRead;
use crate::data::region::GenomicRegion;
use crate::error::{NautilusError, Result};

/// A source of aligned reads for one or more samples.
pub trait ReadSource: Send + Sync {
    /// Samples this source carries (from `@RG` `SM` tags). Must be
    /// non-empty; sample-less files are rejected at registration.
    fn samples(&self) -> Vec<String>;

    /// Reads overlapping `region` for `sample`, in genomic order.
    fn fetch(&self, sample: &str, region: &GenomicRegion) -> Result<Vec<AlignedRead>>;

    /// Contigs with at least one mapped read.
    fn mapped_contigs(&self) -> Vec<String>;

    /// (Re)open underlying handles. In-memory sources are no-ops.
    fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Release underlying handles.
    fn close(&self) {}
}

/// An in-memory read source, used by tests and by callers that pre-load
/// regions.
pub struct BufferedReadSource {
    sample: String,
    reads: Mutex<RegionMap<AlignedRead>>,
}

impl BufferedReadSource {
    pub fn new(sample: impl Into<String>, reads: Vec<AlignedRead>) -> Self {
        Self {
            sample: sample.into(),
            reads: Mutex::new(RegionMap::from_vec(reads)),
        }
    }
}

impl ReadSource for BufferedReadSource {
    fn samples(&self) -> Vec<String> {
        vec![self.sample.clone()]
    }

    fn fetch(&self, sample: &str, region: &GenomicRegion) -> Result<Vec<AlignedRead>> {
        if sample != self.sample {
            return Ok(Vec::new());
        }
        let mut reads = self.reads.lock().expect("read buffer poisoned");
        Ok(reads.overlapping(region).into_iter().cloned().collect())
    }

    fn mapped_contigs(&self) -> Vec<String> {
        let mut reads = self.reads.lock().expect("read buffer poisoned");
        let mut contigs: Vec<String> = reads
            .iter()
            .map(|r| r.region().contig().to_string())
            .collect();
        contigs.sort();
        contigs.dedup();
        contigs
    }
}

struct PoolState {
    /// Source indices currently open, oldest first.
    open: VecDeque<usize>,
}

/// Multiplexes read sources with a bounded open-handle pool.
pub struct ReadManager {
    sources: Vec<Arc<dyn ReadSource>>,
    samples: Vec<String>,
    max_open: usize,
    pool: Mutex<PoolState>,
}

impl ReadManager {
    pub fn new(sources: Vec<Arc<dyn ReadSource>>, max_open: usize) -> Result<Self> {
        let mut samples = Vec::new();
        for source in &sources {
            let source_samples = source.samples();
            if source_samples.is_empty() {
                return Err(NautilusError::user(
                    "read files",
                    "a read file defines no samples (missing @RG SM tags)",
                    "add read-group headers with SM tags to the file",
                ));
            }
            for sample in source_samples {
                if !samples.contains(&sample) {
                    samples.push(sample);
                }
            }
        }
        Ok(Self {
            sources,
            samples,
            max_open: max_open.max(1),
            pool: Mutex::new(PoolState {
                open: VecDeque::new(),
            }),
        })
    }

    /// All samples across sources, in first-seen order.
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    /// Contigs with mapped reads in any source.
    pub fn mapped_contigs(&self) -> Vec<String> {
        let mut contigs: Vec<String> = self
            .sources
            .iter()
            .flat_map(|s| s.mapped_contigs())
            .collect();
        contigs.sort();
        contigs.dedup();
        contigs
    }

    /// Headroom calculation: open-read-file budget left after reserving
    /// handles for output files.
    pub fn estimate_max_open_files(max_open_read_files: usize, n_output_files: usize) -> usize {
        max_open_read_files.saturating_sub(n_output_files).max(1)
    }

    fn ensure_open(&self, index: usize) -> Result<()> {
        let mut pool = self.pool.lock().expect("read pool poisoned");
        if let Some(pos) = pool.open.iter().position(|&i| i == index) {
            // Refresh recency.
            pool.open.remove(pos);
            pool.open.push_back(index);
            return Ok(());
        }
        while pool.open.len() >= self.max_open {
            if let Some(oldest) = pool.open.pop_front() {
                debug!(source = oldest, "closing least recently used read source");
                self.sources[oldest].close();
            }
        }
        // Transient open failures get one retry before surfacing.
        if self.sources[index].open().is_err() {
            self.sources[index].open()?;
        }
        pool.open.push_back(index);
        Ok(())
    }

    /// Reads for `sample` overlapping `region`, merged across sources in
    /// genomic order.
    pub fn fetch(&self, sample: &str, region: &GenomicRegion) -> Result<Vec<AlignedRead>> {
        let mut out = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            if !source.samples().iter().any(|s| s == sample) {
                continue;
            }
            self.ensure_open(index)?;
            out.extend(source.fetch(sample, region)?);
        }
        out.sort_by(|a, b| a.region().cmp(b.region()));
        Ok(out)
    }
}
