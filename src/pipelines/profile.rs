//! # Data Profile
//!
//! Sampled distributions of read length, coverage, and mapping quality,
//! written on request as a run summary.

use std::io::Write;
use std::path::Path;

use crate::data::read::AlignedRead;
use crate::data::region::GenomicRegion;
use crate::error::Result;
use crate::readpipe::Downsampler;

#[derive(Clone, Debug, Default)]
pub struct DataProfile {
    read_lengths: Vec<usize>,
    mapping_qualities: Vec<u8>,
    coverages: Vec<f64>,
}

/// Per-region sample cap so the profile stays small on deep data.
const MAX_SAMPLED_READS_PER_REGION: usize = 1000;

impl DataProfile {
    /// Record one region's reads.
    pub fn sample(&mut self, reads: &[AlignedRead], region: &GenomicRegion) {
        for read in reads.iter().take(MAX_SAMPLED_READS_PER_REGION) {
            self.read_lengths.push(read.len());
            self.mapping_qualities.push(read.mapping_quality());
        }
        self.coverages.push(Downsampler::mean_coverage(reads, region));
    }

    pub fn merge(&mut self, other: DataProfile) {
        self.read_lengths.extend(other.read_lengths);
        self.mapping_qualities.extend(other.mapping_qualities);
        self.coverages.extend(other.coverages);
    }

    pub fn is_empty(&self) -> bool {
        self.read_lengths.is_empty()
    }

    /// Write the summary as tab-separated statistics.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = std::fs::File::create(path)?;
        writeln!(out, "metric\tcount\tmean\tmin\tmax")?;
        let lengths: Vec<f64> = self.read_lengths.iter().map(|&l| l as f64).collect();
        write_row(&mut out, "read_length", &lengths)?;
        let mapping: Vec<f64> = self.mapping_qualities.iter().map(|&q| q as f64).collect();
        write_row(&mut out, "mapping_quality", &mapping)?;
        write_row(&mut out, "coverage", &self.coverages)?;
        Ok(())
    }
}

fn write_row(out: &mut impl Write, metric: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        writeln!(out, "{}\t0\t.\t.\t.", metric)?;
        return Ok(());
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    writeln!(
        out,
        "{}\t{}\t{:.2}\t{:.2}\t{:.2}",
        metric,
        values.len(),
        mean,
        min,
        max
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read::{Cigar, ReadFlags};

    fn read(begin: u32, len: usize) -> AlignedRead {
        let cigar: Cigar = format!("{}M", len).parse().unwrap();
        AlignedRead::new(
            format!("r{}", begin),
            GenomicRegion::new("chr1", begin, begin + len as u32),
            vec![b'A'; len],
            vec![30; len],
            cigar,
            42,
            ReadFlags::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_profile_collects_and_writes() {
        let mut profile = DataProfile::default();
        let region = GenomicRegion::new("chr1", 0, 100);
        profile.sample(&[read(0, 50), read(10, 60)], &region);
        assert!(!profile.is_empty());

        let dir = std::env::temp_dir().join(format!("nautilus-profile-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("profile.tsv");
        profile.write(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("read_length\t2\t55.00"));
        assert!(text.contains("mapping_quality"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
