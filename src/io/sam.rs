//! # SAM Text Source
//!
//! A plain-text SAM reader backing the `ReadSource` trait. Binary BAM/CRAM
//! decoding stays behind external collaborators; the text form is enough to
//! drive the engine and its tests end-to-end. Samples come from `SM` tags
//! on `@RG` header lines; records without a resolvable read group are
//! rejected.

use std::path::Path;
use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::data::mappable::RegionMap;
use crate::data::read::{AlignedRead, Cigar, MateSegment, ReadFlags};
use crate::data::region::GenomicRegion;
use crate::error::{NautilusError, Result};
use crate::io::reads::ReadSource;

pub struct SamTextSource {
    samples: Vec<String>,
    reads_by_sample: Mutex<FxHashMap<String, RegionMap<AlignedRead>>>,
    contigs: Vec<String>,
}

impl SamTextSource {
    pub fn open(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NautilusError::user(
                "read files",
                format!("could not read {}: {}", path.display(), e),
                "check the --reads path",
            )
        })?;
        Self::parse(&text).map_err(|e| match e {
            NautilusError::BadRead { why } => NautilusError::user(
                "read files",
                format!("{}: {}", path.display(), why),
                "the file is not valid SAM",
            ),
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        // Read groups: ID -> SM.
        let mut read_groups: FxHashMap<String, String> = FxHashMap::default();
        for line in text.lines().take_while(|l| l.starts_with('@')) {
            if let Some(rest) = line.strip_prefix("@RG\t") {
                let mut id = None;
                let mut sample = None;
                for field in rest.split('\t') {
                    if let Some(value) = field.strip_prefix("ID:") {
                        id = Some(value.to_string());
                    } else if let Some(value) = field.strip_prefix("SM:") {
                        sample = Some(value.to_string());
                    }
                }
                if let (Some(id), Some(sample)) = (id, sample) {
                    read_groups.insert(id, sample);
                }
            }
        }
        if read_groups.is_empty() {
            return Err(NautilusError::user(
                "read files",
                "no @RG header lines with SM tags",
                "add read-group headers with SM tags to the file",
            ));
        }
        let single_sample = if read_groups.len() == 1 {
            read_groups.values().next().cloned()
        } else {
            None
        };

        let mut reads_by_sample: FxHashMap<String, Vec<AlignedRead>> = FxHashMap::default();
        let mut contigs: Vec<String> = Vec::new();
        for line in text.lines().filter(|l| !l.starts_with('@') && !l.trim().is_empty()) {
            let Some((read, rg)) = parse_record(line)? else {
                continue; // unmapped or placeholder record
            };
            let sample = match rg {
                Some(id) => read_groups.get(&id).cloned().ok_or_else(|| {
                    NautilusError::bad_read(format!("record references unknown read group '{}'", id))
                })?,
                None => single_sample.clone().ok_or_else(|| {
                    NautilusError::bad_read("record carries no RG tag and the file has several read groups")
                })?,
            };
            if !contigs.contains(&read.region().contig().to_string()) {
                contigs.push(read.region().contig().to_string());
            }
            reads_by_sample.entry(sample).or_default().push(read);
        }

        let mut samples: Vec<String> = read_groups.values().cloned().collect();
        samples.sort();
        samples.dedup();
        contigs.sort();

        Ok(Self {
            samples,
            reads_by_sample: Mutex::new(
                reads_by_sample
                    .into_iter()
                    .map(|(sample, reads)| (sample, RegionMap::from_vec(reads)))
                    .collect(),
            ),
            contigs,
        })
    }
}

/// Parse one alignment line; `None` for unmapped records.
fn parse_record(line: &str) -> Result<Option<(AlignedRead, Option<String>)>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 11 {
        return Err(NautilusError::bad_read(format!(
            "alignment line has {} columns, expected at least 11",
            fields.len()
        )));
    }
    let flags_bits: u16 = fields[1]
        .parse()
        .map_err(|_| NautilusError::bad_read(format!("bad FLAG '{}'", fields[1])))?;
    let flags = ReadFlags::from_sam_bits(flags_bits);
    if flags.unmapped || fields[2] == "*" || fields[5] == "*" {
        return Ok(None);
    }
    let contig = fields[2].to_string();
    let pos: u32 = fields[3]
        .parse()
        .map_err(|_| NautilusError::bad_read(format!("bad POS '{}'", fields[3])))?;
    let mapping_quality: u8 = fields[4]
        .parse()
        .map_err(|_| NautilusError::bad_read(format!("bad MAPQ '{}'", fields[4])))?;
    let cigar: Cigar = fields[5].parse()?;
    let sequence = fields[9].as_bytes().to_vec();
    let qualities: Vec<u8> = if fields[10] == "*" {
        vec![30; sequence.len()]
    } else {
        fields[10].bytes().map(|b| b.saturating_sub(33)).collect()
    };

    let mate = if flags.paired && fields[6] != "*" {
        let mate_contig = if fields[6] == "=" {
            contig.clone()
        } else {
            fields[6].to_string()
        };
        let mate_pos: u32 = fields[7]
            .parse()
            .map_err(|_| NautilusError::bad_read(format!("bad PNEXT '{}'", fields[7])))?;
        Some(MateSegment {
            contig: mate_contig.into(),
            begin: mate_pos.saturating_sub(1),
            unmapped: flags.mate_unmapped,
        })
    } else {
        None
    };

    let mut rg = None;
    let mut barcode = None;
    for tag in &fields[11..] {
        if let Some(value) = tag.strip_prefix("RG:Z:") {
            rg = Some(value.to_string());
        } else if let Some(value) = tag.strip_prefix("BX:Z:") {
            barcode = Some(value.to_string());
        }
    }

    let begin = pos.saturating_sub(1);
    let region = GenomicRegion::new(contig, begin, begin + cigar.reference_span());
    let mut read = AlignedRead::new(
        fields[0].to_string(),
        region,
        sequence,
        qualities,
        cigar,
        mapping_quality,
        flags,
        mate,
    )?;
    if let Some(barcode) = barcode {
        read = read.with_barcode(barcode);
    }
    Ok(Some((read, rg)))
}

impl ReadSource for SamTextSource {
    fn samples(&self) -> Vec<String> {
        self.samples.clone()
    }

    fn fetch(&self, sample: &str, region: &GenomicRegion) -> Result<Vec<AlignedRead>> {
        let mut by_sample = self.reads_by_sample.lock().expect("SAM source poisoned");
        Ok(by_sample
            .get_mut(sample)
            .map(|reads| reads.overlapping(region).into_iter().cloned().collect())
            .unwrap_or_default())
    }

    fn mapped_contigs(&self) -> Vec<String> {
        self.contigs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAM: &str = "\
@HD\tVN:1.6\tSO:coordinate
@SQ\tSN:chr1\tLN:1000
@RG\tID:rg1\tSM:S1
r1\t0\tchr1\t101\t60\t8M\t*\t0\t0\tACGTACGT\tIIIIIIII
r2\t99\tchr1\t151\t60\t4M\t=\t251\t104\tACGT\tIIII\tRG:Z:rg1
r3\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII
";

    #[test]
    fn test_parse_and_fetch() {
        let source = SamTextSource::parse(SAM).unwrap();
        assert_eq!(source.samples(), vec!["S1".to_string()]);
        assert_eq!(source.mapped_contigs(), vec!["chr1".to_string()]);

        let reads = source
            .fetch("S1", &GenomicRegion::new("chr1", 0, 1000))
            .unwrap();
        assert_eq!(reads.len(), 2); // the unmapped record is dropped
        assert_eq!(reads[0].region().begin(), 100);
        assert_eq!(reads[0].qualities()[0], b'I' - 33);

        let mate = reads[1].mate().unwrap();
        assert_eq!(&*mate.contig, "chr1");
        assert_eq!(mate.begin, 250);
    }

    #[test]
    fn test_missing_read_groups_rejected() {
        let no_rg = "@HD\tVN:1.6\nr1\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII\n";
        assert!(SamTextSource::parse(no_rg).is_err());
    }

    #[test]
    fn test_unknown_read_group_rejected() {
        let bad = "\
@RG\tID:rg1\tSM:S1
@RG\tID:rg2\tSM:S2
r1\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII\tRG:Z:rg9
";
        assert!(SamTextSource::parse(bad).is_err());
    }
}
