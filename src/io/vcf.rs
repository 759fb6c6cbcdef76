//! # VCF Reading and Writing
//!
//! Writes call records as VCF text (plain or bgzf-compressed by extension)
//! and ingests external candidate-variant files. Header plumbing uses the
//! `noodles` crate; record lines are written and parsed directly.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use noodles::bgzf as bgzf_io;
use noodles::vcf::Header;
use tracing::info_span;

use crate::data::calls::VariantCall;
use crate::data::mappable::RegionMap;
use crate::data::region::GenomicRegion;
use crate::data::variant::Variant;
use crate::error::{NautilusError, Result};

/// The FORMAT fields every non-sites-only record carries.
const FORMAT_FIELDS: &str = "GT:GQ:DP:PS";

fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "gz" || e == "bgz")
        .unwrap_or(false)
}

/// Streaming VCF writer for call records.
pub struct VcfWriter {
    out: Box<dyn Write + Send>,
    samples: Vec<String>,
    sites_only: bool,
}

impl VcfWriter {
    /// Create a writer at `path` and emit the header. `contigs` is the
    /// reference contig list with sizes; `somatic`/`denovo` gate the extra
    /// INFO declarations.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        path: &Path,
        reference_id: &str,
        contigs: &[(String, u32)],
        samples: &[String],
        sites_only: bool,
        somatic: bool,
        denovo: bool,
    ) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            NautilusError::system(
                "output",
                format!("could not create {}: {}", path.display(), e),
                "check the --output path is writable",
            )
        })?;
        let out: Box<dyn Write + Send> = if is_gzip_path(path) {
            Box::new(BufWriter::new(bgzf_io::Writer::new(file)))
        } else {
            Box::new(BufWriter::new(file))
        };
        let mut writer = Self {
            out,
            samples: samples.to_vec(),
            sites_only,
        };
        writer.write_header(reference_id, contigs, somatic, denovo)?;
        Ok(writer)
    }

    fn write_header(
        &mut self,
        reference_id: &str,
        contigs: &[(String, u32)],
        somatic: bool,
        denovo: bool,
    ) -> Result<()> {
        writeln!(self.out, "##fileformat=VCFv4.3")?;
        writeln!(
            self.out,
            "##source=nautilus v{}",
            env!("CARGO_PKG_VERSION")
        )?;
        writeln!(self.out, "##reference={}", reference_id)?;
        for (name, size) in contigs {
            writeln!(self.out, "##contig=<ID={},length={}>", name, size)?;
        }
        writeln!(
            self.out,
            "##FILTER=<ID=PASS,Description=\"All filters passed\">"
        )?;
        writeln!(
            self.out,
            "##FILTER=<ID=REFCALL,Description=\"Homozygous reference call\">"
        )?;
        if somatic {
            writeln!(
                self.out,
                "##INFO=<ID=SOMATIC,Number=0,Type=Flag,Description=\"Somatic mutation\">"
            )?;
            writeln!(
                self.out,
                "##INFO=<ID=SP,Number=1,Type=Float,Description=\"Phred-scaled somatic posterior\">"
            )?;
            writeln!(
                self.out,
                "##INFO=<ID=CVAF,Number=2,Type=Float,Description=\"Credible somatic allele frequency interval\">"
            )?;
        }
        if denovo {
            writeln!(
                self.out,
                "##INFO=<ID=DENOVO,Number=0,Type=Flag,Description=\"De novo mutation\">"
            )?;
            writeln!(
                self.out,
                "##INFO=<ID=DNP,Number=1,Type=Float,Description=\"Phred-scaled de novo posterior\">"
            )?;
        }
        writeln!(
            self.out,
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">"
        )?;
        writeln!(
            self.out,
            "##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Genotype quality\">"
        )?;
        writeln!(
            self.out,
            "##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Read depth\">"
        )?;
        writeln!(
            self.out,
            "##FORMAT=<ID=PS,Number=1,Type=Integer,Description=\"Phase set\">"
        )?;
        write!(self.out, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO")?;
        if !self.sites_only {
            write!(self.out, "\tFORMAT")?;
            for sample in &self.samples {
                write!(self.out, "\t{}", sample)?;
            }
        }
        writeln!(self.out)?;
        Ok(())
    }

    /// Append one call record.
    pub fn write_call(&mut self, call: &VariantCall) -> Result<()> {
        let variant = &call.variant;
        let region = variant.region();
        let alt = if call.is_refcall {
            ".".to_string()
        } else {
            String::from_utf8_lossy(variant.alt_sequence()).to_string()
        };
        let filter = if call.is_refcall {
            "REFCALL".to_string()
        } else if call.filters.is_empty() {
            "PASS".to_string()
        } else {
            call.filters.join(";")
        };

        let mut info_fields: Vec<String> = Vec::new();
        if let Some(somatic) = &call.somatic {
            info_fields.push("SOMATIC".to_string());
            info_fields.push(format!("SP={:.2}", somatic.posterior));
            if let Some(interval) = somatic.credible_vaf.values().next() {
                info_fields.push(format!("CVAF={:.4},{:.4}", interval.lower, interval.upper));
            }
        }
        if let Some(denovo) = &call.denovo {
            info_fields.push("DENOVO".to_string());
            info_fields.push(format!("DNP={:.2}", denovo.posterior));
        }
        let info = if info_fields.is_empty() {
            ".".to_string()
        } else {
            info_fields.join(";")
        };

        write!(
            self.out,
            "{}\t{}\t.\t{}\t{}\t{:.2}\t{}\t{}",
            region.contig(),
            region.begin() + 1,
            String::from_utf8_lossy(variant.ref_sequence()),
            alt,
            call.quality,
            filter,
            info
        )?;

        if !self.sites_only {
            write!(self.out, "\t{}", FORMAT_FIELDS)?;
            for sample in &self.samples {
                match call.genotypes.get(sample) {
                    Some(genotype) => {
                        let separator = if genotype.phased { "|" } else { "/" };
                        let gt: Vec<String> = genotype
                            .alleles
                            .iter()
                            .map(|allele| {
                                if allele.sequence() == variant.ref_sequence() {
                                    "0".to_string()
                                } else if allele.sequence() == variant.alt_sequence() {
                                    "1".to_string()
                                } else {
                                    ".".to_string()
                                }
                            })
                            .collect();
                        let ps = call
                            .phase
                            .as_ref()
                            .map(|p| (p.phase_set.begin() + 1).to_string())
                            .unwrap_or_else(|| ".".to_string());
                        write!(
                            self.out,
                            "\t{}:{}:{}:{}",
                            gt.join(separator),
                            genotype.quality().round() as u32,
                            genotype.depth,
                            ps
                        )?;
                    }
                    None => write!(self.out, "\t.:.:.:.")?,
                }
            }
        }
        writeln!(self.out)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// External candidate records loaded from a source VCF.
#[derive(Clone)]
pub struct VcfExtractor {
    variants: RegionMap<Variant>,
}

impl VcfExtractor {
    /// Load a source VCF, keeping records that pass the size and quality
    /// gates. Filtered records are kept only when `include_filtered`.
    pub fn open(
        path: &Path,
        max_variant_size: usize,
        min_quality: Option<f64>,
        include_filtered: bool,
    ) -> Result<Self> {
        info_span!("vcf_extract", path = ?path).in_scope(|| {
            let file = File::open(path).map_err(|e| {
                NautilusError::user(
                    "source variants",
                    format!("could not open {}: {}", path.display(), e),
                    "check the --source-candidates path",
                )
            })?;
            let reader: Box<dyn BufRead> = if is_gzip_path(path) {
                Box::new(BufReader::new(bgzf_io::Reader::new(file)))
            } else {
                Box::new(BufReader::new(file))
            };
            Self::from_reader(reader, max_variant_size, min_quality, include_filtered)
        })
    }

    fn from_reader(
        reader: Box<dyn BufRead>,
        max_variant_size: usize,
        min_quality: Option<f64>,
        include_filtered: bool,
    ) -> Result<Self> {
        let mut header_text = String::new();
        let mut variants = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.starts_with('#') {
                header_text.push_str(&line);
                header_text.push('\n');
                continue;
            }
            if header_text.is_empty() {
                return Err(NautilusError::vcf("record before header"));
            }
            if let Some(parsed) = parse_record(&line, max_variant_size, min_quality, include_filtered)? {
                variants.extend(parsed);
            }
        }
        // Validate the header if one was present at all.
        if !header_text.is_empty() {
            let _header: Header = header_text
                .parse()
                .map_err(|e: noodles::vcf::header::ParseError| NautilusError::vcf(e.to_string()))?;
        }
        Ok(Self {
            variants: RegionMap::from_vec(variants),
        })
    }

    /// Candidate variants overlapping `region`.
    pub fn variants_in(&mut self, region: &GenomicRegion) -> Vec<Variant> {
        self.variants
            .overlapping(region)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

fn parse_record(
    line: &str,
    max_variant_size: usize,
    min_quality: Option<f64>,
    include_filtered: bool,
) -> Result<Option<Vec<Variant>>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        return Err(NautilusError::vcf(format!(
            "record has {} columns, expected at least 8",
            fields.len()
        )));
    }
    let contig = fields[0];
    let pos: u32 = fields[1]
        .parse()
        .map_err(|_| NautilusError::vcf(format!("bad POS '{}'", fields[1])))?;
    let ref_seq = fields[3].as_bytes();
    let qual = fields[5];
    let filter = fields[6];

    if !include_filtered && !(filter == "PASS" || filter == ".") {
        return Ok(None);
    }
    if let Some(min_quality) = min_quality {
        match qual.parse::<f64>() {
            Ok(q) if q < min_quality => return Ok(None),
            Err(_) if qual != "." => return Ok(None),
            _ => {}
        }
    }

    let begin = pos.saturating_sub(1);
    let region = GenomicRegion::new(contig.to_string(), begin, begin + ref_seq.len() as u32);
    let mut out = Vec::new();
    for alt in fields[4].split(',') {
        if alt == "." || alt == "*" || alt.starts_with('<') {
            continue; // symbolic and missing alleles are not candidates
        }
        let variant = Variant::new(region.clone(), ref_seq.to_vec(), alt.as_bytes().to_vec())?;
        if variant.size() <= max_variant_size {
            out.push(variant);
        }
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "\
##fileformat=VCFv4.3
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO
";

    fn extractor_from(records: &str, max_size: usize, min_q: Option<f64>, filtered: bool) -> VcfExtractor {
        let text = format!("{}{}", HEADER, records);
        VcfExtractor::from_reader(
            Box::new(BufReader::new(Cursor::new(text.into_bytes()))),
            max_size,
            min_q,
            filtered,
        )
        .unwrap()
    }

    #[test]
    fn test_extract_basic_records() {
        let mut x = extractor_from(
            "chr1\t101\t.\tA\tG\t50\tPASS\t.\nchr1\t201\t.\tAT\tA\t50\tPASS\t.\n",
            100,
            None,
            false,
        );
        assert_eq!(x.len(), 2);
        let hits = x.variants_in(&GenomicRegion::new("chr1", 95, 105));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].region().begin(), 100);
        assert!(hits[0].is_snv());
    }

    #[test]
    fn test_extract_respects_gates() {
        // Oversized record dropped
        let x = extractor_from("chr1\t101\t.\tACGTACGTACGT\tA\t50\tPASS\t.\n", 5, None, false);
        assert!(x.is_empty());

        // Low-quality record dropped
        let x = extractor_from("chr1\t101\t.\tA\tG\t10\tPASS\t.\n", 100, Some(20.0), false);
        assert!(x.is_empty());

        // Filtered record dropped unless allowed
        let x = extractor_from("chr1\t101\t.\tA\tG\t50\tq10\t.\n", 100, None, false);
        assert!(x.is_empty());
        let x = extractor_from("chr1\t101\t.\tA\tG\t50\tq10\t.\n", 100, None, true);
        assert_eq!(x.len(), 1);
    }

    #[test]
    fn test_extract_multiallelic_split() {
        let mut x = extractor_from("chr1\t101\t.\tA\tG,T\t50\tPASS\t.\n", 100, None, false);
        assert_eq!(x.len(), 2);
        let hits = x.variants_in(&GenomicRegion::new("chr1", 100, 101));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_symbolic_alleles_skipped() {
        let x = extractor_from("chr1\t101\t.\tA\t<DEL>\t50\tPASS\t.\n", 100, None, false);
        assert!(x.is_empty());
    }

    #[test]
    fn test_writer_round_trip_through_extractor() {
        use crate::data::calls::GenotypeCall;
        use crate::data::haplotype::Genotype;

        let dir = std::env::temp_dir().join(format!("nautilus-vcf-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("calls.vcf");

        let variant = Variant::new(
            GenomicRegion::new("chr1", 100, 101),
            b"A".to_vec(),
            b"G".to_vec(),
        )
        .unwrap();
        let mut call = VariantCall::new(variant.clone(), 55.0);
        call.genotypes.insert(
            "S1".to_string(),
            GenotypeCall {
                alleles: Genotype::new(vec![variant.ref_allele(), variant.alt_allele()]),
                posterior: 0.999,
                depth: 20,
                phased: false,
            },
        );

        let mut writer = VcfWriter::create(
            &path,
            "test-ref",
            &[("chr1".to_string(), 1000)],
            &["S1".to_string()],
            false,
            false,
            false,
        )
        .unwrap();
        writer.write_call(&call).unwrap();
        writer.finish().unwrap();

        let mut x = VcfExtractor::open(&path, 100, None, false).unwrap();
        let variants = x.variants_in(&GenomicRegion::new("chr1", 0, 1000));
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0], variant);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("0/1"));
        assert!(text.contains("##source=nautilus"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
