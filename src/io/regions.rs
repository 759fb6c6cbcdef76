//! # Input Region Resolution
//!
//! Parses user region specifications (`chr`, `chr:begin-end`, `A to B`
//! contig ranges, newline-delimited files) and resolves the final search
//! intervals: the union of requested regions minus the skip regions,
//! per contig.

use std::collections::BTreeMap;
use std::path::Path;

use crate::data::region::GenomicRegion;
use crate::error::{NautilusError, Result};
use crate::io::reference::ReferenceGenome;
use crate::utils::advisory::{Advisory, AdvisoryChannel};

/// Parse one region specification against the reference.
///
/// Accepted forms: `contig` (the whole contig), `contig:begin-end`,
/// `contig:begin-` (to contig end), and `contig:position` (a single
/// position). With `one_based`, coordinates are shifted down by one on
/// input.
pub fn parse_region(
    reference: &dyn ReferenceGenome,
    spec: &str,
    one_based: bool,
) -> Result<GenomicRegion> {
    let spec = spec.trim();
    let to_internal = |value: u32| -> u32 {
        if one_based {
            value.saturating_sub(1)
        } else {
            value
        }
    };

    if let Some(size) = reference.contig_size(spec) {
        return Ok(GenomicRegion::new(spec.to_string(), 0, size));
    }

    let (contig, range) = spec.rsplit_once(':').ok_or_else(|| {
        NautilusError::bad_region(spec, "unknown contig and no coordinate range")
    })?;
    let size = reference.contig_size(contig).ok_or_else(|| {
        NautilusError::bad_region(spec, format!("unknown contig '{}'", contig))
    })?;

    let parse_coord = |text: &str| -> Result<u32> {
        text.replace(',', "")
            .parse::<u32>()
            .map_err(|_| NautilusError::bad_region(spec, format!("'{}' is not a coordinate", text)))
    };

    let (begin, end) = match range.split_once('-') {
        Some((b, "")) => (to_internal(parse_coord(b)?), size),
        Some((b, e)) => {
            // One-based closed and zero-based half-open intervals share the
            // same exclusive end; only the begin shifts.
            (to_internal(parse_coord(b)?), parse_coord(e)?)
        }
        None => {
            let pos = to_internal(parse_coord(range)?);
            (pos, pos + 1)
        }
    };

    if begin > end {
        return Err(NautilusError::bad_region(spec, "begin exceeds end"));
    }
    if end > size {
        return Err(NautilusError::bad_region(
            spec,
            format!("end {} exceeds contig size {}", end, size),
        ));
    }
    Ok(GenomicRegion::new(contig.to_string(), begin, end))
}

/// Expand a list of specifications, recognizing the three-token
/// `A to B` form as the whole-contig range between two contigs in
/// reference order.
pub fn parse_region_specs(
    reference: &dyn ReferenceGenome,
    specs: &[String],
    one_based: bool,
) -> Result<Vec<GenomicRegion>> {
    // "A to B" only applies when the middle token is not itself a contig.
    if specs.len() == 3 && specs[1] == "to" && reference.contig_size("to").is_none() {
        return contig_range(reference, &specs[0], &specs[2]);
    }
    specs
        .iter()
        .map(|spec| parse_region(reference, spec, one_based))
        .collect()
}

fn contig_range(
    reference: &dyn ReferenceGenome,
    from: &str,
    to: &str,
) -> Result<Vec<GenomicRegion>> {
    let names = reference.contig_names();
    let from_idx = names.iter().position(|n| n == from).ok_or_else(|| {
        NautilusError::bad_region(from, "unknown contig in contig range")
    })?;
    let to_idx = names.iter().position(|n| n == to).ok_or_else(|| {
        NautilusError::bad_region(to, "unknown contig in contig range")
    })?;
    let (lo, hi) = if from_idx <= to_idx {
        (from_idx, to_idx)
    } else {
        (to_idx, from_idx)
    };
    Ok(names[lo..=hi]
        .iter()
        .map(|name| {
            let size = reference.contig_size(name).unwrap_or(0);
            GenomicRegion::new(name.clone(), 0, size)
        })
        .collect())
}

/// Load one region spec per line, skipping blanks and `#` comments.
pub fn load_regions_file(
    reference: &dyn ReferenceGenome,
    path: &Path,
    one_based: bool,
    advisories: &AdvisoryChannel,
) -> Result<Vec<GenomicRegion>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        NautilusError::user(
            "regions file",
            format!("could not read {}: {}", path.display(), e),
            "check the --regions-file path",
        )
    })?;
    let specs: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect();
    if specs.is_empty() {
        advisories.report(Advisory::EmptyPathsFile);
    }
    specs
        .iter()
        .map(|spec| parse_region(reference, spec, one_based))
        .collect()
}

/// Merge overlapping or touching regions into a minimal sorted set.
pub fn merge_regions(mut regions: Vec<GenomicRegion>) -> Vec<GenomicRegion> {
    regions.sort();
    let mut out: Vec<GenomicRegion> = Vec::with_capacity(regions.len());
    for region in regions {
        match out.last_mut() {
            Some(last)
                if last.contig() == region.contig() && region.begin() <= last.end() =>
            {
                *last = GenomicRegion::new(
                    last.contig_arc(),
                    last.begin(),
                    last.end().max(region.end()),
                );
            }
            _ => out.push(region),
        }
    }
    out
}

/// The final per-contig search intervals: requested regions (or the whole
/// reference when none are given) merged, minus the merged skip regions.
pub fn resolve_search_regions(
    reference: &dyn ReferenceGenome,
    requested: Vec<GenomicRegion>,
    skipped: Vec<GenomicRegion>,
) -> BTreeMap<String, Vec<GenomicRegion>> {
    let requested = if requested.is_empty() {
        reference
            .contig_names()
            .into_iter()
            .filter_map(|name| reference.contig_region(&name))
            .collect()
    } else {
        requested
    };
    let requested = merge_regions(requested);
    let skipped = merge_regions(skipped);

    let mut out: BTreeMap<String, Vec<GenomicRegion>> = BTreeMap::new();
    for region in requested {
        let mut pieces = vec![region.clone()];
        for skip in skipped.iter().filter(|s| s.contig() == region.contig()) {
            pieces = pieces
                .into_iter()
                .flat_map(|piece| piece.difference(skip))
                .collect();
        }
        out.entry(region.contig().to_string())
            .or_default()
            .extend(pieces.into_iter().filter(|p| !p.is_empty()));
    }
    out.retain(|_, regions| !regions.is_empty());
    out
}

/// Drop or reject search contigs with no mapped reads. With `ignore`,
/// unmapped contigs fall out of the search silently; otherwise the first
/// unmapped contig is an `UnmatchedReference` user error.
pub fn filter_unmapped_contigs(
    mut search: BTreeMap<String, Vec<GenomicRegion>>,
    mapped_contigs: &[String],
    ignore: bool,
) -> Result<BTreeMap<String, Vec<GenomicRegion>>> {
    let unmapped: Vec<String> = search
        .keys()
        .filter(|contig| !mapped_contigs.contains(contig))
        .cloned()
        .collect();
    for contig in unmapped {
        if ignore {
            search.remove(&contig);
        } else {
            return Err(NautilusError::UnmatchedReference { contig });
        }
    }
    Ok(search)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::reference::InMemoryReference;

    fn reference() -> InMemoryReference {
        InMemoryReference::new(vec![
            ("chr1".to_string(), vec![b'A'; 1000]),
            ("chr2".to_string(), vec![b'C'; 500]),
            ("chr3".to_string(), vec![b'G'; 200]),
        ])
    }

    #[test]
    fn test_parse_forms() {
        let r = reference();
        assert_eq!(
            parse_region(&r, "chr1", false).unwrap(),
            GenomicRegion::new("chr1", 0, 1000)
        );
        assert_eq!(
            parse_region(&r, "chr1:100-200", false).unwrap(),
            GenomicRegion::new("chr1", 100, 200)
        );
        assert_eq!(
            parse_region(&r, "chr1:100-", false).unwrap(),
            GenomicRegion::new("chr1", 100, 1000)
        );
        assert_eq!(
            parse_region(&r, "chr1:100", false).unwrap(),
            GenomicRegion::new("chr1", 100, 101)
        );
    }

    #[test]
    fn test_one_based_shift() {
        let r = reference();
        assert_eq!(
            parse_region(&r, "chr1:1-100", true).unwrap(),
            GenomicRegion::new("chr1", 0, 100)
        );
    }

    #[test]
    fn test_parse_errors() {
        let r = reference();
        assert!(parse_region(&r, "chrX:1-10", false).is_err());
        assert!(parse_region(&r, "chr1:200-100", false).is_err());
        assert!(parse_region(&r, "chr1:0-2000", false).is_err());
    }

    #[test]
    fn test_contig_range() {
        let r = reference();
        let specs = vec!["chr1".to_string(), "to".to_string(), "chr3".to_string()];
        let regions = parse_region_specs(&r, &specs, false).unwrap();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[1].contig(), "chr2");
    }

    #[test]
    fn test_merge_regions() {
        let merged = merge_regions(vec![
            GenomicRegion::new("chr1", 100, 200),
            GenomicRegion::new("chr1", 150, 300),
            GenomicRegion::new("chr1", 400, 500),
        ]);
        assert_eq!(
            merged,
            vec![
                GenomicRegion::new("chr1", 100, 300),
                GenomicRegion::new("chr1", 400, 500)
            ]
        );
    }

    #[test]
    fn test_resolve_with_skip() {
        // Spec boundary scenario: [100-200, 150-300] minus [180-220]
        // must give [100-180, 220-300].
        let r = reference();
        let resolved = resolve_search_regions(
            &r,
            vec![
                GenomicRegion::new("chr1", 100, 200),
                GenomicRegion::new("chr1", 150, 300),
            ],
            vec![GenomicRegion::new("chr1", 180, 220)],
        );
        assert_eq!(
            resolved["chr1"],
            vec![
                GenomicRegion::new("chr1", 100, 180),
                GenomicRegion::new("chr1", 220, 300)
            ]
        );
    }

    #[test]
    fn test_resolve_defaults_to_whole_reference() {
        let r = reference();
        let resolved = resolve_search_regions(&r, Vec::new(), Vec::new());
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved["chr2"], vec![GenomicRegion::new("chr2", 0, 500)]);
    }

    #[test]
    fn test_unmapped_contig_handling() {
        let r = reference();
        let search = resolve_search_regions(&r, Vec::new(), Vec::new());
        let mapped = vec!["chr1".to_string(), "chr3".to_string()];

        // Ignoring: chr2 silently drops out.
        let kept = filter_unmapped_contigs(search.clone(), &mapped, true).unwrap();
        assert_eq!(kept.len(), 2);
        assert!(!kept.contains_key("chr2"));

        // Strict: chr2 is a user error.
        let err = filter_unmapped_contigs(search, &mapped, false).unwrap_err();
        assert!(matches!(err, NautilusError::UnmatchedReference { ref contig } if contig == "chr2"));
    }
}
