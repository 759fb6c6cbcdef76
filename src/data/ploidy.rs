//! # Ploidy Map
//!
//! Layered mapping from (sample, contig) to organism ploidy. Lookup priority
//! is sample+contig, then contig, then the organism default.

use rustc_hash::FxHashMap;

use crate::error::{NautilusError, Result};

#[derive(Clone, Debug)]
pub struct PloidyMap {
    default: u32,
    per_contig: FxHashMap<String, u32>,
    per_sample_contig: FxHashMap<(String, String), u32>,
}

impl PloidyMap {
    pub fn new(default: u32) -> Self {
        Self {
            default,
            per_contig: FxHashMap::default(),
            per_sample_contig: FxHashMap::default(),
        }
    }

    pub fn default_ploidy(&self) -> u32 {
        self.default
    }

    /// Register a contig-wide ploidy. Conflicting registrations for the same
    /// contig are a user error (ambiguous ploidy).
    pub fn set_contig(&mut self, contig: impl Into<String>, ploidy: u32) -> Result<()> {
        let contig = contig.into();
        if let Some(&existing) = self.per_contig.get(&contig) {
            if existing != ploidy {
                return Err(NautilusError::user(
                    "ploidy configuration",
                    format!(
                        "contig {} is assigned both ploidy {} and {}",
                        contig, existing, ploidy
                    ),
                    "remove one of the conflicting --contig-ploidies entries",
                ));
            }
        }
        self.per_contig.insert(contig, ploidy);
        Ok(())
    }

    /// Register a sample-specific contig ploidy.
    pub fn set_sample_contig(
        &mut self,
        sample: impl Into<String>,
        contig: impl Into<String>,
        ploidy: u32,
    ) -> Result<()> {
        let key = (sample.into(), contig.into());
        if let Some(&existing) = self.per_sample_contig.get(&key) {
            if existing != ploidy {
                return Err(NautilusError::user(
                    "ploidy configuration",
                    format!(
                        "sample {} contig {} is assigned both ploidy {} and {}",
                        key.0, key.1, existing, ploidy
                    ),
                    "remove one of the conflicting --contig-ploidies entries",
                ));
            }
        }
        self.per_sample_contig.insert(key, ploidy);
        Ok(())
    }

    /// Resolve the ploidy for a sample on a contig.
    pub fn of(&self, sample: &str, contig: &str) -> u32 {
        if let Some(&p) = self
            .per_sample_contig
            .get(&(sample.to_string(), contig.to_string()))
        {
            return p;
        }
        if let Some(&p) = self.per_contig.get(contig) {
            return p;
        }
        self.default
    }

    /// Parse an inline spec: `CONTIG=PLOIDY` or `SAMPLE:CONTIG=PLOIDY`.
    pub fn insert_spec(&mut self, spec: &str) -> Result<()> {
        let (key, ploidy) = spec.split_once('=').ok_or_else(|| {
            NautilusError::user(
                "ploidy configuration",
                format!("malformed ploidy spec '{}'", spec),
                "use CONTIG=PLOIDY or SAMPLE:CONTIG=PLOIDY",
            )
        })?;
        let ploidy: u32 = ploidy.trim().parse().map_err(|_| {
            NautilusError::user(
                "ploidy configuration",
                format!("ploidy '{}' is not a number in spec '{}'", ploidy, spec),
                "use CONTIG=PLOIDY or SAMPLE:CONTIG=PLOIDY",
            )
        })?;
        match key.split_once(':') {
            Some((sample, contig)) => {
                self.set_sample_contig(sample.trim(), contig.trim(), ploidy)
            }
            None => self.set_contig(key.trim(), ploidy),
        }
    }
}

impl Default for PloidyMap {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_priority() {
        let mut map = PloidyMap::new(2);
        map.set_contig("chrX", 1).unwrap();
        map.set_sample_contig("tumour", "chrX", 2).unwrap();

        assert_eq!(map.of("normal", "chr1"), 2);
        assert_eq!(map.of("normal", "chrX"), 1);
        assert_eq!(map.of("tumour", "chrX"), 2);
    }

    #[test]
    fn test_conflicting_entries_rejected() {
        let mut map = PloidyMap::new(2);
        map.set_contig("chrY", 1).unwrap();
        assert!(map.set_contig("chrY", 2).is_err());
        // Re-registering the same value is fine.
        assert!(map.set_contig("chrY", 1).is_ok());
    }

    #[test]
    fn test_inline_spec_parsing() {
        let mut map = PloidyMap::new(2);
        map.insert_spec("chrM=1").unwrap();
        map.insert_spec("S1:chrX=1").unwrap();
        assert_eq!(map.of("any", "chrM"), 1);
        assert_eq!(map.of("S1", "chrX"), 1);
        assert!(map.insert_spec("chrM").is_err());
        assert!(map.insert_spec("chrM=lots").is_err());
    }
}
