//! # Pedigree
//!
//! PLINK-style pedigree parsing and trio extraction. A pedigree line has six
//! whitespace-delimited columns: family, individual, father, mother, sex,
//! phenotype. `0` means unknown for parent and sex columns.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::error::{NautilusError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct PedigreeMember {
    pub family: String,
    pub individual: String,
    pub father: Option<String>,
    pub mother: Option<String>,
    pub sex: Sex,
    pub phenotype: String,
}

/// The mother/father/child triple the trio caller works over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trio {
    pub mother: String,
    pub father: String,
    pub child: String,
}

#[derive(Clone, Debug, Default)]
pub struct Pedigree {
    members: Vec<PedigreeMember>,
    index: FxHashMap<String, usize>,
}

impl Pedigree {
    pub fn members(&self) -> &[PedigreeMember] {
        &self.members
    }

    pub fn get(&self, individual: &str) -> Option<&PedigreeMember> {
        self.index.get(individual).map(|&i| &self.members[i])
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NautilusError::user(
                "pedigree file",
                format!("could not read {}: {}", path.display(), e),
                "check the --pedigree path",
            )
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut pedigree = Pedigree::default();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return Err(NautilusError::user(
                    "pedigree file",
                    format!("line {} has {} columns, expected 6", line_no + 1, fields.len()),
                    "pedigree lines are: family individual father mother sex phenotype",
                ));
            }
            let parent = |s: &str| {
                if s == "0" {
                    None
                } else {
                    Some(s.to_string())
                }
            };
            let member = PedigreeMember {
                family: fields[0].to_string(),
                individual: fields[1].to_string(),
                father: parent(fields[2]),
                mother: parent(fields[3]),
                sex: match fields[4] {
                    "1" => Sex::Male,
                    "2" => Sex::Female,
                    _ => Sex::Unknown,
                },
                phenotype: fields[5].to_string(),
            };
            if pedigree.index.contains_key(&member.individual) {
                return Err(NautilusError::user(
                    "pedigree file",
                    format!("individual {} appears twice", member.individual),
                    "each individual may only be defined once",
                ));
            }
            pedigree
                .index
                .insert(member.individual.clone(), pedigree.members.len());
            pedigree.members.push(member);
        }
        Ok(pedigree)
    }

    /// Extract a trio when the pedigree defines exactly one child with both
    /// parents among `samples`.
    pub fn trio(&self, samples: &[String]) -> Result<Option<Trio>> {
        let mut trios = Vec::new();
        for member in &self.members {
            let (Some(father), Some(mother)) = (&member.father, &member.mother) else {
                continue;
            };
            let present = |id: &String| samples.iter().any(|s| s == id);
            if present(&member.individual) && present(father) && present(mother) {
                trios.push(Trio {
                    mother: mother.clone(),
                    father: father.clone(),
                    child: member.individual.clone(),
                });
            }
        }
        match trios.len() {
            0 => Ok(None),
            1 => Ok(Some(trios.pop().unwrap())),
            n => Err(NautilusError::user(
                "pedigree file",
                format!("pedigree implies {} trios among the input samples", n),
                "restrict --samples to one child and its parents",
            )),
        }
    }
}

impl Trio {
    /// Validate a trio against the available samples.
    pub fn validate(&self, samples: &[String]) -> Result<()> {
        for (role, id) in [
            ("mother", &self.mother),
            ("father", &self.father),
            ("child", &self.child),
        ] {
            if !samples.iter().any(|s| s == id) {
                return Err(NautilusError::user(
                    "trio configuration",
                    format!("{} sample '{}' is not among the input samples", role, id),
                    "check --maternal-sample / --paternal-sample against the read headers",
                ));
            }
        }
        if self.mother == self.father || self.mother == self.child || self.father == self.child {
            return Err(NautilusError::user(
                "trio configuration",
                "trio members must be three distinct samples",
                "check the trio sample names",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PED: &str = "\
FAM1 CHILD DAD MUM 1 2
FAM1 DAD 0 0 1 1
FAM1 MUM 0 0 2 1
";

    #[test]
    fn test_parse_and_lookup() {
        let ped = Pedigree::parse(PED).unwrap();
        assert_eq!(ped.members().len(), 3);
        let child = ped.get("CHILD").unwrap();
        assert_eq!(child.father.as_deref(), Some("DAD"));
        assert_eq!(child.mother.as_deref(), Some("MUM"));
        assert_eq!(ped.get("DAD").unwrap().sex, Sex::Male);
        assert!(ped.get("DAD").unwrap().father.is_none());
    }

    #[test]
    fn test_trio_extraction() {
        let ped = Pedigree::parse(PED).unwrap();
        let samples = vec!["CHILD".to_string(), "DAD".to_string(), "MUM".to_string()];
        let trio = ped.trio(&samples).unwrap().unwrap();
        assert_eq!(trio.child, "CHILD");
        assert_eq!(trio.mother, "MUM");
        assert_eq!(trio.father, "DAD");

        // Missing a parent: no trio.
        let partial = vec!["CHILD".to_string(), "DAD".to_string()];
        assert!(ped.trio(&partial).unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_rejected() {
        assert!(Pedigree::parse("FAM1 CHILD DAD MUM 1").is_err());
        assert!(Pedigree::parse(PED.repeat(2).as_str()).is_err()); // duplicates
    }

    #[test]
    fn test_trio_validation() {
        let trio = Trio {
            mother: "MUM".into(),
            father: "DAD".into(),
            child: "CHILD".into(),
        };
        let all = vec!["MUM".to_string(), "DAD".to_string(), "CHILD".to_string()];
        assert!(trio.validate(&all).is_ok());
        assert!(trio.validate(&all[..2].to_vec()).is_err());

        let degenerate = Trio {
            mother: "MUM".into(),
            father: "MUM".into(),
            child: "CHILD".into(),
        };
        assert!(degenerate.validate(&all).is_err());
    }
}
