//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`. Every error
//! belongs to a category (user, system, program) and renders a
//! `(where, why, help)` triple; the binary maps categories to exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classes driving exit codes and rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input values, missing files, conflicting options
    User,
    /// I/O and environment failures
    System,
    /// Internal invariant violations and unimplemented paths
    Program,
}

impl ErrorCategory {
    /// BSD sysexits-style process exit codes.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::User => 64,
            Self::System => 74,
            Self::Program => 70,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user error",
            Self::System => "system error",
            Self::Program => "program error",
        }
    }
}

/// Main error type for nautilus operations.
#[derive(Error, Debug)]
pub enum NautilusError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid user input with context
    #[error("{where_}: {why}")]
    User {
        where_: String,
        why: String,
        help: String,
    },

    /// Environment failures with context
    #[error("{where_}: {why}")]
    System {
        where_: String,
        why: String,
        help: String,
    },

    /// Internal invariant violations
    #[error("internal error: {why}")]
    Program { why: String },

    /// Configuration errors (invalid CLI arguments)
    #[error("configuration error: {message}")]
    Config { message: String },

    /// VCF parsing or writing errors
    #[error("VCF error: {message}")]
    Vcf { message: String },

    /// Malformed genomic region specification
    #[error("invalid region '{spec}': {why}")]
    BadRegion { spec: String, why: String },

    /// Malformed read record
    #[error("invalid read: {why}")]
    BadRead { why: String },

    /// File not found
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// A reference contig has no counterpart in the read files
    #[error("reference contig '{contig}' is not matched by any read file")]
    UnmatchedReference { contig: String },
}

/// Type alias for Results using NautilusError.
pub type Result<T> = std::result::Result<T, NautilusError>;

impl NautilusError {
    pub fn user(
        where_: impl Into<String>,
        why: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        Self::User {
            where_: where_.into(),
            why: why.into(),
            help: help.into(),
        }
    }

    pub fn system(
        where_: impl Into<String>,
        why: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        Self::System {
            where_: where_.into(),
            why: why.into(),
            help: help.into(),
        }
    }

    pub fn program(why: impl Into<String>) -> Self {
        Self::Program { why: why.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn vcf(message: impl Into<String>) -> Self {
        Self::Vcf {
            message: message.into(),
        }
    }

    pub fn bad_region(spec: impl Into<String>, why: impl Into<String>) -> Self {
        Self::BadRegion {
            spec: spec.into(),
            why: why.into(),
        }
    }

    pub fn bad_read(why: impl Into<String>) -> Self {
        Self::BadRead { why: why.into() }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) | Self::System { .. } => ErrorCategory::System,
            Self::Program { .. } => ErrorCategory::Program,
            _ => ErrorCategory::User,
        }
    }

    /// The `(where, why, help)` rendering triple.
    pub fn triple(&self) -> (String, String, String) {
        match self {
            Self::Io(e) => (
                "I/O".to_string(),
                e.to_string(),
                "check file paths and permissions".to_string(),
            ),
            Self::User { where_, why, help } | Self::System { where_, why, help } => {
                (where_.clone(), why.clone(), help.clone())
            }
            Self::Program { why } => (
                "internal".to_string(),
                why.clone(),
                "this is a bug; please report it".to_string(),
            ),
            Self::Config { message } => (
                "command line".to_string(),
                message.clone(),
                "see --help for accepted values".to_string(),
            ),
            Self::Vcf { message } => (
                "VCF".to_string(),
                message.clone(),
                "check the VCF file is well-formed".to_string(),
            ),
            Self::BadRegion { spec, why } => (
                "region parsing".to_string(),
                format!("'{}': {}", spec, why),
                "regions are 'contig', 'contig:begin-end', or 'A to B'".to_string(),
            ),
            Self::BadRead { why } => (
                "read validation".to_string(),
                why.clone(),
                "the read file may be corrupt".to_string(),
            ),
            Self::FileNotFound { path } => (
                "file lookup".to_string(),
                format!("{} does not exist", path.display()),
                "check the path".to_string(),
            ),
            Self::UnmatchedReference { contig } => (
                "reference validation".to_string(),
                format!("contig '{}' has no mapped reads", contig),
                "pass --ignore-unmapped-contigs to skip such contigs".to_string(),
            ),
        }
    }

    /// One-line rendering: category tag, why, and a help suggestion.
    pub fn render(&self) -> String {
        let (where_, why, help) = self.triple();
        format!(
            "[{}] {}: {} ({})",
            self.category().as_str(),
            where_,
            why,
            help
        )
    }
}

// Convert noodles VCF header errors.
impl From<noodles::vcf::header::ParseError> for NautilusError {
    fn from(err: noodles::vcf::header::ParseError) -> Self {
        Self::Vcf {
            message: err.to_string(),
        }
    }
}
