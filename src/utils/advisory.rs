//! # Advisory Channel
//!
//! Typed one-shot warnings threaded through the pipeline instead of
//! file-scope "already warned" flags. Each advisory kind fires at most once
//! per run; delivery goes through `tracing`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

/// The recoverable conditions the engine reports without failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Advisory {
    /// Duplicate input paths were deduplicated
    DuplicateInputPaths = 0,
    /// A file-of-paths resolved to nothing
    EmptyPathsFile = 1,
    /// The reference cache is too small to be effective
    SmallReferenceCache = 2,
    /// The selected caller is experimental
    ExperimentalCaller = 3,
    /// A window exceeded the haplotype overflow limit and was skipped
    HaplotypeOverflow = 4,
    /// Reads were downsampled in at least one region
    Downsampled = 5,
}

const ADVISORY_COUNT: usize = 6;

impl Advisory {
    fn message(self) -> &'static str {
        match self {
            Self::DuplicateInputPaths => "duplicate input paths were ignored",
            Self::EmptyPathsFile => "a file of paths contained no entries",
            Self::SmallReferenceCache => {
                "the reference cache is smaller than 1MB; expect slow reference access"
            }
            Self::ExperimentalCaller => "the selected calling model is experimental",
            Self::HaplotypeOverflow => {
                "one or more windows exceeded the haplotype limit and were not called"
            }
            Self::Downsampled => "reads were downsampled in high-depth regions",
        }
    }
}

/// Shared, thread-safe advisory sink.
#[derive(Clone, Debug, Default)]
pub struct AdvisoryChannel {
    fired: Arc<[AtomicBool; ADVISORY_COUNT]>,
}

impl AdvisoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an advisory; only the first report of each kind is logged.
    pub fn report(&self, advisory: Advisory) {
        let slot = &self.fired[advisory as usize];
        if !slot.swap(true, Ordering::Relaxed) {
            warn!("{}", advisory.message());
        }
    }

    /// Whether an advisory has fired this run.
    pub fn has_fired(&self, advisory: Advisory) -> bool {
        self.fired[advisory as usize].load(Ordering::Relaxed)
    }
}
