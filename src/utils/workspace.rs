//! # Run Workspace
//!
//! Scoped resources for one invocation: the temporary staging directory
//! (created on start, removed on every exit path via its guard) and the
//! per-worker memory budget arithmetic.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::{NautilusError, Result};

/// Upper bound on numbered suffixes tried when the preferred temp directory
/// name is taken.
const TEMP_DIR_NAME_COUNT_LIMIT: u32 = 10_000;

/// Floor for the per-worker working memory split.
pub const MIN_WORKER_MEMORY_BYTES: u64 = 100 * 1024 * 1024;

/// A byte count parsed from strings like `500MB`, `6G`, or `1024`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemoryFootprint(pub u64);

impl MemoryFootprint {
    pub fn bytes(self) -> u64 {
        self.0
    }
}

impl FromStr for MemoryFootprint {
    type Err = NautilusError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let digits_end = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, unit) = s.split_at(digits_end);
        let value: u64 = digits.parse().map_err(|_| {
            NautilusError::config(format!("'{}' is not a memory footprint", s))
        })?;
        let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" => 1024,
            "M" | "MB" => 1024 * 1024,
            "G" | "GB" => 1024 * 1024 * 1024,
            other => {
                return Err(NautilusError::config(format!(
                    "unknown memory unit '{}' in '{}'",
                    other, s
                )))
            }
        };
        Ok(Self(value * multiplier))
    }
}

impl fmt::Display for MemoryFootprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        if b >= 1024 * 1024 * 1024 && b % (1024 * 1024 * 1024) == 0 {
            write!(f, "{}GB", b / (1024 * 1024 * 1024))
        } else if b >= 1024 * 1024 && b % (1024 * 1024) == 0 {
            write!(f, "{}MB", b / (1024 * 1024))
        } else {
            write!(f, "{}B", b)
        }
    }
}

/// Per-worker memory budget: the target split across workers, floored.
pub fn worker_memory_budget(target: MemoryFootprint, workers: usize) -> u64 {
    (target.bytes() / workers.max(1) as u64).max(MIN_WORKER_MEMORY_BYTES)
}

/// The run's temporary staging directory.
///
/// Created under the working directory with a numbered suffix when the
/// preferred name collides; removed on drop, so cancellation and error
/// unwinding clean up too.
#[derive(Debug)]
pub struct TempDirGuard {
    path: PathBuf,
    keep: bool,
}

impl TempDirGuard {
    /// Create `<working_directory>/<prefix>` or the first available
    /// `<prefix>-N` for N up to the collision limit.
    pub fn create(working_directory: &Path, prefix: &str) -> Result<Self> {
        if !working_directory.exists() {
            return Err(NautilusError::system(
                "temporary directory",
                format!(
                    "working directory {} does not exist",
                    working_directory.display()
                ),
                "check --working-directory",
            ));
        }
        let mut candidate = working_directory.join(prefix);
        let mut counter = 0u32;
        loop {
            match std::fs::create_dir(&candidate) {
                Ok(()) => {
                    debug!(path = %candidate.display(), "created temporary directory");
                    return Ok(Self {
                        path: candidate,
                        keep: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    counter += 1;
                    if counter > TEMP_DIR_NAME_COUNT_LIMIT {
                        return Err(NautilusError::system(
                            "temporary directory",
                            format!(
                                "could not find an unused name under {} after {} attempts",
                                working_directory.display(),
                                TEMP_DIR_NAME_COUNT_LIMIT
                            ),
                            "remove stale temporary directories",
                        ));
                    }
                    candidate = working_directory.join(format!("{}-{}", prefix, counter));
                }
                Err(e) => {
                    return Err(NautilusError::system(
                        "temporary directory",
                        format!("could not create {}: {}", candidate.display(), e),
                        "check permissions and free space on the working directory",
                    ));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the directory on disk at drop (debugging aid).
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove temporary directory"
            );
        }
    }
}
