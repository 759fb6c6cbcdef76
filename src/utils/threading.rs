//! # Threading Configuration
//!
//! Rayon thread pool construction for the contig-parallel pipeline.

use crate::error::{NautilusError, Result};

/// Resolve the worker count: 0 means all hardware threads, otherwise the
/// requested count capped by hardware concurrency.
pub fn resolve_thread_count(requested: usize) -> usize {
    let hardware = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if requested == 0 {
        hardware
    } else {
        requested.min(hardware)
    }
}

/// Create a configured thread pool with named workers.
pub fn build_thread_pool(n_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("nautilus-worker-{}", i))
        .build()
        .map_err(|e| NautilusError::config(format!("failed to create thread pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_thread_count() {
        assert!(resolve_thread_count(0) >= 1);
        assert_eq!(resolve_thread_count(1), 1);
    }

    #[test]
    fn test_pool_builds_and_runs() {
        let pool = build_thread_pool(2).unwrap();
        let sum: u32 = pool.install(|| (0..10u32).sum());
        assert_eq!(sum, 45);
    }
}
