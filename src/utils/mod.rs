//! # Utilities Module
//!
//! Cross-cutting helpers: numerical routines, the run workspace (temp
//! directory, memory budgets), thread-pool configuration, and the advisory
//! warning channel.

pub mod advisory;
pub mod maths;
pub mod threading;
pub mod workspace;

pub use advisory::{Advisory, AdvisoryChannel};
pub use workspace::{MemoryFootprint, TempDirGuard};
