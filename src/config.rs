//! Arena configuration parameters.
//!
//! Defaults match the compile-time constants in [`crate::alloc`] and are
//! appropriate for typical compilation workloads; tests and unusual embedders
//! can tune them per scope.

use crate::alloc::{BLOCK_SIZE, LARGE_ALLOCATION_THRESHOLD};

/// Configuration for a thread-local user arena.
///
/// # Example
///
/// ```ignore
/// use ember_ir::{ArenaConfig, UserAllocScope};
///
/// // Small blocks for a short-lived helper thread
/// let _scope = UserAllocScope::with_config(ArenaConfig {
///     block_size: 8 * 1024,
///     ..Default::default()
/// });
/// ```
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Size of each arena block in bytes.
    ///
    /// Blocks are never released until the owning scope ends, so larger
    /// blocks trade residency for fewer block allocations.
    ///
    /// Default: 64 KiB
    pub block_size: usize,

    /// Requests above this many bytes bypass the blocks and go straight to
    /// the platform allocator.
    ///
    /// Oversized users are rare enough that packing them into blocks would
    /// only fragment the bump space.
    ///
    /// Default: 4096
    pub large_allocation_threshold: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            large_allocation_threshold: LARGE_ALLOCATION_THRESHOLD,
        }
    }
}
