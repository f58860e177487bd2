//! Ember IR def-use core.
//!
//! This crate maintains the bidirectional edges between SSA definitions
//! (*values*) and the operations that reference them (*users*). Every operand
//! slot of a user is a [`Use`]: simultaneously one edge of the def-use graph
//! and one node of the referenced value's intrusive use-list. Optimization
//! passes lean on these edges for every rewrite, so both the per-edge
//! representation and every edge mutation sit on the hottest path in the
//! compiler.
//!
//! # Architecture
//!
//! - **Use edges** (`use_list`): four-word edge objects spliced into a
//!   doubly-linked per-value use-list. The `prev` link is a pointer to the
//!   pointer that points at the edge, so unlinking is O(1) from anywhere in
//!   the list.
//! - **Users** (`user`): operand containers with two allocation shapes.
//!   *Inline* users carve their `Use` array immediately before the user
//!   object in a single allocation; *hung-off* users keep one indirection
//!   slot before the object and grow a detached array over their lifetime
//!   (phi-like nodes carry a parallel basic-block pointer array).
//! - **Arena** (`alloc`): a thread-local block allocator for user storage.
//!   Fresh allocations bump through 64 KiB blocks; freed allocations return
//!   to power-of-two buckets for O(1) reuse; oversized requests bypass the
//!   blocks entirely.
//!
//! # Safety
//!
//! The graph is built from raw pointers by necessity: use-lists are cyclic
//! (edges point back into sibling edges and into value heads), and the
//! operand array lives outside the `User` struct proper. The lifetime
//! contract is the client's: values must outlive the edges that reference
//! them, users must be destroyed before their arena scope exits, and a value
//! must have its uses cleared or replaced before it is dropped. Nothing here
//! detects a violation after the fact.
//!
//! # Threading
//!
//! Strictly single-threaded per arena. A thread installs its arena with
//! [`UserAllocScope`]; users allocated under that scope must be destroyed on
//! the same thread before the scope ends. Without a scope, allocations fall
//! back to the platform allocator.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alloc;
pub mod config;
pub mod use_list;
pub mod user;
pub mod value;

mod stats;

// Re-exports for convenient access
pub use alloc::{
    arena_contains, arena_installed, arena_stats, UserAllocScope, ALLOCATION_BITS, BLOCK_SIZE,
    INVALID_BUCKET, LARGE_ALLOCATION_THRESHOLD,
};
pub use config::ArenaConfig;
pub use stats::ArenaStats;
pub use use_list::{Use, UseIter};
pub use user::{
    destroy_with_operand_count, OperandIter, Operator, User, UserRef, MAX_OPERANDS,
    NUM_USER_OPERANDS_BITS,
};
pub use value::{BasicBlock, Value};
