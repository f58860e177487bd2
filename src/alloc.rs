//! Thread-local block allocator for user storage.
//!
//! Sequential user construction usually happens one basic block at a time, so
//! fresh allocations bump through fixed-size blocks for locality. Freed
//! allocations are not returned to the platform: they park in power-of-two
//! buckets and are handed back to later requests of a compatible size class.
//! Requests above [`LARGE_ALLOCATION_THRESHOLD`] bypass the blocks entirely.
//!
//! Every region handed out (bumped, bucketed, large, or fallback) is
//! preceded by one header word recording its payload size and size-class tag,
//! so [`UserAllocator::free`] can route it without any out-of-band metadata.
//!
//! # Thread binding
//!
//! The arena lives in a thread-local slot installed by [`UserAllocScope`].
//! While no scope is active, [`user_alloc`]/[`user_free`] fall back to
//! standalone platform allocations tagged [`INVALID_BUCKET`], which both
//! paths release correctly.

use std::alloc::{handle_alloc_error, Layout};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;

use log::{debug, trace};

use crate::config::ArenaConfig;
use crate::stats::ArenaStats;

// =============================================================================
// Constants
// =============================================================================

/// Default arena block size (64 KiB).
pub const BLOCK_SIZE: usize = 1 << 16;

/// Requests above this many bytes bypass the blocks.
pub const LARGE_ALLOCATION_THRESHOLD: usize = 1 << 12;

/// Width of the size-class tag in bits.
pub const ALLOCATION_BITS: u32 = 5;

/// Tag for allocations that went straight to the platform and must never be
/// bucketed.
pub const INVALID_BUCKET: u8 = 1 << (ALLOCATION_BITS - 1);

/// Size of the header word preceding every payload.
const HEADER_SIZE: usize = std::mem::size_of::<u64>();

/// Alignment of every region the allocator hands out.
const ALLOC_ALIGN: usize = std::mem::align_of::<u64>();

// =============================================================================
// Allocation Header
// =============================================================================

// Header word layout: low 8 bits hold the size-class tag, the remaining bits
// the payload size. The size is what lets the large and fallback paths build
// the Layout they were allocated with.

#[inline]
unsafe fn write_header(region: *mut u8, size: usize, tag: u8) {
    (region as *mut u64).write(((size as u64) << 8) | tag as u64);
}

#[inline]
unsafe fn read_header(payload: *const u8) -> (usize, u8) {
    let word = (payload.sub(HEADER_SIZE) as *const u64).read();
    ((word >> 8) as usize, (word & 0xff) as u8)
}

/// Read the size-class tag of a live allocation (test support).
#[cfg(test)]
unsafe fn allocation_tag(payload: NonNull<u8>) -> u8 {
    read_header(payload.as_ptr()).1
}

// =============================================================================
// Size Classes
// =============================================================================

/// Bucket index written into a fresh allocation's tag: the floored power of
/// two. A carved slot holds exactly `size` bytes, so once freed it can only
/// serve requests of at most `2^floor_log2(size)` bytes.
#[inline]
fn free_bucket_index(size: usize) -> u8 {
    debug_assert!(size > 0);
    (usize::BITS - 1 - size.leading_zeros()) as u8
}

/// Bucket index consulted when allocating: the smallest class whose cached
/// slots are guaranteed to fit the request.
#[inline]
fn reuse_bucket_index(size: usize) -> u8 {
    debug_assert!(size > 0);
    size.next_power_of_two().trailing_zeros() as u8
}

#[inline]
fn align_up(size: usize) -> usize {
    (size + ALLOC_ALIGN - 1) & !(ALLOC_ALIGN - 1)
}

// =============================================================================
// Block
// =============================================================================

/// One fixed-size arena block with a monotonic bump cursor.
struct Block {
    blob: NonNull<u8>,
    size: usize,
    offset: usize,
}

impl Block {
    fn new(size: usize) -> Self {
        let layout = Layout::from_size_align(size, ALLOC_ALIGN).expect("invalid block layout");
        let ptr = unsafe { std::alloc::alloc(layout) };
        let Some(blob) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Self {
            blob,
            size,
            offset: 0,
        }
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.size - self.offset
    }

    #[inline]
    fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let start = self.blob.as_ptr() as usize;
        addr >= start && addr < start + self.size
    }

    /// Carve `total` bytes from the cursor. Caller checked `remaining`.
    #[inline]
    fn carve(&mut self, total: usize) -> *mut u8 {
        debug_assert!(self.remaining() >= total);
        let region = unsafe { self.blob.as_ptr().add(self.offset) };
        self.offset += align_up(total);
        // The final carve may round past the end; clamp so `remaining` stays
        // meaningful.
        self.offset = self.offset.min(self.size);
        region
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.size, ALLOC_ALIGN).expect("invalid block layout");
        unsafe {
            std::alloc::dealloc(self.blob.as_ptr(), layout);
        }
    }
}

// =============================================================================
// User Allocator
// =============================================================================

/// Per-thread block allocator servicing user allocations.
///
/// Owned by a [`UserAllocScope`]; destroying the allocator frees every block
/// outright, so all users allocated through it must already be gone.
pub struct UserAllocator {
    config: ArenaConfig,
    blocks: Vec<Block>,
    /// Free lists indexed by size class. Slots keep the header written at
    /// their original carve, so reuse needs no re-tagging.
    buckets: Vec<Vec<NonNull<u8>>>,
    stats: ArenaStats,
}

impl UserAllocator {
    /// Create an allocator with default configuration.
    pub fn new() -> Self {
        Self::with_config(ArenaConfig::default())
    }

    /// Create an allocator with the given configuration.
    pub fn with_config(config: ArenaConfig) -> Self {
        assert!(
            config.block_size >= align_up(HEADER_SIZE + config.large_allocation_threshold),
            "arena blocks must fit the largest bucketed allocation"
        );
        assert!(
            config.large_allocation_threshold < 1 << INVALID_BUCKET,
            "bucketed size classes must stay below the invalid-bucket tag"
        );
        Self {
            config,
            blocks: Vec::new(),
            buckets: Vec::new(),
            stats: ArenaStats::new(),
        }
    }

    /// Allocate `size` bytes of pointer-aligned storage.
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        debug_assert!(size > 0);
        self.stats.allocations += 1;
        self.stats.bytes_requested += size as u64;

        if size > self.config.large_allocation_threshold {
            self.stats.large_allocations += 1;
            trace!("user arena: large allocation of {size} bytes bypasses blocks");
            return raw_alloc(size);
        }

        // Check for a reusable slot first; its bucket is the nearest
        // accommodating power of two.
        let reuse = reuse_bucket_index(size) as usize;
        if let Some(slot) = self.buckets.get_mut(reuse).and_then(Vec::pop) {
            self.stats.reuse_hits += 1;
            return slot;
        }

        let total = HEADER_SIZE + size;
        let block = self.block_for(total);
        let region = block.carve(total);

        let tag = free_bucket_index(size);
        debug_assert!(tag < INVALID_BUCKET, "size-class tag exceeds allotted bits");
        unsafe {
            write_header(region, size, tag);
            NonNull::new_unchecked(region.add(HEADER_SIZE))
        }
    }

    /// Return an allocation for reuse (bucketed) or to the platform (large).
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`UserAllocator::allocate`] on this arena or
    /// from the fallback path, and must not be freed twice.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        self.stats.frees += 1;
        let (size, tag) = read_header(ptr.as_ptr());
        if tag == INVALID_BUCKET {
            release_region(ptr, size);
            return;
        }

        let bucket = tag as usize;
        if self.buckets.len() <= bucket {
            self.buckets.resize_with(bucket + 1, Vec::new);
        }
        self.buckets[bucket].push(ptr);
    }

    /// Whether `ptr` lies within one of this arena's blocks.
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.blocks.iter().any(|b| b.contains(ptr))
    }

    /// Snapshot of the allocation counters.
    #[inline]
    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    /// The last block if it still fits `total` bytes, else a fresh one.
    fn block_for(&mut self, total: usize) -> &mut Block {
        let needs_block = match self.blocks.last() {
            Some(block) => block.remaining() < total,
            None => true,
        };
        if needs_block {
            self.stats.blocks_allocated += 1;
            trace!(
                "user arena: block {} ({} bytes)",
                self.blocks.len(),
                self.config.block_size
            );
            self.blocks.push(Block::new(self.config.block_size));
        }
        self.blocks.last_mut().expect("block list cannot be empty")
    }
}

impl Default for UserAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Platform Path
// =============================================================================

/// Standalone platform allocation carrying the same header as arena regions,
/// tagged so any free path routes it back to the platform.
pub(crate) fn raw_alloc(size: usize) -> NonNull<u8> {
    let total = HEADER_SIZE + size;
    let layout = Layout::from_size_align(total, ALLOC_ALIGN).expect("allocation size overflow");
    let region = unsafe { std::alloc::alloc(layout) };
    if region.is_null() {
        handle_alloc_error(layout);
    }
    unsafe {
        write_header(region, size, INVALID_BUCKET);
        NonNull::new_unchecked(region.add(HEADER_SIZE))
    }
}

/// Release a standalone platform allocation.
///
/// # Safety
///
/// `ptr` must have come from [`raw_alloc`] (or an arena's large path, which
/// is the same thing) and must not be freed twice.
pub(crate) unsafe fn raw_free(ptr: NonNull<u8>) {
    let (size, tag) = read_header(ptr.as_ptr());
    debug_assert_eq!(
        tag, INVALID_BUCKET,
        "bucketed arena allocation released without its arena"
    );
    release_region(ptr, size);
}

#[inline]
unsafe fn release_region(payload: NonNull<u8>, size: usize) {
    let total = HEADER_SIZE + size;
    let layout = Layout::from_size_align(total, ALLOC_ALIGN).expect("allocation size overflow");
    std::alloc::dealloc(payload.as_ptr().sub(HEADER_SIZE), layout);
}

// =============================================================================
// Thread-Local Slot
// =============================================================================

thread_local! {
    static USER_ALLOCATOR: RefCell<Option<UserAllocator>> = const { RefCell::new(None) };
}

/// Allocate user storage through the thread's arena, or from the platform
/// when no arena is installed.
pub(crate) fn user_alloc(size: usize) -> NonNull<u8> {
    USER_ALLOCATOR.with(|slot| match slot.borrow_mut().as_mut() {
        Some(arena) => arena.allocate(size),
        None => raw_alloc(size),
    })
}

/// Free user storage through the thread's arena, or via the platform when no
/// arena is installed.
///
/// # Safety
///
/// `ptr` must have come from [`user_alloc`] on this thread and must not be
/// freed twice.
pub(crate) unsafe fn user_free(ptr: NonNull<u8>) {
    USER_ALLOCATOR.with(|slot| match slot.borrow_mut().as_mut() {
        Some(arena) => arena.free(ptr),
        None => raw_free(ptr),
    })
}

/// Whether the current thread has an arena installed.
pub fn arena_installed() -> bool {
    USER_ALLOCATOR.with(|slot| slot.borrow().is_some())
}

/// Snapshot of the current thread's arena counters, if one is installed.
pub fn arena_stats() -> Option<ArenaStats> {
    USER_ALLOCATOR.with(|slot| slot.borrow().as_ref().map(UserAllocator::stats))
}

/// Whether `ptr` lies within a block of the current thread's arena.
///
/// Large allocations and fallback allocations never do.
pub fn arena_contains(ptr: *const u8) -> bool {
    USER_ALLOCATOR.with(|slot| slot.borrow().as_ref().is_some_and(|a| a.contains(ptr)))
}

// =============================================================================
// Scoped Acquisition
// =============================================================================

/// Installs a user arena in the thread-local slot for the scope's lifetime.
///
/// Construction fails fatally if the thread already has an arena; release
/// destroys the arena (freeing every block) and clears the slot. All users
/// allocated inside the scope must be destroyed before it ends; their
/// storage vanishes with the blocks.
///
/// The scope is deliberately `!Send`: it must be dropped on the thread that
/// created it.
pub struct UserAllocScope {
    _not_send: PhantomData<*const ()>,
}

impl UserAllocScope {
    /// Install an arena with default configuration.
    pub fn new() -> Self {
        Self::with_config(ArenaConfig::default())
    }

    /// Install an arena with the given configuration.
    pub fn with_config(config: ArenaConfig) -> Self {
        USER_ALLOCATOR.with(|slot| {
            let mut slot = slot.borrow_mut();
            assert!(
                slot.is_none(),
                "user allocator already installed on this thread"
            );
            debug!("user arena: installed (block size {})", config.block_size);
            *slot = Some(UserAllocator::with_config(config));
        });
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Default for UserAllocScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UserAllocScope {
    fn drop(&mut self) {
        USER_ALLOCATOR.with(|slot| {
            let mut slot = slot.borrow_mut();
            let arena = slot.take();
            assert!(arena.is_some(), "user allocator released twice");
            if let Some(arena) = arena {
                let stats = arena.stats();
                debug!(
                    "user arena: released ({} allocations, {} blocks, reuse {:.0}%)",
                    stats.allocations,
                    stats.blocks_allocated,
                    stats.reuse_ratio() * 100.0
                );
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
