//! Values and their use-lists.
//!
//! A [`Value`] is anything a user's operand can reference. The value itself
//! is owned by the surrounding IR (instruction results, arguments, constants;
//! none of which this crate models); all this crate needs from it is the
//! head of its use-list, through which every referencing edge can be
//! enumerated, counted, or rewritten.
//!
//! The lifetime contract is the client's: a value must not be dropped while
//! edges still reference it. Clear or replace the uses first (for example
//! with [`Value::replace_all_uses_with`]).

use std::ptr::{self, NonNull};

use smallvec::SmallVec;

use crate::use_list::{Use, UseIter};
use crate::user::UserRef;

// =============================================================================
// Value
// =============================================================================

/// An SSA definition: the target end of def-use edges.
///
/// At all times the use-list contains exactly those edges whose referenced
/// value is this value.
#[repr(C)]
pub struct Value {
    use_list: *mut Use,
}

impl Value {
    /// Create a value with no uses.
    #[inline]
    pub fn new() -> Self {
        Self {
            use_list: ptr::null_mut(),
        }
    }

    /// Iterate the edges referencing this value.
    ///
    /// Splicing edges while iterating invalidates the iterator; snapshot
    /// with [`Value::users`] when mutating.
    #[inline]
    pub fn uses(&self) -> UseIter {
        UseIter::from_head(self.use_list)
    }

    /// Whether any edge references this value.
    #[inline]
    pub fn has_uses(&self) -> bool {
        !self.use_list.is_null()
    }

    /// Whether exactly one edge references this value.
    #[inline]
    pub fn has_one_use(&self) -> bool {
        !self.use_list.is_null() && unsafe { (*self.use_list).next_use().is_none() }
    }

    /// Number of edges referencing this value. Walks the list.
    pub fn num_uses(&self) -> usize {
        self.uses().count()
    }

    /// Snapshot of the users referencing this value, one entry per edge (a
    /// user referencing the value through several operands appears once per
    /// operand).
    ///
    /// Safe to hold while rewriting edges, unlike [`Value::uses`].
    ///
    /// # Safety
    ///
    /// Every edge in the use-list must belong to a live user.
    pub unsafe fn users(&self) -> SmallVec<[UserRef; 8]> {
        self.uses().map(|u| (*u.as_ptr()).user()).collect()
    }

    /// Point every edge referencing `this` at `new` instead (or clear them
    /// all when `new` is `None`), emptying this value's use-list.
    ///
    /// Fatal when `new` is `this` itself.
    ///
    /// # Safety
    ///
    /// `this`, `new`, and every user in the use-list must be live.
    pub unsafe fn replace_all_uses_with(this: NonNull<Value>, new: Option<NonNull<Value>>) {
        assert!(
            new != Some(this),
            "cannot replace a value's uses with itself"
        );
        loop {
            let head = (*this.as_ptr()).use_list;
            let Some(head) = NonNull::new(head) else {
                break;
            };
            Use::set(head, new);
        }
    }

    /// Splice `u` at the head of `value`'s use-list.
    pub(crate) unsafe fn add_use(value: *mut Value, u: *mut Use) {
        Use::add_to_list(u, ptr::addr_of_mut!((*value).use_list));
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("first_use", &self.use_list)
            .finish()
    }
}

// =============================================================================
// BasicBlock
// =============================================================================

/// A control-flow predecessor label.
///
/// Phi-like users carry one of these per operand, in a parallel array beside
/// their hung-off edges. The block structure itself (instruction lists,
/// terminators) lives elsewhere in the compiler; here it is only a payload
/// whose pointers travel with the operands.
#[derive(Debug, PartialEq, Eq)]
pub struct BasicBlock {
    id: u32,
}

impl BasicBlock {
    /// Create a block label with the given id.
    #[inline]
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    /// The block id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }
}

// =============================================================================
// Tests
// =============================================================================
