//! Operand containers.
//!
//! A [`User`] owns a contiguous array of [`Use`] edges, one per operand. Two
//! storage shapes exist:
//!
//! - **Inline**: the edge array sits immediately before the user object in a
//!   single allocation (`[Use; N][User]`). The operand count is fixed at
//!   construction. This is the layout for every fixed-arity operation.
//! - **Hung-off**: one indirection slot sits before the user
//!   (`[*mut Use][User]`) and points at a standalone edge array that can be
//!   grown later. Variable-arity operations, phi-like merges above all, use
//!   this shape; phi-like users additionally carry a parallel array of
//!   basic-block pointers after the edges.
//!
//! Because the operand storage lives outside the `User` struct proper, users
//! are handled through the copyable [`UserRef`] handle rather than
//! references; the handle derives the array base from the user address and
//! the packed shape bits.

use std::mem;
use std::ptr::{self, NonNull};

use crate::alloc::{raw_alloc, user_alloc, user_free};
use crate::use_list::Use;
use crate::value::{BasicBlock, Value};

// Hung-off storage interleaves edge and block arrays; the edge alignment
// must cover the block pointers that follow.
const _: () = assert!(mem::align_of::<Use>() >= mem::align_of::<*mut BasicBlock>());

// =============================================================================
// Packed Header
// =============================================================================

/// Bits available for the operand count.
pub const NUM_USER_OPERANDS_BITS: u32 = 27;

/// Largest operand count a single user can carry.
pub const MAX_OPERANDS: usize = (1 << NUM_USER_OPERANDS_BITS) - 1;

const OPERAND_COUNT_MASK: u32 = (1 << NUM_USER_OPERANDS_BITS) - 1;
const HUNG_OFF_BIT: u32 = 1 << NUM_USER_OPERANDS_BITS;
const CONSTANT_BIT: u32 = 1 << (NUM_USER_OPERANDS_BITS + 1);
const GLOBAL_BIT: u32 = 1 << (NUM_USER_OPERANDS_BITS + 2);

/// An operation that references values through its operand edges.
///
/// The struct itself is only the packed header; the operand storage precedes
/// it in memory according to the shape bit. Users are created with
/// [`User::new`] / [`User::new_hung_off`] and torn down with
/// [`UserRef::destroy`], never constructed on the stack.
#[repr(C)]
pub struct User {
    packed: u32,
}

impl User {
    /// Number of operand slots.
    #[inline]
    pub fn num_operands(&self) -> usize {
        (self.packed & OPERAND_COUNT_MASK) as usize
    }

    /// Whether the operand array hangs off a separate allocation.
    #[inline]
    pub fn has_hung_off_uses(&self) -> bool {
        self.packed & HUNG_OFF_BIT != 0
    }

    /// Whether this user is a structurally-canonicalized constant.
    #[inline]
    pub fn is_constant(&self) -> bool {
        self.packed & CONSTANT_BIT != 0
    }

    /// Whether this user is a global (constants that are globals stay
    /// rewritable).
    #[inline]
    pub fn is_global(&self) -> bool {
        self.packed & GLOBAL_BIT != 0
    }

    #[inline]
    fn set_num_operands(&mut self, n: usize) {
        debug_assert!(n <= MAX_OPERANDS);
        self.packed = (self.packed & !OPERAND_COUNT_MASK) | n as u32;
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Allocate a user with `num_operands` inline operand slots, each with no
    /// referenced value.
    ///
    /// Storage comes from the thread's arena when one is installed, the
    /// platform otherwise. Fatal when `num_operands` exceeds
    /// [`MAX_OPERANDS`].
    pub fn new(num_operands: usize) -> UserRef {
        assert!(
            num_operands <= MAX_OPERANDS,
            "too many operands for a single user"
        );
        let size = num_operands * mem::size_of::<Use>() + mem::size_of::<User>();
        let region = user_alloc(size);
        unsafe {
            let ops = region.as_ptr() as *mut Use;
            let user = ops.add(num_operands) as *mut User;
            ptr::write(
                user,
                User {
                    packed: num_operands as u32,
                },
            );
            for i in 0..num_operands {
                ptr::write(ops.add(i), Use::unassigned(user));
            }
            UserRef::from_raw(user)
        }
    }

    /// Allocate a user with hung-off operand storage: an empty indirection
    /// slot and an operand count of zero.
    ///
    /// Call [`UserRef::alloc_hung_off_uses`] to attach the first operand
    /// array.
    pub fn new_hung_off() -> UserRef {
        let size = mem::size_of::<*mut Use>() + mem::size_of::<User>();
        let region = user_alloc(size);
        unsafe {
            let slot = region.as_ptr() as *mut *mut Use;
            ptr::write(slot, ptr::null_mut());
            let user = slot.add(1) as *mut User;
            ptr::write(user, User { packed: HUNG_OFF_BIT });
            UserRef::from_raw(user)
        }
    }
}

// =============================================================================
// UserRef
// =============================================================================

/// A copyable handle to an allocated user.
///
/// Compares and hashes by address. The handle does not keep the user alive;
/// it is a raw pointer with an API.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserRef {
    ptr: NonNull<User>,
}

impl std::fmt::Debug for UserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserRef({:p})", self.ptr.as_ptr())
    }
}

impl UserRef {
    /// Create a handle from a raw user pointer.
    ///
    /// # Safety
    ///
    /// The pointer must have come from [`User::new`] or
    /// [`User::new_hung_off`] and the user must not have been destroyed.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut User) -> Self {
        Self {
            ptr: NonNull::new_unchecked(ptr),
        }
    }

    /// Get the raw pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut User {
        self.ptr.as_ptr()
    }

    /// Get the NonNull pointer.
    #[inline]
    pub fn as_non_null(self) -> NonNull<User> {
        self.ptr
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// The indirection slot preceding a hung-off user.
    #[inline]
    unsafe fn hung_off_slot(self) -> *mut *mut Use {
        debug_assert!((*self.as_ptr()).has_hung_off_uses());
        (self.as_ptr() as *mut u8).sub(mem::size_of::<*mut Use>()) as *mut *mut Use
    }

    /// Base of the operand array for either shape. Null only for a hung-off
    /// user before its first array is attached.
    #[inline]
    pub(crate) unsafe fn operand_base(self) -> *mut Use {
        let user = self.as_ptr();
        if (*user).has_hung_off_uses() {
            *self.hung_off_slot()
        } else {
            (user as *mut u8).sub((*user).num_operands() * mem::size_of::<Use>()) as *mut Use
        }
    }

    /// Base of the parallel basic-block array of a phi-like user.
    #[inline]
    unsafe fn block_base(self) -> *mut *mut BasicBlock {
        let n = (*self.as_ptr()).num_operands();
        self.operand_base().add(n) as *mut *mut BasicBlock
    }

    // =========================================================================
    // Operand Access
    // =========================================================================

    /// Number of operand slots.
    ///
    /// # Safety
    ///
    /// The user must be live.
    #[inline]
    pub unsafe fn num_operands(self) -> usize {
        (*self.as_ptr()).num_operands()
    }

    /// Whether the operand array hangs off a separate allocation.
    ///
    /// # Safety
    ///
    /// The user must be live.
    #[inline]
    pub unsafe fn has_hung_off_uses(self) -> bool {
        (*self.as_ptr()).has_hung_off_uses()
    }

    /// The `i`-th operand edge.
    ///
    /// # Safety
    ///
    /// The user must be live and `i` in bounds (asserted).
    #[inline]
    pub unsafe fn operand_use(self, i: usize) -> NonNull<Use> {
        assert!(i < (*self.as_ptr()).num_operands(), "operand out of range");
        NonNull::new_unchecked(self.operand_base().add(i))
    }

    /// The value referenced by the `i`-th operand, if any.
    ///
    /// # Safety
    ///
    /// The user must be live and `i` in bounds (asserted).
    #[inline]
    pub unsafe fn operand(self, i: usize) -> Option<NonNull<Value>> {
        (*self.operand_use(i).as_ptr()).get()
    }

    /// Point the `i`-th operand at `v`, maintaining both use-lists.
    ///
    /// Idempotent when `v` already is the operand.
    ///
    /// # Safety
    ///
    /// The user must be live, `i` in bounds (asserted), and the old and new
    /// values live.
    #[inline]
    pub unsafe fn set_operand(self, i: usize, v: Option<NonNull<Value>>) {
        Use::set(self.operand_use(i), v);
    }

    /// Iterate the operand values in slot order.
    ///
    /// # Safety
    ///
    /// The user must be live and remain unmutated for the iteration.
    pub unsafe fn operands(self) -> OperandIter {
        let n = (*self.as_ptr()).num_operands();
        let base = self.operand_base();
        OperandIter {
            cur: base,
            end: base.add(n),
        }
    }

    // =========================================================================
    // Phi Surface
    // =========================================================================

    /// The basic block paired with the `i`-th operand of a phi-like user.
    ///
    /// # Safety
    ///
    /// The user's hung-off storage must have been allocated with
    /// `is_phi = true`; `i` in bounds (asserted).
    pub unsafe fn incoming_block(self, i: usize) -> Option<NonNull<BasicBlock>> {
        assert!(i < (*self.as_ptr()).num_operands(), "operand out of range");
        NonNull::new(*self.block_base().add(i))
    }

    /// Pair the `i`-th operand of a phi-like user with `block`.
    ///
    /// # Safety
    ///
    /// As [`UserRef::incoming_block`]; `block` must outlive the user.
    pub unsafe fn set_incoming_block(self, i: usize, block: Option<NonNull<BasicBlock>>) {
        assert!(i < (*self.as_ptr()).num_operands(), "operand out of range");
        *self.block_base().add(i) = block.map_or(ptr::null_mut(), NonNull::as_ptr);
    }

    // =========================================================================
    // Hung-Off Storage
    // =========================================================================

    /// Attach a fresh hung-off operand array of `n` unassigned edges. With
    /// `is_phi`, the array is followed by `n` null basic-block pointers.
    ///
    /// After the call the operand count is `n`.
    ///
    /// # Safety
    ///
    /// The user must be live and hung-off (asserted). Any previously
    /// attached array is dropped on the floor; [`UserRef::grow_hung_off_uses`]
    /// is the only caller that may re-attach.
    pub unsafe fn alloc_hung_off_uses(self, n: usize, is_phi: bool) {
        let user = self.as_ptr();
        assert!(
            (*user).has_hung_off_uses(),
            "inline users cannot take hung-off operands"
        );
        assert!(n <= MAX_OPERANDS, "too many operands for a single user");

        if n == 0 {
            *self.hung_off_slot() = ptr::null_mut();
            (*user).set_num_operands(0);
            return;
        }

        let mut size = n * mem::size_of::<Use>();
        if is_phi {
            size += n * mem::size_of::<*mut BasicBlock>();
        }
        let begin = raw_alloc(size).as_ptr() as *mut Use;
        for i in 0..n {
            ptr::write(begin.add(i), Use::unassigned(user));
        }
        if is_phi {
            ptr::write_bytes(begin.add(n) as *mut *mut BasicBlock, 0, n);
        }
        *self.hung_off_slot() = begin;
        (*user).set_num_operands(n);
    }

    /// Grow the hung-off operand array to `new_n` slots.
    ///
    /// The first `old_n` edges move to the new array with their values and
    /// list memberships intact: each live edge is unlinked at its old address
    /// and relinked at its new one, so no list ever holds a stale pointer.
    /// For phi-like users the basic-block array moves along. The old array is
    /// released. Shrinking is not supported.
    ///
    /// # Safety
    ///
    /// The user must be live and hung-off (asserted); `is_phi` must match
    /// every earlier allocation for this user; all referenced values must be
    /// live.
    pub unsafe fn grow_hung_off_uses(self, new_n: usize, is_phi: bool) {
        let user = self.as_ptr();
        assert!(
            (*user).has_hung_off_uses(),
            "inline users cannot grow operands"
        );
        let old_n = (*user).num_operands();
        assert!(new_n > old_n, "hung-off operand arrays never shrink");

        let old_ops = *self.hung_off_slot();
        self.alloc_hung_off_uses(new_n, is_phi);
        let new_ops = *self.hung_off_slot();

        if old_ops.is_null() {
            return;
        }

        for i in 0..old_n {
            Use::transfer(old_ops.add(i), new_ops.add(i));
        }
        if is_phi {
            let old_blocks = old_ops.add(old_n) as *const *mut BasicBlock;
            let new_blocks = new_ops.add(new_n) as *mut *mut BasicBlock;
            ptr::copy_nonoverlapping(old_blocks, new_blocks, old_n);
        }
        Use::zap(old_ops, old_ops.add(old_n), true);
    }

    // =========================================================================
    // Rewriting
    // =========================================================================

    /// Point every operand currently referencing `from` at `to` instead.
    ///
    /// Fatal on constant users (globals excepted): constants are
    /// structurally canonicalized and must not be mutated in place.
    ///
    /// # Safety
    ///
    /// The user and both values must be live.
    pub unsafe fn replace_uses_of_with(self, from: NonNull<Value>, to: NonNull<Value>) {
        if from == to {
            return;
        }
        let user = self.as_ptr();
        assert!(
            !(*user).is_constant() || (*user).is_global(),
            "cannot rewrite the operands of a constant"
        );
        for i in 0..(*user).num_operands() {
            if self.operand(i) == Some(from) {
                self.set_operand(i, Some(to));
            }
        }
    }

    /// Mark this user as a structurally-canonicalized constant.
    ///
    /// # Safety
    ///
    /// The user must be live.
    pub unsafe fn mark_constant(self) {
        (*self.as_ptr()).packed |= CONSTANT_BIT;
    }

    /// Mark this user as a global.
    ///
    /// # Safety
    ///
    /// The user must be live.
    pub unsafe fn mark_global(self) {
        (*self.as_ptr()).packed |= GLOBAL_BIT;
    }

    // =========================================================================
    // Destruction
    // =========================================================================

    /// Destroy the user: unlink every operand edge from its value's use-list
    /// and return the storage, routing on the shape.
    ///
    /// # Safety
    ///
    /// The user must be live, all referenced values live, and the handle (or
    /// any copy of it) must not be used afterwards. Users allocated under a
    /// [`crate::UserAllocScope`] must be destroyed before the scope ends.
    pub unsafe fn destroy(self) {
        let user = self.as_ptr();
        let n = (*user).num_operands();
        if (*user).has_hung_off_uses() {
            let slot = self.hung_off_slot();
            let ops = *slot;
            if !ops.is_null() {
                Use::zap(ops, ops.add(n), true);
            }
            user_free(NonNull::new_unchecked(slot as *mut u8));
        } else {
            let ops = (user as *mut u8).sub(n * mem::size_of::<Use>()) as *mut Use;
            Use::zap(ops, ops.add(n), false);
            user_free(NonNull::new_unchecked(ops as *mut u8));
        }
    }
}

/// Destroy an inline user whose packed operand count may not have been
/// finalized, using the caller-known count instead.
///
/// This is the teardown path for construction that fails partway: the
/// operand count is known at the failure site even when the header is not
/// yet trustworthy.
///
/// # Safety
///
/// `user` must be a live inline user allocated with exactly `num_operands`
/// operand slots; all referenced values must be live.
pub unsafe fn destroy_with_operand_count(user: NonNull<User>, num_operands: usize) {
    let ops = (user.as_ptr() as *mut u8).sub(num_operands * mem::size_of::<Use>()) as *mut Use;
    Use::zap(ops, ops.add(num_operands), false);
    user_free(NonNull::new_unchecked(ops as *mut u8));
}

// =============================================================================
// Operand Iteration
// =============================================================================

/// Iterator over a user's operand values in slot order.
pub struct OperandIter {
    cur: *const Use,
    end: *const Use,
}

impl Iterator for OperandIter {
    type Item = Option<NonNull<Value>>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == self.end {
            return None;
        }
        let item = unsafe { (*self.cur).get() };
        self.cur = unsafe { self.cur.add(1) };
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = unsafe { self.end.offset_from(self.cur) } as usize;
        (len, Some(len))
    }
}

impl ExactSizeIterator for OperandIter {}

// =============================================================================
// Operator Marker
// =============================================================================

/// Marker for expression-like users that exist only as views over other
/// users. An operator is obtained by reinterpreting a live user with
/// [`Operator::from_user`] and never owned: clients destroy the concrete
/// user, and dropping an `Operator` by value is unreachable.
#[repr(C)]
pub struct Operator {
    user: User,
}

impl Operator {
    /// View a user as an operator.
    ///
    /// # Safety
    ///
    /// The user must be live for the lifetime of the returned view.
    #[inline]
    pub unsafe fn from_user<'a>(user: UserRef) -> &'a Operator {
        &*(user.as_ptr() as *const Operator)
    }

    /// Handle to the underlying user.
    #[inline]
    pub fn as_user(&self) -> UserRef {
        // A view never outlives its user, so the pointer is live.
        unsafe { UserRef::from_raw(&self.user as *const User as *mut User) }
    }

    /// Number of operand slots of the underlying user.
    #[inline]
    pub fn num_operands(&self) -> usize {
        self.user.num_operands()
    }
}

impl Drop for Operator {
    fn drop(&mut self) {
        unreachable!("operators are never destroyed directly");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed_value() -> NonNull<Value> {
        NonNull::from(Box::leak(Box::new(Value::new())))
    }

    unsafe fn free_value(v: NonNull<Value>) {
        drop(Box::from_raw(v.as_ptr()));
    }

    #[test]
    fn test_inline_two_operand_node() {
        unsafe {
            let v1 = boxed_value();
            let v2 = boxed_value();
            let u = User::new(2);
            assert_eq!(u.num_operands(), 2);
            assert!(!u.has_hung_off_uses());

            u.set_operand(0, Some(v1));
            u.set_operand(1, Some(v2));

            assert_eq!(v1.as_ref().uses().next(), Some(u.operand_use(0)));
            assert_eq!(v1.as_ref().num_uses(), 1);
            assert_eq!(v2.as_ref().uses().next(), Some(u.operand_use(1)));
            assert_eq!(v2.as_ref().num_uses(), 1);

            assert_eq!((*u.operand_use(0).as_ptr()).operand_no(), 0);
            assert_eq!((*u.operand_use(1).as_ptr()).operand_no(), 1);
            assert_eq!((*u.operand_use(1).as_ptr()).user(), u);

            u.destroy();
            free_value(v1);
            free_value(v2);
        }
    }

    #[test]
    fn test_zero_operand_user() {
        unsafe {
            let u = User::new(0);
            assert_eq!(u.num_operands(), 0);
            assert_eq!(u.operands().count(), 0);
            u.destroy();
        }
    }

    #[test]
    #[should_panic(expected = "too many operands")]
    fn test_too_many_operands_panics() {
        let _ = User::new(MAX_OPERANDS + 1);
    }

    #[test]
    fn test_set_operand_is_idempotent() {
        unsafe {
            let v = boxed_value();
            let u = User::new(1);
            u.set_operand(0, Some(v));
            u.set_operand(0, Some(v));
            assert_eq!(v.as_ref().num_uses(), 1);
            u.destroy();
            free_value(v);
        }
    }

    #[test]
    fn test_destroy_unlinks_live_edges() {
        unsafe {
            let v1 = boxed_value();
            let v2 = boxed_value();
            let u = User::new(2);
            u.set_operand(0, Some(v1));
            u.set_operand(1, Some(v2));

            u.destroy();
            assert!(!v1.as_ref().has_uses());
            assert!(!v2.as_ref().has_uses());

            free_value(v1);
            free_value(v2);
        }
    }

    #[test]
    fn test_destroy_with_operand_count() {
        unsafe {
            let v = boxed_value();
            let u = User::new(3);
            u.set_operand(1, Some(v));

            destroy_with_operand_count(u.as_non_null(), 3);
            assert!(!v.as_ref().has_uses());

            free_value(v);
        }
    }

    #[test]
    fn test_replace_uses_of_with() {
        unsafe {
            let v1 = boxed_value();
            let v2 = boxed_value();
            let u = User::new(3);
            u.set_operand(0, Some(v1));
            u.set_operand(1, Some(v2));
            u.set_operand(2, Some(v1));

            u.replace_uses_of_with(v1, v2);

            assert!(!v1.as_ref().has_uses());
            assert_eq!(v2.as_ref().num_uses(), 3);
            assert_eq!(u.operand(0), Some(v2));
            assert_eq!(u.operand(2), Some(v2));

            u.destroy();
            free_value(v1);
            free_value(v2);
        }
    }

    #[test]
    #[should_panic(expected = "constant")]
    fn test_replace_uses_of_with_refuses_constants() {
        unsafe {
            let v1 = boxed_value();
            let v2 = boxed_value();
            let u = User::new(1);
            u.set_operand(0, Some(v1));
            u.mark_constant();
            u.replace_uses_of_with(v1, v2);
        }
    }

    #[test]
    fn test_replace_uses_of_with_allows_globals() {
        unsafe {
            let v1 = boxed_value();
            let v2 = boxed_value();
            let u = User::new(1);
            u.set_operand(0, Some(v1));
            u.mark_constant();
            u.mark_global();

            u.replace_uses_of_with(v1, v2);
            assert_eq!(u.operand(0), Some(v2));

            u.destroy();
            free_value(v1);
            free_value(v2);
        }
    }

    #[test]
    fn test_hung_off_alloc() {
        unsafe {
            let u = User::new_hung_off();
            assert!(u.has_hung_off_uses());
            assert_eq!(u.num_operands(), 0);

            u.alloc_hung_off_uses(4, false);
            assert_eq!(u.num_operands(), 4);
            assert!(u.operands().all(|v| v.is_none()));

            u.destroy();
        }
    }

    #[test]
    fn test_hung_off_growth_preserves_edges() {
        unsafe {
            let v1 = boxed_value();
            let v2 = boxed_value();
            let v3 = boxed_value();
            let u = User::new_hung_off();
            u.alloc_hung_off_uses(2, false);
            u.set_operand(0, Some(v1));
            u.set_operand(1, Some(v2));

            u.grow_hung_off_uses(5, false);
            assert_eq!(u.num_operands(), 5);

            // The moved edges are the ones in the lists, at their new
            // addresses and original slots.
            assert_eq!(v1.as_ref().uses().next(), Some(u.operand_use(0)));
            assert_eq!(v2.as_ref().uses().next(), Some(u.operand_use(1)));
            assert_eq!(v1.as_ref().num_uses(), 1);
            assert_eq!((*u.operand_use(0).as_ptr()).operand_no(), 0);
            assert_eq!((*u.operand_use(1).as_ptr()).operand_no(), 1);

            u.set_operand(2, Some(v3));
            let values: Vec<_> = u.operands().collect();
            assert_eq!(
                values,
                vec![Some(v1), Some(v2), Some(v3), None, None]
            );

            u.destroy();
            assert!(!v1.as_ref().has_uses());
            assert!(!v2.as_ref().has_uses());
            assert!(!v3.as_ref().has_uses());
            free_value(v1);
            free_value(v2);
            free_value(v3);
        }
    }

    #[test]
    fn test_grow_from_zero_touches_no_value() {
        unsafe {
            let u = User::new_hung_off();
            u.alloc_hung_off_uses(0, false);
            u.grow_hung_off_uses(3, false);
            assert_eq!(u.num_operands(), 3);
            assert!(u.operands().all(|v| v.is_none()));
            u.destroy();
        }
    }

    #[test]
    #[should_panic(expected = "never shrink")]
    fn test_grow_refuses_to_shrink() {
        unsafe {
            let u = User::new_hung_off();
            u.alloc_hung_off_uses(4, false);
            u.grow_hung_off_uses(2, false);
        }
    }

    #[test]
    #[should_panic(expected = "inline users")]
    fn test_inline_user_cannot_grow() {
        unsafe {
            let u = User::new(2);
            u.grow_hung_off_uses(4, false);
        }
    }

    #[test]
    fn test_phi_blocks_survive_growth() {
        unsafe {
            let v1 = boxed_value();
            let v2 = boxed_value();
            let b1 = NonNull::from(Box::leak(Box::new(BasicBlock::new(1))));
            let b2 = NonNull::from(Box::leak(Box::new(BasicBlock::new(2))));

            let phi = User::new_hung_off();
            phi.alloc_hung_off_uses(2, true);
            phi.set_operand(0, Some(v1));
            phi.set_operand(1, Some(v2));
            phi.set_incoming_block(0, Some(b1));
            phi.set_incoming_block(1, Some(b2));

            phi.grow_hung_off_uses(4, true);

            assert_eq!(phi.incoming_block(0), Some(b1));
            assert_eq!(phi.incoming_block(1), Some(b2));
            assert_eq!(phi.incoming_block(2), None);
            assert_eq!(phi.incoming_block(3), None);
            assert_eq!(phi.operand(0), Some(v1));
            assert_eq!(phi.operand(1), Some(v2));

            phi.destroy();
            free_value(v1);
            free_value(v2);
            drop(Box::from_raw(b1.as_ptr()));
            drop(Box::from_raw(b2.as_ptr()));
        }
    }

    #[test]
    fn test_operand_iter_len() {
        unsafe {
            let u = User::new(3);
            let iter = u.operands();
            assert_eq!(iter.len(), 3);
            u.destroy();
        }
    }

    #[test]
    fn test_operator_views_its_user() {
        unsafe {
            let v = boxed_value();
            let u = User::new(2);
            u.set_operand(0, Some(v));

            let op = Operator::from_user(u);
            assert_eq!(op.as_user(), u);
            assert_eq!(op.num_operands(), 2);
            assert_eq!(op.as_user().operand(0), Some(v));

            u.destroy();
            free_value(v);
        }
    }

    #[test]
    #[should_panic(expected = "never destroyed directly")]
    fn test_operator_drop_is_unreachable() {
        unsafe {
            let u = User::new(0);
            let op = Operator::from_user(u);
            // Tearing an operator out of its user and dropping it by value
            // must hit the unreachable destructor.
            let owned = ptr::read(op as *const Operator);
            drop(owned);
        }
    }
}
