//! Mellor-Crummey and Scott lock.
//!
//! This module contains the implementation of the Mellor-Crummey and Scott lock.
//! It is a synchronization primitive that is an evolution of the ticket lock and spinlock:
//! every waiter spins on a flag inside its own queue node instead of on shared state,
//! and the lock is handed over to the next node in FIFO order.
//!
//! ## Usage
//!
//! `McsLock` accepts a generic type `T` that is the type of the data protected by the lock.
//! Use `()` when the lock only guards a critical section.
//! The second generic type `B` is the back-off strategy used by the lock.
//!
//! Note that rustc currently requires that you at least specify either the back-off strategy
//! (and will infer the type of `T`) or the type of `T` (and will use the default `Spin`
//! back-off strategy).
//!
//! ```rust
//! # use threading::locks::mcs::McsLock;
//! # use threading::locks::Spin;
//! #
//! let lock = McsLock::<u32>::new(0); // `Spin` is used
//! let lock = McsLock::<_, Spin>::new(0); // `T` is inferred
//! ```
//!
//! To access the content of the lock, use the `with_locked` method.
//! The queue node lives on the stack of the call and the lock is released
//! when the closure returns or unwinds.
//!
//! ```rust
//! # use threading::locks::mcs::McsLock;
//! #
//! let lock = McsLock::<u8>::new(0);
//!
//! let res = lock.with_locked(|value| {
//!     *value = 42;
//!     *value
//! });
//! assert_eq!(res, 42);
//! ```
//!
//! If you need a more fine-grained control over the lock, you can use the `lock` method,
//! which lets you handle the guard manually.
//!
//! `McsNode` is a structure used to queue the locks, and it must only be used on one lock
//! at once. The guard borrows the node mutably, so the borrow checker won't let you do otherwise.
//!
//! ```rust
//! # use threading::locks::mcs::{McsLock, McsNode};
//! #
//! let lock = McsLock::<u8>::new(0);
//! let mut node = McsNode::new();
//!
//! let mut guard = lock.lock(&mut node);
//! *guard = 42;
//! assert_eq!(*guard, 42);
//! drop(guard);
//!
//! // The lock is free again!
//! assert!(!lock.is_locked());
//! ```

use super::{BackOff, Spin};
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Mellor-Crummey and Scott lock.
pub struct McsLock<T, B: BackOff = Spin> {
    /// Tail of the queue.
    tail: AtomicPtr<McsNode>,
    /// Data protected by the lock.
    data: UnsafeCell<T>,
    /// Back-off strategy.
    _back_off: PhantomData<fn() -> B>,
}

// Safety:
// Access to `data` is serialized by the queue, so sharing the lock only
// requires the data to be sendable to the thread that holds it.
unsafe impl<T: Send, B: BackOff> Sync for McsLock<T, B> {}

/// Node for MCS lock.
///
/// Nodes are basically used as a queue for the lock.
/// Locking with a node means that the node will patiently wait in the queue.
/// Once the node is at the front of the queue, it can access the lock.
///
/// Unless you specifically want to use a node, you shouldn't need to build one yourself.
/// The `with_locked` function will take care of creating a node for you.
pub struct McsNode {
    /// Whether the owner of the node still has to wait.
    locked: AtomicBool,
    /// Next node in the queue.
    next: AtomicPtr<McsNode>,
}

impl McsNode {
    #[must_use]
    #[inline]
    /// Creates a new node for the MCS lock.
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[must_use]
    #[inline]
    /// Returns true if the owner of the node still has to wait.
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    #[must_use]
    #[inline]
    fn next(&self) -> Option<NonNull<Self>> {
        NonNull::new(self.next.load(Ordering::Acquire))
    }

    #[inline]
    fn set_next(&self, next: *mut Self) {
        self.next.store(next, Ordering::Release);
    }

    #[inline]
    /// Resets the node before it enters a queue.
    ///
    /// The node is exclusively borrowed, so plain writes are enough.
    fn reset(&mut self, locked: bool) {
        *self.locked.get_mut() = locked;
        *self.next.get_mut() = ptr::null_mut();
    }
}

impl Default for McsNode {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, B: BackOff> McsLock<T, B> {
    #[must_use]
    #[inline]
    /// Creates a new MCS lock.
    pub const fn new(value: T) -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
            data: UnsafeCell::new(value),
            _back_off: PhantomData,
        }
    }

    #[must_use]
    /// Locks the MCS lock and returns a guard.
    ///
    /// If the lock is held, the node is appended to the queue and the calling
    /// thread spins on it until its predecessor hands the lock over.
    ///
    /// For single operations, prefer `with_locked`.
    /// This function allows for a more fine-grained control over the duration of the lock.
    pub fn lock<'s, 'node>(&'s self, node: &'node mut McsNode) -> McsGuard<'node, 's, T, B> {
        node.reset(true);
        let node: &'node McsNode = node;
        let node_ptr = ptr::from_ref(node).cast_mut();

        // Place the node at the end of the queue
        let prev = self.tail.swap(node_ptr, Ordering::AcqRel);

        if let Some(prev_ptr) = NonNull::new(prev) {
            // Safety: the predecessor cannot release the lock before it has seen
            // this link, so its node is still alive.
            unsafe { prev_ptr.as_ref() }.set_next(node_ptr);

            // Wait until the node is at the front of the queue
            let mut back_off = B::new();
            while node.is_locked() {
                back_off.back_off();
            }
        }

        McsGuard::new(self, node)
    }

    #[must_use]
    /// Tries to lock the MCS lock and returns a guard.
    /// If it is already in use, does nothing.
    ///
    /// For single operations, prefer `try_with_locked`.
    /// This function allows for a more fine-grained control over the duration of the lock.
    pub fn try_lock<'s, 'node>(
        &'s self,
        node: &'node mut McsNode,
    ) -> Option<McsGuard<'node, 's, T, B>> {
        // `locked` is never read on this path, only `next` matters
        node.reset(false);
        let node: &'node McsNode = node;

        self.tail
            .compare_exchange(
                ptr::null_mut(),
                ptr::from_ref(node).cast_mut(),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()?;

        Some(McsGuard::new(self, node))
    }

    #[inline]
    /// Locks the lock and calls the closure with the guard.
    pub fn with_locked<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut node = McsNode::new();
        let mut guard = self.lock(&mut node);
        f(&mut guard)
    }

    #[inline]
    /// Tries to lock the lock and calls the closure with the guard.
    pub fn try_with_locked<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut node = McsNode::new();
        let mut guard = self.try_lock(&mut node)?;
        Some(f(&mut guard))
    }

    #[must_use]
    #[inline]
    /// Returns true if the lock is held or has waiters.
    ///
    /// The answer may be stale by the time it is read.
    pub fn is_locked(&self) -> bool {
        !self.tail.load(Ordering::Relaxed).is_null()
    }

    #[must_use]
    #[inline]
    /// Returns a mutable reference to the data.
    ///
    /// The exclusive borrow guarantees that no one else holds the lock.
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    #[must_use]
    #[inline]
    /// Consume the lock and returns the inner data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default, B: BackOff> Default for McsLock<T, B> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, B: BackOff> fmt::Debug for McsLock<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McsLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII guard for MCS lock.
///
/// Dropping the guard releases the lock, handing it to the next queued node if any.
pub struct McsGuard<'node, 'lock, T, B: BackOff = Spin> {
    lock: &'lock McsLock<T, B>,
    node: &'node McsNode,
    _data: PhantomData<&'lock mut T>,
}

impl<'node, 'lock, T, B: BackOff> McsGuard<'node, 'lock, T, B> {
    #[inline]
    const fn new(lock: &'lock McsLock<T, B>, node: &'node McsNode) -> Self {
        Self {
            lock,
            node,
            _data: PhantomData,
        }
    }

    #[cfg(test)]
    /// Counts the nodes that are linked behind the holder.
    ///
    /// Nodes that swapped the tail but did not publish their link yet are not counted.
    pub(crate) fn waiters(&self) -> usize {
        let mut count = 0;
        let mut current = self.node.next();
        while let Some(node) = current {
            count += 1;
            // Safety: queued nodes cannot leave the queue while the lock is held.
            current = unsafe { node.as_ref() }.next();
        }
        count
    }
}

impl<T, B: BackOff> Deref for McsGuard<'_, '_, T, B> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: the guard holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, B: BackOff> DerefMut for McsGuard<'_, '_, T, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: the guard holds the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, B: BackOff> Drop for McsGuard<'_, '_, T, B> {
    fn drop(&mut self) {
        let next = match self.node.next() {
            Some(next) => next,
            None => {
                // Check if the node is the back of the queue
                if self
                    .lock
                    .tail
                    .compare_exchange(
                        ptr::from_ref(self.node).cast_mut(),
                        ptr::null_mut(),
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    return;
                }

                // If setting the tail to null fails, it means a new node is being added.
                // In such a case, wait until it is completely added.
                // As this operation should be very fast, we can afford to spin here.
                loop {
                    if let Some(next) = self.node.next() {
                        break next;
                    }
                    core::hint::spin_loop();
                }
            }
        };

        // Unlock the next node.
        // Safety: the successor keeps spinning on its node until this store,
        // so the node is alive. It must not be touched afterwards.
        unsafe { next.as_ref() }
            .locked
            .store(false, Ordering::Release);
    }
}
