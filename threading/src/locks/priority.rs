//! MCS lock with priority admission.
//!
//! `PriorityMcsLock` protects its data with a core `McsLock`. Elevated callers
//! queue on the core lock directly. Normal callers first go through one of a
//! fixed set of admission slots, themselves MCS locks, picked round-robin.
//! A normal caller holds its slot only until the core lock is granted, so at
//! most one normal caller per slot is ever queued on the core lock.
//!
//! This bounds how many normal callers spin on the core queue at once, and
//! spreads the remaining ones over independent slot queues. Elevated callers
//! never wait on a slot: they only wait behind whoever is already queued on
//! the core lock.
//!
//! ```rust
//! # use threading::locks::priority::PriorityMcsLock;
//! # use threading::locks::mcs::McsNode;
//! # use threading::priority::{self, ThreadPriority};
//! #
//! let lock = PriorityMcsLock::<Vec<&str>>::with_slots(Vec::new(), 2).unwrap();
//!
//! lock.with_locked(|log| log.push("normal"));
//!
//! let _scope = priority::scoped(ThreadPriority::AboveNormal);
//! let mut node = McsNode::new();
//! let mut guard = lock.lock(&mut node);
//! guard.push("elevated");
//! drop(guard);
//!
//! assert_eq!(lock.into_inner(), ["normal", "elevated"]);
//! ```
//!
//! The tier of a caller is decided by a `Classify` implementation.
//! By default the ambient priority of the calling thread is used
//! (see `crate::priority`).

use super::mcs::{McsGuard, McsLock, McsNode};
use super::{BackOff, Spin};
use crate::config::PriorityLockConfig;
use crate::error::Result;
use crate::priority::{Classify, CurrentThread, Tier};
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

/// MCS lock that lets elevated callers skip the admission stage.
pub struct PriorityMcsLock<T, B: BackOff = Spin, C: Classify = CurrentThread> {
    /// Lock protecting the data, contended by both tiers.
    core: McsLock<T, B>,
    /// Admission slots for normal callers.
    slots: Box<[McsLock<(), B>]>,
    /// Round-robin counter used to pick a slot.
    next_slot: AtomicUsize,
    classifier: C,
}

impl<T, B: BackOff, C: Classify + Default> PriorityMcsLock<T, B, C> {
    #[must_use]
    /// Creates a new lock with the default amount of admission slots.
    ///
    /// See `config::default_admission_slots`.
    pub fn new(value: T) -> Self {
        Self::with_config(value, &PriorityLockConfig::default(), C::default())
    }

    /// Creates a new lock with `slots` admission slots.
    ///
    /// ## Errors
    ///
    /// Returns `LockError::ZeroAdmissionSlots` if `slots` is zero.
    pub fn with_slots(value: T, slots: usize) -> Result<Self> {
        let config = PriorityLockConfig::new(slots)?;
        Ok(Self::with_config(value, &config, C::default()))
    }
}

impl<T, B: BackOff, C: Classify> PriorityMcsLock<T, B, C> {
    #[must_use]
    /// Creates a new lock from a configuration and a classifier.
    pub fn with_config(value: T, config: &PriorityLockConfig, classifier: C) -> Self {
        let slots = (0..config.admission_slots().get())
            .map(|_| McsLock::new(()))
            .collect::<Box<[_]>>();
        log::debug!("Priority lock created with {} admission slots", slots.len());

        Self {
            core: McsLock::new(value),
            slots,
            next_slot: AtomicUsize::new(0),
            classifier,
        }
    }

    #[must_use]
    /// Locks the lock and returns a guard on the core lock.
    ///
    /// Elevated callers queue on the core lock directly.
    /// Normal callers first acquire an admission slot, then the core lock,
    /// and release the slot before returning.
    ///
    /// For single operations, prefer `with_locked`.
    pub fn lock<'s, 'node>(&'s self, node: &'node mut McsNode) -> McsGuard<'node, 's, T, B> {
        match self.classifier.classify() {
            Tier::Elevated => self.core.lock(node),
            Tier::Normal => {
                let mut slot_node = McsNode::new();
                let admission = self.slots[self.next_slot()].lock(&mut slot_node);

                let guard = self.core.lock(node);
                // The slot only throttles how many normal callers queue on the core lock
                drop(admission);
                guard
            }
        }
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

    #[must_use]
    #[inline]
    /// Returns the amount of admission slots.
    pub fn admission_slots(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    #[inline]
    /// Returns the classifier deciding the tier of callers.
    pub const fn classifier(&self) -> &C {
        &self.classifier
    }

    #[must_use]
    #[inline]
    /// Returns true if the core lock is held or has waiters.
    ///
    /// The answer may be stale by the time it is read.
    pub fn is_locked(&self) -> bool {
        self.core.is_locked()
    }

    #[must_use]
    #[inline]
    /// Returns a mutable reference to the data.
    pub const fn get_mut(&mut self) -> &mut T {
        self.core.get_mut()
    }

    #[must_use]
    #[inline]
    /// Consume the lock and returns the inner data.
    pub fn into_inner(self) -> T {
        self.core.into_inner()
    }

    #[inline]
    /// Picks the admission slot of the next normal caller.
    ///
    /// Racing callers may observe an uneven distribution, which is fine.
    fn next_slot(&self) -> usize {
        self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len()
    }
}

impl<T: Default, B: BackOff, C: Classify + Default> Default for PriorityMcsLock<T, B, C> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, B: BackOff, C: Classify> fmt::Debug for PriorityMcsLock<T, B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityMcsLock")
            .field("locked", &self.is_locked())
            .field("admission_slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::super::SpinThenYield;
    use super::*;
    use crate::error::LockError;
    use crate::priority::{self, Fixed, ThreadPriority};
    use std::sync::{Arc, Barrier};
    use std::thread::{sleep, spawn, yield_now};
    use std::time::{Duration, Instant};

    type TestPriorityLock<T> = PriorityMcsLock<T, SpinThenYield>;

    /// Waits until `count` nodes are linked behind the guard.
    fn wait_for_waiters<T, B: BackOff>(guard: &McsGuard<'_, '_, T, B>, count: usize) {
        while guard.waiters() < count {
            yield_now();
        }
    }

    fn spawn_elevated<F>(f: F) -> std::thread::JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        spawn(move || {
            let _scope = priority::scoped(ThreadPriority::Highest);
            f();
        })
    }

    #[test]
    fn test_priority_lock() {
        let lock = TestPriorityLock::with_slots(0, 2).unwrap();
        assert_eq!(lock.admission_slots(), 2);

        let mut node = McsNode::new();
        let mut guard = lock.lock(&mut node);
        *guard = 42;
        assert!(lock.is_locked());
        drop(guard);

        assert!(!lock.is_locked());
        assert!(lock.slots.iter().all(|slot| !slot.is_locked()));
        assert_eq!(lock.into_inner(), 42);
    }

    #[test]
    fn test_zero_slots() {
        let res = TestPriorityLock::with_slots((), 0);
        assert_eq!(res.err(), Some(LockError::ZeroAdmissionSlots));
    }

    #[test]
    fn test_default_slots() {
        let lock = TestPriorityLock::<u8>::default();
        assert_eq!(
            lock.admission_slots(),
            crate::config::default_admission_slots().get()
        );
    }

    #[test]
    fn test_round_robin() {
        let slots = 3;
        let lock = TestPriorityLock::with_slots(0, slots).unwrap();

        for k in 0..10 {
            lock.with_locked(|value| *value += 1);
            assert_eq!(lock.next_slot.load(Ordering::Relaxed), k + 1);
        }

        let picked = (0..7).map(|_| lock.next_slot()).collect::<Vec<_>>();
        assert_eq!(picked, [1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_round_robin_from_zero() {
        let lock = TestPriorityLock::with_slots((), 4).unwrap();
        let picked = (0..9).map(|_| lock.next_slot()).collect::<Vec<_>>();
        assert_eq!(picked, [0, 1, 2, 3, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_sequential_callers_cycle_slots() {
        let slots = 3;
        let lock = Arc::new(TestPriorityLock::with_slots(0, slots).unwrap());

        for k in 0..2 * slots + 1 {
            let mut node = McsNode::new();
            let core = lock.core.lock(&mut node);

            let handle = {
                let lock = lock.clone();
                spawn(move || lock.with_locked(|value| *value += 1))
            };

            // The caller now holds its slot and waits on the core lock
            wait_for_waiters(&core, 1);
            for (i, slot) in lock.slots.iter().enumerate() {
                assert_eq!(slot.is_locked(), i == k % slots, "caller {k}, slot {i}");
            }

            drop(core);
            handle.join().unwrap();
            assert!(lock.slots.iter().all(|slot| !slot.is_locked()));
        }

        assert_eq!(lock.with_locked(|value| *value), 2 * slots + 1);
    }

    #[test]
    fn test_elevated_skips_admission() {
        let lock = TestPriorityLock::with_slots(0, 2).unwrap();

        // Saturate every admission slot.
        let mut slot_nodes = [McsNode::new(), McsNode::new()];
        let [first, second] = &mut slot_nodes;
        let first_slot = lock.slots[0].lock(first);
        let second_slot = lock.slots[1].lock(second);

        let _scope = priority::scoped(ThreadPriority::AboveNormal);
        lock.with_locked(|value| *value += 1);
        assert_eq!(lock.next_slot.load(Ordering::Relaxed), 0);

        drop(first_slot);
        drop(second_slot);
        assert_eq!(lock.into_inner(), 1);
    }

    #[test]
    fn test_fixed_classifier() {
        let config = PriorityLockConfig::new(1).unwrap();
        let lock = PriorityMcsLock::<u8, SpinThenYield, _>::with_config(
            0,
            &config,
            Fixed(Tier::Elevated),
        );

        let mut node = McsNode::new();
        let slot = lock.slots[0].lock(&mut node);
        lock.with_locked(|value| *value = 1);
        drop(slot);

        assert_eq!(lock.classifier(), &Fixed(Tier::Elevated));
        assert_eq!(lock.into_inner(), 1);
    }

    #[test]
    fn test_slot_released_before_critical_section() {
        let lock = Arc::new(TestPriorityLock::with_slots(false, 1).unwrap());

        let _scope = priority::scoped(ThreadPriority::Highest);
        let mut node = McsNode::new();
        let guard = lock.lock(&mut node);

        let normal = spawn({
            let lock = lock.clone();
            move || {
                lock.with_locked(|slot_free| *slot_free = !lock.slots[0].is_locked());
            }
        });

        // The normal caller is queued on the core lock while holding its slot.
        wait_for_waiters(&guard, 1);
        assert!(lock.slots[0].is_locked());
        drop(guard);

        normal.join().unwrap();
        assert!(lock.with_locked(|slot_free| *slot_free));
    }

    #[test]
    fn test_mixed_tiers_mutual_exclusion() {
        let num_threads = if cfg!(miri) { 4 } else { 8 };
        let iterations = if cfg!(miri) { 20 } else { 2_000 };

        let lock = Arc::new(TestPriorityLock::with_slots(0_usize, 2).unwrap());
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles = (0..num_threads)
            .map(|i| {
                let lock = lock.clone();
                let barrier = barrier.clone();
                spawn(move || {
                    let _scope = priority::scoped(if i % 2 == 0 {
                        ThreadPriority::Highest
                    } else {
                        ThreadPriority::Normal
                    });
                    barrier.wait();
                    for _ in 0..iterations {
                        lock.with_locked(|value| *value += 1);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(lock.slots.iter().all(|slot| !slot.is_locked()));
        assert_eq!(lock.with_locked(|value| *value), num_threads * iterations);
    }

    #[test]
    fn test_admission_throttling() {
        let slots = 2;
        let num_threads = if cfg!(miri) { 4 } else { 8 };
        let lock = Arc::new(TestPriorityLock::with_slots(0, slots).unwrap());

        let _scope = priority::scoped(ThreadPriority::Highest);
        let mut node = McsNode::new();
        let guard = lock.lock(&mut node);

        let handles = (0..num_threads)
            .map(|_| {
                spawn({
                    let lock = lock.clone();
                    move || lock.with_locked(|value| *value += 1)
                })
            })
            .collect::<Vec<_>>();

        // One caller per slot makes it to the core queue, the others wait on slots.
        wait_for_waiters(&guard, slots);
        for _ in 0..100 {
            assert_eq!(guard.waiters(), slots);
            assert!(lock.slots.iter().all(McsLock::is_locked));
            yield_now();
        }
        drop(guard);

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.with_locked(|value| *value), num_threads);
    }

    #[test]
    fn test_priority_precedence() {
        let lock = Arc::new(TestPriorityLock::with_slots(Vec::new(), 2).unwrap());

        let _scope = priority::scoped(ThreadPriority::Highest);
        let mut node = McsNode::new();
        let guard = lock.lock(&mut node);

        let mut handles = (0..6)
            .map(|_| {
                spawn({
                    let lock = lock.clone();
                    move || lock.with_locked(|order| order.push(Tier::Normal))
                })
            })
            .collect::<Vec<_>>();

        // Both slots are held by callers queued on the core lock.
        wait_for_waiters(&guard, 2);

        handles.push(spawn_elevated({
            let lock = lock.clone();
            move || lock.with_locked(|order| order.push(Tier::Elevated))
        }));
        wait_for_waiters(&guard, 3);
        drop(guard);

        for handle in handles {
            handle.join().unwrap();
        }

        let order = lock.with_locked(|order| order.clone());
        let mut expected = vec![Tier::Normal; 7];
        expected[2] = Tier::Elevated;
        assert_eq!(order, expected);
    }

    #[test]
    fn test_elevated_beat_delayed_normal_holders() {
        let lock = Arc::new(TestPriorityLock::with_slots(Vec::new(), 2).unwrap());

        let _scope = priority::scoped(ThreadPriority::Highest);
        let mut node = McsNode::new();
        let guard = lock.lock(&mut node);

        let mut handles = (0..10)
            .map(|_| {
                spawn({
                    let lock = lock.clone();
                    move || {
                        lock.with_locked(|acquired| {
                            acquired.push((Tier::Normal, Instant::now()));
                            sleep(Duration::from_millis(2));
                        });
                    }
                })
            })
            .collect::<Vec<_>>();
        wait_for_waiters(&guard, 2);

        for _ in 0..2 {
            handles.push(spawn_elevated({
                let lock = lock.clone();
                move || lock.with_locked(|acquired| acquired.push((Tier::Elevated, Instant::now())))
            }));
        }
        wait_for_waiters(&guard, 4);
        drop(guard);

        for handle in handles {
            handle.join().unwrap();
        }

        let acquired = lock.with_locked(|acquired| acquired.clone());
        assert_eq!(acquired.len(), 12);

        assert!(acquired.windows(2).all(|pair| pair[0].1 <= pair[1].1));

        let last_elevated = acquired
            .iter()
            .rposition(|(tier, _)| *tier == Tier::Elevated)
            .unwrap();
        let normal_after = acquired[last_elevated..]
            .iter()
            .filter(|(tier, _)| *tier == Tier::Normal)
            .count();
        assert!(normal_after >= 8, "only {normal_after} normal acquisitions came after");
    }
}
