//! Locks related utilities.
//!
//! This module contains the queue locks used to synchronize access
//! to shared resources on the node's hot paths.
//!
//! ## Modules
//!
//! - `mcs` : Provides an implementation of the MCS lock.
//! - `priority` : Provides an MCS lock that lets elevated threads skip admission.
//!
//! ## Back-off Strategy
//!
//! Waiters call into a `BackOff` strategy every time they observe that
//! they still have to wait. A fresh strategy is built for every acquisition,
//! so stateful strategies (such as exponential back-off) start over each time.
//!
//! - `Spin` : busy-waits with `core::hint::spin_loop` (the default).
//! - `Yield` : gives the time slice back to the OS scheduler.
//! - `SpinThenYield` : spins with exponential back-off, then yields.
//!
//! Prefer `Spin` for short critical sections on machines that are not
//! oversubscribed, and `SpinThenYield` when there may be more runnable
//! threads than cores.

pub mod mcs;
pub mod priority;

/// A trait that defines a back-off strategy for locks.
///
/// This trait is used to define how a thread should behave when it
/// is unable to acquire a lock.
pub trait BackOff {
    /// Creates the strategy state for one acquisition.
    fn new() -> Self;

    /// Performs the back-off operation.
    fn back_off(&mut self);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A back-off strategy that uses a spin-wait loop.
///
/// To optimize performance and CPU consumption,
/// the function `core::hint::spin_loop` is called.
pub struct Spin;

impl BackOff for Spin {
    #[inline]
    fn new() -> Self {
        Self
    }

    #[inline]
    fn back_off(&mut self) {
        core::hint::spin_loop();
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A back-off strategy that yields the current time slice.
pub struct Yield;

impl BackOff for Yield {
    #[inline]
    fn new() -> Self {
        Self
    }

    #[inline]
    fn back_off(&mut self) {
        std::thread::yield_now();
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A back-off strategy that spins with exponential back-off,
/// then falls back to yielding.
///
/// The amount of `spin_loop` hints doubles on each call until it reaches
/// `2^SPIN_LIMIT`. Every call after that yields to the scheduler instead.
pub struct SpinThenYield {
    step: u32,
}

impl SpinThenYield {
    /// Exponent of the longest spin burst.
    pub const SPIN_LIMIT: u32 = 6;
}

impl BackOff for SpinThenYield {
    #[inline]
    fn new() -> Self {
        Self { step: 0 }
    }

    #[inline]
    fn back_off(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..1_u32 << self.step {
                core::hint::spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}
