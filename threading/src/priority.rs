//! Ambient thread priority and caller classification.
//!
//! Every thread carries a `ThreadPriority`, `Normal` unless changed.
//! Priority locks only care about two tiers: threads strictly above `Normal`
//! are `Elevated`, every other thread is `Normal`.
//!
//! ```rust
//! # use threading::priority::{self, ThreadPriority, Tier};
//! #
//! assert_eq!(priority::current().tier(), Tier::Normal);
//! {
//!     let _scope = priority::scoped(ThreadPriority::AboveNormal);
//!     assert_eq!(priority::current().tier(), Tier::Elevated);
//! }
//! assert_eq!(priority::current(), ThreadPriority::Normal);
//! ```
//!
//! Locks read the tier through the `Classify` trait, so tests and embedders
//! can plug their own source of truth.

use core::cell::Cell;
use core::marker::PhantomData;

/// Scheduling importance of a thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreadPriority {
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Highest,
}

impl ThreadPriority {
    #[must_use]
    #[inline]
    /// Returns the lock tier of threads running at this priority.
    pub fn tier(self) -> Tier {
        if self > Self::Normal {
            Tier::Elevated
        } else {
            Tier::Normal
        }
    }
}

/// Lock tier of a caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Goes through an admission slot before contending for the core lock.
    #[default]
    Normal,
    /// Contends for the core lock directly.
    Elevated,
}

thread_local! {
    static CURRENT: Cell<ThreadPriority> = const { Cell::new(ThreadPriority::Normal) };
}

#[must_use]
#[inline]
/// Returns the priority of the calling thread.
pub fn current() -> ThreadPriority {
    CURRENT.with(Cell::get)
}

#[inline]
/// Sets the priority of the calling thread and returns the previous one.
pub fn set_current(priority: ThreadPriority) -> ThreadPriority {
    CURRENT.with(|current| current.replace(priority))
}

#[must_use]
#[inline]
/// Sets the priority of the calling thread until the returned scope is dropped.
pub fn scoped(priority: ThreadPriority) -> PriorityScope {
    PriorityScope {
        previous: set_current(priority),
        _not_send: PhantomData,
    }
}

/// RAII scope that restores the previous thread priority on drop.
///
/// The scope is tied to the thread that created it.
///
/// ```rust
/// # use threading::priority::{self, ThreadPriority};
/// #
/// {
///     let _scope = priority::scoped(ThreadPriority::Lowest);
///     assert_eq!(priority::current(), ThreadPriority::Lowest);
/// } // Leaving the scope restores `Normal`
/// assert_eq!(priority::current(), ThreadPriority::Normal);
/// ```
pub struct PriorityScope {
    previous: ThreadPriority,
    _not_send: PhantomData<*const ()>,
}

impl PriorityScope {
    #[must_use]
    #[inline]
    /// Returns the priority that will be restored.
    pub const fn previous(&self) -> ThreadPriority {
        self.previous
    }
}

impl Drop for PriorityScope {
    fn drop(&mut self) {
        set_current(self.previous);
    }
}

/// Decides which tier the calling thread belongs to.
pub trait Classify {
    /// Classifies the calling thread.
    fn classify(&self) -> Tier;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Classifies callers by the ambient priority of the current thread.
pub struct CurrentThread;

impl Classify for CurrentThread {
    #[inline]
    fn classify(&self) -> Tier {
        current().tier()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Classifies every caller in the same tier.
pub struct Fixed(pub Tier);

impl Classify for Fixed {
    #[inline]
    fn classify(&self) -> Tier {
        self.0
    }
}

impl<F> Classify for F
where
    F: Fn() -> Tier,
{
    #[inline]
    fn classify(&self) -> Tier {
        self()
    }
}
