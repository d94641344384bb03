//! Threading primitives for the node.
//!
//! The centerpiece is a Mellor-Crummey and Scott queue lock and a priority-aware
//! wrapper around it that lets elevated threads jump the admission queue.
//!
//! ```rust
//! # use threading::locks::priority::PriorityMcsLock;
//! # use threading::priority::{self, ThreadPriority};
//! #
//! let lock = PriorityMcsLock::<u64>::with_slots(0, 2).unwrap();
//!
//! lock.with_locked(|value| *value += 1);
//!
//! let _scope = priority::scoped(ThreadPriority::Highest);
//! lock.with_locked(|value| *value += 1);
//!
//! assert_eq!(lock.into_inner(), 2);
//! ```
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic, clippy::nursery)]

pub mod config;
pub mod error;
pub mod locks;
pub mod priority;

pub use config::PriorityLockConfig;
pub use error::{LockError, Result};
pub use locks::mcs::{McsGuard, McsLock, McsNode};
pub use locks::priority::PriorityMcsLock;
pub use priority::{Classify, Tier, ThreadPriority};
