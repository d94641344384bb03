//! Construction parameters of priority locks.

use crate::error::{LockError, Result};
use core::num::NonZeroUsize;

/// Parameters of a `PriorityMcsLock`.
///
/// ```rust
/// # use threading::config::PriorityLockConfig;
/// # use threading::LockError;
/// #
/// let config = PriorityLockConfig::new(4).unwrap();
/// assert_eq!(config.admission_slots().get(), 4);
///
/// assert_eq!(PriorityLockConfig::new(0), Err(LockError::ZeroAdmissionSlots));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityLockConfig {
    admission_slots: NonZeroUsize,
}

impl PriorityLockConfig {
    /// Builds a configuration with an explicit amount of admission slots.
    ///
    /// ## Errors
    ///
    /// Returns `LockError::ZeroAdmissionSlots` if `admission_slots` is zero.
    pub fn new(admission_slots: usize) -> Result<Self> {
        let admission_slots =
            NonZeroUsize::new(admission_slots).ok_or(LockError::ZeroAdmissionSlots)?;
        Ok(Self { admission_slots })
    }

    #[must_use]
    #[inline]
    /// Creates a configuration from an already validated slot count.
    pub const fn with_admission_slots(admission_slots: NonZeroUsize) -> Self {
        Self { admission_slots }
    }

    #[must_use]
    #[inline]
    /// Amount of normal-tier callers that may contend for the core lock at once.
    pub const fn admission_slots(&self) -> NonZeroUsize {
        self.admission_slots
    }
}

impl Default for PriorityLockConfig {
    fn default() -> Self {
        Self {
            admission_slots: default_admission_slots(),
        }
    }
}

#[must_use]
/// Half of the available logical CPUs, at least one.
pub fn default_admission_slots() -> NonZeroUsize {
    let cpus = match std::thread::available_parallelism() {
        Ok(cpus) => cpus.get(),
        Err(err) => {
            log::warn!("Unable to query available parallelism, assuming one CPU: {err}");
            1
        }
    };

    let slots = NonZeroUsize::new(cpus / 2).unwrap_or(NonZeroUsize::MIN);
    log::debug!("Default admission slots: {slots} ({cpus} logical CPUs)");
    slots
}
