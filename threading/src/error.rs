use thiserror::Error;

/// Errors raised while building a lock.
///
/// Acquiring a lock never fails; it only waits.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("A priority lock needs at least one admission slot")]
    ZeroAdmissionSlots,
}

pub type Result<T> = core::result::Result<T, LockError>;
