//! Error types for UDP session registration.

use uuid::Uuid;

/// Indicates that a UDP session could not be registered because one with the same id exists.
#[derive(Debug, thiserror::Error)]
#[error("UDP session {session_id} is already registered")]
pub struct SessionAlreadyRegistered {
    pub session_id: Uuid,
}

/// Indicates that the registry is full.
#[derive(Debug, thiserror::Error)]
#[error("UDP session limit of {limit} reached")]
pub struct SessionLimitReached {
    pub limit: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    AlreadyRegistered(#[from] SessionAlreadyRegistered),

    #[error(transparent)]
    LimitReached(#[from] SessionLimitReached),
}
