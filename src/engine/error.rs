use thiserror::Error;
use ulid::Ulid;

use crate::lifecycle::ReservationState;
use crate::validation::{ValidationError, ValidationKind};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("reservation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: ReservationState,
        to: ReservationState,
    },
    #[error("reservation {0} is paid; only cancellation may change its slot")]
    PaidReservationImmutable(Ulid),
    #[error("invalid: {0}")]
    Invalid(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage fault: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn validation_kind(&self) -> Option<ValidationKind> {
        match self {
            EngineError::Validation(v) => Some(v.kind),
            _ => None,
        }
    }

    pub fn is_overlap(&self) -> bool {
        self.validation_kind() == Some(ValidationKind::Overlap)
    }

    /// Only storage faults are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}
