use doree_core::{CoreError, GatewayError};
use uuid::Uuid;

use crate::coupon::CouponRejection;
use crate::delivery::TransitionError;
use crate::models::PaymentStatus;
use crate::repository::RepoError;

/// Coarse classification used by callers to decide how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected synchronously; message is safe to show verbatim
    Validation,
    /// Conflicts with the recorded state; never silently resolved
    Conflict,
    NotFound,
    /// Gateway unreachable or declined; the user may retry
    External,
    /// Datastore failure
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Coupon(#[from] CouponRejection),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Payment for gateway order {gateway_order_ref} is already {current}; refusing to mark it {requested}")]
    PaymentConflict {
        gateway_order_ref: String,
        current: PaymentStatus,
        requested: PaymentStatus,
    },

    #[error("Order {0} changed while being updated; reload and retry")]
    ConcurrentModification(Uuid),

    #[error("Payment signature verification failed")]
    InvalidSignature,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    Storage(#[from] RepoError),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::Validation(_) | OrderError::Coupon(_) | OrderError::InvalidSignature => {
                ErrorKind::Validation
            }
            OrderError::Transition(TransitionError::MissingMessage) => ErrorKind::Validation,
            OrderError::Transition(_)
            | OrderError::PaymentConflict { .. }
            | OrderError::ConcurrentModification(_) => ErrorKind::Conflict,
            OrderError::NotFound(_) => ErrorKind::NotFound,
            OrderError::Gateway(_) => ErrorKind::External,
            OrderError::Storage(RepoError::Duplicate(_)) => ErrorKind::Conflict,
            OrderError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the same request may succeed if the user simply tries again
    pub fn is_retryable(&self) -> bool {
        match self {
            OrderError::Gateway(_) | OrderError::ConcurrentModification(_) => true,
            OrderError::Storage(RepoError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

impl From<CoreError> for OrderError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidSignature => OrderError::InvalidSignature,
            CoreError::ConfigurationError(msg) => OrderError::Validation(msg),
        }
    }
}

pub type OrderResult<T> = Result<T, OrderError>;
