use uuid::Uuid;

use crate::domain::order::TransitionError;
use crate::store::StoreError;

// ============================================================================
// Fulfillment Error Taxonomy
// ============================================================================
//
// Every public operation returns one of these. Authorization failures are
// explicit on single-object operations (list operations filter silently
// instead); rejected operations name the constraint that failed, since the
// state machine's preconditions are the main source of legitimate
// rejections in normal operation.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Transient store failure, propagated unchanged; the caller may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl FulfillmentError {
    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<TransitionError> for FulfillmentError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::UnknownStatus(_) => Self::Validation(err.to_string()),
            TransitionError::InvalidTransition { .. } | TransitionError::PartnerRequired => {
                Self::InvalidState(err.to_string())
            }
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound { kind: "record", id },
            StoreError::StatusConflict { .. } | StoreError::AlreadyLinked(_) => {
                Self::Conflict(err.to_string())
            }
            StoreError::Unavailable(_) => Self::Unavailable(err.to_string()),
        }
    }
}
