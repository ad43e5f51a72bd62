use super::value_objects::OrderStatus;

// ============================================================================
// Transition Engine Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("unknown order status label: {0:?}")]
    UnknownStatus(String),

    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("no delivery partner assigned - assignment required before confirmation")]
    PartnerRequired,
}
