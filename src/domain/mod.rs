// ============================================================================
// Domain Layer - records and business rules, no I/O
// ============================================================================

pub mod invoice;
pub mod order;
pub mod partner;
pub mod prescription;
pub mod tenant;
