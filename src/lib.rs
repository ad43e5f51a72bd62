// ============================================================================
// rx_fulfillment - Order Fulfillment Coordinator
// ============================================================================
//
// Turns an approved prescription (or a direct cart checkout) into a
// trackable order, assigns a delivery agent, advances it through the
// multi-party status lifecycle, derives payment state from delivery state,
// keeps linked prescription/invoice records in sync best-effort, and scopes
// order visibility by caller role and pharmacy.
//
// ============================================================================

pub mod coordinator;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod store;

pub use coordinator::{
    CheckoutRequest, FulfillmentCoordinator, FulfillmentError, FulfillmentPolicy, OrderFilters,
};
pub use domain::order::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, StatusFields};
pub use domain::tenant::{Caller, Role};
pub use messaging::{BroadcastFanout, EventFanout};
pub use metrics::Metrics;
pub use store::MemoryStore;
