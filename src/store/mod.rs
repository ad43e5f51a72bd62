use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::invoice::{Invoice, InvoiceStatus};
use crate::domain::order::{Order, OrderPatch, OrderStatus};
use crate::domain::partner::DeliveryPartner;
use crate::domain::prescription::{Prescription, PrescriptionStatus};
use crate::domain::tenant::{OrderScope, Pharmacy};

mod memory;

pub use memory::MemoryStore;

// ============================================================================
// Entity Store - persistence seams
// ============================================================================
//
// The coordinator depends on point lookups, filtered queries and
// single-document atomic updates only. No multi-document transaction
// primitive is assumed anywhere.
//
// The order update is a compare-and-swap guarded by the status the caller
// read, so a concurrent writer advancing the order surfaces as a conflict
// instead of being silently overwritten by an older state.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(Uuid),

    #[error("concurrent update on order {order_id}: expected status {expected}, found {actual}")]
    StatusConflict {
        order_id: Uuid,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("prescription {0} is already linked to an order")]
    AlreadyLinked(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Filtered query over the caller's visibility scope.
    async fn find_matching(&self, scope: &OrderScope) -> Result<Vec<Order>, StoreError>;

    /// Atomic single-document patch, applied only while the order is still
    /// in `expected` status. Returns the updated document.
    async fn update_checked(
        &self,
        id: Uuid,
        expected: OrderStatus,
        patch: OrderPatch,
    ) -> Result<Order, StoreError>;
}

#[async_trait]
pub trait PrescriptionStore: Send + Sync {
    async fn insert(&self, prescription: Prescription) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Prescription>, StoreError>;

    /// All prescriptions routed to one pharmacy; feeds the visibility
    /// filter's promoted-order disjunct.
    async fn find_by_pharmacy(&self, pharmacy_id: Uuid) -> Result<Vec<Prescription>, StoreError>;

    /// Reverse lookup of the prescription an order was promoted from.
    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Prescription>, StoreError>;

    /// Record the promotion: sets `order_id` (once, immutable afterwards)
    /// and flips the status to ordered.
    async fn link_order(&self, id: Uuid, order_id: Uuid) -> Result<(), StoreError>;

    async fn set_status(&self, id: Uuid, status: PrescriptionStatus) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PartnerStore: Send + Sync {
    async fn insert(&self, partner: DeliveryPartner) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DeliveryPartner>, StoreError>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn insert(&self, invoice: Invoice) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invoice>, StoreError>;

    async fn set_status(&self, id: Uuid, status: InvoiceStatus) -> Result<(), StoreError>;
}

/// Resolves the pharmacy a caller owns, if any, plus the point lookup the
/// coordinator needs for best-effort display-name resolution.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn pharmacy_owned_by(&self, user_id: Uuid) -> Result<Option<Pharmacy>, StoreError>;

    async fn pharmacy_by_id(&self, id: Uuid) -> Result<Option<Pharmacy>, StoreError>;
}
