use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tenant::TenantRef;

use super::value_objects::{
    DeliveryAddress, OrderItem, OrderStatus, PartnerSnapshot, PaymentMethod, PaymentStatus,
    StatusHistoryEntry, Tracking,
};

// ============================================================================
// Order Record - the unit of fulfillment
// ============================================================================

/// A fulfillment record linking a customer, items, a status and an optional
/// delivery assignment.
///
/// Pharmacy linkage is historically split across `pharmacy_id` and
/// `pharmacy_name`; either may be populated, so consumers must treat them as
/// alternatives rather than a consistent pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Bumped on every single-document update; backs the status-guarded
    /// compare-and-swap write.
    pub version: i64,

    pub customer_id: Uuid,
    pub pharmacy_id: Option<TenantRef>,
    pub pharmacy_name: Option<String>,

    pub items: Vec<OrderItem>,
    /// Caller-supplied monetary total; never recomputed from items here.
    pub total: f64,

    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,

    pub delivery_partner_id: Option<Uuid>,
    pub delivery_partner_name: Option<String>,
    pub delivery_partner_phone: Option<String>,

    pub tracking: Tracking,
    pub status_history: Vec<StatusHistoryEntry>,

    pub invoice_id: Option<Uuid>,
    pub delivery_address: Option<DeliveryAddress>,

    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Open a fresh order in the given starting status, with the history
    /// seeded by the opening entry.
    pub fn open(
        customer_id: Uuid,
        items: Vec<OrderItem>,
        total: f64,
        payment_method: PaymentMethod,
        status: OrderStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 0,
            customer_id,
            pharmacy_id: None,
            pharmacy_name: None,
            items,
            total,
            status,
            payment_status: PaymentStatus::Unpaid,
            payment_method,
            delivery_partner_id: None,
            delivery_partner_name: None,
            delivery_partner_phone: None,
            tracking: Tracking::default(),
            status_history: vec![StatusHistoryEntry { status, at: now }],
            invoice_id: None,
            delivery_address: None,
            created_at: now,
        }
    }

    /// Short hex prefix of the order id, used for display names.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

// ============================================================================
// Order Patch - single-document update
// ============================================================================

/// Field-level patch applied atomically to one order document.
///
/// `None` means "leave untouched"; fields here are only ever set, never
/// cleared, which matches every write the coordinator performs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub picked_up_by: Option<Uuid>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivered_by: Option<Uuid>,
    pub history_entry: Option<StatusHistoryEntry>,
    pub partner: Option<PartnerSnapshot>,
    pub invoice_id: Option<Uuid>,
}

impl OrderPatch {
    /// Apply the patch in place, bumping the version and stamping
    /// `tracking.last_updated_at`.
    pub fn apply(&self, order: &mut Order, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(payment_status) = self.payment_status {
            order.payment_status = payment_status;
        }
        if let Some(at) = self.picked_up_at {
            order.tracking.picked_up_at = Some(at);
        }
        if let Some(by) = self.picked_up_by {
            order.tracking.picked_up_by = Some(by);
        }
        if let Some(at) = self.delivered_at {
            order.tracking.delivered_at = Some(at);
        }
        if let Some(by) = self.delivered_by {
            order.tracking.delivered_by = Some(by);
        }
        if let Some(entry) = &self.history_entry {
            order.status_history.push(entry.clone());
        }
        if let Some(partner) = &self.partner {
            order.delivery_partner_id = Some(partner.id);
            order.delivery_partner_name = partner.name.clone();
            order.delivery_partner_phone = partner.phone.clone();
        }
        if let Some(invoice_id) = self.invoice_id {
            order.invoice_id = Some(invoice_id);
        }
        order.tracking.last_updated_at = Some(now);
        order.version += 1;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
