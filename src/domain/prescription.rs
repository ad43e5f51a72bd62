use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Prescription - optional origin of an order
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Pending,
    Approved,
    Rejected,
    Ordered,
    Delivered,
}

/// Medicine line as captured at intake; consumed read-only when the
/// prescription is promoted to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescribedMedicine {
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
}

/// An intake record routed to one pharmacy. `pharmacy_id` is the
/// authoritative tenant link (unlike the order's dual linkage).
///
/// `order_id` is set exactly once, at promotion; after that the
/// prescription is spoken for and must not be promoted again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_phone: Option<String>,
    pub pharmacy_id: Uuid,
    pub medicines: Vec<PrescribedMedicine>,
    pub status: PrescriptionStatus,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
