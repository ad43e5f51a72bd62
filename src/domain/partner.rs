use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::PartnerSnapshot;

// ============================================================================
// Delivery Partner - an assignable agent
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
    Pending,
    Approved,
    Rejected,
}

/// Admin-created partners start approved; self-registered ones start
/// pending and require approval. `active` is a soft-disable independent of
/// approval status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPartner {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub status: PartnerStatus,
    pub active: bool,
    pub is_auto_created: bool,
    pub created_at: DateTime<Utc>,
}

impl DeliveryPartner {
    /// Only approved, non-disabled partners may be bound to an order.
    /// Validated at assignment time only; a later disapproval does not
    /// retroactively invalidate past assignments.
    pub fn is_assignable(&self) -> bool {
        self.status == PartnerStatus::Approved && self.active
    }

    /// Fallback partner provisioned when an order is confirmed with nobody
    /// chosen. Approved immediately so confirmation is never blocked by
    /// operator inattention; availability traded for data cleanliness.
    pub fn auto_provisioned(order_short_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: format!("Delivery Agent {order_short_id}"),
            phone: None,
            status: PartnerStatus::Approved,
            active: true,
            is_auto_created: true,
            created_at: now,
        }
    }

    pub fn snapshot(&self) -> PartnerSnapshot {
        PartnerSnapshot {
            id: self.id,
            name: Some(self.name.clone()),
            phone: self.phone.clone(),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
