use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Fulfillment lifecycle status of an order.
///
/// `in_transit` is the canonical label for the courier-on-the-road state;
/// historical records and callers also use `dispatched`, `out_for_delivery`
/// and `en_route`, which [`OrderStatus::parse`] folds into `InTransit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Assigned,
    PickedUp,
    /// Historical documents carry the synonym labels; they all fold into
    /// the canonical one on read.
    #[serde(alias = "dispatched", alias = "out_for_delivery", alias = "en_route")]
    InTransit,
    Delivered,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Parse a wire label, accepting the historical in-transit synonyms.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "assigned" => Some(Self::Assigned),
            "picked_up" => Some(Self::PickedUp),
            "in_transit" | "dispatched" | "out_for_delivery" | "en_route" => {
                Some(Self::InTransit)
            }
            "delivered" => Some(Self::Delivered),
            "cancelled" => Some(Self::Cancelled),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Canonical wire label written on every update.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Assigned => "assigned",
            Self::PickedUp => "picked_up",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }

    /// Delivered and cancelled orders accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Payment is a derived flag in this subsystem, not a settled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card,
    Online,
}

/// A single line on an order. Prices are caller-supplied and never
/// recomputed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
}

/// Append-only audit entry; the history list is never truncated or
/// reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
}

/// Free-form delivery tracking markers stamped by the transition engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tracking {
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub picked_up_by: Option<Uuid>,
    pub delivered_by: Option<Uuid>,
}

/// Cached copy of the assigned partner for display. The id is
/// authoritative; name and phone are a snapshot taken at assignment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerSnapshot {
    pub id: Uuid,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

// ============================================================================
// Unit Tests
// ============================================================================
