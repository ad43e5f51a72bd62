use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::Order;

// ============================================================================
// Tenant (Pharmacy) - ownership scope for order visibility
// ============================================================================

/// Caller identity supplied by the session layer. Trusted input; every
/// operation re-resolves tenancy from this value, never from ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Pharmacist,
    Customer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PharmacyStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pharmacy {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub status: PharmacyStatus,
}

/// How an order document references its pharmacy. Historical records stored
/// the id either typed or as its plain string form, so both must be
/// accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TenantRef {
    Id(Uuid),
    Raw(String),
}

/// Multi-representation pharmacy identity.
///
/// Two independent write paths populated different linkage fields on orders
/// (typed id, stringified id, denormalized name), so tenant equality has to
/// check every historical representation. Centralized here instead of
/// scattering the OR across call sites.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantKey {
    id: Uuid,
    id_str: String,
    name: String,
}

impl TenantKey {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            id_str: id.to_string(),
            name: name.into(),
        }
    }

    pub fn for_pharmacy(pharmacy: &Pharmacy) -> Self {
        Self::new(pharmacy.id, pharmacy.name.clone())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Matches the typed id or its string form.
    pub fn matches_ref(&self, tenant_ref: &TenantRef) -> bool {
        match tenant_ref {
            TenantRef::Id(id) => *id == self.id,
            TenantRef::Raw(raw) => raw == &self.id_str,
        }
    }

    /// Matches the denormalized pharmacy name, case-insensitively.
    pub fn matches_name(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.name)
    }
}

// ============================================================================
// Order Scope - visibility predicate
// ============================================================================

/// Query predicate scoping which orders a caller may see. Doubles as the
/// single-object authorization check via [`OrderScope::allows`].
#[derive(Debug, Clone, PartialEq)]
pub enum OrderScope {
    /// Unrestricted (admin).
    All,
    /// Explicit empty scope: a pharmacist with no resolved pharmacy must
    /// never see the full set by omission.
    Nothing,
    /// Orders owned by one customer.
    Customer(Uuid),
    /// Disjunction over every known pharmacy linkage path.
    Pharmacy {
        key: TenantKey,
        /// Ids of orders promoted from prescriptions routed to this
        /// pharmacy.
        promoted_orders: HashSet<Uuid>,
    },
}

impl OrderScope {
    pub fn allows(&self, order: &Order) -> bool {
        match self {
            Self::All => true,
            Self::Nothing => false,
            Self::Customer(customer_id) => order.customer_id == *customer_id,
            Self::Pharmacy {
                key,
                promoted_orders,
            } => {
                promoted_orders.contains(&order.id)
                    || order
                        .pharmacy_id
                        .as_ref()
                        .is_some_and(|tenant_ref| key.matches_ref(tenant_ref))
                    || order
                        .pharmacy_name
                        .as_deref()
                        .is_some_and(|name| key.matches_name(name))
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Nothing)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
