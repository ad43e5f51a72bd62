use std::sync::Arc;

use crate::domain::tenant::{Caller, OrderScope, Role, TenantKey};
use crate::store::{PrescriptionStore, TenantResolver};

use super::errors::FulfillmentError;

// ============================================================================
// Order Visibility Filter
// ============================================================================
//
// Builds the query predicate scoping which orders a caller may see. For a
// pharmacist the predicate is a disjunction over every known linkage path
// (prescription-promoted order ids, pharmacy id in either representation,
// pharmacy name), because the two write paths populate different fields; a
// filter using only one path silently hides orders.
//
// Tenancy is re-resolved from the caller argument on every call, never from
// ambient state.
//
// ============================================================================

pub struct OrderVisibility {
    tenants: Arc<dyn TenantResolver>,
    prescriptions: Arc<dyn PrescriptionStore>,
}

impl OrderVisibility {
    pub fn new(tenants: Arc<dyn TenantResolver>, prescriptions: Arc<dyn PrescriptionStore>) -> Self {
        Self {
            tenants,
            prescriptions,
        }
    }

    pub async fn scope_for(&self, caller: &Caller) -> Result<OrderScope, FulfillmentError> {
        match caller.role {
            Role::Admin => Ok(OrderScope::All),
            Role::Customer => Ok(OrderScope::Customer(caller.id)),
            Role::Pharmacist => {
                let Some(pharmacy) = self.tenants.pharmacy_owned_by(caller.id).await? else {
                    // A missing pharmacy must never leak the full set.
                    tracing::debug!(
                        caller_id = %caller.id,
                        "pharmacist has no resolved pharmacy; scope is empty"
                    );
                    return Ok(OrderScope::Nothing);
                };

                let routed = self.prescriptions.find_by_pharmacy(pharmacy.id).await?;
                let promoted_orders = routed.iter().filter_map(|p| p.order_id).collect();

                Ok(OrderScope::Pharmacy {
                    key: TenantKey::for_pharmacy(&pharmacy),
                    promoted_orders,
                })
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
