use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::order::{Order, PartnerSnapshot};
use crate::domain::partner::{DeliveryPartner, PartnerStatus};
use crate::metrics::Metrics;
use crate::store::PartnerStore;

use super::errors::FulfillmentError;
use super::FulfillmentPolicy;

// ============================================================================
// Assignment Service
// ============================================================================
//
// Resolves or auto-provisions the delivery partner for an order and
// produces the snapshot written onto the order document. Partner approval
// is validated at assignment time only.
//
// Auto-provisioning performs two sequential writes (partner insert, then
// the caller's order update) with no transaction; a crash in between
// leaves an orphaned partner, which is acceptable since partners are cheap
// and unreferenced until the order write lands.
//
// ============================================================================

pub struct AssignmentService {
    partners: Arc<dyn PartnerStore>,
    policy: FulfillmentPolicy,
    metrics: Arc<Metrics>,
}

impl AssignmentService {
    pub fn new(
        partners: Arc<dyn PartnerStore>,
        policy: FulfillmentPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            partners,
            policy,
            metrics,
        }
    }

    /// Resolve the requested partner, or provision a fresh one when nobody
    /// was chosen and policy allows it.
    pub async fn resolve(
        &self,
        order: &Order,
        requested: Option<Uuid>,
    ) -> Result<PartnerSnapshot, FulfillmentError> {
        match requested {
            Some(partner_id) => self.resolve_existing(partner_id).await,
            None => self.auto_provision(order).await,
        }
    }

    async fn resolve_existing(&self, partner_id: Uuid) -> Result<PartnerSnapshot, FulfillmentError> {
        let partner = self
            .partners
            .find_by_id(partner_id)
            .await?
            .ok_or(FulfillmentError::NotFound {
                kind: "delivery partner",
                id: partner_id,
            })?;

        if partner.status != PartnerStatus::Approved {
            return Err(FulfillmentError::InvalidState(format!(
                "delivery partner {partner_id} is not approved for assignment"
            )));
        }
        if !partner.active {
            return Err(FulfillmentError::InvalidState(format!(
                "delivery partner {partner_id} is deactivated"
            )));
        }

        Ok(partner.snapshot())
    }

    async fn auto_provision(&self, order: &Order) -> Result<PartnerSnapshot, FulfillmentError> {
        if !self.policy.auto_provision_partner {
            return Err(FulfillmentError::Validation(
                "no delivery partner specified and auto-provisioning is disabled".to_string(),
            ));
        }

        let partner = DeliveryPartner::auto_provisioned(&order.short_id(), Utc::now());
        self.partners.insert(partner.clone()).await?;

        self.metrics.record_auto_provisioned();
        tracing::info!(
            order_id = %order.id,
            partner_id = %partner.id,
            partner_name = %partner.name,
            "auto-provisioned delivery partner"
        );

        Ok(partner.snapshot())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
