use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::invoice::{Invoice, InvoiceStatus};
use crate::domain::order::{Order, OrderPatch, OrderStatus};
use crate::domain::partner::DeliveryPartner;
use crate::domain::prescription::{Prescription, PrescriptionStatus};
use crate::domain::tenant::{OrderScope, Pharmacy};

use super::{
    InvoiceStore, OrderStore, PartnerStore, PrescriptionStore, StoreError, TenantResolver,
};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Backs the demo binary and the test suite. Enforces the same contracts a
// real backend would: the status-guarded CAS on orders and the set-once
// rule on a prescription's order link.
//
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    prescriptions: RwLock<HashMap<Uuid, Prescription>>,
    partners: RwLock<HashMap<Uuid, DeliveryPartner>>,
    invoices: RwLock<HashMap<Uuid, Invoice>>,
    pharmacies: RwLock<HashMap<Uuid, Pharmacy>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_pharmacy(&self, pharmacy: Pharmacy) {
        self.pharmacies.write().await.insert(pharmacy.id, pharmacy);
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        self.orders.write().await.insert(order.id, order);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_matching(&self, scope: &OrderScope) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|order| scope.allows(order))
            .cloned()
            .collect())
    }

    async fn update_checked(
        &self,
        id: Uuid,
        expected: OrderStatus,
        patch: OrderPatch,
    ) -> Result<Order, StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if order.status != expected {
            return Err(StoreError::StatusConflict {
                order_id: id,
                expected,
                actual: order.status,
            });
        }

        patch.apply(order, Utc::now());
        Ok(order.clone())
    }
}

#[async_trait]
impl PrescriptionStore for MemoryStore {
    async fn insert(&self, prescription: Prescription) -> Result<(), StoreError> {
        self.prescriptions
            .write()
            .await
            .insert(prescription.id, prescription);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Prescription>, StoreError> {
        Ok(self.prescriptions.read().await.get(&id).cloned())
    }

    async fn find_by_pharmacy(&self, pharmacy_id: Uuid) -> Result<Vec<Prescription>, StoreError> {
        Ok(self
            .prescriptions
            .read()
            .await
            .values()
            .filter(|p| p.pharmacy_id == pharmacy_id)
            .cloned()
            .collect())
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Prescription>, StoreError> {
        Ok(self
            .prescriptions
            .read()
            .await
            .values()
            .find(|p| p.order_id == Some(order_id))
            .cloned())
    }

    async fn link_order(&self, id: Uuid, order_id: Uuid) -> Result<(), StoreError> {
        let mut prescriptions = self.prescriptions.write().await;
        let prescription = prescriptions.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if prescription.order_id.is_some() {
            return Err(StoreError::AlreadyLinked(id));
        }

        prescription.order_id = Some(order_id);
        prescription.status = PrescriptionStatus::Ordered;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: PrescriptionStatus) -> Result<(), StoreError> {
        let mut prescriptions = self.prescriptions.write().await;
        let prescription = prescriptions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        prescription.status = status;
        Ok(())
    }
}

#[async_trait]
impl PartnerStore for MemoryStore {
    async fn insert(&self, partner: DeliveryPartner) -> Result<(), StoreError> {
        self.partners.write().await.insert(partner.id, partner);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DeliveryPartner>, StoreError> {
        Ok(self.partners.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn insert(&self, invoice: Invoice) -> Result<(), StoreError> {
        self.invoices.write().await.insert(invoice.id, invoice);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        Ok(self.invoices.read().await.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: InvoiceStatus) -> Result<(), StoreError> {
        let mut invoices = self.invoices.write().await;
        let invoice = invoices.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        invoice.status = status;
        Ok(())
    }
}

#[async_trait]
impl TenantResolver for MemoryStore {
    async fn pharmacy_owned_by(&self, user_id: Uuid) -> Result<Option<Pharmacy>, StoreError> {
        Ok(self
            .pharmacies
            .read()
            .await
            .values()
            .find(|p| p.owner_id == user_id)
            .cloned())
    }

    async fn pharmacy_by_id(&self, id: Uuid) -> Result<Option<Pharmacy>, StoreError> {
        Ok(self.pharmacies.read().await.get(&id).cloned())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
