use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::domain::invoice::InvoiceStatus;
use crate::domain::order::{
    transition, DeliveryAddress, Order, OrderItem, OrderPatch, OrderStatus, PaymentMethod,
    SideEffect, StatusFields,
};
use crate::domain::prescription::PrescriptionStatus;
use crate::domain::tenant::{Caller, PharmacyStatus, Role, TenantRef};
use crate::messaging::{
    EventFanout, TOPIC_ORDER_CREATED, TOPIC_ORDER_UPDATED, TOPIC_PRESCRIPTION_UPDATED,
};
use crate::metrics::Metrics;
use crate::store::{InvoiceStore, OrderStore, PartnerStore, PrescriptionStore, TenantResolver};

use super::assignment::AssignmentService;
use super::errors::FulfillmentError;
use super::visibility::OrderVisibility;

/// Display fallback when the pharmacy reference cannot be resolved.
const UNKNOWN_PHARMACY: &str = "Unknown Pharmacy";

// ============================================================================
// Fulfillment Coordinator
// ============================================================================
//
// Orchestrates: create order from prescription or cart, apply the
// visibility filter on read, validate authorization on write, invoke the
// status transition engine and the assignment service, persist, and emit
// fanout events.
//
// All writes are single-document CAS updates guarded by the status the
// caller read. Cross-entity side effects (prescription/invoice sync) are
// fire-and-forget: their failure is logged and counted, never surfaced as
// the operation's failure - the order is the source of truth and lagging
// dependents are reconciled by a periodic sweep outside this core.
//
// ============================================================================

/// Direct cart checkout. `total` and coordinates arrive caller-supplied
/// and are validated, not recomputed.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub total: Option<f64>,
    pub pharmacy_id: Option<Uuid>,
    pub delivery_address: Option<DeliveryAddress>,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilters {
    pub status: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

pub struct FulfillmentCoordinator {
    orders: Arc<dyn OrderStore>,
    prescriptions: Arc<dyn PrescriptionStore>,
    invoices: Arc<dyn InvoiceStore>,
    tenants: Arc<dyn TenantResolver>,
    fanout: Arc<dyn EventFanout>,
    visibility: OrderVisibility,
    assignment: AssignmentService,
    metrics: Arc<Metrics>,
}

impl FulfillmentCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        prescriptions: Arc<dyn PrescriptionStore>,
        partners: Arc<dyn PartnerStore>,
        invoices: Arc<dyn InvoiceStore>,
        tenants: Arc<dyn TenantResolver>,
        fanout: Arc<dyn EventFanout>,
        policy: super::FulfillmentPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            visibility: OrderVisibility::new(tenants.clone(), prescriptions.clone()),
            assignment: AssignmentService::new(partners, policy, metrics.clone()),
            orders,
            prescriptions,
            invoices,
            tenants,
            fanout,
            metrics,
        }
    }

    // ------------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------------

    /// Create an order from a direct cart checkout. Customer existence is
    /// not verified here; identity lives in another service and gaps are
    /// tolerated.
    pub async fn create_from_checkout(
        &self,
        request: CheckoutRequest,
        caller: &Caller,
    ) -> Result<Order, FulfillmentError> {
        const OP: &str = "create_from_checkout";

        let total = validate_checkout(&request).map_err(|e| self.reject(OP, e))?;
        let now = Utc::now();

        let mut order = Order::open(
            request.customer_id,
            request.items,
            total,
            request.payment_method,
            OrderStatus::Pending,
            now,
        );
        order.pharmacy_id = request.pharmacy_id.map(TenantRef::Id);
        order.pharmacy_name = Some(self.display_name_for(request.pharmacy_id).await);
        order.delivery_address = request.delivery_address;

        self.orders.insert(order.clone()).await?;

        self.metrics.record_order_created("checkout");
        tracing::info!(
            order_id = %order.id,
            customer_id = %order.customer_id,
            total = order.total,
            caller_role = ?caller.role,
            "order created from checkout"
        );

        self.publish(
            TOPIC_ORDER_CREATED,
            order.id,
            json!({
                "order_id": order.id,
                "customer_id": order.customer_id,
                "status": order.status,
                "total": order.total,
            }),
        )
        .await;

        Ok(order)
    }

    /// Promote an approved prescription into an order, one-way and
    /// one-time. The order starts pre-confirmed since a human already
    /// approved the prescription.
    pub async fn create_from_prescription(
        &self,
        prescription_id: Uuid,
        partner: Option<Uuid>,
        total: f64,
        payment_method: PaymentMethod,
        caller: &Caller,
    ) -> Result<Order, FulfillmentError> {
        const OP: &str = "create_from_prescription";

        let prescription = self
            .prescriptions
            .find_by_id(prescription_id)
            .await?
            .ok_or_else(|| {
                self.reject(
                    OP,
                    FulfillmentError::NotFound {
                        kind: "prescription",
                        id: prescription_id,
                    },
                )
            })?;

        if let Some(existing) = prescription.order_id {
            return Err(self.reject(
                OP,
                FulfillmentError::Conflict(format!(
                    "prescription {prescription_id} was already promoted to order {existing}"
                )),
            ));
        }

        if caller.role == Role::Pharmacist {
            let pharmacy = self.tenants.pharmacy_owned_by(caller.id).await?;
            let authorized = pharmacy.as_ref().is_some_and(|p| {
                p.id == prescription.pharmacy_id && p.status == PharmacyStatus::Approved
            });
            if !authorized {
                return Err(self.reject(
                    OP,
                    FulfillmentError::Forbidden(format!(
                        "prescription {prescription_id} is not routed to the caller's approved pharmacy"
                    )),
                ));
            }
        }

        if prescription.medicines.is_empty() {
            return Err(self.reject(
                OP,
                FulfillmentError::Validation(format!(
                    "prescription {prescription_id} has no medicines to order"
                )),
            ));
        }
        if !total.is_finite() || total < 0.0 {
            return Err(self.reject(
                OP,
                FulfillmentError::Validation("order total must be a non-negative amount".into()),
            ));
        }

        let items = prescription
            .medicines
            .iter()
            .map(|m| OrderItem {
                name: m.name.clone(),
                quantity: m.quantity,
                unit_price: m.unit_price,
            })
            .collect();

        let now = Utc::now();
        let mut order = Order::open(
            prescription.patient_id,
            items,
            total,
            payment_method,
            OrderStatus::Processing,
            now,
        );
        order.pharmacy_id = Some(TenantRef::Id(prescription.pharmacy_id));
        order.pharmacy_name = Some(self.display_name_for(Some(prescription.pharmacy_id)).await);

        if partner.is_some() {
            let snapshot = self
                .assignment
                .resolve(&order, partner)
                .await
                .map_err(|e| self.reject(OP, e))?;
            order.delivery_partner_id = Some(snapshot.id);
            order.delivery_partner_name = snapshot.name;
            order.delivery_partner_phone = snapshot.phone;
        }

        self.orders.insert(order.clone()).await?;

        // Dependent-record write: the order is already the source of truth,
        // so a failed link is logged and left to the consistency sweep.
        match self.prescriptions.link_order(prescription.id, order.id).await {
            Ok(()) => {
                self.publish(
                    TOPIC_PRESCRIPTION_UPDATED,
                    prescription.id,
                    json!({
                        "prescription_id": prescription.id,
                        "status": PrescriptionStatus::Ordered,
                        "order_id": order.id,
                    }),
                )
                .await;
            }
            Err(err) => {
                self.metrics.record_side_effect_failure("prescription");
                tracing::error!(
                    prescription_id = %prescription.id,
                    order_id = %order.id,
                    error = %err,
                    "failed to link prescription to its order"
                );
            }
        }

        self.metrics.record_order_created("prescription");
        tracing::info!(
            order_id = %order.id,
            prescription_id = %prescription.id,
            pharmacy_id = %prescription.pharmacy_id,
            "order created from prescription"
        );

        self.publish(
            TOPIC_ORDER_CREATED,
            order.id,
            json!({
                "order_id": order.id,
                "customer_id": order.customer_id,
                "status": order.status,
                "total": order.total,
                "prescription_id": prescription.id,
            }),
        )
        .await;

        Ok(order)
    }

    /// Advance an order through the status lifecycle.
    pub async fn update_status(
        &self,
        order_id: Uuid,
        requested: &str,
        fields: StatusFields,
        caller: &Caller,
    ) -> Result<Order, FulfillmentError> {
        const OP: &str = "update_status";

        let order = self.load_authorized(order_id, caller, OP).await?;

        let plan = transition::plan(&order, requested, &fields, Utc::now())
            .map_err(|e| self.reject(OP, e.into()))?;

        // CAS on the status the caller read: a concurrent writer advancing
        // the order surfaces as a conflict instead of being overwritten.
        let updated = self
            .orders
            .update_checked(order.id, order.status, plan.patch)
            .await?;

        for effect in &plan.side_effects {
            self.apply_side_effect(&updated, effect).await;
        }

        self.metrics.record_status_update(plan.next.label());
        tracing::info!(
            order_id = %updated.id,
            from = %order.status,
            to = %plan.next,
            caller_id = %caller.id,
            "order status updated"
        );

        self.publish(
            TOPIC_ORDER_UPDATED,
            updated.id,
            json!({
                "order_id": updated.id,
                "status": updated.status,
                "payment_status": updated.payment_status,
            }),
        )
        .await;

        Ok(updated)
    }

    /// Bind a delivery partner to an order, provisioning one on demand if
    /// none is given. Re-assignment pre-delivery overwrites the snapshot
    /// and does not touch the status.
    pub async fn assign_partner(
        &self,
        order_id: Uuid,
        partner: Option<Uuid>,
        caller: &Caller,
    ) -> Result<Order, FulfillmentError> {
        const OP: &str = "assign_partner";

        let order = self.load_authorized(order_id, caller, OP).await?;

        if order.status.is_terminal() {
            return Err(self.reject(
                OP,
                FulfillmentError::InvalidState(format!(
                    "cannot assign a delivery partner to a {} order",
                    order.status
                )),
            ));
        }

        let snapshot = self
            .assignment
            .resolve(&order, partner)
            .await
            .map_err(|e| self.reject(OP, e))?;

        let patch = OrderPatch {
            partner: Some(snapshot),
            ..Default::default()
        };
        let updated = self
            .orders
            .update_checked(order.id, order.status, patch)
            .await?;

        tracing::info!(
            order_id = %updated.id,
            partner_id = ?updated.delivery_partner_id,
            "delivery partner assigned"
        );

        self.publish(
            TOPIC_ORDER_UPDATED,
            updated.id,
            json!({
                "order_id": updated.id,
                "status": updated.status,
                "delivery_partner_id": updated.delivery_partner_id,
            }),
        )
        .await;

        Ok(updated)
    }

    /// List the orders visible to the caller, optionally filtered by
    /// status and creation window. List operations filter silently; only
    /// single-object operations reject with Forbidden.
    pub async fn list(
        &self,
        caller: &Caller,
        filters: &OrderFilters,
    ) -> Result<Vec<Order>, FulfillmentError> {
        let scope = self.visibility.scope_for(caller).await?;
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let status_filter = match &filters.status {
            Some(label) => Some(OrderStatus::parse(label).ok_or_else(|| {
                self.reject(
                    "list",
                    FulfillmentError::Validation(format!("unknown order status label: {label:?}")),
                )
            })?),
            None => None,
        };

        let mut orders = self.orders.find_matching(&scope).await?;
        orders.retain(|order| {
            status_filter.map_or(true, |status| order.status == status)
                && filters.created_after.map_or(true, |t| order.created_at >= t)
                && filters.created_before.map_or(true, |t| order.created_at <= t)
        });
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(orders)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn load_authorized(
        &self,
        order_id: Uuid,
        caller: &Caller,
        operation: &'static str,
    ) -> Result<Order, FulfillmentError> {
        let order = self.orders.find_by_id(order_id).await?.ok_or_else(|| {
            self.reject(
                operation,
                FulfillmentError::NotFound {
                    kind: "order",
                    id: order_id,
                },
            )
        })?;

        let scope = self.visibility.scope_for(caller).await?;
        if !scope.allows(&order) {
            return Err(self.reject(
                operation,
                FulfillmentError::Forbidden(format!(
                    "caller {} may not act on order {order_id}",
                    caller.id
                )),
            ));
        }

        Ok(order)
    }

    /// Best-effort pharmacy display name; a missing or unreadable pharmacy
    /// falls back to a placeholder rather than failing the order.
    async fn display_name_for(&self, pharmacy_id: Option<Uuid>) -> String {
        let Some(id) = pharmacy_id else {
            return UNKNOWN_PHARMACY.to_string();
        };

        match self.tenants.pharmacy_by_id(id).await {
            Ok(Some(pharmacy)) => pharmacy.name,
            Ok(None) => {
                tracing::debug!(pharmacy_id = %id, "pharmacy reference did not resolve");
                UNKNOWN_PHARMACY.to_string()
            }
            Err(err) => {
                tracing::warn!(pharmacy_id = %id, error = %err, "pharmacy lookup failed");
                UNKNOWN_PHARMACY.to_string()
            }
        }
    }

    async fn apply_side_effect(&self, order: &Order, effect: &SideEffect) {
        match effect {
            SideEffect::MarkPrescriptionDelivered => {
                let prescription = match self.prescriptions.find_by_order(order.id).await {
                    Ok(Some(prescription)) => prescription,
                    Ok(None) => return, // checkout orders have no prescription
                    Err(err) => {
                        self.metrics.record_side_effect_failure("prescription");
                        tracing::error!(
                            order_id = %order.id,
                            error = %err,
                            "failed to look up prescription for delivered order"
                        );
                        return;
                    }
                };

                match self
                    .prescriptions
                    .set_status(prescription.id, PrescriptionStatus::Delivered)
                    .await
                {
                    Ok(()) => {
                        self.publish(
                            TOPIC_PRESCRIPTION_UPDATED,
                            prescription.id,
                            json!({
                                "prescription_id": prescription.id,
                                "status": PrescriptionStatus::Delivered,
                                "order_id": order.id,
                            }),
                        )
                        .await;
                    }
                    Err(err) => {
                        self.metrics.record_side_effect_failure("prescription");
                        tracing::error!(
                            prescription_id = %prescription.id,
                            order_id = %order.id,
                            error = %err,
                            "failed to mark prescription delivered"
                        );
                    }
                }
            }
            SideEffect::MarkInvoicePaid { invoice_id } => {
                if let Err(err) = self.invoices.set_status(*invoice_id, InvoiceStatus::Paid).await
                {
                    self.metrics.record_side_effect_failure("invoice");
                    tracing::error!(
                        order_id = %order.id,
                        invoice_id = %invoice_id,
                        error = %err,
                        "failed to mark invoice paid after delivery"
                    );
                }
            }
        }
    }

    /// Fire-and-forget fanout; publish failures never fail the write.
    async fn publish(&self, topic: &str, key: Uuid, payload: serde_json::Value) {
        if let Err(err) = self.fanout.publish(topic, &key.to_string(), payload).await {
            self.metrics.record_fanout_failure(topic);
            tracing::warn!(topic, key = %key, error = %err, "event fanout publish failed");
        }
    }

    fn reject(&self, operation: &'static str, err: FulfillmentError) -> FulfillmentError {
        self.metrics.record_rejected(operation, err.kind());
        tracing::warn!(operation, error = %err, "operation rejected");
        err
    }
}

fn validate_checkout(request: &CheckoutRequest) -> Result<f64, FulfillmentError> {
    if request.items.is_empty() {
        return Err(FulfillmentError::Validation(
            "order items cannot be empty".to_string(),
        ));
    }
    for item in &request.items {
        if item.quantity < 1 {
            return Err(FulfillmentError::Validation(format!(
                "invalid quantity {} for item {:?}",
                item.quantity, item.name
            )));
        }
        if !item.unit_price.is_finite() || item.unit_price < 0.0 {
            return Err(FulfillmentError::Validation(format!(
                "invalid unit price for item {:?}",
                item.name
            )));
        }
    }

    let total = request.total.ok_or_else(|| {
        FulfillmentError::Validation("order total is required".to_string())
    })?;
    if !total.is_finite() || total < 0.0 {
        return Err(FulfillmentError::Validation(
            "order total must be a non-negative amount".to_string(),
        ));
    }

    if let Some(address) = &request.delivery_address {
        let coords = [address.latitude, address.longitude];
        if coords.iter().flatten().any(|c| !c.is_finite()) {
            return Err(FulfillmentError::Validation(
                "delivery coordinates must be numeric".to_string(),
            ));
        }
    }

    Ok(total)
}

// ============================================================================
// Tests - end-to-end over the in-memory store
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::FulfillmentPolicy;
    use crate::domain::invoice::Invoice;
    use crate::domain::partner::{DeliveryPartner, PartnerStatus};
    use crate::domain::prescription::{PrescribedMedicine, Prescription};
    use crate::domain::tenant::Pharmacy;
    use crate::messaging::FanoutMessage;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    // --------------------------------------------------------------------
    // Test doubles
    // --------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingFanout {
        messages: Mutex<Vec<FanoutMessage>>,
    }

    impl RecordingFanout {
        fn topics(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.topic.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventFanout for RecordingFanout {
        async fn publish(
            &self,
            topic: &str,
            key: &str,
            payload: serde_json::Value,
        ) -> anyhow::Result<()> {
            self.messages.lock().unwrap().push(FanoutMessage {
                topic: topic.to_string(),
                key: key.to_string(),
                payload,
            });
            Ok(())
        }
    }

    struct FailingFanout;

    #[async_trait]
    impl EventFanout for FailingFanout {
        async fn publish(&self, _: &str, _: &str, _: serde_json::Value) -> anyhow::Result<()> {
            anyhow::bail!("broker unreachable")
        }
    }

    /// Order store whose point reads report a stale status, as if another
    /// writer advanced the order after this caller's read.
    struct StaleReadOrders {
        inner: Arc<MemoryStore>,
        reads_as: OrderStatus,
    }

    #[async_trait]
    impl OrderStore for StaleReadOrders {
        async fn insert(&self, order: Order) -> Result<(), StoreError> {
            OrderStore::insert(self.inner.as_ref(), order).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
            Ok(OrderStore::find_by_id(self.inner.as_ref(), id)
                .await?
                .map(|mut order| {
                    order.status = self.reads_as;
                    order
                }))
        }

        async fn find_matching(
            &self,
            scope: &crate::domain::tenant::OrderScope,
        ) -> Result<Vec<Order>, StoreError> {
            self.inner.find_matching(scope).await
        }

        async fn update_checked(
            &self,
            id: Uuid,
            expected: OrderStatus,
            patch: OrderPatch,
        ) -> Result<Order, StoreError> {
            self.inner.update_checked(id, expected, patch).await
        }
    }

    /// Invoice store whose writes always fail; lookups delegate.
    struct FailingInvoices(Arc<MemoryStore>);

    #[async_trait]
    impl InvoiceStore for FailingInvoices {
        async fn insert(&self, invoice: Invoice) -> Result<(), StoreError> {
            InvoiceStore::insert(self.0.as_ref(), invoice).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
            InvoiceStore::find_by_id(self.0.as_ref(), id).await
        }

        async fn set_status(&self, _: Uuid, _: InvoiceStatus) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        }
    }

    // --------------------------------------------------------------------
    // Fixtures
    // --------------------------------------------------------------------

    struct Rig {
        store: Arc<MemoryStore>,
        fanout: Arc<RecordingFanout>,
        metrics: Arc<Metrics>,
        coordinator: FulfillmentCoordinator,
    }

    fn rig() -> Rig {
        rig_with_policy(FulfillmentPolicy::default())
    }

    fn rig_with_policy(policy: FulfillmentPolicy) -> Rig {
        let store = Arc::new(MemoryStore::new());
        let fanout = Arc::new(RecordingFanout::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let coordinator = FulfillmentCoordinator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            fanout.clone(),
            policy,
            metrics.clone(),
        );
        Rig {
            store,
            fanout,
            metrics,
            coordinator,
        }
    }

    fn admin() -> Caller {
        Caller {
            id: Uuid::new_v4(),
            role: Role::Admin,
        }
    }

    fn checkout_request() -> CheckoutRequest {
        CheckoutRequest {
            customer_id: Uuid::new_v4(),
            items: vec![OrderItem {
                name: "Paracetamol".to_string(),
                quantity: 2,
                unit_price: 60.0,
            }],
            total: Some(120.0),
            pharmacy_id: None,
            delivery_address: None,
            payment_method: PaymentMethod::CashOnDelivery,
        }
    }

    async fn seed_pharmacy(rig: &Rig, owner_id: Uuid, status: PharmacyStatus) -> Pharmacy {
        let pharmacy = Pharmacy {
            id: Uuid::new_v4(),
            name: "City Care Pharmacy".to_string(),
            owner_id,
            status,
        };
        rig.store.add_pharmacy(pharmacy.clone()).await;
        pharmacy
    }

    async fn seed_prescription(rig: &Rig, pharmacy_id: Uuid) -> Prescription {
        let prescription = Prescription {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            patient_name: "Asha Rao".to_string(),
            patient_phone: Some("555-0199".to_string()),
            pharmacy_id,
            medicines: vec![PrescribedMedicine {
                name: "Amoxicillin 500mg".to_string(),
                quantity: 10,
                unit_price: 12.5,
            }],
            status: PrescriptionStatus::Approved,
            order_id: None,
            created_at: Utc::now(),
        };
        PrescriptionStore::insert(rig.store.as_ref(), prescription.clone())
            .await
            .unwrap();
        prescription
    }

    async fn seed_partner(rig: &Rig) -> DeliveryPartner {
        let partner = DeliveryPartner {
            id: Uuid::new_v4(),
            name: "Ravi K".to_string(),
            phone: Some("555-0101".to_string()),
            status: PartnerStatus::Approved,
            active: true,
            is_auto_created: false,
            created_at: Utc::now(),
        };
        PartnerStore::insert(rig.store.as_ref(), partner.clone())
            .await
            .unwrap();
        partner
    }

    fn counter_value(metrics: &Metrics, name: &str) -> f64 {
        metrics
            .registry()
            .gather()
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.metric.iter().filter_map(|x| x.counter.value).sum())
            .unwrap_or(0.0)
    }

    // --------------------------------------------------------------------
    // Checkout
    // --------------------------------------------------------------------

    #[tokio::test]
    async fn test_checkout_without_pharmacy_falls_back_to_placeholder() {
        let rig = rig();

        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &admin())
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.pharmacy_name.as_deref(), Some("Unknown Pharmacy"));
        assert!(order.pharmacy_id.is_none());
        assert!(order.delivery_partner_id.is_none());
        assert_eq!(order.status_history.len(), 1);
        assert_eq!(rig.fanout.topics(), vec![TOPIC_ORDER_CREATED]);
    }

    #[tokio::test]
    async fn test_checkout_resolves_pharmacy_display_name() {
        let rig = rig();
        let pharmacy = seed_pharmacy(&rig, Uuid::new_v4(), PharmacyStatus::Approved).await;

        let mut request = checkout_request();
        request.pharmacy_id = Some(pharmacy.id);

        let order = rig
            .coordinator
            .create_from_checkout(request, &admin())
            .await
            .unwrap();

        assert_eq!(order.pharmacy_name.as_deref(), Some("City Care Pharmacy"));
        assert_eq!(order.pharmacy_id, Some(TenantRef::Id(pharmacy.id)));
    }

    #[tokio::test]
    async fn test_checkout_validation_rejects_bad_input() {
        let rig = rig();
        let caller = admin();

        let mut empty_items = checkout_request();
        empty_items.items.clear();
        let err = rig
            .coordinator
            .create_from_checkout(empty_items, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let mut missing_total = checkout_request();
        missing_total.total = None;
        let err = rig
            .coordinator
            .create_from_checkout(missing_total, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let mut zero_quantity = checkout_request();
        zero_quantity.items[0].quantity = 0;
        let err = rig
            .coordinator
            .create_from_checkout(zero_quantity, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let mut bad_coords = checkout_request();
        bad_coords.delivery_address = Some(DeliveryAddress {
            street: "14 Hill Rd".to_string(),
            city: "Pune".to_string(),
            state: "MH".to_string(),
            postal_code: "411001".to_string(),
            latitude: Some(f64::NAN),
            longitude: Some(73.85),
        });
        let err = rig
            .coordinator
            .create_from_checkout(bad_coords, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        assert_eq!(
            counter_value(&rig.metrics, "fulfillment_operations_rejected_total"),
            4.0
        );
    }

    #[tokio::test]
    async fn test_checkout_succeeds_even_when_fanout_fails() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let coordinator = FulfillmentCoordinator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(FailingFanout),
            FulfillmentPolicy::default(),
            metrics.clone(),
        );

        let order = coordinator
            .create_from_checkout(checkout_request(), &admin())
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(
            counter_value(&metrics, "fulfillment_fanout_failures_total"),
            1.0
        );
    }

    // --------------------------------------------------------------------
    // Prescription promotion
    // --------------------------------------------------------------------

    #[tokio::test]
    async fn test_promotion_creates_processing_order_and_links_prescription() {
        let rig = rig();
        let pharmacy = seed_pharmacy(&rig, Uuid::new_v4(), PharmacyStatus::Approved).await;
        let prescription = seed_prescription(&rig, pharmacy.id).await;

        let order = rig
            .coordinator
            .create_from_prescription(
                prescription.id,
                None,
                125.0,
                PaymentMethod::Online,
                &admin(),
            )
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.customer_id, prescription.patient_id);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].name, "Amoxicillin 500mg");
        assert_eq!(order.pharmacy_name.as_deref(), Some("City Care Pharmacy"));
        assert!(order.delivery_partner_id.is_none());

        let linked = PrescriptionStore::find_by_id(rig.store.as_ref(), prescription.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linked.order_id, Some(order.id));
        assert_eq!(linked.status, PrescriptionStatus::Ordered);

        assert_eq!(
            rig.fanout.topics(),
            vec![TOPIC_PRESCRIPTION_UPDATED, TOPIC_ORDER_CREATED]
        );
    }

    #[tokio::test]
    async fn test_promotion_of_missing_prescription_is_not_found() {
        let rig = rig();
        let err = rig
            .coordinator
            .create_from_prescription(
                Uuid::new_v4(),
                None,
                50.0,
                PaymentMethod::Card,
                &admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::NotFound {
                kind: "prescription",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_second_promotion_is_a_conflict() {
        let rig = rig();
        let pharmacy = seed_pharmacy(&rig, Uuid::new_v4(), PharmacyStatus::Approved).await;
        let prescription = seed_prescription(&rig, pharmacy.id).await;
        let caller = admin();

        rig.coordinator
            .create_from_prescription(prescription.id, None, 125.0, PaymentMethod::Card, &caller)
            .await
            .unwrap();

        let err = rig
            .coordinator
            .create_from_prescription(prescription.id, None, 125.0, PaymentMethod::Card, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_promotion_authorization_for_pharmacists() {
        let rig = rig();
        let owner = Uuid::new_v4();
        let pharmacy = seed_pharmacy(&rig, owner, PharmacyStatus::Approved).await;
        let prescription = seed_prescription(&rig, pharmacy.id).await;

        // A pharmacist with no pharmacy at all.
        let stranger = Caller {
            id: Uuid::new_v4(),
            role: Role::Pharmacist,
        };
        let err = rig
            .coordinator
            .create_from_prescription(prescription.id, None, 125.0, PaymentMethod::Card, &stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Forbidden(_)));

        // The owning pharmacist succeeds.
        let owner_caller = Caller {
            id: owner,
            role: Role::Pharmacist,
        };
        rig.coordinator
            .create_from_prescription(
                prescription.id,
                None,
                125.0,
                PaymentMethod::Card,
                &owner_caller,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_promotion_requires_approved_pharmacy() {
        let rig = rig();
        let owner = Uuid::new_v4();
        let pharmacy = seed_pharmacy(&rig, owner, PharmacyStatus::Pending).await;
        let prescription = seed_prescription(&rig, pharmacy.id).await;

        let caller = Caller {
            id: owner,
            role: Role::Pharmacist,
        };
        let err = rig
            .coordinator
            .create_from_prescription(prescription.id, None, 125.0, PaymentMethod::Card, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_promotion_with_partner_snapshots_contact_fields() {
        let rig = rig();
        let pharmacy = seed_pharmacy(&rig, Uuid::new_v4(), PharmacyStatus::Approved).await;
        let prescription = seed_prescription(&rig, pharmacy.id).await;
        let partner = seed_partner(&rig).await;

        let order = rig
            .coordinator
            .create_from_prescription(
                prescription.id,
                Some(partner.id),
                125.0,
                PaymentMethod::Card,
                &admin(),
            )
            .await
            .unwrap();

        assert_eq!(order.delivery_partner_id, Some(partner.id));
        assert_eq!(order.delivery_partner_name.as_deref(), Some("Ravi K"));
        assert_eq!(order.delivery_partner_phone.as_deref(), Some("555-0101"));
    }

    // --------------------------------------------------------------------
    // Status updates
    // --------------------------------------------------------------------

    #[tokio::test]
    async fn test_confirmation_without_partner_is_invalid_state() {
        let rig = rig();
        let caller = admin();
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();

        let err = rig
            .coordinator
            .update_status(order.id, "processing", StatusFields::default(), &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidState(_)));
        assert!(err.to_string().contains("assignment required"));
    }

    #[tokio::test]
    async fn test_pickup_after_promotion_stamps_tracking() {
        let rig = rig();
        let pharmacy = seed_pharmacy(&rig, Uuid::new_v4(), PharmacyStatus::Approved).await;
        let prescription = seed_prescription(&rig, pharmacy.id).await;
        let caller = admin();

        let order = rig
            .coordinator
            .create_from_prescription(prescription.id, None, 125.0, PaymentMethod::Card, &caller)
            .await
            .unwrap();

        let fields = StatusFields {
            picked_up: true,
            ..Default::default()
        };
        let updated = rig
            .coordinator
            .update_status(order.id, "picked_up", fields, &caller)
            .await
            .unwrap();

        assert_eq!(updated.status, OrderStatus::PickedUp);
        assert!(updated.tracking.picked_up_at.is_some());
        assert_eq!(updated.status_history.len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_syncs_prescription_invoice_and_payment() {
        let rig = rig();
        let pharmacy = seed_pharmacy(&rig, Uuid::new_v4(), PharmacyStatus::Approved).await;
        let prescription = seed_prescription(&rig, pharmacy.id).await;
        let partner = seed_partner(&rig).await;
        let caller = admin();

        let order = rig
            .coordinator
            .create_from_prescription(
                prescription.id,
                Some(partner.id),
                125.0,
                PaymentMethod::Card,
                &caller,
            )
            .await
            .unwrap();

        // Billing generated an invoice out of band.
        let invoice = Invoice {
            id: Uuid::new_v4(),
            order_id: order.id,
            amount: order.total,
            status: InvoiceStatus::Unpaid,
            created_at: Utc::now(),
        };
        InvoiceStore::insert(rig.store.as_ref(), invoice.clone())
            .await
            .unwrap();
        rig.store
            .update_checked(
                order.id,
                order.status,
                OrderPatch {
                    invoice_id: Some(invoice.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let delivered = rig
            .coordinator
            .update_status(order.id, "delivered", StatusFields::default(), &caller)
            .await
            .unwrap();

        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(delivered.payment_status, crate::domain::order::PaymentStatus::Paid);
        assert!(delivered.tracking.delivered_at.is_some());
        assert_eq!(delivered.tracking.delivered_by, Some(partner.id));

        let synced = PrescriptionStore::find_by_id(rig.store.as_ref(), prescription.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(synced.status, PrescriptionStatus::Delivered);

        let paid = InvoiceStore::find_by_id(rig.store.as_ref(), invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_delivery_succeeds_even_when_invoice_write_fails() {
        let store = Arc::new(MemoryStore::new());
        let fanout = Arc::new(RecordingFanout::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let coordinator = FulfillmentCoordinator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(FailingInvoices(store.clone())),
            store.clone(),
            fanout.clone(),
            FulfillmentPolicy::default(),
            metrics.clone(),
        );
        let caller = admin();

        let order = coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();
        let order = coordinator
            .assign_partner(order.id, None, &caller)
            .await
            .unwrap();

        let invoice = Invoice {
            id: Uuid::new_v4(),
            order_id: order.id,
            amount: order.total,
            status: InvoiceStatus::Unpaid,
            created_at: Utc::now(),
        };
        InvoiceStore::insert(store.as_ref(), invoice.clone())
            .await
            .unwrap();
        store
            .update_checked(
                order.id,
                order.status,
                OrderPatch {
                    invoice_id: Some(invoice.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // The order write is the source of truth; the invoice outage is
        // logged and counted, not propagated.
        let delivered = coordinator
            .update_status(order.id, "delivered", StatusFields::default(), &caller)
            .await
            .unwrap();

        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(delivered.payment_status, crate::domain::order::PaymentStatus::Paid);
        assert_eq!(
            counter_value(&metrics, "fulfillment_side_effect_failures_total"),
            1.0
        );

        let untouched = InvoiceStore::find_by_id(store.as_ref(), invoice.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.status, InvoiceStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_history_grows_on_repeated_identical_status() {
        let rig = rig();
        let caller = admin();
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();
        let order = rig
            .coordinator
            .assign_partner(order.id, None, &caller)
            .await
            .unwrap();

        let first = rig
            .coordinator
            .update_status(order.id, "processing", StatusFields::default(), &caller)
            .await
            .unwrap();
        let second = rig
            .coordinator
            .update_status(order.id, "processing", StatusFields::default(), &caller)
            .await
            .unwrap();

        assert_eq!(first.status_history.len(), 2);
        assert_eq!(second.status_history.len(), 3);
        assert_eq!(second.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_update_status_on_missing_order_is_not_found() {
        let rig = rig();
        let err = rig
            .coordinator
            .update_status(
                Uuid::new_v4(),
                "processing",
                StatusFields::default(),
                &admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound { kind: "order", .. }));
    }

    #[tokio::test]
    async fn test_update_status_by_unrelated_customer_is_forbidden() {
        let rig = rig();
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &admin())
            .await
            .unwrap();

        let other_customer = Caller {
            id: Uuid::new_v4(),
            role: Role::Customer,
        };
        let err = rig
            .coordinator
            .update_status(
                order.id,
                "cancelled",
                StatusFields::default(),
                &other_customer,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_unknown_status_label_is_a_validation_error() {
        let rig = rig();
        let caller = admin();
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();

        let err = rig
            .coordinator
            .update_status(order.id, "shipped", StatusFields::default(), &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_advance_surfaces_as_conflict() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let coordinator = FulfillmentCoordinator::new(
            Arc::new(StaleReadOrders {
                inner: store.clone(),
                reads_as: OrderStatus::Pending,
            }),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(RecordingFanout::default()),
            FulfillmentPolicy::default(),
            metrics,
        );
        let caller = admin();

        // The courier already picked this order up; the caller is acting on
        // an older read that still says pending.
        let mut order = Order::open(
            Uuid::new_v4(),
            vec![OrderItem {
                name: "Azithromycin".to_string(),
                quantity: 1,
                unit_price: 150.0,
            }],
            150.0,
            PaymentMethod::Card,
            OrderStatus::PickedUp,
            Utc::now(),
        );
        order.delivery_partner_id = Some(Uuid::new_v4());
        let order_id = order.id;
        OrderStore::insert(store.as_ref(), order).await.unwrap();

        let err = coordinator
            .update_status(order_id, "in_transit", StatusFields::default(), &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Conflict(_)));

        // The more-advanced state was not overwritten.
        let current = OrderStore::find_by_id(store.as_ref(), order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.status, OrderStatus::PickedUp);
    }

    // --------------------------------------------------------------------
    // Partner assignment
    // --------------------------------------------------------------------

    #[tokio::test]
    async fn test_assign_without_partner_auto_provisions() {
        let rig = rig();
        let caller = admin();
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();

        let updated = rig
            .coordinator
            .assign_partner(order.id, None, &caller)
            .await
            .unwrap();

        let partner_id = updated.delivery_partner_id.expect("partner assigned");
        let partner = PartnerStore::find_by_id(rig.store.as_ref(), partner_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(partner.status, PartnerStatus::Approved);
        assert!(partner.is_auto_created);

        // Status untouched; this was an assignment, not a transition.
        assert_eq!(updated.status, OrderStatus::Pending);
        assert_eq!(updated.status_history.len(), 1);
    }

    #[tokio::test]
    async fn test_reassignment_overwrites_snapshot_pre_delivery() {
        let rig = rig();
        let caller = admin();
        let partner = seed_partner(&rig).await;
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();

        let auto_assigned = rig
            .coordinator
            .assign_partner(order.id, None, &caller)
            .await
            .unwrap();
        let reassigned = rig
            .coordinator
            .assign_partner(order.id, Some(partner.id), &caller)
            .await
            .unwrap();

        assert_ne!(auto_assigned.delivery_partner_id, reassigned.delivery_partner_id);
        assert_eq!(reassigned.delivery_partner_id, Some(partner.id));
        assert_eq!(reassigned.delivery_partner_name.as_deref(), Some("Ravi K"));
        assert_eq!(reassigned.status, auto_assigned.status);
    }

    #[tokio::test]
    async fn test_assignment_on_terminal_order_is_invalid_state() {
        let rig = rig();
        let caller = admin();
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();
        rig.coordinator
            .update_status(order.id, "cancelled", StatusFields::default(), &caller)
            .await
            .unwrap();

        let err = rig
            .coordinator
            .assign_partner(order.id, None, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_assignment_respects_auto_provision_policy() {
        let rig = rig_with_policy(FulfillmentPolicy {
            auto_provision_partner: false,
        });
        let caller = admin();
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();

        let err = rig
            .coordinator
            .assign_partner(order.id, None, &caller)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
    }

    // --------------------------------------------------------------------
    // Visibility and listing
    // --------------------------------------------------------------------

    #[tokio::test]
    async fn test_pharmacist_without_pharmacy_lists_nothing() {
        let rig = rig();
        rig.coordinator
            .create_from_checkout(checkout_request(), &admin())
            .await
            .unwrap();

        let caller = Caller {
            id: Uuid::new_v4(),
            role: Role::Pharmacist,
        };
        let orders = rig
            .coordinator
            .list(&caller, &OrderFilters::default())
            .await
            .unwrap();
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn test_name_only_linkage_is_visible_to_owning_pharmacist() {
        let rig = rig();
        let owner = Uuid::new_v4();
        seed_pharmacy(&rig, owner, PharmacyStatus::Approved).await;

        // Historic record: linked by display name only, id never written.
        let mut order = Order::open(
            Uuid::new_v4(),
            vec![OrderItem {
                name: "Vitamin D3".to_string(),
                quantity: 1,
                unit_price: 20.0,
            }],
            20.0,
            PaymentMethod::CashOnDelivery,
            OrderStatus::Pending,
            Utc::now(),
        );
        order.pharmacy_name = Some("city care pharmacy".to_string());
        let order_id = order.id;
        OrderStore::insert(rig.store.as_ref(), order).await.unwrap();

        let caller = Caller {
            id: owner,
            role: Role::Pharmacist,
        };
        let orders = rig
            .coordinator
            .list(&caller, &OrderFilters::default())
            .await
            .unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, order_id);
    }

    #[tokio::test]
    async fn test_customer_sees_only_their_own_orders() {
        let rig = rig();
        let caller = admin();
        let mine = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();
        rig.coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();

        let customer = Caller {
            id: mine.customer_id,
            role: Role::Customer,
        };
        let orders = rig
            .coordinator
            .list(&customer, &OrderFilters::default())
            .await
            .unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, mine.id);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let rig = rig();
        let caller = admin();
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();
        rig.coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();
        rig.coordinator
            .update_status(order.id, "cancelled", StatusFields::default(), &caller)
            .await
            .unwrap();

        let cancelled = rig
            .coordinator
            .list(
                &caller,
                &OrderFilters {
                    status: Some("cancelled".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, order.id);

        let err = rig
            .coordinator
            .list(
                &caller,
                &OrderFilters {
                    status: Some("bogus".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_payment_stays_unpaid_until_delivery() {
        let rig = rig();
        let caller = admin();
        let order = rig
            .coordinator
            .create_from_checkout(checkout_request(), &caller)
            .await
            .unwrap();
        let order = rig
            .coordinator
            .assign_partner(order.id, None, &caller)
            .await
            .unwrap();

        let mut current = order;
        for label in ["processing", "picked_up", "out_for_delivery"] {
            current = rig
                .coordinator
                .update_status(current.id, label, StatusFields::default(), &caller)
                .await
                .unwrap();
            assert_eq!(
                current.payment_status,
                crate::domain::order::PaymentStatus::Unpaid,
                "still unpaid at {label}"
            );
        }

        let delivered = rig
            .coordinator
            .update_status(current.id, "delivered", StatusFields::default(), &caller)
            .await
            .unwrap();
        assert_eq!(
            delivered.payment_status,
            crate::domain::order::PaymentStatus::Paid
        );
        // The synonym label was normalized on write.
        assert_eq!(delivered.status_history[3].status, OrderStatus::InTransit);
    }
}
