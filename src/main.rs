use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use rx_fulfillment::domain::prescription::{PrescribedMedicine, Prescription, PrescriptionStatus};
use rx_fulfillment::domain::tenant::{Pharmacy, PharmacyStatus};
use rx_fulfillment::store::PrescriptionStore;
use rx_fulfillment::{
    BroadcastFanout, Caller, CheckoutRequest, FulfillmentCoordinator, FulfillmentPolicy,
    MemoryStore, Metrics, OrderFilters, OrderItem, PaymentMethod, Role, StatusFields,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rx_fulfillment=debug")),
        )
        .init();

    tracing::info!("🚀 Starting fulfillment coordinator demo");

    // === 1. Wire the coordinator over the in-memory store ===
    let store = Arc::new(MemoryStore::new());
    let fanout = Arc::new(BroadcastFanout::default());
    let metrics = Arc::new(Metrics::new()?);
    let coordinator = FulfillmentCoordinator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        fanout.clone(),
        FulfillmentPolicy::default(),
        metrics.clone(),
    );

    // Observe the fanout like the pharmacy dashboard would.
    let mut events = fanout.subscribe();
    tokio::spawn(async move {
        while let Ok(message) = events.recv().await {
            tracing::info!(topic = %message.topic, key = %message.key, "📣 fanout event");
        }
    });

    // === 2. Seed a pharmacy and an approved prescription ===
    let owner_id = Uuid::new_v4();
    let pharmacy = Pharmacy {
        id: Uuid::new_v4(),
        name: "City Care Pharmacy".to_string(),
        owner_id,
        status: PharmacyStatus::Approved,
    };
    store.add_pharmacy(pharmacy.clone()).await;

    let prescription = Prescription {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        patient_name: "Asha Rao".to_string(),
        patient_phone: Some("555-0199".to_string()),
        pharmacy_id: pharmacy.id,
        medicines: vec![PrescribedMedicine {
            name: "Amoxicillin 500mg".to_string(),
            quantity: 10,
            unit_price: 12.5,
        }],
        status: PrescriptionStatus::Approved,
        order_id: None,
        created_at: Utc::now(),
    };
    PrescriptionStore::insert(store.as_ref(), prescription.clone()).await?;

    let pharmacist = Caller {
        id: owner_id,
        role: Role::Pharmacist,
    };
    let admin = Caller {
        id: Uuid::new_v4(),
        role: Role::Admin,
    };

    // === 3. Direct checkout order ===
    let checkout = coordinator
        .create_from_checkout(
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
            },
            &admin,
        )
        .await?;
    tracing::info!(order_id = %checkout.id, pharmacy = ?checkout.pharmacy_name, "✅ checkout order created");

    // === 4. Promote the prescription and run the delivery lifecycle ===
    let order = coordinator
        .create_from_prescription(prescription.id, None, 125.0, PaymentMethod::Online, &pharmacist)
        .await?;
    tracing::info!(order_id = %order.id, status = %order.status, "✅ prescription promoted");

    let order = coordinator.assign_partner(order.id, None, &pharmacist).await?;
    tracing::info!(
        partner = ?order.delivery_partner_name,
        "✅ delivery partner auto-provisioned"
    );

    let order = coordinator
        .update_status(
            order.id,
            "picked_up",
            StatusFields {
                picked_up: true,
                ..Default::default()
            },
            &pharmacist,
        )
        .await?;
    tracing::info!(status = %order.status, "✅ picked up");

    // The courier app still sends the legacy label; it normalizes on write.
    let order = coordinator
        .update_status(order.id, "out_for_delivery", StatusFields::default(), &pharmacist)
        .await?;
    tracing::info!(status = %order.status, "✅ in transit");

    let order = coordinator
        .update_status(order.id, "delivered", StatusFields::default(), &pharmacist)
        .await?;
    tracing::info!(
        status = %order.status,
        payment = ?order.payment_status,
        delivered_at = ?order.tracking.delivered_at,
        "✅ delivered, payment settled"
    );

    // === 5. Pharmacy dashboard view ===
    let visible = coordinator.list(&pharmacist, &OrderFilters::default()).await?;
    tracing::info!(count = visible.len(), "📋 orders visible to the pharmacist");

    tracing::info!("🎉 Demo complete!");
    Ok(())
}
