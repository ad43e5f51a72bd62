use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Counts the coordinator's operation outcomes:
// - orders created, by origin (checkout vs prescription promotion)
// - status updates, by resulting status
// - rejected operations, by operation and error kind
// - auto-provisioned delivery partners
// - best-effort side-effect failures (prescription/invoice sync)
// - fanout publish failures
//
// All metrics are registered with a local Registry; exposing it over HTTP
// is the embedding service's concern.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub orders_created: IntCounterVec,
    pub status_updates: IntCounterVec,
    pub operations_rejected: IntCounterVec,
    pub partners_auto_provisioned: IntCounter,
    pub side_effect_failures: IntCounterVec,
    pub fanout_failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounterVec::new(
            Opts::new("fulfillment_orders_created_total", "Orders created, by origin"),
            &["origin"],
        )?;
        registry.register(Box::new(orders_created.clone()))?;

        let status_updates = IntCounterVec::new(
            Opts::new(
                "fulfillment_status_updates_total",
                "Accepted status updates, by resulting status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(status_updates.clone()))?;

        let operations_rejected = IntCounterVec::new(
            Opts::new(
                "fulfillment_operations_rejected_total",
                "Rejected operations, by operation and error kind",
            ),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(operations_rejected.clone()))?;

        let partners_auto_provisioned = IntCounter::new(
            "fulfillment_partners_auto_provisioned_total",
            "Delivery partners auto-provisioned at assignment time",
        )?;
        registry.register(Box::new(partners_auto_provisioned.clone()))?;

        let side_effect_failures = IntCounterVec::new(
            Opts::new(
                "fulfillment_side_effect_failures_total",
                "Best-effort dependent-record writes that failed, by target",
            ),
            &["target"],
        )?;
        registry.register(Box::new(side_effect_failures.clone()))?;

        let fanout_failures = IntCounterVec::new(
            Opts::new(
                "fulfillment_fanout_failures_total",
                "Event fanout publishes that failed, by topic",
            ),
            &["topic"],
        )?;
        registry.register(Box::new(fanout_failures.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            status_updates,
            operations_rejected,
            partners_auto_provisioned,
            side_effect_failures,
            fanout_failures,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_created(&self, origin: &str) {
        self.orders_created.with_label_values(&[origin]).inc();
    }

    pub fn record_status_update(&self, status: &str) {
        self.status_updates.with_label_values(&[status]).inc();
    }

    pub fn record_rejected(&self, operation: &str, kind: &str) {
        self.operations_rejected
            .with_label_values(&[operation, kind])
            .inc();
    }

    pub fn record_auto_provisioned(&self) {
        self.partners_auto_provisioned.inc();
    }

    pub fn record_side_effect_failure(&self, target: &str) {
        self.side_effect_failures.with_label_values(&[target]).inc();
    }

    pub fn record_fanout_failure(&self, topic: &str) {
        self.fanout_failures.with_label_values(&[topic]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
