mod fanout;

pub use fanout::{BroadcastFanout, EventFanout, FanoutMessage};

/// Topics observed by the pharmacy dashboard and the customer app.
pub const TOPIC_ORDER_CREATED: &str = "order-created";
pub const TOPIC_ORDER_UPDATED: &str = "order-updated";
pub const TOPIC_PRESCRIPTION_UPDATED: &str = "prescription-updated";
