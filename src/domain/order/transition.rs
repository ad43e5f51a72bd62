use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::TransitionError;
use super::record::{Order, OrderPatch};
use super::value_objects::{OrderStatus, PaymentStatus, StatusHistoryEntry};

// ============================================================================
// Status Transition Engine
// ============================================================================
//
// Pure function mapping (current order, requested status, side fields) to
// (field patch, side-effect instructions). Encodes the state machine:
//
//   pending -> {processing|assigned} -> picked_up -> in_transit -> delivered
//
// with cancelled/rejected reachable from any pre-delivery state. Delivered
// and cancelled are terminal. The caller persists the patch and applies the
// side effects; nothing here touches a store.
//
// ============================================================================

/// Caller-supplied side fields accompanying a status change request.
#[derive(Debug, Clone, Default)]
pub struct StatusFields {
    /// Set when the courier confirms physical pickup; gates the
    /// `picked_up_at` / `picked_up_by` stamps.
    pub picked_up: bool,
    /// Overrides the delivery timestamp; defaults to now.
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Instructions for dependent records, applied best-effort after the order
/// write succeeds. Failure of either must not roll back the order.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Flip the linked prescription (if any) to delivered.
    MarkPrescriptionDelivered,
    /// Flip the linked invoice to paid.
    MarkInvoicePaid { invoice_id: Uuid },
}

#[derive(Debug)]
pub struct TransitionPlan {
    pub next: OrderStatus,
    pub patch: OrderPatch,
    pub side_effects: Vec<SideEffect>,
}

/// Compute the patch and side effects for a requested status change.
///
/// Re-sending the current status is accepted and plans no side effects,
/// but the history entry is still appended, matching what downstream
/// audit views have always seen.
pub fn plan(
    order: &Order,
    requested_label: &str,
    fields: &StatusFields,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, TransitionError> {
    let requested = OrderStatus::parse(requested_label)
        .ok_or_else(|| TransitionError::UnknownStatus(requested_label.to_string()))?;
    let current = order.status;

    let mut patch = OrderPatch {
        history_entry: Some(StatusHistoryEntry {
            status: requested,
            at: now,
        }),
        ..Default::default()
    };

    if requested == current {
        return Ok(TransitionPlan {
            next: current,
            patch,
            side_effects: Vec::new(),
        });
    }

    check_allowed(current, requested)?;

    // Assignment is a precondition for confirmation, not a consequence of it.
    if matches!(requested, OrderStatus::Processing | OrderStatus::Assigned)
        && order.delivery_partner_id.is_none()
    {
        return Err(TransitionError::PartnerRequired);
    }

    patch.status = Some(requested);
    let mut side_effects = Vec::new();

    if matches!(requested, OrderStatus::PickedUp | OrderStatus::InTransit) && fields.picked_up {
        patch.picked_up_at = Some(now);
        patch.picked_up_by = order.delivery_partner_id;
    }

    if requested == OrderStatus::Delivered {
        patch.delivered_at = Some(fields.delivered_at.unwrap_or(now));
        patch.delivered_by = order.delivery_partner_id;
        patch.payment_status = Some(PaymentStatus::Paid);

        side_effects.push(SideEffect::MarkPrescriptionDelivered);
        if let Some(invoice_id) = order.invoice_id {
            side_effects.push(SideEffect::MarkInvoicePaid { invoice_id });
        }
    }

    Ok(TransitionPlan {
        next: requested,
        patch,
        side_effects,
    })
}

/// Progress rank within the forward chain. Cancelled/rejected sit outside
/// the chain and are handled separately.
fn rank(status: OrderStatus) -> Option<u8> {
    match status {
        OrderStatus::Pending => Some(0),
        OrderStatus::Processing | OrderStatus::Assigned => Some(1),
        OrderStatus::PickedUp => Some(2),
        OrderStatus::InTransit => Some(3),
        OrderStatus::Delivered => Some(4),
        OrderStatus::Cancelled | OrderStatus::Rejected => None,
    }
}

fn check_allowed(current: OrderStatus, requested: OrderStatus) -> Result<(), TransitionError> {
    let illegal = Err(TransitionError::InvalidTransition {
        from: current,
        to: requested,
    });

    match current {
        // Terminal states; the idempotent resend was already accepted above.
        OrderStatus::Delivered | OrderStatus::Cancelled => illegal,
        // A rejected order does not resume delivery; it can only be closed.
        OrderStatus::Rejected => {
            if requested == OrderStatus::Cancelled {
                Ok(())
            } else {
                illegal
            }
        }
        _ => match requested {
            OrderStatus::Cancelled | OrderStatus::Rejected => Ok(()),
            _ => match (rank(current), rank(requested)) {
                // Forward moves may skip steps; equal rank covers the
                // processing <-> assigned lateral. Never backwards.
                (Some(cur), Some(req)) if req >= cur => Ok(()),
                _ => illegal,
            },
        },
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
