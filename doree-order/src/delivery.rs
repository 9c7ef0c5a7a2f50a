use chrono::Utc;
use serde::Serialize;

use crate::models::{DeliveryStatus, Order, TrackingEvent};

/// Colour family a view uses for a status badge.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Warning,
    Info,
    Accent,
    Success,
    Danger,
    Caution,
}

/// Everything a view needs to render a delivery status.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct StatusInfo {
    pub status: DeliveryStatus,
    /// Position in the forward chain; `None` for absorbing states
    pub step: Option<usize>,
    pub label: &'static str,
    pub description: &'static str,
    pub tone: StatusTone,
    pub icon: &'static str,
    pub absorbing: bool,
}

/// The single table mapping status to index, label, tone and icon.
pub const STATUS_TABLE: [StatusInfo; 9] = [
    StatusInfo {
        status: DeliveryStatus::Pending,
        step: Some(0),
        label: "Pending Payment",
        description: "Order placed, awaiting payment",
        tone: StatusTone::Warning,
        icon: "clock",
        absorbing: false,
    },
    StatusInfo {
        status: DeliveryStatus::Confirmed,
        step: Some(1),
        label: "Order Confirmed",
        description: "Your order has been placed successfully",
        tone: StatusTone::Info,
        icon: "check-circle",
        absorbing: false,
    },
    StatusInfo {
        status: DeliveryStatus::Processing,
        step: Some(2),
        label: "Processing",
        description: "We are preparing your order",
        tone: StatusTone::Info,
        icon: "package",
        absorbing: false,
    },
    StatusInfo {
        status: DeliveryStatus::Shipped,
        step: Some(3),
        label: "Shipped",
        description: "Your order is on the way",
        tone: StatusTone::Accent,
        icon: "truck",
        absorbing: false,
    },
    StatusInfo {
        status: DeliveryStatus::InTransit,
        step: Some(4),
        label: "In Transit",
        description: "Order is in transit to your city",
        tone: StatusTone::Accent,
        icon: "truck",
        absorbing: false,
    },
    StatusInfo {
        status: DeliveryStatus::OutForDelivery,
        step: Some(5),
        label: "Out for Delivery",
        description: "Your order is out for delivery",
        tone: StatusTone::Success,
        icon: "map-pin",
        absorbing: false,
    },
    StatusInfo {
        status: DeliveryStatus::Delivered,
        step: Some(6),
        label: "Delivered",
        description: "Order has been delivered",
        tone: StatusTone::Success,
        icon: "check-circle",
        absorbing: false,
    },
    StatusInfo {
        status: DeliveryStatus::Cancelled,
        step: None,
        label: "Cancelled",
        description: "This order has been cancelled",
        tone: StatusTone::Danger,
        icon: "x-circle",
        absorbing: true,
    },
    StatusInfo {
        status: DeliveryStatus::Returned,
        step: None,
        label: "Returned",
        description: "This order has been returned",
        tone: StatusTone::Caution,
        icon: "x-circle",
        absorbing: true,
    },
];

/// Number of steps in the forward chain (`pending` .. `delivered`).
pub const FORWARD_STEPS: usize = 7;

impl DeliveryStatus {
    pub fn info(&self) -> &'static StatusInfo {
        // STATUS_TABLE is declared in enum order
        &STATUS_TABLE[*self as usize]
    }

    pub fn is_absorbing(&self) -> bool {
        self.info().absorbing
    }
}

pub fn step_index(status: DeliveryStatus) -> Option<usize> {
    status.info().step
}

/// Fraction of the forward chain completed; absorbing states have none
pub fn progress_fraction(status: DeliveryStatus) -> Option<f64> {
    step_index(status).map(|step| step as f64 / (FORWARD_STEPS - 1) as f64)
}

/// An operator (or automated) request to move an order along the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryCommand {
    pub status: DeliveryStatus,
    pub message: String,
    pub location: Option<String>,
}

impl DeliveryCommand {
    pub fn new(status: DeliveryStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Validates and applies delivery transitions.
pub struct DeliveryStateMachine;

impl DeliveryStateMachine {
    /// Check a transition without touching the order
    pub fn validate(
        current: DeliveryStatus,
        command: &DeliveryCommand,
    ) -> Result<(), TransitionError> {
        if command.message.trim().is_empty() {
            return Err(TransitionError::MissingMessage);
        }

        if current.is_absorbing() {
            return Err(TransitionError::AbsorbingState { current });
        }

        if command.status.is_absorbing() {
            return Ok(());
        }

        // Both sides are on the forward chain here
        let from = step_index(current).unwrap_or(0);
        let to = step_index(command.status).unwrap_or(0);
        if to <= from {
            return Err(TransitionError::Backward {
                from: current,
                to: command.status,
            });
        }

        Ok(())
    }

    /// Apply a transition, appending its tracking event
    pub fn transition(mut order: Order, command: DeliveryCommand) -> Result<Order, TransitionError> {
        let event = Self::apply(&mut order, command)?;
        tracing::debug!(
            order_id = %order.id,
            status = %event.status,
            "Delivery transition applied"
        );
        Ok(order)
    }

    /// In-place form of [`transition`](Self::transition); returns the appended event
    pub fn apply(order: &mut Order, command: DeliveryCommand) -> Result<TrackingEvent, TransitionError> {
        Self::validate(order.delivery_status, &command)?;

        let now = Utc::now();
        // Keep the trail non-decreasing even if the clock steps back
        let timestamp = match order.last_tracking_timestamp() {
            Some(last) if last > now => last,
            _ => now,
        };

        let event = TrackingEvent {
            status: command.status,
            timestamp,
            message: command.message.trim().to_string(),
            location: command
                .location
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
        };

        order.delivery_status = command.status;
        order.tracking_updates.push(event.clone());
        order.updated_at = timestamp;

        Ok(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("A status message is required for every delivery update")]
    MissingMessage,

    #[error("Order is {current} and accepts no further delivery updates")]
    AbsorbingState { current: DeliveryStatus },

    #[error("Cannot move delivery status backward from {from} to {to}")]
    Backward {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{item, new_order};

    fn pending_order() -> Order {
        Order::place(new_order("order_dsm", vec![item("Kurta", 150_000, 1)]), 0).unwrap()
    }

    #[test]
    fn test_table_matches_enum_order() {
        for (i, status) in DeliveryStatus::ALL.iter().enumerate() {
            assert_eq!(STATUS_TABLE[i].status, *status);
        }
        assert_eq!(step_index(DeliveryStatus::Pending), Some(0));
        assert_eq!(step_index(DeliveryStatus::Delivered), Some(6));
        assert_eq!(step_index(DeliveryStatus::Cancelled), None);
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(progress_fraction(DeliveryStatus::Pending), Some(0.0));
        assert_eq!(progress_fraction(DeliveryStatus::Shipped), Some(0.5));
        assert_eq!(progress_fraction(DeliveryStatus::Delivered), Some(1.0));
        assert_eq!(progress_fraction(DeliveryStatus::Returned), None);
    }

    #[test]
    fn test_forward_chain_is_accepted_and_audited() {
        let mut order = pending_order();
        let chain = [
            DeliveryStatus::Confirmed,
            DeliveryStatus::Processing,
            DeliveryStatus::Shipped,
            DeliveryStatus::InTransit,
            DeliveryStatus::OutForDelivery,
            DeliveryStatus::Delivered,
        ];

        for status in chain {
            let before = order.tracking_updates.len();
            order = DeliveryStateMachine::transition(
                order,
                DeliveryCommand::new(status, format!("now {}", status)).at("Jaipur hub"),
            )
            .unwrap();
            assert_eq!(order.delivery_status, status);
            assert_eq!(order.tracking_updates.len(), before + 1);
        }

        let stamps: Vec<_> = order.tracking_updates.iter().map(|e| e.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(order.tracking_updates[0].location.as_deref(), Some("Jaipur hub"));
    }

    #[test]
    fn test_skipping_ahead_is_allowed() {
        let order = pending_order();
        let order = DeliveryStateMachine::transition(
            order,
            DeliveryCommand::new(DeliveryStatus::Shipped, "Handed to courier"),
        )
        .unwrap();
        assert_eq!(order.delivery_status, DeliveryStatus::Shipped);
    }

    #[test]
    fn test_backward_and_same_state_rejected() {
        let order = DeliveryStateMachine::transition(
            pending_order(),
            DeliveryCommand::new(DeliveryStatus::Confirmed, "Confirmed"),
        )
        .unwrap();

        let err = DeliveryStateMachine::transition(
            order.clone(),
            DeliveryCommand::new(DeliveryStatus::Pending, "Oops"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Backward {
                from: DeliveryStatus::Confirmed,
                to: DeliveryStatus::Pending
            }
        );

        let err = DeliveryStateMachine::transition(
            order,
            DeliveryCommand::new(DeliveryStatus::Confirmed, "Again"),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::Backward { .. }));
    }

    #[test]
    fn test_absorbing_states_reachable_from_anywhere_and_final() {
        for start in DeliveryStatus::ALL.iter().filter(|s| !s.is_absorbing()) {
            for terminal in [DeliveryStatus::Cancelled, DeliveryStatus::Returned] {
                assert!(DeliveryStateMachine::validate(
                    *start,
                    &DeliveryCommand::new(terminal, "Closing")
                )
                .is_ok());
            }
        }

        let cancelled = DeliveryStateMachine::transition(
            pending_order(),
            DeliveryCommand::new(DeliveryStatus::Cancelled, "Customer cancelled"),
        )
        .unwrap();

        for target in DeliveryStatus::ALL {
            let err = DeliveryStateMachine::transition(
                cancelled.clone(),
                DeliveryCommand::new(target, "Try again"),
            )
            .unwrap_err();
            assert_eq!(
                err,
                TransitionError::AbsorbingState {
                    current: DeliveryStatus::Cancelled
                }
            );
        }
    }

    #[test]
    fn test_message_is_required() {
        let err = DeliveryStateMachine::transition(
            pending_order(),
            DeliveryCommand::new(DeliveryStatus::Confirmed, "   "),
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::MissingMessage);
    }

    #[test]
    fn test_blank_location_dropped() {
        let order = DeliveryStateMachine::transition(
            pending_order(),
            DeliveryCommand::new(DeliveryStatus::Confirmed, "Confirmed").at("  "),
        )
        .unwrap();
        assert_eq!(order.tracking_updates[0].location, None);
    }
}
