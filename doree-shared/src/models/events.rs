use uuid::Uuid;

pub const TOPIC_ORDER_PAID: &str = "order.paid";
pub const TOPIC_ORDER_PAYMENT_FAILED: &str = "order.payment_failed";
pub const TOPIC_ORDER_DELIVERY_UPDATED: &str = "order.delivery_updated";

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct OrderPaidEvent {
    pub order_id: Uuid,
    pub user_id: String,
    pub gateway_order_ref: String,
    pub gateway_payment_ref: Option<String>,
    pub amount: i64,
    pub coupon_code: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct OrderPaymentFailedEvent {
    pub order_id: Uuid,
    pub user_id: String,
    pub gateway_order_ref: String,
    pub reason: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct DeliveryUpdatedEvent {
    pub order_id: Uuid,
    pub user_id: String,
    pub from_status: String,
    pub to_status: String,
    pub message: String,
    pub location: Option<String>,
    pub timestamp: i64,
}

/// Lifecycle notifications fanned out to the bus (confirmation mail, live tracking).
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Paid(OrderPaidEvent),
    PaymentFailed(OrderPaymentFailedEvent),
    DeliveryUpdated(DeliveryUpdatedEvent),
}

impl OrderEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            OrderEvent::Paid(_) => TOPIC_ORDER_PAID,
            OrderEvent::PaymentFailed(_) => TOPIC_ORDER_PAYMENT_FAILED,
            OrderEvent::DeliveryUpdated(_) => TOPIC_ORDER_DELIVERY_UPDATED,
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::Paid(e) => e.order_id,
            OrderEvent::PaymentFailed(e) => e.order_id,
            OrderEvent::DeliveryUpdated(e) => e.order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged_for_consumers() {
        let event = OrderEvent::DeliveryUpdated(DeliveryUpdatedEvent {
            order_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            from_status: "pending".to_string(),
            to_status: "confirmed".to_string(),
            message: "Packed and confirmed".to_string(),
            location: None,
            timestamp: 0,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "delivery_updated");
        assert_eq!(event.topic(), TOPIC_ORDER_DELIVERY_UPDATED);
    }
}
