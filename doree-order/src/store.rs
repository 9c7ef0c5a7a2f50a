use chrono::Utc;
use doree_shared::models::events::{DeliveryUpdatedEvent, OrderPaidEvent, OrderPaymentFailedEvent};
use doree_shared::OrderEvent;
use std::sync::Arc;
use uuid::Uuid;

use crate::coupon::CouponValidator;
use crate::delivery::{DeliveryCommand, DeliveryStateMachine};
use crate::error::{OrderError, OrderResult};
use crate::models::{
    DeliveryStatus, NewOrder, Order, PaymentOutcome, PaymentStatus, TrackingEvent, TrackingInfo,
};
use crate::repository::{EventPublisher, OrderRepository, PaymentSettlement};

pub const PAYMENT_FAILED_MESSAGE: &str = "Payment failed. Order cancelled";

/// What the gateway reported for one checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUpdate {
    pub outcome: PaymentOutcome,
    pub gateway_payment_ref: Option<String>,
    pub reason: Option<String>,
}

impl PaymentUpdate {
    pub fn paid(gateway_payment_ref: impl Into<String>) -> Self {
        Self {
            outcome: PaymentOutcome::Paid,
            gateway_payment_ref: Some(gateway_payment_ref.into()),
            reason: None,
        }
    }

    pub fn failed(reason: Option<String>) -> Self {
        Self {
            outcome: PaymentOutcome::Failed,
            gateway_payment_ref: None,
            reason,
        }
    }
}

/// Owns the order aggregate: creation, payment finalization and delivery updates.
#[derive(Clone)]
pub struct OrderStore {
    orders: Arc<dyn OrderRepository>,
    coupons: CouponValidator,
    events: Arc<dyn EventPublisher>,
    shipping_amount: i64,
}

impl OrderStore {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        coupons: CouponValidator,
        events: Arc<dyn EventPublisher>,
        shipping_amount: i64,
    ) -> Self {
        Self {
            orders,
            coupons,
            events,
            shipping_amount,
        }
    }

    pub fn shipping_amount(&self) -> i64 {
        self.shipping_amount
    }

    pub fn coupons(&self) -> &CouponValidator {
        &self.coupons
    }

    /// Persist a pending order after checking its amount arithmetic
    pub async fn create_order(&self, draft: NewOrder) -> OrderResult<Order> {
        let order = Order::place(draft, self.shipping_amount)?;
        self.orders.insert(&order).await?;

        tracing::info!(
            order_id = %order.id,
            gateway_order_ref = %order.gateway_order_ref,
            amount = order.amount,
            coupon = ?order.coupon_code,
            "Order created"
        );
        Ok(order)
    }

    /// Record the gateway's verdict. Same verdict twice is a no-op; a different
    /// verdict on a settled order is a conflict.
    pub async fn finalize_payment(
        &self,
        gateway_order_ref: &str,
        update: PaymentUpdate,
    ) -> OrderResult<Order> {
        let requested = PaymentStatus::from(update.outcome);

        // A lost race leaves the order terminal, so the second read always resolves
        for _ in 0..2 {
            let order = self.require_by_gateway_ref(gateway_order_ref).await?;

            match order.payment_status {
                PaymentStatus::Pending => {}
                current if current == requested => {
                    tracing::debug!(
                        gateway_order_ref,
                        status = %current,
                        "Payment already finalized, ignoring repeat"
                    );
                    return Ok(order);
                }
                current => {
                    tracing::warn!(
                        gateway_order_ref,
                        current = %current,
                        requested = %requested,
                        "Conflicting payment outcome rejected"
                    );
                    return Err(OrderError::PaymentConflict {
                        gateway_order_ref: gateway_order_ref.to_string(),
                        current,
                        requested,
                    });
                }
            }

            let settlement = settlement_for(&order, &update);
            if self.orders.settle_payment(gateway_order_ref, &settlement).await? {
                let settled = self.require_by_gateway_ref(gateway_order_ref).await?;
                tracing::info!(
                    order_id = %settled.id,
                    gateway_order_ref,
                    status = %requested,
                    "Payment finalized"
                );
                self.after_settlement(&settled, &update).await;
                return Ok(settled);
            }
        }

        let order = self.require_by_gateway_ref(gateway_order_ref).await?;
        Err(OrderError::ConcurrentModification(order.id))
    }

    async fn after_settlement(&self, order: &Order, update: &PaymentUpdate) {
        let event = match update.outcome {
            PaymentOutcome::Paid => {
                if let Some(code) = &order.coupon_code {
                    if let Err(e) = self.coupons.commit_usage(code).await {
                        tracing::warn!(
                            order_id = %order.id,
                            code = %code,
                            error = %e,
                            "Coupon usage not recorded for paid order"
                        );
                    }
                }
                OrderEvent::Paid(OrderPaidEvent {
                    order_id: order.id,
                    user_id: order.user_id.clone(),
                    gateway_order_ref: order.gateway_order_ref.clone(),
                    gateway_payment_ref: order.gateway_payment_ref.clone(),
                    amount: order.amount,
                    coupon_code: order.coupon_code.clone(),
                    timestamp: Utc::now().timestamp(),
                })
            }
            PaymentOutcome::Failed => OrderEvent::PaymentFailed(OrderPaymentFailedEvent {
                order_id: order.id,
                user_id: order.user_id.clone(),
                gateway_order_ref: order.gateway_order_ref.clone(),
                reason: update.reason.clone(),
                timestamp: Utc::now().timestamp(),
            }),
        };
        self.publish(event).await;
    }

    /// Move the order along the delivery chain and append its tracking event
    pub async fn transition_delivery(&self, order_id: Uuid, command: DeliveryCommand) -> OrderResult<Order> {
        let mut order = self.get_order(order_id).await?;
        let previous = order.delivery_status;

        let event = DeliveryStateMachine::apply(&mut order, command)?;

        if !self
            .orders
            .append_delivery_event(order_id, previous, &event)
            .await?
        {
            return Err(OrderError::ConcurrentModification(order_id));
        }

        tracing::info!(
            order_id = %order_id,
            from = %previous,
            to = %event.status,
            "Delivery status updated"
        );

        self.publish(OrderEvent::DeliveryUpdated(DeliveryUpdatedEvent {
            order_id,
            user_id: order.user_id.clone(),
            from_status: previous.to_string(),
            to_status: event.status.to_string(),
            message: event.message.clone(),
            location: event.location.clone(),
            timestamp: event.timestamp.timestamp(),
        }))
        .await;

        Ok(order)
    }

    /// Courier metadata only; delivery status is untouched
    pub async fn update_tracking_info(&self, order_id: Uuid, info: TrackingInfo) -> OrderResult<Order> {
        let info = TrackingInfo {
            tracking_number: info.tracking_number.trim().to_string(),
            courier_name: info.courier_name.trim().to_string(),
            estimated_delivery: info.estimated_delivery,
        };
        if info.tracking_number.is_empty() {
            return Err(OrderError::Validation("tracking number is required".to_string()));
        }
        if info.courier_name.is_empty() {
            return Err(OrderError::Validation("courier name is required".to_string()));
        }

        if !self
            .orders
            .update_tracking_info(order_id, &info, Utc::now())
            .await?
        {
            return Err(OrderError::NotFound(order_id.to_string()));
        }

        tracing::info!(order_id = %order_id, courier = %info.courier_name, "Tracking info updated");
        self.get_order(order_id).await
    }

    pub async fn get_order(&self, order_id: Uuid) -> OrderResult<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    pub async fn get_by_gateway_ref(&self, gateway_order_ref: &str) -> OrderResult<Option<Order>> {
        Ok(self.orders.get_by_gateway_ref(gateway_order_ref).await?)
    }

    pub async fn list_for_user(&self, user_id: &str) -> OrderResult<Vec<Order>> {
        Ok(self.orders.list_for_user(user_id).await?)
    }

    pub async fn list_all(&self, delivery_status: Option<DeliveryStatus>) -> OrderResult<Vec<Order>> {
        Ok(self.orders.list_all(delivery_status).await?)
    }

    /// Pending orders older than `older_than`, oldest first
    pub async fn list_stale_pending(
        &self,
        older_than: chrono::Duration,
        limit: usize,
    ) -> OrderResult<Vec<Order>> {
        let cutoff = Utc::now() - older_than;
        Ok(self.orders.list_pending_before(cutoff, limit).await?)
    }

    async fn require_by_gateway_ref(&self, gateway_order_ref: &str) -> OrderResult<Order> {
        self.orders
            .get_by_gateway_ref(gateway_order_ref)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("gateway order {}", gateway_order_ref)))
    }

    async fn publish(&self, event: OrderEvent) {
        if let Err(e) = self.events.publish(&event).await {
            tracing::warn!(
                order_id = %event.order_id(),
                topic = event.topic(),
                error = %e,
                "Lifecycle event dropped"
            );
        }
    }
}

fn settlement_for(order: &Order, update: &PaymentUpdate) -> PaymentSettlement {
    let now = Utc::now();
    let delivery_event = match update.outcome {
        PaymentOutcome::Paid => None,
        PaymentOutcome::Failed if order.delivery_status.is_absorbing() => None,
        PaymentOutcome::Failed => Some(TrackingEvent {
            status: DeliveryStatus::Cancelled,
            // the repository clamps this to the latest entry inside the write
            timestamp: now,
            message: PAYMENT_FAILED_MESSAGE.to_string(),
            location: None,
        }),
    };

    PaymentSettlement {
        status: update.outcome.into(),
        gateway_payment_ref: update.gateway_payment_ref.clone(),
        delivery_event,
        settled_at: now,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::harness;
    use super::*;
    use crate::coupon::Coupon;
    use crate::delivery::TransitionError;
    use crate::error::ErrorKind;
    use crate::models::fixtures::{item, new_order};
    use crate::repository::CouponRepository;

    #[tokio::test]
    async fn test_create_order_verifies_amount() {
        let h = harness(5_000);

        let draft = new_order("order_amt", vec![item("Kurta", 100_000, 1)]);
        let err = h.store.create_order(draft.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut fixed = draft;
        fixed.amount = 105_000;
        let order = h.store.create_order(fixed).await.unwrap();
        assert_eq!(order.shipping_amount, 5_000);
        assert!(order.tracking_updates.is_empty());
    }

    #[tokio::test]
    async fn test_paid_then_paid_again_is_noop() {
        let h = harness(0);
        h.store
            .create_order(new_order("order_idem", vec![item("Saree", 250_000, 1)]))
            .await
            .unwrap();

        let first = h
            .store
            .finalize_payment("order_idem", PaymentUpdate::paid("pay_1"))
            .await
            .unwrap();
        let second = h
            .store
            .finalize_payment("order_idem", PaymentUpdate::paid("pay_1"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.payment_status, PaymentStatus::Paid);
        // paid does not move delivery
        assert_eq!(first.delivery_status, DeliveryStatus::Pending);
        assert!(first.tracking_updates.is_empty());
        assert_eq!(h.events.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_then_paid_is_conflict() {
        let h = harness(0);
        h.store
            .create_order(new_order("order_conf", vec![item("Lehenga", 500_000, 1)]))
            .await
            .unwrap();

        let failed = h
            .store
            .finalize_payment("order_conf", PaymentUpdate::failed(Some("Card declined".into())))
            .await
            .unwrap();
        assert_eq!(failed.payment_status, PaymentStatus::Failed);
        assert_eq!(failed.delivery_status, DeliveryStatus::Cancelled);
        assert_eq!(failed.tracking_updates.len(), 1);
        assert_eq!(failed.tracking_updates[0].message, PAYMENT_FAILED_MESSAGE);

        let err = h
            .store
            .finalize_payment("order_conf", PaymentUpdate::paid("pay_late"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::PaymentConflict {
                current: PaymentStatus::Failed,
                requested: PaymentStatus::Paid,
                ..
            }
        ));

        let stored = h.store.get_order(failed.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
        assert_eq!(stored.gateway_payment_ref, None);
    }

    #[tokio::test]
    async fn test_unknown_gateway_ref() {
        let h = harness(0);
        let err = h
            .store
            .finalize_payment("order_nope", PaymentUpdate::paid("pay"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_paid_delivery_walkthrough() {
        let h = harness(0);
        let order = h
            .store
            .create_order(new_order("order_walk", vec![item("Kurta", 150_000, 1)]))
            .await
            .unwrap();

        h.store
            .finalize_payment("order_walk", PaymentUpdate::paid("pay_walk"))
            .await
            .unwrap();
        let paid = h.store.get_order(order.id).await.unwrap();
        assert_eq!(paid.delivery_status, DeliveryStatus::Pending);

        let confirmed = h
            .store
            .transition_delivery(
                order.id,
                DeliveryCommand::new(DeliveryStatus::Confirmed, "Order confirmed"),
            )
            .await
            .unwrap();
        assert_eq!(confirmed.delivery_status, DeliveryStatus::Confirmed);
        assert_eq!(confirmed.tracking_updates.len(), 1);

        let err = h
            .store
            .transition_delivery(order.id, DeliveryCommand::new(DeliveryStatus::Pending, "Undo"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Transition(TransitionError::Backward { .. })));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let stored = h.store.get_order(order.id).await.unwrap();
        assert_eq!(stored, confirmed);
    }

    #[tokio::test]
    async fn test_coupon_committed_once_per_paid_order() {
        let h = harness(0);
        h.coupons
            .insert(&Coupon {
                id: Uuid::new_v4(),
                code: "SAVE10".to_string(),
                discount_percent: 10,
                min_order_value: 50_000,
                usage_limit: Some(5),
                used_count: 0,
                expires_at: None,
                is_active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut draft = new_order("order_cpn", vec![item("Saree", 100_000, 1)]);
        draft.coupon_code = Some("SAVE10".to_string());
        draft.discount_amount = 10_000;
        draft.amount = 90_000;
        h.store.create_order(draft).await.unwrap();

        let (a, b) = tokio::join!(
            h.store.finalize_payment("order_cpn", PaymentUpdate::paid("pay_a")),
            h.store.finalize_payment("order_cpn", PaymentUpdate::paid("pay_a")),
        );
        assert!(a.is_ok() && b.is_ok());

        let coupon = h.coupons.find_active("SAVE10").await.unwrap().unwrap();
        assert_eq!(coupon.used_count, 1);
    }

    #[tokio::test]
    async fn test_coupon_commit_failure_does_not_fail_payment() {
        let h = harness(0);
        let mut draft = new_order("order_gone", vec![item("Saree", 100_000, 1)]);
        draft.coupon_code = Some("DELETED".to_string());
        draft.discount_amount = 5_000;
        draft.amount = 95_000;
        h.store.create_order(draft).await.unwrap();

        let order = h
            .store
            .finalize_payment("order_gone", PaymentUpdate::paid("pay_gone"))
            .await
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_tracking_info_leaves_status_alone() {
        let h = harness(0);
        let order = h
            .store
            .create_order(new_order("order_trk", vec![item("Kurta", 80_000, 1)]))
            .await
            .unwrap();

        let updated = h
            .store
            .update_tracking_info(
                order.id,
                TrackingInfo {
                    tracking_number: " BD123456789IN ".to_string(),
                    courier_name: "BlueDart".to_string(),
                    estimated_delivery: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.tracking_number.as_deref(), Some("BD123456789IN"));
        assert_eq!(updated.delivery_status, DeliveryStatus::Pending);
        assert!(updated.tracking_updates.is_empty());

        let err = h
            .store
            .update_tracking_info(
                order.id,
                TrackingInfo {
                    tracking_number: "X".to_string(),
                    courier_name: " ".to_string(),
                    estimated_delivery: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_delivery_events_are_published() {
        let h = harness(0);
        let order = h
            .store
            .create_order(new_order("order_evt", vec![item("Kurta", 80_000, 1)]))
            .await
            .unwrap();
        h.store
            .transition_delivery(
                order.id,
                DeliveryCommand::new(DeliveryStatus::Shipped, "Shipped").at("Delhi"),
            )
            .await
            .unwrap();

        let events = h.events.events().await;
        match &events[..] {
            [OrderEvent::DeliveryUpdated(e)] => {
                assert_eq!(e.from_status, "pending");
                assert_eq!(e.to_status, "shipped");
                assert_eq!(e.location.as_deref(), Some("Delhi"));
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listings() {
        let h = harness(0);
        for i in 0..3 {
            let mut draft = new_order(&format!("order_l{}", i), vec![item("Kurta", 10_000, 1)]);
            if i == 2 {
                draft.user_id = "user-2".to_string();
            }
            h.store.create_order(draft).await.unwrap();
        }
        assert_eq!(h.store.list_for_user("user-1").await.unwrap().len(), 2);
        assert_eq!(h.store.list_all(None).await.unwrap().len(), 3);
        assert!(h
            .store
            .list_all(Some(DeliveryStatus::Shipped))
            .await
            .unwrap()
            .is_empty());
        assert!(h.orders.get_by_gateway_ref("order_l1").await.unwrap().is_some());
    }
}
