use doree_core::{CallPolicy, GatewayOrderStatus, PaymentGateway};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{OrderError, OrderResult};
use crate::models::{Order, PaymentStatus};
use crate::store::{OrderStore, PaymentUpdate};

/// Outcome of reconciling one order against the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Finalized(Order),
    /// Gateway still reports the order as open
    StillPending(Order),
    /// Already terminal locally; the gateway was not asked
    AlreadySettled(Order),
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub paid: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub errors: usize,
}

/// Recovers orders whose payment callback never arrived by asking the gateway.
#[derive(Clone)]
pub struct Reconciler {
    store: OrderStore,
    gateway: Arc<dyn PaymentGateway>,
    policy: CallPolicy,
}

impl Reconciler {
    pub fn new(store: OrderStore, gateway: Arc<dyn PaymentGateway>, policy: CallPolicy) -> Self {
        Self {
            store,
            gateway,
            policy,
        }
    }

    pub async fn reconcile_order(&self, gateway_order_ref: &str) -> OrderResult<Reconciliation> {
        let order = self
            .store
            .get_by_gateway_ref(gateway_order_ref)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("gateway order {}", gateway_order_ref)))?;

        if order.payment_status != PaymentStatus::Pending {
            return Ok(Reconciliation::AlreadySettled(order));
        }

        let status = self
            .policy
            .read(|| self.gateway.fetch_order_status(gateway_order_ref))
            .await?;

        let update = match status {
            GatewayOrderStatus::Pending => return Ok(Reconciliation::StillPending(order)),
            GatewayOrderStatus::Paid { payment_ref } => PaymentUpdate::paid(payment_ref),
            GatewayOrderStatus::Failed { reason } => PaymentUpdate::failed(reason),
        };

        let order = self.store.finalize_payment(gateway_order_ref, update).await?;
        tracing::info!(
            order_id = %order.id,
            gateway_order_ref,
            status = %order.payment_status,
            "Order reconciled from gateway"
        );
        Ok(Reconciliation::Finalized(order))
    }

    /// Reconcile up to `limit` pending orders older than `older_than`
    pub async fn reconcile_stale(
        &self,
        older_than: chrono::Duration,
        limit: usize,
    ) -> OrderResult<ReconcileReport> {
        let stale = self.store.list_stale_pending(older_than, limit).await?;
        let mut report = ReconcileReport {
            examined: stale.len(),
            ..Default::default()
        };

        for order in stale {
            match self.reconcile_order(&order.gateway_order_ref).await {
                Ok(Reconciliation::Finalized(o)) | Ok(Reconciliation::AlreadySettled(o)) => {
                    match o.payment_status {
                        PaymentStatus::Paid => report.paid += 1,
                        PaymentStatus::Failed => report.failed += 1,
                        PaymentStatus::Pending => report.still_pending += 1,
                    }
                }
                Ok(Reconciliation::StillPending(_)) => report.still_pending += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(
                        gateway_order_ref = %order.gateway_order_ref,
                        error = %e,
                        "Reconciliation failed for order"
                    );
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(?report, "Reconciliation pass complete");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::fixtures::{address, item};
    use crate::models::DeliveryStatus;
    use crate::orchestrator::testing::checkout_harness;
    use crate::orchestrator::CheckoutRequest;
    use std::time::Duration;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            user_id: "user-1".to_string(),
            items: vec![item("Kurta", 60_000, 1)],
            shipping_address: address(),
            coupon_code: None,
        }
    }

    fn policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(200),
            read_retries: 1,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_stuck_order_finalized_from_gateway() {
        let h = checkout_harness(0);
        let reconciler = Reconciler::new(h.inner.store.clone(), h.gateway.clone(), policy());

        let session = h.checkout.begin_checkout(request()).await.unwrap();

        let pending = reconciler.reconcile_order(&session.gateway_order_ref).await.unwrap();
        assert!(matches!(pending, Reconciliation::StillPending(_)));

        // customer paid but closed the tab before the callback
        h.gateway.settle(&session.gateway_order_ref, "pay_lost").await;

        match reconciler.reconcile_order(&session.gateway_order_ref).await.unwrap() {
            Reconciliation::Finalized(order) => {
                assert_eq!(order.payment_status, PaymentStatus::Paid);
                assert_eq!(order.gateway_payment_ref.as_deref(), Some("pay_lost"));
            }
            other => panic!("expected finalized, got {:?}", other),
        }

        let again = reconciler.reconcile_order(&session.gateway_order_ref).await.unwrap();
        assert!(matches!(again, Reconciliation::AlreadySettled(_)));
    }

    #[tokio::test]
    async fn test_stale_pass_reports_each_outcome() {
        let h = checkout_harness(0);
        let reconciler = Reconciler::new(h.inner.store.clone(), h.gateway.clone(), policy());

        let paid = h.checkout.begin_checkout(request()).await.unwrap();
        let failed = h.checkout.begin_checkout(request()).await.unwrap();
        let _open = h.checkout.begin_checkout(request()).await.unwrap();

        h.gateway.settle(&paid.gateway_order_ref, "pay_1").await;
        h.gateway.fail(&failed.gateway_order_ref, Some("Bank declined".into())).await;

        let report = reconciler
            .reconcile_stale(chrono::Duration::zero(), 10)
            .await
            .unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                examined: 3,
                paid: 1,
                failed: 1,
                still_pending: 1,
                errors: 0
            }
        );

        let cancelled = h.inner.store.get_order(failed.order_id).await.unwrap();
        assert_eq!(cancelled.delivery_status, DeliveryStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_gateway_outage_counted_as_error() {
        let h = checkout_harness(0);
        let reconciler = Reconciler::new(h.inner.store.clone(), h.gateway.clone(), policy());
        let session = h.checkout.begin_checkout(request()).await.unwrap();

        h.gateway.set_offline(true);
        let err = reconciler
            .reconcile_order(&session.gateway_order_ref)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);

        let report = reconciler
            .reconcile_stale(chrono::Duration::zero(), 10)
            .await
            .unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.examined, 1);
    }
}
