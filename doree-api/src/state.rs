use async_trait::async_trait;
use doree_core::SignatureVerifier;
use doree_order::repository::{EventPublisher, PublishError};
use doree_order::{CheckoutOrchestrator, CouponAdmin, OrderStore, Reconciler};
use doree_shared::OrderEvent;
use doree_store::app_config::RateLimitConfig;
use doree_store::RedisClient;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::metrics::Metrics;
use crate::middleware::ResiliencyState;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub store: OrderStore,
    pub checkout: CheckoutOrchestrator,
    pub reconciler: Reconciler,
    pub coupon_admin: CouponAdmin,
    pub webhook_verifier: SignatureVerifier,
    /// `None` runs without rate limiting or webhook de-duplication
    pub redis: Option<Arc<RedisClient>>,
    pub sse_tx: broadcast::Sender<OrderEvent>,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub resiliency: Arc<ResiliencyState>,
    pub metrics: Arc<Metrics>,
}

/// Forwards lifecycle events to live-tracking subscribers, then to the bus.
pub struct BroadcastPublisher {
    sse_tx: broadcast::Sender<OrderEvent>,
    downstream: Arc<dyn EventPublisher>,
}

impl BroadcastPublisher {
    pub fn new(sse_tx: broadcast::Sender<OrderEvent>, downstream: Arc<dyn EventPublisher>) -> Self {
        Self { sse_tx, downstream }
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        // No subscribers is not an error
        let _ = self.sse_tx.send(event.clone());
        self.downstream.publish(event).await
    }
}
