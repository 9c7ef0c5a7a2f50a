use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An order registered with the payment gateway; the id is what the checkout widget opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayOrder {
    pub id: String, // Provider's ID (e.g., order_Nx1...)
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub created_at: DateTime<Utc>,
}

/// The gateway's own view of an order, used by reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayOrderStatus {
    /// Created or attempted, no captured payment yet.
    Pending,
    Paid { payment_ref: String },
    Failed { reason: Option<String> },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway unreachable: {0}")]
    Unreachable(String),
    #[error("Payment gateway did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),
    #[error("Unknown gateway order: {0}")]
    UnknownOrder(String),
}

impl GatewayError {
    /// Transport-level failures; the request may not have reached the gateway.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unreachable(_) | GatewayError::Timeout(_))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Register an order for `amount` minor units; the caller opens the checkout widget with its id
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError>;

    /// Retrieve the gateway-side payment state of an order
    async fn fetch_order_status(
        &self,
        gateway_order_ref: &str,
    ) -> Result<GatewayOrderStatus, GatewayError>;
}
