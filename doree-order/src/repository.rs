use async_trait::async_trait;
use chrono::{DateTime, Utc};
use doree_shared::OrderEvent;
use uuid::Uuid;

use crate::coupon::Coupon;
use crate::models::{DeliveryStatus, Order, PaymentStatus, TrackingEvent, TrackingInfo};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepoError {
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    #[error("Datastore unavailable: {0}")]
    Unavailable(String),
    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// The write that settles an order's payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSettlement {
    pub status: PaymentStatus,
    pub gateway_payment_ref: Option<String>,
    /// Delivery event recorded in the same write (a failed payment cancels the order).
    /// Skipped when delivery already sits in an absorbing state. Its timestamp is
    /// raised to the last stored entry's when that one is later.
    pub delivery_event: Option<TrackingEvent>,
    pub settled_at: DateTime<Utc>,
}

/// Result of the conditional coupon usage increment.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageCommit {
    Committed(Coupon),
    LimitReached,
    NotFound,
}

/// Repository trait for order data access
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new order; a reused gateway reference is `RepoError::Duplicate`
    async fn insert(&self, order: &Order) -> RepoResult<()>;

    async fn get(&self, id: Uuid) -> RepoResult<Option<Order>>;

    async fn get_by_gateway_ref(&self, gateway_order_ref: &str) -> RepoResult<Option<Order>>;

    /// Orders of one customer, newest first
    async fn list_for_user(&self, user_id: &str) -> RepoResult<Vec<Order>>;

    /// Console listing, newest first, optionally filtered by delivery status
    async fn list_all(&self, delivery_status: Option<DeliveryStatus>) -> RepoResult<Vec<Order>>;

    /// Payment-pending orders created before `cutoff`, oldest first
    async fn list_pending_before(&self, cutoff: DateTime<Utc>, limit: usize) -> RepoResult<Vec<Order>>;

    /// Settle payment iff the order is still pending. `false` means another writer got there first.
    async fn settle_payment(
        &self,
        gateway_order_ref: &str,
        settlement: &PaymentSettlement,
    ) -> RepoResult<bool>;

    /// Append a tracking event and move delivery status iff it still equals `expected`
    async fn append_delivery_event(
        &self,
        id: Uuid,
        expected: DeliveryStatus,
        event: &TrackingEvent,
    ) -> RepoResult<bool>;

    /// Overwrite courier metadata; `false` when the order does not exist
    async fn update_tracking_info(
        &self,
        id: Uuid,
        info: &TrackingInfo,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<bool>;
}

/// Repository trait for coupon data access
#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Active coupon by normalized code
    async fn find_active(&self, code: &str) -> RepoResult<Option<Coupon>>;

    async fn get(&self, id: Uuid) -> RepoResult<Option<Coupon>>;

    /// All coupons, newest first
    async fn list(&self) -> RepoResult<Vec<Coupon>>;

    /// A reused code is `RepoError::Duplicate`
    async fn insert(&self, coupon: &Coupon) -> RepoResult<()>;

    async fn set_active(&self, id: Uuid, is_active: bool) -> RepoResult<bool>;

    async fn delete(&self, id: Uuid) -> RepoResult<bool>;

    /// Increment `used_count` by one, re-checking `usage_limit` inside the same write
    async fn increment_usage(&self, code: &str) -> RepoResult<UsageCommit>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to publish {topic}: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

/// Outbound lifecycle notifications. Delivery is best-effort.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError>;
}
