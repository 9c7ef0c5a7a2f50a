use async_trait::async_trait;
use chrono::{DateTime, Utc};
use doree_shared::OrderEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::coupon::Coupon;
use crate::models::{DeliveryStatus, Order, PaymentStatus, TrackingEvent, TrackingInfo};
use crate::repository::{
    CouponRepository, EventPublisher, OrderRepository, PaymentSettlement, PublishError, RepoError,
    RepoResult, UsageCommit,
};

/// Order repository held in process memory. Every conditional write runs
/// under the write lock, so it behaves like the single-statement SQL update.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
    offline: AtomicBool,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a datastore outage; every call fails as unavailable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> RepoResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepoError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> RepoResult<()> {
        self.check_online()?;
        let mut orders = self.orders.write().await;
        if orders
            .values()
            .any(|o| o.gateway_order_ref == order.gateway_order_ref)
        {
            return Err(RepoError::Duplicate(format!(
                "gateway order {}",
                order.gateway_order_ref
            )));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Order>> {
        self.check_online()?;
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn get_by_gateway_ref(&self, gateway_order_ref: &str) -> RepoResult<Option<Order>> {
        self.check_online()?;
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.gateway_order_ref == gateway_order_ref)
            .cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> RepoResult<Vec<Order>> {
        self.check_online()?;
        let orders = self.orders.read().await;
        Ok(newest_first(
            orders.values().filter(|o| o.user_id == user_id).cloned().collect(),
        ))
    }

    async fn list_all(&self, delivery_status: Option<DeliveryStatus>) -> RepoResult<Vec<Order>> {
        self.check_online()?;
        let orders = self.orders.read().await;
        Ok(newest_first(
            orders
                .values()
                .filter(|o| delivery_status.map_or(true, |s| o.delivery_status == s))
                .cloned()
                .collect(),
        ))
    }

    async fn list_pending_before(&self, cutoff: DateTime<Utc>, limit: usize) -> RepoResult<Vec<Order>> {
        self.check_online()?;
        let orders = self.orders.read().await;
        let mut stale: Vec<Order> = orders
            .values()
            .filter(|o| o.payment_status == PaymentStatus::Pending && o.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn settle_payment(
        &self,
        gateway_order_ref: &str,
        settlement: &PaymentSettlement,
    ) -> RepoResult<bool> {
        self.check_online()?;
        let mut orders = self.orders.write().await;
        let Some(order) = orders
            .values_mut()
            .find(|o| o.gateway_order_ref == gateway_order_ref)
        else {
            return Ok(false);
        };

        if order.payment_status != PaymentStatus::Pending {
            return Ok(false);
        }

        order.payment_status = settlement.status;
        if settlement.gateway_payment_ref.is_some() {
            order.gateway_payment_ref = settlement.gateway_payment_ref.clone();
        }
        if let Some(event) = &settlement.delivery_event {
            if !order.delivery_status.is_absorbing() {
                let mut event = event.clone();
                // never land before an entry recorded since the caller's read
                if let Some(last) = order.last_tracking_timestamp() {
                    event.timestamp = event.timestamp.max(last);
                }
                order.delivery_status = event.status;
                order.tracking_updates.push(event);
            }
        }
        order.updated_at = settlement.settled_at;
        Ok(true)
    }

    async fn append_delivery_event(
        &self,
        id: Uuid,
        expected: DeliveryStatus,
        event: &TrackingEvent,
    ) -> RepoResult<bool> {
        self.check_online()?;
        let mut orders = self.orders.write().await;
        match orders.get_mut(&id) {
            Some(order) if order.delivery_status == expected => {
                order.delivery_status = event.status;
                order.tracking_updates.push(event.clone());
                order.updated_at = event.timestamp;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_tracking_info(
        &self,
        id: Uuid,
        info: &TrackingInfo,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<bool> {
        self.check_online()?;
        let mut orders = self.orders.write().await;
        let Some(order) = orders.get_mut(&id) else {
            return Ok(false);
        };
        order.tracking_number = Some(info.tracking_number.clone());
        order.courier_name = Some(info.courier_name.clone());
        order.estimated_delivery = info.estimated_delivery;
        order.updated_at = updated_at;
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryCouponRepository {
    coupons: RwLock<HashMap<Uuid, Coupon>>,
}

impl InMemoryCouponRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CouponRepository for InMemoryCouponRepository {
    async fn find_active(&self, code: &str) -> RepoResult<Option<Coupon>> {
        Ok(self
            .coupons
            .read()
            .await
            .values()
            .find(|c| c.code == code && c.is_active)
            .cloned())
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Coupon>> {
        Ok(self.coupons.read().await.get(&id).cloned())
    }

    async fn list(&self) -> RepoResult<Vec<Coupon>> {
        let mut coupons: Vec<Coupon> = self.coupons.read().await.values().cloned().collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(coupons)
    }

    async fn insert(&self, coupon: &Coupon) -> RepoResult<()> {
        let mut coupons = self.coupons.write().await;
        if coupons.values().any(|c| c.code == coupon.code) {
            return Err(RepoError::Duplicate(format!("coupon {}", coupon.code)));
        }
        coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> RepoResult<bool> {
        let mut coupons = self.coupons.write().await;
        Ok(coupons
            .get_mut(&id)
            .map(|c| c.is_active = is_active)
            .is_some())
    }

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.coupons.write().await.remove(&id).is_some())
    }

    async fn increment_usage(&self, code: &str) -> RepoResult<UsageCommit> {
        let mut coupons = self.coupons.write().await;
        let Some(coupon) = coupons.values_mut().find(|c| c.code == code) else {
            return Ok(UsageCommit::NotFound);
        };
        if coupon.is_exhausted() {
            return Ok(UsageCommit::LimitReached);
        }
        coupon.used_count += 1;
        Ok(UsageCommit::Committed(coupon.clone()))
    }
}

/// Publisher that keeps every event, for tests and local inspection.
#[derive(Default)]
pub struct RecordingPublisher {
    events: RwLock<Vec<OrderEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<OrderEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}
