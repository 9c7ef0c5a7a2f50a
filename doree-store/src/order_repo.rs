use async_trait::async_trait;
use chrono::{DateTime, Utc};
use doree_order::models::{
    DeliveryStatus, LineItem, Order, ShippingAddress, TrackingEvent, TrackingInfo,
};
use doree_order::repository::{OrderRepository, PaymentSettlement, RepoError, RepoResult};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::repo_error;

const ORDER_COLUMNS: &str = "id, user_id, razorpay_order_id, razorpay_payment_id, amount, \
     shipping_amount, discount_amount, coupon_code, payment_status, delivery_status, items, \
     shipping_address, tracking_number, courier_name, estimated_delivery, tracking_updates, \
     created_at, updated_at";

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    razorpay_order_id: String,
    razorpay_payment_id: Option<String>,
    amount: i64,
    shipping_amount: i64,
    discount_amount: i64,
    coupon_code: Option<String>,
    payment_status: String,
    delivery_status: String,
    items: Json<Vec<LineItem>>,
    shipping_address: Json<ShippingAddress>,
    tracking_number: Option<String>,
    courier_name: Option<String>,
    estimated_delivery: Option<DateTime<Utc>>,
    tracking_updates: Json<Vec<TrackingEvent>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepoError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let corrupt = |e: doree_order::OrderError| RepoError::Corrupt(format!("order {}: {}", row.id, e));
        let payment_status = row.payment_status.parse().map_err(corrupt)?;
        let delivery_status = row.delivery_status.parse().map_err(corrupt)?;

        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            gateway_order_ref: row.razorpay_order_id,
            gateway_payment_ref: row.razorpay_payment_id,
            amount: row.amount,
            shipping_amount: row.shipping_amount,
            discount_amount: row.discount_amount,
            coupon_code: row.coupon_code,
            payment_status,
            delivery_status,
            items: row.items.0,
            shipping_address: row.shipping_address.0,
            tracking_number: row.tracking_number,
            courier_name: row.courier_name,
            estimated_delivery: row.estimated_delivery,
            tracking_updates: row.tracking_updates.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_orders(rows: Vec<OrderRow>) -> RepoResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, razorpay_order_id, razorpay_payment_id, amount,
                                shipping_amount, discount_amount, coupon_code, payment_status,
                                delivery_status, items, shipping_address, tracking_updates,
                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id)
        .bind(&order.user_id)
        .bind(&order.gateway_order_ref)
        .bind(&order.gateway_payment_ref)
        .bind(order.amount)
        .bind(order.shipping_amount)
        .bind(order.discount_amount)
        .bind(&order.coupon_code)
        .bind(order.payment_status.as_str())
        .bind(order.delivery_status.as_str())
        .bind(Json(&order.items))
        .bind(Json(&order.shipping_address))
        .bind(Json(&order.tracking_updates))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Order>> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(repo_error)?;

        row.map(Order::try_from).transpose()
    }

    async fn get_by_gateway_ref(&self, gateway_order_ref: &str) -> RepoResult<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE razorpay_order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(gateway_order_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_error)?;

        row.map(Order::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> RepoResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(repo_error)?;

        into_orders(rows)
    }

    async fn list_all(&self, delivery_status: Option<DeliveryStatus>) -> RepoResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE ($1::text IS NULL OR delivery_status = $1) \
             ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(delivery_status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(repo_error)?;

        into_orders(rows)
    }

    async fn list_pending_before(&self, cutoff: DateTime<Utc>, limit: usize) -> RepoResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders WHERE payment_status = 'pending' AND created_at < $1 \
             ORDER BY created_at ASC LIMIT $2",
            ORDER_COLUMNS
        ))
        .bind(cutoff)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(repo_error)?;

        into_orders(rows)
    }

    async fn settle_payment(
        &self,
        gateway_order_ref: &str,
        settlement: &PaymentSettlement,
    ) -> RepoResult<bool> {
        // Single statement: the pending guard and the optional cancellation
        // event land together or not at all. The event is clamped to the
        // latest stored entry as of this write.
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payment_status = $2,
                razorpay_payment_id = COALESCE($3, razorpay_payment_id),
                delivery_status = CASE
                    WHEN $4::jsonb IS NULL OR delivery_status IN ('cancelled', 'returned')
                        THEN delivery_status
                    ELSE $4::jsonb ->> 'status'
                END,
                tracking_updates = CASE
                    WHEN $4::jsonb IS NULL OR delivery_status IN ('cancelled', 'returned')
                        THEN tracking_updates
                    WHEN (tracking_updates -> -1 ->> 'timestamp')::timestamptz
                        > ($4::jsonb ->> 'timestamp')::timestamptz
                        THEN tracking_updates || jsonb_build_array(
                            jsonb_set($4::jsonb, '{timestamp}', tracking_updates -> -1 -> 'timestamp')
                        )
                    ELSE tracking_updates || jsonb_build_array($4::jsonb)
                END,
                updated_at = $5
            WHERE razorpay_order_id = $1 AND payment_status = 'pending'
            "#,
        )
        .bind(gateway_order_ref)
        .bind(settlement.status.as_str())
        .bind(&settlement.gateway_payment_ref)
        .bind(settlement.delivery_event.as_ref().map(Json))
        .bind(settlement.settled_at)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_delivery_event(
        &self,
        id: Uuid,
        expected: DeliveryStatus,
        event: &TrackingEvent,
    ) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET delivery_status = $3,
                tracking_updates = tracking_updates || jsonb_build_array($4::jsonb),
                updated_at = $5
            WHERE id = $1 AND delivery_status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(event.status.as_str())
        .bind(Json(event))
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_tracking_info(
        &self,
        id: Uuid,
        info: &TrackingInfo,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET tracking_number = $2, courier_name = $3, estimated_delivery = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&info.tracking_number)
        .bind(&info.courier_name)
        .bind(info.estimated_delivery)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(result.rows_affected() == 1)
    }
}
