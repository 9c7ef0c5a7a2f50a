use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use doree_order::reconcile::Reconciliation;
use doree_order::{Coupon, DeliveryCommand, DeliveryStatus, NewCoupon, Order, TrackingInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::AdminClaims;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/orders", get(list_orders))
        .route("/v1/admin/orders/{id}", get(get_order))
        .route("/v1/admin/orders/{id}/delivery", post(update_delivery))
        .route("/v1/admin/orders/{id}/tracking", put(update_tracking))
        .route("/v1/admin/orders/{id}/reconcile", post(reconcile_order))
        .route("/v1/admin/coupons", get(list_coupons).post(create_coupon))
        .route(
            "/v1/admin/coupons/{id}",
            patch(toggle_coupon).delete(delete_coupon),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<DeliveryStatus>,
}

#[derive(Debug, Deserialize)]
pub struct DeliveryUpdateRequest {
    pub status: DeliveryStatus,
    pub message: String,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackingUpdateRequest {
    pub tracking_number: String,
    pub courier_name: String,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    /// `finalized`, `still_pending` or `already_settled`
    pub result: &'static str,
    pub order: Order,
}

#[derive(Debug, Deserialize)]
pub struct ToggleCouponRequest {
    pub is_active: bool,
}

// ============================================================================
// Order Handlers
// ============================================================================

/// GET /v1/admin/orders?status=shipped
async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let orders = state.store.list_all(query.status).await?;
    Ok(Json(orders))
}

/// GET /v1/admin/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.store.get_order(id).await?))
}

/// POST /v1/admin/orders/{id}/delivery
async fn update_delivery(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminClaims>,
    Path(id): Path<Uuid>,
    Json(req): Json<DeliveryUpdateRequest>,
) -> Result<Json<Order>, AppError> {
    let mut command = DeliveryCommand::new(req.status, req.message);
    if let Some(location) = req.location {
        command = command.at(location);
    }

    let order = state.store.transition_delivery(id, command).await?;
    state
        .metrics
        .delivery_transitions
        .with_label_values(&[order.delivery_status.as_str()])
        .inc();

    tracing::info!(
        order_id = %id,
        admin = %admin.sub,
        status = %order.delivery_status,
        "Delivery status updated by operator"
    );
    Ok(Json(order))
}

/// PUT /v1/admin/orders/{id}/tracking
async fn update_tracking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TrackingUpdateRequest>,
) -> Result<Json<Order>, AppError> {
    let info = TrackingInfo {
        tracking_number: req.tracking_number,
        courier_name: req.courier_name,
        estimated_delivery: req.estimated_delivery,
    };
    Ok(Json(state.store.update_tracking_info(id, info).await?))
}

/// POST /v1/admin/orders/{id}/reconcile
///
/// Asks the gateway for the payment outcome of an order stuck in pending.
async fn reconcile_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let order = state.store.get_order(id).await?;
    let outcome = state.reconciler.reconcile_order(&order.gateway_order_ref).await?;

    let (result, order) = match outcome {
        Reconciliation::Finalized(order) => ("finalized", order),
        Reconciliation::StillPending(order) => ("still_pending", order),
        Reconciliation::AlreadySettled(order) => ("already_settled", order),
    };
    let label = match result {
        "finalized" => order.payment_status.as_str(),
        other => other,
    };
    state
        .metrics
        .reconciled_orders
        .with_label_values(&[label])
        .inc();
    if result == "finalized" {
        state
            .metrics
            .payments_finalized
            .with_label_values(&[label, "reconcile"])
            .inc();
    }

    Ok(Json(ReconcileResponse { result, order }))
}

// ============================================================================
// Coupon Handlers
// ============================================================================

/// GET /v1/admin/coupons
async fn list_coupons(State(state): State<AppState>) -> Result<Json<Vec<Coupon>>, AppError> {
    Ok(Json(state.coupon_admin.list().await?))
}

/// POST /v1/admin/coupons
async fn create_coupon(
    State(state): State<AppState>,
    Json(req): Json<NewCoupon>,
) -> Result<(StatusCode, Json<Coupon>), AppError> {
    let coupon = state.coupon_admin.create(req).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

/// PATCH /v1/admin/coupons/{id}
async fn toggle_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ToggleCouponRequest>,
) -> Result<Json<Coupon>, AppError> {
    Ok(Json(state.coupon_admin.set_active(id, req.is_active).await?))
}

/// DELETE /v1/admin/coupons/{id}
async fn delete_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.coupon_admin.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
