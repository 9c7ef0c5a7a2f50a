use axum::{
    extract::State,
    routing::post,
    Extension, Json, Router,
};
use doree_order::orchestrator::CheckoutFailure;
use doree_order::{
    CheckoutRequest, CheckoutSession, CouponQuote, ErrorKind, LineItem, Order, OrderError,
    PaymentCallback, ShippingAddress,
};
use doree_shared::pii::redact_email;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::CustomerClaims;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/coupons/validate", post(validate_coupon))
        .route("/v1/checkout", post(begin_checkout))
        .route("/v1/checkout/confirm", post(confirm_payment))
        .route("/v1/checkout/failure", post(report_failure))
}

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    pub code: String,
    /// Cart subtotal in paise
    pub subtotal: i64,
}

#[derive(Debug, Serialize)]
pub struct ValidateCouponResponse {
    pub valid: bool,
    #[serde(flatten)]
    pub quote: CouponQuote,
}

/// POST /v1/coupons/validate
async fn validate_coupon(
    State(state): State<AppState>,
    Json(req): Json<ValidateCouponRequest>,
) -> Result<Json<ValidateCouponResponse>, AppError> {
    if req.subtotal < 0 {
        return Err(AppError::ValidationError("subtotal cannot be negative".to_string()));
    }
    let quote = state.store.coupons().evaluate(&req.code, req.subtotal).await?;
    Ok(Json(ValidateCouponResponse { valid: true, quote }))
}

#[derive(Debug, Deserialize)]
pub struct BeginCheckoutRequest {
    pub items: Vec<LineItem>,
    pub shipping_address: ShippingAddress,
    pub coupon_code: Option<String>,
}

/// POST /v1/checkout
async fn begin_checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<BeginCheckoutRequest>,
) -> Result<Json<CheckoutSession>, AppError> {
    tracing::info!(
        user_id = %claims.sub,
        email = %redact_email(&req.shipping_address.email),
        items = req.items.len(),
        "Checkout requested"
    );

    let result = state
        .checkout
        .begin_checkout(CheckoutRequest {
            user_id: claims.sub,
            items: req.items,
            shipping_address: req.shipping_address,
            coupon_code: req.coupon_code,
        })
        .await;

    match result {
        Ok(session) => {
            state.metrics.checkouts_started.inc();
            Ok(Json(session))
        }
        Err(e) => {
            state
                .metrics
                .checkout_failures
                .with_label_values(&[kind_label(&e)])
                .inc();
            Err(e.into())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmationResponse {
    pub order: Order,
    /// The cart lives client-side; this tells the client to empty it
    pub clear_cart: bool,
}

/// POST /v1/checkout/confirm
async fn confirm_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<ConfirmationResponse>, AppError> {
    ensure_owner(&state, &claims, &callback.gateway_order_ref).await?;

    let order = state.checkout.complete_checkout(callback).await?;
    state
        .metrics
        .payments_finalized
        .with_label_values(&["paid", "callback"])
        .inc();

    Ok(Json(ConfirmationResponse {
        order,
        clear_cart: true,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PaymentFailureRequest {
    pub gateway_order_ref: String,
    pub description: Option<String>,
}

/// POST /v1/checkout/failure
async fn report_failure(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<PaymentFailureRequest>,
) -> Result<Json<CheckoutFailure>, AppError> {
    ensure_owner(&state, &claims, &req.gateway_order_ref).await?;

    let failure = state
        .checkout
        .fail_checkout(&req.gateway_order_ref, req.description)
        .await?;
    state
        .metrics
        .payments_finalized
        .with_label_values(&["failed", "callback"])
        .inc();

    Ok(Json(failure))
}

/// Callbacks may only settle the caller's own orders
async fn ensure_owner(
    state: &AppState,
    claims: &CustomerClaims,
    gateway_order_ref: &str,
) -> Result<(), AppError> {
    match state.store.get_by_gateway_ref(gateway_order_ref).await? {
        Some(order) if order.user_id == claims.sub => Ok(()),
        _ => Err(AppError::NotFoundError(format!(
            "Order not found: gateway order {}",
            gateway_order_ref
        ))),
    }
}

fn kind_label(err: &OrderError) -> &'static str {
    match err.kind() {
        ErrorKind::Validation => "validation",
        ErrorKind::Conflict => "conflict",
        ErrorKind::NotFound => "not_found",
        ErrorKind::External => "external",
        ErrorKind::Storage => "storage",
    }
}
