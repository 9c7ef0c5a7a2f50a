use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use doree_order::delivery::{progress_fraction, step_index, StatusInfo, STATUS_TABLE};
use doree_order::{DeliveryStatus, Order, TrackingEvent};
use futures_util::stream::Stream;
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CustomerClaims;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", get(list_my_orders))
        .route("/v1/orders/{id}", get(get_my_order))
        .route("/v1/orders/{id}/tracking", get(get_tracking))
        .route("/v1/orders/{id}/stream", get(stream_order))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StepView {
    pub status: DeliveryStatus,
    pub label: &'static str,
    pub icon: &'static str,
    pub reached: bool,
    pub current: bool,
}

/// Everything the tracking page renders, derived from the status table.
#[derive(Debug, Serialize)]
pub struct TrackingView {
    pub order_id: Uuid,
    pub display_ref: String,
    pub status: &'static StatusInfo,
    /// `None` once the order is cancelled or returned
    pub progress: Option<f64>,
    pub steps: Vec<StepView>,
    pub events: Vec<TrackingEvent>,
    pub tracking_number: Option<String>,
    pub courier_name: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

impl TrackingView {
    pub fn for_order(order: &Order) -> Self {
        let current = order.delivery_status;
        // Absorbing orders show how far they got before leaving the chain
        let furthest = step_index(current).unwrap_or_else(|| {
            order
                .tracking_updates
                .iter()
                .filter_map(|e| step_index(e.status))
                .max()
                .unwrap_or(0)
        });

        let steps = STATUS_TABLE
            .iter()
            .filter_map(|info| {
                let step = info.step?;
                Some(StepView {
                    status: info.status,
                    label: info.label,
                    icon: info.icon,
                    reached: step <= furthest,
                    current: info.status == current,
                })
            })
            .collect();

        Self {
            order_id: order.id,
            display_ref: order.display_ref(),
            status: current.info(),
            progress: progress_fraction(current),
            steps,
            events: order.tracking_updates.clone(),
            tracking_number: order.tracking_number.clone(),
            courier_name: order.courier_name.clone(),
            estimated_delivery: order.estimated_delivery,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /v1/orders
async fn list_my_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
) -> Result<Json<Vec<Order>>, AppError> {
    let orders = state.store.list_for_user(&claims.sub).await?;
    Ok(Json(orders))
}

/// GET /v1/orders/{id}
async fn get_my_order(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = owned_order(&state, &claims, id).await?;
    Ok(Json(order))
}

/// GET /v1/orders/{id}/tracking
async fn get_tracking(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingView>, AppError> {
    let order = owned_order(&state, &claims, id).await?;
    Ok(Json(TrackingView::for_order(&order)))
}

/// GET /v1/orders/{id}/stream
///
/// Live lifecycle events for one order as server-sent events.
async fn stream_order(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    owned_order(&state, &claims, id).await?;

    let rx = state.sse_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.order_id() == id => {
            Some(Event::default().event(event.topic()).json_data(&event))
        }
        // Lagged receivers skip what they missed; the client can refetch
        _ => None,
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Other customers' orders are reported as missing, not forbidden
async fn owned_order(state: &AppState, claims: &CustomerClaims, id: Uuid) -> Result<Order, AppError> {
    let order = state.store.get_order(id).await?;
    if order.user_id != claims.sub {
        return Err(AppError::NotFoundError(format!("Order not found: {}", id)));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use doree_order::{DeliveryCommand, DeliveryStateMachine, LineItem, NewOrder, ShippingAddress};

    fn placed() -> Order {
        let draft = NewOrder {
            user_id: "user-1".to_string(),
            gateway_order_ref: "order_track".to_string(),
            amount: 150_000,
            shipping_address: ShippingAddress {
                first_name: "Asha".to_string(),
                last_name: "Verma".to_string(),
                email: "asha@example.com".to_string(),
                phone: "+91 98765 43210".to_string(),
                address: "12 MG Road".to_string(),
                city: "Jaipur".to_string(),
                state: "Rajasthan".to_string(),
                zip: "302001".to_string(),
            },
            items: vec![LineItem {
                product_id: "prod-kurta".to_string(),
                title: "Kurta".to_string(),
                unit_price: 150_000,
                quantity: 1,
                image: None,
                selected_size: Some("M".to_string()),
            }],
            coupon_code: None,
            discount_amount: 0,
        };
        Order::place(draft, 0).unwrap()
    }

    #[test]
    fn test_view_marks_steps_up_to_current() {
        let mut order = placed();
        DeliveryStateMachine::apply(&mut order, DeliveryCommand::new(DeliveryStatus::Shipped, "Handed to courier"))
            .unwrap();

        let view = TrackingView::for_order(&order);
        assert_eq!(view.steps.len(), 7);
        assert_eq!(view.status.label, "Shipped");
        assert_eq!(view.progress, Some(0.5));

        let reached: Vec<bool> = view.steps.iter().map(|s| s.reached).collect();
        assert_eq!(reached, vec![true, true, true, true, false, false, false]);
        assert!(view.steps[3].current);
        assert_eq!(view.events.len(), 1);
    }

    #[test]
    fn test_cancelled_view_has_no_progress() {
        let mut order = placed();
        DeliveryStateMachine::apply(&mut order, DeliveryCommand::new(DeliveryStatus::Confirmed, "Confirmed"))
            .unwrap();
        DeliveryStateMachine::apply(&mut order, DeliveryCommand::new(DeliveryStatus::Cancelled, "Customer request"))
            .unwrap();

        let view = TrackingView::for_order(&order);
        assert_eq!(view.progress, None);
        assert_eq!(view.status.label, "Cancelled");
        assert!(view.steps[1].reached);
        assert!(!view.steps[2].reached);
        assert!(view.steps.iter().all(|s| !s.current));
    }
}
