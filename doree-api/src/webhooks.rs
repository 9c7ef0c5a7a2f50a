use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use doree_order::{ErrorKind, PaymentStatus, PaymentUpdate};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";
pub const EVENT_ID_HEADER: &str = "x-razorpay-event-id";

/// Deliveries are remembered this long for de-duplication
const DEDUPE_TTL_SECONDS: u64 = 24 * 60 * 60;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/razorpay", post(handle_razorpay_webhook))
}

#[derive(Debug, Deserialize)]
pub struct RazorpayWebhook {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<Wrapped<PaymentEntity>>,
    pub order: Option<Wrapped<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
pub struct Wrapped<T> {
    pub entity: T,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderEntity {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

impl WebhookAck {
    fn new(status: &'static str) -> (StatusCode, Json<Self>) {
        (StatusCode::OK, Json(Self { status }))
    }
}

impl RazorpayWebhook {
    fn gateway_order_ref(&self) -> Option<&str> {
        self.payload
            .payment
            .as_ref()
            .and_then(|p| p.entity.order_id.as_deref())
            .or_else(|| self.payload.order.as_ref().map(|o| o.entity.id.as_str()))
    }

    /// The payment update this event implies, if it implies one
    fn payment_update(&self) -> Option<PaymentUpdate> {
        let payment = self.payload.payment.as_ref().map(|p| &p.entity);
        match self.event.as_str() {
            "payment.captured" | "order.paid" => {
                payment.map(|p| PaymentUpdate::paid(p.id.clone()))
            }
            "payment.failed" => Some(PaymentUpdate::failed(
                payment.and_then(|p| p.error_description.clone()),
            )),
            _ => None,
        }
    }
}

/// POST /v1/webhooks/razorpay
///
/// Server-to-server payment notifications. The signature covers the raw
/// body, so it is checked before any parsing. Replays and outcomes that
/// conflict with what is already recorded are acknowledged with 200 so the
/// gateway stops retrying; only storage failures ask for a retry.
pub async fn handle_razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());
    if state.webhook_verifier.verify_webhook(&body, signature).is_err() {
        record(&state, "unknown", "bad_signature");
        tracing::warn!("Rejected webhook with missing or invalid signature");
        return Err(AppError::ValidationError("Invalid webhook signature".to_string()));
    }

    let webhook: RazorpayWebhook = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError(format!("Malformed webhook payload: {}", e)))?;
    tracing::info!(event = %webhook.event, "Received payment webhook");

    let (Some(update), Some(gateway_order_ref)) =
        (webhook.payment_update(), webhook.gateway_order_ref())
    else {
        record(&state, &webhook.event, "ignored");
        return Ok(WebhookAck::new("ignored"));
    };

    let event_id = headers.get(EVENT_ID_HEADER).and_then(|h| h.to_str().ok());
    if let (Some(redis), Some(event_id)) = (state.redis.as_ref(), event_id) {
        match redis.claim_webhook_delivery(event_id, DEDUPE_TTL_SECONDS).await {
            Ok(true) => {}
            Ok(false) => {
                record(&state, &webhook.event, "duplicate");
                return Ok(WebhookAck::new("duplicate"));
            }
            // The store is idempotent on its own; de-duplication only saves work
            Err(e) => tracing::warn!(error = %e, "Webhook de-duplication unavailable"),
        }
    }

    let outcome = PaymentStatus::from(update.outcome);
    match state.store.finalize_payment(gateway_order_ref, update).await {
        Ok(order) => {
            record(&state, &webhook.event, "processed");
            state
                .metrics
                .payments_finalized
                .with_label_values(&[outcome.as_str(), "webhook"])
                .inc();
            tracing::info!(
                order_id = %order.id,
                gateway_order_ref,
                status = %order.payment_status,
                "Payment finalized via webhook"
            );
            Ok(WebhookAck::new("processed"))
        }
        Err(e) if matches!(e.kind(), ErrorKind::Conflict | ErrorKind::NotFound) => {
            record(&state, &webhook.event, "rejected");
            tracing::warn!(gateway_order_ref, error = %e, "Webhook outcome not applied");
            Ok(WebhookAck::new("rejected"))
        }
        Err(e) => {
            record(&state, &webhook.event, "error");
            if let (Some(redis), Some(event_id)) = (state.redis.as_ref(), event_id) {
                // Let the gateway's retry through
                if let Err(release_err) = redis.release_webhook_delivery(event_id).await {
                    tracing::warn!(error = %release_err, "Could not release webhook claim");
                }
            }
            Err(e.into())
        }
    }
}

fn record(state: &AppState, event: &str, result: &str) {
    state
        .metrics
        .webhook_events
        .with_label_values(&[event, result])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use doree_order::PaymentOutcome;

    fn parse(json: &str) -> RazorpayWebhook {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_captured_payment_maps_to_paid() {
        let webhook = parse(
            r#"{"event":"payment.captured","payload":{"payment":{"entity":{"id":"pay_1","order_id":"order_1","status":"captured"}}}}"#,
        );
        let update = webhook.payment_update().unwrap();
        assert_eq!(update.outcome, PaymentOutcome::Paid);
        assert_eq!(update.gateway_payment_ref.as_deref(), Some("pay_1"));
        assert_eq!(webhook.gateway_order_ref(), Some("order_1"));
    }

    #[test]
    fn test_failed_payment_carries_reason() {
        let webhook = parse(
            r#"{"event":"payment.failed","payload":{"payment":{"entity":{"id":"pay_2","order_id":"order_2","error_description":"Card declined"}}}}"#,
        );
        let update = webhook.payment_update().unwrap();
        assert_eq!(update.outcome, PaymentOutcome::Failed);
        assert_eq!(update.reason.as_deref(), Some("Card declined"));
    }

    #[test]
    fn test_order_ref_falls_back_to_order_entity() {
        let webhook = parse(
            r#"{"event":"order.paid","payload":{"payment":{"entity":{"id":"pay_3"}},"order":{"entity":{"id":"order_3"}}}}"#,
        );
        assert_eq!(webhook.gateway_order_ref(), Some("order_3"));
        assert!(webhook.payment_update().is_some());
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        let webhook = parse(r#"{"event":"refund.created","payload":{}}"#);
        assert!(webhook.payment_update().is_none());
    }
}
