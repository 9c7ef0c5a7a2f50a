use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use doree_core::{GatewayError, GatewayOrder, GatewayOrderStatus, PaymentGateway};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.razorpay.com";

/// Razorpay Orders API over HTTPS with basic auth.
pub struct RazorpayGateway {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    timeout: Duration,
}

impl RazorpayGateway {
    pub fn new(base_url: &str, key_id: &str, key_secret: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            timeout,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Unreachable(err.to_string())
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        resp: Response,
        gateway_order_ref: Option<&str>,
    ) -> Result<T, GatewayError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Rejected(format!("unreadable gateway response: {}", e)));
        }

        let description = resp
            .json::<ErrorEnvelope>()
            .await
            .ok()
            .and_then(|body| body.error.description);
        Err(classify_failure(status, description, gateway_order_ref))
    }
}

impl std::fmt::Debug for RazorpayGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayGateway")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
    /// Unix seconds
    created_at: i64,
}

#[derive(Debug, Deserialize)]
struct PaymentCollection {
    #[serde(default)]
    items: Vec<PaymentEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    /// `created`, `authorized`, `captured`, `refunded` or `failed`
    pub status: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    description: Option<String>,
}

/// Fold an order's payment attempts into one verdict.
///
/// Any captured payment settles the order. It only counts as failed once
/// every attempt failed; an authorized payment is still awaiting capture.
pub fn status_from_payments(payments: &[PaymentEntity]) -> GatewayOrderStatus {
    if let Some(paid) = payments
        .iter()
        .find(|p| p.status == "captured" || p.status == "refunded")
    {
        return GatewayOrderStatus::Paid {
            payment_ref: paid.id.clone(),
        };
    }

    if !payments.is_empty() && payments.iter().all(|p| p.status == "failed") {
        return GatewayOrderStatus::Failed {
            reason: payments.last().and_then(|p| p.error_description.clone()),
        };
    }

    GatewayOrderStatus::Pending
}

fn classify_failure(
    status: StatusCode,
    description: Option<String>,
    gateway_order_ref: Option<&str>,
) -> GatewayError {
    let detail = description.unwrap_or_else(|| status.to_string());
    match (status, gateway_order_ref) {
        (StatusCode::NOT_FOUND, Some(order_ref)) => GatewayError::UnknownOrder(order_ref.to_string()),
        (StatusCode::TOO_MANY_REQUESTS, _) => GatewayError::Unreachable(detail),
        (s, _) if s.is_server_error() => GatewayError::Unreachable(detail),
        _ => GatewayError::Rejected(detail),
    }
}

fn unix_time(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderBody {
                amount,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let order: OrderEntity = self.read_json(resp, None).await?;
        tracing::info!(gateway_order_ref = %order.id, amount = order.amount, "Razorpay order created");

        Ok(GatewayOrder {
            id: order.id,
            amount: order.amount,
            currency: order.currency,
            receipt: order.receipt.unwrap_or_else(|| receipt.to_string()),
            created_at: unix_time(order.created_at),
        })
    }

    async fn fetch_order_status(
        &self,
        gateway_order_ref: &str,
    ) -> Result<GatewayOrderStatus, GatewayError> {
        // refs are interpolated into the path
        let well_formed = !gateway_order_ref.is_empty()
            && gateway_order_ref
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !well_formed {
            return Err(GatewayError::UnknownOrder(gateway_order_ref.to_string()));
        }

        let resp = self
            .client
            .get(format!("{}/v1/orders/{}/payments", self.base_url, gateway_order_ref))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let payments: PaymentCollection = self.read_json(resp, Some(gateway_order_ref)).await?;
        Ok(status_from_payments(&payments.items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};

    fn payment(id: &str, status: &str) -> PaymentEntity {
        PaymentEntity {
            id: id.to_string(),
            status: status.to_string(),
            error_description: None,
        }
    }

    #[test]
    fn test_status_from_payment_attempts() {
        assert_eq!(status_from_payments(&[]), GatewayOrderStatus::Pending);
        assert_eq!(
            status_from_payments(&[payment("pay_1", "failed"), payment("pay_2", "authorized")]),
            GatewayOrderStatus::Pending
        );
        assert_eq!(
            status_from_payments(&[payment("pay_1", "failed"), payment("pay_2", "captured")]),
            GatewayOrderStatus::Paid {
                payment_ref: "pay_2".to_string()
            }
        );

        let mut declined = payment("pay_3", "failed");
        declined.error_description = Some("Card declined by bank".to_string());
        assert_eq!(
            status_from_payments(&[payment("pay_1", "failed"), declined]),
            GatewayOrderStatus::Failed {
                reason: Some("Card declined by bank".to_string())
            }
        );
    }

    #[test]
    fn test_http_failures_classified() {
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, None, Some("order_x")),
            GatewayError::UnknownOrder(r) if r == "order_x"
        ));
        assert!(classify_failure(StatusCode::BAD_GATEWAY, None, None).is_transient());
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, None, None).is_transient());
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, Some("amount too small".into()), None),
            GatewayError::Rejected(d) if d == "amount too small"
        ));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fake_razorpay() -> Router {
        Router::new()
            .route(
                "/v1/orders",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    if !headers.contains_key("authorization") {
                        return (AxumStatus::UNAUTHORIZED, Json(json!({"error": {"description": "auth"}})));
                    }
                    if body["amount"].as_i64().unwrap_or(0) < 100 {
                        return (
                            AxumStatus::BAD_REQUEST,
                            Json(json!({"error": {"code": "BAD_REQUEST_ERROR", "description": "Order amount less than minimum amount allowed"}})),
                        );
                    }
                    (
                        AxumStatus::OK,
                        Json(json!({
                            "id": "order_TEST123",
                            "entity": "order",
                            "amount": body["amount"],
                            "currency": body["currency"],
                            "receipt": body["receipt"],
                            "status": "created",
                            "created_at": 1_760_000_000
                        })),
                    )
                }),
            )
            .route(
                "/v1/orders/{id}/payments",
                get(|Path(id): Path<String>| async move {
                    match id.as_str() {
                        "order_PAID" => (
                            AxumStatus::OK,
                            Json(json!({"entity": "collection", "count": 1, "items": [
                                {"id": "pay_OK", "entity": "payment", "status": "captured", "error_description": null}
                            ]})),
                        ),
                        "order_OPEN" => (
                            AxumStatus::OK,
                            Json(json!({"entity": "collection", "count": 0, "items": []})),
                        ),
                        "order_FLAKY" => (
                            AxumStatus::SERVICE_UNAVAILABLE,
                            Json(json!({"error": {"description": "try later"}})),
                        ),
                        _ => (
                            AxumStatus::NOT_FOUND,
                            Json(json!({"error": {"description": "The id provided does not exist"}})),
                        ),
                    }
                }),
            )
    }

    #[tokio::test]
    async fn test_create_and_poll_against_http_api() {
        let base = serve(fake_razorpay()).await;
        let gateway = RazorpayGateway::new(&base, "rzp_test_key", "secret", Duration::from_secs(2));

        let order = gateway.create_order(90_000, "INR", "rcpt_1").await.unwrap();
        assert_eq!(order.id, "order_TEST123");
        assert_eq!(order.amount, 90_000);
        assert_eq!(order.receipt, "rcpt_1");
        assert_eq!(order.created_at.timestamp(), 1_760_000_000);

        let rejected = gateway.create_order(50, "INR", "rcpt_2").await.unwrap_err();
        assert!(matches!(rejected, GatewayError::Rejected(d) if d.contains("minimum amount")));

        assert_eq!(
            gateway.fetch_order_status("order_PAID").await.unwrap(),
            GatewayOrderStatus::Paid {
                payment_ref: "pay_OK".to_string()
            }
        );
        assert_eq!(
            gateway.fetch_order_status("order_OPEN").await.unwrap(),
            GatewayOrderStatus::Pending
        );
        assert!(gateway.fetch_order_status("order_FLAKY").await.unwrap_err().is_transient());
        assert!(matches!(
            gateway.fetch_order_status("order_GONE").await,
            Err(GatewayError::UnknownOrder(_))
        ));
        assert!(matches!(
            gateway.fetch_order_status("../admin").await,
            Err(GatewayError::UnknownOrder(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let gateway = RazorpayGateway::new("http://127.0.0.1:9", "k", "s", Duration::from_millis(500));
        let err = gateway.create_order(10_000, "INR", "rcpt_3").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_debug_hides_secret() {
        let gateway = RazorpayGateway::new(DEFAULT_API_BASE_URL, "rzp_live_key", "very-secret", Duration::from_secs(1));
        let printed = format!("{:?}", gateway);
        assert!(printed.contains("rzp_live_key"));
        assert!(!printed.contains("very-secret"));
    }
}
