use async_trait::async_trait;
use chrono::Utc;
use doree_core::{
    CallPolicy, GatewayError, GatewayOrder, GatewayOrderStatus, PaymentGateway, SignatureVerifier,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::coupon::CouponQuote;
use crate::error::{OrderError, OrderResult};
use crate::models::{order_amount, subtotal, LineItem, NewOrder, Order, ShippingAddress};
use crate::store::{OrderStore, PaymentUpdate};

pub const GENERIC_PAYMENT_FAILURE: &str = "Payment could not be completed. Please try again.";

/// Merchant-side parameters handed to the client checkout widget.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub key_id: String,
    pub currency: String,
    pub merchant_name: String,
    pub theme_color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: String,
    pub items: Vec<LineItem>,
    pub shipping_address: ShippingAddress,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prefill {
    pub name: String,
    pub email: String,
    pub contact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Theme {
    pub color: String,
}

/// Everything the payment widget needs to open for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub order_id: Uuid,
    pub gateway_order_ref: String,
    pub key_id: String,
    pub amount: i64,
    pub currency: String,
    pub name: String,
    pub description: String,
    pub subtotal: i64,
    pub shipping_amount: i64,
    pub discount_amount: i64,
    pub coupon: Option<CouponQuote>,
    pub prefill: Prefill,
    pub theme: Theme,
}

/// Success handler payload returned by the widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub gateway_order_ref: String,
    pub gateway_payment_ref: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckoutFailure {
    pub order: Order,
    pub message: String,
}

/// Drives one checkout attempt across the coupon rules, the gateway and the store.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    store: OrderStore,
    gateway: Arc<dyn PaymentGateway>,
    verifier: SignatureVerifier,
    policy: CallPolicy,
    settings: CheckoutSettings,
}

impl CheckoutOrchestrator {
    pub fn new(
        store: OrderStore,
        gateway: Arc<dyn PaymentGateway>,
        verifier: SignatureVerifier,
        policy: CallPolicy,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            verifier,
            policy,
            settings,
        }
    }

    /// Price the cart, open a gateway order and persist the pending order.
    /// Nothing is shown to the customer unless all three succeed.
    pub async fn begin_checkout(&self, request: CheckoutRequest) -> OrderResult<CheckoutSession> {
        let subtotal = subtotal(&request.items)?;
        let shipping_amount = self.store.shipping_amount();

        let coupon = match request
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            Some(code) => Some(self.store.coupons().evaluate(code, subtotal).await?),
            None => None,
        };
        let discount_amount = coupon.as_ref().map_or(0, |q| q.discount_amount);
        let amount = order_amount(subtotal, shipping_amount, discount_amount)?;

        let mut draft = NewOrder {
            user_id: request.user_id,
            gateway_order_ref: String::new(),
            amount,
            shipping_address: request.shipping_address,
            items: request.items,
            coupon_code: coupon.as_ref().map(|q| q.code.clone()),
            discount_amount,
        };

        // Reject a malformed cart before the gateway sees it
        draft.gateway_order_ref = "preflight".to_string();
        Order::place(draft.clone(), shipping_amount)?;

        let receipt = format!("rcpt_{}", &Uuid::new_v4().simple().to_string()[..16]);
        let currency = self.settings.currency.clone();
        let gateway_order = self
            .policy
            .mutation(|| self.gateway.create_order(amount, &currency, &receipt))
            .await
            .inspect_err(|e| tracing::error!(error = %e, amount, "Gateway order creation failed"))?;

        if gateway_order.amount != amount {
            return Err(GatewayError::Rejected(format!(
                "gateway order {} carries amount {} instead of {}",
                gateway_order.id, gateway_order.amount, amount
            ))
            .into());
        }

        draft.gateway_order_ref = gateway_order.id.clone();
        let order = self.store.create_order(draft).await.inspect_err(|e| {
            tracing::error!(
                gateway_order_ref = %gateway_order.id,
                error = %e,
                "Pending order could not be stored; checkout aborted"
            )
        })?;

        let address = &order.shipping_address;
        Ok(CheckoutSession {
            order_id: order.id,
            gateway_order_ref: order.gateway_order_ref.clone(),
            key_id: self.settings.key_id.clone(),
            amount: order.amount,
            currency: gateway_order.currency,
            name: self.settings.merchant_name.clone(),
            description: format!("Order {}", order.display_ref()),
            subtotal,
            shipping_amount,
            discount_amount,
            coupon,
            prefill: Prefill {
                name: address.full_name(),
                email: address.email.clone(),
                contact: address.phone.clone(),
            },
            theme: Theme {
                color: self.settings.theme_color.clone(),
            },
        })
    }

    /// Verify the widget's signature, then mark the order paid
    pub async fn complete_checkout(&self, callback: PaymentCallback) -> OrderResult<Order> {
        if let Err(e) = self.verifier.verify_checkout(
            &callback.gateway_order_ref,
            &callback.gateway_payment_ref,
            &callback.signature,
        ) {
            tracing::warn!(
                gateway_order_ref = %callback.gateway_order_ref,
                "Checkout callback signature rejected"
            );
            return Err(e.into());
        }

        self.store
            .finalize_payment(
                &callback.gateway_order_ref,
                PaymentUpdate::paid(callback.gateway_payment_ref),
            )
            .await
    }

    /// Record a failed attempt and pick the message to show the customer
    pub async fn fail_checkout(
        &self,
        gateway_order_ref: &str,
        description: Option<String>,
    ) -> OrderResult<CheckoutFailure> {
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let order = self
            .store
            .finalize_payment(gateway_order_ref, PaymentUpdate::failed(description.clone()))
            .await?;

        Ok(CheckoutFailure {
            order,
            message: description.unwrap_or_else(|| GENERIC_PAYMENT_FAILURE.to_string()),
        })
    }

    pub fn store(&self) -> &OrderStore {
        &self.store
    }
}

/// Gateway stand-in for local runs and tests. Orders stay pending until
/// settled or failed by hand.
#[derive(Default)]
pub struct SandboxGateway {
    orders: RwLock<HashMap<String, (GatewayOrder, GatewayOrderStatus)>>,
    offline: AtomicBool,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage; every call fails as unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn settle(&self, gateway_order_ref: &str, payment_ref: &str) -> bool {
        self.set_status(
            gateway_order_ref,
            GatewayOrderStatus::Paid {
                payment_ref: payment_ref.to_string(),
            },
        )
        .await
    }

    pub async fn fail(&self, gateway_order_ref: &str, reason: Option<String>) -> bool {
        self.set_status(gateway_order_ref, GatewayOrderStatus::Failed { reason })
            .await
    }

    async fn set_status(&self, gateway_order_ref: &str, status: GatewayOrderStatus) -> bool {
        match self.orders.write().await.get_mut(gateway_order_ref) {
            Some(entry) => {
                entry.1 = status;
                true
            }
            None => false,
        }
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("sandbox gateway offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        self.check_online()?;
        if amount <= 0 {
            return Err(GatewayError::Rejected("amount must be positive".to_string()));
        }

        let order = GatewayOrder {
            id: format!("order_{}", &Uuid::new_v4().simple().to_string()[..14]),
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
            created_at: Utc::now(),
        };
        self.orders
            .write()
            .await
            .insert(order.id.clone(), (order.clone(), GatewayOrderStatus::Pending));
        Ok(order)
    }

    async fn fetch_order_status(
        &self,
        gateway_order_ref: &str,
    ) -> Result<GatewayOrderStatus, GatewayError> {
        self.check_online()?;
        self.orders
            .read()
            .await
            .get(gateway_order_ref)
            .map(|(_, status)| status.clone())
            .ok_or_else(|| GatewayError::UnknownOrder(gateway_order_ref.to_string()))
    }
}
