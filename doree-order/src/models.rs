use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::OrderError;

/// Payment status of an order. Written once at creation and finalized once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(OrderError::Validation(format!("unknown payment status '{}'", other))),
        }
    }
}

/// The outcome a gateway callback, webhook or reconciliation run reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

impl From<PaymentOutcome> for PaymentStatus {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Paid => PaymentStatus::Paid,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }
}

/// Fulfillment stage of an order, distinct from payment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
    Returned,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 9] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Confirmed,
        DeliveryStatus::Processing,
        DeliveryStatus::Shipped,
        DeliveryStatus::InTransit,
        DeliveryStatus::OutForDelivery,
        DeliveryStatus::Delivered,
        DeliveryStatus::Cancelled,
        DeliveryStatus::Returned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Confirmed => "confirmed",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Shipped => "shipped",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::OutForDelivery => "out_for_delivery",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
            DeliveryStatus::Returned => "returned",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| OrderError::Validation(format!("unknown delivery status '{}'", s)))
    }
}

/// A line item frozen at checkout. Catalog edits never reach a placed order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub product_id: String,
    pub title: String,
    /// Unit price in paise
    pub unit_price: i64,
    pub quantity: u32,
    pub image: Option<String>,
    pub selected_size: Option<String>,
}

impl LineItem {
    /// `None` when the product leaves the paise range
    pub fn line_total(&self) -> Option<i64> {
        self.unit_price.checked_mul(i64::from(self.quantity))
    }
}

/// Recipient details captured at the time of order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingAddress {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl ShippingAddress {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    fn validate(&self) -> Result<(), OrderError> {
        let required = [
            ("first_name", &self.first_name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("address", &self.address),
            ("city", &self.city),
            ("zip", &self.zip),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(OrderError::Validation(format!(
                    "shipping address field '{}' is required",
                    field
                )));
            }
        }
        if !self.email.contains('@') {
            return Err(OrderError::Validation("shipping email is not valid".to_string()));
        }
        Ok(())
    }
}

/// One append-only entry of the customer-facing delivery narrative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingEvent {
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub location: Option<String>,
}

/// Courier metadata set by an operator after the order ships.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingInfo {
    pub tracking_number: String,
    pub courier_name: String,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Everything needed to place an order. Amounts are verified, never trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: String,
    pub gateway_order_ref: String,
    pub amount: i64,
    pub shipping_address: ShippingAddress,
    pub items: Vec<LineItem>,
    pub coupon_code: Option<String>,
    pub discount_amount: i64,
}

/// One checkout attempt, from creation through payment and delivery resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: String,
    pub gateway_order_ref: String,
    pub gateway_payment_ref: Option<String>,
    pub amount: i64,
    pub shipping_amount: i64,
    pub discount_amount: i64,
    pub coupon_code: Option<String>,
    pub payment_status: PaymentStatus,
    pub delivery_status: DeliveryStatus,
    pub items: Vec<LineItem>,
    pub shipping_address: ShippingAddress,
    pub tracking_number: Option<String>,
    pub courier_name: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub tracking_updates: Vec<TrackingEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a pending order, checking `amount = subtotal + shipping - discount`
    pub fn place(draft: NewOrder, shipping_amount: i64) -> Result<Self, OrderError> {
        if draft.user_id.trim().is_empty() {
            return Err(OrderError::Validation("user id is required".to_string()));
        }
        if draft.gateway_order_ref.trim().is_empty() {
            return Err(OrderError::Validation("gateway order reference is required".to_string()));
        }
        if draft.items.is_empty() {
            return Err(OrderError::Validation("an order needs at least one item".to_string()));
        }
        for item in &draft.items {
            if item.quantity == 0 {
                return Err(OrderError::Validation(format!(
                    "quantity for '{}' must be at least 1",
                    item.title
                )));
            }
            if item.unit_price < 0 {
                return Err(OrderError::Validation(format!(
                    "price for '{}' cannot be negative",
                    item.title
                )));
            }
        }
        draft.shipping_address.validate()?;

        let subtotal = subtotal(&draft.items)?;
        if shipping_amount < 0 {
            return Err(OrderError::Validation("shipping amount cannot be negative".to_string()));
        }
        if draft.discount_amount < 0 || draft.discount_amount > subtotal {
            return Err(OrderError::Validation(format!(
                "discount {} is outside 0..={}",
                draft.discount_amount, subtotal
            )));
        }
        if draft.coupon_code.is_none() && draft.discount_amount != 0 {
            return Err(OrderError::Validation(
                "a discount requires an applied coupon".to_string(),
            ));
        }

        let expected = order_amount(subtotal, shipping_amount, draft.discount_amount)?;
        if draft.amount != expected {
            return Err(OrderError::Validation(format!(
                "amount {} does not match subtotal {} + shipping {} - discount {}",
                draft.amount, subtotal, shipping_amount, draft.discount_amount
            )));
        }
        if expected <= 0 {
            return Err(OrderError::Validation("order total must be positive".to_string()));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: draft.user_id,
            gateway_order_ref: draft.gateway_order_ref,
            gateway_payment_ref: None,
            amount: draft.amount,
            shipping_amount,
            discount_amount: draft.discount_amount,
            coupon_code: draft.coupon_code,
            payment_status: PaymentStatus::Pending,
            delivery_status: DeliveryStatus::Pending,
            items: draft.items,
            shipping_address: draft.shipping_address,
            tracking_number: None,
            courier_name: None,
            estimated_delivery: None,
            tracking_updates: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Placed orders always satisfy `amount = subtotal + shipping - discount`
    pub fn subtotal(&self) -> i64 {
        self.amount - self.shipping_amount + self.discount_amount
    }

    pub fn last_tracking_timestamp(&self) -> Option<DateTime<Utc>> {
        self.tracking_updates.last().map(|event| event.timestamp)
    }

    /// Short reference shown to customers and operators (`#ORD-1A2B3C`)
    pub fn display_ref(&self) -> String {
        let simple = self.id.simple().to_string();
        format!("#ORD-{}", simple[..6].to_uppercase())
    }
}

pub fn subtotal(items: &[LineItem]) -> Result<i64, OrderError> {
    items
        .iter()
        .try_fold(0i64, |sum, item| item.line_total().and_then(|line| sum.checked_add(line)))
        .ok_or_else(|| OrderError::Validation("cart total is out of range".to_string()))
}

/// `subtotal + shipping - discount`, rejecting totals outside the paise range
pub fn order_amount(
    subtotal: i64,
    shipping_amount: i64,
    discount_amount: i64,
) -> Result<i64, OrderError> {
    subtotal
        .checked_add(shipping_amount)
        .and_then(|gross| gross.checked_sub(discount_amount))
        .ok_or_else(|| OrderError::Validation("order total is out of range".to_string()))
}

/// Render paise as rupees (`₹1,250.50`)
pub fn format_inr(paise: i64) -> String {
    let sign = if paise < 0 { "-" } else { "" };
    let paise = paise.unsigned_abs();
    let rupees = (paise / 100).to_string();

    let mut grouped = String::new();
    for (i, ch) in rupees.chars().enumerate() {
        if i > 0 && (rupees.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}₹{}.{:02}", sign, grouped, paise % 100)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn address() -> ShippingAddress {
        ShippingAddress {
            first_name: "Asha".to_string(),
            last_name: "Verma".to_string(),
            email: "asha@example.com".to_string(),
            phone: "+91 98765 43210".to_string(),
            address: "12 MG Road".to_string(),
            city: "Jaipur".to_string(),
            state: "Rajasthan".to_string(),
            zip: "302001".to_string(),
        }
    }

    pub fn item(title: &str, unit_price: i64, quantity: u32) -> LineItem {
        LineItem {
            product_id: format!("prod-{}", title.to_lowercase().replace(' ', "-")),
            title: title.to_string(),
            unit_price,
            quantity,
            image: Some(format!("/images/{}.jpg", title.to_lowercase())),
            selected_size: Some("M".to_string()),
        }
    }

    pub fn new_order(gateway_order_ref: &str, items: Vec<LineItem>) -> NewOrder {
        let amount = subtotal(&items).unwrap_or_default();
        NewOrder {
            user_id: "user-1".to_string(),
            gateway_order_ref: gateway_order_ref.to_string(),
            amount,
            shipping_address: address(),
            items,
            coupon_code: None,
            discount_amount: 0,
        }
    }
}
