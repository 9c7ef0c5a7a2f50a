use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::format_inr;
use crate::repository::{CouponRepository, UsageCommit};

/// A named discount rule with eligibility constraints and a usage ceiling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_percent: u8,
    /// Minimum subtotal in paise
    pub min_order_value: i64,
    pub usage_limit: Option<u32>,
    pub used_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit.is_some_and(|limit| self.used_count >= limit)
    }

    /// Floored percentage of a non-negative subtotal, never above it
    pub fn discount_for(&self, subtotal: i64) -> i64 {
        let subtotal = subtotal.max(0);
        let percent = i64::from(self.discount_percent.min(100));
        // split on hundreds so the product stays inside i64
        (subtotal / 100) * percent + (subtotal % 100) * percent / 100
    }
}

/// Operator input for a new coupon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCoupon {
    pub code: String,
    pub discount_percent: u8,
    pub min_order_value: i64,
    pub usage_limit: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// A coupon that passed every eligibility check for a given subtotal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CouponQuote {
    pub code: String,
    pub discount_percent: u8,
    pub discount_amount: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponRejection {
    #[error("Invalid coupon code")]
    NotFound,

    #[error("This coupon has expired")]
    Expired,

    #[error("This coupon has reached its usage limit")]
    UsageLimitReached,

    #[error("Minimum order value of {} required; add {} more to use this coupon", format_inr(*.required), format_inr(*.shortfall))]
    MinOrderNotMet { required: i64, shortfall: i64 },
}

/// Case-insensitive, whitespace-insensitive coupon code form
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Evaluates coupons and commits their usage once payment is confirmed.
#[derive(Clone)]
pub struct CouponValidator {
    coupons: Arc<dyn CouponRepository>,
}

impl CouponValidator {
    pub fn new(coupons: Arc<dyn CouponRepository>) -> Self {
        Self { coupons }
    }

    /// Read-only eligibility check against the live subtotal
    pub async fn evaluate(&self, code: &str, subtotal: i64) -> OrderResult<CouponQuote> {
        self.evaluate_at(code, subtotal, Utc::now()).await
    }

    pub async fn evaluate_at(
        &self,
        code: &str,
        subtotal: i64,
        now: DateTime<Utc>,
    ) -> OrderResult<CouponQuote> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(CouponRejection::NotFound.into());
        }

        let coupon = self
            .coupons
            .find_active(&code)
            .await?
            .ok_or(CouponRejection::NotFound)?;

        Ok(check_eligibility(&coupon, subtotal, now)?)
    }

    /// Count one confirmed use. The limit is re-checked by the write itself.
    pub async fn commit_usage(&self, code: &str) -> OrderResult<Coupon> {
        let code = normalize_code(code);
        match self.coupons.increment_usage(&code).await? {
            UsageCommit::Committed(coupon) => {
                tracing::info!(
                    code = %coupon.code,
                    used_count = coupon.used_count,
                    usage_limit = ?coupon.usage_limit,
                    "Coupon usage committed"
                );
                Ok(coupon)
            }
            UsageCommit::LimitReached => Err(CouponRejection::UsageLimitReached.into()),
            UsageCommit::NotFound => Err(CouponRejection::NotFound.into()),
        }
    }
}

/// Pure eligibility rules for one coupon record.
///
/// The minimum-order check runs first so the shortfall is reported whenever
/// the subtotal is too low, whatever else is wrong with the coupon.
pub fn check_eligibility(
    coupon: &Coupon,
    subtotal: i64,
    now: DateTime<Utc>,
) -> Result<CouponQuote, CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::NotFound);
    }

    if subtotal < coupon.min_order_value {
        return Err(CouponRejection::MinOrderNotMet {
            required: coupon.min_order_value,
            shortfall: coupon.min_order_value - subtotal,
        });
    }

    if coupon.is_expired_at(now) {
        return Err(CouponRejection::Expired);
    }

    if coupon.is_exhausted() {
        return Err(CouponRejection::UsageLimitReached);
    }

    Ok(CouponQuote {
        code: coupon.code.clone(),
        discount_percent: coupon.discount_percent,
        discount_amount: coupon.discount_for(subtotal),
        message: format!("{}% discount applied!", coupon.discount_percent),
    })
}

/// Operator console actions on coupons.
#[derive(Clone)]
pub struct CouponAdmin {
    coupons: Arc<dyn CouponRepository>,
}

impl CouponAdmin {
    pub fn new(coupons: Arc<dyn CouponRepository>) -> Self {
        Self { coupons }
    }

    pub async fn create(&self, input: NewCoupon) -> OrderResult<Coupon> {
        let code = normalize_code(&input.code);
        if code.is_empty() {
            return Err(OrderError::Validation("coupon code is required".to_string()));
        }
        if code.chars().any(char::is_whitespace) {
            return Err(OrderError::Validation("coupon code cannot contain spaces".to_string()));
        }
        if !(1..=100).contains(&input.discount_percent) {
            return Err(OrderError::Validation(
                "discount percent must be between 1 and 100".to_string(),
            ));
        }
        if input.min_order_value < 0 {
            return Err(OrderError::Validation("minimum order value cannot be negative".to_string()));
        }
        if input.usage_limit == Some(0) {
            return Err(OrderError::Validation("usage limit must be at least 1".to_string()));
        }

        let coupon = Coupon {
            id: Uuid::new_v4(),
            code,
            discount_percent: input.discount_percent,
            min_order_value: input.min_order_value,
            usage_limit: input.usage_limit,
            used_count: 0,
            expires_at: input.expires_at,
            is_active: input.is_active,
            created_at: Utc::now(),
        };

        self.coupons.insert(&coupon).await?;
        tracing::info!(code = %coupon.code, percent = coupon.discount_percent, "Coupon created");
        Ok(coupon)
    }

    pub async fn list(&self) -> OrderResult<Vec<Coupon>> {
        Ok(self.coupons.list().await?)
    }

    pub async fn set_active(&self, id: Uuid, is_active: bool) -> OrderResult<Coupon> {
        if !self.coupons.set_active(id, is_active).await? {
            return Err(OrderError::NotFound(format!("coupon {}", id)));
        }
        tracing::info!(coupon_id = %id, is_active, "Coupon status toggled");
        self.coupons
            .get(id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("coupon {}", id)))
    }

    pub async fn delete(&self, id: Uuid) -> OrderResult<()> {
        if !self.coupons.delete(id).await? {
            return Err(OrderError::NotFound(format!("coupon {}", id)));
        }
        tracing::info!(coupon_id = %id, "Coupon deleted");
        Ok(())
    }
}
