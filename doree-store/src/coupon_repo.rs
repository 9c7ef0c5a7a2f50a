use async_trait::async_trait;
use chrono::{DateTime, Utc};
use doree_order::coupon::Coupon;
use doree_order::repository::{CouponRepository, RepoError, RepoResult, UsageCommit};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::repo_error;

const COUPON_COLUMNS: &str =
    "id, code, discount_percent, min_order_value, usage_limit, used_count, expires_at, is_active, created_at";

pub struct PgCouponRepository {
    pool: PgPool,
}

impl PgCouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    discount_percent: i16,
    min_order_value: i64,
    usage_limit: Option<i32>,
    used_count: i32,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = RepoError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str| RepoError::Corrupt(format!("coupon {}: bad {}", row.code, field));

        Ok(Coupon {
            discount_percent: u8::try_from(row.discount_percent).map_err(|_| corrupt("discount_percent"))?,
            usage_limit: row
                .usage_limit
                .map(u32::try_from)
                .transpose()
                .map_err(|_| corrupt("usage_limit"))?,
            used_count: u32::try_from(row.used_count).map_err(|_| corrupt("used_count"))?,
            id: row.id,
            code: row.code,
            min_order_value: row.min_order_value,
            expires_at: row.expires_at,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl CouponRepository for PgCouponRepository {
    async fn find_active(&self, code: &str) -> RepoResult<Option<Coupon>> {
        let row: Option<CouponRow> = sqlx::query_as(&format!(
            "SELECT {} FROM coupons WHERE code = $1 AND is_active",
            COUPON_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_error)?;

        row.map(Coupon::try_from).transpose()
    }

    async fn get(&self, id: Uuid) -> RepoResult<Option<Coupon>> {
        let row: Option<CouponRow> =
            sqlx::query_as(&format!("SELECT {} FROM coupons WHERE id = $1", COUPON_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(repo_error)?;

        row.map(Coupon::try_from).transpose()
    }

    async fn list(&self) -> RepoResult<Vec<Coupon>> {
        let rows: Vec<CouponRow> = sqlx::query_as(&format!(
            "SELECT {} FROM coupons ORDER BY created_at DESC",
            COUPON_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(repo_error)?;

        rows.into_iter().map(Coupon::try_from).collect()
    }

    async fn insert(&self, coupon: &Coupon) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, discount_percent, min_order_value, usage_limit,
                                 used_count, expires_at, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(coupon.id)
        .bind(&coupon.code)
        .bind(i16::from(coupon.discount_percent))
        .bind(coupon.min_order_value)
        .bind(coupon.usage_limit.map(|l| i32::try_from(l).unwrap_or(i32::MAX)))
        .bind(i32::try_from(coupon.used_count).unwrap_or(i32::MAX))
        .bind(coupon.expires_at)
        .bind(coupon.is_active)
        .bind(coupon.created_at)
        .execute(&self.pool)
        .await
        .map_err(repo_error)?;

        Ok(())
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> RepoResult<bool> {
        let result = sqlx::query("UPDATE coupons SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(is_active)
            .execute(&self.pool)
            .await
            .map_err(repo_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM coupons WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(repo_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn increment_usage(&self, code: &str) -> RepoResult<UsageCommit> {
        // The limit is re-checked by the row lock the UPDATE takes
        let row: Option<CouponRow> = sqlx::query_as(&format!(
            "UPDATE coupons SET used_count = used_count + 1 \
             WHERE code = $1 AND (usage_limit IS NULL OR used_count < usage_limit) \
             RETURNING {}",
            COUPON_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(repo_error)?;

        if let Some(row) = row {
            return Ok(UsageCommit::Committed(Coupon::try_from(row)?));
        }

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM coupons WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(repo_error)?;

        Ok(match exists {
            Some(_) => UsageCommit::LimitReached,
            None => UsageCommit::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(discount_percent: i16, used_count: i32) -> CouponRow {
        CouponRow {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            discount_percent,
            min_order_value: 50_000,
            usage_limit: Some(2),
            used_count,
            expires_at: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_conversion() {
        let coupon = Coupon::try_from(row(10, 1)).unwrap();
        assert_eq!(coupon.discount_percent, 10);
        assert_eq!(coupon.usage_limit, Some(2));
        assert!(!coupon.is_exhausted());
    }

    #[test]
    fn test_out_of_range_columns_are_corrupt() {
        assert!(matches!(Coupon::try_from(row(-5, 0)), Err(RepoError::Corrupt(_))));
        assert!(matches!(Coupon::try_from(row(10, -1)), Err(RepoError::Corrupt(_))));
    }
}
