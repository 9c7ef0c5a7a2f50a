use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use doree_order::{ErrorKind, OrderError};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    /// `retryable` is set when a reload and resubmit may succeed
    ConflictError { message: String, retryable: bool },
    /// Gateway unreachable or declined; the customer may retry
    ExternalError(String),
    /// Datastore unreachable; the customer may retry
    ServiceUnavailable(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, retryable) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg, false),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg, false),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg, false),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg, false),
            AppError::ConflictError { message, retryable } => {
                (StatusCode::CONFLICT, message, retryable)
            }
            AppError::ExternalError(msg) => {
                tracing::warn!("Upstream failure: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Payment could not be completed. Please try again.".to_string(),
                    true,
                )
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::error!("Datastore unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable. Please try again.".to_string(),
                    true,
                )
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string(), false)
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string(), false)
            }
        };

        let body = Json(json!({
            "error": error_message,
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        let message = err.to_string();
        let retryable = err.is_retryable();
        match err.kind() {
            ErrorKind::Validation => AppError::ValidationError(message),
            ErrorKind::Conflict => AppError::ConflictError { message, retryable },
            ErrorKind::NotFound => AppError::NotFoundError(message),
            ErrorKind::External => AppError::ExternalError(message),
            ErrorKind::Storage if retryable => AppError::ServiceUnavailable(message),
            ErrorKind::Storage => AppError::InternalServerError(message),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doree_order::repository::RepoError;
    use doree_order::CouponRejection;

    #[test]
    fn test_order_errors_map_to_status_codes() {
        let cases = [
            (OrderError::Coupon(CouponRejection::Expired), StatusCode::BAD_REQUEST),
            (OrderError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                OrderError::ConcurrentModification(uuid::Uuid::nil()),
                StatusCode::CONFLICT,
            ),
            (
                OrderError::Gateway(doree_core::GatewayError::Unreachable("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                OrderError::Storage(RepoError::Unavailable("pool timed out".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                OrderError::Storage(RepoError::Corrupt("bad row".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_retryable_flag_follows_order_error() {
        let cases = [
            OrderError::Storage(RepoError::Unavailable("connection refused".into())),
            OrderError::ConcurrentModification(uuid::Uuid::nil()),
            OrderError::Gateway(doree_core::GatewayError::Timeout(std::time::Duration::from_secs(5))),
            OrderError::NotFound("x".into()),
            OrderError::Storage(RepoError::Duplicate("order_1".into())),
            OrderError::InvalidSignature,
        ];

        for err in cases {
            let expected = err.is_retryable();
            let body = match AppError::from(err) {
                AppError::ConflictError { retryable, .. } => retryable,
                AppError::ExternalError(_) | AppError::ServiceUnavailable(_) => true,
                _ => false,
            };
            assert_eq!(body, expected);
        }
    }
}
