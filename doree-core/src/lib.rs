pub mod payment;
pub mod policy;
pub mod signature;

pub use payment::{GatewayError, GatewayOrder, GatewayOrderStatus, PaymentGateway};
pub use policy::CallPolicy;
pub use signature::SignatureVerifier;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Payment signature verification failed")]
    InvalidSignature,
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
