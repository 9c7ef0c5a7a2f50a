pub mod models;
pub mod pii;

pub use models::events::OrderEvent;
pub use pii::Masked;
