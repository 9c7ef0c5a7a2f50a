pub mod coupon;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod reconcile;
pub mod repository;
pub mod store;

pub use coupon::{Coupon, CouponAdmin, CouponQuote, CouponRejection, CouponValidator, NewCoupon};
pub use delivery::{DeliveryCommand, DeliveryStateMachine, StatusInfo, TransitionError};
pub use error::{ErrorKind, OrderError, OrderResult};
pub use models::{
    DeliveryStatus, LineItem, NewOrder, Order, PaymentOutcome, PaymentStatus, ShippingAddress,
    TrackingEvent, TrackingInfo,
};
pub use orchestrator::{CheckoutOrchestrator, CheckoutRequest, CheckoutSession, PaymentCallback, SandboxGateway};
pub use reconcile::{ReconcileReport, Reconciler};
pub use store::{OrderStore, PaymentUpdate};
