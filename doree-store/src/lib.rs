pub mod app_config;
pub mod coupon_repo;
pub mod database;
pub mod events;
pub mod order_repo;
pub mod razorpay;
pub mod redis_repo;

pub use coupon_repo::PgCouponRepository;
pub use database::DbClient;
pub use events::EventProducer;
pub use order_repo::PgOrderRepository;
pub use razorpay::RazorpayGateway;
pub use redis_repo::RedisClient;
