use std::net::SocketAddr;
use std::sync::Arc;

use doree_api::{
    app,
    metrics::Metrics,
    middleware::ResiliencyState,
    state::{AppState, AuthConfig, BroadcastPublisher},
    worker,
};
use doree_core::{CallPolicy, PaymentGateway, SignatureVerifier};
use doree_order::orchestrator::CheckoutSettings;
use doree_order::repository::{CouponRepository, EventPublisher, OrderRepository};
use doree_order::{
    CheckoutOrchestrator, CouponAdmin, CouponValidator, OrderStore, Reconciler, SandboxGateway,
};
use doree_store::{
    DbClient, EventProducer, PgCouponRepository, PgOrderRepository, RazorpayGateway, RedisClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doree_api=debug,doree_order=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = doree_store::app_config::Config::load()?;
    tracing::info!("Starting Doree API on port {}", config.server.port);
    tracing::debug!(payment = ?config.payment, "Payment settings loaded");

    // Postgres
    let db = DbClient::new(&config.database.url).await?;
    db.migrate().await?;
    let orders: Arc<dyn OrderRepository> = Arc::new(PgOrderRepository::new(db.pool.clone()));
    let coupons: Arc<dyn CouponRepository> = Arc::new(PgCouponRepository::new(db.pool.clone()));

    // Redis is optional: without it rate limiting and webhook de-duplication are skipped
    let redis = match RedisClient::new(&config.redis.url).await {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, continuing without it");
            None
        }
    };

    // Kafka, fronted by the live-tracking broadcast
    let kafka: Arc<dyn EventPublisher> = Arc::new(EventProducer::new(&config.kafka.brokers)?);
    let (sse_tx, _) = tokio::sync::broadcast::channel(100);
    let events: Arc<dyn EventPublisher> = Arc::new(BroadcastPublisher::new(sse_tx.clone(), kafka));

    let store = OrderStore::new(
        orders,
        CouponValidator::new(coupons.clone()),
        events,
        config.checkout.shipping_amount,
    );

    let gateway: Arc<dyn PaymentGateway> = if config.payment.sandbox {
        tracing::warn!("Payment sandbox enabled; no real gateway orders will be created");
        Arc::new(SandboxGateway::new())
    } else {
        Arc::new(RazorpayGateway::new(
            &config.payment.api_base_url,
            &config.payment.key_id,
            &config.payment.key_secret,
            config.payment.timeout(),
        ))
    };
    let policy = CallPolicy::with_timeout(config.payment.timeout());

    let checkout = CheckoutOrchestrator::new(
        store.clone(),
        gateway.clone(),
        SignatureVerifier::new(&config.payment.key_secret)?,
        policy.clone(),
        CheckoutSettings {
            key_id: config.payment.key_id.clone(),
            currency: config.payment.currency.clone(),
            merchant_name: config.payment.merchant_name.clone(),
            theme_color: config.payment.theme_color.clone(),
        },
    );
    let reconciler = Reconciler::new(store.clone(), gateway, policy);
    let metrics = Arc::new(Metrics::new()?);

    tokio::spawn(worker::start_reconciliation_worker(
        reconciler.clone(),
        config.reconciliation.clone(),
        metrics.clone(),
    ));

    let app_state = AppState {
        store,
        checkout,
        reconciler,
        coupon_admin: CouponAdmin::new(coupons),
        webhook_verifier: SignatureVerifier::new(&config.payment.webhook_secret)?,
        redis,
        sse_tx,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        rate_limit: config.rate_limit.clone(),
        resiliency: Arc::new(ResiliencyState::new()),
        metrics,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
