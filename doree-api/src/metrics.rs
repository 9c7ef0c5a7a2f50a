use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::AppError;
use crate::state::AppState;

/// Prometheus counters for the order lifecycle, scraped via `/metrics`.
pub struct Metrics {
    registry: Registry,

    pub checkouts_started: IntCounter,
    pub checkout_failures: IntCounterVec,
    pub payments_finalized: IntCounterVec,
    pub delivery_transitions: IntCounterVec,
    pub webhook_events: IntCounterVec,
    pub reconciled_orders: IntCounterVec,
    pub payment_circuit_open: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let checkouts_started =
            IntCounter::new("doree_checkouts_started_total", "Checkout sessions opened")?;
        registry.register(Box::new(checkouts_started.clone()))?;

        let checkout_failures = IntCounterVec::new(
            Opts::new("doree_checkout_failures_total", "Checkout attempts that could not open"),
            &["kind"],
        )?;
        registry.register(Box::new(checkout_failures.clone()))?;

        let payments_finalized = IntCounterVec::new(
            Opts::new("doree_payments_finalized_total", "Payment outcomes recorded"),
            &["outcome", "source"],
        )?;
        registry.register(Box::new(payments_finalized.clone()))?;

        let delivery_transitions = IntCounterVec::new(
            Opts::new("doree_delivery_transitions_total", "Accepted delivery updates"),
            &["status"],
        )?;
        registry.register(Box::new(delivery_transitions.clone()))?;

        let webhook_events = IntCounterVec::new(
            Opts::new("doree_webhook_events_total", "Gateway webhook deliveries"),
            &["event", "result"],
        )?;
        registry.register(Box::new(webhook_events.clone()))?;

        let reconciled_orders = IntCounterVec::new(
            Opts::new("doree_reconciled_orders_total", "Orders examined by reconciliation"),
            &["result"],
        )?;
        registry.register(Box::new(reconciled_orders.clone()))?;

        let payment_circuit_open = IntGauge::new(
            "doree_payment_circuit_open",
            "1 while the payment circuit breaker is open",
        )?;
        registry.register(Box::new(payment_circuit_open.clone()))?;

        Ok(Self {
            registry,
            checkouts_started,
            checkout_failures,
            payments_finalized,
            delivery_transitions,
            webhook_events,
            reconciled_orders,
            payment_circuit_open,
        })
    }

    pub fn render(&self) -> anyhow::Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
