use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use doree_order::{ReconcileReport, Reconciler};
use doree_store::app_config::ReconciliationConfig;

use crate::metrics::Metrics;

/// Periodically settles orders whose payment callback never arrived.
pub async fn start_reconciliation_worker(
    reconciler: Reconciler,
    config: ReconciliationConfig,
    metrics: Arc<Metrics>,
) {
    let mut ticker = interval(Duration::from_secs(config.interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let stale_after = chrono::Duration::seconds(config.stale_after_seconds as i64);

    info!(
        interval_seconds = config.interval_seconds,
        stale_after_seconds = config.stale_after_seconds,
        "Reconciliation worker started"
    );

    loop {
        ticker.tick().await;
        match reconciler.reconcile_stale(stale_after, config.batch_size).await {
            Ok(report) => record(&metrics, &report),
            Err(e) => error!("Reconciliation sweep failed: {}", e),
        }
    }
}

fn record(metrics: &Metrics, report: &ReconcileReport) {
    let counts = [
        ("paid", report.paid),
        ("failed", report.failed),
        ("still_pending", report.still_pending),
        ("error", report.errors),
    ];
    for (result, count) in counts {
        if count > 0 {
            metrics
                .reconciled_orders
                .with_label_values(&[result])
                .inc_by(count as u64);
        }
    }
}
