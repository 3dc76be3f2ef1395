use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: slot/group transitions executed. Labels: op.
pub const TRANSITIONS_TOTAL: &str = "reserva_transitions_total";

/// Counter: approvals rejected because of an approved-slot conflict.
pub const CONFLICTS_TOTAL: &str = "reserva_conflicts_total";

/// Counter: pending slots denied by an approval cascade.
pub const CASCADE_DENIALS_TOTAL: &str = "reserva_cascade_denials_total";

// ── Fan-out and maintenance ─────────────────────────────────────

/// Counter: notification events handed to the notifier.
pub const NOTIFICATIONS_TOTAL: &str = "reserva_notifications_total";

/// Counter: notifier dispatch failures (logged, never surfaced).
pub const NOTIFY_FAILURES_TOTAL: &str = "reserva_notify_failures_total";

/// Counter: expired slots promoted to terminal states by the sweeper.
pub const SWEEP_PROMOTIONS_TOTAL: &str = "reserva_sweep_promotions_total";

/// Counter: resources released back to available.
pub const RESOURCE_RELEASES_TOTAL: &str = "reserva_resource_releases_total";

/// Histogram: journal flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reserva_wal_flush_duration_seconds";

/// Install the Prometheus metrics exporter on the given port. No-op if `None`.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
