//! Prometheus metrics for dispatcher observability.
//!
//! Recording goes through the `metrics` facade and is a no-op unless the
//! exporter was installed at startup.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};

/// Install the Prometheus exporter, serving `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!("Prometheus exporter listening on {}", addr),
        Err(e) => tracing::warn!("Failed to install Prometheus exporter: {}", e),
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("shipiru_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a webhook turned away before dispatch.
pub fn webhook_rejected(code: &str) {
    counter!("shipiru_webhooks_rejected_total", "code" => code.to_string()).increment(1);
}

/// Record a job state transition.
pub fn job_state_changed(state: &str) {
    counter!("shipiru_jobs_total", "state" => state.to_string()).increment(1);
}

/// Record job duration at its terminal state.
pub fn job_duration(state: &str, duration_ms: u64) {
    histogram!("shipiru_job_duration_ms", "state" => state.to_string()).record(duration_ms as f64);
}

/// Set current number of jobs holding a slot.
pub fn active_jobs(count: usize) {
    gauge!("shipiru_active_jobs").set(count as f64);
}
