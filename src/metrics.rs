//! Metrics helpers for Myelin.
//!
//! Thin wrappers over the `metrics` crate macros with the gateway's metric
//! families registered up front. The Prometheus exposition handle is
//! installed once at startup; the configured exposition path renders it.
//!
//! Families:
//! * `myelin_requests_total` (counter: method, path, status)
//! * `myelin_request_duration_seconds` (histogram: method, path)
//! * `myelin_backend_requests_total` (counter: backend, status)
//! * `myelin_route_error_rate` (gauge per route)
//! * `myelin_route_avg_latency_seconds` (gauge per route)
//! * `myelin_rate_limit_rejections_total` (counter per path)
//! * `myelin_ip_acl_rejections_total` (counter per path)
//! * `myelin_injection_blocks_total` (counter per path)
//! * `myelin_breaker_trips_total` (counter per route)
//! * `myelin_backend_probe_health` (gauge per backend, 1 healthy / 0 not)
use std::sync::OnceLock;
use std::time::Duration;

use eyre::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const REQUESTS_TOTAL: &str = "myelin_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "myelin_request_duration_seconds";
pub const BACKEND_REQUESTS_TOTAL: &str = "myelin_backend_requests_total";
pub const ROUTE_ERROR_RATE: &str = "myelin_route_error_rate";
pub const ROUTE_AVG_LATENCY_SECONDS: &str = "myelin_route_avg_latency_seconds";
pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "myelin_rate_limit_rejections_total";
pub const IP_ACL_REJECTIONS_TOTAL: &str = "myelin_ip_acl_rejections_total";
pub const INJECTION_BLOCKS_TOTAL: &str = "myelin_injection_blocks_total";
pub const BREAKER_TRIPS_TOTAL: &str = "myelin_breaker_trips_total";
pub const BACKEND_PROBE_HEALTH: &str = "myelin_backend_probe_health";

static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder and register metric descriptions.
/// Idempotent; a second call keeps the first handle.
pub fn init_metrics() -> Result<()> {
    let installed = PROMETHEUS_HANDLE.get_or_init(|| {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                register_descriptions();
                tracing::info!("metrics recorder installed");
                Some(handle)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install metrics recorder");
                None
            }
        }
    });
    if installed.is_some() {
        Ok(())
    } else {
        Err(eyre::eyre!("failed to install metrics recorder"))
    }
}

fn register_descriptions() {
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Total HTTP requests processed by the gateway."
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_counter!(
        BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "Total requests forwarded to backend targets."
    );
    describe_gauge!(ROUTE_ERROR_RATE, "Rolling error rate per route.");
    describe_gauge!(
        ROUTE_AVG_LATENCY_SECONDS,
        "Rolling average latency per route in seconds."
    );
    describe_counter!(
        RATE_LIMIT_REJECTIONS_TOTAL,
        Unit::Count,
        "Requests rejected by the rate limiter."
    );
    describe_counter!(
        IP_ACL_REJECTIONS_TOTAL,
        Unit::Count,
        "Requests rejected by the IP access lists."
    );
    describe_counter!(
        INJECTION_BLOCKS_TOTAL,
        Unit::Count,
        "Requests blocked by the anti-injection scan."
    );
    describe_counter!(
        BREAKER_TRIPS_TOTAL,
        Unit::Count,
        "Requests short-circuited by a circuit breaker command."
    );
    describe_gauge!(
        BACKEND_PROBE_HEALTH,
        "Probe health per backend (1 healthy, 0 unhealthy)."
    );
}

/// Render the current exposition document, or an empty string before init.
pub fn render_prometheus() -> String {
    PROMETHEUS_HANDLE
        .get()
        .and_then(|h| h.as_ref())
        .map(|h| h.render())
        .unwrap_or_default()
}

pub fn increment_request_total(method: &str, path: &str, status: u16) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(method: &str, path: &str, duration: Duration) {
    histogram!(
        REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_backend_request(backend: &str, status: u16) {
    counter!(
        BACKEND_REQUESTS_TOTAL,
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn set_route_error_rate(route: &str, rate: f64) {
    gauge!(ROUTE_ERROR_RATE, "route" => route.to_string()).set(rate);
}

pub fn set_route_avg_latency(route: &str, latency: Duration) {
    gauge!(ROUTE_AVG_LATENCY_SECONDS, "route" => route.to_string())
        .set(latency.as_secs_f64());
}

pub fn increment_rate_limit_rejection(path: &str) {
    counter!(RATE_LIMIT_REJECTIONS_TOTAL, "path" => path.to_string()).increment(1);
}

pub fn increment_ip_acl_rejection(path: &str) {
    counter!(IP_ACL_REJECTIONS_TOTAL, "path" => path.to_string()).increment(1);
}

pub fn increment_injection_block(path: &str) {
    counter!(INJECTION_BLOCKS_TOTAL, "path" => path.to_string()).increment(1);
}

pub fn increment_breaker_trip(route: &str) {
    counter!(BREAKER_TRIPS_TOTAL, "route" => route.to_string()).increment(1);
}

pub fn set_backend_probe_health(backend: &str, healthy: bool) {
    gauge!(BACKEND_PROBE_HEALTH, "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

/// RAII timer recording an inbound request's duration on drop.
pub struct RequestTimer {
    start: std::time::Instant,
    method: String,
    path: String,
}

impl RequestTimer {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            start: std::time::Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.method, &self.path, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn counters_accept_labels() {
        let _ = init_metrics();
        increment_request_total("GET", "/api/v1/user", 200);
        increment_rate_limit_rejection("/api/v1/order");
        set_route_error_rate("/api/v1/user", 0.25);
        set_backend_probe_health("127.0.0.1:8081", true);

        let rendered = render_prometheus();
        assert!(rendered.contains("myelin_requests_total"));
    }

    #[test]
    fn request_timer_records_on_drop() {
        let _ = init_metrics();
        let timer = RequestTimer::new("GET", "/t");
        drop(timer);
    }
}
