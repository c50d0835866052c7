use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Histogram bucket boundaries for response body size (bytes).
const SIZE_BUCKETS: &[f64] = &[
    100.0, 500.0, 1000.0, 5000.0, 10000.0, 50000.0, 100000.0, 500000.0, 1000000.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` /
    /// `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full("gateway_http_response_size_bytes".to_string()),
                SIZE_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---

        // connections
        describe_gauge!(
            "gateway_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "gateway_connections_total",
            Unit::Count,
            "Total connections accepted"
        );

        // admission (C4)
        describe_counter!(
            "gateway_admission_total",
            Unit::Count,
            "Total admission attempts, labeled by outcome"
        );
        describe_histogram!(
            "gateway_admission_duration_seconds",
            Unit::Seconds,
            "Time spent evaluating the admission pipeline"
        );
        describe_gauge!(
            "gateway_admission_concurrency_in_flight",
            Unit::Count,
            "Current concurrency reservations held across all keys"
        );

        // scheduling (C5)
        describe_counter!(
            "gateway_scheduling_total",
            Unit::Count,
            "Total scheduling decisions, labeled by rule and outcome"
        );
        describe_histogram!(
            "gateway_scheduling_duration_seconds",
            Unit::Seconds,
            "Time spent selecting an upstream account"
        );

        // rate limiting (C7)
        describe_counter!(
            "gateway_rate_limit_rejected_total",
            Unit::Count,
            "Total requests rejected by rate limiter"
        );
        describe_counter!(
            "gateway_rate_limit_allowed_total",
            Unit::Count,
            "Total requests allowed by rate limiter"
        );
        describe_counter!(
            "gateway_account_rate_limited_total",
            Unit::Count,
            "Total times an upstream account was marked rate-limited"
        );

        // usage recording (C8)
        describe_counter!(
            "gateway_usage_requests_total",
            Unit::Count,
            "Total requests recorded by the usage recorder"
        );
        describe_counter!(
            "gateway_usage_tokens_total",
            Unit::Count,
            "Total tokens recorded, labeled by category"
        );
        describe_counter!(
            "gateway_usage_cost_micros_total",
            Unit::Count,
            "Total computed cost in micro-USD, labeled by platform"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
