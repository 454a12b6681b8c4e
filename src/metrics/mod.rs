//! Prometheus metrics
//!
//! Recording goes through the free functions below so the pool, cache and
//! breaker need no handle; they are no-ops until [`AppMetrics`] installs the
//! recorder.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::database::PoolSize;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const QUERY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];
const PROBE_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

#[derive(Clone)]
pub struct AppMetrics {
    prometheus_handle: Arc<PrometheusHandle>,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::with_config(None)
    }

    /// Install the process-wide recorder on first call; later calls share it
    pub fn with_config(config: Option<&crate::config::AppConfig>) -> Self {
        let handle = PROMETHEUS_HANDLE.get_or_init(|| {
            let builder = PrometheusBuilder::new();

            let builder = if let Some(cfg) = config {
                builder
                    .add_global_label("service", cfg.app.name.clone())
                    .add_global_label("version", cfg.app.version.clone())
                    .add_global_label("environment", cfg.app.environment.clone())
            } else {
                builder
            };

            let builder = with_buckets(builder, "database_queries_duration_seconds", QUERY_BUCKETS);
            let builder = with_buckets(builder, "database_health_probe_duration_seconds", PROBE_BUCKETS);

            Self::describe_metrics();

            let recorder = builder.build_recorder();
            let handle = recorder.handle();
            if let Err(e) = ::metrics::set_global_recorder(recorder) {
                tracing::warn!(error = %e, "Metrics recorder already installed, output will be empty");
            }
            handle
        });

        Self {
            prometheus_handle: Arc::new(handle.clone()),
        }
    }

    fn describe_metrics() {
        // Database metrics
        describe_counter!("database_queries_total", "Total number of database operations");
        describe_histogram!(
            "database_queries_duration_seconds",
            "Database operation duration in seconds, including the wait for a connection"
        );
        describe_gauge!("database_connections_active", "Number of checked-out database connections");
        describe_gauge!("database_connections_idle", "Number of open database connections waiting to be used");
        describe_gauge!("database_connections_total", "Number of open database connections");

        // Health and breaker
        describe_counter!("database_health_probes_total", "Total number of database health probes");
        describe_histogram!(
            "database_health_probe_duration_seconds",
            "Database health probe duration in seconds"
        );
        describe_gauge!("circuit_breaker_open", "1 while the database circuit breaker is open");
        describe_counter!(
            "circuit_breaker_rejections_total",
            "Calls rejected because the circuit breaker was open"
        );

        // Cache metrics
        describe_counter!("cache_hits_total", "Total number of cache hits");
        describe_counter!("cache_misses_total", "Total number of cache misses");
        describe_counter!("cache_errors_total", "Cache operations that failed or timed out");
    }

    // Prometheus export
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn with_buckets(builder: PrometheusBuilder, name: &str, buckets: &[f64]) -> PrometheusBuilder {
    match builder.set_buckets_for_metric(Matcher::Full(name.to_string()), buckets) {
        Ok(builder) => builder,
        Err(e) => unreachable!("bucket list for {name} is empty: {e}"),
    }
}

// Database metrics
pub fn record_db_query(operation: &'static str, success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "error" };
    counter!("database_queries_total", "operation" => operation, "outcome" => outcome).increment(1);
    histogram!("database_queries_duration_seconds", "operation" => operation).record(duration.as_secs_f64());
}

pub fn set_pool_connections(size: PoolSize) {
    gauge!("database_connections_active").set(size.active as f64);
    gauge!("database_connections_idle").set(size.idle as f64);
    gauge!("database_connections_total").set(size.total as f64);
}

// Health and breaker
pub fn record_health_probe(healthy: bool, duration: Duration) {
    let outcome = if healthy { "healthy" } else { "unhealthy" };
    counter!("database_health_probes_total", "outcome" => outcome).increment(1);
    histogram!("database_health_probe_duration_seconds").record(duration.as_secs_f64());
}

pub fn set_circuit_open(open: bool) {
    gauge!("circuit_breaker_open").set(if open { 1.0 } else { 0.0 });
}

pub fn record_circuit_rejection() {
    counter!("circuit_breaker_rejections_total").increment(1);
}

// Cache metrics
pub fn record_cache_hit() {
    counter!("cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    counter!("cache_misses_total").increment(1);
}

pub fn record_cache_error(operation: &'static str) {
    counter!("cache_errors_total", "operation" => operation).increment(1);
}
