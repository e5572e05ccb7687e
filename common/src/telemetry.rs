// Telemetry module for structured logging, metrics, and tracing

use crate::config::ObservabilityConfig;
use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace, Resource};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "device-monitor";

/// Install the global subscriber: flattened JSON events on stdout, plus span
/// export when an OTLP endpoint is configured.
///
/// `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(&config.log_level)))
        .with_context(|| format!("Invalid log level '{}'", config.log_level))?;

    // device_id and interval_ms land at the top level of each record
    let json_layer = fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true);

    let span_export = match config.tracing_endpoint.as_deref() {
        Some(endpoint) => Some(tracing_opentelemetry::layer().with_tracer(otlp_tracer(endpoint)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(span_export)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        log_level = %config.log_level,
        span_export = config.tracing_endpoint.is_some(),
        "Logging initialized"
    );
    Ok(())
}

/// A bare level applies to this service's crates only; dependencies stay at warn.
/// Anything that already looks like a directive list is used as given.
fn filter_directives(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("warn,common={level},device_monitor={level}")
    }
}

fn otlp_tracer(endpoint: &str) -> Result<trace::Tracer> {
    let resource = Resource::new([
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace::config().with_resource(resource))
        .install_batch(runtime::Tokio)
        .with_context(|| format!("Failed to install OTLP span exporter for {}", endpoint))
}

/// Flush buffered spans before exit
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

/// Initialize Prometheus metrics exporter and describe the scheduler metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("poll_success_total", "Poll callbacks that completed");
    describe_counter!("poll_failed_total", "Poll callbacks that failed or panicked");
    describe_histogram!(
        "interval_fire_duration_seconds",
        "Time spent executing one interval group"
    );
    describe_gauge!("due_queue_size", "Interval entries waiting in the due queue");
    describe_gauge!("interval_groups_active", "Interval groups with at least one binding");
    describe_counter!(
        "registrations_batched_total",
        "Distinct registrations handed to the rebuild pipeline"
    );
    describe_counter!(
        "resolution_failed_total",
        "Registrations dropped because they failed to resolve"
    );
    describe_counter!(
        "resource_setup_failed_total",
        "One-time resource setups that failed"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_poll_success(interval_ms: u64) {
    counter!("poll_success_total", "interval_ms" => interval_ms.to_string()).increment(1);
}

#[inline]
pub fn record_poll_failure(interval_ms: u64, reason: &'static str) {
    counter!(
        "poll_failed_total",
        "interval_ms" => interval_ms.to_string(),
        "reason" => reason
    )
    .increment(1);
}

#[inline]
pub fn record_fire_duration(interval_ms: u64, duration_seconds: f64) {
    histogram!(
        "interval_fire_duration_seconds",
        "interval_ms" => interval_ms.to_string()
    )
    .record(duration_seconds);
}

/// Update the due queue and active group gauges
#[inline]
pub fn update_schedule_gauges(queue_size: usize, active_groups: usize) {
    gauge!("due_queue_size").set(queue_size as f64);
    gauge!("interval_groups_active").set(active_groups as f64);
}

#[inline]
pub fn record_registrations_batched(count: usize) {
    counter!("registrations_batched_total").increment(count as u64);
}

#[inline]
pub fn record_resolution_failure() {
    counter!("resolution_failed_total").increment(1);
}

#[inline]
pub fn record_setup_failure(interval_ms: u64) {
    counter!("resource_setup_failed_total", "interval_ms" => interval_ms.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_scopes_to_service_crates() {
        assert_eq!(
            filter_directives("debug"),
            "warn,common=debug,device_monitor=debug"
        );
        assert_eq!(filter_directives("info,tokio=trace"), "info,tokio=trace");
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = ObservabilityConfig {
            log_level: "common=notalevel".to_string(),
            ..Default::default()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(init_logging(&config).is_err());
        }
    }

    #[test]
    fn test_metrics_recording() {
        // Without an installed recorder these are no-ops and must not panic
        record_poll_success(1000);
        record_poll_failure(1000, "endpoint_update");
        record_fire_duration(1000, 0.25);
        update_schedule_gauges(3, 2);
        record_registrations_batched(5);
        record_resolution_failure();
        record_setup_failure(5000);
    }
}
