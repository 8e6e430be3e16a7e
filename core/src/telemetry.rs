use crate::config::{LogFormat, TelemetryConfig};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr so stdout stays clean for command output
    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    if config.metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;

        tracing::info!(
            port = config.metrics_port,
            "Metrics endpoint started at http://0.0.0.0:{}/metrics",
            config.metrics_port
        );
    }

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "tfl_collector_requests_total",
        "Upstream requests by dataset and response class"
    );
    describe_counter!(
        "tfl_collector_retries_total",
        "Retried upstream requests by response class"
    );
    describe_counter!(
        "tfl_collector_batches_failed_total",
        "Batches that reached a terminal failure"
    );
    describe_counter!(
        "tfl_collector_duplicates_dropped_total",
        "Records removed by deduplication"
    );
    describe_counter!(
        "tfl_collector_records_quarantined_total",
        "Upstream entries rejected at the payload boundary"
    );
    describe_histogram!(
        "tfl_collector_snapshot_rows",
        Unit::Count,
        "Rows written per snapshot"
    );
    describe_histogram!(
        "tfl_collector_fetch_duration_ms",
        Unit::Milliseconds,
        "Wall time per upstream request"
    );
}

pub fn shutdown() {
    tracing::info!("Shutting down telemetry");
}
