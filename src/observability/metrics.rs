//! OTLP metrics for transactions and change delivery.
//!
//! Key metrics:
//! - tarn_transactions_committed_total: Counter of committed transactions
//! - tarn_transactions_aborted_total: Counter of rolled back transactions
//! - tarn_transaction_latency_seconds: Histogram from open to commit
//! - tarn_changes_published_total: Counter of change events entering the feed
//! - tarn_broadcast_dropped_total: Counter of undecodable inbound messages
//! - tarn_live_query_runs_total: Counter of live query executions

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

use crate::storage::TxMode;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Where a change event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Committed by this database instance.
    Local,
    /// Received over the broadcast transport.
    Remote,
}

impl ChangeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

#[derive(Debug)]
pub struct Metrics {
    pub transactions_committed: Counter<u64>,
    pub transactions_aborted: Counter<u64>,
    pub transaction_latency: Histogram<f64>,
    pub changes_published: Counter<u64>,
    pub broadcast_dropped: Counter<u64>,
    pub live_query_runs: Counter<u64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            transactions_committed: meter
                .u64_counter("tarn_transactions_committed_total")
                .with_description("Transactions that committed")
                .with_unit("1")
                .init(),
            transactions_aborted: meter
                .u64_counter("tarn_transactions_aborted_total")
                .with_description("Transactions rolled back by a transactor or storage error")
                .with_unit("1")
                .init(),
            transaction_latency: meter
                .f64_histogram("tarn_transaction_latency_seconds")
                .with_description("Transaction latency from open to commit")
                .with_unit("s")
                .init(),
            changes_published: meter
                .u64_counter("tarn_changes_published_total")
                .with_description("Change events pushed onto the local feed")
                .with_unit("1")
                .init(),
            broadcast_dropped: meter
                .u64_counter("tarn_broadcast_dropped_total")
                .with_description("Inbound broadcast messages dropped as malformed")
                .with_unit("1")
                .init(),
            live_query_runs: meter
                .u64_counter("tarn_live_query_runs_total")
                .with_description("Live query executions started")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
/// Without an endpoint metrics are recorded but never exported.
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        match otel_endpoint {
            Some(endpoint) => {
                use opentelemetry_otlp::{Protocol, WithExportConfig};

                let exporter = opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint)
                    .with_protocol(Protocol::Grpc);

                match opentelemetry_otlp::new_pipeline()
                    .metrics(opentelemetry_sdk::runtime::Tokio)
                    .with_exporter(exporter)
                    .with_period(std::time::Duration::from_secs(10))
                    .build()
                {
                    Ok(provider) => {
                        global::set_meter_provider(provider);
                        tracing::info!(endpoint, "OTLP metrics exporter configured");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to create OTLP exporter, metrics stay local");
                        install_manual_reader();
                    }
                }
            }
            None => install_manual_reader(),
        }

        Metrics::new(&global::meter("tarn"))
    });
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// The global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

pub fn record_commit(mode: TxMode, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("mode", mode.as_str())];
        m.transactions_committed.add(1, &attrs);
        m.transaction_latency.record(latency_seconds, &attrs);
    }
}

pub fn record_abort(mode: TxMode) {
    if let Some(m) = METRICS.get() {
        m.transactions_aborted
            .add(1, &[KeyValue::new("mode", mode.as_str())]);
    }
}

pub fn record_changes_published(source: ChangeSource) {
    if let Some(m) = METRICS.get() {
        m.changes_published
            .add(1, &[KeyValue::new("source", source.as_str())]);
    }
}

pub fn record_dropped_message() {
    if let Some(m) = METRICS.get() {
        m.broadcast_dropped.add(1, &[]);
    }
}

pub fn record_live_query_run() {
    if let Some(m) = METRICS.get() {
        m.live_query_runs.add(1, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_before_init_is_a_no_op() {
        // Whether or not another test initialized metrics, these must not panic.
        record_abort(TxMode::ReadWrite);
        record_dropped_message();
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(metrics().is_some());
    }

    #[test]
    fn test_record_after_init() {
        init_metrics();
        record_commit(TxMode::ReadOnly, 0.002);
        record_commit(TxMode::ReadWrite, 0.010);
        record_changes_published(ChangeSource::Local);
        record_changes_published(ChangeSource::Remote);
        record_live_query_run();
    }
}
