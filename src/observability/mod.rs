//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing via `tracing-subscriber`
//! - OTLP metrics for transactions, change delivery and live queries

pub mod metrics;
pub mod tracing;
