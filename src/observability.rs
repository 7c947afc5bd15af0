use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::{ErrorKind, SchedulingError};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "boardroom_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "boardroom_operation_duration_seconds";

/// Counter: occurrences expanded from recurrence rules, committed or not.
pub const OCCURRENCES_GENERATED: &str = "boardroom_occurrences_generated";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: bookings currently stored.
pub const BOOKINGS_ACTIVE: &str = "boardroom_bookings_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "boardroom_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "boardroom_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Status label for an operation result.
pub fn status_label<T>(result: &Result<T, SchedulingError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => match e.kind() {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConcurrentModification => "concurrent_modification",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Storage => "storage",
        },
    }
}

/// Run one engine operation, recording its count and latency under `op`.
pub async fn timed<T>(
    op: &'static str,
    fut: impl Future<Output = Result<T, SchedulingError>>,
) -> Result<T, SchedulingError> {
    let start = Instant::now();
    let result = fut.await;
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status_label(&result)).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(start.elapsed().as_secs_f64());
    result
}
