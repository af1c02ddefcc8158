//! Prometheus metrics for sheetsync-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for sync passes by direction and outcome.
pub static SYNC_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sheetsync_operations_total",
        "Total number of sync passes",
        &["direction", "status"]
    )
    .expect("Failed to register SYNC_OPERATIONS")
});

/// Counter for row-level actions applied during sync passes.
pub static SYNC_ROWS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sheetsync_rows_total",
        "Total number of rows handled, by action",
        &["action"]
    )
    .expect("Failed to register SYNC_ROWS")
});

/// Counter for detected conflicts by type.
pub static CONFLICTS_DETECTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sheetsync_conflicts_total",
        "Total number of conflicts detected",
        &["conflict_type"]
    )
    .expect("Failed to register CONFLICTS_DETECTED")
});

/// Histogram for Sheets API call duration by method.
pub static SHEETS_API_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sheetsync_sheets_api_duration_seconds",
        "Sheets API call duration in seconds",
        &["method"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register SHEETS_API_DURATION")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sheetsync_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for errors by type.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sheetsync_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SYNC_OPERATIONS);
    Lazy::force(&SYNC_ROWS);
    Lazy::force(&CONFLICTS_DETECTED);
    Lazy::force(&SHEETS_API_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record a completed sync pass.
pub fn record_sync_operation(direction: &str, status: &str) {
    SYNC_OPERATIONS.with_label_values(&[direction, status]).inc();
}

/// Record `count` row actions of one kind (pushed, pulled, skipped, updated).
pub fn record_sync_rows(action: &str, count: u64) {
    SYNC_ROWS.with_label_values(&[action]).inc_by(count as f64);
}

/// Record a detected conflict.
pub fn record_conflict(conflict_type: &str) {
    CONFLICTS_DETECTED.with_label_values(&[conflict_type]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
