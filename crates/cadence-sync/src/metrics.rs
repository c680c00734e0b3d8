//! Sync engine metrics.
//!
//! Counters and histograms complementing the structured logging. Register
//! descriptions once at startup after installing the metrics recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

// ============================================================================
// Ingestion Metrics
// ============================================================================

/// Webhook events received counter.
pub const EVENTS_RECEIVED: &str = "cadence_events_received_total";

/// Webhook events discarded as duplicates counter.
pub const EVENTS_DISCARDED: &str = "cadence_events_discarded_total";

/// Webhook events reaching a terminal processing status counter.
pub const EVENTS_PROCESSED: &str = "cadence_events_processed_total";

/// Rejected webhook signatures counter (security events).
pub const SIGNATURE_REJECTED: &str = "cadence_webhook_signature_rejected_total";

/// Current total ingest queue depth gauge.
pub const QUEUE_DEPTH: &str = "cadence_ingest_queue_depth";

// ============================================================================
// Sync Metrics
// ============================================================================

/// Sync runs by outcome counter.
pub const SYNC_RUNS: &str = "cadence_sync_runs_total";

/// Sync run duration histogram.
pub const SYNC_DURATION: &str = "cadence_sync_duration_seconds";

/// Conflicts detected counter.
pub const CONFLICTS_DETECTED: &str = "cadence_conflicts_detected_total";

/// Conflicts resolved counter.
pub const CONFLICTS_RESOLVED: &str = "cadence_conflicts_resolved_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all sync metric descriptions.
///
/// Call this once at application startup after initializing the metrics
/// recorder.
pub fn register_metrics() {
    describe_counter!(EVENTS_RECEIVED, "Total webhook events received");
    describe_counter!(EVENTS_DISCARDED, "Total duplicate webhook events discarded");
    describe_counter!(
        EVENTS_PROCESSED,
        "Total webhook events reaching a terminal status"
    );
    describe_counter!(
        SIGNATURE_REJECTED,
        "Total webhook deliveries rejected for invalid signatures"
    );
    describe_gauge!(QUEUE_DEPTH, "Current total ingest queue depth");
    describe_counter!(SYNC_RUNS, "Total sync runs by outcome");
    describe_histogram!(SYNC_DURATION, "Duration of sync runs in seconds");
    describe_counter!(CONFLICTS_DETECTED, "Total conflicts detected");
    describe_counter!(CONFLICTS_RESOLVED, "Total conflicts resolved");
}

// ============================================================================
// Recording Helpers
// ============================================================================

/// Records a received webhook event.
pub fn record_event_received(resource_type: &str) {
    counter!(EVENTS_RECEIVED, "resource_type" => resource_type.to_string()).increment(1);
}

/// Records a discarded duplicate event.
pub fn record_event_discarded() {
    counter!(EVENTS_DISCARDED).increment(1);
}

/// Records an event reaching a terminal status (`completed` / `failed`).
pub fn record_event_processed(outcome: &str) {
    counter!(EVENTS_PROCESSED, "outcome" => outcome.to_string()).increment(1);
}

/// Records a rejected webhook signature (security event).
pub fn record_signature_rejected() {
    counter!(SIGNATURE_REJECTED).increment(1);
}

/// Records the current total queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn record_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}

/// Records a sync run outcome and duration.
pub fn record_sync_run(outcome: &str, duration_secs: f64) {
    counter!(SYNC_RUNS, "outcome" => outcome.to_string()).increment(1);
    histogram!(SYNC_DURATION).record(duration_secs);
}

/// Records a detected conflict.
pub fn record_conflict_detected(resource_type: &str) {
    counter!(CONFLICTS_DETECTED, "resource_type" => resource_type.to_string()).increment(1);
}

/// Records a resolved conflict.
pub fn record_conflict_resolved(strategy: &str) {
    counter!(CONFLICTS_RESOLVED, "strategy" => strategy.to_string()).increment(1);
}
