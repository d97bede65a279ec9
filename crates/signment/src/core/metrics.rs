//! Metrics collection using Prometheus
//!
//! This module provides a centralized metrics registry for tracking:
//! - Web tier metrics (track requests, WebSocket clients)
//! - Simulation metrics (ticks, status transitions, active simulations)
//! - Notification metrics (enqueued/sent/failed by kind, queue depth)
//! - System health metrics (errors, cache hit rate, uptime)

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, Counter,
    CounterVec, Gauge, GaugeVec, HistogramVec,
};

// ======================
// WEB TIER METRICS
// ======================

lazy_static! {
    /// Track requests by outcome
    /// Labels: outcome (ok/missing-input/invalid-input-response/not-found/database-error/server-error/rate-limited)
    pub static ref TRACK_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "signment_track_requests_total",
        "Track requests by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Currently connected WebSocket clients
    pub static ref WS_CLIENTS: Gauge = register_gauge!(
        "signment_ws_clients",
        "Currently connected WebSocket clients"
    )
    .unwrap();

    /// Broadcasts pushed to WebSocket subscribers
    pub static ref WS_BROADCASTS_TOTAL: Counter = register_counter!(
        "signment_ws_broadcasts_total",
        "Tracking updates pushed to WebSocket subscribers"
    )
    .unwrap();
}

// ======================
// SIMULATION METRICS
// ======================

lazy_static! {
    /// Currently running simulation tasks
    pub static ref ACTIVE_SIMULATIONS: Gauge = register_gauge!(
        "signment_active_simulations",
        "Currently running simulation tasks"
    )
    .unwrap();

    /// Simulation loop iterations
    pub static ref SIMULATION_TICKS_TOTAL: Counter = register_counter!(
        "signment_simulation_ticks_total",
        "Simulation loop iterations across all shipments"
    )
    .unwrap();

    /// Status transitions applied
    /// Labels: from, to
    pub static ref STATUS_TRANSITIONS_TOTAL: CounterVec = register_counter_vec!(
        "signment_status_transitions_total",
        "Status transitions applied by the simulator",
        &["from", "to"]
    )
    .unwrap();

    /// Shipments by status (updated by the stats reporters)
    /// Labels: status
    pub static ref SHIPMENTS_BY_STATUS: GaugeVec = register_gauge_vec!(
        "signment_shipments_by_status",
        "Number of shipments by status",
        &["status"]
    )
    .unwrap();
}

// ======================
// NOTIFICATION METRICS
// ======================

lazy_static! {
    /// Notifications enqueued
    /// Labels: kind (email/webhook)
    pub static ref NOTIFICATIONS_ENQUEUED_TOTAL: CounterVec = register_counter_vec!(
        "signment_notifications_enqueued_total",
        "Notifications enqueued by kind",
        &["kind"]
    )
    .unwrap();

    /// Notifications delivered
    /// Labels: kind
    pub static ref NOTIFICATIONS_SENT_TOTAL: CounterVec = register_counter_vec!(
        "signment_notifications_sent_total",
        "Notifications delivered by kind",
        &["kind"]
    )
    .unwrap();

    /// Notifications that failed delivery
    /// Labels: kind, reason
    pub static ref NOTIFICATIONS_FAILED_TOTAL: CounterVec = register_counter_vec!(
        "signment_notifications_failed_total",
        "Notification delivery failures by kind and reason",
        &["kind", "reason"]
    )
    .unwrap();

    /// Current notification queue depth
    pub static ref NOTIFICATION_QUEUE_DEPTH: Gauge = register_gauge!(
        "signment_notification_queue_depth",
        "Current number of queued notifications"
    )
    .unwrap();

    /// Delivery duration by kind
    pub static ref NOTIFICATION_DELIVERY_SECONDS: HistogramVec = register_histogram_vec!(
        "signment_notification_delivery_seconds",
        "Time spent delivering a notification",
        &["kind"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();
}

// ======================
// SYSTEM HEALTH METRICS
// ======================

lazy_static! {
    /// Errors count by type and operation
    /// Labels: error_type (database/redis/telegram/http/smtp/validation), operation
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "signment_errors_total",
        "Total number of errors by type and operation",
        &["error_type", "operation"]
    )
    .unwrap();

    /// Cache hits/misses
    /// Labels: cache (shipment/geocode/route_templates), result (hit/miss)
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "signment_cache_lookups_total",
        "Cache lookups by cache family and result",
        &["cache", "result"]
    )
    .unwrap();

    /// Rate limit hits
    /// Labels: surface (web/bot)
    pub static ref RATE_LIMIT_HITS_TOTAL: CounterVec = register_counter_vec!(
        "signment_rate_limit_hits_total",
        "Requests rejected by the rate limiter",
        &["surface"]
    )
    .unwrap();

    /// Bot command usage
    /// Labels: command
    pub static ref COMMAND_USAGE_TOTAL: CounterVec = register_counter_vec!(
        "signment_command_usage_total",
        "Bot command executions",
        &["command"]
    )
    .unwrap();

    /// Service uptime in seconds
    pub static ref UPTIME_SECONDS: Counter = register_counter!(
        "signment_uptime_seconds",
        "Service uptime in seconds"
    )
    .unwrap();

    /// Dispatcher reconnection count
    pub static ref DISPATCHER_RECONNECTIONS_TOTAL: Counter = register_counter!(
        "signment_dispatcher_reconnections_total",
        "Telegram dispatcher reconnections"
    )
    .unwrap();
}

/// Initialize metrics (call this at startup to register all metrics)
pub fn init_metrics() {
    log::info!("Initializing metrics registry...");

    let _ = &*TRACK_REQUESTS_TOTAL;
    let _ = &*WS_CLIENTS;
    let _ = &*WS_BROADCASTS_TOTAL;
    let _ = &*ACTIVE_SIMULATIONS;
    let _ = &*SIMULATION_TICKS_TOTAL;
    let _ = &*STATUS_TRANSITIONS_TOTAL;
    let _ = &*SHIPMENTS_BY_STATUS;
    let _ = &*NOTIFICATIONS_ENQUEUED_TOTAL;
    let _ = &*NOTIFICATIONS_SENT_TOTAL;
    let _ = &*NOTIFICATIONS_FAILED_TOTAL;
    let _ = &*NOTIFICATION_QUEUE_DEPTH;
    let _ = &*NOTIFICATION_DELIVERY_SECONDS;
    let _ = &*ERRORS_TOTAL;
    let _ = &*CACHE_LOOKUPS_TOTAL;
    let _ = &*RATE_LIMIT_HITS_TOTAL;
    let _ = &*COMMAND_USAGE_TOTAL;
    let _ = &*UPTIME_SECONDS;
    let _ = &*DISPATCHER_RECONNECTIONS_TOTAL;

    // Pre-register common label combinations so they show up in /metrics
    // with 0 values before first use.
    for outcome in [
        "ok",
        "missing-input",
        "invalid-input-response",
        "not-found",
        "database-error",
        "server-error",
        "rate-limited",
    ] {
        TRACK_REQUESTS_TOTAL.with_label_values(&[outcome]);
    }

    for kind in ["email", "webhook"] {
        NOTIFICATIONS_ENQUEUED_TOTAL.with_label_values(&[kind]);
        NOTIFICATIONS_SENT_TOTAL.with_label_values(&[kind]);
    }
    NOTIFICATIONS_FAILED_TOTAL.with_label_values(&["email", "smtp"]);
    NOTIFICATIONS_FAILED_TOTAL.with_label_values(&["webhook", "http"]);
    NOTIFICATIONS_FAILED_TOTAL.with_label_values(&["webhook", "status"]);

    ERRORS_TOTAL.with_label_values(&["database", "query"]);
    ERRORS_TOTAL.with_label_values(&["redis", "command"]);
    ERRORS_TOTAL.with_label_values(&["telegram", "send_message"]);
    ERRORS_TOTAL.with_label_values(&["http", "request"]);
    ERRORS_TOTAL.with_label_values(&["smtp", "send"]);

    RATE_LIMIT_HITS_TOTAL.with_label_values(&["web"]);
    RATE_LIMIT_HITS_TOTAL.with_label_values(&["bot"]);

    log::info!("Metrics registry initialized successfully");
}

/// Helper function to record a track request outcome
pub fn record_track_request(outcome: &str) {
    TRACK_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Helper function to record a status transition
pub fn record_status_transition(from: &str, to: &str) {
    STATUS_TRANSITIONS_TOTAL.with_label_values(&[from, to]).inc();
}

/// Helper function to record an enqueued notification
pub fn record_notification_enqueued(kind: &str) {
    NOTIFICATIONS_ENQUEUED_TOTAL.with_label_values(&[kind]).inc();
}

/// Helper function to record a delivered notification
pub fn record_notification_sent(kind: &str) {
    NOTIFICATIONS_SENT_TOTAL.with_label_values(&[kind]).inc();
}

/// Helper function to record a failed notification delivery
pub fn record_notification_failed(kind: &str, reason: &str) {
    NOTIFICATIONS_FAILED_TOTAL.with_label_values(&[kind, reason]).inc();
}

/// Helper function to record an error
pub fn record_error(error_type: &str, operation: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type, operation]).inc();
}

/// Helper function to record a cache lookup
pub fn record_cache_lookup(cache: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    CACHE_LOOKUPS_TOTAL.with_label_values(&[cache, result]).inc();
}

/// Helper function to record a rate limit hit
pub fn record_rate_limit_hit(surface: &str) {
    RATE_LIMIT_HITS_TOTAL.with_label_values(&[surface]).inc();
}

/// Helper function to record command usage
pub fn record_command(command: &str) {
    COMMAND_USAGE_TOTAL.with_label_values(&[command]).inc();
}

/// Helper function to update the queue depth gauge
pub fn update_queue_depth(depth: usize) {
    NOTIFICATION_QUEUE_DEPTH.set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        // If this doesn't panic, metrics were registered successfully
    }

    #[test]
    fn test_record_track_request() {
        record_track_request("ok");
        let metric = TRACK_REQUESTS_TOTAL.with_label_values(&["ok"]).get();
        assert!(metric >= 1.0);
    }

    #[test]
    fn test_record_status_transition() {
        record_status_transition("Pending", "In_Transit");
        let metric = STATUS_TRANSITIONS_TOTAL
            .with_label_values(&["Pending", "In_Transit"])
            .get();
        assert!(metric >= 1.0);
    }

    #[test]
    fn test_update_queue_depth() {
        update_queue_depth(7);
        assert_eq!(NOTIFICATION_QUEUE_DEPTH.get(), 7.0);
    }
}
