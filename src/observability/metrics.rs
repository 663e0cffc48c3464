// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

/// Prometheus metrics definitions for mapgate
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint", "status"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 30.0]
    ).unwrap();

    /// HTTP request count
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    ).unwrap();

    // ============================================================================
    // Authentication Metrics
    // ============================================================================

    /// Authentication attempt count
    pub static ref AUTH_TOTAL: CounterVec = register_counter_vec!(
        "auth_total",
        "Total authentication attempts",
        &["result"]
    ).unwrap();

    // ============================================================================
    // OWS Gateway Metrics
    // ============================================================================

    /// OWS requests by service and decision
    pub static ref OWS_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "ows_requests_total",
        "Total number of OWS requests",
        &["service", "decision"]
    ).unwrap();

    /// Transaction operations refused by the permission check
    pub static ref OWS_DENIED_OPERATIONS: CounterVec = register_counter_vec!(
        "ows_denied_operations_total",
        "Transaction operations denied by layer permissions",
        &["action"]
    ).unwrap();

    /// Upstream map renderer round trip in seconds
    pub static ref UPSTREAM_DURATION: HistogramVec = register_histogram_vec!(
        "upstream_request_duration_seconds",
        "Map renderer request duration in seconds",
        &["outcome"],
        vec![0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // ============================================================================
    // Sync Metrics
    // ============================================================================

    /// Applied change sets by outcome
    pub static ref CHANGESETS_TOTAL: CounterVec = register_counter_vec!(
        "sync_changesets_total",
        "Total number of applied change sets",
        &["outcome"]
    ).unwrap();

    /// Change set duration in seconds
    pub static ref CHANGESET_DURATION: HistogramVec = register_histogram_vec!(
        "sync_changeset_duration_seconds",
        "Change set duration in seconds",
        &["outcome"],
        vec![0.010, 0.050, 0.100, 0.500, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    /// Bytes received from upload streams
    pub static ref UPLOAD_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "sync_upload_bytes_total",
        "Total bytes received for project uploads",
        &[]
    ).unwrap();

    /// Project lock wait duration in seconds
    pub static ref LOCK_WAIT: HistogramVec = register_histogram_vec!(
        "sync_lock_wait_duration_seconds",
        "Project lock wait duration in seconds",
        &["lock_type"],
        vec![0.0001, 0.001, 0.010, 0.100, 0.500, 1.0, 5.0, 30.0]
    ).unwrap();

    // ============================================================================
    // System Metrics
    // ============================================================================

    /// Concurrent requests gauge
    pub static ref CONCURRENT_REQUESTS: GaugeVec = register_gauge_vec!(
        "concurrent_requests",
        "Number of concurrent requests being processed",
        &["protocol"]
    ).unwrap();
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn increment_auth_success() {
    AUTH_TOTAL.with_label_values(&["success"]).inc();
}

pub fn increment_auth_failure() {
    AUTH_TOTAL.with_label_values(&["failure"]).inc();
}

/// Record an OWS request and the gateway decision for it
pub fn increment_ows_request(service: &str, decision: &str) {
    OWS_REQUESTS_TOTAL
        .with_label_values(&[service, decision])
        .inc();
}

pub fn increment_denied_operation(action: &str) {
    OWS_DENIED_OPERATIONS.with_label_values(&[action]).inc();
}

pub fn record_upstream_duration(outcome: &str, duration: f64) {
    UPSTREAM_DURATION
        .with_label_values(&[outcome])
        .observe(duration);
}

/// Record a finished change set
pub fn record_changeset(outcome: &str, duration: f64) {
    CHANGESETS_TOTAL.with_label_values(&[outcome]).inc();
    CHANGESET_DURATION
        .with_label_values(&[outcome])
        .observe(duration);
}

pub fn increment_upload_bytes(bytes: u64) {
    UPLOAD_BYTES_TOTAL
        .with_label_values(&[])
        .inc_by(bytes as f64);
}

/// Record lock wait duration
pub fn record_lock_wait(lock_type: &str, duration: f64) {
    LOCK_WAIT.with_label_values(&[lock_type]).observe(duration);
}

/// Increment HTTP request counter
pub fn increment_http_request(method: &str, endpoint: &str, status: &str) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, status])
        .inc();
}

/// Record HTTP request duration
pub fn record_http_duration(method: &str, endpoint: &str, status: &str, duration: f64) {
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, endpoint, status])
        .observe(duration);
}

pub fn inc_concurrent_requests(protocol: &str) {
    CONCURRENT_REQUESTS.with_label_values(&[protocol]).inc();
}

pub fn dec_concurrent_requests(protocol: &str) {
    CONCURRENT_REQUESTS.with_label_values(&[protocol]).dec();
}

/// Gather all metrics for Prometheus exposition
pub fn gather_metrics() -> Vec<u8> {
    use prometheus::Encoder;
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    buffer
}
