//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("aervyn_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("aervyn_activities_received_total", "Inbound activities by type and outcome"),
        &["activity_type", "outcome"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("aervyn_activities_sent_total", "Outbound activity deliveries by type and status"),
        &["activity_type", "status"]
    ).expect("metric can be created");
    pub static ref SIGNATURE_VERIFICATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("aervyn_signature_verifications_total", "Inbound signature checks by result"),
        &["result"]
    ).expect("metric can be created");
    pub static ref REMOTE_FETCHES: IntCounterVec = IntCounterVec::new(
        Opts::new("aervyn_remote_fetches_total", "Outbound document fetches by kind and status"),
        &["kind", "status"]
    ).expect("metric can be created");
    pub static ref REMOTE_FETCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "aervyn_remote_fetch_duration_seconds",
            "Outbound document fetch duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["kind"]
    ).expect("metric can be created");

    // Timeline Metrics
    pub static ref TIMELINE_BUILD_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "aervyn_timeline_build_duration_seconds",
            "Timeline assembly duration in seconds"
        ).buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["timeline"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("aervyn_errors_total", "Total number of errors returned to clients"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ACTIVITIES_RECEIVED.clone()))
            .expect("ACTIVITIES_RECEIVED can be registered");
        REGISTRY
            .register(Box::new(ACTIVITIES_SENT.clone()))
            .expect("ACTIVITIES_SENT can be registered");
        REGISTRY
            .register(Box::new(SIGNATURE_VERIFICATIONS.clone()))
            .expect("SIGNATURE_VERIFICATIONS can be registered");
        REGISTRY
            .register(Box::new(REMOTE_FETCHES.clone()))
            .expect("REMOTE_FETCHES can be registered");
        REGISTRY
            .register(Box::new(REMOTE_FETCH_DURATION_SECONDS.clone()))
            .expect("REMOTE_FETCH_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(TIMELINE_BUILD_DURATION_SECONDS.clone()))
            .expect("TIMELINE_BUILD_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
