//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Discovery (searches, result counts)
//! - Preparation (submissions, status checks, timeouts, cancellations)
//! - Commits
//! - External services (request latency per endpoint)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Discovery Metrics
// =============================================================================

/// Finished searches by outcome.
pub static SEARCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scout_searches_total", "Total finished searches"),
        &["outcome"], // "found", "no_results", "connection_error"
    )
    .unwrap()
});

/// Results per finished search.
pub static SEARCH_RESULTS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "scout_search_results",
            "Number of results returned per search",
        )
        .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Preparation Metrics
// =============================================================================

/// Handles sent to the preparation service.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scout_jobs_submitted_total",
        "Total handles submitted for preparation",
    )
    .unwrap()
});

/// Metadata status checks by result.
pub static POLL_CHECKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scout_poll_checks_total", "Total metadata status checks"),
        &["result"], // "ready", "not_ready", "error"
    )
    .unwrap()
});

/// Pools whose deadline expired before every job was ready.
pub static POOL_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scout_pool_timeouts_total",
        "Total preparation pools that hit their deadline",
    )
    .unwrap()
});

/// Prepared items released without being committed.
pub static CANCELLATIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scout_cancellations_total",
        "Total prepared items released",
    )
    .unwrap()
});

// =============================================================================
// Commit Metrics
// =============================================================================

/// Commit calls by result.
pub static COMMITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scout_commits_total", "Total commit calls"),
        &["result"], // "success", "failed"
    )
    .unwrap()
});

/// Commit call duration in seconds.
pub static COMMIT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("scout_commit_duration_seconds", "Duration of commit calls")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// External service request duration.
pub static EXTERNAL_SERVICE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "scout_external_service_duration_seconds",
            "Duration of external service calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["service", "operation"],
    )
    .unwrap()
});

/// External service requests total.
pub static EXTERNAL_SERVICE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "scout_external_service_requests_total",
            "Total external service requests",
        ),
        &["service", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Discovery
        Box::new(SEARCHES.clone()),
        Box::new(SEARCH_RESULTS.clone()),
        // Preparation
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(POLL_CHECKS.clone()),
        Box::new(POOL_TIMEOUTS.clone()),
        Box::new(CANCELLATIONS.clone()),
        // Commits
        Box::new(COMMITS.clone()),
        Box::new(COMMIT_DURATION.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_DURATION.clone()),
        Box::new(EXTERNAL_SERVICE_REQUESTS.clone()),
    ]
}
