//! Screening metrics

use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, CounterVec,
    HistogramVec, IntCounterVec,
};

lazy_static::lazy_static! {
    pub static ref SCREENING_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "screening_requests_total",
        "Screening requests by outcome",
        &["search_type", "outcome"]
    )
    .unwrap();

    pub static ref SOURCE_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "screening_source_request_duration_seconds",
        "Per-source query duration",
        &["source"]
    )
    .unwrap();

    pub static ref SOURCE_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "screening_source_requests_total",
        "Per-source query outcomes",
        &["source", "status"]
    )
    .unwrap();

    pub static ref LIST_CACHE_REFRESH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "screening_list_cache_refresh_total",
        "Consolidated list refresh attempts",
        &["result"]
    )
    .unwrap();

    pub static ref PERSISTENCE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "screening_persistence_failures_total",
        "Evidence writes that failed after retry",
        &["artifact"]
    )
    .unwrap();
}
