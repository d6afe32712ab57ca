use lazy_static::lazy_static;
use prometheus::{Counter, Histogram, register_counter, register_histogram};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("storefront_requests_total", "Total number of requests").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "storefront_request_latency_seconds",
        "Request latency in seconds"
    )
    .unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter = register_counter!(
        "storefront_rate_limited_total",
        "Requests rejected by the rate limiter"
    )
    .unwrap();
    pub static ref CORS_DENIED_TOTAL: Counter = register_counter!(
        "storefront_cors_denied_total",
        "Requests rejected by the CORS gate"
    )
    .unwrap();
    pub static ref HANDLER_PANICS_TOTAL: Counter = register_counter!(
        "storefront_handler_panics_total",
        "Panics caught by the terminal error stage"
    )
    .unwrap();
    pub static ref WORKER_RESTARTS_TOTAL: Counter = register_counter!(
        "storefront_worker_restarts_total",
        "Worker exits observed by the supervisor"
    )
    .unwrap();
}
