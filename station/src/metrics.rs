use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref PROPERTIES_PUBLISHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "station_properties_published_total",
        "Total property updates published to the cloud"
    ))
    .unwrap();
    pub static ref PUBLISH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "station_publish_failures_total",
        "Total property updates dropped after publish retries"
    ))
    .unwrap();
    pub static ref INBOUND_WRITES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "station_inbound_writes_total",
        "Total cloud writes applied to read-write properties"
    ))
    .unwrap();
    pub static ref INBOUND_REJECTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "station_inbound_rejected_total",
        "Total cloud writes rejected (unknown, read-only, malformed or mistyped)"
    ))
    .unwrap();
    pub static ref CALLBACK_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "station_callback_failures_total",
        "Total change callbacks that returned an error"
    ))
    .unwrap();
    pub static ref SNAPSHOTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "station_snapshots_total",
        "Total weather snapshots applied to the registry"
    ))
    .unwrap();
    pub static ref PENDING_UPDATES: Gauge = Gauge::with_opts(Opts::new(
        "station_pending_updates",
        "Property updates collected by the last flush"
    ))
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY
        .register(Box::new(PROPERTIES_PUBLISHED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PUBLISH_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INBOUND_WRITES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INBOUND_REJECTED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CALLBACK_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(SNAPSHOTS_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(PENDING_UPDATES.clone())).unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
