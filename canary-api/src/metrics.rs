use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref TELEMETRY_RECEIVED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "canary_telemetry_received_total",
        "Total telemetry submissions received from devices"
    ))
    .unwrap();
    pub static ref TELEMETRY_INGESTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "canary_telemetry_ingested_total",
        "Total telemetry records stored"
    ))
    .unwrap();
    pub static ref AUTH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "canary_auth_failures_total",
        "Total submissions rejected for a bad mac_address/authenticator_key pair"
    ))
    .unwrap();
    pub static ref REGISTRATIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "canary_registrations_total",
        "Total devices registered"
    ))
    .unwrap();
    pub static ref APPROVALS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "canary_approvals_total",
        "Total approvals, including key rotations"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "canary_db_failures_total",
        "Total failed database statements"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "canary_ingest_latency_seconds",
            "Time taken to authenticate and store one submission"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref REGISTERED_DEVICES: Gauge = Gauge::with_opts(Opts::new(
        "canary_registered_devices",
        "Registered devices as of the last listing"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(TELEMETRY_RECEIVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TELEMETRY_INGESTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AUTH_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REGISTRATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(APPROVALS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(REGISTERED_DEVICES.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
