//! Prometheus metrics, registered lazily in the default registry.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, TextEncoder};

pub static INGEST_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("nexus_ingest_total", "Total events accepted by ingest").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static EVENTS_SCANNED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "nexus_events_scanned_total",
        "Events handed to the detector",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static PREDICTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "nexus_predictions_total",
            "Predictions recorded, by event type",
        ),
        &["type"],
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static SKIPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "nexus_skipped_total",
            "Events skipped without a prediction, by reason",
        ),
        &["reason"],
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static HOTSPOTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("nexus_hotspots_total", "Hotspots persisted, by severity"),
        &["severity"],
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static BASELINES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("nexus_baselines_total", "Baselines written, by source"),
        &["source"],
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static DETECTION_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "nexus_detection_failures_total",
        "Events whose detection failed and was skipped by the scan",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static SIDE_EFFECT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "nexus_side_effect_failures_total",
            "Alert, notification and recommendation failures after a hotspot",
        ),
        &["kind"],
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static RECOMMENDATION_CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "nexus_recommendation_cache_hits_total",
        "Hotspots that reused a pending recommendation",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static SCAN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new(
        "nexus_scan_duration_seconds",
        "Histogram of batch scan duration",
    ))
    .unwrap();
    prometheus::register(Box::new(h.clone())).unwrap();
    h
});

/// Touch every metric so they appear in the first scrape.
pub fn init() {
    let _ = &*INGEST_TOTAL;
    let _ = &*EVENTS_SCANNED;
    let _ = &*PREDICTIONS_TOTAL;
    let _ = &*SKIPPED_TOTAL;
    let _ = &*HOTSPOTS_TOTAL;
    let _ = &*BASELINES_TOTAL;
    let _ = &*DETECTION_FAILURES;
    let _ = &*SIDE_EFFECT_FAILURES;
    let _ = &*RECOMMENDATION_CACHE_HITS;
    let _ = &*SCAN_DURATION;
}

/// Text exposition of the default registry.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
