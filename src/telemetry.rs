//! Telemetry counters exposed on the /metrics endpoint.

use crate::types::ProviderName;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static PROVIDER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "price_feeder_provider_failures_total",
            "Provider queries that returned an error",
        ),
        &["provider"],
    )
    .expect("provider failure counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register provider failure counter");
    counter
});

static PROVIDER_TIMEOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "price_feeder_provider_timeouts_total",
            "Provider queries abandoned at the deadline",
        ),
        &["provider"],
    )
    .expect("provider timeout counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register provider timeout counter");
    counter
});

static MISSED_VOTE_WINDOWS: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "price_feeder_missed_vote_windows_total",
        "Vote windows that closed without a matching vote",
    )
    .expect("missed vote window counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register missed vote window counter");
    counter
});

static TICK_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "price_feeder_tick_failures_total",
        "Aggregation cycles aborted by an error",
    )
    .expect("tick failure counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register tick failure counter");
    counter
});

// Label keeps the historical leading underscore for dashboard compatibility.
fn dashboard_label(provider: &ProviderName) -> String {
    format!("_{}", provider)
}

pub fn provider_failure(provider: &ProviderName) {
    PROVIDER_FAILURES
        .with_label_values(&[&dashboard_label(provider)])
        .inc();
}

pub fn provider_timeout(provider: &ProviderName) {
    PROVIDER_TIMEOUTS
        .with_label_values(&[&dashboard_label(provider)])
        .inc();
}

pub fn missed_vote_window() {
    MISSED_VOTE_WINDOWS.inc();
}

pub fn tick_failure() {
    TICK_FAILURES.inc();
}

/// Prometheus text exposition of all registered metrics.
pub fn encode() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
