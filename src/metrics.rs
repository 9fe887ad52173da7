//! Prometheus metrics collection for collabd.
//!
//! Metrics live in `OnceLock` statics and are registered by [`init`]. Until
//! then every recording helper is a no-op, so code paths exercised by tests
//! never need a registry.
//!
//! ## Sync-engine metrics
//!
//! - `collab_active_connections` - authenticated WebSocket sessions
//! - `collab_active_rooms` - live room actors
//! - `collab_update_fanout` - recipients per applied update (histogram)
//! - `collab_flushes_total{outcome}` - snapshot writes by outcome
//! - `collab_persistence_degraded_rooms` - rooms whose last flush gave up

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// Connections refused during the handshake, by reason.
pub static CONNECTIONS_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();

/// CRDT updates merged into a room.
pub static UPDATES_APPLIED: OnceLock<IntCounter> = OnceLock::new();

/// Client frames rejected, by wire error code.
pub static PROTOCOL_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Snapshot writes by outcome (`ok`, `failed`).
pub static FLUSHES: OnceLock<IntCounterVec> = OnceLock::new();

/// Members evicted because their outbound queue was full.
pub static SLOW_CONSUMER_EVICTIONS: OnceLock<IntCounter> = OnceLock::new();

// ========================================================================
// Gauges (can increase/decrease)
// ========================================================================

pub static ACTIVE_CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();

pub static ACTIVE_ROOMS: OnceLock<IntGauge> = OnceLock::new();

/// Rooms whose most recent flush exhausted its retries.
pub static DEGRADED_ROOMS: OnceLock<IntGauge> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

/// Recipients per applied update.
pub static UPDATE_FANOUT: OnceLock<Histogram> = OnceLock::new();

/// Time from flush start to outcome, including retries.
pub static FLUSH_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(metric = stringify!($metric), error = %e, "Failed to register metric");
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::warn!(metric = stringify!($metric), error = %e, "Failed to create metric");
                }
            }
        };
    }

    register!(CONNECTIONS_REJECTED, IntCounterVec::new(Opts::new("collab_connections_rejected_total", "Connections refused during the handshake"), &["reason"]));
    register!(UPDATES_APPLIED, IntCounter::new("collab_updates_applied_total", "CRDT updates merged"));
    register!(PROTOCOL_ERRORS, IntCounterVec::new(Opts::new("collab_protocol_errors_total", "Client frames rejected by error code"), &["code"]));
    register!(FLUSHES, IntCounterVec::new(Opts::new("collab_flushes_total", "Snapshot writes by outcome"), &["outcome"]));
    register!(SLOW_CONSUMER_EVICTIONS, IntCounter::new("collab_slow_consumer_evictions_total", "Members evicted for a full outbound queue"));
    register!(ACTIVE_CONNECTIONS, IntGauge::new("collab_active_connections", "Authenticated sessions"));
    register!(ACTIVE_ROOMS, IntGauge::new("collab_active_rooms", "Live room actors"));
    register!(DEGRADED_ROOMS, IntGauge::new("collab_persistence_degraded_rooms", "Rooms whose last flush gave up"));
    register!(UPDATE_FANOUT, Histogram::with_opts(
        HistogramOpts::new("collab_update_fanout", "Recipients per applied update")
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0])));
    register!(FLUSH_LATENCY, Histogram::with_opts(
        HistogramOpts::new("collab_flush_duration_seconds", "Snapshot write latency including retries")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0])));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

#[inline]
pub fn record_rejected(reason: &str) {
    if let Some(c) = CONNECTIONS_REJECTED.get() {
        c.with_label_values(&[reason]).inc();
    }
}

#[inline]
pub fn record_protocol_error(code: &str) {
    if let Some(c) = PROTOCOL_ERRORS.get() {
        c.with_label_values(&[code]).inc();
    }
}

/// Record an applied update and how many peers received it.
#[inline]
pub fn record_update(recipients: usize) {
    if let Some(c) = UPDATES_APPLIED.get() {
        c.inc();
    }
    if let Some(h) = UPDATE_FANOUT.get() {
        h.observe(recipients as f64);
    }
}

#[inline]
pub fn record_flush(outcome: &str, duration_secs: f64) {
    if let Some(c) = FLUSHES.get() {
        c.with_label_values(&[outcome]).inc();
    }
    if let Some(h) = FLUSH_LATENCY.get() {
        h.observe(duration_secs);
    }
}

#[inline]
pub fn record_eviction() {
    if let Some(c) = SLOW_CONSUMER_EVICTIONS.get() {
        c.inc();
    }
}

#[inline]
pub fn inc_connections() {
    if let Some(g) = ACTIVE_CONNECTIONS.get() {
        g.inc();
    }
}

#[inline]
pub fn dec_connections() {
    if let Some(g) = ACTIVE_CONNECTIONS.get() {
        g.dec();
    }
}

#[inline]
pub fn inc_rooms() {
    if let Some(g) = ACTIVE_ROOMS.get() {
        g.inc();
    }
}

#[inline]
pub fn dec_rooms() {
    if let Some(g) = ACTIVE_ROOMS.get() {
        g.dec();
    }
}

#[inline]
pub fn inc_degraded() {
    if let Some(g) = DEGRADED_ROOMS.get() {
        g.inc();
    }
}

#[inline]
pub fn dec_degraded() {
    if let Some(g) = DEGRADED_ROOMS.get() {
        g.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_registers_and_gathers() {
        init();
        record_update(3);
        record_flush("ok", 0.01);
        record_rejected("expired");
        let text = gather_metrics();
        assert!(text.contains("collab_updates_applied_total"));
        assert!(text.contains("collab_flushes_total"));
        assert!(text.contains("collab_connections_rejected_total"));
    }

    #[test]
    fn helpers_are_safe_before_init() {
        // Must not panic whether or not another test already ran init().
        record_eviction();
        inc_rooms();
        dec_rooms();
    }
}
