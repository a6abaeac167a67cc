use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use salvo::http::header::{CONTENT_TYPE, HeaderValue};
use salvo::prelude::*;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);
static MESSAGES_SEEN: AtomicU64 = AtomicU64::new(0);
static MESSAGES_WITH_LINKS: AtomicU64 = AtomicU64::new(0);
static RELAYS_STARTED: AtomicU64 = AtomicU64::new(0);
static DELIVERIES_SUCCEEDED: AtomicU64 = AtomicU64::new(0);
static DELIVERIES_FAILED: AtomicU64 = AtomicU64::new(0);
static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static CACHE_MISSES: AtomicU64 = AtomicU64::new(0);

pub struct Metrics;

impl Metrics {
    /// Pins the uptime origin. Called once at startup.
    pub fn init() {
        Lazy::force(&STARTED_AT);
    }

    pub fn uptime_seconds() -> u64 {
        STARTED_AT.elapsed().as_secs()
    }

    pub fn message_seen() {
        MESSAGES_SEEN.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_with_link() {
        MESSAGES_WITH_LINKS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn relay_started() {
        RELAYS_STARTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_succeeded() {
        DELIVERIES_SUCCEEDED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed() {
        DELIVERIES_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit() {
        CACHE_HITS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss() {
        CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn format_prometheus() -> String {
    let cache_hits = CACHE_HITS.load(Ordering::Relaxed);
    let cache_misses = CACHE_MISSES.load(Ordering::Relaxed);

    let total_cache = cache_hits + cache_misses;
    let cache_hit_rate = if total_cache > 0 {
        (cache_hits as f64 / total_cache as f64) * 100.0
    } else {
        0.0
    };

    format!(
        r#"# HELP relay_uptime_seconds Number of seconds the relay has been running
# TYPE relay_uptime_seconds gauge
relay_uptime_seconds {}

# HELP relay_messages_seen_total Messages received on input channels
# TYPE relay_messages_seen_total counter
relay_messages_seen_total {}

# HELP relay_messages_with_links_total Messages that passed link detection
# TYPE relay_messages_with_links_total counter
relay_messages_with_links_total {}

# HELP relay_fanouts_total Relays that had at least one destination
# TYPE relay_fanouts_total counter
relay_fanouts_total {}

# HELP relay_deliveries_succeeded_total Destinations that received a copy
# TYPE relay_deliveries_succeeded_total counter
relay_deliveries_succeeded_total {}

# HELP relay_deliveries_failed_total Destinations that did not receive a copy
# TYPE relay_deliveries_failed_total counter
relay_deliveries_failed_total {}

# HELP webhook_cache_hits_total Webhook cache hits
# TYPE webhook_cache_hits_total counter
webhook_cache_hits_total {}

# HELP webhook_cache_misses_total Webhook cache misses
# TYPE webhook_cache_misses_total counter
webhook_cache_misses_total {}

# HELP webhook_cache_hit_rate_percent Webhook cache hit rate as percentage
# TYPE webhook_cache_hit_rate_percent gauge
webhook_cache_hit_rate_percent {}
"#,
        Metrics::uptime_seconds(),
        MESSAGES_SEEN.load(Ordering::Relaxed),
        MESSAGES_WITH_LINKS.load(Ordering::Relaxed),
        RELAYS_STARTED.load(Ordering::Relaxed),
        DELIVERIES_SUCCEEDED.load(Ordering::Relaxed),
        DELIVERIES_FAILED.load(Ordering::Relaxed),
        cache_hits,
        cache_misses,
        cache_hit_rate,
    )
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    res.body(format_prometheus());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_increments_counters() {
        let seen = MESSAGES_SEEN.load(Ordering::Relaxed);
        let hits = CACHE_HITS.load(Ordering::Relaxed);

        Metrics::message_seen();
        Metrics::cache_hit();

        assert!(MESSAGES_SEEN.load(Ordering::Relaxed) > seen);
        assert!(CACHE_HITS.load(Ordering::Relaxed) > hits);
    }

    #[test]
    fn format_prometheus_includes_all_metrics() {
        let output = format_prometheus();
        assert!(output.contains("relay_uptime_seconds"));
        assert!(output.contains("relay_messages_seen_total"));
        assert!(output.contains("relay_deliveries_failed_total"));
        assert!(output.contains("webhook_cache_hit_rate_percent"));
    }
}
