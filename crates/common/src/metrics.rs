use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    cache_requests: CounterVec,
    decode_seconds: HistogramVec,
    entities_loaded: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// `outcome` is one of `hit`, `load`, `failure`.
    pub fn record_cache_request(&self, tier: &str, outcome: &str) {
        self.inner
            .cache_requests
            .with_label_values(&[tier, outcome])
            .inc();
    }

    pub fn record_decode(&self, tier: &str, secs: f64) {
        self.inner
            .decode_seconds
            .with_label_values(&[tier])
            .observe(secs.max(0.0));
    }

    /// `mode` is `sequential` or `parallel`.
    pub fn record_entities_loaded(&self, mode: &str, count: u64) {
        self.inner
            .entities_loaded
            .with_label_values(&[mode])
            .inc_by(count as f64);
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let cache_requests = counter_vec(
            &registry,
            "medctx_cache_requests_total",
            "Cache get-or-load requests by tier and outcome",
            &["tier", "outcome"],
        );
        let decode_seconds = histogram_vec(
            &registry,
            "medctx_decode_seconds",
            "Time spent decoding a table on cache miss",
            &["tier"],
        );
        let entities_loaded = counter_vec(
            &registry,
            "medctx_entities_loaded_total",
            "Per-entity series requests served by load mode",
            &["mode"],
        );

        Self {
            registry,
            cache_requests,
            decode_seconds,
            entities_loaded,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_all_metric_families() {
        let m = MetricsRegistry::new();
        m.record_cache_request("series", "hit");
        m.record_cache_request("cohort", "load");
        m.record_decode("series", 0.02);
        m.record_entities_loaded("parallel", 3);
        let text = m.render_prometheus();

        assert!(text.contains("medctx_cache_requests_total"));
        assert!(text.contains("medctx_decode_seconds"));
        assert!(text.contains("medctx_entities_loaded_total"));
        assert!(text.contains("parallel"));
    }
}
