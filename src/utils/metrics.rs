use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Process-wide counters for the image workflow.
///
/// Cheap to clone; every clone records into the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Image Metrics
    images_received: AtomicUsize,
    decode_failures: AtomicUsize,
    detections: AtomicUsize,
    detection_failures: AtomicUsize,
    no_text_results: AtomicUsize,
    detection_latency_ms: RwLock<Vec<u64>>,

    // Cache Metrics
    detector_cache_hits: AtomicUsize,
    detector_cache_misses: AtomicUsize,
    detection_cache_hits: AtomicUsize,

    // Translate action Metrics
    translate_actions: AtomicUsize,
    translation_calls: AtomicUsize,
    translation_failures: AtomicUsize,
    translation_latency_ms: RwLock<Vec<u64>>,
    synthesis_calls: AtomicUsize,
    synthesis_failures: AtomicUsize,
    synthesis_latency_ms: RwLock<Vec<u64>>,

    // Session Metrics
    sessions_created: AtomicUsize,
    sessions_expired: AtomicUsize,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    // Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                images_received: AtomicUsize::new(0),
                decode_failures: AtomicUsize::new(0),
                detections: AtomicUsize::new(0),
                detection_failures: AtomicUsize::new(0),
                no_text_results: AtomicUsize::new(0),
                detection_latency_ms: RwLock::new(Vec::new()),
                detector_cache_hits: AtomicUsize::new(0),
                detector_cache_misses: AtomicUsize::new(0),
                detection_cache_hits: AtomicUsize::new(0),
                translate_actions: AtomicUsize::new(0),
                translation_calls: AtomicUsize::new(0),
                translation_failures: AtomicUsize::new(0),
                translation_latency_ms: RwLock::new(Vec::new()),
                synthesis_calls: AtomicUsize::new(0),
                synthesis_failures: AtomicUsize::new(0),
                synthesis_latency_ms: RwLock::new(Vec::new()),
                sessions_created: AtomicUsize::new(0),
                sessions_expired: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Image Metrics
    pub fn record_image_received(&self) {
        self.inner.images_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.inner.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection(&self, success: bool, fragments: usize, duration: Duration) {
        if success {
            self.inner.detections.fetch_add(1, Ordering::Relaxed);
            if fragments == 0 {
                self.inner.no_text_results.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.inner.detection_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.detection_latency_ms.write().push(duration.as_millis() as u64);
    }

    // Cache Metrics
    pub fn record_detector_cache(&self, hit: bool) {
        if hit {
            self.inner.detector_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.detector_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_detection_cache_hit(&self) {
        self.inner.detection_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    // Translate action Metrics
    pub fn record_translate_action(&self) {
        self.inner.translate_actions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_translation_call(&self, success: bool, duration: Duration) {
        self.inner.translation_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner.translation_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.translation_latency_ms.write().push(duration.as_millis() as u64);
    }

    pub fn record_synthesis_call(&self, success: bool, duration: Duration) {
        self.inner.synthesis_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner.synthesis_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.synthesis_latency_ms.write().push(duration.as_millis() as u64);
    }

    // Session Metrics
    pub fn record_session_created(&self) {
        self.inner.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sessions_expired(&self, count: usize) {
        self.inner.sessions_expired.fetch_add(count, Ordering::Relaxed);
    }

    // Endpoint Metrics
    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner.endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let detection_latency = self.inner.detection_latency_ms.read();
        let detection_avg = avg(&detection_latency);
        let detection_p95 = percentile(&detection_latency, 0.95);
        drop(detection_latency);

        let translation_latency = self.inner.translation_latency_ms.read();
        let translation_avg = avg(&translation_latency);
        let translation_p50 = percentile(&translation_latency, 0.5);
        let translation_p95 = percentile(&translation_latency, 0.95);
        drop(translation_latency);

        let synthesis_latency = self.inner.synthesis_latency_ms.read();
        let synthesis_avg = avg(&synthesis_latency);
        drop(synthesis_latency);

        let endpoint_requests = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            images_received: self.inner.images_received.load(Ordering::Relaxed),
            decode_failures: self.inner.decode_failures.load(Ordering::Relaxed),
            detections: self.inner.detections.load(Ordering::Relaxed),
            detection_failures: self.inner.detection_failures.load(Ordering::Relaxed),
            no_text_results: self.inner.no_text_results.load(Ordering::Relaxed),
            detection_latency_avg_ms: detection_avg,
            detection_latency_p95_ms: detection_p95,
            detector_cache_hits: self.inner.detector_cache_hits.load(Ordering::Relaxed),
            detector_cache_misses: self.inner.detector_cache_misses.load(Ordering::Relaxed),
            detection_cache_hits: self.inner.detection_cache_hits.load(Ordering::Relaxed),
            translate_actions: self.inner.translate_actions.load(Ordering::Relaxed),
            translation_calls: self.inner.translation_calls.load(Ordering::Relaxed),
            translation_failures: self.inner.translation_failures.load(Ordering::Relaxed),
            translation_latency_avg_ms: translation_avg,
            translation_latency_p50_ms: translation_p50,
            translation_latency_p95_ms: translation_p95,
            synthesis_calls: self.inner.synthesis_calls.load(Ordering::Relaxed),
            synthesis_failures: self.inner.synthesis_failures.load(Ordering::Relaxed),
            synthesis_latency_avg_ms: synthesis_avg,
            sessions_created: self.inner.sessions_created.load(Ordering::Relaxed),
            sessions_expired: self.inner.sessions_expired.load(Ordering::Relaxed),
            endpoint_requests,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP images_received_total Images received from users
# TYPE images_received_total counter
images_received_total {{}} {}

# HELP decode_failures_total Images that could not be decoded
# TYPE decode_failures_total counter
decode_failures_total {{}} {}

# HELP detections_total Successful text detections
# TYPE detections_total counter
detections_total {{}} {}

# HELP detection_failures_total Failed text detections
# TYPE detection_failures_total counter
detection_failures_total {{}} {}

# HELP no_text_results_total Detections that found no text
# TYPE no_text_results_total counter
no_text_results_total {{}} {}

# HELP detection_latency_avg_ms Average detection latency in milliseconds
# TYPE detection_latency_avg_ms gauge
detection_latency_avg_ms {{}} {}

# HELP detector_cache_total Detector cache lookups
# TYPE detector_cache_total counter
detector_cache_total {{result="hit"}} {}
detector_cache_total {{result="miss"}} {}

# HELP detection_cache_hits_total Detections reused for a re-uploaded image
# TYPE detection_cache_hits_total counter
detection_cache_hits_total {{}} {}

# HELP translate_actions_total Per-image translate actions
# TYPE translate_actions_total counter
translate_actions_total {{}} {}

# HELP translation_calls_total Per-fragment translation calls
# TYPE translation_calls_total counter
translation_calls_total {{}} {}

# HELP translation_failures_total Failed translation calls
# TYPE translation_failures_total counter
translation_failures_total {{}} {}

# HELP synthesis_calls_total Speech synthesis calls
# TYPE synthesis_calls_total counter
synthesis_calls_total {{}} {}

# HELP synthesis_failures_total Failed speech synthesis calls
# TYPE synthesis_failures_total counter
synthesis_failures_total {{}} {}

# HELP sessions_created_total Sessions created
# TYPE sessions_created_total counter
sessions_created_total {{}} {}

# HELP sessions_expired_total Sessions evicted after idling
# TYPE sessions_expired_total counter
sessions_expired_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.images_received,
            snapshot.decode_failures,
            snapshot.detections,
            snapshot.detection_failures,
            snapshot.no_text_results,
            snapshot.detection_latency_avg_ms,
            snapshot.detector_cache_hits,
            snapshot.detector_cache_misses,
            snapshot.detection_cache_hits,
            snapshot.translate_actions,
            snapshot.translation_calls,
            snapshot.translation_failures,
            snapshot.synthesis_calls,
            snapshot.synthesis_failures,
            snapshot.sessions_created,
            snapshot.sessions_expired,
            snapshot.uptime_seconds,
        );

        if !snapshot.endpoint_requests.is_empty() {
            out.push_str("\n# HELP http_requests_total Requests per endpoint\n# TYPE http_requests_total counter\n");
            let mut endpoints: Vec<_> = snapshot.endpoint_requests.iter().collect();
            endpoints.sort();
            for (endpoint, count) in endpoints {
                out.push_str(&format!(
                    "http_requests_total {{endpoint=\"{}\"}} {}\n",
                    endpoint, count
                ));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub images_received: usize,
    pub decode_failures: usize,
    pub detections: usize,
    pub detection_failures: usize,
    pub no_text_results: usize,
    pub detection_latency_avg_ms: u64,
    pub detection_latency_p95_ms: u64,
    pub detector_cache_hits: usize,
    pub detector_cache_misses: usize,
    pub detection_cache_hits: usize,
    pub translate_actions: usize,
    pub translation_calls: usize,
    pub translation_failures: usize,
    pub translation_latency_avg_ms: u64,
    pub translation_latency_p50_ms: u64,
    pub translation_latency_p95_ms: u64,
    pub synthesis_calls: usize,
    pub synthesis_failures: usize,
    pub synthesis_latency_avg_ms: u64,
    pub sessions_created: usize,
    pub sessions_expired: usize,
    pub endpoint_requests: std::collections::HashMap<String, usize>,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
