pub mod onnx;
pub mod postprocess;
pub mod recognition;

use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::LanguageSet;
use crate::utils::Metrics;

pub use onnx::OnnxDetectorFactory;

/// Reads text out of an image.
///
/// Implementations are blocking and must be safe to share across threads;
/// [`DetectionService`] runs them on the blocking pool.
pub trait TextDetector: Send + Sync {
    /// Text fragments in reading order. An image without text yields an empty list.
    fn detect(&self, image: &DynamicImage) -> DetectionResult<Vec<String>>;

    /// Execution backend name, for logs and stats
    fn backend(&self) -> &str {
        "CPU"
    }
}

/// Creates a detector configured for one language set
pub trait DetectorFactory: Send + Sync {
    fn create(&self, languages: &LanguageSet) -> DetectionResult<Arc<dyn TextDetector>>;
}

/// Reuses detectors across images that share a language set.
///
/// Building a detector loads models from disk, so instances are kept in an
/// LRU keyed by the canonical (sorted, deduplicated) language set.
pub struct DetectorCache {
    factory: Arc<dyn DetectorFactory>,
    detectors: Mutex<LruCache<LanguageSet, Arc<dyn TextDetector>>>,
    metrics: Option<Arc<Metrics>>,
}

impl DetectorCache {
    pub fn new(factory: Arc<dyn DetectorFactory>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            factory,
            detectors: Mutex::new(LruCache::new(capacity)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the detector for `languages`, creating it on first use
    pub fn get_or_create(&self, languages: &LanguageSet) -> DetectionResult<Arc<dyn TextDetector>> {
        // Reject empty and incompatible sets before touching the cache
        languages.recognition_script()?;

        if let Some(detector) = self.detectors.lock().get(languages) {
            self.record(true);
            debug!("Reusing detector for [{}]", languages);
            return Ok(Arc::clone(detector));
        }
        self.record(false);

        // Built outside the lock: model loading can take seconds
        info!("Creating detector for [{}]", languages);
        let detector = self.factory.create(languages)?;

        let mut detectors = self.detectors.lock();
        if let Some(existing) = detectors.get(languages) {
            return Ok(Arc::clone(existing));
        }
        if let Some((evicted, _)) = detectors.push(languages.clone(), Arc::clone(&detector)) {
            if &evicted != languages {
                debug!("Evicted detector for [{}]", evicted);
            }
        }
        Ok(detector)
    }

    pub fn len(&self) -> usize {
        self.detectors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.lock().is_empty()
    }

    fn record(&self, hit: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_detector_cache(hit);
        }
    }
}

/// Async front for text detection with a per-call timeout.
///
/// A blocking task cannot be cancelled: when the timeout fires the caller gets
/// [`DetectionError::Timeout`] but the inference keeps running and keeps its
/// detector busy, so later calls for the same language set queue behind it.
/// Those runs are counted by [`DetectionService::abandoned`].
pub struct DetectionService {
    cache: Arc<DetectorCache>,
    timeout: Duration,
    metrics: Option<Arc<Metrics>>,
    abandoned: Arc<AtomicUsize>,
}

impl DetectionService {
    pub fn new(cache: Arc<DetectorCache>, timeout: Duration) -> Self {
        Self {
            cache,
            timeout,
            metrics: None,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &DetectorCache {
        &self.cache
    }

    /// Timed-out detections that are still running on the blocking pool
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Detect text fragments in `image` using a detector for `languages`
    #[instrument(skip(self, image), fields(languages = %languages))]
    pub async fn detect(
        &self,
        image: Arc<DynamicImage>,
        languages: &LanguageSet,
    ) -> DetectionResult<Vec<String>> {
        let start = Instant::now();
        let cache = Arc::clone(&self.cache);
        let languages = languages.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            let detector = cache.get_or_create(&languages)?;
            detector.detect(&image)
        });

        let result = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DetectionError::TaskFailed(e.to_string())),
            Err(_) => {
                let abandoned = Arc::clone(&self.abandoned);
                let running = abandoned.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    "Text detection exceeded {}s; inference keeps running and holds its detector ({} abandoned)",
                    self.timeout.as_secs(),
                    running
                );
                tokio::spawn(async move {
                    let _ = task.await;
                    abandoned.fetch_sub(1, Ordering::SeqCst);
                    debug!("Abandoned detection finished");
                });
                Err(DetectionError::Timeout(self.timeout.as_secs()))
            }
        };

        let elapsed = start.elapsed();
        if let Some(metrics) = &self.metrics {
            let fragments = result.as_ref().map(Vec::len).unwrap_or(0);
            metrics.record_detection(result.is_ok(), fragments, elapsed);
        }
        match &result {
            Ok(fragments) => debug!("Detected {} fragments in {:.0?}", fragments.len(), elapsed),
            Err(e) => warn!("Text detection failed after {:.0?}: {}", elapsed, e),
        }

        result
    }
}
