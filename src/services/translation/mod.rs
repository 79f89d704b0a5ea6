pub mod google;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::types::{Language, Translation};
use crate::utils::Metrics;

pub use google::GoogleTranslator;

/// Translates one piece of text into a target language.
///
/// The source language is auto-detected by the service.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target: Language) -> TranslationResult<String>;
}

/// Per-fragment translation with timeouts and all-or-nothing failure
pub struct TranslationService {
    translator: Arc<dyn Translator>,
    timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl TranslationService {
    pub fn new(translator: Arc<dyn Translator>, timeout: Duration) -> Self {
        Self {
            translator,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Translate every fragment in order, one call each.
    ///
    /// Whitespace-only fragments pass through without a call. The first
    /// failing fragment aborts the whole batch with
    /// [`TranslationError::FragmentFailed`].
    #[instrument(skip(self, fragments), fields(fragments = fragments.len(), target = %target))]
    pub async fn translate_fragments(
        &self,
        fragments: &[String],
        target: Language,
    ) -> TranslationResult<Translation> {
        let mut translated = Vec::with_capacity(fragments.len());

        for (index, fragment) in fragments.iter().enumerate() {
            if fragment.trim().is_empty() {
                translated.push(fragment.clone());
                continue;
            }

            match self.translate_one(fragment, target).await {
                Ok(text) => translated.push(text),
                Err(e) => {
                    warn!("Fragment {} of {} failed: {}", index + 1, fragments.len(), e);
                    return Err(TranslationError::FragmentFailed {
                        index,
                        source: Box::new(e),
                    });
                }
            }
        }

        debug!("Translated {} fragments", translated.len());
        Ok(Translation {
            fragments: translated,
        })
    }

    async fn translate_one(&self, text: &str, target: Language) -> TranslationResult<String> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.translator.translate(text, target)).await {
            Ok(result) => result,
            Err(_) => Err(TranslationError::Timeout(self.timeout.as_secs())),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_translation_call(result.is_ok(), start.elapsed());
        }
        result
    }
}
