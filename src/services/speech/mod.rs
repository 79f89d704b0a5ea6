pub mod google_tts;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::errors::{SynthesisError, SynthesisResult};
use crate::core::types::{AudioClip, Language};
use crate::utils::Metrics;

pub use google_tts::{split_for_speech, GoogleSpeech};

/// Turns text into spoken audio in the given language
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: Language) -> SynthesisResult<AudioClip>;
}

pub struct SpeechService {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl SpeechService {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, timeout: Duration) -> Self {
        Self {
            synthesizer,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Speak `text`. Whitespace-only text produces no audio and no call.
    #[instrument(skip(self, text), fields(chars = text.chars().count(), language = %language))]
    pub async fn speak(&self, text: &str, language: Language) -> SynthesisResult<Option<AudioClip>> {
        if text.trim().is_empty() {
            debug!("Nothing to speak");
            return Ok(None);
        }

        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.synthesizer.synthesize(text, language)).await {
            Ok(result) => result,
            Err(_) => Err(SynthesisError::Timeout(self.timeout.as_secs())),
        };

        let elapsed = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_synthesis_call(result.is_ok(), elapsed);
        }

        match result {
            Ok(clip) => {
                debug!("Synthesized {} bytes of audio in {:.0?}", clip.bytes.len(), elapsed);
                Ok(Some(clip))
            }
            Err(e) => {
                warn!("Speech synthesis failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSynthesizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for CountingSynthesizer {
        async fn synthesize(&self, text: &str, _language: Language) -> SynthesisResult<AudioClip> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AudioClip::mp3(text.as_bytes().to_vec()))
        }
    }

    struct StalledSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for StalledSynthesizer {
        async fn synthesize(&self, _text: &str, _language: Language) -> SynthesisResult<AudioClip> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(SynthesisError::EmptyAudio)
        }
    }

    #[tokio::test]
    async fn test_blank_text_is_not_sent() {
        let synthesizer = Arc::new(CountingSynthesizer::default());
        let service = SpeechService::new(synthesizer.clone(), Duration::from_secs(1));

        assert_eq!(service.speak(" \n ", Language::Hindi).await.unwrap(), None);
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_text_spoken_in_one_call() {
        let synthesizer = Arc::new(CountingSynthesizer::default());
        let service = SpeechService::new(synthesizer.clone(), Duration::from_secs(1));

        let clip = service.speak("line one\nline two", Language::English).await.unwrap().unwrap();
        assert_eq!(clip.mime_type, "audio/mpeg");
        assert_eq!(clip.bytes, b"line one\nline two");
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_synthesis_times_out() {
        let metrics = Arc::new(Metrics::new());
        let service = SpeechService::new(Arc::new(StalledSynthesizer), Duration::from_millis(20))
            .with_metrics(Arc::clone(&metrics));

        let err = service.speak("hello", Language::English).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Timeout(_)));
        assert_eq!(metrics.snapshot().synthesis_failures, 1);
    }
}
