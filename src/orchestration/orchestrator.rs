// Session Orchestrator: drives each image from upload to translated speech

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::session::{ImageRecord, ImageState, ImageView, Message, Session, Stage, NO_TEXT_MESSAGE};
use crate::core::errors::{SessionError, SessionResult};
use crate::core::types::{ImageId, ImageSource, SourceImage, Translation};
use crate::services::{DetectionService, SpeechService, TranslationService};
use crate::utils::{encode_png_async, prepare_image_async, Metrics};

/// Runs the per-image workflow against the external collaborators
pub struct SessionOrchestrator {
    detection: Arc<DetectionService>,
    translation: Arc<TranslationService>,
    speech: Arc<SpeechService>,
    max_dimension: u32,
    metrics: Arc<Metrics>,
}

impl SessionOrchestrator {
    pub fn new(
        detection: Arc<DetectionService>,
        translation: Arc<TranslationService>,
        speech: Arc<SpeechService>,
        max_dimension: u32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            detection,
            translation,
            speech,
            max_dimension,
            metrics,
        }
    }

    /// Add uploaded images to the session and run them through detection.
    ///
    /// Images are processed one after another, in the order given. A failure
    /// is recorded on its image and never affects the others.
    #[instrument(skip(self, session, uploads), fields(session = %session.id(), images = uploads.len()))]
    pub async fn process_upload(
        &self,
        session: &mut Session,
        uploads: Vec<SourceImage>,
    ) -> SessionResult<Vec<ImageId>> {
        let start = Instant::now();
        let mut ids = Vec::with_capacity(uploads.len());

        for upload in uploads {
            ids.push(self.process_image(session, upload).await?);
        }

        info!("Processed {} image(s) in {:.2?}", ids.len(), start.elapsed());
        Ok(ids)
    }

    async fn process_image(&self, session: &mut Session, upload: SourceImage) -> SessionResult<ImageId> {
        self.metrics.record_image_received();

        let digest = format!("{:016x}", xxh3_64(&upload.bytes));
        let id = session.next_image_id(&digest);
        let label = match upload.source {
            ImageSource::Camera => "Camera capture".to_string(),
            ImageSource::Upload if upload.filename.is_empty() => format!("Image {}", session.images().len() + 1),
            ImageSource::Upload => upload.filename.clone(),
        };
        let mut record = ImageRecord::new(id.clone(), label, upload.source, digest, session.config());

        let prepared = match prepare_image_async(upload.bytes, self.max_dimension).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Image {} could not be decoded: {}", id, e);
                self.metrics.record_decode_failure();
                record.advance(ImageState::Failed(Stage::Decode))?;
                record.message = Some(Message::warning(format!("Could not read {}: {}", record.label, e)));
                session.push_image(record);
                return Ok(id);
            }
        };

        record.dimensions = Some((prepared.width(), prepared.height()));
        if prepared.resized {
            debug!("Image {} downsampled to {}x{}", id, prepared.width(), prepared.height());
        }
        let image = Arc::new(prepared.image);
        match encode_png_async(Arc::clone(&image)).await {
            Ok(png) => record.preview = Some(png),
            Err(e) => warn!("Preview for {} unavailable: {:#}", id, e),
        }
        record.advance(ImageState::Prepared)?;

        let languages = record.input_languages.clone();
        let cached = session
            .cached_detection(&record.digest, &languages)
            .map(<[String]>::to_vec);
        let fragments = match cached {
            Some(cached) => {
                debug!("Reusing detection for {} [{}]", id, languages);
                self.metrics.record_detection_cache_hit();
                cached
            }
            None => match self.detection.detect(image, &languages).await {
                Ok(fragments) => {
                    let fragments: Vec<String> = fragments
                        .into_iter()
                        .filter(|f| !f.trim().is_empty())
                        .collect();
                    session.cache_detection(&record.digest, &languages, fragments.clone());
                    fragments
                }
                Err(e) => {
                    record.advance(ImageState::Failed(Stage::Detection))?;
                    record.message = Some(Message::error(format!("Text detection failed: {}", e)));
                    session.push_image(record);
                    return Ok(id);
                }
            },
        };

        if fragments.is_empty() {
            record.advance(ImageState::NoText)?;
            record.message = Some(Message::info(NO_TEXT_MESSAGE));
        } else {
            debug!("Image {}: {} fragment(s)", id, fragments.len());
            record.fragments = fragments;
            record.advance(ImageState::Detected)?;
        }

        session.push_image(record);
        Ok(id)
    }

    /// The per-image translate action.
    ///
    /// Translates every detected fragment, then speaks the joined result once.
    /// An image that is already translated returns its stored result without
    /// calling anything; an image without text yields an empty translation.
    #[instrument(skip(self, session), fields(session = %session.id(), image = %image_id))]
    pub async fn translate(&self, session: &mut Session, image_id: &ImageId) -> SessionResult<ImageView> {
        let record = session.image_mut(image_id)?;

        match record.state() {
            ImageState::Translated => return Ok(record.view()),
            ImageState::NoText => {
                self.metrics.record_translate_action();
                record.translation = Some(Translation::default());
                return Ok(record.view());
            }
            state if state.is_translatable() => {}
            state => {
                return Err(SessionError::InvalidTransition {
                    image_id: image_id.to_string(),
                    from: state.to_string(),
                    to: ImageState::Translated.to_string(),
                })
            }
        }

        self.metrics.record_translate_action();
        let target = record.target_language;
        record.message = None;
        record.audio = None;

        // Only speech failed last time: the stored translation is still good
        let kept = match record.state() {
            ImageState::Failed(Stage::Synthesis) => record.translation.as_ref().map(Translation::joined),
            _ => None,
        };

        let text = match kept {
            Some(text) => {
                debug!("Retrying speech for {} with stored translation", image_id);
                text
            }
            None => match self
                .translation
                .translate_fragments(&record.fragments, target)
                .await
            {
                Ok(translation) => {
                    let text = translation.joined();
                    record.translation = Some(translation);
                    text
                }
                Err(e) => {
                    record.translation = None;
                    record.advance(ImageState::Failed(Stage::Translation))?;
                    record.message = Some(Message::error(e.to_string()));
                    return Ok(record.view());
                }
            },
        };

        match self.speech.speak(&text, target).await {
            Ok(audio) => {
                record.audio = audio;
                record.advance(ImageState::Translated)?;
                info!("Image {} translated to {}", image_id, target);
            }
            Err(e) => {
                record.advance(ImageState::Failed(Stage::Synthesis))?;
                record.message = Some(Message::error(format!("Audio could not be generated: {}", e)));
            }
        }

        Ok(record.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{
        DetectionError, DetectionResult, SynthesisError, SynthesisResult, TranslationError,
        TranslationResult,
    };
    use crate::core::types::{AudioClip, Language, LanguageSet, SessionConfig, SessionId};
    use crate::orchestration::session::MessageLevel;
    use crate::services::{DetectorCache, DetectorFactory, SpeechSynthesizer, TextDetector, Translator};
    use crate::utils::encode_png;
    use async_trait::async_trait;
    use image::DynamicImage;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Detector that answers by image width
    #[derive(Default)]
    struct ScriptedDetector {
        by_width: HashMap<u32, Vec<String>>,
        calls: AtomicUsize,
    }

    impl TextDetector for ScriptedDetector {
        fn detect(&self, image: &DynamicImage) -> DetectionResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.by_width.get(&image.width()) {
                Some(fragments) => Ok(fragments.clone()),
                None => Err(DetectionError::Inference(format!("no script for width {}", image.width()))),
            }
        }
    }

    struct SharedFactory(Arc<ScriptedDetector>);

    impl DetectorFactory for SharedFactory {
        fn create(&self, _languages: &LanguageSet) -> DetectionResult<Arc<dyn TextDetector>> {
            Ok(self.0.clone())
        }
    }

    /// Known phrases from a table; anything else becomes "<code>:<text>".
    /// Text containing FAIL is rejected.
    #[derive(Default)]
    struct TableTranslator {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Translator for TableTranslator {
        async fn translate(&self, text: &str, target: Language) -> TranslationResult<String> {
            self.calls.lock().push(text.to_string());
            if text.contains("FAIL") {
                return Err(TranslationError::Status { status: 500 });
            }
            Ok(match (text, target) {
                ("Hello", Language::Hindi) => "नमस्ते".to_string(),
                _ => format!("{}:{}", target.translation_code(), text),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSynthesizer {
        spoken: Mutex<Vec<(String, Language)>>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynthesizer {
        async fn synthesize(&self, text: &str, language: Language) -> SynthesisResult<AudioClip> {
            self.spoken.lock().push((text.to_string(), language));
            if self.failing.load(Ordering::SeqCst) {
                return Err(SynthesisError::Status { status: 503, chunk: 0 });
            }
            Ok(AudioClip::mp3(vec![0xFF, 0xFB, 0x90]))
        }
    }

    struct Harness {
        orchestrator: SessionOrchestrator,
        detector: Arc<ScriptedDetector>,
        translator: Arc<TableTranslator>,
        synthesizer: Arc<RecordingSynthesizer>,
        metrics: Arc<Metrics>,
    }

    fn harness(scripts: &[(u32, &[&str])]) -> Harness {
        let detector = Arc::new(ScriptedDetector {
            by_width: scripts
                .iter()
                .map(|(w, frags)| (*w, frags.iter().map(|s| s.to_string()).collect()))
                .collect(),
            calls: AtomicUsize::new(0),
        });
        let translator = Arc::new(TableTranslator::default());
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let metrics = Arc::new(Metrics::new());

        let cache = Arc::new(DetectorCache::new(Arc::new(SharedFactory(detector.clone())), 4));
        let orchestrator = SessionOrchestrator::new(
            Arc::new(DetectionService::new(cache, Duration::from_secs(5))),
            Arc::new(TranslationService::new(translator.clone(), Duration::from_secs(5))),
            Arc::new(SpeechService::new(synthesizer.clone(), Duration::from_secs(5))),
            800,
            Arc::clone(&metrics),
        );

        Harness {
            orchestrator,
            detector,
            translator,
            synthesizer,
            metrics,
        }
    }

    fn png(width: u32, height: u32) -> SourceImage {
        SourceImage {
            source: ImageSource::Upload,
            filename: format!("{}x{}.png", width, height),
            bytes: encode_png(&DynamicImage::new_rgb8(width, height)).unwrap(),
        }
    }

    fn session(input: &[Language], target: Language) -> Session {
        let config = SessionConfig {
            input_languages: input.iter().copied().collect(),
            target_language: target,
        };
        Session::new(SessionId::new(), config).unwrap()
    }

    #[tokio::test]
    async fn test_hello_translated_to_hindi() {
        let h = harness(&[(100, &["Hello"])]);
        let mut session = session(&[Language::English], Language::Hindi);

        let ids = h.orchestrator.process_upload(&mut session, vec![png(100, 60)]).await.unwrap();
        let view = session.image(&ids[0]).unwrap().view();
        assert_eq!(view.state, ImageState::Detected);
        assert_eq!(view.detected_text, "Hello");
        assert!(view.translatable);
        assert!(view.has_preview);
        let preview = session.image(&ids[0]).unwrap().preview.clone().unwrap();
        assert!(preview.starts_with(b"\x89PNG"));

        let view = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();
        assert_eq!(view.state, ImageState::Translated);
        assert_eq!(view.translated_text.as_deref(), Some("नमस्ते"));
        assert!(view.has_audio);
        assert!(view.message.is_none());
        assert_eq!(*h.synthesizer.spoken.lock(), vec![("नमस्ते".to_string(), Language::Hindi)]);
    }

    #[tokio::test]
    async fn test_only_requested_image_is_translated() {
        let h = harness(&[(100, &["Hello"]), (120, &["Goodbye"])]);
        let mut session = session(&[Language::English], Language::Japanese);

        let ids = h
            .orchestrator
            .process_upload(&mut session, vec![png(100, 50), png(120, 50)])
            .await
            .unwrap();
        h.orchestrator.translate(&mut session, &ids[1]).await.unwrap();

        let first = session.image(&ids[0]).unwrap();
        assert_eq!(first.state(), ImageState::Detected);
        assert!(first.translation.is_none());
        assert_eq!(session.image(&ids[1]).unwrap().state(), ImageState::Translated);
        assert_eq!(*h.translator.calls.lock(), vec!["Goodbye".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_fragment_fails_only_that_image() {
        let h = harness(&[(100, &["ok", "FAIL here", "after"]), (120, &["fine"])]);
        let mut session = session(&[Language::English], Language::Korean);

        let ids = h
            .orchestrator
            .process_upload(&mut session, vec![png(100, 50), png(120, 50)])
            .await
            .unwrap();

        let view = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();
        assert_eq!(view.state, ImageState::Failed(Stage::Translation));
        assert!(view.translated_text.is_none());
        let message = view.message.unwrap();
        assert_eq!(message.level, MessageLevel::Error);
        assert!(message.text.contains("Fragment 2"));
        assert!(h.synthesizer.spoken.lock().is_empty());

        let other = h.orchestrator.translate(&mut session, &ids[1]).await.unwrap();
        assert_eq!(other.state, ImageState::Translated);
        assert_eq!(other.translated_text.as_deref(), Some("ko:fine"));
    }

    #[tokio::test]
    async fn test_no_text_detected() {
        let h = harness(&[(50, &[])]);
        let mut session = session(&[Language::English], Language::Hindi);

        let ids = h.orchestrator.process_upload(&mut session, vec![png(50, 50)]).await.unwrap();
        let view = session.image(&ids[0]).unwrap().view();
        assert_eq!(view.state, ImageState::NoText);
        assert!(!view.translatable);
        assert_eq!(view.message, Some(Message::info(NO_TEXT_MESSAGE)));

        let view = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();
        assert_eq!(view.state, ImageState::NoText);
        assert_eq!(view.translated_text.as_deref(), Some(""));
        assert!(!view.has_audio);
        assert!(h.translator.calls.lock().is_empty());
        assert!(h.synthesizer.spoken.lock().is_empty());
    }

    #[tokio::test]
    async fn test_order_preserved_and_speech_called_once() {
        let h = harness(&[(100, &["one", "two", "three"])]);
        let mut session = session(&[Language::English], Language::Marathi);

        let ids = h.orchestrator.process_upload(&mut session, vec![png(100, 40)]).await.unwrap();
        let view = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();

        assert_eq!(view.translated_text.as_deref(), Some("mr:one\nmr:two\nmr:three"));
        assert_eq!(
            *h.synthesizer.spoken.lock(),
            vec![("mr:one\nmr:two\nmr:three".to_string(), Language::Marathi)]
        );

        // Already translated: nothing is called again
        let again = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();
        assert_eq!(again.translated_text, view.translated_text);
        assert_eq!(h.translator.calls.lock().len(), 3);
        assert_eq!(h.synthesizer.spoken.lock().len(), 1);
        assert_eq!(h.metrics.snapshot().translate_actions, 1);
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_text_and_retry_succeeds() {
        let h = harness(&[(100, &["Hello"])]);
        let mut session = session(&[Language::English], Language::Hindi);
        let ids = h.orchestrator.process_upload(&mut session, vec![png(100, 40)]).await.unwrap();

        h.synthesizer.failing.store(true, Ordering::SeqCst);
        let view = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();
        assert_eq!(view.state, ImageState::Failed(Stage::Synthesis));
        assert_eq!(view.translated_text.as_deref(), Some("नमस्ते"));
        assert!(!view.has_audio);
        assert_eq!(view.message.unwrap().level, MessageLevel::Error);

        h.synthesizer.failing.store(false, Ordering::SeqCst);
        let view = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();
        assert_eq!(view.state, ImageState::Translated);
        assert_eq!(view.translated_text.as_deref(), Some("नमस्ते"));
        assert!(view.has_audio);
        assert!(view.message.is_none());

        // The retry only re-ran speech
        assert_eq!(*h.translator.calls.lock(), vec!["Hello".to_string()]);
        assert_eq!(h.synthesizer.spoken.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_translation_failure_retry_translates_again() {
        let h = harness(&[(100, &["FAIL once"])]);
        let mut session = session(&[Language::English], Language::Hindi);
        let ids = h.orchestrator.process_upload(&mut session, vec![png(100, 40)]).await.unwrap();

        let view = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();
        assert_eq!(view.state, ImageState::Failed(Stage::Translation));

        let view = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();
        assert_eq!(view.state, ImageState::Failed(Stage::Translation));
        assert_eq!(h.translator.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_language_combination_is_per_image_error() {
        // The cache rejects the set before the factory is asked for a detector
        let h = harness(&[(100, &["Hello"])]);
        let mut session = session(&[Language::Korean, Language::Japanese], Language::English);

        let ids = h
            .orchestrator
            .process_upload(&mut session, vec![png(100, 40), png(120, 40)])
            .await
            .unwrap();

        for id in &ids {
            let view = session.image(id).unwrap().view();
            assert_eq!(view.state, ImageState::Failed(Stage::Detection));
            let message = view.message.unwrap();
            assert_eq!(message.level, MessageLevel::Error);
            assert!(message.text.contains("Unsupported language combination"), "{}", message.text);
        }
        assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
        assert!(h.orchestrator.translate(&mut session, &ids[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_same_bytes_reuse_detection() {
        let h = harness(&[(100, &["Hello"])]);
        let mut session = session(&[Language::English], Language::Hindi);

        let ids = h
            .orchestrator
            .process_upload(&mut session, vec![png(100, 40), png(100, 40)])
            .await
            .unwrap();

        assert_ne!(ids[0], ids[1]);
        assert!(ids[1].as_str().starts_with(ids[0].as_str()));
        assert_eq!(h.detector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.image(&ids[1]).unwrap().detected_text(), "Hello");
        assert_eq!(h.metrics.snapshot().detection_cache_hits, 1);
    }

    #[tokio::test]
    async fn test_undecodable_upload_warns_and_blocks_translate() {
        let h = harness(&[(100, &["Hello"])]);
        let mut session = session(&[Language::English], Language::Hindi);
        let garbage = SourceImage {
            source: ImageSource::Upload,
            filename: "notes.txt".to_string(),
            bytes: b"not an image".to_vec(),
        };

        let ids = h
            .orchestrator
            .process_upload(&mut session, vec![garbage, png(100, 40)])
            .await
            .unwrap();

        let bad = session.image(&ids[0]).unwrap().view();
        assert_eq!(bad.state, ImageState::Failed(Stage::Decode));
        assert_eq!(bad.message.unwrap().level, MessageLevel::Warning);
        assert_eq!(session.image(&ids[1]).unwrap().state(), ImageState::Detected);

        let err = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_detection_failure_is_terminal_for_image() {
        // No script for width 77: the fake detector errors
        let h = harness(&[]);
        let mut session = session(&[Language::English], Language::Hindi);

        let ids = h.orchestrator.process_upload(&mut session, vec![png(77, 40)]).await.unwrap();
        let view = session.image(&ids[0]).unwrap().view();
        assert_eq!(view.state, ImageState::Failed(Stage::Detection));
        assert_eq!(view.message.unwrap().level, MessageLevel::Error);
        assert!(h.orchestrator.translate(&mut session, &ids[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_large_image_downsampled_before_detection() {
        let h = harness(&[(800, &["big"])]);
        let mut session = session(&[Language::English], Language::Hindi);

        let ids = h.orchestrator.process_upload(&mut session, vec![png(1600, 1000)]).await.unwrap();
        let view = session.image(&ids[0]).unwrap().view();
        assert_eq!((view.width, view.height), (Some(800), Some(500)));
        assert_eq!(view.detected_text, "big");
    }

    #[tokio::test]
    async fn test_images_keep_languages_from_upload_time() {
        let h = harness(&[(100, &["Hello"])]);
        let mut session = session(&[Language::English], Language::Hindi);
        let ids = h.orchestrator.process_upload(&mut session, vec![png(100, 40)]).await.unwrap();

        session
            .set_config(SessionConfig {
                input_languages: [Language::English, Language::Kannada].into_iter().collect(),
                target_language: Language::Korean,
            })
            .unwrap();

        let view = h.orchestrator.translate(&mut session, &ids[0]).await.unwrap();
        assert_eq!(view.target_language, Language::Hindi);
        assert_eq!(view.translated_text.as_deref(), Some("नमस्ते"));
    }

    #[tokio::test]
    async fn test_unknown_image_rejected() {
        let h = harness(&[]);
        let mut session = session(&[Language::English], Language::Hindi);
        let err = h
            .orchestrator
            .translate(&mut session, &ImageId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn test_camera_capture_labelled() {
        let h = harness(&[(100, &["Hello"])]);
        let mut session = session(&[Language::English], Language::Hindi);
        let mut capture = png(100, 40);
        capture.source = ImageSource::Camera;

        let ids = h.orchestrator.process_upload(&mut session, vec![capture]).await.unwrap();
        let view = session.image(&ids[0]).unwrap().view();
        assert_eq!(view.label, "Camera capture");
        assert_eq!(view.source, ImageSource::Camera);
    }
}
