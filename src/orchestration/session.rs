// Per-user session: image records, their state machine, and the detection cache

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use crate::core::errors::{SessionError, SessionResult};
use crate::core::types::{
    AudioClip, ImageId, ImageSource, Language, LanguageSet, SessionConfig, SessionId, Translation,
};

/// Workflow stage an image failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decode,
    Detection,
    Translation,
    Synthesis,
}

/// Lifecycle of one image.
///
/// ```text
/// Uploaded → Prepared → Detected ──translate──→ Translated
///    │           │  └──→ NoText          └──→ Failed(Translation | Synthesis) ──retry──┘
///    └→ Failed(Decode)   └→ Failed(Detection)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "stage")]
pub enum ImageState {
    Uploaded,
    Prepared,
    Detected,
    NoText,
    Translated,
    Failed(Stage),
}

impl ImageState {
    pub fn can_transition_to(self, next: ImageState) -> bool {
        use ImageState::*;
        matches!(
            (self, next),
            (Uploaded, Prepared)
                | (Uploaded, Failed(Stage::Decode))
                | (Prepared, Detected)
                | (Prepared, NoText)
                | (Prepared, Failed(Stage::Detection))
                | (
                    Detected | Failed(Stage::Translation) | Failed(Stage::Synthesis),
                    Translated | Failed(Stage::Translation) | Failed(Stage::Synthesis)
                )
        )
    }

    /// Whether the translate action can run (or has already run) for this image
    pub fn is_translatable(self) -> bool {
        matches!(
            self,
            ImageState::Detected
                | ImageState::Translated
                | ImageState::Failed(Stage::Translation)
                | ImageState::Failed(Stage::Synthesis)
        )
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageState::Uploaded => f.write_str("uploaded"),
            ImageState::Prepared => f.write_str("prepared"),
            ImageState::Detected => f.write_str("detected"),
            ImageState::NoText => f.write_str("no_text"),
            ImageState::Translated => f.write_str("translated"),
            ImageState::Failed(stage) => write!(f, "failed({:?})", stage),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// User-visible note attached to an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self { level: MessageLevel::Info, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { level: MessageLevel::Warning, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: MessageLevel::Error, text: text.into() }
    }
}

pub const NO_TEXT_MESSAGE: &str = "No text detected in the image.";

/// One image and everything derived from it
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: ImageId,
    pub label: String,
    pub source: ImageSource,
    /// Hex xxh3 digest of the uploaded bytes
    pub digest: String,
    /// Languages in effect when the image was uploaded
    pub input_languages: LanguageSet,
    pub target_language: Language,
    state: ImageState,
    /// PNG of the prepared image
    pub preview: Option<Vec<u8>>,
    pub dimensions: Option<(u32, u32)>,
    pub fragments: Vec<String>,
    pub translation: Option<Translation>,
    pub audio: Option<AudioClip>,
    pub message: Option<Message>,
}

impl ImageRecord {
    pub fn new(
        id: ImageId,
        label: impl Into<String>,
        source: ImageSource,
        digest: impl Into<String>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            source,
            digest: digest.into(),
            input_languages: config.input_languages.clone(),
            target_language: config.target_language,
            state: ImageState::Uploaded,
            preview: None,
            dimensions: None,
            fragments: Vec::new(),
            translation: None,
            audio: None,
            message: None,
        }
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    /// Move to `next`, rejecting any transition the lifecycle does not allow
    pub fn advance(&mut self, next: ImageState) -> SessionResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                image_id: self.id.to_string(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn detected_text(&self) -> String {
        self.fragments.join("\n")
    }

    pub fn view(&self) -> ImageView {
        ImageView {
            id: self.id.clone(),
            label: self.label.clone(),
            source: self.source,
            state: self.state,
            has_preview: self.preview.is_some(),
            width: self.dimensions.map(|(w, _)| w),
            height: self.dimensions.map(|(_, h)| h),
            input_languages: self.input_languages.clone(),
            target_language: self.target_language,
            detected_text: self.detected_text(),
            translatable: self.state.is_translatable(),
            translated_text: self.translation.as_ref().map(Translation::joined),
            has_audio: self.audio.is_some(),
            message: self.message.clone(),
        }
    }
}

/// Serialized form of an image for the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct ImageView {
    pub id: ImageId,
    pub label: String,
    pub source: ImageSource,
    pub state: ImageState,
    pub has_preview: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub input_languages: LanguageSet,
    pub target_language: Language,
    pub detected_text: String,
    pub translatable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    pub config: SessionConfig,
    pub images: Vec<ImageView>,
}

/// All state for one user
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    images: Vec<ImageRecord>,
    detections: HashMap<(String, LanguageSet), Vec<String>>,
    created_at: SystemTime,
}

impl Session {
    pub fn new(id: SessionId, config: SessionConfig) -> SessionResult<Self> {
        if config.input_languages.is_empty() {
            return Err(SessionError::NoInputLanguages);
        }
        Ok(Self {
            id,
            config,
            images: Vec::new(),
            detections: HashMap::new(),
            created_at: SystemTime::now(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Replace the configuration used for future uploads
    pub fn set_config(&mut self, config: SessionConfig) -> SessionResult<()> {
        if config.input_languages.is_empty() {
            return Err(SessionError::NoInputLanguages);
        }
        self.config = config;
        Ok(())
    }

    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    pub fn image(&self, id: &ImageId) -> SessionResult<&ImageRecord> {
        self.images
            .iter()
            .find(|img| &img.id == id)
            .ok_or_else(|| SessionError::ImageNotFound(id.to_string()))
    }

    pub fn image_mut(&mut self, id: &ImageId) -> SessionResult<&mut ImageRecord> {
        self.images
            .iter_mut()
            .find(|img| &img.id == id)
            .ok_or_else(|| SessionError::ImageNotFound(id.to_string()))
    }

    /// Identity for newly uploaded bytes; repeated uploads get a `-n` suffix
    pub fn next_image_id(&self, digest: &str) -> ImageId {
        let taken = |candidate: &str| self.images.iter().any(|img| img.id.as_str() == candidate);
        if !taken(digest) {
            return ImageId::new(digest);
        }
        (2..)
            .map(|n| format!("{}-{}", digest, n))
            .find(|candidate| !taken(candidate))
            .map(ImageId::new)
            .unwrap_or_else(|| ImageId::new(digest))
    }

    pub fn push_image(&mut self, record: ImageRecord) {
        self.images.push(record);
    }

    pub fn cached_detection(&self, digest: &str, languages: &LanguageSet) -> Option<&[String]> {
        self.detections
            .get(&(digest.to_string(), languages.clone()))
            .map(Vec::as_slice)
    }

    pub fn cache_detection(&mut self, digest: &str, languages: &LanguageSet, fragments: Vec<String>) {
        self.detections
            .insert((digest.to_string(), languages.clone()), fragments);
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            config: self.config.clone(),
            images: self.images.iter().map(ImageRecord::view).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ImageRecord {
        ImageRecord::new(
            ImageId::new(id),
            "photo.png",
            ImageSource::Upload,
            id,
            &SessionConfig::default(),
        )
    }

    #[test]
    fn test_forward_path_to_translated() {
        let mut img = record("a");
        for next in [ImageState::Prepared, ImageState::Detected, ImageState::Translated] {
            img.advance(next).unwrap();
        }
        assert_eq!(img.state(), ImageState::Translated);
    }

    #[test]
    fn test_no_backward_transitions() {
        let mut img = record("a");
        img.advance(ImageState::Prepared).unwrap();
        img.advance(ImageState::Detected).unwrap();

        let err = img.advance(ImageState::Prepared).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
        assert_eq!(img.state(), ImageState::Detected);

        img.advance(ImageState::Translated).unwrap();
        assert!(img.advance(ImageState::Failed(Stage::Translation)).is_err());
    }

    #[test]
    fn test_retry_only_from_translate_failures() {
        use ImageState::*;
        assert!(Failed(Stage::Translation).can_transition_to(Translated));
        assert!(Failed(Stage::Synthesis).can_transition_to(Failed(Stage::Translation)));
        assert!(!Failed(Stage::Decode).can_transition_to(Translated));
        assert!(!Failed(Stage::Detection).can_transition_to(Translated));
        assert!(!NoText.can_transition_to(Translated));
        assert!(!Uploaded.can_transition_to(Detected));
    }

    #[test]
    fn test_translatable_states() {
        assert!(ImageState::Detected.is_translatable());
        assert!(ImageState::Failed(Stage::Synthesis).is_translatable());
        assert!(!ImageState::NoText.is_translatable());
        assert!(!ImageState::Failed(Stage::Decode).is_translatable());
    }

    #[test]
    fn test_duplicate_uploads_get_distinct_ids() {
        let mut session = Session::new(SessionId::new(), SessionConfig::default()).unwrap();
        assert_eq!(session.next_image_id("abc").as_str(), "abc");
        session.push_image(record("abc"));
        assert_eq!(session.next_image_id("abc").as_str(), "abc-2");
        session.push_image(record("abc-2"));
        assert_eq!(session.next_image_id("abc").as_str(), "abc-3");
    }

    #[test]
    fn test_empty_language_selection_rejected() {
        let config = SessionConfig {
            input_languages: LanguageSet::default(),
            target_language: Language::Hindi,
        };
        assert!(matches!(
            Session::new(SessionId::new(), config.clone()),
            Err(SessionError::NoInputLanguages)
        ));

        let mut session = Session::new(SessionId::new(), SessionConfig::default()).unwrap();
        assert!(session.set_config(config).is_err());
        assert_eq!(session.config(), &SessionConfig::default());
    }

    #[test]
    fn test_view_serializes_state_and_message() {
        let mut img = record("a");
        img.advance(ImageState::Failed(Stage::Decode)).unwrap();
        img.message = Some(Message::warning("Unsupported image format"));

        let json = serde_json::to_value(img.view()).unwrap();
        assert_eq!(json["state"]["status"], "failed");
        assert_eq!(json["state"]["stage"], "decode");
        assert_eq!(json["message"]["level"], "warning");
        assert_eq!(json["translatable"], false);
        assert!(json.get("translated_text").is_none());
    }
}
