// Domain types shared across services and the session workflow

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core::errors::{DetectionError, DetectionResult, UnknownLanguage};

/// Languages offered for recognition and translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "mr")]
    Marathi,
    #[serde(rename = "kn")]
    Kannada,
    #[serde(rename = "hi")]
    Hindi,
    #[serde(rename = "ko")]
    Korean,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "ch_sim")]
    ChineseSimplified,
}

/// Writing system a recognition model is trained for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Latin,
    Devanagari,
    Kannada,
    Korean,
    Japanese,
    Chinese,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::English,
        Language::Marathi,
        Language::Kannada,
        Language::Hindi,
        Language::Korean,
        Language::Japanese,
        Language::ChineseSimplified,
    ];

    /// Code used for OCR language selection
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Marathi => "mr",
            Language::Kannada => "kn",
            Language::Hindi => "hi",
            Language::Korean => "ko",
            Language::Japanese => "ja",
            Language::ChineseSimplified => "ch_sim",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Marathi => "Marathi",
            Language::Kannada => "Kannada",
            Language::Hindi => "Hindi",
            Language::Korean => "Korean",
            Language::Japanese => "Japanese",
            Language::ChineseSimplified => "Chinese",
        }
    }

    /// Code understood by the translation service
    pub fn translation_code(self) -> &'static str {
        match self {
            Language::ChineseSimplified => "zh-CN",
            other => other.code(),
        }
    }

    /// Code understood by the speech service
    pub fn speech_code(self) -> &'static str {
        self.translation_code()
    }

    pub fn script(self) -> Script {
        match self {
            Language::English => Script::Latin,
            Language::Marathi | Language::Hindi => Script::Devanagari,
            Language::Kannada => Script::Kannada,
            Language::Korean => Script::Korean,
            Language::Japanese => Script::Japanese,
            Language::ChineseSimplified => Script::Chinese,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    /// Accepts either the code ("hi") or the display name ("Hindi")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Language::ALL
            .into_iter()
            .find(|lang| {
                lang.code().eq_ignore_ascii_case(needle) || lang.name().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

impl Script {
    /// Name used for model and dictionary files
    pub fn as_str(self) -> &'static str {
        match self {
            Script::Latin => "latin",
            Script::Devanagari => "devanagari",
            Script::Kannada => "kannada",
            Script::Korean => "korean",
            Script::Japanese => "japanese",
            Script::Chinese => "chinese",
        }
    }
}

/// Canonical (sorted, deduplicated) set of OCR input languages.
///
/// Used as the key of the detector cache, so two selections listing the same
/// languages in a different order share one detector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageSet(BTreeSet<Language>);

impl LanguageSet {
    pub fn new(languages: impl IntoIterator<Item = Language>) -> Self {
        Self(languages.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, language: Language) -> bool {
        self.0.contains(&language)
    }

    pub fn iter(&self) -> impl Iterator<Item = Language> + '_ {
        self.0.iter().copied()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.iter().map(Language::code).collect()
    }

    /// Pick the recognition script for this selection.
    ///
    /// English combines with anything; every other language in the set must
    /// share one script.
    pub fn recognition_script(&self) -> DetectionResult<Script> {
        if self.is_empty() {
            return Err(DetectionError::NoLanguages);
        }

        let mut scripts = self
            .iter()
            .filter(|lang| *lang != Language::English)
            .map(Language::script);

        let Some(first) = scripts.next() else {
            return Ok(Script::Latin);
        };

        if let Some(other) = scripts.find(|s| *s != first) {
            return Err(DetectionError::UnsupportedLanguages {
                languages: self.codes().join(", "),
                reason: format!(
                    "{} and {} text cannot be recognized together; only English combines with other languages",
                    first.as_str(),
                    other.as_str()
                ),
            });
        }

        Ok(first)
    }
}

impl FromIterator<Language> for LanguageSet {
    fn from_iter<I: IntoIterator<Item = Language>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for LanguageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.codes().join("+"))
    }
}

/// Languages chosen for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub input_languages: LanguageSet,
    pub target_language: Language,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_languages: LanguageSet::new([Language::English]),
            target_language: Language::English,
        }
    }
}

/// Session identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Image identity within a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an image entered the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Upload,
    Camera,
}

/// Raw image bytes received from the user
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub source: ImageSource,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// In-memory synthesized speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl AudioClip {
    pub fn mp3(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "audio/mpeg",
        }
    }
}

/// Translated fragments, index-aligned with the detected fragments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translation {
    pub fragments: Vec<String>,
}

impl Translation {
    pub fn joined(&self) -> String {
        self.fragments.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(|f| f.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing_accepts_codes_and_names() {
        assert_eq!("hi".parse::<Language>().unwrap(), Language::Hindi);
        assert_eq!("Hindi".parse::<Language>().unwrap(), Language::Hindi);
        assert_eq!("CH_SIM".parse::<Language>().unwrap(), Language::ChineseSimplified);
        assert_eq!(
            "fr".parse::<Language>().unwrap_err(),
            UnknownLanguage("fr".to_string())
        );
    }

    #[test]
    fn test_chinese_maps_to_service_code() {
        assert_eq!(Language::ChineseSimplified.code(), "ch_sim");
        assert_eq!(Language::ChineseSimplified.translation_code(), "zh-CN");
        assert_eq!(Language::Hindi.translation_code(), "hi");
    }

    #[test]
    fn test_language_set_is_canonical() {
        let a = LanguageSet::new([Language::Hindi, Language::English]);
        let b = LanguageSet::new([Language::English, Language::Hindi, Language::Hindi]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.to_string(), "en+hi");
    }

    #[test]
    fn test_recognition_script_compatibility() {
        let english = LanguageSet::new([Language::English]);
        assert_eq!(english.recognition_script().unwrap(), Script::Latin);

        let devanagari = LanguageSet::new([Language::English, Language::Hindi, Language::Marathi]);
        assert_eq!(devanagari.recognition_script().unwrap(), Script::Devanagari);

        let mixed = LanguageSet::new([Language::Korean, Language::Japanese]);
        assert!(matches!(
            mixed.recognition_script(),
            Err(DetectionError::UnsupportedLanguages { .. })
        ));

        assert!(matches!(
            LanguageSet::default().recognition_script(),
            Err(DetectionError::NoLanguages)
        ));
    }

    #[test]
    fn test_session_config_serializes_codes() {
        let config = SessionConfig {
            input_languages: LanguageSet::new([Language::ChineseSimplified, Language::English]),
            target_language: Language::Hindi,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"input_languages": ["en", "ch_sim"], "target_language": "hi"})
        );
    }

    #[test]
    fn test_translation_joined_preserves_order() {
        let translation = Translation {
            fragments: vec!["one".into(), "two".into(), "three".into()],
        };
        assert_eq!(translation.joined(), "one\ntwo\nthree");
        assert!(!translation.is_empty());
        assert!(Translation::default().is_empty());
    }
}
