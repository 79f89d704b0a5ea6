// Error types for each stage of the image workflow
//
// Every per-image error is rendered to the user as a message on that image;
// only SessionError and ConfigError ever fail a whole request or startup.

use thiserror::Error;

/// Image decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported image format (expected JPEG or PNG)")]
    UnsupportedFormat,

    #[error("Image data is corrupt or truncated: {0}")]
    Corrupt(String),

    #[error("Image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("Image processing task failed: {0}")]
    TaskFailed(String),
}

/// Text detector errors
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("No input languages selected")]
    NoLanguages,

    #[error("Unsupported language combination [{languages}]: {reason}")]
    UnsupportedLanguages { languages: String, reason: String },

    #[error("OCR model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Failed to load OCR model: {0}")]
    ModelLoad(String),

    #[error("Image preprocessing failed: {0}")]
    Preprocessing(String),

    #[error("OCR inference failed: {0}")]
    Inference(String),

    #[error("Text detection timed out after {0}s")]
    Timeout(u64),

    #[error("Detection task failed: {0}")]
    TaskFailed(String),
}

/// Translation service errors
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Translation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Translation service returned HTTP {status}")]
    Status { status: u16 },

    #[error("Invalid translation response: {0}")]
    InvalidResponse(String),

    #[error("Translation timed out after {0}s")]
    Timeout(u64),

    #[error("Text too long to translate ({len} characters, limit {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("Fragment {} could not be translated: {source}", index + 1)]
    FragmentFailed {
        index: usize,
        #[source]
        source: Box<TranslationError>,
    },
}

/// Speech synthesis errors
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Speech request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Speech service returned HTTP {status} for chunk {chunk}")]
    Status { status: u16, chunk: usize },

    #[error("Speech service returned no audio")]
    EmptyAudio,

    #[error("Speech synthesis timed out after {0}s")]
    Timeout(u64),
}

/// Request-level session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image {image_id} cannot move from {from} to {to}")]
    InvalidTransition {
        image_id: String,
        from: String,
        to: String,
    },

    #[error("At least one input language must be selected")]
    NoInputLanguages,

    #[error("Unsupported language combination [{languages}]: {reason}")]
    UnsupportedLanguages { languages: String, reason: String },

    #[error(transparent)]
    UnknownLanguage(#[from] UnknownLanguage),

    #[error("Too many active sessions (limit {0})")]
    SessionLimit(usize),

    #[error("No audio available for image {0}")]
    NoAudio(String),

    #[error("No preview available for image {0}")]
    NoPreview(String),
}

/// Unrecognized language code or name
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown language '{0}'")]
pub struct UnknownLanguage(pub String);

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid image config: {0}")]
    InvalidImageConfig(String),

    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),

    #[error("Invalid service config: {0}")]
    InvalidServiceConfig(String),

    #[error("Invalid session config: {0}")]
    InvalidSessionConfig(String),

    #[error("Threshold {name} must be in [0.0, 1.0], got {value}")]
    InvalidThreshold { name: &'static str, value: f32 },
}

// Convenience type aliases for Results
pub type DecodeResult<T> = Result<T, DecodeError>;
pub type DetectionResult<T> = Result<T, DetectionError>;
pub type TranslationResult<T> = Result<T, TranslationError>;
pub type SynthesisResult<T> = Result<T, SynthesisError>;
pub type SessionResult<T> = Result<T, SessionError>;
