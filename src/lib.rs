// Library exports for the image text translator
//
// Images are downsampled, their text detected with a local OCR model, then
// translated and spoken through remote services on demand.

pub mod api;
pub mod core;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{ConfigError, DecodeError, DetectionError, SessionError, SynthesisError, TranslationError},
    types::{AudioClip, ImageId, Language, LanguageSet, SessionConfig, SessionId, Translation},
};

pub use orchestration::{SessionOrchestrator, SessionStore};

pub use services::{DetectionService, OnnxDetectorFactory, SpeechService, TranslationService};

pub use utils::{prepare_image_async, Metrics};
