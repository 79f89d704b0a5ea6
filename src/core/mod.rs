pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ConfigError, DecodeError, DetectionError, SessionError, SynthesisError, TranslationError,
    UnknownLanguage,
};
pub use types::{
    AudioClip, ImageId, ImageSource, Language, LanguageSet, Script, SessionConfig, SessionId,
    SourceImage, Translation,
};
