pub mod detection;
pub mod onnx_builder;
pub mod speech;
pub mod translation;

// Re-export commonly used services
pub use detection::{DetectionService, DetectorCache, DetectorFactory, OnnxDetectorFactory, TextDetector};
pub use speech::{GoogleSpeech, SpeechService, SpeechSynthesizer};
pub use translation::{GoogleTranslator, TranslationService, Translator};
