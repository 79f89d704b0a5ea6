use crate::core::errors::ConfigError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    pub max_upload_mb: usize,
}

/// Image preparation configuration
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Longest side of a prepared image, in pixels
    pub max_dimension: u32,
}

/// OCR configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub models_dir: PathBuf,
    pub inference_backend: Option<String>,
    /// Longest side fed to the text-region model (multiple of 32)
    pub limit_side: u32,
    pub pixel_threshold: f32,
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    /// Number of language-set detectors kept loaded
    pub cache_size: usize,
    pub timeout: Duration,
}

/// External translation/speech service configuration
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub translate_base_url: String,
    pub translation_timeout: Duration,
    pub tts_base_url: String,
    pub speech_timeout: Duration,
}

/// Session lifecycle configuration
#[derive(Debug, Clone)]
pub struct SessionsConfig {
    pub idle_ttl: Duration,
    pub max_sessions: usize,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub image: ImageConfig,
    pub detection: DetectionConfig,
    pub services: ServicesConfig,
    pub sessions: SessionsConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build and validate a config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::load(&lookup);
        config.validate()?;
        Ok(config)
    }

    fn load<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let seconds =
            |key: &str, default: u64| Duration::from_secs(parse_var(lookup, key).unwrap_or(default));

        // Parse log level
        let log_level = lookup("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        Self {
            server: ServerConfig {
                port: parse_var(lookup, "SERVER_PORT").unwrap_or(8501),
                host: string("SERVER_HOST", "0.0.0.0"),
                log_level,
                max_upload_mb: parse_var(lookup, "MAX_UPLOAD_MB").unwrap_or(50),
            },
            image: ImageConfig {
                max_dimension: parse_var(lookup, "MAX_IMAGE_DIMENSION").unwrap_or(800),
            },
            detection: DetectionConfig {
                models_dir: PathBuf::from(string("MODELS_DIR", "models")),
                inference_backend: lookup("INFERENCE_BACKEND")
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty()),
                limit_side: parse_var(lookup, "DET_LIMIT_SIDE").unwrap_or(960),
                pixel_threshold: parse_var(lookup, "DET_PIXEL_THRESHOLD").unwrap_or(0.3),
                box_threshold: parse_var(lookup, "DET_BOX_THRESHOLD").unwrap_or(0.6),
                unclip_ratio: parse_var(lookup, "DET_UNCLIP_RATIO").unwrap_or(1.5),
                cache_size: parse_var(lookup, "DETECTOR_CACHE_SIZE").unwrap_or(4),
                timeout: seconds("DETECTION_TIMEOUT_SECONDS", 120),
            },
            services: ServicesConfig {
                translate_base_url: string("TRANSLATE_BASE_URL", "https://translate.googleapis.com")
                    .trim_end_matches('/')
                    .to_string(),
                translation_timeout: seconds("TRANSLATION_TIMEOUT_SECONDS", 20),
                tts_base_url: string("TTS_BASE_URL", "https://translate.google.com")
                    .trim_end_matches('/')
                    .to_string(),
                speech_timeout: seconds("SPEECH_TIMEOUT_SECONDS", 60),
            },
            sessions: SessionsConfig {
                idle_ttl: seconds("SESSION_IDLE_TTL_SECONDS", 3600),
                max_sessions: parse_var(lookup, "MAX_SESSIONS").unwrap_or(1000),
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(64..=8192).contains(&self.image.max_dimension) {
            return Err(ConfigError::InvalidImageConfig(format!(
                "max_dimension must be between 64 and 8192, got {}",
                self.image.max_dimension
            )));
        }

        if self.server.max_upload_mb == 0 {
            return Err(ConfigError::InvalidImageConfig(
                "max_upload_mb must be > 0".to_string(),
            ));
        }

        let det = &self.detection;
        if !(320..=4096).contains(&det.limit_side) || det.limit_side % 32 != 0 {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "limit_side must be a multiple of 32 between 320 and 4096, got {}",
                det.limit_side
            )));
        }

        for (name, value) in [
            ("DET_PIXEL_THRESHOLD", det.pixel_threshold),
            ("DET_BOX_THRESHOLD", det.box_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }

        if !(det.unclip_ratio > 0.0 && det.unclip_ratio <= 4.0) {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "unclip_ratio must be in (0.0, 4.0], got {}",
                det.unclip_ratio
            )));
        }

        if det.cache_size == 0 {
            return Err(ConfigError::InvalidDetectionConfig(
                "detector cache size must be > 0".to_string(),
            ));
        }

        for (name, timeout) in [
            ("DETECTION_TIMEOUT_SECONDS", det.timeout),
            ("TRANSLATION_TIMEOUT_SECONDS", self.services.translation_timeout),
            ("SPEECH_TIMEOUT_SECONDS", self.services.speech_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidServiceConfig(format!(
                    "{} must be > 0",
                    name
                )));
            }
        }

        for url in [
            &self.services.translate_base_url,
            &self.services.tts_base_url,
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidServiceConfig(format!(
                    "service URL must be http(s), got '{}'",
                    url
                )));
            }
        }

        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::InvalidSessionConfig(
                "max_sessions must be > 0".to_string(),
            ));
        }

        if self.sessions.idle_ttl.is_zero() {
            return Err(ConfigError::InvalidSessionConfig(
                "session idle TTL must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb * 1024 * 1024
    }

    pub fn max_dimension(&self) -> u32 {
        self.image.max_dimension
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}

// Note: No Default implementation because Config::new() can fail.
// Tests build one with Config::from_lookup(|_| None).

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.max_dimension(), 800);
        assert_eq!(config.server_port(), 8501);
        assert_eq!(config.log_level(), Level::INFO);
        assert_eq!(config.detection.limit_side, 960);
        assert_eq!(config.detection.cache_size, 4);
        assert_eq!(config.services.translate_base_url, "https://translate.googleapis.com");
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let config = config_with(&[
            ("MAX_IMAGE_DIMENSION", "1024"),
            ("LOG_LEVEL", "debug"),
            ("TTS_BASE_URL", "http://localhost:9000/"),
            ("INFERENCE_BACKEND", " cuda "),
        ])
        .unwrap();
        assert_eq!(config.max_dimension(), 1024);
        assert_eq!(config.log_level(), Level::DEBUG);
        assert_eq!(config.services.tts_base_url, "http://localhost:9000");
        assert_eq!(config.detection.inference_backend.as_deref(), Some("CUDA"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(matches!(
            config_with(&[("MAX_IMAGE_DIMENSION", "10")]),
            Err(ConfigError::InvalidImageConfig(_))
        ));
        assert!(matches!(
            config_with(&[("DET_LIMIT_SIDE", "1000")]),
            Err(ConfigError::InvalidDetectionConfig(_))
        ));
        assert!(matches!(
            config_with(&[("DET_BOX_THRESHOLD", "1.5")]),
            Err(ConfigError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            config_with(&[("TRANSLATE_BASE_URL", "ftp://example.com")]),
            Err(ConfigError::InvalidServiceConfig(_))
        ));
        assert!(matches!(
            config_with(&[("SPEECH_TIMEOUT_SECONDS", "0")]),
            Err(ConfigError::InvalidServiceConfig(_))
        ));
    }
}
