// Google Translate web endpoint client (the one deep-translator style clients use)

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, trace};

use super::Translator;
use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::types::Language;

/// Longest text the service accepts in one request, in characters
pub const MAX_TEXT_CHARS: usize = 5000;

pub struct GoogleTranslator {
    http_client: reqwest::Client,
    base_url: String,
}

impl GoogleTranslator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create translation HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    #[instrument(skip(self, text), fields(chars = text.chars().count(), target = %target))]
    async fn translate(&self, text: &str, target: Language) -> TranslationResult<String> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let len = text.chars().count();
        if len > MAX_TEXT_CHARS {
            return Err(TranslationError::TextTooLong {
                len,
                max: MAX_TEXT_CHARS,
            });
        }

        let response = self
            .http_client
            .get(format!("{}/translate_a/single", self.base_url))
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target.translation_code()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!("Translation service returned {}", status);
            return Err(TranslationError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let translated = parse_translation(&body)?;
        trace!("'{}' → '{}'", text, translated);
        Ok(translated)
    }
}

/// Concatenate the translated segments of a `translate_a/single` response.
///
/// The body looks like `[[["segment", "source", ...], ...], null, "en", ...]`.
pub fn parse_translation(body: &str) -> TranslationResult<String> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TranslationError::InvalidResponse(format!("not JSON: {}", e)))?;

    let segments = value
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| TranslationError::InvalidResponse("missing translation segments".to_string()))?;

    let translated: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();

    if translated.is_empty() {
        return Err(TranslationError::InvalidResponse(
            "response contained no translated text".to_string(),
        ));
    }
    Ok(translated)
}
