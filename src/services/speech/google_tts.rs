// Google Translate text-to-speech client (the endpoint gTTS talks to)

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument, trace};

use super::SpeechSynthesizer;
use crate::core::errors::{SynthesisError, SynthesisResult};
use crate::core::types::{AudioClip, Language};

/// Longest text the endpoint speaks in one request, in characters
pub const MAX_CHUNK_CHARS: usize = 100;

pub struct GoogleSpeech {
    http_client: reqwest::Client,
    base_url: String,
}

impl GoogleSpeech {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to create speech HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_chunk(&self, chunk: &str, code: &str, idx: usize, total: usize) -> SynthesisResult<Vec<u8>> {
        let total = total.to_string();
        let idx_param = idx.to_string();
        let textlen = chunk.chars().count().to_string();

        let response = self
            .http_client
            .get(format!("{}/translate_tts", self.base_url))
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", code),
                ("q", chunk),
                ("total", total.as_str()),
                ("idx", idx_param.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                chunk: idx,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleSpeech {
    #[instrument(skip(self, text), fields(language = %language))]
    async fn synthesize(&self, text: &str, language: Language) -> SynthesisResult<AudioClip> {
        let chunks = split_for_speech(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        debug!("Speaking {} chunk(s)", chunks.len());

        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let bytes = self
                .fetch_chunk(chunk, language.speech_code(), idx, chunks.len())
                .await?;
            trace!("Chunk {}: {} chars → {} bytes", idx, chunk.chars().count(), bytes.len());
            audio.extend_from_slice(&bytes);
        }

        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(AudioClip::mp3(audio))
    }
}

fn is_sentence_boundary(c: char) -> bool {
    matches!(
        c,
        '\n' | '.' | '!' | '?' | ',' | ';' | ':' | '।' | '॥' | '。' | '！' | '？' | '，' | '、' | '；'
    )
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks of at most `limit` characters.
///
/// Breaks at newlines and sentence punctuation first, then at whitespace; a
/// word longer than `limit` is cut on character boundaries. Neighbouring
/// pieces are packed back together while they fit.
pub fn split_for_speech(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut pieces: Vec<String> = Vec::new();

    let sentences = text
        .split_inclusive(is_sentence_boundary)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    for sentence in sentences {
        if char_len(sentence) <= limit {
            pieces.push(sentence.to_string());
            continue;
        }

        for word in sentence.split_whitespace() {
            if char_len(word) <= limit {
                pieces.push(word.to_string());
                continue;
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(limit).map(|c| c.iter().collect::<String>()));
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if current.is_empty() {
            current = piece;
        } else if char_len(&current) + 1 + char_len(&piece) <= limit {
            current.push(' ');
            current.push_str(&piece);
        } else {
            chunks.push(std::mem::replace(&mut current, piece));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
