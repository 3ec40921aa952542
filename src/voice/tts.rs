//! Text-to-speech (TTS) over an OpenAI-compatible speech endpoint

use std::sync::OnceLock;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{AudioChunk, Synthesizer};
use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Sample rate of the endpoint's raw `pcm` response format
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// OpenAI speech synthesis backend
///
/// Requests raw 16-bit little-endian PCM so no decoder is needed.
pub struct OpenAiSynthesizer {
    client: OnceLock<reqwest::blocking::Client>,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    voice: String,
    speed: f32,
    timeout: Duration,
}

#[derive(serde::Serialize)]
struct TtsRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

impl OpenAiSynthesizer {
    #[must_use]
    pub fn new(providers: &ProviderConfig) -> Self {
        Self {
            client: OnceLock::new(),
            api_key: providers.api_key.clone(),
            endpoint: format!("{}/audio/speech", providers.api_base.trim_end_matches('/')),
            model: providers.tts_model.clone(),
            voice: providers.tts_voice.clone(),
            speed: providers.tts_speed,
            timeout: Duration::from_secs(30),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for TTS".to_string()))
    }
}

impl Synthesizer for OpenAiSynthesizer {
    fn warm_up(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }

    fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<AudioChunk> {
        if cancel.is_cancelled() {
            return Ok(AudioChunk::new(Vec::new(), PCM_SAMPLE_RATE));
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "pcm",
        };

        tracing::debug!(chars = text.len(), voice = %self.voice, "synthesizing");
        let response = self
            .client()?
            .post(&self.endpoint)
            .bearer_auth(self.api_key()?)
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes()?;
        Ok(AudioChunk::from_le_bytes(&audio, PCM_SAMPLE_RATE))
    }
}
