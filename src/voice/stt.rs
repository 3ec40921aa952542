//! Speech-to-text (STT) over an OpenAI-compatible transcription endpoint

use std::sync::OnceLock;
use std::time::Duration;

use super::{Transcriber, samples_to_wav};
use crate::config::ProviderConfig;
use crate::{Error, Result};

/// Response from the Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Whisper transcription backend
///
/// Uses the blocking client; calls arrive on the audio feeder thread.
pub struct WhisperTranscriber {
    client: OnceLock<reqwest::blocking::Client>,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl WhisperTranscriber {
    #[must_use]
    pub fn new(providers: &ProviderConfig) -> Self {
        Self {
            client: OnceLock::new(),
            api_key: providers.api_key.clone(),
            endpoint: format!(
                "{}/audio/transcriptions",
                providers.api_base.trim_end_matches('/')
            ),
            model: providers.stt_model.clone(),
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
            .ok_or_else(|| Error::Config("OpenAI API key required for Whisper".to_string()))
    }
}

impl Transcriber for WhisperTranscriber {
    fn warm_up(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }

    fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<String> {
        let audio = samples_to_wav(samples, sample_rate)?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::blocking::multipart::Form::new()
            .part(
                "file",
                reqwest::blocking::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client()?
            .post(&self.endpoint)
            .bearer_auth(self.api_key()?)
            .multipart(form)
            .send()
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
