//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfigFile {
    /// Turn-taking pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    /// Waiting chime configuration
    #[serde(default)]
    pub chime: ChimeFileConfig,

    /// STT/TTS provider configuration
    #[serde(default)]
    pub providers: ProvidersFileConfig,

    /// Remote agent configuration
    #[serde(default)]
    pub agent: AgentFileConfig,
}

/// Pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    /// Wake phrase (e.g. "hey jarvis")
    pub wake_word: Option<String>,

    /// Require the wake word before listening
    pub wake_word_enabled: Option<bool>,

    /// Detection confidence threshold (0.0 - 1.0)
    pub wake_word_threshold: Option<f32>,

    /// Re-trigger suppression window
    pub wake_word_cooldown_secs: Option<f64>,

    /// RMS energy above which a frame counts as speech
    pub vad_threshold: Option<f32>,

    /// Trailing silence that ends an utterance
    pub silence_duration_secs: Option<f64>,

    /// Minimum buffered samples for an utterance to be transcribed
    pub min_speech_samples: Option<usize>,

    /// Force-end an utterance after this long
    pub max_speech_duration_secs: Option<f64>,

    /// Return to wake word mode after this long without speech
    pub listening_timeout_secs: Option<f64>,

    /// Upper bound on how long a cancel waits for playback to stop
    pub cancel_timeout_ms: Option<u64>,

    pub debug_wakeword: Option<bool>,
    pub debug_vad: Option<bool>,
    pub debug_stt: Option<bool>,
    pub debug_audio: Option<bool>,
}

/// Waiting chime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChimeFileConfig {
    pub sample_rate: Option<u32>,
    pub frequency_hz: Option<f32>,
    pub harmonic_2nd: Option<f32>,
    pub harmonic_3rd: Option<f32>,
    pub tone_duration_ms: Option<u64>,
    pub silence_duration_ms: Option<u64>,
    pub fade_in_ms: Option<u64>,
    pub fade_out_ms: Option<u64>,
    pub volume: Option<f32>,
}

/// Speech provider configuration
#[derive(Debug, Default, Deserialize)]
pub struct ProvidersFileConfig {
    /// API key for the OpenAI-compatible endpoints
    pub api_key: Option<String>,

    /// Base URL (e.g. `https://api.openai.com/v1`)
    pub api_base: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,
}

/// Remote agent configuration
#[derive(Debug, Default, Deserialize)]
pub struct AgentFileConfig {
    /// Endpoint that accepts transcripts and returns replies
    pub url: Option<String>,

    /// Identifier sent with every transcript
    pub device_id: Option<String>,

    /// Give up on a reply after this long
    pub timeout_secs: Option<f64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    let Some(path) = config_file_path() else {
        return VoiceConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load a TOML config file from an explicit path
///
/// Missing or invalid files degrade to defaults with a warning.
pub fn load_config_file_from(path: &Path) -> VoiceConfigFile {
    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-voice")
            .join("config.toml")
    })
}
