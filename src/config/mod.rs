//! Configuration management for the voice client

pub mod file;

use std::time::Duration;

use crate::{Error, Result};
use file::VoiceConfigFile;

/// Voice client configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Turn-taking pipeline configuration
    pub pipeline: PipelineConfig,

    /// Waiting chime configuration
    pub chime: ChimeConfig,

    /// STT/TTS provider configuration
    pub providers: ProviderConfig,

    /// Remote agent configuration
    pub agent: AgentConfig,
}

/// Pipeline configuration: plain values, no callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Wake phrase reported to `on_wake_word`
    pub wake_word: String,

    /// When false the pipeline listens continuously without a wake word
    pub wake_word_enabled: bool,

    /// Minimum detection confidence to accept a wake word
    pub wake_word_threshold: f32,

    /// Detections within this window after a trigger are ignored
    pub wake_word_cooldown: Duration,

    /// RMS energy above which a frame counts as speech
    pub vad_threshold: f32,

    /// Trailing silence that ends an utterance
    pub silence_duration: Duration,

    /// Minimum buffered samples for an utterance to reach STT
    pub min_speech_samples: usize,

    /// Force-end an utterance after this much buffered speech
    pub max_speech_duration: Duration,

    /// Wall-clock time in LISTENING without speech before giving up
    pub listening_timeout: Duration,

    /// Microphone sample rate in Hz
    pub sample_rate: u32,

    /// Upper bound on how long a cancel waits for playback to return
    pub cancel_timeout: Duration,

    /// Verbose logging toggles
    pub debug: DebugFlags,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wake_word: "Hey Jarvis".to_string(),
            wake_word_enabled: true,
            wake_word_threshold: 0.5,
            wake_word_cooldown: Duration::from_secs(2),
            vad_threshold: 0.02,
            silence_duration: Duration::from_millis(1500),
            // 1 second at 16kHz
            min_speech_samples: 16_000,
            max_speech_duration: Duration::from_secs(60),
            listening_timeout: Duration::from_secs(10),
            sample_rate: 16_000,
            cancel_timeout: Duration::from_millis(500),
            debug: DebugFlags::default(),
        }
    }
}

/// Per-stage debug logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    /// Log every wake word candidate with its confidence
    pub wakeword: bool,
    /// Log VAD decisions periodically
    pub vad: bool,
    /// Log STT inputs and outcomes
    pub stt: bool,
    /// Log microphone RMS/peak about once per second
    pub audio: bool,
}

/// Waiting chime tone parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ChimeConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Fundamental frequency
    pub frequency_hz: f32,
    /// Relative amplitude of the 2nd harmonic
    pub harmonic_2nd: f32,
    /// Relative amplitude of the 3rd harmonic
    pub harmonic_3rd: f32,
    /// Audible part of one loop iteration
    pub tone_duration: Duration,
    /// Silent gap after the tone
    pub silence_duration: Duration,
    pub fade_in: Duration,
    pub fade_out: Duration,
    /// Output gain (0.0 - 1.0)
    pub volume: f32,
    /// Samples handed to the sink per call; bounds stop latency
    pub playback_chunk_samples: usize,
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            frequency_hz: 659.25,
            harmonic_2nd: 0.3,
            harmonic_3rd: 0.1,
            tone_duration: Duration::from_millis(400),
            silence_duration: Duration::from_millis(1600),
            fade_in: Duration::from_millis(20),
            fade_out: Duration::from_millis(250),
            volume: 0.25,
            // ~46ms at 22050 Hz
            playback_chunk_samples: 1024,
        }
    }
}

/// OpenAI-compatible STT/TTS provider settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// API key (from `OPENAI_API_KEY`)
    pub api_key: Option<String>,

    /// Base URL for the `/audio/*` endpoints
    pub api_base: String,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
        }
    }
}

/// Remote agent settings
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Endpoint that accepts transcripts; `None` disables the agent
    pub url: Option<String>,

    /// Identifier sent with each transcript
    pub device_id: String,

    /// Give up waiting for a reply after this long
    pub timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: None,
            device_id: default_device_id(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Hostname, or a fixed fallback when it cannot be read
fn default_device_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "beacon-voice".to_string())
}

fn secs(value: Option<f64>) -> Option<Duration> {
    value.and_then(|v| Duration::try_from_secs_f64(v).ok())
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the merged configuration is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the merged configuration is invalid
    pub fn resolve<F>(fc: VoiceConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let p = fc.pipeline;
        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            wake_word: env("BEACON_VOICE_WAKE_WORD")
                .or(p.wake_word)
                .unwrap_or(defaults.wake_word),
            wake_word_enabled: p.wake_word_enabled.unwrap_or(defaults.wake_word_enabled),
            wake_word_threshold: env("BEACON_VOICE_WAKE_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .or(p.wake_word_threshold)
                .unwrap_or(defaults.wake_word_threshold),
            wake_word_cooldown: secs(p.wake_word_cooldown_secs)
                .unwrap_or(defaults.wake_word_cooldown),
            vad_threshold: p.vad_threshold.unwrap_or(defaults.vad_threshold),
            silence_duration: secs(p.silence_duration_secs).unwrap_or(defaults.silence_duration),
            min_speech_samples: p.min_speech_samples.unwrap_or(defaults.min_speech_samples),
            max_speech_duration: secs(p.max_speech_duration_secs)
                .unwrap_or(defaults.max_speech_duration),
            listening_timeout: secs(p.listening_timeout_secs)
                .unwrap_or(defaults.listening_timeout),
            sample_rate: defaults.sample_rate,
            cancel_timeout: p
                .cancel_timeout_ms
                .map_or(defaults.cancel_timeout, Duration::from_millis),
            debug: DebugFlags {
                wakeword: p.debug_wakeword.unwrap_or(false),
                vad: p.debug_vad.unwrap_or(false),
                stt: p.debug_stt.unwrap_or(false),
                audio: p.debug_audio.unwrap_or(false),
            },
        };

        let c = fc.chime;
        let chime_defaults = ChimeConfig::default();
        let chime = ChimeConfig {
            sample_rate: c.sample_rate.unwrap_or(chime_defaults.sample_rate),
            frequency_hz: c.frequency_hz.unwrap_or(chime_defaults.frequency_hz),
            harmonic_2nd: c.harmonic_2nd.unwrap_or(chime_defaults.harmonic_2nd),
            harmonic_3rd: c.harmonic_3rd.unwrap_or(chime_defaults.harmonic_3rd),
            tone_duration: c
                .tone_duration_ms
                .map_or(chime_defaults.tone_duration, Duration::from_millis),
            silence_duration: c
                .silence_duration_ms
                .map_or(chime_defaults.silence_duration, Duration::from_millis),
            fade_in: c.fade_in_ms.map_or(chime_defaults.fade_in, Duration::from_millis),
            fade_out: c
                .fade_out_ms
                .map_or(chime_defaults.fade_out, Duration::from_millis),
            volume: c.volume.unwrap_or(chime_defaults.volume),
            playback_chunk_samples: chime_defaults.playback_chunk_samples,
        };

        let pr = fc.providers;
        let provider_defaults = ProviderConfig::default();
        let providers = ProviderConfig {
            api_key: env("OPENAI_API_KEY").or(pr.api_key),
            api_base: env("BEACON_VOICE_API_BASE")
                .or(pr.api_base)
                .unwrap_or(provider_defaults.api_base),
            stt_model: env("BEACON_VOICE_STT_MODEL")
                .or(pr.stt_model)
                .unwrap_or(provider_defaults.stt_model),
            tts_model: env("BEACON_VOICE_TTS_MODEL")
                .or(pr.tts_model)
                .unwrap_or(provider_defaults.tts_model),
            tts_voice: env("BEACON_VOICE_TTS_VOICE")
                .or(pr.tts_voice)
                .unwrap_or(provider_defaults.tts_voice),
            tts_speed: pr.tts_speed.unwrap_or(provider_defaults.tts_speed),
        };

        let a = fc.agent;
        let agent = AgentConfig {
            url: env("BEACON_VOICE_AGENT_URL").or(a.url),
            device_id: env("BEACON_VOICE_DEVICE_ID")
                .or(a.device_id)
                .unwrap_or_else(default_device_id),
            timeout: secs(a.timeout_secs).unwrap_or(Duration::from_secs(120)),
        };

        let config = Self {
            pipeline,
            chime,
            providers,
            agent,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns error describing the first out-of-range value
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if !(0.0..=1.0).contains(&p.wake_word_threshold) {
            return Err(Error::Config(format!(
                "wake word threshold must be within 0.0..=1.0, got {}",
                p.wake_word_threshold
            )));
        }
        if p.wake_word_enabled && p.wake_word.trim().is_empty() {
            return Err(Error::Config("wake word must not be empty".to_string()));
        }
        if p.sample_rate == 0 || self.chime.sample_rate == 0 {
            return Err(Error::Config("sample rate must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.chime.volume) {
            return Err(Error::Config(format!(
                "chime volume must be within 0.0..=1.0, got {}",
                self.chime.volume
            )));
        }
        if !(0.25..=4.0).contains(&self.providers.tts_speed) {
            return Err(Error::Config(format!(
                "tts speed must be within 0.25..=4.0, got {}",
                self.providers.tts_speed
            )));
        }
        Ok(())
    }
}
