//! Speech capabilities consumed by the pipeline
//!
//! Model inference lives behind these traits. [`Backends`] is the host-owned
//! context that warms them up exactly once before a pipeline uses them.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use super::AudioChunk;
use crate::{Error, Result};

/// Speech-to-text capability
pub trait Transcriber: Send + Sync {
    /// Load models or check credentials
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be used
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Transcribe one completed utterance of 16-bit mono PCM
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<String>;
}

/// Text-to-speech capability
pub trait Synthesizer: Send + Sync {
    /// Load voices or check credentials
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be used
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Synthesize one sentence
    ///
    /// Long-running implementations should poll `cancel` and return early.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<AudioChunk>;
}

/// Cleans reply text before synthesis; may return an empty string
pub trait TextSanitizer: Send + Sync {
    /// Produce speakable text
    fn sanitize(&self, text: &str) -> String;
}

/// A wake word hit reported by a detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WakeDetection {
    /// Detector confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// Wake word capability
///
/// Detectors are assumed re-triggerable; threshold and cooldown are applied
/// by the pipeline.
pub trait WakeWordDetector: Send {
    /// Feed one frame; return a detection if the wake word ended in it
    fn process(&mut self, samples: &[i16]) -> Option<WakeDetection>;

    /// Forget any partially matched audio
    fn reset(&mut self) {}
}

/// Voice activity capability
pub trait VoiceActivityDetector: Send {
    /// True if the frame contains speech
    fn is_speech(&mut self, samples: &[i16]) -> bool;

    /// Forget internal smoothing state
    fn reset(&mut self) {}
}

/// Shared speech backends plus their one-time initialization
///
/// Created by the host and injected into each pipeline. Replaces any
/// process-wide "initialized" flag: initialization state lives here.
pub struct Backends {
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn Synthesizer>,
    sanitizer: Arc<dyn TextSanitizer>,
    init: OnceLock<std::result::Result<(), String>>,
}

impl Backends {
    /// Bundle the backends; nothing is initialized yet
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        sanitizer: Arc<dyn TextSanitizer>,
    ) -> Self {
        Self {
            transcriber,
            synthesizer,
            sanitizer,
            init: OnceLock::new(),
        }
    }

    /// Warm up every backend the first time; later calls return the cached outcome
    ///
    /// # Errors
    ///
    /// Returns `Error::Init` if any backend failed to warm up
    pub fn ensure_initialized(&self) -> Result<()> {
        self.init
            .get_or_init(|| {
                tracing::debug!("initializing speech backends");
                self.transcriber
                    .warm_up()
                    .map_err(|e| format!("speech-to-text: {e}"))?;
                self.synthesizer
                    .warm_up()
                    .map_err(|e| format!("text-to-speech: {e}"))?;
                tracing::info!("speech backends ready");
                Ok(())
            })
            .clone()
            .map_err(Error::Init)
    }

    /// True once `ensure_initialized` has succeeded
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(self.init.get(), Some(Ok(())))
    }

    #[must_use]
    pub fn transcriber(&self) -> &Arc<dyn Transcriber> {
        &self.transcriber
    }

    #[must_use]
    pub fn synthesizer(&self) -> &Arc<dyn Synthesizer> {
        &self.synthesizer
    }

    #[must_use]
    pub fn sanitizer(&self) -> &Arc<dyn TextSanitizer> {
        &self.sanitizer
    }
}

/// Per-pipeline frame detectors (stateful, owned by one pipeline)
pub struct Detectors {
    pub wake_word: Box<dyn WakeWordDetector>,
    pub vad: Box<dyn VoiceActivityDetector>,
}

impl Detectors {
    #[must_use]
    pub fn new(wake_word: Box<dyn WakeWordDetector>, vad: Box<dyn VoiceActivityDetector>) -> Self {
        Self { wake_word, vad }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStt {
        warmups: AtomicUsize,
        fail: bool,
    }

    impl Transcriber for CountingStt {
        fn warm_up(&self) -> Result<()> {
            self.warmups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Stt("model missing".to_string()));
            }
            Ok(())
        }

        fn transcribe(&self, _: &[i16], _: u32) -> Result<String> {
            Ok(String::new())
        }
    }

    struct SilentTts;

    impl Synthesizer for SilentTts {
        fn synthesize(&self, _: &str, _: &CancellationToken) -> Result<AudioChunk> {
            Ok(AudioChunk::default())
        }
    }

    struct Identity;

    impl TextSanitizer for Identity {
        fn sanitize(&self, text: &str) -> String {
            text.to_string()
        }
    }

    fn backends(fail: bool) -> (Arc<CountingStt>, Backends) {
        let stt = Arc::new(CountingStt {
            warmups: AtomicUsize::new(0),
            fail,
        });
        let b = Backends::new(stt.clone(), Arc::new(SilentTts), Arc::new(Identity));
        (stt, b)
    }

    #[test]
    fn test_ensure_initialized_runs_once() {
        let (stt, b) = backends(false);
        assert!(!b.is_initialized());
        b.ensure_initialized().unwrap();
        b.ensure_initialized().unwrap();
        assert!(b.is_initialized());
        assert_eq!(stt.warmups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_cached() {
        let (stt, b) = backends(true);
        let err = b.ensure_initialized().unwrap_err();
        assert!(err.to_string().contains("model missing"));
        assert!(b.ensure_initialized().is_err());
        assert!(!b.is_initialized());
        assert_eq!(stt.warmups.load(Ordering::SeqCst), 1);
    }
}
