//! Output and notification seams between the pipeline and its host

use tokio_util::sync::CancellationToken;

/// Blocking audio output device
///
/// `play` blocks until the buffer has been rendered or `cancel` fires.
/// Implementations that want mid-buffer interruption must poll
/// `cancel.is_cancelled()` while they write.
pub trait AudioSink: Send + Sync {
    /// Render `samples` at `sample_rate`
    fn play(&self, samples: &[i16], sample_rate: u32, cancel: &CancellationToken);

    /// Drop anything buffered in the device right away
    fn stop(&self) {}
}

impl<F> AudioSink for F
where
    F: Fn(&[i16], u32, &CancellationToken) + Send + Sync,
{
    fn play(&self, samples: &[i16], sample_rate: u32, cancel: &CancellationToken) {
        self(samples, sample_rate, cancel);
    }
}

/// Receives pipeline notifications
///
/// All methods default to no-ops. They are called from the audio feeder
/// thread or the synthesis thread and must not block for long.
pub trait EventSink: Send + Sync {
    /// Wake word accepted (threshold and cooldown passed)
    fn on_wake_word(&self, _word: &str, _confidence: f32) {}

    /// Speech started (`true`) or ended (`false`) while listening
    fn on_voice_activity(&self, _active: bool) {}

    /// Final transcript of a completed utterance
    fn on_transcription(&self, _text: &str) {}

    /// Active speech was cut off by a wake word
    fn on_speech_interrupted(&self) {}

    /// A turn failed; the pipeline has already recovered
    fn on_error(&self, _message: &str) {}
}

/// Silent event sink
pub struct NoopEventSink;

impl EventSink for NoopEventSink {}

/// Event sink that writes every event to `tracing`
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn on_wake_word(&self, word: &str, confidence: f32) {
        tracing::info!(wake_word = word, confidence, "wake word detected");
    }

    fn on_voice_activity(&self, active: bool) {
        tracing::debug!(active, "voice activity");
    }

    fn on_transcription(&self, text: &str) {
        tracing::info!(transcript = text, "transcription");
    }

    fn on_speech_interrupted(&self) {
        tracing::info!("speech interrupted");
    }

    fn on_error(&self, message: &str) {
        tracing::error!(error = message, "voice pipeline error");
    }
}
