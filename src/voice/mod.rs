//! Voice processing module
//!
//! Turn-taking pipeline, the parallel TTS queue, and the audio and speech
//! backends they drive.

mod backend;
mod capture;
mod chime;
mod chunk;
mod pipeline;
mod playback;
mod sanitize;
mod sink;
mod stt;
mod tts;
mod tts_queue;
mod wake_word;

pub use backend::{
    Backends, Detectors, Synthesizer, TextSanitizer, Transcriber, VoiceActivityDetector,
    WakeDetection, WakeWordDetector,
};
pub use capture::{AudioCapture, SAMPLE_RATE, f32_to_i16, samples_to_wav};
pub use chime::{WaitingChime, generate_tone, load_earcon};
pub use chunk::AudioChunk;
pub use pipeline::{PipelineState, VoicePipeline};
pub use playback::AudioPlayback;
pub use sanitize::{MarkdownSanitizer, sanitize_for_tts, split_sentences};
pub use sink::{AudioSink, EventSink, LogEventSink, NoopEventSink};
pub use stt::WhisperTranscriber;
pub use tts::{OpenAiSynthesizer, PCM_SAMPLE_RATE};
pub use tts_queue::{QueueState, TtsQueue};
pub use wake_word::{
    DetectorState, ENERGY_THRESHOLD, EnergyVad, TranscriptWakeWord, calculate_energy,
};
