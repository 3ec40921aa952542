//! Beacon Voice - wake word voice client for AI assistants
//!
//! This library provides:
//! - A turn-taking voice pipeline (wake word, listening, speaking)
//! - A parallel, cancellable TTS queue with barge-in
//! - Speech backends over OpenAI-compatible endpoints
//! - A host-side assistant loop talking to a remote agent
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        Microphone (cpal)  ──►  VoicePipeline         │
//! │   wake word  │  VAD  │  STT  │  barge-in             │
//! └────────────────────┬────────────────────────────────┘
//!                      │ EventSink
//! ┌────────────────────▼────────────────────────────────┐
//! │   Assistant  ──►  remote agent  (waiting chime)      │
//! └────────────────────┬────────────────────────────────┘
//!                      │ speak_text_async
//! ┌────────────────────▼────────────────────────────────┐
//! │   synthesis thread ──► TtsQueue ──► speakers (cpal)  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod assistant;
pub mod config;
pub mod error;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
