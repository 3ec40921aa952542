//! Turn-taking state machine
//!
//! ```text
//!                 wake word                  end of utterance / timeout
//! WaitingForWakeWord ------> Listening ------------------------------> WaitingForWakeWord
//!        ^                      ^
//!        | drained / cancel     | wake word (barge-in)
//!        +----------------- Speaking <---- speak_text_async (from any state)
//! ```
//!
//! Frames enter through [`VoicePipeline::process_audio`] from one feeder
//! thread. Replies are spoken from any thread with
//! [`VoicePipeline::speak_text_async`]; synthesis runs on a `tts-synth`
//! thread feeding a [`TtsQueue`], which plays on its own `tts-playback` thread.
//!
//! Lock order is `speech` before `turn`. Event sinks are never called with
//! `turn` held.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    AudioSink, Backends, Detectors, EventSink, Synthesizer, TtsQueue, calculate_energy,
    split_sentences,
};
use crate::config::PipelineConfig;
use crate::{Error, Result};

/// Where the pipeline is in a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Running frames through the wake word detector
    WaitingForWakeWord,
    /// Collecting an utterance for transcription
    Listening,
    /// Playing a reply
    Speaking,
}

impl PipelineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WaitingForWakeWord => "WAITING_FOR_WAKE_WORD",
            Self::Listening => "LISTENING",
            Self::Speaking => "SPEAKING",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable turn state, guarded by `Shared::turn`
struct Turn {
    state: PipelineState,
    /// Last accepted wake word, for the re-trigger cooldown
    last_trigger: Option<Instant>,
    /// Wall-clock end of the listening window (wake word mode only)
    listen_deadline: Option<Instant>,
    speech_active: bool,
    buffer: Vec<i16>,
    silence_samples: usize,
    activity_reported: bool,
    /// Bumped whenever the current speech is replaced or cancelled
    generation: u64,
    /// Detectors should drop partial matches before the next frame
    reset_detectors: bool,
    frames: u64,
    /// Samples seen since the last input level log
    level_samples: usize,
}

impl Turn {
    fn new(state: PipelineState) -> Self {
        Self {
            state,
            last_trigger: None,
            listen_deadline: None,
            speech_active: false,
            buffer: Vec::new(),
            silence_samples: 0,
            activity_reported: false,
            generation: 0,
            reset_detectors: false,
            frames: 0,
            level_samples: 0,
        }
    }

    fn clear_utterance(&mut self) {
        self.speech_active = false;
        self.buffer.clear();
        self.silence_samples = 0;
        self.activity_reported = false;
    }
}

/// State shared with synthesis threads
struct Shared {
    config: PipelineConfig,
    turn: Mutex<Turn>,
}

impl Shared {
    /// Resting state for this mode
    fn idle_state(&self) -> PipelineState {
        if self.config.wake_word_enabled {
            PipelineState::WaitingForWakeWord
        } else {
            PipelineState::Listening
        }
    }

    fn rest(&self, turn: &mut Turn) {
        turn.state = self.idle_state();
        turn.listen_deadline = None;
        turn.clear_utterance();
    }

    fn listen(&self, turn: &mut Turn, now: Instant) {
        turn.state = PipelineState::Listening;
        turn.listen_deadline = self
            .config
            .wake_word_enabled
            .then(|| now + self.config.listening_timeout);
        turn.clear_utterance();
    }

    /// Apply the wall-clock listening timeout
    fn expire(&self, turn: &mut Turn, now: Instant) {
        let expired = turn.state == PipelineState::Listening
            && !turn.speech_active
            && turn.listen_deadline.is_some_and(|deadline| now >= deadline);
        if expired {
            tracing::debug!("listening timed out, waiting for wake word");
            self.rest(turn);
            turn.reset_detectors = true;
        }
    }
}

/// One reply being spoken
struct SpeechTask {
    generation: u64,
    queue: Arc<TtsQueue>,
    producer: Option<JoinHandle<Result<()>>>,
}

/// Voice assistant turn-taking pipeline
pub struct VoicePipeline {
    shared: Arc<Shared>,
    backends: Arc<Backends>,
    sink: Arc<dyn AudioSink>,
    events: Arc<dyn EventSink>,
    detectors: Mutex<Detectors>,
    speech: Mutex<Option<SpeechTask>>,
    /// Cancelled producers still blocked in synthesis
    retired: Mutex<Vec<JoinHandle<Result<()>>>>,
    ready: AtomicBool,
    running: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl VoicePipeline {
    /// Create a pipeline; call [`initialize`](Self::initialize) and
    /// [`start`](Self::start) before feeding audio
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        backends: Arc<Backends>,
        detectors: Detectors,
        sink: Arc<dyn AudioSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let shared = Shared {
            turn: Mutex::new(Turn::new(PipelineState::WaitingForWakeWord)),
            config,
        };
        shared.rest(&mut shared.turn.lock());

        Self {
            shared: Arc::new(shared),
            backends,
            sink,
            events,
            detectors: Mutex::new(detectors),
            speech: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
            ready: AtomicBool::new(false),
            running: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Initialize the speech backends; idempotent
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is unusable or a backend fails to
    /// warm up. The message is also kept in [`last_error`](Self::last_error).
    pub fn initialize(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let outcome = if self.shared.config.wake_word_enabled
            && self.shared.config.wake_word.trim().is_empty()
        {
            Err(Error::Config("wake word enabled but empty".to_string()))
        } else {
            self.backends.ensure_initialized()
        };

        match outcome {
            Ok(()) => {
                self.ready.store(true, Ordering::SeqCst);
                tracing::info!(
                    wake_word = %self.shared.config.wake_word,
                    wake_word_enabled = self.shared.config.wake_word_enabled,
                    "voice pipeline initialized"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "voice pipeline initialization failed");
                *self.last_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Begin accepting audio frames
    pub fn start(&self) {
        if !self.is_ready() {
            tracing::warn!("pipeline started before initialization; frames will be ignored");
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut turn = self.shared.turn.lock();
        self.shared.rest(&mut turn);
        tracing::info!(state = %turn.state, "voice pipeline started");
    }

    /// Stop accepting frames and cancel any speech
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel_speech();
        self.shared.rest(&mut self.shared.turn.lock());
        tracing::info!("voice pipeline stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Message of the last initialization failure
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Current state, after applying the listening timeout
    #[must_use]
    pub fn state(&self) -> PipelineState {
        let mut turn = self.shared.turn.lock();
        self.shared.expire(&mut turn, Instant::now());
        turn.state
    }

    #[must_use]
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state() == PipelineState::Speaking
    }

    /// Feed one frame of 16-bit mono PCM at the configured sample rate
    ///
    /// Must be called from a single thread. Failures are reported through
    /// the event sink.
    pub fn process_audio(&self, frame: &[i16]) {
        if frame.is_empty() || !self.is_ready() || !self.is_running() {
            return;
        }

        let mut detectors = self.detectors.lock();
        let now = Instant::now();

        let (state, reset, level_due) = {
            let mut turn = self.shared.turn.lock();
            self.shared.expire(&mut turn, now);
            turn.frames += 1;
            turn.level_samples += frame.len();
            let per_second = usize::try_from(self.shared.config.sample_rate).unwrap_or(usize::MAX);
            let level_due = self.shared.config.debug.audio && turn.level_samples >= per_second;
            if level_due {
                turn.level_samples = 0;
            }
            (turn.state, std::mem::take(&mut turn.reset_detectors), level_due)
        };
        if level_due {
            let peak = frame.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
            tracing::debug!(rms = calculate_energy(frame), peak, state = %state, "input level");
        }
        if reset {
            detectors.wake_word.reset();
            detectors.vad.reset();
        }

        match state {
            PipelineState::WaitingForWakeWord | PipelineState::Speaking => {
                if self.shared.config.wake_word_enabled {
                    self.detect_wake_word(&mut detectors, frame, now);
                }
            }
            PipelineState::Listening => self.collect_speech(&mut detectors, frame, now),
        }
    }

    fn detect_wake_word(&self, detectors: &mut Detectors, frame: &[i16], now: Instant) {
        let config = &self.shared.config;
        let Some(hit) = detectors.wake_word.process(frame) else {
            return;
        };
        if config.debug.wakeword {
            tracing::debug!(confidence = hit.confidence, "wake word candidate");
        }
        if hit.confidence < config.wake_word_threshold {
            return;
        }

        let mut slot = self.speech.lock();
        let interrupted = {
            let mut turn = self.shared.turn.lock();
            if turn.state == PipelineState::Listening {
                return;
            }
            if turn
                .last_trigger
                .is_some_and(|at| now.duration_since(at) < config.wake_word_cooldown)
            {
                tracing::debug!("wake word ignored during cooldown");
                return;
            }
            turn.last_trigger = Some(now);
            let interrupted = turn.state == PipelineState::Speaking;
            turn.generation += 1;
            self.shared.listen(&mut turn, now);
            interrupted
        };

        // Taken with the state change so a reply starting concurrently
        // either lands before this (and is cancelled) or sees the new generation
        let task = slot.take();
        if let Some(task) = task {
            if interrupted {
                tracing::info!(generation = task.generation, "barge-in, interrupting speech");
            }
            self.retire(task);
        }
        drop(slot);

        if interrupted {
            self.events.on_speech_interrupted();
        }
        detectors.vad.reset();

        tracing::info!(
            wake_word = %config.wake_word,
            confidence = hit.confidence,
            "wake word detected"
        );
        self.events.on_wake_word(&config.wake_word, hit.confidence);
    }

    fn collect_speech(&self, detectors: &mut Detectors, frame: &[i16], now: Instant) {
        let config = &self.shared.config;
        let is_speech = detectors.vad.is_speech(frame);
        let silence_limit = samples_for(config.silence_duration, config.sample_rate);
        let max_samples = samples_for(config.max_speech_duration, config.sample_rate);

        let mut report_start = false;
        let mut utterance = None;
        {
            let mut turn = self.shared.turn.lock();
            if turn.state != PipelineState::Listening {
                return;
            }

            if config.debug.vad && turn.frames % 50 == 0 {
                tracing::debug!(is_speech, buffered = turn.buffer.len(), "vad");
            }

            if is_speech {
                if config.wake_word_enabled {
                    turn.listen_deadline = Some(now + config.listening_timeout);
                }
                if !turn.speech_active {
                    turn.clear_utterance();
                    turn.speech_active = true;
                }
                turn.silence_samples = 0;
            }

            if !turn.speech_active {
                return;
            }

            turn.buffer.extend_from_slice(frame);
            if !is_speech {
                turn.silence_samples += frame.len();
            }

            if is_speech && !turn.activity_reported && turn.buffer.len() >= config.min_speech_samples / 2 {
                turn.activity_reported = true;
                report_start = true;
            }

            let silent = turn.silence_samples >= silence_limit;
            let too_long = max_samples > 0 && turn.buffer.len() >= max_samples;
            if silent || too_long {
                if too_long {
                    tracing::debug!(samples = turn.buffer.len(), "utterance hit max duration");
                }
                let samples = std::mem::take(&mut turn.buffer);
                self.shared.rest(&mut turn);
                utterance = Some(samples);
            }
        }

        if report_start {
            self.events.on_voice_activity(true);
        }

        if let Some(samples) = utterance {
            self.events.on_voice_activity(false);
            if config.wake_word_enabled {
                detectors.wake_word.reset();
            }
            detectors.vad.reset();
            self.transcribe_utterance(&samples);
        }
    }

    fn transcribe_utterance(&self, samples: &[i16]) {
        let config = &self.shared.config;
        if samples.len() < config.min_speech_samples {
            if config.debug.stt {
                tracing::debug!(
                    samples = samples.len(),
                    min = config.min_speech_samples,
                    "utterance too short, skipping transcription"
                );
            }
            return;
        }

        if config.debug.stt {
            #[allow(clippy::cast_precision_loss)]
            let seconds = samples.len() as f32 / config.sample_rate as f32;
            tracing::debug!(
                samples = samples.len(),
                seconds,
                "transcribing utterance"
            );
        }

        match self.backends.transcriber().transcribe(samples, config.sample_rate) {
            Ok(text) if !text.trim().is_empty() => {
                let text = text.trim();
                tracing::info!(transcript = text, "transcription");
                self.events.on_transcription(text);
            }
            Ok(_) => {
                tracing::warn!("empty transcription");
                self.events.on_error("STT transcription failed: empty transcript");
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                self.events.on_error(&format!("STT transcription failed: {e}"));
            }
        }
    }

    /// Speak `text` without waiting for synthesis or playback
    ///
    /// Replaces any speech in progress. Text that sanitizes to nothing is
    /// ignored and leaves current speech alone.
    pub fn speak_text_async(&self, text: &str) {
        if let Err(e) = self.begin_speech(text) {
            tracing::warn!(error = %e, "failed to start speech");
            self.events.on_error(&format!("TTS failed: {e}"));
        }
    }

    /// Speak `text` and block until it has played or been cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline is not initialized or synthesis fails
    pub fn speak_text(&self, text: &str) -> Result<()> {
        let Some(generation) = self.begin_speech(text)? else {
            return Ok(());
        };

        let producer = self
            .speech
            .lock()
            .as_mut()
            .filter(|task| task.generation == generation)
            .and_then(|task| task.producer.take());

        let Some(handle) = producer else {
            return Ok(());
        };
        handle.join().unwrap_or_else(|_| {
            tracing::error!(generation, "tts synthesis thread panicked");
            let mut turn = self.shared.turn.lock();
            if turn.generation == generation && turn.state == PipelineState::Speaking {
                self.shared.rest(&mut turn);
            }
            Err(Error::Tts("synthesis thread panicked".to_string()))
        })
    }

    /// Cancel speech in progress; audio output has stopped when this returns
    pub fn cancel_speech(&self) {
        let mut slot = self.speech.lock();
        let task = slot.take();
        {
            let mut turn = self.shared.turn.lock();
            turn.generation += 1;
            if turn.state == PipelineState::Speaking {
                self.shared.rest(&mut turn);
                turn.reset_detectors = true;
            }
        }
        if let Some(task) = task {
            tracing::info!(generation = task.generation, "speech cancelled");
            self.retire(task);
        }
    }

    /// Start synthesis for `text`; returns the new speech generation
    fn begin_speech(&self, text: &str) -> Result<Option<u64>> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }

        let requested_at = self.shared.turn.lock().generation;
        let sentences = split_sentences(&self.backends.sanitizer().sanitize(text));
        if sentences.is_empty() {
            tracing::debug!("nothing speakable after sanitizing");
            return Ok(None);
        }

        let mut slot = self.speech.lock();
        // A barge-in or cancel since the request makes this reply stale
        let current = self.shared.turn.lock().generation;
        if current != requested_at {
            tracing::debug!(requested_at, current, "dropping speech superseded while queued");
            return Ok(None);
        }
        if let Some(previous) = slot.take() {
            tracing::debug!(generation = previous.generation, "replacing speech");
            self.retire(previous);
        }

        let generation = {
            let mut turn = self.shared.turn.lock();
            turn.generation += 1;
            turn.state = PipelineState::Speaking;
            turn.listen_deadline = None;
            turn.clear_utterance();
            turn.generation
        };

        let queue = Arc::new(TtsQueue::with_cancel_timeout(
            self.sink.clone(),
            self.shared.config.cancel_timeout,
        ));
        let job = SynthesisJob {
            generation,
            sentences,
            queue: queue.clone(),
            synthesizer: self.backends.synthesizer().clone(),
            events: self.events.clone(),
            shared: self.shared.clone(),
        };

        tracing::debug!(generation, sentences = job.sentences.len(), "speech started");
        let producer = std::thread::Builder::new()
            .name("tts-synth".to_string())
            .spawn(move || job.run());

        match producer {
            Ok(handle) => {
                *slot = Some(SpeechTask {
                    generation,
                    queue,
                    producer: Some(handle),
                });
                Ok(Some(generation))
            }
            Err(e) => {
                let mut turn = self.shared.turn.lock();
                if turn.generation == generation {
                    self.shared.rest(&mut turn);
                }
                Err(e.into())
            }
        }
    }

    /// Cancel a task's playback and join its producer if it has already returned
    fn retire(&self, task: SpeechTask) {
        task.queue.cancel();
        let Some(producer) = task.producer else {
            return;
        };
        let mut retired = self.retired.lock();
        retired.retain(|handle| !handle.is_finished());
        if producer.is_finished() {
            join_producer(producer);
        } else {
            retired.push(producer);
        }
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut task) = self.speech.get_mut().take() {
            task.queue.cancel();
            if let Some(producer) = task.producer.take() {
                join_producer(producer);
            }
        }
        for producer in self.retired.get_mut().drain(..) {
            join_producer(producer);
        }
    }
}

fn join_producer(producer: JoinHandle<Result<()>>) {
    if producer.join().is_err() {
        tracing::error!("tts synthesis thread panicked");
    }
}

/// Synthesizes sentences into a queue on the `tts-synth` thread
struct SynthesisJob {
    generation: u64,
    sentences: Vec<String>,
    queue: Arc<TtsQueue>,
    synthesizer: Arc<dyn Synthesizer>,
    events: Arc<dyn EventSink>,
    shared: Arc<Shared>,
}

impl SynthesisJob {
    fn run(self) -> Result<()> {
        let cancel = self.queue.cancel_token();
        let mut failure = None;

        for sentence in &self.sentences {
            if cancel.is_cancelled() {
                break;
            }
            match self.synthesizer.synthesize(sentence, &cancel) {
                Ok(chunk) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracing::trace!(samples = chunk.len(), "sentence synthesized");
                    self.queue.push(chunk);
                }
                Err(e) => {
                    if !cancel.is_cancelled() {
                        failure = Some(e);
                    }
                    break;
                }
            }
        }

        self.queue.finish();
        self.queue.wait_idle(None);

        {
            let mut turn = self.shared.turn.lock();
            if turn.generation == self.generation && turn.state == PipelineState::Speaking {
                self.shared.rest(&mut turn);
                tracing::debug!(generation = self.generation, "speech finished");
            }
        }

        match failure {
            Some(e) => {
                tracing::warn!(error = %e, "synthesis failed");
                self.events.on_error(&format!("TTS synthesis failed: {e}"));
                Err(e)
            }
            None => Ok(()),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{
        AudioChunk, TextSanitizer, Transcriber, VoiceActivityDetector, WakeDetection,
        WakeWordDetector,
    };
    use std::sync::atomic::AtomicUsize;
    use tokio_util::sync::CancellationToken;

    struct Stt;
    impl Transcriber for Stt {
        fn transcribe(&self, _: &[i16], _: u32) -> Result<String> {
            Ok("hello".to_string())
        }
    }

    struct Tts;
    impl Synthesizer for Tts {
        fn synthesize(&self, _: &str, _: &CancellationToken) -> Result<AudioChunk> {
            Ok(AudioChunk::new(vec![1; 160], 16_000))
        }
    }

    struct Plain;
    impl TextSanitizer for Plain {
        fn sanitize(&self, text: &str) -> String {
            text.to_string()
        }
    }

    /// Fires on any frame whose first sample is `i16::MAX`
    struct MarkerWake;
    impl WakeWordDetector for MarkerWake {
        fn process(&mut self, samples: &[i16]) -> Option<WakeDetection> {
            (samples.first() == Some(&i16::MAX)).then_some(WakeDetection { confidence: 0.9 })
        }
    }

    struct LoudVad;
    impl VoiceActivityDetector for LoudVad {
        fn is_speech(&mut self, samples: &[i16]) -> bool {
            samples.iter().any(|s| s.unsigned_abs() > 1000)
        }
    }

    #[derive(Default)]
    struct Counts {
        wake: AtomicUsize,
    }
    impl EventSink for Counts {
        fn on_wake_word(&self, _: &str, _: f32) {
            self.wake.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pipeline(config: PipelineConfig, events: Arc<dyn EventSink>) -> VoicePipeline {
        let backends = Arc::new(Backends::new(Arc::new(Stt), Arc::new(Tts), Arc::new(Plain)));
        let detectors = Detectors::new(Box::new(MarkerWake), Box::new(LoudVad));
        let sink: Arc<dyn AudioSink> = Arc::new(|_: &[i16], _: u32, _: &CancellationToken| {});
        let p = VoicePipeline::new(config, backends, detectors, sink, events);
        p.initialize().unwrap();
        p.start();
        p
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PipelineState::WaitingForWakeWord.as_str(), "WAITING_FOR_WAKE_WORD");
        assert_eq!(PipelineState::Listening.to_string(), "LISTENING");
        assert_eq!(PipelineState::Speaking.as_str(), "SPEAKING");
    }

    #[test]
    fn test_starts_waiting_for_wake_word() {
        let p = pipeline(PipelineConfig::default(), Arc::new(Counts::default()));
        assert_eq!(p.state(), PipelineState::WaitingForWakeWord);
        assert_eq!(p.state_name(), "WAITING_FOR_WAKE_WORD");
        assert!(!p.is_speaking());
    }

    #[test]
    fn test_wake_word_disabled_starts_listening() {
        let config = PipelineConfig {
            wake_word_enabled: false,
            ..PipelineConfig::default()
        };
        let p = pipeline(config, Arc::new(Counts::default()));
        assert_eq!(p.state(), PipelineState::Listening);
    }

    #[test]
    fn test_frames_ignored_until_started() {
        let counts = Arc::new(Counts::default());
        let backends = Arc::new(Backends::new(Arc::new(Stt), Arc::new(Tts), Arc::new(Plain)));
        let detectors = Detectors::new(Box::new(MarkerWake), Box::new(LoudVad));
        let sink: Arc<dyn AudioSink> = Arc::new(|_: &[i16], _: u32, _: &CancellationToken| {});
        let p = VoicePipeline::new(PipelineConfig::default(), backends, detectors, sink, counts.clone());
        p.process_audio(&[i16::MAX; 160]);
        assert_eq!(counts.wake.load(Ordering::SeqCst), 0);
        assert!(!p.is_ready());
    }

    #[test]
    fn test_cooldown_suppresses_retrigger() {
        let counts = Arc::new(Counts::default());
        let config = PipelineConfig {
            listening_timeout: Duration::from_millis(100),
            ..PipelineConfig::default()
        };
        let p = pipeline(config, counts.clone());

        p.process_audio(&[i16::MAX; 160]);
        assert_eq!(p.state(), PipelineState::Listening);
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(p.state(), PipelineState::WaitingForWakeWord);

        // Residual wake audio inside the cooldown window
        p.process_audio(&[i16::MAX; 160]);
        assert_eq!(counts.wake.load(Ordering::SeqCst), 1);
        assert_eq!(p.state(), PipelineState::WaitingForWakeWord);
    }

    #[test]
    fn test_speak_requires_initialize() {
        let backends = Arc::new(Backends::new(Arc::new(Stt), Arc::new(Tts), Arc::new(Plain)));
        let detectors = Detectors::new(Box::new(MarkerWake), Box::new(LoudVad));
        let sink: Arc<dyn AudioSink> = Arc::new(|_: &[i16], _: u32, _: &CancellationToken| {});
        let p = VoicePipeline::new(
            PipelineConfig::default(),
            backends,
            detectors,
            sink,
            Arc::new(Counts::default()),
        );
        assert!(matches!(p.speak_text("hi"), Err(Error::NotReady)));
    }

    #[test]
    fn test_speak_text_returns_to_rest() {
        let p = pipeline(PipelineConfig::default(), Arc::new(Counts::default()));
        p.speak_text("One. Two.").unwrap();
        // The producer resets state before returning
        assert_eq!(p.state(), PipelineState::WaitingForWakeWord);
    }

    #[test]
    fn test_empty_wake_word_fails_initialize() {
        let backends = Arc::new(Backends::new(Arc::new(Stt), Arc::new(Tts), Arc::new(Plain)));
        let detectors = Detectors::new(Box::new(MarkerWake), Box::new(LoudVad));
        let sink: Arc<dyn AudioSink> = Arc::new(|_: &[i16], _: u32, _: &CancellationToken| {});
        let config = PipelineConfig {
            wake_word: "  ".to_string(),
            ..PipelineConfig::default()
        };
        let p = VoicePipeline::new(config, backends, detectors, sink, Arc::new(Counts::default()));
        assert!(p.initialize().is_err());
        assert!(p.last_error().is_some_and(|e| e.contains("wake word")));
        assert!(!p.is_ready());
    }
}
