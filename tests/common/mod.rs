//! Shared test utilities

#![allow(dead_code, clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use beacon_voice::config::PipelineConfig;
use beacon_voice::voice::{
    AudioChunk, AudioSink, Backends, Detectors, EventSink, MarkdownSanitizer, Synthesizer,
    Transcriber, VoiceActivityDetector, VoicePipeline, WakeDetection, WakeWordDetector,
};
use beacon_voice::{Error, Result};

/// Samples per test frame (100ms at 16kHz)
pub const FRAME: usize = 1600;

/// First sample of a frame that the scripted wake detector fires on
pub const WAKE_MARKER: i16 = i16::MAX;

/// One sink call as seen by [`RecordingSink`]
#[derive(Debug, Clone)]
pub struct PlayCall {
    pub len: usize,
    pub sample_rate: u32,
    pub first: i16,
    pub started: Instant,
    pub cancelled: bool,
}

/// Audio sink that records calls and simulates playback time
///
/// Playback polls the cancel token every few milliseconds and returns
/// early unless `ignore_cancel` is set. Either way the call is marked
/// cancelled once the token fires.
pub struct RecordingSink {
    play_time: Duration,
    ignore_cancel: bool,
    calls: Mutex<Vec<PlayCall>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingSink {
    pub fn new(play_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            play_time,
            ignore_cancel: false,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn stubborn(play_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            play_time,
            ignore_cancel: true,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<PlayCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn total_samples(&self) -> usize {
        self.calls.lock().iter().map(|c| c.len).sum()
    }

    /// Calls currently inside `play`
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Most calls ever inside `play` at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, samples: &[i16], sample_rate: u32, cancel: &CancellationToken) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let index = {
            let mut calls = self.calls.lock();
            calls.push(PlayCall {
                len: samples.len(),
                sample_rate,
                first: samples.first().copied().unwrap_or_default(),
                started: Instant::now(),
                cancelled: false,
            });
            calls.len() - 1
        };

        let deadline = Instant::now() + self.play_time;
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                self.calls.lock()[index].cancelled = true;
                if !self.ignore_cancel {
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Synthesizer that returns `samples` samples per sentence
///
/// Every sample equals the sentence length so playback order can be traced
/// back to text. Sentences containing "fail" return an error.
pub struct FakeSynth {
    samples: usize,
    sample_rate: u32,
    delay: Duration,
    texts: Mutex<Vec<String>>,
}

impl FakeSynth {
    pub fn new(samples: usize, sample_rate: u32) -> Arc<Self> {
        Self::slow(samples, sample_rate, Duration::ZERO)
    }

    pub fn slow(samples: usize, sample_rate: u32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            samples,
            sample_rate,
            delay,
            texts: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

/// Sample value [`FakeSynth`] uses for `text`
pub fn marker_for(text: &str) -> i16 {
    i16::try_from(text.len()).unwrap_or(i16::MAX)
}

impl Synthesizer for FakeSynth {
    fn synthesize(&self, text: &str, cancel: &CancellationToken) -> Result<AudioChunk> {
        self.texts.lock().push(text.to_string());
        let deadline = Instant::now() + self.delay;
        while Instant::now() < deadline && !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(2));
        }
        if text.contains("fail") {
            return Err(Error::Tts("synthesis backend unavailable".to_string()));
        }
        Ok(AudioChunk::new(
            vec![marker_for(text); self.samples],
            self.sample_rate,
        ))
    }
}

/// Transcriber with a fixed outcome
pub struct FakeTranscriber {
    reply: std::result::Result<String, String>,
    calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn ok(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for FakeTranscriber {
    fn transcribe(&self, _samples: &[i16], _sample_rate: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map_err(Error::Stt)
    }
}

/// Wake detector that fires on frames starting with [`WAKE_MARKER`]
pub struct ScriptedWake;

impl WakeWordDetector for ScriptedWake {
    fn process(&mut self, samples: &[i16]) -> Option<WakeDetection> {
        (samples.first() == Some(&WAKE_MARKER)).then_some(WakeDetection { confidence: 0.92 })
    }
}

/// VAD that treats any sample above 1000 in magnitude as speech
pub struct LoudVad;

impl VoiceActivityDetector for LoudVad {
    fn is_speech(&mut self, samples: &[i16]) -> bool {
        samples.iter().any(|s| s.unsigned_abs() > 1000)
    }
}

/// Pipeline notification captured by [`RecordingEvents`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WakeWord(String, f32),
    VoiceActivity(bool),
    Transcription(String),
    Interrupted,
    Error(String),
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn transcriptions(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Transcription(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEvents {
    fn on_wake_word(&self, word: &str, confidence: f32) {
        self.events
            .lock()
            .push(Event::WakeWord(word.to_string(), confidence));
    }

    fn on_voice_activity(&self, active: bool) {
        self.events.lock().push(Event::VoiceActivity(active));
    }

    fn on_transcription(&self, text: &str) {
        self.events
            .lock()
            .push(Event::Transcription(text.to_string()));
    }

    fn on_speech_interrupted(&self) {
        self.events.lock().push(Event::Interrupted);
    }

    fn on_error(&self, message: &str) {
        self.events.lock().push(Event::Error(message.to_string()));
    }
}

/// Pipeline settings sized for 100ms frames
///
/// Three silent frames end an utterance and five frames are the minimum
/// worth transcribing.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        wake_word: "hey beacon".to_string(),
        wake_word_cooldown: Duration::from_millis(50),
        silence_duration: Duration::from_millis(300),
        min_speech_samples: 5 * FRAME,
        listening_timeout: Duration::from_secs(5),
        cancel_timeout: Duration::from_millis(500),
        ..PipelineConfig::default()
    }
}

/// Build, initialize and start a pipeline over fakes
pub fn start_pipeline(
    config: PipelineConfig,
    transcriber: Arc<dyn Transcriber>,
    synth: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    events: Arc<dyn EventSink>,
) -> VoicePipeline {
    let backends = Arc::new(Backends::new(
        transcriber,
        synth,
        Arc::new(MarkdownSanitizer),
    ));
    let detectors = Detectors::new(Box::new(ScriptedWake), Box::new(LoudVad));
    let pipeline = VoicePipeline::new(config, backends, detectors, sink, events);
    pipeline.initialize().expect("pipeline initializes");
    pipeline.start();
    pipeline
}

pub fn wake_frame() -> Vec<i16> {
    let mut frame = vec![0; FRAME];
    frame[0] = WAKE_MARKER;
    frame
}

/// 440Hz tone at roughly a third of full scale
pub fn loud_frame() -> Vec<i16> {
    (0..FRAME)
        .map(|i| {
            let t = i as f32 / 16_000.0;
            ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 10_000.0) as i16
        })
        .collect()
}

pub fn silent_frame() -> Vec<i16> {
    vec![0; FRAME]
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
