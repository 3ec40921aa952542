//! Energy-based voice activity and transcript-verified wake word detection
//!
//! The wake word detector is a hybrid: a local energy gate segments a
//! candidate utterance, which is then transcribed and checked for the
//! wake phrase.

use std::sync::Arc;

use super::{Transcriber, VoiceActivityDetector, WakeDetection, WakeWordDetector};

/// Minimum duration of a wake candidate (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence that ends a wake candidate (in samples at 16kHz)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Longest candidate worth transcribing (in samples at 16kHz)
const MAX_CANDIDATE_SAMPLES: usize = 48_000; // 3 seconds

/// Default RMS threshold for normalized samples
pub const ENERGY_THRESHOLD: f32 = 0.03;

/// RMS energy voice activity detector
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(ENERGY_THRESHOLD)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn is_speech(&mut self, samples: &[i16]) -> bool {
        calculate_energy(samples) > self.threshold
    }
}

/// Where the transcript detector is in a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Accumulating a candidate utterance
    Collecting,
}

/// Wake word detector that transcribes short utterances and looks for the phrase
pub struct TranscriptWakeWord {
    wake_words: Vec<String>,
    transcriber: Arc<dyn Transcriber>,
    sample_rate: u32,
    vad: EnergyVad,
    state: DetectorState,
    buffer: Vec<i16>,
    silence_counter: usize,
}

impl TranscriptWakeWord {
    /// Create a detector for the given phrases (matched case-insensitively)
    #[must_use]
    pub fn new(
        wake_words: Vec<String>,
        transcriber: Arc<dyn Transcriber>,
        sample_rate: u32,
        energy_threshold: f32,
    ) -> Self {
        let wake_words: Vec<String> = wake_words
            .into_iter()
            .map(|w| normalize(&w))
            .filter(|w| !w.is_empty())
            .collect();

        tracing::debug!(wake_words = ?wake_words, "wake word detector initialized");

        Self {
            wake_words,
            transcriber,
            sample_rate,
            vad: EnergyVad::new(energy_threshold),
            state: DetectorState::Idle,
            buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Check a transcript for any configured wake word
    #[must_use]
    pub fn matches(&self, transcript: &str) -> bool {
        let transcript = normalize(transcript);
        self.wake_words.iter().any(|w| transcript.contains(w.as_str()))
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }

    fn verify(&mut self) -> Option<WakeDetection> {
        let voiced = self.buffer.len().saturating_sub(self.silence_counter);
        let candidate = std::mem::take(&mut self.buffer);
        self.reset();

        if voiced <= MIN_SPEECH_SAMPLES {
            return None;
        }

        tracing::debug!(samples = candidate.len(), "verifying wake candidate");
        match self.transcriber.transcribe(&candidate, self.sample_rate) {
            Ok(transcript) if self.matches(&transcript) => {
                tracing::debug!(transcript, "wake phrase confirmed");
                Some(WakeDetection { confidence: 1.0 })
            }
            Ok(transcript) => {
                tracing::trace!(transcript, "no wake phrase");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "wake word verification failed");
                None
            }
        }
    }
}

impl WakeWordDetector for TranscriptWakeWord {
    fn process(&mut self, samples: &[i16]) -> Option<WakeDetection> {
        let is_speech = self.vad.is_speech(samples);

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Collecting;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                }
                None
            }
            DetectorState::Collecting => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > SILENCE_SAMPLES || self.buffer.len() > MAX_CANDIDATE_SAMPLES
                {
                    return self.verify();
                }
                None
            }
        }
    }

    fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.buffer.clear();
        self.silence_counter = 0;
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// RMS energy of 16-bit samples normalized to [-1, 1]
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let s = f32::from(s) / 32768.0;
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedStt {
        text: &'static str,
        calls: AtomicUsize,
    }

    impl Transcriber for FixedStt {
        fn transcribe(&self, _: &[i16], _: u32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
    }

    fn detector(text: &'static str) -> (Arc<FixedStt>, TranscriptWakeWord) {
        let stt = Arc::new(FixedStt {
            text,
            calls: AtomicUsize::new(0),
        });
        let d = TranscriptWakeWord::new(
            vec!["Hey Jarvis".to_string()],
            stt.clone(),
            16_000,
            ENERGY_THRESHOLD,
        );
        (stt, d)
    }

    fn feed(d: &mut TranscriptWakeWord, loud_frames: usize, quiet_frames: usize) -> Option<WakeDetection> {
        let mut hit = None;
        for _ in 0..loud_frames {
            hit = hit.or(d.process(&[8000; 1600]));
        }
        for _ in 0..quiet_frames {
            hit = hit.or(d.process(&[0; 1600]));
        }
        hit
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&[0; 100]) < 0.001);
        assert!(calculate_energy(&[16_384; 100]) > 0.4);
        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_energy_vad() {
        let mut vad = EnergyVad::default();
        assert!(!vad.is_speech(&[10; 160]));
        assert!(vad.is_speech(&[8000; 160]));
    }

    #[test]
    fn test_wake_phrase_matching() {
        let (_, d) = detector("");
        assert!(d.matches("hey, Jarvis! what's up"));
        assert!(!d.matches("hello world"));
    }

    #[test]
    fn test_detects_after_trailing_silence() {
        let (stt, mut d) = detector("Hey Jarvis.");
        let hit = feed(&mut d, 5, 6);
        assert_eq!(hit, Some(WakeDetection { confidence: 1.0 }));
        assert_eq!(stt.calls.load(Ordering::SeqCst), 1);
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn test_short_blip_not_transcribed() {
        let (stt, mut d) = detector("Hey Jarvis");
        assert!(feed(&mut d, 1, 6).is_none());
        assert_eq!(stt.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_other_speech_ignored() {
        let (_, mut d) = detector("what time is it");
        assert!(feed(&mut d, 5, 6).is_none());
    }
}
