//! Looping "waiting" earcon played while a reply is pending

use std::f32::consts::PI;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{AudioChunk, AudioSink};
use crate::config::ChimeConfig;
use crate::{Error, Result};

/// Granularity of the silent gap between repeats
const GAP_POLL: Duration = Duration::from_millis(10);

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Repeating earcon on its own `waiting-chime` thread
///
/// `start` and `stop` are idempotent. After `stop` returns nothing more is
/// handed to the sink.
pub struct WaitingChime {
    config: ChimeConfig,
    sink: Arc<dyn AudioSink>,
    earcon: Arc<AudioChunk>,
    running: Mutex<Option<Running>>,
}

impl WaitingChime {
    /// Chime with a synthesized tone
    #[must_use]
    pub fn new(config: ChimeConfig, sink: Arc<dyn AudioSink>) -> Self {
        let earcon = generate_tone(&config);
        Self::with_earcon(config, sink, earcon)
    }

    /// Chime with a prerecorded earcon
    #[must_use]
    pub fn with_earcon(config: ChimeConfig, sink: Arc<dyn AudioSink>, earcon: AudioChunk) -> Self {
        tracing::debug!(
            samples = earcon.len(),
            sample_rate = earcon.sample_rate,
            "waiting chime ready"
        );
        Self {
            config,
            sink,
            earcon: Arc::new(earcon),
            running: Mutex::new(None),
        }
    }

    /// Begin looping; no-op if already playing
    ///
    /// # Errors
    ///
    /// Returns error if the loop thread cannot be spawned
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Ok(());
        }
        if let Some(stale) = running.take() {
            let _ = stale.handle.join();
        }

        let cancel = CancellationToken::new();
        let job = ChimeLoop {
            earcon: Arc::clone(&self.earcon),
            sink: Arc::clone(&self.sink),
            chunk_samples: self.config.playback_chunk_samples.max(1),
            gap: self.config.silence_duration,
            cancel: cancel.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("waiting-chime".to_string())
            .spawn(move || job.run())?;

        tracing::debug!("waiting chime started");
        *running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Stop looping and wait for the loop thread; no-op if stopped
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        if running.handle.join().is_err() {
            tracing::warn!("waiting chime thread panicked");
        }
        tracing::debug!("waiting chime stopped");
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    #[must_use]
    pub fn earcon(&self) -> &AudioChunk {
        &self.earcon
    }
}

impl Drop for WaitingChime {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ChimeLoop {
    earcon: Arc<AudioChunk>,
    sink: Arc<dyn AudioSink>,
    chunk_samples: usize,
    gap: Duration,
    cancel: CancellationToken,
}

impl ChimeLoop {
    fn run(self) {
        while !self.cancel.is_cancelled() {
            for piece in self.earcon.samples.chunks(self.chunk_samples) {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.sink.play(piece, self.earcon.sample_rate, &self.cancel);
            }

            let gap_end = Instant::now() + self.gap;
            while Instant::now() < gap_end {
                if self.cancel.is_cancelled() {
                    return;
                }
                std::thread::sleep(GAP_POLL.min(gap_end.saturating_duration_since(Instant::now())));
            }
        }
    }
}

/// Additive tone: fundamental plus 2nd and 3rd harmonics with cosine fades
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn generate_tone(config: &ChimeConfig) -> AudioChunk {
    let rate = config.sample_rate as f32;
    let total = (config.tone_duration.as_secs_f32() * rate) as usize;
    let fade_in = ((config.fade_in.as_secs_f32() * rate) as usize).min(total);
    let fade_out = ((config.fade_out.as_secs_f32() * rate) as usize).min(total);
    let norm = 1.0 + config.harmonic_2nd.abs() + config.harmonic_3rd.abs();

    let samples = (0..total)
        .map(|i| {
            let t = i as f32 / rate;
            let phase = 2.0 * PI * config.frequency_hz * t;
            let wave = phase.sin()
                + config.harmonic_2nd * (2.0 * phase).sin()
                + config.harmonic_3rd * (3.0 * phase).sin();

            let mut envelope = 1.0;
            if i < fade_in {
                envelope *= 0.5 * (1.0 - (PI * i as f32 / fade_in as f32).cos());
            }
            let from_end = total - i;
            if from_end <= fade_out {
                envelope *= 0.5 * (1.0 - (PI * from_end as f32 / fade_out as f32).cos());
            }

            let value = wave / norm * envelope * config.volume;
            (value * 32767.0).clamp(-32768.0, 32767.0) as i16
        })
        .collect();

    AudioChunk::new(samples, config.sample_rate)
}

/// Load a 16-bit WAV earcon, downmixing stereo to mono
///
/// # Errors
///
/// Returns error if the file cannot be read or is not 16-bit PCM
pub fn load_earcon(path: &Path) -> Result<AudioChunk> {
    let reader = hound::WavReader::open(path).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(Error::Audio(format!(
            "unsupported earcon format: {} bits",
            spec.bits_per_sample
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Audio(e.to_string()))?;

    let mono = match spec.channels {
        1 => samples,
        2 => samples
            .chunks_exact(2)
            .map(|lr| i16::try_from((i32::from(lr[0]) + i32::from(lr[1])) / 2).unwrap_or_default())
            .collect(),
        n => return Err(Error::Audio(format!("unsupported earcon channels: {n}"))),
    };

    Ok(AudioChunk::new(mono, spec.sample_rate))
}
