//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use super::{AudioChunk, AudioSink};
use crate::{Error, Result};

/// How often a blocking `play` checks for completion or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Plays 16-bit mono audio on the default output device
///
/// Each call opens a stream at the buffer's own sample rate, so chunks from
/// different sources (TTS, chime) can share one sink.
pub struct AudioPlayback {
    device_name: String,
}

impl AudioPlayback {
    /// Check that an output device is available
    ///
    /// # Errors
    ///
    /// Returns error if no output device exists
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
        let device_name = device.name().unwrap_or_default();

        tracing::debug!(device = %device_name, "audio playback initialized");

        Ok(Self { device_name })
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Play a chunk to completion
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the stream
    pub fn play_chunk(&self, chunk: &AudioChunk) -> Result<()> {
        self.play_blocking(&chunk.samples, chunk.sample_rate, &CancellationToken::new())
    }

    /// Play samples until done or until `cancel` fires
    fn play_blocking(&self, samples: &[i16], sample_rate: u32, cancel: &CancellationToken) -> Result<()> {
        if samples.is_empty() || cancel.is_cancelled() {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;
        let config = output_config(&device, sample_rate)?;
        let channels = usize::from(config.channels);

        let samples: Arc<Vec<i16>> = Arc::new(samples.to_vec());
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            let cancel = cancel.clone();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let stopped = cancel.is_cancelled();
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = match samples.get(pos) {
                                Some(&s) if !stopped => {
                                    pos += 1;
                                    f32::from(s) / 32768.0
                                }
                                _ => {
                                    finished.store(true, Ordering::Release);
                                    0.0
                                }
                            };
                            frame.fill(sample);
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        #[allow(clippy::cast_precision_loss)]
        let expected = Duration::from_secs_f64(samples.len() as f64 / f64::from(sample_rate.max(1)));
        let deadline = Instant::now() + expected + Duration::from_millis(500);

        while !finished.load(Ordering::Acquire) && !cancel.is_cancelled() {
            if Instant::now() > deadline {
                tracing::warn!("playback did not finish in time");
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        drop(stream);
        tracing::debug!(
            samples = samples.len(),
            played = position.load(Ordering::Relaxed),
            cancelled = cancel.is_cancelled(),
            "playback complete"
        );

        Ok(())
    }
}

impl AudioSink for AudioPlayback {
    fn play(&self, samples: &[i16], sample_rate: u32, cancel: &CancellationToken) {
        if let Err(e) = self.play_blocking(samples, sample_rate, cancel) {
            tracing::error!(error = %e, "playback failed");
        }
    }
}

/// Pick a mono (or stereo) output config at `sample_rate`
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    let mono = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| supports(c, 1));

    let supported = match mono {
        Some(c) => c,
        None => device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 2))
            .ok_or_else(|| {
                Error::Audio(format!("no output config supports {sample_rate} Hz"))
            })?,
    };

    Ok(supported.with_sample_rate(rate).config())
}
