//! Owned unit of synthesized audio

use std::time::Duration;

/// One synthesized segment (typically one sentence) of 16-bit mono PCM
///
/// Produced once by synthesis, moved into a [`TtsQueue`](super::TtsQueue),
/// played once, then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioChunk {
    /// Signed 16-bit PCM samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Wrap a sample buffer
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True for a zero-sample chunk (played as a no-op)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration at the chunk's sample rate
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let micros = self.samples.len() as u64 * 1_000_000 / u64::from(self.sample_rate);
        Duration::from_micros(micros)
    }

    /// Convert little-endian PCM bytes (as returned by TTS endpoints) into a chunk
    ///
    /// A trailing odd byte is dropped.
    #[must_use]
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let chunk = AudioChunk::new(vec![0; 11_025], 22_050);
        assert_eq!(chunk.duration(), Duration::from_millis(500));
        assert_eq!(AudioChunk::new(vec![0; 10], 0).duration(), Duration::ZERO);
    }

    #[test]
    fn test_from_le_bytes() {
        let chunk = AudioChunk::from_le_bytes(&[0x01, 0x00, 0xff, 0xff, 0x07], 24_000);
        assert_eq!(chunk.samples, vec![1, -1]);
        assert_eq!(chunk.sample_rate, 24_000);
    }
}
