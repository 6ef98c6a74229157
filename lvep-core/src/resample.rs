//! Output buffering
//!
//! Decoded frames arrive already interleaved as signed 16-bit PCM at the
//! source rate and channel count. They wait in a FIFO so a frame larger than
//! the host's buffer is delivered over several refills.

use std::collections::VecDeque;

use crate::codec::{AudioFrame, ChannelLayout};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResampleError {
    #[error("channel count changed from {from} to {to}")]
    ChannelsChanged { from: usize, to: usize },
    #[error("sample rate changed from {from} to {to}")]
    RateChanged { from: u32, to: u32 },
}

pub struct Resampler {
    layout: Option<ChannelLayout>,
    channels: usize,
    sample_rate: u32,
    /// Interleaved output samples
    fifo: VecDeque<i16>,
}

impl Resampler {
    /// Configured from the first decoded frame. A frame without speaker
    /// positions gets the default layout for its channel count.
    pub fn new(first: &AudioFrame) -> Self {
        let channels = first.channels;
        let layout = first.layout.or_else(|| ChannelLayout::default_for(channels));
        tracing::debug!(
            "Resampler: {} Hz, {} channels ({}) -> s16",
            first.sample_rate,
            channels,
            layout.map(|l| l.to_string()).unwrap_or_else(|| "unknown layout".into())
        );
        Self {
            layout,
            channels,
            sample_rate: first.sample_rate,
            fifo: VecDeque::new(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn layout(&self) -> Option<ChannelLayout> {
        self.layout
    }

    /// Sample frames waiting to be drained.
    pub fn pending(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.fifo.len() / self.channels
    }

    /// Queue the samples of `frame`.
    pub fn convert(&mut self, frame: &AudioFrame) -> Result<usize, ResampleError> {
        if frame.channels != self.channels {
            return Err(ResampleError::ChannelsChanged {
                from: self.channels,
                to: frame.channels,
            });
        }
        if frame.sample_rate != self.sample_rate {
            return Err(ResampleError::RateChanged {
                from: self.sample_rate,
                to: frame.sample_rate,
            });
        }

        let count = frame.frames * self.channels;
        self.fifo.extend(frame.samples.iter().take(count).copied());
        Ok(frame.frames)
    }

    /// Move whole sample frames into `out` as native-endian s16.
    /// Returns the number of sample frames written.
    pub fn drain(&mut self, out: &mut [u8]) -> usize {
        if self.channels == 0 {
            return 0;
        }
        let frame_bytes = self.channels * 2;
        let frames = (out.len() / frame_bytes).min(self.pending());

        for (chunk, sample) in out[..frames * frame_bytes]
            .chunks_exact_mut(2)
            .zip(self.fifo.drain(..frames * self.channels))
        {
            chunk.copy_from_slice(&sample.to_ne_bytes());
        }
        frames
    }

    pub fn reset(&mut self) {
        self.fifo.clear();
    }
}
