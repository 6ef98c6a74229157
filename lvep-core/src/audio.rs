//! # Audio Decoder
//!
//! Pull-based PCM source for the host sound system: every `decode()` fills a
//! fixed buffer with interleaved signed 16-bit samples at the stream's own
//! rate and channel count.

use crate::codec::{AudioFrame, ChannelLayout};
use crate::config::LvepConfig;
use crate::error::{LvepError, Result};
use crate::host::SoundDecoder;
use crate::io::{FileData, IoBridge, SharedFile};
use crate::resample::Resampler;
use crate::stream::{Audio, MediaStream};

/// Output sample depth in bits
pub const BIT_DEPTH: u32 = 16;

pub struct AudioDecoder {
    stream: MediaStream<Audio>,
    frame: AudioFrame,
    resampler: Resampler,
    buffer: Vec<u8>,
    finished: bool,
}

impl AudioDecoder {
    pub fn new(io: IoBridge, config: &LvepConfig) -> Result<Self> {
        let mut stream = MediaStream::<Audio>::with_config(io, config)?;

        // Container metadata may not pin down the layout; the first frame does
        let mut frame = AudioFrame::default();
        if !stream.read_frame(&mut frame) {
            return Err(LvepError::NoFirstFrame);
        }
        let mut resampler = Resampler::new(&frame);
        if let Err(e) = resampler.convert(&frame) {
            tracing::warn!("{}: dropping first frame: {}", stream.filename(), e);
        }

        // Every refill must hold at least one whole interleaved frame
        let frame_bytes = resampler.channels() * (BIT_DEPTH as usize / 8);
        let buffer_size = config.audio_buffer_size.max(frame_bytes);
        if buffer_size != config.audio_buffer_size {
            tracing::warn!(
                "{}: audio buffer raised from {} to {} bytes for {} channels",
                stream.filename(),
                config.audio_buffer_size,
                buffer_size,
                resampler.channels()
            );
        }

        Ok(Self {
            stream,
            frame,
            resampler,
            buffer: vec![0; buffer_size],
            finished: false,
        })
    }

    pub fn from_file(file: SharedFile, config: &LvepConfig) -> Result<Self> {
        Self::new(IoBridge::from_file(file)?, config)
    }

    pub fn from_data(data: &FileData, config: &LvepConfig) -> Result<Self> {
        Self::new(IoBridge::from_data(data), config)
    }

    pub fn stream(&self) -> &MediaStream<Audio> {
        &self.stream
    }

    /// Speaker positions, defaulted from the channel count when the file has none.
    pub fn layout(&self) -> Option<ChannelLayout> {
        self.resampler.layout()
    }
}

impl SoundDecoder for AudioDecoder {
    fn decode(&mut self) -> usize {
        if self.resampler.pending() == 0 {
            if !self.stream.read_frame(&mut self.frame) {
                self.finished = true;
                return 0;
            }
            if let Err(e) = self.resampler.convert(&self.frame) {
                tracing::warn!("{}: resample failed: {}", self.stream.filename(), e);
                return 0;
            }
        }

        let frames = self.resampler.drain(&mut self.buffer);
        frames * self.resampler.channels() * (BIT_DEPTH as usize / 8)
    }

    fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    fn size(&self) -> usize {
        self.buffer.len()
    }

    fn seek(&mut self, seconds: f64) -> bool {
        self.finished = false;
        self.resampler.reset();
        self.stream.seek(seconds)
    }

    fn rewind(&mut self) -> bool {
        self.seek(0.0)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn channel_count(&self) -> usize {
        self.resampler.channels()
    }

    fn bit_depth(&self) -> u32 {
        BIT_DEPTH
    }

    fn sample_rate(&self) -> u32 {
        self.resampler.sample_rate()
    }

    fn duration(&self) -> f64 {
        self.stream.duration_seconds().unwrap_or(-1.0)
    }

    fn try_clone(&self) -> Result<Box<dyn SoundDecoder>> {
        Err(LvepError::Unsupported("cloning an audio decoder"))
    }
}
