//! Capabilities the host engine consumes.
//!
//! The engine's sound system pulls PCM through [`SoundDecoder`]; its video
//! system polls a [`VideoSource`] once per render tick and uploads the front
//! buffer whenever [`VideoSource::swap_buffers`] reports new content.

use crate::error::Result;
use crate::video::YuvFrame;

pub trait SoundDecoder {
    /// Refill the buffer. Returns the number of bytes written, 0 at end of stream.
    fn decode(&mut self) -> usize;
    fn buffer(&self) -> &[u8];
    /// Capacity of the buffer in bytes
    fn size(&self) -> usize;
    fn seek(&mut self, seconds: f64) -> bool;
    fn rewind(&mut self) -> bool;
    fn is_seekable(&self) -> bool;
    fn is_finished(&self) -> bool;
    fn channel_count(&self) -> usize;
    fn bit_depth(&self) -> u32;
    fn sample_rate(&self) -> u32;
    /// Seconds, or -1 when unknown
    fn duration(&self) -> f64;
    fn try_clone(&self) -> Result<Box<dyn SoundDecoder>>;
}

pub trait VideoSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn filename(&self) -> &str;
    fn fill_back_buffer(&mut self);
    fn front_buffer(&self) -> &YuvFrame;
    /// Byte size of the frame struct behind [`VideoSource::front_buffer`]
    fn size(&self) -> usize;
    /// True when a new frame became the front buffer.
    fn swap_buffers(&mut self) -> bool;

    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, seconds: f64);
    fn tell(&self) -> f64;
    fn is_playing(&self) -> bool;
}
