//! # Media Stream
//!
//! One opened container with a single active stream and its decoder.
//!
//! Construction is all-or-nothing: each candidate format gets its own
//! duplicated [`IoBridge`], and everything a failed attempt acquired is
//! dropped before the next candidate is tried.

use std::marker::PhantomData;

use crate::codec::audio::SymphoniaAudioDecoder;
use crate::codec::rawvideo::RawVideoDecoder;
use crate::codec::{AudioFrame, CodecId, Decoder, VideoFrame};
use crate::config::LvepConfig;
use crate::error::{LvepError, Result};
use crate::format::{probe_input, Demuxer, InputFormat, MediaKind, Packet, Rational, StreamInfo};
use crate::io::IoBridge;

// ============================================================================
// Stream kinds
// ============================================================================

/// Compile-time media kind selecting the decoded frame type.
pub trait StreamKind {
    const KIND: MediaKind;
    type Frame: Default;

    fn open_decoder(stream: &StreamInfo) -> Result<Box<dyn Decoder<Frame = Self::Frame>>>;
}

pub enum Audio {}

pub enum Video {}

impl StreamKind for Audio {
    const KIND: MediaKind = MediaKind::Audio;
    type Frame = AudioFrame;

    fn open_decoder(stream: &StreamInfo) -> Result<Box<dyn Decoder<Frame = AudioFrame>>> {
        match &stream.codec {
            CodecId::Symphonia(params) => Ok(Box::new(SymphoniaAudioDecoder::new(params)?)),
            other => Err(LvepError::codec(other.name(), "no audio decoder available")),
        }
    }
}

impl StreamKind for Video {
    const KIND: MediaKind = MediaKind::Video;
    type Frame = VideoFrame;

    fn open_decoder(stream: &StreamInfo) -> Result<Box<dyn Decoder<Frame = VideoFrame>>> {
        match &stream.codec {
            CodecId::RawVideo { format } => Ok(Box::new(RawVideoDecoder::new(stream, *format)?)),
            #[cfg(feature = "software-decode")]
            CodecId::H264 => Ok(Box::new(crate::codec::h264::H264Decoder::new(stream)?)),
            #[cfg(not(feature = "software-decode"))]
            CodecId::H264 => Err(LvepError::codec(
                "h264",
                "built without the software-decode feature",
            )),
            other => Err(LvepError::codec(other.name(), "no video decoder available")),
        }
    }
}

// ============================================================================
// Opening
// ============================================================================

/// Probe, open and read stream headers without selecting a stream.
pub(crate) fn open_demuxer(
    mut io: IoBridge,
    config: &LvepConfig,
) -> Result<(Box<dyn Demuxer>, &'static dyn InputFormat)> {
    let candidates = probe_input(&mut io, config)?;
    first_success(&io, config, &candidates, |mut demuxer| {
        demuxer.find_stream_info()?;
        Ok(demuxer)
    })
}

/// Try each candidate format in order with a fresh bridge. On total failure,
/// report the attempt that got furthest.
fn first_success<T>(
    io: &IoBridge,
    config: &LvepConfig,
    candidates: &[(&'static dyn InputFormat, u32)],
    mut finish: impl FnMut(Box<dyn Demuxer>) -> Result<T>,
) -> Result<(T, &'static dyn InputFormat)> {
    let mut best: Option<LvepError> = None;

    for (format, _) in candidates {
        let attempt = io
            .duplicate()
            .map_err(LvepError::from)
            .and_then(|dup| format.open(dup, config))
            .and_then(&mut finish);

        match attempt {
            Ok(value) => return Ok((value, *format)),
            Err(e) => {
                tracing::debug!("{}: {} failed: {}", io.filename(), format.name(), e);
                if best.as_ref().map_or(true, |b| e.stage() > b.stage()) {
                    best = Some(e);
                }
            }
        }
    }

    Err(best.unwrap_or_else(|| LvepError::Probe(io.filename().to_string())))
}

// ============================================================================
// MediaStream
// ============================================================================

pub struct MediaStream<K: StreamKind> {
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn Decoder<Frame = K::Frame>>,
    index: usize,
    time_base: Rational,
    filename: String,
    packet: Packet,
    _kind: PhantomData<K>,
}

impl<K: StreamKind> MediaStream<K> {
    pub fn new(io: IoBridge) -> Result<Self> {
        Self::with_config(io, &LvepConfig::default())
    }

    pub fn with_config(mut io: IoBridge, config: &LvepConfig) -> Result<Self> {
        let filename = io.filename().to_string();
        let candidates = probe_input(&mut io, config)?;

        let ((demuxer, decoder, index), format) =
            first_success(&io, config, &candidates, Self::select_stream)?;

        let time_base = demuxer.streams()[index].time_base;
        tracing::info!(
            "Opened {} stream {} of {} ({}, {}, time base {})",
            K::KIND,
            index,
            filename,
            format.name(),
            decoder.name(),
            time_base
        );

        Ok(Self {
            demuxer,
            decoder,
            index,
            time_base,
            filename,
            packet: Packet::default(),
            _kind: PhantomData,
        })
    }

    /// Steps 3-6 of opening: stream info, selection, discard, decoder.
    #[allow(clippy::type_complexity)]
    fn select_stream(
        mut demuxer: Box<dyn Demuxer>,
    ) -> Result<(Box<dyn Demuxer>, Box<dyn Decoder<Frame = K::Frame>>, usize)> {
        demuxer.find_stream_info()?;

        let index = demuxer
            .streams()
            .iter()
            .position(|s| s.kind == K::KIND)
            .ok_or(LvepError::NoStream(K::KIND))?;

        let count = demuxer.streams().len();
        for other in (0..count).filter(|&i| i != index) {
            demuxer.set_discard(other, true);
        }

        let decoder = K::open_decoder(&demuxer.streams()[index])?;
        tracing::debug!(
            "Selected {} stream {} of {} ({})",
            K::KIND,
            index,
            count,
            decoder.name()
        );
        Ok((demuxer, decoder, index))
    }

    /// Pull the next packet of the active stream. False at end of stream.
    pub fn read_packet(&mut self) -> bool {
        loop {
            match self.demuxer.read_packet() {
                Ok(Some(packet)) if packet.stream_index == self.index => {
                    self.packet = packet;
                    return true;
                }
                Ok(Some(_)) => continue,
                Ok(None) => return false,
                Err(e) => {
                    tracing::warn!("{}: packet read failed: {}", self.filename, e);
                    return false;
                }
            }
        }
    }

    /// Decode until a full frame is ready. False at end of stream.
    pub fn read_frame(&mut self, frame: &mut K::Frame) -> bool {
        while self.read_packet() {
            match self.decoder.decode(&self.packet, frame) {
                Ok(true) => return true,
                Ok(false) => continue,
                Err(e) => tracing::warn!("{}: {}", self.filename, e),
            }
        }
        false
    }

    /// Stream ticks to seconds.
    pub fn translate_timestamp(&self, ts: i64) -> f64 {
        ts as f64 * self.time_base.num as f64 / self.time_base.den as f64
    }

    fn seconds_to_ticks(&self, seconds: f64) -> i64 {
        if self.time_base.num == 0 {
            return 0;
        }
        (seconds * self.time_base.den as f64 / self.time_base.num as f64) as i64
    }

    /// `None` when the container declares no duration.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.info().duration.map(|d| self.translate_timestamp(d))
    }

    /// Backward-biased seek; the next frame is at or before `seconds`.
    pub fn seek(&mut self, seconds: f64) -> bool {
        let ts = self.seconds_to_ticks(seconds);
        self.decoder.flush();
        match self.demuxer.seek(self.index, ts) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{}: seek to {:.3}s failed: {}", self.filename, seconds, e);
                false
            }
        }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.demuxer.streams()[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn format_name(&self) -> &'static str {
        self.demuxer.format_name()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}
