//! Decoded audio frames and the symphonia-backed audio decoder.

use std::fmt;

use serde::{Deserialize, Serialize};
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet as SymphoniaPacket;

use crate::codec::Decoder;
use crate::error::{LvepError, Result};
use crate::format::Packet;

// ============================================================================
// Frame types
// ============================================================================

/// Speaker positions as a WAVE channel mask (bit 0 = front left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelLayout(pub u32);

impl ChannelLayout {
    pub const MONO: Self = Self(0x4);
    pub const STEREO: Self = Self(0x3);
    pub const SURROUND_2_1: Self = Self(0x3 | 0x8);
    pub const QUAD: Self = Self(0x3 | 0x30);
    pub const SURROUND_5_0: Self = Self(0x7 | 0x600);
    pub const SURROUND_5_1: Self = Self(0xF | 0x600);
    pub const SURROUND_6_1: Self = Self(0xF | 0x100 | 0x600);
    pub const SURROUND_7_1: Self = Self(0xF | 0x30 | 0x600);

    /// Conventional layout for a bare channel count.
    pub fn default_for(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(Self::MONO),
            2 => Some(Self::STEREO),
            3 => Some(Self::SURROUND_2_1),
            4 => Some(Self::QUAD),
            5 => Some(Self::SURROUND_5_0),
            6 => Some(Self::SURROUND_5_1),
            7 => Some(Self::SURROUND_6_1),
            8 => Some(Self::SURROUND_7_1),
            _ => None,
        }
    }

    pub fn channels(&self) -> usize {
        self.0.count_ones() as usize
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MONO => f.write_str("mono"),
            Self::STEREO => f.write_str("stereo"),
            Self::SURROUND_2_1 => f.write_str("2.1"),
            Self::QUAD => f.write_str("quad"),
            Self::SURROUND_5_0 => f.write_str("5.0"),
            Self::SURROUND_5_1 => f.write_str("5.1"),
            Self::SURROUND_6_1 => f.write_str("6.1"),
            Self::SURROUND_7_1 => f.write_str("7.1"),
            Self(mask) => write!(f, "{} channels (0x{:x})", mask.count_ones(), mask),
        }
    }
}

/// Decoded audio already converted to interleaved signed 16-bit samples.
#[derive(Debug, Clone, Default)]
pub struct AudioFrame {
    pub sample_rate: u32,
    /// `None` when the codec reported no speaker positions
    pub layout: Option<ChannelLayout>,
    pub channels: usize,
    /// `frames * channels` samples, channel-interleaved
    pub samples: Vec<i16>,
    /// Samples per channel
    pub frames: usize,
    pub pts: i64,
    pub duration: i64,
}

// ============================================================================
// Symphonia decoder
// ============================================================================

pub struct SymphoniaAudioDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    name: String,
    sample_buf: Option<SampleBuffer<i16>>,
}

impl SymphoniaAudioDecoder {
    pub fn new(params: &CodecParameters) -> Result<Self> {
        let codecs = symphonia::default::get_codecs();
        let name = codecs
            .get_codec(params.codec)
            .map(|c| c.short_name.to_string())
            .unwrap_or_else(|| format!("{:?}", params.codec));
        let decoder = codecs
            .make(params, &DecoderOptions::default())
            .map_err(|e| LvepError::codec(name.clone(), e.to_string()))?;
        Ok(Self {
            decoder,
            name,
            sample_buf: None,
        })
    }
}

fn layout_of(channels: Channels) -> Option<ChannelLayout> {
    match channels.bits() {
        0 => None,
        bits => Some(ChannelLayout(bits)),
    }
}

impl Decoder for SymphoniaAudioDecoder {
    type Frame = AudioFrame;

    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&mut self, packet: &Packet, frame: &mut AudioFrame) -> Result<bool> {
        let pts = packet.pts.unwrap_or(0);
        let input = SymphoniaPacket::new_from_slice(
            0,
            pts.max(0) as u64,
            packet.duration.max(0) as u64,
            &packet.data,
        );

        let decoded = match self.decoder.decode(&input) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                return Err(LvepError::Demux(format!("corrupt {} packet: {}", self.name, msg)))
            }
            Err(e) => return Err(LvepError::Demux(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if decoded.frames() == 0 || channels == 0 {
            return Ok(false);
        }

        // Sized for the largest packet the decoder can produce; grows if the
        // channel count goes up mid-stream
        let needed = decoded.capacity() * channels;
        if self.sample_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
            self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(buf) = &mut self.sample_buf {
            buf.copy_interleaved_ref(decoded);
            frame.samples.clear();
            frame.samples.extend_from_slice(buf.samples());
        }

        frame.sample_rate = spec.rate;
        frame.layout = layout_of(spec.channels);
        frame.channels = channels;
        frame.frames = frame.samples.len() / channels;
        frame.pts = pts;
        frame.duration = packet.duration;
        Ok(true)
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layouts() {
        assert_eq!(ChannelLayout::default_for(1), Some(ChannelLayout::MONO));
        assert_eq!(ChannelLayout::default_for(6).unwrap().channels(), 6);
        assert_eq!(ChannelLayout::default_for(8).unwrap().channels(), 8);
        assert_eq!(ChannelLayout::default_for(0), None);
        assert_eq!(ChannelLayout::default_for(9), None);
        for count in 1..=8 {
            assert_eq!(ChannelLayout::default_for(count).unwrap().channels(), count);
        }
    }

    #[test]
    fn test_layout_matches_symphonia_bits() {
        let stereo = Channels::FRONT_LEFT | Channels::FRONT_RIGHT;
        assert_eq!(layout_of(stereo), Some(ChannelLayout::STEREO));
        assert_eq!(layout_of(Channels::FRONT_CENTRE), Some(ChannelLayout::MONO));
        assert_eq!(layout_of(Channels::empty()), None);
        assert_eq!(ChannelLayout::SURROUND_5_1.to_string(), "5.1");
    }

    #[test]
    fn test_decodes_to_interleaved_s16() {
        use symphonia::core::codecs::CODEC_TYPE_PCM_U8;
        use symphonia::core::sample::SampleFormat;

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_PCM_U8)
            .with_sample_rate(8000)
            .with_sample_format(SampleFormat::U8)
            .with_bits_per_sample(8)
            .with_bits_per_coded_sample(8)
            .with_channels(Channels::FRONT_LEFT | Channels::FRONT_RIGHT)
            .with_max_frames_per_packet(4);
        let mut decoder = SymphoniaAudioDecoder::new(&params).unwrap();

        let packet = Packet {
            data: vec![0x80, 0x00, 0xFF, 0x80, 0x40, 0xC0],
            duration: 3,
            ..Default::default()
        };
        let mut frame = AudioFrame::default();
        assert!(decoder.decode(&packet, &mut frame).unwrap());
        assert_eq!(frame.channels, 2);
        assert_eq!(frame.frames, 3);
        assert_eq!(frame.layout, Some(ChannelLayout::STEREO));
        assert_eq!(frame.samples, vec![0, -32768, 0x7F00, 0, -0x4000, 0x4000]);
    }
}
