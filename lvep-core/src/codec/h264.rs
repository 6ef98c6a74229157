//! H.264 decoding through OpenH264
//!
//! Matroska stores H.264 in AVCC form: SPS/PPS in an `avcC` record and
//! length-prefixed NAL units in each packet. OpenH264 wants Annex B start
//! codes, so both are rewritten before decoding.

use openh264::formats::YUVSource;

use crate::codec::{Decoder, PixelFormat, VideoFrame};
use crate::error::{LvepError, Result};
use crate::format::{Packet, StreamInfo};

/// Annex B start code (4-byte version)
const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

// ============================================================================
// NAL unit framing
// ============================================================================

/// Convert AVCC length-prefixed NAL units to Annex B.
///
/// AVCC: [length][NAL][length][NAL]...
/// Annex B: [00 00 00 01][NAL][00 00 00 01][NAL]...
pub fn avcc_to_annexb(data: &[u8], nal_length_size: usize) -> Vec<u8> {
    if data.is_empty() || nal_length_size == 0 || nal_length_size > 4 {
        return data.to_vec();
    }

    let mut result = Vec::with_capacity(data.len() + 16);
    let mut offset = 0;

    while offset + nal_length_size <= data.len() {
        let nal_len = data[offset..offset + nal_length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        offset += nal_length_size;

        if nal_len == 0 || offset + nal_len > data.len() {
            break;
        }

        result.extend_from_slice(&ANNEX_B_START_CODE);
        result.extend_from_slice(&data[offset..offset + nal_len]);
        offset += nal_len;
    }

    result
}

/// Read `count` 16-bit length-prefixed parameter sets as Annex B.
fn read_parameter_sets(
    data: &[u8],
    mut offset: usize,
    count: usize,
    out: &mut Vec<u8>,
) -> Option<usize> {
    for _ in 0..count {
        let len = u16::from_be_bytes([*data.get(offset)?, *data.get(offset + 1)?]) as usize;
        offset += 2;
        let nal = data.get(offset..offset + len)?;
        out.extend_from_slice(&ANNEX_B_START_CODE);
        out.extend_from_slice(nal);
        offset += len;
    }
    Some(offset)
}

/// Parse an `avcC` record into Annex B SPS/PPS plus the NAL length size.
///
/// [0] version (1), [1..4] profile/compat/level, [4] 0xFC | (length size - 1),
/// [5] 0xE0 | SPS count, SPS entries, PPS count, PPS entries.
pub fn parse_avcc_extradata(extradata: &[u8]) -> Option<(Vec<u8>, usize)> {
    if extradata.len() < 7 || extradata[0] != 1 {
        return None;
    }

    let nal_length_size = ((extradata[4] & 0x03) + 1) as usize;
    let num_sps = (extradata[5] & 0x1F) as usize;

    let mut result = Vec::with_capacity(extradata.len() + 16);
    let offset = read_parameter_sets(extradata, 6, num_sps, &mut result)?;

    if let Some(&num_pps) = extradata.get(offset) {
        // Trailing garbage after the SPS list is tolerated
        let _ = read_parameter_sets(extradata, offset + 1, num_pps as usize, &mut result);
    }

    Some((result, nal_length_size))
}

/// Whether `data` already starts with an Annex B start code.
pub fn is_annexb(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 0, 1]) || data.starts_with(&[0, 0, 1])
}

// ============================================================================
// Decoder
// ============================================================================

pub struct H264Decoder {
    decoder: openh264::decoder::Decoder,
    /// SPS/PPS in Annex B form, fed again after every flush
    parameter_sets: Vec<u8>,
    /// 0 when packets are already Annex B
    nal_length_size: usize,
    primed: bool,
}

impl H264Decoder {
    pub fn new(stream: &StreamInfo) -> Result<Self> {
        let decoder = openh264::decoder::Decoder::new()
            .map_err(|e| LvepError::codec("h264", format!("{:?}", e)))?;

        let (parameter_sets, nal_length_size) = if stream.extradata.is_empty() {
            (Vec::new(), 0)
        } else if is_annexb(&stream.extradata) {
            (stream.extradata.clone(), 0)
        } else {
            parse_avcc_extradata(&stream.extradata)
                .ok_or_else(|| LvepError::codec("h264", "malformed avcC record"))?
        };

        tracing::debug!(
            "OpenH264 decoder ready ({} bytes of parameter sets, NAL length size {})",
            parameter_sets.len(),
            nal_length_size
        );

        Ok(Self {
            decoder,
            parameter_sets,
            nal_length_size,
            primed: false,
        })
    }

    fn prime(&mut self) {
        if self.primed {
            return;
        }
        self.primed = true;
        if !self.parameter_sets.is_empty() {
            if let Err(e) = self.decoder.decode(&self.parameter_sets) {
                tracing::warn!("OpenH264 rejected parameter sets: {:?}", e);
            }
        }
    }
}

impl Decoder for H264Decoder {
    type Frame = VideoFrame;

    fn name(&self) -> &str {
        "h264"
    }

    fn decode(&mut self, packet: &Packet, frame: &mut VideoFrame) -> Result<bool> {
        self.prime();

        let annexb;
        let data = if self.nal_length_size > 0 && !is_annexb(&packet.data) {
            annexb = avcc_to_annexb(&packet.data, self.nal_length_size);
            &annexb
        } else {
            &packet.data
        };

        match self.decoder.decode(data) {
            Ok(Some(yuv)) => {
                let (width, height) = yuv.dimensions();
                let strides = yuv.strides();
                let (cw, ch) = PixelFormat::Yuv420p.chroma_size(width, height);

                // Drop stride padding so each plane is tightly packed
                let copy_plane =
                    |dst: &mut Vec<u8>, src: &[u8], stride: usize, w: usize, h: usize| {
                        dst.clear();
                        for row in 0..h {
                            let start = row * stride;
                            if let Some(line) = src.get(start..start + w) {
                                dst.extend_from_slice(line);
                            }
                        }
                    };
                copy_plane(&mut frame.planes[0], yuv.y(), strides.0, width, height);
                copy_plane(&mut frame.planes[1], yuv.u(), strides.1, cw, ch);
                copy_plane(&mut frame.planes[2], yuv.v(), strides.2, cw, ch);

                frame.linesize = [width, cw, cw];
                frame.width = width as u32;
                frame.height = height as u32;
                frame.format = PixelFormat::Yuv420p;
                frame.pts = packet.pts.unwrap_or(0);
                frame.duration = packet.duration;
                frame.keyframe = packet.keyframe;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                tracing::warn!("OpenH264 decode error at pts {:?}: {:?}", packet.pts, e);
                Ok(false)
            }
        }
    }

    fn flush(&mut self) {
        // OpenH264 has no reset; start a fresh instance
        match openh264::decoder::Decoder::new() {
            Ok(decoder) => {
                self.decoder = decoder;
                self.primed = false;
            }
            Err(e) => tracing::warn!("Failed to recreate OpenH264 decoder: {:?}", e),
        }
    }
}
