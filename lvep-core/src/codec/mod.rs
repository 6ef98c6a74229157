//! # Codecs
//!
//! Decoder interface and the decoded-frame types handed to the adapters.
//!
//! - Raw planar video (YUV4MPEG2 payloads)
//! - H.264 via OpenH264 (`software-decode` feature)
//! - Every audio codec symphonia ships

pub mod audio;
#[cfg(feature = "software-decode")]
pub mod h264;
pub mod rawvideo;

use serde::{Deserialize, Serialize};
use symphonia::core::codecs::CodecParameters;

use crate::error::Result;
use crate::format::Packet;

pub use audio::{AudioFrame, ChannelLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Gray,
}

impl PixelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuv444p => "yuv444p",
            Self::Gray => "gray",
        }
    }

    /// Size of each chroma plane for a `width` x `height` picture.
    pub fn chroma_size(&self, width: usize, height: usize) -> (usize, usize) {
        match self {
            Self::Yuv420p => ((width + 1) / 2, (height + 1) / 2),
            Self::Yuv422p => ((width + 1) / 2, height),
            Self::Yuv444p => (width, height),
            Self::Gray => (0, 0),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CodecId {
    RawVideo { format: PixelFormat },
    H264,
    Symphonia(Box<CodecParameters>),
    /// Container codec identifier with no decoder here
    Unsupported(String),
}

impl CodecId {
    pub fn from_matroska(codec_id: &str) -> Self {
        match codec_id {
            "V_MPEG4/ISO/AVC" => Self::H264,
            other => Self::Unsupported(other.to_string()),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::RawVideo { .. } => "rawvideo".into(),
            Self::H264 => "h264".into(),
            Self::Symphonia(params) => symphonia::default::get_codecs()
                .get_codec(params.codec)
                .map(|c| c.short_name.to_string())
                .unwrap_or_else(|| format!("{:?}", params.codec)),
            Self::Unsupported(id) => id.clone(),
        }
    }
}

/// Turns packets of one stream into frames.
pub trait Decoder {
    type Frame;

    fn name(&self) -> &str;

    /// `Ok(false)` when the packet produced no frame yet.
    fn decode(&mut self, packet: &Packet, frame: &mut Self::Frame) -> Result<bool>;

    /// Drop any state buffered from before a seek.
    fn flush(&mut self);
}

/// Planar YUV picture with per-plane strides.
#[derive(Debug, Clone, Default)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: [Vec<u8>; 3],
    pub linesize: [usize; 3],
    pub pts: i64,
    pub duration: i64,
    pub keyframe: bool,
}

impl VideoFrame {
    /// Row `row` of `plane`, trimmed to `width` bytes.
    pub fn row(&self, plane: usize, row: usize, width: usize) -> Option<&[u8]> {
        let start = row * self.linesize[plane];
        self.planes[plane].get(start..start + width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chroma_size() {
        assert_eq!(PixelFormat::Yuv420p.chroma_size(320, 240), (160, 120));
        assert_eq!(PixelFormat::Yuv420p.chroma_size(5, 3), (3, 2));
        assert_eq!(PixelFormat::Yuv422p.chroma_size(320, 240), (160, 240));
        assert_eq!(PixelFormat::Gray.chroma_size(320, 240), (0, 0));
    }

    #[test]
    fn test_matroska_codec_ids() {
        assert!(matches!(CodecId::from_matroska("V_MPEG4/ISO/AVC"), CodecId::H264));
        match CodecId::from_matroska("V_VP9") {
            CodecId::Unsupported(id) => assert_eq!(id, "V_VP9"),
            other => panic!("unexpected codec {:?}", other),
        }
        assert_eq!(CodecId::from_matroska("A_OPUS").name(), "A_OPUS");
    }

    #[test]
    fn test_video_frame_row() {
        let frame = VideoFrame {
            width: 2,
            height: 2,
            planes: [vec![1, 2, 0, 0, 3, 4, 0, 0], vec![5], vec![6]],
            linesize: [4, 1, 1],
            ..Default::default()
        };
        assert_eq!(frame.row(0, 1, 2), Some(&[3u8, 4][..]));
        assert_eq!(frame.row(0, 2, 2), None);
    }
}
