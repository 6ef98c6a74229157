//! Raw planar video "decoder": slices each packet into Y/U/V planes.

use crate::codec::{Decoder, PixelFormat, VideoFrame};
use crate::error::{LvepError, Result};
use crate::format::{Packet, StreamInfo};

pub struct RawVideoDecoder {
    width: usize,
    height: usize,
    format: PixelFormat,
}

impl RawVideoDecoder {
    /// Only 4:2:0 is decodable; the scheduler's buffers assume it.
    pub fn new(stream: &StreamInfo, format: PixelFormat) -> Result<Self> {
        if format != PixelFormat::Yuv420p {
            return Err(LvepError::codec(
                "rawvideo",
                format!("unsupported pixel format {}", format.name()),
            ));
        }
        if stream.width == 0 || stream.height == 0 {
            return Err(LvepError::codec("rawvideo", "missing frame size"));
        }
        Ok(Self {
            width: stream.width as usize,
            height: stream.height as usize,
            format,
        })
    }

    fn frame_size(&self) -> usize {
        let (cw, ch) = self.format.chroma_size(self.width, self.height);
        self.width * self.height + 2 * cw * ch
    }
}

impl Decoder for RawVideoDecoder {
    type Frame = VideoFrame;

    fn name(&self) -> &str {
        "rawvideo"
    }

    fn decode(&mut self, packet: &Packet, frame: &mut VideoFrame) -> Result<bool> {
        if packet.data.len() < self.frame_size() {
            return Err(LvepError::Demux(format!(
                "raw frame too short: {} < {} bytes",
                packet.data.len(),
                self.frame_size()
            )));
        }

        let (cw, ch) = self.format.chroma_size(self.width, self.height);
        let luma = self.width * self.height;
        let chroma = cw * ch;
        let data = &packet.data;

        for (plane, (start, len)) in [(0, luma), (luma, chroma), (luma + chroma, chroma)]
            .into_iter()
            .enumerate()
        {
            frame.planes[plane].clear();
            frame.planes[plane].extend_from_slice(&data[start..start + len]);
        }
        frame.linesize = [self.width, cw, cw];
        frame.width = self.width as u32;
        frame.height = self.height as u32;
        frame.format = self.format;
        frame.pts = packet.pts.unwrap_or(0);
        frame.duration = packet.duration;
        frame.keyframe = true;
        Ok(true)
    }

    fn flush(&mut self) {}
}
