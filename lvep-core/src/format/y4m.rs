//! YUV4MPEG2 demuxer
//!
//! Uncompressed planar video: a text header line, then `FRAME` lines each
//! followed by one raw picture. Every frame is a keyframe and timestamps are
//! frame indices, so seeking is pure arithmetic.

use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

use crate::codec::{CodecId, PixelFormat};
use crate::config::LvepConfig;
use crate::error::{LvepError, Result};
use crate::format::{
    read_fully, Demuxer, InputFormat, MediaKind, Packet, ProbeData, Rational, StreamInfo,
    PROBE_SCORE_EXTENSION, PROBE_SCORE_MAX,
};
use crate::io::IoBridge;

const MAGIC: &[u8] = b"YUV4MPEG2";
const FRAME_TAG: &[u8] = b"FRAME";
/// Longest header or frame line accepted
const MAX_LINE: usize = 1024;

pub struct Y4mFormat;

impl InputFormat for Y4mFormat {
    fn name(&self) -> &'static str {
        "yuv4mpegpipe"
    }

    fn probe(&self, probe: &ProbeData) -> u32 {
        if probe.buf.starts_with(MAGIC) {
            PROBE_SCORE_MAX
        } else if probe.has_extension(&["y4m"]) {
            PROBE_SCORE_EXTENSION
        } else {
            0
        }
    }

    fn open(&self, io: IoBridge, config: &LvepConfig) -> Result<Box<dyn Demuxer>> {
        let filename = io.filename().to_string();
        let mut reader = BufReader::with_capacity(config.io_buffer_size, io);
        let line = read_line(&mut reader)
            .map_err(|e| LvepError::Open(format!("{}: {}", filename, e)))?
            .ok_or_else(|| LvepError::Open(format!("{}: empty input", filename)))?;
        let header = Y4mHeader::parse(&line)
            .map_err(|reason| LvepError::Open(format!("{}: {}", filename, reason)))?;
        let data_offset = reader.stream_position()?;

        Ok(Box::new(Y4mDemuxer {
            reader,
            header,
            data_offset,
            frame_size: 0,
            streams: Vec::new(),
            next_frame: 0,
        }))
    }
}

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Y4mHeader {
    width: u32,
    height: u32,
    fps_num: u32,
    fps_den: u32,
    format: PixelFormat,
}

impl Y4mHeader {
    fn parse(line: &[u8]) -> std::result::Result<Self, String> {
        if !line.starts_with(MAGIC) {
            return Err("missing YUV4MPEG2 signature".into());
        }
        let text = std::str::from_utf8(&line[MAGIC.len()..])
            .map_err(|_| "header is not valid text".to_string())?;

        let mut header = Self {
            width: 0,
            height: 0,
            fps_num: 25,
            fps_den: 1,
            format: PixelFormat::Yuv420p,
        };

        for token in text.split_ascii_whitespace() {
            let mut chars = token.chars();
            let tag = chars.next();
            let value = chars.as_str();
            match tag {
                Some('W') => header.width = parse_number(value, "width")?,
                Some('H') => header.height = parse_number(value, "height")?,
                Some('F') => {
                    let (num, den) = value
                        .split_once(':')
                        .ok_or_else(|| format!("bad frame rate {}", value))?;
                    header.fps_num = parse_number(num, "frame rate")?;
                    header.fps_den = parse_number(den, "frame rate")?;
                }
                Some('C') => header.format = parse_colorspace(value)?,
                // Interlacing, aspect ratio and extensions don't affect decoding
                _ => {}
            }
        }
        Ok(header)
    }

    /// Bytes in one picture; `None` when the header's dimensions overflow.
    fn frame_size(&self) -> Option<usize> {
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = self.format.chroma_size(w, h);
        let chroma = cw.checked_mul(ch)?.checked_mul(2)?;
        w.checked_mul(h)?.checked_add(chroma)
    }
}

fn parse_number(value: &str, what: &str) -> std::result::Result<u32, String> {
    value
        .parse()
        .map_err(|_| format!("bad {} {:?}", what, value))
}

fn parse_colorspace(value: &str) -> std::result::Result<PixelFormat, String> {
    match value {
        "420" | "420jpeg" | "420paldv" | "420mpeg2" => Ok(PixelFormat::Yuv420p),
        "422" => Ok(PixelFormat::Yuv422p),
        "444" => Ok(PixelFormat::Yuv444p),
        "mono" => Ok(PixelFormat::Gray),
        other => Err(format!("unsupported colorspace {}", other)),
    }
}

/// One `\n`-terminated line without the terminator; `None` at end of input.
fn read_line<R: BufRead>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_LINE as u64)
        .read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unterminated line",
        ));
    }
    line.pop();
    Ok(Some(line))
}

// ============================================================================
// Demuxer
// ============================================================================

struct Y4mDemuxer {
    reader: BufReader<IoBridge>,
    header: Y4mHeader,
    data_offset: u64,
    /// Checked against the input size by `find_stream_info`
    frame_size: usize,
    streams: Vec<StreamInfo>,
    next_frame: i64,
}

impl Y4mDemuxer {
    /// Bytes per frame including a bare `FRAME\n` line.
    fn frame_stride(&self) -> u64 {
        (self.frame_size + FRAME_TAG.len() + 1) as u64
    }
}

impl Demuxer for Y4mDemuxer {
    fn format_name(&self) -> &'static str {
        "yuv4mpegpipe"
    }

    fn find_stream_info(&mut self) -> Result<()> {
        let header = self.header.clone();
        if header.width == 0 || header.height == 0 {
            return Err(LvepError::Metadata(format!(
                "invalid frame size {}x{}",
                header.width, header.height
            )));
        }
        if header.fps_num == 0 || header.fps_den == 0 {
            return Err(LvepError::Metadata("invalid frame rate".into()));
        }

        let payload = self.reader.get_mut().size()?.saturating_sub(self.data_offset);
        let frame_size = header.frame_size().ok_or_else(|| {
            LvepError::Metadata(format!(
                "frame size {}x{} overflows",
                header.width, header.height
            ))
        })?;
        if frame_size as u64 > payload {
            return Err(LvepError::Metadata(format!(
                "{}-byte frames but only {} bytes of picture data",
                frame_size, payload
            )));
        }
        self.frame_size = frame_size;
        let frames = payload / self.frame_stride();

        let mut stream = StreamInfo::new(
            0,
            MediaKind::Video,
            CodecId::RawVideo {
                format: header.format,
            },
            Rational::new(header.fps_den as i64, header.fps_num as i64),
        );
        stream.width = header.width;
        stream.height = header.height;
        stream.start_time = Some(0);
        stream.duration = Some(frames as i64);
        self.streams = vec![stream];
        Ok(())
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn set_discard(&mut self, index: usize, discard: bool) {
        if let Some(stream) = self.streams.get_mut(index) {
            stream.discard = discard;
        }
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.frame_size == 0 {
            return Err(LvepError::Demux("stream info has not been read".into()));
        }
        loop {
            let line = match read_line(&mut self.reader)? {
                Some(line) => line,
                None => return Ok(None),
            };
            if !line.starts_with(FRAME_TAG) {
                return Err(LvepError::Demux(format!(
                    "expected FRAME at frame {}",
                    self.next_frame
                )));
            }

            let mut data = vec![0u8; self.frame_size];
            let read = read_fully(&mut self.reader, &mut data)?;
            if read < data.len() {
                tracing::warn!(
                    "Truncated frame {} ({} of {} bytes)",
                    self.next_frame,
                    read,
                    data.len()
                );
                return Ok(None);
            }

            let pts = self.next_frame;
            self.next_frame += 1;
            if self.streams.first().map(|s| s.discard).unwrap_or(false) {
                continue;
            }

            return Ok(Some(Packet {
                stream_index: 0,
                pts: Some(pts),
                duration: 1,
                keyframe: true,
                data,
            }));
        }
    }

    fn seek(&mut self, _stream: usize, ts: i64) -> Result<()> {
        let mut frame = ts.max(0);
        if let Some(total) = self.streams.first().and_then(|s| s.duration) {
            frame = frame.min(total);
        }
        let offset = self.data_offset + frame as u64 * self.frame_stride();
        self.reader.seek(SeekFrom::Start(offset))?;
        self.next_frame = frame;
        Ok(())
    }
}
