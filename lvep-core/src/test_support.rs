//! Fixtures shared by the unit tests: an in-memory host file and small
//! generated media files.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::io::{FileMode, MediaFile};

/// Host file backed by a byte vector, counting open/close calls.
pub struct MemoryFile {
    name: String,
    data: Vec<u8>,
    pos: u64,
    mode: FileMode,
    opens: usize,
    closes: usize,
    fail_open: bool,
}

impl MemoryFile {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            data,
            pos: 0,
            mode: FileMode::Closed,
            opens: 0,
            closes: 0,
            fail_open: false,
        }
    }

    pub fn shared(name: &str, data: Vec<u8>) -> Arc<Mutex<MemoryFile>> {
        Arc::new(Mutex::new(Self::new(name, data)))
    }

    pub fn open_count(&self) -> usize {
        self.opens
    }

    pub fn close_count(&self) -> usize {
        self.closes
    }

    pub fn fail_open(&mut self, fail: bool) {
        self.fail_open = fail;
    }

    fn check_open(&self) -> io::Result<()> {
        if self.mode == FileMode::Closed {
            return Err(io::Error::new(io::ErrorKind::Other, "file is not open"));
        }
        Ok(())
    }
}

impl MediaFile for MemoryFile {
    fn is_open(&self) -> bool {
        self.mode != FileMode::Closed
    }

    fn mode(&self) -> FileMode {
        self.mode
    }

    fn open(&mut self, mode: FileMode) -> io::Result<()> {
        if self.fail_open {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "access denied"));
        }
        self.opens += 1;
        self.mode = mode;
        self.pos = 0;
        Ok(())
    }

    fn close(&mut self) -> bool {
        let was_open = self.is_open();
        if was_open {
            self.closes += 1;
        }
        self.mode = FileMode::Closed;
        was_open
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        let start = (self.pos as usize).min(self.data.len());
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.pos += count as u64;
        Ok(count)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.check_open()?;
        self.pos = pos;
        Ok(())
    }

    fn tell(&mut self) -> io::Result<u64> {
        self.check_open()?;
        Ok(self.pos)
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn filename(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// YUV4MPEG2
// ============================================================================

pub fn y4m_with_header(params: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = format!("YUV4MPEG2 {}\n", params).into_bytes();
    out.extend_from_slice(payload);
    out
}

/// 4:2:0 clip whose frame `i` has luma `i % 256` and neutral chroma.
pub fn y4m_420(width: usize, height: usize, fps: u32, frames: usize) -> Vec<u8> {
    let luma = width * height;
    let chroma = ((width + 1) / 2) * ((height + 1) / 2);

    let mut payload = Vec::with_capacity(frames * (6 + luma + 2 * chroma));
    for i in 0..frames {
        payload.extend_from_slice(b"FRAME\n");
        payload.extend(std::iter::repeat((i % 256) as u8).take(luma));
        payload.extend(std::iter::repeat(128u8).take(2 * chroma));
    }
    y4m_with_header(
        &format!("W{} H{} F{}:1 C420jpeg", width, height, fps),
        &payload,
    )
}

// ============================================================================
// WAVE
// ============================================================================

/// 16-byte `fmt ` body for integer PCM.
fn pcm_fmt(rate: u32, channels: u16, bits: u16) -> Vec<u8> {
    let block_align = channels * bits / 8;
    let mut fmt = Vec::with_capacity(40);
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&channels.to_le_bytes());
    fmt.extend_from_slice(&rate.to_le_bytes());
    fmt.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
    fmt.extend_from_slice(&block_align.to_le_bytes());
    fmt.extend_from_slice(&bits.to_le_bytes());
    fmt
}

fn riff_wave(fmt: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(28 + fmt.len() + data.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((20 + fmt.len() + data.len()) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&(fmt.len() as u32).to_le_bytes());
    out.extend_from_slice(fmt);
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn wav(rate: u32, channels: u16, bits: u16, data: &[u8]) -> Vec<u8> {
    riff_wave(&pcm_fmt(rate, channels, bits), data)
}

fn sawtooth(channels: u16, frames: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(frames * channels as usize * 2);
    for i in 0..frames {
        for c in 0..channels as usize {
            let sample = ((i * 97 + c * 1000) % 65536) as u16 as i16;
            data.extend_from_slice(&sample.to_le_bytes());
        }
    }
    data
}

/// 8-bit PCM; frame `i` of channel `c` holds `(i + 64c) % 256`.
pub fn wav_u8(rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        for c in 0..channels as usize {
            data.push(((i + c * 64) % 256) as u8);
        }
    }
    wav(rate, channels, 8, &data)
}

/// 16-bit PCM sawtooth.
pub fn wav_s16(rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    wav(rate, channels, 16, &sawtooth(channels, frames))
}

/// 16-bit PCM sawtooth in a `WAVE_FORMAT_EXTENSIBLE` header carrying
/// `channel_mask` as its speaker positions.
pub fn wav_extensible(rate: u32, channels: u16, channel_mask: u32, frames: usize) -> Vec<u8> {
    const SUBTYPE_PCM: [u8; 16] = [
        0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38,
        0x9b, 0x71,
    ];
    let mut fmt = pcm_fmt(rate, channels, 16);
    fmt[..2].copy_from_slice(&0xFFFEu16.to_le_bytes());
    fmt.extend_from_slice(&22u16.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());
    fmt.extend_from_slice(&channel_mask.to_le_bytes());
    fmt.extend_from_slice(&SUBTYPE_PCM);
    riff_wave(&fmt, &sawtooth(channels, frames))
}

// ============================================================================
// Matroska
// ============================================================================

/// One EBML element with an 8-byte size field.
pub fn ebml(id: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.push(0x01);
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes()[1..]);
    out.extend_from_slice(payload);
    out
}

fn ebml_uint(id: &[u8], value: u64) -> Vec<u8> {
    ebml(id, &value.to_be_bytes())
}

fn ebml_master(id: &[u8], children: &[Vec<u8>]) -> Vec<u8> {
    ebml(id, &children.concat())
}

pub fn mkv_ebml_header() -> Vec<u8> {
    ebml_master(
        &[0x1A, 0x45, 0xDF, 0xA3],
        &[
            ebml_uint(&[0x42, 0x86], 1),
            ebml_uint(&[0x42, 0xF7], 1),
            ebml(&[0x42, 0x82], b"matroska"),
            ebml_uint(&[0x42, 0x87], 4),
            ebml_uint(&[0x42, 0x85], 2),
        ],
    )
}

/// Single video track (number 1) of `width` x `height`.
///
/// `clusters` holds `(cluster timestamp, [(relative timestamp, keyframe)])`
/// in timestamp-scale ticks. Frame `n` in file order carries four bytes of `n`.
pub fn mkv_video(
    width: u64,
    height: u64,
    timestamp_scale: u64,
    duration: f64,
    clusters: &[(u64, &[(i16, bool)])],
) -> Vec<u8> {
    let info = ebml_master(
        &[0x15, 0x49, 0xA9, 0x66],
        &[
            ebml_uint(&[0x2A, 0xD7, 0xB1], timestamp_scale),
            ebml(&[0x44, 0x89], &duration.to_be_bytes()),
            ebml(&[0x4D, 0x80], b"lvep"),
            ebml(&[0x57, 0x41], b"lvep"),
        ],
    );
    let video = ebml_master(
        &[0xE0],
        &[ebml_uint(&[0xB0], width), ebml_uint(&[0xBA], height)],
    );
    let tracks = ebml_master(
        &[0x16, 0x54, 0xAE, 0x6B],
        &[ebml_master(
            &[0xAE],
            &[
                ebml_uint(&[0xD7], 1),
                ebml_uint(&[0x73, 0xC5], 1),
                ebml_uint(&[0x83], 1),
                ebml(&[0x86], b"V_VP9"),
                video,
            ],
        )],
    );

    let mut body = vec![info, tracks];
    let mut frame = 0u8;
    for (timestamp, blocks) in clusters {
        let mut children = vec![ebml_uint(&[0xE7], *timestamp)];
        for (relative, keyframe) in blocks.iter() {
            let mut block = vec![0x81];
            block.extend_from_slice(&relative.to_be_bytes());
            block.push(if *keyframe { 0x80 } else { 0x00 });
            block.extend_from_slice(&[frame; 4]);
            children.push(ebml(&[0xA3], &block));
            frame = frame.wrapping_add(1);
        }
        body.push(ebml_master(&[0x1F, 0x43, 0xB6, 0x75], &children));
    }

    let mut out = mkv_ebml_header();
    out.extend(ebml_master(&[0x18, 0x53, 0x80, 0x67], &body));
    out
}
