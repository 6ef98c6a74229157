//! # Container Formats
//!
//! Format registry, probing and the demuxer interface shared by every
//! container backend.
//!
//! ```text
//! IoBridge ──► probe_input ──► [InputFormat, ...] (best score first)
//!                                   │
//!                                   ▼ open
//!                              Box<dyn Demuxer> ──► Packet
//! ```

pub mod audio;
pub mod matroska;
pub mod y4m;

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};

use crate::codec::CodecId;
use crate::config::LvepConfig;
use crate::error::{LvepError, Result};
use crate::io::IoBridge;

// ============================================================================
// Stream description
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Subtitle,
    Unknown,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Subtitle => "subtitle",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Seconds per tick, as `num / den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Lowest terms, e.g. 1000000/1000000000 becomes 1/1000.
    pub fn reduced(self) -> Self {
        let (mut a, mut b) = (self.num.unsigned_abs(), self.den.unsigned_abs());
        while b != 0 {
            (a, b) = (b, a % b);
        }
        if a <= 1 {
            return self;
        }
        let gcd = a as i64;
        Self::new(self.num / gcd, self.den / gcd)
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Position in container order
    pub index: usize,
    pub kind: MediaKind,
    pub codec: CodecId,
    pub time_base: Rational,
    pub start_time: Option<i64>,
    /// Total duration in `time_base` ticks, when the container declares one
    pub duration: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Codec private data (e.g. avcC record)
    pub extradata: Vec<u8>,
    pub discard: bool,
}

impl StreamInfo {
    pub fn new(index: usize, kind: MediaKind, codec: CodecId, time_base: Rational) -> Self {
        Self {
            index,
            kind,
            codec,
            time_base,
            start_time: None,
            duration: None,
            width: 0,
            height: 0,
            sample_rate: 0,
            channels: 0,
            extradata: Vec::new(),
            discard: false,
        }
    }
}

/// One compressed unit of a single stream.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub duration: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

// ============================================================================
// Format / demuxer interfaces
// ============================================================================

/// The start of the input plus the filename hint.
pub struct ProbeData<'a> {
    pub buf: &'a [u8],
    pub filename: &'a str,
    pub extension: Option<&'a str>,
}

impl ProbeData<'_> {
    pub fn has_extension(&self, candidates: &[&str]) -> bool {
        self.extension
            .map(|ext| candidates.contains(&ext))
            .unwrap_or(false)
    }
}

/// Score for an exact magic match.
pub const PROBE_SCORE_MAX: u32 = 100;
/// Score for a filename extension match alone.
pub const PROBE_SCORE_EXTENSION: u32 = 25;
/// Probing stops growing the window once some format reaches this.
const PROBE_SCORE_CONFIDENT: u32 = 50;

pub trait InputFormat: Sync {
    fn name(&self) -> &'static str;

    /// 0 means "not this format".
    fn probe(&self, probe: &ProbeData) -> u32;

    /// Open the container and read its header. Fails with [`LvepError::Open`].
    fn open(&self, io: IoBridge, config: &LvepConfig) -> Result<Box<dyn Demuxer>>;
}

pub trait Demuxer {
    fn format_name(&self) -> &'static str;

    /// Complete the per-stream parameters. Fails with [`LvepError::Metadata`].
    fn find_stream_info(&mut self) -> Result<()>;

    fn streams(&self) -> &[StreamInfo];

    /// Discarded streams are skipped without being handed out.
    fn set_discard(&mut self, index: usize, discard: bool);

    /// `Ok(None)` at end of stream.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Position so the next packet of `stream` is the keyframe at or before `ts`.
    fn seek(&mut self, stream: usize, ts: i64) -> Result<()>;
}

// ============================================================================
// Registry / probing
// ============================================================================

static FORMATS: [&dyn InputFormat; 3] = [
    &y4m::Y4mFormat,
    &matroska::MatroskaFormat,
    &audio::SymphoniaFormat,
];

pub fn formats() -> &'static [&'static dyn InputFormat] {
    &FORMATS
}

pub fn find_format(name: &str) -> Option<&'static dyn InputFormat> {
    FORMATS.iter().copied().find(|f| f.name() == name)
}

/// Every format that recognises the input, best score first.
///
/// The probe window starts at `probe_size` and doubles up to `max_probe_size`
/// until a format is confident or the input runs out.
pub fn probe_input(
    io: &mut IoBridge,
    config: &LvepConfig,
) -> Result<Vec<(&'static dyn InputFormat, u32)>> {
    let filename = io.filename().to_string();
    let extension = io.extension();
    let mut window = config.probe_size.max(1);
    let mut buf = Vec::new();

    let candidates = loop {
        io.seek(SeekFrom::Start(0))?;
        buf.clear();
        let read = io.by_ref().take(window as u64).read_to_end(&mut buf)?;

        let probe = ProbeData {
            buf: &buf,
            filename: &filename,
            extension: extension.as_deref(),
        };
        let mut scored: Vec<(&'static dyn InputFormat, u32)> = FORMATS
            .iter()
            .map(|f| (*f, f.probe(&probe)))
            .filter(|(_, score)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        let best = scored.first().map(|(_, s)| *s).unwrap_or(0);
        if best >= PROBE_SCORE_CONFIDENT || read < window || window >= config.max_probe_size {
            break scored;
        }
        window = (window * 2).min(config.max_probe_size);
    };

    io.seek(SeekFrom::Start(0))?;

    if candidates.is_empty() {
        return Err(LvepError::Probe(filename));
    }
    for (format, score) in &candidates {
        tracing::debug!("{}: probed as {} (score {})", filename, format.name(), score);
    }
    Ok(candidates)
}

/// Reads into `buf` until it is full or the reader is exhausted.
pub(crate) fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FileData;
    use crate::test_support::{wav_u8, y4m_420};

    fn bridge(name: &str, bytes: Vec<u8>) -> IoBridge {
        IoBridge::from_data(&FileData::new(name, bytes))
    }

    #[test]
    fn test_rational() {
        assert_eq!(Rational::new(1, 25).as_f64(), 0.04);
        assert_eq!(Rational::new(1, 0).as_f64(), 0.0);
        assert_eq!(Rational::new(1, 48000).to_string(), "1/48000");
        assert_eq!(Rational::new(1_000_000, 1_000_000_000).reduced(), Rational::new(1, 1000));
        assert_eq!(Rational::new(100_000, 1_000_000_000).reduced(), Rational::new(1, 10_000));
        assert_eq!(Rational::new(1001, 30000).reduced(), Rational::new(1001, 30000));
        assert_eq!(Rational::new(0, 0).reduced(), Rational::new(0, 0));
    }

    #[test]
    fn test_probe_by_magic() {
        let config = LvepConfig::default();

        let mut io = bridge("clip.bin", y4m_420(16, 16, 25, 2));
        let found = probe_input(&mut io, &config).unwrap();
        assert_eq!(found[0].0.name(), "yuv4mpegpipe");
        assert_eq!(found[0].1, PROBE_SCORE_MAX);

        let mut io = bridge("sound.bin", wav_u8(8000, 1, 800));
        let found = probe_input(&mut io, &config).unwrap();
        assert_eq!(found[0].0.name(), "symphonia");
    }

    #[test]
    fn test_probe_extension_fallback() {
        let config = LvepConfig::default();
        let mut io = bridge("intro.webm", vec![0u8; 64]);
        let found = probe_input(&mut io, &config).unwrap();
        assert_eq!(found[0].0.name(), "matroska");
        assert_eq!(found[0].1, PROBE_SCORE_EXTENSION);
    }

    #[test]
    fn test_probe_unknown() {
        let config = LvepConfig::default();
        let mut io = bridge("noise.bin", vec![0x5a; 10_000]);
        let result = probe_input(&mut io, &config);
        assert!(matches!(result, Err(LvepError::Probe(name)) if name == "noise.bin"));
    }

    #[test]
    fn test_probe_rewinds_input() {
        let config = LvepConfig::default();
        let mut io = bridge("clip.y4m", y4m_420(16, 16, 25, 1));
        probe_input(&mut io, &config).unwrap();
        let mut magic = [0u8; 9];
        io.read_exact(&mut magic).unwrap();
        assert_eq!(&magic, b"YUV4MPEG2");
    }

    #[test]
    fn test_find_format() {
        assert!(find_format("matroska").is_some());
        assert!(find_format("avi").is_none());
        assert_eq!(formats().len(), 3);
    }
}
