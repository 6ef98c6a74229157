//! Matroska / WebM demuxer backed by `matroska-demuxer`.
//!
//! Block timestamps are counted in the segment's timestamp scale
//! (nanoseconds per tick, 1 ms by default), so each stream's time base is
//! `scale / 1e9` and durations stay in the same ticks.
//!
//! The container's own seek lands on the first block at or after a target.
//! Seeking here needs the keyframe at or before it, so keyframe positions are
//! learned by a second reader that scans ahead of the furthest target so far.

use std::collections::VecDeque;
use std::io::{BufReader, Read, Seek, SeekFrom};

use matroska_demuxer::{DemuxError, Frame, MatroskaFile, TrackEntry, TrackType};

use crate::codec::CodecId;
use crate::config::LvepConfig;
use crate::error::{LvepError, Result};
use crate::format::{
    Demuxer, InputFormat, MediaKind, Packet, ProbeData, Rational, StreamInfo,
    PROBE_SCORE_EXTENSION, PROBE_SCORE_MAX,
};
use crate::io::IoBridge;

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const EBML_HEADER_ID: u32 = 0x1A45_DFA3;
const SEGMENT_ID: u32 = 0x1853_8067;
const CLUSTER_ID: u32 = 0x1F43_B675;
/// Largest EBML header accepted; real ones are a few dozen bytes
const MAX_HEADER_SIZE: u64 = 4096;
const NANOS_PER_SECOND: i64 = 1_000_000_000;

type Reader = MatroskaFile<BufReader<IoBridge>>;

pub struct MatroskaFormat;

impl InputFormat for MatroskaFormat {
    fn name(&self) -> &'static str {
        "matroska"
    }

    fn probe(&self, probe: &ProbeData) -> u32 {
        if probe.buf.starts_with(&EBML_MAGIC) {
            PROBE_SCORE_MAX
        } else if probe.has_extension(&["mkv", "webm", "mka", "mk3d"]) {
            PROBE_SCORE_EXTENSION
        } else {
            0
        }
    }

    fn open(&self, mut io: IoBridge, config: &LvepConfig) -> Result<Box<dyn Demuxer>> {
        let filename = io.filename().to_string();
        check_structure(&mut io)
            .map_err(|reason| LvepError::Open(format!("{}: {}", filename, reason)))?;

        let file = open_reader(io.duplicate()?, config.io_buffer_size)
            .map_err(|e| LvepError::Open(format!("{}: {:?}", filename, e)))?;

        Ok(Box::new(MatroskaDemuxer {
            io,
            buffer_size: config.io_buffer_size,
            file,
            frame: Frame::default(),
            pending: VecDeque::new(),
            streams: Vec::new(),
            track_numbers: Vec::new(),
            keyframes: KeyframeIndex::default(),
        }))
    }
}

fn open_reader(io: IoBridge, buffer_size: usize) -> std::result::Result<Reader, DemuxError> {
    MatroskaFile::open(BufReader::with_capacity(buffer_size, io))
}

fn demux_error(e: DemuxError) -> LvepError {
    LvepError::Demux(format!("{:?}", e))
}

// ============================================================================
// Structure check
// ============================================================================

struct ElementHeader {
    id: u32,
    /// `None` for the reserved "unknown size" value
    size: Option<u64>,
    /// Bytes taken by the id and size fields
    len: u64,
}

fn read_byte<R: Read>(reader: &mut R) -> std::result::Result<u8, String> {
    let mut byte = [0u8; 1];
    reader
        .read_exact(&mut byte)
        .map_err(|e| format!("truncated element header ({})", e))?;
    Ok(byte[0])
}

/// Length of the variable-size integer starting with `first`.
fn vint_length(first: u8, max: usize) -> Option<usize> {
    let len = first.leading_zeros() as usize + 1;
    (len <= max).then_some(len)
}

fn read_element_header<R: Read>(reader: &mut R) -> std::result::Result<ElementHeader, String> {
    let first = read_byte(reader)?;
    let id_len = vint_length(first, 4).ok_or("invalid element id")?;
    let mut id = first as u32;
    for _ in 1..id_len {
        id = id << 8 | read_byte(reader)? as u32;
    }

    let first = read_byte(reader)?;
    let size_len = vint_length(first, 8).ok_or("invalid element size")?;
    let marker_mask = 0xFFu64 >> size_len;
    let mut size = first as u64 & marker_mask;
    let mut unknown = size == marker_mask;
    for _ in 1..size_len {
        let byte = read_byte(reader)?;
        size = size << 8 | byte as u64;
        unknown &= byte == 0xFF;
    }

    Ok(ElementHeader {
        id,
        size: (!unknown).then_some(size),
        len: (id_len + size_len) as u64,
    })
}

/// Walk the EBML header and the segment's leading elements, checking every
/// size is declared and fits in the file. The parser has no bounds checks of
/// its own for these.
fn check_structure<R: Read + Seek>(reader: &mut R) -> std::result::Result<(), String> {
    let io_error = |e: std::io::Error| e.to_string();
    let file_size = reader.seek(SeekFrom::End(0)).map_err(io_error)?;
    reader.seek(SeekFrom::Start(0)).map_err(io_error)?;

    let header = read_element_header(reader)?;
    if header.id != EBML_HEADER_ID {
        return Err("missing EBML header".into());
    }
    let size = header.size.ok_or("EBML header has no size")?;
    if size > MAX_HEADER_SIZE || header.len + size > file_size {
        return Err(format!("EBML header of {} bytes does not fit", size));
    }

    let mut body = vec![0u8; size as usize];
    reader.read_exact(&mut body).map_err(io_error)?;
    let mut cursor = std::io::Cursor::new(body.as_slice());
    while cursor.position() < size {
        let child = read_element_header(&mut cursor)?;
        let child_size = child.size.ok_or("EBML header field has no size")?;
        let end = cursor.position() + child_size;
        if end > size {
            return Err(format!("EBML header field 0x{:X} overruns the header", child.id));
        }
        cursor.set_position(end);
    }

    let segment = read_element_header(reader)?;
    if segment.id != SEGMENT_ID {
        return Err(format!("expected a Segment, found element 0x{:X}", segment.id));
    }
    let mut pos = header.len + size + segment.len;
    let segment_end = segment.size.map_or(file_size, |s| (pos + s).min(file_size));

    // Clusters may be open-ended; everything before the first one may not
    while pos < segment_end {
        let element = read_element_header(reader)?;
        if element.id == CLUSTER_ID {
            break;
        }
        let element_size = element
            .size
            .ok_or_else(|| format!("element 0x{:X} has no size", element.id))?;
        pos += element.len;
        if element_size > file_size - pos.min(file_size) {
            return Err(format!("element 0x{:X} runs past the end of the file", element.id));
        }
        pos += element_size;
        reader.seek(SeekFrom::Start(pos)).map_err(io_error)?;
    }

    reader.seek(SeekFrom::Start(0)).map_err(io_error)?;
    Ok(())
}

// ============================================================================
// Keyframe index
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Keyframe {
    track: u64,
    timestamp: u64,
    /// Frames of any track before this one, in file order
    ordinal: u64,
}

#[derive(Default)]
struct KeyframeIndex {
    scanner: Option<Reader>,
    frame: Frame,
    scanned: u64,
    /// Latest timestamp seen so far
    horizon: Option<u64>,
    exhausted: bool,
    entries: Vec<Keyframe>,
}

impl KeyframeIndex {
    /// Scan until a block stamped after `ts` turns up or the file ends.
    fn extend_to(&mut self, ts: u64, io: &IoBridge, buffer_size: usize) -> Result<()> {
        if self.exhausted || self.horizon.map_or(false, |h| h > ts) {
            return Ok(());
        }
        if self.scanner.is_none() {
            let reader = open_reader(io.duplicate()?, buffer_size).map_err(demux_error)?;
            self.scanner = Some(reader);
        }
        let Some(scanner) = self.scanner.as_mut() else {
            return Ok(());
        };

        loop {
            if !scanner.next_frame(&mut self.frame).map_err(demux_error)? {
                self.exhausted = true;
                break;
            }
            // BlockGroups carry no keyframe flag; treat them as independent
            if self.frame.is_keyframe != Some(false) {
                self.entries.push(Keyframe {
                    track: self.frame.track,
                    timestamp: self.frame.timestamp,
                    ordinal: self.scanned,
                });
            }
            self.scanned += 1;
            let timestamp = self.frame.timestamp;
            self.horizon = Some(self.horizon.map_or(timestamp, |h| h.max(timestamp)));
            if timestamp > ts {
                break;
            }
        }

        if self.exhausted {
            self.scanner = None;
            tracing::debug!(
                "Matroska: indexed {} keyframes in {} frames",
                self.entries.len(),
                self.scanned
            );
        }
        Ok(())
    }

    /// Latest keyframe of `track` at or before `ts`.
    fn lookup(&self, track: u64, ts: u64) -> Option<Keyframe> {
        self.entries
            .iter()
            .filter(|k| k.track == track && k.timestamp <= ts)
            .max_by_key(|k| (k.timestamp, k.ordinal))
            .copied()
    }
}

// ============================================================================
// Demuxer
// ============================================================================

struct MatroskaDemuxer {
    /// Source for the index scanner and for reopening
    io: IoBridge,
    buffer_size: usize,
    file: Reader,
    frame: Frame,
    /// Frames read while positioning, returned before reading on
    pending: VecDeque<Frame>,
    streams: Vec<StreamInfo>,
    /// Matroska track number for each stream index
    track_numbers: Vec<u64>,
    keyframes: KeyframeIndex,
}

fn stream_from_track(index: usize, track: &TrackEntry, time_base: Rational) -> StreamInfo {
    let kind = match track.track_type() {
        TrackType::Video => MediaKind::Video,
        TrackType::Audio => MediaKind::Audio,
        TrackType::Subtitle => MediaKind::Subtitle,
        _ => MediaKind::Unknown,
    };

    let mut stream = StreamInfo::new(
        index,
        kind,
        CodecId::from_matroska(track.codec_id()),
        time_base,
    );
    if let Some(video) = track.video() {
        stream.width = video.pixel_width().get() as u32;
        stream.height = video.pixel_height().get() as u32;
    }
    if let Some(audio) = track.audio() {
        stream.sample_rate = audio.sampling_frequency() as u32;
        stream.channels = audio.channels().get() as u16;
    }
    if let Some(private) = track.codec_private() {
        stream.extradata = private.to_vec();
    }
    stream
}

impl MatroskaDemuxer {
    /// Let the container's seek find `keyframe`. False if it landed elsewhere.
    fn seek_near(&mut self, keyframe: Keyframe) -> Result<bool> {
        self.file.seek(keyframe.timestamp).map_err(demux_error)?;
        loop {
            let mut frame = Frame::default();
            if !self.file.next_frame(&mut frame).map_err(demux_error)? {
                return Ok(false);
            }
            if frame.timestamp != keyframe.timestamp {
                return Ok(false);
            }
            let found = frame.track == keyframe.track;
            self.pending.push_back(frame);
            if found {
                return Ok(true);
            }
        }
    }

    /// Reopen at the first cluster and skip `frames` frames.
    fn restart(&mut self, frames: u64) -> Result<()> {
        self.file = open_reader(self.io.duplicate()?, self.buffer_size).map_err(demux_error)?;
        for _ in 0..frames {
            if !self.file.next_frame(&mut self.frame).map_err(demux_error)? {
                break;
            }
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<bool> {
        if let Some(frame) = self.pending.pop_front() {
            self.frame = frame;
            return Ok(true);
        }
        self.file.next_frame(&mut self.frame).map_err(demux_error)
    }
}

impl Demuxer for MatroskaDemuxer {
    fn format_name(&self) -> &'static str {
        "matroska"
    }

    fn find_stream_info(&mut self) -> Result<()> {
        let tracks = self.file.tracks();
        if tracks.is_empty() {
            return Err(LvepError::Metadata("segment has no tracks".into()));
        }

        let info = self.file.info();
        let scale = info.timestamp_scale().get();
        let time_base = i64::try_from(scale)
            .map(|scale| Rational::new(scale, NANOS_PER_SECOND).reduced())
            .map_err(|_| LvepError::Metadata(format!("timestamp scale {} is too large", scale)))?;
        let duration = info.duration().map(|ticks| ticks.round() as i64);

        self.streams = tracks
            .iter()
            .enumerate()
            .map(|(index, track)| {
                let mut stream = stream_from_track(index, track, time_base);
                stream.start_time = Some(0);
                stream.duration = duration;
                stream
            })
            .collect();
        self.track_numbers = tracks.iter().map(|t| t.track_number().get()).collect();

        tracing::debug!(
            "Matroska: {} tracks, time base {}, duration {:?} ticks",
            self.streams.len(),
            time_base,
            duration
        );
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
        loop {
            if !self.next_frame()? {
                return Ok(None);
            }

            let Some(index) = self
                .track_numbers
                .iter()
                .position(|&n| n == self.frame.track)
            else {
                continue;
            };
            if self.streams[index].discard {
                continue;
            }

            return Ok(Some(Packet {
                stream_index: index,
                pts: Some(self.frame.timestamp as i64),
                duration: self.frame.duration.map_or(0, |d| d as i64),
                keyframe: self.frame.is_keyframe != Some(false),
                data: std::mem::take(&mut self.frame.data),
            }));
        }
    }

    fn seek(&mut self, stream: usize, ts: i64) -> Result<()> {
        let track = *self
            .track_numbers
            .get(stream)
            .ok_or_else(|| LvepError::Demux(format!("no stream {}", stream)))?;
        let target = ts.max(0) as u64;

        self.keyframes.extend_to(target, &self.io, self.buffer_size)?;
        self.pending.clear();

        let Some(keyframe) = self.keyframes.lookup(track, target) else {
            // Nothing to decode before the target: play from the top
            return self.restart(0);
        };
        if !self.seek_near(keyframe)? {
            tracing::debug!(
                "Matroska: seek to {} missed keyframe at {}, rescanning",
                target,
                keyframe.timestamp
            );
            self.pending.clear();
            self.restart(keyframe.ordinal)?;
        }
        Ok(())
    }
}
