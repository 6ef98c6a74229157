//! Audio containers through symphonia's format readers.
//!
//! Covers WAV, FLAC, Ogg, MP3, ADTS, ISO-MP4, Matroska audio, AIFF and CAF.
//! Probing here is a cheap magic check; symphonia does the real detection
//! when the reader is opened.

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::codec::CodecId;
use crate::config::LvepConfig;
use crate::error::{LvepError, Result};
use crate::format::{
    Demuxer, InputFormat, MediaKind, Packet, ProbeData, Rational, StreamInfo,
    PROBE_SCORE_EXTENSION, PROBE_SCORE_MAX,
};
use crate::io::IoBridge;

const EXTENSIONS: &[&str] = &[
    "wav", "wave", "flac", "ogg", "oga", "mp3", "mp2", "aac", "m4a", "mp4", "mka", "aif",
    "aiff", "caf",
];

pub struct SymphoniaFormat;

fn magic_score(buf: &[u8]) -> u32 {
    let at = |offset: usize, magic: &[u8]| buf.get(offset..offset + magic.len()) == Some(magic);

    if (at(0, b"RIFF") && at(8, b"WAVE"))
        || at(0, b"fLaC")
        || at(0, b"OggS")
        || (at(0, b"FORM") && (at(8, b"AIFF") || at(8, b"AIFC")))
        || at(0, b"caff")
    {
        return PROBE_SCORE_MAX;
    }
    // Containers that may just as well carry video
    if at(4, b"ftyp") || at(0, &[0x1A, 0x45, 0xDF, 0xA3]) {
        return 90;
    }
    if at(0, b"ID3") {
        return 80;
    }
    match buf {
        // ADTS
        [0xFF, b1, ..] if b1 & 0xF6 == 0xF0 => 50,
        // MPEG audio frame sync
        [0xFF, b1, ..] if b1 & 0xE0 == 0xE0 => 50,
        _ => 0,
    }
}

impl InputFormat for SymphoniaFormat {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn probe(&self, probe: &ProbeData) -> u32 {
        match magic_score(probe.buf) {
            0 if probe.has_extension(EXTENSIONS) => PROBE_SCORE_EXTENSION,
            score => score,
        }
    }

    fn open(&self, io: IoBridge, _config: &LvepConfig) -> Result<Box<dyn Demuxer>> {
        let filename = io.filename().to_string();
        let mut hint = Hint::new();
        if let Some(ext) = io.extension() {
            hint.with_extension(&ext);
        }

        let mss = MediaSourceStream::new(Box::new(io), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LvepError::Open(format!("{}: {}", filename, e)))?;

        Ok(Box::new(SymphoniaDemuxer {
            reader: probed.format,
            streams: Vec::new(),
            track_ids: Vec::new(),
        }))
    }
}

struct SymphoniaDemuxer {
    reader: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
    track_ids: Vec<u32>,
}

impl Demuxer for SymphoniaDemuxer {
    fn format_name(&self) -> &'static str {
        "symphonia"
    }

    fn find_stream_info(&mut self) -> Result<()> {
        let tracks = self.reader.tracks();
        if tracks.is_empty() {
            return Err(LvepError::Metadata("no tracks".into()));
        }

        self.streams = tracks
            .iter()
            .enumerate()
            .map(|(index, track)| {
                let params = &track.codec_params;
                let kind = if params.codec != CODEC_TYPE_NULL {
                    MediaKind::Audio
                } else {
                    MediaKind::Unknown
                };
                let sample_rate = params.sample_rate.unwrap_or(0);
                let time_base = match (params.time_base, sample_rate) {
                    (Some(tb), _) => Rational::new(tb.numer as i64, tb.denom as i64),
                    (None, rate) if rate > 0 => Rational::new(1, rate as i64),
                    _ => Rational::new(0, 1),
                };

                let mut stream = StreamInfo::new(
                    index,
                    kind,
                    CodecId::Symphonia(Box::new(params.clone())),
                    time_base,
                );
                stream.sample_rate = sample_rate;
                stream.channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
                stream.start_time = Some(params.start_ts as i64);
                // n_frames counts sample frames; rescale into the time base
                stream.duration = params.n_frames.and_then(|frames| {
                    let per_tick = sample_rate as i128 * time_base.num as i128;
                    (per_tick > 0)
                        .then(|| (frames as i128 * time_base.den as i128 / per_tick) as i64)
                });
                stream
            })
            .collect();
        self.track_ids = tracks.iter().map(|t| t.id).collect();
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
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None)
                }
                Err(SymphoniaError::ResetRequired) => {
                    tracing::warn!("Track list changed mid-stream, stopping");
                    return Ok(None);
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::warn!("Skipping corrupt packet: {}", msg);
                    continue;
                }
                Err(e) => return Err(LvepError::Demux(e.to_string())),
            };

            let Some(index) = self.track_ids.iter().position(|&id| id == packet.track_id())
            else {
                continue;
            };
            if self.streams[index].discard {
                continue;
            }

            return Ok(Some(Packet {
                stream_index: index,
                pts: Some(packet.ts as i64),
                duration: packet.dur as i64,
                keyframe: true,
                data: packet.data.into_vec(),
            }));
        }
    }

    fn seek(&mut self, stream: usize, ts: i64) -> Result<()> {
        let track_id = self.track_ids.get(stream).copied();
        // Accurate mode guarantees the next packet starts at or before `ts`
        self.reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: ts.max(0) as u64,
                    track_id: track_id.unwrap_or(0),
                },
            )
            .map(|_| ())
            .map_err(|e| LvepError::Demux(format!("seek to {} failed: {}", ts, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FileData;
    use crate::test_support::wav_s16;

    #[test]
    fn test_magic_scores() {
        assert_eq!(magic_score(b"RIFF\x24\x00\x00\x00WAVEfmt "), PROBE_SCORE_MAX);
        assert_eq!(magic_score(b"fLaC\x00\x00\x00\x22"), PROBE_SCORE_MAX);
        assert_eq!(magic_score(b"\x00\x00\x00\x20ftypM4A "), 90);
        assert_eq!(magic_score(b"ID3\x04\x00"), 80);
        assert_eq!(magic_score(&[0xFF, 0xFB, 0x90, 0x00]), 50);
        assert_eq!(magic_score(&[0xFF, 0xF1, 0x50, 0x80]), 50);
        assert_eq!(magic_score(b"RIFF\x24\x00\x00\x00AVI "), 0);
        assert_eq!(magic_score(b""), 0);
    }

    #[test]
    fn test_extension_hint() {
        let probe = ProbeData {
            buf: &[0, 0, 0, 0],
            filename: "theme.ogg",
            extension: Some("ogg"),
        };
        assert_eq!(SymphoniaFormat.probe(&probe), PROBE_SCORE_EXTENSION);
    }

    #[test]
    fn test_wav_stream_info() {
        let io = IoBridge::from_data(&FileData::new("tone.wav", wav_s16(22050, 2, 22050)));
        let mut demuxer = SymphoniaFormat.open(io, &LvepConfig::default()).unwrap();
        demuxer.find_stream_info().unwrap();

        let stream = &demuxer.streams()[0];
        assert_eq!(stream.kind, MediaKind::Audio);
        assert_eq!(stream.sample_rate, 22050);
        assert_eq!(stream.channels, 2);
        assert_eq!(stream.time_base, Rational::new(1, 22050));
        assert_eq!(stream.duration, Some(22050));

        let mut total = 0;
        while let Some(packet) = demuxer.read_packet().unwrap() {
            assert_eq!(packet.stream_index, 0);
            total += packet.data.len();
        }
        assert_eq!(total, 22050 * 2 * 2);
    }
}
