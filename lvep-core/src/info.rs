//! Container inspection without opening any decoder.

use serde::Serialize;

use crate::config::LvepConfig;
use crate::error::Result;
use crate::format::{MediaKind, Rational, StreamInfo};
use crate::io::IoBridge;
use crate::stream::open_demuxer;

#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub format: &'static str,
    pub filename: String,
    pub streams: Vec<StreamSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    pub time_base: Rational,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
}

impl StreamSummary {
    fn from_info(info: &StreamInfo) -> Self {
        let nonzero_u32 = |v: u32| (v > 0).then_some(v);
        let duration = info
            .duration
            .filter(|_| info.time_base.den != 0)
            .map(|d| d as f64 * info.time_base.num as f64 / info.time_base.den as f64);

        Self {
            index: info.index,
            kind: info.kind,
            codec: info.codec.name(),
            time_base: info.time_base,
            duration,
            width: nonzero_u32(info.width),
            height: nonzero_u32(info.height),
            sample_rate: nonzero_u32(info.sample_rate),
            channels: (info.channels > 0).then_some(info.channels),
        }
    }
}

impl MediaInfo {
    /// Longest declared stream duration.
    pub fn duration(&self) -> Option<f64> {
        self.streams
            .iter()
            .filter_map(|s| s.duration)
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))))
    }

    pub fn first(&self, kind: MediaKind) -> Option<&StreamSummary> {
        self.streams.iter().find(|s| s.kind == kind)
    }
}

/// Probe and read stream headers of `io`.
pub fn inspect(io: IoBridge, config: &LvepConfig) -> Result<MediaInfo> {
    let filename = io.filename().to_string();
    let (demuxer, format) = open_demuxer(io, config)?;
    tracing::debug!(
        "Inspected {} as {} ({} streams)",
        filename,
        format.name(),
        demuxer.streams().len()
    );

    Ok(MediaInfo {
        format: demuxer.format_name(),
        filename,
        streams: demuxer.streams().iter().map(StreamSummary::from_info).collect(),
    })
}
