//! Error types for the decoding bridge.
//!
//! Construction-time failures are fatal to the object being built and carry one
//! of the kinds below. Steady-state failures (a bad packet, a failed resample)
//! are logged and degrade output instead of surfacing here.

use thiserror::Error;

use crate::format::MediaKind;

#[derive(Debug, Error)]
pub enum LvepError {
    #[error("Could not open input: {0}")]
    Open(String),
    #[error("Could not probe format of {0}")]
    Probe(String),
    #[error("Could not find stream information: {0}")]
    Metadata(String),
    #[error("File does not contain a stream of type {0}")]
    NoStream(MediaKind),
    #[error("Could not open {codec} decoder: {reason}")]
    Codec { codec: String, reason: String },
    #[error("No first frame")]
    NoFirstFrame,
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("Demux error: {0}")]
    Demux(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LvepError {
    pub fn codec(codec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Codec {
            codec: codec.into(),
            reason: reason.into(),
        }
    }

    /// How far a stream construction got before failing. Used to pick the most
    /// informative error when several candidate formats all fail.
    pub(crate) fn stage(&self) -> u8 {
        match self {
            Self::Probe(_) => 0,
            Self::Io(_) | Self::Open(_) => 1,
            Self::Metadata(_) => 2,
            Self::NoStream(_) => 3,
            Self::Codec { .. } => 4,
            Self::NoFirstFrame => 5,
            Self::Unsupported(_) | Self::Demux(_) | Self::Config(_) => 6,
        }
    }
}

pub type Result<T> = std::result::Result<T, LvepError>;
