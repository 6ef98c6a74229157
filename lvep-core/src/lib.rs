//! # LVEP Core
//!
//! Media decoding bridge for a game engine: opens a container through the
//! engine's file objects, decodes one audio or video stream and hands out
//! interleaved 16-bit PCM or planar YUV frames paced to a playback clock.

// ============================================================================
// Foundation
// ============================================================================
pub mod config;
pub mod error;
pub mod io;

// ============================================================================
// Containers and codecs
// ============================================================================
pub mod codec;
pub mod format;
pub mod stream;

// ============================================================================
// Audio
// ============================================================================
pub mod audio;
pub mod resample;

// ============================================================================
// Video
// ============================================================================
pub mod sync;
pub mod video;

// ============================================================================
// Host integration
// ============================================================================
pub mod host;
pub mod info;
pub mod module;

#[cfg(test)]
mod test_support;

pub use audio::AudioDecoder;
pub use config::LvepConfig;
pub use error::{LvepError, Result};
pub use host::{SoundDecoder, VideoSource};
pub use io::{DiskFile, FileData, IoBridge, MediaFile, SharedFile};
pub use module::{open_module, Module, ScriptError, Value};
pub use video::{VideoStream, YuvFrame};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
