//! Bridge configuration.
//!
//! All fields have defaults, so a JSON file only needs the keys it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LvepError, Result};

/// One interleaved 16-bit frame of 7.1 audio
pub const MIN_AUDIO_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LvepConfig {
    /// Read-ahead buffer between the demuxers and the host file
    pub io_buffer_size: usize,
    /// Initial probe window in bytes
    pub probe_size: usize,
    /// Largest probe window before giving up on format detection
    pub max_probe_size: usize,
    /// Size in bytes of the PCM buffer handed to the host on each decode
    pub audio_buffer_size: usize,
    /// Lag (seconds) past which the video scheduler seeks instead of decoding forward
    pub far_seek_threshold: f64,
    /// Lag (seconds) past which the video scheduler fast-forwards by decoding
    pub near_seek_threshold: f64,
    /// Upper bound on frames decoded by a single fast-forward
    pub fine_seek_limit: usize,
}

impl Default for LvepConfig {
    fn default() -> Self {
        Self {
            io_buffer_size: 4096,
            probe_size: 2048,
            max_probe_size: 1 << 20,
            audio_buffer_size: 8192,
            far_seek_threshold: 15.0,
            near_seek_threshold: 0.2,
            fine_seek_limit: 4096,
        }
    }
}

impl LvepConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LvepError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| LvepError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&json)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.io_buffer_size == 0 {
            return Err(LvepError::Config("io_buffer_size must be non-zero".into()));
        }
        if self.probe_size == 0 || self.probe_size > self.max_probe_size {
            return Err(LvepError::Config(format!(
                "probe_size must be in 1..={}",
                self.max_probe_size
            )));
        }
        if self.audio_buffer_size < MIN_AUDIO_BUFFER || self.audio_buffer_size % 2 != 0 {
            return Err(LvepError::Config(format!(
                "audio_buffer_size must be an even byte count of at least {}",
                MIN_AUDIO_BUFFER
            )));
        }
        if !(self.near_seek_threshold >= 0.0) || !(self.far_seek_threshold >= 0.0) {
            return Err(LvepError::Config("seek thresholds must be non-negative".into()));
        }
        if self.near_seek_threshold > self.far_seek_threshold {
            return Err(LvepError::Config(
                "near_seek_threshold must not exceed far_seek_threshold".into(),
            ));
        }
        if self.fine_seek_limit == 0 {
            return Err(LvepError::Config("fine_seek_limit must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = LvepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio_buffer_size, 8192);
        assert_eq!(config.far_seek_threshold, 15.0);
        assert_eq!(config.near_seek_threshold, 0.2);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = LvepConfig::from_json(r#"{ "audio_buffer_size": 4096 }"#).unwrap();
        assert_eq!(config.audio_buffer_size, 4096);
        assert_eq!(config.io_buffer_size, 4096);
        assert_eq!(config.fine_seek_limit, 4096);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let result = LvepConfig::from_json(
            r#"{ "near_seek_threshold": 20.0, "far_seek_threshold": 15.0 }"#,
        );
        assert!(matches!(result, Err(LvepError::Config(_))));
    }

    #[test]
    fn test_rejects_odd_audio_buffer() {
        let config = LvepConfig {
            audio_buffer_size: 8191,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_buffer_below_one_surround_frame() {
        for size in [0, 2, 4, 14] {
            let config = LvepConfig {
                audio_buffer_size: size,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "accepted {}", size);
        }
        let config = LvepConfig {
            audio_buffer_size: MIN_AUDIO_BUFFER,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "fine_seek_limit": 64, "probe_size": 4096 }}"#).unwrap();

        let config = LvepConfig::load(file.path()).unwrap();
        assert_eq!(config.fine_seek_limit, 64);
        assert_eq!(config.probe_size, 4096);
    }

    #[test]
    fn test_load_missing_file() {
        let result = LvepConfig::load("/nonexistent/lvep.json");
        assert!(matches!(result, Err(LvepError::Config(msg)) if msg.contains("nonexistent")));
    }
}
