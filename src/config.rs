use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encoder::{CodecKind, EncoderOptions};

/// Runtime settings of the screencast service.
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScreencastConfig {
    /// Frame rate of the encoder timebase.
    pub fps: u32,
    pub time_scale: u32,
    /// Frames shown longer than 1.5x this are re-encoded at this cadence.
    pub repeat_interval_ms: u64,
    pub codec: CodecKind,
    /// JPEG quality of screencast stills when the request gives none.
    pub default_quality: u8,
    /// Unacknowledged screencast frames allowed per session.
    pub max_frames_in_flight: u32,
    /// Nominal rate asked from capture backends.
    pub capture_fps: u32,
    /// Directory used for relative recording paths.
    pub output_dir: PathBuf,
}

impl Default for ScreencastConfig {
    fn default() -> Self {
        Self {
            fps: 25,
            time_scale: 1000,
            repeat_interval_ms: 1000,
            codec: CodecKind::Vp8,
            default_quality: 90,
            max_frames_in_flight: 1,
            capture_fps: 30,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ScreencastConfig {
    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            fps: self.fps,
            time_scale: self.time_scale,
            repeat_interval: Duration::from_millis(self.repeat_interval_ms.max(1)),
            codec: self.codec,
            viewport: None,
        }
    }

    /// Resolve a recording path against [`ScreencastConfig::output_dir`].
    pub fn resolve_output(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        }
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
