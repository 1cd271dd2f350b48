//! Video and still-image encoding
//!
//! [`FrameEncoder`] turns captured frames into a WebM file on a
//! dedicated encode thread; [`SnapshotEncoder`] produces base64 JPEG
//! stills for the screencast mode.

pub mod codec;
pub mod ffmpeg;
pub mod screencast;
pub mod snapshot;

use std::path::PathBuf;
use thiserror::Error;

use crate::container::ContainerError;

pub use codec::CodecKind;
pub use ffmpeg::VpxCodec;
pub use screencast::{EncoderOptions, EncoderState, EncoderSummary, FrameEncoder};
pub use snapshot::{SnapshotEncoder, SnapshotFrame};

/// Rational time unit of encoder timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Convert a count of units to nanoseconds.
    pub fn to_nanos(self, units: i64) -> i64 {
        let den = self.den.max(1) as i128;
        (units as i128 * self.num as i128 * 1_000_000_000 / den) as i64
    }

    /// Number of whole units in `duration`.
    pub fn units(self, duration: std::time::Duration) -> i64 {
        let num = self.num.max(1) as u128 * 1_000_000_000;
        (duration.as_nanos() * self.den as u128 / num) as i64
    }
}

/// One compressed frame and how long it stays on screen.
pub struct Packet {
    inner: ac_ffmpeg::packet::Packet,
    /// In encoder timebase units.
    pub duration: i64,
}

impl Packet {
    pub fn new(inner: ac_ffmpeg::packet::Packet, duration: i64) -> Self {
        Self { inner, duration }
    }

    /// Presentation timestamp in encoder timebase units.
    pub fn pts(&self) -> i64 {
        self.inner.pts().timestamp()
    }

    pub fn is_key(&self) -> bool {
        self.inner.is_key()
    }

    pub fn into_inner(self) -> ac_ffmpeg::packet::Packet {
        self.inner
    }
}

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("Invalid encoder dimensions {width}x{height}: width and height must be positive and even")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Failed to open file '{}' for writing: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("JPEG encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoder is closed")]
    Closed,
}
