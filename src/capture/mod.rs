//! Window capture module
//!
//! Frame sources deliver either planar I420 buffers or packed 32-bit buffers
//! on their own capture thread. Sources are shared per window through the
//! [`CapturerPool`], and every subscriber receives the same [`CapturedFrame`].

pub mod capturer;
pub mod generic;
mod traits;
pub mod yuv_convert;

use std::sync::Arc;

pub use capturer::{CapturerPool, SharedCapturer};
pub use generic::{SyntheticSource, SyntheticWindow};
pub use traits::{CaptureCapability, FrameSink, FrameSource, HostWindow, WindowId};

/// Planar YUV 4:2:0 buffer as produced by the compositor.
///
/// Chroma planes are `(width + 1) / 2` by `(height + 1) / 2` samples.
#[derive(Debug, Clone)]
pub struct I420Buffer {
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub stride_y: usize,
    pub stride_uv: usize,
}

impl I420Buffer {
    /// Allocate a tightly packed buffer filled with the given luma and neutral chroma.
    pub fn filled(width: u32, height: u32, luma: u8) -> Self {
        let stride_y = width as usize;
        let stride_uv = chroma_len(width);
        let uv_rows = chroma_len(height);
        Self {
            width,
            height,
            y: vec![luma; stride_y * height as usize],
            u: vec![128; stride_uv * uv_rows],
            v: vec![128; stride_uv * uv_rows],
            stride_y,
            stride_uv,
        }
    }
}

/// Byte order of a packed 32-bit pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Blue, green, red, alpha (the usual compositor layout).
    Bgra,
    /// Red, green, blue, alpha.
    Rgba,
}

impl PixelFormat {
    /// Offsets of the red, green and blue channels inside one pixel.
    #[inline]
    pub fn rgb_offsets(self) -> (usize, usize, usize) {
        match self {
            PixelFormat::Bgra => (2, 1, 0),
            PixelFormat::Rgba => (0, 1, 2),
        }
    }
}

/// Packed 32-bit pixel buffer.
#[derive(Debug, Clone)]
pub struct RgbaBuffer {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RgbaBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width as usize * 4,
            format,
            data,
        }
    }

    /// Buffer where every pixel has the given red, green and blue values.
    pub fn solid(width: u32, height: u32, format: PixelFormat, rgb: [u8; 3]) -> Self {
        let (ro, go, bo) = format.rgb_offsets();
        let mut px = [255u8; 4];
        px[ro] = rgb[0];
        px[go] = rgb[1];
        px[bo] = rgb[2];
        let data = px.repeat(width as usize * height as usize);
        Self::new(width, height, format, data)
    }
}

/// One frame delivered by a [`FrameSource`].
///
/// The buffer is shared so that every session subscribed to the same
/// capturer sees the frame without copying it.
#[derive(Debug, Clone)]
pub enum CapturedFrame {
    Yuv(Arc<I420Buffer>),
    Raw(Arc<RgbaBuffer>),
}

impl CapturedFrame {
    pub fn width(&self) -> u32 {
        match self {
            CapturedFrame::Yuv(b) => b.width,
            CapturedFrame::Raw(b) => b.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            CapturedFrame::Yuv(b) => b.height,
            CapturedFrame::Raw(b) => b.height,
        }
    }
}

/// Pixels to cut from each side of a captured frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Margin {
    pub top: u32,
    pub left: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Margin {
    pub fn new(top: u32, left: u32, right: u32, bottom: u32) -> Self {
        Self {
            top,
            left,
            right,
            bottom,
        }
    }
}

#[inline]
pub(crate) fn chroma_len(luma_len: u32) -> usize {
    luma_len.div_ceil(2) as usize
}
