//! Planar YUV conversion, cropping and scaling on the CPU.

mod converter;
mod planar;

pub use converter::{
    CropRegion, convert_i420, fit_within, i420_to_rgb, rgba_to_i420, rgba_to_rgb,
};
pub use planar::{I420Image, MACROBLOCK_SIZE, NEUTRAL_SAMPLE, Planes};
