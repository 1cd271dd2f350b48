use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};

/// Video codec of recordings. Both are written into WebM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Vp8,
    Vp9,
}

impl CodecKind {
    pub fn name(self) -> &'static str {
        match self {
            CodecKind::Vp8 => "vp8",
            CodecKind::Vp9 => "vp9",
        }
    }

    /// FFmpeg encoder implementing this codec.
    pub fn encoder_name(self) -> &'static str {
        match self {
            CodecKind::Vp8 => "libvpx",
            CodecKind::Vp9 => "libvpx-vp9",
        }
    }
}

impl std::str::FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vp8" => Ok(CodecKind::Vp8),
            "vp9" => Ok(CodecKind::Vp9),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}

/// Compress an RGB image to baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::with_capacity((image.width() * image.height() / 4) as usize);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(image)?;
    Ok(out)
}
