use base64::{Engine, engine::general_purpose::STANDARD};
use image::imageops::{self, FilterType};
use serde::Serialize;

use super::EncoderError;
use super::codec::encode_jpeg;
use crate::capture::yuv_convert::{CropRegion, fit_within, i420_to_rgb, rgba_to_rgb};
use crate::capture::{CapturedFrame, Margin};

/// One still frame ready to be sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFrame {
    /// Base64 encoded JPEG.
    pub data: String,
    /// Size of the visible page area before scaling.
    pub device_width: u32,
    pub device_height: u32,
}

/// Crops, scales and JPEG-encodes frames for the screencast (still) mode.
#[derive(Debug, Clone)]
pub struct SnapshotEncoder {
    max_width: u32,
    max_height: u32,
    quality: u8,
    margin: Margin,
    viewport: Option<(u32, u32)>,
}

impl SnapshotEncoder {
    pub fn new(
        max_width: u32,
        max_height: u32,
        quality: u8,
        margin: Margin,
        viewport: Option<(u32, u32)>,
    ) -> Self {
        Self {
            max_width,
            max_height,
            quality,
            margin,
            viewport,
        }
    }

    /// Encode `frame`, or `None` when the margins leave nothing visible.
    pub fn encode(&self, frame: &CapturedFrame) -> Result<Option<SnapshotFrame>, EncoderError> {
        let Some(region) = CropRegion::from_margin(
            frame.width(),
            frame.height(),
            self.margin,
            self.viewport,
            false,
        ) else {
            return Ok(None);
        };

        let mut rgb = match frame {
            CapturedFrame::Yuv(buffer) => i420_to_rgb(buffer.planes(), region),
            CapturedFrame::Raw(buffer) => rgba_to_rgb(buffer, region),
        };

        let (width, height) = fit_within(
            (region.width, region.height),
            (self.max_width.max(1), self.max_height.max(1)),
        );
        if (width, height) != (region.width, region.height) {
            rgb = imageops::resize(&rgb, width, height, FilterType::Triangle);
        }

        let jpeg = encode_jpeg(&rgb, self.quality)?;
        Ok(Some(SnapshotFrame {
            data: STANDARD.encode(jpeg),
            device_width: region.width,
            device_height: region.height,
        }))
    }
}
