use ac_ffmpeg::codec::video::{self, VideoEncoder, VideoFrameMut};
use ac_ffmpeg::codec::{CodecParameters, Encoder};
use ac_ffmpeg::time::{self, Timestamp};
use std::collections::HashMap;

use super::codec::CodecKind;
use super::{EncoderError, Packet, TimeBase};
use crate::capture::yuv_convert::I420Image;

/// libvpx settings for screen content: realtime deadline, no look-ahead and
/// error resilient partitions so a truncated file still decodes.
const VPX_OPTIONS: &[(&str, &str)] = &[
    ("deadline", "realtime"),
    ("cpu-used", "8"),
    ("lag-in-frames", "0"),
    ("auto-alt-ref", "0"),
    ("error-resilient", "default"),
    ("b", "2000000"),
    ("crf", "10"),
    ("g", "250"),
];

/// VP8/VP9 through FFmpeg's libvpx wrappers.
///
/// `encode(None, ..)` flushes buffered frames; an empty result means the
/// encoder holds nothing more.
pub struct VpxCodec {
    encoder: VideoEncoder,
    pixel_format: video::frame::PixelFormat,
    time_base: time::TimeBase,
    width: usize,
    height: usize,
    /// Requested duration of every frame still inside the encoder.
    durations: HashMap<i64, i64>,
    flushed: bool,
}

impl VpxCodec {
    pub fn new(kind: CodecKind, width: u32, height: u32, codec_time_base: TimeBase) -> Result<Self, EncoderError> {
        let (w, h) = (width as usize, height as usize);
        let time_base = time::TimeBase::new(codec_time_base.num as i32, codec_time_base.den as i32);
        let pixel_format = video::frame::get_pixel_format("yuv420p");
        let name = kind.encoder_name();

        let mut builder = VideoEncoder::builder(name)
            .map_err(|e| EncoderError::Codec(format!("{} not available: {}", name, e)))?
            .pixel_format(pixel_format)
            .width(w)
            .height(h)
            .time_base(time_base);
        for (k, v) in VPX_OPTIONS {
            builder = builder.set_option(k, v);
        }
        let encoder = builder
            .build()
            .map_err(|e| EncoderError::Codec(format!("{} failed to initialize: {}", name, e)))?;
        log::info!("Using encoder: {} {}x{}", name, w, h);

        Ok(Self {
            encoder,
            pixel_format,
            time_base,
            width: w,
            height: h,
            durations: HashMap::new(),
            flushed: false,
        })
    }

    /// Stream parameters for the muxer.
    pub fn codec_parameters(&self) -> CodecParameters {
        self.encoder.codec_parameters().into()
    }

    pub fn encode(&mut self, image: Option<&I420Image>, pts: i64, duration: i64) -> Result<Vec<Packet>, EncoderError> {
        match image {
            Some(image) => {
                let mut frame = VideoFrameMut::black(self.pixel_format, self.width, self.height)
                    .with_time_base(self.time_base)
                    .with_pts(Timestamp::new(pts, self.time_base));
                self.write_planes(&mut frame, image);
                self.durations.insert(pts, duration);
                self.encoder
                    .push(frame.freeze())
                    .map_err(|e| EncoderError::Codec(e.to_string()))?;
            }
            None if !self.flushed => {
                self.flushed = true;
                self.encoder
                    .flush()
                    .map_err(|e| EncoderError::Codec(e.to_string()))?;
            }
            None => {}
        }
        self.collect()
    }

    fn write_planes(&self, frame: &mut VideoFrameMut, image: &I420Image) {
        let source = image.planes();
        let chroma_w = self.width.div_ceil(2);
        let chroma_h = self.height.div_ceil(2);
        let layout = [
            (source.y, source.stride_y, self.width, self.height),
            (source.u, source.stride_uv, chroma_w, chroma_h),
            (source.v, source.stride_uv, chroma_w, chroma_h),
        ];

        let mut planes = frame.planes_mut();
        for (index, (data, stride, width, rows)) in layout.into_iter().enumerate() {
            let destination = planes[index].data_mut();
            let line_size = destination.len() / rows;
            let copy_width = width.min(stride).min(line_size);
            for row in 0..rows {
                let src = &data[row * stride..row * stride + copy_width];
                destination[row * line_size..row * line_size + copy_width].copy_from_slice(src);
            }
        }
    }

    fn collect(&mut self) -> Result<Vec<Packet>, EncoderError> {
        let mut out = Vec::new();
        while let Some(packet) = self
            .encoder
            .take()
            .map_err(|e| EncoderError::Codec(e.to_string()))?
        {
            let duration = self.durations.remove(&packet.pts().timestamp()).unwrap_or(1);
            out.push(Packet::new(packet, duration));
        }
        Ok(out)
    }
}
