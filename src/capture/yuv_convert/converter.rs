//! CPU pixel conversion between packed RGB-family buffers and planar I420,
//! with cropping and uniform downscaling.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use super::planar::{I420Image, Planes};
use crate::capture::{I420Buffer, Margin, RgbaBuffer, chroma_len};

/// Source rectangle left after applying the crop margins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Compute the visible region of a `src_width` x `src_height` frame.
    ///
    /// With `even_offsets` the top and left offsets are rounded up to an even
    /// value: a chroma sample covers a 2x2 luma block, so an odd shift would
    /// pair luma rows with the wrong chroma row. A non-zero viewport clamps
    /// the region size. Returns `None` when nothing is left to show.
    pub fn from_margin(
        src_width: u32,
        src_height: u32,
        margin: Margin,
        viewport: Option<(u32, u32)>,
        even_offsets: bool,
    ) -> Option<Self> {
        let (top, left) = if even_offsets {
            (margin.top + (margin.top & 1), margin.left + (margin.left & 1))
        } else {
            (margin.top, margin.left)
        };

        let mut width = src_width.saturating_sub(left.saturating_add(margin.right));
        let mut height = src_height.saturating_sub(top.saturating_add(margin.bottom));

        if let Some((vw, vh)) = viewport {
            if vw > 0 && width > vw {
                width = vw;
            }
            if vh > 0 && height > vh {
                height = vh;
            }
        }

        if width == 0 || height == 0 {
            return None;
        }

        Some(Self {
            left,
            top,
            width,
            height,
        })
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            width,
            height,
        }
    }
}

impl I420Buffer {
    pub fn planes(&self) -> Planes<'_> {
        Planes {
            y: &self.y,
            u: &self.u,
            v: &self.v,
            stride_y: self.stride_y,
            stride_uv: self.stride_uv,
        }
    }
}

/// Size of the largest rectangle with the aspect ratio of `src` that fits
/// into `bounds`. Never upscales.
pub fn fit_within(src: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = (src.0 as f64, src.1 as f64);
    let (max_w, max_h) = (bounds.0 as f64, bounds.1 as f64);
    if src_w <= max_w && src_h <= max_h {
        return src;
    }

    let scale = (max_w / src_w).min(max_h / src_h).min(1.0);
    let dst_w = ((src_w * scale).round() as u32).clamp(1, bounds.0.max(1));
    let dst_h = ((src_h * scale).round() as u32).clamp(1, bounds.1.max(1));
    (dst_w, dst_h)
}

/// Convert the `region` of an I420 source into the padded encoder image.
///
/// The destination is reset to neutral gray first. Sources larger than the
/// destination are scaled down uniformly with a bilinear filter; smaller or
/// equal sources are copied plane by plane.
pub fn convert_i420(src: Planes<'_>, region: CropRegion, dst: &mut I420Image) {
    dst.reset();

    let (dst_w, dst_h) = (dst.width, dst.height);
    let (stride_y, stride_uv) = (dst.stride_y, dst.stride_uv);
    let (y, u, v) = dst.planes_mut();

    let (cx, cy) = (region.left / 2, region.top / 2);
    let (cw, ch) = (chroma_len(region.width) as u32, chroma_len(region.height) as u32);

    if region.width > dst_w || region.height > dst_h {
        let (out_w, out_h) = fit_within((region.width, region.height), (dst_w, dst_h));
        let (out_cw, out_ch) = (chroma_len(out_w) as u32, chroma_len(out_h) as u32);

        scale_plane(
            src.y,
            src.stride_y,
            (region.left, region.top, region.width, region.height),
            y,
            stride_y,
            (out_w, out_h),
        );
        scale_plane(src.u, src.stride_uv, (cx, cy, cw, ch), u, stride_uv, (out_cw, out_ch));
        scale_plane(src.v, src.stride_uv, (cx, cy, cw, ch), v, stride_uv, (out_cw, out_ch));
    } else {
        let width = dst_w.min(region.width);
        let height = dst_h.min(region.height);
        let (copy_cw, copy_ch) = (chroma_len(width) as u32, chroma_len(height) as u32);

        copy_plane(
            src.y,
            src.stride_y,
            (region.left, region.top, width, height),
            y,
            stride_y,
        );
        copy_plane(src.u, src.stride_uv, (cx, cy, copy_cw, copy_ch), u, stride_uv);
        copy_plane(src.v, src.stride_uv, (cx, cy, copy_cw, copy_ch), v, stride_uv);
    }
}

/// Copy a `(x, y, w, h)` window of a plane row by row.
///
/// Rows or columns that fall outside either buffer are skipped.
fn copy_plane(
    source: &[u8],
    stride: usize,
    (x, y, w, h): (u32, u32, u32, u32),
    destination: &mut [u8],
    dst_stride: usize,
) {
    let (x, y) = (x as usize, y as usize);
    let copy_width = (w as usize).min(dst_stride).min(stride.saturating_sub(x));
    if copy_width == 0 {
        return;
    }

    for row in 0..h as usize {
        let src_start = (y + row) * stride + x;
        let dst_start = row * dst_stride;
        if src_start + copy_width > source.len() || dst_start + copy_width > destination.len() {
            break;
        }
        destination[dst_start..dst_start + copy_width]
            .copy_from_slice(&source[src_start..src_start + copy_width]);
    }
}

/// Bilinear resample of a plane window into the top-left corner of `destination`.
fn scale_plane(
    source: &[u8],
    stride: usize,
    window: (u32, u32, u32, u32),
    destination: &mut [u8],
    dst_stride: usize,
    (out_w, out_h): (u32, u32),
) {
    let (_, _, w, h) = window;
    if w == 0 || h == 0 || out_w == 0 || out_h == 0 {
        return;
    }

    let mut plane = GrayImage::new(w, h);
    copy_plane(source, stride, window, &mut plane, w as usize);

    let scaled = imageops::resize(&plane, out_w, out_h, FilterType::Triangle);
    copy_plane(
        scaled.as_raw(),
        out_w as usize,
        (0, 0, out_w, out_h),
        destination,
        dst_stride,
    );
}

// ── Packed RGB family ───────────────────────────────────────────

/// BT.601 limited-range RGB to Y.
#[inline]
fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8
}

#[inline]
fn rgb_to_u(r: i32, g: i32, b: i32) -> u8 {
    (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8
}

#[inline]
fn rgb_to_v(r: i32, g: i32, b: i32) -> u8 {
    (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8
}

/// Convert a packed 32-bit buffer to a tightly packed I420 buffer.
///
/// Each chroma sample is computed from the average color of its 2x2 block.
pub fn rgba_to_i420(src: &RgbaBuffer) -> I420Buffer {
    let mut out = I420Buffer::filled(src.width, src.height, 16);
    let (ro, go, bo) = src.format.rgb_offsets();
    let (w, h) = (src.width as usize, src.height as usize);

    let pixel = |x: usize, y: usize| -> (i32, i32, i32) {
        let at = y * src.stride + x * 4;
        match src.data.get(at..at + 4) {
            Some(px) => (px[ro] as i32, px[go] as i32, px[bo] as i32),
            None => (0, 0, 0),
        }
    };

    for y in 0..h {
        for x in 0..w {
            let (r, g, b) = pixel(x, y);
            out.y[y * out.stride_y + x] = rgb_to_y(r, g, b);
        }
    }

    for cy in 0..chroma_len(src.height) {
        for cx in 0..chroma_len(src.width) {
            let (mut r, mut g, mut b, mut n) = (0, 0, 0, 0);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (x, y) = (cx * 2 + dx, cy * 2 + dy);
                if x < w && y < h {
                    let (pr, pg, pb) = pixel(x, y);
                    r += pr;
                    g += pg;
                    b += pb;
                    n += 1;
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            out.u[cy * out.stride_uv + cx] = rgb_to_u(r, g, b);
            out.v[cy * out.stride_uv + cx] = rgb_to_v(r, g, b);
        }
    }

    out
}

/// Convert an I420 region to 8-bit RGB (BT.601 limited range).
pub fn i420_to_rgb(src: Planes<'_>, region: CropRegion) -> RgbImage {
    let clamp = |value: i32| value.clamp(0, 255) as u8;

    RgbImage::from_fn(region.width, region.height, |x, y| {
        let (sx, sy) = ((region.left + x) as usize, (region.top + y) as usize);
        let luma = src.y.get(sy * src.stride_y + sx).copied().unwrap_or(16);
        let chroma_at = (sy / 2) * src.stride_uv + sx / 2;
        let cb = src.u.get(chroma_at).copied().unwrap_or(128);
        let cr = src.v.get(chroma_at).copied().unwrap_or(128);

        let c = luma as i32 - 16;
        let d = cb as i32 - 128;
        let e = cr as i32 - 128;
        image::Rgb([
            clamp((298 * c + 409 * e + 128) >> 8),
            clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
            clamp((298 * c + 516 * d + 128) >> 8),
        ])
    })
}

/// Copy a region of a packed buffer into an RGB image, dropping alpha.
pub fn rgba_to_rgb(src: &RgbaBuffer, region: CropRegion) -> RgbImage {
    let (ro, go, bo) = src.format.rgb_offsets();
    RgbImage::from_fn(region.width, region.height, |x, y| {
        let at = (region.top + y) as usize * src.stride + (region.left + x) as usize * 4;
        match src.data.get(at..at + 4) {
            Some(px) => image::Rgb([px[ro], px[go], px[bo]]),
            None => image::Rgb([0, 0, 0]),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use crate::capture::yuv_convert::NEUTRAL_SAMPLE;

    fn gradient(width: u32, height: u32) -> I420Buffer {
        let mut buffer = I420Buffer::filled(width, height, 0);
        for (i, px) in buffer.y.iter_mut().enumerate() {
            *px = (i % 251) as u8;
        }
        for (i, px) in buffer.u.iter_mut().enumerate() {
            *px = (i % 97) as u8;
        }
        for (i, px) in buffer.v.iter_mut().enumerate() {
            *px = (i % 89) as u8 + 100;
        }
        buffer
    }

    #[test]
    fn test_crop_rounds_offsets_up_to_even() {
        let region = CropRegion::from_margin(100, 80, Margin::new(3, 5, 0, 0), None, true).unwrap();
        assert_eq!((region.top, region.left), (4, 6));
        assert_eq!((region.width, region.height), (94, 76));

        let exact = CropRegion::from_margin(100, 80, Margin::new(3, 5, 0, 0), None, false).unwrap();
        assert_eq!((exact.top, exact.left), (3, 5));
    }

    #[test]
    fn test_crop_applies_viewport_and_right_bottom() {
        let region =
            CropRegion::from_margin(200, 150, Margin::new(10, 0, 4, 6), Some((120, 0)), true).unwrap();
        assert_eq!((region.width, region.height), (120, 134));
    }

    #[test]
    fn test_crop_outside_source_is_rejected() {
        assert!(CropRegion::from_margin(10, 10, Margin::new(11, 0, 0, 0), None, true).is_none());
        assert!(CropRegion::from_margin(10, 10, Margin::new(0, 6, 4, 0), None, true).is_none());
    }

    #[test]
    fn test_identity_conversion_copies_exactly() {
        let src = gradient(40, 30);
        let mut dst = I420Image::new(40, 30);
        convert_i420(src.planes(), CropRegion::full(40, 30), &mut dst);

        let planes = dst.planes();
        for row in 0..30 {
            assert_eq!(
                &planes.y[row * planes.stride_y..row * planes.stride_y + 40],
                &src.y[row * 40..row * 40 + 40]
            );
            // Padding to the right of the picture stays neutral
            assert!(planes.y[row * planes.stride_y + 40..(row + 1) * planes.stride_y]
                .iter()
                .all(|&s| s == NEUTRAL_SAMPLE));
        }
        for row in 0..15 {
            assert_eq!(
                &planes.u[row * planes.stride_uv..row * planes.stride_uv + 20],
                &src.u[row * 20..row * 20 + 20]
            );
            assert_eq!(
                &planes.v[row * planes.stride_uv..row * planes.stride_uv + 20],
                &src.v[row * 20..row * 20 + 20]
            );
        }
        // Rows below the picture stay neutral
        assert!(planes.y[30 * planes.stride_y..].iter().all(|&s| s == NEUTRAL_SAMPLE));
    }

    #[test]
    fn test_cropped_copy_shifts_chroma_with_luma() {
        let src = gradient(40, 30);
        let region = CropRegion::from_margin(40, 30, Margin::new(1, 1, 0, 0), None, true).unwrap();
        let mut dst = I420Image::new(38, 28);
        convert_i420(src.planes(), region, &mut dst);

        let planes = dst.planes();
        assert_eq!(&planes.y[..38], &src.y[2 * 40 + 2..2 * 40 + 40]);
        assert_eq!(&planes.u[..19], &src.u[20 + 1..20 + 20]);
    }

    #[test]
    fn test_smaller_source_leaves_gray_border() {
        let src = I420Buffer::filled(16, 16, 50);
        let mut dst = I420Image::new(32, 32);
        convert_i420(src.planes(), CropRegion::full(16, 16), &mut dst);

        let planes = dst.planes();
        assert_eq!(planes.y[0], 50);
        assert_eq!(planes.y[16], NEUTRAL_SAMPLE);
        assert_eq!(planes.y[20 * planes.stride_y], NEUTRAL_SAMPLE);
    }

    #[test]
    fn test_larger_source_is_downscaled_uniformly() {
        let src = I420Buffer::filled(200, 100, 90);
        let mut dst = I420Image::new(100, 100);
        convert_i420(src.planes(), CropRegion::full(200, 100), &mut dst);

        let planes = dst.planes();
        // 200x100 scaled by 0.5 → 100x50, the lower half stays gray
        assert_eq!(planes.y[0], 90);
        assert_eq!(planes.y[49 * planes.stride_y + 99], 90);
        assert_eq!(planes.y[50 * planes.stride_y], NEUTRAL_SAMPLE);
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within((320, 200), (640, 480)), (320, 200));
        assert_eq!(fit_within((1280, 720), (640, 480)), (640, 360));
        assert_eq!(fit_within((1000, 2000), (500, 500)), (250, 500));
    }

    #[test]
    fn test_rgba_conversion_of_primaries() {
        let white = rgba_to_i420(&RgbaBuffer::solid(4, 4, PixelFormat::Bgra, [255, 255, 255]));
        assert_eq!(white.y[0], 235);
        assert_eq!((white.u[0], white.v[0]), (128, 128));

        let black = rgba_to_i420(&RgbaBuffer::solid(4, 4, PixelFormat::Rgba, [0, 0, 0]));
        assert_eq!(black.y[0], 16);

        let red = rgba_to_i420(&RgbaBuffer::solid(2, 2, PixelFormat::Bgra, [255, 0, 0]));
        assert_eq!(red.y[0], 82);
        assert_eq!(red.v[0], 240);
    }

    #[test]
    fn test_odd_sized_rgba_converts() {
        let buffer = rgba_to_i420(&RgbaBuffer::solid(5, 3, PixelFormat::Rgba, [10, 20, 30]));
        assert_eq!(buffer.u.len(), 3 * 2);
        assert_eq!(buffer.y.len(), 15);
    }

    #[test]
    fn test_yuv_to_rgb_round_trip_is_close() {
        let rgba = RgbaBuffer::solid(8, 8, PixelFormat::Bgra, [200, 100, 50]);
        let yuv = rgba_to_i420(&rgba);
        let rgb = i420_to_rgb(yuv.planes(), CropRegion::full(8, 8));
        let px = rgb.get_pixel(3, 3).0;
        for (got, want) in px.iter().zip([200u8, 100, 50]) {
            assert!((*got as i32 - want as i32).abs() <= 3, "{:?}", px);
        }
    }

    #[test]
    fn test_rgba_region_swizzles_channels() {
        let rgba = RgbaBuffer::solid(6, 6, PixelFormat::Bgra, [1, 2, 3]);
        let rgb = rgba_to_rgb(&rgba, CropRegion::from_margin(6, 6, Margin::new(1, 1, 1, 1), None, false).unwrap());
        assert_eq!(rgb.dimensions(), (4, 4));
        assert_eq!(rgb.get_pixel(0, 0).0, [1, 2, 3]);
    }
}
