/// Macroblock edge used by the video codecs.
pub const MACROBLOCK_SIZE: usize = 16;

/// Value written to every sample before a conversion: mid-gray luma and
/// neutral chroma, so uncovered padding never shows up as a green edge.
pub const NEUTRAL_SAMPLE: u8 = 128;

/// Borrowed view over three I420 planes.
#[derive(Debug, Clone, Copy)]
pub struct Planes<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub stride_y: usize,
    pub stride_uv: usize,
}

/// Encoder-side working image.
///
/// Strides are padded to 16 bytes and rows to a whole number of macroblocks,
/// because codecs read the source image block by block and would otherwise
/// over-read the last row.
#[derive(Debug, Clone)]
pub struct I420Image {
    pub width: u32,
    pub height: u32,
    pub stride_y: usize,
    pub stride_uv: usize,
    pub rows_y: usize,
    pub rows_uv: usize,
    buffer: Vec<u8>,
}

impl I420Image {
    pub fn new(width: u32, height: u32) -> Self {
        let w = width.max(1) as usize;
        let h = height.max(1) as usize;

        let stride_y = align16(w);
        let stride_uv = align16(stride_y >> 1);
        let rows_y = ((h - 1) & !(MACROBLOCK_SIZE - 1)) + MACROBLOCK_SIZE;
        let rows_uv = rows_y >> 1;

        Self {
            width,
            height,
            stride_y,
            stride_uv,
            rows_y,
            rows_uv,
            buffer: vec![NEUTRAL_SAMPLE; stride_y * rows_y + 2 * stride_uv * rows_uv],
        }
    }

    /// Fill the whole buffer, padding included, with [`NEUTRAL_SAMPLE`].
    pub fn reset(&mut self) {
        self.buffer.fill(NEUTRAL_SAMPLE);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn planes(&self) -> Planes<'_> {
        let (y, rest) = self.buffer.split_at(self.stride_y * self.rows_y);
        let (u, v) = rest.split_at(self.stride_uv * self.rows_uv);
        Planes {
            y,
            u,
            v,
            stride_y: self.stride_y,
            stride_uv: self.stride_uv,
        }
    }

    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (y, rest) = self.buffer.split_at_mut(self.stride_y * self.rows_y);
        let (u, v) = rest.split_at_mut(self.stride_uv * self.rows_uv);
        (y, u, v)
    }
}

#[inline]
fn align16(value: usize) -> usize {
    ((value.max(1) - 1) & !15) + 16
}
