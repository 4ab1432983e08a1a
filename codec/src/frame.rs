//! Decoded frames and pixel conversions.

use std::sync::Arc;

/// A single frame of decoded video.
#[derive(Clone)]
pub struct Frame {
    /// Raw data (e.g. RGBA, NV12).
    pub data: Arc<Vec<u8>>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Format of the data.
    pub format: PixelFormat,
    /// Presentation timestamp in nanoseconds.
    pub timestamp_ns: i64,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("timestamp_ns", &self.timestamp_ns)
            .finish_non_exhaustive()
    }
}

/// Pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGBA 8-bit.
    Rgba,
    /// BGRA 8-bit.
    Bgra,
    /// NV12 (YUV 4:2:0 bi-planar).
    Nv12,
    /// I420 (YUV 4:2:0 planar).
    I420,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` image.
    #[must_use]
    pub const fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgba | Self::Bgra => pixels * 4,
            Self::Nv12 | Self::I420 => {
                pixels + 2 * ((width as usize).div_ceil(2) * (height as usize).div_ceil(2))
            }
        }
    }
}

impl Frame {
    /// Wrap an RGBA image.
    #[must_use]
    pub fn rgba(data: Vec<u8>, width: u32, height: u32, timestamp_ns: i64) -> Self {
        Self {
            data: Arc::new(data),
            width,
            height,
            format: PixelFormat::Rgba,
            timestamp_ns,
        }
    }

    /// Presentation timestamp in microseconds.
    #[must_use]
    pub const fn timestamp_us(&self) -> i64 {
        self.timestamp_ns / 1000
    }

    /// Nanosecond timestamp for a microsecond one, or `None` if it does not
    /// fit in an `i64`.
    #[must_use]
    pub const fn nanos_from_micros(timestamp_us: i64) -> Option<i64> {
        timestamp_us.checked_mul(1000)
    }

    /// Convert to tightly packed RGBA.
    #[must_use]
    pub fn to_rgba(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let data = self.data.as_slice();

        match self.format {
            PixelFormat::Rgba => data.to_vec(),
            PixelFormat::Bgra => {
                let mut rgba = data.to_vec();
                for chunk in rgba.chunks_exact_mut(4) {
                    chunk.swap(0, 2);
                }
                rgba
            }
            PixelFormat::I420 | PixelFormat::Nv12 => {
                let uv_width = width.div_ceil(2);
                let y_size = width * height;
                let uv_size = uv_width * height.div_ceil(2);
                let mut rgba = Vec::with_capacity(y_size * 4);

                for row in 0..height {
                    for col in 0..width {
                        let y_val = i32::from(data.get(row * width + col).copied().unwrap_or(0));
                        let uv_idx = (row / 2) * uv_width + col / 2;
                        let (u_val, v_val) = if self.format == PixelFormat::I420 {
                            (
                                data.get(y_size + uv_idx).copied().unwrap_or(128),
                                data.get(y_size + uv_size + uv_idx).copied().unwrap_or(128),
                            )
                        } else {
                            (
                                data.get(y_size + uv_idx * 2).copied().unwrap_or(128),
                                data.get(y_size + uv_idx * 2 + 1).copied().unwrap_or(128),
                            )
                        };
                        let (r, g, b) = yuv_to_rgb(y_val, i32::from(u_val), i32::from(v_val));
                        rgba.extend_from_slice(&[r, g, b, 255]);
                    }
                }
                rgba
            }
        }
    }

    /// Convert to I420 (YUV 4:2:0 planar), returning the Y, U and V planes.
    #[must_use]
    pub fn to_i420(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let width = self.width as usize;
        let height = self.height as usize;

        if self.format == PixelFormat::I420 {
            let y_size = width * height;
            let uv_size = width.div_ceil(2) * height.div_ceil(2);
            let data = self.data.as_slice();
            return (
                data[..y_size].to_vec(),
                data[y_size..y_size + uv_size].to_vec(),
                data[y_size + uv_size..y_size + 2 * uv_size].to_vec(),
            );
        }

        let rgba = self.to_rgba();
        rgba_to_i420(&rgba, width, height)
    }
}

/// BT.601 limited-range YUV to RGB.
const fn yuv_to_rgb(y_val: i32, u_val: i32, v_val: i32) -> (u8, u8, u8) {
    let c = y_val - 16;
    let d = u_val - 128;
    let e = v_val - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn clamp_u8(value: i32) -> u8 {
    if value < 0 {
        0
    } else if value > 255 {
        255
    } else {
        value as u8
    }
}

/// Convert RGBA to I420 (YUV420 planar).
fn rgba_to_i420(rgba: &[u8], width: usize, height: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let y_size = width * height;
    let uv_width = width.div_ceil(2);
    let uv_size = uv_width * height.div_ceil(2);

    let mut y_plane = vec![0u8; y_size];
    let mut u_plane = vec![128u8; uv_size];
    let mut v_plane = vec![128u8; uv_size];

    for row_idx in 0..height {
        for col_idx in 0..width {
            let px_idx = (row_idx * width + col_idx) * 4;
            let r_val = i32::from(rgba[px_idx]);
            let g_val = i32::from(rgba[px_idx + 1]);
            let b_val = i32::from(rgba[px_idx + 2]);

            // BT.601 RGB to YUV conversion
            let y_val = ((66 * r_val + 129 * g_val + 25 * b_val + 128) >> 8) + 16;
            y_plane[row_idx * width + col_idx] = clamp_u8(y_val);

            // Subsample U and V (every 2x2 block)
            if row_idx % 2 == 0 && col_idx % 2 == 0 {
                let u_val = ((-38 * r_val - 74 * g_val + 112 * b_val + 128) >> 8) + 128;
                let v_val = ((112 * r_val - 94 * g_val - 18 * b_val + 128) >> 8) + 128;

                let uv_idx = (row_idx / 2) * uv_width + col_idx / 2;
                u_plane[uv_idx] = clamp_u8(u_val);
                v_plane[uv_idx] = clamp_u8(v_val);
            }
        }
    }

    (y_plane, u_plane, v_plane)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_conversion_detects_overflow() {
        assert_eq!(Frame::nanos_from_micros(33_333), Some(33_333_000));
        assert_eq!(Frame::nanos_from_micros(-5), Some(-5_000));
        assert_eq!(Frame::nanos_from_micros(i64::MAX / 100), None);
    }

    #[test]
    fn bgra_swaps_channels() {
        let frame = Frame {
            data: Arc::new(vec![1, 2, 3, 4]),
            width: 1,
            height: 1,
            format: PixelFormat::Bgra,
            timestamp_ns: 0,
        };
        assert_eq!(frame.to_rgba(), vec![3, 2, 1, 4]);
    }

    #[test]
    fn gray_survives_yuv_round_trip() {
        let rgba: Vec<u8> = [128u8, 128, 128, 255].repeat(4);
        let frame = Frame::rgba(rgba, 2, 2, 0);
        let (y, u, v) = frame.to_i420();
        let mut i420 = y;
        i420.extend(u);
        i420.extend(v);

        let back = Frame {
            data: Arc::new(i420),
            width: 2,
            height: 2,
            format: PixelFormat::I420,
            timestamp_ns: 0,
        }
        .to_rgba();
        for px in back.chunks_exact(4) {
            for &channel in &px[..3] {
                assert!((i32::from(channel) - 128).abs() <= 2, "channel {channel}");
            }
        }
    }

    #[test]
    fn frame_size_covers_chroma() {
        assert_eq!(PixelFormat::I420.frame_size(4, 4), 24);
        assert_eq!(PixelFormat::Rgba.frame_size(4, 4), 64);
    }
}
