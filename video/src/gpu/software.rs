//! CPU render context.

use transkit_codec::{Frame, InputSurface};

use super::matrix::{self, Mat4};
use super::{FrameFilter, RenderContext, nothing_drawn};
use crate::VideoError;

const CLEAR: [u8; 4] = [0, 0, 0, 255];

/// Renders the [`FrameFilter`] on the CPU with nearest sampling.
///
/// Used when no GPU adapter is available. The geometry transform must be a
/// 2D affine one (the quad lies on the z = 0 plane).
#[derive(Debug)]
pub struct SoftwareContext {
    output: InputSurface,
    width: u32,
    height: u32,
    filter: FrameFilter,
    inverse_mvp: Mat4,
    back_buffer: Option<Vec<u8>>,
    timestamp_ns: i64,
}

impl SoftwareContext {
    /// Create a context rendering `width` x `height` frames into `output`.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::NotSupported` if the filter's transform cannot be
    /// inverted or the size is zero.
    pub fn new(
        output: InputSurface,
        width: u32,
        height: u32,
        filter: FrameFilter,
    ) -> Result<Self, VideoError> {
        if width == 0 || height == 0 {
            return Err(VideoError::NotSupported(format!(
                "render size {width}x{height}"
            )));
        }
        let inverse_mvp = matrix::inverse(&filter.mvp)
            .ok_or_else(|| VideoError::NotSupported("singular filter transform".into()))?;
        Ok(Self {
            output,
            width,
            height,
            filter,
            inverse_mvp,
            back_buffer: None,
            timestamp_ns: 0,
        })
    }

    /// Texture coordinate for the center of output pixel (`x`, `y`), or
    /// `None` where the quad does not cover it.
    #[allow(clippy::cast_precision_loss)]
    fn uv_at(&self, x: u32, y: u32) -> Option<(f32, f32)> {
        let ndc_x = (x as f32 + 0.5) / self.width as f32 * 2.0 - 1.0;
        let ndc_y = 1.0 - (y as f32 + 0.5) / self.height as f32 * 2.0;
        let [px, py, _, pw] = matrix::transform(&self.inverse_mvp, [ndc_x, ndc_y, 0.0, 1.0]);
        let (px, py) = if pw.abs() > f32::EPSILON {
            (px / pw, py / pw)
        } else {
            (px, py)
        };
        if !(-1.0..=1.0).contains(&px) || !(-1.0..=1.0).contains(&py) {
            return None;
        }
        Some(((px + 1.0) / 2.0, (1.0 - py) / 2.0))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn texel(coord: f32, size: u32) -> usize {
    let max = size.saturating_sub(1) as usize;
    ((coord * size as f32).floor().max(0.0) as usize).min(max)
}

impl RenderContext for SoftwareContext {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn draw(&mut self, frame: &Frame, tex_matrix: &Mat4) -> Result<(), VideoError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(VideoError::InvalidState("empty frame".into()));
        }
        let source = frame.to_rgba();
        let src_width = frame.width as usize;
        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * 4);

        for y in 0..self.height {
            for x in 0..self.width {
                let px = self.uv_at(x, y).map_or(CLEAR, |(u, v)| {
                    let [tu, tv, _, _] = matrix::transform(tex_matrix, [u, v, 0.0, 1.0]);
                    let offset =
                        (texel(tv, frame.height) * src_width + texel(tu, frame.width)) * 4;
                    let mut rgba = [0u8; 4];
                    rgba.copy_from_slice(&source[offset..offset + 4]);
                    self.filter.apply_color(rgba)
                });
                pixels.extend_from_slice(&px);
            }
        }

        self.back_buffer = Some(pixels);
        Ok(())
    }

    fn set_presentation_time(&mut self, timestamp_ns: i64) {
        self.timestamp_ns = timestamp_ns;
    }

    fn swap_buffers(&mut self) -> Result<(), VideoError> {
        let pixels = self.back_buffer.take().ok_or_else(nothing_drawn)?;
        let frame = Frame::rgba(pixels, self.width, self.height, self.timestamp_ns);
        self.output.submit(frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::ColorMatrix;
    use std::time::Duration;
    use transkit_codec::SurfaceEvent;

    fn pixels(frame: &Frame) -> Vec<[u8; 4]> {
        frame
            .data
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect()
    }

    fn source() -> Frame {
        // 2x2: red, green / blue, white
        let data = [
            [255, 0, 0, 255],
            [0, 255, 0, 255],
            [0, 0, 255, 255],
            [255, 255, 255, 255],
        ]
        .concat();
        Frame::rgba(data, 2, 2, 0)
    }

    fn render(filter: FrameFilter, width: u32, height: u32) -> Frame {
        let (surface, events) = InputSurface::channel(2, Duration::from_secs(1));
        let mut context = SoftwareContext::new(surface, width, height, filter).unwrap();
        context.draw(&source(), &matrix::IDENTITY).unwrap();
        context.set_presentation_time(42_000);
        context.swap_buffers().unwrap();
        match events.try_recv().unwrap() {
            SurfaceEvent::Frame(frame) => frame,
            SurfaceEvent::EndOfStream => panic!("unexpected end of stream"),
        }
    }

    #[test]
    fn identity_copies_frame() {
        let frame = render(FrameFilter::default(), 2, 2);
        assert_eq!(frame.timestamp_ns, 42_000);
        assert_eq!(pixels(&frame), pixels(&source()));
    }

    #[test]
    fn mirror_transform_flips_columns() {
        let filter = FrameFilter {
            mvp: matrix::scale(-1.0, 1.0, 1.0),
            ..FrameFilter::default()
        };
        let out = pixels(&render(filter, 2, 2));
        assert_eq!(out[0], [0, 255, 0, 255]);
        assert_eq!(out[1], [255, 0, 0, 255]);
    }

    #[test]
    fn shrunk_quad_leaves_clear_color() {
        let filter = FrameFilter {
            mvp: matrix::scale(0.5, 0.5, 1.0),
            ..FrameFilter::default()
        };
        let out = pixels(&render(filter, 4, 4));
        assert_eq!(out[0], CLEAR);
        assert_eq!(out[5], [255, 0, 0, 255]);
    }

    #[test]
    fn upscales_with_nearest_sampling() {
        let out = pixels(&render(FrameFilter::default(), 4, 4));
        assert_eq!(out[0], [255, 0, 0, 255]);
        assert_eq!(out[1], [255, 0, 0, 255]);
        assert_eq!(out[2], [0, 255, 0, 255]);
        assert_eq!(out[15], [255, 255, 255, 255]);
    }

    #[test]
    fn color_matrix_is_applied() {
        let out = pixels(&render(FrameFilter::with_color(ColorMatrix::invert()), 2, 2));
        assert_eq!(out[0], [0, 255, 255, 255]);
        assert_eq!(out[3], [0, 0, 0, 255]);
    }

    #[test]
    fn swap_without_draw_fails() {
        let (surface, _events) = InputSurface::channel(1, Duration::from_secs(1));
        let mut context = SoftwareContext::new(surface, 2, 2, FrameFilter::default()).unwrap();
        assert!(matches!(
            context.swap_buffers(),
            Err(VideoError::InvalidState(_))
        ));
    }

    #[test]
    fn singular_transform_is_rejected() {
        let (surface, _events) = InputSurface::channel(1, Duration::from_secs(1));
        let filter = FrameFilter {
            mvp: matrix::scale(0.0, 0.0, 1.0),
            ..FrameFilter::default()
        };
        assert!(SoftwareContext::new(surface, 2, 2, filter).is_err());
    }
}
