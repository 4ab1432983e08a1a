//! Frame rendering between the decoder surface and the encoder input.
//!
//! A [`RenderContext`] draws the latched decoder frame through a
//! [`FrameFilter`] and hands the result to the encoder's input surface.
//! [`GpuContext`] does this with wgpu; [`SoftwareContext`] runs the same math
//! on the CPU.

mod context;
mod filter;
pub mod matrix;
mod software;

pub use context::{GpuContext, GpuDisplay};
pub use filter::{ColorMatrix, FrameFilter};
pub use matrix::Mat4;
pub use software::SoftwareContext;

use transkit_codec::Frame;

use crate::VideoError;

/// Target that filtered frames are drawn into.
///
/// One frame is presented per `draw` / `set_presentation_time` /
/// `swap_buffers` sequence.
pub trait RenderContext {
    /// Output size in pixels.
    fn size(&self) -> (u32, u32);

    /// Draw `frame`, sampled through `tex_matrix`, into the back buffer.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::Gpu` if the draw cannot be submitted.
    fn draw(&mut self, frame: &Frame, tex_matrix: &Mat4) -> Result<(), VideoError>;

    /// Timestamp stamped on the next presented frame, in nanoseconds.
    fn set_presentation_time(&mut self, timestamp_ns: i64);

    /// Present the back buffer to the encoder.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::InvalidState` if nothing was drawn, or a codec
    /// error if the encoder does not accept the frame.
    fn swap_buffers(&mut self) -> Result<(), VideoError>;
}

impl<R: RenderContext + ?Sized> RenderContext for Box<R> {
    fn size(&self) -> (u32, u32) {
        (**self).size()
    }

    fn draw(&mut self, frame: &Frame, tex_matrix: &Mat4) -> Result<(), VideoError> {
        (**self).draw(frame, tex_matrix)
    }

    fn set_presentation_time(&mut self, timestamp_ns: i64) {
        (**self).set_presentation_time(timestamp_ns);
    }

    fn swap_buffers(&mut self) -> Result<(), VideoError> {
        (**self).swap_buffers()
    }
}

fn nothing_drawn() -> VideoError {
    VideoError::InvalidState("swap_buffers called before draw".into())
}
