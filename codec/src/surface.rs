//! Surfaces connecting codecs to the renderer.
//!
//! A [`SurfaceTexture`] receives frames released by a decoder and hands them
//! to the render thread one at a time. An [`InputSurface`] carries rendered
//! frames into an encoder.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;

use crate::{CodecError, Frame, Handler};

type Listener = Arc<dyn Fn() + Send + Sync + 'static>;

/// Decoder output surface.
///
/// Holds at most one unconsumed frame. A frame queued while another is still
/// pending replaces it; the replaced frame is dropped and only counted.
#[derive(Default)]
pub struct SurfaceTexture {
    pending: Mutex<Option<Frame>>,
    current: Mutex<Option<Frame>>,
    listener: Mutex<Option<(Listener, Handler)>>,
    replaced: AtomicU64,
}

impl SurfaceTexture {
    /// Create an empty surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback fired each time a new frame arrives.
    ///
    /// The callback runs on `handler`'s thread, never on the caller's.
    pub fn set_on_frame_available_listener(
        &self,
        listener: impl Fn() + Send + Sync + 'static,
        handler: Handler,
    ) {
        let listener: Listener = Arc::new(listener);
        *self.listener.lock() = Some((listener, handler));
    }

    /// Hand a decoded frame to the surface and notify the listener.
    pub fn queue_frame(&self, frame: Frame) {
        if self.pending.lock().replace(frame).is_some() {
            self.replaced.fetch_add(1, Ordering::Relaxed);
            log::trace!("surface frame replaced before it was consumed");
        }

        if let Some((listener, handler)) = self.listener.lock().as_ref() {
            let listener = listener.clone();
            if !handler.post(move || listener()) {
                log::debug!("frame listener dropped, handler is shutting down");
            }
        }
    }

    /// Latch the most recent frame so it can be drawn.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` if no frame has ever been queued.
    pub fn update_tex_image(&self) -> Result<Frame, CodecError> {
        let mut current = self.current.lock();
        if let Some(frame) = self.pending.lock().take() {
            *current = Some(frame);
        }
        current
            .clone()
            .ok_or_else(|| CodecError::InvalidState("no frame queued on surface".into()))
    }

    /// Texture coordinate transform for the latched frame.
    ///
    /// Frames are stored top-row first, which matches the sampling convention
    /// of the renderers, so this is always the identity.
    #[must_use]
    pub const fn transform_matrix(&self) -> [f32; 16] {
        [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]
    }

    /// Number of frames replaced before they were latched.
    #[must_use]
    pub fn replaced_frames(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SurfaceTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceTexture")
            .field("pending", &self.pending.lock().is_some())
            .field("replaced", &self.replaced_frames())
            .finish_non_exhaustive()
    }
}

/// Event delivered through an [`InputSurface`].
#[derive(Debug, Clone)]
pub enum SurfaceEvent {
    /// A rendered frame to encode.
    Frame(Frame),
    /// No more frames will follow.
    EndOfStream,
}

/// Encoder input surface.
///
/// Producers submit frames; the owning encoder receives them in order.
#[derive(Clone)]
pub struct InputSurface {
    sender: Sender<SurfaceEvent>,
    submit_timeout: Duration,
}

impl InputSurface {
    /// Create a surface with room for `depth` in-flight frames.
    #[must_use]
    pub fn channel(depth: usize, submit_timeout: Duration) -> (Self, Receiver<SurfaceEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(depth.max(1));
        (
            Self {
                sender,
                submit_timeout,
            },
            receiver,
        )
    }

    /// Submit a frame, waiting while the encoder is busy.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` if the encoder has stopped, or
    /// `CodecError::EncodingFailed` if it did not accept the frame in time.
    pub fn submit(&self, frame: Frame) -> Result<(), CodecError> {
        self.send(SurfaceEvent::Frame(frame))
    }

    pub(crate) fn end_of_stream(&self) -> Result<(), CodecError> {
        self.send(SurfaceEvent::EndOfStream)
    }

    fn send(&self, event: SurfaceEvent) -> Result<(), CodecError> {
        match self.sender.send_timeout(event, self.submit_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(CodecError::EncodingFailed(
                "encoder did not accept input in time".into(),
            )),
            Err(SendTimeoutError::Disconnected(_)) => Err(CodecError::InvalidState(
                "encoder input surface is closed".into(),
            )),
        }
    }
}

impl fmt::Debug for InputSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSurface")
            .field("queued", &self.sender.len())
            .finish_non_exhaustive()
    }
}
