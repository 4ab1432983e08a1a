//! Asynchronous codec state machines.
//!
//! Both traits follow the same life cycle: `configure` → `start` → a polling
//! loop over the input and output queues → `stop`. Dequeue calls wait at
//! most the given timeout and report [`Dequeue::Empty`] instead of failing
//! when nothing is ready.

use std::sync::Arc;
use std::time::Duration;

use crate::{
    BufferInfo, CodecError, Dequeue, EncoderCapabilities, InputBuffer, InputSurface,
    OutputBuffer, SurfaceTexture, TrackFormat,
};

/// Decoder fed compressed samples, rendering frames to a [`SurfaceTexture`].
pub trait HardwareDecoder: Send {
    /// Configure for `format`, sending rendered frames to `surface`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Unsupported` if the format cannot be decoded.
    fn configure(
        &mut self,
        format: &TrackFormat,
        surface: Arc<SurfaceTexture>,
    ) -> Result<(), CodecError>;

    /// Start processing.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` if the decoder is not configured.
    fn start(&mut self) -> Result<(), CodecError>;

    /// Borrow a free input slot, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` if the decoder is not running.
    fn dequeue_input_buffer(&mut self, timeout: Duration)
    -> Result<Option<InputBuffer>, CodecError>;

    /// Return a filled input slot. `info.size` bytes from `info.offset` are
    /// decoded; an end-of-stream flag ends the input.
    ///
    /// # Errors
    ///
    /// Returns an error if the decoder has failed or stopped.
    fn queue_input_buffer(&mut self, buffer: InputBuffer, info: BufferInfo)
    -> Result<(), CodecError>;

    /// Poll for a decoded buffer, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the decoder's error if decoding failed.
    fn dequeue_output_buffer(
        &mut self,
        timeout: Duration,
    ) -> Result<Dequeue<OutputBuffer>, CodecError>;

    /// Current output format.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` before the format is known.
    fn output_format(&self) -> Result<TrackFormat, CodecError>;

    /// Give a buffer back, rendering its frame to the surface if `render`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` if the decoder is not running.
    fn release_output_buffer(&mut self, buffer: OutputBuffer, render: bool)
    -> Result<(), CodecError>;

    /// Stop processing and release worker resources.
    fn stop(&mut self);
}

/// Encoder fed rendered frames through an [`InputSurface`].
pub trait HardwareEncoder: Send {
    /// Size limits, available before configuration.
    fn capabilities(&self) -> EncoderCapabilities;

    /// Configure for `format`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Unsupported` if the format cannot be produced.
    fn configure(&mut self, format: &TrackFormat) -> Result<(), CodecError>;

    /// Create the surface frames are submitted through. Call between
    /// `configure` and `start`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` if not configured or already started.
    fn create_input_surface(&mut self) -> Result<InputSurface, CodecError>;

    /// Start processing.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` if the encoder is not configured.
    fn start(&mut self) -> Result<(), CodecError>;

    /// Poll for an encoded buffer, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the encoder's error if encoding failed.
    fn dequeue_output_buffer(
        &mut self,
        timeout: Duration,
    ) -> Result<Dequeue<OutputBuffer>, CodecError>;

    /// Output format, complete with codec configuration once
    /// [`Dequeue::FormatChanged`] has been reported.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` if not configured.
    fn output_format(&self) -> Result<TrackFormat, CodecError>;

    /// Give an output buffer back.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidState` if the encoder is not running.
    fn release_output_buffer(&mut self, buffer: OutputBuffer) -> Result<(), CodecError>;

    /// No more frames will be submitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder already stopped.
    fn signal_end_of_input_stream(&mut self) -> Result<(), CodecError>;

    /// Stop processing and release worker resources.
    fn stop(&mut self);
}
