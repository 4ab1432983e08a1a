//! Media data model and codec state machines.
//!
//! This crate provides the pieces a transcoder needs between a container and
//! a renderer:
//! - **Data model**: [`TrackFormat`], [`BufferInfo`], [`SampleFlags`]
//! - **Codec state machines**: [`HardwareDecoder`] / [`HardwareEncoder`], polled
//!   through [`Dequeue`] with bounded timeouts
//! - **Surfaces**: [`SurfaceTexture`] (decoder output) and [`InputSurface`]
//!   (encoder input), plus the [`HandlerThread`] frame callbacks run on
//! - **Frame codecs**: synchronous [`VideoEncoder`] / [`VideoDecoder`]
//!   implementations, driven on worker threads by [`sys`]
//!
//! It also provides software AV1 support via `rav1e` and `dav1d` behind the
//! `av1` feature.

#![warn(missing_docs)]

mod buffer;
mod format;
mod frame;
mod handler;
mod hardware;
mod surface;

/// Platform-specific implementations.
pub mod sys;

pub mod raw;

#[cfg(feature = "av1")]
pub mod av1;

pub use buffer::{BufferInfo, Dequeue, InputBuffer, OutputBuffer, SampleFlags};
pub use format::{mime, EncoderCapabilities, TrackFormat, COLOR_FORMAT_SURFACE};
pub use frame::{Frame, PixelFormat};
pub use handler::{Handler, HandlerThread};
pub use hardware::{HardwareDecoder, HardwareEncoder};
pub use surface::{InputSurface, SurfaceEvent, SurfaceTexture};

use thiserror::Error;

/// Common error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The codec or format is not supported.
    #[error("unsupported codec or format: {0}")]
    Unsupported(String),
    /// Initialization failed.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// Encoding failed.
    #[error("encoding failed: {0}")]
    EncodingFailed(String),
    /// Decoding failed.
    #[error("decoding failed: {0}")]
    DecodingFailed(String),
    /// The codec was used out of order (e.g. dequeued before `start`).
    #[error("invalid codec state: {0}")]
    InvalidState(String),
    /// An unknown error occurred.
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Supported codec types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    /// H.264 (AVC)
    H264,
    /// H.265 (HEVC)
    H265,
    /// VP8
    Vp8,
    /// VP9
    Vp9,
    /// AV1
    Av1,
    /// Uncompressed RGBA frames.
    Raw,
}

impl CodecType {
    /// Media type string for this codec.
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::H264 => mime::VIDEO_AVC,
            Self::H265 => mime::VIDEO_HEVC,
            Self::Vp8 => mime::VIDEO_VP8,
            Self::Vp9 => mime::VIDEO_VP9,
            Self::Av1 => mime::VIDEO_AV1,
            Self::Raw => mime::VIDEO_RAW,
        }
    }

    /// Look up a codec by media type.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            mime::VIDEO_AVC => Some(Self::H264),
            mime::VIDEO_HEVC => Some(Self::H265),
            mime::VIDEO_VP8 => Some(Self::Vp8),
            mime::VIDEO_VP9 => Some(Self::Vp9),
            mime::VIDEO_AV1 => Some(Self::Av1),
            mime::VIDEO_RAW => Some(Self::Raw),
            _ => None,
        }
    }
}

/// One compressed access unit produced by a [`VideoEncoder`].
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Encoded bytes.
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,
    /// Whether the packet can be decoded on its own.
    pub key_frame: bool,
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.data.len())
            .field("timestamp_us", &self.timestamp_us)
            .field("key_frame", &self.key_frame)
            .finish()
    }
}

/// Generic Video Encoder trait.
///
/// An encoder may buffer frames, so one call to [`encode`](Self::encode) can
/// return zero, one or several packets. [`flush`](Self::flush) drains what is
/// left at end of stream.
pub trait VideoEncoder: Send {
    /// Encode a frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::EncodingFailed` if encoding fails.
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Packet>, CodecError>;

    /// Drain every buffered packet. No frames may be encoded afterwards.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::EncodingFailed` if draining fails.
    fn flush(&mut self) -> Result<Vec<Packet>, CodecError>;

    /// Complete codec configuration box (`avcC`, `av1C`, ...) if the codec
    /// has one.
    fn codec_config(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Generic Video Decoder trait.
pub trait VideoDecoder: Send {
    /// Decode a packet into zero or more frames.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::DecodingFailed` if decoding fails.
    fn decode(&mut self, data: &[u8], timestamp_us: i64) -> Result<Vec<Frame>, CodecError>;

    /// Drain every frame still held by the decoder.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::DecodingFailed` if draining fails.
    fn flush(&mut self) -> Result<Vec<Frame>, CodecError>;
}

/// Wrap a configuration payload into a complete ISO-BMFF box.
#[must_use]
pub fn config_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let size = u32::try_from(8 + payload.len()).unwrap_or(u32::MAX);
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(payload);
    out
}
