//! Codec registry.
//!
//! Maps media types to the frame codecs compiled into this build and wraps
//! them in the asynchronous [`HardwareDecoder`] / [`HardwareEncoder`]
//! state machines.

mod software;

pub use software::{
    DecoderFactory, EncoderFactory, SoftwareCodecConfig, SoftwareDecoder, SoftwareEncoder,
};

use crate::raw::{RawDecoder, RawEncoder};
use crate::{CodecError, HardwareDecoder, HardwareEncoder, TrackFormat, VideoDecoder, VideoEncoder, mime};

/// Default target bitrate when a format does not declare one.
pub const DEFAULT_BIT_RATE: u32 = 2_000_000;
/// Default frame rate when a format does not declare one.
pub const DEFAULT_FRAME_RATE: u32 = 30;
/// Default key frame interval in seconds.
pub const DEFAULT_I_FRAME_INTERVAL: u32 = 15;

/// Media types with a decoder in this build.
#[must_use]
pub fn supported_decoders() -> Vec<&'static str> {
    let mut types = vec![mime::VIDEO_RAW];
    if cfg!(feature = "av1") {
        types.push(mime::VIDEO_AV1);
    }
    types
}

/// Media types with an encoder in this build.
#[must_use]
pub fn supported_encoders() -> Vec<&'static str> {
    supported_decoders()
}

/// Create an unconfigured decoder for `mime`.
///
/// # Errors
///
/// Returns `CodecError::Unsupported` if no decoder handles `mime`.
pub fn create_decoder_by_type(mime: &str) -> Result<Box<dyn HardwareDecoder>, CodecError> {
    if !supported_decoders().contains(&mime) {
        return Err(CodecError::Unsupported(format!("no decoder for {mime}")));
    }
    Ok(Box::new(SoftwareDecoder::new(
        mime,
        SoftwareCodecConfig::default(),
        new_video_decoder,
    )))
}

/// Create an unconfigured encoder for `mime`.
///
/// # Errors
///
/// Returns `CodecError::Unsupported` if no encoder handles `mime`.
pub fn create_encoder_by_type(mime: &str) -> Result<Box<dyn HardwareEncoder>, CodecError> {
    if !supported_encoders().contains(&mime) {
        return Err(CodecError::Unsupported(format!("no encoder for {mime}")));
    }
    Ok(Box::new(SoftwareEncoder::new(
        mime,
        SoftwareCodecConfig::default(),
        new_video_encoder,
    )))
}

fn frame_size(format: &TrackFormat) -> Result<(u32, u32), CodecError> {
    format
        .size()
        .ok_or_else(|| CodecError::InitializationFailed(format!("{} format has no frame size", format.mime)))
}

/// Create the frame decoder for `format`.
///
/// # Errors
///
/// Returns `CodecError::Unsupported` for unknown media types, or
/// `CodecError::InitializationFailed` if the codec cannot be set up.
pub fn new_video_decoder(format: &TrackFormat) -> Result<Box<dyn VideoDecoder>, CodecError> {
    match format.mime.as_str() {
        mime::VIDEO_RAW => {
            let (width, height) = frame_size(format)?;
            Ok(Box::new(RawDecoder::new(width, height)?))
        }
        #[cfg(feature = "av1")]
        mime::VIDEO_AV1 => Ok(Box::new(crate::av1::Av1Decoder::new()?)),
        other => Err(CodecError::Unsupported(format!("no decoder for {other}"))),
    }
}

/// Create the frame encoder for `format`.
///
/// # Errors
///
/// Returns `CodecError::Unsupported` for unknown media types, or
/// `CodecError::InitializationFailed` if the codec cannot be set up.
pub fn new_video_encoder(format: &TrackFormat) -> Result<Box<dyn VideoEncoder>, CodecError> {
    let (width, height) = frame_size(format)?;
    match format.mime.as_str() {
        mime::VIDEO_RAW => Ok(Box::new(RawEncoder::new(width, height)?)),
        #[cfg(feature = "av1")]
        mime::VIDEO_AV1 => {
            let settings = crate::av1::Av1Settings {
                width: width as usize,
                height: height as usize,
                frame_rate: format.frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
                bit_rate: format.bit_rate.unwrap_or(DEFAULT_BIT_RATE),
                key_frame_interval: format.i_frame_interval.unwrap_or(DEFAULT_I_FRAME_INTERVAL),
            };
            Ok(Box::new(crate::av1::Av1Encoder::new(settings)?))
        }
        other => Err(CodecError::Unsupported(format!("no encoder for {other}"))),
    }
}
