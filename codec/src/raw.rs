//! Uncompressed RGBA "codec".
//!
//! Each packet is one tightly packed RGBA frame. Useful wherever a real
//! bitstream is not needed: pipelines that only filter frames, and tests.

use crate::{CodecError, Frame, Packet, PixelFormat, VideoDecoder, VideoEncoder};

/// Packs frames into RGBA packets.
#[derive(Debug, Clone)]
pub struct RawEncoder {
    width: u32,
    height: u32,
}

impl RawEncoder {
    /// Create an encoder for `width` x `height` frames.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InitializationFailed` for an empty frame size.
    pub fn new(width: u32, height: u32) -> Result<Self, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::InitializationFailed(format!(
                "invalid frame size {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }
}

impl VideoEncoder for RawEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Packet>, CodecError> {
        if (frame.width, frame.height) != (self.width, self.height) {
            return Err(CodecError::EncodingFailed(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        Ok(vec![Packet {
            data: frame.to_rgba(),
            timestamp_us: frame.timestamp_us(),
            key_frame: true,
        }])
    }

    fn flush(&mut self) -> Result<Vec<Packet>, CodecError> {
        Ok(Vec::new())
    }
}

/// Unpacks RGBA packets into frames.
#[derive(Debug, Clone)]
pub struct RawDecoder {
    width: u32,
    height: u32,
}

impl RawDecoder {
    /// Create a decoder for `width` x `height` frames.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InitializationFailed` for an empty frame size.
    pub fn new(width: u32, height: u32) -> Result<Self, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::InitializationFailed(format!(
                "invalid frame size {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }
}

impl VideoDecoder for RawDecoder {
    fn decode(&mut self, data: &[u8], timestamp_us: i64) -> Result<Vec<Frame>, CodecError> {
        let expected = PixelFormat::Rgba.frame_size(self.width, self.height);
        if data.len() != expected {
            return Err(CodecError::DecodingFailed(format!(
                "packet holds {} bytes, expected {expected}",
                data.len()
            )));
        }
        let timestamp_ns = Frame::nanos_from_micros(timestamp_us).ok_or_else(|| {
            CodecError::DecodingFailed(format!("timestamp {timestamp_us}us is out of range"))
        })?;
        Ok(vec![Frame::rgba(
            data.to_vec(),
            self.width,
            self.height,
            timestamp_ns,
        )])
    }

    fn flush(&mut self) -> Result<Vec<Frame>, CodecError> {
        Ok(Vec::new())
    }
}
