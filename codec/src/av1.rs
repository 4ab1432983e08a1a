//! AV1 software encoding (rav1e) and decoding (dav1d).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rav1e::prelude::*;

use crate::{CodecError, Frame, Packet, PixelFormat, VideoDecoder, VideoEncoder, config_box};

/// Settings for [`Av1Encoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Av1Settings {
    /// Frame width.
    pub width: usize,
    /// Frame height.
    pub height: usize,
    /// Frames per second, used as the time base.
    pub frame_rate: u32,
    /// Target bitrate in bits per second; zero selects constant quality.
    pub bit_rate: u32,
    /// Seconds between key frames.
    pub key_frame_interval: u32,
}

/// AV1 software encoder using rav1e.
pub struct Av1Encoder {
    ctx: Context<u8>,
    width: usize,
    height: usize,
    next_frame: u64,
    timestamps: HashMap<u64, i64>,
    flushed: bool,
}

// rav1e's context is only driven from the thread that owns the encoder.
unsafe impl Send for Av1Encoder {}

impl fmt::Debug for Av1Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Av1Encoder")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("next_frame", &self.next_frame)
            .finish_non_exhaustive()
    }
}

impl Av1Encoder {
    /// Create a new AV1 encoder.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InitializationFailed` if `rav1e` context creation fails.
    pub fn new(settings: Av1Settings) -> Result<Self, CodecError> {
        let frame_rate = u64::from(settings.frame_rate.max(1));
        let cfg = Config::new()
            .with_encoder_config(EncoderConfig {
                width: settings.width,
                height: settings.height,
                bit_depth: 8,
                chroma_sampling: ChromaSampling::Cs420,
                time_base: Rational::new(1, frame_rate),
                max_key_frame_interval: frame_rate * u64::from(settings.key_frame_interval.max(1)),
                bitrate: i32::try_from(settings.bit_rate).unwrap_or(i32::MAX),
                speed_settings: SpeedSettings::from_preset(9),
                ..Default::default()
            })
            .with_threads(4);

        let ctx = cfg
            .new_context()
            .map_err(|e| CodecError::InitializationFailed(e.to_string()))?;

        log::debug!(
            "rav1e encoder {}x{} @ {frame_rate} fps, {} bps",
            settings.width,
            settings.height,
            settings.bit_rate
        );
        Ok(Self {
            ctx,
            width: settings.width,
            height: settings.height,
            next_frame: 0,
            timestamps: HashMap::new(),
            flushed: false,
        })
    }

    fn drain(&mut self) -> Result<Vec<Packet>, CodecError> {
        let mut output = Vec::new();
        loop {
            match self.ctx.receive_packet() {
                Ok(pkt) => {
                    let timestamp_us = self
                        .timestamps
                        .remove(&pkt.input_frameno)
                        .unwrap_or_default();
                    output.push(Packet {
                        data: pkt.data,
                        timestamp_us,
                        key_frame: pkt.frame_type == FrameType::KEY,
                    });
                }
                Err(EncoderStatus::Encoded) => {}
                Err(EncoderStatus::NeedMoreData | EncoderStatus::LimitReached) => break,
                Err(e) => return Err(CodecError::EncodingFailed(e.to_string())),
            }
        }
        Ok(output)
    }
}

impl VideoEncoder for Av1Encoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Packet>, CodecError> {
        if self.flushed {
            return Err(CodecError::InvalidState("encoder already flushed".into()));
        }
        if frame.width as usize != self.width || frame.height as usize != self.height {
            return Err(CodecError::EncodingFailed(format!(
                "Frame size {}x{} doesn't match encoder {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        let expected = frame.format.frame_size(frame.width, frame.height);
        if frame.data.len() < expected {
            return Err(CodecError::EncodingFailed(format!(
                "Frame data size {} is smaller than {expected}",
                frame.data.len()
            )));
        }

        let (y_plane, u_plane, v_plane) = frame.to_i420();
        let mut f = self.ctx.new_frame();
        let uv_width = self.width.div_ceil(2);
        let uv_height = self.height.div_ceil(2);
        copy_plane(&mut f.planes[0], &y_plane, self.width, self.height);
        copy_plane(&mut f.planes[1], &u_plane, uv_width, uv_height);
        copy_plane(&mut f.planes[2], &v_plane, uv_width, uv_height);

        self.timestamps.insert(self.next_frame, frame.timestamp_us());
        self.next_frame += 1;

        self.ctx
            .send_frame(f)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;
        self.drain()
    }

    fn flush(&mut self) -> Result<Vec<Packet>, CodecError> {
        if !self.flushed {
            self.ctx.flush();
            self.flushed = true;
        }
        self.drain()
    }

    fn codec_config(&self) -> Option<Vec<u8>> {
        Some(config_box(b"av1C", &self.ctx.container_sequence_header()))
    }
}

fn copy_plane(plane: &mut Plane<u8>, src: &[u8], width: usize, height: usize) {
    for (row_idx, row) in plane.rows_iter_mut().take(height).enumerate() {
        let start = row_idx * width;
        row[..width].copy_from_slice(&src[start..start + width]);
    }
}

/// AV1 software decoder using dav1d.
pub struct Av1Decoder {
    dec: dav1d::Decoder,
}

// dav1d contexts are only driven from the thread that owns the decoder.
unsafe impl Send for Av1Decoder {}

impl fmt::Debug for Av1Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Av1Decoder").finish_non_exhaustive()
    }
}

impl Av1Decoder {
    /// Create a new AV1 decoder.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InitializationFailed` if `dav1d` initialization fails.
    pub fn new() -> Result<Self, CodecError> {
        let settings = dav1d::Settings::new();
        let dec = dav1d::Decoder::with_settings(&settings)
            .map_err(|e| CodecError::InitializationFailed(format!("dav1d init failed: {e:?}")))?;

        Ok(Self { dec })
    }

    fn collect(&mut self, frames: &mut Vec<Frame>) -> Result<(), CodecError> {
        loop {
            match self.dec.get_picture() {
                Ok(pic) => frames.push(picture_to_frame(&pic)),
                Err(dav1d::Error::Again) => return Ok(()),
                Err(e) => {
                    return Err(CodecError::DecodingFailed(format!(
                        "dav1d get_picture failed: {e:?}"
                    )));
                }
            }
        }
    }
}

fn picture_to_frame(pic: &dav1d::Picture) -> Frame {
    use dav1d::PlanarImageComponent as Component;

    let width = pic.width() as usize;
    let height = pic.height() as usize;
    let uv_width = width.div_ceil(2);
    let uv_height = height.div_ceil(2);
    let mut i420 = Vec::with_capacity(width * height + 2 * uv_width * uv_height);

    for (component, w, h) in [
        (Component::Y, width, height),
        (Component::U, uv_width, uv_height),
        (Component::V, uv_width, uv_height),
    ] {
        let stride = pic.stride(component) as usize;
        let plane = pic.plane(component);
        for row in 0..h {
            let start = row * stride;
            i420.extend_from_slice(&plane[start..start + w]);
        }
    }

    Frame {
        data: Arc::new(i420),
        width: pic.width(),
        height: pic.height(),
        format: PixelFormat::I420,
        timestamp_ns: pic.timestamp().unwrap_or_default().saturating_mul(1000),
    }
}

impl VideoDecoder for Av1Decoder {
    fn decode(&mut self, data: &[u8], timestamp_us: i64) -> Result<Vec<Frame>, CodecError> {
        if Frame::nanos_from_micros(timestamp_us).is_none() {
            return Err(CodecError::DecodingFailed(format!(
                "timestamp {timestamp_us}us is out of range"
            )));
        }
        let mut frames = Vec::new();
        match self.dec.send_data(data.to_vec(), None, Some(timestamp_us), None) {
            Ok(()) => {}
            Err(dav1d::Error::Again) => {
                // Decoder is full: drain pictures, then hand over the rest.
                self.collect(&mut frames)?;
                loop {
                    match self.dec.send_pending_data() {
                        Ok(()) => break,
                        Err(dav1d::Error::Again) => self.collect(&mut frames)?,
                        Err(e) => {
                            return Err(CodecError::DecodingFailed(format!(
                                "dav1d send_pending_data failed: {e:?}"
                            )));
                        }
                    }
                }
            }
            Err(e) => {
                return Err(CodecError::DecodingFailed(format!(
                    "dav1d send_data failed: {e:?}"
                )));
            }
        }

        self.collect(&mut frames)?;
        Ok(frames)
    }

    fn flush(&mut self) -> Result<Vec<Frame>, CodecError> {
        let mut frames = Vec::new();
        self.collect(&mut frames)?;
        Ok(frames)
    }
}
