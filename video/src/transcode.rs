//! Decode, filter and re-encode one video track.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use transkit_codec::{
    BufferInfo, COLOR_FORMAT_SURFACE, Dequeue, EncoderCapabilities, Frame, HandlerThread,
    HardwareDecoder, HardwareEncoder, InputSurface, OutputBuffer, SampleFlags, SurfaceTexture,
    TrackFormat, mime, sys,
};

use crate::gpu::{ColorMatrix, FrameFilter, GpuContext, GpuDisplay, RenderContext, SoftwareContext};
use crate::remux::OutputGuard;
use crate::{
    Demuxer, FrameAvailabilityGate, Mp4Demuxer, Mp4Muxer, Muxer, TrackKind, VideoError,
    select_track,
};

/// Progress of a transcode.
///
/// States only move forward, one step per [`PipelineEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PipelineState {
    /// Samples are still being read from the source.
    #[default]
    Extracting,
    /// The source is exhausted; the decoder is draining.
    Decoding,
    /// The decoder reached end of stream; the encoder is draining.
    Encoding,
    /// The encoder reached end of stream.
    Done,
}

/// Events that advance a [`PipelineState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineEvent {
    /// The end-of-stream sample was queued to the decoder.
    InputExhausted,
    /// The decoder produced its end-of-stream buffer.
    DecoderEndOfStream,
    /// The encoder produced its end-of-stream buffer.
    EncoderEndOfStream,
}

impl PipelineState {
    /// Apply `event`.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::InvalidState` if `event` does not follow from the
    /// current state.
    pub fn on(self, event: PipelineEvent) -> Result<Self, VideoError> {
        match (self, event) {
            (Self::Extracting, PipelineEvent::InputExhausted) => Ok(Self::Decoding),
            (Self::Decoding, PipelineEvent::DecoderEndOfStream) => Ok(Self::Encoding),
            (Self::Encoding, PipelineEvent::EncoderEndOfStream) => Ok(Self::Done),
            (state, event) => Err(VideoError::InvalidState(format!(
                "{event:?} while {state:?}"
            ))),
        }
    }

    /// Every source sample has been handed to the decoder.
    #[must_use]
    pub fn input_extracted(self) -> bool {
        self >= Self::Decoding
    }

    /// The decoder has produced its last frame.
    #[must_use]
    pub fn input_decoded(self) -> bool {
        self >= Self::Encoding
    }

    /// The encoder has produced its last sample.
    #[must_use]
    pub fn output_encoded(self) -> bool {
        self == Self::Done
    }
}

fn default_output_mime() -> String {
    if sys::supported_encoders().contains(&mime::VIDEO_AV1) {
        mime::VIDEO_AV1.to_owned()
    } else {
        mime::VIDEO_RAW.to_owned()
    }
}

/// Transcode settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Media type of the output track.
    pub output_mime: String,
    /// Target bitrate in bits per second.
    pub bit_rate: u32,
    /// Seconds between key frames.
    pub i_frame_interval: u32,
    /// Frame rate used when the input does not declare one.
    pub default_frame_rate: u32,
    /// Wait for each codec dequeue.
    pub codec_timeout: Duration,
    /// Wait for each frame availability attempt.
    pub frame_wait_timeout: Duration,
    /// Give up after this many timed-out attempts. `None` waits forever.
    pub frame_wait_attempts: Option<u32>,
    /// Largest source sample accepted.
    pub max_sample_size: usize,
    /// Filter applied to every frame.
    pub filter: FrameFilter,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            output_mime: default_output_mime(),
            bit_rate: sys::DEFAULT_BIT_RATE,
            i_frame_interval: sys::DEFAULT_I_FRAME_INTERVAL,
            default_frame_rate: sys::DEFAULT_FRAME_RATE,
            codec_timeout: Duration::from_millis(10),
            frame_wait_timeout: Duration::from_millis(500),
            frame_wait_attempts: None,
            max_sample_size: 1024 * 1024,
            filter: FrameFilter::with_color(ColorMatrix::grayscale()),
        }
    }
}

impl TranscodeConfig {
    /// Encoder format for `input`, fitted to `capabilities`.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::NotSupported` if `input` has no frame size.
    pub fn output_format(
        &self,
        input: &TrackFormat,
        capabilities: EncoderCapabilities,
    ) -> Result<TrackFormat, VideoError> {
        let (width, height) = input
            .size()
            .ok_or_else(|| VideoError::NotSupported(format!("{} track has no frame size", input.mime)))?;
        let (width, height) = capabilities.fit(width, height);
        Ok(TrackFormat {
            bit_rate: Some(self.bit_rate),
            frame_rate: Some(input.frame_rate.unwrap_or(self.default_frame_rate)),
            i_frame_interval: Some(self.i_frame_interval),
            color_format: Some(COLOR_FORMAT_SURFACE),
            ..TrackFormat::video(self.output_mime.clone(), width, height)
        })
    }
}

/// Where frames are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// GPU when an adapter exists, CPU otherwise.
    #[default]
    Auto,
    /// GPU only.
    Gpu,
    /// CPU only.
    Software,
}

/// Supplies the codecs and render context of a transcode.
pub trait Backend {
    /// Unconfigured decoder for `mime`.
    ///
    /// # Errors
    ///
    /// Returns an error if no decoder handles `mime`.
    fn create_decoder(&self, mime: &str) -> Result<Box<dyn HardwareDecoder>, VideoError>;

    /// Unconfigured encoder for `mime`.
    ///
    /// # Errors
    ///
    /// Returns an error if no encoder handles `mime`.
    fn create_encoder(&self, mime: &str) -> Result<Box<dyn HardwareEncoder>, VideoError>;

    /// Render context drawing `width` x `height` frames into `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be created.
    fn create_render_context(
        &self,
        output: InputSurface,
        width: u32,
        height: u32,
        filter: &FrameFilter,
    ) -> Result<Box<dyn RenderContext>, VideoError>;
}

/// Codecs from [`transkit_codec::sys`] with a configurable renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemBackend {
    /// Renderer selection.
    pub render: RenderMode,
}

impl SystemBackend {
    /// Backend rendering with `render`.
    #[must_use]
    pub const fn new(render: RenderMode) -> Self {
        Self { render }
    }
}

impl Backend for SystemBackend {
    fn create_decoder(&self, mime: &str) -> Result<Box<dyn HardwareDecoder>, VideoError> {
        Ok(sys::create_decoder_by_type(mime)?)
    }

    fn create_encoder(&self, mime: &str) -> Result<Box<dyn HardwareEncoder>, VideoError> {
        Ok(sys::create_encoder_by_type(mime)?)
    }

    fn create_render_context(
        &self,
        output: InputSurface,
        width: u32,
        height: u32,
        filter: &FrameFilter,
    ) -> Result<Box<dyn RenderContext>, VideoError> {
        match self.render {
            RenderMode::Software => Ok(Box::new(SoftwareContext::new(output, width, height, *filter)?)),
            RenderMode::Gpu => Ok(Box::new(GpuContext::new(output, width, height, *filter)?)),
            RenderMode::Auto => match GpuDisplay::acquire() {
                Ok(display) => Ok(Box::new(GpuContext::with_display(
                    display, output, width, height, *filter,
                )?)),
                Err(e) => {
                    log::warn!("{e}, rendering on the CPU");
                    Ok(Box::new(SoftwareContext::new(output, width, height, *filter)?))
                }
            },
        }
    }
}

/// Outcome of a transcode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeStats {
    /// Frames drawn into the encoder.
    pub frames_rendered: u64,
    /// Encoded samples written to the output.
    pub samples_written: u64,
    /// Frame availability signals that arrived before the previous frame was
    /// drawn.
    pub dropped_frames: u64,
    /// Format of the output track.
    pub output_format: Option<TrackFormat>,
}

struct DecoderGuard(Box<dyn HardwareDecoder>);

impl Deref for DecoderGuard {
    type Target = dyn HardwareDecoder;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl DerefMut for DecoderGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl Drop for DecoderGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

struct EncoderGuard(Box<dyn HardwareEncoder>);

impl Deref for EncoderGuard {
    type Target = dyn HardwareEncoder;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl DerefMut for EncoderGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl Drop for EncoderGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Re-encodes the first video track of a source through a [`FrameFilter`].
#[derive(Debug, Clone, Default)]
pub struct Transcoder<B = SystemBackend> {
    config: TranscodeConfig,
    backend: B,
}

impl Transcoder {
    /// Transcoder using the system codecs.
    #[must_use]
    pub fn new(config: TranscodeConfig) -> Self {
        Self {
            config,
            backend: SystemBackend::default(),
        }
    }
}

impl<B: Backend> Transcoder<B> {
    /// Transcoder using `backend`.
    #[must_use]
    pub const fn with_backend(config: TranscodeConfig, backend: B) -> Self {
        Self { config, backend }
    }

    /// Current settings.
    #[must_use]
    pub const fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    /// Transcode the MP4 file at `input` into a new MP4 file at `output`.
    ///
    /// On failure the output file, if created, is incomplete.
    ///
    /// # Errors
    ///
    /// See [`convert_with`](Self::convert_with).
    pub fn convert(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<TranscodeStats, VideoError> {
        let source = Mp4Demuxer::open(input)?;
        self.convert_with(source, || Mp4Muxer::create(output))
    }

    /// Transcode the first video track of `source` into the container
    /// returned by `open`.
    ///
    /// `open` is called only after the track, codecs and render context are
    /// set up. Everything acquired is released on every path.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::NoMatchingTrack` if `source` has no video track,
    /// or the first codec, render, container or frame-wait failure.
    pub fn convert_with<D, M, F>(&self, mut source: D, open: F) -> Result<TranscodeStats, VideoError>
    where
        D: Demuxer,
        M: Muxer,
        F: FnOnce() -> Result<M, VideoError>,
    {
        let input_format = select_track(&mut source, TrackKind::Video)?;
        log::debug!(
            "transcoding {} to {}",
            input_format.mime,
            self.config.output_mime
        );

        let mut encoder = EncoderGuard(self.backend.create_encoder(&self.config.output_mime)?);
        let output_format = self
            .config
            .output_format(&input_format, encoder.capabilities())?;
        encoder.configure(&output_format)?;
        let input_surface = encoder.create_input_surface()?;
        let (width, height) = output_format.size().unwrap_or((1, 1));
        let render = self.backend.create_render_context(
            input_surface,
            width,
            height,
            &self.config.filter,
        )?;

        let surface = Arc::new(SurfaceTexture::new());
        let gate = Arc::new(FrameAvailabilityGate::new());
        let handler = HandlerThread::spawn("transkit-frame-listener")?;
        let listener_gate = Arc::clone(&gate);
        surface.set_on_frame_available_listener(move || listener_gate.signal(), handler.handler());

        let mut decoder = DecoderGuard(self.backend.create_decoder(&input_format.mime)?);
        decoder.configure(&input_format, Arc::clone(&surface))?;

        let output = OutputGuard::new(open()?);
        encoder.start()?;
        decoder.start()?;

        let mut run = Run {
            decoder,
            encoder,
            render,
            _handler: handler,
            surface,
            gate,
            output,
            source,
            config: &self.config,
            track: None,
            deferred: Vec::new(),
            state: PipelineState::default(),
            stats: TranscodeStats::default(),
        };
        run.drive()?;
        run.finish()
    }
}

/// One transcode in progress. Fields drop in release order.
struct Run<'a, D: Demuxer, M: Muxer> {
    decoder: DecoderGuard,
    encoder: EncoderGuard,
    render: Box<dyn RenderContext>,
    _handler: HandlerThread,
    surface: Arc<SurfaceTexture>,
    gate: Arc<FrameAvailabilityGate>,
    output: OutputGuard<M>,
    source: D,
    config: &'a TranscodeConfig,
    track: Option<usize>,
    deferred: Vec<(Vec<u8>, BufferInfo)>,
    state: PipelineState,
    stats: TranscodeStats,
}

impl<D: Demuxer, M: Muxer> Run<'_, D, M> {
    fn advance(&mut self, event: PipelineEvent) -> Result<(), VideoError> {
        self.state = self.state.on(event)?;
        log::debug!("pipeline {:?} after {event:?}", self.state);
        Ok(())
    }

    fn drive(&mut self) -> Result<(), VideoError> {
        while !self.state.output_encoded() {
            if !self.state.input_extracted() {
                self.feed()?;
            }
            self.drain()?;
        }
        Ok(())
    }

    fn feed(&mut self) -> Result<(), VideoError> {
        let Some(mut buffer) = self.decoder.dequeue_input_buffer(self.config.codec_timeout)? else {
            return Ok(());
        };
        let limit = buffer.capacity().min(self.config.max_sample_size);
        match self.source.read_sample_data(&mut buffer.buffer_mut()[..limit])? {
            Some(size) => {
                // End of input is only signalled once the source is exhausted.
                let flags = self.source.sample_flags() - SampleFlags::END_OF_STREAM;
                let time = self.source.sample_time().unwrap_or_default();
                self.decoder
                    .queue_input_buffer(buffer, BufferInfo::new(size, time, flags))?;
                self.source.advance();
            }
            None => {
                self.decoder
                    .queue_input_buffer(buffer, BufferInfo::end_of_stream())?;
                self.advance(PipelineEvent::InputExhausted)?;
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), VideoError> {
        let timeout = self.config.codec_timeout;
        let mut decoder_output_available = !self.state.input_decoded();
        let mut encoder_output_available = true;

        while decoder_output_available || encoder_output_available {
            match self.encoder.dequeue_output_buffer(timeout)? {
                Dequeue::Ready(buffer) => {
                    self.write_encoded(buffer)?;
                    if self.state.output_encoded() {
                        return Ok(());
                    }
                    continue;
                }
                Dequeue::FormatChanged => {
                    self.add_output_track()?;
                    continue;
                }
                Dequeue::Empty => encoder_output_available = false,
            }

            if self.state.input_decoded() {
                decoder_output_available = false;
                continue;
            }
            match self.decoder.dequeue_output_buffer(timeout)? {
                Dequeue::Ready(buffer) => {
                    self.render_decoded(buffer)?;
                    encoder_output_available = true;
                }
                Dequeue::FormatChanged => {
                    log::debug!("decoder output format {:?}", self.decoder.output_format()?);
                }
                Dequeue::Empty => decoder_output_available = false,
            }
        }
        Ok(())
    }

    fn render_decoded(&mut self, buffer: OutputBuffer) -> Result<(), VideoError> {
        let info = *buffer.info();
        let render = info.size != 0;
        self.decoder.release_output_buffer(buffer, render)?;

        if render {
            let timestamp_ns = Frame::nanos_from_micros(info.presentation_time_us).ok_or_else(|| {
                VideoError::InvalidState(format!(
                    "decoded timestamp {}us is out of range",
                    info.presentation_time_us
                ))
            })?;
            self.gate
                .wait(self.config.frame_wait_timeout, self.config.frame_wait_attempts)?;
            let frame = self.surface.update_tex_image()?;
            let tex_matrix = self.surface.transform_matrix();
            self.render.draw(&frame, &tex_matrix)?;
            self.render.set_presentation_time(timestamp_ns);
            self.render.swap_buffers()?;
            self.stats.frames_rendered += 1;
        }

        if info.is_end_of_stream() {
            self.advance(PipelineEvent::DecoderEndOfStream)?;
            self.encoder.signal_end_of_input_stream()?;
        }
        Ok(())
    }

    fn write_encoded(&mut self, buffer: OutputBuffer) -> Result<(), VideoError> {
        let info = *buffer.info();
        if info.is_codec_config() {
            log::debug!("codec config of {} bytes travels in the track format", info.size);
        } else if info.size != 0 {
            match self.track {
                Some(track) => {
                    self.output
                        .muxer
                        .write_sample_data(track, buffer.data(), &info)?;
                    self.stats.samples_written += 1;
                }
                None => self.deferred.push((buffer.data().to_vec(), info)),
            }
        }
        self.encoder.release_output_buffer(buffer)?;

        if info.is_end_of_stream() {
            if self.track.is_none() && !self.deferred.is_empty() {
                return Err(VideoError::InvalidState(
                    "encoder finished without reporting its output format".into(),
                ));
            }
            self.advance(PipelineEvent::EncoderEndOfStream)?;
        }
        Ok(())
    }

    fn add_output_track(&mut self) -> Result<(), VideoError> {
        if self.track.is_some() {
            return Err(VideoError::InvalidState(
                "encoder output format changed twice".into(),
            ));
        }
        let format = self.encoder.output_format()?;
        log::debug!("encoder output format {format:?}");
        let track = self.output.muxer.add_track(&format)?;
        self.output.start()?;
        self.track = Some(track);
        self.stats.output_format = Some(format);

        let deferred = std::mem::take(&mut self.deferred);
        if !deferred.is_empty() {
            log::debug!("writing {} deferred samples", deferred.len());
        }
        for (data, info) in deferred {
            self.output.muxer.write_sample_data(track, &data, &info)?;
            self.stats.samples_written += 1;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<TranscodeStats, VideoError> {
        self.stats.dropped_frames = self.gate.dropped_frames();
        self.output.stop()?;
        log::debug!(
            "transcoded {} frames into {} samples ({} dropped)",
            self.stats.frames_rendered,
            self.stats.samples_written,
            self.stats.dropped_frames
        );
        Ok(std::mem::take(&mut self.stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_advance_in_order() {
        let state = PipelineState::default();
        assert!(!state.input_extracted());

        let state = state.on(PipelineEvent::InputExhausted).unwrap();
        assert!(state.input_extracted());
        assert!(!state.input_decoded());

        let state = state.on(PipelineEvent::DecoderEndOfStream).unwrap();
        assert!(state.input_decoded());
        assert!(!state.output_encoded());

        let state = state.on(PipelineEvent::EncoderEndOfStream).unwrap();
        assert_eq!(state, PipelineState::Done);
        assert!(state.input_extracted() && state.input_decoded() && state.output_encoded());
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        assert!(PipelineState::Extracting
            .on(PipelineEvent::DecoderEndOfStream)
            .is_err());
        assert!(PipelineState::Decoding
            .on(PipelineEvent::EncoderEndOfStream)
            .is_err());
        assert!(PipelineState::Done
            .on(PipelineEvent::InputExhausted)
            .is_err());
    }

    #[test]
    fn output_format_fits_encoder() {
        let config = TranscodeConfig {
            output_mime: mime::VIDEO_RAW.into(),
            ..TranscodeConfig::default()
        };
        let input = TrackFormat::video(mime::VIDEO_AVC, 641, 481).with_frame_rate(24);
        let format = config
            .output_format(&input, EncoderCapabilities::default())
            .unwrap();

        assert_eq!(format.mime, mime::VIDEO_RAW);
        assert_eq!(format.size(), Some((640, 480)));
        assert_eq!(format.frame_rate, Some(24));
        assert_eq!(format.bit_rate, Some(2_000_000));
        assert_eq!(format.i_frame_interval, Some(15));
        assert_eq!(format.color_format, Some(COLOR_FORMAT_SURFACE));
    }

    #[test]
    fn missing_frame_rate_uses_default() {
        let config = TranscodeConfig::default();
        let input = TrackFormat::video(mime::VIDEO_AVC, 320, 240);
        let format = config
            .output_format(&input, EncoderCapabilities::default())
            .unwrap();
        assert_eq!(format.frame_rate, Some(30));
    }

    #[test]
    fn audio_track_has_no_output_format() {
        let input = TrackFormat::audio(mime::AUDIO_AAC, 44_100, 2);
        assert!(matches!(
            TranscodeConfig::default().output_format(&input, EncoderCapabilities::default()),
            Err(VideoError::NotSupported(_))
        ));
    }

    #[test]
    fn config_defaults_fill_missing_json_fields() {
        let config: TranscodeConfig =
            serde_json::from_str(r#"{ "bit_rate": 500000, "frame_wait_attempts": 3 }"#).unwrap();
        assert_eq!(config.bit_rate, 500_000);
        assert_eq!(config.frame_wait_attempts, Some(3));
        assert_eq!(config.codec_timeout, Duration::from_millis(10));
        assert_eq!(config.filter.color, ColorMatrix::grayscale());
    }
}
