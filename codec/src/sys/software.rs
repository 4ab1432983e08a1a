//! Frame codecs driven through the asynchronous codec state machines.
//!
//! Each started codec owns one worker thread. The caller's thread only moves
//! buffers through channels, so every dequeue honours its timeout.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::{
    BufferInfo, COLOR_FORMAT_SURFACE, CodecError, Dequeue, EncoderCapabilities, Frame,
    HardwareDecoder, HardwareEncoder, InputBuffer, InputSurface, OutputBuffer, Packet,
    SampleFlags, SurfaceEvent, SurfaceTexture, TrackFormat, VideoDecoder, VideoEncoder, mime,
};

const WORKER_POLL: Duration = Duration::from_millis(10);

/// Builds the frame decoder for a configured format.
pub type DecoderFactory = fn(&TrackFormat) -> Result<Box<dyn VideoDecoder>, CodecError>;

/// Builds the frame encoder for a configured format.
pub type EncoderFactory = fn(&TrackFormat) -> Result<Box<dyn VideoEncoder>, CodecError>;

/// Queue sizes of a software codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareCodecConfig {
    /// Number of input slots.
    pub input_buffers: usize,
    /// Output buffers the worker may run ahead of the caller.
    pub output_buffers: usize,
    /// Capacity of each input slot in bytes.
    pub max_input_size: usize,
    /// How long a frame submission may wait for a busy encoder.
    pub input_timeout: Duration,
}

impl Default for SoftwareCodecConfig {
    fn default() -> Self {
        Self {
            input_buffers: 4,
            output_buffers: 4,
            max_input_size: 1024 * 1024,
            input_timeout: Duration::from_secs(5),
        }
    }
}

enum WorkerOutput {
    FormatChanged(TrackFormat),
    Buffer {
        info: BufferInfo,
        data: Vec<u8>,
        frame: Option<Frame>,
    },
    Failed(CodecError),
}

struct Emitter {
    sender: Sender<WorkerOutput>,
    stop: Arc<AtomicBool>,
}

impl Emitter {
    /// Deliver `msg`, waiting for room. Returns `false` once the codec stops.
    fn emit(&self, mut msg: WorkerOutput) -> bool {
        loop {
            match self.sender.send_timeout(msg, WORKER_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.stopped() {
                        return false;
                    }
                    msg = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn fail(&self, error: CodecError) {
        log::error!("codec worker failed: {error}");
        self.emit(WorkerOutput::Failed(error));
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

struct Worker {
    name: String,
    output: Receiver<WorkerOutput>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        name: &str,
        capacity: Option<usize>,
        body: impl FnOnce(Emitter) + Send + 'static,
    ) -> Result<Self, CodecError> {
        let (sender, output) = match capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity.max(1)),
            None => crossbeam_channel::unbounded(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let emitter = Emitter {
            sender,
            stop: stop.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || body(emitter))
            .map_err(|e| CodecError::InitializationFailed(format!("{name}: {e}")))?;

        Ok(Self {
            name: name.to_owned(),
            output,
            stop,
            thread: Some(thread),
        })
    }

    fn poll(&self, timeout: Duration) -> Result<Option<WorkerOutput>, CodecError> {
        match self.output.recv_timeout(timeout) {
            Ok(WorkerOutput::Failed(e)) => Err(e),
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CodecError::InvalidState(format!(
                "{} has no more output",
                self.name
            ))),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("{} worker panicked", self.name);
            }
        }
    }
}

enum DecoderState {
    Idle,
    Configured {
        format: TrackFormat,
        decoder: Box<dyn VideoDecoder>,
        surface: Arc<SurfaceTexture>,
    },
    Running {
        worker: Worker,
        free: Receiver<InputBuffer>,
        input: Sender<(InputBuffer, BufferInfo)>,
        surface: Arc<SurfaceTexture>,
    },
    Stopped,
}

/// Decoder running a [`VideoDecoder`] on a worker thread.
pub struct SoftwareDecoder {
    mime: String,
    config: SoftwareCodecConfig,
    factory: DecoderFactory,
    state: DecoderState,
    output_format: Option<TrackFormat>,
    next_index: usize,
}

impl SoftwareDecoder {
    /// Decoder for `mime` built by `factory` at configure time.
    #[must_use]
    pub fn new(mime: &str, config: SoftwareCodecConfig, factory: DecoderFactory) -> Self {
        Self {
            mime: mime.to_owned(),
            config,
            factory,
            state: DecoderState::Idle,
            output_format: None,
            next_index: 0,
        }
    }

    fn not_running(&self, op: &str) -> CodecError {
        CodecError::InvalidState(format!("{op} on {} decoder that is not running", self.mime))
    }
}

impl fmt::Debug for SoftwareDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDecoder")
            .field("mime", &self.mime)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HardwareDecoder for SoftwareDecoder {
    fn configure(
        &mut self,
        format: &TrackFormat,
        surface: Arc<SurfaceTexture>,
    ) -> Result<(), CodecError> {
        if !matches!(self.state, DecoderState::Idle) {
            return Err(CodecError::InvalidState("decoder already configured".into()));
        }
        if format.mime != self.mime {
            return Err(CodecError::Unsupported(format!(
                "{} decoder cannot decode {}",
                self.mime, format.mime
            )));
        }
        let decoder = (self.factory)(format)?;
        self.state = DecoderState::Configured {
            format: format.clone(),
            decoder,
            surface,
        };
        Ok(())
    }

    fn start(&mut self) -> Result<(), CodecError> {
        if !matches!(self.state, DecoderState::Configured { .. }) {
            return Err(CodecError::InvalidState("decoder is not configured".into()));
        }
        let DecoderState::Configured {
            format,
            decoder,
            surface,
        } = std::mem::replace(&mut self.state, DecoderState::Stopped)
        else {
            return Err(CodecError::InvalidState("decoder is not configured".into()));
        };

        let (free_tx, free) = crossbeam_channel::bounded(self.config.input_buffers.max(1));
        for index in 0..self.config.input_buffers.max(1) {
            let _ = free_tx.send(InputBuffer::new(index, self.config.max_input_size));
        }
        let (input, input_rx) = crossbeam_channel::unbounded();

        let worker = Worker::spawn(
            &format!("{}-decoder", self.mime),
            Some(self.config.output_buffers),
            move |out| decode_loop(decoder, &input_rx, &free_tx, &out, &format),
        )?;
        log::debug!("{} decoder started", self.mime);

        self.state = DecoderState::Running {
            worker,
            free,
            input,
            surface,
        };
        Ok(())
    }

    fn dequeue_input_buffer(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<InputBuffer>, CodecError> {
        let DecoderState::Running { free, .. } = &self.state else {
            return Err(self.not_running("dequeue_input_buffer"));
        };
        match free.recv_timeout(timeout) {
            Ok(buffer) => Ok(Some(buffer)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.not_running("dequeue_input_buffer")),
        }
    }

    fn queue_input_buffer(
        &mut self,
        buffer: InputBuffer,
        info: BufferInfo,
    ) -> Result<(), CodecError> {
        let DecoderState::Running { input, .. } = &self.state else {
            return Err(self.not_running("queue_input_buffer"));
        };
        if info.offset + info.size > buffer.capacity() {
            return Err(CodecError::DecodingFailed(format!(
                "sample of {} bytes exceeds input slot of {}",
                info.size,
                buffer.capacity()
            )));
        }
        input
            .send((buffer, info))
            .map_err(|_| self.not_running("queue_input_buffer"))
    }

    fn dequeue_output_buffer(
        &mut self,
        timeout: Duration,
    ) -> Result<Dequeue<OutputBuffer>, CodecError> {
        let DecoderState::Running { worker, .. } = &self.state else {
            return Err(self.not_running("dequeue_output_buffer"));
        };
        match worker.poll(timeout)? {
            None => Ok(Dequeue::Empty),
            Some(WorkerOutput::FormatChanged(format)) => {
                log::debug!("decoder output format changed: {format:?}");
                self.output_format = Some(format);
                Ok(Dequeue::FormatChanged)
            }
            Some(WorkerOutput::Buffer { info, frame, .. }) => {
                let index = self.next_index;
                self.next_index = self.next_index.wrapping_add(1);
                Ok(Dequeue::Ready(OutputBuffer::decoded(index, info, frame)))
            }
            Some(WorkerOutput::Failed(e)) => Err(e),
        }
    }

    fn output_format(&self) -> Result<TrackFormat, CodecError> {
        self.output_format
            .clone()
            .ok_or_else(|| CodecError::InvalidState("decoder output format not known yet".into()))
    }

    fn release_output_buffer(
        &mut self,
        mut buffer: OutputBuffer,
        render: bool,
    ) -> Result<(), CodecError> {
        let DecoderState::Running { surface, .. } = &self.state else {
            return Err(self.not_running("release_output_buffer"));
        };
        if render {
            if let Some(frame) = buffer.take_frame() {
                surface.queue_frame(frame);
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        if matches!(self.state, DecoderState::Running { .. }) {
            log::debug!("{} decoder stopping", self.mime);
        }
        self.state = DecoderState::Stopped;
    }
}

fn decoded_format(input: &TrackFormat, frame: &Frame) -> TrackFormat {
    TrackFormat {
        mime: mime::VIDEO_RAW.to_owned(),
        track_index: input.track_index,
        width: Some(frame.width),
        height: Some(frame.height),
        frame_rate: input.frame_rate,
        color_format: Some(COLOR_FORMAT_SURFACE),
        duration_us: input.duration_us,
        ..TrackFormat::default()
    }
}

fn decode_loop(
    mut decoder: Box<dyn VideoDecoder>,
    input: &Receiver<(InputBuffer, BufferInfo)>,
    free: &Sender<InputBuffer>,
    out: &Emitter,
    format: &TrackFormat,
) {
    let mut announced = false;
    loop {
        let (buffer, info) = match input.recv_timeout(WORKER_POLL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => {
                if out.stopped() {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };

        let end_of_stream = info.is_end_of_stream();
        let mut result = if info.size == 0 || info.is_codec_config() {
            Ok(Vec::new())
        } else {
            let sample = &buffer.data()[info.offset..info.offset + info.size];
            decoder.decode(sample, info.presentation_time_us)
        };
        if free.send(buffer).is_err() {
            return;
        }
        if end_of_stream {
            result = result.and_then(|mut frames| {
                frames.extend(decoder.flush()?);
                Ok(frames)
            });
        }

        let frames = match result {
            Ok(frames) => frames,
            Err(e) => return out.fail(e),
        };
        for frame in frames {
            if !announced {
                announced = true;
                if !out.emit(WorkerOutput::FormatChanged(decoded_format(format, &frame))) {
                    return;
                }
            }
            let info = BufferInfo::new(frame.data.len(), frame.timestamp_us(), SampleFlags::empty());
            let msg = WorkerOutput::Buffer {
                info,
                data: Vec::new(),
                frame: Some(frame),
            };
            if !out.emit(msg) {
                return;
            }
        }

        if end_of_stream {
            let eos = BufferInfo {
                presentation_time_us: info.presentation_time_us,
                ..BufferInfo::end_of_stream()
            };
            out.emit(WorkerOutput::Buffer {
                info: eos,
                data: Vec::new(),
                frame: None,
            });
            return;
        }
    }
}

enum EncoderState {
    Idle,
    Configured {
        format: TrackFormat,
        encoder: Box<dyn VideoEncoder>,
        surface: Option<(InputSurface, Receiver<SurfaceEvent>)>,
    },
    Running {
        worker: Worker,
        surface: InputSurface,
    },
    Stopped,
}

/// Encoder running a [`VideoEncoder`] on a worker thread.
pub struct SoftwareEncoder {
    mime: String,
    config: SoftwareCodecConfig,
    capabilities: EncoderCapabilities,
    factory: EncoderFactory,
    state: EncoderState,
    format: Option<TrackFormat>,
    output_format: Option<TrackFormat>,
    next_index: usize,
}

impl SoftwareEncoder {
    /// Encoder for `mime` built by `factory` at configure time.
    #[must_use]
    pub fn new(mime: &str, config: SoftwareCodecConfig, factory: EncoderFactory) -> Self {
        Self {
            mime: mime.to_owned(),
            config,
            capabilities: EncoderCapabilities::default(),
            factory,
            state: EncoderState::Idle,
            format: None,
            output_format: None,
            next_index: 0,
        }
    }

    /// Override the reported size limits.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: EncoderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn not_running(&self, op: &str) -> CodecError {
        CodecError::InvalidState(format!("{op} on {} encoder that is not running", self.mime))
    }
}

impl fmt::Debug for SoftwareEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareEncoder")
            .field("mime", &self.mime)
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl HardwareEncoder for SoftwareEncoder {
    fn capabilities(&self) -> EncoderCapabilities {
        self.capabilities
    }

    fn configure(&mut self, format: &TrackFormat) -> Result<(), CodecError> {
        if !matches!(self.state, EncoderState::Idle) {
            return Err(CodecError::InvalidState("encoder already configured".into()));
        }
        if format.mime != self.mime {
            return Err(CodecError::Unsupported(format!(
                "{} encoder cannot produce {}",
                self.mime, format.mime
            )));
        }
        let (width, height) = format
            .size()
            .ok_or_else(|| CodecError::Unsupported("encoder format has no frame size".into()))?;
        if !self.capabilities.supports(width, height) {
            return Err(CodecError::Unsupported(format!(
                "{width}x{height} exceeds encoder capabilities"
            )));
        }

        let encoder = (self.factory)(format)?;
        self.format = Some(format.clone());
        self.state = EncoderState::Configured {
            format: format.clone(),
            encoder,
            surface: None,
        };
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<InputSurface, CodecError> {
        let EncoderState::Configured { surface, .. } = &mut self.state else {
            return Err(CodecError::InvalidState(
                "input surface must be created between configure and start".into(),
            ));
        };
        let (input, events) =
            InputSurface::channel(self.config.input_buffers, self.config.input_timeout);
        *surface = Some((input.clone(), events));
        Ok(input)
    }

    fn start(&mut self) -> Result<(), CodecError> {
        match &self.state {
            EncoderState::Configured { surface: Some(_), .. } => {}
            EncoderState::Configured { surface: None, .. } => {
                return Err(CodecError::InvalidState(
                    "encoder started without an input surface".into(),
                ));
            }
            _ => return Err(CodecError::InvalidState("encoder is not configured".into())),
        }
        let EncoderState::Configured {
            format,
            encoder,
            surface: Some((surface, events)),
        } = std::mem::replace(&mut self.state, EncoderState::Stopped)
        else {
            return Err(CodecError::InvalidState("encoder is not configured".into()));
        };

        let worker = Worker::spawn(&format!("{}-encoder", self.mime), None, move |out| {
            encode_loop(EncodeSession::new(encoder, format), &events, &out);
        })?;
        log::debug!("{} encoder started", self.mime);

        self.state = EncoderState::Running { worker, surface };
        Ok(())
    }

    fn dequeue_output_buffer(
        &mut self,
        timeout: Duration,
    ) -> Result<Dequeue<OutputBuffer>, CodecError> {
        let EncoderState::Running { worker, .. } = &self.state else {
            return Err(self.not_running("dequeue_output_buffer"));
        };
        match worker.poll(timeout)? {
            None => Ok(Dequeue::Empty),
            Some(WorkerOutput::FormatChanged(format)) => {
                log::debug!("encoder output format changed: {format:?}");
                self.output_format = Some(format);
                Ok(Dequeue::FormatChanged)
            }
            Some(WorkerOutput::Buffer { info, data, .. }) => {
                let index = self.next_index;
                self.next_index = self.next_index.wrapping_add(1);
                Ok(Dequeue::Ready(OutputBuffer::encoded(index, info, data)))
            }
            Some(WorkerOutput::Failed(e)) => Err(e),
        }
    }

    fn output_format(&self) -> Result<TrackFormat, CodecError> {
        self.output_format
            .clone()
            .or_else(|| self.format.clone())
            .ok_or_else(|| CodecError::InvalidState("encoder is not configured".into()))
    }

    fn release_output_buffer(&mut self, _buffer: OutputBuffer) -> Result<(), CodecError> {
        if matches!(self.state, EncoderState::Running { .. }) {
            Ok(())
        } else {
            Err(self.not_running("release_output_buffer"))
        }
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), CodecError> {
        let EncoderState::Running { surface, .. } = &self.state else {
            return Err(self.not_running("signal_end_of_input_stream"));
        };
        log::debug!("{} encoder input ended", self.mime);
        surface.end_of_stream()
    }

    fn stop(&mut self) {
        if matches!(self.state, EncoderState::Running { .. }) {
            log::debug!("{} encoder stopping", self.mime);
        }
        self.state = EncoderState::Stopped;
    }
}

/// Encoder-side bookkeeping: the format announcement and the one packet held
/// back so the final packet can carry the end-of-stream flag.
struct EncodeSession {
    encoder: Box<dyn VideoEncoder>,
    format: TrackFormat,
    held: Option<Packet>,
    announced: bool,
}

impl EncodeSession {
    fn new(encoder: Box<dyn VideoEncoder>, format: TrackFormat) -> Self {
        Self {
            encoder,
            format,
            held: None,
            announced: false,
        }
    }

    fn announce(&mut self, out: &Emitter) -> bool {
        if self.announced {
            return true;
        }
        self.announced = true;

        let config = self.encoder.codec_config();
        let mut format = self.format.clone();
        format.codec_config.clone_from(&config);
        if !out.emit(WorkerOutput::FormatChanged(format)) {
            return false;
        }
        match config {
            Some(data) => out.emit(WorkerOutput::Buffer {
                info: BufferInfo::new(data.len(), 0, SampleFlags::CODEC_CONFIG),
                data,
                frame: None,
            }),
            None => true,
        }
    }

    fn push(&mut self, packets: Vec<Packet>, out: &Emitter) -> bool {
        for packet in packets {
            if !self.announce(out) {
                return false;
            }
            if let Some(previous) = self.held.replace(packet) {
                if !out.emit(packet_output(previous, SampleFlags::empty())) {
                    return false;
                }
            }
        }
        true
    }

    fn finish(&mut self, out: &Emitter) {
        let packets = match self.encoder.flush() {
            Ok(packets) => packets,
            Err(e) => return out.fail(e),
        };
        if !self.push(packets, out) || !self.announce(out) {
            return;
        }
        let last = match self.held.take() {
            Some(packet) => packet_output(packet, SampleFlags::END_OF_STREAM),
            None => WorkerOutput::Buffer {
                info: BufferInfo::end_of_stream(),
                data: Vec::new(),
                frame: None,
            },
        };
        out.emit(last);
    }
}

fn packet_output(packet: Packet, extra: SampleFlags) -> WorkerOutput {
    let mut flags = extra;
    if packet.key_frame {
        flags |= SampleFlags::KEY_FRAME;
    }
    WorkerOutput::Buffer {
        info: BufferInfo::new(packet.data.len(), packet.timestamp_us, flags),
        data: packet.data,
        frame: None,
    }
}

fn encode_loop(mut session: EncodeSession, events: &Receiver<SurfaceEvent>, out: &Emitter) {
    loop {
        match events.recv_timeout(WORKER_POLL) {
            Ok(SurfaceEvent::Frame(frame)) => match session.encoder.encode(&frame) {
                Ok(packets) => {
                    if !session.push(packets, out) {
                        return;
                    }
                }
                Err(e) => return out.fail(e),
            },
            Ok(SurfaceEvent::EndOfStream) => return session.finish(out),
            Err(RecvTimeoutError::Timeout) => {
                if out.stopped() {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
