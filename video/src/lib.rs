//! Containers, stream muxing and the transcode pipeline.
//!
//! This crate provides:
//! - **Containers**: [`Demuxer`] / [`Muxer`] traits with MP4 ([`Mp4Demuxer`],
//!   [`Mp4Muxer`]) and in-memory ([`MemoryDemuxer`], [`MemoryMuxer`])
//!   implementations
//! - **Remux**: [`StreamMuxer`] copies compressed audio and video samples into
//!   one container without decoding
//! - **Transcode**: [`Transcoder`] drives decode → filter → encode with a
//!   [`FrameAvailabilityGate`] between the decoder and the renderer
//! - **wgpu Integration**: [`gpu::GpuContext`] runs the [`FrameFilter`] on the
//!   GPU, [`gpu::SoftwareContext`] on the CPU
//!
//! ```no_run
//! use transkit_video::{StreamMuxer, TranscodeConfig, Transcoder};
//!
//! # fn main() -> Result<(), transkit_video::VideoError> {
//! let stats = Transcoder::new(TranscodeConfig::default()).convert("in.mp4", "filtered.mp4")?;
//! println!("rendered {} frames", stats.frames_rendered);
//!
//! StreamMuxer::default().mux_files("audio.m4a", "filtered.mp4", "out.mp4")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod collab;
mod container;
mod demuxer;
mod gate;
pub mod gpu;
mod memory;
mod muxer;
mod remux;
mod track;
mod transcode;

pub use container::{Demuxer, Muxer};
pub use demuxer::{Mp4Demuxer, video_duration_us};
pub use gate::FrameAvailabilityGate;
pub use gpu::{ColorMatrix, FrameFilter, RenderContext};
pub use memory::{MemoryDemuxer, MemoryMuxer, MemorySample, MemoryTrack, MuxedOutput};
pub use muxer::Mp4Muxer;
pub use remux::{EmptySamplePolicy, MuxConfig, MuxStats, StreamMuxer};
pub use track::{TrackKind, select_track, select_track_by};
pub use transcode::{
    Backend, PipelineEvent, PipelineState, RenderMode, SystemBackend, TranscodeConfig,
    TranscodeStats, Transcoder,
};

/// Re-export wgpu for texture integration.
pub use wgpu;

use transkit_codec::CodecError;

/// Errors that can occur with video operations.
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    /// IO error during file operations.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// MP4 container error.
    #[error(transparent)]
    Mp4(#[from] mp4::Error),

    /// Codec error during encode/decode.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// No track in the source matched the requested kind.
    #[error("No matching track: {0}")]
    NoMatchingTrack(String),

    /// Container format error.
    #[error("Container error: {0}")]
    Container(String),

    /// GPU adapter, device or surface failure.
    #[error("GPU error: {0}")]
    Gpu(String),

    /// An operation was called out of order.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A decoded frame never became available.
    #[error("Timed out waiting for a decoded frame")]
    FrameTimeout,

    /// Format not supported.
    #[error("Format not supported: {0}")]
    NotSupported(String),
}
