//! # Transkit
//!
//! Transcoding and remuxing of compressed audio/video elementary streams.
//!
//! Transkit covers two closely related jobs:
//!
//! - **Remux**: copy already-compressed audio and video samples from two
//!   source containers into one MP4 file without touching codec payloads.
//! - **Transcode**: decode a video stream, run every frame through a GPU
//!   color filter, and re-encode it into a new container while preserving
//!   timing.
//!
//! ## Features
//!
//! - `codec`: Media data model, codec state machines and software codecs.
//! - `video`: Containers, the stream muxer and the transcode pipeline.
//! - `av1`: AV1 software codecs (`rav1e` encoder, `dav1d` decoder).
//!
//! Use the `full` feature to enable everything.
//!
//! ## Example
//!
//! ```toml
//! [dependencies]
//! transkit = { version = "0.1", features = ["full"] }
//! ```
//!
//! ```rust,no_run
//! use transkit::video::StreamMuxer;
//!
//! fn add_soundtrack() -> Result<(), transkit::video::VideoError> {
//!     let stats = StreamMuxer::default().mux_files("music.m4a", "clip.mp4", "out.mp4")?;
//!     println!("copied {} video samples", stats.video_samples);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "codec")]
pub use transkit_codec as codec;

#[cfg(feature = "video")]
pub use transkit_video as video;
