//! Stream muxer: copies compressed samples between containers.

use std::path::Path;

use serde::{Deserialize, Serialize};
use transkit_codec::BufferInfo;

use crate::{Demuxer, Mp4Demuxer, Mp4Muxer, Muxer, TrackKind, VideoError, select_track};

/// What to do with a zero-length sample read from a source track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptySamplePolicy {
    /// Copy it like any other sample.
    #[default]
    PassThrough,
    /// Treat it as the end of the track.
    EndOfTrack,
}

/// Stream muxer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Size of the reusable sample buffer. Larger samples fail with an I/O
    /// error.
    pub max_sample_size: usize,
    /// Zero-length samples on the video track.
    pub video_empty_samples: EmptySamplePolicy,
    /// Zero-length samples on the audio track.
    pub audio_empty_samples: EmptySamplePolicy,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_sample_size: 1024 * 1024,
            video_empty_samples: EmptySamplePolicy::PassThrough,
            audio_empty_samples: EmptySamplePolicy::EndOfTrack,
        }
    }
}

/// Counts of what a mux copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxStats {
    /// Video samples written.
    pub video_samples: u64,
    /// Audio samples written.
    pub audio_samples: u64,
    /// Video payload bytes written.
    pub video_bytes: u64,
    /// Audio payload bytes written.
    pub audio_bytes: u64,
}

/// Copies one video and one audio track into a single container without
/// decoding.
#[derive(Debug, Clone, Default)]
pub struct StreamMuxer {
    config: MuxConfig,
}

impl StreamMuxer {
    /// Create a muxer with `config`.
    #[must_use]
    pub const fn new(config: MuxConfig) -> Self {
        Self { config }
    }

    /// Current settings.
    #[must_use]
    pub const fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Mux the first audio track of `audio` and the first video track of
    /// `video` into the container returned by `open`.
    ///
    /// `open` is only called once both tracks have been found. The output is
    /// stopped on every path; the sources are released when this returns.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::NoMatchingTrack` if either source lacks its track,
    /// or any container error raised while copying.
    pub fn mux<A, V, M, F>(&self, mut audio: A, mut video: V, open: F) -> Result<MuxStats, VideoError>
    where
        A: Demuxer,
        V: Demuxer,
        M: Muxer,
        F: FnOnce() -> Result<M, VideoError>,
    {
        let video_format = select_track(&mut video, TrackKind::Video)?;
        let audio_format = select_track(&mut audio, TrackKind::Audio)?;

        let mut output = OutputGuard::new(open()?);
        let video_track = output.muxer.add_track(&video_format)?;
        let audio_track = output.muxer.add_track(&audio_format)?;
        output.start()?;

        let mut buffer = vec![0u8; self.config.max_sample_size];
        let mut stats = MuxStats::default();

        (stats.video_samples, stats.video_bytes) = copy_track(
            &mut video,
            &mut output.muxer,
            video_track,
            &mut buffer,
            self.config.video_empty_samples,
        )?;
        (stats.audio_samples, stats.audio_bytes) = copy_track(
            &mut audio,
            &mut output.muxer,
            audio_track,
            &mut buffer,
            self.config.audio_empty_samples,
        )?;

        output.stop()?;
        log::debug!(
            "muxed {} video and {} audio samples",
            stats.video_samples,
            stats.audio_samples
        );
        Ok(stats)
    }

    /// Mux MP4 files.
    ///
    /// Nothing is written to `out_path` unless both inputs have the wanted
    /// track.
    ///
    /// # Errors
    ///
    /// See [`mux`](Self::mux); also fails if an input cannot be opened.
    pub fn mux_files(
        &self,
        audio_path: impl AsRef<Path>,
        video_path: impl AsRef<Path>,
        out_path: impl AsRef<Path>,
    ) -> Result<MuxStats, VideoError> {
        let audio = Mp4Demuxer::open(audio_path)?;
        let video = Mp4Demuxer::open(video_path)?;
        self.mux(audio, video, || Mp4Muxer::create(out_path))
    }
}

fn copy_track<D, M>(
    source: &mut D,
    muxer: &mut M,
    track: usize,
    buffer: &mut [u8],
    empty_samples: EmptySamplePolicy,
) -> Result<(u64, u64), VideoError>
where
    D: Demuxer,
    M: Muxer,
{
    let mut samples = 0u64;
    let mut bytes = 0u64;
    while let Some(size) = source.read_sample_data(buffer)? {
        if size == 0 && empty_samples == EmptySamplePolicy::EndOfTrack {
            log::debug!("empty sample ends track {track}");
            break;
        }
        let info = BufferInfo {
            offset: 0,
            size,
            presentation_time_us: source.sample_time().unwrap_or_default(),
            flags: source.sample_flags(),
        };
        muxer.write_sample_data(track, &buffer[..size], &info)?;
        samples += 1;
        bytes += size as u64;

        if !source.advance() {
            break;
        }
    }
    Ok((samples, bytes))
}

/// Stops the muxer when dropped, unless already stopped.
pub(crate) struct OutputGuard<M: Muxer> {
    pub(crate) muxer: M,
    started: bool,
    stopped: bool,
}

impl<M: Muxer> OutputGuard<M> {
    pub(crate) const fn new(muxer: M) -> Self {
        Self {
            muxer,
            started: false,
            stopped: false,
        }
    }

    pub(crate) fn start(&mut self) -> Result<(), VideoError> {
        self.muxer.start()?;
        self.started = true;
        Ok(())
    }

    pub(crate) fn stop(&mut self) -> Result<(), VideoError> {
        self.stopped = true;
        if self.started {
            self.muxer.stop()?;
        }
        Ok(())
    }
}

impl<M: Muxer> Drop for OutputGuard<M> {
    fn drop(&mut self) {
        if self.started && !self.stopped {
            if let Err(e) = self.muxer.stop() {
                log::error!("failed to stop output while unwinding: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryDemuxer, MemoryMuxer, MemorySample, MemoryTrack};
    use transkit_codec::{SampleFlags, TrackFormat, mime};

    fn audio(samples: Vec<MemorySample>) -> MemoryDemuxer {
        MemoryDemuxer::new(vec![MemoryTrack::new(
            TrackFormat::audio(mime::AUDIO_AAC, 44_100, 2),
            samples,
        )])
    }

    fn video(samples: Vec<MemorySample>) -> MemoryDemuxer {
        MemoryDemuxer::new(vec![MemoryTrack::new(
            TrackFormat::video(mime::VIDEO_AVC, 320, 240),
            samples,
        )])
    }

    #[test]
    fn empty_sample_policy_is_per_track() {
        let muxer = MemoryMuxer::new();
        let output = muxer.output();
        let stats = StreamMuxer::default()
            .mux(
                audio(vec![
                    MemorySample::new(vec![1; 4], 0, SampleFlags::KEY_FRAME),
                    MemorySample::new(Vec::new(), 1000, SampleFlags::empty()),
                    MemorySample::new(vec![1; 4], 2000, SampleFlags::KEY_FRAME),
                ]),
                video(vec![
                    MemorySample::new(vec![2; 8], 0, SampleFlags::KEY_FRAME),
                    MemorySample::new(Vec::new(), 1000, SampleFlags::END_OF_STREAM),
                ]),
                || Ok(muxer),
            )
            .unwrap();

        assert_eq!(stats.video_samples, 2);
        assert_eq!(stats.video_bytes, 8);
        assert_eq!(stats.audio_samples, 1);
        assert!(output.is_stopped());
    }

    #[test]
    fn missing_audio_never_opens_output() {
        let mut opened = false;
        let err = StreamMuxer::default()
            .mux(video(Vec::new()), video(Vec::new()), || {
                opened = true;
                Ok(MemoryMuxer::new())
            })
            .unwrap_err();

        assert!(matches!(err, VideoError::NoMatchingTrack(_)));
        assert!(!opened);
    }

    #[test]
    fn oversized_sample_stops_output() {
        let muxer = MemoryMuxer::new();
        let output = muxer.output();
        let config = MuxConfig {
            max_sample_size: 4,
            ..MuxConfig::default()
        };
        let err = StreamMuxer::new(config)
            .mux(
                audio(Vec::new()),
                video(vec![MemorySample::new(vec![0; 16], 0, SampleFlags::KEY_FRAME)]),
                || Ok(muxer),
            )
            .unwrap_err();

        assert!(matches!(err, VideoError::Io(_)));
        assert!(output.is_stopped());
    }

    #[test]
    fn config_reads_from_json() {
        let config: MuxConfig =
            serde_json::from_str(r#"{ "audio_empty_samples": "pass_through" }"#).unwrap();
        assert_eq!(config.audio_empty_samples, EmptySamplePolicy::PassThrough);
        assert_eq!(config.max_sample_size, 1024 * 1024);
    }
}
