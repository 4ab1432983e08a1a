//! In-memory containers.

use std::sync::Arc;

use parking_lot::Mutex;
use transkit_codec::{BufferInfo, SampleFlags, TrackFormat};

use crate::container::sample_too_large;
use crate::{Demuxer, Muxer, VideoError};

/// One stored sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySample {
    /// Payload.
    pub data: Vec<u8>,
    /// Presentation time in microseconds.
    pub presentation_time_us: i64,
    /// Sample flags.
    pub flags: SampleFlags,
}

impl MemorySample {
    /// Create a sample.
    #[must_use]
    pub const fn new(data: Vec<u8>, presentation_time_us: i64, flags: SampleFlags) -> Self {
        Self {
            data,
            presentation_time_us,
            flags,
        }
    }
}

/// One stored track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTrack {
    /// Track format.
    pub format: TrackFormat,
    /// Samples in write order.
    pub samples: Vec<MemorySample>,
}

impl MemoryTrack {
    /// Create a track.
    #[must_use]
    pub const fn new(format: TrackFormat, samples: Vec<MemorySample>) -> Self {
        Self { format, samples }
    }
}

/// Demuxer over tracks held in memory.
///
/// Samples of all selected tracks are returned in timestamp order.
#[derive(Debug, Clone, Default)]
pub struct MemoryDemuxer {
    tracks: Vec<MemoryTrack>,
    selected: Vec<usize>,
    order: Vec<(usize, usize)>,
    position: usize,
}

impl MemoryDemuxer {
    /// Create a demuxer over `tracks`.
    #[must_use]
    pub const fn new(tracks: Vec<MemoryTrack>) -> Self {
        Self {
            tracks,
            selected: Vec::new(),
            order: Vec::new(),
            position: 0,
        }
    }

    /// Indices of the selected tracks.
    #[must_use]
    pub fn selected_tracks(&self) -> &[usize] {
        &self.selected
    }

    fn current(&self) -> Option<&MemorySample> {
        let &(track, sample) = self.order.get(self.position)?;
        self.tracks.get(track)?.samples.get(sample)
    }

    fn rebuild_order(&mut self) {
        let mut order: Vec<(usize, usize)> = self
            .selected
            .iter()
            .flat_map(|&track| (0..self.tracks[track].samples.len()).map(move |i| (track, i)))
            .collect();
        order.sort_by_key(|&(track, i)| (self.tracks[track].samples[i].presentation_time_us, track));
        self.order = order;
        self.position = 0;
    }
}

impl Demuxer for MemoryDemuxer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat, VideoError> {
        self.tracks
            .get(index)
            .map(|track| TrackFormat {
                track_index: Some(index),
                ..track.format.clone()
            })
            .ok_or_else(|| VideoError::Container(format!("no track {index}")))
    }

    fn select_track(&mut self, index: usize) -> Result<(), VideoError> {
        if index >= self.tracks.len() {
            return Err(VideoError::Container(format!("no track {index}")));
        }
        if !self.selected.contains(&index) {
            self.selected.push(index);
            self.rebuild_order();
        }
        Ok(())
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<Option<usize>, VideoError> {
        let Some(sample) = self.current() else {
            return Ok(None);
        };
        let len = sample.data.len();
        if len > buf.len() {
            return Err(sample_too_large(len, buf.len()));
        }
        buf[..len].copy_from_slice(&sample.data);
        Ok(Some(len))
    }

    fn sample_time(&self) -> Option<i64> {
        self.current().map(|s| s.presentation_time_us)
    }

    fn sample_flags(&self) -> SampleFlags {
        self.current().map(|s| s.flags).unwrap_or_default()
    }

    fn advance(&mut self) -> bool {
        if self.position < self.order.len() {
            self.position += 1;
        }
        self.position < self.order.len()
    }
}

#[derive(Debug, Default)]
struct MuxedState {
    tracks: Vec<MemoryTrack>,
    started: bool,
    stopped: bool,
}

/// Shared view of what a [`MemoryMuxer`] has written.
///
/// Stays readable after the muxer itself has been consumed or dropped.
#[derive(Debug, Clone, Default)]
pub struct MuxedOutput(Arc<Mutex<MuxedState>>);

impl MuxedOutput {
    /// Snapshot of the written tracks.
    #[must_use]
    pub fn tracks(&self) -> Vec<MemoryTrack> {
        self.0.lock().tracks.clone()
    }

    /// Whether `start` was called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.0.lock().started
    }

    /// Whether `stop` was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.lock().stopped
    }

    /// Demuxer reading back the written tracks.
    #[must_use]
    pub fn demuxer(&self) -> MemoryDemuxer {
        MemoryDemuxer::new(self.tracks())
    }
}

/// Muxer collecting samples in memory, exactly as written.
#[derive(Debug, Clone, Default)]
pub struct MemoryMuxer {
    output: MuxedOutput,
}

impl MemoryMuxer {
    /// Create an empty muxer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the written data.
    #[must_use]
    pub fn output(&self) -> MuxedOutput {
        self.output.clone()
    }
}

impl Muxer for MemoryMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, VideoError> {
        let mut state = self.output.0.lock();
        if state.started {
            return Err(VideoError::InvalidState(
                "cannot add a track after start".into(),
            ));
        }
        state.tracks.push(MemoryTrack::new(format.clone(), Vec::new()));
        Ok(state.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), VideoError> {
        let mut state = self.output.0.lock();
        if state.started {
            return Err(VideoError::InvalidState("muxer already started".into()));
        }
        if state.tracks.is_empty() {
            return Err(VideoError::InvalidState("muxer has no tracks".into()));
        }
        state.started = true;
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), VideoError> {
        let mut state = self.output.0.lock();
        if !state.started || state.stopped {
            return Err(VideoError::InvalidState(
                "samples can only be written between start and stop".into(),
            ));
        }
        let end = info.offset + info.size;
        let payload = data
            .get(info.offset..end)
            .ok_or_else(|| VideoError::Container(format!("sample range {}..{end} out of bounds", info.offset)))?;
        let target = state
            .tracks
            .get_mut(track)
            .ok_or_else(|| VideoError::Container(format!("no track {track}")))?;
        target.samples.push(MemorySample::new(
            payload.to_vec(),
            info.presentation_time_us,
            info.flags,
        ));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), VideoError> {
        let mut state = self.output.0.lock();
        if !state.started {
            return Err(VideoError::InvalidState("muxer was never started".into()));
        }
        state.stopped = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transkit_codec::mime;

    fn track(mime: &str, times: &[i64]) -> MemoryTrack {
        let format = if mime.starts_with("video/") {
            TrackFormat::video(mime, 16, 16)
        } else {
            TrackFormat::audio(mime, 44_100, 2)
        };
        MemoryTrack::new(
            format,
            times
                .iter()
                .map(|&t| MemorySample::new(vec![1, 2, 3], t, SampleFlags::KEY_FRAME))
                .collect(),
        )
    }

    #[test]
    fn selected_tracks_interleave_by_time() {
        let mut demuxer = MemoryDemuxer::new(vec![
            track(mime::VIDEO_AVC, &[0, 20]),
            track(mime::AUDIO_AAC, &[10, 30]),
        ]);
        demuxer.select_track(1).unwrap();
        demuxer.select_track(0).unwrap();

        let mut times = Vec::new();
        loop {
            times.extend(demuxer.sample_time());
            if !demuxer.advance() {
                break;
            }
        }
        assert_eq!(times, vec![0, 10, 20, 30]);
        assert_eq!(demuxer.sample_time(), None);
    }

    #[test]
    fn small_buffer_is_an_io_error() {
        let mut demuxer = MemoryDemuxer::new(vec![track(mime::VIDEO_AVC, &[0])]);
        demuxer.select_track(0).unwrap();
        let mut buf = [0u8; 2];
        assert!(matches!(
            demuxer.read_sample_data(&mut buf),
            Err(VideoError::Io(_))
        ));
    }

    #[test]
    fn muxer_enforces_call_order() {
        let mut muxer = MemoryMuxer::new();
        let info = BufferInfo::new(1, 0, SampleFlags::empty());
        assert!(muxer.start().is_err());

        let index = muxer
            .add_track(&TrackFormat::video(mime::VIDEO_AVC, 16, 16))
            .unwrap();
        assert!(muxer.write_sample_data(index, &[0], &info).is_err());

        muxer.start().unwrap();
        assert!(muxer
            .add_track(&TrackFormat::audio(mime::AUDIO_AAC, 44_100, 2))
            .is_err());
        assert!(muxer.write_sample_data(7, &[0], &info).is_err());
        muxer.write_sample_data(index, &[0], &info).unwrap();
        muxer.stop().unwrap();

        let output = muxer.output();
        assert!(output.is_stopped());
        assert_eq!(output.tracks()[0].samples.len(), 1);
    }
}
