//! Container traits.

use transkit_codec::{BufferInfo, SampleFlags, TrackFormat};

use crate::VideoError;

/// Reads compressed samples out of a container, one selected track at a time.
///
/// The cursor starts on the first sample of the selected tracks; `advance`
/// moves it forward.
pub trait Demuxer {
    /// Number of tracks in the container.
    fn track_count(&self) -> usize;

    /// Format of track `index`.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::Container` for an out-of-range index.
    fn track_format(&self, index: usize) -> Result<TrackFormat, VideoError>;

    /// Activate track `index` for reading.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::Container` for an out-of-range index.
    fn select_track(&mut self, index: usize) -> Result<(), VideoError>;

    /// Copy the current sample into `buf`, returning its length, or `None`
    /// when no samples remain.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::Io` if the sample does not fit in `buf`, or a
    /// container error if it cannot be read.
    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<Option<usize>, VideoError>;

    /// Presentation time of the current sample in microseconds.
    fn sample_time(&self) -> Option<i64>;

    /// Flags of the current sample.
    fn sample_flags(&self) -> SampleFlags;

    /// Move to the next sample. Returns `false` once past the last one.
    fn advance(&mut self) -> bool;
}

/// Writes compressed samples into a container.
///
/// Tracks are added before `start`; samples are written between `start` and
/// `stop`.
pub trait Muxer {
    /// Add a track and return its index.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::InvalidState` once the muxer has started.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, VideoError>;

    /// Start accepting samples.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::InvalidState` if already started or without tracks.
    fn start(&mut self) -> Result<(), VideoError>;

    /// Write one sample to `track`.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::InvalidState` before `start`, or
    /// `VideoError::Container` for an unknown track.
    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), VideoError>;

    /// Finish the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be finalized.
    fn stop(&mut self) -> Result<(), VideoError>;
}

impl<D: Demuxer + ?Sized> Demuxer for Box<D> {
    fn track_count(&self) -> usize {
        (**self).track_count()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat, VideoError> {
        (**self).track_format(index)
    }

    fn select_track(&mut self, index: usize) -> Result<(), VideoError> {
        (**self).select_track(index)
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<Option<usize>, VideoError> {
        (**self).read_sample_data(buf)
    }

    fn sample_time(&self) -> Option<i64> {
        (**self).sample_time()
    }

    fn sample_flags(&self) -> SampleFlags {
        (**self).sample_flags()
    }

    fn advance(&mut self) -> bool {
        (**self).advance()
    }
}

impl<M: Muxer + ?Sized> Muxer for Box<M> {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, VideoError> {
        (**self).add_track(format)
    }

    fn start(&mut self) -> Result<(), VideoError> {
        (**self).start()
    }

    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), VideoError> {
        (**self).write_sample_data(track, data, info)
    }

    fn stop(&mut self) -> Result<(), VideoError> {
        (**self).stop()
    }
}

pub(crate) fn sample_too_large(size: usize, capacity: usize) -> VideoError {
    VideoError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("sample of {size} bytes exceeds buffer of {capacity}"),
    ))
}
