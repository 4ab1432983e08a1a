//! Track selection.

use transkit_codec::TrackFormat;

use crate::{Demuxer, VideoError};

/// Kind of track to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Media type starts with `video/`.
    Video,
    /// Format declares an audio channel count.
    Audio,
}

impl TrackKind {
    /// Whether `format` is of this kind.
    #[must_use]
    pub fn matches(self, format: &TrackFormat) -> bool {
        match self {
            Self::Video => format.is_video(),
            Self::Audio => format.has_channel_count(),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Select the first track of `kind` and return its format.
///
/// # Errors
///
/// Returns `VideoError::NoMatchingTrack` if no track is of that kind.
pub fn select_track<D: Demuxer + ?Sized>(
    demuxer: &mut D,
    kind: TrackKind,
) -> Result<TrackFormat, VideoError> {
    select_track_by(demuxer, kind.name(), |format| kind.matches(format))
}

/// Select the first track whose format satisfies `predicate`.
///
/// `description` names the wanted track in the error.
///
/// # Errors
///
/// Returns `VideoError::NoMatchingTrack` if no track matches.
pub fn select_track_by<D, P>(
    demuxer: &mut D,
    description: &str,
    predicate: P,
) -> Result<TrackFormat, VideoError>
where
    D: Demuxer + ?Sized,
    P: Fn(&TrackFormat) -> bool,
{
    for index in 0..demuxer.track_count() {
        let format = demuxer.track_format(index)?;
        if predicate(&format) {
            log::debug!("selected {description} track {index} ({})", format.mime);
            demuxer.select_track(index)?;
            return Ok(TrackFormat {
                track_index: Some(index),
                ..format
            });
        }
    }
    Err(VideoError::NoMatchingTrack(format!(
        "no {description} track among {} track(s)",
        demuxer.track_count()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryDemuxer, MemoryTrack};
    use transkit_codec::mime;

    fn demuxer() -> MemoryDemuxer {
        MemoryDemuxer::new(vec![
            MemoryTrack::new(TrackFormat::audio(mime::AUDIO_AAC, 48_000, 2), Vec::new()),
            MemoryTrack::new(TrackFormat::video(mime::VIDEO_AVC, 640, 360), Vec::new()),
            MemoryTrack::new(TrackFormat::video(mime::VIDEO_HEVC, 640, 360), Vec::new()),
        ])
    }

    #[test]
    fn first_match_in_container_order_wins() {
        let mut demuxer = demuxer();
        let format = select_track(&mut demuxer, TrackKind::Video).unwrap();
        assert_eq!(format.mime, mime::VIDEO_AVC);
        assert_eq!(format.track_index, Some(1));
        assert_eq!(demuxer.selected_tracks(), &[1]);
    }

    #[test]
    fn audio_is_found_by_channel_count() {
        let mut demuxer = demuxer();
        let format = select_track(&mut demuxer, TrackKind::Audio).unwrap();
        assert_eq!(format.track_index, Some(0));
    }

    #[test]
    fn missing_track_is_reported() {
        let mut demuxer = MemoryDemuxer::new(vec![MemoryTrack::new(
            TrackFormat::video(mime::VIDEO_AVC, 640, 360),
            Vec::new(),
        )]);
        let err = select_track(&mut demuxer, TrackKind::Audio).unwrap_err();
        assert!(matches!(err, VideoError::NoMatchingTrack(_)));
        assert!(demuxer.selected_tracks().is_empty());
    }

    #[test]
    fn custom_predicate() {
        let mut demuxer = demuxer();
        let format =
            select_track_by(&mut demuxer, "hevc", |f| f.mime == mime::VIDEO_HEVC).unwrap();
        assert_eq!(format.track_index, Some(2));
    }
}
