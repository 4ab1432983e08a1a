//! MP4 muxer.
//!
//! Samples are streamed into `mdat` as they arrive; the sample tables are
//! kept in memory and written as `moov` when the muxer stops.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use transkit_codec::{BufferInfo, TrackFormat, mime};

use crate::{Muxer, VideoError};

/// Media timescale: one tick per microsecond, so timestamps round-trip exactly.
const MEDIA_TIMESCALE: u32 = 1_000_000;
/// Movie header timescale.
const MOVIE_TIMESCALE: u32 = 1000;

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct SampleRecord {
    offset: u64,
    size: u32,
    time_us: i64,
    key_frame: bool,
}

#[derive(Debug)]
struct MuxTrack {
    format: TrackFormat,
    entry: [u8; 4],
    samples: Vec<SampleRecord>,
}

impl MuxTrack {
    fn is_audio(&self) -> bool {
        &self.entry == b"mp4a"
    }

    /// Sample timing in microseconds: decode durations and composition
    /// offsets, one per sample.
    ///
    /// Samples arrive in decode order with presentation times only. Decode
    /// times are the presentation times sorted ascending and rebased to
    /// zero, so reordered streams get a per-sample offset. The last duration
    /// repeats the previous one.
    fn timing(&self) -> (Vec<u64>, Vec<i64>) {
        let mut sorted: Vec<i64> = self.samples.iter().map(|s| s.time_us).collect();
        sorted.sort_unstable();
        let Some(&first) = sorted.first() else {
            return (Vec::new(), Vec::new());
        };

        let mut durations: Vec<u64> = sorted.windows(2).map(|w| w[1].abs_diff(w[0])).collect();
        durations.push(durations.last().copied().unwrap_or(0));

        let offsets = self
            .samples
            .iter()
            .zip(&sorted)
            .map(|(sample, &decode)| sample.time_us - (decode - first))
            .collect();
        (durations, offsets)
    }
}

/// MP4 file writer.
///
/// Tracks must be added before [`start`](Muxer::start). The file is only
/// complete after [`stop`](Muxer::stop).
pub struct Mp4Muxer {
    path: PathBuf,
    file: BufWriter<File>,
    tracks: Vec<MuxTrack>,
    state: State,
    mdat_start: u64,
    position: u64,
}

impl Mp4Muxer {
    /// Create the output file.
    ///
    /// # Errors
    ///
    /// Returns `VideoError::Io` if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, VideoError> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file: BufWriter::new(file),
            tracks: Vec::new(),
            state: State::Idle,
            mdat_start: 0,
            position: 0,
        })
    }

    /// Number of samples stored for `track`.
    #[must_use]
    pub fn sample_count(&self, track: usize) -> usize {
        self.tracks.get(track).map_or(0, |t| t.samples.len())
    }

    fn write_ftyp(&mut self) -> Result<(), VideoError> {
        let mut ftyp = Vec::new();
        write_box(&mut ftyp, b"ftyp", |b| {
            b.write_all(b"isom")?;
            b.write_u32::<BigEndian>(512)?;
            for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
                b.write_all(brand)?;
            }
            Ok(())
        })?;
        self.file.write_all(&ftyp)?;
        self.position = ftyp.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        // Patch the 64-bit mdat size now that every sample is written.
        let mdat_size = self.position - self.mdat_start;
        self.file.seek(SeekFrom::Start(self.mdat_start + 8))?;
        self.file.write_u64::<BigEndian>(mdat_size)?;
        self.file.seek(SeekFrom::Start(self.position))?;

        let moov = self.build_moov()?;
        self.file.write_all(&moov)?;
        self.file.flush()?;
        Ok(())
    }

    fn build_moov(&self) -> std::io::Result<Vec<u8>> {
        let movie_duration = self
            .tracks
            .iter()
            .map(|t| to_movie_time(track_duration(t)))
            .max()
            .unwrap_or(0);

        let mut moov = Vec::new();
        write_box(&mut moov, b"moov", |b| {
            write_mvhd(b, movie_duration, self.tracks.len())?;
            for (index, track) in self.tracks.iter().enumerate() {
                write_trak(b, track, index)?;
            }
            Ok(())
        })?;
        Ok(moov)
    }
}

impl std::fmt::Debug for Mp4Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4Muxer")
            .field("path", &self.path)
            .field("tracks", &self.tracks.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn sample_entry(format: &TrackFormat) -> Result<[u8; 4], VideoError> {
    let entry = match format.mime.as_str() {
        mime::VIDEO_AVC => b"avc1",
        mime::VIDEO_HEVC => b"hev1",
        mime::VIDEO_AV1 => b"av01",
        mime::VIDEO_VP9 => b"vp09",
        mime::VIDEO_RAW => b"raw ",
        mime::AUDIO_AAC => b"mp4a",
        other => return Err(VideoError::NotSupported(format!("cannot store {other} in MP4"))),
    };
    Ok(*entry)
}

impl Muxer for Mp4Muxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, VideoError> {
        if self.state != State::Idle {
            return Err(VideoError::InvalidState(
                "cannot add a track after start".into(),
            ));
        }
        let entry = sample_entry(format)?;
        if &entry == b"mp4a" && (format.sample_rate.is_none() || format.channel_count.is_none()) {
            return Err(VideoError::Container(
                "audio track needs a sample rate and channel count".into(),
            ));
        }
        if &entry == b"mp4a" {
            let too_wide = |value: Option<u32>| value.is_some_and(|v| v > u32::from(u16::MAX));
            if too_wide(format.sample_rate) || too_wide(format.channel_count) {
                return Err(VideoError::Container(format!(
                    "audio track of {} Hz, {} channels does not fit an mp4a entry",
                    format.sample_rate.unwrap_or_default(),
                    format.channel_count.unwrap_or_default()
                )));
            }
        } else if format.size().is_none() {
            return Err(VideoError::Container("video track needs a frame size".into()));
        }

        self.tracks.push(MuxTrack {
            format: format.clone(),
            entry,
            samples: Vec::new(),
        });
        log::debug!("added {} track {}", format.mime, self.tracks.len() - 1);
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), VideoError> {
        if self.state != State::Idle {
            return Err(VideoError::InvalidState("muxer already started".into()));
        }
        if self.tracks.is_empty() {
            return Err(VideoError::InvalidState("muxer has no tracks".into()));
        }
        self.write_ftyp()?;

        // Large-size mdat header; the size is patched in `stop`.
        self.mdat_start = self.position;
        self.file.write_u32::<BigEndian>(1)?;
        self.file.write_all(b"mdat")?;
        self.file.write_u64::<BigEndian>(0)?;
        self.position += 16;

        self.state = State::Started;
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), VideoError> {
        if self.state != State::Started {
            return Err(VideoError::InvalidState(
                "samples can only be written between start and stop".into(),
            ));
        }
        let target = self
            .tracks
            .get_mut(track)
            .ok_or_else(|| VideoError::Container(format!("no track {track}")))?;

        if info.size == 0 || info.is_codec_config() {
            log::trace!("skipping {} byte marker on track {track}", info.size);
            return Ok(());
        }
        let end = info.offset + info.size;
        let payload = data.get(info.offset..end).ok_or_else(|| {
            VideoError::Container(format!("sample range {}..{end} out of bounds", info.offset))
        })?;
        if info.presentation_time_us < 0 {
            return Err(VideoError::Container(format!(
                "negative timestamp {} on track {track}",
                info.presentation_time_us
            )));
        }
        let size = u32::try_from(payload.len())
            .map_err(|_| VideoError::Container("sample larger than 4 GiB".into()))?;

        self.file.write_all(payload)?;
        target.samples.push(SampleRecord {
            offset: self.position,
            size,
            time_us: info.presentation_time_us,
            key_frame: info.flags.contains(transkit_codec::SampleFlags::KEY_FRAME),
        });
        self.position += u64::from(size);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), VideoError> {
        match self.state {
            State::Started => {}
            State::Idle => {
                return Err(VideoError::InvalidState("muxer was never started".into()));
            }
            State::Stopped => return Ok(()),
        }
        self.state = State::Stopped;
        self.finish()?;
        log::debug!(
            "wrote {} ({} track(s), {} bytes of media)",
            self.path.display(),
            self.tracks.len(),
            self.position - self.mdat_start - 16
        );
        Ok(())
    }
}

/// Write a box of type `fourcc` whose body is produced by `body`.
fn write_box<F>(out: &mut Vec<u8>, fourcc: &[u8; 4], body: F) -> std::io::Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
{
    let mut inner = Vec::new();
    body(&mut inner)?;
    let size = u32::try_from(inner.len() + 8)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "box too large"))?;
    out.write_u32::<BigEndian>(size)?;
    out.write_all(fourcc)?;
    out.write_all(&inner)
}

/// Write a full box header (version + flags).
fn full_box_header(b: &mut Vec<u8>, version: u8, flags: u32) -> std::io::Result<()> {
    b.write_u32::<BigEndian>((u32::from(version) << 24) | (flags & 0x00FF_FFFF))
}

fn write_matrix(b: &mut Vec<u8>) -> std::io::Result<()> {
    for value in UNITY_MATRIX {
        b.write_u32::<BigEndian>(value)?;
    }
    Ok(())
}

/// Write creation/modification times and, between them and the duration,
/// whatever `middle` adds. Picks version 1 when `duration` needs 64 bits.
fn write_times<F>(b: &mut Vec<u8>, flags: u32, duration: u64, middle: F) -> std::io::Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
{
    match u32::try_from(duration) {
        Ok(duration) => {
            full_box_header(b, 0, flags)?;
            b.write_u32::<BigEndian>(0)?;
            b.write_u32::<BigEndian>(0)?;
            middle(b)?;
            b.write_u32::<BigEndian>(duration)
        }
        Err(_) => {
            full_box_header(b, 1, flags)?;
            b.write_u64::<BigEndian>(0)?;
            b.write_u64::<BigEndian>(0)?;
            middle(b)?;
            b.write_u64::<BigEndian>(duration)
        }
    }
}

fn track_duration(track: &MuxTrack) -> u64 {
    track.timing().0.iter().sum()
}

const fn to_movie_time(media_time: u64) -> u64 {
    media_time / (MEDIA_TIMESCALE / MOVIE_TIMESCALE) as u64
}

fn write_mvhd(b: &mut Vec<u8>, duration: u64, track_count: usize) -> std::io::Result<()> {
    write_box(b, b"mvhd", |b| {
        write_times(b, 0, duration, |b| b.write_u32::<BigEndian>(MOVIE_TIMESCALE))?;
        b.write_u32::<BigEndian>(0x0001_0000)?; // rate 1.0
        b.write_u16::<BigEndian>(0x0100)?; // volume 1.0
        b.write_all(&[0u8; 10])?;
        write_matrix(b)?;
        b.write_all(&[0u8; 24])?;
        b.write_u32::<BigEndian>(u32::try_from(track_count + 1).unwrap_or(u32::MAX))
    })
}

fn write_trak(b: &mut Vec<u8>, track: &MuxTrack, index: usize) -> std::io::Result<()> {
    let track_id = u32::try_from(index + 1).unwrap_or(u32::MAX);
    let duration = track_duration(track);

    write_box(b, b"trak", |b| {
        write_box(b, b"tkhd", |b| {
            // enabled | in movie
            write_times(b, 0x000003, to_movie_time(duration), |b| {
                b.write_u32::<BigEndian>(track_id)?;
                b.write_u32::<BigEndian>(0)
            })?;
            b.write_all(&[0u8; 8])?;
            b.write_u16::<BigEndian>(0)?; // layer
            b.write_u16::<BigEndian>(0)?; // alternate group
            b.write_u16::<BigEndian>(if track.is_audio() { 0x0100 } else { 0 })?;
            b.write_u16::<BigEndian>(0)?;
            write_matrix(b)?;
            let (width, height) = track.format.size().unwrap_or((0, 0));
            b.write_u32::<BigEndian>(width << 16)?;
            b.write_u32::<BigEndian>(height << 16)
        })?;
        write_box(b, b"mdia", |b| write_mdia(b, track, duration))
    })
}

fn write_mdia(b: &mut Vec<u8>, track: &MuxTrack, duration: u64) -> std::io::Result<()> {
    write_box(b, b"mdhd", |b| {
        write_times(b, 0, duration, |b| b.write_u32::<BigEndian>(MEDIA_TIMESCALE))?;
        b.write_u16::<BigEndian>(0x55C4)?; // "und"
        b.write_u16::<BigEndian>(0)
    })?;
    write_box(b, b"hdlr", |b| {
        full_box_header(b, 0, 0)?;
        b.write_u32::<BigEndian>(0)?;
        b.write_all(if track.is_audio() { b"soun" } else { b"vide" })?;
        b.write_all(&[0u8; 12])?;
        b.write_all(if track.is_audio() {
            b"SoundHandler\0".as_slice()
        } else {
            b"VideoHandler\0".as_slice()
        })
    })?;
    write_box(b, b"minf", |b| {
        if track.is_audio() {
            write_box(b, b"smhd", |b| {
                full_box_header(b, 0, 0)?;
                b.write_u16::<BigEndian>(0)?; // balance
                b.write_u16::<BigEndian>(0)
            })?;
        } else {
            write_box(b, b"vmhd", |b| {
                full_box_header(b, 0, 1)?;
                b.write_u16::<BigEndian>(0)?; // graphics mode
                b.write_all(&[0u8; 6])
            })?;
        }
        write_box(b, b"dinf", |b| {
            write_box(b, b"dref", |b| {
                full_box_header(b, 0, 0)?;
                b.write_u32::<BigEndian>(1)?;
                write_box(b, b"url ", |b| full_box_header(b, 0, 1))
            })
        })?;
        write_box(b, b"stbl", |b| write_stbl(b, track))
    })
}

fn write_sample_entry(b: &mut Vec<u8>, track: &MuxTrack) -> std::io::Result<()> {
    let format = &track.format;
    write_box(b, &track.entry, |b| {
        b.write_all(&[0u8; 6])?;
        b.write_u16::<BigEndian>(1)?; // data reference index
        if track.is_audio() {
            b.write_all(&[0u8; 8])?;
            let channels = format.channel_count.unwrap_or(2);
            b.write_u16::<BigEndian>(u16::try_from(channels).map_err(|_| invalid("too many channels"))?)?;
            b.write_u16::<BigEndian>(16)?; // sample size
            b.write_u16::<BigEndian>(0)?;
            b.write_u16::<BigEndian>(0)?;
            let rate = format.sample_rate.unwrap_or(44_100);
            let rate = u16::try_from(rate).map_err(|_| invalid("sample rate above 65535 Hz"))?;
            b.write_u32::<BigEndian>(u32::from(rate) << 16)?;
        } else {
            let (width, height) = format.size().unwrap_or((0, 0));
            b.write_u16::<BigEndian>(0)?;
            b.write_u16::<BigEndian>(0)?;
            b.write_all(&[0u8; 12])?;
            b.write_u16::<BigEndian>(u16::try_from(width).unwrap_or(u16::MAX))?;
            b.write_u16::<BigEndian>(u16::try_from(height).unwrap_or(u16::MAX))?;
            b.write_u32::<BigEndian>(0x0048_0000)?; // 72 dpi
            b.write_u32::<BigEndian>(0x0048_0000)?;
            b.write_u32::<BigEndian>(0)?;
            b.write_u16::<BigEndian>(1)?; // frame count
            b.write_all(&[0u8; 32])?; // compressor name
            b.write_u16::<BigEndian>(0x0018)?;
            b.write_i16::<BigEndian>(-1)?;
        }
        if let Some(config) = &format.codec_config {
            b.write_all(config)?;
        }
        Ok(())
    })
}

/// Run-length encode `values` into (count, value) pairs.
fn run_lengths<T: Copy + PartialEq>(values: &[T]) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for &value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_owned())
}

fn write_stbl(b: &mut Vec<u8>, track: &MuxTrack) -> std::io::Result<()> {
    let samples = &track.samples;
    let count = u32::try_from(samples.len()).map_err(|_| invalid("too many samples"))?;

    write_box(b, b"stsd", |b| {
        full_box_header(b, 0, 0)?;
        b.write_u32::<BigEndian>(1)?;
        write_sample_entry(b, track)
    })?;

    let (durations, offsets) = track.timing();
    write_box(b, b"stts", |b| {
        let runs = run_lengths(&durations);
        full_box_header(b, 0, 0)?;
        b.write_u32::<BigEndian>(u32::try_from(runs.len()).map_err(|_| invalid("stts overflow"))?)?;
        for (run, delta) in runs {
            b.write_u32::<BigEndian>(run)?;
            b.write_u32::<BigEndian>(u32::try_from(delta).map_err(|_| invalid("sample gap too long"))?)?;
        }
        Ok(())
    })?;

    // Version 1 offsets are signed.
    if offsets.iter().any(|&offset| offset != 0) {
        let version = u8::from(offsets.iter().any(|&offset| offset < 0));
        let runs = run_lengths(&offsets);
        write_box(b, b"ctts", |b| {
            full_box_header(b, version, 0)?;
            b.write_u32::<BigEndian>(u32::try_from(runs.len()).map_err(|_| invalid("ctts overflow"))?)?;
            for (run, offset) in runs {
                b.write_u32::<BigEndian>(run)?;
                b.write_i32::<BigEndian>(
                    i32::try_from(offset).map_err(|_| invalid("composition offset too large"))?,
                )?;
            }
            Ok(())
        })?;
    }

    if samples.iter().any(|s| !s.key_frame) {
        write_box(b, b"stss", |b| {
            let sync: Vec<u32> = samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.key_frame)
                .filter_map(|(i, _)| u32::try_from(i + 1).ok())
                .collect();
            full_box_header(b, 0, 0)?;
            b.write_u32::<BigEndian>(u32::try_from(sync.len()).map_err(|_| invalid("stss overflow"))?)?;
            for index in sync {
                b.write_u32::<BigEndian>(index)?;
            }
            Ok(())
        })?;
    }

    write_box(b, b"stsz", |b| {
        full_box_header(b, 0, 0)?;
        b.write_u32::<BigEndian>(0)?;
        b.write_u32::<BigEndian>(count)?;
        for sample in samples {
            b.write_u32::<BigEndian>(sample.size)?;
        }
        Ok(())
    })?;

    // One sample per chunk.
    write_box(b, b"stsc", |b| {
        full_box_header(b, 0, 0)?;
        if samples.is_empty() {
            b.write_u32::<BigEndian>(0)
        } else {
            b.write_u32::<BigEndian>(1)?;
            b.write_u32::<BigEndian>(1)?;
            b.write_u32::<BigEndian>(1)?;
            b.write_u32::<BigEndian>(1)
        }
    })?;

    let large = samples.iter().any(|s| s.offset > u64::from(u32::MAX));
    write_box(b, if large { b"co64" } else { b"stco" }, |b| {
        full_box_header(b, 0, 0)?;
        b.write_u32::<BigEndian>(count)?;
        for sample in samples {
            if large {
                b.write_u64::<BigEndian>(sample.offset)?;
            } else {
                b.write_u32::<BigEndian>(u32::try_from(sample.offset).unwrap_or(u32::MAX))?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use transkit_codec::SampleFlags;

    #[test]
    fn box_size_includes_header() {
        let mut out = Vec::new();
        write_box(&mut out, b"free", |b| b.write_all(&[1, 2, 3])).unwrap();
        assert_eq!(out, vec![0, 0, 0, 11, b'f', b'r', b'e', b'e', 1, 2, 3]);
    }

    fn video_track(times: &[i64]) -> MuxTrack {
        MuxTrack {
            format: TrackFormat::video(mime::VIDEO_AVC, 16, 16),
            entry: *b"avc1",
            samples: times
                .iter()
                .map(|&t| SampleRecord {
                    offset: 0,
                    size: 1,
                    time_us: t,
                    key_frame: true,
                })
                .collect(),
        }
    }

    #[test]
    fn durations_repeat_last_delta() {
        let (durations, offsets) = video_track(&[0, 40, 80, 130]).timing();
        assert_eq!(durations, vec![40, 40, 50, 50]);
        assert_eq!(run_lengths(&durations), vec![(2, 40), (2, 50)]);
        assert!(offsets.iter().all(|&o| o == 0));
    }

    #[test]
    fn late_start_becomes_constant_offset() {
        let (durations, offsets) = video_track(&[500, 540, 580]).timing();
        assert_eq!(durations, vec![40, 40, 40]);
        assert_eq!(offsets, vec![500, 500, 500]);
    }

    #[test]
    fn reordered_samples_get_composition_offsets() {
        // I P B B in decode order.
        let (durations, offsets) = video_track(&[0, 120, 40, 80]).timing();
        assert_eq!(durations, vec![40, 40, 40, 40]);
        assert_eq!(offsets, vec![0, 80, -40, -40]);
        assert_eq!(run_lengths(&offsets), vec![(1, 0), (1, 80), (2, -40)]);
    }

    #[test]
    fn markers_are_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Mp4Muxer::create(dir.path().join("markers.mp4")).unwrap();
        let track = muxer
            .add_track(&TrackFormat::video(mime::VIDEO_AVC, 16, 16))
            .unwrap();
        muxer.start().unwrap();

        let config = BufferInfo::new(2, 0, SampleFlags::CODEC_CONFIG);
        muxer.write_sample_data(track, &[1, 2], &config).unwrap();
        muxer
            .write_sample_data(track, &[], &BufferInfo::end_of_stream())
            .unwrap();
        assert_eq!(muxer.sample_count(track), 0);
        muxer.stop().unwrap();
    }

    #[test]
    fn negative_timestamps_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Mp4Muxer::create(dir.path().join("negative.mp4")).unwrap();
        let track = muxer
            .add_track(&TrackFormat::video(mime::VIDEO_AVC, 16, 16))
            .unwrap();
        muxer.start().unwrap();

        let data = [0u8; 4];
        muxer
            .write_sample_data(track, &data, &BufferInfo::new(4, 1000, SampleFlags::KEY_FRAME))
            .unwrap();
        muxer
            .write_sample_data(track, &data, &BufferInfo::new(4, 500, SampleFlags::empty()))
            .unwrap();
        let err = muxer
            .write_sample_data(track, &data, &BufferInfo::new(4, -1, SampleFlags::empty()))
            .unwrap_err();
        assert!(matches!(err, VideoError::Container(_)));
        assert_eq!(muxer.sample_count(track), 2);
    }

    #[test]
    fn audio_rate_beyond_entry_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Mp4Muxer::create(dir.path().join("hires.mp4")).unwrap();
        let err = muxer
            .add_track(&TrackFormat::audio(mime::AUDIO_AAC, 96_000, 2))
            .unwrap_err();
        assert!(matches!(err, VideoError::Container(_)));

        assert_eq!(
            muxer
                .add_track(&TrackFormat::audio(mime::AUDIO_AAC, 48_000, 2))
                .unwrap(),
            0
        );
    }

    #[test]
    fn unsupported_media_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = Mp4Muxer::create(dir.path().join("text.mp4")).unwrap();
        let format = TrackFormat {
            mime: "text/plain".into(),
            ..TrackFormat::default()
        };
        assert!(matches!(
            muxer.add_track(&format),
            Err(VideoError::NotSupported(_))
        ));
    }
}
