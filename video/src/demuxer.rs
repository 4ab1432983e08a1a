//! MP4 demuxer.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use mp4::WriteBox;
use transkit_codec::{SampleFlags, TrackFormat, mime};

use crate::container::sample_too_large;
use crate::{Demuxer, TrackKind, VideoError};

struct PeekedSample {
    time_us: i64,
    flags: SampleFlags,
    data: Vec<u8>,
}

struct TrackState {
    id: u32,
    format: TrackFormat,
    timescale: u32,
    sample_count: u32,
    /// 1-based id of the next sample to read.
    next_sample: u32,
    peeked: Option<PeekedSample>,
}

/// Demuxer for MP4 files.
///
/// Samples are read lazily, one per selected track ahead of the cursor.
pub struct Mp4Demuxer {
    reader: mp4::Mp4Reader<BufReader<File>>,
    tracks: Vec<TrackState>,
    selected: Vec<usize>,
    error: Option<VideoError>,
}

impl Mp4Demuxer {
    /// Open an MP4 file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its header parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VideoError> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        let mut file = BufReader::new(file);
        let entries = read_moov(&mut file, size)?
            .map(|moov| sample_entries(&moov))
            .unwrap_or_default();
        file.seek(SeekFrom::Start(0))?;
        let reader = mp4::Mp4Reader::read_header(file, size)?;

        let mut ids: Vec<u32> = reader.tracks().keys().copied().collect();
        ids.sort_unstable();

        let mut tracks = Vec::with_capacity(ids.len());
        for (index, id) in ids.into_iter().enumerate() {
            let track = &reader.tracks()[&id];
            let mut format = track_format(track, entries.get(&id))?;
            format.track_index = Some(index);
            tracks.push(TrackState {
                id,
                format,
                timescale: track.timescale().max(1),
                sample_count: track.sample_count(),
                next_sample: 1,
                peeked: None,
            });
        }
        log::debug!(
            "opened {} with {} track(s)",
            path.as_ref().display(),
            tracks.len()
        );

        Ok(Self {
            reader,
            tracks,
            selected: Vec::new(),
            error: None,
        })
    }

    fn current(&self) -> Option<(usize, &PeekedSample)> {
        self.selected
            .iter()
            .filter_map(|&i| self.tracks[i].peeked.as_ref().map(|s| (i, s)))
            .min_by_key(|(i, s)| (s.time_us, *i))
    }

    fn load_next(&mut self, index: usize) -> Result<(), VideoError> {
        let track = &mut self.tracks[index];
        track.peeked = None;
        if track.next_sample > track.sample_count {
            return Ok(());
        }
        let sample = self.reader.read_sample(track.id, track.next_sample)?;
        track.next_sample += 1;

        if let Some(sample) = sample {
            let ticks = i128::from(sample.start_time) + i128::from(sample.rendering_offset);
            let time_us = ticks * 1_000_000 / i128::from(track.timescale);
            let mut flags = SampleFlags::empty();
            if sample.is_sync {
                flags |= SampleFlags::KEY_FRAME;
            }
            track.peeked = Some(PeekedSample {
                time_us: i64::try_from(time_us).unwrap_or(i64::MAX),
                flags,
                data: sample.bytes.to_vec(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Mp4Demuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4Demuxer")
            .field("tracks", &self.tracks.len())
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

fn config_box<B>(b: &B) -> Option<Vec<u8>>
where
    B: for<'a> WriteBox<&'a mut Cursor<Vec<u8>>>,
{
    let mut cursor = Cursor::new(Vec::new());
    b.write_box(&mut cursor).ok()?;
    Some(cursor.into_inner())
}

/// Size of the fixed part of a visual sample entry, after the box header.
const VISUAL_SAMPLE_ENTRY_LEN: usize = 78;

/// One box inside an in-memory `moov`.
struct RawBox<'a> {
    kind: [u8; 4],
    body: &'a [u8],
    bytes: &'a [u8],
}

/// Iterates the boxes packed in a byte slice. Stops at the first malformed
/// header.
struct Boxes<'a> {
    rest: &'a [u8],
}

impl<'a> Boxes<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { rest: data }
    }

    /// Body of the first box of type `kind`.
    fn body_of(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
        Self::new(data).find(|b| &b.kind == kind).map(|b| b.body)
    }
}

impl<'a> Iterator for Boxes<'a> {
    type Item = RawBox<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.rest.get(..8)?;
        let kind = [header[4], header[5], header[6], header[7]];
        let (start, size) = match BigEndian::read_u32(&header[..4]) {
            0 => (8, self.rest.len()),
            1 => (
                16,
                usize::try_from(BigEndian::read_u64(self.rest.get(8..16)?)).ok()?,
            ),
            n => (8, usize::try_from(n).ok()?),
        };
        let (Some(bytes), true) = (self.rest.get(..size), size >= start) else {
            self.rest = &[];
            return None;
        };
        self.rest = &self.rest[size..];
        Some(RawBox {
            kind,
            body: &bytes[start..],
            bytes,
        })
    }
}

/// Body of the top-level `moov` box, if the file has one.
fn read_moov<R: Read + Seek>(reader: &mut R, file_size: u64) -> Result<Option<Vec<u8>>, VideoError> {
    let mut position = 0;
    while position + 8 <= file_size {
        reader.seek(SeekFrom::Start(position))?;
        let mut size = u64::from(reader.read_u32::<BigEndian>()?);
        let mut kind = [0; 4];
        reader.read_exact(&mut kind)?;
        let mut header = 8;
        if size == 1 {
            size = reader.read_u64::<BigEndian>()?;
            header = 16;
        } else if size == 0 {
            size = file_size - position;
        }
        if size < header {
            return Err(VideoError::Container(format!(
                "box at {position} is {size} bytes"
            )));
        }
        if &kind == b"moov" {
            let len = usize::try_from(size - header)
                .map_err(|_| VideoError::Container("moov box too large".into()))?;
            let mut body = vec![0; len];
            reader.read_exact(&mut body)?;
            return Ok(Some(body));
        }
        position = position.saturating_add(size);
    }
    Ok(None)
}

/// First sample entry of a track and its first child box.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SampleEntry {
    kind: [u8; 4],
    /// Frame size from a visual entry.
    size: Option<(u16, u16)>,
    config: Option<Vec<u8>>,
}

impl SampleEntry {
    /// Format for entries the mp4 crate does not model.
    fn track_format(&self, track: &mp4::Mp4Track) -> Option<TrackFormat> {
        let mime = match &self.kind {
            b"av01" => mime::VIDEO_AV1,
            b"raw " => mime::VIDEO_RAW,
            _ => return None,
        };
        let (width, height) = self.size.unwrap_or((track.width(), track.height()));
        let mut format = TrackFormat::video(mime, u32::from(width), u32::from(height));
        format.codec_config.clone_from(&self.config);
        Some(format)
    }
}

/// Sample entries of every track in `moov`, keyed by track id.
fn sample_entries(moov: &[u8]) -> HashMap<u32, SampleEntry> {
    let mut entries = HashMap::new();
    for trak in Boxes::new(moov).filter(|b| &b.kind == b"trak") {
        let id = Boxes::body_of(trak.body, b"tkhd").and_then(|tkhd| {
            let offset = if tkhd.first() == Some(&1) { 20 } else { 12 };
            tkhd.get(offset..offset + 4).map(BigEndian::read_u32)
        });
        let entry = Boxes::body_of(trak.body, b"mdia")
            .and_then(|b| Boxes::body_of(b, b"minf"))
            .and_then(|b| Boxes::body_of(b, b"stbl"))
            .and_then(|b| Boxes::body_of(b, b"stsd"))
            .and_then(|stsd| stsd.get(8..))
            .and_then(|b| Boxes::new(b).next());
        if let (Some(id), Some(entry)) = (id, entry) {
            let size = entry.body.get(24..28).map(|b| {
                (BigEndian::read_u16(&b[..2]), BigEndian::read_u16(&b[2..]))
            });
            let config = entry
                .body
                .get(VISUAL_SAMPLE_ENTRY_LEN..)
                .and_then(|children| Boxes::new(children).next())
                .map(|child| child.bytes.to_vec());
            let entry = SampleEntry {
                kind: entry.kind,
                size,
                config,
            };
            entries.insert(id, entry);
        }
    }
    entries
}

fn track_format(
    track: &mp4::Mp4Track,
    entry: Option<&SampleEntry>,
) -> Result<TrackFormat, VideoError> {
    let stsd = &track.trak.mdia.minf.stbl.stsd;
    let duration_us = i64::try_from(track.duration().as_micros()).unwrap_or(i64::MAX);

    let mut format = if let Some(avc1) = &stsd.avc1 {
        let mut format = TrackFormat::video(mime::VIDEO_AVC, u32::from(avc1.width), u32::from(avc1.height));
        format.codec_config = config_box(&avc1.avcc);
        format
    } else if let Some(hev1) = &stsd.hev1 {
        let mut format = TrackFormat::video(mime::VIDEO_HEVC, u32::from(hev1.width), u32::from(hev1.height));
        format.codec_config = config_box(&hev1.hvcc);
        format
    } else if let Some(vp09) = &stsd.vp09 {
        let mut format = TrackFormat::video(mime::VIDEO_VP9, u32::from(vp09.width), u32::from(vp09.height));
        format.codec_config = config_box(&vp09.vpcc);
        format
    } else if let Some(mp4a) = &stsd.mp4a {
        let mut format = TrackFormat::audio(
            mime::AUDIO_AAC,
            u32::from(mp4a.samplerate.value()),
            u32::from(mp4a.channelcount),
        );
        format.codec_config = mp4a.esds.as_ref().and_then(config_box);
        format
    } else if let Some(format) = entry.and_then(|e| e.track_format(track)) {
        format
    } else {
        match track.track_type()? {
            mp4::TrackType::Video => TrackFormat {
                mime: "video/x-unknown".into(),
                width: Some(u32::from(track.width())),
                height: Some(u32::from(track.height())),
                ..TrackFormat::default()
            },
            mp4::TrackType::Audio => TrackFormat {
                mime: "audio/x-unknown".into(),
                ..TrackFormat::default()
            },
            mp4::TrackType::Subtitle => TrackFormat {
                mime: "text/x-unknown".into(),
                ..TrackFormat::default()
            },
        }
    };

    if format.is_video() {
        let frame_rate = track.frame_rate().round();
        if frame_rate >= 1.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let frame_rate = frame_rate as u32;
            format.frame_rate = Some(frame_rate);
        }
    }
    let bit_rate = track.bitrate();
    if bit_rate > 0 {
        format.bit_rate = Some(bit_rate);
    }
    format.duration_us = Some(duration_us);
    Ok(format)
}

impl Demuxer for Mp4Demuxer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat, VideoError> {
        self.tracks
            .get(index)
            .map(|t| t.format.clone())
            .ok_or_else(|| VideoError::Container(format!("no track {index}")))
    }

    fn select_track(&mut self, index: usize) -> Result<(), VideoError> {
        if index >= self.tracks.len() {
            return Err(VideoError::Container(format!("no track {index}")));
        }
        if !self.selected.contains(&index) {
            self.selected.push(index);
            self.load_next(index)?;
        }
        Ok(())
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<Option<usize>, VideoError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let Some((_, sample)) = self.current() else {
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
        self.current().map(|(_, s)| s.time_us)
    }

    fn sample_flags(&self) -> SampleFlags {
        self.current().map(|(_, s)| s.flags).unwrap_or_default()
    }

    fn advance(&mut self) -> bool {
        let Some((index, _)) = self.current() else {
            return false;
        };
        if let Err(e) = self.load_next(index) {
            log::warn!("failed to read next sample of track {index}: {e}");
            self.error = Some(e);
        }
        self.current().is_some() || self.error.is_some()
    }
}

/// Duration of the first video track in `path`, in microseconds.
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no video track.
pub fn video_duration_us<P: AsRef<Path>>(path: P) -> Result<i64, VideoError> {
    let demuxer = Mp4Demuxer::open(path)?;
    (0..demuxer.track_count())
        .filter_map(|i| demuxer.track_format(i).ok())
        .find(|format| TrackKind::Video.matches(format))
        .map(|format| format.duration_us.unwrap_or_default())
        .ok_or_else(|| VideoError::NoMatchingTrack("no video track".into()))
}
