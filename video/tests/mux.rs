//! Stream muxing across in-memory and MP4 containers.

use std::fs::File;
use std::path::Path;

use mp4::{
    AacConfig, AudioObjectType, AvcConfig, ChannelConfig, MediaConfig, Mp4Config, Mp4Sample,
    Mp4Writer, SampleFreqIndex, TrackConfig,
};
use transkit_codec::{SampleFlags, TrackFormat, mime};
use transkit_video::{
    Demuxer, MemoryDemuxer, MemoryMuxer, MemorySample, MemoryTrack, Mp4Demuxer, MuxConfig,
    StreamMuxer, TrackKind, VideoError, select_track, video_duration_us,
};

fn video_source() -> MemoryDemuxer {
    let samples = (0..30)
        .map(|i| {
            let mut flags = if i % 10 == 0 {
                SampleFlags::KEY_FRAME
            } else {
                SampleFlags::empty()
            };
            if i == 29 {
                flags |= SampleFlags::END_OF_STREAM;
            }
            MemorySample::new(vec![i as u8; 100 + i], i as i64 * 1000, flags)
        })
        .collect();
    MemoryDemuxer::new(vec![MemoryTrack::new(
        TrackFormat::video(mime::VIDEO_AVC, 640, 360),
        samples,
    )])
}

fn audio_source(count: usize) -> MemoryDemuxer {
    let samples = (0..count)
        .map(|i| MemorySample::new(vec![0xA0; 32], i as i64 * 1000, SampleFlags::KEY_FRAME))
        .collect();
    MemoryDemuxer::new(vec![MemoryTrack::new(
        TrackFormat::audio(mime::AUDIO_AAC, 44_100, 2),
        samples,
    )])
}

#[test]
fn mux_preserves_every_sample() {
    let muxer = MemoryMuxer::new();
    let output = muxer.output();
    let stats = StreamMuxer::default()
        .mux(audio_source(10), video_source(), || Ok(muxer))
        .unwrap();

    assert_eq!(stats.video_samples, 30);
    assert_eq!(stats.audio_samples, 10);
    assert!(output.is_stopped());

    let tracks = output.tracks();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].format.mime, mime::VIDEO_AVC);
    assert_eq!(tracks[1].format.mime, mime::AUDIO_AAC);

    let source = video_source();
    let expected = &source_track(&source, 0).samples;
    assert_eq!(&tracks[0].samples, expected);
    assert!(
        tracks[0].samples[29]
            .flags
            .contains(SampleFlags::END_OF_STREAM)
    );

    let times: Vec<i64> = tracks[1]
        .samples
        .iter()
        .map(|s| s.presentation_time_us)
        .collect();
    assert_eq!(times, (0..10).map(|i| i * 1000).collect::<Vec<_>>());
}

fn source_track(demuxer: &MemoryDemuxer, index: usize) -> MemoryTrack {
    let mut copy = demuxer.clone();
    copy.select_track(index).unwrap();
    let mut samples = Vec::new();
    let mut buf = vec![0; 4096];
    while let Some(size) = copy.read_sample_data(&mut buf).unwrap() {
        samples.push(MemorySample::new(
            buf[..size].to_vec(),
            copy.sample_time().unwrap(),
            copy.sample_flags(),
        ));
        if !copy.advance() {
            break;
        }
    }
    MemoryTrack::new(copy.track_format(index).unwrap(), samples)
}

#[test]
fn empty_audio_source_writes_video_only() {
    let muxer = MemoryMuxer::new();
    let output = muxer.output();
    let stats = StreamMuxer::default()
        .mux(audio_source(0), video_source(), || Ok(muxer))
        .unwrap();

    assert_eq!(stats.video_samples, 30);
    assert_eq!(stats.audio_samples, 0);
    assert!(output.tracks()[1].samples.is_empty());
    assert!(output.is_stopped());
}

#[test]
fn muxed_output_reads_back_through_track_selector() {
    let muxer = MemoryMuxer::new();
    let output = muxer.output();
    StreamMuxer::new(MuxConfig::default())
        .mux(audio_source(10), video_source(), || Ok(muxer))
        .unwrap();

    let mut demuxer = output.demuxer();
    let format = select_track(&mut demuxer, TrackKind::Audio).unwrap();
    assert_eq!(format.channel_count, Some(2));
    assert_eq!(format.track_index, Some(1));
}

// MP4 fixtures are produced with the mp4 crate's writer so the demuxer is
// exercised against a file it did not write itself.

fn mp4_config() -> Mp4Config {
    Mp4Config {
        major_brand: "isom".parse().unwrap(),
        minor_version: 512,
        compatible_brands: ["isom", "iso2", "avc1", "mp41"]
            .iter()
            .map(|b| b.parse().unwrap())
            .collect(),
        timescale: 1000,
    }
}

fn avc_track() -> TrackConfig {
    TrackConfig::from(MediaConfig::AvcConfig(AvcConfig {
        width: 320,
        height: 240,
        seq_param_set: vec![0x67, 0x42, 0x00, 0x1e, 0xab],
        pic_param_set: vec![0x68, 0xce, 0x3c, 0x80],
    }))
}

fn aac_track() -> TrackConfig {
    TrackConfig::from(MediaConfig::AacConfig(AacConfig {
        bitrate: 128_000,
        profile: AudioObjectType::AacLowComplexity,
        freq_index: SampleFreqIndex::Freq44100,
        chan_conf: ChannelConfig::Stereo,
    }))
}

fn sample(start_ms: u64, duration_ms: u32, is_sync: bool, len: usize) -> Mp4Sample {
    Mp4Sample {
        start_time: start_ms,
        duration: duration_ms,
        rendering_offset: 0,
        is_sync,
        bytes: bytes::Bytes::from(vec![0x5A; len]),
    }
}

/// Video in I P B B decode order: presentation times run ahead of and behind
/// the decode times.
fn write_reordered_fixture(path: &Path) {
    const OFFSETS_MS: [i32; 4] = [0, 80, -40, -40];
    let file = File::create(path).unwrap();
    let mut writer = Mp4Writer::write_start(file, &mp4_config()).unwrap();
    writer.add_track(&avc_track()).unwrap();
    for i in 0..8u64 {
        let reordered = Mp4Sample {
            rendering_offset: OFFSETS_MS[(i % 4) as usize],
            ..sample(i * 40, 40, i % 4 == 0, 300 + i as usize)
        };
        writer.write_sample(1, &reordered).unwrap();
    }
    writer.add_track(&aac_track()).unwrap();
    for i in 0..5u64 {
        writer.write_sample(2, &sample(i * 23, 23, true, 64)).unwrap();
    }
    writer.write_end().unwrap();
}

fn write_fixture(path: &Path, video: bool, audio: bool) {
    let file = File::create(path).unwrap();
    let mut writer = Mp4Writer::write_start(file, &mp4_config()).unwrap();
    let mut track_id = 0;
    if video {
        writer.add_track(&avc_track()).unwrap();
        track_id += 1;
        for i in 0..12u64 {
            writer
                .write_sample(track_id, &sample(i * 40, 40, i % 4 == 0, 200 + i as usize))
                .unwrap();
        }
    }
    if audio {
        writer.add_track(&aac_track()).unwrap();
        track_id += 1;
        for i in 0..20u64 {
            writer
                .write_sample(track_id, &sample(i * 23, 23, true, 64))
                .unwrap();
        }
    }
    writer.write_end().unwrap();
}

/// (timestamp, flags, length) of every sample of the first `kind` track.
fn samples_of(path: &Path, kind: TrackKind) -> Vec<(i64, SampleFlags, usize)> {
    let mut demuxer = Mp4Demuxer::open(path).unwrap();
    select_track(&mut demuxer, kind).unwrap();
    let mut buf = vec![0; 1024 * 1024];
    let mut out = Vec::new();
    while let Some(size) = demuxer.read_sample_data(&mut buf).unwrap() {
        out.push((
            demuxer.sample_time().unwrap(),
            demuxer.sample_flags(),
            size,
        ));
        if !demuxer.advance() {
            break;
        }
    }
    out
}

#[test]
fn mp4_mux_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("av.mp4");
    let out = dir.path().join("muxed.mp4");
    write_fixture(&input, true, true);

    let stats = StreamMuxer::default()
        .mux_files(&input, &input, &out)
        .unwrap();
    assert_eq!(stats.video_samples, 12);
    assert_eq!(stats.audio_samples, 20);

    let source_video = samples_of(&input, TrackKind::Video);
    let source_audio = samples_of(&input, TrackKind::Audio);
    assert_eq!(source_video.len(), 12);
    assert_eq!(source_video[1].0, 40_000);
    assert!(source_video[0].1.contains(SampleFlags::KEY_FRAME));
    assert!(!source_video[1].1.contains(SampleFlags::KEY_FRAME));

    assert_eq!(samples_of(&out, TrackKind::Video), source_video);
    assert_eq!(samples_of(&out, TrackKind::Audio), source_audio);

    let demuxer = Mp4Demuxer::open(&out).unwrap();
    let video = demuxer.track_format(0).unwrap();
    assert_eq!(video.mime, mime::VIDEO_AVC);
    assert_eq!(video.size(), Some((320, 240)));
    assert!(video.codec_config.is_some());
    let audio = demuxer.track_format(1).unwrap();
    assert_eq!(audio.mime, mime::AUDIO_AAC);
    assert_eq!(audio.sample_rate, Some(44_100));
}

#[test]
fn reordered_video_survives_mux() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("ipbb.mp4");
    let out = dir.path().join("muxed.mp4");
    write_reordered_fixture(&input);

    let source_video = samples_of(&input, TrackKind::Video);
    let times: Vec<i64> = source_video.iter().map(|s| s.0).collect();
    assert_eq!(
        times,
        [0, 120, 40, 80, 160, 280, 200, 240].map(|ms| ms * 1000)
    );

    let stats = StreamMuxer::default()
        .mux_files(&input, &input, &out)
        .unwrap();
    assert_eq!(stats.video_samples, 8);
    assert_eq!(stats.audio_samples, 5);

    assert_eq!(samples_of(&out, TrackKind::Video), source_video);
    assert_eq!(
        samples_of(&out, TrackKind::Audio),
        samples_of(&input, TrackKind::Audio)
    );
}

#[test]
fn missing_video_track_creates_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let audio_only = dir.path().join("audio.mp4");
    let out = dir.path().join("never.mp4");
    write_fixture(&audio_only, false, true);

    let err = StreamMuxer::default()
        .mux_files(&audio_only, &audio_only, &out)
        .unwrap_err();
    assert!(matches!(err, VideoError::NoMatchingTrack(_)));
    assert!(!out.exists());
}

#[test]
fn video_duration_of_first_video_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("av.mp4");
    write_fixture(&path, true, true);

    assert_eq!(video_duration_us(&path).unwrap(), 480_000);
}

#[test]
fn video_duration_without_video_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audio.mp4");
    write_fixture(&path, false, true);

    assert!(matches!(
        video_duration_us(&path),
        Err(VideoError::NoMatchingTrack(_))
    ));
}
