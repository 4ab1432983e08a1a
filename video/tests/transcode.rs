//! End-to-end transcodes with the raw software codec and the CPU renderer.

use std::path::Path;
use std::time::Duration;

use transkit_codec::{BufferInfo, SampleFlags, TrackFormat, mime};
use transkit_video::{
    ColorMatrix, Demuxer, FrameFilter, MemoryDemuxer, MemoryMuxer, MemorySample, MemoryTrack,
    Mp4Demuxer, Mp4Muxer, Muxer, RenderMode, SystemBackend, TrackKind, TranscodeConfig,
    Transcoder, VideoError, select_track,
};

const WIDTH: u32 = 8;
const HEIGHT: u32 = 6;

fn frame_bytes(seed: u8) -> Vec<u8> {
    (0..WIDTH * HEIGHT)
        .flat_map(|i| [seed, (i % 256) as u8, 200 - seed, 255])
        .collect()
}

fn raw_source(frames: usize) -> MemoryDemuxer {
    let samples = (0..frames)
        .map(|i| {
            MemorySample::new(
                frame_bytes(i as u8 * 10),
                i as i64 * 33_333,
                SampleFlags::KEY_FRAME,
            )
        })
        .collect();
    MemoryDemuxer::new(vec![
        MemoryTrack::new(TrackFormat::audio(mime::AUDIO_AAC, 48_000, 2), Vec::new()),
        MemoryTrack::new(
            TrackFormat::video(mime::VIDEO_RAW, WIDTH, HEIGHT).with_frame_rate(30),
            samples,
        ),
    ])
}

fn config(filter: FrameFilter) -> TranscodeConfig {
    TranscodeConfig {
        output_mime: mime::VIDEO_RAW.into(),
        frame_wait_attempts: Some(20),
        filter,
        ..TranscodeConfig::default()
    }
}

fn transcoder(filter: FrameFilter) -> Transcoder<SystemBackend> {
    Transcoder::with_backend(config(filter), SystemBackend::new(RenderMode::Software))
}

#[test]
fn transcode_writes_one_sample_per_rendered_frame() {
    let _ = env_logger::builder().is_test(true).try_init();
    let muxer = MemoryMuxer::new();
    let output = muxer.output();

    let stats = transcoder(FrameFilter::default())
        .convert_with(raw_source(10), || Ok(muxer))
        .unwrap();

    assert_eq!(stats.frames_rendered, 10);
    assert_eq!(stats.samples_written, 10);
    assert!(output.is_stopped());

    let tracks = output.tracks();
    assert_eq!(tracks.len(), 1);
    let track = &tracks[0];
    assert_eq!(track.format.mime, mime::VIDEO_RAW);
    assert_eq!(track.format.size(), Some((WIDTH, HEIGHT)));
    assert_eq!(track.samples.len() as u64, stats.frames_rendered);
    assert_eq!(stats.output_format.as_ref(), Some(&track.format));

    let last = track.samples.last().unwrap();
    assert!(last.flags.contains(SampleFlags::END_OF_STREAM));
    assert!(
        track.samples[..9]
            .iter()
            .all(|s| !s.flags.contains(SampleFlags::END_OF_STREAM))
    );

    for (i, sample) in track.samples.iter().enumerate() {
        let expected = i as i64 * 33_333;
        assert!((sample.presentation_time_us - expected).abs() <= 1);
        assert_eq!(sample.data, frame_bytes(i as u8 * 10));
    }
    assert!(
        track
            .samples
            .windows(2)
            .all(|w| w[0].presentation_time_us <= w[1].presentation_time_us)
    );
}

#[test]
fn default_filter_renders_grayscale() {
    let muxer = MemoryMuxer::new();
    let output = muxer.output();
    let filter = TranscodeConfig::default().filter;
    assert_eq!(filter.color, ColorMatrix::grayscale());

    transcoder(filter)
        .convert_with(raw_source(3), || Ok(muxer))
        .unwrap();

    for sample in &output.tracks()[0].samples {
        for px in sample.data.chunks_exact(4) {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
            assert_eq!(px[3], 255);
        }
    }
}

#[test]
fn empty_video_track_finishes_without_samples() {
    let source = MemoryDemuxer::new(vec![MemoryTrack::new(
        TrackFormat::video(mime::VIDEO_RAW, WIDTH, HEIGHT),
        Vec::new(),
    )]);
    let muxer = MemoryMuxer::new();
    let output = muxer.output();

    let stats = transcoder(FrameFilter::default())
        .convert_with(source, || Ok(muxer))
        .unwrap();

    assert_eq!(stats.frames_rendered, 0);
    assert_eq!(stats.samples_written, 0);
    assert!(output.tracks()[0].samples.is_empty());
}

#[test]
fn audio_only_source_never_opens_output() {
    let source = MemoryDemuxer::new(vec![MemoryTrack::new(
        TrackFormat::audio(mime::AUDIO_AAC, 48_000, 2),
        Vec::new(),
    )]);
    let mut opened = false;

    let err = transcoder(FrameFilter::default())
        .convert_with(source, || {
            opened = true;
            Ok(MemoryMuxer::new())
        })
        .unwrap_err();

    assert!(matches!(err, VideoError::NoMatchingTrack(_)));
    assert!(!opened);
}

#[test]
fn unsupported_output_type_fails_before_output() {
    let mut opened = false;
    let config = TranscodeConfig {
        output_mime: "video/x-unknown".into(),
        ..config(FrameFilter::default())
    };

    let err = Transcoder::with_backend(config, SystemBackend::new(RenderMode::Software))
        .convert_with(raw_source(2), || {
            opened = true;
            Ok(MemoryMuxer::new())
        })
        .unwrap_err();

    assert!(matches!(err, VideoError::Codec(_)));
    assert!(!opened);
}

#[test]
fn oversized_sample_fails_and_stops_output() {
    let muxer = MemoryMuxer::new();
    let output = muxer.output();
    let config = TranscodeConfig {
        max_sample_size: 16,
        codec_timeout: Duration::from_millis(5),
        ..config(FrameFilter::default())
    };

    let err = Transcoder::with_backend(config, SystemBackend::new(RenderMode::Software))
        .convert_with(raw_source(2), || Ok(muxer))
        .unwrap_err();

    assert!(matches!(err, VideoError::Io(_)));
    assert!(!output.is_started());
}

#[test]
fn out_of_range_timestamp_fails_cleanly() {
    let source = MemoryDemuxer::new(vec![MemoryTrack::new(
        TrackFormat::video(mime::VIDEO_RAW, WIDTH, HEIGHT),
        vec![MemorySample::new(
            frame_bytes(0),
            i64::MAX / 100,
            SampleFlags::KEY_FRAME,
        )],
    )]);
    let muxer = MemoryMuxer::new();
    let output = muxer.output();

    let err = transcoder(FrameFilter::default())
        .convert_with(source, || Ok(muxer))
        .unwrap_err();

    assert!(matches!(err, VideoError::Codec(_)));
    assert_eq!(output.tracks().iter().map(|t| t.samples.len()).sum::<usize>(), 0);
}

#[test]
fn transcode_into_mp4_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");

    let stats = transcoder(FrameFilter::default())
        .convert_with(raw_source(5), || Mp4Muxer::create(&path))
        .unwrap();

    assert_eq!(stats.samples_written, 5);
    let demuxer = Mp4Demuxer::open(&path).unwrap();
    assert_eq!(demuxer.track_count(), 1);
}

fn write_raw_mp4(path: &Path, frames: usize) {
    let mut muxer = Mp4Muxer::create(path).unwrap();
    let track = muxer
        .add_track(&TrackFormat::video(mime::VIDEO_RAW, WIDTH, HEIGHT))
        .unwrap();
    muxer.start().unwrap();
    for i in 0..frames {
        let data = frame_bytes(i as u8 * 10);
        let info = BufferInfo::new(data.len(), i as i64 * 33_333, SampleFlags::KEY_FRAME);
        muxer.write_sample_data(track, &data, &info).unwrap();
    }
    muxer.stop().unwrap();
}

/// (timestamp, payload) of every video sample in an MP4 file.
fn video_samples(path: &Path) -> Vec<(i64, Vec<u8>)> {
    let mut demuxer = Mp4Demuxer::open(path).unwrap();
    select_track(&mut demuxer, TrackKind::Video).unwrap();
    let mut buf = vec![0; 64 * 1024];
    let mut out = Vec::new();
    while let Some(size) = demuxer.read_sample_data(&mut buf).unwrap() {
        out.push((demuxer.sample_time().unwrap(), buf[..size].to_vec()));
        if !demuxer.advance() {
            break;
        }
    }
    out
}

#[test]
fn raw_mp4_reads_back_as_raw_video() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.mp4");
    write_raw_mp4(&path, 3);

    let demuxer = Mp4Demuxer::open(&path).unwrap();
    let format = demuxer.track_format(0).unwrap();
    assert_eq!(format.mime, mime::VIDEO_RAW);
    assert_eq!(format.size(), Some((WIDTH, HEIGHT)));
    assert_eq!(format.codec_config, None);
    assert_eq!(video_samples(&path).len(), 3);
}

#[test]
fn convert_mp4_file_to_mp4_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.mp4");
    let output = dir.path().join("out.mp4");
    write_raw_mp4(&input, 6);

    let stats = Transcoder::with_backend(
        config(FrameFilter::default()),
        SystemBackend::new(RenderMode::Software),
    )
    .convert(&input, &output)
    .unwrap();
    assert_eq!(stats.frames_rendered, 6);
    assert_eq!(stats.samples_written, 6);

    let demuxer = Mp4Demuxer::open(&output).unwrap();
    assert_eq!(demuxer.track_count(), 1);
    let format = demuxer.track_format(0).unwrap();
    assert_eq!(format.mime, mime::VIDEO_RAW);
    assert_eq!(format.size(), Some((WIDTH, HEIGHT)));

    let samples = video_samples(&output);
    assert_eq!(samples.len() as u64, stats.frames_rendered);
    for (i, (time_us, data)) in samples.iter().enumerate() {
        assert!((time_us - i as i64 * 33_333).abs() <= 1);
        assert_eq!(data, &frame_bytes(i as u8 * 10));
    }
}
