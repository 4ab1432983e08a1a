use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use transkit_video::{
    ColorMatrix, Demuxer, FrameFilter, Mp4Demuxer, RenderMode, StreamMuxer, SystemBackend,
    TranscodeConfig, Transcoder, video_duration_us,
};

#[derive(Parser)]
#[command(name = "transkit")]
#[command(about = "Remux and transcode MP4 audio/video streams", long_about = None)]
struct Cli {
    /// Print pipeline progress
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Combine the audio of one file with the video of another
    Mux {
        /// File providing the audio track
        #[arg(long)]
        audio: PathBuf,
        /// File providing the video track
        #[arg(long)]
        video: PathBuf,
        /// Output MP4 file
        #[arg(long)]
        out: PathBuf,
    },
    /// Decode, filter and re-encode the video track of a file
    Transcode {
        /// Source MP4 file
        #[arg(long)]
        input: PathBuf,
        /// Output MP4 file
        #[arg(long)]
        out: PathBuf,
        /// Mux the audio of this file into the result
        #[arg(long)]
        audio: Option<PathBuf>,
        /// Color filter: identity, grayscale, sepia or invert
        #[arg(long)]
        filter: Option<String>,
        /// Output codec MIME type
        #[arg(long)]
        codec: Option<String>,
        /// JSON transcode settings; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,
        /// Render on the CPU even when a GPU is available
        #[arg(long)]
        software: bool,
    },
    /// List the tracks of a file
    Info {
        /// File to inspect
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Mux { audio, video, out } => run_mux(&audio, &video, &out),
        Commands::Transcode {
            input,
            out,
            audio,
            filter,
            codec,
            config,
            software,
        } => {
            let config = transcode_config(config.as_deref(), filter.as_deref(), codec)?;
            let render = if software {
                RenderMode::Software
            } else {
                RenderMode::Auto
            };
            run_transcode(&input, &out, audio.as_deref(), config, render)
        }
        Commands::Info { file } => run_info(&file),
    }
}

fn run_mux(audio: &Path, video: &Path, out: &Path) -> Result<()> {
    println!("{}", "🎬 Muxing streams...".green().bold());

    let stats = StreamMuxer::default()
        .mux_files(audio, video, out)
        .with_context(|| format!("Failed to mux into {}", out.display()))?;

    println!(
        "{} {} video samples ({} bytes), {} audio samples ({} bytes)",
        "✅ Wrote".green().bold(),
        stats.video_samples,
        stats.video_bytes,
        stats.audio_samples,
        stats.audio_bytes
    );
    println!("Output: {}", out.display());
    Ok(())
}

fn transcode_config(
    path: Option<&Path>,
    filter: Option<&str>,
    codec: Option<String>,
) -> Result<TranscodeConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid transcode settings in {}", path.display()))?
        }
        None => TranscodeConfig::default(),
    };

    if let Some(name) = filter {
        let color = ColorMatrix::preset(name)
            .with_context(|| format!("Unknown filter '{name}'"))?;
        config.filter = FrameFilter::with_color(color);
    }
    if let Some(mime) = codec {
        config.output_mime = mime;
    }
    Ok(config)
}

fn run_transcode(
    input: &Path,
    out: &Path,
    audio: Option<&Path>,
    config: TranscodeConfig,
    render: RenderMode,
) -> Result<()> {
    println!("{}", "🎨 Transcoding video...".green().bold());
    println!("Codec: {}", config.output_mime);

    // With an audio source the filtered video goes to a scratch file first.
    let video_out = match audio {
        Some(_) => out.with_extension("video.mp4"),
        None => out.to_path_buf(),
    };

    let transcoder = Transcoder::with_backend(config, SystemBackend::new(render));
    let stats = transcoder
        .convert(input, &video_out)
        .with_context(|| format!("Failed to transcode {}", input.display()))?;

    println!(
        "{} {} frames, {} samples written",
        "✅ Rendered".green().bold(),
        stats.frames_rendered,
        stats.samples_written
    );
    if stats.dropped_frames > 0 {
        println!(
            "{}",
            format!("⚠️ {} decoded frames were dropped", stats.dropped_frames).yellow()
        );
    }

    if let Some(audio) = audio {
        let muxed = run_mux(audio, &video_out, out);
        if let Err(err) = std::fs::remove_file(&video_out) {
            log::warn!("Could not remove {}: {err}", video_out.display());
        }
        muxed?;
    } else {
        println!("Output: {}", out.display());
    }
    Ok(())
}

fn run_info(file: &Path) -> Result<()> {
    let demuxer =
        Mp4Demuxer::open(file).with_context(|| format!("Failed to open {}", file.display()))?;

    println!("{}", file.display().bold());
    for index in 0..demuxer.track_count() {
        let format = demuxer.track_format(index)?;
        let detail = match (format.size(), format.sample_rate) {
            (Some((width, height)), _) => format!("{width}x{height}"),
            (None, Some(rate)) => format!(
                "{rate} Hz, {} ch",
                format.channel_count.unwrap_or_default()
            ),
            (None, None) => String::new(),
        };
        println!("  #{index} {} {detail}", format.mime.cyan());
    }

    match video_duration_us(file) {
        Ok(duration) => println!("Video duration: {:.3} s", duration as f64 / 1e6),
        Err(err) => println!("{}", format!("No video duration: {err}").yellow()),
    }
    Ok(())
}
