//! # LVEP Player
//!
//! Headless driver for the decoding bridge. Opens a file through the same
//! `lvep` module entry points a scripting host uses, drains the audio decoder
//! and ticks the video scheduler on a simulated clock.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use lvep_core::info::{inspect, MediaInfo};
use lvep_core::io::{DiskFile, IoBridge, SharedFile};
use lvep_core::module::{open_module_with, Module, ScriptError, Value};
use lvep_core::sync::ManualTimer;
use lvep_core::LvepConfig;

// ============================================================================
// Options
// ============================================================================

struct PlayerOptions {
    input: PathBuf,
    config: Option<PathBuf>,
    info_only: bool,
    json: bool,
    audio: bool,
    video: bool,
    fps: f64,
    ticks: u64,
}

fn print_usage() {
    eprintln!("Usage: lvep-player <file> [options]");
    eprintln!();
    eprintln!("  --info            Print stream information and exit");
    eprintln!("  --json            Print results as JSON");
    eprintln!("  --audio           Decode the audio stream only");
    eprintln!("  --video           Drive the video stream only");
    eprintln!("  --fps <rate>      Simulated render rate (default 60)");
    eprintln!("  --ticks <n>       Render ticks to simulate (default 600)");
    eprintln!("  --config <path>   JSON configuration file");
}

fn parse_args(args: &[String]) -> Result<PlayerOptions> {
    let mut input: Option<PathBuf> = None;
    let mut config = None;
    let mut info_only = false;
    let mut json = false;
    let mut audio_only = false;
    let mut video_only = false;
    let mut fps = 60.0;
    let mut ticks = 600;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--info" => info_only = true,
            "--json" => json = true,
            "--audio" => audio_only = true,
            "--video" => video_only = true,
            "--fps" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --fps"))?;
                fps = value
                    .parse::<f64>()
                    .map_err(|e| anyhow::anyhow!("Invalid frame rate {}: {}", value, e))?;
                if fps <= 0.0 {
                    anyhow::bail!("Frame rate must be positive, got {}", fps);
                }
                i += 1;
            }
            "--ticks" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --ticks"))?;
                ticks = value
                    .parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("Invalid tick count {}: {}", value, e))?;
                i += 1;
            }
            "--config" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                config = Some(PathBuf::from(value));
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                anyhow::bail!("Unknown option {}", other);
            }
            other => input = Some(PathBuf::from(other)),
        }
        i += 1;
    }

    let input = input.ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("Missing input file")
    })?;

    // Neither flag means both streams
    let both = !audio_only && !video_only;
    Ok(PlayerOptions {
        input,
        config,
        info_only,
        json,
        audio: audio_only || both,
        video: video_only || both,
        fps,
        ticks,
    })
}

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Default, Serialize)]
struct AudioStats {
    sample_rate: u32,
    channels: usize,
    duration: f64,
    bytes: u64,
    buffers: u64,
}

#[derive(Debug, Default, Serialize)]
struct VideoStats {
    width: u32,
    height: u32,
    ticks: u64,
    frames_shown: u64,
    position: f64,
}

#[derive(Debug, Default, Serialize)]
struct PlayerReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<AudioStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<VideoStats>,
}

fn run_audio(module: &Module, file: &SharedFile) -> Result<AudioStats, ScriptError> {
    let mut decoder = match module.call("newDecoder", &[Value::File(file.clone())])? {
        Value::Decoder(decoder) => decoder,
        other => {
            return Err(ScriptError::Runtime(format!(
                "newDecoder returned {}",
                other.type_name()
            )))
        }
    };

    let mut stats = AudioStats {
        sample_rate: decoder.sample_rate(),
        channels: decoder.channel_count(),
        duration: decoder.duration(),
        ..Default::default()
    };

    while !decoder.is_finished() {
        let written = decoder.decode();
        if written > 0 {
            stats.bytes += written as u64;
            stats.buffers += 1;
        }
    }

    tracing::info!(
        "Audio: {} Hz, {} channels, {} bytes in {} buffers",
        stats.sample_rate,
        stats.channels,
        stats.bytes,
        stats.buffers
    );
    Ok(stats)
}

fn run_video(
    module: &Module,
    file: &SharedFile,
    timer: &ManualTimer,
    options: &PlayerOptions,
) -> Result<VideoStats, ScriptError> {
    let mut video = match module.call("newVideoStream", &[Value::File(file.clone())])? {
        Value::VideoStream(video) => video,
        other => {
            return Err(ScriptError::Runtime(format!(
                "newVideoStream returned {}",
                other.type_name()
            )))
        }
    };

    let mut stats = VideoStats {
        width: video.width(),
        height: video.height(),
        ..Default::default()
    };

    let step = 1.0 / options.fps;
    for _ in 0..options.ticks {
        timer.advance(step);
        video.fill_back_buffer();
        if video.swap_buffers() {
            stats.frames_shown += 1;
        }
        stats.ticks += 1;
    }
    stats.position = video.tell();

    tracing::info!(
        "Video: {}x{}, {} frames shown over {} ticks, position {:.3}s",
        stats.width,
        stats.height,
        stats.frames_shown,
        stats.ticks,
        stats.position
    );
    Ok(stats)
}

fn print_info(info: &MediaInfo, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(info)?);
        return Ok(());
    }

    println!("{} ({})", info.filename, info.format);
    if let Some(duration) = info.duration() {
        println!("  duration: {:.3}s", duration);
    }
    for stream in &info.streams {
        let detail = match (stream.width, stream.height, stream.sample_rate) {
            (Some(w), Some(h), _) => format!("{}x{}", w, h),
            (_, _, Some(rate)) => format!("{} Hz, {} ch", rate, stream.channels.unwrap_or(0)),
            _ => String::new(),
        };
        println!(
            "  #{} {} {} [{}] {}",
            stream.index, stream.kind, stream.codec, stream.time_base, detail
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("lvep_core=info,lvep_player=info")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("LVEP Player v{}", lvep_core::VERSION);

    let config = match &options.config {
        Some(path) => LvepConfig::load(path)?,
        None => LvepConfig::default(),
    };
    config.validate()?;

    let file: SharedFile = DiskFile::shared(&options.input);

    if options.info_only {
        let info = inspect(IoBridge::from_file(file)?, &config)?;
        return print_info(&info, options.json);
    }

    let timer = ManualTimer::new();
    let module = open_module_with(config, Arc::new(timer.clone()));

    let mut report = PlayerReport::default();
    if options.audio {
        match run_audio(&module, &file) {
            Ok(stats) => report.audio = Some(stats),
            Err(e) if options.video => tracing::warn!("No audio: {}", e),
            Err(e) => return Err(e.into()),
        }
    }
    if options.video {
        match run_video(&module, &file, &timer, &options) {
            Ok(stats) => report.video = Some(stats),
            Err(e) if options.audio && report.audio.is_some() => {
                tracing::warn!("No video: {}", e)
            }
            Err(e) => return Err(e.into()),
        }
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
