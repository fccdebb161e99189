use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context as AnyhowContext, Result};
use clap::Parser;
use indicatif::ProgressStyle;
use tracing::{info, info_span};
use tracing_core::LevelFilter;
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sparse_tracker::config::Config;
use sparse_tracker::control::{ChannelControl, ControlSignal};
use sparse_tracker::display::RerunSink;
use sparse_tracker::session::Session;
use sparse_tracker::tracker::Tracker;
use sparse_tracker::video::*;

#[derive(Parser)]
pub struct Args {
    /// Raw video file (`-` for stdin). A synthetic video is generated when omitted.
    #[clap(short, long)]
    pub input: Option<String>,

    #[clap(long, default_value = "640")]
    pub width: u32,

    #[clap(long, default_value = "480")]
    pub height: u32,

    #[clap(long, value_enum, default_value = "rgb24")]
    pub pixel_format: PixelFormat,

    /// Length of the synthetic video
    #[clap(long, default_value = "300")]
    pub frames: u64,

    /// Synthetic camera pan in pixels per frame
    #[clap(long, default_value = "2", allow_hyphen_values = true)]
    pub velocity_x: f64,

    #[clap(long, default_value = "1", allow_hyphen_values = true)]
    pub velocity_y: f64,

    #[clap(long, default_value = "./logs/tracks.rrd")]
    pub recording: String,

    /// Do not write a recording
    #[clap(long)]
    pub headless: bool,

    /// Write one JSON step report per frame to this file
    #[clap(long)]
    pub stats: Option<String>,

    #[clap(long, default_value = "2000")]
    pub read_timeout_ms: u64,

    /// Cancel the session after this many seconds
    #[clap(long)]
    pub max_seconds: Option<u64>,

    /// Read control keys from stdin: q quits, r re-seeds, c clears trails, + and - change the point budget
    #[clap(long)]
    pub interactive: bool,

    #[clap(long, default_value = "info")]
    pub log_level: LevelFilter,

    #[clap(flatten)]
    pub config: Config,
}

fn open_source(args: &Args) -> Result<Box<dyn VideoSource + Send>> {
    let source: Box<dyn VideoSource + Send> = match args.input.as_deref() {
        None => Box::new(SyntheticVideo::new(
            args.width,
            args.height,
            Some(args.frames),
            (args.velocity_x, args.velocity_y),
            args.config.seed,
        )?),
        Some("-") => Box::new(RawVideoInput::new(
            BufReader::new(std::io::stdin()),
            args.width,
            args.height,
            args.pixel_format,
        )?),
        Some(path) => Box::new(RawVideoInput::open(
            Path::new(path),
            args.width,
            args.height,
            args.pixel_format,
        )?),
    };
    Ok(source)
}

fn read_keys(sender: Sender<ControlSignal>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        for key in line.chars() {
            let signal = ControlSignal::from_key(key as i32);
            if signal != ControlSignal::Continue && sender.send(signal).is_err() {
                return;
            }
        }
    }
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();
    args.config.validate()?;
    if args.interactive && args.input.as_deref() == Some("-") {
        bail!("--interactive reads keys from stdin, which is already the video input");
    }

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .with(args.log_level)
        .init();
    info!("config {}", serde_json::to_string(&args.config)?);

    let source = open_source(&args)?;
    let source = TimeoutSource::spawn(source, Duration::from_millis(args.read_timeout_ms))?;
    let frame_count = source.len_hint();

    let tracker = Tracker::new(&args.config)?;
    let mut session = Session::new(tracker, Box::new(source));
    if !args.headless {
        info!("recording to {}", args.recording);
        session = session.with_sink(Box::new(RerunSink::save(Path::new(&args.recording))?));
    }
    if let Some(path) = &args.stats {
        let file = File::create(path).with_context(|| format!("cannot create {path}"))?;
        session = session.with_stats(Box::new(BufWriter::new(file)));
    }
    if args.interactive {
        let (sender, receiver) = channel();
        thread::spawn(move || read_keys(sender));
        session = session.with_control(Box::new(ChannelControl::new(receiver)));
    }
    if let Some(seconds) = args.max_seconds {
        let cancel = Arc::new(AtomicBool::new(false));
        let timer = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(seconds));
            timer.store(true, Ordering::Relaxed);
        });
        session = session.with_cancel_flag(cancel);
    }

    let header_span = info_span!("tracking");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    if let Some(frame_count) = frame_count {
        header_span.pb_set_length(frame_count);
    }
    let header_span_enter = header_span.enter();

    let summary = session.run()?;

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    info!("summary {}", serde_json::to_string(&summary)?);
    Ok(())
}
