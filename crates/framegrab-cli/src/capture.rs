// SPDX-License-Identifier: Apache-2.0

use crate::error::CliError;
use crate::stats::StatsCollector;
use crate::utils;
use clap::Args as ClapArgs;
use framegrab::session::{CaptureConfig, CaptureSession, StreamOptions};
use framegrab::sink::{FileDumpSink, FrameSink, NullSink};
use framegrab::strategy::IoMethod;
use framegrab::Error;
use std::io::Write;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Camera device
    #[arg(short, long, default_value = "/dev/video0")]
    device: String,

    /// Resolution in WxH format
    #[arg(short, long, default_value = "640x480")]
    resolution: String,

    /// Buffer exchange method (mmap, read, or userptr)
    #[arg(short, long, default_value = "mmap")]
    method: String,

    /// Number of frames to capture (0=unlimited)
    #[arg(short = 'n', long, default_value = "100")]
    frames: u64,

    /// Grab a single frame and write it to the output file
    #[arg(short, long)]
    grab: bool,

    /// Output file for grabbed frame
    #[arg(short, long, default_value = "image.dat")]
    output: String,

    /// Frame sink for streaming mode: "dots" prints one dot per frame,
    /// "null" discards frames
    #[arg(long, default_value = "null")]
    sink: String,

    /// Print capture statistics on exit
    #[arg(long)]
    stats: bool,
}

/// Prints one dot per delivered frame, like classic capture tools.
struct DotSink;

impl FrameSink for DotSink {
    fn deliver(&mut self, _frame: &[u8]) -> Result<(), Error> {
        print!(".");
        std::io::stdout().flush()?;
        Ok(())
    }
}

/// Counts delivered frames and bytes on the way to the real sink.
struct Recording {
    inner: Box<dyn FrameSink>,
    stats: StatsCollector,
}

impl FrameSink for Recording {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.stats.record_frame(frame.len() as u64);
        self.inner.deliver(frame)
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Capture parameters: {:?}", args);

    let (width, height) = utils::parse_resolution(&args.resolution)?;
    let method: IoMethod = args.method.parse().map_err(CliError::InvalidArgs)?;

    // One-shot grab writes the first frame and stops; otherwise frames flow
    // to the dot or null sink until the limit or Ctrl+C.
    let (inner, limit): (Box<dyn FrameSink>, Option<u64>) = if args.grab {
        (Box::new(FileDumpSink::new(&args.output)), Some(1))
    } else {
        let sink: Box<dyn FrameSink> = match args.sink.as_str() {
            "dots" => Box::new(DotSink),
            "null" => Box::new(NullSink),
            other => {
                return Err(CliError::InvalidArgs(format!(
                    "unknown sink '{}' (expected dots or null)",
                    other
                )))
            }
        };
        let limit = (args.frames > 0).then_some(args.frames);
        (sink, limit)
    };

    // Install signal handler for graceful shutdown
    let term = utils::install_signal_handler()?;

    let config = CaptureConfig {
        device: args.device.clone().into(),
        width,
        height,
        method,
    };

    log::info!("Opening camera: {}", args.device);
    let mut session = CaptureSession::open(&config)?;
    log::info!(
        "Capturing with {} i/o at {}",
        session.method(),
        session.format()
    );

    let mut options = StreamOptions::unlimited().stop_flag(term);
    options.limit = limit;

    log::info!(
        "Capturing {} frames (Ctrl+C to stop)...",
        match limit {
            Some(n) => n.to_string(),
            None => "unlimited".to_string(),
        }
    );

    let mut sink = Recording {
        inner,
        stats: StatsCollector::new(),
    };
    let result = session.stream(&mut sink, &options);

    if args.sink == "dots" && !args.grab {
        println!();
    }

    // Tear down even when the loop failed, so buffers never leak.
    let shutdown = session.shutdown();
    let delivered = result?;
    shutdown?;

    log::info!("Captured {} frames", delivered);

    if json {
        sink.stats
            .print_json()
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
    } else if args.stats {
        sink.stats.print_text();
    }

    Ok(())
}
