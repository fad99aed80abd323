// SPDX-License-Identifier: Apache-2.0

use crate::error::CliError;
use clap::Args as ClapArgs;
use framegrab::device::{DeviceControl, VideoDevice};
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Camera device path
    #[arg(short, long, default_value = "/dev/video0")]
    device: String,
}

#[derive(Debug, Serialize)]
struct DeviceReport {
    device: String,
    driver: String,
    card: String,
    bus_info: String,
    driver_version: String,
    video_capture: bool,
    read_write: bool,
    streaming: bool,
    formats: Vec<FormatReport>,
}

#[derive(Debug, Serialize)]
struct FormatReport {
    fourcc: String,
    description: String,
    compressed: bool,
    emulated: bool,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing info command: {:?}", args);

    let device = VideoDevice::open(&args.device)?;
    let cap = device.capability()?;
    let (major, minor, patch) = cap.version_triple();

    let formats = device
        .formats()?
        .into_iter()
        .map(|desc| FormatReport {
            fourcc: desc.fourcc.to_string(),
            description: desc.description,
            compressed: desc.compressed,
            emulated: desc.emulated,
        })
        .collect();

    let report = DeviceReport {
        device: args.device,
        video_capture: cap.supports_capture(),
        read_write: cap.supports_readwrite(),
        streaming: cap.supports_streaming(),
        driver: cap.driver,
        card: cap.card,
        bus_info: cap.bus_info,
        driver_version: format!("{}.{}.{}", major, minor, patch),
        formats,
    };

    if json {
        let json_str = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_report(&report);
    }

    Ok(())
}

fn print_text_report(report: &DeviceReport) {
    println!("Device Information: {}", report.device);
    println!("===================");
    println!("Driver:   {} ({})", report.driver, report.driver_version);
    println!("Card:     {}", report.card);
    println!("Bus:      {}", report.bus_info);
    println!("Capabilities:");
    println!(
        "  Video capture: {}",
        if report.video_capture { "yes" } else { "no" }
    );
    println!(
        "  Read/write:    {}",
        if report.read_write { "yes" } else { "no" }
    );
    println!(
        "  Streaming:     {}",
        if report.streaming { "yes" } else { "no" }
    );

    println!("Formats:");
    if report.formats.is_empty() {
        println!("  (none reported)");
    } else {
        for format in &report.formats {
            let mut notes = Vec::new();
            if format.compressed {
                notes.push("compressed");
            }
            if format.emulated {
                notes.push("emulated");
            }
            if notes.is_empty() {
                println!("  {} - {}", format.fourcc, format.description);
            } else {
                println!(
                    "  {} - {} ({})",
                    format.fourcc,
                    format.description,
                    notes.join(", ")
                );
            }
        }
    }
}
