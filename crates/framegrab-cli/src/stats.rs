// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::time::Instant;

/// Capture statistics reported after a run
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStats {
    /// Total number of frames delivered
    pub frames_captured: u64,
    /// Total bytes of valid image data delivered
    pub bytes_captured: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Average throughput in frames per second
    pub throughput_fps: f64,
    /// Average bandwidth in megabits per second
    pub bandwidth_mbps: f64,
}

/// Collector for tracking capture throughput
pub struct StatsCollector {
    start_time: Instant,
    frames: u64,
    bytes: u64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames: 0,
            bytes: 0,
        }
    }

    /// Record one delivered frame
    pub fn record_frame(&mut self, bytes: u64) {
        self.frames += 1;
        self.bytes += bytes;
    }

    /// Finalize and calculate all statistics
    pub fn finalize(&self) -> CaptureStats {
        let duration = self.start_time.elapsed();
        let duration_secs = duration.as_secs_f64();

        let throughput_fps = if duration_secs > 0.0 {
            self.frames as f64 / duration_secs
        } else {
            0.0
        };

        let bandwidth_mbps = if duration_secs > 0.0 {
            (self.bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
        } else {
            0.0
        };

        CaptureStats {
            frames_captured: self.frames,
            bytes_captured: self.bytes,
            duration_ms: duration.as_millis() as u64,
            throughput_fps,
            bandwidth_mbps,
        }
    }

    /// Print statistics in human-readable format
    pub fn print_text(&self) {
        let stats = self.finalize();
        println!("\n=== Capture Statistics ===");
        println!("Frames captured:   {}", stats.frames_captured);
        println!(
            "Bytes captured:    {} ({:.2} MB)",
            stats.bytes_captured,
            stats.bytes_captured as f64 / 1_048_576.0
        );
        println!(
            "Duration:          {:.2} s",
            stats.duration_ms as f64 / 1000.0
        );
        println!("Throughput:        {:.2} fps", stats.throughput_fps);
        println!("Bandwidth:         {:.2} Mbps", stats.bandwidth_mbps);
    }

    /// Print statistics in JSON format
    pub fn print_json(&self) -> Result<(), serde_json::Error> {
        let stats = self.finalize();
        let json = serde_json::to_string_pretty(&stats)?;
        println!("{}", json);
        Ok(())
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
