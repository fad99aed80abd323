// SPDX-License-Identifier: Apache-2.0

//! Capture session state machine and loop
//!
//! A [`CaptureSession`] walks the one-way state sequence
//! `DeviceOpen -> FormatSet -> BuffersReady -> Streaming -> Stopped`; the
//! first three transitions happen during construction, and any failure
//! along the way is fatal to the session. The loop itself is
//! single-threaded and blocking: readiness waiting is the only suspension
//! point, frames are delivered to the sink in device-dequeue order, and the
//! stop condition is checked once per completed iteration.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crate::device::{DeviceControl, Readiness, VideoDevice};
use crate::format::{self, Format, FourccProbe};
use crate::sink::FrameSink;
use crate::strategy::{self, BufferStrategy, IoMethod};
use crate::Error;

/// Bound on one readiness wait. A device that produces nothing for this
/// long is presumed wedged and the session fails.
pub const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Session lifecycle state.
///
/// Construction covers `DeviceOpen` and `FormatSet`; a successfully built
/// session starts at `BuffersReady`. The device descriptor itself closes
/// exactly once, when the session drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    DeviceOpen,
    FormatSet,
    BuffersReady,
    Streaming,
    Stopped,
}

/// Everything needed to build a capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture device path
    pub device: std::path::PathBuf,
    /// Requested frame width; the device may grant a different one
    pub width: u32,
    /// Requested frame height; the device may grant a different one
    pub height: u32,
    /// Buffer exchange method, fixed for the session
    pub method: IoMethod,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            method: IoMethod::Mmap,
        }
    }
}

/// Stop conditions for one streaming run.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Stop after this many delivered frames (`None` = unlimited)
    pub limit: Option<u64>,
    /// Cooperative stop flag, checked once per completed iteration
    pub stop: Option<Arc<AtomicBool>>,
}

impl StreamOptions {
    pub fn unlimited() -> Self {
        StreamOptions::default()
    }

    pub fn with_limit(limit: u64) -> Self {
        StreamOptions {
            limit: Some(limit),
            stop: None,
        }
    }

    pub fn stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }
}

/// An initialized capture session: open device, negotiated format, and an
/// allocated buffer pool, ready to stream.
pub struct CaptureSession<D: DeviceControl = VideoDevice> {
    device: D,
    format: Format,
    strategy: Box<dyn BufferStrategy>,
    state: SessionState,
}

impl<D: DeviceControl> std::fmt::Debug for CaptureSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("format", &self.format)
            .field("method", &self.strategy.method())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CaptureSession<VideoDevice> {
    /// Open the configured device and initialize it through to
    /// `BuffersReady`.
    pub fn open(config: &CaptureConfig) -> Result<Self, Error> {
        let device = VideoDevice::open(&config.device)?;
        Self::with_device(device, config)
    }
}

impl<D: DeviceControl> CaptureSession<D> {
    /// Initialize a session on an already-open device handle.
    pub fn with_device(device: D, config: &CaptureConfig) -> Result<Self, Error> {
        let cap = device.capability()?;
        if !cap.supports_capture() {
            return Err(Error::NotCaptureDevice(device.path().to_path_buf()));
        }
        log::debug!(
            "{}: {} ({}), read: {}, stream: {}",
            device.path().display(),
            cap.card,
            cap.driver,
            if cap.supports_readwrite() { 'Y' } else { 'N' },
            if cap.supports_streaming() { 'Y' } else { 'N' },
        );

        let format = format::negotiate(&device, config.width, config.height, &FourccProbe)?;

        let mut strategy = strategy::for_method(config.method);
        strategy.allocate(&device, &format)?;
        log::debug!(
            "{} i/o ready with {} buffer(s)",
            strategy.method(),
            strategy.buffer_count()
        );

        Ok(CaptureSession {
            device,
            format,
            strategy,
            state: SessionState::BuffersReady,
        })
    }

    /// The format the device actually granted.
    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn method(&self) -> IoMethod {
        self.strategy.method()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the capture loop until a stop condition or a fatal error.
    ///
    /// Each iteration waits for readiness (bounded by [`READY_TIMEOUT`],
    /// interrupted waits retry), acquires a frame through the strategy,
    /// delivers it to `sink` exactly once, and requeues the buffer. The
    /// frame view passed to the sink dies with the `deliver` call.
    ///
    /// Returns the number of delivered frames.
    pub fn stream(&mut self, sink: &mut dyn FrameSink, options: &StreamOptions) -> Result<u64, Error> {
        match self.state {
            SessionState::BuffersReady => {
                self.strategy.start(&self.device)?;
                self.state = SessionState::Streaming;
            }
            SessionState::Streaming => {}
            state => return Err(Error::InvalidState { op: "stream", state }),
        }

        let mut delivered = 0u64;
        loop {
            if let Some(limit) = options.limit {
                if delivered >= limit {
                    break;
                }
            }
            if let Some(flag) = &options.stop {
                if flag.load(Ordering::Relaxed) {
                    log::debug!("stop requested after {} frames", delivered);
                    break;
                }
            }

            match self.device.wait_readable(READY_TIMEOUT)? {
                Readiness::Interrupted => continue,
                Readiness::TimedOut => {
                    return Err(Error::WaitTimeout(self.device.path().to_path_buf()));
                }
                Readiness::Ready => {}
            }

            let Some(acquired) = self.strategy.acquire(&self.device)? else {
                // Not ready after all; retry next iteration.
                continue;
            };

            sink.deliver(self.strategy.frame(&acquired))?;
            self.strategy.requeue(&self.device, acquired)?;
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Stop streaming and release the buffer pool. Idempotent; calling it
    /// twice neither double-frees buffers nor touches the device again.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        if self.state == SessionState::Stopped {
            return Ok(());
        }
        self.strategy.stop(&self.device)?;
        self.strategy.release(&self.device)?;
        self.state = SessionState::Stopped;
        Ok(())
    }
}

impl<D: DeviceControl> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        // Best-effort teardown; the descriptor closes when `device` drops.
        if self.state != SessionState::Stopped {
            let _ = self.strategy.stop(&self.device);
            let _ = self.strategy.release(&self.device);
        }
    }
}
