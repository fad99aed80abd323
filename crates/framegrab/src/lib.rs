// SPDX-License-Identifier: Apache-2.0

//! FrameGrab Library
//!
//! Live video capture from V4L2 character devices with a bounded,
//! single-threaded capture loop. The library negotiates a capture format
//! with the device, manages one of three mutually exclusive buffer-exchange
//! strategies (direct read, memory-mapped kernel buffers, user-allocated
//! buffers), and delivers each captured frame to a pluggable [`FrameSink`]
//! before returning the buffer to the device's free pool.
//!
//! # Quick Start
//!
//! ```no_run
//! use framegrab::session::{CaptureConfig, CaptureSession, StreamOptions};
//! use framegrab::sink::NullSink;
//!
//! let config = CaptureConfig::default();
//! let mut session = CaptureSession::open(&config)?;
//! println!("granted format: {}", session.format());
//!
//! let mut sink = NullSink;
//! let delivered = session.stream(&mut sink, &StreamOptions::with_limit(30))?;
//! println!("captured {} frames", delivered);
//! session.shutdown()?;
//! # Ok::<(), framegrab::Error>(())
//! ```
//!
//! # Design
//!
//! - Every operation acts on an explicit session or device handle; there is
//!   no process-global state.
//! - Buffer exchange is behind the [`strategy::BufferStrategy`] trait; the
//!   capture loop is strategy-agnostic.
//! - Frame delivery happens through the [`sink::FrameSink`] trait; display
//!   backends live outside this crate.
//!
//! [`FrameSink`]: sink::FrameSink

use std::{error, fmt, io, path::PathBuf};

use crate::strategy::IoMethod;

/// Error type for FrameGrab operations
///
/// All fatal conditions identify the failing operation and, where one
/// exists, carry the underlying system error. The "not ready yet" condition
/// (EAGAIN) is never surfaced as an error; acquire paths report it as the
/// absence of a frame instead.
#[derive(Debug)]
pub enum Error {
    /// I/O error outside the device control surface (file dump, etc.)
    Io(io::Error),

    /// A device control operation (ioctl, poll, read, mmap) failed
    Ioctl {
        /// Name of the failing operation, e.g. "VIDIOC_QBUF"
        op: &'static str,
        /// Underlying errno
        source: io::Error,
    },

    /// The path does not name a character device
    NotADevice(PathBuf),

    /// The device did not answer the V4L2 capability query
    NotV4l2Device(PathBuf),

    /// The device has no video capture capability
    NotCaptureDevice(PathBuf),

    /// The device rejected the requested buffer exchange method
    MethodUnsupported {
        /// Device path
        device: PathBuf,
        /// The rejected method
        method: IoMethod,
    },

    /// The device granted fewer buffers than the strategy can operate with
    InsufficientBuffers {
        /// Device path
        device: PathBuf,
        /// Number of buffers the device granted
        granted: u32,
    },

    /// The readiness wait exceeded its bound with no data
    WaitTimeout(PathBuf),

    /// The device reported a buffer index outside the pool
    BadBufferIndex {
        /// Index reported by the device
        index: u32,
        /// Number of buffers in the pool
        count: usize,
    },

    /// The device returned a user pointer that matches no pool buffer
    NoMatchingBuffer {
        /// Address reported by the device
        userptr: u64,
        /// Length reported by the device
        length: u32,
    },

    /// A session operation was invoked in a state that does not allow it
    InvalidState {
        /// The operation that was attempted
        op: &'static str,
        /// The session state at the time
        state: session::SessionState,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Ioctl { op, source } => write!(f, "{} error: {}", op, source),
            Error::NotADevice(path) => write!(f, "{} is no device", path.display()),
            Error::NotV4l2Device(path) => write!(f, "{} is no V4L2 device", path.display()),
            Error::NotCaptureDevice(path) => {
                write!(f, "{} is no video capture device", path.display())
            }
            Error::MethodUnsupported { device, method } => {
                write!(f, "{} does not support {} i/o", device.display(), method)
            }
            Error::InsufficientBuffers { device, granted } => write!(
                f,
                "insufficient buffer memory on {} ({} granted)",
                device.display(),
                granted
            ),
            Error::WaitTimeout(path) => {
                write!(f, "timed out waiting for frame on {}", path.display())
            }
            Error::BadBufferIndex { index, count } => write!(
                f,
                "device reported buffer index {} outside pool of {}",
                index, count
            ),
            Error::NoMatchingBuffer { userptr, length } => write!(
                f,
                "device returned unknown buffer address {:#x} (length {})",
                userptr, length
            ),
            Error::InvalidState { op, state } => {
                write!(f, "cannot {} while session is {:?}", op, state)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Ioctl { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// The fourcc module provides portable handling of fourcc codes.
pub mod fourcc;

/// The sys module defines the V4L2 kernel ABI consumed by the device layer.
pub mod sys;

/// The device module provides the device handle and control surface.
pub mod device;

/// The format module provides capture format negotiation.
pub mod format;

/// The strategy module provides the three buffer exchange strategies.
pub mod strategy;

/// The session module drives the capture state machine and loop.
pub mod session;

/// The sink module defines the frame consumer boundary.
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;
