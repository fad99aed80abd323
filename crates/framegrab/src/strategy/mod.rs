// SPDX-License-Identifier: Apache-2.0

//! Buffer exchange strategies
//!
//! The device fills frame buffers through one of three mutually exclusive
//! mechanisms, selected once before initialization:
//!
//! - [`ReadStrategy`] - one application buffer, blocking-style direct read
//! - [`MmapStrategy`] - kernel buffers mapped into the application
//! - [`UserPtrStrategy`] - application buffers lent to the device
//!
//! All three present the same [`BufferStrategy`] shape, so the capture loop
//! never branches on the method. Each buffer is in exactly one of three
//! states at any instant (free, queued with the device, or delivered to the
//! sink); the state table asserts the no-double-queue discipline.

mod mmap;
mod read;
mod userptr;

pub use mmap::MmapStrategy;
pub use read::ReadStrategy;
pub use userptr::UserPtrStrategy;

use std::{fmt, str::FromStr};

use crate::device::DeviceControl;
use crate::format::Format;
use crate::Error;

/// Buffer count requested from the device for the streaming strategies.
pub const REQUESTED_BUFFERS: u32 = 4;

/// Fewest device-granted buffers the mapped strategy can stream with.
pub const MIN_BUFFERS: u32 = 2;

/// The buffer exchange method, selected once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMethod {
    /// Direct read() into one application buffer
    Read,
    /// Memory-mapped kernel buffers (default)
    Mmap,
    /// Application-allocated buffers lent to the device
    UserPtr,
}

impl fmt::Display for IoMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoMethod::Read => write!(f, "read"),
            IoMethod::Mmap => write!(f, "memory mapped"),
            IoMethod::UserPtr => write!(f, "user pointer"),
        }
    }
}

impl FromStr for IoMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(IoMethod::Read),
            "mmap" => Ok(IoMethod::Mmap),
            "userptr" => Ok(IoMethod::UserPtr),
            other => Err(format!(
                "unknown i/o method '{}' (expected mmap, read, or userptr)",
                other
            )),
        }
    }
}

/// One successfully acquired frame: which pool buffer holds it and how many
/// bytes of it are valid image data.
#[derive(Debug)]
pub struct Acquired {
    pub index: usize,
    pub length: usize,
}

/// Lifecycle state of one pool buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    /// Owned by the application, eligible to be offered to the device
    Free,
    /// Ownership transferred to the device, pending capture
    Queued,
    /// Dequeued and handed to the sink; must be requeued before the next
    /// wait cycle
    Delivered,
}

/// Per-buffer state table shared by the streaming strategies.
///
/// Transitions are asserted: a violation means the engine and the device
/// disagree about buffer ownership, which is a bug, not an operating
/// condition.
#[derive(Debug)]
pub(crate) struct StateTable {
    states: Vec<BufferState>,
}

impl StateTable {
    pub(crate) fn new(count: usize) -> Self {
        StateTable {
            states: vec![BufferState::Free; count],
        }
    }

    pub(crate) fn mark_queued(&mut self, index: usize) {
        assert_eq!(
            self.states[index],
            BufferState::Free,
            "buffer {} queued while not free",
            index
        );
        self.states[index] = BufferState::Queued;
    }

    pub(crate) fn mark_delivered(&mut self, index: usize) {
        assert_eq!(
            self.states[index],
            BufferState::Queued,
            "buffer {} dequeued while not queued",
            index
        );
        self.states[index] = BufferState::Delivered;
    }

    pub(crate) fn mark_requeued(&mut self, index: usize) {
        assert_eq!(
            self.states[index],
            BufferState::Delivered,
            "buffer {} requeued while not delivered",
            index
        );
        self.states[index] = BufferState::Queued;
    }

    /// Stream-off returns every in-flight buffer to the application.
    pub(crate) fn reset(&mut self) {
        self.states.fill(BufferState::Free);
    }
}

/// Uniform surface of the three buffer exchange strategies.
///
/// The capture session drives one instance through
/// `allocate -> start -> {acquire, frame, requeue}* -> stop -> release`.
/// The slice returned by [`BufferStrategy::frame`] is valid only until the
/// matching `requeue`, which hands the memory back to the device.
pub trait BufferStrategy {
    fn method(&self) -> IoMethod;

    /// Number of buffers currently in the pool.
    fn buffer_count(&self) -> usize;

    /// Build the fixed buffer set for the granted format.
    fn allocate(&mut self, dev: &dyn DeviceControl, format: &Format) -> Result<(), Error>;

    /// Offer every buffer to the device and start streaming. No-op for the
    /// read strategy, which has no device-side queue.
    fn start(&mut self, dev: &dyn DeviceControl) -> Result<(), Error>;

    /// Try to acquire one filled frame. `Ok(None)` means no data yet.
    fn acquire(&mut self, dev: &dyn DeviceControl) -> Result<Option<Acquired>, Error>;

    /// Borrow the valid bytes of an acquired frame.
    fn frame(&self, acquired: &Acquired) -> &[u8];

    /// Return the buffer to the device's free pool. The device may overwrite
    /// the memory at any point afterwards.
    fn requeue(&mut self, dev: &dyn DeviceControl, acquired: Acquired) -> Result<(), Error>;

    /// Stop streaming. Idempotent.
    fn stop(&mut self, dev: &dyn DeviceControl) -> Result<(), Error>;

    /// Tear the buffer set down. Idempotent.
    fn release(&mut self, dev: &dyn DeviceControl) -> Result<(), Error>;
}

/// Construct the strategy for `method`.
pub fn for_method(method: IoMethod) -> Box<dyn BufferStrategy> {
    match method {
        IoMethod::Read => Box::new(ReadStrategy::new()),
        IoMethod::Mmap => Box::new(MmapStrategy::new()),
        IoMethod::UserPtr => Box::new(UserPtrStrategy::new()),
    }
}
