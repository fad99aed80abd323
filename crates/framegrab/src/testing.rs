// SPDX-License-Identifier: Apache-2.0

//! Scripted device and sink doubles for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::{
    BufferInfo, Capability, DeviceControl, Dequeued, FormatDesc, Mapping, MemoryKind, Readiness,
};
use crate::format::Format;
use crate::fourcc::FourCC;
use crate::sink::FrameSink;
use crate::{sys, Error};

/// Collects delivered frames by copy.
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    pub frames: Vec<Vec<u8>>,
}

impl FrameSink for MemorySink {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.frames.push(frame.to_vec());
        Ok(())
    }
}

pub(crate) struct FakeDeviceBuilder {
    grant: u32,
    buffer_len: u32,
    capabilities: u32,
    unsupported: Option<MemoryKind>,
    granted_format: Format,
    readiness: VecDeque<Readiness>,
    reads: VecDeque<Option<Vec<u8>>>,
    frames: VecDeque<(u32, u32)>,
    slots: VecDeque<(usize, u32)>,
    alien: Option<u32>,
}

impl FakeDeviceBuilder {
    pub fn grant(mut self, count: u32) -> Self {
        self.grant = count;
        self
    }

    pub fn buffer_len(mut self, len: u32) -> Self {
        self.buffer_len = len;
        self
    }

    pub fn capabilities(mut self, caps: u32) -> Self {
        self.capabilities = caps;
        self
    }

    /// REQBUFS for this memory kind answers EINVAL.
    pub fn unsupported(mut self, kind: MemoryKind) -> Self {
        self.unsupported = Some(kind);
        self
    }

    /// Format the device grants regardless of what was requested.
    pub fn granted_format(mut self, format: Format) -> Self {
        self.granted_format = format;
        self
    }

    /// Scripted readiness answers; `Ready` once exhausted.
    pub fn readiness(mut self, script: Vec<Readiness>) -> Self {
        self.readiness = script.into();
        self
    }

    /// Scripted direct-read results; `None` entries are EAGAIN.
    pub fn read_results(mut self, script: Vec<Option<Vec<u8>>>) -> Self {
        self.reads = script.into();
        self
    }

    /// Scripted MMAP dequeues as (index, bytesused); EAGAIN once exhausted.
    pub fn dequeue_frames(mut self, script: Vec<(u32, u32)>) -> Self {
        self.frames = script.into();
        self
    }

    /// Scripted USERPTR dequeues as (queued slot, bytesused).
    pub fn dequeue_slots(mut self, script: Vec<(usize, u32)>) -> Self {
        self.slots = script.into();
        self
    }

    /// Next USERPTR dequeue reports an address the pool never lent out.
    pub fn dequeue_alien_address(mut self, length: u32) -> Self {
        self.alien = Some(length);
        self
    }

    pub fn build(self) -> FakeDevice {
        FakeDevice {
            path: PathBuf::from("/dev/fake0"),
            grant: self.grant,
            buffer_len: self.buffer_len,
            capabilities: self.capabilities,
            unsupported: self.unsupported,
            granted_format: RefCell::new(self.granted_format),
            submitted: RefCell::new(None),
            readiness: RefCell::new(self.readiness),
            reads: RefCell::new(self.reads),
            frames: RefCell::new(self.frames),
            slots: RefCell::new(self.slots),
            alien: Cell::new(self.alien),
            queued: RefCell::new(Vec::new()),
            userptrs: RefCell::new(Vec::new()),
            stream_on: Cell::new(0),
            stream_off: Cell::new(0),
            qbuf_at_stream_on: Cell::new(None),
        }
    }
}

/// A scripted implementation of the device control surface.
pub(crate) struct FakeDevice {
    path: PathBuf,
    grant: u32,
    buffer_len: u32,
    capabilities: u32,
    unsupported: Option<MemoryKind>,
    granted_format: RefCell<Format>,
    submitted: RefCell<Option<Format>>,
    readiness: RefCell<VecDeque<Readiness>>,
    reads: RefCell<VecDeque<Option<Vec<u8>>>>,
    frames: RefCell<VecDeque<(u32, u32)>>,
    slots: RefCell<VecDeque<(usize, u32)>>,
    alien: Cell<Option<u32>>,
    queued: RefCell<Vec<u32>>,
    userptrs: RefCell<Vec<(u64, u32)>>,
    stream_on: Cell<u32>,
    stream_off: Cell<u32>,
    qbuf_at_stream_on: Cell<Option<usize>>,
}

impl FakeDevice {
    pub fn builder() -> FakeDeviceBuilder {
        let mut granted = Format::request(640, 480);
        granted.bytes_per_line = 640 * 3;
        granted.size_image = 640 * 480 * 3;
        FakeDeviceBuilder {
            grant: 4,
            buffer_len: 640 * 480 * 3,
            capabilities: sys::V4L2_CAP_VIDEO_CAPTURE
                | sys::V4L2_CAP_STREAMING
                | sys::V4L2_CAP_READWRITE,
            unsupported: None,
            granted_format: granted,
            readiness: VecDeque::new(),
            reads: VecDeque::new(),
            frames: VecDeque::new(),
            slots: VecDeque::new(),
            alien: None,
        }
    }

    /// Order of buffer indices offered to the input queue.
    pub fn queued_indices(&self) -> Vec<u32> {
        self.queued.borrow().clone()
    }

    /// Whether every queue call so far happened before the first stream-on.
    pub fn queued_before_stream_on(&self) -> bool {
        self.qbuf_at_stream_on
            .get()
            .map(|n| n == self.queued.borrow().len())
            .unwrap_or(false)
    }

    pub fn stream_on_calls(&self) -> u32 {
        self.stream_on.get()
    }

    pub fn stream_off_calls(&self) -> u32 {
        self.stream_off.get()
    }

    /// The format most recently submitted with `set_format`.
    pub fn submitted_format(&self) -> Option<Format> {
        self.submitted.borrow().clone()
    }
}

impl DeviceControl for FakeDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn capability(&self) -> Result<Capability, Error> {
        Ok(Capability {
            driver: "fakecam".into(),
            card: "Scripted Camera".into(),
            bus_info: "virtual".into(),
            version: (6 << 16) | (1 << 8),
            capabilities: self.capabilities,
        })
    }

    fn try_format(&self, _format: &Format) -> Result<Format, Error> {
        Ok(self.granted_format.borrow().clone())
    }

    fn set_format(&self, format: &Format) -> Result<(), Error> {
        *self.submitted.borrow_mut() = Some(format.clone());
        Ok(())
    }

    fn format(&self) -> Result<Format, Error> {
        Ok(self.granted_format.borrow().clone())
    }

    fn formats(&self) -> Result<Vec<FormatDesc>, Error> {
        Ok(vec![FormatDesc {
            fourcc: FourCC(*b"YUYV"),
            description: "YUYV 4:2:2".into(),
            compressed: false,
            emulated: false,
        }])
    }

    fn request_buffers(&self, memory: MemoryKind, count: u32) -> Result<u32, Error> {
        if self.unsupported == Some(memory) {
            return Err(Error::MethodUnsupported {
                device: self.path.clone(),
                method: memory.into(),
            });
        }
        // The scripted grant wins regardless of what was asked for,
        // matching drivers that clamp the requested count.
        let _ = count;
        Ok(self.grant)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferInfo, Error> {
        Ok(BufferInfo {
            index,
            length: self.buffer_len,
            offset: index * self.buffer_len,
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> Result<Mapping, Error> {
        // Stamp the buffer with its index so delivery order is observable.
        Ok(Mapping::from_vec(vec![
            info.index as u8;
            info.length as usize
        ]))
    }

    fn queue_mmap(&self, index: u32) -> Result<(), Error> {
        self.queued.borrow_mut().push(index);
        Ok(())
    }

    fn queue_userptr(&self, index: u32, ptr: *mut u8, length: usize) -> Result<(), Error> {
        self.queued.borrow_mut().push(index);
        let mut table = self.userptrs.borrow_mut();
        let slot = index as usize;
        if table.len() <= slot {
            table.resize(slot + 1, (0, 0));
        }
        table[slot] = (ptr as u64, length as u32);
        Ok(())
    }

    fn dequeue(&self, memory: MemoryKind) -> Result<Option<Dequeued>, Error> {
        match memory {
            MemoryKind::Mmap => Ok(self.frames.borrow_mut().pop_front().map(|(index, used)| {
                Dequeued {
                    index,
                    bytesused: used,
                    userptr: 0,
                    length: self.buffer_len,
                }
            })),
            MemoryKind::UserPtr => {
                if let Some(length) = self.alien.take() {
                    return Ok(Some(Dequeued {
                        index: 0,
                        bytesused: length,
                        userptr: 0xdead_beef,
                        length,
                    }));
                }
                Ok(self.slots.borrow_mut().pop_front().map(|(slot, used)| {
                    let (userptr, length) = self.userptrs.borrow()[slot];
                    Dequeued {
                        index: slot as u32,
                        bytesused: used,
                        userptr,
                        length,
                    }
                }))
            }
        }
    }

    fn stream_on(&self) -> Result<(), Error> {
        self.stream_on.set(self.stream_on.get() + 1);
        if self.qbuf_at_stream_on.get().is_none() {
            self.qbuf_at_stream_on.set(Some(self.queued.borrow().len()));
        }
        Ok(())
    }

    fn stream_off(&self) -> Result<(), Error> {
        self.stream_off.set(self.stream_off.get() + 1);
        Ok(())
    }

    fn read_frame(&self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        match self.reads.borrow_mut().pop_front() {
            Some(Some(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(Some(n))
            }
            // Scripted EAGAIN, or script exhausted
            Some(None) | None => Ok(None),
        }
    }

    fn wait_readable(&self, _timeout: Duration) -> Result<Readiness, Error> {
        Ok(self
            .readiness
            .borrow_mut()
            .pop_front()
            .unwrap_or(Readiness::Ready))
    }
}
