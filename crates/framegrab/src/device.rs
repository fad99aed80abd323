// SPDX-License-Identifier: Apache-2.0

//! Device handle and control surface
//!
//! [`VideoDevice`] owns the open file descriptor for a V4L2 capture device
//! and implements [`DeviceControl`], the fixed set of control operations the
//! rest of the engine consumes: capability query, format negotiation calls,
//! buffer request/query/queue/dequeue, stream on/off, direct read, and the
//! bounded readiness wait. Buffer strategies and the capture session only
//! ever talk to the trait, which keeps them testable against a scripted
//! device.

use std::{
    fmt, fs,
    os::fd::{AsRawFd, RawFd},
    os::unix::fs::{FileTypeExt, OpenOptionsExt},
    path::{Path, PathBuf},
    ptr, slice,
    time::Duration,
};

use crate::format::Format;
use crate::fourcc::FourCC;
use crate::strategy::IoMethod;
use crate::{sys, Error};

/// Buffer memory exchanged with the device over the streaming interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// Kernel-owned buffers mapped into the application
    Mmap,
    /// Application-owned buffers lent to the device
    UserPtr,
}

impl MemoryKind {
    pub(crate) fn raw(self) -> u32 {
        match self {
            MemoryKind::Mmap => sys::V4L2_MEMORY_MMAP,
            MemoryKind::UserPtr => sys::V4L2_MEMORY_USERPTR,
        }
    }
}

impl From<MemoryKind> for IoMethod {
    fn from(kind: MemoryKind) -> IoMethod {
        match kind {
            MemoryKind::Mmap => IoMethod::Mmap,
            MemoryKind::UserPtr => IoMethod::UserPtr,
        }
    }
}

/// Result of one bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A filled buffer is ready to dequeue
    Ready,
    /// The bound elapsed with no data
    TimedOut,
    /// The wait was interrupted by a signal; retry immediately
    Interrupted,
}

/// Device capabilities reported by the capability query.
#[derive(Debug, Clone)]
pub struct Capability {
    /// Kernel driver name, e.g. "uvcvideo"
    pub driver: String,
    /// Human-readable device name
    pub card: String,
    /// Bus the device is attached to
    pub bus_info: String,
    /// Driver version, packed (major << 16 | minor << 8 | patch)
    pub version: u32,
    /// Raw capability flags
    pub capabilities: u32,
}

impl Capability {
    pub fn supports_capture(&self) -> bool {
        self.capabilities & sys::V4L2_CAP_VIDEO_CAPTURE != 0
    }

    pub fn supports_readwrite(&self) -> bool {
        self.capabilities & sys::V4L2_CAP_READWRITE != 0
    }

    pub fn supports_streaming(&self) -> bool {
        self.capabilities & sys::V4L2_CAP_STREAMING != 0
    }

    /// Driver version as (major, minor, patch)
    pub fn version_triple(&self) -> (u8, u8, u8) {
        (
            (self.version >> 16) as u8,
            (self.version >> 8) as u8,
            self.version as u8,
        )
    }
}

/// One entry of the device's enumerated capture formats.
#[derive(Debug, Clone)]
pub struct FormatDesc {
    pub fourcc: FourCC,
    /// Human-readable description from the driver
    pub description: String,
    /// Compressed bitstream format (MJPG, H264, ...)
    pub compressed: bool,
    /// Emulated by a conversion layer rather than produced natively
    pub emulated: bool,
}

impl fmt::Display for FormatDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.fourcc, self.description)?;
        if self.compressed {
            write!(f, " (compressed)")?;
        }
        if self.emulated {
            write!(f, " (emulated)")?;
        }
        Ok(())
    }
}

/// Kernel-assigned length and mapping offset of one driver buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferInfo {
    pub index: u32,
    pub length: u32,
    pub offset: u32,
}

/// One dequeued buffer as reported by the device.
///
/// MMAP identifies the buffer by `index`; USERPTR by `userptr` + `length`.
/// Only `bytesused` bytes hold valid image data.
#[derive(Debug, Clone, Copy)]
pub struct Dequeued {
    pub index: u32,
    pub bytesused: u32,
    pub userptr: u64,
    pub length: u32,
}

/// A region of device memory mapped into the process.
///
/// The mapping stays valid for the lifetime of the value; [`Mapping::unmap`]
/// tears it down explicitly so teardown failures can surface, with drop as
/// the fallback.
pub struct Mapping {
    ptr: *mut u8,
    len: usize,
    mapped: bool,
    #[cfg(test)]
    _heap: Option<Box<[u8]>>,
}

impl Mapping {
    /// # Safety
    ///
    /// `ptr` must be a live mmap of at least `len` bytes, not unmapped by
    /// anyone else for the lifetime of the returned value.
    pub(crate) unsafe fn from_kernel(ptr: *mut u8, len: usize) -> Self {
        Mapping {
            ptr,
            len,
            mapped: true,
            #[cfg(test)]
            _heap: None,
        }
    }

    /// Heap-backed stand-in for scripted devices.
    #[cfg(test)]
    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        let mut heap = data.into_boxed_slice();
        let ptr = heap.as_mut_ptr();
        let len = heap.len();
        Mapping {
            ptr,
            len,
            mapped: false,
            _heap: Some(heap),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Unmap the region, reporting failure.
    pub fn unmap(&mut self) -> Result<(), Error> {
        if !self.mapped {
            return Ok(());
        }
        self.mapped = false;
        let rc = unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
        if rc == -1 {
            return Err(Error::Ioctl {
                op: "munmap",
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if self.mapped {
            unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
        }
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("len", &self.len)
            .field("mapped", &self.mapped)
            .finish()
    }
}

/// Control surface of a V4L2 capture device.
///
/// The engine issues these operations in a fixed order: capability query,
/// format negotiation, strategy-specific buffer setup, stream-on, then the
/// wait/dequeue/requeue cycle until stream-off and teardown. Implemented by
/// [`VideoDevice`] over ioctls and by the scripted fake used in tests.
pub trait DeviceControl {
    /// Device path for diagnostics
    fn path(&self) -> &Path;

    fn capability(&self) -> Result<Capability, Error>;

    /// Ask what the device would grant for `format` without applying it.
    fn try_format(&self, format: &Format) -> Result<Format, Error>;

    /// Submit a format request. The device is authoritative and may rewrite
    /// it; callers must re-read with [`DeviceControl::format`].
    fn set_format(&self, format: &Format) -> Result<(), Error>;

    /// Read back the format currently in effect.
    fn format(&self) -> Result<Format, Error>;

    /// Enumerate the capture formats the device offers.
    fn formats(&self) -> Result<Vec<FormatDesc>, Error>;

    /// Request `count` buffers of the given memory kind. Returns the count
    /// the device actually granted, which may be lower.
    fn request_buffers(&self, memory: MemoryKind, count: u32) -> Result<u32, Error>;

    fn query_buffer(&self, index: u32) -> Result<BufferInfo, Error>;

    fn map_buffer(&self, info: &BufferInfo) -> Result<Mapping, Error>;

    /// Offer a kernel-owned buffer back to the device's input queue.
    fn queue_mmap(&self, index: u32) -> Result<(), Error>;

    /// Lend an application-owned buffer to the device's input queue.
    fn queue_userptr(&self, index: u32, ptr: *mut u8, length: usize) -> Result<(), Error>;

    /// Dequeue one filled buffer. `None` means no data yet (EAGAIN).
    fn dequeue(&self, memory: MemoryKind) -> Result<Option<Dequeued>, Error>;

    fn stream_on(&self) -> Result<(), Error>;

    fn stream_off(&self) -> Result<(), Error>;

    /// Direct read of one frame. `None` means no data yet (EAGAIN).
    fn read_frame(&self, buf: &mut [u8]) -> Result<Option<usize>, Error>;

    /// Block until the device has a frame, up to `timeout`.
    fn wait_readable(&self, timeout: Duration) -> Result<Readiness, Error>;
}

/// An open V4L2 capture device.
///
/// The file descriptor is opened non-blocking and closed exactly once when
/// the handle drops.
#[derive(Debug)]
pub struct VideoDevice {
    file: fs::File,
    path: PathBuf,
}

impl VideoDevice {
    /// Open the capture device at `path`.
    ///
    /// Fails if the path does not name a character device or the open call
    /// is refused; both are unrecoverable for a single run.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        let meta = fs::metadata(&path).map_err(|source| Error::Ioctl { op: "stat", source })?;
        if !meta.file_type().is_char_device() {
            return Err(Error::NotADevice(path));
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| Error::Ioctl { op: "open", source })?;

        log::debug!("opened {} (non-blocking)", path.display());
        Ok(VideoDevice { file, path })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// ioctl with EINTR retry.
    fn ioctl<T>(&self, op: &'static str, request: libc::c_ulong, arg: &mut T) -> Result<(), Error> {
        loop {
            let rc = unsafe { libc::ioctl(self.fd(), request, arg as *mut T) };
            if rc != -1 {
                return Ok(());
            }
            let source = std::io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(Error::Ioctl { op, source });
        }
    }
}

impl DeviceControl for VideoDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn capability(&self) -> Result<Capability, Error> {
        let mut cap = sys::v4l2_capability::default();
        self.ioctl("VIDIOC_QUERYCAP", sys::VIDIOC_QUERYCAP, &mut cap)
            .map_err(|err| match err {
                Error::Ioctl { source, .. } if source.raw_os_error() == Some(libc::EINVAL) => {
                    Error::NotV4l2Device(self.path.clone())
                }
                other => other,
            })?;

        Ok(Capability {
            driver: sys::cstr_bytes(&cap.driver),
            card: sys::cstr_bytes(&cap.card),
            bus_info: sys::cstr_bytes(&cap.bus_info),
            version: cap.version,
            capabilities: cap.capabilities,
        })
    }

    fn try_format(&self, format: &Format) -> Result<Format, Error> {
        let mut raw = format.to_sys();
        self.ioctl("VIDIOC_TRY_FMT", sys::VIDIOC_TRY_FMT, &mut raw)?;
        Ok(Format::from_sys(&raw))
    }

    fn set_format(&self, format: &Format) -> Result<(), Error> {
        let mut raw = format.to_sys();
        self.ioctl("VIDIOC_S_FMT", sys::VIDIOC_S_FMT, &mut raw)
    }

    fn format(&self) -> Result<Format, Error> {
        let mut raw = sys::v4l2_format {
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        self.ioctl("VIDIOC_G_FMT", sys::VIDIOC_G_FMT, &mut raw)?;
        Ok(Format::from_sys(&raw))
    }

    fn formats(&self) -> Result<Vec<FormatDesc>, Error> {
        let mut formats = Vec::new();
        for index in 0.. {
            let mut desc = sys::v4l2_fmtdesc {
                index,
                type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
                ..Default::default()
            };
            match self.ioctl("VIDIOC_ENUM_FMT", sys::VIDIOC_ENUM_FMT, &mut desc) {
                Ok(()) => formats.push(FormatDesc {
                    fourcc: FourCC::from(desc.pixelformat),
                    description: sys::cstr_bytes(&desc.description),
                    compressed: desc.flags & sys::V4L2_FMT_FLAG_COMPRESSED != 0,
                    emulated: desc.flags & sys::V4L2_FMT_FLAG_EMULATED != 0,
                }),
                // End of enumeration
                Err(Error::Ioctl { source, .. })
                    if source.raw_os_error() == Some(libc::EINVAL) =>
                {
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(formats)
    }

    fn request_buffers(&self, memory: MemoryKind, count: u32) -> Result<u32, Error> {
        let mut req = sys::v4l2_requestbuffers {
            count,
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: memory.raw(),
            ..Default::default()
        };
        self.ioctl("VIDIOC_REQBUFS", sys::VIDIOC_REQBUFS, &mut req)
            .map_err(|err| match err {
                // EINVAL here means the memory type itself is rejected,
                // which is signaled distinctly from other failures.
                Error::Ioctl { source, .. } if source.raw_os_error() == Some(libc::EINVAL) => {
                    Error::MethodUnsupported {
                        device: self.path.clone(),
                        method: memory.into(),
                    }
                }
                other => other,
            })?;
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferInfo, Error> {
        let mut buf = sys::v4l2_buffer {
            index,
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: sys::V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        self.ioctl("VIDIOC_QUERYBUF", sys::VIDIOC_QUERYBUF, &mut buf)?;
        Ok(BufferInfo {
            index,
            length: buf.length,
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> Result<Mapping, Error> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                info.length as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                info.offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::Ioctl {
                op: "mmap",
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(unsafe { Mapping::from_kernel(ptr as *mut u8, info.length as usize) })
    }

    fn queue_mmap(&self, index: u32) -> Result<(), Error> {
        let mut buf = sys::v4l2_buffer {
            index,
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: sys::V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        self.ioctl("VIDIOC_QBUF", sys::VIDIOC_QBUF, &mut buf)
    }

    fn queue_userptr(&self, index: u32, ptr: *mut u8, length: usize) -> Result<(), Error> {
        let mut buf = sys::v4l2_buffer {
            index,
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: sys::V4L2_MEMORY_USERPTR,
            length: length as u32,
            ..Default::default()
        };
        buf.m.userptr = ptr as libc::c_ulong;
        self.ioctl("VIDIOC_QBUF", sys::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue(&self, memory: MemoryKind) -> Result<Option<Dequeued>, Error> {
        let mut buf = sys::v4l2_buffer {
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: memory.raw(),
            ..Default::default()
        };
        match self.ioctl("VIDIOC_DQBUF", sys::VIDIOC_DQBUF, &mut buf) {
            Ok(()) => Ok(Some(Dequeued {
                index: buf.index,
                bytesused: buf.bytesused,
                userptr: unsafe { buf.m.userptr } as u64,
                length: buf.length,
            })),
            // No filled buffer yet; the caller retries next iteration.
            Err(Error::Ioctl { source, .. }) if source.raw_os_error() == Some(libc::EAGAIN) => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn stream_on(&self) -> Result<(), Error> {
        let mut buf_type = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE as i32;
        self.ioctl("VIDIOC_STREAMON", sys::VIDIOC_STREAMON, &mut buf_type)
    }

    fn stream_off(&self) -> Result<(), Error> {
        let mut buf_type = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE as i32;
        self.ioctl("VIDIOC_STREAMOFF", sys::VIDIOC_STREAMOFF, &mut buf_type)
    }

    fn read_frame(&self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        let n = unsafe { libc::read(self.fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n == -1 {
            let source = std::io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(None);
            }
            return Err(Error::Ioctl { op: "read", source });
        }
        Ok(Some(n as usize))
    }

    fn wait_readable(&self, timeout: Duration) -> Result<Readiness, Error> {
        let mut fds = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut fds, 1, timeout.as_millis() as libc::c_int) };
        if rc == -1 {
            let source = std::io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::EINTR) {
                return Ok(Readiness::Interrupted);
            }
            return Err(Error::Ioctl { op: "poll", source });
        }
        if rc == 0 {
            return Ok(Readiness::TimedOut);
        }
        Ok(Readiness::Ready)
    }
}
