// SPDX-License-Identifier: Apache-2.0

//! V4L2 kernel ABI
//!
//! Struct layouts and ioctl request codes for the subset of the V4L2
//! single-planar capture interface this crate consumes: capability query,
//! format get/set/try, format enumeration, buffer request/query,
//! queue/dequeue, and stream on/off.
//!
//! Layouts mirror `<linux/videodev2.h>` for 64-bit targets and are checked
//! by the layout tests at the bottom of this module. Request codes are
//! derived with the `_IOR`/`_IOW`/`_IOWR` encoding rather than hard-coded,
//! since the struct size is part of the code.

#![allow(non_camel_case_types)]

use libc::c_ulong;
use std::mem;

// Buffer types
pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;

// Memory types
pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_MEMORY_USERPTR: u32 = 2;

// Field order
pub const V4L2_FIELD_ANY: u32 = 0;
pub const V4L2_FIELD_NONE: u32 = 1;
pub const V4L2_FIELD_INTERLACED: u32 = 4;

// Capability flags
pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const V4L2_CAP_READWRITE: u32 = 0x0100_0000;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;

// Format description flags
pub const V4L2_FMT_FLAG_COMPRESSED: u32 = 0x0001;
pub const V4L2_FMT_FLAG_EMULATED: u32 = 0x0002;

/// 24-bit RGB, the pixel encoding requested during negotiation
pub const V4L2_PIX_FMT_RGB24: u32 = fourcc(b"RGB3");

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

/// `struct v4l2_format` restricted to the single-planar pix union member.
///
/// The kernel union is 200 bytes and 8-byte aligned on 64-bit (it contains
/// pointer-bearing members this crate never touches); the padding tail keeps
/// the size and alignment identical.
#[repr(C, align(8))]
#[derive(Clone, Copy)]
pub struct v4l2_format_fmt {
    pub pix: v4l2_pix_format,
    _reserved: [u32; 38],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_fmt,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub reserved: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

/// The `m` union of `struct v4l2_buffer`: MMAP offset or user pointer.
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: c_ulong,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: libc::timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_fmtdesc {
    pub index: u32,
    pub type_: u32,
    pub flags: u32,
    pub description: [u8; 32],
    pub pixelformat: u32,
    pub mbus_code: u32,
    pub reserved: [u32; 3],
}

macro_rules! impl_zeroed_default {
    ($($t:ty),* $(,)?) => {
        $(impl Default for $t {
            fn default() -> Self {
                // All-zero is a valid bit pattern for every field; the
                // kernel expects unused members cleared.
                unsafe { mem::zeroed() }
            }
        })*
    };
}

impl_zeroed_default!(
    v4l2_capability,
    v4l2_format,
    v4l2_requestbuffers,
    v4l2_buffer,
    v4l2_fmtdesc,
);

// ioctl request code encoding (asm-generic/ioctl.h)
const IOC_WRITE: c_ulong = 1;
const IOC_READ: c_ulong = 2;

const IOC_NRSHIFT: c_ulong = 0;
const IOC_TYPESHIFT: c_ulong = 8;
const IOC_SIZESHIFT: c_ulong = 16;
const IOC_DIRSHIFT: c_ulong = 30;

const fn ioc(dir: c_ulong, nr: c_ulong, size: usize) -> c_ulong {
    const VIDIOC_TYPE: c_ulong = b'V' as c_ulong;
    (dir << IOC_DIRSHIFT)
        | ((size as c_ulong) << IOC_SIZESHIFT)
        | (VIDIOC_TYPE << IOC_TYPESHIFT)
        | (nr << IOC_NRSHIFT)
}

const fn ior<T>(nr: c_ulong) -> c_ulong {
    ioc(IOC_READ, nr, mem::size_of::<T>())
}

const fn iow<T>(nr: c_ulong) -> c_ulong {
    ioc(IOC_WRITE, nr, mem::size_of::<T>())
}

const fn iowr<T>(nr: c_ulong) -> c_ulong {
    ioc(IOC_READ | IOC_WRITE, nr, mem::size_of::<T>())
}

pub const VIDIOC_QUERYCAP: c_ulong = ior::<v4l2_capability>(0);
pub const VIDIOC_ENUM_FMT: c_ulong = iowr::<v4l2_fmtdesc>(2);
pub const VIDIOC_G_FMT: c_ulong = iowr::<v4l2_format>(4);
pub const VIDIOC_S_FMT: c_ulong = iowr::<v4l2_format>(5);
pub const VIDIOC_REQBUFS: c_ulong = iowr::<v4l2_requestbuffers>(8);
pub const VIDIOC_QUERYBUF: c_ulong = iowr::<v4l2_buffer>(9);
pub const VIDIOC_QBUF: c_ulong = iowr::<v4l2_buffer>(15);
pub const VIDIOC_DQBUF: c_ulong = iowr::<v4l2_buffer>(17);
pub const VIDIOC_STREAMON: c_ulong = iow::<i32>(18);
pub const VIDIOC_STREAMOFF: c_ulong = iow::<i32>(19);
pub const VIDIOC_TRY_FMT: c_ulong = iowr::<v4l2_format>(64);

/// Decode a NUL-terminated fixed-size byte array from the kernel.
pub fn cstr_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
