// SPDX-License-Identifier: Apache-2.0

//! Capture format negotiation
//!
//! The negotiator proposes a format and the device answers with the format
//! it will actually produce; width, height, and even the pixel encoding may
//! be rewritten. Everything downstream sizes itself from the granted
//! [`Format`], never the requested one.

use std::fmt;

use crate::device::DeviceControl;
use crate::fourcc::FourCC;
use crate::{sys, Error};

/// Field order of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    /// No preference
    Any,
    /// Progressive scan
    Progressive,
    /// Interleaved fields
    Interlaced,
    /// A field order this crate does not model
    Other(u32),
}

impl FieldOrder {
    pub(crate) fn raw(self) -> u32 {
        match self {
            FieldOrder::Any => sys::V4L2_FIELD_ANY,
            FieldOrder::Progressive => sys::V4L2_FIELD_NONE,
            FieldOrder::Interlaced => sys::V4L2_FIELD_INTERLACED,
            FieldOrder::Other(raw) => raw,
        }
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        match raw {
            sys::V4L2_FIELD_ANY => FieldOrder::Any,
            sys::V4L2_FIELD_NONE => FieldOrder::Progressive,
            sys::V4L2_FIELD_INTERLACED => FieldOrder::Interlaced,
            other => FieldOrder::Other(other),
        }
    }
}

/// A negotiated capture format.
///
/// Produced by [`negotiate`] and immutable for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel encoding
    pub pixel_format: FourCC,
    /// Field order
    pub field: FieldOrder,
    /// Bytes per scanline, including any driver padding
    pub bytes_per_line: u32,
    /// Total bytes of one frame; buffer pools size themselves from this
    pub size_image: u32,
}

impl Format {
    /// The format proposed to the device: RGB24, interlaced, caller's size.
    /// Line and image sizes are left for the device to fill in.
    pub fn request(width: u32, height: u32) -> Self {
        Format {
            width,
            height,
            pixel_format: FourCC::from(sys::V4L2_PIX_FMT_RGB24),
            field: FieldOrder::Interlaced,
            bytes_per_line: 0,
            size_image: 0,
        }
    }

    pub(crate) fn to_sys(&self) -> sys::v4l2_format {
        let mut raw = sys::v4l2_format {
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        raw.fmt.pix.width = self.width;
        raw.fmt.pix.height = self.height;
        raw.fmt.pix.pixelformat = self.pixel_format.into();
        raw.fmt.pix.field = self.field.raw();
        raw.fmt.pix.bytesperline = self.bytes_per_line;
        raw.fmt.pix.sizeimage = self.size_image;
        raw
    }

    pub(crate) fn from_sys(raw: &sys::v4l2_format) -> Self {
        let pix = &raw.fmt.pix;
        Format {
            width: pix.width,
            height: pix.height,
            pixel_format: FourCC::from(pix.pixelformat),
            field: FieldOrder::from_raw(pix.field),
            bytes_per_line: pix.bytesperline,
            size_image: pix.sizeimage,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{}, {} bytes/frame)",
            self.pixel_format, self.width, self.height, self.size_image
        )
    }
}

/// Diagnostic collaborator that judges whether the device's raw output
/// differs from what was requested. Purely informational; the answer never
/// alters negotiation.
pub trait ConversionProbe {
    fn needs_conversion(&self, requested: &Format, raw: &Format) -> bool;
}

/// Default probe: compares pixel encoding and geometry.
#[derive(Debug, Default)]
pub struct FourccProbe;

impl ConversionProbe for FourccProbe {
    fn needs_conversion(&self, requested: &Format, raw: &Format) -> bool {
        requested.pixel_format != raw.pixel_format
            || requested.width != raw.width
            || requested.height != raw.height
    }
}

/// Negotiate a capture format with the device.
///
/// Proposes RGB24/interlaced at `width`x`height`, consults `probe` against
/// the device's counter-proposal for diagnostics, submits the request, then
/// re-reads the now-authoritative format from the device.
pub fn negotiate(
    dev: &dyn DeviceControl,
    width: u32,
    height: u32,
    probe: &dyn ConversionProbe,
) -> Result<Format, Error> {
    let requested = Format::request(width, height);

    let raw = dev.try_format(&requested)?;
    log::debug!("device raw output would be {}", raw);
    if probe.needs_conversion(&requested, &raw) {
        log::info!(
            "requested {} differs from native {}; driver-side conversion expected",
            requested.pixel_format,
            raw
        );
    }

    dev.set_format(&requested)?;

    let granted = dev.format()?;
    if granted.width != width || granted.height != height {
        log::warn!(
            "requested {}x{}, device granted {}",
            width,
            height,
            granted
        );
    }
    log::info!("capture format: {}", granted);
    Ok(granted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevice;
    use std::cell::Cell;

    struct CountingProbe {
        calls: Cell<u32>,
        answer: bool,
    }

    impl ConversionProbe for CountingProbe {
        fn needs_conversion(&self, _requested: &Format, _raw: &Format) -> bool {
            self.calls.set(self.calls.get() + 1);
            self.answer
        }
    }

    #[test]
    fn test_negotiate_uses_granted_format() {
        // Device rounds 640x480 down and substitutes YUYV
        let mut granted = Format::request(352, 288);
        granted.pixel_format = FourCC(*b"YUYV");
        granted.bytes_per_line = 352 * 2;
        granted.size_image = 352 * 288 * 2;
        let dev = FakeDevice::builder().granted_format(granted.clone()).build();

        let probe = CountingProbe {
            calls: Cell::new(0),
            answer: true,
        };
        let format = negotiate(&dev, 640, 480, &probe).unwrap();

        assert_eq!(format, granted);
        assert_eq!(probe.calls.get(), 1);
        // set_format saw the original request, not the rewritten answer
        let submitted = dev.submitted_format().expect("set_format not called");
        assert_eq!(submitted.width, 640);
        assert_eq!(submitted.height, 480);
        assert_eq!(u32::from(submitted.pixel_format), sys::V4L2_PIX_FMT_RGB24);
    }

    #[test]
    fn test_request_is_rgb24_interlaced() {
        let req = Format::request(640, 480);
        assert_eq!(u32::from(req.pixel_format), sys::V4L2_PIX_FMT_RGB24);
        assert_eq!(req.field, FieldOrder::Interlaced);
    }

    #[test]
    fn test_sys_round_trip() {
        let mut format = Format::request(1280, 720);
        format.bytes_per_line = 1280 * 3;
        format.size_image = 1280 * 720 * 3;
        assert_eq!(Format::from_sys(&format.to_sys()), format);
    }
}
