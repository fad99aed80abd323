// SPDX-License-Identifier: Apache-2.0

//! Direct-read strategy: one application-owned buffer, no device-side pool.

use crate::device::DeviceControl;
use crate::format::Format;
use crate::strategy::{Acquired, BufferStrategy, IoMethod};
use crate::Error;

/// Acquires frames with a direct read into a single buffer sized to the
/// granted format. There is no queue state; the buffer never leaves the
/// application.
#[derive(Debug, Default)]
pub struct ReadStrategy {
    buffer: Vec<u8>,
}

impl ReadStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferStrategy for ReadStrategy {
    fn method(&self) -> IoMethod {
        IoMethod::Read
    }

    fn buffer_count(&self) -> usize {
        usize::from(!self.buffer.is_empty())
    }

    fn allocate(&mut self, _dev: &dyn DeviceControl, format: &Format) -> Result<(), Error> {
        self.buffer = vec![0u8; format.size_image as usize];
        log::debug!("read strategy: 1 buffer of {} bytes", self.buffer.len());
        Ok(())
    }

    fn start(&mut self, _dev: &dyn DeviceControl) -> Result<(), Error> {
        // Nothing to do: no queue, no streaming state.
        Ok(())
    }

    fn acquire(&mut self, dev: &dyn DeviceControl) -> Result<Option<Acquired>, Error> {
        match dev.read_frame(&mut self.buffer)? {
            None => Ok(None),
            Some(n) => Ok(Some(Acquired {
                index: 0,
                length: n.min(self.buffer.len()),
            })),
        }
    }

    fn frame(&self, acquired: &Acquired) -> &[u8] {
        &self.buffer[..acquired.length]
    }

    fn requeue(&mut self, _dev: &dyn DeviceControl, _acquired: Acquired) -> Result<(), Error> {
        // The buffer is exclusively ours; there is nothing to return.
        Ok(())
    }

    fn stop(&mut self, _dev: &dyn DeviceControl) -> Result<(), Error> {
        Ok(())
    }

    fn release(&mut self, _dev: &dyn DeviceControl) -> Result<(), Error> {
        self.buffer = Vec::new();
        Ok(())
    }
}
