// SPDX-License-Identifier: Apache-2.0

//! Memory-mapped strategy: kernel-owned buffers mapped into the process.

use crate::device::{DeviceControl, Mapping, MemoryKind};
use crate::format::Format;
use crate::strategy::{Acquired, BufferStrategy, IoMethod, StateTable, MIN_BUFFERS, REQUESTED_BUFFERS};
use crate::Error;

/// Streams through buffers the device allocates and the application maps.
///
/// The device chooses how many buffers to grant (at least [`MIN_BUFFERS`]);
/// the application never allocates or frees this memory, only maps and
/// unmaps it. Every buffer is offered to the device's input queue before
/// streaming starts.
#[derive(Debug)]
pub struct MmapStrategy {
    mappings: Vec<Mapping>,
    states: StateTable,
    streaming: bool,
}

impl MmapStrategy {
    pub fn new() -> Self {
        MmapStrategy {
            mappings: Vec::new(),
            states: StateTable::new(0),
            streaming: false,
        }
    }
}

impl Default for MmapStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStrategy for MmapStrategy {
    fn method(&self) -> IoMethod {
        IoMethod::Mmap
    }

    fn buffer_count(&self) -> usize {
        self.mappings.len()
    }

    fn allocate(&mut self, dev: &dyn DeviceControl, _format: &Format) -> Result<(), Error> {
        let granted = dev.request_buffers(MemoryKind::Mmap, REQUESTED_BUFFERS)?;
        if granted < MIN_BUFFERS {
            return Err(Error::InsufficientBuffers {
                device: dev.path().to_path_buf(),
                granted,
            });
        }

        for index in 0..granted {
            let info = dev.query_buffer(index)?;
            let mapping = dev.map_buffer(&info)?;
            log::debug!(
                "mapped buffer {} ({} bytes at offset {:#x})",
                index,
                info.length,
                info.offset
            );
            self.mappings.push(mapping);
        }
        self.states = StateTable::new(self.mappings.len());
        log::info!("mmap strategy: {} device buffers mapped", granted);
        Ok(())
    }

    fn start(&mut self, dev: &dyn DeviceControl) -> Result<(), Error> {
        for index in 0..self.mappings.len() {
            self.states.mark_queued(index);
            dev.queue_mmap(index as u32)?;
        }
        dev.stream_on()?;
        self.streaming = true;
        Ok(())
    }

    fn acquire(&mut self, dev: &dyn DeviceControl) -> Result<Option<Acquired>, Error> {
        let Some(dequeued) = dev.dequeue(MemoryKind::Mmap)? else {
            return Ok(None);
        };

        let index = dequeued.index as usize;
        if index >= self.mappings.len() {
            return Err(Error::BadBufferIndex {
                index: dequeued.index,
                count: self.mappings.len(),
            });
        }
        self.states.mark_delivered(index);

        // Only the reported byte count is valid image data.
        let length = (dequeued.bytesused as usize).min(self.mappings[index].len());
        Ok(Some(Acquired { index, length }))
    }

    fn frame(&self, acquired: &Acquired) -> &[u8] {
        &self.mappings[acquired.index].as_slice()[..acquired.length]
    }

    fn requeue(&mut self, dev: &dyn DeviceControl, acquired: Acquired) -> Result<(), Error> {
        self.states.mark_requeued(acquired.index);
        dev.queue_mmap(acquired.index as u32)
    }

    fn stop(&mut self, dev: &dyn DeviceControl) -> Result<(), Error> {
        if self.streaming {
            dev.stream_off()?;
            self.streaming = false;
            self.states.reset();
        }
        Ok(())
    }

    fn release(&mut self, _dev: &dyn DeviceControl) -> Result<(), Error> {
        for mut mapping in self.mappings.drain(..) {
            mapping.unmap()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::IoMethod;
    use crate::testing::FakeDevice;

    fn format() -> Format {
        let mut format = Format::request(640, 480);
        format.bytes_per_line = 640 * 3;
        format.size_image = 640 * 480 * 3;
        format
    }

    #[test]
    fn test_grant_of_four_maps_and_queues_all() {
        let dev = FakeDevice::builder()
            .grant(4)
            .buffer_len(640 * 480 * 3)
            .build();
        let mut strategy = MmapStrategy::new();

        strategy.allocate(&dev, &format()).unwrap();
        assert_eq!(strategy.buffer_count(), 4);

        strategy.start(&dev).unwrap();
        // All four offered to the input queue before stream-on
        assert_eq!(dev.queued_indices(), vec![0, 1, 2, 3]);
        assert!(dev.queued_before_stream_on());
        assert_eq!(dev.stream_on_calls(), 1);
    }

    #[test]
    fn test_grant_of_one_is_insufficient() {
        let dev = FakeDevice::builder().grant(1).build();
        let mut strategy = MmapStrategy::new();

        let err = strategy.allocate(&dev, &format()).unwrap_err();
        assert!(matches!(err, Error::InsufficientBuffers { granted: 1, .. }));
        // Setup failed before any stream-on attempt
        assert_eq!(dev.stream_on_calls(), 0);
    }

    #[test]
    fn test_rejected_memory_type() {
        let dev = FakeDevice::builder()
            .unsupported(MemoryKind::Mmap)
            .build();
        let mut strategy = MmapStrategy::new();

        let err = strategy.allocate(&dev, &format()).unwrap_err();
        assert!(matches!(
            err,
            Error::MethodUnsupported {
                method: IoMethod::Mmap,
                ..
            }
        ));
    }

    #[test]
    fn test_acquire_deliver_requeue_cycle() {
        let dev = FakeDevice::builder()
            .grant(2)
            .buffer_len(64)
            .dequeue_frames(vec![(1, 48), (0, 64)])
            .build();
        let mut strategy = MmapStrategy::new();
        strategy.allocate(&dev, &format()).unwrap();
        strategy.start(&dev).unwrap();

        // Device picks buffer 1 first, with a short frame
        let acquired = strategy.acquire(&dev).unwrap().unwrap();
        assert_eq!(acquired.index, 1);
        assert_eq!(acquired.length, 48);
        assert_eq!(strategy.frame(&acquired).len(), 48);
        strategy.requeue(&dev, acquired).unwrap();

        let acquired = strategy.acquire(&dev).unwrap().unwrap();
        assert_eq!(acquired.index, 0);
        assert_eq!(acquired.length, 64);
        strategy.requeue(&dev, acquired).unwrap();

        // 2 initial queues + 2 requeues
        assert_eq!(dev.queued_indices(), vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_not_ready_is_not_an_error() {
        let dev = FakeDevice::builder().grant(2).buffer_len(64).build();
        let mut strategy = MmapStrategy::new();
        strategy.allocate(&dev, &format()).unwrap();
        strategy.start(&dev).unwrap();

        // No scripted frames: dequeue reports EAGAIN
        assert!(strategy.acquire(&dev).unwrap().is_none());
    }

    #[test]
    fn test_out_of_range_index_is_fatal() {
        let dev = FakeDevice::builder()
            .grant(2)
            .buffer_len(64)
            .dequeue_frames(vec![(9, 64)])
            .build();
        let mut strategy = MmapStrategy::new();
        strategy.allocate(&dev, &format()).unwrap();
        strategy.start(&dev).unwrap();

        let err = strategy.acquire(&dev).unwrap_err();
        assert!(matches!(
            err,
            Error::BadBufferIndex { index: 9, count: 2 }
        ));
    }

    #[test]
    fn test_stop_and_release_are_idempotent() {
        let dev = FakeDevice::builder().grant(3).buffer_len(64).build();
        let mut strategy = MmapStrategy::new();
        strategy.allocate(&dev, &format()).unwrap();
        strategy.start(&dev).unwrap();

        strategy.stop(&dev).unwrap();
        strategy.stop(&dev).unwrap();
        assert_eq!(dev.stream_off_calls(), 1);

        strategy.release(&dev).unwrap();
        strategy.release(&dev).unwrap();
        assert_eq!(strategy.buffer_count(), 0);
    }
}
