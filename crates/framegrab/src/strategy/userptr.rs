// SPDX-License-Identifier: Apache-2.0

//! User-pointer strategy: application-owned buffers lent to the device.

use std::{alloc, fmt, io, ptr::NonNull, slice};

use crate::device::{DeviceControl, MemoryKind};
use crate::format::Format;
use crate::strategy::{Acquired, BufferStrategy, IoMethod, StateTable, REQUESTED_BUFFERS};
use crate::Error;

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// A page-aligned, zero-initialized allocation the device writes into while
/// a buffer is queued.
struct PageAligned {
    ptr: NonNull<u8>,
    layout: alloc::Layout,
}

impl PageAligned {
    fn new(len: usize, align: usize) -> Result<Self, Error> {
        let layout = alloc::Layout::from_size_align(len, align)
            .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, err)))?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "frame buffer allocation failed",
            ))
        })?;
        Ok(PageAligned { ptr, layout })
    }

    fn len(&self) -> usize {
        self.layout.size()
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }
}

impl Drop for PageAligned {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for PageAligned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageAligned")
            .field("len", &self.len())
            .finish()
    }
}

/// Streams through application-allocated buffers whose addresses are lent
/// to the device. The device identifies a filled buffer by returning the
/// matching address and length, which the pool resolves back to an index.
#[derive(Debug)]
pub struct UserPtrStrategy {
    buffers: Vec<PageAligned>,
    states: StateTable,
    streaming: bool,
}

impl UserPtrStrategy {
    pub fn new() -> Self {
        UserPtrStrategy {
            buffers: Vec::new(),
            states: StateTable::new(0),
            streaming: false,
        }
    }

    /// Resolve a dequeued (address, length) pair to a pool index.
    fn resolve(&self, userptr: u64, length: u32) -> Option<usize> {
        self.buffers
            .iter()
            .position(|buf| buf.as_mut_ptr() as u64 == userptr && buf.len() == length as usize)
    }
}

impl Default for UserPtrStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStrategy for UserPtrStrategy {
    fn method(&self) -> IoMethod {
        IoMethod::UserPtr
    }

    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn allocate(&mut self, dev: &dyn DeviceControl, format: &Format) -> Result<(), Error> {
        let page = page_size();
        // Round the frame size up to the page size; drivers require it.
        let size = (format.size_image as usize + page - 1) & !(page - 1);

        dev.request_buffers(MemoryKind::UserPtr, REQUESTED_BUFFERS)?;

        for _ in 0..REQUESTED_BUFFERS {
            self.buffers.push(PageAligned::new(size, page)?);
        }
        self.states = StateTable::new(self.buffers.len());
        log::info!(
            "userptr strategy: {} buffers of {} bytes (page-aligned)",
            self.buffers.len(),
            size
        );
        Ok(())
    }

    fn start(&mut self, dev: &dyn DeviceControl) -> Result<(), Error> {
        for (index, buf) in self.buffers.iter().enumerate() {
            self.states.mark_queued(index);
            dev.queue_userptr(index as u32, buf.as_mut_ptr(), buf.len())?;
        }
        dev.stream_on()?;
        self.streaming = true;
        Ok(())
    }

    fn acquire(&mut self, dev: &dyn DeviceControl) -> Result<Option<Acquired>, Error> {
        let Some(dequeued) = dev.dequeue(MemoryKind::UserPtr)? else {
            return Ok(None);
        };

        let index = self
            .resolve(dequeued.userptr, dequeued.length)
            .ok_or(Error::NoMatchingBuffer {
                userptr: dequeued.userptr,
                length: dequeued.length,
            })?;
        self.states.mark_delivered(index);

        let length = (dequeued.bytesused as usize).min(self.buffers[index].len());
        Ok(Some(Acquired { index, length }))
    }

    fn frame(&self, acquired: &Acquired) -> &[u8] {
        &self.buffers[acquired.index].as_slice()[..acquired.length]
    }

    fn requeue(&mut self, dev: &dyn DeviceControl, acquired: Acquired) -> Result<(), Error> {
        self.states.mark_requeued(acquired.index);
        let buf = &self.buffers[acquired.index];
        dev.queue_userptr(acquired.index as u32, buf.as_mut_ptr(), buf.len())
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
        self.buffers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevice;

    fn format() -> Format {
        let mut format = Format::request(320, 240);
        format.size_image = 320 * 240 * 3;
        format
    }

    #[test]
    fn test_allocates_four_page_aligned_buffers() {
        let dev = FakeDevice::builder().grant(4).build();
        let mut strategy = UserPtrStrategy::new();
        strategy.allocate(&dev, &format()).unwrap();

        let page = page_size();
        assert_eq!(strategy.buffer_count(), 4);
        for buf in &strategy.buffers {
            assert_eq!(buf.as_mut_ptr() as usize % page, 0);
            assert_eq!(buf.len() % page, 0);
            assert!(buf.len() >= 320 * 240 * 3);
        }
    }

    #[test]
    fn test_rejected_memory_type() {
        let dev = FakeDevice::builder()
            .unsupported(MemoryKind::UserPtr)
            .build();
        let mut strategy = UserPtrStrategy::new();

        let err = strategy.allocate(&dev, &format()).unwrap_err();
        assert!(matches!(
            err,
            Error::MethodUnsupported {
                method: IoMethod::UserPtr,
                ..
            }
        ));
    }

    #[test]
    fn test_acquire_resolves_by_address() {
        let dev = FakeDevice::builder()
            .grant(4)
            .dequeue_slots(vec![(2, 1000), (0, 2000)])
            .build();
        let mut strategy = UserPtrStrategy::new();
        strategy.allocate(&dev, &format()).unwrap();
        strategy.start(&dev).unwrap();

        let acquired = strategy.acquire(&dev).unwrap().unwrap();
        assert_eq!(acquired.index, 2);
        assert_eq!(acquired.length, 1000);
        strategy.requeue(&dev, acquired).unwrap();

        let acquired = strategy.acquire(&dev).unwrap().unwrap();
        assert_eq!(acquired.index, 0);
        assert_eq!(acquired.length, 2000);
        strategy.requeue(&dev, acquired).unwrap();
    }

    #[test]
    fn test_unknown_address_is_fatal() {
        let dev = FakeDevice::builder()
            .grant(4)
            .dequeue_alien_address(64)
            .build();
        let mut strategy = UserPtrStrategy::new();
        strategy.allocate(&dev, &format()).unwrap();
        strategy.start(&dev).unwrap();

        let err = strategy.acquire(&dev).unwrap_err();
        assert!(matches!(err, Error::NoMatchingBuffer { .. }));
    }

    #[test]
    fn test_release_frees_pool() {
        let dev = FakeDevice::builder().grant(4).build();
        let mut strategy = UserPtrStrategy::new();
        strategy.allocate(&dev, &format()).unwrap();
        strategy.release(&dev).unwrap();
        assert_eq!(strategy.buffer_count(), 0);
        strategy.release(&dev).unwrap();
    }
}
