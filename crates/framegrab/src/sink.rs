// SPDX-License-Identifier: Apache-2.0

//! Frame consumer boundary
//!
//! A [`FrameSink`] is invoked exactly once per captured frame with a
//! borrowed view of the frame bytes. The view is valid only for the
//! duration of the call: as soon as `deliver` returns, the capture loop
//! hands the buffer back to the device, which may overwrite it without
//! further notice. Sinks that need the data longer must copy it before
//! returning. Display backends implement this trait outside the core.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::Error;

/// A synchronous consumer of captured frames.
pub trait FrameSink {
    /// Consume one frame. `frame` holds only valid image data (the device's
    /// reported byte count, which may be less than the buffer capacity).
    fn deliver(&mut self, frame: &[u8]) -> Result<(), Error>;
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn deliver(&mut self, _frame: &[u8]) -> Result<(), Error> {
        Ok(())
    }
}

/// Writes the first delivered frame verbatim to a file and ignores the
/// rest. Backs the one-shot grab mode.
#[derive(Debug)]
pub struct FileDumpSink {
    path: PathBuf,
    written: bool,
}

impl FileDumpSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileDumpSink {
            path: path.as_ref().to_path_buf(),
            written: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the dump file has been written.
    pub fn written(&self) -> bool {
        self.written
    }
}

impl FrameSink for FileDumpSink {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), Error> {
        if self.written {
            return Ok(());
        }
        fs::write(&self.path, frame)?;
        self.written = true;
        log::info!("image dumped to '{}'", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("framegrab-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_dump_writes_first_frame_verbatim() {
        let path = scratch_path("dump.dat");
        let mut sink = FileDumpSink::new(&path);

        sink.deliver(&[1, 2, 3, 4, 5]).unwrap();
        assert!(sink.written());
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);

        // Subsequent frames leave the dump untouched
        sink.deliver(&[9, 9, 9]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_null_sink_accepts_anything() {
        let mut sink = NullSink;
        sink.deliver(&[]).unwrap();
        sink.deliver(&[0; 1024]).unwrap();
    }
}
