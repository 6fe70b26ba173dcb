use std::io::{self, ErrorKind, Read};

use crate::device::FRAME_BYTES;

/// Pulls whole frames from a PCM byte stream.
///
/// A read that ends mid-frame keeps the remainder for the next chunk, so every
/// device buffer holds a whole number of frames.
pub(crate) struct PcmReader {
    inner: Box<dyn Read + Send>,
    carry: Vec<u8>,
}

impl PcmReader {
    pub(crate) fn new(inner: Box<dyn Read + Send>) -> Self {
        Self {
            inner,
            carry: Vec::with_capacity(FRAME_BYTES),
        }
    }

    /// Read up to `max_bytes` (a multiple of [`FRAME_BYTES`]).
    ///
    /// Returns `Ok(None)` at end-of-stream. A trailing partial frame is discarded.
    pub(crate) fn next_chunk(&mut self, max_bytes: usize) -> io::Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; max_bytes.max(FRAME_BYTES)];
        let mut filled = self.carry.len();
        chunk[..filled].copy_from_slice(&self.carry);
        self.carry.clear();

        loop {
            match self.inner.read(&mut chunk[filled..]) {
                Ok(0) => {
                    if filled > 0 {
                        tracing::debug!(bytes = filled, "dropping trailing partial frame");
                    }
                    return Ok(None);
                }
                Ok(n) => {
                    filled += n;
                    let aligned = filled - filled % FRAME_BYTES;
                    if aligned == 0 {
                        continue;
                    }
                    self.carry.extend_from_slice(&chunk[aligned..filled]);
                    chunk.truncate(aligned);
                    return Ok(Some(chunk));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.carry.extend_from_slice(&chunk[..filled]);
                    return Err(e);
                }
            }
        }
    }
}
