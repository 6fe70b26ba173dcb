use std::time::Duration;

use crate::device::FRAME_BYTES;

/// Streaming tuning parameters shared by the pool and every player.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Bytes pulled from the PCM source per device buffer.
    pub chunk_bytes: usize,
    /// Buffers kept in flight per source (queued plus free).
    pub queue_depth: usize,
    /// Hard cap on device sources the pool will ever allocate.
    pub max_sources: usize,
    /// Sleep between two iterations of the streaming loop.
    pub poll_interval: Duration,
}

impl Default for StreamConfig {
    /// Chunk and depth bound the worst-case latency of underrun recovery.
    fn default() -> Self {
        Self {
            chunk_bytes: 1024,
            queue_depth: 8,
            max_sources: 32,
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl StreamConfig {
    /// Return a copy with whole-frame chunks and non-zero depth/capacity.
    pub fn normalized(&self) -> Self {
        let frames = (self.chunk_bytes / FRAME_BYTES).max(1);
        Self {
            chunk_bytes: frames * FRAME_BYTES,
            queue_depth: self.queue_depth.max(1),
            max_sources: self.max_sources.max(1),
            poll_interval: self.poll_interval,
        }
    }

    /// Frames one player holds on the device when its queue is full.
    pub fn queued_frames(&self) -> usize {
        self.queue_depth * self.chunk_bytes / FRAME_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.chunk_bytes, 1024);
        assert_eq!(cfg.queue_depth, 8);
        assert_eq!(cfg.max_sources, 32);
    }

    #[test]
    fn normalized_rounds_chunk_to_whole_frames() {
        let cfg = StreamConfig {
            chunk_bytes: 1023,
            ..StreamConfig::default()
        };
        assert_eq!(cfg.normalized().chunk_bytes, 1020);
    }

    #[test]
    fn normalized_keeps_at_least_one_frame_and_buffer() {
        let cfg = StreamConfig {
            chunk_bytes: 1,
            queue_depth: 0,
            max_sources: 0,
            poll_interval: Duration::ZERO,
        }
        .normalized();
        assert_eq!(cfg.chunk_bytes, FRAME_BYTES);
        assert_eq!(cfg.queue_depth, 1);
        assert_eq!(cfg.max_sources, 1);
    }

    #[test]
    fn queued_frames_covers_the_whole_queue() {
        assert_eq!(StreamConfig::default().queued_frames(), 2048);
    }
}
