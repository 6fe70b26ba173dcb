use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::FRAME_BYTES;

/// Counters updated by a player's streaming loop.
#[derive(Debug, Default)]
pub struct StreamStats {
    /// Completed `proceed` iterations.
    iterations: AtomicU64,
    /// PCM buffers submitted to the device (silence priming excluded).
    buffers_queued: AtomicU64,
    /// PCM bytes submitted to the device.
    bytes_queued: AtomicU64,
    /// Times a stalled source was rewound and restarted.
    underrun_recoveries: AtomicU64,
    /// Error that ended the loop, if any.
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub iterations: u64,
    pub buffers_queued: u64,
    pub bytes_queued: u64,
    pub underrun_recoveries: u64,
    /// Duration of the submitted PCM at the player's sample rate.
    pub queued_ms: Option<u64>,
    pub last_error: Option<String>,
}

impl StreamStats {
    pub(crate) fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self, bytes: usize) {
        self.buffers_queued.fetch_add(1, Ordering::Relaxed);
        self.bytes_queued.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_underrun_recovery(&self) {
        self.underrun_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, message: String) {
        let mut slot = self.last_error.lock().unwrap_or_else(|err| err.into_inner());
        *slot = Some(message);
    }

    /// Return a snapshot; `sample_rate` converts queued bytes to milliseconds.
    pub fn snapshot(&self, sample_rate: u32) -> StatsSnapshot {
        let bytes_queued = self.bytes_queued.load(Ordering::Relaxed);
        let queued_ms = if sample_rate > 0 {
            let frames = bytes_queued / FRAME_BYTES as u64;
            Some(frames.saturating_mul(1000) / sample_rate as u64)
        } else {
            None
        };
        StatsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            buffers_queued: self.buffers_queued.load(Ordering::Relaxed),
            bytes_queued,
            underrun_recoveries: self.underrun_recoveries.load(Ordering::Relaxed),
            queued_ms,
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .clone(),
        }
    }
}

/// Occupancy of a context's source pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// Sources allocated so far (never shrinks).
    pub sources: usize,
    /// Sources currently driving a player.
    pub claimed: usize,
    pub max_sources: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_queued_duration() {
        let stats = StreamStats::default();
        stats.record_queued(1024);
        stats.record_queued(1024);

        let snap = stats.snapshot(512);
        assert_eq!(snap.buffers_queued, 2);
        assert_eq!(snap.bytes_queued, 2048);
        assert_eq!(snap.queued_ms, Some(1000));
    }

    #[test]
    fn snapshot_without_rate_has_no_duration() {
        let stats = StreamStats::default();
        stats.record_queued(4);
        assert_eq!(stats.snapshot(0).queued_ms, None);
    }

    #[test]
    fn snapshot_keeps_counters_and_error() {
        let stats = StreamStats::default();
        stats.record_iteration();
        stats.record_underrun_recovery();
        stats.record_error("boom".to_string());

        let snap = stats.snapshot(44_100);
        assert_eq!(snap.iterations, 1);
        assert_eq!(snap.underrun_recoveries, 1);
        assert_eq!(snap.last_error.as_deref(), Some("boom"));
    }
}
