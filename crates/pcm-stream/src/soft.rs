//! In-memory [`Device`] for tests and headless runs.
//!
//! Nothing plays on its own: callers advance sources with [`SoftDevice::process`] or
//! [`SoftDevice::underrun`], or build a [`SoftDevice::draining`] device that reports
//! every queued buffer as processed the moment it is asked.

use std::collections::{HashMap, VecDeque};

use anyhow::anyhow;

use crate::device::{BufferId, Device, ErrorCode, SourceId, SourceState};

/// Per-source call counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceCounters {
    pub plays: u32,
    pub stops: u32,
    pub rewinds: u32,
}

#[derive(Debug)]
struct SoftSource {
    queue: VecDeque<BufferId>,
    processed: usize,
    state: SourceState,
    counters: SourceCounters,
}

#[derive(Debug, Default)]
pub struct SoftDevice {
    opened: bool,
    open_failure: Option<String>,
    source_limit: Option<usize>,
    draining: bool,
    next_id: u32,
    sources: HashMap<SourceId, SoftSource>,
    buffers: HashMap<BufferId, (Vec<u8>, u32)>,
    error: ErrorCode,
}

impl SoftDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that treats every queued buffer as already played.
    pub fn draining() -> Self {
        Self {
            draining: true,
            ..Self::default()
        }
    }

    /// Device whose `open` always fails with `message`.
    pub fn failing_open(message: &str) -> Self {
        Self {
            open_failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Native limit on sources; allocations beyond it set `OUT_OF_MEMORY`.
    pub fn with_source_limit(mut self, limit: usize) -> Self {
        self.source_limit = Some(limit);
        self
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Mark up to `n` more queued buffers as played. Running dry stops a playing source.
    pub fn process(&mut self, source: SourceId, n: usize) {
        let Some(src) = self.sources.get_mut(&source) else {
            self.set_error(ErrorCode::INVALID_NAME);
            return;
        };
        src.processed = (src.processed + n).min(src.queue.len());
        if src.state == SourceState::Playing && src.processed == src.queue.len() {
            src.state = SourceState::Stopped;
        }
    }

    /// Play out everything queued on `source`, leaving it stopped.
    pub fn underrun(&mut self, source: SourceId) {
        let queued = self.sources.get(&source).map(|s| s.queue.len()).unwrap_or(0);
        self.process(source, queued);
        if let Some(src) = self.sources.get_mut(&source) {
            src.state = SourceState::Stopped;
        }
    }

    /// Set the error register as if a native call had failed.
    pub fn inject_error(&mut self, code: ErrorCode) {
        self.set_error(code);
    }

    pub fn counters(&self, source: SourceId) -> SourceCounters {
        self.sources
            .get(&source)
            .map(|s| s.counters)
            .unwrap_or_default()
    }

    /// Bytes currently stored in `buffer`, with the rate they were written at.
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<(&[u8], u32)> {
        self.buffers
            .get(&buffer)
            .map(|(data, rate)| (data.as_slice(), *rate))
    }

    /// Buffers queued on `source`, oldest first.
    pub fn queued(&self, source: SourceId) -> Vec<BufferId> {
        self.sources
            .get(&source)
            .map(|s| s.queue.iter().copied().collect())
            .unwrap_or_default()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn set_error(&mut self, code: ErrorCode) {
        if !self.error.is_error() {
            self.error = code;
        }
    }

    fn source_mut(&mut self, source: SourceId) -> Option<&mut SoftSource> {
        if !self.sources.contains_key(&source) {
            self.set_error(ErrorCode::INVALID_NAME);
        }
        self.sources.get_mut(&source)
    }
}

impl Device for SoftDevice {
    fn open(&mut self) -> anyhow::Result<()> {
        if let Some(message) = &self.open_failure {
            return Err(anyhow!("{message}"));
        }
        self.opened = true;
        Ok(())
    }

    fn gen_source(&mut self) -> SourceId {
        if self.source_limit.is_some_and(|limit| self.sources.len() >= limit) {
            self.set_error(ErrorCode::OUT_OF_MEMORY);
            return SourceId(0);
        }
        let id = SourceId(self.next_id());
        self.sources.insert(
            id,
            SoftSource {
                queue: VecDeque::new(),
                processed: 0,
                state: SourceState::Initial,
                counters: SourceCounters::default(),
            },
        );
        id
    }

    fn gen_buffers(&mut self, n: usize) -> Vec<BufferId> {
        (0..n)
            .map(|_| {
                let id = BufferId(self.next_id());
                self.buffers.insert(id, (Vec::new(), 0));
                id
            })
            .collect()
    }

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) {
        if buffers.iter().any(|b| !self.buffers.contains_key(b)) {
            self.set_error(ErrorCode::INVALID_NAME);
            return;
        }
        if let Some(src) = self.source_mut(source) {
            src.queue.extend(buffers.iter().copied());
        }
    }

    fn unqueue_buffers(&mut self, source: SourceId, n: usize) -> Vec<BufferId> {
        let Some(src) = self.source_mut(source) else {
            return Vec::new();
        };
        if n > src.processed {
            self.set_error(ErrorCode::INVALID_VALUE);
            return Vec::new();
        }
        src.processed -= n;
        src.queue.drain(..n).collect()
    }

    fn buffers_queued(&mut self, source: SourceId) -> usize {
        self.source_mut(source).map(|s| s.queue.len()).unwrap_or(0)
    }

    fn buffers_processed(&mut self, source: SourceId) -> usize {
        let draining = self.draining;
        match self.source_mut(source) {
            Some(src) => {
                if draining {
                    src.processed = src.queue.len();
                }
                src.processed
            }
            None => 0,
        }
    }

    fn buffer_data(&mut self, buffer: BufferId, pcm: &[u8], sample_rate: u32) {
        match self.buffers.get_mut(&buffer) {
            Some(slot) => *slot = (pcm.to_vec(), sample_rate),
            None => self.set_error(ErrorCode::INVALID_NAME),
        }
    }

    fn play(&mut self, source: SourceId) {
        if let Some(src) = self.source_mut(source) {
            src.counters.plays += 1;
            if src.state == SourceState::Stopped {
                src.processed = 0;
            }
            src.state = if src.queue.is_empty() {
                SourceState::Stopped
            } else {
                SourceState::Playing
            };
        }
    }

    fn stop(&mut self, source: SourceId) {
        if let Some(src) = self.source_mut(source) {
            src.counters.stops += 1;
            src.processed = src.queue.len();
            src.state = SourceState::Stopped;
        }
    }

    fn rewind(&mut self, source: SourceId) {
        if let Some(src) = self.source_mut(source) {
            src.counters.rewinds += 1;
            src.processed = 0;
            src.state = SourceState::Initial;
        }
    }

    fn state(&mut self, source: SourceId) -> SourceState {
        self.source_mut(source)
            .map(|s| s.state)
            .unwrap_or(SourceState::Initial)
    }

    fn last_error(&mut self) -> ErrorCode {
        std::mem::take(&mut self.error)
    }
}
