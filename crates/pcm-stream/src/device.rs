//! Playback device interface.
//!
//! The player never talks to a driver directly; it goes through [`Device`], an
//! OpenAL-shaped API of sources (playback channels) fed by queues of buffers.
//! Every call happens while holding the owning [`crate::Context`] lock, so
//! implementations do not need to tolerate concurrent calls.

use std::fmt;

/// Bytes per frame of interleaved signed 16-bit little-endian stereo.
pub const FRAME_BYTES: usize = 4;

/// Opaque device source handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

/// Opaque device buffer handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Playback state of a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    /// Never played, or rewound.
    Initial,
    Playing,
    Paused,
    /// Stopped explicitly, or ran out of queued buffers.
    Stopped,
}

/// Value of the device error register. Zero means no error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const NONE: ErrorCode = ErrorCode(0);
    pub const INVALID_NAME: ErrorCode = ErrorCode(0xA001);
    pub const INVALID_ENUM: ErrorCode = ErrorCode(0xA002);
    pub const INVALID_VALUE: ErrorCode = ErrorCode(0xA003);
    pub const INVALID_OPERATION: ErrorCode = ErrorCode(0xA004);
    pub const OUT_OF_MEMORY: ErrorCode = ErrorCode(0xA005);

    pub fn is_error(self) -> bool {
        self != Self::NONE
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::NONE => "no error",
            Self::INVALID_NAME => "invalid name",
            Self::INVALID_ENUM => "invalid enum",
            Self::INVALID_VALUE => "invalid value",
            Self::INVALID_OPERATION => "invalid operation",
            Self::OUT_OF_MEMORY => "out of memory",
            _ => "unknown error",
        };
        write!(f, "{name} (0x{:04x})", self.0)
    }
}

/// Native playback API consumed by the pool and players.
///
/// Failing native calls do not return errors; they set the error register, which the
/// caller reads with [`Device::last_error`] right after the call (read-and-clear).
pub trait Device: Send + 'static {
    /// Open the device. Must be idempotent.
    fn open(&mut self) -> anyhow::Result<()>;

    /// Allocate one source.
    fn gen_source(&mut self) -> SourceId;

    /// Allocate `n` buffers.
    fn gen_buffers(&mut self, n: usize) -> Vec<BufferId>;

    /// Append buffers to the source's queue.
    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]);

    /// Remove `n` processed buffers from the front of the source's queue.
    fn unqueue_buffers(&mut self, source: SourceId, n: usize) -> Vec<BufferId>;

    fn buffers_queued(&mut self, source: SourceId) -> usize;

    /// Number of queued buffers that have finished playing.
    fn buffers_processed(&mut self, source: SourceId) -> usize;

    /// Fill a buffer with interleaved 16-bit stereo PCM at `sample_rate`.
    fn buffer_data(&mut self, buffer: BufferId, pcm: &[u8], sample_rate: u32);

    fn play(&mut self, source: SourceId);

    /// Stop the source; every queued buffer counts as processed afterwards.
    fn stop(&mut self, source: SourceId);

    /// Return the source to [`SourceState::Initial`] at the head of its queue.
    fn rewind(&mut self, source: SourceId);

    fn state(&mut self, source: SourceId) -> SourceState;

    /// Read and clear the error register.
    fn last_error(&mut self) -> ErrorCode;
}
