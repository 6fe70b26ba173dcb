//! Error channels.
//!
//! [`Error`] covers conditions a caller is expected to handle: pool exhaustion, a
//! failing PCM source, device open failures. [`Fault`] covers broken invariants
//! (unexpected device errors, pool bookkeeping mismatches); those are never
//! returned, they abort the current thread via [`raise`].

use std::io;

use thiserror::Error;

use crate::device::{Device, ErrorCode, SourceId};

/// Recoverable errors surfaced to callers.
#[derive(Debug, Error)]
pub enum Error {
    /// Every pool slot is claimed or bound to another sample rate.
    #[error("too many players: all {max_sources} device sources are in use")]
    TooManyResources { max_sources: usize },

    #[error("audio device initialization failed: {0}")]
    DeviceOpen(String),

    /// The PCM source failed with something other than end-of-stream.
    #[error("pcm source read failed: {0}")]
    Read(#[from] io::Error),

    #[error("player is already playing")]
    AlreadyPlaying,

    #[error("player is closed")]
    Closed,

    #[error("failed to spawn streaming thread: {0}")]
    Spawn(io::Error),

    #[error("streaming thread panicked")]
    StreamPanicked,
}

/// Invariant violations. Continuing after one risks two players sharing a source.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("device error during {op}: {code}")]
    Device { op: &'static str, code: ErrorCode },

    #[error("pool state is invalid: {0} is not cached")]
    UnknownSource(SourceId),

    #[error("pool state is invalid: {0} is already released")]
    DoubleRelease(SourceId),

    #[error("device lock poisoned by an earlier fault")]
    Poisoned,
}

/// Log the fault and panic.
#[track_caller]
pub fn raise(fault: Fault) -> ! {
    tracing::error!(%fault, "unrecoverable audio fault");
    panic!("audio: {fault}");
}

/// Raise [`Fault::Device`] if the device error register is set.
#[track_caller]
pub(crate) fn check<D: Device + ?Sized>(device: &mut D, op: &'static str) {
    let code = device.last_error();
    if code.is_error() {
        raise(Fault::Device { op, code });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_resources_mentions_capacity() {
        let err = Error::TooManyResources { max_sources: 32 };
        assert_eq!(
            err.to_string(),
            "too many players: all 32 device sources are in use"
        );
    }

    #[test]
    fn read_errors_convert_from_io() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, Error::Read(_)));
    }

    #[test]
    #[should_panic(expected = "device error during queue: invalid value")]
    fn raise_panics_with_fault_text() {
        raise(Fault::Device {
            op: "queue",
            code: ErrorCode::INVALID_VALUE,
        });
    }
}
