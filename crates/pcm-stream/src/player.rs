//! Streaming player.
//!
//! A player owns one pooled source and keeps it fed from a PCM byte stream:
//! - `play` primes the queue with silence, starts the source, and spawns the loop
//! - each loop iteration reclaims played buffers, refills them from the stream,
//!   and restarts the source if it stalled (underrun)
//! - `close` unqueues everything and parks the source and its buffers in the pool
//!
//! The context lock is held only around device calls; reading the stream happens
//! without it, so a slow source never blocks other players.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::config::StreamConfig;
use crate::context::{Backend, lock_backend};
use crate::device::{BufferId, Device, SourceId, SourceState};
use crate::error::{self, Error, Fault};
use crate::pool::Lease;
use crate::reader::PcmReader;
use crate::status::{StatsSnapshot, StreamStats};

/// Outcome of one streaming iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Progress {
    Continue,
    EndOfStream,
    /// The player was closed while the iteration ran.
    Closed,
}

struct Stream {
    /// `None` once the source went back to the pool.
    source: Option<SourceId>,
    /// Buffers off the device, ready to be filled.
    free: VecDeque<BufferId>,
}

struct Shared<D: Device> {
    backend: Arc<Mutex<Backend<D>>>,
    config: StreamConfig,
    sample_rate: u32,
    // Lock order: backend, then stream. The reader lock is never held with either.
    stream: Mutex<Stream>,
    reader: Mutex<PcmReader>,
    stats: StreamStats,
}

/// Handle to a streaming player.
///
/// Dropping the handle does not stop a running stream: the loop keeps the player
/// alive until end-of-stream and closes it then. A player that was never played,
/// or whose loop has exited, is closed when its last reference goes away.
pub struct Player<D: Device> {
    shared: Arc<Shared<D>>,
    worker: Option<JoinHandle<Result<(), Error>>>,
}

impl<D: Device> std::fmt::Debug for Player<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player").finish_non_exhaustive()
    }
}

impl<D: Device> Player<D> {
    pub(crate) fn new(
        backend: Arc<Mutex<Backend<D>>>,
        config: StreamConfig,
        lease: Lease,
        pcm: Box<dyn Read + Send>,
        sample_rate: u32,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                sample_rate,
                stream: Mutex::new(Stream {
                    source: Some(lease.source),
                    free: lease.buffers.into(),
                }),
                reader: Mutex::new(PcmReader::new(pcm)),
                stats: StreamStats::default(),
            }),
            worker: None,
        }
    }

    /// Start playback and spawn the streaming loop.
    ///
    /// Fails with [`Error::AlreadyPlaying`] on a second call and [`Error::Closed`]
    /// after `close`.
    pub fn play(&mut self) -> Result<(), Error> {
        if self.worker.is_some() {
            return Err(Error::AlreadyPlaying);
        }
        self.shared.prime()?;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("pcm-stream".to_string())
            .spawn(move || shared.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.close();
                Err(Error::Spawn(err))
            }
        }
    }

    /// Stop playback and return the source to the pool. Safe to call repeatedly.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Block until the streaming loop exits and return how it ended.
    ///
    /// Returns `Ok(())` immediately if the player was never played or was already waited on.
    pub fn wait(&mut self) -> Result<(), Error> {
        match self.worker.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| Err(Error::StreamPanicked)),
            None => Ok(()),
        }
    }

    /// Whether the streaming loop has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| h.is_finished())
    }

    /// The claimed source, or `None` once closed.
    pub fn source(&self) -> Option<SourceId> {
        self.shared.stream().source
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot(self.shared.sample_rate)
    }
}

impl<D: Device> Shared<D> {
    fn backend(&self) -> MutexGuard<'_, Backend<D>> {
        lock_backend(&self.backend)
    }

    fn stream(&self) -> MutexGuard<'_, Stream> {
        self.stream
            .lock()
            .unwrap_or_else(|_| error::raise(Fault::Poisoned))
    }

    /// Top up to `queue_depth` buffers, queue them all as silence, and start the source.
    fn prime(&self) -> Result<(), Error> {
        let mut backend = self.backend();
        let mut stream = self.stream();
        let Some(source) = stream.source else {
            return Err(Error::Closed);
        };
        let device = &mut backend.device;

        let queued = device.buffers_queued(source);
        let missing = self
            .config
            .queue_depth
            .saturating_sub(queued + stream.free.len());
        if missing > 0 {
            let fresh = device.gen_buffers(missing);
            error::check(device, "gen buffers");
            stream.free.extend(fresh);
        }

        let silence = vec![0u8; self.config.chunk_bytes];
        let primed = stream.free.len();
        for buffer in stream.free.drain(..) {
            device.buffer_data(buffer, &silence, self.sample_rate);
            error::check(device, "fill silence buffer");
            device.queue_buffers(source, &[buffer]);
            error::check(device, "queue silence buffer");
        }

        device.play(source);
        error::check(device, "play source");
        tracing::debug!(
            source = %source,
            primed,
            already_queued = queued,
            "playback started"
        );
        Ok(())
    }

    /// One streaming iteration: reclaim, refill, recover from underrun.
    fn proceed(&self) -> Result<Progress, Error> {
        self.stats.record_iteration();

        {
            let mut backend = self.backend();
            let mut stream = self.stream();
            let Some(source) = stream.source else {
                return Ok(Progress::Closed);
            };
            let device = &mut backend.device;
            error::check(device, "before proceed");
            let processed = device.buffers_processed(source);
            if processed > 0 {
                let reclaimed = device.unqueue_buffers(source, processed);
                error::check(device, "unqueue processed buffers");
                stream.free.extend(reclaimed);
            }
        }

        while !self.stream().free.is_empty() {
            let chunk = self
                .reader
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .next_chunk(self.config.chunk_bytes)?;
            let Some(pcm) = chunk else {
                tracing::debug!(
                    bytes_queued = self.stats.snapshot(self.sample_rate).bytes_queued,
                    "end of pcm stream"
                );
                return Ok(Progress::EndOfStream);
            };

            let mut backend = self.backend();
            let mut stream = self.stream();
            let Some(source) = stream.source else {
                return Ok(Progress::Closed);
            };
            let Some(buffer) = stream.free.pop_front() else {
                break;
            };
            let device = &mut backend.device;
            device.buffer_data(buffer, &pcm, self.sample_rate);
            device.queue_buffers(source, &[buffer]);
            error::check(device, "queue buffer");
            self.stats.record_queued(pcm.len());
        }

        let mut backend = self.backend();
        let stream = self.stream();
        let Some(source) = stream.source else {
            return Ok(Progress::Closed);
        };
        let device = &mut backend.device;
        if device.state(source) == SourceState::Stopped {
            device.rewind(source);
            device.play(source);
            error::check(device, "restart stalled source");
            self.stats.record_underrun_recovery();
            tracing::debug!(source = %source, "source ran dry; restarted playback");
        }
        Ok(Progress::Continue)
    }

    /// Streaming loop body; closes the player on the way out.
    fn run(self: Arc<Self>) -> Result<(), Error> {
        let result = loop {
            match self.proceed() {
                Ok(Progress::Continue) => thread::sleep(self.config.poll_interval),
                Ok(Progress::EndOfStream | Progress::Closed) => break Ok(()),
                Err(err) => {
                    tracing::error!(error = %err, "streaming loop stopped");
                    self.stats.record_error(err.to_string());
                    break Err(err);
                }
            }
        };
        self.close();
        result
    }

    fn close(&self) {
        let mut backend = self.backend();
        let mut stream = self.stream();
        if let Some(source) = close_stream(&mut backend, &mut stream) {
            tracing::info!(source = %source, "player closed");
        }
    }
}

impl<D: Device> Drop for Shared<D> {
    fn drop(&mut self) {
        let stream = self.stream.get_mut().unwrap_or_else(|err| err.into_inner());
        let Some(source) = stream.source else {
            return;
        };
        match self.backend.lock() {
            Ok(mut backend) => {
                tracing::warn!(source = %source, "player dropped without close; releasing source");
                close_stream(&mut backend, stream);
            }
            Err(_) => {
                tracing::warn!(source = %source, "device lock poisoned; leaking source");
            }
        }
    }
}

/// Stop the source, reclaim its buffers, and release it to the pool.
///
/// Returns the released source, or `None` if the stream was already closed, in
/// which case the device is not touched.
fn close_stream<D: Device>(backend: &mut Backend<D>, stream: &mut Stream) -> Option<SourceId> {
    let source = stream.source.take()?;
    let device = &mut backend.device;
    error::check(device, "before closing");

    device.rewind(source);
    device.stop(source);
    let queued = device.buffers_queued(source);
    if queued > 0 {
        let reclaimed = device.unqueue_buffers(source, queued);
        stream.free.extend(reclaimed);
    }
    error::check(device, "closing");

    backend
        .pool
        .release(source, Vec::from(std::mem::take(&mut stream.free)));
    Some(source)
}
