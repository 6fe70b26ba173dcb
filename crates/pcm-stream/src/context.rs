//! Device plus source pool behind one lock.
//!
//! A [`Context`] is the process-wide owner of a playback device. Clones share the
//! same device, pool and lock; every native call made by any player goes through
//! that lock, so the device never sees concurrent calls.

use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::StreamConfig;
use crate::device::Device;
use crate::error::{self, Error, Fault};
use crate::player::Player;
use crate::pool::SourcePool;
use crate::status::PoolStatus;

pub(crate) struct Backend<D> {
    pub(crate) device: D,
    pub(crate) pool: SourcePool,
    opened: bool,
}

impl<D: Device> Backend<D> {
    fn ensure_open(&mut self) -> Result<(), Error> {
        if self.opened {
            return Ok(());
        }
        self.device
            .open()
            .map_err(|e| Error::DeviceOpen(format!("{e:#}")))?;
        self.opened = true;
        tracing::info!(max_sources = self.pool.max_sources(), "audio device opened");
        Ok(())
    }
}

/// Lock the backend; a poisoned lock means a fault already fired under it.
pub(crate) fn lock_backend<D>(backend: &Mutex<Backend<D>>) -> MutexGuard<'_, Backend<D>> {
    backend.lock().unwrap_or_else(|_| error::raise(Fault::Poisoned))
}

/// Shared handle to a device and its source pool.
///
/// Pooled sources are only driven through players; the device is not handed out:
///
/// ```compile_fail
/// use pcm_stream::{Context, soft::SoftDevice};
///
/// let ctx = Context::new(SoftDevice::new());
/// ctx.with_device(|d| d.source_count());
/// ```
pub struct Context<D: Device> {
    backend: Arc<Mutex<Backend<D>>>,
    config: StreamConfig,
}

impl<D: Device> Clone for Context<D> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

impl<D: Device> Context<D> {
    pub fn new(device: D) -> Self {
        Self::with_config(device, StreamConfig::default())
    }

    /// The device is opened lazily by the first [`Context::open_player`].
    pub fn with_config(device: D, config: StreamConfig) -> Self {
        let config = config.normalized();
        Self {
            backend: Arc::new(Mutex::new(Backend {
                device,
                pool: SourcePool::new(config.max_sources),
                opened: false,
            })),
            config,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Open a player streaming `pcm` (interleaved s16le stereo) at `sample_rate`.
    ///
    /// Claims a pooled source for the rate or allocates a new one. Fails with
    /// [`Error::TooManyResources`] when the pool is full, leaving no partial state.
    pub fn open_player<R>(&self, pcm: R, sample_rate: u32) -> Result<Player<D>, Error>
    where
        R: Read + Send + 'static,
    {
        let lease = {
            let mut backend = lock_backend(&self.backend);
            backend.ensure_open()?;
            let Backend { device, pool, .. } = &mut *backend;
            pool.claim(device, sample_rate)?
        };
        tracing::info!(
            source = %lease.source,
            rate_hz = sample_rate,
            buffers = lease.buffers.len(),
            "player opened"
        );
        Ok(Player::new(
            Arc::clone(&self.backend),
            self.config.clone(),
            lease,
            Box::new(pcm),
            sample_rate,
        ))
    }

    /// Run `f` against the device while holding the context lock.
    #[cfg(test)]
    pub(crate) fn with_device<T>(&self, f: impl FnOnce(&mut D) -> T) -> T {
        let mut backend = lock_backend(&self.backend);
        f(&mut backend.device)
    }

    pub fn pool_status(&self) -> PoolStatus {
        let backend = lock_backend(&self.backend);
        PoolStatus {
            sources: backend.pool.len(),
            claimed: backend.pool.claimed(),
            max_sources: backend.pool.max_sources(),
        }
    }
}
