//! Reusable device sources.
//!
//! Some drivers fail when sources and buffers are generated too often, so a source
//! is never deleted: once allocated it stays in the pool, tagged with the sample
//! rate it was created for, and is handed to the next player asking for that rate
//! together with the buffers its previous owner left behind.

use crate::device::{BufferId, Device, SourceId};
use crate::error::{self, Error, Fault};

/// One pooled source and the buffers it owns while unclaimed.
#[derive(Debug)]
pub struct CacheEntry {
    source: SourceId,
    buffers: Vec<BufferId>,
    sample_rate: u32,
    claimed: bool,
}

impl CacheEntry {
    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// Buffers parked on this entry until its next claim.
    pub fn buffers(&self) -> &[BufferId] {
        &self.buffers
    }
}

/// A claimed source plus the unqueued buffers that came with it.
#[derive(Debug, PartialEq, Eq)]
pub struct Lease {
    pub source: SourceId,
    pub buffers: Vec<BufferId>,
}

/// Append-only registry of device sources, bounded by `max_sources`.
#[derive(Debug)]
pub struct SourcePool {
    entries: Vec<CacheEntry>,
    max_sources: usize,
}

impl SourcePool {
    pub fn new(max_sources: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_sources,
        }
    }

    /// Claim a free source for `sample_rate`, allocating one if the pool has room.
    ///
    /// Reuse never touches the device. Allocation failures reported by the device
    /// error register are faults; running out of pool capacity is
    /// [`Error::TooManyResources`].
    pub fn claim<D: Device + ?Sized>(
        &mut self,
        device: &mut D,
        sample_rate: u32,
    ) -> Result<Lease, Error> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.sample_rate == sample_rate && !e.claimed)
        {
            entry.claimed = true;
            tracing::debug!(
                source = %entry.source,
                rate_hz = sample_rate,
                buffers = entry.buffers.len(),
                "reusing pooled source"
            );
            return Ok(Lease {
                source: entry.source,
                buffers: std::mem::take(&mut entry.buffers),
            });
        }

        if self.entries.len() >= self.max_sources {
            tracing::warn!(
                rate_hz = sample_rate,
                max_sources = self.max_sources,
                "source pool exhausted"
            );
            return Err(Error::TooManyResources {
                max_sources: self.max_sources,
            });
        }

        let source = device.gen_source();
        error::check(device, "gen source");
        self.entries.push(CacheEntry {
            source,
            buffers: Vec::new(),
            sample_rate,
            claimed: true,
        });
        tracing::debug!(
            source = %source,
            rate_hz = sample_rate,
            pooled = self.entries.len(),
            "allocated new source"
        );
        Ok(Lease {
            source,
            buffers: Vec::new(),
        })
    }

    /// Return a claimed source to the pool, parking `buffers` on it.
    ///
    /// Releasing an unknown or already free source is a fault.
    pub fn release(&mut self, source: SourceId, buffers: Vec<BufferId>) {
        let Some(entry) = self.entries.iter_mut().find(|e| e.source == source) else {
            error::raise(Fault::UnknownSource(source));
        };
        if !entry.claimed {
            error::raise(Fault::DoubleRelease(source));
        }
        entry.buffers = buffers;
        entry.claimed = false;
        tracing::debug!(source = %source, buffers = entry.buffers.len(), "released source");
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn claimed(&self) -> usize {
        self.entries.iter().filter(|e| e.claimed).count()
    }

    pub fn max_sources(&self) -> usize {
        self.max_sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ErrorCode;
    use crate::soft::SoftDevice;
    use std::collections::HashSet;

    #[test]
    fn claim_allocates_then_reuses_after_release() {
        let mut dev = SoftDevice::new();
        let mut pool = SourcePool::new(4);

        let first = pool.claim(&mut dev, 44_100).unwrap();
        assert!(first.buffers.is_empty());
        pool.release(first.source, Vec::new());

        let again = pool.claim(&mut dev, 44_100).unwrap();
        assert_eq!(again.source, first.source);
        assert_eq!(dev.source_count(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn release_then_claim_returns_same_source_and_buffers() {
        let mut dev = SoftDevice::new();
        let mut pool = SourcePool::new(4);
        let lease = pool.claim(&mut dev, 44_100).unwrap();
        let parked = vec![BufferId(7), BufferId(8)];

        pool.release(lease.source, parked.clone());
        let reused = pool.claim(&mut dev, 44_100).unwrap();

        assert_eq!(
            reused,
            Lease {
                source: lease.source,
                buffers: parked,
            }
        );
        assert!(pool.entries()[0].buffers().is_empty());
    }

    #[test]
    fn simultaneous_claims_never_share_a_source() {
        let mut dev = SoftDevice::new();
        let mut pool = SourcePool::new(8);
        let mut live = Vec::new();

        for round in 0..20 {
            if round % 3 == 2 {
                let lease: Lease = live.remove(0);
                pool.release(lease.source, lease.buffers);
            } else {
                live.push(pool.claim(&mut dev, 48_000).unwrap());
            }
            let unique: HashSet<SourceId> = live.iter().map(|l| l.source).collect();
            assert_eq!(unique.len(), live.len());
            assert_eq!(pool.claimed(), live.len());
        }
    }

    #[test]
    fn rates_do_not_share_entries() {
        let mut dev = SoftDevice::new();
        let mut pool = SourcePool::new(4);
        let a = pool.claim(&mut dev, 44_100).unwrap();
        pool.release(a.source, Vec::new());

        let b = pool.claim(&mut dev, 48_000).unwrap();
        assert_ne!(a.source, b.source);
        assert_eq!(pool.entries()[1].sample_rate(), 48_000);
    }

    #[test]
    fn capacity_exhaustion_is_an_error_and_release_frees_a_slot() {
        let mut dev = SoftDevice::new();
        let mut pool = SourcePool::new(32);
        let leases: Vec<Lease> = (0..32u32)
            .map(|i| pool.claim(&mut dev, 8_000 + i).unwrap())
            .collect();

        let err = pool.claim(&mut dev, 96_000).unwrap_err();
        assert!(matches!(err, Error::TooManyResources { max_sources: 32 }));
        assert_eq!(dev.source_count(), 32);

        pool.release(leases[0].source, Vec::new());
        let reused = pool.claim(&mut dev, 8_000).unwrap();
        assert_eq!(reused.source, leases[0].source);
        assert!(pool.claim(&mut dev, 96_000).is_err());
    }

    #[test]
    #[should_panic(expected = "is already released")]
    fn double_release_is_a_fault() {
        let mut dev = SoftDevice::new();
        let mut pool = SourcePool::new(2);
        let lease = pool.claim(&mut dev, 44_100).unwrap();
        pool.release(lease.source, Vec::new());
        pool.release(lease.source, Vec::new());
    }

    #[test]
    #[should_panic(expected = "is not cached")]
    fn releasing_unknown_source_is_a_fault() {
        let mut pool = SourcePool::new(2);
        pool.release(SourceId(42), Vec::new());
    }

    #[test]
    #[should_panic(expected = "device error during gen source: out of memory")]
    fn device_allocation_error_is_a_fault() {
        let mut dev = SoftDevice::new().with_source_limit(0);
        let mut pool = SourcePool::new(2);
        let _ = pool.claim(&mut dev, 44_100);
    }

    #[test]
    fn reuse_skips_the_device_entirely() {
        let mut dev = SoftDevice::new();
        let mut pool = SourcePool::new(2);
        let lease = pool.claim(&mut dev, 22_050).unwrap();
        pool.release(lease.source, Vec::new());

        dev.inject_error(ErrorCode::INVALID_OPERATION);
        let reused = pool.claim(&mut dev, 22_050).unwrap();
        assert_eq!(reused.source, lease.source);
        assert_eq!(dev.last_error(), ErrorCode::INVALID_OPERATION);
    }
}
