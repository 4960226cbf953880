//! Allocation pools.
//!
//! Avoids creating GPU surfaces per frame by recycling allocations of one
//! fixed shape. A plain pool grows on demand; an array pool cuts a fixed
//! number of slices out of one texture array and blocks acquirers once
//! every slice is checked out.

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::{Allocation, SurfaceDesc};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Source of allocations for one surface shape.
pub trait Allocator: Send + Sync {
    /// Allocate, waiting for a free allocation if the allocator is bounded.
    fn alloc(&self) -> Result<PooledAllocation>;

    /// Allocate without waiting; a bounded allocator reports `Exhausted`.
    fn try_alloc(&self) -> Result<PooledAllocation>;

    fn set_active(&self, active: bool) -> Result<()>;

    fn is_active(&self) -> bool;
}

// ── Plain allocator ────────────────────────────────────────────

/// Allocates a fresh surface on every request and frees it on release.
pub struct PlainAllocator {
    device: Device,
    desc: SurfaceDesc,
    active: AtomicBool,
}

impl PlainAllocator {
    pub fn new(device: &Device, desc: SurfaceDesc) -> Self {
        Self {
            device: device.clone(),
            desc,
            active: AtomicBool::new(true),
        }
    }

    pub fn desc(&self) -> &SurfaceDesc {
        &self.desc
    }
}

impl Allocator for PlainAllocator {
    fn alloc(&self) -> Result<PooledAllocation> {
        if !self.is_active() {
            return Err(GpuError::Flushing);
        }
        Allocation::new(&self.device, &self.desc).map(PooledAllocation::detached)
    }

    fn try_alloc(&self) -> Result<PooledAllocation> {
        self.alloc()
    }

    fn set_active(&self, active: bool) -> Result<()> {
        self.active.store(active, Ordering::Release);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

// ── Pool allocator ─────────────────────────────────────────────

/// Counters of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Acquires served from the free queue.
    pub hits: u64,
    /// Acquires that created a fresh allocation.
    pub misses: u64,
    /// Releases that went back to the free queue.
    pub recycled: u64,
    /// Releases freed because the pool was inactive.
    pub freed_inactive: u64,
    /// Times an acquirer had to wait for a release.
    pub waits: u64,
    pub outstanding: usize,
    pub free: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    recycled: AtomicU64,
    freed_inactive: AtomicU64,
    waits: AtomicU64,
}

impl PoolCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolKind {
    /// Grows on demand; keeps at most `max` free allocations (0 = no limit).
    Plain { min: usize, max: usize },
    /// Fixed number of slices of one texture array.
    Array { slices: u32 },
}

#[derive(Default)]
struct PoolState {
    free: VecDeque<Allocation>,
    outstanding: usize,
    active: bool,
    started: bool,
    /// Bumped on every stop so stale allocations are freed on release.
    generation: u64,
}

struct PoolShared {
    device: Device,
    desc: SurfaceDesc,
    kind: PoolKind,
    state: Mutex<PoolState>,
    cond: Condvar,
    counters: PoolCounters,
}

impl PoolShared {
    fn provision(&self, state: &mut MutexGuard<'_, PoolState>) -> Result<()> {
        if state.started {
            return Ok(());
        }
        let fresh = MutexGuard::unlocked(state, || match self.kind {
            PoolKind::Plain { min, .. } => (0..min)
                .map(|_| Allocation::new(&self.device, &self.desc))
                .collect::<Result<Vec<_>>>(),
            PoolKind::Array { slices } => Allocation::new_array(&self.device, &self.desc, slices),
        })?;
        if state.started {
            return Ok(());
        }
        debug!(
            "Pool provisioned {} x {:?} {}x{}",
            fresh.len(),
            self.desc.texture.format,
            self.desc.texture.width,
            self.desc.texture.height
        );
        state.free.extend(fresh);
        state.started = true;
        Ok(())
    }

    fn acquire(self: &Arc<Self>, blocking: bool) -> Result<PooledAllocation> {
        let mut state = self.state.lock();
        loop {
            if !state.active {
                return Err(GpuError::Flushing);
            }
            if let Some(allocation) = state.free.pop_front() {
                PoolCounters::bump(&self.counters.hits);
                return Ok(self.check_out(&mut state, allocation));
            }
            match self.kind {
                PoolKind::Plain { .. } => {
                    // device work happens outside the pool lock
                    let allocation = MutexGuard::unlocked(&mut state, || Allocation::new(&self.device, &self.desc))?;
                    PoolCounters::bump(&self.counters.misses);
                    return Ok(self.check_out(&mut state, allocation));
                }
                PoolKind::Array { .. } if !blocking => return Err(GpuError::Exhausted),
                PoolKind::Array { .. } => {
                    PoolCounters::bump(&self.counters.waits);
                    trace!("Pool exhausted, waiting for a release");
                    self.cond.wait(&mut state);
                }
            }
        }
    }

    fn check_out(self: &Arc<Self>, state: &mut PoolState, allocation: Allocation) -> PooledAllocation {
        state.outstanding += 1;
        PooledAllocation {
            allocation: Some(allocation),
            pool: Some((self.clone(), state.generation)),
        }
    }

    fn release(&self, allocation: Allocation, generation: u64) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        if !state.active || generation != state.generation {
            PoolCounters::bump(&self.counters.freed_inactive);
            drop(state);
            drop(allocation);
            return;
        }
        if let PoolKind::Plain { max, .. } = self.kind {
            if max > 0 && state.free.len() >= max {
                drop(state);
                drop(allocation);
                return;
            }
        }
        state.free.push_back(allocation);
        PoolCounters::bump(&self.counters.recycled);
        self.cond.notify_one();
    }

    fn forget(&self) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
    }
}

/// Pool of allocations of one surface shape.
#[derive(Clone)]
pub struct PoolAllocator {
    shared: Arc<PoolShared>,
}

impl fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("kind", &self.shared.kind)
            .field("format", &self.shared.desc.texture.format)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolAllocator {
    /// Growable pool. `start` provisions `min` allocations; at most `max`
    /// free allocations are retained (0 = no limit).
    pub fn new(device: &Device, desc: SurfaceDesc, min: usize, max: usize) -> Self {
        Self::with_kind(device, desc, PoolKind::Plain { min, max })
    }

    /// Fixed-capacity pool of `slices` slices of one texture array.
    pub fn new_array(device: &Device, desc: SurfaceDesc, slices: u32) -> Result<Self> {
        if slices == 0 {
            return Err(GpuError::InvalidArgument("array pool without slices".into()));
        }
        Ok(Self::with_kind(device, desc, PoolKind::Array { slices }))
    }

    fn with_kind(device: &Device, desc: SurfaceDesc, kind: PoolKind) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                device: device.clone(),
                desc,
                kind,
                state: Mutex::new(PoolState::default()),
                cond: Condvar::new(),
                counters: PoolCounters::default(),
            }),
        }
    }

    pub fn desc(&self) -> &SurfaceDesc {
        &self.shared.desc
    }

    pub fn device(&self) -> &Device {
        &self.shared.device
    }

    pub fn is_array(&self) -> bool {
        matches!(self.shared.kind, PoolKind::Array { .. })
    }

    /// Fixed capacity of an array pool.
    pub fn capacity(&self) -> Option<usize> {
        match self.shared.kind {
            PoolKind::Array { slices } => Some(slices as usize),
            PoolKind::Plain { .. } => None,
        }
    }

    /// Provision the initial allocations. Every slice for array pools.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.shared.provision(&mut state)
    }

    /// Activate (starting if needed) or flush the pool.
    ///
    /// Flushing wakes every waiter with `Flushing`, frees the free queue and
    /// makes outstanding allocations free themselves on release.
    pub fn set_active(&self, active: bool) -> Result<()> {
        let mut state = self.shared.state.lock();
        if active {
            self.shared.provision(&mut state)?;
            state.active = true;
            return Ok(());
        }
        if !state.active && !state.started {
            return Ok(());
        }
        state.active = false;
        state.started = false;
        state.generation += 1;
        let free = std::mem::take(&mut state.free);
        debug!(
            "Pool flushing: {} freed, {} outstanding",
            free.len(),
            state.outstanding
        );
        self.shared.cond.notify_all();
        drop(state);
        drop(free);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// Deactivate and free every pooled allocation.
    pub fn stop(&self) -> Result<()> {
        self.set_active(false)
    }

    /// Take an allocation, blocking while an array pool is exhausted.
    pub fn acquire(&self) -> Result<PooledAllocation> {
        self.shared.acquire(true)
    }

    /// Take an allocation; `Exhausted` if an array pool has none free.
    pub fn try_acquire(&self) -> Result<PooledAllocation> {
        self.shared.acquire(false)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        let c = &self.shared.counters;
        let get = |v: &AtomicU64| v.load(Ordering::Relaxed);
        PoolStats {
            hits: get(&c.hits),
            misses: get(&c.misses),
            recycled: get(&c.recycled),
            freed_inactive: get(&c.freed_inactive),
            waits: get(&c.waits),
            outstanding: state.outstanding,
            free: state.free.len(),
        }
    }
}

impl Allocator for PoolAllocator {
    fn alloc(&self) -> Result<PooledAllocation> {
        self.acquire()
    }

    fn try_alloc(&self) -> Result<PooledAllocation> {
        self.try_acquire()
    }

    fn set_active(&self, active: bool) -> Result<()> {
        PoolAllocator::set_active(self, active)
    }

    fn is_active(&self) -> bool {
        PoolAllocator::is_active(self)
    }
}

// ── Pooled allocation ──────────────────────────────────────────

/// An allocation checked out of a pool; returns to it on drop.
pub struct PooledAllocation {
    allocation: Option<Allocation>,
    pool: Option<(Arc<PoolShared>, u64)>,
}

impl fmt::Debug for PooledAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledAllocation")
            .field("allocation", &self.allocation)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl PooledAllocation {
    /// Wrap an allocation that belongs to no pool.
    pub fn detached(allocation: Allocation) -> Self {
        Self {
            allocation: Some(allocation),
            pool: None,
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Take the allocation out of its pool for good.
    pub fn into_inner(mut self) -> Option<Allocation> {
        if let Some((pool, _)) = self.pool.take() {
            pool.forget();
        }
        self.allocation.take()
    }
}

impl Deref for PooledAllocation {
    type Target = Allocation;

    fn deref(&self) -> &Allocation {
        // only empty after into_inner or drop
        self.allocation
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled allocation used after release"))
    }
}

impl Drop for PooledAllocation {
    fn drop(&mut self) {
        if let (Some(allocation), Some((pool, generation))) = (self.allocation.take(), self.pool.take()) {
            pool.release(allocation, generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AllocationParams;
    use crate::native::software::SoftwareOptions;
    use crate::native::BindFlags;
    use gpuframe_core::{VideoFormat, VideoInfo};
    use std::thread;
    use std::time::Duration;

    fn setup() -> (Device, SurfaceDesc) {
        let device = Device::create_software(SoftwareOptions::default(), false).unwrap();
        let info = VideoInfo::new(VideoFormat::Rgba, 32, 32);
        let format = device.format(VideoFormat::Rgba).unwrap();
        let desc = AllocationParams::new(info, BindFlags::SHADER_RESOURCE).surface_descs(format)[0].clone();
        (device, desc)
    }

    #[test]
    fn test_plain_pool_recycles() {
        let (device, desc) = setup();
        let pool = PoolAllocator::new(&device, desc, 0, 0);
        pool.set_active(true).unwrap();
        let texture = {
            let a = pool.acquire().unwrap();
            a.texture()
        };
        let b = pool.acquire().unwrap();
        assert_eq!(b.texture(), texture);
        let stats = pool.stats();
        assert_eq!((stats.hits, stats.misses, stats.recycled), (1, 1, 1));
        assert_eq!(stats.outstanding, 1);
    }

    #[test]
    fn test_plain_pool_provisions_min() {
        let (device, desc) = setup();
        let pool = PoolAllocator::new(&device, desc, 3, 0);
        pool.start().unwrap();
        assert_eq!(pool.stats().free, 3);
        pool.start().unwrap();
        assert_eq!(pool.stats().free, 3);
    }

    #[test]
    fn test_max_limits_retained() {
        let (device, desc) = setup();
        let pool = PoolAllocator::new(&device, desc, 0, 1);
        pool.set_active(true).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop((a, b));
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn test_inactive_pool_fails_and_frees() {
        let (device, desc) = setup();
        let pool = PoolAllocator::new(&device, desc, 0, 0);
        assert!(matches!(pool.acquire(), Err(GpuError::Flushing)));
        pool.set_active(true).unwrap();
        let a = pool.acquire().unwrap();
        pool.set_active(false).unwrap();
        let destroyed = device.stats().textures_destroyed;
        drop(a);
        assert_eq!(device.stats().textures_destroyed, destroyed + 1);
        assert_eq!(pool.stats().freed_inactive, 1);
    }

    #[test]
    fn test_array_pool_exhausts() {
        let (device, desc) = setup();
        let pool = PoolAllocator::new_array(&device, desc, 2).unwrap();
        pool.set_active(true).unwrap();
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert!(matches!(pool.try_acquire(), Err(GpuError::Exhausted)));
        assert_eq!(a.texture(), b.texture());
        drop(a);
        assert!(pool.try_acquire().is_ok());
    }

    #[test]
    fn test_blocked_acquire_wakes_on_release() {
        let (device, desc) = setup();
        let pool = PoolAllocator::new_array(&device, desc, 1).unwrap();
        pool.set_active(true).unwrap();
        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|a| a.subresource()))
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_flush_after_restart_frees_stale_slices() {
        let (device, desc) = setup();
        let pool = PoolAllocator::new_array(&device, desc, 2).unwrap();
        pool.set_active(true).unwrap();
        let old = pool.acquire().unwrap();
        pool.set_active(false).unwrap();
        pool.set_active(true).unwrap();
        drop(old);
        let stats = pool.stats();
        assert_eq!(stats.free, 2);
        assert_eq!(stats.freed_inactive, 1);
    }

    #[test]
    fn test_plain_allocator() {
        let (device, desc) = setup();
        let alloc = PlainAllocator::new(&device, desc);
        let a = alloc.alloc().unwrap();
        assert!(!a.is_pooled());
        alloc.set_active(false).unwrap();
        assert!(matches!(alloc.try_alloc(), Err(GpuError::Flushing)));
    }
}
