//! Cross-device texture sharing and keyed mutexes.

use crate::error::{NativeError, NativeResult};
use crate::native::{SharedHandle, StagingMemory, TextureDesc};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Ownership token passed between devices by key.
///
/// `acquire(key)` succeeds once the mutex is free and was last released
/// with `key`; a fresh mutex starts at key 0.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    state: Mutex<KeyedState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct KeyedState {
    owned: bool,
    key: u64,
}

impl KeyedMutex {
    pub fn acquire(&self, key: u64, timeout: Duration) -> NativeResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.owned || state.key != key {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return Err(NativeError::Timeout);
            }
        }
        state.owned = true;
        Ok(())
    }

    pub fn release(&self, key: u64) -> NativeResult<()> {
        let mut state = self.state.lock();
        if !state.owned {
            return Err(NativeError::InvalidCall("keyed mutex released without acquire".into()));
        }
        state.owned = false;
        state.key = key;
        self.cond.notify_all();
        Ok(())
    }
}

/// Memory and metadata published under a shared handle.
#[derive(Debug, Clone)]
pub struct SharedEntry {
    pub luid: u64,
    pub desc: TextureDesc,
    pub slices: Vec<StagingMemory>,
    pub keyed_mutex: Option<Arc<KeyedMutex>>,
}

fn registry() -> &'static Mutex<HashMap<SharedHandle, SharedEntry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<SharedHandle, SharedEntry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

pub fn publish(entry: SharedEntry) -> SharedHandle {
    let handle = SharedHandle(NEXT_HANDLE.fetch_add(4, Ordering::Relaxed));
    registry().lock().insert(handle, entry);
    handle
}

pub fn lookup(handle: SharedHandle) -> Option<SharedEntry> {
    registry().lock().get(&handle).cloned()
}

pub fn close(handle: SharedHandle) {
    registry().lock().remove(&handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_keyed_mutex_hands_over_by_key() {
        let m = Arc::new(KeyedMutex::default());
        m.acquire(0, Duration::from_millis(10)).unwrap();
        assert_eq!(m.acquire(0, Duration::from_millis(10)), Err(NativeError::Timeout));

        let other = m.clone();
        let waiter = thread::spawn(move || other.acquire(1, Duration::from_secs(5)));
        m.release(1).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(m.acquire(0, Duration::from_millis(10)), Err(NativeError::Timeout));
    }

    #[test]
    fn test_release_without_acquire() {
        let m = KeyedMutex::default();
        assert!(m.release(0).is_err());
    }
}
