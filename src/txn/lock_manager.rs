//! Per-key exclusive locks serializing conflicting commits.

use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use dashmap::DashMap;
use tracing::warn;

use crate::{context::OpContext, error::Result};

// Upper bound on a single condvar wait, so cancellation is noticed
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct KeyState {
    held: bool,
    // Holder plus waiters. The entry is dropped from the table at zero.
    refs: usize,
}

#[derive(Debug, Default)]
struct KeyLock {
    state: Mutex<KeyState>,
    cvar: Condvar,
}

/// Advisory mutual exclusion keyed by byte strings.
///
/// Locks are created on first use and removed once nobody holds or waits for
/// them. There is no owner tracking, upgrade, or deadlock detection: callers
/// locking several keys must do so in a consistent order. A wait only ends
/// early when the caller's context is cancelled or its deadline passes.
#[derive(Debug, Default)]
pub struct LockManager {
    table: DashMap<Vec<u8>, Arc<KeyLock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the calling thread exclusively holds `key`.
    pub fn lock(&self, ctx: &OpContext, key: &[u8]) -> Result<()> {
        ctx.check()?;

        let key_lock = {
            let entry = self.table.entry(key.to_vec()).or_default();
            let key_lock = Arc::clone(entry.value());
            key_lock.state.lock()?.refs += 1;
            key_lock
        };

        let mut state = key_lock.state.lock()?;
        while state.held {
            if let Err(err) = ctx.check() {
                state.refs -= 1;
                drop(state);
                self.reclaim(key);
                return Err(err);
            }
            let slice = ctx
                .remaining()
                .map_or(WAIT_SLICE, |remaining| remaining.min(WAIT_SLICE));
            state = key_lock.cvar.wait_timeout(state, slice)?.0;
        }

        state.held = true;
        Ok(())
    }

    /// Like [`LockManager::lock`], releasing the key when the guard drops.
    pub fn acquire(&self, ctx: &OpContext, key: &[u8]) -> Result<KeyLockGuard<'_>> {
        self.lock(ctx, key)?;
        Ok(KeyLockGuard {
            manager: self,
            key: key.to_vec(),
        })
    }

    pub fn unlock(&self, key: &[u8]) -> Result<()> {
        let Some(key_lock) = self.table.get(key).map(|entry| Arc::clone(entry.value())) else {
            warn!(key = ?String::from_utf8_lossy(key), "unlock of a key that is not locked");
            return Ok(());
        };

        {
            let mut state = key_lock.state.lock()?;
            if !state.held {
                warn!(key = ?String::from_utf8_lossy(key), "unlock of a key that is not locked");
                return Ok(());
            }
            state.held = false;
            state.refs -= 1;
        }

        key_lock.cvar.notify_one();
        self.reclaim(key);
        Ok(())
    }

    pub fn is_locked(&self, key: &[u8]) -> bool {
        let Some(key_lock) = self.table.get(key).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let held = key_lock.state.lock().map(|state| state.held).unwrap_or(false);
        held
    }

    /// Number of keys currently present in the lock table.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn reclaim(&self, key: &[u8]) {
        self.table.remove_if(key, |_, key_lock| {
            key_lock
                .state
                .lock()
                .map(|state| state.refs == 0)
                .unwrap_or(false)
        });
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct KeyLockGuard<'a> {
    manager: &'a LockManager,
    key: Vec<u8>,
}

impl KeyLockGuard<'_> {
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.manager.unlock(&self.key) {
            warn!(error = %err, "failed to release key lock");
        }
    }
}
