//! Execution context cache.
//!
//! A small LRU map from executable to [`ExecutionContext`] with an idle
//! timeout. Contexts leaving the cache for any reason (eviction, expiry,
//! invalidation, shutdown) are released, always after the lock is dropped.
//! The lock only guards map updates; validity checks (which stat the
//! executable) run on a snapshot outside it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::execute::ExecutionContext;

/// Cache key: the executable's canonical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutableKey(PathBuf);

impl ExecutableKey {
    /// Canonicalize `path`, or make it absolute when it does not exist.
    pub fn new(path: &Path) -> Self {
        let resolved = path
            .canonicalize()
            .or_else(|_| std::path::absolute(path))
            .unwrap_or_else(|_| path.to_path_buf());
        Self(resolved)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

struct Slot {
    context: Arc<ExecutionContext>,
    last_access: Instant,
    /// Access order; lowest is least recently used.
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    entries: FxHashMap<ExecutableKey, Slot>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Drop entries idle for at least `idle_timeout`.
    fn purge_idle(&mut self, idle_timeout: Duration, released: &mut Vec<Arc<ExecutionContext>>) {
        let now = Instant::now();
        let expired: Vec<ExecutableKey> = self
            .entries
            .iter()
            .filter(|(_, slot)| now.duration_since(slot.last_access) >= idle_timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if let Some(slot) = self.entries.remove(&key) {
                tracing::debug!(executable = %key.path().display(), "Expiring idle context");
                released.push(slot.context);
            }
        }
    }

    /// Mark `context` as just used if it is still the entry for `key`.
    fn touch(&mut self, key: &ExecutableKey, context: &Arc<ExecutionContext>) {
        let tick = self.next_tick();
        if let Some(slot) = self.entries.get_mut(key) {
            if Arc::ptr_eq(&slot.context, context) {
                slot.last_access = Instant::now();
                slot.tick = tick;
            }
        }
    }

    /// Insert `context`, returning whatever it replaced.
    fn insert(&mut self, key: ExecutableKey, context: Arc<ExecutionContext>) -> Option<Arc<ExecutionContext>> {
        let tick = self.next_tick();
        let slot = Slot {
            context,
            last_access: Instant::now(),
            tick,
        };
        self.entries.insert(key, slot).map(|previous| previous.context)
    }

    /// Remove least recently used entries until at most `max_entries` remain.
    fn evict_over(&mut self, max_entries: usize, released: &mut Vec<Arc<ExecutionContext>>) {
        while self.entries.len() > max_entries {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.tick)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            if let Some(slot) = self.entries.remove(&oldest) {
                tracing::debug!(executable = %oldest.path().display(), "Evicting least recently used context");
                released.push(slot.context);
            }
        }
    }
}

/// Bounded cache of execution contexts.
pub struct ContextCache {
    max_entries: usize,
    idle_timeout: Duration,
    state: Mutex<CacheState>,
}

impl ContextCache {
    /// Create a cache holding at most `max_entries` contexts.
    pub fn new(max_entries: usize, idle_timeout: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            idle_timeout,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the valid cached context for `key`, or build one with `create`.
    ///
    /// Neither `create` nor the validity check runs with the lock held. If
    /// another caller cached a valid context for `key` meanwhile, that one
    /// wins and the new one is released.
    pub fn get_or_create<F>(&self, key: &ExecutableKey, create: F) -> Result<Arc<ExecutionContext>>
    where
        F: FnOnce(&ExecutableKey) -> ExecutionContext,
    {
        let mut released = Vec::new();
        let cached = {
            let mut state = self.lock();
            state.purge_idle(self.idle_timeout, &mut released);
            state.entries.get(key).map(|slot| slot.context.clone())
        };
        release_all(released)?;
        if let Some(context) = self.revalidate(key, cached)? {
            tracing::debug!(executable = %key.path().display(), "Reusing cached context");
            return Ok(context);
        }

        let created = Arc::new(create(key));

        let existing = self.lock().entries.get(key).map(|slot| slot.context.clone());
        if let Some(existing) = self.revalidate(key, existing)? {
            tracing::debug!(executable = %key.path().display(), "Lost creation race, using existing context");
            release_all(vec![created])?;
            return Ok(existing);
        }

        let mut released = Vec::new();
        {
            let mut state = self.lock();
            if let Some(previous) = state.insert(key.clone(), created.clone()) {
                released.push(previous);
            }
            state.evict_over(self.max_entries, &mut released);
        }
        release_all(released)?;
        Ok(created)
    }

    /// Check a snapshot of the entry for `key`. A valid context is touched and
    /// returned; a stale one is dropped from the cache and released.
    fn revalidate(
        &self,
        key: &ExecutableKey,
        snapshot: Option<Arc<ExecutionContext>>,
    ) -> Result<Option<Arc<ExecutionContext>>> {
        let Some(context) = snapshot else {
            return Ok(None);
        };
        if context.is_valid() {
            self.lock().touch(key, &context);
            return Ok(Some(context));
        }
        tracing::debug!(executable = %key.path().display(), "Cached context is stale");
        self.invalidate(key, &context)?;
        Ok(None)
    }

    /// Drop `context` from the cache if it is still the entry for `key`, and
    /// release it.
    pub fn invalidate(&self, key: &ExecutableKey, context: &Arc<ExecutionContext>) -> Result<()> {
        {
            let mut state = self.lock();
            let current = state
                .entries
                .get(key)
                .is_some_and(|slot| Arc::ptr_eq(&slot.context, context));
            if current {
                state.entries.remove(key);
            }
        }
        context.release()
    }

    /// Remove and release every cached context.
    pub fn shutdown(&self) -> Result<()> {
        let released: Vec<_> = {
            let mut state = self.lock();
            state.entries.drain().map(|(_, slot)| slot.context).collect()
        };
        if !released.is_empty() {
            tracing::debug!(count = released.len(), "Releasing cached contexts");
        }
        release_all(released)
    }

    /// Number of cached contexts.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn contains(&self, key: &ExecutableKey) -> bool {
        self.lock().entries.contains_key(key)
    }
}

/// Release every context, returning the first failure.
fn release_all(contexts: Vec<Arc<ExecutionContext>>) -> Result<()> {
    let mut first_error = None;
    for context in contexts {
        if let Err(e) = context.release() {
            tracing::error!(executable = %context.executable().display(), error = %e, "Failed to release context");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        None => Ok(()),
        Some(e) => Err(e),
    }
}
