//! Resource Pool
//!
//! Bounded pool of reusable, stateful handles (normative-data connections)
//! shared by every worker of a batch.
//!
//! - Warm start with `min(warm_start, pool_size)` handles
//! - `acquire_timeout` pops an idle handle, creates one while under capacity,
//!   or waits on a condvar until the deadline
//! - Handles return on drop; the manager validates them first
//! - A reaper thread closes handles idle longer than `max_idle`
//! - `close()` drains idle handles, wakes waiters and joins the reaper
//!
//! Invariant: idle + checked-out never exceeds `pool_size`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::duration_secs;

/// Pool failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    /// No handle became available before the deadline
    #[error("No resource available within {timeout:?}")]
    Exhausted { timeout: Duration },

    /// Pool has been shut down
    #[error("Resource pool is closed")]
    Closed,

    /// The manager failed to open a new handle
    #[error("Failed to create resource: {0}")]
    Create(String),
}

/// Opens, checks and closes the handles a pool manages
pub trait ResourceManager: Send + Sync + 'static {
    type Resource: Send + 'static;

    fn create(&self) -> Result<Self::Resource, PoolError>;

    /// Called on every release; invalid handles are closed instead of reused
    fn is_valid(&self, resource: &mut Self::Resource) -> bool;

    fn close(&self, resource: Self::Resource);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub warm_start: usize,
    #[serde(with = "duration_secs")]
    pub acquire_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub max_idle: Duration,
    #[serde(with = "duration_secs")]
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            warm_start: 3,
            acquire_timeout: Duration::from_secs(10),
            max_idle: Duration::from_secs(300),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub idle: usize,
    pub active: usize,
    pub total: usize,
    pub created: u64,
    pub closed: u64,
    pub max_idle_secs: f64,
}

struct IdleResource<R> {
    resource: R,
    created_at: Instant,
    last_used: Instant,
}

struct PoolState<R> {
    idle: VecDeque<IdleResource<R>>,
    /// Checked-out handles plus creations in flight
    active: usize,
    created: u64,
    closed_count: u64,
    closed: bool,
}

/// State shared between the pool, its handles and the reaper
struct Shared<M: ResourceManager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Resource>>,
    available: Condvar,
}

impl<M: ResourceManager> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, PoolState<M::Resource>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn return_resource(&self, mut resource: M::Resource, created_at: Instant) {
        let valid = self.manager.is_valid(&mut resource);

        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);

        if valid && !state.closed && state.idle.len() < self.config.pool_size {
            state.idle.push_back(IdleResource {
                resource,
                created_at,
                last_used: Instant::now(),
            });
            drop(state);
        } else {
            state.closed_count += 1;
            drop(state);
            if !valid {
                tracing::debug!("Discarding invalid pooled resource");
            }
            self.manager.close(resource);
        }

        self.available.notify_one();
    }

    fn reap_idle(&self) -> usize {
        let max_idle = self.config.max_idle;
        let expired: Vec<IdleResource<M::Resource>> = {
            let mut state = self.lock();
            let (expired, kept): (VecDeque<_>, VecDeque<_>) = state
                .idle
                .drain(..)
                .partition(|r| r.last_used.elapsed() > max_idle);
            state.idle = kept;
            state.closed_count += expired.len() as u64;
            expired.into_iter().collect()
        };

        let count = expired.len();
        for idle in expired {
            tracing::debug!(
                "Closing resource idle for {:?} (age {:?})",
                idle.last_used.elapsed(),
                idle.created_at.elapsed()
            );
            self.manager.close(idle.resource);
        }
        count
    }
}

struct Reaper {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Bounded pool of handles produced by a [`ResourceManager`]
pub struct ResourcePool<M: ResourceManager> {
    shared: Arc<Shared<M>>,
    reaper: Mutex<Option<Reaper>>,
}

impl<M: ResourceManager> ResourcePool<M> {
    /// Create the pool, warm it and start the reaper
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let warm = config.warm_start.min(config.pool_size);
        let mut idle = VecDeque::with_capacity(config.pool_size);
        let mut created = 0;

        for _ in 0..warm {
            match manager.create() {
                Ok(resource) => {
                    let now = Instant::now();
                    idle.push_back(IdleResource {
                        resource,
                        created_at: now,
                        last_used: now,
                    });
                    created += 1;
                }
                Err(e) => tracing::warn!("Warm start could not create resource: {}", e),
            }
        }

        let shared = Arc::new(Shared {
            manager,
            config,
            state: Mutex::new(PoolState {
                idle,
                active: 0,
                created,
                closed_count: 0,
                closed: false,
            }),
            available: Condvar::new(),
        });

        let reaper = Self::spawn_reaper(Arc::downgrade(&shared), shared.config.reap_interval);

        tracing::debug!(
            "Resource pool ready: {} warm of {} max",
            created,
            shared.config.pool_size
        );

        Self {
            shared,
            reaper: Mutex::new(reaper),
        }
    }

    fn spawn_reaper(shared: Weak<Shared<M>>, interval: Duration) -> Option<Reaper> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("pool-reaper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(shared) = shared.upgrade() else {
                            break;
                        };
                        let reaped = shared.reap_idle();
                        if reaped > 0 {
                            tracing::debug!("Reaper closed {} idle resource(s)", reaped);
                        }
                    }
                    // Stop signal or pool dropped
                    _ => break,
                }
            });

        match spawned {
            Ok(handle) => Some(Reaper { stop_tx, handle }),
            Err(e) => {
                tracing::warn!("Failed to start pool reaper, idle resources will not expire: {}", e);
                None
            }
        }
    }

    /// Acquire with the configured default timeout
    pub fn acquire(&self) -> Result<PooledHandle<M>, PoolError> {
        self.acquire_timeout(self.shared.config.acquire_timeout)
    }

    /// Acquire a handle, waiting at most `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledHandle<M>, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();

        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(idle) = state.idle.pop_front() {
                state.active += 1;
                return Ok(PooledHandle::new(Arc::clone(&self.shared), idle.resource, idle.created_at));
            }

            if state.active < self.shared.config.pool_size {
                // Reserve the slot, then create outside the lock
                state.active += 1;
                drop(state);
                return self.create_reserved();
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("Resource pool exhausted after {:?}", timeout);
                return Err(PoolError::Exhausted { timeout });
            }

            let (guard, _) = self
                .shared
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }
    }

    fn create_reserved(&self) -> Result<PooledHandle<M>, PoolError> {
        match self.shared.manager.create() {
            Ok(resource) => {
                self.shared.lock().created += 1;
                tracing::debug!("Created pooled resource");
                Ok(PooledHandle::new(Arc::clone(&self.shared), resource, Instant::now()))
            }
            Err(e) => {
                self.shared.lock().active -= 1;
                self.shared.available.notify_one();
                Err(e)
            }
        }
    }

    /// Return a handle explicitly; dropping it has the same effect
    pub fn release(&self, handle: PooledHandle<M>) {
        drop(handle);
    }

    /// Close idle handles past `max_idle`; returns how many were closed
    pub fn reap_idle(&self) -> usize {
        self.shared.reap_idle()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            pool_size: self.shared.config.pool_size,
            idle: state.idle.len(),
            active: state.active,
            total: state.idle.len() + state.active,
            created: state.created,
            closed: state.closed_count,
            max_idle_secs: self.shared.config.max_idle.as_secs_f64(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Shut down; checked-out handles are closed when they come back
    pub fn close(&self) {
        let drained: Vec<IdleResource<M::Resource>> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.closed_count += state.idle.len() as u64;
            state.idle.drain(..).collect()
        };

        for idle in drained {
            self.shared.manager.close(idle.resource);
        }
        self.shared.available.notify_all();

        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(reaper) = reaper {
            let _ = reaper.stop_tx.send(());
            if reaper.handle.join().is_err() {
                tracing::warn!("Pool reaper thread panicked");
            }
        }

        tracing::debug!("Resource pool closed");
    }
}

impl<M: ResourceManager> Drop for ResourcePool<M> {
    fn drop(&mut self) {
        self.close();
    }
}

/// A checked-out resource; returns to its pool on drop
pub struct PooledHandle<M: ResourceManager> {
    resource: Option<M::Resource>,
    created_at: Instant,
    shared: Arc<Shared<M>>,
}

impl<M: ResourceManager> PooledHandle<M> {
    fn new(shared: Arc<Shared<M>>, resource: M::Resource, created_at: Instant) -> Self {
        Self {
            resource: Some(resource),
            created_at,
            shared,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

impl<M: ResourceManager> fmt::Debug for PooledHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledHandle")
            .field("created_at", &self.created_at)
            .field("held", &self.resource.is_some())
            .finish()
    }
}

impl<M: ResourceManager> Deref for PooledHandle<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        // Only taken in drop
        self.resource.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<M: ResourceManager> DerefMut for PooledHandle<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<M: ResourceManager> Drop for PooledHandle<M> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.shared.return_resource(resource, self.created_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        closed: AtomicUsize,
        invalid: AtomicBool,
    }

    struct CountingManager(Arc<Counters>);

    impl ResourceManager for CountingManager {
        type Resource = usize;

        fn create(&self) -> Result<usize, PoolError> {
            Ok(self.0.created.fetch_add(1, Ordering::SeqCst))
        }

        fn is_valid(&self, _resource: &mut usize) -> bool {
            !self.0.invalid.load(Ordering::SeqCst)
        }

        fn close(&self, _resource: usize) {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(size: usize, config: PoolConfig) -> (ResourcePool<CountingManager>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let config = PoolConfig {
            pool_size: size,
            ..config
        };
        (ResourcePool::new(CountingManager(Arc::clone(&counters)), config), counters)
    }

    #[test]
    fn test_warm_start_is_capped_by_pool_size() {
        let (pool, counters) = pool(2, PoolConfig::default());
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().idle, 2);

        let (pool, _) = self::pool(10, PoolConfig::default());
        assert_eq!(pool.stats().idle, 3);
    }

    #[test]
    fn test_released_handle_is_reused() {
        let (pool, counters) = pool(1, PoolConfig::default());

        let first = *pool.acquire().unwrap();
        let handle = pool.acquire().unwrap();
        assert_eq!(*handle, first);
        pool.release(handle);

        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let (pool, _) = pool(1, PoolConfig::default());
        let _held = pool.acquire().unwrap();

        let started = Instant::now();
        let err = pool.acquire_timeout(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let (pool, _) = pool(1, PoolConfig::default());
        let pool = Arc::new(pool);
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire_timeout(Duration::from_secs(5)).map(|h| *h))
        };

        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_invalid_resource_is_closed_on_release() {
        let (pool, counters) = pool(2, PoolConfig::default());
        let handle = pool.acquire().unwrap();

        counters.invalid.store(true, Ordering::SeqCst);
        drop(handle);

        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn test_reaper_closes_idle_resources() {
        let config = PoolConfig {
            warm_start: 2,
            max_idle: Duration::from_millis(20),
            reap_interval: Duration::from_millis(10),
            ..PoolConfig::default()
        };
        let (pool, counters) = pool(4, config);

        thread::sleep(Duration::from_millis(200));

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_close_rejects_new_acquires_and_closes_returns() {
        let (pool, counters) = pool(2, PoolConfig {
            warm_start: 1,
            ..PoolConfig::default()
        });
        let held = pool.acquire().unwrap();

        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire(), Err(PoolError::Closed)));

        drop(held);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().total, 0);
    }

    #[test]
    fn test_active_never_exceeds_pool_size() {
        let (pool, _) = pool(3, PoolConfig::default());
        let pool = Arc::new(pool);
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _handle = pool.acquire().unwrap();
                        let stats = pool.stats();
                        peak.fetch_max(stats.active, Ordering::SeqCst);
                        assert!(stats.total <= 3);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.stats().active, 0);
    }
}
