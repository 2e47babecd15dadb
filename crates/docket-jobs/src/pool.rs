//! Bounded pool of expensive native engine instances.
//!
//! At most `max_total` instances exist at once. `acquire` hands out a
//! [`Lease`]; when capacity is exhausted it waits up to `acquire_timeout` for
//! a release and then fails with [`Error::PoolTimeout`]. Dropping a lease
//! returns the instance to the idle set, or destroys it when `max_idle`
//! instances are already idle.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use docket_core::defaults;
use docket_core::{Error, Result};

/// Configuration for an [`EnginePool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePoolConfig {
    /// Instances created up front and kept warm.
    pub min_idle: usize,
    /// Idle instances kept alive after release.
    pub max_idle: usize,
    /// Hard ceiling on instances alive at once.
    pub max_total: usize,
    /// How long `acquire` waits for capacity.
    pub acquire_timeout: Duration,
}

impl Default for EnginePoolConfig {
    fn default() -> Self {
        Self {
            min_idle: defaults::PDF_POOL_MIN_IDLE,
            max_idle: defaults::PDF_POOL_MAX_IDLE,
            max_total: defaults::PDF_POOL_MAX_TOTAL,
            acquire_timeout: Duration::from_secs(defaults::PDF_POOL_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl EnginePoolConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PDF_POOL_MIN_IDLE` | `1` | Instances kept warm |
    /// | `PDF_POOL_MAX_IDLE` | `1` | Idle instances kept after release |
    /// | `PDF_POOL_MAX_TOTAL` | `4` | Ceiling on live instances |
    /// | `PDF_POOL_ACQUIRE_TIMEOUT_SECS` | `30` | Wait before an acquire fails |
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<T>().ok())
                .unwrap_or(default)
        }

        Self {
            min_idle: var("PDF_POOL_MIN_IDLE", defaults::PDF_POOL_MIN_IDLE),
            max_idle: var("PDF_POOL_MAX_IDLE", defaults::PDF_POOL_MAX_IDLE),
            max_total: var("PDF_POOL_MAX_TOTAL", defaults::PDF_POOL_MAX_TOTAL),
            acquire_timeout: Duration::from_secs(var(
                "PDF_POOL_ACQUIRE_TIMEOUT_SECS",
                defaults::PDF_POOL_ACQUIRE_TIMEOUT_SECS,
            )),
        }
    }

    pub fn with_min_idle(mut self, n: usize) -> Self {
        self.min_idle = n;
        self
    }

    pub fn with_max_idle(mut self, n: usize) -> Self {
        self.max_idle = n;
        self
    }

    pub fn with_max_total(mut self, n: usize) -> Self {
        self.max_total = n;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Requires `min_idle <= max_idle <= max_total` and `max_total > 0`.
    pub fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(Error::Config("engine pool max_total must be > 0".to_string()));
        }
        if self.min_idle > self.max_idle || self.max_idle > self.max_total {
            return Err(Error::Config(format!(
                "engine pool requires min_idle <= max_idle <= max_total, got {} / {} / {}",
                self.min_idle, self.max_idle, self.max_total
            )));
        }
        Ok(())
    }
}

/// Snapshot of pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub total: usize,
    pub in_use: usize,
}

type Factory<E> = Arc<dyn Fn() -> Result<E> + Send + Sync>;

struct Inner<E> {
    factory: Factory<E>,
    idle: Mutex<Vec<E>>,
    permits: Arc<Semaphore>,
    total: AtomicUsize,
    closed: AtomicBool,
    config: EnginePoolConfig,
}

impl<E> Inner<E> {
    fn idle(&self) -> MutexGuard<'_, Vec<E>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn release(&self, engine: E) {
        let mut idle = self.idle();
        // Checked under the idle lock so a concurrent close cannot miss it.
        if !self.closed.load(Ordering::SeqCst) && idle.len() < self.config.max_idle {
            idle.push(engine);
            return;
        }
        drop(idle);
        drop(engine);
        self.total.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded pool of engine instances of type `E`.
pub struct EnginePool<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for EnginePool<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Send + 'static> EnginePool<E> {
    /// Build a pool and warm `min_idle` instances.
    ///
    /// `factory` is blocking; it always runs on the blocking thread pool.
    pub async fn new<F>(config: EnginePoolConfig, factory: F) -> Result<Self>
    where
        F: Fn() -> Result<E> + Send + Sync + 'static,
    {
        config.validate()?;
        let pool = Self {
            inner: Arc::new(Inner {
                factory: Arc::new(factory),
                idle: Mutex::new(Vec::with_capacity(config.max_idle)),
                permits: Arc::new(Semaphore::new(config.max_total)),
                total: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                config,
            }),
        };

        for _ in 0..pool.inner.config.min_idle {
            let engine = pool.create().await?;
            pool.inner.idle().push(engine);
        }

        let stats = pool.stats();
        info!(
            pool_idle = stats.idle,
            pool_total = stats.total,
            max_total = pool.inner.config.max_total,
            "Engine pool ready"
        );
        Ok(pool)
    }

    async fn create(&self) -> Result<E> {
        self.inner.total.fetch_add(1, Ordering::SeqCst);
        let factory = self.inner.factory.clone();
        let created = tokio::task::spawn_blocking(move || factory())
            .await
            .map_err(|e| Error::Internal(format!("engine factory panicked: {}", e)))
            .and_then(|r| r);
        if created.is_err() {
            self.inner.total.fetch_sub(1, Ordering::SeqCst);
        }
        created
    }

    /// Lease an instance, waiting up to the configured timeout for capacity.
    pub async fn acquire(&self) -> Result<Lease<E>> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let timeout = self.inner.config.acquire_timeout;
        let permit =
            match tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(Error::PoolClosed),
                Err(_) => return Err(Error::PoolTimeout(timeout)),
            };

        let reused = self.inner.idle().pop();
        let engine = match reused {
            Some(engine) => engine,
            None => self.create().await?,
        };

        let stats = self.stats();
        debug!(
            pool_idle = stats.idle,
            pool_total = stats.total,
            "Engine instance leased"
        );

        Ok(Lease {
            engine: Some(engine),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Destroy idle instances and fail all pending and future acquires.
    ///
    /// Leased instances are destroyed as they are released. Only the first
    /// call has any effect.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();

        let drained: Vec<E> = std::mem::take(&mut *self.inner.idle());
        let count = drained.len();
        drop(drained);
        self.inner.total.fetch_sub(count, Ordering::SeqCst);

        info!(
            destroyed = count,
            pool_total = self.inner.total.load(Ordering::SeqCst),
            "Engine pool closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle().len();
        let total = self.inner.total.load(Ordering::SeqCst);
        PoolStats {
            idle,
            total,
            in_use: total.saturating_sub(idle),
        }
    }
}

/// Exclusive use of one engine instance until dropped.
pub struct Lease<E> {
    engine: Option<E>,
    pool: Arc<Inner<E>>,
    _permit: OwnedSemaphorePermit,
}

impl<E> Deref for Lease<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine
            .as_ref()
            .expect("lease holds its engine until dropped")
    }
}

impl<E> DerefMut for Lease<E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine
            .as_mut()
            .expect("lease holds its engine until dropped")
    }
}

impl<E> Drop for Lease<E> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.release(engine);
        }
    }
}
