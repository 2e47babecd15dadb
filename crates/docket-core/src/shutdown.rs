//! Process-wide shutdown coordination.
//!
//! Background loops (task workers, maintenance jobs) receive a
//! [`ShutdownSignal`] and register their join handle; resources (engine pool,
//! database pool) register a close callback. [`Shutdown::execute`] fires the
//! signal, waits for every registered loop to return, then runs the close
//! callbacks in registration order. Loops therefore never observe a closed
//! resource while they are still finishing their current task.

use std::future::Future;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Cancellation signal observed by background loops.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // A dropped coordinator counts as shutdown.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

type Callback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Shutdown coordinator holding every loop handle and close callback.
pub struct Shutdown {
    tx: watch::Sender<bool>,
    loops: Mutex<Vec<(String, JoinHandle<()>)>>,
    callbacks: Mutex<Vec<(String, Callback)>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            loops: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// A signal for a new background loop.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Track a spawned loop; `execute` waits for it to return.
    pub fn register_loop(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        debug!(name = %name, "Registered shutdown loop");
        lock(&self.loops).push((name, handle));
    }

    /// Register a close callback, run after all loops have returned.
    pub fn register_callback<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(name = %name, "Registered shutdown callback");
        let callback: Callback = Box::new(move || -> BoxFuture<'static, ()> { Box::pin(callback()) });
        lock(&self.callbacks).push((name, callback));
    }

    /// Signal shutdown and block until every loop and callback has finished.
    pub async fn execute(&self) {
        info!("Shutdown requested");
        self.tx.send_replace(true);

        let loops = std::mem::take(&mut *lock(&self.loops));
        for (name, handle) in loops {
            match handle.await {
                Ok(()) => debug!(name = %name, "Loop stopped"),
                Err(e) => error!(name = %name, error = %e, "Loop terminated abnormally"),
            }
        }

        let callbacks = std::mem::take(&mut *lock(&self.callbacks));
        for (name, callback) in callbacks {
            callback().await;
            debug!(name = %name, "Shutdown callback finished");
        }

        info!("Shutdown complete");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
