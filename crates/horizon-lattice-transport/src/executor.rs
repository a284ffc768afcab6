//! Executors that run transport engine callbacks.
//!
//! The transport engine never invokes callbacks inline with the caller. It
//! hands every lifecycle event to an [`Executor`] supplied at dispatch time.
//! [`ThreadPoolExecutor`] is the default: a bounded rayon pool whose size is
//! taken from [`EngineConfig::threads_count`](crate::EngineConfig).
//!
//! # Saturation
//!
//! The pool bound is the number of callbacks that can run at once across all
//! in-flight requests. A callback that blocks (for example an upload provider
//! waiting on a slow source) holds its worker until it returns, so a pool of
//! `n` threads stalls entirely once `n` callbacks block.
//!
//! # Example
//!
//! ```
//! use horizon_lattice_transport::executor::{Executor, ThreadPoolExecutor};
//! use std::sync::mpsc;
//!
//! let executor = ThreadPoolExecutor::new(2).unwrap();
//! let (tx, rx) = mpsc::channel();
//! executor.execute(Box::new(move || tx.send(42).unwrap()));
//! assert_eq!(rx.recv().unwrap(), 42);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::{ThreadPool as RayonThreadPool, ThreadPoolBuilder};

use crate::error::{BridgeError, Result};

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks, usually on another thread.
pub trait Executor: Send + Sync {
    /// Submit a task. Implementations must not run it inline with the caller
    /// unless they document otherwise.
    fn execute(&self, task: Task);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Task) {
        (**self).execute(task)
    }
}

/// Configuration for a [`ThreadPoolExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads. This is the parallelism bound for callbacks.
    pub num_threads: usize,
    /// Name prefix for worker threads.
    pub thread_name: String,
    /// Stack size for worker threads in bytes.
    pub stack_size: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_threads: crate::config::DEFAULT_THREADS_COUNT,
            thread_name: "lattice-transport".to_string(),
            stack_size: None,
        }
    }
}

impl ExecutorConfig {
    /// Create a configuration with a custom thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Default::default()
        }
    }
}

/// A bounded thread pool executor built on rayon.
pub struct ThreadPoolExecutor {
    pool: RayonThreadPool,
    active_tasks: Arc<AtomicUsize>,
}

impl ThreadPoolExecutor {
    /// Create an executor with `num_threads` workers.
    pub fn new(num_threads: usize) -> Result<Self> {
        Self::with_config(ExecutorConfig::with_threads(num_threads))
    }

    /// Create an executor from a full configuration.
    pub fn with_config(config: ExecutorConfig) -> Result<Self> {
        if config.num_threads == 0 {
            return Err(BridgeError::config("executor needs at least one thread"));
        }

        let thread_name = config.thread_name.clone();
        let mut builder = ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(move |index| format!("{thread_name}-{index}"));

        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let pool = builder
            .build()
            .map_err(|e| BridgeError::Runtime(e.to_string()))?;

        tracing::debug!(
            target: "horizon_lattice_transport::executor",
            num_threads = config.num_threads,
            "created callback executor"
        );

        Ok(Self {
            pool,
            active_tasks: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Get the number of threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Get the number of tasks currently running or queued.
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, task: Task) {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
        let active_tasks = self.active_tasks.clone();

        self.pool.spawn(move || {
            task();
            active_tasks.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

impl std::fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("num_threads", &self.num_threads())
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}
