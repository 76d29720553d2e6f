//! Generic worker pool underlying every pipeline stage.
//!
//! A pool owns a run flag, the join handles of its threads and the batch
//! size (1 for unpaired input, 2 for paired). Each thread runs the stage's
//! [`Consume::consume`] loop once; the loop is expected to return when it
//! observes the run flag cleared, or when it decides no more input can
//! arrive (in which case it clears the flag itself with [`PoolSignal::halt`]).
//!
//! Lifecycle: `Idle -> Running -> Stopping -> Stopped`. A stopped pool can be
//! started again.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use log::debug;
use crate::config::defs::PipelineError;
use crate::streams::exceptions::ExceptionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PoolState::Idle => "idle",
            PoolState::Running => "running",
            PoolState::Stopping => "stopping",
            PoolState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// The work each pool thread executes.
pub trait Consume: Send + Sync + 'static {
    fn consume(&self, signal: &PoolSignal) -> Result<(), PipelineError>;
}

#[derive(Debug)]
struct PoolShared {
    name: String,
    running: AtomicBool,
    live_workers: AtomicUsize,
    batch_size: AtomicU64,
    exceptions: Arc<ExceptionRegistry>,
}

/// Cheap handle onto a pool's run state, handed to workers and to
/// downstream stages that need to know whether more input can arrive.
#[derive(Debug, Clone)]
pub struct PoolSignal {
    shared: Arc<PoolShared>,
}

impl PoolSignal {
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Clears the run flag. Used by workers that detect end of input.
    pub fn halt(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// True while at least one worker thread has not yet exited.
    pub fn running_threads(&self) -> bool {
        self.shared.live_workers.load(Ordering::SeqCst) > 0
    }

    pub fn batch_size(&self) -> u64 {
        self.shared.batch_size.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn report(&self, error: PipelineError) {
        self.shared.exceptions.push(&self.shared.name, error);
    }
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    state: Mutex<PoolState>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &str, exceptions: Arc<ExceptionRegistry>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.to_string(),
                running: AtomicBool::new(false),
                live_workers: AtomicUsize::new(0),
                batch_size: AtomicU64::new(1),
                exceptions,
            }),
            state: Mutex::new(PoolState::Idle),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `n_threads` workers, each running `body.consume()` once.
    ///
    /// Any error returned by a worker, or any panic inside it, is captured
    /// into the exception registry; only that worker exits. When the last
    /// live worker exits for whatever reason the run flag is cleared.
    pub fn start<C: Consume>(&self, n_threads: usize, batch_size: u64, body: Arc<C>) -> Result<(), PipelineError> {
        if n_threads == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "stage '{}' needs at least one worker thread", self.shared.name
            )));
        }

        let mut state = lock(&self.state);
        if matches!(*state, PoolState::Running | PoolState::Stopping) {
            return Err(PipelineError::StageState {
                stage: self.shared.name.clone(),
                action: "start".to_string(),
                state: state.to_string(),
            });
        }

        self.shared.batch_size.store(batch_size, Ordering::SeqCst);
        self.shared.live_workers.store(n_threads, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let mut handles = lock(&self.handles);
        for i in 0..n_threads {
            let signal = self.signal();
            let body = Arc::clone(&body);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.shared.name, i))
                .spawn(move || run_worker(signal, body));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Threads that never started will never decrement.
                    self.shared.live_workers.fetch_sub(n_threads - i, Ordering::SeqCst);
                    self.shared.running.store(false, Ordering::SeqCst);
                    for handle in handles.drain(..) {
                        let _ = handle.join();
                    }
                    *state = PoolState::Stopped;
                    return Err(PipelineError::Io(e));
                }
            }
        }

        *state = PoolState::Running;
        debug!("Started stage '{}' with {} worker(s), batch size {}", self.shared.name, n_threads, batch_size);
        Ok(())
    }

    /// Clears the run flag and joins every worker.
    ///
    /// Blocks until each worker's loop has observed the flag and returned.
    /// Calling it on a pool that is not running is a no-op.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if *state != PoolState::Running {
            return;
        }
        *state = PoolState::Stopping;
        self.shared.running.store(false, Ordering::SeqCst);
        self.join_handles();
        *state = PoolState::Stopped;
        debug!("Stopped stage '{}'", self.shared.name);
    }

    /// Waits for the workers to finish on their own, without clearing the
    /// run flag first.
    pub fn join(&self) {
        let mut state = lock(&self.state);
        if *state != PoolState::Running {
            return;
        }
        self.join_handles();
        *state = PoolState::Stopped;
        debug!("Stage '{}' drained", self.shared.name);
    }

    fn join_handles(&self) {
        let handles: Vec<_> = lock(&self.handles).drain(..).collect();
        for handle in handles {
            // Panics are caught inside run_worker, so join cannot fail here.
            let _ = handle.join();
        }
    }

    pub fn signal(&self) -> PoolSignal {
        PoolSignal { shared: Arc::clone(&self.shared) }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn running_threads(&self) -> bool {
        self.shared.live_workers.load(Ordering::SeqCst) > 0
    }

    pub fn batch_size(&self) -> u64 {
        self.shared.batch_size.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PoolState {
        *lock(&self.state)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn exceptions(&self) -> &Arc<ExceptionRegistry> {
        &self.shared.exceptions
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<C: Consume>(signal: PoolSignal, body: Arc<C>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body.consume(&signal)));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => signal.report(e),
        Err(payload) => signal.report(PipelineError::WorkerPanic {
            stage: signal.name().to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
    if signal.shared.live_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
        signal.halt();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
