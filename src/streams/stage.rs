//! Stage building blocks: a [`WorkerPool`] plus an input queue, an output
//! queue, or both.
//!
//! The [`Consumer`] and [`Producer`] traits carry the queue-facing operations
//! (`try_accept`, `try_emit`, rewiring) so concrete stages only need to hand
//! out their pool and ports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use crate::config::defs::PipelineError;
use crate::streams::exceptions::ExceptionRegistry;
use crate::streams::queue::BoundedQueue;
use crate::streams::worker::{PoolSignal, PoolState, WorkerPool};

/// Input side of a stage: the queue it reads from and how many reads were
/// accepted into it through [`Consumer::try_accept`].
pub struct InputPort<T> {
    queue: RwLock<Arc<BoundedQueue<T>>>,
    n_pushed: AtomicU64,
}

impl<T> InputPort<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_queue(Arc::new(BoundedQueue::new(capacity)))
    }

    pub fn with_queue(queue: Arc<BoundedQueue<T>>) -> Self {
        Self {
            queue: RwLock::new(queue),
            n_pushed: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> Arc<BoundedQueue<T>> {
        let guard = self.queue.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    fn replace(&self, queue: Arc<BoundedQueue<T>>) {
        let mut guard = self.queue.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = queue;
    }

    pub fn n_pushed(&self) -> u64 {
        self.n_pushed.load(Ordering::SeqCst)
    }
}

/// Output side of a stage: the queue it fills and how many reads were taken
/// out of it through [`Producer::try_emit`].
pub struct OutputPort<V> {
    queue: Arc<BoundedQueue<V>>,
    n_popped: AtomicU64,
}

impl<V> OutputPort<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(BoundedQueue::new(capacity)),
            n_popped: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> Arc<BoundedQueue<V>> {
        Arc::clone(&self.queue)
    }

    pub fn n_popped(&self) -> u64 {
        self.n_popped.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) {
        self.n_popped.store(0, Ordering::SeqCst);
    }
}

pub trait Stage {
    fn pool(&self) -> &WorkerPool;

    fn stop(&self) {
        self.pool().stop();
    }

    fn is_running(&self) -> bool {
        self.pool().is_running()
    }

    fn running_threads(&self) -> bool {
        self.pool().running_threads()
    }

    fn state(&self) -> PoolState {
        self.pool().state()
    }

    fn batch_size(&self) -> u64 {
        self.pool().batch_size()
    }

    /// Waits for the workers to run out of input and exit on their own.
    fn join(&self) {
        self.pool().join();
    }

    fn check_and_rethrow(&self) -> Result<(), PipelineError> {
        self.pool().exceptions().check_and_rethrow()
    }

    /// Errors while the stage's workers are running or being stopped.
    fn ensure_stopped(&self, action: &str) -> Result<(), PipelineError> {
        let state = self.state();
        if matches!(state, PoolState::Running | PoolState::Stopping) {
            return Err(PipelineError::StageState {
                stage: self.pool().name().to_string(),
                action: action.to_string(),
                state: state.to_string(),
            });
        }
        Ok(())
    }
}

pub trait Consumer<T>: Stage {
    fn input_port(&self) -> &InputPort<T>;

    /// Offers `item` to the stage; a full queue hands it back.
    fn try_accept(&self, item: T) -> Result<(), T> {
        let port = self.input_port();
        port.queue().try_push(item)?;
        port.n_pushed.fetch_add(self.batch_size(), Ordering::SeqCst);
        Ok(())
    }

    /// Points the stage at another stage's output queue. Only allowed while
    /// the stage's workers are not running.
    fn set_input(&self, queue: Arc<BoundedQueue<T>>) -> Result<(), PipelineError> {
        self.ensure_stopped("rewire its input")?;
        self.input_port().replace(queue);
        Ok(())
    }

    fn input(&self) -> Arc<BoundedQueue<T>> {
        self.input_port().queue()
    }

    fn n_pushed(&self) -> u64 {
        self.input_port().n_pushed()
    }
}

pub trait Producer<V>: Stage {
    fn output_port(&self) -> &OutputPort<V>;

    fn try_emit(&self) -> Option<V> {
        let port = self.output_port();
        let item = port.queue.try_pop()?;
        port.n_popped.fetch_add(self.batch_size(), Ordering::SeqCst);
        Some(item)
    }

    fn has_pending(&self) -> bool {
        !self.output_port().queue.is_empty()
    }

    fn output(&self) -> Arc<BoundedQueue<V>> {
        self.output_port().queue()
    }

    fn n_popped(&self) -> u64 {
        self.output_port().n_popped()
    }
}

/// What a downstream stage needs to know about the stage feeding it: whether
/// it can still produce, and how many reads it has handed over so far.
#[derive(Debug, Clone)]
pub struct Upstream {
    signal: PoolSignal,
    produced: Arc<AtomicU64>,
}

impl Upstream {
    pub fn new(signal: PoolSignal, produced: Arc<AtomicU64>) -> Self {
        Self { signal, produced }
    }

    pub fn is_running(&self) -> bool {
        self.signal.is_running()
    }

    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    /// True once nothing more can ever arrive on `input`: the upstream stage
    /// has stopped, the queue is empty and everything it produced has been
    /// accounted for by the consuming stage.
    ///
    /// The flag is read first; everything it pushed happened before it cleared it.
    pub fn is_exhausted<T>(&self, input: &BoundedQueue<T>, consumed: u64) -> bool {
        !self.signal.is_running() && input.is_empty() && consumed >= self.produced()
    }
}

/// Worker loop shared by every consuming stage: pops items from `input` and
/// hands them to `handle` until the run flag clears or `upstream` is
/// exhausted, in which case the worker clears the flag itself.
///
/// `consumed` is bumped by the batch size after each item whether or not
/// `handle` succeeded; an error then ends this worker only.
pub fn consume_until_exhausted<T, F>(
    signal: &PoolSignal,
    input: &BoundedQueue<T>,
    upstream: &Upstream,
    consumed: &AtomicU64,
    mut handle: F,
) -> Result<(), PipelineError>
where
    F: FnMut(T) -> Result<(), PipelineError>,
{
    while signal.is_running() {
        let Some(item) = input.try_pop() else {
            if upstream.is_exhausted(input, consumed.load(Ordering::SeqCst)) {
                signal.halt();
                break;
            }
            thread::yield_now();
            continue;
        };

        let outcome = handle(item);
        consumed.fetch_add(signal.batch_size(), Ordering::SeqCst);
        outcome?;
    }
    Ok(())
}

pub struct ConsumerStage<T> {
    pool: WorkerPool,
    input: InputPort<T>,
}

impl<T> ConsumerStage<T> {
    pub fn new(name: &str, exceptions: Arc<ExceptionRegistry>, capacity: usize) -> Self {
        Self {
            pool: WorkerPool::new(name, exceptions),
            input: InputPort::new(capacity),
        }
    }
}

impl<T> Stage for ConsumerStage<T> {
    fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl<T> Consumer<T> for ConsumerStage<T> {
    fn input_port(&self) -> &InputPort<T> {
        &self.input
    }
}

pub struct ProducerStage<V> {
    pool: WorkerPool,
    output: OutputPort<V>,
}

impl<V> ProducerStage<V> {
    pub fn new(name: &str, exceptions: Arc<ExceptionRegistry>, capacity: usize) -> Self {
        Self {
            pool: WorkerPool::new(name, exceptions),
            output: OutputPort::new(capacity),
        }
    }
}

impl<V> Stage for ProducerStage<V> {
    fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl<V> Producer<V> for ProducerStage<V> {
    fn output_port(&self) -> &OutputPort<V> {
        &self.output
    }
}

/// A stage transforming `T` items from its input into `V` items on its output.
pub struct ConsumerProducerStage<T, V> {
    pool: WorkerPool,
    input: InputPort<T>,
    output: OutputPort<V>,
}

impl<T, V> ConsumerProducerStage<T, V> {
    pub fn new(name: &str, exceptions: Arc<ExceptionRegistry>, capacity: usize) -> Self {
        Self {
            pool: WorkerPool::new(name, exceptions),
            input: InputPort::new(capacity),
            output: OutputPort::new(capacity),
        }
    }
}

impl<T, V> Stage for ConsumerProducerStage<T, V> {
    fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl<T, V> Consumer<T> for ConsumerProducerStage<T, V> {
    fn input_port(&self) -> &InputPort<T> {
        &self.input
    }
}

impl<T, V> Producer<V> for ConsumerProducerStage<T, V> {
    fn output_port(&self) -> &OutputPort<V> {
        &self.output
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::worker::Consume;

    struct Idle;

    impl Consume for Idle {
        fn consume(&self, signal: &PoolSignal) -> Result<(), PipelineError> {
            while signal.is_running() {
                std::thread::yield_now();
            }
            Ok(())
        }
    }

    #[test]
    fn test_try_accept_counts_by_batch_size() {
        let stage: ConsumerStage<u32> = ConsumerStage::new("sink", Arc::new(ExceptionRegistry::new()), 2);
        stage.pool().start(1, 2, Arc::new(Idle)).unwrap();

        assert!(stage.try_accept(1).is_ok());
        assert!(stage.try_accept(2).is_ok());
        assert_eq!(stage.try_accept(3), Err(3));
        assert_eq!(stage.n_pushed(), 4);
        stage.stop();
    }

    #[test]
    fn test_try_emit_counts_and_pending() {
        let stage: ProducerStage<&str> = ProducerStage::new("source", Arc::new(ExceptionRegistry::new()), 4);
        assert!(!stage.has_pending());
        stage.output().try_push("a").unwrap();
        assert!(stage.has_pending());
        assert_eq!(stage.try_emit(), Some("a"));
        assert_eq!(stage.try_emit(), None);
        assert_eq!(stage.n_popped(), 1);
    }

    #[test]
    fn test_set_input_rewires_when_idle_only() {
        let exceptions = Arc::new(ExceptionRegistry::new());
        let upstream: ProducerStage<u8> = ProducerStage::new("up", Arc::clone(&exceptions), 4);
        let stage: ConsumerProducerStage<u8, u8> = ConsumerProducerStage::new("mid", exceptions, 4);

        stage.set_input(upstream.output()).unwrap();
        assert!(Arc::ptr_eq(&stage.input(), &upstream.output()));

        stage.pool().start(1, 1, Arc::new(Idle)).unwrap();
        assert!(matches!(stage.set_input(upstream.output()), Err(PipelineError::StageState { .. })));
        stage.stop();
    }

    #[test]
    fn test_upstream_exhaustion() {
        let exceptions = Arc::new(ExceptionRegistry::new());
        let pool = WorkerPool::new("up", exceptions);
        let produced = Arc::new(AtomicU64::new(0));
        let upstream = Upstream::new(pool.signal(), Arc::clone(&produced));
        let queue: BoundedQueue<u8> = BoundedQueue::new(2);

        // never started: flag is clear, nothing produced
        assert!(upstream.is_exhausted(&queue, 0));

        produced.store(3, Ordering::SeqCst);
        assert!(!upstream.is_exhausted(&queue, 2));
        assert!(upstream.is_exhausted(&queue, 3));

        queue.try_push(1).unwrap();
        assert!(!upstream.is_exhausted(&queue, 3));
    }
}
