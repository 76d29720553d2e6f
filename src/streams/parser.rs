//! Single-threaded source stage turning a [`ReadParser`] into a stream of
//! [`ReadBatch`] items on its output queue.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use log::{debug, info};
use crate::config::defs::{PipelineError, PAIRED_BATCH_SIZE, UNPAIRED_BATCH_SIZE};
use crate::streams::batch::{Read, ReadBatch};
use crate::streams::exceptions::ExceptionRegistry;
use crate::streams::queue::BoundedQueue;
use crate::streams::stage::{OutputPort, Producer, ProducerStage, Stage, Upstream};
use crate::streams::worker::{Consume, PoolSignal, WorkerPool};
use crate::utils::fastx::{FastxParser, ReadParser};

pub struct ParserStage {
    stage: ProducerStage<ReadBatch>,
    n_parsed: Arc<AtomicU64>,
}

impl ParserStage {
    pub fn new(exceptions: Arc<ExceptionRegistry>, capacity: usize) -> Self {
        Self {
            stage: ProducerStage::new("parser", exceptions, capacity),
            n_parsed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts the parse thread over `parser`. Reads are batched in pairs
    /// when `paired` is set.
    pub fn start<P: ReadParser + 'static>(&self, parser: P, paired: bool) -> Result<(), PipelineError> {
        self.ensure_stopped("start")?;
        self.output().drain_and_discard();
        self.n_parsed.store(0, Ordering::SeqCst);
        self.output_port().reset_count();

        let batch_size = if paired { PAIRED_BATCH_SIZE } else { UNPAIRED_BATCH_SIZE };
        let body = ParseLoop {
            parser: Mutex::new(Some(parser)),
            paired,
            output: self.output(),
            n_parsed: Arc::clone(&self.n_parsed),
        };
        self.stage.pool().start(1, batch_size, Arc::new(body))
    }

    /// Opens `path` and starts parsing it. A file that cannot be opened is
    /// reported here rather than through the exception registry.
    pub fn start_file(&self, path: &Path, paired: bool) -> Result<(), PipelineError> {
        let parser = FastxParser::open(path)?;
        info!("Parsing {} ({})", path.display(), if paired { "paired" } else { "unpaired" });
        self.start(parser, paired)
    }

    /// Handle for downstream stages to detect the end of parsed input.
    pub fn upstream(&self) -> Upstream {
        Upstream::new(self.stage.pool().signal(), Arc::clone(&self.n_parsed))
    }

    pub fn n_parsed(&self) -> u64 {
        self.n_parsed.load(Ordering::SeqCst)
    }

    /// Reads parsed but not yet taken up by a consumer that has accounted
    /// for `n_consumed` of them.
    pub fn queue_backlog(&self, n_consumed: u64) -> u64 {
        self.n_parsed().saturating_sub(n_consumed)
    }
}

impl Stage for ParserStage {
    fn pool(&self) -> &WorkerPool {
        self.stage.pool()
    }
}

impl Producer<ReadBatch> for ParserStage {
    fn output_port(&self) -> &OutputPort<ReadBatch> {
        self.stage.output_port()
    }
}

struct ParseLoop<P> {
    parser: Mutex<Option<P>>,
    paired: bool,
    output: Arc<BoundedQueue<ReadBatch>>,
    n_parsed: Arc<AtomicU64>,
}

impl<P: ReadParser> ParseLoop<P> {
    fn next_batch(&self, parser: &mut P) -> Result<ReadBatch, PipelineError> {
        let mut first = Read::default();
        if self.paired {
            let mut second = Read::default();
            parser.imprint_next_pair(&mut first, &mut second)?;
            Ok(ReadBatch::Paired(first, second))
        } else {
            parser.imprint_next(&mut first)?;
            Ok(ReadBatch::Single(first))
        }
    }
}

impl<P: ReadParser + 'static> Consume for ParseLoop<P> {
    fn consume(&self, signal: &PoolSignal) -> Result<(), PipelineError> {
        let taken = self.parser.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        let Some(mut parser) = taken else {
            return Ok(());
        };
        let batch_size = signal.batch_size();

        while signal.is_running() && parser.has_more() {
            let batch = self.next_batch(&mut parser)?;
            self.n_parsed.fetch_add(batch_size, Ordering::SeqCst);
            if self.output.push_while(batch, || signal.is_running()).is_err() {
                break;
            }
        }

        // Only stop() clears the flag while the loop runs, so a clear flag
        // means the run was cut short, even during the last push.
        if !signal.is_running() {
            let n = self.output.drain_and_discard();
            debug!("Parser stopped before its output was consumed; discarded {} queued batch(es)", n);
        } else {
            debug!("Parser reached end of input after {} read(s)", self.n_parsed.load(Ordering::SeqCst));
            signal.halt();
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    /// In-memory parser over a fixed list of reads.
    struct VecParser {
        reads: VecDeque<Read>,
    }

    impl VecParser {
        fn new(names: &[&str]) -> Self {
            Self { reads: names.iter().map(|n| Read::new(*n, "ACGTACGT", "")).collect() }
        }
    }

    impl ReadParser for VecParser {
        fn has_more(&mut self) -> bool {
            !self.reads.is_empty()
        }

        fn imprint_next(&mut self, read: &mut Read) -> Result<(), PipelineError> {
            *read = self
                .reads
                .pop_front()
                .ok_or_else(|| PipelineError::InvalidFastxFormat("empty".to_string()))?;
            Ok(())
        }
    }

    fn wait_until_stopped(stage: &ParserStage) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while stage.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_parses_all_reads_then_halts() -> anyhow::Result<()> {
        let stage = ParserStage::new(Arc::new(ExceptionRegistry::new()), 16);
        stage.start(VecParser::new(&["a", "b", "c"]), false)?;
        wait_until_stopped(&stage);

        assert!(!stage.is_running());
        assert_eq!(stage.n_parsed(), 3);
        let names: Vec<_> = std::iter::from_fn(|| stage.try_emit()).map(|b| b.first().name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(stage.queue_backlog(1), 2);
        stage.stop();
        Ok(())
    }

    #[test]
    fn test_paired_batches_carry_both_mates() -> anyhow::Result<()> {
        let stage = ParserStage::new(Arc::new(ExceptionRegistry::new()), 16);
        stage.start(VecParser::new(&["x/1", "x/2", "y/1", "y/2"]), true)?;
        wait_until_stopped(&stage);

        assert_eq!(stage.n_parsed(), 4);
        while let Some(batch) = stage.try_emit() {
            assert!(batch.is_paired());
        }
        assert_eq!(stage.n_popped(), 4);
        stage.check_and_rethrow()?;
        Ok(())
    }

    #[test]
    fn test_bad_pair_is_captured_and_halts() -> anyhow::Result<()> {
        let exceptions = Arc::new(ExceptionRegistry::new());
        let stage = ParserStage::new(Arc::clone(&exceptions), 16);
        stage.start(VecParser::new(&["x/1", "x/2", "y/1", "z/2", "w/1", "w/2"]), true)?;
        wait_until_stopped(&stage);

        assert_eq!(stage.n_parsed(), 2);
        assert!(matches!(stage.check_and_rethrow(), Err(PipelineError::UnpairedReads(_))));
        assert!(exceptions.is_empty());
        Ok(())
    }

    #[test]
    fn test_forced_stop_discards_queued_batches() -> anyhow::Result<()> {
        let names: Vec<String> = (0..100).map(|i| format!("r{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let stage = ParserStage::new(Arc::new(ExceptionRegistry::new()), 4);
        stage.start(VecParser::new(&refs), false)?;

        let deadline = Instant::now() + Duration::from_secs(10);
        while !stage.output().is_full() && Instant::now() < deadline {
            std::thread::yield_now();
        }
        stage.stop();

        assert!(!stage.has_pending());
        assert!(stage.n_parsed() < 100);
        Ok(())
    }

    #[test]
    fn test_stop_during_last_push_discards_queue() -> anyhow::Result<()> {
        let stage = ParserStage::new(Arc::new(ExceptionRegistry::new()), 1);
        stage.start(VecParser::new(&["a", "b"]), false)?;

        // "b" is counted before its push, which waits on the full queue
        let deadline = Instant::now() + Duration::from_secs(10);
        while stage.n_parsed() < 2 && Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert_eq!(stage.n_parsed(), 2);
        stage.stop();

        assert!(!stage.has_pending());
        assert!(stage.try_emit().is_none());
        Ok(())
    }

    #[test]
    fn test_restart_starts_from_empty_queue() -> anyhow::Result<()> {
        let stage = ParserStage::new(Arc::new(ExceptionRegistry::new()), 4);
        stage.start(VecParser::new(&["old"]), false)?;
        wait_until_stopped(&stage);
        stage.stop();
        assert!(stage.has_pending());

        stage.start(VecParser::new(&["new"]), false)?;
        wait_until_stopped(&stage);
        let names: Vec<_> = std::iter::from_fn(|| stage.try_emit()).map(|b| b.first().name.clone()).collect();
        assert_eq!(names, vec!["new"]);
        assert_eq!(stage.n_parsed(), 1);
        stage.stop();
        Ok(())
    }

    #[test]
    fn test_missing_file_fails_at_start() {
        let stage = ParserStage::new(Arc::new(ExceptionRegistry::new()), 4);
        assert!(matches!(
            stage.start_file(Path::new("/nonexistent/reads.fq"), false),
            Err(PipelineError::Io(_))
        ));
        assert!(!stage.is_running());
    }
}
