//! Digital normalization: keep a read (or pair) only while its k-mers are
//! still rare in the counting table, and count it once kept.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use log::debug;
use crate::config::defs::{PipelineError, DEFAULT_CUTOFF};
use crate::streams::batch::{Read, ReadBatch};
use crate::streams::controller::ReadProcessor;
use crate::streams::exceptions::ExceptionRegistry;
use crate::streams::queue::BoundedQueue;
use crate::streams::stage::{
    consume_until_exhausted, Consumer, ConsumerProducerStage, InputPort, OutputPort, Producer, Stage,
    Upstream,
};
use crate::streams::worker::{Consume, PoolSignal, WorkerPool};
use crate::utils::kmer::KmerCounter;

pub struct DiginormStage {
    stage: ConsumerProducerStage<ReadBatch, ReadBatch>,
    table: Arc<dyn KmerCounter>,
    cutoff: AtomicU32,
    n_processed: Arc<AtomicU64>,
    n_kept: Arc<AtomicU64>,
}

impl DiginormStage {
    pub fn new(table: Arc<dyn KmerCounter>, exceptions: Arc<ExceptionRegistry>, capacity: usize) -> Self {
        Self {
            stage: ConsumerProducerStage::new("diginorm", exceptions, capacity),
            table,
            cutoff: AtomicU32::new(DEFAULT_CUTOFF),
            n_processed: Arc::new(AtomicU64::new(0)),
            n_kept: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts `n_threads` filter workers reading from this stage's input,
    /// which `upstream` is expected to be feeding.
    ///
    /// Reads whose median k-mer count is below `cutoff` are kept.
    pub fn start(
        &self,
        upstream: Upstream,
        cutoff: u32,
        batch_size: u64,
        n_threads: usize,
    ) -> Result<(), PipelineError> {
        self.ensure_stopped("start")?;
        self.output().drain_and_discard();
        self.cutoff.store(cutoff, Ordering::SeqCst);
        self.n_processed.store(0, Ordering::SeqCst);
        self.n_kept.store(0, Ordering::SeqCst);
        self.output_port().reset_count();

        let body = NormalizeByMedian {
            table: Arc::clone(&self.table),
            cutoff,
            input: self.input(),
            output: self.output(),
            upstream,
            n_processed: Arc::clone(&self.n_processed),
            n_kept: Arc::clone(&self.n_kept),
        };
        debug!("Normalizing to median k-mer count < {} with k = {}", cutoff, self.table.ksize());
        self.stage.pool().start(n_threads, batch_size, Arc::new(body))
    }

    /// Cutoff used by the next start through [`ReadProcessor::launch`].
    pub fn set_cutoff(&self, cutoff: u32) {
        self.cutoff.store(cutoff, Ordering::SeqCst);
    }

    pub fn cutoff(&self) -> u32 {
        self.cutoff.load(Ordering::SeqCst)
    }

    pub fn table(&self) -> &Arc<dyn KmerCounter> {
        &self.table
    }

    pub fn n_processed(&self) -> u64 {
        self.n_processed.load(Ordering::SeqCst)
    }

    pub fn n_kept(&self) -> u64 {
        self.n_kept.load(Ordering::SeqCst)
    }

    /// True once nothing more will ever be emitted: every worker has exited
    /// and the consumer has popped everything kept. An empty output counts
    /// as drained too, since kept batches are discarded on a forced stop.
    pub fn iter_stop(&self) -> bool {
        !self.running_threads() && (self.n_popped() >= self.n_kept() || !self.has_pending())
    }
}

impl Stage for DiginormStage {
    fn pool(&self) -> &WorkerPool {
        self.stage.pool()
    }
}

impl Consumer<ReadBatch> for DiginormStage {
    fn input_port(&self) -> &InputPort<ReadBatch> {
        self.stage.input_port()
    }
}

impl Producer<ReadBatch> for DiginormStage {
    fn output_port(&self) -> &OutputPort<ReadBatch> {
        self.stage.output_port()
    }
}

impl ReadProcessor for DiginormStage {
    fn launch(&self, upstream: Upstream, batch_size: u64, n_threads: usize) -> Result<(), PipelineError> {
        self.start(upstream, self.cutoff(), batch_size, n_threads)
    }

    fn n_processed(&self) -> u64 {
        DiginormStage::n_processed(self)
    }

    fn n_kept(&self) -> u64 {
        DiginormStage::n_kept(self)
    }

    fn iter_stop(&self) -> bool {
        DiginormStage::iter_stop(self)
    }
}

struct NormalizeByMedian {
    table: Arc<dyn KmerCounter>,
    cutoff: u32,
    input: Arc<BoundedQueue<ReadBatch>>,
    output: Arc<BoundedQueue<ReadBatch>>,
    upstream: Upstream,
    n_processed: Arc<AtomicU64>,
    n_kept: Arc<AtomicU64>,
}

impl NormalizeByMedian {
    /// Reads shorter than k have no k-mers and count as novel.
    fn median(&self, read: &Read) -> Result<u32, PipelineError> {
        match self.table.get_median_count(&read.sequence) {
            Ok(summary) => Ok(summary.median),
            Err(PipelineError::SequenceTooShort { .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn process(&self, batch: ReadBatch, signal: &PoolSignal) -> Result<(), PipelineError> {
        for read in batch.reads() {
            if self.median(read)? >= self.cutoff {
                return Ok(());
            }
        }

        for read in batch.reads() {
            self.table.count_sequence(&read.sequence)?;
        }
        self.n_kept.fetch_add(signal.batch_size(), Ordering::SeqCst);

        if self.output.push_while(batch, || signal.is_running()).is_err() {
            debug!("Stage '{}' stopped with a kept batch in hand; dropping it", signal.name());
        }
        Ok(())
    }
}

impl Consume for NormalizeByMedian {
    fn consume(&self, signal: &PoolSignal) -> Result<(), PipelineError> {
        consume_until_exhausted(signal, &self.input, &self.upstream, &self.n_processed, |batch| {
            self.process(batch, signal)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};
    use crate::utils::kmer::KmerCountTable;

    struct Fixture {
        feeder: WorkerPool,
        produced: Arc<AtomicU64>,
        stage: DiginormStage,
    }

    /// A stage whose upstream is a hand-driven pool flag and counter.
    fn fixture(ksize: usize, capacity: usize) -> anyhow::Result<Fixture> {
        let exceptions = Arc::new(ExceptionRegistry::new());
        let table: Arc<dyn KmerCounter> = Arc::new(KmerCountTable::new(ksize)?);
        Ok(Fixture {
            feeder: WorkerPool::new("feeder", Arc::clone(&exceptions)),
            produced: Arc::new(AtomicU64::new(0)),
            stage: DiginormStage::new(table, exceptions, capacity),
        })
    }

    fn feed(fx: &Fixture, batch: ReadBatch) {
        fx.produced.fetch_add(batch.len(), Ordering::SeqCst);
        fx.stage.input().try_push(batch).unwrap();
    }

    fn drain(stage: &DiginormStage) -> Vec<ReadBatch> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut out = Vec::new();
        while Instant::now() < deadline {
            match stage.try_emit() {
                Some(batch) => out.push(batch),
                None if stage.iter_stop() => break,
                None => thread::yield_now(),
            }
        }
        out
    }

    #[test]
    fn test_identical_reads_second_discarded() -> anyhow::Result<()> {
        let fx = fixture(4, 8)?;
        feed(&fx, ReadBatch::Single(Read::new("a", "ACGTTGCAAC", "")));
        feed(&fx, ReadBatch::Single(Read::new("b", "ACGTTGCAAC", "")));

        // feeder never started: upstream already looks finished
        let upstream = Upstream::new(fx.feeder.signal(), Arc::clone(&fx.produced));
        fx.stage.start(upstream, 1, 1, 1)?;

        let out = drain(&fx.stage);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].first().name, "a");
        assert_eq!(fx.stage.n_processed(), 2);
        assert_eq!(fx.stage.n_kept(), 1);
        fx.stage.check_and_rethrow()?;
        Ok(())
    }

    #[test]
    fn test_pair_kept_or_dropped_together() -> anyhow::Result<()> {
        let fx = fixture(4, 8)?;
        fx.stage.table().count_sequence("GGGGGGGG")?;
        fx.stage.table().count_sequence("GGGGGGGG")?;
        feed(&fx, ReadBatch::Paired(Read::new("p/1", "ACGTAC", ""), Read::new("p/2", "GGGGGGGG", "")));
        feed(&fx, ReadBatch::Paired(Read::new("q/1", "ACGTAC", ""), Read::new("q/2", "TATATA", "")));

        let upstream = Upstream::new(fx.feeder.signal(), Arc::clone(&fx.produced));
        fx.stage.start(upstream, 2, 2, 2)?;

        let out = drain(&fx.stage);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].second().map(|r| r.name.as_str()), Some("q/2"));
        assert_eq!(fx.stage.n_processed(), 4);
        assert_eq!(fx.stage.n_kept(), 2);
        Ok(())
    }

    #[test]
    fn test_short_reads_are_kept() -> anyhow::Result<()> {
        let fx = fixture(20, 8)?;
        feed(&fx, ReadBatch::Single(Read::new("s", "ACGT", "")));
        let upstream = Upstream::new(fx.feeder.signal(), Arc::clone(&fx.produced));
        fx.stage.start(upstream, 1, 1, 1)?;

        assert_eq!(drain(&fx.stage).len(), 1);
        fx.stage.check_and_rethrow()?;
        Ok(())
    }

    #[test]
    fn test_invalid_read_faults_one_worker_only() -> anyhow::Result<()> {
        let fx = fixture(4, 8)?;
        feed(&fx, ReadBatch::Single(Read::new("bad", "ACGT!ACGT", "")));
        feed(&fx, ReadBatch::Single(Read::new("ok", "CCCCAAAA", "")));
        let upstream = Upstream::new(fx.feeder.signal(), Arc::clone(&fx.produced));
        fx.stage.start(upstream, 5, 1, 2)?;

        let out = drain(&fx.stage);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].first().name, "ok");
        assert_eq!(fx.stage.n_processed(), 2);
        assert!(matches!(
            fx.stage.check_and_rethrow(),
            Err(PipelineError::InvalidSequence { symbol: '!', .. })
        ));
        fx.stage.check_and_rethrow()?;
        Ok(())
    }

    #[test]
    fn test_waits_for_running_upstream() -> anyhow::Result<()> {
        let fx = fixture(4, 8)?;
        fx.feeder.start(1, 1, Arc::new(Hold))?;
        let upstream = Upstream::new(fx.feeder.signal(), Arc::clone(&fx.produced));
        fx.stage.start(upstream, 5, 1, 1)?;

        thread::sleep(Duration::from_millis(20));
        assert!(fx.stage.is_running());
        assert!(!fx.stage.iter_stop());

        feed(&fx, ReadBatch::Single(Read::new("late", "ACGTACGT", "")));
        fx.feeder.stop();

        let out = drain(&fx.stage);
        assert_eq!(out.len(), 1);
        assert!(fx.stage.iter_stop());
        Ok(())
    }

    #[test]
    fn test_start_twice_rejected() -> anyhow::Result<()> {
        let fx = fixture(4, 8)?;
        fx.feeder.start(1, 1, Arc::new(Hold))?;
        let upstream = Upstream::new(fx.feeder.signal(), Arc::clone(&fx.produced));
        fx.stage.start(upstream.clone(), 5, 1, 1)?;
        assert!(matches!(fx.stage.start(upstream, 5, 1, 1), Err(PipelineError::StageState { .. })));
        fx.stage.stop();
        fx.feeder.stop();
        Ok(())
    }

    struct Hold;

    impl Consume for Hold {
        fn consume(&self, signal: &PoolSignal) -> Result<(), PipelineError> {
            while signal.is_running() {
                thread::yield_now();
            }
            Ok(())
        }
    }
}
