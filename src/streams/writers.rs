//! Stages that load reads into a counting table.
//!
//! Two layouts are supported:
//!
//! * parser -> [`HasherStage`] -> [`HashWriterStage`]: hashing and counting
//!   run in separate pools, connected by a queue of k-mer hash batches.
//! * parser -> [`SequenceWriterStage`]: each worker hashes and counts.
//!
//! All counters are in reads, like the parser's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use log::debug;
use crate::config::defs::PipelineError;
use crate::streams::batch::ReadBatch;
use crate::streams::exceptions::ExceptionRegistry;
use crate::streams::queue::BoundedQueue;
use crate::streams::stage::{
    consume_until_exhausted, Consumer, ConsumerProducerStage, ConsumerStage, InputPort, OutputPort,
    Producer, Stage, Upstream,
};
use crate::streams::worker::{Consume, PoolSignal, WorkerPool};
use crate::utils::kmer::{validate_ksize, HashIntoType, KmerCounter, KmerIterator};

/// Canonical k-mer hashes of every read in one [`ReadBatch`].
pub type KmerBatch = Vec<HashIntoType>;

pub struct HasherStage {
    stage: ConsumerProducerStage<ReadBatch, KmerBatch>,
    ksize: usize,
    n_hashed: Arc<AtomicU64>,
    n_emitted: Arc<AtomicU64>,
}

impl HasherStage {
    pub fn new(ksize: usize, exceptions: Arc<ExceptionRegistry>, capacity: usize) -> Result<Self, PipelineError> {
        validate_ksize(ksize)?;
        Ok(Self {
            stage: ConsumerProducerStage::new("hasher", exceptions, capacity),
            ksize,
            n_hashed: Arc::new(AtomicU64::new(0)),
            n_emitted: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn start(&self, upstream: Upstream, batch_size: u64, n_threads: usize) -> Result<(), PipelineError> {
        self.ensure_stopped("start")?;
        self.output().drain_and_discard();
        self.n_hashed.store(0, Ordering::SeqCst);
        self.n_emitted.store(0, Ordering::SeqCst);
        self.output_port().reset_count();

        let body = HashReads {
            ksize: self.ksize,
            input: self.input(),
            output: self.output(),
            upstream,
            n_hashed: Arc::clone(&self.n_hashed),
            n_emitted: Arc::clone(&self.n_emitted),
        };
        self.stage.pool().start(n_threads, batch_size, Arc::new(body))
    }

    /// Handle for the stage consuming the k-mer batches.
    pub fn upstream(&self) -> Upstream {
        Upstream::new(self.stage.pool().signal(), Arc::clone(&self.n_emitted))
    }

    pub fn n_hashed(&self) -> u64 {
        self.n_hashed.load(Ordering::SeqCst)
    }
}

impl Stage for HasherStage {
    fn pool(&self) -> &WorkerPool {
        self.stage.pool()
    }
}

impl Consumer<ReadBatch> for HasherStage {
    fn input_port(&self) -> &InputPort<ReadBatch> {
        self.stage.input_port()
    }
}

impl Producer<KmerBatch> for HasherStage {
    fn output_port(&self) -> &OutputPort<KmerBatch> {
        self.stage.output_port()
    }
}

struct HashReads {
    ksize: usize,
    input: Arc<BoundedQueue<ReadBatch>>,
    output: Arc<BoundedQueue<KmerBatch>>,
    upstream: Upstream,
    n_hashed: Arc<AtomicU64>,
    n_emitted: Arc<AtomicU64>,
}

impl Consume for HashReads {
    fn consume(&self, signal: &PoolSignal) -> Result<(), PipelineError> {
        consume_until_exhausted(signal, &self.input, &self.upstream, &self.n_hashed, |batch| {
            let mut kmers = KmerBatch::new();
            for read in batch.reads() {
                kmers.extend(KmerIterator::new(&read.sequence, self.ksize)?);
            }
            if self.output.push_while(kmers, || signal.is_running()).is_ok() {
                self.n_emitted.fetch_add(signal.batch_size(), Ordering::SeqCst);
            }
            Ok(())
        })
    }
}


/// Commits batches of k-mer hashes into the table.
pub struct HashWriterStage {
    stage: ConsumerStage<KmerBatch>,
    table: Arc<dyn KmerCounter>,
    n_written: Arc<AtomicU64>,
    n_kmers: Arc<AtomicU64>,
}

impl HashWriterStage {
    pub fn new(table: Arc<dyn KmerCounter>, exceptions: Arc<ExceptionRegistry>, capacity: usize) -> Self {
        Self {
            stage: ConsumerStage::new("hash-writer", exceptions, capacity),
            table,
            n_written: Arc::new(AtomicU64::new(0)),
            n_kmers: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&self, upstream: Upstream, batch_size: u64, n_threads: usize) -> Result<(), PipelineError> {
        self.ensure_stopped("start")?;
        self.n_written.store(0, Ordering::SeqCst);
        self.n_kmers.store(0, Ordering::SeqCst);

        let body = WriteHashes {
            table: Arc::clone(&self.table),
            input: self.input(),
            upstream,
            n_written: Arc::clone(&self.n_written),
            n_kmers: Arc::clone(&self.n_kmers),
        };
        self.stage.pool().start(n_threads, batch_size, Arc::new(body))
    }

    pub fn n_written(&self) -> u64 {
        self.n_written.load(Ordering::SeqCst)
    }

    pub fn n_kmers_written(&self) -> u64 {
        self.n_kmers.load(Ordering::SeqCst)
    }
}

impl Stage for HashWriterStage {
    fn pool(&self) -> &WorkerPool {
        self.stage.pool()
    }
}

impl Consumer<KmerBatch> for HashWriterStage {
    fn input_port(&self) -> &InputPort<KmerBatch> {
        self.stage.input_port()
    }
}

struct WriteHashes {
    table: Arc<dyn KmerCounter>,
    input: Arc<BoundedQueue<KmerBatch>>,
    upstream: Upstream,
    n_written: Arc<AtomicU64>,
    n_kmers: Arc<AtomicU64>,
}

impl Consume for WriteHashes {
    fn consume(&self, signal: &PoolSignal) -> Result<(), PipelineError> {
        consume_until_exhausted(signal, &self.input, &self.upstream, &self.n_written, |kmers| {
            for &kmer in &kmers {
                self.table.count(kmer)?;
                self.n_kmers.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        })
    }
}


/// Hashes and counts whole reads in one step.
pub struct SequenceWriterStage {
    stage: ConsumerStage<ReadBatch>,
    table: Arc<dyn KmerCounter>,
    n_written: Arc<AtomicU64>,
    n_kmers: Arc<AtomicU64>,
}

impl SequenceWriterStage {
    pub fn new(table: Arc<dyn KmerCounter>, exceptions: Arc<ExceptionRegistry>, capacity: usize) -> Self {
        Self {
            stage: ConsumerStage::new("sequence-writer", exceptions, capacity),
            table,
            n_written: Arc::new(AtomicU64::new(0)),
            n_kmers: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&self, upstream: Upstream, batch_size: u64, n_threads: usize) -> Result<(), PipelineError> {
        self.ensure_stopped("start")?;
        self.n_written.store(0, Ordering::SeqCst);
        self.n_kmers.store(0, Ordering::SeqCst);

        let body = WriteSequences {
            table: Arc::clone(&self.table),
            input: self.input(),
            upstream,
            n_written: Arc::clone(&self.n_written),
            n_kmers: Arc::clone(&self.n_kmers),
        };
        debug!("Counting reads directly into a k = {} table", self.table.ksize());
        self.stage.pool().start(n_threads, batch_size, Arc::new(body))
    }

    pub fn n_written(&self) -> u64 {
        self.n_written.load(Ordering::SeqCst)
    }

    pub fn n_kmers_written(&self) -> u64 {
        self.n_kmers.load(Ordering::SeqCst)
    }
}

impl Stage for SequenceWriterStage {
    fn pool(&self) -> &WorkerPool {
        self.stage.pool()
    }
}

impl Consumer<ReadBatch> for SequenceWriterStage {
    fn input_port(&self) -> &InputPort<ReadBatch> {
        self.stage.input_port()
    }
}

struct WriteSequences {
    table: Arc<dyn KmerCounter>,
    input: Arc<BoundedQueue<ReadBatch>>,
    upstream: Upstream,
    n_written: Arc<AtomicU64>,
    n_kmers: Arc<AtomicU64>,
}

impl Consume for WriteSequences {
    fn consume(&self, signal: &PoolSignal) -> Result<(), PipelineError> {
        consume_until_exhausted(signal, &self.input, &self.upstream, &self.n_written, |batch| {
            for read in batch.reads() {
                let n = self.table.count_sequence(&read.sequence)?;
                self.n_kmers.fetch_add(n, Ordering::Relaxed);
            }
            Ok(())
        })
    }
}
