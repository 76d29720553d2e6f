//! Parser plus one processing stage, driven by pulling finished batches.
//!
//! ```text
//! file -> ParserStage (1 thread) -> queue -> processor (N threads) -> queue -> next()
//! ```
//!
//! Faults raised by any worker are kept in the shared [`ExceptionRegistry`];
//! callers should poll [`PipelineController::check_and_rethrow`] while
//! iterating and after [`PipelineController::stop`], since a stage whose
//! workers all faulted drains exactly like one that finished.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use log::debug;
use crate::config::defs::{PipelineError, PAIRED_BATCH_SIZE, UNPAIRED_BATCH_SIZE};
use crate::streams::batch::ReadBatch;
use crate::streams::diginorm::DiginormStage;
use crate::streams::exceptions::ExceptionRegistry;
use crate::streams::parser::ParserStage;
use crate::streams::stage::{Consumer, Producer, Stage, Upstream};
use crate::utils::fastx::ReadParser;
use crate::utils::kmer::KmerCounter;

/// A stage that turns parsed batches into output batches.
pub trait ReadProcessor: Consumer<ReadBatch> + Producer<ReadBatch> {
    /// Starts the stage's workers against `upstream`, which feeds its input.
    fn launch(&self, upstream: Upstream, batch_size: u64, n_threads: usize) -> Result<(), PipelineError>;

    fn n_processed(&self) -> u64;

    fn n_kept(&self) -> u64;

    /// True once the stage will never emit again and its output is drained.
    fn iter_stop(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub n_parsed: u64,
    pub n_processed: u64,
    pub n_kept: u64,
    pub n_discarded: u64,
    pub n_emitted: u64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parsed {}, processed {}, kept {}, discarded {}, emitted {}",
            self.n_parsed, self.n_processed, self.n_kept, self.n_discarded, self.n_emitted
        )
    }
}

pub struct PipelineController<S> {
    parser: ParserStage,
    stage: S,
    exceptions: Arc<ExceptionRegistry>,
}

impl<S: ReadProcessor> PipelineController<S> {
    /// Wires a new parser in front of `stage`. The parser reports into the
    /// stage's exception registry.
    pub fn new(stage: S, capacity: usize) -> Result<Self, PipelineError> {
        let exceptions = Arc::clone(stage.pool().exceptions());
        let parser = ParserStage::new(Arc::clone(&exceptions), capacity);
        stage.set_input(parser.output())?;
        Ok(Self { parser, stage, exceptions })
    }

    /// Starts the parser over `parser`, then `n_threads` processing workers.
    pub fn start<P: ReadParser + 'static>(&self, parser: P, paired: bool, n_threads: usize) -> Result<(), PipelineError> {
        self.stage.ensure_stopped("start")?;
        self.parser.start(parser, paired)?;
        self.launch_stage(paired, n_threads)
    }

    pub fn start_file(&self, path: &Path, paired: bool, n_threads: usize) -> Result<(), PipelineError> {
        self.stage.ensure_stopped("start")?;
        self.parser.start_file(path, paired)?;
        self.launch_stage(paired, n_threads)
    }

    fn launch_stage(&self, paired: bool, n_threads: usize) -> Result<(), PipelineError> {
        let batch_size = if paired { PAIRED_BATCH_SIZE } else { UNPAIRED_BATCH_SIZE };
        if let Err(e) = self.stage.launch(self.parser.upstream(), batch_size, n_threads) {
            self.parser.stop();
            return Err(e);
        }
        debug!("Pipeline running with {} processing worker(s)", n_threads);
        Ok(())
    }

    /// Stops the parser, then the processing stage. Blocks until every
    /// worker has exited, then discards whatever is still queued so a later
    /// start never hands out batches from this run.
    pub fn stop(&self) {
        self.parser.stop();
        self.stage.stop();
        let n_input = self.parser.output().drain_and_discard();
        let n_output = self.stage.output().drain_and_discard();
        if n_input + n_output > 0 {
            debug!("Discarded {} parsed and {} finished batch(es) on stop", n_input, n_output);
        }
    }

    /// Next finished batch, or `None` once the pipeline has fully drained.
    /// Spins while the queue is only temporarily empty.
    pub fn next_batch(&self) -> Option<ReadBatch> {
        loop {
            if let Some(batch) = self.stage.try_emit() {
                return Some(batch);
            }
            if self.stage.iter_stop() {
                return self.stage.try_emit();
            }
            thread::yield_now();
        }
    }

    /// Like [`Self::next_batch`], but surfaces a captured fault first.
    pub fn try_next(&self) -> Result<Option<ReadBatch>, PipelineError> {
        self.check_and_rethrow()?;
        Ok(self.next_batch())
    }

    pub fn iter_stop(&self) -> bool {
        self.stage.iter_stop()
    }

    pub fn check_and_rethrow(&self) -> Result<(), PipelineError> {
        self.exceptions.check_and_rethrow()
    }

    pub fn exceptions(&self) -> &Arc<ExceptionRegistry> {
        &self.exceptions
    }

    pub fn parser(&self) -> &ParserStage {
        &self.parser
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn n_parsed(&self) -> u64 {
        self.parser.n_parsed()
    }

    pub fn n_processed(&self) -> u64 {
        self.stage.n_processed()
    }

    pub fn n_kept(&self) -> u64 {
        self.stage.n_kept()
    }

    pub fn n_discarded(&self) -> u64 {
        self.n_processed().saturating_sub(self.n_kept())
    }

    pub fn stats(&self) -> PipelineStats {
        let n_processed = self.n_processed();
        let n_kept = self.n_kept();
        PipelineStats {
            n_parsed: self.n_parsed(),
            n_processed,
            n_kept,
            n_discarded: n_processed.saturating_sub(n_kept),
            n_emitted: self.stage.n_popped(),
        }
    }
}

impl<S: ReadProcessor> Iterator for PipelineController<S> {
    type Item = ReadBatch;

    fn next(&mut self) -> Option<ReadBatch> {
        self.next_batch()
    }
}

impl PipelineController<DiginormStage> {
    /// A normalize-by-median pipeline over `table`.
    pub fn diginorm(table: Arc<dyn KmerCounter>, capacity: usize) -> Result<Self, PipelineError> {
        let stage = DiginormStage::new(table, Arc::new(ExceptionRegistry::new()), capacity);
        Self::new(stage, capacity)
    }

    /// Starts normalizing `path`, keeping reads with median k-mer count
    /// below `cutoff`.
    pub fn start_diginorm(&self, path: &Path, cutoff: u32, paired: bool, n_threads: usize) -> Result<(), PipelineError> {
        self.stage.set_cutoff(cutoff);
        self.start_file(path, paired, n_threads)
    }
}
