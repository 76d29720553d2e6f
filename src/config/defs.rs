use std::path::PathBuf;
use log::LevelFilter;
use thiserror::Error;
use crate::cli::Arguments;

// Queue sizing
pub const DEFAULT_QUEUE_CAPACITY: usize = 50_000;
pub const MIN_QUEUE_CAPACITY: usize = 1_000;
pub const MAX_QUEUE_CAPACITY: usize = 5_000_000;

// Digital normalization defaults
pub const DEFAULT_KSIZE: usize = 20;
pub const DEFAULT_CUTOFF: u32 = 20;
pub const MAX_KSIZE: usize = 32;

// Hash table
pub const COUNT_TABLE_SHARDS: usize = 64;

// Batch sizes
pub const UNPAIRED_BATCH_SIZE: u64 = 1;
pub const PAIRED_BATCH_SIZE: u64 = 2;

// File types
pub const GZIP_EXT: &str = "gz";
pub const FASTA_TAG : &str = "fasta";
pub const FASTQ_TAG : &str = "fastq";
pub const FASTA_EXTS: &[&'static str] = &["fasta", "fa", "fna", "faa", "ffn", "frn"];
pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];

// Static Filenames
pub const KEEP_SUFFIX: &str = "keep";

// Modules
pub const NORMALIZE_MODULE: &str = "normalize";
pub const COUNT_MODULE: &str = "count";
pub const SIMULATE_MODULE: &str = "simulate";


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid FASTX format: {0}")]
    InvalidFastxFormat(String),

    #[error("Unpaired reads when require_paired is set: {0}")]
    UnpairedReads(String),

    #[error("Invalid sequence: unexpected symbol '{symbol}' at position {position}")]
    InvalidSequence { symbol: char, position: usize },

    #[error("Sequence of length {length} is shorter than k ({ksize}); no k-mer counts")]
    SequenceTooShort { length: usize, ksize: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stage '{stage}' cannot {action} while {state}")]
    StageState { stage: String, action: String, state: String },

    #[error("Worker thread in stage '{stage}' panicked: {message}")]
    WorkerPanic { stage: String, message: String },

    /// Raised by pluggable `KmerCounter` backends; the in-memory table never fails.
    #[error("Counting error: {0}")]
    Counting(String),
}


pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub worker_threads: usize,
    pub queue_capacity: usize,
    pub log_level: LevelFilter,
}
