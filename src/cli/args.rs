use clap::Parser;
use crate::config::defs::{DEFAULT_CUTOFF, DEFAULT_KSIZE};

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "kmer-pipelines", version = "0.1")]
pub struct Arguments {

    #[arg(short, long, help = "Workflow to run: normalize, count or simulate")]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'i', long = "file1")]
    pub file1: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. If not specified, a directory named '<sample_base>_YYYYMMDD' will be created in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(short = 'p', long, default_value_t = false, help = "Treat input as interleaved read pairs; pairs are kept or discarded together")]
    pub paired: bool,

    #[arg(short = 'C', long, default_value_t = DEFAULT_CUTOFF, help = "Keep a read only while its median k-mer abundance is below this cutoff")]
    pub cutoff: u32,

    #[arg(short = 'k', long, default_value_t = DEFAULT_KSIZE)]
    pub ksize: usize,

    #[arg(long, default_value_t = 8)]
    pub threads: usize,

    #[arg(long, help = "Capacity of each inter-stage queue; defaults to a RAM-derived size")]
    pub queue_capacity: Option<usize>,

    #[arg(long, default_value_t = false, help = "count: feed reads straight into the table instead of through a hashing stage")]
    pub direct: bool,

    #[arg(long, default_value_t = 10_000)]
    pub num_reads: usize,

    #[arg(long, default_value_t = 150)]
    pub read_len: usize,

    #[clap(long, help = "Optional fixed seed for reproducibility; defaults to OS entropy")]
    pub seed: Option<u64>,
}
