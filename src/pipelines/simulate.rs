use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::info;
use rand::Rng;
use crate::config::defs::{PipelineError, RunConfig};
use crate::utils::fastx::WriteToFile;
use crate::utils::file::FileWriter;
use crate::utils::sequence::simulate_reads;
use crate::utils::system::generate_rng;
use crate::pipelines::run_blocking;

const READS_PER_CHUNK: usize = 10_000;

/// Writes `n_reads` random FASTQ reads (pairs, interleaved, if `paired`) to
/// `path`, generating them in chunks. Returns the number of records written.
pub fn simulate_file<R: Rng + ?Sized>(
    path: &Path,
    n_reads: usize,
    read_len: usize,
    paired: bool,
    rng: &mut R,
) -> Result<u64, PipelineError> {
    let mut writer = FileWriter::create(path)?;
    let mut n_written = 0u64;
    let mut remaining = n_reads;

    while remaining > 0 {
        let chunk = remaining.min(READS_PER_CHUNK);
        let start = n_reads - remaining;
        for read in simulate_reads(start..start + chunk, read_len, paired, "sim", rng)? {
            read.write_to_file(&mut writer)?;
            n_written += 1;
        }
        remaining -= chunk;
    }

    writer.finish()?;
    Ok(n_written)
}

/// Run function for the read simulation workflow
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
///
/// # Returns
/// Result<(), PipelineError>
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let path: PathBuf = config.out_dir.join("simulated.fq.gz");
    let n_reads = config.args.num_reads;
    let read_len = config.args.read_len;
    let paired = config.args.paired;
    let seed = config.args.seed;

    let out = path.clone();
    let n_written = run_blocking("simulate", move || {
        let mut rng = generate_rng(seed);
        simulate_file(&out, n_reads, read_len, paired, &mut rng)
    })
    .await?;

    info!("Wrote {} simulated reads of length {} to {}", n_written, read_len, path.display());
    Ok(())
}
