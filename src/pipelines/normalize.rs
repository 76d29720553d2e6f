use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, info};
use crate::config::defs::{PipelineError, RunConfig, KEEP_SUFFIX};
use crate::streams::controller::{PipelineController, PipelineStats};
use crate::streams::diginorm::DiginormStage;
use crate::utils::fastx::{fastx_filetype, sample_base, FastxFormat, WriteToFile};
use crate::utils::file::FileWriter;
use crate::utils::kmer::KmerCountTable;
use crate::utils::stats::percent_kept;
use crate::pipelines::{resolve_input, run_blocking};

#[derive(Debug, Clone)]
pub struct NormalizeSettings {
    pub ksize: usize,
    pub cutoff: u32,
    pub paired: bool,
    pub n_threads: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct NormalizeSummary {
    pub stats: PipelineStats,
    pub n_unique_kmers: u64,
    pub out_path: PathBuf,
}

/// `<out_dir>/<sample>.keep.fq.gz`, or `.keep.fa.gz` for FASTA input.
pub fn keep_path(input: &Path, out_dir: &Path) -> Result<PathBuf, PipelineError> {
    let ext = match fastx_filetype(input)? {
        FastxFormat::Fasta => "fa.gz",
        FastxFormat::Fastq => "fq.gz",
    };
    Ok(out_dir.join(format!("{}.{}.{}", sample_base(input), KEEP_SUFFIX, ext)))
}

/// Normalizes `input` by median k-mer abundance, writing kept reads to
/// `output`. Blocks until the pipeline has drained.
pub fn normalize_file(input: &Path, output: &Path, settings: &NormalizeSettings) -> Result<NormalizeSummary, PipelineError> {
    let table = Arc::new(KmerCountTable::new(settings.ksize)?);
    let controller = PipelineController::diginorm(table.clone(), settings.queue_capacity)?;
    let mut writer = FileWriter::create(output)?;

    controller.start_diginorm(input, settings.cutoff, settings.paired, settings.n_threads)?;
    let drained = write_kept(&controller, &mut writer);
    controller.stop();
    drained?;
    controller.check_and_rethrow()?;
    writer.finish()?;

    let stats = controller.stats();
    debug!("Normalize counters: {}", stats);
    Ok(NormalizeSummary {
        stats,
        n_unique_kmers: table.n_unique_kmers(),
        out_path: output.to_path_buf(),
    })
}

fn write_kept(controller: &PipelineController<DiginormStage>, writer: &mut FileWriter) -> Result<(), PipelineError> {
    while let Some(batch) = controller.try_next()? {
        batch.write_to_file(writer)?;
    }
    Ok(())
}

/// Run function for the normalize-by-median workflow
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
///
/// # Returns
/// Result<(), PipelineError>
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let input = resolve_input(&config)?;
    let output = keep_path(&input, &config.out_dir)?;
    let settings = NormalizeSettings {
        ksize: config.args.ksize,
        cutoff: config.args.cutoff,
        paired: config.args.paired,
        n_threads: config.worker_threads,
        queue_capacity: config.queue_capacity,
    };
    info!(
        "Normalizing {} to median k-mer abundance < {} (k = {}, {} worker(s))",
        input.display(),
        settings.cutoff,
        settings.ksize,
        settings.n_threads
    );

    let summary = run_blocking("normalize", move || normalize_file(&input, &output, &settings)).await?;

    let stats = summary.stats;
    info!("Processed {} reads; kept {} ({:.2}%), discarded {}",
          stats.n_processed, stats.n_kept, percent_kept(stats.n_kept, stats.n_processed), stats.n_discarded);
    info!("Counting table holds {} unique k-mers", summary.n_unique_kmers);
    info!("Kept reads written to {}", summary.out_path.display());
    Ok(())
}
