use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, info};
use crate::config::defs::{PipelineError, RunConfig, PAIRED_BATCH_SIZE, UNPAIRED_BATCH_SIZE};
use crate::streams::exceptions::ExceptionRegistry;
use crate::streams::parser::ParserStage;
use crate::streams::stage::{Consumer, Producer, Stage};
use crate::streams::writers::{HashWriterStage, HasherStage, SequenceWriterStage};
use crate::utils::fastx::sample_base;
use crate::utils::file::FileWriter;
use crate::utils::kmer::KmerCountTable;
use crate::pipelines::{resolve_input, run_blocking};

#[derive(Debug, Clone)]
pub struct CountSettings {
    pub ksize: usize,
    pub paired: bool,
    pub n_threads: usize,
    pub queue_capacity: usize,
    /// Count in the workers that pull reads instead of in a separate hashing stage.
    pub direct: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountSummary {
    pub n_parsed: u64,
    pub n_written: u64,
    pub n_kmers: u64,
    pub n_unique_kmers: u64,
}

/// Loads every k-mer of `input` into a fresh table.
pub fn count_file(input: &Path, settings: &CountSettings) -> Result<(CountSummary, Arc<KmerCountTable>), PipelineError> {
    let table = Arc::new(KmerCountTable::new(settings.ksize)?);
    let exceptions = Arc::new(ExceptionRegistry::new());
    let parser = ParserStage::new(Arc::clone(&exceptions), settings.queue_capacity);
    let batch_size = if settings.paired { PAIRED_BATCH_SIZE } else { UNPAIRED_BATCH_SIZE };

    let (n_written, n_kmers) = if settings.direct {
        let writer = SequenceWriterStage::new(table.clone(), Arc::clone(&exceptions), settings.queue_capacity);
        writer.set_input(parser.output())?;

        parser.start_file(input, settings.paired)?;
        if let Err(e) = writer.start(parser.upstream(), batch_size, settings.n_threads) {
            parser.stop();
            return Err(e);
        }
        writer.join();
        parser.stop();
        (writer.n_written(), writer.n_kmers_written())
    } else {
        // hashing and counting split the workers between them
        let n_hashers = (settings.n_threads / 2).max(1);
        let n_writers = settings.n_threads.saturating_sub(n_hashers).max(1);
        let hasher = HasherStage::new(settings.ksize, Arc::clone(&exceptions), settings.queue_capacity)?;
        let writer = HashWriterStage::new(table.clone(), Arc::clone(&exceptions), settings.queue_capacity);
        hasher.set_input(parser.output())?;
        writer.set_input(hasher.output())?;

        parser.start_file(input, settings.paired)?;
        let started = hasher
            .start(parser.upstream(), batch_size, n_hashers)
            .and_then(|_| writer.start(hasher.upstream(), batch_size, n_writers));
        if let Err(e) = started {
            parser.stop();
            hasher.stop();
            return Err(e);
        }
        writer.join();
        hasher.stop();
        parser.stop();
        debug!("Hashed {} reads in {} worker(s)", hasher.n_hashed(), n_hashers);
        (writer.n_written(), writer.n_kmers_written())
    };

    exceptions.check_and_rethrow()?;

    let summary = CountSummary {
        n_parsed: parser.n_parsed(),
        n_written,
        n_kmers,
        n_unique_kmers: table.n_unique_kmers(),
    };
    Ok((summary, table))
}

/// Writes `abundance<TAB>n_kmers` lines, lowest abundance first.
pub fn write_histogram(histogram: &BTreeMap<u32, u64>, path: &Path) -> Result<(), PipelineError> {
    let mut writer = FileWriter::create(path)?;
    writeln!(writer, "abundance\tn_kmers")?;
    for (abundance, n_kmers) in histogram {
        writeln!(writer, "{}\t{}", abundance, n_kmers)?;
    }
    writer.finish()?;
    Ok(())
}

/// Run function for the k-mer counting workflow
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
///
/// # Returns
/// Result<(), PipelineError>
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let input = resolve_input(&config)?;
    let hist_path: PathBuf = config.out_dir.join(format!("{}.kmer_hist.tsv", sample_base(&input)));
    let settings = CountSettings {
        ksize: config.args.ksize,
        paired: config.args.paired,
        n_threads: config.worker_threads,
        queue_capacity: config.queue_capacity,
        direct: config.args.direct,
    };
    info!(
        "Counting {}-mers in {} ({})",
        settings.ksize,
        input.display(),
        if settings.direct { "direct" } else { "hasher + writer" }
    );

    let (summary, hist_path) = run_blocking("count", move || {
        let (summary, table) = count_file(&input, &settings)?;
        let hist = table.abundance_histogram();
        write_histogram(&hist, &hist_path)?;
        Ok((summary, hist_path))
    })
    .await?;

    info!("Parsed {} reads; counted {} k-mers from {} reads", summary.n_parsed, summary.n_kmers, summary.n_written);
    info!("{} unique k-mers; abundance histogram written to {}", summary.n_unique_kmers, hist_path.display());
    Ok(())
}
