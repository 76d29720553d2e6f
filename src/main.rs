use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use std::{env, fs};

use anyhow::Result;
use chrono::DateTime;
use env_logger::Builder;
use log::{LevelFilter, debug, error, info, warn};

use kmer_pipelines::cli::{self, parse};
use kmer_pipelines::config::defs::{
    PipelineError, RunConfig, COUNT_MODULE, DEFAULT_QUEUE_CAPACITY, NORMALIZE_MODULE, SIMULATE_MODULE,
};
use kmer_pipelines::pipelines::{count, normalize, simulate};
use kmer_pipelines::utils::fastx::sample_base;
use kmer_pipelines::utils::file::file_path_manipulator;
use kmer_pipelines::utils::system::{compute_queue_capacity, compute_worker_threads, detect_cores_and_load, detect_ram};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n kmer-pipelines\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    let (max_cores, cpu_load) = detect_cores_and_load(args.threads).await?;
    let worker_threads = compute_worker_threads(max_cores, cpu_load);
    debug!("Detected {} usable cores; CPU load {}%; using {} processing worker(s) plus the parser",
              max_cores, cpu_load, worker_threads);

    let queue_capacity = match args.queue_capacity {
        Some(capacity) => capacity.max(1),
        None => match detect_ram() {
            Ok((total_ram, available_ram)) => {
                debug!("Available RAM: {} bytes (~{} GiB)", available_ram, available_ram / 1_073_741_824);
                debug!("Total RAM: {} bytes (~{} GiB)", total_ram, total_ram / 1_073_741_824);
                compute_queue_capacity(available_ram, 2)
            }
            Err(e) => {
                warn!("{}; using default queue capacity {}", e, DEFAULT_QUEUE_CAPACITY);
                DEFAULT_QUEUE_CAPACITY
            }
        },
    };

    let out_dir = setup_output_dir(&args, &dir)?;
    info!("Output directory: {}", out_dir.display());
    let module = args.module.clone();
    let run_config = Arc::new(RunConfig {
        cwd: dir,
        out_dir,
        args,
        worker_threads,
        queue_capacity,
        log_level,
    });

    if let Err(e) = match module.as_str() {
        NORMALIZE_MODULE => normalize::run(run_config).await,
        COUNT_MODULE => count::run(run_config).await,
        SIMULATE_MODULE => simulate::run(run_config).await,
        _ => Err(PipelineError::InvalidConfig(format!("Invalid module: {}", module))),
    } {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


/// Output directory for the run: `--out-dir` (relative paths resolved
/// against `cwd`), or `<sample_base>_YYYYMMDD` named after file 1, or after
/// the module when no input is given. Created if missing.
fn setup_output_dir(args: &cli::Arguments, cwd: &Path) -> Result<PathBuf> {
    let out_dir = match &args.out_dir {
        Some(out) => {
            let path = PathBuf::from(out);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        }
        None => {
            let dir_base = match &args.file1 {
                Some(file) => {
                    let file1_full_path = file_path_manipulator(&PathBuf::from(file), Some(cwd), None, None, "");
                    if !file1_full_path.exists() {
                        return Err(anyhow::anyhow!("Cannot find file 1 (-i)"));
                    }
                    sample_base(&file1_full_path)
                }
                None => args.module.clone(),
            };

            let timestamp = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .ok()
                .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, 0))
                .map(|dt| dt.format("%Y%m%d").to_string())
                .unwrap_or_else(|| "19700101".to_string());
            cwd.join(format!("{}_{}", dir_base, timestamp))
        }
    };
    fs::create_dir_all(&out_dir)?;
    Ok(out_dir)
}
