pub mod count;
pub mod normalize;
pub mod simulate;

use std::path::PathBuf;
use crate::config::defs::{PipelineError, RunConfig};
use crate::utils::file::file_path_manipulator;

/// Resolves `--file1` against the working directory and checks it exists.
pub(crate) fn resolve_input(config: &RunConfig) -> Result<PathBuf, PipelineError> {
    let file1 = config
        .args
        .file1
        .as_ref()
        .ok_or_else(|| PipelineError::InvalidConfig("input file (-i) is required".to_string()))?;
    let path = file_path_manipulator(&PathBuf::from(file1), Some(&config.cwd), None, None, "");
    if !path.exists() {
        return Err(PipelineError::InvalidConfig(format!("cannot find input file {}", path.display())));
    }
    Ok(path)
}

/// Runs blocking stage work off the async runtime.
pub(crate) async fn run_blocking<T, F>(name: &str, work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::WorkerPanic {
            stage: name.to_string(),
            message: e.to_string(),
        })?
}
