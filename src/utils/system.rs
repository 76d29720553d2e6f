// src/utils/system.rs: System functions

use std::time::Duration;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::time::sleep;
use anyhow::{anyhow, Result};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::defs::{MAX_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY};


/// Determines number of cores that can be used for CPU based tasks
///
/// # Arguments
///
/// * `args_threads` - Thread count requested on the command line
///
/// # Returns
///
/// Result<(usize, f32)> maximum cores, current cpu usage
pub async fn detect_cores_and_load(args_threads: usize) -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(Default::default());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or(1);
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    sleep(Duration::from_millis(100)).await;
    let cpu_load = system.global_cpu_usage();
    let max_cores = physical_cores.min(args_threads).max(1);
    Ok((max_cores, cpu_load))
}


/// Number of workers for the parallel stage. The parser stage always runs a
/// single worker and is not counted here.
///
/// # Arguments
///
/// * `max_cores` - Usable cores from detect_cores_and_load
/// * `cpu_load` - Estimate of load on CPU from detect_cores_and_load
///
/// # Returns
///
/// usize worker threads, at least 1
pub fn compute_worker_threads(max_cores: usize, cpu_load: f32) -> usize {
    let workers = if cpu_load > 75.0 {
        max_cores / 2
    } else {
        max_cores.saturating_sub(1)
    };
    workers.max(1)
}


/// Finds the amount of total and available RAM, keyed to OS
///
/// # Returns
///
/// Result<(u64, u64)> total ram, available ram
pub fn detect_ram() -> Result<(u64, u64)> {
    let (total_ram, available_ram) = if cfg!(target_os = "macos") {
        let refresh_kind = RefreshKind::nothing().with_memory(Default::default());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory_specifics(MemoryRefreshKind::everything());
        let total = system.total_memory();
        let used = system.used_memory();
        (total, total.saturating_sub(used))
    } else {
        let mut system = System::new_with_specifics(RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()));
        system.refresh_memory();
        (system.total_memory(), system.available_memory())
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }

    Ok((total_ram, available_ram))
}


/// Computes the capacity of each inter-stage queue from available RAM.
///
/// # Arguments
///
/// * `available_ram` - Usable RAM in bytes
/// * `n_queues` - Number of queues alive at once
///
/// # Returns
///
/// usize capacity in items, clamped to [MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY]
pub fn compute_queue_capacity(available_ram: u64, n_queues: usize) -> usize {
    let record_size = 1_000u64; // ~1KB per short read pair
    let budget = available_ram / 10;
    let capacity = (budget / record_size / n_queues.max(1) as u64) as usize;

    if capacity < MIN_QUEUE_CAPACITY {
        warn!(
            "Low available RAM ({} MiB); using minimal queue capacity {}",
            available_ram / 1_048_576,
            MIN_QUEUE_CAPACITY
        );
    }
    let capacity = capacity.clamp(MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY);
    debug!("Computed queue capacity: {} items for {} queue(s)", capacity, n_queues);
    capacity
}


/// Creates a project-wide RNG from the system, using entropy pool. Optional seed for
/// reproducibility.
///
/// # Arguments
///
///  * `seed` - Seed number that allows reproducible results.
///
/// # Returns
///
/// A StdRng
pub fn generate_rng(seed: Option<u64>) -> StdRng {
    let seed = seed.unwrap_or_else(|| rand::rng().random::<u64>());
    debug!("RNG seed: {}", seed);
    StdRng::seed_from_u64(seed)
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_queue_capacity_clamped() {
        assert_eq!(compute_queue_capacity(0, 2), MIN_QUEUE_CAPACITY);
        assert_eq!(compute_queue_capacity(u64::MAX, 1), MAX_QUEUE_CAPACITY);
        // 10 GiB -> 1 GiB budget -> ~1M records over two queues
        let mid = compute_queue_capacity(10 * 1_073_741_824, 2);
        assert!(mid > MIN_QUEUE_CAPACITY && mid < MAX_QUEUE_CAPACITY);
    }

    #[test]
    fn test_worker_threads_at_least_one() {
        assert_eq!(compute_worker_threads(1, 0.0), 1);
        assert_eq!(compute_worker_threads(8, 10.0), 7);
        assert_eq!(compute_worker_threads(8, 90.0), 4);
    }

    #[test]
    fn test_seeded_rng_repeats() {
        assert_eq!(generate_rng(Some(11)).next_u64(), generate_rng(Some(11)).next_u64());
    }

    #[tokio::test]
    async fn test_detect_cores_respects_request() -> Result<()> {
        let (cores, _) = detect_cores_and_load(1).await?;
        assert_eq!(cores, 1);
        Ok(())
    }
}
