//! Summary statistics over the k-mer counts of a single sequence.

/// Abundance summary of one sequence's k-mers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MedianCount {
    pub median: u32,
    pub mean: f32,
    pub stddev: f32,
}


/// Computes median, mean and population standard deviation of k-mer counts.
///
/// The median is always a member of the population: after sorting, the
/// element at `len / 2` is taken, so even-length inputs round down to the
/// upper-middle element.
///
/// # Arguments
///
/// - `counts`: Per-k-mer counts for one sequence. Sorted in place.
///
/// # Returns
///
/// `None` when `counts` is empty, otherwise the summary.
pub fn median_mean_stddev(counts: &mut [u32]) -> Option<MedianCount> {
    if counts.is_empty() {
        return None;
    }

    let n = counts.len() as f32;
    let mean = counts.iter().map(|&c| c as f32).sum::<f32>() / n;
    let variance = counts
        .iter()
        .map(|&c| {
            let d = c as f32 - mean;
            d * d
        })
        .sum::<f32>()
        / n;

    counts.sort_unstable();
    let median = counts[counts.len() / 2];

    Some(MedianCount {
        median,
        mean,
        stddev: variance.sqrt(),
    })
}


/// Helper function to compute the fraction of processed reads kept.
///
/// # Arguments
///
/// - `kept`: Reads kept by a filter.
/// - `processed`: Reads that went through the filter.
///
/// # Returns
///
/// Percentage in [0, 100]; 0 when nothing was processed.
pub fn percent_kept(kept: u64, processed: u64) -> f64 {
    if processed == 0 {
        return 0.0;
    }
    kept as f64 / processed as f64 * 100.0
}
