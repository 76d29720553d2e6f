use std::ops::Range;
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_distr::{Distribution, Normal};
use crate::config::defs::PipelineError;
use crate::streams::batch::Read;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DNA {
    A,
    C,
    G,
    T,
}

impl DNA {
    /// Convert nucleotide to its character representation.
    pub fn to_char(&self) -> char {
        match self {
            DNA::A => 'A',
            DNA::C => 'C',
            DNA::G => 'G',
            DNA::T => 'T',
        }
    }

    /// Get all possible nucleotides as a static slice.
    pub fn all() -> &'static [DNA] {
        &[DNA::A, DNA::C, DNA::G, DNA::T]
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> DNA {
        // all() is never empty
        *DNA::all().choose(rng).unwrap_or(&DNA::A)
    }

    /// Generate a random sequence of nucleotides of the given length.
    pub fn random_sequence<R: Rng + ?Sized>(length: usize, rng: &mut R) -> String {
        (0..length).map(|_| DNA::random(rng).to_char()).collect()
    }
}

fn phred33(score: u8) -> u8 {
    score + 33
}

fn normal_phred_qual<R: Rng + ?Sized>(normal: &Normal<f32>, rng: &mut R) -> u8 {
    let mut raw_phred = -1.0;
    while !(0.0..=40.0).contains(&raw_phred) {
        raw_phred = normal.sample(rng);
    }
    phred33(raw_phred as u8)
}

pub fn normal_phred_qual_string<R: Rng + ?Sized>(
    length: usize,
    mean: f32,
    stdev: f32,
    rng: &mut R,
) -> Result<String, PipelineError> {
    let normal = Normal::new(mean, stdev)
        .map_err(|e| PipelineError::InvalidConfig(format!("quality distribution: {}", e)))?;
    Ok((0..length).map(|_| normal_phred_qual(&normal, rng) as char).collect())
}

/// Simulated FASTQ reads named `<prefix>.<n>` for `n` in `range`, or
/// `<prefix>.<n>/1` and `/2` mates when `paired` is set.
pub fn simulate_reads<R: Rng + ?Sized>(
    range: Range<usize>,
    read_len: usize,
    paired: bool,
    prefix: &str,
    rng: &mut R,
) -> Result<Vec<Read>, PipelineError> {
    let mut reads = Vec::with_capacity(if paired { 2 * range.len() } else { range.len() });
    for i in range {
        if paired {
            for mate in 1..=2 {
                reads.push(Read::new(
                    format!("{}.{}/{}", prefix, i, mate),
                    DNA::random_sequence(read_len, rng),
                    normal_phred_qual_string(read_len, 30.0, 5.0, rng)?,
                ));
            }
        } else {
            reads.push(Read::new(
                format!("{}.{}", prefix, i),
                DNA::random_sequence(read_len, rng),
                normal_phred_qual_string(read_len, 30.0, 5.0, rng)?,
            ));
        }
    }
    Ok(reads)
}
