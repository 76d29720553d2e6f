//! K-mer decomposition and the counting table the pipeline stages share.
//!
//! K-mers are 2-bit encoded (A=0, C=1, G=2, T=3) and reduced to their
//! canonical form, the smaller of the forward and reverse-complement
//! encodings, so a read and its reverse complement hit the same counters.
//! `N` is read as `A`; any other non-ACGT symbol is an error.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use fxhash::FxHashMap;
use crate::config::defs::{PipelineError, COUNT_TABLE_SHARDS, MAX_KSIZE};
use crate::utils::stats::{median_mean_stddev, MedianCount};

pub type HashIntoType = u64;

fn encode(symbol: u8, position: usize) -> Result<u8, PipelineError> {
    match symbol {
        b'A' | b'a' | b'N' | b'n' => Ok(0),
        b'C' | b'c' => Ok(1),
        b'G' | b'g' => Ok(2),
        b'T' | b't' => Ok(3),
        _ => Err(PipelineError::InvalidSequence { symbol: symbol as char, position }),
    }
}

/// Rolling iterator over the canonical k-mer hashes of a sequence.
#[derive(Debug, Clone)]
pub struct KmerIterator {
    codes: Vec<u8>,
    ksize: usize,
    pos: usize,
    fwd: u64,
    rev: u64,
    mask: u64,
}

impl KmerIterator {
    pub fn new(sequence: &str, ksize: usize) -> Result<Self, PipelineError> {
        validate_ksize(ksize)?;
        let codes = sequence
            .bytes()
            .enumerate()
            .map(|(i, b)| encode(b, i))
            .collect::<Result<Vec<_>, _>>()?;
        let mask = if ksize == 32 { u64::MAX } else { (1u64 << (2 * ksize)) - 1 };
        Ok(Self { codes, ksize, pos: 0, fwd: 0, rev: 0, mask })
    }

    pub fn ksize(&self) -> usize {
        self.ksize
    }
}

impl Iterator for KmerIterator {
    type Item = HashIntoType;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.codes.len() {
            let code = self.codes[self.pos] as u64;
            self.pos += 1;
            self.fwd = ((self.fwd << 2) | code) & self.mask;
            self.rev = (self.rev >> 2) | ((3 - code) << (2 * (self.ksize - 1)));
            if self.pos >= self.ksize {
                return Some(self.fwd.min(self.rev));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.pos >= self.ksize {
            self.codes.len() - self.pos
        } else {
            (self.codes.len() + 1).saturating_sub(self.ksize)
        };
        (remaining, Some(remaining))
    }
}

pub fn validate_ksize(ksize: usize) -> Result<(), PipelineError> {
    if ksize == 0 || ksize > MAX_KSIZE {
        return Err(PipelineError::InvalidConfig(format!(
            "k-mer size must be between 1 and {}, got {}", MAX_KSIZE, ksize
        )));
    }
    Ok(())
}

/// The k-mer counting interface the pipeline stages rely on.
///
/// Implementations must be safe to call concurrently from every worker of
/// every stage; the stages do no locking of their own around it.
pub trait KmerCounter: Send + Sync {
    fn ksize(&self) -> usize;

    fn count(&self, kmer: HashIntoType) -> Result<(), PipelineError>;

    fn get_count(&self, kmer: HashIntoType) -> u32;

    fn kmer_hashes(&self, sequence: &str) -> Result<KmerIterator, PipelineError> {
        KmerIterator::new(sequence, self.ksize())
    }

    /// Counts every k-mer of `sequence`, returning how many were counted.
    fn count_sequence(&self, sequence: &str) -> Result<u64, PipelineError> {
        let mut n_consumed = 0;
        for kmer in self.kmer_hashes(sequence)? {
            self.count(kmer)?;
            n_consumed += 1;
        }
        Ok(n_consumed)
    }

    fn get_median_count(&self, sequence: &str) -> Result<MedianCount, PipelineError> {
        let mut counts: Vec<u32> = self.kmer_hashes(sequence)?.map(|kmer| self.get_count(kmer)).collect();
        median_mean_stddev(&mut counts).ok_or(PipelineError::SequenceTooShort {
            length: sequence.len(),
            ksize: self.ksize(),
        })
    }
}

/// Exact k-mer counts held in lock-sharded hash maps.
pub struct KmerCountTable {
    ksize: usize,
    shards: Vec<Mutex<FxHashMap<HashIntoType, u32>>>,
}

impl KmerCountTable {
    pub fn new(ksize: usize) -> Result<Self, PipelineError> {
        validate_ksize(ksize)?;
        let shards = (0..COUNT_TABLE_SHARDS).map(|_| Mutex::new(FxHashMap::default())).collect();
        Ok(Self { ksize, shards })
    }

    fn shard(&self, kmer: HashIntoType) -> MutexGuard<'_, FxHashMap<HashIntoType, u32>> {
        let idx = (fxhash::hash64(&kmer) % self.shards.len() as u64) as usize;
        self.shards[idx].lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of distinct k-mers seen so far.
    pub fn n_unique_kmers(&self) -> u64 {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len() as u64)
            .sum()
    }

    /// Number of distinct k-mers seen at each abundance.
    pub fn abundance_histogram(&self) -> BTreeMap<u32, u64> {
        let mut histogram = BTreeMap::new();
        for shard in &self.shards {
            let shard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for &count in shard.values() {
                *histogram.entry(count).or_insert(0) += 1;
            }
        }
        histogram
    }

    /// Sum of all counts.
    pub fn n_total_kmers(&self) -> u64 {
        self.shards
            .iter()
            .map(|s| {
                s.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .values()
                    .map(|&c| c as u64)
                    .sum::<u64>()
            })
            .sum()
    }
}

impl KmerCounter for KmerCountTable {
    fn ksize(&self) -> usize {
        self.ksize
    }

    fn count(&self, kmer: HashIntoType) -> Result<(), PipelineError> {
        let mut shard = self.shard(kmer);
        let entry = shard.entry(kmer).or_insert(0);
        *entry = entry.saturating_add(1);
        Ok(())
    }

    fn get_count(&self, kmer: HashIntoType) -> u32 {
        self.shard(kmer).get(&kmer).copied().unwrap_or(0)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_kmer_count_matches_length() {
        let hashes: Vec<_> = KmerIterator::new("ACGTACGTAC", 4).unwrap().collect();
        assert_eq!(hashes.len(), 7);
        assert_eq!(KmerIterator::new("ACG", 4).unwrap().count(), 0);
        assert_eq!(KmerIterator::new("ACGTACGTAC", 4).unwrap().size_hint(), (7, Some(7)));
    }

    #[test]
    fn test_canonical_hash_matches_reverse_complement() {
        let fwd: Vec<_> = KmerIterator::new("AAGC", 4).unwrap().collect();
        let rc: Vec<_> = KmerIterator::new("GCTT", 4).unwrap().collect();
        assert_eq!(fwd, rc);
    }

    #[test]
    fn test_n_treated_as_a_and_case_insensitive() {
        let a: Vec<_> = KmerIterator::new("ACGTA", 5).unwrap().collect();
        let n: Vec<_> = KmerIterator::new("acgtn", 5).unwrap().collect();
        assert_eq!(a, n);
    }

    #[test]
    fn test_invalid_symbol() {
        match KmerIterator::new("ACGXT", 3) {
            Err(PipelineError::InvalidSequence { symbol, position }) => {
                assert_eq!(symbol, 'X');
                assert_eq!(position, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ksize_bounds() {
        assert!(KmerCountTable::new(0).is_err());
        assert!(KmerCountTable::new(33).is_err());
        let full: Vec<_> = KmerIterator::new(&"ACGT".repeat(10), 32).unwrap().collect();
        assert_eq!(full.len(), 9);
    }

    #[test]
    fn test_median_after_counting() {
        let table = KmerCountTable::new(4).unwrap();
        assert_eq!(table.get_median_count("ACGTTGCA").unwrap().median, 0);
        assert_eq!(table.count_sequence("ACGTTGCA").unwrap(), 5);
        assert!(table.get_median_count("ACGTTGCA").unwrap().median >= 1);
        assert_eq!(table.n_total_kmers(), 5);
    }

    #[test]
    fn test_abundance_histogram() {
        let table = KmerCountTable::new(4).unwrap();
        table.count_sequence("AAAAAA").unwrap();
        table.count_sequence("ACGTC").unwrap();
        let histogram = table.abundance_histogram();
        // AAAA three times; ACGT and CGTC once each
        assert_eq!(histogram.get(&3), Some(&1));
        assert_eq!(histogram.get(&1), Some(&2));
    }

    #[test]
    fn test_too_short_for_median() {
        let table = KmerCountTable::new(20).unwrap();
        assert!(matches!(
            table.get_median_count("ACGT"),
            Err(PipelineError::SequenceTooShort { length: 4, ksize: 20 })
        ));
    }

    #[test]
    fn test_concurrent_counts_are_exact() {
        let table = Arc::new(KmerCountTable::new(5).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        table.count_sequence("ACGTAC").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // ACGTA and CGTAC, canonical forms are distinct
        assert_eq!(table.n_unique_kmers(), 2);
        assert_eq!(table.n_total_kmers(), 2000);
    }
}
