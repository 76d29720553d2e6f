/// One sequence record as handed over by a file parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Read {
    pub name: String,
    pub sequence: String,
    pub quality: String,
}

impl Read {
    pub fn new(name: impl Into<String>, sequence: impl Into<String>, quality: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequence: sequence.into(),
            quality: quality.into(),
        }
    }

    pub fn has_quality(&self) -> bool {
        !self.quality.is_empty()
    }

    pub fn clear(&mut self) {
        self.name.clear();
        self.sequence.clear();
        self.quality.clear();
    }
}

/// The unit of pipeline work: a single read, or both mates of a pair.
///
/// A batch moves through every queue as one item, so mates are never split
/// across workers and filters always keep or drop them together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadBatch {
    Single(Read),
    Paired(Read, Read),
}

impl ReadBatch {
    pub fn first(&self) -> &Read {
        match self {
            ReadBatch::Single(read) => read,
            ReadBatch::Paired(first, _) => first,
        }
    }

    pub fn second(&self) -> Option<&Read> {
        match self {
            ReadBatch::Single(_) => None,
            ReadBatch::Paired(_, second) => Some(second),
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, ReadBatch::Paired(..))
    }

    /// Number of reads carried, 1 or 2.
    pub fn len(&self) -> u64 {
        match self {
            ReadBatch::Single(_) => 1,
            ReadBatch::Paired(..) => 2,
        }
    }

    pub fn reads(&self) -> impl Iterator<Item = &Read> {
        std::iter::once(self.first()).chain(self.second())
    }

    pub fn into_reads(self) -> Vec<Read> {
        match self {
            ReadBatch::Single(read) => vec![read],
            ReadBatch::Paired(first, second) => vec![first, second],
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_batch() {
        let batch = ReadBatch::Single(Read::new("r1", "ACGT", "IIII"));
        assert!(!batch.is_paired());
        assert_eq!(batch.len(), 1);
        assert!(batch.second().is_none());
        assert_eq!(batch.reads().count(), 1);
    }

    #[test]
    fn test_paired_batch_keeps_mate_order() {
        let batch = ReadBatch::Paired(Read::new("r/1", "AAAA", ""), Read::new("r/2", "CCCC", ""));
        assert!(batch.is_paired());
        assert_eq!(batch.len(), 2);
        let names: Vec<_> = batch.reads().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["r/1", "r/2"]);
        assert_eq!(batch.into_reads()[1].sequence, "CCCC");
    }
}
