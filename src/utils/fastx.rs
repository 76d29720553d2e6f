use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use lazy_static::lazy_static;
use log::debug;
use seq_io::fasta::{Reader as FastaReader, Record as FastaRecord};
use seq_io::fastq::{Reader as FastqReader, Record as FastqRecord};
use crate::config::defs::{PipelineError, FASTA_EXTS, FASTA_TAG, FASTQ_EXTS, FASTQ_TAG};
use crate::streams::batch::{Read, ReadBatch};
use crate::utils::file::{extension_remover, FileReader};

lazy_static! {
    static ref R1_R2_TAGS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("R1", "R2");
        m.insert("r1", "r2");
        m.insert("1", "2");
        m.insert("F", "R");
        m.insert("f", "r");
        m.insert("FWD", "REV");
        m.insert("fwd", "rev");
        m.insert("PE1", "PE2");
        m.insert("pe1", "pe2");
        m.insert("READ1", "READ2");
        m.insert("read1", "read2");
        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastxFormat {
    Fasta,
    Fastq,
}


/// Source of sequence records for a parser stage.
///
/// `has_more` may read ahead; a read-ahead failure is reported by the next
/// `imprint_next` call rather than swallowed.
pub trait ReadParser: Send {
    fn has_more(&mut self) -> bool;

    /// Overwrites `read` with the next record.
    fn imprint_next(&mut self, read: &mut Read) -> Result<(), PipelineError>;

    /// Overwrites `first` and `second` with the next two records, which must
    /// be mates of each other.
    fn imprint_next_pair(&mut self, first: &mut Read, second: &mut Read) -> Result<(), PipelineError> {
        self.imprint_next(first)?;
        if !self.has_more() {
            return Err(PipelineError::UnpairedReads(format!("final read '{}' has no mate", first.name)));
        }
        self.imprint_next(second)?;
        if !is_mate_pair(&first.name, &second.name) {
            return Err(PipelineError::UnpairedReads(format!(
                "'{}' and '{}' are not mates", first.name, second.name
            )));
        }
        Ok(())
    }
}

enum RecordReader {
    Fasta(FastaReader<FileReader>),
    Fastq(FastqReader<FileReader>),
}

/// FASTA / FASTQ file parser, optionally gzipped.
pub struct FastxParser {
    path: PathBuf,
    reader: RecordReader,
    peeked: Option<Result<Read, PipelineError>>,
    n_records: u64,
}

impl FastxParser {
    /// Opens a FASTX file. Format is chosen from the extension, compression
    /// from the gzip magic bytes.
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = FileReader::open(path)?;
        let reader = match fastx_filetype(path)? {
            FastxFormat::Fasta => RecordReader::Fasta(FastaReader::new(file)),
            FastxFormat::Fastq => RecordReader::Fastq(FastqReader::new(file)),
        };
        debug!("Opened {} for parsing", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            peeked: None,
            n_records: 0,
        })
    }

    pub fn n_records(&self) -> u64 {
        self.n_records
    }

    fn read_record(&mut self) -> Option<Result<Read, PipelineError>> {
        let path = &self.path;
        let format_err = |e: &dyn std::fmt::Display| {
            PipelineError::InvalidFastxFormat(format!("{}: {}", path.display(), e))
        };

        let record = match &mut self.reader {
            RecordReader::Fasta(reader) => reader.next().map(|result| match result {
                Ok(rec) => Ok(Read {
                    name: String::from_utf8_lossy(rec.head()).into_owned(),
                    sequence: String::from_utf8_lossy(&rec.full_seq()).into_owned(),
                    quality: String::new(),
                }),
                Err(e) => Err(format_err(&e)),
            }),
            RecordReader::Fastq(reader) => reader.next().map(|result| match result {
                Ok(rec) => Ok(Read {
                    name: String::from_utf8_lossy(rec.head()).into_owned(),
                    sequence: String::from_utf8_lossy(rec.seq()).into_owned(),
                    quality: String::from_utf8_lossy(rec.qual()).into_owned(),
                }),
                Err(e) => Err(format_err(&e)),
            }),
        };

        if let Some(Ok(_)) = record {
            self.n_records += 1;
        }
        record
    }
}

impl ReadParser for FastxParser {
    fn has_more(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.read_record();
        }
        self.peeked.is_some()
    }

    fn imprint_next(&mut self, read: &mut Read) -> Result<(), PipelineError> {
        let next = match self.peeked.take() {
            Some(next) => Some(next),
            None => self.read_record(),
        };
        match next {
            Some(Ok(record)) => {
                *read = record;
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Err(PipelineError::InvalidFastxFormat(format!(
                "{}: no more records", self.path.display()
            ))),
        }
    }
}


/// Determines if a file path is a FASTA, FASTQ, or neither.
/// Checks extensions, not the body.
///
/// # Arguments
///
/// * `path` - Path to a FASTX file, possibly with a trailing `.gz`.
///
/// # Returns
/// Result<FastxFormat>, or InvalidFastxFormat for unknown extensions.
pub fn fastx_filetype(path: &Path) -> Result<FastxFormat, PipelineError> {
    let (_, extensions) = extension_remover(path);

    for ext in &extensions {
        if FASTA_EXTS.iter().any(|&e| e.eq_ignore_ascii_case(ext)) {
            return Ok(FastxFormat::Fasta);
        }

        if FASTQ_EXTS.iter().any(|&e| e.eq_ignore_ascii_case(ext)) {
            return Ok(FastxFormat::Fastq);
        }
    }

    Err(PipelineError::InvalidFastxFormat(format!(
        "File '{}' has invalid extension(s) '{:?}'. Expected {} ({:?}) or {} ({:?}).",
        path.display(),
        extensions,
        FASTA_TAG,
        FASTA_EXTS,
        FASTQ_TAG,
        FASTQ_EXTS
    )))
}


/// Compares the headers of two reads to decide if they are mates.
/// Casava 1.8+ headers (`name 1:N:0:...` / `name 2:N:0:...`) are checked
/// first, then the older `/1` and `/2` suffixes.
///
/// # Arguments
///
/// * `id1`: &str - Header of the first read
/// * `id2`: &str - Header of the second read
///
/// # Returns
/// bool: true if the reads are a matched pair.
///
pub fn is_mate_pair(id1: &str, id2: &str) -> bool {
    let id1_parts: Vec<&str> = id1.splitn(2, ' ').collect();
    let id2_parts: Vec<&str> = id2.splitn(2, ' ').collect();

    if id1_parts.len() == 2 && id2_parts.len() == 2 && id1_parts[0] == id2_parts[0] {
        let read_num1 = id1_parts[1].split(':').next().unwrap_or("");
        let read_num2 = id2_parts[1].split(':').next().unwrap_or("");
        if (read_num1 == "1" && read_num2 == "2") || (read_num1 == "2" && read_num2 == "1") {
            return true;
        }
    }

    let base1 = id1_parts[0];
    let base2 = id2_parts[0];
    if base1.ends_with("/1") && base2.ends_with("/2") {
        return base1.trim_end_matches("/1") == base2.trim_end_matches("/2");
    } else if base1.ends_with("/2") && base2.ends_with("/1") {
        return base1.trim_end_matches("/2") == base2.trim_end_matches("/1");
    }

    debug!("Unsupported read ID format or mismatched pair: '{}' / '{}'", id1, id2);
    false
}


pub trait WriteToFile {
    fn write_to_file<W: Write>(&self, writer: &mut W) -> io::Result<()>;
}

/// Reads with qualities are written as FASTQ, others as FASTA.
impl WriteToFile for Read {
    fn write_to_file<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        if self.has_quality() {
            write_fastq_record(writer, &self.name, self.sequence.as_bytes(), self.quality.as_bytes())
        } else {
            write_fasta_record(writer, &self.name, self.sequence.as_bytes())
        }
    }
}

impl WriteToFile for ReadBatch {
    fn write_to_file<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for read in self.reads() {
            read.write_to_file(writer)?;
        }
        Ok(())
    }
}

pub fn write_fasta_record<W: Write>(
    writer: &mut W,
    name: &str,
    seq: &[u8],
) -> io::Result<()> {
    writer.write_all(b">")?;
    writer.write_all(name.as_bytes())?;
    writer.write_all(b"\n")?;

    // 80 chars per line
    for chunk in seq.chunks(80) {
        writer.write_all(chunk)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

pub fn write_fastq_record<W: Write>(
    writer: &mut W,
    name: &str,
    seq: &[u8],
    qual: &[u8],
) -> io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(name.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")?;
    Ok(())
}


#[derive(Debug, PartialEq)]
pub struct R1R2Result {
    pub delimiter: Option<char>,
    pub r1_tag: Option<String>,
    pub prefix: Option<String>,
    pub index: Option<usize>,
}

/// Tries to locate an R1-style tag in a file name and returns the sample
/// prefix in front of it.
///
/// # Arguments
///
/// * `path` - Path of a FASTX file, e.g. `sample_R1.fq.gz`.
///
/// # Returns
/// R1R2Result; all fields None when no tag is found.
///
pub fn r1r2_base(path: &Path) -> R1R2Result {
    let none = R1R2Result { delimiter: None, r1_tag: None, prefix: None, index: None };
    let (stem, _) = extension_remover(path);
    let filename = match stem.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => return none,
    };

    for delimiter in ['_', '.', '-'] {
        let parts: Vec<&str> = filename.split(delimiter).collect();
        for (index, part) in parts.iter().enumerate().skip(1) {
            if R1_R2_TAGS.contains_key(part) {
                return R1R2Result {
                    delimiter: Some(delimiter),
                    r1_tag: Some(part.to_string()),
                    prefix: Some(parts[..index].join(&delimiter.to_string())),
                    index: Some(index),
                };
            }
        }
    }
    none
}

/// Sample name for output files: the R1 prefix if there is one, else the
/// file stem without FASTX extensions.
pub fn sample_base(path: &Path) -> String {
    match r1r2_base(path).prefix {
        Some(prefix) => prefix,
        None => {
            let (stem, _) = extension_remover(path);
            stem.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "default_sample".to_string())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, body: &str) -> io::Result<PathBuf> {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path)?;
        file.write_all(body.as_bytes())?;
        Ok(path)
    }

    #[test]
    fn test_fastq_parser_reads_all_records() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(&dir, "reads.fq", "@r1\nACGT\n+\nIIII\n@r2 desc\nGGCC\n+\nJJJJ\n")?;
        let mut parser = FastxParser::open(&path)?;
        let mut read = Read::default();

        assert!(parser.has_more());
        parser.imprint_next(&mut read)?;
        assert_eq!(read, Read::new("r1", "ACGT", "IIII"));
        parser.imprint_next(&mut read)?;
        assert_eq!(read.name, "r2 desc");
        assert!(!parser.has_more());
        assert!(parser.imprint_next(&mut read).is_err());
        assert_eq!(parser.n_records(), 2);
        Ok(())
    }

    #[test]
    fn test_fasta_parser_joins_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(&dir, "reads.fa", ">s1\nACGT\nTTGG\n>s2\nCC\n")?;
        let mut parser = FastxParser::open(&path)?;
        let mut read = Read::default();
        parser.imprint_next(&mut read)?;
        assert_eq!(read.sequence, "ACGTTTGG");
        assert!(!read.has_quality());
        Ok(())
    }

    #[test]
    fn test_unknown_extension_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(&dir, "reads.txt", "@r1\nACGT\n+\nIIII\n")?;
        assert!(matches!(FastxParser::open(&path), Err(PipelineError::InvalidFastxFormat(_))));
        Ok(())
    }

    #[test]
    fn test_pair_imprint() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(&dir, "pairs.fa", ">a/1\nACGT\n>a/2\nTTTT\n>b/1\nGGGG\n")?;
        let mut parser = FastxParser::open(&path)?;
        let (mut first, mut second) = (Read::default(), Read::default());

        parser.imprint_next_pair(&mut first, &mut second)?;
        assert_eq!(first.name, "a/1");
        assert_eq!(second.name, "a/2");

        match parser.imprint_next_pair(&mut first, &mut second) {
            Err(PipelineError::UnpairedReads(msg)) => assert!(msg.contains("b/1")),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_mismatched_pair_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_file(&dir, "pairs.fa", ">a/1\nACGT\n>b/2\nTTTT\n")?;
        let mut parser = FastxParser::open(&path)?;
        let (mut first, mut second) = (Read::default(), Read::default());
        assert!(matches!(
            parser.imprint_next_pair(&mut first, &mut second),
            Err(PipelineError::UnpairedReads(_))
        ));
        Ok(())
    }

    #[test]
    fn test_is_mate_pair() {
        assert!(is_mate_pair("read1/1", "read1/2"));
        assert!(is_mate_pair("read1/2", "read1/1"));
        assert!(is_mate_pair("M01 1:N:0:1", "M01 2:N:0:1"));
        assert!(!is_mate_pair("M01 1:N:0:1", "M02 2:N:0:1"));
        assert!(!is_mate_pair("read1/1", "read2/2"));
        assert!(!is_mate_pair("read1", "read1"));
    }

    #[test]
    fn test_r1r2_base() {
        let result = r1r2_base(Path::new("/data/sampleA_R1_001.fastq.gz"));
        assert_eq!(result.prefix.as_deref(), Some("sampleA"));
        assert_eq!(result.r1_tag.as_deref(), Some("R1"));
        assert_eq!(sample_base(Path::new("/data/reads.fa")), "reads");
    }

    #[test]
    fn test_write_records() -> io::Result<()> {
        let mut out = Vec::new();
        Read::new("q", "ACGT", "IIII").write_to_file(&mut out)?;
        Read::new("a", "GG", "").write_to_file(&mut out)?;
        assert_eq!(String::from_utf8_lossy(&out), "@q\nACGT\n+\nIIII\n>a\nGG\n");
        Ok(())
    }
}
