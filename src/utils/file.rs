use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use crate::config::defs::{FASTA_EXTS, FASTQ_EXTS, GZIP_EXT};


/// Checks the first two bytes of a file for the gzip magic number.
///
/// # Arguments
///
/// * `path` - Path to an existing file.
///
/// # Returns
/// io::Result<bool>: true if gzipped. Files shorter than two bytes are not.
pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


/// Enum to hold either an uncompressed or gzipped file reader
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<BufReader<File>>),
}

impl FileReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let gzipped = is_gzipped(path)?;
        let file = BufReader::new(File::open(path)?);
        Ok(if gzipped {
            FileReader::Gzipped(MultiGzDecoder::new(file))
        } else {
            FileReader::Uncompressed(file)
        })
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}


/// Enum to hold either an uncompressed or gzipped file writer
pub enum FileWriter {
    Uncompressed(BufWriter<File>),
    Gzipped(GzEncoder<BufWriter<File>>),
}

impl FileWriter {
    /// Creates the file, gzip-compressing when its name ends in `.gz`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        let gz = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case(GZIP_EXT))
            .unwrap_or(false);
        Ok(if gz {
            FileWriter::Gzipped(GzEncoder::new(file, Compression::default()))
        } else {
            FileWriter::Uncompressed(file)
        })
    }

    /// Flushes and, for gzip, writes the trailer.
    pub fn finish(self) -> io::Result<()> {
        match self {
            FileWriter::Uncompressed(mut w) => w.flush(),
            FileWriter::Gzipped(w) => w.finish()?.flush(),
        }
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileWriter::Uncompressed(w) => w.write(buf),
            FileWriter::Gzipped(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileWriter::Uncompressed(w) => w.flush(),
            FileWriter::Gzipped(w) => w.flush(),
        }
    }
}


/// Strips known FASTX and compression extensions off a path.
///
/// # Arguments
///
/// * `path` - e.g. `sample_R1.fq.gz`
///
/// # Returns
/// (stem path, extensions in file order), e.g. (`sample_R1`, ["fq", "gz"]).
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions = Vec::new();

    while let Some(ext) = stem.extension().and_then(|e| e.to_str()).map(str::to_string) {
        let known = ext.eq_ignore_ascii_case(GZIP_EXT)
            || FASTA_EXTS.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            || FASTQ_EXTS.iter().any(|e| e.eq_ignore_ascii_case(&ext));
        if !known {
            break;
        }
        extensions.push(ext);
        stem.set_extension("");
    }

    extensions.reverse();
    (stem, extensions)
}


/// Builds a path from a base name with optional directory, prefix and suffix.
///
/// # Arguments
///
/// * `base` - File name or path to build from.
/// * `dir` - Directory to place a relative `base` into.
/// * `prefix` - Prepended to the file name, joined with `delimiter`.
/// * `suffix` - Appended to the file name, joined with `delimiter`.
/// * `delimiter` - Separator for prefix and suffix.
///
/// # Returns
/// PathBuf of the assembled path.
pub fn file_path_manipulator(
    base: &Path,
    dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let file_name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = String::new();
    if let Some(p) = prefix {
        name.push_str(p);
        name.push_str(delimiter);
    }
    name.push_str(&file_name);
    if let Some(s) = suffix {
        name.push_str(delimiter);
        name.push_str(s);
    }

    let parent = match (base.is_absolute(), dir) {
        (false, Some(d)) => d.join(base.parent().unwrap_or_else(|| Path::new(""))),
        _ => base.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    parent.join(name)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extension_remover() {
        let (stem, exts) = extension_remover(Path::new("/data/sample_R1.fq.gz"));
        assert_eq!(stem, PathBuf::from("/data/sample_R1"));
        assert_eq!(exts, vec!["fq".to_string(), "gz".to_string()]);

        let (stem, exts) = extension_remover(Path::new("reads.v2.fasta"));
        assert_eq!(stem, PathBuf::from("reads.v2"));
        assert_eq!(exts, vec!["fasta".to_string()]);
    }

    #[test]
    fn test_file_path_manipulator() {
        let out = file_path_manipulator(Path::new("sample"), Some(Path::new("/out")), None, Some("keep.fq.gz"), ".");
        assert_eq!(out, PathBuf::from("/out/sample.keep.fq.gz"));

        let abs = file_path_manipulator(Path::new("/in/sample.fq"), Some(Path::new("/out")), Some("x"), None, "_");
        assert_eq!(abs, PathBuf::from("/in/x_sample.fq"));
    }

    #[test]
    fn test_gzip_round_trip_detection() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("reads.fq.gz");
        let mut writer = FileWriter::create(&path)?;
        writer.write_all(b"@r\nACGT\n+\nIIII\n")?;
        writer.finish()?;
        assert!(is_gzipped(&path)?);

        let mut text = String::new();
        FileReader::open(&path)?.read_to_string(&mut text)?;
        assert!(text.starts_with("@r\nACGT"));
        Ok(())
    }

    #[test]
    fn test_short_file_not_gzipped() -> io::Result<()> {
        let mut tmp = NamedTempFile::new()?;
        write!(tmp, ">")?;
        tmp.flush()?;
        assert!(!is_gzipped(tmp.path())?);
        Ok(())
    }
}
