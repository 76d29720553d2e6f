pub mod fastx;
pub mod file;
pub mod kmer;
pub mod sequence;
pub mod stats;
pub mod system;
