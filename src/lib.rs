pub mod checkpoint;
pub mod config;
pub mod coverage;
pub mod filler;
pub mod flanking;
pub mod graph;
pub mod index;
pub mod kmer;
pub mod reads;
