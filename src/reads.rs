use anyhow::{Context, Result};
use seq_io::fasta::{Reader, RefRecord};
use seq_io::parallel::read_process_fasta_records;
use seq_io::BaseRecord;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub trait ReadProcess {
    fn process<F: FnMut(&[u8])>(self, f: F) -> Result<()>;
    fn parallel_process<F: Send + Sync + Fn(&[u8])>(self, threads: u32, queue_len: usize, f: F) -> Result<()>;

    /// Collects every record as an upper-case sequence without line breaks.
    fn sequences(self) -> Result<Vec<Vec<u8>>>
    where
        Self: Sized,
    {
        let mut seqs = Vec::new();
        self.process(|bytes| {
            seqs.push(
                bytes
                    .iter()
                    .filter(|b| !b.is_ascii_whitespace())
                    .map(u8::to_ascii_uppercase)
                    .collect(),
            )
        })?;
        Ok(seqs)
    }
}

pub struct Fasta<R: Read = File> {
    reader: Reader<R>,
}

impl Fasta {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader =
            Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self { reader })
    }
}

impl<R: Read> Fasta<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: Reader::new(reader),
        }
    }
}

impl<R: Read + Send> ReadProcess for Fasta<R> {
    fn process<F: FnMut(&[u8])>(mut self, mut f: F) -> Result<()> {
        while let Some(result) = self.reader.next() {
            let record = result.context("Error reading record")?;
            f(record.seq());
        }
        Ok(())
    }

    fn parallel_process<F: Send + Sync + Fn(&[u8])>(self, threads: u32, queue_len: usize, f: F) -> Result<()> {
        read_process_fasta_records(
            self.reader,
            threads,
            queue_len,
            |record: RefRecord, _: &mut Option<()>| {
                f(record.seq());
            },
            |_, _| None::<()>,
        )
        .context("Error reading records")?;
        Ok(())
    }
}
