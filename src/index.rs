use crate::filler::{CountIndex, EdgeInfo, StoringType};
use crate::graph::{AssemblyGraph, EdgeId};
use crate::kmer::{Base, Seq};
use crate::reads::ReadProcess;
use ahash::{HashMap, HashMapExt};
use anyhow::{ensure, Result};
use log::{debug, warn};
use std::borrow::Cow;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy)]
struct Position {
    edge: EdgeId,
    offset: u32,
}

/// Maps every k-mer of a graph to the edge position it occurs at, and counts how often
/// reads contain it.
pub struct KmerIndex<const K: usize, T: Base = u64> {
    storing: StoringType,
    positions: HashMap<Seq<K, T>, usize>,
    entries: Vec<Position>,
    counts: Vec<AtomicU32>,
}

impl<const K: usize, T: Base> KmerIndex<K, T> {
    pub fn new(storing: StoringType) -> Self {
        Self {
            storing,
            positions: HashMap::new(),
            entries: Vec::new(),
            counts: Vec::new(),
        }
    }

    /// Records the position of every k-mer of `graph`. In invertible mode only canonical
    /// k-mers are kept. The first position seen wins for a repeated k-mer.
    pub fn attach(&mut self, graph: &AssemblyGraph) -> Result<()> {
        ensure!(
            graph.k() == K,
            "index of {}-mers cannot be attached to a graph with k = {}",
            K,
            graph.k()
        );
        let edges = graph.edges();
        let mut repeated = 0usize;
        for e in edges.ids() {
            for (offset, kmer) in Seq::<K, T>::iter_from_chars(edges.nucls(e)).enumerate() {
                if self.storing == StoringType::Invertible && kmer > kmer.rev_comp() {
                    continue;
                }
                if self.positions.contains_key(&kmer) {
                    repeated += 1;
                    continue;
                }
                self.positions.insert(kmer, self.entries.len());
                self.entries.push(Position {
                    edge: e,
                    offset: offset as u32,
                });
                self.counts.push(AtomicU32::new(0));
            }
        }
        if repeated > 0 {
            warn!("{repeated} k-mers occur more than once in the graph, keeping their first position");
        }
        debug!("Indexed {} k-mers of {} edges", self.entries.len(), edges.len());
        Ok(())
    }

    pub fn contains(&self, kmer: &Seq<K, T>) -> bool {
        self.positions.contains_key(kmer)
    }

    pub fn count(&self, kmer: &Seq<K, T>) -> Option<u32> {
        self.positions
            .get(kmer)
            .map(|&pos| self.counts[pos].load(Ordering::Relaxed))
    }

    #[inline]
    fn inc(&self, kmer: &Seq<K, T>) {
        if let Some(&pos) = self.positions.get(kmer) {
            // saturates at u32::MAX
            let _ = self.counts[pos].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                c.checked_add(1)
            });
        }
    }

    /// Counts both strands of a read. Soft-masked (lower-case) bases count like upper-case
    /// ones, and k-mers absent from the graph are ignored.
    pub fn count_read(&self, bytes: &[u8]) {
        let bytes: Cow<[u8]> = if bytes.iter().any(u8::is_ascii_lowercase) {
            Cow::Owned(bytes.to_ascii_uppercase())
        } else {
            Cow::Borrowed(bytes)
        };
        for kmer in Seq::<K, T>::iter_from_chars(bytes.iter()) {
            match self.storing {
                StoringType::Simple => {
                    self.inc(&kmer);
                    self.inc(&kmer.rev_comp());
                }
                StoringType::Invertible => self.inc(&kmer.canonical()),
            }
        }
    }

    pub fn count_reads<R: ReadProcess>(&self, reads: R) -> Result<()> {
        reads.process(|bytes| self.count_read(bytes))
    }

    pub fn parallel_count_reads<R: ReadProcess>(
        &self,
        reads: R,
        threads: u32,
        queue_len: usize,
    ) -> Result<()> {
        reads.parallel_process(threads, queue_len, |bytes| self.count_read(bytes))
    }
}

impl<const K: usize, T: Base> CountIndex for KmerIndex<K, T> {
    fn kmer_len(&self) -> usize {
        K
    }

    fn storing(&self) -> StoringType {
        self.storing
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, pos: usize) -> EdgeInfo {
        let Position { edge, offset } = self.entries[pos];
        EdgeInfo::new(edge, offset, self.counts[pos].load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::EdgeCoverage;
    use crate::filler::fill_coverage_and_flanking;
    use crate::flanking::FlankingCoverage;
    use crate::graph::tests::{FIRST, K, SECOND};

    const READS: [&[u8]; 3] = [b"AACAGGTACATT", b"GGCTGCAATG", b"NNCAGGTACANGCAGCC"];

    fn graph() -> AssemblyGraph {
        let mut g = AssemblyGraph::new(K).unwrap();
        g.add_edge(FIRST).unwrap();
        g.add_edge(SECOND).unwrap();
        g
    }

    fn counted(g: &AssemblyGraph, storing: StoringType) -> KmerIndex<K, u8> {
        let mut index = KmerIndex::<K, u8>::new(storing);
        index.attach(g).unwrap();
        for read in READS {
            index.count_read(read);
        }
        index
    }

    #[test]
    fn attach_checks_k() {
        let g = graph();
        let mut index = KmerIndex::<7, u8>::new(StoringType::Simple);
        assert!(index.attach(&g).is_err());
    }

    #[test]
    fn simple_index_keeps_both_orientations() {
        let g = graph();
        let index = counted(&g, StoringType::Simple);
        // 4 + 10 k-mers per strand
        assert_eq!(index.len(), 28);
        let kmer = Seq::<K, u8>::from_chars(b"CAGGT").unwrap();
        assert_eq!(index.count(&kmer), Some(2));
        assert_eq!(index.count(&kmer.rev_comp()), Some(2));
        assert_eq!(index.count(&Seq::from_chars(b"TTTTT").unwrap()), None);
    }

    #[test]
    fn invertible_index_keeps_canonical_kmers() {
        let g = graph();
        let index = counted(&g, StoringType::Invertible);
        assert_eq!(index.len(), 14);
        let kmer = Seq::<K, u8>::from_chars(b"CAGGT").unwrap();
        assert!(index.contains(&kmer.clone().canonical()));
        assert!(!index.contains(&kmer.clone().canonical().rev_comp()));
        assert_eq!(index.count(&kmer.canonical()), Some(2));
    }

    #[test]
    fn soft_masked_reads_are_counted() {
        let g = graph();
        let mut index = KmerIndex::<K, u8>::new(StoringType::Simple);
        index.attach(&g).unwrap();
        index.count_read(b"aacAGGTAcatt");
        index.count_read(b"AACAGGTACATT");
        let kmer = Seq::<K, u8>::from_chars(b"CAGGT").unwrap();
        assert_eq!(index.count(&kmer), Some(2));
        assert_eq!(index.count(&Seq::from_chars(b"AACAG").unwrap()), Some(2));
    }

    #[test]
    fn counts_saturate() {
        let g = graph();
        let mut index = KmerIndex::<K, u8>::new(StoringType::Invertible);
        index.attach(&g).unwrap();
        let kmer = Seq::<K, u8>::from_chars(b"CAGGT").unwrap().canonical();
        let pos = index.positions[&kmer];
        index.counts[pos].store(u32::MAX - 1, Ordering::Relaxed);
        for _ in 0..3 {
            index.count_read(b"CAGGT");
        }
        assert_eq!(index.count(&kmer), Some(u32::MAX));
        assert_eq!(index.entry(pos).count, u32::MAX);
    }

    #[test]
    fn both_storing_types_give_same_coverage() {
        let mut results = Vec::new();
        for storing in [StoringType::Simple, StoringType::Invertible] {
            let mut g = graph();
            let index = counted(&g, storing);
            let coverage = EdgeCoverage::new();
            let flanking = FlankingCoverage::new(3).unwrap();
            fill_coverage_and_flanking(&index, &mut g, &coverage, &flanking).unwrap();
            let edges = g.edges();
            let per_edge: Vec<(u64, u64)> = edges
                .ids()
                .map(|e| (coverage.raw_coverage(edges, e), flanking.raw_flanking(edges, e)))
                .collect();
            results.push(per_edge);
        }
        assert_eq!(results[0], results[1]);
        assert!(results[0].iter().any(|&(raw, _)| raw > 0));
    }
}
