//! One-pass initialization of total and flanking coverage from a k-mer count index.

use crate::coverage::EdgeCoverage;
use crate::flanking::FlankingCoverage;
use crate::graph::{AssemblyGraph, EdgeId, EdgeStore};
use ahash::{HashMap, HashMapExt};
use anyhow::{ensure, Result};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How a count index stores the two orientations of a k-mer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoringType {
    /// Both orientations have their own entry.
    #[default]
    Simple,
    /// Only one orientation is stored; the other is recovered on the conjugate edge.
    Invertible,
}

/// `count` occurrences of the k-mer starting at `offset` on `edge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeInfo {
    pub edge: EdgeId,
    pub offset: u32,
    pub count: u32,
}

impl EdgeInfo {
    pub const INVALID_OFFSET: u32 = u32::MAX;

    pub fn new(edge: EdgeId, offset: u32, count: u32) -> Self {
        Self {
            edge,
            offset,
            count,
        }
    }

    fn validate(&self, edges: &EdgeStore) -> Result<()> {
        ensure!(
            self.offset != Self::INVALID_OFFSET,
            "index entry for {:?} has no offset",
            self.edge
        );
        ensure!(
            edges.contains(self.edge),
            "index entry refers to {:?} which is not in the graph",
            self.edge
        );
        ensure!(
            (self.offset as usize) < edges.length(self.edge),
            "offset {} is past the last k-mer of {:?}",
            self.offset,
            self.edge
        );
        Ok(())
    }

    /// The same occurrence seen on the conjugate edge.
    pub fn conjugate(&self, edges: &EdgeStore, k: usize) -> Self {
        let nucls = edges.nucls(self.edge).len();
        Self {
            edge: edges.conjugate(self.edge),
            offset: (nucls - k) as u32 - self.offset,
            count: self.count,
        }
    }
}

pub trait CountIndex: Sync {
    fn kmer_len(&self) -> usize;
    fn storing(&self) -> StoringType;
    fn len(&self) -> usize;
    fn entry(&self, pos: usize) -> EdgeInfo;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entries resolved by an external counter.
#[derive(Debug, Clone)]
pub struct EntryList {
    pub kmer_len: usize,
    pub storing: StoringType,
    pub entries: Vec<EdgeInfo>,
}

impl CountIndex for EntryList {
    fn kmer_len(&self) -> usize {
        self.kmer_len
    }

    fn storing(&self) -> StoringType {
        self.storing
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, pos: usize) -> EdgeInfo {
        self.entries[pos]
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Increment {
    raw: u64,
    flanking: u64,
}

type Increments = HashMap<EdgeId, Increment>;

type Collector = fn(&mut Increments, &EdgeStore, usize, usize, EdgeInfo) -> Result<()>;

fn add(acc: &mut Increments, averaging_range: usize, info: EdgeInfo) {
    let inc = acc.entry(info.edge).or_default();
    inc.raw += info.count as u64;
    if (info.offset as usize) < averaging_range {
        inc.flanking += info.count as u64;
    }
}

fn collect_simple(
    acc: &mut Increments,
    edges: &EdgeStore,
    _k: usize,
    averaging_range: usize,
    info: EdgeInfo,
) -> Result<()> {
    info.validate(edges)?;
    add(acc, averaging_range, info);
    Ok(())
}

fn collect_invertible(
    acc: &mut Increments,
    edges: &EdgeStore,
    k: usize,
    averaging_range: usize,
    info: EdgeInfo,
) -> Result<()> {
    info.validate(edges)?;
    add(acc, averaging_range, info);
    add(acc, averaging_range, info.conjugate(edges, k));
    Ok(())
}

fn merge(mut into: Increments, from: Increments) -> Increments {
    for (e, inc) in from {
        let acc = into.entry(e).or_default();
        acc.raw += inc.raw;
        acc.flanking += inc.flanking;
    }
    into
}

pub struct CoverageFiller<'a, I: CountIndex> {
    count_index: &'a I,
    coverage: &'a EdgeCoverage,
    flanking: &'a FlankingCoverage,
    threads: usize,
}

impl<'a, I: CountIndex> CoverageFiller<'a, I> {
    pub fn new(count_index: &'a I, coverage: &'a EdgeCoverage, flanking: &'a FlankingCoverage) -> Self {
        Self {
            count_index,
            coverage,
            flanking,
            threads: 0,
        }
    }

    /// Number of workers; 0 lets rayon decide.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Adds every index entry to the total coverage of its edge, and to the flanking
    /// coverage when it starts within the averaging range. Nothing is applied if any
    /// entry is invalid.
    pub fn fill(&self, graph: &mut AssemblyGraph) -> Result<()> {
        let index = self.count_index;
        let storing = index.storing();
        let k = index.kmer_len();
        if storing == StoringType::Invertible {
            ensure!(
                k == graph.k(),
                "count index k-mer length {} does not match graph k = {}",
                k,
                graph.k()
            );
        }
        let collect: Collector = match storing {
            StoringType::Simple => collect_simple,
            StoringType::Invertible => collect_invertible,
        };
        let averaging_range = self.flanking.averaging_range();
        debug!(
            "Filling coverage and flanking coverage from {} entries ({:?} storing)",
            index.len(),
            storing
        );

        let edges = graph.edges();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;
        let increments = pool.install(|| {
            (0..index.len())
                .into_par_iter()
                .try_fold(Increments::new, |mut acc, pos| {
                    collect(&mut acc, edges, k, averaging_range, index.entry(pos))?;
                    Ok::<_, anyhow::Error>(acc)
                })
                .try_reduce(Increments::new, |a, b| Ok(merge(a, b)))
        })?;

        debug!("Applying coverage to {} edges", increments.len());
        let edges = graph.edges_mut();
        for (e, inc) in increments {
            self.coverage.inc_raw_coverage(edges, e, inc.raw);
            self.flanking.inc_raw_flanking(edges, e, inc.flanking);
        }
        Ok(())
    }
}

pub fn fill_coverage_and_flanking<I: CountIndex>(
    count_index: &I,
    graph: &mut AssemblyGraph,
    coverage: &EdgeCoverage,
    flanking: &FlankingCoverage,
) -> Result<()> {
    CoverageFiller::new(count_index, coverage, flanking).fill(graph)
}
