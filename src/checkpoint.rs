//! Flanking coverage checkpoints. Counters are stored in edge enumeration order, so a
//! checkpoint can only be restored into a graph with the same edges.

use crate::flanking::FlankingCoverage;
use crate::graph::{EdgeId, EdgeStore};
use anyhow::{ensure, Context, Result};
use std::io::{Read, Write};
use sucds::int_vectors::CompactVector;
use sucds::Serializable;

fn restore(flanking: &FlankingCoverage, edges: &mut EdgeStore, values: Vec<u64>) -> Result<()> {
    ensure!(
        values.len() == edges.len(),
        "checkpoint holds {} counters but the graph has {} edges",
        values.len(),
        edges.len()
    );
    let ids: Vec<EdgeId> = edges.ids().collect();
    for (e, raw) in ids.into_iter().zip(values) {
        flanking.load(edges, e, raw);
    }
    Ok(())
}

/// Writes one decimal counter per line.
pub fn save_text<W: Write>(flanking: &FlankingCoverage, edges: &EdgeStore, mut writer: W) -> Result<()> {
    for e in edges.ids() {
        flanking.save_to(edges, e, &mut writer)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_text<R: Read>(flanking: &FlankingCoverage, edges: &mut EdgeStore, mut reader: R) -> Result<()> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let values = text
        .split_ascii_whitespace()
        .map(|token| {
            token
                .parse::<u64>()
                .with_context(|| format!("bad flanking coverage token {token:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    restore(flanking, edges, values)
}

/// Counters split into 32-bit halves. A `CompactVector` cannot store integers that
/// need the full 64-bit width.
pub struct CompactCounters {
    low: CompactVector,
    high: CompactVector,
}

impl CompactCounters {
    pub fn from_counters(values: &[u64]) -> Result<Self> {
        let low: Vec<u32> = values.iter().map(|&raw| raw as u32).collect();
        let high: Vec<u32> = values.iter().map(|&raw| (raw >> 32) as u32).collect();
        Ok(Self {
            low: CompactVector::from_slice(&low)?,
            high: CompactVector::from_slice(&high)?,
        })
    }

    pub fn len(&self) -> usize {
        self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<u64> {
        let low = self.low.get_int(i)? as u64;
        let high = self.high.get_int(i)? as u64;
        Some(high << 32 | low)
    }
}

impl Serializable for CompactCounters {
    fn serialize_into<W: Write>(&self, mut writer: W) -> Result<usize> {
        Ok(self.low.serialize_into(&mut writer)? + self.high.serialize_into(&mut writer)?)
    }

    fn deserialize_from<R: Read>(mut reader: R) -> Result<Self> {
        let low = CompactVector::deserialize_from(&mut reader)?;
        let high = CompactVector::deserialize_from(&mut reader)?;
        ensure!(
            low.len() == high.len(),
            "counter halves differ in length: {} and {}",
            low.len(),
            high.len()
        );
        Ok(Self { low, high })
    }

    fn size_in_bytes(&self) -> usize {
        self.low.size_in_bytes() + self.high.size_in_bytes()
    }
}

pub fn to_compact(flanking: &FlankingCoverage, edges: &EdgeStore) -> Result<CompactCounters> {
    let values: Vec<u64> = edges.ids().map(|e| flanking.save(edges, e)).collect();
    CompactCounters::from_counters(&values)
}

pub fn from_compact(flanking: &FlankingCoverage, edges: &mut EdgeStore, counters: &CompactCounters) -> Result<()> {
    let values = (0..counters.len())
        .map(|i| counters.get(i).with_context(|| format!("missing counter {i}")))
        .collect::<Result<Vec<_>>>()?;
    restore(flanking, edges, values)
}

/// Returns the number of bytes written.
pub fn save_binary<W: Write>(flanking: &FlankingCoverage, edges: &EdgeStore, writer: W) -> Result<usize> {
    to_compact(flanking, edges)?.serialize_into(writer)
}

pub fn load_binary<R: Read>(flanking: &FlankingCoverage, edges: &mut EdgeStore, reader: R) -> Result<()> {
    let counters = CompactCounters::deserialize_from(reader)?;
    from_compact(flanking, edges, &counters)
}
