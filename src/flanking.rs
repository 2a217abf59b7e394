//! Approximate coverage near both ends of every edge.
//!
//! Each edge keeps a raw occurrence count over its first `averaging_range` k-mers. The
//! coverage of an edge's end is the coverage of its conjugate's start. The counters are
//! kept consistent through every topology change:
//!
//! * merge: the new start window is the start window of the merged path, with the edge
//!   crossing the window boundary contributing an interpolated share;
//! * glue: counts of both edges are summed;
//! * split: the head inherits the whole counter, the tail keeps zero;
//! * delete: the counter is reset to zero.
//!
//! Interpolated values are rounded to the nearest integer, ties away from zero.

use crate::graph::{ActionHandler, EdgeId, EdgeStore, GraphEvent, VertexId};
use anyhow::{bail, ensure, Context, Result};
use std::io::{BufRead, Write};

#[derive(Debug, Clone)]
pub struct FlankingCoverage {
    averaging_range: usize,
}

impl FlankingCoverage {
    pub fn new(averaging_range: usize) -> Result<Self> {
        ensure!(averaging_range > 0, "averaging range must be positive");
        Ok(Self { averaging_range })
    }

    pub fn averaging_range(&self) -> usize {
        self.averaging_range
    }

    #[inline]
    pub fn raw_flanking(&self, edges: &EdgeStore, e: EdgeId) -> u64 {
        edges.data(e).flanking_coverage
    }

    #[inline]
    fn set_raw_flanking(&self, edges: &mut EdgeStore, e: EdgeId, count: u64) {
        edges.data_mut(e).flanking_coverage = count;
    }

    /// Only meant for k-mers starting within the averaging range.
    #[inline]
    pub fn inc_raw_flanking(&self, edges: &mut EdgeStore, e: EdgeId, count: u64) {
        let data = edges.data_mut(e);
        data.flanking_coverage = data.flanking_coverage.saturating_add(count);
    }

    fn edge_averaging_range(&self, edges: &EdgeStore, e: EdgeId) -> usize {
        edges.length(e).min(self.averaging_range)
    }

    pub fn average_flanking(&self, edges: &EdgeStore, e: EdgeId) -> f64 {
        self.raw_flanking(edges, e) as f64 / self.edge_averaging_range(edges, e) as f64
    }

    fn interpolate(&self, edges: &EdgeStore, e: EdgeId, len: usize) -> u64 {
        debug_assert!(len <= self.averaging_range);
        debug_assert!(len < edges.length(e));
        (self.average_flanking(edges, e) * len as f64).round() as u64
    }

    pub fn coverage_of_start(&self, edges: &EdgeStore, e: EdgeId) -> f64 {
        self.average_flanking(edges, e)
    }

    pub fn coverage_of_end(&self, edges: &EdgeStore, e: EdgeId) -> f64 {
        self.coverage_of_start(edges, edges.conjugate(e))
    }

    /// Coverage of `e` next to its endpoint `v`.
    pub fn local_coverage(&self, edges: &EdgeStore, e: EdgeId, v: VertexId) -> Result<f64> {
        if edges.edge_start(e) == v {
            Ok(self.coverage_of_start(edges, e))
        } else if edges.edge_end(e) == v {
            Ok(self.coverage_of_end(edges, e))
        } else {
            bail!("{v:?} is not an endpoint of {e:?}")
        }
    }

    pub fn on_merge(&self, edges: &mut EdgeStore, old: &[EdgeId], new: EdgeId) {
        let mut kmers_left = self.averaging_range;
        let mut acc: u64 = 0;
        for &e in old {
            let length = edges.length(e);
            if kmers_left >= length {
                acc = acc.saturating_add(self.raw_flanking(edges, e));
                kmers_left -= length;
            } else {
                if kmers_left != 0 {
                    acc = acc.saturating_add(self.interpolate(edges, e, kmers_left));
                }
                break;
            }
        }
        self.set_raw_flanking(edges, new, acc);
    }

    pub fn on_glue(&self, edges: &mut EdgeStore, new: EdgeId, first: EdgeId, second: EdgeId) {
        let sum = self
            .raw_flanking(edges, first)
            .saturating_add(self.raw_flanking(edges, second));
        self.set_raw_flanking(edges, new, sum);
    }

    pub fn on_split(&self, edges: &mut EdgeStore, old: EdgeId, head: EdgeId, _tail: EdgeId) {
        // hard to apportion without going back to the k-mer counts
        let raw = self.raw_flanking(edges, old);
        self.set_raw_flanking(edges, head, raw);
    }

    pub fn on_delete(&self, edges: &mut EdgeStore, e: EdgeId) {
        self.set_raw_flanking(edges, e, 0);
    }

    pub fn save(&self, edges: &EdgeStore, e: EdgeId) -> u64 {
        self.raw_flanking(edges, e)
    }

    pub fn load(&self, edges: &mut EdgeStore, e: EdgeId, raw: u64) {
        self.set_raw_flanking(edges, e, raw);
    }

    /// Writes the raw counter of `e` as a decimal token.
    pub fn save_to<W: Write>(&self, edges: &EdgeStore, e: EdgeId, mut writer: W) -> Result<()> {
        write!(writer, "{}", self.save(edges, e))?;
        Ok(())
    }

    /// Reads one whitespace-separated decimal token into the raw counter of `e`.
    pub fn load_from<R: BufRead>(&self, edges: &mut EdgeStore, e: EdgeId, reader: R) -> Result<()> {
        let mut token = Vec::new();
        for byte in reader.bytes() {
            let byte = byte?;
            if byte.is_ascii_whitespace() {
                if token.is_empty() {
                    continue;
                }
                break;
            }
            token.push(byte);
        }
        let token = std::str::from_utf8(&token)?;
        let raw = token
            .parse()
            .with_context(|| format!("bad flanking coverage token {token:?} for {e:?}"))?;
        self.load(edges, e, raw);
        Ok(())
    }
}

impl ActionHandler for FlankingCoverage {
    fn name(&self) -> &str {
        "FlankingCoverage"
    }

    fn handle(&self, edges: &mut EdgeStore, event: &GraphEvent) {
        match *event {
            GraphEvent::Add(_) => {}
            GraphEvent::Merge { old, new } => self.on_merge(edges, old, new),
            GraphEvent::Glue { new, first, second } => self.on_glue(edges, new, first, second),
            GraphEvent::Split { old, head, tail } => self.on_split(edges, old, head, tail),
            GraphEvent::Delete(e) => self.on_delete(edges, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{FIRST, K, SECOND};
    use crate::graph::AssemblyGraph;
    use std::io::Cursor;
    use std::sync::Arc;

    fn setup(range: usize) -> (AssemblyGraph, Arc<FlankingCoverage>) {
        let flanking = Arc::new(FlankingCoverage::new(range).unwrap());
        let mut g = AssemblyGraph::new(K).unwrap();
        g.add_handler(flanking.clone());
        (g, flanking)
    }

    #[test]
    fn zero_range_is_rejected() {
        assert!(FlankingCoverage::new(0).is_err());
    }

    #[test]
    fn average_uses_short_edge_length() {
        let (mut g, flanking) = setup(6);
        let short = g.add_edge(FIRST).unwrap();
        let long = g.add_edge(SECOND).unwrap();
        flanking.inc_raw_flanking(g.edges_mut(), short, 12);
        flanking.inc_raw_flanking(g.edges_mut(), long, 30);
        assert_eq!(flanking.average_flanking(g.edges(), short), 3.0);
        assert_eq!(flanking.average_flanking(g.edges(), long), 5.0);
    }

    #[test]
    fn merge_interpolates_at_window_boundary() {
        let (mut g, flanking) = setup(6);
        let first = g.add_edge(FIRST).unwrap();
        let second = g.add_edge(SECOND).unwrap();
        flanking.load(g.edges_mut(), first, 12);
        flanking.load(g.edges_mut(), second, 50);
        let second_conj = g.edges().conjugate(second);
        flanking.load(g.edges_mut(), second_conj, 18);

        let merged = g.merge_path(&[first, second]).unwrap();
        // 12 + round(50 / 6 * 2)
        assert_eq!(flanking.raw_flanking(g.edges(), merged), 29);
        // the conjugate path starts with the 10 k-mers of the conjugate of `second`
        let merged_conj = g.edges().conjugate(merged);
        assert_eq!(flanking.raw_flanking(g.edges(), merged_conj), 18);
        assert_eq!(flanking.coverage_of_end(g.edges(), merged), 3.0);
    }

    #[test]
    fn merge_within_window_sums_everything() {
        let (mut g, flanking) = setup(50);
        let first = g.add_edge(FIRST).unwrap();
        let second = g.add_edge(SECOND).unwrap();
        flanking.load(g.edges_mut(), first, 12);
        flanking.load(g.edges_mut(), second, 50);
        let merged = g.merge_path(&[first, second]).unwrap();
        assert_eq!(flanking.raw_flanking(g.edges(), merged), 62);
    }

    #[test]
    fn merge_stops_when_first_edge_fills_window() {
        let (mut g, flanking) = setup(4);
        let first = g.add_edge(FIRST).unwrap();
        let second = g.add_edge(SECOND).unwrap();
        flanking.load(g.edges_mut(), first, 12);
        flanking.load(g.edges_mut(), second, 50);
        let merged = g.merge_path(&[first, second]).unwrap();
        assert_eq!(flanking.raw_flanking(g.edges(), merged), 12);
    }

    #[test]
    fn glue_sums_counters() {
        let (mut g, flanking) = setup(6);
        let a = g.add_edge(b"AACCTTGA").unwrap();
        let b = g.add_edge(b"AACCATTGA").unwrap();
        flanking.load(g.edges_mut(), a, 7);
        flanking.load(g.edges_mut(), b, 9);
        let glued = g.glue_edges(a, b).unwrap();
        assert_eq!(flanking.raw_flanking(g.edges(), glued), 16);
        assert_eq!(flanking.raw_flanking(g.edges(), g.edges().conjugate(glued)), 0);
    }

    #[test]
    fn split_gives_everything_to_head() {
        let (mut g, flanking) = setup(6);
        let e = g.add_edge(SECOND).unwrap();
        let conj = g.edges().conjugate(e);
        flanking.load(g.edges_mut(), e, 40);
        flanking.load(g.edges_mut(), conj, 21);
        let (head, tail) = g.split_edge(e, 4).unwrap();
        assert_eq!(flanking.raw_flanking(g.edges(), head), 40);
        assert_eq!(flanking.raw_flanking(g.edges(), tail), 0);
        // the conjugate of the tail heads the split conjugate
        let tail_conj = g.edges().conjugate(tail);
        assert_eq!(flanking.raw_flanking(g.edges(), tail_conj), 21);
        assert_eq!(flanking.coverage_of_end(g.edges(), tail), 3.5);
    }

    #[test]
    fn delete_resets_counter() {
        let (mut g, flanking) = setup(6);
        let e = g.add_edge(SECOND).unwrap();
        flanking.load(g.edges_mut(), e, 40);
        flanking.handle(g.edges_mut(), &GraphEvent::Delete(e));
        assert_eq!(flanking.average_flanking(g.edges(), e), 0.0);
    }

    #[test]
    fn local_coverage_picks_the_right_end() {
        let (mut g, flanking) = setup(6);
        let first = g.add_edge(FIRST).unwrap();
        let second = g.add_edge(SECOND).unwrap();
        flanking.load(g.edges_mut(), first, 8);
        let conj = g.edges().conjugate(first);
        flanking.load(g.edges_mut(), conj, 4);
        let (start, end) = (g.edges().edge_start(first), g.edges().edge_end(first));
        assert_eq!(flanking.local_coverage(g.edges(), first, start).unwrap(), 2.0);
        assert_eq!(flanking.local_coverage(g.edges(), first, end).unwrap(), 1.0);
        let far = g.edges().edge_end(second);
        assert!(flanking.local_coverage(g.edges(), first, far).is_err());
    }

    #[test]
    fn save_load_round_trip() {
        let (mut g, flanking) = setup(6);
        let e = g.add_edge(SECOND).unwrap();
        for raw in [0, 1, 123_456_789, u64::MAX] {
            flanking.load(g.edges_mut(), e, raw);
            let mut out = Vec::new();
            flanking.save_to(g.edges(), e, &mut out).unwrap();
            flanking.load(g.edges_mut(), e, 17);
            flanking
                .load_from(g.edges_mut(), e, Cursor::new(out))
                .unwrap();
            assert_eq!(flanking.save(g.edges(), e), raw);
        }
        assert!(flanking
            .load_from(g.edges_mut(), e, Cursor::new(b"-3 4".to_vec()))
            .is_err());
    }
}
