use crate::graph::{ActionHandler, EdgeId, EdgeStore, GraphEvent};

/// Total k-mer coverage of every edge.
#[derive(Debug, Clone, Default)]
pub struct EdgeCoverage;

impl EdgeCoverage {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    pub fn raw_coverage(&self, edges: &EdgeStore, e: EdgeId) -> u64 {
        edges.data(e).raw_coverage
    }

    #[inline]
    pub fn inc_raw_coverage(&self, edges: &mut EdgeStore, e: EdgeId, count: u64) {
        let data = edges.data_mut(e);
        data.raw_coverage = data.raw_coverage.saturating_add(count);
    }

    fn set_raw_coverage(&self, edges: &mut EdgeStore, e: EdgeId, count: u64) {
        edges.data_mut(e).raw_coverage = count;
    }

    /// Average number of occurrences per k-mer.
    pub fn coverage(&self, edges: &EdgeStore, e: EdgeId) -> f64 {
        self.raw_coverage(edges, e) as f64 / edges.length(e) as f64
    }

    fn set_average(&self, edges: &mut EdgeStore, e: EdgeId, average: f64) {
        let raw = (average * edges.length(e) as f64).round() as u64;
        self.set_raw_coverage(edges, e, raw);
    }
}

impl ActionHandler for EdgeCoverage {
    fn name(&self) -> &str {
        "EdgeCoverage"
    }

    fn handle(&self, edges: &mut EdgeStore, event: &GraphEvent) {
        match *event {
            GraphEvent::Add(_) => {}
            GraphEvent::Merge { old, new } => {
                let total = old
                    .iter()
                    .fold(0u64, |acc, &e| acc.saturating_add(self.raw_coverage(edges, e)));
                self.set_raw_coverage(edges, new, total);
            }
            GraphEvent::Glue { new, first, second } => {
                let total = self
                    .raw_coverage(edges, first)
                    .saturating_add(self.raw_coverage(edges, second));
                self.set_raw_coverage(edges, new, total);
            }
            GraphEvent::Split { old, head, tail } => {
                let average = self.coverage(edges, old);
                self.set_average(edges, head, average);
                self.set_average(edges, tail, average);
            }
            GraphEvent::Delete(e) => self.set_raw_coverage(edges, e, 0),
        }
    }
}
