//! A condensed de Bruijn graph: vertices are (k-1)-mers, edges are non-branching
//! nucleotide paths. Every vertex and edge has a conjugate (its reverse complement).
//! Topology changes are reported to registered [`ActionHandler`]s as [`GraphEvent`]s.

use crate::kmer::{is_nucl, reverse_complement};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use anyhow::{ensure, Result};
use log::trace;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(usize);

impl EdgeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(usize);

impl VertexId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Per-edge coverage counters. The flanking counter covers the start of the edge;
/// the end of the edge is covered by the flanking counter of its conjugate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeData {
    pub raw_coverage: u64,
    pub flanking_coverage: u64,
}

#[derive(Debug, Clone)]
struct Edge {
    nucls: Vec<u8>,
    start: VertexId,
    end: VertexId,
    conjugate: EdgeId,
    data: EdgeData,
}

#[derive(Debug, Clone)]
struct Vertex {
    key: Vec<u8>,
    conjugate: VertexId,
    outgoing: Vec<EdgeId>,
    incoming: Vec<EdgeId>,
}

/// Edge storage shared with the handlers. Accessors panic on a handle that is not live.
#[derive(Debug)]
pub struct EdgeStore {
    k: usize,
    slots: Vec<Option<Edge>>,
    live: usize,
}

impl EdgeStore {
    fn new(k: usize) -> Self {
        Self {
            k,
            slots: Vec::new(),
            live: 0,
        }
    }

    fn edge(&self, e: EdgeId) -> &Edge {
        self.slots
            .get(e.0)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("{e:?} is not in the graph"))
    }

    fn edge_mut(&mut self, e: EdgeId) -> &mut Edge {
        self.slots
            .get_mut(e.0)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("{e:?} is not in the graph"))
    }

    fn next_id(&self) -> EdgeId {
        EdgeId(self.slots.len())
    }

    fn insert(&mut self, edge: Edge) -> EdgeId {
        let e = self.next_id();
        self.slots.push(Some(edge));
        self.live += 1;
        e
    }

    fn remove(&mut self, e: EdgeId) -> Edge {
        let edge = self.slots[e.0]
            .take()
            .unwrap_or_else(|| panic!("{e:?} is not in the graph"));
        self.live -= 1;
        edge
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn contains(&self, e: EdgeId) -> bool {
        matches!(self.slots.get(e.0), Some(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live edges in creation order.
    pub fn ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| EdgeId(i))
    }

    /// Number of k-mers on the edge.
    #[inline]
    pub fn length(&self, e: EdgeId) -> usize {
        self.edge(e).nucls.len() + 1 - self.k
    }

    pub fn nucls(&self, e: EdgeId) -> &[u8] {
        &self.edge(e).nucls
    }

    #[inline]
    pub fn conjugate(&self, e: EdgeId) -> EdgeId {
        self.edge(e).conjugate
    }

    pub fn edge_start(&self, e: EdgeId) -> VertexId {
        self.edge(e).start
    }

    pub fn edge_end(&self, e: EdgeId) -> VertexId {
        self.edge(e).end
    }

    #[inline]
    pub fn data(&self, e: EdgeId) -> &EdgeData {
        &self.edge(e).data
    }

    #[inline]
    pub fn data_mut(&mut self, e: EdgeId) -> &mut EdgeData {
        &mut self.edge_mut(e).data
    }
}

/// A topology change. Every edge named by an event is live while handlers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent<'a> {
    Add(EdgeId),
    /// `old` is the merged path, in path order.
    Merge { old: &'a [EdgeId], new: EdgeId },
    Glue {
        new: EdgeId,
        first: EdgeId,
        second: EdgeId,
    },
    Split {
        old: EdgeId,
        head: EdgeId,
        tail: EdgeId,
    },
    Delete(EdgeId),
}

pub trait ActionHandler: Send + Sync {
    fn name(&self) -> &str;
    fn handle(&self, edges: &mut EdgeStore, event: &GraphEvent);
}

pub struct AssemblyGraph {
    edges: EdgeStore,
    vertices: Vec<Option<Vertex>>,
    by_key: HashMap<Vec<u8>, VertexId>,
    handlers: Vec<Arc<dyn ActionHandler>>,
}

impl AssemblyGraph {
    /// A graph of `k`-mers, whose vertices are (k-1)-mers.
    pub fn new(k: usize) -> Result<Self> {
        ensure!(k >= 2, "k must be at least 2, got {k}");
        Ok(Self {
            edges: EdgeStore::new(k),
            vertices: Vec::new(),
            by_key: HashMap::new(),
            handlers: Vec::new(),
        })
    }

    pub fn k(&self) -> usize {
        self.edges.k
    }

    pub fn edges(&self) -> &EdgeStore {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> &mut EdgeStore {
        &mut self.edges
    }

    /// Handlers are notified in registration order.
    pub fn add_handler(&mut self, handler: Arc<dyn ActionHandler>) {
        trace!("Registering handler {}", handler.name());
        self.handlers.push(handler);
    }

    fn fire(&mut self, event: GraphEvent) {
        trace!("{event:?}");
        for handler in &self.handlers {
            handler.handle(&mut self.edges, &event);
        }
    }

    fn vertex(&self, v: VertexId) -> &Vertex {
        self.vertices
            .get(v.0)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("{v:?} is not in the graph"))
    }

    fn vertex_mut(&mut self, v: VertexId) -> &mut Vertex {
        self.vertices
            .get_mut(v.0)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("{v:?} is not in the graph"))
    }

    pub fn vertex_count(&self) -> usize {
        self.by_key.len()
    }

    pub fn find_vertex(&self, key: &[u8]) -> Option<VertexId> {
        self.by_key.get(key).copied()
    }

    pub fn vertex_key(&self, v: VertexId) -> &[u8] {
        &self.vertex(v).key
    }

    pub fn conjugate_vertex(&self, v: VertexId) -> VertexId {
        self.vertex(v).conjugate
    }

    pub fn outgoing_edges(&self, v: VertexId) -> &[EdgeId] {
        &self.vertex(v).outgoing
    }

    pub fn incoming_edges(&self, v: VertexId) -> &[EdgeId] {
        &self.vertex(v).incoming
    }

    fn get_or_add_vertex(&mut self, key: &[u8]) -> VertexId {
        if let Some(v) = self.find_vertex(key) {
            return v;
        }
        let v = VertexId(self.vertices.len());
        let rc = reverse_complement(key);
        if rc == key {
            self.vertices.push(Some(Vertex {
                key: key.to_vec(),
                conjugate: v,
                outgoing: Vec::new(),
                incoming: Vec::new(),
            }));
        } else {
            let conj = VertexId(v.0 + 1);
            self.vertices.push(Some(Vertex {
                key: key.to_vec(),
                conjugate: conj,
                outgoing: Vec::new(),
                incoming: Vec::new(),
            }));
            self.vertices.push(Some(Vertex {
                key: rc.clone(),
                conjugate: v,
                outgoing: Vec::new(),
                incoming: Vec::new(),
            }));
            self.by_key.insert(rc, conj);
        }
        self.by_key.insert(key.to_vec(), v);
        v
    }

    fn link(&mut self, e: EdgeId) {
        let (start, end) = (self.edges.edge_start(e), self.edges.edge_end(e));
        self.vertex_mut(start).outgoing.push(e);
        self.vertex_mut(end).incoming.push(e);
    }

    /// Adds an edge and its conjugate without notifying handlers.
    fn hidden_add_edge(&mut self, nucls: Vec<u8>) -> EdgeId {
        let k1 = self.k() - 1;
        let start = self.get_or_add_vertex(&nucls[..k1]);
        let end = self.get_or_add_vertex(&nucls[nucls.len() - k1..]);
        let rc = reverse_complement(&nucls);
        let e = self.edges.next_id();
        if rc == nucls {
            self.edges.insert(Edge {
                nucls,
                start,
                end,
                conjugate: e,
                data: EdgeData::default(),
            });
            self.link(e);
        } else {
            let conj_start = self.conjugate_vertex(end);
            let conj_end = self.conjugate_vertex(start);
            self.edges.insert(Edge {
                nucls,
                start,
                end,
                conjugate: EdgeId(e.0 + 1),
                data: EdgeData::default(),
            });
            let conj = self.edges.insert(Edge {
                nucls: rc,
                start: conj_start,
                end: conj_end,
                conjugate: e,
                data: EdgeData::default(),
            });
            self.link(e);
            self.link(conj);
        }
        e
    }

    fn fire_added(&mut self, e: EdgeId) {
        self.fire(GraphEvent::Add(e));
        let conj = self.edges.conjugate(e);
        if conj != e {
            self.fire(GraphEvent::Add(conj));
        }
    }

    fn drop_if_isolated(&mut self, v: VertexId) {
        let isolated = match self.vertices.get(v.0).and_then(Option::as_ref) {
            Some(vertex) => vertex.outgoing.is_empty() && vertex.incoming.is_empty(),
            None => false,
        };
        if !isolated {
            return;
        }
        let conj = self.conjugate_vertex(v);
        for u in [v, conj] {
            if let Some(vertex) = self.vertices[u.0].take() {
                self.by_key.remove(&vertex.key);
            }
        }
    }

    /// Deletes `ids` together with their conjugates, notifying handlers first.
    fn delete_with_conjugates(&mut self, ids: &[EdgeId]) {
        let mut doomed = Vec::with_capacity(ids.len() * 2);
        for &e in ids {
            for x in [e, self.edges.conjugate(e)] {
                if !doomed.contains(&x) {
                    doomed.push(x);
                }
            }
        }
        for &e in &doomed {
            self.fire(GraphEvent::Delete(e));
        }
        let mut touched = Vec::with_capacity(doomed.len() * 2);
        for &e in &doomed {
            let edge = self.edges.remove(e);
            self.vertex_mut(edge.start).outgoing.retain(|&x| x != e);
            self.vertex_mut(edge.end).incoming.retain(|&x| x != e);
            touched.push(edge.start);
            touched.push(edge.end);
        }
        for v in touched {
            self.drop_if_isolated(v);
        }
    }

    fn ensure_live(&self, e: EdgeId) -> Result<()> {
        ensure!(self.edges.contains(e), "{e:?} is not in the graph");
        Ok(())
    }

    pub fn add_edge(&mut self, nucls: &[u8]) -> Result<EdgeId> {
        ensure!(
            nucls.len() >= self.k(),
            "edge of {} nucleotides is shorter than k = {}",
            nucls.len(),
            self.k()
        );
        ensure!(
            nucls.iter().all(|&b| is_nucl(b)),
            "edge sequence contains non-nucleotide symbols"
        );
        let e = self.hidden_add_edge(nucls.to_vec());
        self.fire_added(e);
        Ok(e)
    }

    /// Replaces a path of consecutive edges (and its conjugate path) by a single edge.
    pub fn merge_path(&mut self, path: &[EdgeId]) -> Result<EdgeId> {
        ensure!(path.len() >= 2, "a merged path needs at least two edges");
        let mut seen = HashSet::with_capacity(path.len());
        for &e in path {
            self.ensure_live(e)?;
            ensure!(seen.insert(e), "path visits {e:?} twice");
        }
        for &e in path {
            ensure!(
                !seen.contains(&self.edges.conjugate(e)),
                "path overlaps its own conjugate at {e:?}"
            );
        }
        for pair in path.windows(2) {
            ensure!(
                self.edges.edge_end(pair[0]) == self.edges.edge_start(pair[1]),
                "{:?} does not follow {:?}",
                pair[1],
                pair[0]
            );
        }

        let k1 = self.k() - 1;
        let mut nucls = self.edges.nucls(path[0]).to_vec();
        for &e in &path[1..] {
            nucls.extend_from_slice(&self.edges.nucls(e)[k1..]);
        }
        let new = self.hidden_add_edge(nucls);
        self.fire_added(new);
        self.fire(GraphEvent::Merge { old: path, new });
        let new_conj = self.edges.conjugate(new);
        if new_conj != new {
            let conj_path: Vec<EdgeId> = path
                .iter()
                .rev()
                .map(|&e| self.edges.conjugate(e))
                .collect();
            self.fire(GraphEvent::Merge {
                old: &conj_path,
                new: new_conj,
            });
        }
        self.delete_with_conjugates(path);
        Ok(new)
    }

    /// Identifies two parallel edges. The result carries the sequence of `second`.
    pub fn glue_edges(&mut self, first: EdgeId, second: EdgeId) -> Result<EdgeId> {
        self.ensure_live(first)?;
        self.ensure_live(second)?;
        ensure!(first != second, "cannot glue {first:?} to itself");
        ensure!(
            self.edges.conjugate(first) != second,
            "cannot glue {first:?} to its conjugate"
        );
        ensure!(
            (self.edges.conjugate(first) == first) == (self.edges.conjugate(second) == second),
            "cannot glue {first:?} and {second:?}: only one of them is self-conjugate"
        );
        ensure!(
            self.edges.edge_start(first) == self.edges.edge_start(second)
                && self.edges.edge_end(first) == self.edges.edge_end(second),
            "{first:?} and {second:?} do not share their endpoints"
        );

        let new = self.hidden_add_edge(self.edges.nucls(second).to_vec());
        self.fire_added(new);
        self.fire(GraphEvent::Glue { new, first, second });
        let new_conj = self.edges.conjugate(new);
        if new_conj != new {
            let (first_conj, second_conj) =
                (self.edges.conjugate(first), self.edges.conjugate(second));
            self.fire(GraphEvent::Glue {
                new: new_conj,
                first: first_conj,
                second: second_conj,
            });
        }
        self.delete_with_conjugates(&[first, second]);
        Ok(new)
    }

    /// Cuts `e` after its first `pos` k-mers.
    pub fn split_edge(&mut self, e: EdgeId, pos: usize) -> Result<(EdgeId, EdgeId)> {
        self.ensure_live(e)?;
        let conj = self.edges.conjugate(e);
        ensure!(conj != e, "cannot split self-conjugate {e:?}");
        let length = self.edges.length(e);
        ensure!(
            pos > 0 && pos < length,
            "split position {pos} is outside 1..{length}"
        );

        let nucls = self.edges.nucls(e).to_vec();
        let k1 = self.k() - 1;
        let head = self.hidden_add_edge(nucls[..pos + k1].to_vec());
        let tail = self.hidden_add_edge(nucls[pos..].to_vec());
        self.fire_added(head);
        self.fire_added(tail);
        self.fire(GraphEvent::Split { old: e, head, tail });
        let (head_conj, tail_conj) = (self.edges.conjugate(head), self.edges.conjugate(tail));
        self.fire(GraphEvent::Split {
            old: conj,
            head: tail_conj,
            tail: head_conj,
        });
        self.delete_with_conjugates(&[e]);
        Ok((head, tail))
    }

    /// Removes `e` and its conjugate.
    pub fn delete_edge(&mut self, e: EdgeId) -> Result<()> {
        self.ensure_live(e)?;
        self.delete_with_conjugates(&[e]);
        Ok(())
    }
}
