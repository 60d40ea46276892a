//! Fragment connectivity.
//!
//! [`Graph`] is a small undirected, edge-labelled adjacency map. Every edge is
//! stored under both endpoints by the graph itself, so `contains_edge(a, b)`
//! and `contains_edge(b, a)` can never disagree and callers insert each
//! connection exactly once.
//!
//! [`FragmentGraph`] specialises it for one fragmented body: nodes are
//! fragment ids, edge data is the physics joint holding the pair together, and
//! it tracks the anchored set plus the counts that drive collapse decisions.
//! [`FloodFill`] walks the graph from the anchors and can be advanced under a
//! frame budget.

use crate::budget::FrameBudget;
use crate::physics::JointHandle;
use crate::scene::FragmentId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

/// Lookup and insertion failures of [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    NodeNotFound,
    EdgeNotFound,
    NodeAlreadyExists,
    EdgeAlreadyExists,
    SelfLoop,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            GraphError::NodeNotFound => "node not found",
            GraphError::EdgeNotFound => "edge not found",
            GraphError::NodeAlreadyExists => "node already exists",
            GraphError::EdgeAlreadyExists => "edge already exists",
            GraphError::SelfLoop => "edge would connect a node to itself",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for GraphError {}

pub type GraphResult<T> = Result<T, GraphError>;

/// Undirected graph with data on every edge.
#[derive(Debug, Clone)]
pub struct Graph<N, E> {
    adjacency: HashMap<N, HashMap<N, E>>,
    edge_count: usize,
}

impl<N, E> Default for Graph<N, E> {
    fn default() -> Self {
        Self {
            adjacency: HashMap::new(),
            edge_count: 0,
        }
    }
}

impl<N: Copy + Eq + Hash, E: Clone> Graph<N, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: N) -> GraphResult<()> {
        if self.adjacency.contains_key(&node) {
            return Err(GraphError::NodeAlreadyExists);
        }
        self.adjacency.insert(node, HashMap::new());
        Ok(())
    }

    /// Connect `a` and `b`. Both nodes must already exist.
    pub fn add_edge(&mut self, a: N, b: N, data: E) -> GraphResult<()> {
        if a == b {
            return Err(GraphError::SelfLoop);
        }
        if !self.contains_node(a) || !self.contains_node(b) {
            return Err(GraphError::NodeNotFound);
        }
        if self.contains_edge(a, b) {
            return Err(GraphError::EdgeAlreadyExists);
        }
        if let Some(edges) = self.adjacency.get_mut(&a) {
            edges.insert(b, data.clone());
        }
        if let Some(edges) = self.adjacency.get_mut(&b) {
            edges.insert(a, data);
        }
        self.edge_count += 1;
        Ok(())
    }

    /// Remove `node` and every edge touching it. Returns the severed edges
    /// keyed by the former neighbour.
    pub fn remove_node(&mut self, node: N) -> GraphResult<HashMap<N, E>> {
        let edges = self
            .adjacency
            .remove(&node)
            .ok_or(GraphError::NodeNotFound)?;
        for neighbor in edges.keys() {
            if let Some(back) = self.adjacency.get_mut(neighbor) {
                back.remove(&node);
            }
        }
        self.edge_count -= edges.len();
        Ok(edges)
    }

    pub fn remove_edge(&mut self, a: N, b: N) -> GraphResult<E> {
        let data = self
            .adjacency
            .get_mut(&a)
            .ok_or(GraphError::NodeNotFound)?
            .remove(&b)
            .ok_or(GraphError::EdgeNotFound)?;
        if let Some(back) = self.adjacency.get_mut(&b) {
            back.remove(&a);
        }
        self.edge_count -= 1;
        Ok(data)
    }

    pub fn contains_node(&self, node: N) -> bool {
        self.adjacency.contains_key(&node)
    }

    pub fn contains_edge(&self, a: N, b: N) -> bool {
        self.adjacency
            .get(&a)
            .is_some_and(|edges| edges.contains_key(&b))
    }

    /// Neighbours of `node` mapped to the data on the connecting edge.
    pub fn neighbors(&self, node: N) -> GraphResult<&HashMap<N, E>> {
        self.adjacency.get(&node).ok_or(GraphError::NodeNotFound)
    }

    pub fn edge_data(&self, a: N, b: N) -> GraphResult<&E> {
        self.neighbors(a)?.get(&b).ok_or(GraphError::EdgeNotFound)
    }

    pub fn update_edge_data(&mut self, a: N, b: N, data: E) -> GraphResult<()> {
        if !self.contains_edge(a, b) {
            return Err(if self.contains_node(a) {
                GraphError::EdgeNotFound
            } else {
                GraphError::NodeNotFound
            });
        }
        if let Some(edges) = self.adjacency.get_mut(&a) {
            edges.insert(b, data.clone());
        }
        if let Some(edges) = self.adjacency.get_mut(&b) {
            edges.insert(a, data);
        }
        Ok(())
    }

    pub fn nodes(&self) -> impl Iterator<Item = N> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }
}

// ── Flood fill ────────────────────────────────────────────────────────────────

/// Resumable breadth-first reachability from a seed set.
#[derive(Debug, Clone)]
pub struct FloodFill<N> {
    queue: VecDeque<N>,
    visited: HashSet<N>,
}

impl<N: Copy + Eq + Hash> FloodFill<N> {
    pub fn new(seeds: impl IntoIterator<Item = N>) -> Self {
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        for seed in seeds {
            if visited.insert(seed) {
                queue.push_back(seed);
            }
        }
        Self { queue, visited }
    }

    /// Visit nodes until the queue drains or the budget runs out.
    /// Returns `true` once every reachable node has been visited.
    pub fn advance<E: Clone>(&mut self, graph: &Graph<N, E>, budget: &FrameBudget) -> bool {
        while let Some(node) = self.queue.pop_front() {
            if let Ok(neighbors) = graph.neighbors(node) {
                for &next in neighbors.keys() {
                    if self.visited.insert(next) {
                        self.queue.push_back(next);
                    }
                }
            }
            if budget.exhausted() && !self.queue.is_empty() {
                return false;
            }
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn reached(&self, node: N) -> bool {
        self.visited.contains(&node)
    }

    pub fn reached_count(&self) -> usize {
        self.visited.len()
    }
}

// ── Fragment graph ────────────────────────────────────────────────────────────

/// Connectivity of one fragmented body.
#[derive(Debug, Clone, Default)]
pub struct FragmentGraph {
    graph: Graph<FragmentId, JointHandle>,
    joints: HashMap<JointHandle, (FragmentId, FragmentId)>,
    /// `None` when the body had no anchor list at all.
    anchored: Option<HashSet<FragmentId>>,
    initial_fragment_count: usize,
    initial_anchored_count: usize,
}

impl FragmentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fragment(&mut self, fragment: FragmentId) -> GraphResult<()> {
        self.graph.add_node(fragment)
    }

    /// Record that `joint` holds `a` and `b` together.
    pub fn connect(&mut self, a: FragmentId, b: FragmentId, joint: JointHandle) -> GraphResult<()> {
        self.graph.add_edge(a, b, joint)?;
        self.joints.insert(joint, (a, b));
        Ok(())
    }

    pub fn is_connected(&self, a: FragmentId, b: FragmentId) -> bool {
        self.graph.contains_edge(a, b)
    }

    pub fn contains(&self, fragment: FragmentId) -> bool {
        self.graph.contains_node(fragment)
    }

    /// Install the anchored set found by anchor detection.
    pub fn set_anchors(&mut self, anchored: Option<HashSet<FragmentId>>) {
        self.initial_anchored_count = anchored.as_ref().map_or(0, HashSet::len);
        self.anchored = anchored;
    }

    /// Freeze the initial fragment count. Called once construction is complete.
    pub fn seal(&mut self) {
        self.initial_fragment_count = self.graph.node_count();
    }

    /// Remove a fragment with all of its connections and its anchor flag.
    /// Returns the joints that held it, paired with the former neighbour.
    pub fn detach(&mut self, fragment: FragmentId) -> GraphResult<Vec<(FragmentId, JointHandle)>> {
        let edges = self.graph.remove_node(fragment)?;
        if let Some(anchored) = self.anchored.as_mut() {
            anchored.remove(&fragment);
        }
        let mut severed: Vec<_> = edges.into_iter().collect();
        severed.sort_unstable_by_key(|(neighbor, _)| *neighbor);
        for (_, joint) in &severed {
            self.joints.remove(joint);
        }
        Ok(severed)
    }

    /// Drop the edge carried by `joint`, if it is still present.
    pub fn sever_joint(&mut self, joint: JointHandle) -> Option<(FragmentId, FragmentId)> {
        let (a, b) = self.joints.remove(&joint)?;
        self.graph.remove_edge(a, b).ok()?;
        Some((a, b))
    }

    pub fn endpoints(&self, joint: JointHandle) -> Option<(FragmentId, FragmentId)> {
        self.joints.get(&joint).copied()
    }

    pub fn joints_of(&self, fragment: FragmentId) -> GraphResult<Vec<JointHandle>> {
        Ok(self.graph.neighbors(fragment)?.values().copied().collect())
    }

    pub fn anchors(&self) -> Option<&HashSet<FragmentId>> {
        self.anchored.as_ref()
    }

    /// True when at least one anchored fragment is still attached.
    pub fn has_anchors(&self) -> bool {
        self.anchored.as_ref().is_some_and(|a| !a.is_empty())
    }

    pub fn is_anchored(&self, fragment: FragmentId) -> bool {
        self.anchored.as_ref().is_some_and(|a| a.contains(&fragment))
    }

    pub fn initial_fragment_count(&self) -> usize {
        self.initial_fragment_count
    }

    pub fn initial_anchored_count(&self) -> usize {
        self.initial_anchored_count
    }

    /// Live fragment count; always the node count of the graph.
    pub fn current_fragment_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn graph(&self) -> &Graph<FragmentId, JointHandle> {
        &self.graph
    }

    /// Live fragments in id order.
    pub fn fragments(&self) -> Vec<FragmentId> {
        let mut ids: Vec<_> = self.graph.nodes().collect();
        ids.sort_unstable();
        ids
    }

    /// A flood fill seeded with every live anchored fragment.
    pub fn flood_from_anchors(&self) -> FloodFill<FragmentId> {
        let mut seeds: Vec<_> = self
            .anchored
            .iter()
            .flatten()
            .copied()
            .filter(|id| self.graph.contains_node(*id))
            .collect();
        seeds.sort_unstable();
        FloodFill::new(seeds)
    }

    /// Live fragments the flood fill did not reach, in id order.
    pub fn unreached(&self, fill: &FloodFill<FragmentId>) -> Vec<FragmentId> {
        self.fragments()
            .into_iter()
            .filter(|id| !fill.reached(*id))
            .collect()
    }
}
