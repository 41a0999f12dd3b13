use crate::graph::{InDegreeIndex, NodeScore, mutual_neighbors, rank_by_in_degree};
use crate::model::{Edge, NodeIndexMap};
use petgraph::algo::dijkstra;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Distance {
    Hops(u32),
    Unreachable,
}

impl Distance {
    pub fn hops(&self) -> Option<u32> {
        match self {
            Distance::Hops(h) => Some(*h),
            Distance::Unreachable => None,
        }
    }
}

/// Unit-weight distances from `focal` to each candidate over the directed edge set.
pub fn shortest_paths<'a>(
    index: &InDegreeIndex,
    focal: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, Distance> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

    for edge in index.edges() {
        let from = *nodes
            .entry(edge.from.as_str())
            .or_insert_with(|| graph.add_node(edge.from.as_str()));
        let to = *nodes
            .entry(edge.to.as_str())
            .or_insert_with(|| graph.add_node(edge.to.as_str()));
        graph.add_edge(from, to, ());
    }

    let reached = nodes
        .get(focal)
        .map(|&start| dijkstra(&graph, start, None, |_| 1u32));

    candidates
        .into_iter()
        .map(|candidate| {
            let distance = if candidate == focal {
                Distance::Hops(0)
            } else {
                nodes
                    .get(candidate)
                    .zip(reached.as_ref())
                    .and_then(|(n, reached)| reached.get(n))
                    .map_or(Distance::Unreachable, |&d| Distance::Hops(d))
            };
            (candidate.to_string(), distance)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionLimits {
    pub mutual: usize,
    pub shortest_path: usize,
    pub total: usize,
    pub use_shortest_paths: bool,
}

impl Default for SelectionLimits {
    fn default() -> Self {
        Self {
            mutual: 25,
            shortest_path: 20,
            total: 60,
            use_shortest_paths: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    Mutual,
    ShortestPath,
    Ranking,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmittedNode {
    pub id: String,
    pub index: usize,
    pub tier: Tier,
    pub in_degree: usize,
    pub score: f64,
    pub distance: Option<Distance>,
}

/// The reduced graph around one focal node.
#[derive(Debug, Clone, Default)]
pub struct InterestGraph {
    pub focal: String,
    pub nodes: NodeIndexMap,
    /// One entry per node of `nodes`, in the same order.
    pub admitted: Vec<AdmittedNode>,
    /// Edges between admitted nodes without self-loops, by (index(from), index(to)).
    pub edges: Vec<Edge>,
}

impl InterestGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, node: &str) -> Option<usize> {
        self.nodes.get(node).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoundedGraphSelector {
    limits: SelectionLimits,
}

struct Admission<'a> {
    limits: &'a SelectionLimits,
    scores: &'a HashMap<&'a str, &'a NodeScore>,
    nodes: NodeIndexMap,
    admitted: Vec<AdmittedNode>,
}

impl Admission<'_> {
    fn full(&self) -> bool {
        self.nodes.len() >= self.limits.total
    }

    fn admit(&mut self, id: &str, tier: Tier, distance: Option<Distance>) -> bool {
        if self.full() || self.nodes.contains_key(id) {
            return false;
        }
        let index = self.nodes.len();
        self.nodes.insert(id.to_string(), index);

        let (in_degree, score) = self
            .scores
            .get(id)
            .map_or((0, 0.0), |s| (s.in_degree, s.score));
        self.admitted.push(AdmittedNode {
            id: id.to_string(),
            index,
            tier,
            in_degree,
            score,
            distance,
        });
        true
    }
}

impl BoundedGraphSelector {
    pub fn new(limits: SelectionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SelectionLimits {
        &self.limits
    }

    pub fn select(&self, index: &InDegreeIndex, focal: &str) -> InterestGraph {
        let ranking = rank_by_in_degree(index);
        let scores: HashMap<&str, &NodeScore> =
            ranking.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut admission = Admission {
            limits: &self.limits,
            scores: &scores,
            nodes: NodeIndexMap::new(),
            admitted: Vec::new(),
        };

        // Tier 1: reciprocal partners of the focal node, by score
        let mutual = mutual_neighbors(index, focal);
        let mut tier1: Vec<&NodeScore> = ranking.iter().filter(|s| mutual.contains(&s.id)).collect();
        tier1.truncate(self.limits.mutual);
        for node in tier1 {
            admission.admit(&node.id, Tier::Mutual, None);
        }

        // Tier 2: closest reachable nodes
        if self.limits.use_shortest_paths {
            let distances = shortest_paths(index, focal, ranking.iter().map(|s| s.id.as_str()));
            let mut tier2: Vec<(&NodeScore, u32)> = ranking
                .iter()
                .filter(|s| !admission.nodes.contains_key(&s.id))
                .filter_map(|s| distances.get(&s.id).and_then(Distance::hops).map(|d| (s, d)))
                .collect();
            tier2.sort_by(|(a, da), (b, db)| {
                da.cmp(db)
                    .then_with(|| b.in_degree.cmp(&a.in_degree))
                    .then_with(|| a.id.cmp(&b.id))
            });

            let mut taken = 0;
            for (node, hops) in tier2 {
                if taken >= self.limits.shortest_path {
                    break;
                }
                if admission.admit(&node.id, Tier::ShortestPath, Some(Distance::Hops(hops))) {
                    taken += 1;
                }
            }
        }

        // Tier 3: global ranking fills what is left
        for node in &ranking {
            if admission.full() {
                break;
            }
            admission.admit(&node.id, Tier::Ranking, None);
        }

        let Admission {
            nodes, admitted, ..
        } = admission;

        let mut edges: Vec<Edge> = index
            .edges()
            .iter()
            .filter(|e| !e.is_self_loop())
            .filter(|e| nodes.contains_key(&e.from) && nodes.contains_key(&e.to))
            .cloned()
            .collect();
        edges.sort_by_key(|e| (nodes[&e.from], nodes[&e.to]));

        debug!(
            "Selected {} nodes and {} edges around {}",
            nodes.len(),
            edges.len(),
            focal
        );

        InterestGraph {
            focal: focal.to_string(),
            nodes,
            admitted,
            edges,
        }
    }
}

/// Deduplicate, index, rank and select in one step.
pub fn build_interest_graph(
    edges: impl IntoIterator<Item = Edge>,
    focal: &str,
    limits: SelectionLimits,
) -> InterestGraph {
    let index = InDegreeIndex::from_edges(edges);
    BoundedGraphSelector::new(limits).select(&index, focal)
}
