use crate::model::Edge;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Append-only edge sink shared by every task of a crawl batch.
#[derive(Debug, Clone, Default)]
pub struct EdgeCollector {
    edges: Arc<Mutex<Vec<Edge>>>,
}

impl EdgeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn extend(&self, edges: impl IntoIterator<Item = Edge>) {
        self.edges.lock().await.extend(edges);
    }

    pub async fn len(&self) -> usize {
        self.edges.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.edges.lock().await.is_empty()
    }

    /// Copy of everything collected so far, in no particular order.
    pub async fn snapshot(&self) -> Vec<Edge> {
        self.edges.lock().await.clone()
    }
}

/// Every ordered pair of distinct pages edited by one user.
pub fn clique_edges(pages: &[String]) -> Vec<Edge> {
    let mut edges = Vec::with_capacity(pages.len() * pages.len().saturating_sub(1));
    for from in pages {
        for to in pages {
            if from != to {
                edges.push(Edge::new(from.clone(), to.clone()));
            }
        }
    }
    edges
}

/// Hyperlinks from `source` to pages inside `pages`.
pub fn page_link_edges(source: &str, links: &[String], pages: &HashSet<String>) -> Vec<Edge> {
    links
        .iter()
        .filter(|target| pages.contains(target.as_str()))
        .map(|target| Edge::new(source, target.clone()))
        .collect()
}

/// Deduplicated edge set plus, per target, the sorted distinct sources pointing at it.
#[derive(Debug, Clone, Default)]
pub struct InDegreeIndex {
    edges: BTreeSet<Edge>,
    incoming: BTreeMap<String, Vec<String>>,
}

impl InDegreeIndex {
    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Self {
        let edges: BTreeSet<Edge> = edges.into_iter().collect();

        let mut incoming: BTreeMap<String, Vec<String>> = BTreeMap::new();
        // BTreeSet order is (from, to), so each source list is filled already sorted.
        for edge in &edges {
            incoming
                .entry(edge.to.clone())
                .or_default()
                .push(edge.from.clone());
        }

        Self { edges, incoming }
    }

    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    pub fn total_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, from: &str, to: &str) -> bool {
        self.edges.contains(&Edge::new(from, to))
    }

    pub fn sources(&self, target: &str) -> &[String] {
        self.incoming.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_degree(&self, node: &str) -> usize {
        self.sources(node).len()
    }

    /// Targets with at least one incoming edge, with their sources.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.incoming.iter().map(|(t, s)| (t.as_str(), s.as_slice()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeScore {
    pub id: String,
    pub in_degree: usize,
    pub score: f64,
}

pub fn in_degree_score(in_degree: usize, total_edges: usize) -> f64 {
    if total_edges == 0 {
        return 0.0;
    }
    in_degree as f64 / total_edges as f64 * 1000.0
}

/// Nodes with incoming edges, highest score first, ties by identifier.
///
/// The total is shared by every node, so ordering on the integer in-degree gives the
/// same order as the score without comparing floats.
pub fn rank_by_in_degree(index: &InDegreeIndex) -> Vec<NodeScore> {
    let total = index.total_edges();
    let mut ranking: Vec<NodeScore> = index
        .iter()
        .map(|(id, sources)| NodeScore {
            id: id.to_string(),
            in_degree: sources.len(),
            score: in_degree_score(sources.len(), total),
        })
        .collect();

    ranking.sort_by(|a, b| b.in_degree.cmp(&a.in_degree).then_with(|| a.id.cmp(&b.id)));
    ranking
}

/// The focal node's reciprocal partners, plus the focal node itself when it has any.
pub fn mutual_neighbors(index: &InDegreeIndex, focal: &str) -> BTreeSet<String> {
    let mut mutual = BTreeSet::new();
    for source in index.sources(focal) {
        if source != focal && index.contains(focal, source) {
            mutual.insert(source.clone());
        }
    }
    if !mutual.is_empty() {
        mutual.insert(focal.to_string());
    }
    mutual
}
