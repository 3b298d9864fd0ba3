//! Persistent directed link graph with per-page metrics (§4.5). Ported from
//! the source's networkx-based `storage/graph_store.py` onto `petgraph`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

const ANCHOR_TEXT_RING: usize = 5;
const SCORE_HISTORY_RING: usize = 10;
const DAMPING: f64 = 0.85;
const MAX_PAGERANK_ITERATIONS: usize = 100;
const PAGERANK_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreHistoryEntry {
    pub score: f64,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub url: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub observations: u64,
    pub status: u16,
    pub title: Option<String>,
    pub webring_hits: u64,
    pub outbound_count: u64,
    pub outbound_domains: HashSet<String>,
    pub last_score: Option<f64>,
    pub last_action: Option<String>,
    pub score_history: VecDeque<ScoreHistoryEntry>,
    pub pagerank: f64,
    pub component_id: u64,
    pub component_size: u64,
    pub component_density: f64,
    pub reciprocal_links: u64,
    pub odd_neighbor_ratio: f64,
    pub graph_score: f64,
}

impl NodeRecord {
    fn new(url: &str, now: DateTime<Utc>) -> Self {
        Self {
            url: url.to_string(),
            first_seen: now,
            last_seen: now,
            observations: 0,
            status: 0,
            title: None,
            webring_hits: 0,
            outbound_count: 0,
            outbound_domains: HashSet::new(),
            last_score: None,
            last_action: None,
            score_history: VecDeque::new(),
            pagerank: 0.0,
            component_id: 0,
            component_size: 0,
            component_density: 0.0,
            reciprocal_links: 0,
            odd_neighbor_ratio: 0.0,
            graph_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub weight: u64,
    pub last_seen: DateTime<Utc>,
    pub anchor_texts: VecDeque<String>,
    pub rel: HashSet<String>,
}

impl EdgeRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self { weight: 0, last_seen: now, anchor_texts: VecDeque::new(), rel: HashSet::new() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkRef {
    pub target: String,
    pub anchor_text: Option<String>,
    pub rel: Vec<String>,
}

/// The subset of a node's computed metrics the extractor folds back into
/// `features.graph` (§4.6 step 5).
#[derive(Debug, Clone, Default)]
pub struct PageMetrics {
    pub out_degree: u64,
    pub in_degree: u64,
    pub reciprocal_links: u64,
    pub component_id: u64,
    pub component_size: u64,
    pub component_density: f64,
    pub pagerank: f64,
    pub odd_neighbor_ratio: f64,
    pub graph_score: f64,
}

pub struct GraphStore {
    graph: DiGraph<NodeRecord, EdgeRecord>,
    index: HashMap<String, NodeIndex>,
    dirty: bool,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self { graph: DiGraph::new(), index: HashMap::new(), dirty: true }
    }

    fn ensure_node(&mut self, url: &str, now: DateTime<Utc>) -> NodeIndex {
        if let Some(idx) = self.index.get(url) {
            return *idx;
        }
        let idx = self.graph.add_node(NodeRecord::new(url, now));
        self.index.insert(url.to_string(), idx);
        self.dirty = true;
        idx
    }

    /// Upserts the source node and every outbound link's edge, then
    /// recomputes and returns the source node's metrics.
    pub fn record_page(
        &mut self,
        source: &str,
        fetched_at: DateTime<Utc>,
        status: u16,
        title: Option<&str>,
        links: &[LinkRef],
        webring_hits_delta: u64,
    ) -> PageMetrics {
        let source_idx = self.ensure_node(source, fetched_at);
        {
            let node = &mut self.graph[source_idx];
            node.observations += 1;
            node.last_seen = fetched_at;
            node.status = status;
            if let Some(title) = title {
                node.title = Some(title.chars().take(200).collect());
            }
            node.webring_hits += webring_hits_delta;
        }

        for link in links {
            if link.target == source {
                continue; // self-loops forbidden (§3)
            }
            let target_idx = self.ensure_node(&link.target, fetched_at);
            self.upsert_edge(source_idx, target_idx, link, fetched_at);
        }

        self.recompute_outbound(source_idx);
        self.recompute_metrics_for(source_idx)
    }

    fn upsert_edge(&mut self, source: NodeIndex, target: NodeIndex, link: &LinkRef, now: DateTime<Utc>) {
        let existing = self.graph.find_edge(source, target);
        let edge_idx = match existing {
            Some(idx) => idx,
            None => {
                self.dirty = true;
                self.graph.add_edge(source, target, EdgeRecord::new(now))
            }
        };
        let edge = &mut self.graph[edge_idx];
        edge.weight += 1;
        edge.last_seen = now;
        if let Some(anchor) = &link.anchor_text {
            if !edge.anchor_texts.contains(anchor) {
                if edge.anchor_texts.len() >= ANCHOR_TEXT_RING {
                    edge.anchor_texts.pop_front();
                }
                edge.anchor_texts.push_back(anchor.clone());
            }
        }
        for rel in &link.rel {
            edge.rel.insert(rel.clone());
        }
    }

    fn recompute_outbound(&mut self, source: NodeIndex) {
        let mut domains = HashSet::new();
        let mut count = 0u64;
        for edge in self.graph.edges(source) {
            count += 1;
            if let Ok(parsed) = url::Url::parse(&self.graph[edge.target()].url) {
                if let Some(host) = parsed.host_str() {
                    domains.insert(host.to_string());
                }
            }
        }
        let node = &mut self.graph[source];
        node.outbound_count = count;
        node.outbound_domains = domains;
    }

    pub fn update_score(&mut self, url: &str, score: f64, action: &str) {
        let Some(&idx) = self.index.get(url) else { return };
        let node = &mut self.graph[idx];
        node.last_score = Some(score);
        node.last_action = Some(action.to_string());
        if node.score_history.len() >= SCORE_HISTORY_RING {
            node.score_history.pop_front();
        }
        node.score_history.push_back(ScoreHistoryEntry { score, action: action.to_string() });
    }

    fn recompute_metrics_for(&mut self, idx: NodeIndex) -> PageMetrics {
        if self.dirty {
            self.recompute_pagerank();
            self.recompute_components();
            self.dirty = false;
        }

        let out_degree = self.graph.edges(idx).count() as u64;
        let in_degree = self
            .graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .count() as u64;

        let successors: HashSet<NodeIndex> = self.graph.neighbors(idx).collect();
        let predecessors: HashSet<NodeIndex> =
            self.graph.neighbors_directed(idx, petgraph::Direction::Incoming).collect();
        let reciprocal_links = successors.intersection(&predecessors).count() as u64;

        let odd_successors = successors.len();
        let odd_hits = successors
            .iter()
            .filter(|&&n| self.graph[n].last_score.map(|s| s >= 0.35).unwrap_or(false))
            .count();
        let odd_neighbor_ratio = if odd_successors == 0 { 0.0 } else { odd_hits as f64 / odd_successors as f64 };

        let node = &self.graph[idx];
        let component_id = node.component_id;
        let component_size = node.component_size;
        let component_density = node.component_density;
        let pagerank = node.pagerank;
        let webring_hits = node.webring_hits;

        let graph_score = compute_graph_score(
            webring_hits,
            out_degree,
            reciprocal_links,
            component_size,
            pagerank,
            odd_neighbor_ratio,
        );

        let node = &mut self.graph[idx];
        node.reciprocal_links = reciprocal_links;
        node.odd_neighbor_ratio = odd_neighbor_ratio;
        node.graph_score = graph_score;

        PageMetrics {
            out_degree,
            in_degree,
            reciprocal_links,
            component_id,
            component_size,
            component_density,
            pagerank,
            odd_neighbor_ratio,
            graph_score,
        }
    }

    /// Weakly-connected components via union-find over the undirected
    /// projection; density uses distinct unordered pairs within the
    /// component so reciprocal edges aren't double-counted.
    fn recompute_components(&mut self) {
        let n = self.graph.node_count();
        if n == 0 {
            return;
        }
        let mut parent: Vec<usize> = (0..n).collect();

        fn find(parent: &mut [usize], x: usize) -> usize {
            if parent[x] != x {
                parent[x] = find(parent, parent[x]);
            }
            parent[x]
        }

        for edge in self.graph.edge_indices() {
            let (a, b) = self.graph.edge_endpoints(edge).unwrap();
            let (ra, rb) = (find(&mut parent, a.index()), find(&mut parent, b.index()));
            if ra != rb {
                parent[ra] = rb;
            }
        }

        let mut component_members: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..n {
            let root = find(&mut parent, i);
            component_members.entry(root).or_default().push(i);
        }

        let mut component_edge_pairs: HashMap<usize, HashSet<(usize, usize)>> = HashMap::new();
        for edge in self.graph.edge_indices() {
            let (a, b) = self.graph.edge_endpoints(edge).unwrap();
            let root = find(&mut parent, a.index());
            let pair = if a.index() < b.index() { (a.index(), b.index()) } else { (b.index(), a.index()) };
            component_edge_pairs.entry(root).or_default().insert(pair);
        }

        for (component_index, (root, members)) in component_members.iter().enumerate() {
            let size = members.len() as u64;
            let edges = component_edge_pairs.get(root).map(|s| s.len()).unwrap_or(0) as f64;
            let max_pairs = (size as f64) * ((size as f64) - 1.0) / 2.0;
            let density = if max_pairs > 0.0 { edges / max_pairs } else { 0.0 };
            for &member in members {
                let node = &mut self.graph[NodeIndex::new(member)];
                node.component_id = component_index as u64;
                node.component_size = size;
                node.component_density = density;
            }
        }
    }

    /// Power iteration with damping 0.85, capped at 100 iterations; falls
    /// back to a uniform distribution if it fails to converge (§4.5/§9).
    fn recompute_pagerank(&mut self) {
        let n = self.graph.node_count();
        if n == 0 {
            return;
        }
        let uniform = 1.0 / n as f64;
        let mut ranks = vec![uniform; n];
        let out_degrees: Vec<usize> = (0..n).map(|i| self.graph.edges(NodeIndex::new(i)).count()).collect();

        let mut converged = false;
        for _ in 0..MAX_PAGERANK_ITERATIONS {
            let mut next = vec![(1.0 - DAMPING) / n as f64; n];
            let mut dangling_mass = 0.0;
            for i in 0..n {
                if out_degrees[i] == 0 {
                    dangling_mass += ranks[i];
                }
            }
            for i in 0..n {
                if out_degrees[i] == 0 {
                    continue;
                }
                let share = DAMPING * ranks[i] / out_degrees[i] as f64;
                for edge in self.graph.edges(NodeIndex::new(i)) {
                    next[edge.target().index()] += share;
                }
            }
            let dangling_share = DAMPING * dangling_mass / n as f64;
            for slot in next.iter_mut() {
                *slot += dangling_share;
            }

            let diff: f64 = next.iter().zip(&ranks).map(|(a, b)| (a - b).abs()).sum();
            ranks = next;
            if diff < PAGERANK_TOLERANCE {
                converged = true;
                break;
            }
        }

        if !converged {
            ranks = vec![uniform; n];
        }

        for i in 0..n {
            self.graph[NodeIndex::new(i)].pagerank = ranks[i];
        }
    }

    pub fn persist(&self, path: &Path) -> io::Result<()> {
        let doc = self.to_node_link();
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp_path = path.with_extension("json.tmp");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let doc: NodeLinkDoc = serde_json::from_str(&contents)?;
        let mut store = GraphStore::new();
        for node in doc.nodes {
            let idx = store.graph.add_node(node.clone());
            store.index.insert(node.url.clone(), idx);
        }
        for edge in doc.links {
            let (Some(&src), Some(&dst)) = (store.index.get(&edge.source), store.index.get(&edge.target)) else {
                continue;
            };
            store.graph.add_edge(src, dst, edge.record);
        }
        store.dirty = true;
        Ok(store)
    }

    fn to_node_link(&self) -> NodeLinkDoc {
        let nodes: Vec<NodeRecord> = self.graph.node_weights().cloned().collect();
        let links: Vec<LinkEntry> = self
            .graph
            .edge_references()
            .map(|e| LinkEntry {
                source: self.graph[e.source()].url.clone(),
                target: self.graph[e.target()].url.clone(),
                record: e.weight().clone(),
            })
            .collect();
        NodeLinkDoc { nodes, links }
    }

    pub fn node(&self, url: &str) -> Option<&NodeRecord> {
        self.index.get(url).map(|&idx| &self.graph[idx])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkEntry {
    source: String,
    target: String,
    #[serde(flatten)]
    record: EdgeRecord,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeLinkDoc {
    nodes: Vec<NodeRecord>,
    links: Vec<LinkEntry>,
}

fn compute_graph_score(
    webring_hits: u64,
    out_degree: u64,
    reciprocal_links: u64,
    component_size: u64,
    pagerank: f64,
    odd_neighbor_ratio: f64,
) -> f64 {
    let webring_term = if webring_hits > 0 { (0.2 + 0.1 * webring_hits as f64).min(0.4) } else { 0.0 };
    let score = webring_term
        + (out_degree as f64 / 15.0).min(0.2)
        + (reciprocal_links as f64 / 5.0).min(0.15)
        + (component_size as f64 / 12.0).min(0.15)
        + (pagerank * 5.0).min(0.1)
        + (odd_neighbor_ratio * 0.2).min(0.2);
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(target: &str) -> LinkRef {
        LinkRef { target: target.to_string(), anchor_text: Some("next".to_string()), rel: vec![] }
    }

    #[test]
    fn self_loops_are_dropped() {
        let mut store = GraphStore::new();
        let now = Utc::now();
        store.record_page("https://a.test/", now, 200, None, &[link("https://a.test/")], 0);
        assert_eq!(store.node("https://a.test/").unwrap().outbound_count, 0);
    }

    #[test]
    fn edge_weight_counts_repeats() {
        let mut store = GraphStore::new();
        let now = Utc::now();
        store.record_page("https://a.test/", now, 200, None, &[link("https://b.test/")], 0);
        store.record_page("https://a.test/", now, 200, None, &[link("https://b.test/")], 0);
        let metrics = store.record_page("https://a.test/", now, 200, None, &[link("https://b.test/")], 0);
        assert_eq!(metrics.out_degree, 1);
    }

    #[test]
    fn anchor_text_ring_bounded_to_five_distinct() {
        let mut store = GraphStore::new();
        let now = Utc::now();
        for i in 0..8 {
            let link = LinkRef { target: "https://b.test/".to_string(), anchor_text: Some(format!("a{i}")), rel: vec![] };
            store.record_page("https://a.test/", now, 200, None, &[link], 0);
        }
        let idx = *store.index.get("https://a.test/").unwrap();
        let edge = store.graph.find_edge(idx, *store.index.get("https://b.test/").unwrap()).unwrap();
        assert!(store.graph[edge].anchor_texts.len() <= 5);
    }

    #[test]
    fn reciprocal_links_counted_both_ways() {
        let mut store = GraphStore::new();
        let now = Utc::now();
        store.record_page("https://a.test/", now, 200, None, &[link("https://b.test/")], 0);
        let metrics = store.record_page("https://b.test/", now, 200, None, &[link("https://a.test/")], 0);
        assert_eq!(metrics.reciprocal_links, 1);
    }

    #[test]
    fn pagerank_sums_to_roughly_one() {
        let mut store = GraphStore::new();
        let now = Utc::now();
        store.record_page("https://a.test/", now, 200, None, &[link("https://b.test/")], 0);
        store.record_page("https://b.test/", now, 200, None, &[link("https://a.test/")], 0);
        let total: f64 = store.graph.node_weights().map(|n| n.pagerank).sum();
        assert!((total - 1.0).abs() < 0.05, "total={total}");
    }
}
