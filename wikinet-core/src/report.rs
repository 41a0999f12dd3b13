// Report generation from a selected interest graph

use crate::model::Edge;
use crate::select::{AdmittedNode, Distance, InterestGraph, Tier};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportData<'a> {
    pub focal: &'a str,
    pub total_nodes: usize,
    pub total_edges: usize,
    pub tier_counts: TierCounts,
    pub nodes: &'a [AdmittedNode],
    pub edges: Vec<IndexedEdge<'a>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TierCounts {
    pub mutual: usize,
    pub shortest_path: usize,
    pub ranking: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexedEdge<'a> {
    pub from: usize,
    pub to: usize,
    pub from_id: &'a str,
    pub to_id: &'a str,
}

pub fn gather_report_data(graph: &InterestGraph) -> ReportData<'_> {
    let mut tier_counts = TierCounts::default();
    for node in &graph.admitted {
        match node.tier {
            Tier::Mutual => tier_counts.mutual += 1,
            Tier::ShortestPath => tier_counts.shortest_path += 1,
            Tier::Ranking => tier_counts.ranking += 1,
        }
    }

    let edges = graph
        .edges
        .iter()
        .filter_map(|Edge { from, to }| {
            Some(IndexedEdge {
                from: graph.index_of(from)?,
                to: graph.index_of(to)?,
                from_id: from,
                to_id: to,
            })
        })
        .collect();

    ReportData {
        focal: &graph.focal,
        total_nodes: graph.len(),
        total_edges: graph.edges.len(),
        tier_counts,
        nodes: &graph.admitted,
        edges,
    }
}

pub fn generate_report(graph: &InterestGraph, format: ReportFormat) -> Result<String, serde_json::Error> {
    let data = gather_report_data(graph);
    match format {
        ReportFormat::Text => Ok(generate_text_report(&data)),
        ReportFormat::Json => generate_json_report(&data),
        ReportFormat::Csv => Ok(generate_csv_report(&data)),
    }
}

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    // Header
    report.push_str(RULE);
    report.push_str("                          WIKINET INTEREST GRAPH\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Focal Node:   {}\n", data.focal));
    report.push_str(&format!("Nodes:        {}\n", data.total_nodes));
    report.push_str(&format!("Edges:        {}\n", data.total_edges));
    report.push_str(&format!(
        "Admitted by:  {} mutual, {} shortest path, {} in-degree\n\n",
        data.tier_counts.mutual, data.tier_counts.shortest_path, data.tier_counts.ranking
    ));

    if data.nodes.is_empty() {
        report.push_str("No nodes with incoming edges were found.\n\n");
        report.push_str(RULE);
        return report;
    }

    report.push_str(RULE);
    report.push_str("NODES\n");
    report.push_str(RULE);
    report.push('\n');
    report.push_str(&format!(
        "{:>5}  {:<14} {:>9} {:>6} {:>6}  {}\n",
        "INDEX", "TIER", "SCORE", "IN", "DIST", "NODE"
    ));
    for node in data.nodes {
        report.push_str(&format!(
            "{:>5}  {:<14} {:>9.2} {:>6} {:>6}  {}\n",
            node.index,
            tier_label(node.tier),
            node.score,
            node.in_degree,
            distance_label(node.distance),
            node.id
        ));
    }
    report.push('\n');

    if !data.edges.is_empty() {
        report.push_str(RULE);
        report.push_str("EDGES\n");
        report.push_str(RULE);
        report.push('\n');
        for edge in &data.edges {
            report.push_str(&format!(
                "{:>5} -> {:<5}  {} -> {}\n",
                edge.from, edge.to, edge.from_id, edge.to_id
            ));
        }
        report.push('\n');
    }

    // Footer
    report.push_str(RULE);
    report.push_str("                             End of Report\n");
    report.push_str(RULE);

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "wikinet",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "summary": {
                "focal": data.focal,
                "total_nodes": data.total_nodes,
                "total_edges": data.total_edges,
                "tiers": data.tier_counts
            },
            "nodes": data.nodes,
            "edges": data.edges
        }
    });

    serde_json::to_string_pretty(&json_report)
}

/// Two sections separated by a blank line: the node table, then the edge list.
pub fn generate_csv_report(data: &ReportData) -> String {
    let mut report = String::from("index,node,tier,in_degree,score,distance\n");
    for node in data.nodes {
        report.push_str(&format!(
            "{},{},{},{},{:.4},{}\n",
            node.index,
            csv_field(&node.id),
            tier_label(node.tier),
            node.in_degree,
            node.score,
            node.distance.and_then(|d| d.hops()).map(|h| h.to_string()).unwrap_or_default()
        ));
    }

    report.push_str("\nfrom,to\n");
    for edge in &data.edges {
        report.push_str(&format!("{},{}\n", edge.from, edge.to));
    }
    report
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::Mutual => "mutual",
        Tier::ShortestPath => "shortest-path",
        Tier::Ranking => "in-degree",
    }
}

fn distance_label(distance: Option<Distance>) -> String {
    match distance {
        Some(Distance::Hops(h)) => h.to_string(),
        Some(Distance::Unreachable) => "inf".to_string(),
        None => "-".to_string(),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
