pub mod cache;
pub mod config;
pub mod crawl;
pub mod data;
pub mod error;
pub mod graph;
pub mod model;
pub mod report;
pub mod select;

pub use cache::RevisionCache;
pub use config::{CrawlConfig, StoreConfig};
pub use data::Database;
pub use error::{CrawlError, StoreError};
pub use graph::{EdgeCollector, InDegreeIndex, NodeScore, mutual_neighbors, rank_by_in_degree};
pub use model::{Edge, NodeIndexMap, PageRecord, RevisionSnapshot};
pub use select::{
    BoundedGraphSelector, Distance, InterestGraph, SelectionLimits, build_interest_graph,
    shortest_paths,
};
