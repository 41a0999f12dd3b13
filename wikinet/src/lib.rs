// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    link_graph_from_store, load_lines_from_file, load_names_from_source, parse_date,
    resolve_db_path,
};

// Re-export graph building from wikinet-core
pub use wikinet_core::select::{InterestGraph, SelectionLimits, build_interest_graph};
