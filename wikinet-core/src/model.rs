use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A directed edge between two node identifiers (page titles or user names).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub id: i64,
    pub title: String,
    pub creation_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSnapshot {
    pub page_id: i64,
    pub as_of: DateTime<Utc>,
    pub outgoing_links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMembership {
    pub page_id: i64,
    pub category_id: i64,
}

/// Revisions `from` made on the user talk page of `to`. Keyed on the ordered pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationCacheEntry {
    pub from: String,
    pub to: String,
    pub count: u32,
}

/// Node identifier to sequential index, in admission order.
pub type NodeIndexMap = IndexMap<String, usize>;
