use chrono::{DateTime, Utc};
use std::fmt;

/// The endpoint shapes a [`PageSource`](crate::PageSource) knows how to page through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Article-namespace members of a category.
    CategoryMembers { category: String },
    /// Article-namespace titles a user has edited, newest first.
    UserContributions { user: String },
    /// Outgoing links of the revision that was current at `as_of`.
    PageLinks { title: String, as_of: DateTime<Utc> },
    /// Timestamp of the oldest revision of a page.
    FirstRevision { title: String },
    /// Revisions made by `user` on the talk page `page`.
    TalkRevisions { page: String, user: String },
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::CategoryMembers { category } => write!(f, "categorymembers({})", category),
            Query::UserContributions { user } => write!(f, "usercontribs({})", user),
            Query::PageLinks { title, as_of } => {
                write!(f, "links({} @ {})", title, as_of.format("%Y-%m-%d"))
            }
            Query::FirstRevision { title } => write!(f, "firstrevision({})", title),
            Query::TalkRevisions { page, user } => write!(f, "talkrevisions({} by {})", page, user),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    CategoryMember {
        page_id: i64,
        title: String,
    },
    Contribution {
        title: String,
    },
    LinkSnapshot {
        page_id: i64,
        title: String,
        as_of: DateTime<Utc>,
        links: Vec<String>,
    },
    FirstRevision {
        page_id: i64,
        title: String,
        timestamp: DateTime<Utc>,
    },
    Revision {
        user: String,
        timestamp: DateTime<Utc>,
    },
}

/// One page of results plus the cursor that resumes the query, if any.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub records: Vec<Record>,
    pub next_cursor: Option<String>,
}

impl Batch {
    pub fn new(records: Vec<Record>, next_cursor: Option<String>) -> Self {
        Self {
            records,
            // An empty continuation token ends the series just like a missing one.
            next_cursor: next_cursor.filter(|c| !c.is_empty()),
        }
    }

    pub fn last(records: Vec<Record>) -> Self {
        Self::new(records, None)
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}
