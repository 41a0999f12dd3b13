use crate::data::Database;
use crate::error::{CrawlError, Result, StoreError, StoreResult};
use crate::model::{ConversationCacheEntry, PageRecord, RevisionSnapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use wikinet_fetch::{FetchLoop, PageSource, Query, Record};

/// Check-then-fetch-then-store memoization over the [`Database`].
///
/// Two workers may both miss on the same key and both fetch; the second insert is ignored
/// by the store, so the worst case is one redundant network call.
#[derive(Clone)]
pub struct RevisionCache {
    db: Arc<Database>,
    source: Arc<dyn PageSource>,
}

impl RevisionCache {
    pub fn new(db: Arc<Database>, source: Arc<dyn PageSource>) -> Self {
        Self { db, source }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.source
    }

    /// Run blocking store work off the async worker threads.
    pub async fn with_store<T, F>(&self, work: F) -> StoreResult<T>
    where
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || work(&db))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }

    pub fn has_snapshot(&self, page_id: i64, as_of: &DateTime<Utc>) -> StoreResult<bool> {
        self.db.has_snapshot(page_id, as_of)
    }

    pub fn put_snapshot(
        &self,
        page_id: i64,
        as_of: DateTime<Utc>,
        outgoing_links: Vec<String>,
    ) -> StoreResult<bool> {
        self.db.put_snapshot(&RevisionSnapshot {
            page_id,
            as_of,
            outgoing_links,
        })
    }

    /// Creation date of `title`, from the store or from one first-revision lookup.
    pub async fn get_or_fetch_first_revision_date(
        &self,
        page_id: i64,
        title: &str,
    ) -> Result<DateTime<Utc>> {
        if let Some(created) = self.with_store(move |db| db.creation_date(page_id)).await? {
            return Ok(created);
        }

        debug!("Creation date of {} not cached, fetching", title);
        let query = Query::FirstRevision {
            title: title.to_string(),
        };
        let batch = self.source.fetch_page(&query, None).await?;

        let record = batch.records.into_iter().find_map(|r| match r {
            Record::FirstRevision {
                page_id,
                title,
                timestamp,
            } => Some(PageRecord {
                id: page_id,
                title,
                creation_date: timestamp,
            }),
            _ => None,
        });

        match record {
            Some(page) => {
                let created = page.creation_date;
                self.with_store(move |db| db.insert_page(&page)).await?;
                Ok(created)
            }
            None => Err(CrawlError::NotFound(title.to_string())),
        }
    }

    pub fn has_conversation_count(&self, from: &str, to: &str) -> StoreResult<bool> {
        Ok(self.db.get_conversation_count(from, to)?.is_some())
    }

    pub fn get_conversation_count(&self, from: &str, to: &str) -> StoreResult<Option<u32>> {
        self.db.get_conversation_count(from, to)
    }

    pub fn put_conversation_count(&self, from: &str, to: &str, count: u32) -> StoreResult<bool> {
        self.db.put_conversation_count(&ConversationCacheEntry {
            from: from.to_string(),
            to: to.to_string(),
            count,
        })
    }

    /// Number of revisions `from` made on the user talk page of `to`.
    ///
    /// A partial count from an aborted fetch is returned as an error and not cached.
    pub async fn get_or_fetch_conversation_count(&self, from: &str, to: &str) -> Result<u32> {
        let (from_user, to_user) = (from.to_string(), to.to_string());
        let cached = self
            .with_store(move |db| db.get_conversation_count(&from_user, &to_user))
            .await?;
        if let Some(count) = cached {
            return Ok(count);
        }

        let query = Query::TalkRevisions {
            page: format!("User talk:{}", to),
            user: from.to_string(),
        };
        let outcome = FetchLoop::default().run(self.source.as_ref(), &query).await;
        if let Some(e) = outcome.error {
            return Err(e.into());
        }

        let count = outcome
            .records
            .iter()
            .filter(|r| matches!(r, Record::Revision { .. }))
            .count() as u32;
        let entry = ConversationCacheEntry {
            from: from.to_string(),
            to: to.to_string(),
            count,
        };
        self.with_store(move |db| db.put_conversation_count(&entry))
            .await?;
        debug!("{} revisions by {} on User talk:{}", count, from, to);
        Ok(count)
    }
}
