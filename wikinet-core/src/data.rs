use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{CategoryMembership, ConversationCacheEntry, PageRecord, RevisionSnapshot};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use wikinet_fetch::wiki::MAX_TITLE_LENGTH;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite-backed store shared by every crawl worker.
///
/// All writes are insert-if-absent, so two workers racing on the same fact both
/// succeed and the second insert is a no-op.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn parse_datetime(s: &str) -> StoreResult<DateTime<Utc>> {
    // Some drivers append fractional seconds (".0") to DATETIME values.
    let trimmed = s.split('.').next().unwrap_or(s);
    NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::InvalidValue(format!("{:?}: {}", s, e)))
}

impl Database {
    pub fn remove(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("{}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(&config.path)?;

        // Optimize for concurrent writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Self::with_connection(conn, Some(config.path.clone()))
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&conn)?;
        Ok(Database {
            conn: Mutex::new(conn),
            path,
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS pages (
    page_id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    creation_date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pages_title ON pages(title);

-- One row per captured (page, sample date), even when the revision had no links
CREATE TABLE IF NOT EXISTS snapshots (
    page_id INTEGER NOT NULL,
    revision_date TEXT NOT NULL,
    PRIMARY KEY(page_id, revision_date)
);

CREATE TABLE IF NOT EXISTS outgoing_links (
    src_page_id INTEGER NOT NULL,
    target_title TEXT NOT NULL,
    revision_date TEXT NOT NULL,
    UNIQUE(src_page_id, revision_date, target_title)
);

CREATE INDEX IF NOT EXISTS idx_outgoing_links_revision ON outgoing_links(src_page_id, revision_date);

CREATE TABLE IF NOT EXISTS categories (
    category_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS pages_in_categories (
    page_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    UNIQUE(page_id, category_id)
);

CREATE INDEX IF NOT EXISTS idx_pages_in_categories_category ON pages_in_categories(category_id);

-- Number of revisions by from_user on the talk page of to_user
CREATE TABLE IF NOT EXISTS usertalk_cache (
    from_user TEXT NOT NULL,
    to_user TEXT NOT NULL,
    nbr_revisions INTEGER NOT NULL,
    PRIMARY KEY(from_user, to_user)
);
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // Page records

    /// Returns `true` if the page was new.
    pub fn insert_page(&self, page: &PageRecord) -> StoreResult<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO pages (page_id, title, creation_date) VALUES (?1, ?2, ?3)",
            params![page.id, &page.title, format_datetime(&page.creation_date)],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_page(&self, page_id: i64) -> StoreResult<Option<PageRecord>> {
        let row: Option<(i64, String, String)> = self
            .conn()?
            .query_row(
                "SELECT page_id, title, creation_date FROM pages WHERE page_id = ?1",
                params![page_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(id, title, created)| {
            Ok(PageRecord {
                id,
                title,
                creation_date: parse_datetime(&created)?,
            })
        })
        .transpose()
    }

    pub fn get_page_by_title(&self, title: &str) -> StoreResult<Option<PageRecord>> {
        let id: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT page_id FROM pages WHERE title = ?1 ORDER BY page_id LIMIT 1",
                params![title],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => self.get_page(id),
            None => Ok(None),
        }
    }

    pub fn creation_date(&self, page_id: i64) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.get_page(page_id)?.map(|p| p.creation_date))
    }

    pub fn page_count(&self) -> StoreResult<i64> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count)
    }

    // Revision snapshots

    pub fn has_snapshot(&self, page_id: i64, as_of: &DateTime<Utc>) -> StoreResult<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM snapshots WHERE page_id = ?1 AND revision_date = ?2",
                params![page_id, format_datetime(as_of)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Store a snapshot unless one already exists for the same page and date.
    /// Returns `true` if this call created it.
    pub fn put_snapshot(&self, snapshot: &RevisionSnapshot) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let revision_date = format_datetime(&snapshot.as_of);

        let created = tx.execute(
            "INSERT OR IGNORE INTO snapshots (page_id, revision_date) VALUES (?1, ?2)",
            params![snapshot.page_id, &revision_date],
        )? > 0;

        if created {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO outgoing_links (src_page_id, target_title, revision_date)
                 VALUES (?1, ?2, ?3)",
            )?;
            for link in snapshot
                .outgoing_links
                .iter()
                .filter(|l| l.chars().count() < MAX_TITLE_LENGTH)
            {
                stmt.execute(params![snapshot.page_id, link, &revision_date])?;
            }
        }

        tx.commit()?;
        Ok(created)
    }

    pub fn get_snapshot(
        &self,
        page_id: i64,
        as_of: &DateTime<Utc>,
    ) -> StoreResult<Option<RevisionSnapshot>> {
        if !self.has_snapshot(page_id, as_of)? {
            return Ok(None);
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_title FROM outgoing_links
             WHERE src_page_id = ?1 AND revision_date = ?2
             ORDER BY target_title",
        )?;
        let outgoing_links = stmt
            .query_map(params![page_id, format_datetime(as_of)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(Some(RevisionSnapshot {
            page_id,
            as_of: *as_of,
            outgoing_links,
        }))
    }

    // Categories

    pub fn get_category_id(&self, name: &str) -> StoreResult<Option<i64>> {
        let id = self
            .conn()?
            .query_row(
                "SELECT category_id FROM categories WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Look up a category, creating it on first use.
    pub fn ensure_category(&self, name: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO categories (name) VALUES (?1)",
            params![name],
        )?;
        let id = conn.query_row(
            "SELECT category_id FROM categories WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn add_membership(&self, page_id: i64, category_id: i64) -> StoreResult<CategoryMembership> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO pages_in_categories (page_id, category_id) VALUES (?1, ?2)",
            params![page_id, category_id],
        )?;
        Ok(CategoryMembership {
            page_id,
            category_id,
        })
    }

    /// Pages recorded as members of `name`, ordered by page id.
    pub fn get_category_members(&self, name: &str) -> StoreResult<Vec<(i64, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT pages.page_id, pages.title FROM pages_in_categories
             JOIN pages ON pages.page_id = pages_in_categories.page_id
             JOIN categories ON categories.category_id = pages_in_categories.category_id
             WHERE categories.name = ?1
             ORDER BY pages.page_id",
        )?;

        let members = stmt
            .query_map(params![name], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    // User talk cache

    pub fn get_conversation_count(&self, from: &str, to: &str) -> StoreResult<Option<u32>> {
        let count = self
            .conn()?
            .query_row(
                "SELECT nbr_revisions FROM usertalk_cache WHERE from_user = ?1 AND to_user = ?2",
                params![from, to],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count)
    }

    /// Returns false when the pair was already cached; the first count stays.
    pub fn put_conversation_count(&self, entry: &ConversationCacheEntry) -> StoreResult<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO usertalk_cache (from_user, to_user, nbr_revisions)
             VALUES (?1, ?2, ?3)",
            params![&entry.from, &entry.to, entry.count],
        )?;
        Ok(inserted > 0)
    }
}
