use crate::crawl::DEFAULT_GRACE_DAYS;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wikinet_fetch::paginate::DEFAULT_PAGE_SIZE;
use wikinet_fetch::pool::DEFAULT_WORKERS;

/// Where the revision store lives. Injected once when the store is opened.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl StoreConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

/// Knobs shared by every crawl batch.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub lang: String,
    pub workers: usize,
    pub drain_timeout: Duration,
    /// Contributions requested per API call.
    pub page_size: usize,
    /// Upper bound on contributions read per user.
    pub contribution_budget: usize,
    /// How many of a user's most edited pages form their clique.
    pub top_pages_per_user: usize,
    /// Sample dates this close to page creation are skipped; early revisions churn.
    pub grace_period: chrono::Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            workers: DEFAULT_WORKERS,
            drain_timeout: Duration::from_secs(60),
            page_size: DEFAULT_PAGE_SIZE,
            contribution_budget: 3000,
            top_pages_per_user: 100,
            grace_period: chrono::Duration::days(DEFAULT_GRACE_DAYS),
        }
    }
}

impl CrawlConfig {
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}
