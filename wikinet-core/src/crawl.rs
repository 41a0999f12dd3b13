use crate::cache::RevisionCache;
use crate::config::CrawlConfig;
use crate::data::Database;
use crate::error::{CrawlError, Result};
use crate::graph::{EdgeCollector, clique_edges, page_link_edges};
use crate::model::{Edge, RevisionSnapshot};
use chrono::{DateTime, Months, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wikinet_fetch::{FetchLoop, PageSource, PoolReport, ProgressCallback, Query, Record, WorkerPool};

/// Revisions inside the first week of a page's life are not sampled.
pub const DEFAULT_GRACE_DAYS: i64 = 7;

/// `count` sample dates one month apart, starting at `most_recent` and going back.
pub fn monthly_dates(most_recent: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    (0..count as u32)
        .map_while(|i| most_recent.checked_sub_months(Months::new(i)))
        .collect()
}

/// A user's most edited titles: by edit count descending, then title.
pub fn top_pages(records: &[Record], limit: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        if let Record::Contribution { title } = record {
            *counts.entry(title.as_str()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(ta, ca), (tb, cb)| cb.cmp(ca).then_with(|| ta.cmp(tb)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(title, _)| title.to_string())
        .collect()
}

fn new_pool(config: &CrawlConfig, progress: Option<ProgressCallback>) -> WorkerPool {
    let pool = WorkerPool::new(config.workers);
    match progress {
        Some(callback) => pool.with_progress_callback(callback),
        None => pool,
    }
}

/// Record the member pages of each category.
///
/// Categories already in the store are not fetched again. A category row is only
/// written once its full member list has been fetched.
pub async fn crawl_categories(
    cache: &RevisionCache,
    categories: &[String],
    config: &CrawlConfig,
    progress: Option<ProgressCallback>,
) -> PoolReport {
    info!("Crawling {} categories", categories.len());
    let mut pool = new_pool(config, progress);

    for category in categories {
        let cache = cache.clone();
        let category = category.clone();
        let page_size = config.page_size;
        pool.submit(category.clone(), async move {
            crawl_category(&cache, &category, page_size).await
        });
    }

    pool.drain(config.drain_timeout).await
}

async fn crawl_category(cache: &RevisionCache, category: &str, page_size: usize) -> Result<()> {
    let name = category.to_string();
    let known = cache
        .with_store(move |db| match db.get_category_id(&name)? {
            Some(_) => db.get_category_members(&name).map(|m| Some(m.len())),
            None => Ok(None),
        })
        .await?;
    if let Some(count) = known {
        debug!("{} already stored with {} pages", category, count);
        return Ok(());
    }

    let query = Query::CategoryMembers {
        category: category.to_string(),
    };
    let outcome = FetchLoop::new(page_size)
        .run(cache.source().as_ref(), &query)
        .await;
    if let Some(e) = outcome.error {
        return Err(e.into());
    }

    let mut members = Vec::new();
    for record in outcome.records {
        let Record::CategoryMember { page_id, title } = record else {
            continue;
        };
        match cache.get_or_fetch_first_revision_date(page_id, &title).await {
            Ok(_) => members.push(page_id),
            Err(CrawlError::NotFound(title)) => warn!("{} has no revisions, skipping", title),
            Err(e) => return Err(e),
        }
    }

    let count = members.len();
    let name = category.to_string();
    cache
        .with_store(move |db| {
            let category_id = db.ensure_category(&name)?;
            for page_id in members {
                db.add_membership(page_id, category_id)?;
            }
            Ok(())
        })
        .await?;
    info!("{}: {} pages", category, count);
    Ok(())
}

/// Capture outgoing-link snapshots of every page at each sample date.
///
/// Dates within the grace period after page creation and dates already captured are
/// skipped.
pub async fn crawl_page_history(
    cache: &RevisionCache,
    pages: Vec<(i64, String)>,
    dates: &[DateTime<Utc>],
    config: &CrawlConfig,
    progress: Option<ProgressCallback>,
) -> PoolReport {
    info!(
        "Crawling link history of {} pages at {} dates",
        pages.len(),
        dates.len()
    );
    let mut pool = new_pool(config, progress);
    let dates: Arc<[DateTime<Utc>]> = dates.into();

    for (page_id, title) in pages {
        let cache = cache.clone();
        let dates = dates.clone();
        let grace = config.grace_period;
        pool.submit(title.clone(), async move {
            crawl_history_of(&cache, page_id, &title, &dates, grace).await
        });
    }

    pool.drain(config.drain_timeout).await
}

async fn crawl_history_of(
    cache: &RevisionCache,
    page_id: i64,
    title: &str,
    dates: &[DateTime<Utc>],
    grace: chrono::Duration,
) -> Result<()> {
    let created = cache.get_or_fetch_first_revision_date(page_id, title).await?;

    let candidates: Vec<DateTime<Utc>> = dates
        .iter()
        .copied()
        .filter(|date| *date > created + grace)
        .collect();
    let pending = cache
        .with_store(move |db| {
            let mut pending = Vec::new();
            for date in candidates {
                if !db.has_snapshot(page_id, &date)? {
                    pending.push(date);
                }
            }
            Ok(pending)
        })
        .await?;
    if pending.is_empty() {
        debug!("{}: nothing to fetch", title);
        return Ok(());
    }

    let queries: Vec<Query> = pending
        .iter()
        .map(|as_of| Query::PageLinks {
            title: title.to_string(),
            as_of: *as_of,
        })
        .collect();
    let outcome = FetchLoop::default()
        .run_each(cache.source().as_ref(), queries)
        .await;

    let snapshots: Vec<RevisionSnapshot> = outcome
        .records
        .into_iter()
        .filter_map(|record| match record {
            Record::LinkSnapshot { as_of, links, .. } => Some(RevisionSnapshot {
                page_id,
                as_of,
                outgoing_links: links,
            }),
            _ => None,
        })
        .collect();
    let stored = cache
        .with_store(move |db| {
            let mut stored = 0;
            for snapshot in &snapshots {
                if db.put_snapshot(snapshot)? {
                    stored += 1;
                }
            }
            Ok(stored)
        })
        .await?;
    debug!("{}: stored {} snapshots", title, stored);

    match outcome.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[derive(Debug, Default)]
pub struct CrawlSummary {
    pub report: PoolReport,
    pub edges: Vec<Edge>,
}

/// Build the user-centric edge set: each user links all of their top pages to each other.
///
/// A contribution fetch that aborts part way still contributes the pages seen so far.
pub async fn collect_user_edges(
    source: Arc<dyn PageSource>,
    users: &[String],
    config: &CrawlConfig,
    progress: Option<ProgressCallback>,
) -> CrawlSummary {
    info!("Collecting contributions of {} users", users.len());
    let collector = EdgeCollector::new();
    let mut pool = new_pool(config, progress);
    let fetch = FetchLoop::new(config.page_size).with_budget(config.contribution_budget);

    for user in users {
        let source = source.clone();
        let collector = collector.clone();
        let user = user.clone();
        let limit = config.top_pages_per_user;
        pool.submit(user.clone(), async move {
            let query = Query::UserContributions { user: user.clone() };
            let outcome = fetch.run(source.as_ref(), &query).await;
            if !outcome.is_complete() {
                debug!("{}: using {} partial contributions", user, outcome.records.len());
            }

            let pages = top_pages(&outcome.records, limit);
            collector.extend(clique_edges(&pages)).await;
            Ok::<(), CrawlError>(())
        });
    }

    let report = pool.drain(config.drain_timeout).await;
    let edges = collector.snapshot().await;
    info!("Collected {} edges from {} users", edges.len(), report.succeeded());
    CrawlSummary { report, edges }
}

/// Build the page-centric edge set from stored snapshots at `as_of`.
///
/// Pages that are unknown or have no snapshot at that date contribute nothing.
pub fn collect_page_edges(db: &Database, pages: &[String], as_of: &DateTime<Utc>) -> Result<Vec<Edge>> {
    let page_set: HashSet<String> = pages.iter().cloned().collect();
    let mut edges = Vec::new();

    for title in pages {
        let Some(page) = db.get_page_by_title(title)? else {
            debug!("{} not in store", title);
            continue;
        };
        match db.get_snapshot(page.id, as_of)? {
            Some(snapshot) => {
                edges.extend(page_link_edges(title, &snapshot.outgoing_links, &page_set))
            }
            None => debug!("{} has no snapshot at {}", title, as_of),
        }
    }

    Ok(edges)
}
