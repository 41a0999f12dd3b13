use crate::error::FetchError;
use crate::result::{Query, Record};
use crate::source::PageSource;
use tracing::{debug, error, warn};

/// Page size the MediaWiki API accepts for unprivileged list queries.
pub const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The source returned no continuation cursor (or every item was fetched).
    Exhausted,
    /// The record budget was consumed before the source ran dry.
    BudgetReached,
    /// A fetch failed; the records gathered up to that point are kept.
    Aborted,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub records: Vec<Record>,
    pub calls: usize,
    pub termination: Termination,
    pub error: Option<FetchError>,
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives a continuation-token query until the cursor runs out or the budget is spent.
///
/// Each call is charged `page_size` units against the budget, so a loop with budget `b`
/// never makes more than `ceil(b / page_size)` calls regardless of how many records the
/// source actually returns per page.
#[derive(Debug, Clone, Copy)]
pub struct FetchLoop {
    page_size: usize,
    budget: Option<usize>,
}

impl FetchLoop {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            budget: None,
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_calls(&self) -> Option<usize> {
        self.budget.map(|b| b.div_ceil(self.page_size))
    }

    fn budget_spent(&self, calls: usize, records: usize) -> bool {
        match self.budget {
            Some(budget) => calls.saturating_mul(self.page_size) >= budget || records >= budget,
            None => false,
        }
    }

    /// Run `query` to completion, following continuation cursors.
    pub async fn run<S: PageSource + ?Sized>(&self, source: &S, query: &Query) -> FetchOutcome {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut calls = 0;

        loop {
            if self.budget_spent(calls, records.len()) {
                debug!("Budget reached for {} after {} calls", query, calls);
                return FetchOutcome {
                    records,
                    calls,
                    termination: Termination::BudgetReached,
                    error: None,
                };
            }

            debug!("Fetching {} (cursor: {:?})", query, cursor);
            let result = source.fetch_page(query, cursor.as_deref()).await;
            calls += 1;

            match result {
                Ok(batch) => {
                    records.extend(batch.records);
                    match batch.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => {
                            return FetchOutcome {
                                records,
                                calls,
                                termination: Termination::Exhausted,
                                error: None,
                            };
                        }
                    }
                }
                Err(e) => return Self::aborted(query, records, calls, e),
            }
        }
    }

    /// Fetch each query once, without chaining cursors between them.
    ///
    /// Used for per-date snapshots where every sample date is its own single-page query.
    pub async fn run_each<S, I>(&self, source: &S, queries: I) -> FetchOutcome
    where
        S: PageSource + ?Sized,
        I: IntoIterator<Item = Query>,
    {
        let mut records = Vec::new();
        let mut calls = 0;

        for query in queries {
            if self.budget_spent(calls, records.len()) {
                return FetchOutcome {
                    records,
                    calls,
                    termination: Termination::BudgetReached,
                    error: None,
                };
            }

            debug!("Fetching {}", query);
            let result = source.fetch_page(&query, None).await;
            calls += 1;

            match result {
                Ok(batch) => records.extend(batch.records),
                Err(e) => return Self::aborted(&query, records, calls, e),
            }
        }

        FetchOutcome {
            records,
            calls,
            termination: Termination::Exhausted,
            error: None,
        }
    }

    fn aborted(query: &Query, records: Vec<Record>, calls: usize, e: FetchError) -> FetchOutcome {
        if e.is_recoverable() {
            warn!("Fetch of {} aborted after {} calls: {}", query, calls, e);
        } else {
            error!("Fetch of {} failed after {} calls: {}", query, calls, e);
        }
        FetchOutcome {
            records,
            calls,
            termination: Termination::Aborted,
            error: Some(e),
        }
    }
}

impl Default for FetchLoop {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Batch;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a scripted sequence of pages, one per call.
    struct ScriptedSource {
        pages: Mutex<Vec<crate::error::Result<Batch>>>,
        calls: AtomicUsize,
        cursors_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn new(mut pages: Vec<crate::error::Result<Batch>>) -> Self {
            pages.reverse();
            Self {
                pages: Mutex::new(pages),
                calls: AtomicUsize::new(0),
                cursors_seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _query: &Query,
            cursor: Option<&str>,
        ) -> crate::error::Result<Batch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cursors_seen
                .lock()
                .unwrap()
                .push(cursor.map(|c| c.to_string()));
            self.pages
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(Batch::default()))
        }
    }

    fn contributions(prefix: &str, n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::Contribution {
                title: format!("{}{}", prefix, i),
            })
            .collect()
    }

    fn query() -> Query {
        Query::UserContributions {
            user: "Example".to_string(),
        }
    }

    #[tokio::test]
    async fn test_stops_when_cursor_is_empty_under_budget() {
        let source = ScriptedSource::new(vec![
            Ok(Batch::new(contributions("a", 500), Some("c1".into()))),
            Ok(Batch::new(contributions("b", 500), Some("c2".into()))),
            Ok(Batch::new(contributions("c", 500), Some("c3".into()))),
            Ok(Batch::last(contributions("d", 120))),
        ]);

        let outcome = FetchLoop::new(500)
            .with_budget(3000)
            .run(&source, &query())
            .await;

        assert_eq!(source.calls(), 4);
        assert_eq!(outcome.calls, 4);
        assert_eq!(outcome.termination, Termination::Exhausted);
        assert_eq!(outcome.records.len(), 1620);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_cursor_is_threaded_between_calls() {
        let source = ScriptedSource::new(vec![
            Ok(Batch::new(contributions("a", 1), Some("first".into()))),
            Ok(Batch::new(contributions("b", 1), Some("second".into()))),
            Ok(Batch::last(contributions("c", 1))),
        ]);

        FetchLoop::new(10).run(&source, &query()).await;

        let seen = source.cursors_seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![None, Some("first".to_string()), Some("second".to_string())]
        );
    }

    #[tokio::test]
    async fn test_budget_caps_number_of_calls() {
        // Endless cursor chain with short pages: the call cap still applies.
        let pages = (0..20)
            .map(|i| Ok(Batch::new(contributions("p", 3), Some(format!("c{}", i)))))
            .collect();
        let source = ScriptedSource::new(pages);

        let fetch_loop = FetchLoop::new(500).with_budget(1200);
        let outcome = fetch_loop.run(&source, &query()).await;

        assert_eq!(fetch_loop.max_calls(), Some(3));
        assert_eq!(outcome.calls, 3);
        assert_eq!(source.calls(), 3);
        assert_eq!(outcome.termination, Termination::BudgetReached);
        assert_eq!(outcome.records.len(), 9);
    }

    #[tokio::test]
    async fn test_huge_page_size_does_not_overflow_budget() {
        let pages = (0..5)
            .map(|i| Ok(Batch::new(contributions("p", 1), Some(format!("c{}", i)))))
            .collect();
        let source = ScriptedSource::new(pages);

        let outcome = FetchLoop::new(usize::MAX / 2 + 1)
            .with_budget(usize::MAX)
            .run(&source, &query())
            .await;

        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.termination, Termination::BudgetReached);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_results() {
        let source = ScriptedSource::new(vec![
            Ok(Batch::new(contributions("a", 5), Some("c1".into()))),
            Err(FetchError::MalformedResponse("truncated body".into())),
            Ok(Batch::last(contributions("never", 5))),
        ]);

        let outcome = FetchLoop::new(500).run(&source, &query()).await;

        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.termination, Termination::Aborted);
        assert_eq!(outcome.records.len(), 5);
        assert!(matches!(
            outcome.error,
            Some(FetchError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_run_each_issues_one_call_per_query_without_cursor() {
        let source = ScriptedSource::new(vec![
            // A cursor on a per-item fetch is ignored.
            Ok(Batch::new(contributions("a", 1), Some("ignored".into()))),
            Ok(Batch::last(contributions("b", 1))),
            Ok(Batch::last(contributions("c", 1))),
        ]);

        let queries = ["x", "y", "z"].iter().map(|t| Query::FirstRevision {
            title: t.to_string(),
        });
        let outcome = FetchLoop::new(1).run_each(&source, queries).await;

        assert_eq!(outcome.calls, 3);
        assert_eq!(outcome.termination, Termination::Exhausted);
        assert!(
            source
                .cursors_seen
                .lock()
                .unwrap()
                .iter()
                .all(|c| c.is_none())
        );
    }

    #[tokio::test]
    async fn test_run_each_aborts_on_first_failure() {
        let source = ScriptedSource::new(vec![
            Ok(Batch::last(contributions("a", 2))),
            Err(FetchError::MalformedResponse("bad".into())),
            Ok(Batch::last(contributions("c", 2))),
        ]);

        let queries = (0..3).map(|i| Query::FirstRevision {
            title: format!("T{}", i),
        });
        let outcome = FetchLoop::new(1).run_each(&source, queries).await;

        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.termination, Termination::Aborted);
    }

    #[tokio::test]
    async fn test_zero_budget_makes_no_calls() {
        let source = ScriptedSource::new(vec![Ok(Batch::last(contributions("a", 1)))]);

        let outcome = FetchLoop::new(500)
            .with_budget(0)
            .run(&source, &query())
            .await;

        assert_eq!(source.calls(), 0);
        assert_eq!(outcome.termination, Termination::BudgetReached);
    }
}
