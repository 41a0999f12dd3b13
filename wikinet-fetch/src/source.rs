use crate::error::Result;
use crate::result::{Batch, Query};
use async_trait::async_trait;

/// A paginated endpoint. Retry and backoff, if any, belong to the implementation.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page of `query`. `cursor` is the token returned by the previous page,
    /// or `None` for the first call.
    async fn fetch_page(&self, query: &Query, cursor: Option<&str>) -> Result<Batch>;
}

#[async_trait]
impl<S: PageSource + ?Sized> PageSource for std::sync::Arc<S> {
    async fn fetch_page(&self, query: &Query, cursor: Option<&str>) -> Result<Batch> {
        (**self).fetch_page(query, cursor).await
    }
}
