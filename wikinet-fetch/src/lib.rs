pub mod error;
pub mod paginate;
pub mod pool;
pub mod result;
pub mod source;
pub mod wiki;

pub use error::FetchError;
pub use paginate::{FetchLoop, FetchOutcome, Termination};
pub use pool::{PoolReport, ProgressCallback, WorkerPool};
pub use result::{Batch, Query, Record};
pub use source::PageSource;
pub use wiki::WikiApiClient;
