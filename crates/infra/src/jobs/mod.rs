//! Bulk job execution: bounded queue, worker pool, retry and dispatch.
//!
//! ## Components
//!
//! - `JobQueue`: bounded, joinable queue with RAII acknowledgement
//! - `with_retry`: backoff wrapper around one mutating remote call
//! - `SnapshotJobHandler`: creates or expires snapshots, one job at a time
//! - `Dispatcher`: streams a lazy source into the pool under backpressure

pub mod dispatcher;
pub mod queue;
pub mod retry;
pub mod types;
pub mod worker;

pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher, dispatch};
pub use queue::{Claimed, JobQueue, Pop, PushError};
pub use retry::{
    RetryClassifier, RetryDecision, RetryError, RetryPolicy, ThrottlingClassifier, with_retry,
};
pub use types::{DispatchReport, Job, JobOutcome, RunContext, RunControl};
pub use worker::{JobHandler, SnapshotJobHandler};
