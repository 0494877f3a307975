//! Infrastructure layer: job pipeline, remote API boundary, sinks, config.

pub mod config;
pub mod jobs;
pub mod provenance;
pub mod remote;
pub mod runner;
pub mod signal;
pub mod sink;

pub use config::{ConfigError, RunConfig};
pub use jobs::{
    DispatchError, DispatchOutcome, DispatchReport, Dispatcher, JobHandler, JobOutcome,
    RunContext, RunControl, SnapshotJobHandler,
};
pub use remote::{Filter, InMemoryEc2, ResourceLister, SnapshotApi};
pub use runner::{RunError, SnapshotRunner};
pub use sink::{EventSink, InMemoryEventSink, TracingEventSink};
