//! End-to-end create and expire runs.
//!
//! Wires configuration, a lister, the snapshot API and an event sink into one
//! dispatch call per operation.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use ebssnap_core::{ExpiryBounds, Provenance, Resource};

use crate::config::RunConfig;
use crate::jobs::{
    DispatchError, DispatchOutcome, Dispatcher, RetryError, RetryPolicy, RunContext, RunControl,
    SnapshotJobHandler, ThrottlingClassifier, with_retry,
};
use crate::provenance;
use crate::remote::{Filter, ResourceLister, SnapshotApi};
use crate::sink::EventSink;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("could not resolve caller identity: {0}")]
    Identity(#[source] RetryError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Identity(_) => 1,
            RunError::Dispatch(err) => err.exit_code(),
        }
    }
}

pub struct SnapshotRunner<L, A> {
    config: RunConfig,
    lister: L,
    api: A,
    sink: Arc<dyn EventSink>,
    control: Arc<RunControl>,
    retry: RetryPolicy,
    provenance: Option<Provenance>,
}

impl<L, A> SnapshotRunner<L, A>
where
    L: ResourceLister,
    A: SnapshotApi + Clone + 'static,
{
    pub fn new(config: RunConfig, lister: L, api: A, sink: Arc<dyn EventSink>) -> Self {
        let retry = RetryPolicy::default().with_max_attempts(config.retry_max_attempts);
        Self {
            config,
            lister,
            api,
            sink,
            control: Arc::new(RunControl::new()),
            retry,
            provenance: None,
        }
    }

    /// Share a run control, typically one passed to [`crate::signal::install`].
    pub fn with_control(mut self, control: Arc<RunControl>) -> Self {
        self.control = control;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Use fixed provenance instead of inspecting the current process.
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Snapshot every volume matching `filters`.
    pub fn create_snapshots(&self, filters: &[Filter]) -> Result<DispatchOutcome, RunError> {
        let ctx = self.context()?;
        info!(
            correlation_id = %ctx.correlation_id,
            region = %ctx.region,
            filters = filters.len(),
            "creating snapshots"
        );

        let handler = Arc::new(self.handler(ExpiryBounds::unbounded()));
        let jobs = self
            .lister
            .volumes(filters, self.config.page_size)
            .map(|r| r.map(Resource::Volume));
        Ok(self.dispatcher().dispatch(jobs, ctx, handler)?)
    }

    /// Delete every snapshot matching `filters` that is out of life under `bounds`.
    pub fn expire_snapshots(
        &self,
        filters: &[Filter],
        bounds: ExpiryBounds,
    ) -> Result<DispatchOutcome, RunError> {
        let ctx = self.context()?;
        info!(
            correlation_id = %ctx.correlation_id,
            region = %ctx.region,
            filters = filters.len(),
            gt = ?bounds.gt,
            lt = ?bounds.lt,
            "expiring snapshots"
        );

        let handler = Arc::new(self.handler(bounds));
        let jobs = self
            .lister
            .snapshots(filters, self.config.page_size)
            .map(|r| r.map(Resource::Snapshot));
        Ok(self.dispatcher().dispatch(jobs, ctx, handler)?)
    }

    fn context(&self) -> Result<Arc<RunContext>, RunError> {
        let identity = with_retry(
            &self.retry,
            &ThrottlingClassifier,
            &self.control,
            "get_caller_identity",
            || self.api.caller_identity(),
        )
        .map_err(RunError::Identity)?;

        Ok(Arc::new(RunContext {
            region: self.config.region.clone(),
            description: self.config.description.clone(),
            correlation_id: self.config.correlation_id,
            identity,
            provenance: self.provenance.clone().unwrap_or_else(provenance::current),
        }))
    }

    fn handler(&self, bounds: ExpiryBounds) -> SnapshotJobHandler<A> {
        SnapshotJobHandler::new(self.api.clone(), Arc::clone(&self.sink))
            .with_retry_policy(self.retry.clone())
            .with_bounds(bounds)
            .with_control(Arc::clone(&self.control))
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.config.workers)
            .with_control(Arc::clone(&self.control))
            .with_enqueue_timeout(self.config.enqueue_timeout)
    }
}
