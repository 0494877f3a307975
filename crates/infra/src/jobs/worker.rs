//! Worker threads and the snapshot job handler they run.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use ebssnap_core::{
    CreateDetail, ExpireDetail, ExpireStatus, ExpiryBounds, Outcome, Resource, ResultEvent,
    Snapshot, Tagged, Volume, age_days, is_in_life, provenance_tags, snapshot_tag_set, tag_info,
};

use super::queue::{JobQueue, Pop};
use super::retry::{RetryClassifier, RetryError, RetryPolicy, ThrottlingClassifier, with_retry};
use super::types::{DispatchReport, Job, JobOutcome, RunContext, RunControl};
use crate::remote::SnapshotApi;
use crate::sink::EventSink;

/// Applies one job. Implementations are shared by every worker of a run.
pub trait JobHandler: Send + Sync + 'static {
    fn handle(&self, job: &Job, ctx: &RunContext) -> JobOutcome;
}

impl<F> JobHandler for F
where
    F: Fn(&Job, &RunContext) -> JobOutcome + Send + Sync + 'static,
{
    fn handle(&self, job: &Job, ctx: &RunContext) -> JobOutcome {
        self(job, ctx)
    }
}

/// Creates snapshots of volumes and deletes snapshots that are out of life.
pub struct SnapshotJobHandler<A> {
    api: A,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
    classifier: Box<dyn RetryClassifier>,
    bounds: ExpiryBounds,
    control: Arc<RunControl>,
}

impl<A: SnapshotApi> SnapshotJobHandler<A> {
    pub fn new(api: A, sink: Arc<dyn EventSink>) -> Self {
        Self {
            api,
            sink,
            retry: RetryPolicy::default(),
            classifier: Box::new(ThrottlingClassifier),
            bounds: ExpiryBounds::unbounded(),
            control: Arc::new(RunControl::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_classifier(mut self, classifier: impl RetryClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_bounds(mut self, bounds: ExpiryBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Share the run control the dispatcher uses, so backoffs stop on cancel.
    pub fn with_control(mut self, control: Arc<RunControl>) -> Self {
        self.control = control;
        self
    }

    fn create(&self, volume: &Volume, ctx: &RunContext) -> JobOutcome {
        let provenance = provenance_tags(&ctx.description, ctx.correlation_id, &ctx.provenance);
        let tags = snapshot_tag_set(provenance, &volume.tags);

        let mut detail = CreateDetail {
            volume_id: volume.volume_id.clone(),
            availability_zone: volume.availability_zone.clone(),
            volume_tags: tag_info(&volume.tags),
            snapshot_tags: tag_info(&tags),
            start_time: None,
            snapshot_id: None,
            account: ctx.identity.account.clone(),
            user_id: ctx.identity.user_id.clone(),
            error: None,
        };

        let result = with_retry(
            &self.retry,
            self.classifier.as_ref(),
            &self.control,
            "create_snapshot",
            || {
                self.api
                    .create_snapshot(&volume.volume_id, &ctx.description, &tags)
            },
        );

        match result {
            Err(err) if err.is_cancelled() => abandon(&err, volume.volume_id.as_str()),
            Ok(created) => {
                detail.start_time = Some(created.start_time);
                detail.snapshot_id = Some(created.snapshot_id);
                self.sink
                    .emit(&ResultEvent::create(ctx.correlation_id, Outcome::Success, detail));
                JobOutcome::Success
            }
            Err(err) => {
                detail.error = Some(err.to_string());
                self.sink
                    .emit(&ResultEvent::create(ctx.correlation_id, Outcome::Error, detail));
                escalate(err, volume.volume_id.as_str())
            }
        }
    }

    fn expire(&self, snapshot: &Snapshot, ctx: &RunContext) -> JobOutcome {
        let now = Utc::now();
        if is_in_life(snapshot, self.bounds, now) {
            debug!(snapshot = %snapshot.snapshot_id, "snapshot still in life, keeping");
            return JobOutcome::Skipped;
        }

        let mut detail = ExpireDetail {
            status: ExpireStatus::Incomplete,
            region: ctx.region.clone(),
            snapshot_id: snapshot.snapshot_id.clone(),
            age_days: age_days(snapshot.start_time, now),
            account: ctx.identity.account.clone(),
            user_id: ctx.identity.user_id.clone(),
            snapshot_tags: tag_info(&snapshot.tags),
            remote_code: None,
            remote_message: None,
            error: None,
        };

        let result = with_retry(
            &self.retry,
            self.classifier.as_ref(),
            &self.control,
            "delete_snapshot",
            || self.api.delete_snapshot(&snapshot.snapshot_id),
        );

        match result {
            Err(err) if err.is_cancelled() => abandon(&err, snapshot.snapshot_id.as_str()),
            Ok(()) => {
                detail.status = ExpireStatus::Completed;
                self.sink
                    .emit(&ResultEvent::expire(ctx.correlation_id, Outcome::Success, detail));
                JobOutcome::Success
            }
            Err(RetryError::GaveUp { source, .. }) if source.is_in_use() => {
                detail.status = ExpireStatus::Skipped;
                detail.remote_code = Some(source.code);
                detail.remote_message = Some(source.message);
                self.sink
                    .emit(&ResultEvent::expire(ctx.correlation_id, Outcome::Skipped, detail));
                JobOutcome::Skipped
            }
            Err(err) => {
                detail.error = Some(err.to_string());
                self.sink
                    .emit(&ResultEvent::expire(ctx.correlation_id, Outcome::Error, detail));
                escalate(err, snapshot.snapshot_id.as_str())
            }
        }
    }
}

/// Terminal remote errors are reported and the run goes on; exhausting the
/// retry budget is fatal.
fn escalate(err: RetryError, subject: &str) -> JobOutcome {
    if err.is_exhausted() {
        error!(subject, error = %err, "retry budget exhausted");
        JobOutcome::Fatal(err.to_string())
    } else {
        warn!(subject, error = %err, "remote call failed");
        JobOutcome::Error
    }
}

fn abandon(err: &RetryError, subject: &str) -> JobOutcome {
    info!(subject, attempts = err.attempts(), "job abandoned: run cancelled");
    JobOutcome::Cancelled
}

impl<A: SnapshotApi + 'static> JobHandler for SnapshotJobHandler<A> {
    fn handle(&self, job: &Job, ctx: &RunContext) -> JobOutcome {
        match job {
            Resource::Volume(volume) => self.create(volume, ctx),
            Resource::Snapshot(snapshot) => self.expire(snapshot, ctx),
        }
    }
}

/// State shared by the worker threads of one dispatch run.
pub(crate) struct WorkerShared<H: ?Sized> {
    pub queue: Arc<JobQueue<Job>>,
    pub handler: Arc<H>,
    pub ctx: Arc<RunContext>,
    pub control: Arc<RunControl>,
    pub report: Arc<Mutex<DispatchReport>>,
    pub poll_interval: Duration,
}

impl<H: ?Sized> Clone for WorkerShared<H> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            handler: Arc::clone(&self.handler),
            ctx: Arc::clone(&self.ctx),
            control: Arc::clone(&self.control),
            report: Arc::clone(&self.report),
            poll_interval: self.poll_interval,
        }
    }
}

pub(crate) fn spawn_worker<H>(index: usize, shared: WorkerShared<H>) -> io::Result<thread::JoinHandle<()>>
where
    H: JobHandler + ?Sized,
{
    thread::Builder::new()
        .name(format!("ebssnap-worker-{index}"))
        .spawn(move || worker_loop(index, shared))
}

fn worker_loop<H>(index: usize, shared: WorkerShared<H>)
where
    H: JobHandler + ?Sized,
{
    debug!(worker = index, correlation_id = %shared.ctx.correlation_id, "worker started");

    loop {
        let popped = shared.queue.pop_timeout(shared.poll_interval);
        if shared.control.is_cancelled() {
            // A job still queued at cancellation is acknowledged unhandled.
            if let Pop::Job(job) = popped {
                debug!(worker = index, job = %job.id(), "dropping job: run cancelled");
            }
            info!(worker = index, "worker stopping: run cancelled");
            break;
        }

        let job = match popped {
            Pop::Job(job) => job,
            Pop::TimedOut => continue,
            Pop::Closed => break,
        };

        let outcome = shared.handler.handle(&job, &shared.ctx);
        debug!(worker = index, job = %job.id(), ?outcome, "job handled");
        shared
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&outcome);
        // Acknowledge before deciding whether to keep going.
        drop(job);
        shared.control.mark_progress();

        match outcome {
            JobOutcome::Fatal(reason) => {
                error!(worker = index, reason = %reason, "worker hit a fatal error");
                shared.control.report_fatal(reason);
                break;
            }
            JobOutcome::Cancelled => {
                info!(worker = index, "worker stopping: run cancelled");
                break;
            }
            JobOutcome::Success | JobOutcome::Skipped | JobOutcome::Error => {}
        }
    }

    debug!(worker = index, "worker stopped");
}
