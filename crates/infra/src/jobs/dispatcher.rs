//! Bounded fan-out of a lazy job source across a fixed worker pool.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use ebssnap_core::RemoteError;

use super::queue::{JobQueue, PushError};
use super::types::{DispatchReport, Job, RunContext, RunControl};
use super::worker::{JobHandler, WorkerShared, spawn_worker};

/// How long a producer may wait on a full queue while no worker reports
/// progress before giving up.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(60);

/// How often blocked producers and consumers re-check run state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every submitted job was acknowledged.
    Completed(DispatchReport),
    /// The run was cancelled; the report is whatever finished before that.
    Cancelled(DispatchReport),
}

impl DispatchOutcome {
    pub fn report(&self) -> &DispatchReport {
        match self {
            DispatchOutcome::Completed(r) | DispatchOutcome::Cancelled(r) => r,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchOutcome::Cancelled(_))
    }

    pub fn exit_code(&self) -> i32 {
        0
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("no live workers left to take jobs")]
    NoLiveWorkers,

    #[error("job queue stayed full for {0:?} with no worker progress")]
    EnqueueTimeout(Duration),

    #[error("worker reported a fatal error: {0}")]
    WorkerFatal(String),

    #[error("listing failed: {0}")]
    Listing(#[from] RemoteError),
}

impl DispatchError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Why the producer side stopped early.
enum Halt {
    Cancelled,
    Failed(DispatchError),
}

impl From<DispatchError> for Halt {
    fn from(err: DispatchError) -> Self {
        Halt::Failed(err)
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    concurrency: usize,
    poll_interval: Duration,
    enqueue_timeout: Duration,
    control: Arc<RunControl>,
}

impl Dispatcher {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            poll_interval: DEFAULT_POLL_INTERVAL,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            control: Arc::new(RunControl::new()),
        }
    }

    /// Share a run control (e.g. one wired to signal handling).
    pub fn with_control(mut self, control: Arc<RunControl>) -> Self {
        self.control = control;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_enqueue_timeout(mut self, enqueue_timeout: Duration) -> Self {
        self.enqueue_timeout = enqueue_timeout;
        self
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    /// Stream `jobs` through a bounded queue to `concurrency` workers and wait
    /// until every submitted job has been acknowledged.
    ///
    /// Cancellation returns immediately without draining or joining workers.
    pub fn dispatch<I, H>(
        &self,
        jobs: I,
        ctx: Arc<RunContext>,
        handler: Arc<H>,
    ) -> Result<DispatchOutcome, DispatchError>
    where
        I: IntoIterator<Item = Result<Job, RemoteError>>,
        H: JobHandler + ?Sized,
    {
        if self.concurrency == 0 {
            return Err(DispatchError::InvalidConcurrency);
        }

        let queue = Arc::new(JobQueue::new(self.concurrency));
        let report = Arc::new(Mutex::new(DispatchReport::default()));
        let shared = WorkerShared {
            queue: Arc::clone(&queue),
            handler,
            ctx: Arc::clone(&ctx),
            control: Arc::clone(&self.control),
            report: Arc::clone(&report),
            poll_interval: self.poll_interval,
        };

        let mut workers = Vec::with_capacity(self.concurrency);
        for index in 0..self.concurrency {
            match spawn_worker(index, shared.clone()) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    queue.close();
                    return Err(DispatchError::Spawn(err));
                }
            }
        }

        info!(
            correlation_id = %ctx.correlation_id,
            concurrency = self.concurrency,
            "dispatch started"
        );

        let run = Run {
            dispatcher: self,
            queue: &queue,
            workers: &workers,
            report: &report,
        };

        match run.submit_all(jobs).and_then(|()| run.drain()) {
            Ok(()) => {}
            Err(Halt::Cancelled) => {
                queue.close();
                info!(correlation_id = %ctx.correlation_id, "dispatch cancelled");
                return Ok(DispatchOutcome::Cancelled(run.snapshot()));
            }
            Err(Halt::Failed(err)) => {
                // Stop the pool; abandoned workers exit at their next poll.
                self.control.cancel();
                queue.close();
                error!(correlation_id = %ctx.correlation_id, error = %err, "dispatch aborted");
                return Err(err);
            }
        }

        queue.close();
        for handle in workers {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }

        let report = run_report(&report, &queue);
        info!(
            correlation_id = %ctx.correlation_id,
            submitted = report.submitted,
            succeeded = report.succeeded,
            skipped = report.skipped,
            errored = report.errored,
            queue_high_water = report.queue_high_water,
            "dispatch finished"
        );
        Ok(DispatchOutcome::Completed(report))
    }
}

/// Convenience wrapper: dispatch with a fresh run control and defaults.
pub fn dispatch<I, H>(
    concurrency: usize,
    jobs: I,
    ctx: Arc<RunContext>,
    handler: Arc<H>,
) -> Result<DispatchOutcome, DispatchError>
where
    I: IntoIterator<Item = Result<Job, RemoteError>>,
    H: JobHandler + ?Sized,
{
    Dispatcher::new(concurrency).dispatch(jobs, ctx, handler)
}

fn run_report(report: &Mutex<DispatchReport>, queue: &JobQueue<Job>) -> DispatchReport {
    let mut report = report.lock().unwrap_or_else(PoisonError::into_inner).clone();
    report.queue_high_water = queue.high_water_mark();
    report
}

/// Producer-side state of one dispatch call.
struct Run<'a> {
    dispatcher: &'a Dispatcher,
    queue: &'a JobQueue<Job>,
    workers: &'a [JoinHandle<()>],
    report: &'a Mutex<DispatchReport>,
}

impl Run<'_> {
    fn check(&self) -> Result<(), Halt> {
        let control = &self.dispatcher.control;
        if control.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        if let Some(reason) = control.fatal() {
            return Err(DispatchError::WorkerFatal(reason).into());
        }
        if self.workers.iter().all(JoinHandle::is_finished) {
            return Err(DispatchError::NoLiveWorkers.into());
        }
        Ok(())
    }

    fn submit_all<I>(&self, jobs: I) -> Result<(), Halt>
    where
        I: IntoIterator<Item = Result<Job, RemoteError>>,
    {
        for job in jobs {
            self.check()?;
            let job = job.map_err(DispatchError::Listing)?;
            self.submit(job)?;
            self.report
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .submitted += 1;
        }
        Ok(())
    }

    fn submit(&self, job: Job) -> Result<(), Halt> {
        let mut job = match self.queue.try_push(job) {
            Ok(()) => return Ok(()),
            Err(PushError::Full(job)) => job,
            Err(PushError::Timeout(_) | PushError::Closed(_)) => return Err(Halt::Cancelled),
        };

        let control = &self.dispatcher.control;
        let timeout = self.dispatcher.enqueue_timeout;
        let started = Instant::now();
        let mut window = started;
        let mut seen = control.progress();
        let mut warned = false;
        loop {
            self.check()?;

            // Workers that finish jobs or sit in a retry backoff keep the window open.
            let progress = control.progress();
            if progress != seen {
                seen = progress;
                window = Instant::now();
            }
            let stalled = window.elapsed();
            if stalled >= timeout {
                return Err(DispatchError::EnqueueTimeout(stalled).into());
            }
            if !warned && started.elapsed() >= timeout {
                warn!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "job queue still full, workers busy"
                );
                warned = true;
            }

            let slice = self.dispatcher.poll_interval.min(timeout - stalled);
            job = match self.queue.push_timeout(job, slice) {
                Ok(()) => return Ok(()),
                Err(PushError::Full(job) | PushError::Timeout(job)) => job,
                Err(PushError::Closed(_)) => return Err(Halt::Cancelled),
            };
        }
    }

    fn drain(&self) -> Result<(), Halt> {
        loop {
            if self.queue.join_timeout(self.dispatcher.poll_interval) {
                break;
            }
            self.check()?;
        }
        // Jobs abandoned on cancellation are acknowledged too.
        if self.dispatcher.control.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        // The last job may have been the one that failed fatally.
        match self.dispatcher.control.fatal() {
            Some(reason) => Err(DispatchError::WorkerFatal(reason).into()),
            None => Ok(()),
        }
    }

    fn snapshot(&self) -> DispatchReport {
        run_report(self.report, self.queue)
    }
}
