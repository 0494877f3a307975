//! Job types for dispatch runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use ebssnap_core::{CorrelationId, Outcome, Provenance, Resource};

use crate::remote::CallerIdentity;

/// A job is one resource handed to exactly one worker.
pub type Job = Resource;

/// Result of handling a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Nothing to do, or the remote refused benignly (snapshot in use).
    Skipped,
    /// Terminal remote error; reported, the run continues.
    Error,
    /// The run cannot safely continue.
    Fatal(String),
    /// Abandoned mid-flight because the run was cancelled. No event is emitted.
    Cancelled,
}

impl JobOutcome {
    /// Event outcome this maps to, if the job reported one.
    pub fn as_outcome(&self) -> Option<Outcome> {
        match self {
            JobOutcome::Success => Some(Outcome::Success),
            JobOutcome::Skipped => Some(Outcome::Skipped),
            JobOutcome::Error => Some(Outcome::Error),
            JobOutcome::Fatal(_) | JobOutcome::Cancelled => None,
        }
    }
}

/// Immutable per-run configuration, shared read-only by every worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub region: String,
    pub description: String,
    pub correlation_id: CorrelationId,
    pub identity: CallerIdentity,
    pub provenance: Provenance,
}

/// Cancellation flag, fatal report slot and progress counter owned by one
/// dispatch run.
#[derive(Debug, Default)]
pub struct RunControl {
    cancelled: AtomicBool,
    fatal: Mutex<Option<String>>,
    progress: AtomicU64,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a hard stop. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Record a fatal condition. The first report is kept.
    pub fn report_fatal(&self, reason: impl Into<String>) {
        let mut slot = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    pub fn fatal(&self) -> Option<String> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Note that a worker is still doing something useful (finished a job,
    /// or is between retry attempts).
    pub fn mark_progress(&self) {
        self.progress.fetch_add(1, Ordering::Relaxed);
    }

    /// Monotonic count of [`RunControl::mark_progress`] calls.
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }
}

/// Per-run counters, shared by the workers of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub submitted: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub errored: u64,
    pub fatal: u64,
    /// Largest number of jobs ever waiting in the queue at once.
    pub queue_high_water: usize,
}

impl DispatchReport {
    pub(crate) fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Success => self.succeeded += 1,
            JobOutcome::Skipped => self.skipped += 1,
            JobOutcome::Error => self.errored += 1,
            JobOutcome::Fatal(_) => self.fatal += 1,
            JobOutcome::Cancelled => {}
        }
    }

    /// Jobs that reached a handler outcome.
    pub fn processed(&self) -> u64 {
        self.succeeded + self.skipped + self.errored + self.fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fatal_report_wins() {
        let control = RunControl::new();
        assert!(control.fatal().is_none());
        control.report_fatal("throttled forever");
        control.report_fatal("second");
        assert_eq!(control.fatal().as_deref(), Some("throttled forever"));
    }

    #[test]
    fn cancel_is_sticky() {
        let control = RunControl::new();
        assert!(!control.is_cancelled());
        control.cancel();
        control.cancel();
        assert!(control.is_cancelled());
    }

    #[test]
    fn report_counts_outcomes() {
        let mut report = DispatchReport::default();
        report.record(&JobOutcome::Success);
        report.record(&JobOutcome::Success);
        report.record(&JobOutcome::Skipped);
        report.record(&JobOutcome::Fatal("x".into()));
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.fatal, 1);
        assert_eq!(report.processed(), 4);
        assert_eq!(JobOutcome::Error.as_outcome(), Some(Outcome::Error));
        assert_eq!(JobOutcome::Fatal("x".into()).as_outcome(), None);

        report.record(&JobOutcome::Cancelled);
        assert_eq!(report.processed(), 4);
    }

    #[test]
    fn progress_only_moves_forward() {
        let control = RunControl::new();
        assert_eq!(control.progress(), 0);
        control.mark_progress();
        control.mark_progress();
        assert_eq!(control.progress(), 2);
    }
}
