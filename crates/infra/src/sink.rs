//! Destinations for per-job result events.

use std::sync::{Mutex, PoisonError};

use tracing::{error, info};

use ebssnap_core::{Outcome, ResultEvent};

/// Receives one result event per processed job. Called from worker threads.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: &ResultEvent);
}

/// Renders each event as a structured `tracing` record.
///
/// `success` and `skipped` go out at info, `error` at error level. The whole
/// event is attached as a JSON string under `json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl TracingEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: &ResultEvent) {
        let json = event.to_json();
        match event.result {
            Outcome::Success | Outcome::Skipped => info!(
                correlation_id = %event.correlation_id,
                action = event.action.as_str(),
                result = event.result.as_str(),
                subject = %event.subject_id,
                json = %json,
                "job result"
            ),
            Outcome::Error => error!(
                correlation_id = %event.correlation_id,
                action = event.action.as_str(),
                result = event.result.as_str(),
                subject = %event.subject_id,
                json = %json,
                "job result"
            ),
        }
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    inner: Mutex<Vec<ResultEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ResultEvent> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.result == outcome)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: &ResultEvent) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

impl<S: EventSink> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: &ResultEvent) {
        (**self).emit(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use ebssnap_core::{CorrelationId, ExpireDetail, ExpireStatus, SnapshotId};

    fn event(outcome: Outcome) -> ResultEvent {
        ResultEvent::expire(
            CorrelationId::new(),
            outcome,
            ExpireDetail {
                status: ExpireStatus::Completed,
                region: "eu-west-1".to_string(),
                snapshot_id: SnapshotId::new("snap-1"),
                age_days: 3,
                account: String::new(),
                user_id: String::new(),
                snapshot_tags: BTreeMap::new(),
                remote_code: None,
                remote_message: None,
                error: None,
            },
        )
    }

    #[test]
    fn in_memory_sink_collects_events() {
        let sink = InMemoryEventSink::new();
        assert!(sink.is_empty());
        sink.emit(&event(Outcome::Success));
        sink.emit(&event(Outcome::Error));
        sink.emit(&event(Outcome::Success));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.count(Outcome::Success), 2);
        assert_eq!(sink.count(Outcome::Skipped), 0);
        assert_eq!(sink.all()[1].result, Outcome::Error);
    }

    #[test]
    fn tracing_sink_accepts_every_outcome() {
        let sink = TracingEventSink::new();
        for outcome in [Outcome::Success, Outcome::Skipped, Outcome::Error] {
            sink.emit(&event(outcome));
        }
    }
}
