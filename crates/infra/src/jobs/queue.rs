//! Bounded, joinable multi-producer/multi-consumer job queue.
//!
//! Capacity is fixed at construction; producers block (bounded) when it is
//! full. Every popped job is handed out as a [`Claimed`] guard that
//! acknowledges the job when dropped, so `join` returns once every pushed job
//! has been acknowledged exactly once.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
    /// Pushed but not yet acknowledged (queued + claimed).
    unfinished: usize,
    closed: bool,
    high_water: usize,
}

pub struct JobQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    all_done: Condvar,
}

/// Rejected push; the job is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    Full(T),
    Timeout(T),
    Closed(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(t) | PushError::Timeout(t) | PushError::Closed(t) => t,
        }
    }
}

/// Result of a bounded wait for a job.
#[derive(Debug)]
pub enum Pop<'a, T> {
    Job(Claimed<'a, T>),
    TimedOut,
    Closed,
}

/// A job checked out of the queue. Dropping it acknowledges the job.
#[derive(Debug)]
pub struct Claimed<'a, T> {
    item: T,
    queue: &'a JobQueue<T>,
}

impl<T> core::ops::Deref for Claimed<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T> Drop for Claimed<'_, T> {
    fn drop(&mut self) {
        self.queue.task_done();
    }
}

impl<T> core::fmt::Debug for JobQueue<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.lock();
        f.debug_struct("JobQueue")
            .field("len", &state.items.len())
            .field("capacity", &state.capacity)
            .field("unfinished", &state.unfinished)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> JobQueue<T> {
    /// Create a queue holding at most `capacity` jobs (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                capacity,
                unfinished: 0,
                closed: false,
                high_water: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // Queue state is only mutated under short, panic-free critical sections.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue_locked(&self, state: &mut QueueState<T>, item: T) {
        state.items.push_back(item);
        state.unfinished += 1;
        state.high_water = state.high_water.max(state.items.len());
        self.not_empty.notify_one();
    }

    /// Push without blocking.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if state.items.len() >= state.capacity {
            return Err(PushError::Full(item));
        }
        self.enqueue_locked(&mut state, item);
        Ok(())
    }

    /// Push, waiting up to `timeout` for a free slot.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PushError::Closed(item));
            }
            if state.items.len() < state.capacity {
                self.enqueue_locked(&mut state, item);
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PushError::Timeout(item));
            }
            state = self
                .not_full
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wait up to `timeout` for a job.
    ///
    /// Remaining jobs are still handed out after `close`; `Closed` is only
    /// returned once the queue is both closed and empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop<'_, T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Pop::Job(Claimed { item, queue: self });
            }
            if state.closed {
                return Pop::Closed;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Pop::TimedOut;
            }
            state = self
                .not_empty
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn task_done(&self) {
        let mut state = self.lock();
        debug_assert!(state.unfinished > 0, "acknowledged more jobs than were pushed");
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            self.all_done.notify_all();
        }
    }

    /// Wait up to `timeout` for every pushed job to be acknowledged.
    ///
    /// Returns `true` when nothing is outstanding.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.unfinished == 0 {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .all_done
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Refuse further pushes and wake every waiter.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Jobs waiting to be claimed.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs pushed but not yet acknowledged.
    pub fn unfinished(&self) -> usize {
        self.lock().unfinished
    }

    /// Largest number of jobs ever waiting at once.
    pub fn high_water_mark(&self) -> usize {
        self.lock().high_water
    }
}
