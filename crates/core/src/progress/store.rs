//! # Progress Event Store
//!
//! Append-only per-job event log with live fan-out.
//!
//! ```text
//! stage ──append──▶ ProgressStore ──┬── history (Vec, oldest first)
//!                                   └── broadcast::Sender ──▶ Subscription × N
//! ```
//!
//! Sequence assignment, history append and fan-out happen under one lock, so
//! `subscribe_with_history` can snapshot history and register a receiver
//! without any event falling between the two.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::events::{ProgressEvent, ProgressUpdate, Step};

/// How long a finished job's history is kept once nobody is listening
pub const DEFAULT_GC_GRACE: Duration = Duration::from_secs(10 * 60);

/// Per-subscriber buffer before the oldest undelivered events are dropped
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

struct JobLog {
    events: Vec<ProgressEvent>,
    /// Steps that reached `completed` or `error`
    frozen: HashSet<Step>,
    sender: broadcast::Sender<ProgressEvent>,
    terminal_since: Option<Instant>,
}

impl JobLog {
    fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self {
            events: Vec::new(),
            frozen: HashSet::new(),
            sender,
            terminal_since: None,
        }
    }

    fn collectable(&self, now: Instant, grace: Duration) -> bool {
        if self.sender.receiver_count() > 0 {
            return false;
        }
        if self.events.is_empty() {
            // Subscribed to a job that never produced anything, then left.
            return true;
        }
        self.terminal_since
            .map(|since| now.saturating_duration_since(since) >= grace)
            .unwrap_or(false)
    }
}

/// Live listener for one job. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    job_id: String,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the next event. `None` once the job's log has been discarded.
    ///
    /// A subscriber that falls more than the buffer size behind loses the
    /// oldest undelivered events; the gap is logged and delivery continues.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        skipped,
                        "Progress subscriber lagged, oldest events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        skipped,
                        "Progress subscriber lagged, oldest events dropped"
                    );
                }
                Err(_) => return None,
            }
        }
    }
}

/// Process-wide progress store. Construct once and share via `Arc`.
pub struct ProgressStore {
    jobs: Mutex<HashMap<String, JobLog>>,
    buffer: usize,
    grace: Duration,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER, DEFAULT_GC_GRACE)
    }
}

impl ProgressStore {
    pub fn new(buffer: usize, grace: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
            grace,
        }
    }

    /// A poisoned lock still guards consistent data: every mutation below
    /// completes before anything that could panic.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobLog>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event and fan it out to every live subscriber.
    ///
    /// Returns `None` when the event's step has already completed or failed
    /// for this job; such events are never recorded.
    pub fn append(&self, job_id: &str, update: ProgressUpdate) -> Option<ProgressEvent> {
        let mut jobs = self.lock();
        let log = jobs
            .entry(job_id.to_string())
            .or_insert_with(|| JobLog::new(self.buffer));

        if log.frozen.contains(&update.step) {
            tracing::warn!(
                job_id,
                step = %update.step,
                status = ?update.status,
                "Dropping progress event for a step that already finished"
            );
            return None;
        }

        let sequence = log.events.len() as u64;
        let event = ProgressEvent::from_update(job_id, sequence, update);

        if event.status.is_final() {
            log.frozen.insert(event.step);
        }
        log.terminal_since = if event.is_terminal() {
            Some(Instant::now())
        } else {
            None
        };
        log.events.push(event.clone());

        // Err only means nobody is listening right now.
        let delivered = log.sender.send(event.clone()).unwrap_or(0);

        tracing::debug!(
            job_id,
            sequence,
            step = %event.step,
            status = ?event.status,
            current = ?event.current,
            total = ?event.total,
            delivered,
            message = %event.message,
            "Progress event"
        );

        Some(event)
    }

    /// All events recorded for a job, oldest first. Empty for unknown jobs.
    pub fn history(&self, job_id: &str) -> Vec<ProgressEvent> {
        self.lock()
            .get(job_id)
            .map(|log| log.events.clone())
            .unwrap_or_default()
    }

    /// Register a live listener. Does not replay history.
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        let mut jobs = self.lock();
        let log = jobs
            .entry(job_id.to_string())
            .or_insert_with(|| JobLog::new(self.buffer));
        Subscription {
            job_id: job_id.to_string(),
            receiver: log.sender.subscribe(),
        }
    }

    /// Snapshot history and register a listener in one step: every event is
    /// either in the returned history or delivered to the subscription, never
    /// both and never neither.
    pub fn subscribe_with_history(&self, job_id: &str) -> (Vec<ProgressEvent>, Subscription) {
        let mut jobs = self.lock();
        let log = jobs
            .entry(job_id.to_string())
            .or_insert_with(|| JobLog::new(self.buffer));
        let history = log.events.clone();
        let subscription = Subscription {
            job_id: job_id.to_string(),
            receiver: log.sender.subscribe(),
        };
        (history, subscription)
    }

    /// Number of live subscriptions for a job
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.lock()
            .get(job_id)
            .map(|log| log.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of jobs currently held in memory
    pub fn job_count(&self) -> usize {
        self.lock().len()
    }

    /// Discard finished, unobserved jobs whose grace period has elapsed
    pub fn collect_garbage(&self) -> usize {
        self.collect_garbage_at(Instant::now())
    }

    /// [`ProgressStore::collect_garbage`] against an explicit clock reading
    pub fn collect_garbage_at(&self, now: Instant) -> usize {
        let mut jobs = self.lock();
        let before = jobs.len();
        let grace = self.grace;
        jobs.retain(|job_id, log| {
            let drop = log.collectable(now, grace);
            if drop {
                tracing::debug!(job_id = %job_id, events = log.events.len(), "Discarding job history");
            }
            !drop
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::info!(removed, remaining = jobs.len(), "Progress store garbage collected");
        }
        removed
    }

    /// Periodically collect garbage until the store is dropped
    pub fn spawn_gc(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.collect_garbage();
                    }
                    None => break,
                }
            }
        })
    }
}
