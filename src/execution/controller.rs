//! Controller loop - reconciles every active play of a store
//!
//! Plays are picked up on a resync interval and handed to a bounded set of
//! workers. A play is never reconciled by two workers at once; a play that
//! is signalled while being reconciled is queued again once its pass ends.
//! A play whose pass fails is held back for an exponentially growing delay.

use crate::core::{Play, PlayKey};
use crate::execution::reconciler::{PlayReconciler, ReconcileError};
use crate::persistence::{PlayStore, StoreError};
use crate::scheduler::Scheduler;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Delay before the first retry of a failed pass
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Upper bound for the retry delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// FIFO of play keys with at most one entry and one worker per key
#[derive(Debug)]
pub struct WorkQueue {
    pending: VecDeque<PlayKey>,
    queued: HashSet<PlayKey>,
    in_flight: HashSet<PlayKey>,
    /// Signalled while in flight
    dirty: HashSet<PlayKey>,
    /// Consecutive failed passes per key
    failures: HashMap<PlayKey, u32>,
    /// Failed keys held back until the given instant
    delayed: HashMap<PlayKey, Instant>,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::with_backoff(DEFAULT_RETRY_DELAY, MAX_RETRY_DELAY)
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry failed keys after `base_delay`, doubling up to `max_delay`
    pub fn with_backoff(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            dirty: HashSet::new(),
            failures: HashMap::new(),
            delayed: HashMap::new(),
            base_delay,
            max_delay,
        }
    }

    /// Queue `key` unless it is already waiting or backing off
    pub fn add(&mut self, key: PlayKey) {
        if self.delayed.contains_key(&key) {
            return;
        }
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
    }

    /// Take the next key and mark it in flight
    pub fn pop(&mut self) -> Option<PlayKey> {
        let key = self.pending.pop_front()?;
        self.queued.remove(&key);
        self.in_flight.insert(key.clone());
        Some(key)
    }

    /// Mark `key` as no longer in flight
    pub fn done(&mut self, key: &PlayKey) {
        self.in_flight.remove(key);
        if self.dirty.remove(key) {
            self.add(key.clone());
        }
    }

    /// Mark `key` as no longer in flight after a failed pass and hold it
    /// back; returns the delay
    pub fn retry(&mut self, key: &PlayKey, now: Instant) -> Duration {
        self.in_flight.remove(key);
        self.dirty.remove(key);

        let failures = self.failures.entry(key.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        let factor = 2u32.saturating_pow(*failures - 1);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        self.delayed.insert(key.clone(), now + delay);
        delay
    }

    /// Reset the backoff of `key` after a successful pass
    pub fn forget(&mut self, key: &PlayKey) {
        self.failures.remove(key);
    }

    /// Queue every held-back key that is due at `now`
    pub fn promote(&mut self, now: Instant) -> usize {
        let due: Vec<PlayKey> = self
            .delayed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &due {
            self.delayed.remove(key);
            self.add(key.clone());
        }
        due.len()
    }

    /// When the earliest held-back key is due
    pub fn next_due(&self) -> Option<Instant> {
        self.delayed.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Whether a play still needs reconciling
fn needs_work(play: &Play) -> bool {
    !play.status.phase.is_terminal() || !play.status.cleaned_up
}

/// Sleep until `due`, or forever when nothing is held back
async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// A finished pass; the outer error is a panic inside the pass
type Outcome = (PlayKey, Result<Result<Option<Play>, ReconcileError>, JoinError>);

pub struct Controller<S, P> {
    reconciler: Arc<PlayReconciler<S, P>>,
    workers: usize,
    resync: Duration,
    base_delay: Duration,
    max_delay: Duration,
}

impl<S, P> Controller<S, P>
where
    S: Scheduler + 'static,
    P: PlayStore + 'static,
{
    pub fn new(reconciler: Arc<PlayReconciler<S, P>>, workers: usize, resync: Duration) -> Self {
        Self {
            reconciler,
            workers: workers.max(1),
            resync,
            base_delay: DEFAULT_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    /// Retry failed passes after `base_delay`, doubling up to `max_delay`
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Queue every play that still needs work
    async fn resync(&self, queue: &mut WorkQueue) -> Result<usize, StoreError> {
        let plays = self.reconciler.store().list().await?;
        let mut queued = 0;
        for play in plays.iter().filter(|p| needs_work(p)) {
            queue.add(play.key());
            queued += 1;
        }
        Ok(queued)
    }

    fn spawn(&self, tasks: &mut JoinSet<Outcome>, key: PlayKey) {
        let reconciler = self.reconciler.clone();
        tasks.spawn(async move {
            // the pass runs in its own task so a panic still yields the key
            let pass_key = key.clone();
            let pass = tokio::spawn(async move { reconciler.reconcile(&pass_key).await });
            (key, pass.await)
        });
    }

    fn finish(queue: &mut WorkQueue, (key, joined): Outcome) {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                let delay = queue.retry(&key, Instant::now());
                error!("Reconcile of {} panicked, retrying in {:?}: {}", key, delay, e);
                return;
            }
        };

        match result {
            Ok(play) => {
                queue.forget(&key);
                queue.done(&key);
                match play {
                    Some(play) => debug!("Reconciled {} ({})", key, play.status.phase),
                    None => debug!("Play {} was deleted", key),
                }
            }
            Err(e) if e.is_conflict() => {
                debug!("Conflict on {}, requeueing", key);
                queue.done(&key);
                queue.add(key);
            }
            Err(e) if e.is_retryable() => {
                let delay = queue.retry(&key, Instant::now());
                warn!("Reconcile of {} failed, retrying in {:?}: {}", key, delay, e);
            }
            Err(e) => {
                queue.forget(&key);
                queue.done(&key);
                error!("Reconcile of {} failed: {}", key, e);
            }
        }
    }

    /// Reconcile plays until `shutdown` resolves
    ///
    /// In-flight passes are allowed to finish before returning.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut queue = WorkQueue::with_backoff(self.base_delay, self.max_delay);
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        let mut ticker = tokio::time::interval(self.resync);
        info!("Controller started with {} workers", self.workers);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match self.resync(&mut queue).await {
                        Ok(count) if count > 0 => debug!("Resync queued {} plays", count),
                        Ok(_) => {}
                        Err(e) => warn!("Resync failed: {}", e),
                    }
                }
                _ = sleep_until_due(queue.next_due()) => {
                    let promoted = queue.promote(Instant::now());
                    debug!("Retrying {} plays", promoted);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(outcome) => Self::finish(&mut queue, outcome),
                        Err(e) => error!("Reconcile task panicked: {}", e),
                    }
                }
            }

            while tasks.len() < self.workers {
                let Some(key) = queue.pop() else { break };
                self.spawn(&mut tasks, key);
            }
        }

        info!("Controller stopping, waiting for {} passes", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Reconcile task panicked: {}", e);
            }
        }
    }
}
