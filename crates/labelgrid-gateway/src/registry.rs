//! Wait registry — task id to completion signal.
//!
//! Two maps behind one mutex: live waiters, and results that arrived when
//! nobody was waiting (orphans). The mutex is never held across an await.
//!
//! A waiter is removed by whichever side finishes first: [`WaitRegistry::resolve`]
//! takes it out to signal it, or dropping the [`WaitHandle`] takes it out on
//! timeout or cancellation. Both removals are idempotent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use labelgrid_core::{ClassifyResult, TaskId};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// What [`WaitRegistry::resolve`] did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A waiting caller received it.
    Delivered,
    /// Nobody was waiting; kept until the sweep.
    Orphaned,
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<ClassifyResult>,
}

#[derive(Default)]
struct Maps {
    waiters: HashMap<TaskId, Waiter>,
    orphans: HashMap<TaskId, (ClassifyResult, Instant)>,
}

/// Concurrent map of live wait handles and orphaned results.
pub struct WaitRegistry {
    maps: Mutex<Maps>,
    next_ticket: AtomicU64,
    orphan_ttl: Duration,
}

impl WaitRegistry {
    pub fn new(orphan_ttl: Duration) -> Self {
        Self {
            maps: Mutex::new(Maps::default()),
            next_ticket: AtomicU64::new(1),
            orphan_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        match self.maps.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start waiting for `task_id`.
    ///
    /// Returns `None` if another caller is already waiting on the same id.
    /// A stale orphan under the id is discarded so an old result can never
    /// answer a new submission.
    pub fn register(self: &Arc<Self>, task_id: &str) -> Option<WaitHandle> {
        let (tx, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        let mut maps = self.lock();
        if maps.waiters.contains_key(task_id) {
            return None;
        }
        if maps.orphans.remove(task_id).is_some() {
            debug!(%task_id, "discarded stale orphaned result");
        }
        maps.waiters
            .insert(task_id.to_string(), Waiter { ticket, tx });
        drop(maps);

        Some(WaitHandle {
            registry: Arc::clone(self),
            task_id: task_id.to_string(),
            ticket,
            rx,
        })
    }

    /// Hand a result to its waiter, or keep it as an orphan.
    ///
    /// A second delivery of the same result finds no waiter and becomes an
    /// orphan; it never resumes anyone twice.
    pub fn resolve(&self, result: ClassifyResult) -> Resolution {
        let mut maps = self.lock();
        let result = match maps.waiters.remove(&result.task_id) {
            Some(waiter) => match waiter.tx.send(result) {
                Ok(()) => return Resolution::Delivered,
                // Handles release their entry before dropping the receiver,
                // so this only keeps the result as an orphan.
                Err(result) => result,
            },
            None => result,
        };
        maps.orphans
            .insert(result.task_id.clone(), (result, Instant::now()));
        Resolution::Orphaned
    }

    /// Discard orphans older than the TTL. Returns how many were dropped.
    pub fn sweep_orphans(&self) -> usize {
        self.sweep_orphans_at(Instant::now())
    }

    fn sweep_orphans_at(&self, now: Instant) -> usize {
        let ttl = self.orphan_ttl;
        let mut maps = self.lock();
        let before = maps.orphans.len();
        maps.orphans
            .retain(|_, (_, stored_at)| now.saturating_duration_since(*stored_at) < ttl);
        before - maps.orphans.len()
    }

    /// Callers currently waiting.
    pub fn pending_waits(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Results held with nobody waiting.
    pub fn orphaned_results(&self) -> usize {
        self.lock().orphans.len()
    }

    /// Drop the waiter for `task_id` if it is still the one holding `ticket`.
    fn release(&self, task_id: &str, ticket: u64) {
        let mut maps = self.lock();
        if maps
            .waiters
            .get(task_id)
            .is_some_and(|waiter| waiter.ticket == ticket)
        {
            maps.waiters.remove(task_id);
        }
        maps.orphans.remove(task_id);
    }
}

/// A caller's claim on the result for one task id.
///
/// Dropping the handle removes its waiter and any residual result for the
/// id, whatever path the caller left by.
pub struct WaitHandle {
    registry: Arc<WaitRegistry>,
    task_id: TaskId,
    ticket: u64,
    rx: oneshot::Receiver<ClassifyResult>,
}

impl WaitHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Suspend until the result arrives. `None` if the signal was dropped.
    pub async fn wait(&mut self) -> Option<ClassifyResult> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.registry.release(&self.task_id, self.ticket);
    }
}
