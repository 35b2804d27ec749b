//! Deferred offline transitions.
//!
//! A disconnect does not mark the user offline right away. The transition is
//! parked in a single per-identity slot for a grace period; a reconnect in that
//! window cancels it, so page reloads and short network drops never reach
//! observers as an offline/online flap.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

struct PendingOffline {
    generation: u64,
    task: JoinHandle<()>,
}

pub struct PresenceManager {
    grace: Duration,
    pending: DashMap<String, PendingOffline>,
    next_generation: AtomicU64,
}

impl PresenceManager {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            pending: DashMap::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Run `transition` after the grace period unless cancelled first.
    ///
    /// Replaces (and aborts) any transition already pending for `identity`.
    /// The slot stays occupied, and the transition cancellable, until the
    /// transition calls [`claim`](Self::claim) with the generation it was
    /// handed.
    pub fn schedule_offline<F, Fut>(&self, identity: &str, transition: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let grace = self.grace;

        // Spawning while holding the entry keeps the task from claiming a
        // slot that has not been filled yet.
        match self.pending.entry(identity.to_string()) {
            Entry::Occupied(mut slot) => {
                let task = spawn_transition(grace, generation, transition);
                let previous = slot.insert(PendingOffline { generation, task });
                previous.task.abort();
                tracing::debug!(user_id = %identity, "replaced pending offline transition");
            }
            Entry::Vacant(slot) => {
                let task = spawn_transition(grace, generation, transition);
                slot.insert(PendingOffline { generation, task });
            }
        }
    }

    /// Take ownership of the slot on behalf of the transition scheduled as
    /// `generation`. Returns false when it was cancelled or replaced in the
    /// meantime, in which case the transition must not run.
    pub fn claim(&self, identity: &str, generation: u64) -> bool {
        self.pending
            .remove_if(identity, |_, p| p.generation == generation)
            .is_some()
    }

    /// Cancel the pending transition for `identity`. Returns whether one was
    /// still unclaimed.
    pub fn cancel_offline(&self, identity: &str) -> bool {
        match self.pending.remove(identity) {
            Some((_, pending)) => {
                pending.task.abort();
                tracing::debug!(user_id = %identity, "cancelled pending offline transition");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, identity: &str) -> bool {
        self.pending.contains_key(identity)
    }
}

impl Drop for PresenceManager {
    fn drop(&mut self) {
        for entry in self.pending.iter() {
            entry.value().task.abort();
        }
    }
}

fn spawn_transition<F, Fut>(grace: Duration, generation: u64, transition: F) -> JoinHandle<()>
where
    F: FnOnce(u64) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        transition(generation).await;
    })
}
