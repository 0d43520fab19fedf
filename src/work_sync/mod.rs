//! Batching of concurrently submitted work against one shared material.
//!
//! Threads submit [`Work`] units. Whenever no round is running, one submitting thread
//! closes the round: it takes every pending unit, combines them in submission order and
//! applies the result to the material once. Units submitted while a round runs wait for
//! the next one. Each unit is applied exactly once and its submitter receives that
//! round's outcome.

use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A combinable unit of work against material `M`.
///
/// `combine` must be associative; the combined unit is applied in place of the parts.
pub trait Work<M>: Send + Sized {
    fn combine(&mut self, other: Self);

    fn apply(self, material: &mut M) -> Result<()>;
}

pub struct WorkSync<M, W> {
    inner: Arc<Inner<M, W>>,
}

struct Inner<M, W> {
    material: Mutex<M>,
    queue: Mutex<Queue<W>>,
    round_done: Condvar,
}

struct Queue<W> {
    next_ticket: u64,
    pending: Vec<(u64, W)>,
    running: bool,
    outcomes: HashMap<u64, Result<()>>,
    /// Tickets whose handle was dropped before their round finished.
    abandoned: HashSet<u64>,
}

impl<M, W> Clone for WorkSync<M, W> {
    fn clone(&self) -> Self {
        WorkSync {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Send, W: Work<M>> WorkSync<M, W> {
    pub fn new(material: M) -> Self {
        WorkSync {
            inner: Arc::new(Inner {
                material: Mutex::new(material),
                queue: Mutex::new(Queue {
                    next_ticket: 0,
                    pending: Vec::new(),
                    running: false,
                    outcomes: HashMap::new(),
                    abandoned: HashSet::new(),
                }),
                round_done: Condvar::new(),
            }),
        }
    }

    /// Submits `work` and blocks until the round containing it has been applied.
    pub fn apply(&self, work: W) -> Result<()> {
        let ticket = self.enqueue(work);
        self.inner.await_ticket(ticket)
    }

    /// Submits `work` without waiting for other threads' rounds.
    ///
    /// If no round is running the caller runs one right away; otherwise the unit is left
    /// for the running round's successor and the returned handle waits for it.
    pub fn apply_async(&self, work: W) -> AsyncApply<M, W> {
        let ticket = self.enqueue(work);
        let mut queue = self.inner.queue.lock();
        if !queue.running && !queue.outcomes.contains_key(&ticket) {
            queue = self.inner.run_round(queue);
        }
        drop(queue);
        AsyncApply {
            inner: Some(self.inner.clone()),
            ticket,
        }
    }

    /// Runs `f` with exclusive access to the material, outside of any round.
    pub fn with_material<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.inner.material.lock())
    }

    fn enqueue(&self, work: W) -> u64 {
        let mut queue = self.inner.queue.lock();
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        queue.pending.push((ticket, work));
        ticket
    }
}

impl<M, W> Inner<M, W> {
    /// Forgets `ticket`: a stored outcome is dropped, a future one is never stored.
    fn abandon(&self, ticket: u64) {
        let mut queue = self.queue.lock();
        if queue.outcomes.remove(&ticket).is_none() {
            queue.abandoned.insert(ticket);
        }
    }
}

impl<M: Send, W: Work<M>> Inner<M, W> {
    fn await_ticket(&self, ticket: u64) -> Result<()> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(outcome) = queue.outcomes.remove(&ticket) {
                return outcome;
            }
            if !queue.running && !queue.pending.is_empty() {
                queue = self.run_round(queue);
            } else {
                self.round_done.wait(&mut queue);
            }
        }
    }

    /// Closes the round: takes every pending unit, applies the combination, publishes
    /// the outcome to every ticket in the round. Called with the queue lock held and
    /// returns it re-acquired.
    fn run_round<'a>(
        &'a self,
        mut queue: parking_lot::MutexGuard<'a, Queue<W>>,
    ) -> parking_lot::MutexGuard<'a, Queue<W>> {
        queue.running = true;
        let batch = std::mem::take(&mut queue.pending);
        drop(queue);

        let mut tickets = Vec::with_capacity(batch.len());
        let mut combined: Option<W> = None;
        for (ticket, work) in batch {
            tickets.push(ticket);
            match combined.as_mut() {
                Some(acc) => acc.combine(work),
                None => combined = Some(work),
            }
        }
        let outcome = match combined {
            Some(work) => work.apply(&mut self.material.lock()),
            None => Ok(()),
        };
        if let Err(e) = &outcome {
            log::error!("work sync round of {} units failed: {}", tickets.len(), e);
        }

        let mut queue = self.queue.lock();
        for ticket in tickets {
            if !queue.abandoned.remove(&ticket) {
                queue.outcomes.insert(ticket, outcome.clone());
            }
        }
        queue.running = false;
        self.round_done.notify_all();
        queue
    }
}

/// Handle on asynchronously submitted work.
///
/// Dropping the handle without awaiting still lets the unit be applied by a later round,
/// but its outcome is then discarded.
#[must_use = "await_applied() reports whether the work was applied"]
pub struct AsyncApply<M, W> {
    inner: Option<Arc<Inner<M, W>>>,
    ticket: u64,
}

impl<M: Send, W: Work<M>> AsyncApply<M, W> {
    /// A handle for "nothing was submitted".
    pub fn empty() -> Self {
        AsyncApply {
            inner: None,
            ticket: 0,
        }
    }

    pub fn await_applied(mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => inner.await_ticket(self.ticket),
            None => Ok(()),
        }
    }
}

impl<M, W> Drop for AsyncApply<M, W> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.abandon(self.ticket);
        }
    }
}
