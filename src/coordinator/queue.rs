// src/coordinator/queue.rs

use std::collections::{HashMap, VecDeque};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::run::{RunId, RunRequest, Tags};

/// Limit on how many in-flight runs may carry a tag.
///
/// With `value` unset every run carrying `key` counts towards the limit;
/// otherwise only runs where `key == value`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagConcurrencyLimit {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub limit: usize,
}

impl TagConcurrencyLimit {
    pub fn matches(&self, tags: &Tags) -> bool {
        match (tags.get(&self.key), &self.value) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
        }
    }

    /// Whether one more run with `tags` would exceed this limit, given the
    /// tags of runs already in flight.
    pub fn would_exceed<'a>(&self, tags: &Tags, in_flight: impl Iterator<Item = &'a Tags>) -> bool {
        self.matches(tags) && in_flight.filter(|t| self.matches(t)).count() >= self.limit
    }
}

/// A run waiting to be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRun {
    pub run_id: RunId,
    pub request: RunRequest,
    pub priority: i64,
    seq: u64,
}

/// Where [`RunQueue::push`] put a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// The queue was at capacity; the run waits in the overflow backlog.
    Overflow,
}

/// Priority queue of runs waiting for a launch slot.
///
/// Semantics:
/// - Higher [`crate::run::PRIORITY_TAG`] first, FIFO by submission within
///   equal priority.
/// - At most `capacity` runs take part in priority ordering. Further runs go
///   to an overflow backlog (FIFO) and are promoted as entries leave the
///   queue. The backlog is unbounded, so `capacity` does not cap memory.
/// - The queue itself is not synchronized; the queued coordinator keeps it
///   behind a mutex.
#[derive(Debug)]
pub struct RunQueue {
    capacity: usize,
    next_seq: u64,
    entries: Vec<QueuedRun>,
    overflow: VecDeque<QueuedRun>,
}

impl RunQueue {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: 0,
            entries: Vec::new(),
            overflow: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.overflow.is_empty()
    }

    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    pub fn contains(&self, run_id: &RunId) -> bool {
        self.entries.iter().any(|r| &r.run_id == run_id)
            || self.overflow.iter().any(|r| &r.run_id == run_id)
    }

    pub fn push(&mut self, run_id: RunId, request: RunRequest) -> Admission {
        let run = QueuedRun {
            run_id,
            priority: request.priority(),
            request,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        if self.entries.len() < self.capacity && self.overflow.is_empty() {
            debug!(%run_id, priority = run.priority, "queued run");
            self.entries.push(run);
            Admission::Queued
        } else {
            warn!(
                %run_id,
                capacity = self.capacity,
                backlog = self.overflow.len() + 1,
                "run queue full; parking run in overflow backlog"
            );
            self.overflow.push_back(run);
            Admission::Overflow
        }
    }

    /// Remove a run that has not been launched yet.
    pub fn remove(&mut self, run_id: &RunId) -> Option<QueuedRun> {
        if let Some(pos) = self.entries.iter().position(|r| &r.run_id == run_id) {
            let run = self.entries.remove(pos);
            self.promote_overflow();
            return Some(run);
        }
        let pos = self.overflow.iter().position(|r| &r.run_id == run_id)?;
        self.overflow.remove(pos)
    }

    /// Take the best run for which `eligible` holds.
    ///
    /// Ineligible runs keep their place; a held-back high-priority run does
    /// not block lower-priority runs behind it.
    pub fn pop_next(&mut self, mut eligible: impl FnMut(&QueuedRun) -> bool) -> Option<QueuedRun> {
        let pos = self
            .entries
            .iter()
            .enumerate()
            .filter(|&(_, r)| eligible(r))
            .min_by_key(|(_, r)| (std::cmp::Reverse(r.priority), r.seq))
            .map(|(i, _)| i)?;
        let run = self.entries.remove(pos);
        self.promote_overflow();
        Some(run)
    }

    /// Move backlog entries into the queue while there is space.
    pub fn promote_overflow(&mut self) {
        while self.entries.len() < self.capacity {
            let Some(run) = self.overflow.pop_front() else {
                break;
            };
            debug!(run_id = %run.run_id, "promoted run from overflow backlog");
            self.entries.push(run);
        }
    }

    /// Snapshot of queued run ids in launch order (ignoring tag limits).
    pub fn ordered_ids(&self) -> Vec<RunId> {
        let mut ordered: Vec<&QueuedRun> = self.entries.iter().collect();
        ordered.sort_by_key(|r| (std::cmp::Reverse(r.priority), r.seq));
        ordered
            .into_iter()
            .map(|r| r.run_id)
            .chain(self.overflow.iter().map(|r| r.run_id))
            .collect()
    }
}

/// Tags of in-flight runs, keyed by run id.
pub type InFlight = HashMap<RunId, Tags>;
