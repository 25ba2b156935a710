//! Bounded hand-off queue between the producer and consumer tasks.
//!
//! A `VecDeque` under a short-held mutex plus two `Notify` handles, one per
//! direction. Neither side holds the lock across an await point. With a
//! single producer and a single consumer, `notify_one` permits are never
//! lost: a notification sent while nobody waits is stored and consumed by
//! the next wait.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// What the producer does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait up to the configured bound for space, then evict the oldest frame.
    #[default]
    Block,
    /// Evict the oldest frame immediately.
    DropOldest,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored without evicting anything.
    Queued,
    /// The frame was queued after evicting the oldest one.
    EvictedOldest,
}

#[derive(Debug)]
pub struct HandoffQueue {
    frames: Mutex<VecDeque<String>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl HandoffQueue {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Maximum number of queued frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no frame is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `frame`, applying `policy` when full. `wait` bounds the
    /// blocking policy.
    pub async fn push(
        &self,
        frame: String,
        policy: BackpressurePolicy,
        wait: Duration,
    ) -> PushOutcome {
        if policy == BackpressurePolicy::Block {
            let deadline = Instant::now() + wait;
            loop {
                if self.lock().len() < self.capacity {
                    break;
                }
                if timeout_at(deadline, self.not_full.notified()).await.is_err() {
                    break;
                }
            }
        }

        let outcome = {
            let mut frames = self.lock();
            let outcome = if frames.len() >= self.capacity {
                frames.pop_front();
                PushOutcome::EvictedOldest
            } else {
                PushOutcome::Queued
            };
            frames.push_back(frame);
            outcome
        };
        self.not_empty.notify_one();
        outcome
    }

    /// Oldest frame, waiting at most `wait` for one to arrive.
    ///
    /// Cancel safe: a frame is only removed in the same poll that returns it.
    pub async fn pop(&self, wait: Duration) -> Option<String> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if timeout_at(deadline, self.not_empty.notified()).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Oldest frame, without waiting.
    pub fn try_pop(&self) -> Option<String> {
        let frame = self.lock().pop_front();
        if frame.is_some() {
            self.not_full.notify_one();
        }
        frame
    }

    /// Remove every queued frame, returning how many were discarded.
    pub fn drain(&self) -> usize {
        let mut frames = self.lock();
        let n = frames.len();
        frames.clear();
        drop(frames);
        if n > 0 {
            self.not_full.notify_one();
        }
        n
    }
}
