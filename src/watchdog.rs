//! Data-flow watchdog.
//!
//! The pipeline calls [`Watchdog::reset`] after every published record. A
//! periodic check compares the time since the last reset with the stall
//! threshold and broadcasts a [`StallEvent`] on every tick while the
//! threshold is exceeded. The condition is level-triggered: observers keep
//! hearing about a stall until the next reset.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::WatchdogConfig;

const EVENT_CAPACITY: usize = 16;

/// Smallest accepted threshold; a zero period would stall the check timer.
pub const MIN_THRESHOLD: Duration = Duration::from_millis(1);

/// No record has been published for at least the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallEvent {
    /// Time since the last reset when the check ran.
    pub elapsed: Duration,
    /// Threshold the watchdog was configured with.
    pub threshold: Duration,
}

struct CheckTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    threshold: Duration,
    tick: Duration,
    last_reset: Mutex<Instant>,
    events: broadcast::Sender<StallEvent>,
    task: Mutex<Option<CheckTask>>,
}

/// Cloneable handle; clones share one timer.
#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Watchdog {
    /// `tick` is clamped to `threshold` so a stall is never reported late by
    /// more than one tick. `threshold` is raised to [`MIN_THRESHOLD`].
    pub fn new(threshold: Duration, tick: Duration) -> Self {
        if threshold < MIN_THRESHOLD {
            warn!(
                threshold_us = threshold.as_micros() as u64,
                "stall threshold below minimum, using {MIN_THRESHOLD:?}"
            );
        }
        let threshold = threshold.max(MIN_THRESHOLD);
        let tick = if tick.is_zero() { threshold } else { tick.min(threshold) };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                threshold,
                tick,
                last_reset: Mutex::new(Instant::now()),
                events,
                task: Mutex::new(None),
            }),
        }
    }

    /// Build from the `watchdog` configuration section.
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self::new(config.threshold(), config.tick())
    }

    /// Silence that counts as a stall.
    pub fn threshold(&self) -> Duration {
        self.inner.threshold
    }

    /// Check cadence.
    pub fn tick(&self) -> Duration {
        self.inner.tick
    }

    /// Receive every stall event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StallEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the periodic check is active.
    pub fn is_running(&self) -> bool {
        lock(&self.inner.task).is_some()
    }

    /// Record data flow.
    pub fn reset(&self) {
        *lock(&self.inner.last_reset) = Instant::now();
    }

    /// Time since the last reset (or start).
    pub fn elapsed(&self) -> Duration {
        lock(&self.inner.last_reset).elapsed()
    }

    /// Start the periodic check. Resets the timer first so a fresh start
    /// never reports a stall immediately. No-op when already running.
    pub fn start(&self) {
        let mut task = lock(&self.inner.task);
        if task.is_some() {
            return;
        }
        self.reset();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_checks(Arc::clone(&self.inner), stop_rx));
        *task = Some(CheckTask { stop_tx, handle });
        debug!(
            threshold_ms = self.inner.threshold.as_millis() as u64,
            tick_ms = self.inner.tick.as_millis() as u64,
            "watchdog started"
        );
    }

    /// Stop the periodic check and wait for it to exit.
    pub async fn stop(&self) {
        let task = lock(&self.inner.task).take();
        if let Some(CheckTask { stop_tx, handle }) = task {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "watchdog task failed");
            }
            debug!("watchdog stopped");
        }
    }
}

async fn run_checks(inner: Arc<Inner>, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + inner.tick, inner.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let elapsed = lock(&inner.last_reset).elapsed();
                if elapsed >= inner.threshold {
                    warn!(elapsed_ms = elapsed.as_millis() as u64, "no data received within stall threshold");
                    // No subscribers is fine.
                    let _ = inner.events.send(StallEvent {
                        elapsed,
                        threshold: inner.threshold,
                    });
                }
            }
        }
    }
}
