//! Per-sink dispatch with isolation.
//!
//! Each registered sink runs in its own task fed by a bounded mpsc channel.
//! The consumer hands an event to every channel concurrently, waiting at
//! most the hand-off timeout per sink. A full channel drops the event for
//! that sink only and marks the sink as lagging: while lagging, events are
//! offered with `try_send` and dropped immediately if the channel is still
//! full, so a stuck sink costs the consumer one timeout rather than one per
//! event. The first successful hand-off clears the mark. A closed channel
//! means the sink task died and the sink is removed. Sinks that finish
//! cleanly are handed back by [`SinkFanout::close`] so the pipeline can
//! reuse them on the next run.

use futures::future::join_all;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::PipelineEvent;
use crate::sinks::RecordSink;

struct SinkSlot {
    name: String,
    tx: mpsc::Sender<PipelineEvent>,
    task: JoinHandle<Box<dyn RecordSink>>,
    /// Last hand-off timed out; skip waiting until the channel drains.
    lagging: bool,
}

enum Handoff {
    Delivered,
    Full,
    Closed,
}

impl SinkSlot {
    async fn offer(&self, event: PipelineEvent, timeout: Duration) -> Handoff {
        if self.lagging {
            return match self.tx.try_send(event) {
                Ok(()) => Handoff::Delivered,
                Err(TrySendError::Full(_)) => Handoff::Full,
                Err(TrySendError::Closed(_)) => Handoff::Closed,
            };
        }
        match self.tx.send_timeout(event, timeout).await {
            Ok(()) => Handoff::Delivered,
            Err(SendTimeoutError::Timeout(_)) => Handoff::Full,
            Err(SendTimeoutError::Closed(_)) => Handoff::Closed,
        }
    }
}

/// Dispatch counts for one published event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sinks that accepted the event.
    pub delivered: usize,
    /// Sinks whose channel stayed full (after the hand-off timeout, or at
    /// once for a lagging sink).
    pub dropped: usize,
    /// Sinks found dead and removed.
    pub removed: usize,
}

/// Owns the per-sink channels and tasks for one run.
pub struct SinkFanout {
    slots: Vec<SinkSlot>,
    handoff_timeout: Duration,
}

impl SinkFanout {
    /// Spawn one task per sink. Must be called inside a Tokio runtime.
    pub fn spawn(
        sinks: Vec<Box<dyn RecordSink>>,
        capacity: usize,
        handoff_timeout: Duration,
    ) -> Self {
        let slots = sinks
            .into_iter()
            .map(|sink| {
                let name = sink.name().to_string();
                let (tx, rx) = mpsc::channel(capacity.max(1));
                let task = tokio::spawn(run_sink(sink, rx));
                SinkSlot {
                    name,
                    tx,
                    task,
                    lagging: false,
                }
            })
            .collect();
        Self {
            slots,
            handoff_timeout,
        }
    }

    /// Sinks still attached.
    pub fn sink_count(&self) -> usize {
        self.slots.len()
    }

    /// Sinks currently marked as lagging.
    pub fn lagging_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lagging).count()
    }

    /// Hand `event` to every sink, in parallel.
    pub async fn publish(&mut self, event: PipelineEvent) -> PublishReport {
        let timeout = self.handoff_timeout;
        let sends = self
            .slots
            .iter()
            .map(|slot| slot.offer(event.clone(), timeout));
        let results = join_all(sends).await;

        let mut report = PublishReport::default();
        let mut dead = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            let slot = &mut self.slots[index];
            match result {
                Handoff::Delivered => {
                    report.delivered += 1;
                    if slot.lagging {
                        slot.lagging = false;
                        info!(sink = %slot.name, "sink caught up");
                    }
                }
                Handoff::Full => {
                    report.dropped += 1;
                    if slot.lagging {
                        debug!(sink = %slot.name, "sink still lagging, event dropped");
                    } else {
                        slot.lagging = true;
                        warn!(sink = %slot.name, "sink channel full, dropping events until it drains");
                    }
                }
                Handoff::Closed => dead.push(index),
            }
        }

        // Reverse order keeps the remaining indices valid.
        for index in dead.into_iter().rev() {
            let slot = self.slots.remove(index);
            error!(sink = %slot.name, "sink task terminated, removing sink");
            report.removed += 1;
        }
        report
    }

    /// Close every channel and wait for the sink tasks to drain what they
    /// already hold. Tasks still running after `shutdown_timeout` are
    /// aborted. Returns the sinks that shut down cleanly.
    pub async fn close(self, shutdown_timeout: Duration) -> Vec<Box<dyn RecordSink>> {
        let deadline = tokio::time::Instant::now() + shutdown_timeout;
        let mut sinks = Vec::with_capacity(self.slots.len());

        // Close all channels before waiting on any task.
        let tasks: Vec<_> = self
            .slots
            .into_iter()
            .map(|slot| (slot.name, slot.task))
            .collect();

        for (name, mut task) in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(sink)) => {
                    debug!(sink = %name, "sink drained");
                    sinks.push(sink);
                }
                Ok(Err(e)) => error!(sink = %name, error = %e, "sink task failed"),
                Err(_) => {
                    warn!(sink = %name, "sink did not drain in time, aborting");
                    task.abort();
                }
            }
        }
        sinks
    }
}

async fn run_sink(
    mut sink: Box<dyn RecordSink>,
    mut rx: mpsc::Receiver<PipelineEvent>,
) -> Box<dyn RecordSink> {
    while let Some(event) = rx.recv().await {
        let result = match &event {
            PipelineEvent::Record(record) => sink.on_record(record).await,
            PipelineEvent::Diagnostic(diagnostic) => sink.on_diagnostic(diagnostic).await,
        };
        if let Err(e) = result {
            warn!(sink = %sink.name(), error = %e, "sink failed to handle event");
        }
    }
    if let Err(e) = sink.close().await {
        warn!(sink = %sink.name(), error = %e, "sink failed to close");
    }
    sink
}
