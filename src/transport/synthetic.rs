//! Synthetic transport for running without an instrument.
//!
//! Frames come either from a [`FrameGenerator`] or from a scripted list
//! replayed in order. Either way one frame is released per `interval`.
//! A read never waits longer than the read timeout, so a caller blocked in
//! `read_frame` gets control back within that bound even when the cadence
//! is slower or the script is exhausted.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info};

use super::{ReadOutcome, Transport, TransportCounters, TransportError, TransportStats};
use crate::config::TransportConfig;
use crate::generator::FrameGenerator;

enum FrameSource {
    Generated(FrameGenerator),
    Scripted(VecDeque<String>),
}

impl FrameSource {
    fn next_frame(&mut self) -> Option<String> {
        match self {
            FrameSource::Generated(generator) => generator.next_frame(),
            FrameSource::Scripted(frames) => frames.pop_front(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FrameSource::Generated(_) => "generated",
            FrameSource::Scripted(_) => "scripted",
        }
    }
}

/// Transport producing frames without hardware.
pub struct SyntheticTransport {
    source: FrameSource,
    interval: Duration,
    read_timeout: Duration,
    next_due: Option<Instant>,
    counters: Arc<TransportCounters>,
}

impl SyntheticTransport {
    /// Endless generated frames at `interval`.
    pub fn generated(generator: FrameGenerator, interval: Duration) -> Self {
        Self::with_source(FrameSource::Generated(generator), interval)
    }

    /// Replay `frames` in order at `interval`, then fall silent.
    pub fn scripted<I, S>(frames: I, interval: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let frames = frames.into_iter().map(Into::into).collect();
        Self::with_source(FrameSource::Scripted(frames), interval)
    }

    /// Build from `[transport]`; a non-empty `synthetic.frames` list selects
    /// scripted mode.
    pub fn from_config(config: &TransportConfig) -> Self {
        let synthetic = &config.synthetic;
        let transport = if synthetic.frames.is_empty() {
            let mut generator =
                FrameGenerator::new(synthetic.seed).with_error_every(synthetic.error_every);
            if let Some(end) = synthetic.end_after {
                generator = generator.with_end_after(end);
            }
            Self::generated(generator, synthetic.interval)
        } else {
            Self::scripted(synthetic.frames.iter().cloned(), synthetic.interval)
        };
        transport.with_read_timeout(config.read_timeout)
    }

    fn with_source(source: FrameSource, interval: Duration) -> Self {
        Self {
            source,
            interval,
            read_timeout: Duration::from_secs(1),
            next_due: None,
            counters: Arc::new(TransportCounters::default()),
        }
    }

    /// Longest a single `read_frame` waits.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for SyntheticTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.next_due = Some(Instant::now());
        self.counters.set_connected(true);
        info!(source = self.source.label(), interval_ms = self.interval.as_millis() as u64, "synthetic transport started");
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<ReadOutcome, TransportError> {
        let due = self.next_due.ok_or(TransportError::NotConnected)?;
        let deadline = Instant::now() + self.read_timeout;

        if due > deadline {
            sleep_until(deadline).await;
            return Ok(ReadOutcome::Timeout);
        }
        sleep_until(due).await;

        match self.source.next_frame() {
            Some(frame) => {
                self.next_due = Some(due + self.interval);
                self.counters.add_bytes(frame.len() + 1);
                self.counters.add_frame();
                debug!(frame = %frame, "synthetic frame");
                Ok(ReadOutcome::Frame(frame))
            }
            None => {
                // Exhausted: behave like a silent line.
                sleep(self.read_timeout.saturating_sub(due.elapsed())).await;
                Ok(ReadOutcome::Timeout)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.next_due.take().is_some() {
            self.counters.set_connected(false);
            info!(frames = self.counters.snapshot().frames_read, "synthetic transport stopped");
        }
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }

    fn describe(&self) -> String {
        format!("synthetic({}, every {:?})", self.source.label(), self.interval)
    }
}
