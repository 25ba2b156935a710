//! Sink that forwards events to a Tokio channel.

use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::RecordSink;
use crate::pipeline::{Diagnostic, PipelineEvent};
use crate::protocol::Record;

/// Forwards records and diagnostics to an `mpsc` receiver, e.g. a UI loop.
///
/// A full channel applies backpressure to this sink's task only.
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<PipelineEvent>,
}

impl ChannelSink {
    /// Sink plus the receiver that observes its events.
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }

    async fn forward(&self, event: PipelineEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("receiver for '{}' dropped", self.name))
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_record(&mut self, record: &Arc<Record>) -> anyhow::Result<()> {
        self.forward(PipelineEvent::Record(Arc::clone(record))).await
    }

    async fn on_diagnostic(&mut self, diagnostic: &Diagnostic) -> anyhow::Result<()> {
        self.forward(PipelineEvent::Diagnostic(diagnostic.clone())).await
    }
}
