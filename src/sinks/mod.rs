//! Record consumers.
//!
//! A [`RecordSink`] receives every published record, in decode order, plus
//! the pipeline's diagnostics. Each sink runs in its own task (see
//! [`crate::pipeline::fanout`]), so a slow or failing sink only affects
//! itself. Errors returned from a callback are logged and the sink keeps
//! receiving events.

use async_trait::async_trait;
use std::sync::Arc;

use crate::pipeline::Diagnostic;
use crate::protocol::Record;

pub mod channel;
pub mod csv_log;
pub mod series;

pub use channel::ChannelSink;
pub use csv_log::{CsvLogSink, LogStats, CSV_HEADER};
pub use series::{Series, SeriesBuffer, SeriesSink};

#[async_trait]
pub trait RecordSink: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn on_record(&mut self, record: &Arc<Record>) -> anyhow::Result<()>;

    async fn on_diagnostic(&mut self, _diagnostic: &Diagnostic) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once after the last event of a run.
    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
