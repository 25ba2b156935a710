//! In-memory series for live display.
//!
//! The buffer grows without bound; a display decides for itself what to
//! draw. Readers take a snapshot copy and never hold the lock while
//! rendering.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::RecordSink;
use crate::protocol::Record;

/// One vector per plotted quantity, all the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    /// Cycle numbers, in arrival order.
    pub cycles: Vec<i64>,
    /// Lower force, N.
    pub force_lower: Vec<f64>,
    /// Upper force, N.
    pub force_upper: Vec<f64>,
    /// Travel 1, mm.
    pub travel_1: Vec<f64>,
    /// Travel 2, mm.
    pub travel_2: Vec<f64>,
    /// Travel at upper force, mm.
    pub travel_at_upper: Vec<f64>,
    /// Loss of stiffness, percent.
    pub loss_of_stiffness: Vec<f64>,
}

impl Series {
    /// Points per series.
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    /// Whether no point has been recorded.
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    fn push(&mut self, record: &Record) {
        self.cycles.push(record.cycle_count);
        self.force_lower.push(record.force_lower.to_f64());
        self.force_upper.push(record.force_upper.to_f64());
        self.travel_1.push(record.travel_1.to_f64());
        self.travel_2.push(record.travel_2.to_f64());
        self.travel_at_upper.push(record.travel_at_upper.to_f64());
        self.loss_of_stiffness
            .push(record.loss_of_stiffness_percent());
    }
}

/// Shared handle to a [`Series`]; clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct SeriesBuffer {
    inner: Arc<RwLock<Series>>,
}

impl SeriesBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Series> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Series> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one record's values.
    pub fn push(&self, record: &Record) {
        self.write().push(record);
    }

    /// Copy of every series.
    pub fn snapshot(&self) -> Series {
        self.read().clone()
    }

    /// Points recorded so far.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no point has been recorded.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Most recent cycle count, if any.
    pub fn last_cycle(&self) -> Option<i64> {
        self.read().cycles.last().copied()
    }

    /// Drop all points.
    pub fn clear(&self) {
        *self.write() = Series::default();
    }
}

/// Display sink appending every record to a [`SeriesBuffer`].
pub struct SeriesSink {
    buffer: SeriesBuffer,
}

impl SeriesSink {
    /// Sink writing into `buffer`.
    pub fn new(buffer: SeriesBuffer) -> Self {
        Self { buffer }
    }

    /// Shared handle to the buffer.
    pub fn buffer(&self) -> SeriesBuffer {
        self.buffer.clone()
    }
}

#[async_trait]
impl RecordSink for SeriesSink {
    fn name(&self) -> &str {
        "series"
    }

    async fn on_record(&mut self, record: &Arc<Record>) -> anyhow::Result<()> {
        self.buffer.push(record);
        Ok(())
    }
}
