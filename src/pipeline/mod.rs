//! Ingestion pipeline: transport → hand-off queue → decode → validate → sinks.
//!
//! ```text
//!                  ┌──────────── producer task ────────────┐
//!   Transport ──▶  │ read_frame ──▶ HandoffQueue (bounded) │
//!                  └───────────────────────┬───────────────┘
//!                                          ▼
//!                  ┌──────────── consumer task ────────────┐
//!                  │ decode ──▶ validate ──▶ SinkFanout    │──▶ sink tasks
//!                  │    │           │           │          │
//!                  │ DecodeFailed  ValidationFailed  reset watchdog
//!                  └───────────────────────────────────────┘
//!   Watchdog ──(StallEvent)──▶ consumer ──▶ Diagnostic::Stall
//! ```
//!
//! Records and diagnostics travel through the same fan-out as
//! [`PipelineEvent`]s, in decode order.
//!
//! # Stop boundary
//!
//! `stop()` signals both tasks. The producer abandons any pending read or
//! blocked push and closes the transport. The consumer finishes the frame it
//! is processing, then discards whatever is still queued. Frames dropped this
//! way are counted in `frames_discarded_on_stop`, so every frame read ends up
//! published, rejected, dropped by backpressure, or discarded.
//!
//! Every event already handed to the fan-out is delivered before `stop()`
//! returns, bounded by the sink shutdown timeout.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{AcquisitionConfig, PipelineConfig};
use crate::error::{AppResult, DaqError};
use crate::protocol::{DecodeError, FrameDecoder, Record, RecordValidator, ValidationFailure};
use crate::sinks::RecordSink;
use crate::transport::{ReadOutcome, Transport, TransportError};
use crate::watchdog::{StallEvent, Watchdog};

pub mod fanout;
pub mod queue;

pub use fanout::{PublishReport, SinkFanout};
pub use queue::{BackpressurePolicy, HandoffQueue, PushOutcome};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    /// Not acquiring; sinks may be registered.
    Idle,
    /// Producer and consumer tasks are live.
    Running,
    /// Stop requested or the transport failed; waiting for `stop()`.
    Stopping,
}

/// Side-channel notifications published alongside records.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A frame could not be decoded.
    DecodeFailed {
        /// The frame as read.
        raw: String,
        /// Why decoding failed.
        error: DecodeError,
    },
    /// Decoded but rejected; the record is not published.
    ValidationFailed {
        /// The rejected record.
        record: Arc<Record>,
        /// Why it was rejected.
        reason: ValidationFailure,
    },
    /// The instrument reported a non-zero error code. The record itself is
    /// published as well.
    InstrumentError {
        /// Cycle of the record concerned.
        cycle_count: i64,
        /// Instrument error code.
        code: i32,
        /// Text from the error-code table.
        description: String,
    },
    /// A published record carried the END status.
    TestEnded {
        /// Cycle of the record concerned.
        cycle_count: i64,
    },
    /// No record published for at least the watchdog threshold.
    Stall {
        /// Time since the last published record.
        elapsed: Duration,
    },
    /// The producer stopped because the transport failed.
    TransportFailed {
        /// The read failure.
        error: TransportError,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DecodeFailed { raw, error } => {
                write!(f, "decode failed ({error}): {raw}")
            }
            Diagnostic::ValidationFailed { record, reason } => {
                write!(f, "validation failed: {reason} [{}]", record.raw_text)
            }
            Diagnostic::InstrumentError {
                cycle_count,
                code,
                description,
            } => write!(f, "cycle {cycle_count}: error {code}: {description}"),
            Diagnostic::TestEnded { cycle_count } => {
                write!(f, "Test ended at cycle {cycle_count}")
            }
            Diagnostic::Stall { elapsed } => {
                write!(f, "No data received for {:.1} s", elapsed.as_secs_f64())
            }
            Diagnostic::TransportFailed { error } => write!(f, "transport failed: {error}"),
        }
    }
}

/// Unit of fan-out.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A decoded, validated record.
    Record(Arc<Record>),
    /// A side-channel notification.
    Diagnostic(Diagnostic),
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames returned by the transport.
    pub frames_read: u64,
    /// Raw bytes read by the transport, line terminators included.
    pub bytes_read: u64,
    /// Records handed to the fan-out.
    pub records_published: u64,
    /// Frames that failed to decode.
    pub decode_failures: u64,
    /// Records rejected by the validator.
    pub validation_failures: u64,
    /// Frames evicted from a full hand-off queue.
    pub frames_dropped: u64,
    /// Events a sink missed because its channel stayed full.
    pub sink_drops: u64,
    /// Published records with a non-zero error code.
    pub instrument_errors: u64,
    /// Stall diagnostics published.
    pub stalls_reported: u64,
    /// Frames read but still queued (or mid-push) when stop was observed.
    pub frames_discarded_on_stop: u64,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    frames_read: AtomicU64,
    bytes_read: AtomicU64,
    records_published: AtomicU64,
    decode_failures: AtomicU64,
    validation_failures: AtomicU64,
    frames_dropped: AtomicU64,
    sink_drops: AtomicU64,
    instrument_errors: AtomicU64,
    stalls_reported: AtomicU64,
    frames_discarded_on_stop: AtomicU64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl PipelineCounters {
    fn snapshot(&self) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            frames_read: load(&self.frames_read),
            bytes_read: load(&self.bytes_read),
            records_published: load(&self.records_published),
            decode_failures: load(&self.decode_failures),
            validation_failures: load(&self.validation_failures),
            frames_dropped: load(&self.frames_dropped),
            sink_drops: load(&self.sink_drops),
            instrument_errors: load(&self.instrument_errors),
            stalls_reported: load(&self.stalls_reported),
            frames_discarded_on_stop: load(&self.frames_discarded_on_stop),
        }
    }
}

type SharedState = Arc<Mutex<PipelineState>>;

fn lock_state(state: &Mutex<PipelineState>) -> MutexGuard<'_, PipelineState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct RunHandles {
    stop_tx: Arc<watch::Sender<bool>>,
    queue: Arc<HandoffQueue>,
    producer: JoinHandle<()>,
    consumer: JoinHandle<SinkFanout>,
}

/// Owns the acquisition tasks and their lifecycle.
///
/// Sinks are registered while idle and are handed back after every run, so
/// one pipeline can be started and stopped repeatedly.
pub struct IngestionPipeline {
    config: PipelineConfig,
    watchdog: Watchdog,
    state: SharedState,
    counters: Arc<PipelineCounters>,
    sinks: Vec<Box<dyn RecordSink>>,
    run: Option<RunHandles>,
}

impl IngestionPipeline {
    /// Idle pipeline with no sinks.
    pub fn new(config: PipelineConfig, watchdog: Watchdog) -> Self {
        Self {
            config,
            watchdog,
            state: Arc::new(Mutex::new(PipelineState::Idle)),
            counters: Arc::new(PipelineCounters::default()),
            sinks: Vec::new(),
            run: None,
        }
    }

    /// Build from the `pipeline` and `watchdog` sections.
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self::new(config.pipeline.clone(), Watchdog::from_config(&config.watchdog))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        *lock_state(&self.state)
    }

    /// Counters accumulated over every run.
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// The stall watchdog driven by this pipeline.
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Sinks parked while idle.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Register a sink. Only allowed while idle.
    pub fn add_sink<S: RecordSink + 'static>(&mut self, sink: S) -> AppResult<()> {
        self.add_boxed_sink(Box::new(sink))
    }

    /// Register an already boxed sink. Only allowed while idle.
    pub fn add_boxed_sink(&mut self, sink: Box<dyn RecordSink>) -> AppResult<()> {
        if self.run.is_some() {
            return Err(DaqError::AlreadyRunning);
        }
        debug!(sink = %sink.name(), "sink registered");
        self.sinks.push(sink);
        Ok(())
    }

    /// Connect `transport` and spawn the producer and consumer tasks.
    ///
    /// A connect failure is returned and the pipeline stays idle. After a
    /// transport failure the pipeline sits in `Stopping` until `stop()` is
    /// called.
    pub async fn start(
        &mut self,
        mut transport: Box<dyn Transport>,
        decoder: FrameDecoder,
        validator: RecordValidator,
    ) -> AppResult<()> {
        if self.run.is_some() {
            return Err(DaqError::AlreadyRunning);
        }

        transport.connect().await?;
        info!(transport = %transport.describe(), "acquisition starting");

        let queue = Arc::new(HandoffQueue::new(self.config.queue_capacity));
        let (stop_tx, stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);
        let (diag_tx, diag_rx) = mpsc::unbounded_channel();
        let fanout = SinkFanout::spawn(
            std::mem::take(&mut self.sinks),
            self.config.sink_capacity,
            self.config.sink_handoff_timeout,
        );

        *lock_state(&self.state) = PipelineState::Running;

        let stall_rx = self.watchdog.subscribe();
        self.watchdog.start();

        let producer = tokio::spawn(run_producer(Producer {
            transport,
            queue: Arc::clone(&queue),
            policy: self.config.backpressure_policy,
            backpressure_wait: self.config.backpressure_wait,
            counters: Arc::clone(&self.counters),
            state: Arc::clone(&self.state),
            stop_tx: Arc::clone(&stop_tx),
            stop_rx: stop_rx.clone(),
            diag_tx,
        }));

        let consumer = tokio::spawn(run_consumer(Consumer {
            queue: Arc::clone(&queue),
            decoder,
            validator,
            fanout,
            watchdog: self.watchdog.clone(),
            counters: Arc::clone(&self.counters),
            poll_interval: self.config.poll_interval,
            stop_rx,
            stall_rx,
            diag_rx,
        }));

        self.run = Some(RunHandles {
            stop_tx,
            queue,
            producer,
            consumer,
        });
        Ok(())
    }

    /// Signal both tasks, wait for them and for the sinks to drain, then
    /// return to `Idle`. Calling it while idle does nothing.
    pub async fn stop(&mut self) -> AppResult<()> {
        let Some(run) = self.run.take() else {
            return Ok(());
        };

        *lock_state(&self.state) = PipelineState::Stopping;
        run.stop_tx.send_replace(true);

        let mut failure = None;
        if let Err(e) = run.producer.await {
            error!(error = %e, "producer task failed");
            failure = Some(format!("producer: {e}"));
        }
        match run.consumer.await {
            Ok(fanout) => {
                let sinks = fanout.close(self.config.sink_shutdown_timeout).await;
                self.sinks.extend(sinks);
            }
            Err(e) => {
                error!(error = %e, "consumer task failed, sinks lost");
                failure = Some(format!("consumer: {e}"));
            }
        }
        self.watchdog.stop().await;

        // The producer may have pushed after the consumer drained.
        let leftover = run.queue.drain();
        bump(&self.counters.frames_discarded_on_stop, leftover as u64);

        *lock_state(&self.state) = PipelineState::Idle;
        let stats = self.stats();
        info!(
            frames_read = stats.frames_read,
            records_published = stats.records_published,
            decode_failures = stats.decode_failures,
            validation_failures = stats.validation_failures,
            frames_dropped = stats.frames_dropped,
            "acquisition stopped"
        );

        match failure {
            Some(msg) => Err(DaqError::TaskFailed(msg)),
            None => Ok(()),
        }
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            // Tasks exit on their own once signalled.
            run.stop_tx.send_replace(true);
        }
    }
}

struct Producer {
    transport: Box<dyn Transport>,
    queue: Arc<HandoffQueue>,
    policy: BackpressurePolicy,
    backpressure_wait: Duration,
    counters: Arc<PipelineCounters>,
    state: SharedState,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    diag_tx: mpsc::UnboundedSender<Diagnostic>,
}

/// Carry the transport's raw byte count over into the pipeline counters.
fn sync_bytes(p: &Producer, seen: &mut u64) {
    let now = p.transport.stats().bytes_read;
    bump(&p.counters.bytes_read, now.saturating_sub(*seen));
    *seen = now;
}

async fn run_producer(mut p: Producer) {
    let mut bytes_seen = p.transport.stats().bytes_read;
    loop {
        if *p.stop_rx.borrow() {
            break;
        }
        let outcome = tokio::select! {
            biased;
            _ = p.stop_rx.changed() => break,
            outcome = p.transport.read_frame() => outcome,
        };

        match outcome {
            Ok(ReadOutcome::Frame(frame)) => {
                bump(&p.counters.frames_read, 1);
                sync_bytes(&p, &mut bytes_seen);
                let pushed = tokio::select! {
                    biased;
                    _ = p.stop_rx.changed() => {
                        bump(&p.counters.frames_discarded_on_stop, 1);
                        break;
                    }
                    pushed = p.queue.push(frame, p.policy, p.backpressure_wait) => pushed,
                };
                if pushed == PushOutcome::EvictedOldest {
                    bump(&p.counters.frames_dropped, 1);
                    debug!(policy = ?p.policy, "hand-off queue full, oldest frame dropped");
                }
            }
            Ok(ReadOutcome::Timeout) => continue,
            Err(e) => {
                error!(error = %e, "transport read failed, stopping acquisition");
                let _ = p.diag_tx.send(Diagnostic::TransportFailed { error: e });
                *lock_state(&p.state) = PipelineState::Stopping;
                p.stop_tx.send_replace(true);
                break;
            }
        }
    }

    sync_bytes(&p, &mut bytes_seen);
    if let Err(e) = p.transport.close().await {
        warn!(error = %e, "failed to close transport");
    }
    debug!(stats = ?p.transport.stats(), "producer finished");
}

struct Consumer {
    queue: Arc<HandoffQueue>,
    decoder: FrameDecoder,
    validator: RecordValidator,
    fanout: SinkFanout,
    watchdog: Watchdog,
    counters: Arc<PipelineCounters>,
    poll_interval: Duration,
    stop_rx: watch::Receiver<bool>,
    stall_rx: broadcast::Receiver<StallEvent>,
    diag_rx: mpsc::UnboundedReceiver<Diagnostic>,
}

impl Consumer {
    async fn publish(&mut self, event: PipelineEvent) {
        let report = self.fanout.publish(event).await;
        bump(&self.counters.sink_drops, report.dropped as u64);
    }

    async fn diagnose(&mut self, diagnostic: Diagnostic) {
        self.publish(PipelineEvent::Diagnostic(diagnostic)).await;
    }

    async fn process(&mut self, raw: String) {
        let record = match self.decoder.decode(&raw) {
            Ok(record) => record,
            Err(error) => {
                bump(&self.counters.decode_failures, 1);
                warn!(error = %error, frame = %raw, "dropping undecodable frame");
                self.diagnose(Diagnostic::DecodeFailed { raw, error }).await;
                return;
            }
        };

        let record = Arc::new(record);
        if let Err(reason) = self.validator.validate(&record) {
            bump(&self.counters.validation_failures, 1);
            warn!(reason = %reason, cycle = record.cycle_count, "record failed validation");
            self.diagnose(Diagnostic::ValidationFailed { record, reason })
                .await;
            return;
        }

        self.publish(PipelineEvent::Record(Arc::clone(&record))).await;
        bump(&self.counters.records_published, 1);
        self.watchdog.reset();

        if record.has_error() {
            bump(&self.counters.instrument_errors, 1);
            let description = record.error_description().into_owned();
            warn!(
                cycle = record.cycle_count,
                error_code = record.error_code,
                description = %description,
                "instrument reported error"
            );
            self.diagnose(Diagnostic::InstrumentError {
                cycle_count: record.cycle_count,
                code: record.error_code,
                description,
            })
            .await;
        }
        if record.is_test_end() {
            info!(cycle = record.cycle_count, "test ended");
            self.diagnose(Diagnostic::TestEnded {
                cycle_count: record.cycle_count,
            })
            .await;
        }
    }

    async fn flush_diagnostics(&mut self) {
        while let Ok(diagnostic) = self.diag_rx.try_recv() {
            self.diagnose(diagnostic).await;
        }
    }
}

async fn run_consumer(mut c: Consumer) -> SinkFanout {
    let mut stalls_open = true;
    let mut diags_open = true;

    loop {
        if *c.stop_rx.borrow() {
            break;
        }
        tokio::select! {
            biased;
            _ = c.stop_rx.changed() => break,
            stall = c.stall_rx.recv(), if stalls_open => match stall {
                Ok(StallEvent { elapsed, .. }) => {
                    bump(&c.counters.stalls_reported, 1);
                    c.diagnose(Diagnostic::Stall { elapsed }).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "stall notifications lagged");
                }
                Err(broadcast::error::RecvError::Closed) => stalls_open = false,
            },
            diagnostic = c.diag_rx.recv(), if diags_open => match diagnostic {
                Some(diagnostic) => c.diagnose(diagnostic).await,
                None => diags_open = false,
            },
            frame = c.queue.pop(c.poll_interval) => {
                if let Some(frame) = frame {
                    c.process(frame).await;
                }
            }
        }
    }

    let discarded = c.queue.drain();
    if discarded > 0 {
        bump(&c.counters.frames_discarded_on_stop, discarded as u64);
        info!(discarded, "discarded queued frames at stop");
    }
    c.flush_diagnostics().await;
    c.fanout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::ChannelSink;
    use crate::transport::SyntheticTransport;

    const FRAME: &str = "DTA;31422;182;263;0;793;2238;0;611;0;!";

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(10),
            ..PipelineConfig::default()
        }
    }

    fn pipeline() -> IngestionPipeline {
        IngestionPipeline::new(
            fast_config(),
            Watchdog::new(Duration::from_secs(60), Duration::from_secs(60)),
        )
    }

    fn scripted(frames: &[&str]) -> Box<dyn Transport> {
        Box::new(
            SyntheticTransport::scripted(frames.iter().copied(), Duration::from_millis(1))
                .with_read_timeout(Duration::from_millis(20)),
        )
    }

    async fn wait_for_published(pipeline: &IngestionPipeline, n: u64) {
        for _ in 0..500 {
            if pipeline.stats().records_published >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {n} records");
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let mut pipeline = pipeline();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        pipeline.stop().await.unwrap();
        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut pipeline = pipeline();
        pipeline
            .start(scripted(&[]), FrameDecoder::new(), RecordValidator::new())
            .await
            .unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert!(matches!(
            pipeline
                .start(scripted(&[]), FrameDecoder::new(), RecordValidator::new())
                .await,
            Err(DaqError::AlreadyRunning)
        ));
        let (sink, _rx) = ChannelSink::new("late", 4);
        assert!(pipeline.add_sink(sink).is_err());
        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn instrument_error_emits_record_and_diagnostic() {
        let mut pipeline = pipeline();
        let (sink, mut rx) = ChannelSink::new("events", 32);
        pipeline.add_sink(sink).unwrap();

        pipeline
            .start(
                scripted(&["DTA;5;182;263;0;793;2238;0;611;107;!", "END;6;182;263;0;793;2238;0;611;0;!"]),
                FrameDecoder::new(),
                RecordValidator::new(),
            )
            .await
            .unwrap();
        wait_for_published(&pipeline, 2).await;
        pipeline.stop().await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(&events[0], PipelineEvent::Record(r) if r.cycle_count == 5));
        assert!(matches!(
            &events[1],
            PipelineEvent::Diagnostic(Diagnostic::InstrumentError { code: 107, description, .. })
                if description == "Motor Error: The Voice Coil drive is blocked"
        ));
        assert!(matches!(&events[2], PipelineEvent::Record(r) if r.is_test_end()));
        assert_eq!(
            events[3],
            PipelineEvent::Diagnostic(Diagnostic::TestEnded { cycle_count: 6 })
        );
        assert_eq!(pipeline.stats().instrument_errors, 1);
        assert_eq!(pipeline.sink_count(), 1);
    }

    #[tokio::test]
    async fn bad_frames_are_reported_and_skipped() {
        let mut pipeline = pipeline();
        let (sink, mut rx) = ChannelSink::new("events", 32);
        pipeline.add_sink(sink).unwrap();

        pipeline
            .start(
                scripted(&["garbage", "XYZ;1;182;263;0;793;2238;0;611;0;!", FRAME]),
                FrameDecoder::new(),
                RecordValidator::new(),
            )
            .await
            .unwrap();
        wait_for_published(&pipeline, 1).await;
        pipeline.stop().await.unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.frames_read, 3);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.validation_failures, 1);
        assert_eq!(stats.records_published, 1);

        assert!(matches!(
            rx.try_recv().unwrap(),
            PipelineEvent::Diagnostic(Diagnostic::DecodeFailed { .. })
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            PipelineEvent::Diagnostic(Diagnostic::ValidationFailed { .. })
        ));
        assert!(matches!(rx.try_recv().unwrap(), PipelineEvent::Record(_)));
    }

    #[test]
    fn diagnostics_render_for_operators() {
        assert_eq!(
            Diagnostic::TestEnded { cycle_count: 12 }.to_string(),
            "Test ended at cycle 12"
        );
        assert_eq!(
            Diagnostic::Stall {
                elapsed: Duration::from_millis(5200)
            }
            .to_string(),
            "No data received for 5.2 s"
        );
    }
}
