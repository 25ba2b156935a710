//! Stall detection, standalone and through the pipeline.

use fatigue_daq::config::{AcquisitionConfig, PipelineConfig};
use fatigue_daq::pipeline::{Diagnostic, IngestionPipeline, PipelineEvent};
use fatigue_daq::protocol::{FrameDecoder, RecordValidator};
use fatigue_daq::sinks::ChannelSink;
use fatigue_daq::transport::SyntheticTransport;
use fatigue_daq::watchdog::Watchdog;
use std::time::Duration;
use tokio::time::{timeout, Instant};

#[tokio::test(start_paused = true)]
async fn test_stall_repeats_until_reset() {
    let watchdog = Watchdog::new(Duration::from_secs(5), Duration::from_secs(1));
    let mut rx = watchdog.subscribe();
    watchdog.start();
    let t0 = Instant::now();

    let first = rx.recv().await.unwrap();
    assert_eq!(t0.elapsed(), Duration::from_secs(5));
    assert_eq!(first.elapsed, Duration::from_secs(5));

    let second = rx.recv().await.unwrap();
    assert_eq!(second.elapsed, Duration::from_secs(6));

    watchdog.reset();
    // quiet for the next four ticks
    assert!(timeout(Duration::from_millis(4500), rx.recv()).await.is_err());
    let again = rx.recv().await.unwrap();
    assert_eq!(again.elapsed, Duration::from_secs(5));

    watchdog.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_default_config_checks_at_threshold() {
    let watchdog = Watchdog::from_config(&AcquisitionConfig::default().watchdog);
    assert_eq!(watchdog.threshold(), Duration::from_secs(5));
    assert_eq!(watchdog.tick(), Duration::from_secs(5));

    let mut rx = watchdog.subscribe();
    watchdog.start();
    assert_eq!(rx.recv().await.unwrap().elapsed, Duration::from_secs(5));
    assert_eq!(rx.recv().await.unwrap().elapsed, Duration::from_secs(10));
    watchdog.stop().await;
}

#[tokio::test]
async fn test_pipeline_reports_stall_when_frames_stop() {
    let config = PipelineConfig {
        poll_interval: Duration::from_millis(10),
        ..PipelineConfig::default()
    };
    let mut pipeline = IngestionPipeline::new(
        config,
        Watchdog::new(Duration::from_millis(200), Duration::from_millis(50)),
    );
    let (sink, mut rx) = ChannelSink::new("events", 64);
    pipeline.add_sink(sink).unwrap();

    let frames = [
        "DTA;1;182;263;0;793;2238;0;611;0;!",
        "DTA;2;182;263;0;793;2238;0;611;0;!",
    ];
    let transport = SyntheticTransport::scripted(frames, Duration::from_millis(1))
        .with_read_timeout(Duration::from_millis(20));
    pipeline
        .start(Box::new(transport), FrameDecoder::new(), RecordValidator::new())
        .await
        .unwrap();

    let mut records = 0;
    let mut stalls = Vec::new();
    while stalls.len() < 3 {
        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(PipelineEvent::Record(_))) => records += 1,
            Ok(Some(PipelineEvent::Diagnostic(Diagnostic::Stall { elapsed }))) => {
                stalls.push(elapsed)
            }
            Ok(Some(other)) => panic!("unexpected event {other:?}"),
            Ok(None) | Err(_) => panic!("no stall reported"),
        }
    }
    pipeline.stop().await.unwrap();

    assert_eq!(records, 2);
    assert!(stalls.iter().all(|elapsed| *elapsed >= Duration::from_millis(200)));
    // level-triggered: each report sees a longer silence
    assert!(stalls.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(pipeline.stats().stalls_reported >= 3);
}
