//! CLI entry point for fatigue-daq
//!
//! Provides command-line interface for:
//! - Acquiring from the instrument (or the synthetic source) into a CSV log
//! - Generating sample frame files
//! - Checking frame files against the decoder and validator
//!
//! # Usage
//!
//! ```bash
//! fatigue-daq acquire --port /dev/ttyUSB0
//! fatigue-daq acquire --mock --duration-secs 30
//! fatigue-daq generate sample.txt --cycles 200 --errors
//! fatigue-daq check sample.txt
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fatigue_daq::config::{AcquisitionConfig, TransportKind};
use fatigue_daq::generator::{check_frames, generate_frames};
use fatigue_daq::pipeline::{Diagnostic, IngestionPipeline, PipelineEvent};
use fatigue_daq::protocol::{FrameDecoder, RecordValidator};
use fatigue_daq::sinks::{ChannelSink, CsvLogSink};
use fatigue_daq::tracing_setup::{self, OutputFormat, TracingConfig};
use fatigue_daq::transport;
use std::path::PathBuf;
use std::time::Duration;

/// Problems listed by `check` before truncating.
const MAX_LISTED_PROBLEMS: usize = 20;

#[derive(Parser)]
#[command(name = "fatigue-daq")]
#[command(about = "Data acquisition for the fatigue tester", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire frames and log them to CSV until Ctrl+C
    Acquire {
        /// Configuration file (defaults to config/acquisition.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the synthetic transport instead of the serial port
        #[arg(long)]
        mock: bool,

        /// Override the serial port
        #[arg(long)]
        port: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Do not print one line per record
        #[arg(long)]
        quiet: bool,
    },

    /// Write a synthetic test run to a frame file
    Generate {
        output: PathBuf,

        #[arg(long, default_value_t = 100)]
        cycles: u64,

        /// Inject an instrument error code every 20 cycles
        #[arg(long)]
        errors: bool,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Decode and validate every line of a frame file
    Check { input: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Acquire {
            config,
            mock,
            port,
            duration_secs,
            quiet,
        } => acquire(config, mock, port, duration_secs, quiet).await,
        Commands::Generate {
            output,
            cycles,
            errors,
            seed,
        } => generate(output, cycles, errors, seed),
        Commands::Check { input } => check(input),
    }
}

async fn acquire(
    config_path: Option<PathBuf>,
    mock: bool,
    port: Option<String>,
    duration_secs: Option<u64>,
    quiet: bool,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => AcquisitionConfig::load_from(path)?,
        None => AcquisitionConfig::load()?,
    };
    if mock {
        config.transport.kind = TransportKind::Synthetic;
    }
    if let Some(port) = port {
        config.transport.endpoint_id = port;
    }
    config.validate()?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let mut pipeline = IngestionPipeline::from_config(&config);
    pipeline.add_sink(CsvLogSink::new(config.logging.clone()))?;
    let (console, mut events) = ChannelSink::new("console", 256);
    pipeline.add_sink(console)?;

    let transport = transport::from_config(&config.transport);
    println!("🔌 {}", transport.describe());
    pipeline
        .start(transport, FrameDecoder::new(), RecordValidator::new())
        .await
        .context("failed to start acquisition")?;
    println!("📡 Acquiring - press Ctrl+C to stop");
    println!();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let timer = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timer);

    let mut transport_failed = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = &mut timer => break,
            event = events.recv() => match event {
                Some(event) => {
                    transport_failed |= matches!(
                        event,
                        PipelineEvent::Diagnostic(Diagnostic::TransportFailed { .. })
                    );
                    report(&event, quiet);
                    if transport_failed {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    println!();
    println!("⏹  Stopping...");
    // Keep printing what the sinks drain while stop() waits for them.
    let stopped = {
        let stop = pipeline.stop();
        tokio::pin!(stop);
        loop {
            tokio::select! {
                result = &mut stop => break result,
                Some(event) = events.recv() => report(&event, quiet),
            }
        }
    };
    stopped?;

    let stats = pipeline.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("📁 Logs in {}", config.logging.output_dir.display());

    if transport_failed {
        bail!("acquisition ended because the transport failed");
    }
    Ok(())
}

fn report(event: &PipelineEvent, quiet: bool) {
    match event {
        PipelineEvent::Record(record) => {
            if !quiet {
                println!(
                    "{} {:>8}  F_lower {:>7} N  F_upper {:>7} N  travel@upper {:>6} mm  LoS {:>6.2} %",
                    record.status,
                    record.cycle_count,
                    record.force_lower,
                    record.force_upper,
                    record.travel_at_upper,
                    record.loss_of_stiffness_percent()
                );
            }
        }
        PipelineEvent::Diagnostic(diagnostic @ Diagnostic::TestEnded { .. }) => {
            println!("✅ {diagnostic}");
        }
        PipelineEvent::Diagnostic(diagnostic) => eprintln!("⚠️  {diagnostic}"),
    }
}

fn generate(output: PathBuf, cycles: u64, errors: bool, seed: Option<u64>) -> Result<()> {
    if cycles == 0 {
        bail!("--cycles must be at least 1");
    }
    tracing_setup::init(TracingConfig::default().with_format(OutputFormat::Compact))
        .map_err(anyhow::Error::msg)?;

    let frames = generate_frames(cycles, errors, seed);
    let mut content = frames.join("\n");
    content.push('\n');
    std::fs::write(&output, content)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("📝 Wrote {} frames to {}", frames.len(), output.display());
    Ok(())
}

fn check(input: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let summary = check_frames(content.lines());

    println!("🔍 {}", input.display());
    println!("   frames:              {}", summary.total);
    println!("   valid:               {}", summary.valid);
    println!("   decode failures:     {}", summary.decode_failures);
    println!("   validation failures: {}", summary.validation_failures);
    println!("   success rate:        {:.1} %", summary.success_rate());

    for (line, message) in summary.problems.iter().take(MAX_LISTED_PROBLEMS) {
        println!("   line {line}: {message}");
    }
    if summary.problems.len() > MAX_LISTED_PROBLEMS {
        println!(
            "   ... {} more",
            summary.problems.len() - MAX_LISTED_PROBLEMS
        );
    }
    Ok(())
}
