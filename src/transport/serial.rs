//! Physical serial port transport.
//!
//! Wraps the `serialport` crate. Port I/O is synchronous, so both opening
//! and reading run on Tokio's blocking pool. The port and its partial-line
//! buffer live together behind one mutex; a read future dropped mid-flight
//! leaves the buffer consistent for the next call.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "instrument_serial")]
use std::time::Instant;

use super::{ReadOutcome, Transport, TransportCounters, TransportError, TransportStats};
use crate::config::TransportConfig;

/// Longest line accepted before the buffer is discarded.
pub const MAX_LINE_BYTES: usize = 4096;

/// Port-level timeout for a single `read` syscall; the frame-level timeout
/// is enforced on top of it.
#[cfg(feature = "instrument_serial")]
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub endpoint_id: String,
    /// Line speed.
    pub baud_rate: u32,
    /// Data bits, 5 to 8.
    pub byte_size: u8,
    /// "N", "E" or "O"
    pub parity: String,
    /// 1 or 2.
    pub stop_bits: u8,
    /// Upper bound for one `read_frame`.
    pub read_timeout: Duration,
}

impl From<&TransportConfig> for SerialSettings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            endpoint_id: config.endpoint_id.clone(),
            baud_rate: config.baud_rate,
            byte_size: config.byte_size,
            parity: config.parity.clone(),
            stop_bits: config.stop_bits,
            read_timeout: config.read_timeout,
        }
    }
}

/// Port plus bytes received after the last complete line.
struct PortState {
    #[cfg(feature = "instrument_serial")]
    port: Box<dyn serialport::SerialPort>,
    pending: Vec<u8>,
}

/// Newline-delimited frames from a serial port.
pub struct SerialTransport {
    settings: SerialSettings,
    state: Option<Arc<Mutex<PortState>>>,
    counters: Arc<TransportCounters>,
}

impl SerialTransport {
    /// Unconnected transport; call `connect` to open the port.
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            state: None,
            counters: Arc::new(TransportCounters::default()),
        }
    }

    /// Configured line settings.
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Whether the port is open.
    pub fn is_connected(&self) -> bool {
        self.state.is_some()
    }
}

/// Pop the first complete, non-empty line out of `pending`.
fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line).trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

#[cfg(feature = "instrument_serial")]
fn line_settings(
    settings: &SerialSettings,
) -> Result<(serialport::DataBits, serialport::Parity, serialport::StopBits), String> {
    use serialport::{DataBits, Parity, StopBits};

    let data_bits = match settings.byte_size {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        other => return Err(format!("byte size {other}")),
    };
    let parity = match settings.parity.to_uppercase().as_str() {
        "N" => Parity::None,
        "E" => Parity::Even,
        "O" => Parity::Odd,
        other => return Err(format!("parity {other}")),
    };
    let stop_bits = match settings.stop_bits {
        1 => StopBits::One,
        2 => StopBits::Two,
        other => return Err(format!("stop bits {other}")),
    };
    Ok((data_bits, parity, stop_bits))
}

#[cfg(feature = "instrument_serial")]
fn read_line_blocking(
    state: &Mutex<PortState>,
    counters: &TransportCounters,
    timeout: Duration,
) -> Result<ReadOutcome, TransportError> {
    use std::io::{ErrorKind, Read};

    let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let state = &mut *guard;
    let deadline = Instant::now() + timeout;
    let mut buffer = [0u8; 256];

    loop {
        if let Some(line) = take_line(&mut state.pending) {
            counters.add_frame();
            return Ok(ReadOutcome::Frame(line));
        }
        if Instant::now() >= deadline {
            return Ok(ReadOutcome::Timeout);
        }

        match state.port.read(&mut buffer) {
            Ok(0) => return Err(TransportError::ReadFailed("unexpected EOF from serial port".into())),
            Ok(n) => {
                counters.add_bytes(n);
                state.pending.extend_from_slice(&buffer[..n]);
                if state.pending.len() > MAX_LINE_BYTES && !state.pending.contains(&b'\n') {
                    warn!(
                        discarded = state.pending.len(),
                        "no line terminator within {MAX_LINE_BYTES} bytes, discarding buffer"
                    );
                    state.pending.clear();
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::ReadFailed(e.to_string())),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.state.is_some() {
                return Ok(());
            }
            let (data_bits, parity, stop_bits) =
                line_settings(&self.settings).map_err(|e| TransportError::OpenFailed {
                    endpoint: self.settings.endpoint_id.clone(),
                    reason: format!("invalid line settings: {e}"),
                })?;
            let endpoint = self.settings.endpoint_id.clone();
            let baud_rate = self.settings.baud_rate;
            let poll = PORT_POLL_TIMEOUT.min(self.settings.read_timeout);

            let port = tokio::task::spawn_blocking(move || {
                serialport::new(&endpoint, baud_rate)
                    .data_bits(data_bits)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .flow_control(serialport::FlowControl::None)
                    .timeout(poll)
                    .open()
            })
            .await
            .map_err(|e| TransportError::OpenFailed {
                endpoint: self.settings.endpoint_id.clone(),
                reason: format!("open task failed: {e}"),
            })?
            .map_err(|e| TransportError::OpenFailed {
                endpoint: self.settings.endpoint_id.clone(),
                reason: e.to_string(),
            })?;

            self.state = Some(Arc::new(Mutex::new(PortState {
                port,
                pending: Vec::with_capacity(256),
            })));
            self.counters.set_connected(true);
            info!(
                port = %self.settings.endpoint_id,
                baud = self.settings.baud_rate,
                "serial port opened"
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(TransportError::SerialFeatureDisabled)
        }
    }

    async fn read_frame(&mut self) -> Result<ReadOutcome, TransportError> {
        let state = self.state.clone().ok_or(TransportError::NotConnected)?;

        #[cfg(feature = "instrument_serial")]
        {
            let counters = Arc::clone(&self.counters);
            let timeout = self.settings.read_timeout;
            let outcome = tokio::task::spawn_blocking(move || {
                read_line_blocking(&state, &counters, timeout)
            })
            .await
            .map_err(|e| TransportError::ReadFailed(format!("serial read task failed: {e}")))??;
            if let ReadOutcome::Frame(line) = &outcome {
                debug!(frame = %line, "serial frame received");
            }
            Ok(outcome)
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = state;
            Err(TransportError::SerialFeatureDisabled)
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.state.take().is_some() {
            self.counters.set_connected(false);
            info!(port = %self.settings.endpoint_id, "serial port closed");
        }
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }

    fn describe(&self) -> String {
        format!(
            "serial({} @ {} baud, {}{}{})",
            self.settings.endpoint_id,
            self.settings.baud_rate,
            self.settings.byte_size,
            self.settings.parity,
            self.settings.stop_bits
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SerialSettings {
        SerialSettings::from(&TransportConfig::default())
    }

    #[test]
    fn describe_includes_framing() {
        let transport = SerialTransport::new(settings());
        assert_eq!(transport.describe(), "serial(COM3 @ 115200 baud, 8N1)");
        assert!(!transport.is_connected());
    }

    #[test]
    fn take_line_splits_and_skips_blank_lines() {
        let mut pending = b"\r\n\nDTA;1;2;3;4;5;6;7;8;0;!\r\nEND;".to_vec();
        assert_eq!(
            take_line(&mut pending).as_deref(),
            Some("DTA;1;2;3;4;5;6;7;8;0;!")
        );
        assert_eq!(take_line(&mut pending), None);
        assert_eq!(pending, b"END;");
    }

    #[test]
    fn take_line_tolerates_invalid_utf8() {
        let mut pending = vec![0xff, b'D', b'T', b'A', b'\n'];
        let line = take_line(&mut pending).unwrap();
        assert!(line.ends_with("DTA"));
    }

    #[tokio::test]
    async fn read_before_connect_fails() {
        let mut transport = SerialTransport::new(settings());
        assert_eq!(
            transport.read_frame().await,
            Err(TransportError::NotConnected)
        );
        assert!(transport.close().await.is_ok());
        assert!(!transport.stats().connected);
    }

    #[cfg(feature = "instrument_serial")]
    #[tokio::test]
    async fn connect_to_missing_port_reports_open_failure() {
        let mut config = TransportConfig::default();
        config.endpoint_id = "/dev/does-not-exist-fatigue-daq".into();
        let mut transport = SerialTransport::new(SerialSettings::from(&config));
        match transport.connect().await {
            Err(TransportError::OpenFailed { endpoint, .. }) => {
                assert_eq!(endpoint, "/dev/does-not-exist-fatigue-daq")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!transport.is_connected());
    }

    #[cfg(feature = "instrument_serial")]
    #[tokio::test]
    async fn bad_line_settings_fail_to_open() {
        let mut s = settings();
        s.parity = "M".into();
        let mut transport = SerialTransport::new(s);
        match transport.connect().await {
            Err(TransportError::OpenFailed { endpoint, reason }) => {
                assert_eq!(endpoint, "COM3");
                assert!(reason.contains("parity M"), "{reason}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!transport.is_connected());

        let mut s = settings();
        s.stop_bits = 3;
        assert_eq!(line_settings(&s).unwrap_err(), "stop bits 3");
    }
}
