use serialport::SerialPort;
use std::io::{self, BufRead, BufReader};
use std::time::Duration;

use super::nmea;
use super::{read_timeout, Fix, FixTracker, PositionConfig, PositionError, PositionSource};
use crate::telemetry::LogManager;

/// Line-oriented channel carrying NMEA sentences.
pub trait LineSource {
    /// Next complete line within `timeout`; `Ok(None)` when nothing arrived.
    fn next_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;
}

struct SerialLines {
    reader: BufReader<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialLines {
    fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            reader: BufReader::new(port),
            pending: Vec::with_capacity(128),
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        line
    }
}

impl LineSource for SerialLines {
    fn next_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        self.reader
            .get_mut()
            .set_timeout(timeout.max(Duration::from_millis(1)))?;
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) if self.pending.is_empty() => Ok(None),
            Ok(_) => Ok(Some(self.take_line())),
            // Partial bytes stay in `pending` until the rest of the line arrives.
            Err(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Directly attached receiver streaming NMEA sentences over a serial port.
pub struct SerialReceiver {
    config: PositionConfig,
    channel: Option<Box<dyn LineSource>>,
    tracker: FixTracker,
    logger: LogManager,
}

impl SerialReceiver {
    pub fn new(config: PositionConfig, logger: &LogManager) -> Self {
        let logger = logger.child("serial");
        Self {
            tracker: FixTracker::new(config.min_satellites, logger.clone()),
            config,
            channel: None,
            logger,
        }
    }

    /// Receiver reading from an already open channel instead of the configured port.
    pub fn with_channel(
        config: PositionConfig,
        logger: &LogManager,
        channel: Box<dyn LineSource>,
    ) -> Self {
        let mut receiver = Self::new(config, logger);
        receiver.channel = Some(channel);
        receiver
    }
}

impl PositionSource for SerialReceiver {
    fn backend(&self) -> &'static str {
        "serial"
    }

    fn connect(&mut self) -> bool {
        if !self.config.enabled {
            self.logger.record("GPS is disabled in configuration");
            return false;
        }
        if self.channel.is_some() {
            return true;
        }

        match serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(read_timeout(&self.config))
            .open()
        {
            Ok(port) => {
                self.channel = Some(Box::new(SerialLines::new(port)));
                self.logger.record(&format!(
                    "GPS connected on {} at {} baud",
                    self.config.port, self.config.baud_rate
                ));
                true
            }
            Err(err) => {
                self.logger.error(&format!(
                    "failed to connect to GPS on {}: {}",
                    self.config.port, err
                ));
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if self.channel.take().is_some() {
            self.logger.record("GPS disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn tracker(&self) -> &FixTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut FixTracker {
        &mut self.tracker
    }

    fn logger(&self) -> &LogManager {
        &self.logger
    }

    fn poll_candidate(&mut self, budget: Duration) -> Result<Option<Fix>, PositionError> {
        let wait = budget.min(read_timeout(&self.config));
        let channel = self.channel.as_mut().ok_or(PositionError::NotConnected)?;
        let line = match channel.next_line(wait)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if !line.starts_with('$') {
            return Ok(None);
        }

        let gga = match nmea::parse_sentence(&line)? {
            Some(gga) => gga,
            None => return Ok(None),
        };
        match (gga.latitude, gga.longitude) {
            (Some(latitude), Some(longitude)) => Ok(Some(Fix::new(
                latitude,
                longitude,
                gga.altitude_m,
                gga.satellites,
            ))),
            _ => Ok(None),
        }
    }
}
