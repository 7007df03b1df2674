//! Position sources: one fix-acquisition contract over several backends.
//!
//! Every backend only knows how to pull a candidate [`Fix`] off its channel
//! ([`PositionSource::poll_candidate`]). The read loop, the validity rule and
//! the last-valid cache are shared through the trait's provided methods and
//! [`FixTracker`], so backends cannot drift on what "valid" means.

pub mod fix;
pub mod host;
pub mod mavlink;
pub mod nmea;
pub mod serial;
pub mod simulated;

#[cfg(feature = "autopilot")]
pub mod autopilot;

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

use crate::process::seconds;
use crate::telemetry::LogManager;

pub use fix::{Fix, FixTracker};
pub use host::HostLocationService;
pub use nmea::NmeaError;
pub use serial::{LineSource, SerialReceiver};
pub use simulated::SimulatedSource;

#[cfg(feature = "autopilot")]
pub use autopilot::{AutopilotLink, TelemetryLink};

/// Whether the autopilot telemetry backend was compiled in.
pub const AUTOPILOT_AVAILABLE: bool = cfg!(feature = "autopilot");

/// Pause after a non-transient channel error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Host location service on Windows, serial receiver elsewhere.
    #[default]
    Auto,
    Serial,
    Host,
    Autopilot,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    pub enabled: bool,
    pub backend: BackendKind,
    pub port: String,
    pub baud_rate: u32,
    /// Per-read timeout on the serial channel.
    pub read_timeout_s: f64,
    pub min_satellites: u8,
    /// Program plus arguments printing `{"latitude":..,"longitude":..,"altitude":..}`.
    pub helper_command: Option<Vec<String>>,
    /// Satellite count reported for backends that cannot provide one.
    pub assumed_satellites: u8,
    /// Serial device path or `udp:<bind address>`.
    pub telemetry_link: String,
    pub telemetry_baud: u32,
    pub heartbeat_timeout_s: f64,
    pub read_heading: bool,
    pub simulation: SimulationConfig,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Auto,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout_s: 1.0,
            min_satellites: 4,
            helper_command: None,
            assumed_satellites: 8,
            telemetry_link: "/dev/ttyACM0".to_string(),
            telemetry_baud: 57_600,
            heartbeat_timeout_s: 10.0,
            read_heading: false,
            simulation: SimulationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub altitude_m: f64,
    /// Grid spacing in degrees (0.0001 deg is roughly 11 m).
    pub step_deg: f64,
    /// Cells per side of the square survey pattern.
    pub grid_side: u32,
    pub satellites: u8,
    pub read_delay_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_latitude: 28.6139,
            start_longitude: 77.2090,
            altitude_m: 10.0,
            step_deg: 0.0001,
            grid_side: 10,
            satellites: 8,
            read_delay_ms: 100,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PositionError {
    #[error("not connected")]
    NotConnected,
    #[error("channel I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port failure: {0}")]
    Serial(#[from] serialport::Error),
    #[error("malformed sentence: {0}")]
    Sentence(#[from] NmeaError),
    #[error("malformed telemetry frame: {0}")]
    Frame(#[from] mavlink::FrameError),
    #[error("unusable location payload: {0}")]
    Payload(String),
    #[error("location helper failed: {0}")]
    Helper(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

impl PositionError {
    /// Message-level failures that the read loop skips without complaint.
    pub fn is_transient(&self) -> bool {
        match self {
            PositionError::Sentence(_) | PositionError::Frame(_) | PositionError::Payload(_) => true,
            _ => false,
        }
    }
}

/// Fix-acquisition contract shared by all backends.
pub trait PositionSource {
    fn backend(&self) -> &'static str;

    /// Opens the backend channel. Failures are logged and reported as `false`.
    fn connect(&mut self) -> bool;

    /// Releases the channel; safe to call repeatedly or before `connect`.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn tracker(&self) -> &FixTracker;

    fn tracker_mut(&mut self) -> &mut FixTracker;

    fn logger(&self) -> &LogManager;

    /// One attempt to pull a position-bearing message within `budget`.
    /// `Ok(None)` means nothing position-bearing arrived.
    fn poll_candidate(&mut self, budget: Duration) -> Result<Option<Fix>, PositionError>;

    fn last_position(&self) -> Option<Fix> {
        self.tracker().last_valid().cloned()
    }

    /// Polls until a candidate passes the validity rule or `timeout` elapses.
    /// Only fixes obtained during this call are returned.
    fn acquire(&mut self, timeout: Duration) -> Option<Fix> {
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return None;
            }
            let remaining = timeout - elapsed;
            match self.poll_candidate(remaining) {
                Ok(Some(candidate)) => {
                    if let Some(fix) = self.tracker_mut().offer(candidate) {
                        return Some(fix);
                    }
                }
                Ok(None) => {}
                Err(err) if err.is_transient() => {
                    self.logger().debug(&format!("skipping message: {}", err));
                }
                Err(err) => {
                    self.logger().warn(&format!(
                        "{} read failed after {:.1}s: {}",
                        self.backend(),
                        elapsed.as_secs_f64(),
                        err
                    ));
                    thread::sleep(ERROR_BACKOFF.min(remaining));
                }
            }
        }
    }

    /// Fresh valid fix, or the cached last valid fix when none arrives in time.
    fn read_position(&mut self, timeout: Duration) -> Option<Fix> {
        if !self.is_connected() {
            self.logger()
                .warn(&format!("{} not connected; using last known position", self.backend()));
            return self.last_position();
        }
        match self.acquire(timeout) {
            Some(fix) => Some(fix),
            None => {
                self.logger().warn(&format!(
                    "{} timeout after {:.1}s; using last known position",
                    self.backend(),
                    timeout.as_secs_f64()
                ));
                self.last_position()
            }
        }
    }

    /// Initial acquisition: a fix obtained within `timeout` or nothing.
    /// A stale cached fix is never returned here.
    fn wait_for_fix(&mut self, timeout: Duration) -> Option<Fix> {
        if !self.is_connected() {
            self.logger()
                .warn(&format!("{} not connected; cannot wait for a fix", self.backend()));
            return None;
        }
        self.logger().record(&format!(
            "waiting for {} fix (timeout {:.0}s)",
            self.backend(),
            timeout.as_secs_f64()
        ));
        let fix = self.acquire(timeout);
        match &fix {
            Some(fix) => self.logger().record(&format!("fix acquired: {}", fix)),
            None => self
                .logger()
                .warn(&format!("failed to acquire {} fix", self.backend())),
        }
        fix
    }
}

fn platform_default() -> BackendKind {
    if cfg!(windows) {
        BackendKind::Host
    } else {
        BackendKind::Serial
    }
}

/// Maps the requested backend onto one that exists in this build.
pub fn resolve_backend(requested: BackendKind, logger: &LogManager) -> BackendKind {
    match requested {
        BackendKind::Auto => platform_default(),
        BackendKind::Autopilot if !AUTOPILOT_AVAILABLE => {
            let fallback = platform_default();
            logger.warn(&format!(
                "autopilot backend not available in this build; falling back to {:?}",
                fallback
            ));
            fallback
        }
        other => other,
    }
}

/// Builds the configured backend; `logger` is the position root handle.
pub fn open_position_source(config: &PositionConfig, logger: &LogManager) -> Box<dyn PositionSource> {
    let kind = resolve_backend(config.backend, logger);
    logger.record(&format!("position backend: {:?}", kind));
    match kind {
        BackendKind::Host => Box::new(HostLocationService::new(config.clone(), logger)),
        BackendKind::Simulated => Box::new(SimulatedSource::new(config, logger)),
        #[cfg(feature = "autopilot")]
        BackendKind::Autopilot => Box::new(AutopilotLink::new(config.clone(), logger)),
        _ => Box::new(SerialReceiver::new(config.clone(), logger)),
    }
}

pub(crate) fn read_timeout(config: &PositionConfig) -> Duration {
    seconds(config.read_timeout_s).max(Duration::from_millis(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_resolves_to_platform_backend() {
        let logger = LogManager::new("test");
        let resolved = resolve_backend(BackendKind::Auto, &logger);
        if cfg!(windows) {
            assert_eq!(resolved, BackendKind::Host);
        } else {
            assert_eq!(resolved, BackendKind::Serial);
        }
        assert_eq!(
            resolve_backend(BackendKind::Simulated, &logger),
            BackendKind::Simulated
        );
    }

    #[test]
    fn autopilot_request_respects_capability_flag() {
        let logger = LogManager::new("test");
        let resolved = resolve_backend(BackendKind::Autopilot, &logger);
        if AUTOPILOT_AVAILABLE {
            assert_eq!(resolved, BackendKind::Autopilot);
        } else {
            assert_ne!(resolved, BackendKind::Autopilot);
        }
    }

    #[test]
    fn factory_builds_requested_backend() {
        let logger = LogManager::new("position");
        let config = PositionConfig {
            backend: BackendKind::Simulated,
            ..Default::default()
        };
        let source = open_position_source(&config, &logger);
        assert_eq!(source.backend(), "simulated");
        assert!(!source.is_connected());
        assert!(source.last_position().is_none());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: PositionConfig =
            serde_json::from_str(r#"{"backend": "host", "min_satellites": 6}"#).unwrap();
        assert_eq!(config.backend, BackendKind::Host);
        assert_eq!(config.min_satellites, 6);
        assert_eq!(config.baud_rate, 9600);
        assert!(config.enabled);
    }

    #[test]
    fn transient_errors_are_message_level() {
        assert!(PositionError::Payload("nan".into()).is_transient());
        assert!(PositionError::Sentence(NmeaError::MissingStart).is_transient());
        assert!(!PositionError::NotConnected.is_transient());
        assert!(!PositionError::Timeout(Duration::from_secs(1)).is_transient());
    }
}
