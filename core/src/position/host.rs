use serde_json::Value;
use std::process::Command;
use std::time::Duration;

use super::{Fix, FixTracker, PositionConfig, PositionError, PositionSource};
use crate::process::{run_with_timeout, ProcessOutcome};
use crate::telemetry::LogManager;

const WINDOWS_LOCATION_SCRIPT: &str = r#"
Add-Type -AssemblyName System.Device
$watcher = New-Object System.Device.Location.GeoCoordinateWatcher
$watcher.Start()
$counter = 0
while (($watcher.Status -ne 'Ready') -and ($counter -lt 30)) {
    Start-Sleep -Milliseconds 100
    $counter += 0.1
}
if ($watcher.Status -eq 'Ready') {
    $coord = $watcher.Position.Location
    @{
        latitude = $coord.Latitude
        longitude = $coord.Longitude
        altitude = $coord.Altitude
    } | ConvertTo-Json
} else {
    Write-Error "Location not available"
}
$watcher.Stop()
"#;

fn default_helper() -> Option<Vec<String>> {
    if cfg!(windows) {
        Some(vec![
            "powershell".to_string(),
            "-NoProfile".to_string(),
            "-Command".to_string(),
            WINDOWS_LOCATION_SCRIPT.to_string(),
        ])
    } else {
        None
    }
}

/// Host OS location service queried through an out-of-process helper.
///
/// The helper prints a JSON object with `latitude`, `longitude` and
/// `altitude`. The service reports no satellite count, so fixes carry the
/// configured `assumed_satellites`.
pub struct HostLocationService {
    config: PositionConfig,
    command: Option<Vec<String>>,
    tracker: FixTracker,
    logger: LogManager,
}

impl HostLocationService {
    pub fn new(config: PositionConfig, logger: &LogManager) -> Self {
        let logger = logger.child("host");
        Self {
            tracker: FixTracker::new(config.min_satellites, logger.clone()),
            config,
            command: None,
            logger,
        }
    }
}

impl PositionSource for HostLocationService {
    fn backend(&self) -> &'static str {
        "host-location"
    }

    fn connect(&mut self) -> bool {
        if !self.config.enabled {
            self.logger.record("GPS is disabled in configuration");
            return false;
        }
        match self.config.helper_command.clone().or_else(default_helper) {
            Some(command) if !command.is_empty() => {
                self.logger
                    .record(&format!("using location helper '{}'", command[0]));
                if cfg!(windows) {
                    self.logger.record(
                        "location services must be enabled: Settings > Privacy & security > Location",
                    );
                }
                self.command = Some(command);
                true
            }
            _ => {
                self.logger
                    .error("no location helper configured for this platform");
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if self.command.take().is_some() {
            self.logger.record("host location service disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.command.is_some()
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
        let command = self.command.as_ref().ok_or(PositionError::NotConnected)?;
        let mut process = Command::new(&command[0]);
        process.args(&command[1..]);

        match run_with_timeout(&mut process, budget)? {
            ProcessOutcome::TimedOut { elapsed } => Err(PositionError::Timeout(elapsed)),
            ProcessOutcome::Completed(done) if !done.success => {
                let message = done.stderr.trim().to_string();
                if message.contains("Location not available") {
                    self.logger
                        .error("location services may be disabled or have no provider");
                }
                Err(PositionError::Helper(if message.is_empty() {
                    format!("exit status {:?}", done.code)
                } else {
                    message
                }))
            }
            ProcessOutcome::Completed(done) => {
                parse_location_payload(&done.stdout, self.config.assumed_satellites).map(Some)
            }
        }
    }
}

fn finite(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Converts the helper's JSON answer into a candidate fix.
pub fn parse_location_payload(text: &str, satellites: u8) -> Result<Fix, PositionError> {
    let payload: Value = serde_json::from_str(text.trim())
        .map_err(|err| PositionError::Payload(format!("not JSON: {}", err)))?;

    let latitude = finite(payload.get("latitude"));
    let longitude = finite(payload.get("longitude"));
    match (latitude, longitude) {
        (Some(lat), Some(lon)) if !(lat == 0.0 && lon == 0.0) => Ok(Fix::new(
            lat,
            lon,
            finite(payload.get("altitude")),
            satellites,
        )),
        _ => Err(PositionError::Payload(
            "missing, NaN or (0,0) coordinates".to_string(),
        )),
    }
}
