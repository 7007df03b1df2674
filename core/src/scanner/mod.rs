//! Spectrum scanning over configured bands through an external instrument.
//!
//! The instrument is treated as a flaky black box: a missing tool or device
//! fails [`SpectrumScanner::initialize`], while every per-sweep failure
//! degrades to the no-signal sentinel so the acquisition loop keeps going.

pub mod instrument;
pub mod sweep_csv;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::math::StatsHelper;
use crate::process::seconds;
use crate::telemetry::LogManager;

pub use instrument::{Diagnosis, Instrument, RtlPower, SweepRequest};
pub use sweep_csv::{parse_sweep_output, SweepParseError};

/// Reserved power reading for "no signal" or an unusable sample.
pub const NO_SIGNAL_DBM: f64 = -999.0;

/// Configured frequencies below this are taken to be MHz.
const MHZ_THRESHOLD: f64 = 1e6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub tool_path: Option<String>,
    pub device_index: u32,
    pub gain: f64,
    pub bin_size: String,
    pub integration_time_s: f64,
    /// Added to the integration time to bound each sweep invocation.
    pub timeout_margin_s: f64,
    pub diagnostic_timeout_s: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            tool_path: None,
            device_index: 0,
            gain: 40.0,
            bin_size: "1k".to_string(),
            integration_time_s: 1.0,
            timeout_margin_s: 10.0,
            diagnostic_timeout_s: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BandConfig {
    pub enabled: bool,
    #[serde(alias = "downlink_start_mhz")]
    pub downlink_start: f64,
    #[serde(alias = "downlink_end_mhz")]
    pub downlink_end: f64,
    pub integration_time_s: Option<f64>,
}

impl BandConfig {
    pub fn range_hz(&self) -> (f64, f64) {
        (normalize_to_hz(self.downlink_start), normalize_to_hz(self.downlink_end))
    }
}

/// Accepts a frequency in Hz or MHz and returns Hz.
pub fn normalize_to_hz(value: f64) -> f64 {
    if value < MHZ_THRESHOLD {
        value * 1e6
    } else {
        value
    }
}

/// One sweep: bin frequencies and their power readings, index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sweep {
    pub frequencies_hz: Vec<f64>,
    pub powers_dbm: Vec<f64>,
}

impl Sweep {
    pub fn len(&self) -> usize {
        self.powers_dbm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.powers_dbm.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandScanResult {
    pub average_power_dbm: f64,
    pub max_power_dbm: f64,
    pub peak_frequency_mhz: f64,
    pub sample_count: usize,
    /// `(frequency Hz, power dBm)` in sweep order.
    pub samples: Vec<(f64, f64)>,
}

impl BandScanResult {
    /// Stand-in for a band whose sweep failed.
    pub fn no_signal() -> Self {
        Self {
            average_power_dbm: NO_SIGNAL_DBM,
            max_power_dbm: NO_SIGNAL_DBM,
            peak_frequency_mhz: 0.0,
            sample_count: 0,
            samples: Vec::new(),
        }
    }

    /// Statistics over every reading, sentinels included.
    pub fn from_sweep(sweep: &Sweep) -> Self {
        let (average, peak) = match (
            StatsHelper::mean(&sweep.powers_dbm),
            StatsHelper::argmax(&sweep.powers_dbm),
        ) {
            (Some(average), Some(peak)) => (average, peak),
            _ => return Self::no_signal(),
        };
        let (peak_index, max_power) = peak;
        Self {
            average_power_dbm: average,
            max_power_dbm: max_power,
            peak_frequency_mhz: sweep.frequencies_hz.get(peak_index).copied().unwrap_or(0.0) / 1e6,
            sample_count: sweep.len(),
            samples: sweep
                .frequencies_hz
                .iter()
                .copied()
                .zip(sweep.powers_dbm.iter().copied())
                .collect(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.sample_count == 0
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("scanner not initialized")]
    NotInitialized,
    #[error("sweep tool not found; install the rtl-sdr tools or set scanner.tool_path")]
    ToolNotFound,
    #[error("invalid frequency range {start_hz} Hz .. {end_hz} Hz")]
    InvalidRange { start_hz: f64, end_hz: f64 },
    #[error("instrument I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("sweep still running after {0:?}")]
    Timeout(Duration),
    #[error("sweep tool exited with {code:?}: {stderr}")]
    ToolFailed { code: Option<i32>, stderr: String },
    #[error("sweep tool produced no output")]
    EmptyOutput,
    #[error("unreadable sweep output: {0}")]
    Parse(#[from] SweepParseError),
}

/// Drives an [`Instrument`] over frequency ranges and bands.
pub struct SpectrumScanner<I: Instrument = RtlPower> {
    config: ScannerConfig,
    instrument: I,
    initialized: bool,
    logger: LogManager,
}

impl SpectrumScanner<RtlPower> {
    pub fn new(config: ScannerConfig, logger: &LogManager) -> Self {
        let instrument = RtlPower::new(config.tool_path.as_ref().map(PathBuf::from), logger);
        Self::with_instrument(config, instrument, logger)
    }
}

impl<I: Instrument> SpectrumScanner<I> {
    pub fn with_instrument(config: ScannerConfig, instrument: I, logger: &LogManager) -> Self {
        Self {
            config,
            instrument,
            initialized: false,
            logger: logger.clone(),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Locates the instrument and checks a device answers the diagnostic.
    pub fn initialize(&mut self) -> bool {
        let tool = match self.instrument.locate() {
            Ok(tool) => tool,
            Err(err) => {
                self.logger.error(&format!("{}: {}", self.instrument.name(), err));
                return false;
            }
        };
        self.logger
            .record(&format!("found {} at {}", self.instrument.name(), tool.display()));

        let timeout = seconds(self.config.diagnostic_timeout_s);
        match self.instrument.diagnose(timeout) {
            Ok(Diagnosis::DevicePresent) => {
                self.logger.record("measurement device detected");
                self.initialized = true;
            }
            Ok(Diagnosis::TimedOut) => {
                self.logger.record(&format!(
                    "device probe still running after {:.1}s; assuming the device is busy",
                    timeout.as_secs_f64()
                ));
                self.initialized = true;
            }
            Ok(Diagnosis::Absent(detail)) => {
                self.logger
                    .error(&format!("no measurement device found ({})", detail));
            }
            Err(err) => {
                self.logger.error(&format!("device probe failed: {}", err));
            }
        }
        self.initialized
    }

    /// One sweep over `[start_hz, end_hz]`, bounded by `integration` plus the
    /// configured margin.
    pub fn scan_range(
        &mut self,
        start_hz: f64,
        end_hz: f64,
        integration: Duration,
    ) -> Result<Sweep, ScanError> {
        if !self.initialized {
            return Err(ScanError::NotInitialized);
        }
        if !(start_hz.is_finite() && end_hz.is_finite() && start_hz > 0.0 && start_hz < end_hz) {
            return Err(ScanError::InvalidRange { start_hz, end_hz });
        }
        let request = SweepRequest {
            start_hz,
            end_hz,
            integration,
            device_index: self.config.device_index,
            gain_db: self.config.gain,
            bin_size: self.config.bin_size.clone(),
        };
        let budget = integration + seconds(self.config.timeout_margin_s);
        let text = self.instrument.sweep(&request, budget)?;
        let sweep = parse_sweep_output(&text)?;
        self.logger.debug(&format!(
            "swept {} bins from {:.2} to {:.2} MHz",
            sweep.len(),
            start_hz / 1e6,
            end_hz / 1e6
        ));
        Ok(sweep)
    }

    /// Scans every enabled band; failed bands map to [`BandScanResult::no_signal`].
    pub fn scan_bands(&mut self, bands: &BTreeMap<String, BandConfig>) -> BTreeMap<String, BandScanResult> {
        let mut results = BTreeMap::new();
        for (name, band) in bands {
            if !band.enabled {
                self.logger.debug(&format!("skipping disabled band {}", name));
                continue;
            }
            self.logger.record(&format!("scanning {}", name));
            let (start_hz, end_hz) = band.range_hz();
            let integration =
                seconds(band.integration_time_s.unwrap_or(self.config.integration_time_s));

            let result = match self.scan_range(start_hz, end_hz, integration) {
                Ok(sweep) if !sweep.is_empty() => {
                    let result = BandScanResult::from_sweep(&sweep);
                    self.logger.record(&format!(
                        "{}: avg={:.2} dBm, max={:.2} dBm at {:.2} MHz",
                        name, result.average_power_dbm, result.max_power_dbm, result.peak_frequency_mhz
                    ));
                    result
                }
                Ok(_) => {
                    self.logger.warn(&format!("failed to scan {}: empty sweep", name));
                    BandScanResult::no_signal()
                }
                Err(err) => {
                    self.logger.warn(&format!("failed to scan {}: {}", name, err));
                    BandScanResult::no_signal()
                }
            };
            results.insert(name.clone(), result);
        }
        results
    }

    pub fn close(&mut self) {
        if self.initialized {
            self.logger.record("scanner closed");
        }
        self.initialized = false;
    }
}
