use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::ScanError;
use crate::process::{run_with_timeout, ProcessOutcome};
use crate::telemetry::LogManager;

/// Parameters for one sweep of the instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRequest {
    pub start_hz: f64,
    pub end_hz: f64,
    pub integration: Duration,
    pub device_index: u32,
    pub gain_db: f64,
    /// Tool bin-size token, e.g. `1k`.
    pub bin_size: String,
}

/// Result of probing for an attached measurement device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnosis {
    DevicePresent,
    /// The probe kept running past its budget. Taken to mean the device is
    /// busy rather than missing.
    TimedOut,
    Absent(String),
}

impl Diagnosis {
    pub fn device_usable(&self) -> bool {
        !matches!(self, Diagnosis::Absent(_))
    }
}

/// External sweep instrument driven by the scanner.
pub trait Instrument {
    fn name(&self) -> &str;

    /// Finds the instrument's executable (or equivalent).
    fn locate(&mut self) -> Result<PathBuf, ScanError>;

    fn diagnose(&mut self, timeout: Duration) -> Result<Diagnosis, ScanError>;

    /// Runs one sweep and returns the raw CSV text it produced.
    fn sweep(&mut self, request: &SweepRequest, budget: Duration) -> Result<String, ScanError>;
}

impl<T: Instrument + ?Sized> Instrument for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn locate(&mut self) -> Result<PathBuf, ScanError> {
        (**self).locate()
    }

    fn diagnose(&mut self, timeout: Duration) -> Result<Diagnosis, ScanError> {
        (**self).diagnose(timeout)
    }

    fn sweep(&mut self, request: &SweepRequest, budget: Duration) -> Result<String, ScanError> {
        (**self).sweep(request, budget)
    }
}

const SWEEP_TOOL: &str = "rtl_power";
const PROBE_TOOL: &str = "rtl_test";

fn executable_name(stem: &str) -> String {
    format!("{}{}", stem, env::consts::EXE_SUFFIX)
}

fn standard_locations() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![PathBuf::from(r"C:\Program Files\rtl-sdr").join(executable_name(SWEEP_TOOL))]
    } else {
        ["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"]
            .iter()
            .map(|dir| Path::new(dir).join(SWEEP_TOOL))
            .collect()
    }
}

fn search_path(name: &str, path_var: Option<OsString>) -> Option<PathBuf> {
    env::split_paths(&path_var?)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// `rtl_power` sweep tool with its `rtl_test` companion for diagnostics.
pub struct RtlPower {
    configured: Option<PathBuf>,
    executable: Option<PathBuf>,
    logger: LogManager,
}

impl RtlPower {
    pub fn new(configured: Option<PathBuf>, logger: &LogManager) -> Self {
        Self {
            configured,
            executable: None,
            logger: logger.child("rtl_power"),
        }
    }

    fn probe_path(&self) -> Result<PathBuf, ScanError> {
        let sweep_tool = self.executable.as_ref().ok_or(ScanError::NotInitialized)?;
        Ok(sweep_tool.with_file_name(executable_name(PROBE_TOOL)))
    }
}

/// Builds the tool's argument list for one single-shot sweep into `output`.
pub fn sweep_arguments(request: &SweepRequest, output: &Path) -> Vec<OsString> {
    let integration_s = request.integration.as_secs().max(1);
    vec![
        "-f".into(),
        format!(
            "{}M:{}M:{}",
            request.start_hz / 1e6,
            request.end_hz / 1e6,
            request.bin_size
        )
        .into(),
        "-i".into(),
        integration_s.to_string().into(),
        "-1".into(),
        "-d".into(),
        request.device_index.to_string().into(),
        "-g".into(),
        request.gain_db.to_string().into(),
        output.as_os_str().to_owned(),
    ]
}

impl Instrument for RtlPower {
    fn name(&self) -> &str {
        SWEEP_TOOL
    }

    fn locate(&mut self) -> Result<PathBuf, ScanError> {
        let found = self
            .configured
            .iter()
            .cloned()
            .chain(standard_locations())
            .find(|candidate| candidate.is_file())
            .or_else(|| search_path(&executable_name(SWEEP_TOOL), env::var_os("PATH")))
            .ok_or(ScanError::ToolNotFound)?;
        self.executable = Some(found.clone());
        Ok(found)
    }

    fn diagnose(&mut self, timeout: Duration) -> Result<Diagnosis, ScanError> {
        let probe = self.probe_path()?;
        self.logger
            .debug(&format!("probing device with {} -t", probe.display()));
        let outcome = match run_with_timeout(Command::new(&probe).arg("-t"), timeout) {
            Ok(outcome) => outcome,
            Err(err) => return Ok(Diagnosis::Absent(format!("{}: {}", probe.display(), err))),
        };
        Ok(match outcome {
            ProcessOutcome::TimedOut { .. } => Diagnosis::TimedOut,
            ProcessOutcome::Completed(done) => {
                let output = done.combined_output();
                if output.contains("Found") && output.contains("device") {
                    Diagnosis::DevicePresent
                } else {
                    let excerpt: String = output.chars().take(500).collect();
                    Diagnosis::Absent(format!("exit {:?}: {}", done.code, excerpt.trim()))
                }
            }
        })
    }

    fn sweep(&mut self, request: &SweepRequest, budget: Duration) -> Result<String, ScanError> {
        let executable = self.executable.clone().ok_or(ScanError::NotInitialized)?;
        let output = tempfile::Builder::new()
            .prefix("sweep")
            .suffix(".csv")
            .tempfile()?
            .into_temp_path();

        let mut command = Command::new(&executable);
        command.args(sweep_arguments(request, &output));
        self.logger.debug(&format!("running {:?}", command));

        match run_with_timeout(&mut command, budget)? {
            ProcessOutcome::TimedOut { elapsed } => Err(ScanError::Timeout(elapsed)),
            ProcessOutcome::Completed(done) if !done.success => Err(ScanError::ToolFailed {
                code: done.code,
                stderr: done.stderr.trim().to_string(),
            }),
            ProcessOutcome::Completed(_) => {
                let text = fs::read_to_string(&output)?;
                if text.trim().is_empty() {
                    return Err(ScanError::EmptyOutput);
                }
                Ok(text)
            }
        }
    }
}
