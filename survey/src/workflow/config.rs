use anyhow::Context;
use serde::{Deserialize, Serialize};
use sigmapcore::prelude::{BandConfig, GridConfig, PositionConfig, ScannerConfig};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Pause between continuous-mode cycles.
    pub interval_s: f64,
    /// Budget for each per-cycle position read.
    pub fix_timeout_s: f64,
    /// Budget for the first fix after connecting.
    pub initial_fix_timeout_s: f64,
    /// Stop continuous mode after this many cycles.
    pub max_cycles: Option<usize>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval_s: 5.0,
            fix_timeout_s: 5.0,
            initial_fix_timeout_s: 30.0,
            max_cycles: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub output_dir: PathBuf,
    pub grids: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: PathBuf::from("data"),
            grids: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub gps: PositionConfig,
    pub scanner: ScannerConfig,
    pub bands: BTreeMap<String, BandConfig>,
    pub grid: GridConfig,
    #[serde(rename = "loop")]
    pub cycle: LoopConfig,
    pub logging: LoggingConfig,
    pub export: ExportConfig,
}

fn band(enabled: bool, start_mhz: f64, end_mhz: f64) -> BandConfig {
    BandConfig {
        enabled,
        downlink_start: start_mhz,
        downlink_end: end_mhz,
        integration_time_s: None,
    }
}

impl Default for SurveyConfig {
    fn default() -> Self {
        let mut bands = BTreeMap::new();
        bands.insert("B5".to_string(), band(true, 869.0, 894.0));
        bands.insert("B8".to_string(), band(true, 925.0, 960.0));
        bands.insert("B3".to_string(), band(false, 1805.0, 1880.0));
        Self {
            gps: PositionConfig::default(),
            scanner: ScannerConfig::default(),
            bands,
            grid: GridConfig::default(),
            cycle: LoopConfig::default(),
            logging: LoggingConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl SurveyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading survey config {}", path_ref.display()))?;
        let config: SurveyConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing survey config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn enabled_bands(&self) -> usize {
        self.bands.values().filter(|band| band.enabled).count()
    }
}
