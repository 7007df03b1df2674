use chrono::Local;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sigmapcore::prelude::{Diagnosis, Instrument, ScanError, SweepRequest};
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Shape of the synthetic spectrum the simulated instrument reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepProfile {
    pub seed: u64,
    pub bins: usize,
    pub noise_floor_dbm: f64,
    /// Height of the carrier above the noise floor.
    pub carrier_db: f64,
    pub jitter_db: f64,
    /// Fraction of bins reported as unreadable.
    pub dropout: f64,
}

impl Default for SweepProfile {
    fn default() -> Self {
        Self {
            seed: 7,
            bins: 64,
            noise_floor_dbm: -95.0,
            carrier_db: 35.0,
            jitter_db: 2.0,
            dropout: 0.02,
        }
    }
}

/// Hardware-free stand-in for the sweep tool. Emits records in the tool's
/// CSV layout so the regular parser runs over them.
pub struct SimulatedInstrument {
    profile: SweepProfile,
    rng: StdRng,
}

impl SimulatedInstrument {
    pub fn new(profile: SweepProfile) -> Self {
        Self {
            rng: StdRng::seed_from_u64(profile.seed),
            profile,
        }
    }

    /// One CSV record covering the requested range.
    pub fn render(&mut self, request: &SweepRequest) -> String {
        let bins = self.profile.bins.max(1);
        let step = if bins > 1 {
            (request.end_hz - request.start_hz) / (bins - 1) as f64
        } else {
            0.0
        };
        let now = Local::now();
        let mut line = format!(
            "{}, {}, {:.0}, {:.0}, {:.2}, {}",
            now.format("%Y-%m-%d"),
            now.format("%H:%M:%S"),
            request.start_hz,
            request.end_hz,
            step,
            bins * 8
        );

        // Carrier centred a third of the way into the band.
        let centre = bins as f64 / 3.0;
        let width = (bins as f64 / 12.0).max(1.0);
        for bin in 0..bins {
            if self.rng.gen_bool(self.profile.dropout.clamp(0.0, 1.0)) {
                line.push_str(", nan");
                continue;
            }
            let distance = (bin as f64 - centre) / width;
            let carrier = self.profile.carrier_db * (-0.5 * distance * distance).exp();
            let jitter = if self.profile.jitter_db > 0.0 {
                self.rng.gen_range(-self.profile.jitter_db..self.profile.jitter_db)
            } else {
                0.0
            };
            let _ = write!(line, ", {:.2}", self.profile.noise_floor_dbm + carrier + jitter);
        }
        line.push('\n');
        line
    }
}

impl Instrument for SimulatedInstrument {
    fn name(&self) -> &str {
        "simulated sweep"
    }

    fn locate(&mut self) -> Result<PathBuf, ScanError> {
        Ok(PathBuf::from("simulated"))
    }

    fn diagnose(&mut self, _timeout: Duration) -> Result<Diagnosis, ScanError> {
        Ok(Diagnosis::DevicePresent)
    }

    fn sweep(&mut self, request: &SweepRequest, _budget: Duration) -> Result<String, ScanError> {
        Ok(self.render(request))
    }
}
