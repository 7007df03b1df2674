use std::thread;
use std::time::Duration;

use super::{Fix, FixTracker, PositionConfig, PositionError, PositionSource, SimulationConfig};
use crate::telemetry::LogManager;

/// Hardware-free source walking a serpentine survey grid.
///
/// The n-th read lands on cell `n mod side^2`, rows alternating direction,
/// so the same configuration always replays the same track.
pub struct SimulatedSource {
    settings: SimulationConfig,
    reads: u64,
    connected: bool,
    tracker: FixTracker,
    logger: LogManager,
}

impl SimulatedSource {
    pub fn new(config: &PositionConfig, logger: &LogManager) -> Self {
        let logger = logger.child("simulated");
        Self {
            settings: config.simulation.clone(),
            reads: 0,
            connected: false,
            tracker: FixTracker::new(config.min_satellites, logger.clone()),
            logger,
        }
    }

    fn next_cell(&mut self) -> (u64, u64) {
        let side = u64::from(self.settings.grid_side.max(1));
        let cell = self.reads % (side * side);
        self.reads += 1;
        let row = cell / side;
        let col = if row % 2 == 0 {
            cell % side
        } else {
            side - 1 - cell % side
        };
        (row, col)
    }
}

impl PositionSource for SimulatedSource {
    fn backend(&self) -> &'static str {
        "simulated"
    }

    fn connect(&mut self) -> bool {
        self.logger.record("simulated GPS connected");
        self.connected = true;
        true
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
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
        if !self.connected {
            return Err(PositionError::NotConnected);
        }
        let delay = Duration::from_millis(self.settings.read_delay_ms).min(budget);
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let (row, col) = self.next_cell();
        let step = self.settings.step_deg;
        Ok(Some(Fix::new(
            self.settings.start_latitude + row as f64 * step,
            self.settings.start_longitude + col as f64 * step,
            Some(self.settings.altitude_m),
            self.settings.satellites,
        )))
    }
}
