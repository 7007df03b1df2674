/// Per-session counters kept by the driving loop.
///
/// The loop is the only writer, so plain counters are enough.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleMetrics {
    cycles: usize,
    fresh_fixes: usize,
    stale_fixes: usize,
    missing_fixes: usize,
    band_sweeps: usize,
    failed_band_sweeps: usize,
}

/// How the position attached to one cycle was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    Fresh,
    Stale,
    Missing,
}

impl CycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&mut self, fix: FixOutcome) {
        self.cycles += 1;
        match fix {
            FixOutcome::Fresh => self.fresh_fixes += 1,
            FixOutcome::Stale => self.stale_fixes += 1,
            FixOutcome::Missing => self.missing_fixes += 1,
        }
    }

    pub fn record_band(&mut self, succeeded: bool) {
        self.band_sweeps += 1;
        if !succeeded {
            self.failed_band_sweeps += 1;
        }
    }

    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn failed_band_sweeps(&self) -> usize {
        self.failed_band_sweeps
    }

    /// (cycles, fresh, stale, missing, band sweeps, failed band sweeps)
    pub fn snapshot(&self) -> (usize, usize, usize, usize, usize, usize) {
        (
            self.cycles,
            self.fresh_fixes,
            self.stale_fixes,
            self.missing_fixes,
            self.band_sweeps,
            self.failed_band_sweeps,
        )
    }
}
