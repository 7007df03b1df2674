use crate::export::session;
use crate::workflow::config::SurveyConfig;
use anyhow::{bail, Context};
use chrono::Utc;
use sigmapcore::prelude::{
    CycleMetrics, Fix, FixOutcome, Instrument, LogManager, MeasurementStore, PositionSource,
    SessionSummary, SpatialInterpolator, SpectrumScanner,
};
use sigmapcore::process::seconds;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::signal;
use tokio::time::sleep;

/// What a finished session produced.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub summary: Option<SessionSummary>,
    pub metrics: CycleMetrics,
    pub outputs: Vec<PathBuf>,
}

/// Sequential acquisition loop: position, then scan, then append.
pub struct Runner {
    config: SurveyConfig,
    position: Box<dyn PositionSource>,
    scanner: SpectrumScanner<Box<dyn Instrument>>,
    store: MeasurementStore,
    metrics: CycleMetrics,
    logger: LogManager,
}

impl Runner {
    pub fn new(
        config: SurveyConfig,
        position: Box<dyn PositionSource>,
        instrument: Box<dyn Instrument>,
        logger: &LogManager,
    ) -> Self {
        let scanner =
            SpectrumScanner::with_instrument(config.scanner.clone(), instrument, &logger.child("scanner"));
        Self {
            store: MeasurementStore::new(logger),
            config,
            position,
            scanner,
            metrics: CycleMetrics::new(),
            logger: logger.child("runner"),
        }
    }

    pub fn store(&self) -> &MeasurementStore {
        &self.store
    }

    pub fn metrics(&self) -> &CycleMetrics {
        &self.metrics
    }

    /// Brings up the scanner and the position source. Only a scanner failure
    /// stops the session; without position the loop logs unpositioned data.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if !self.scanner.initialize() {
            bail!("spectrum scanner failed to initialize; is the device attached?");
        }

        if self.position.connect() {
            let timeout = seconds(self.config.cycle.initial_fix_timeout_s);
            if self.position.wait_for_fix(timeout).is_none() {
                self.logger
                    .warn("no initial fix; measurements will carry the last known position if one arrives");
            }
        } else {
            self.logger.warn(&format!(
                "{} position source unavailable; continuing without position data",
                self.position.backend()
            ));
        }
        Ok(())
    }

    fn read_fix(&mut self) -> (Option<Fix>, FixOutcome) {
        let previous = self.position.last_position();
        let fix = self
            .position
            .read_position(seconds(self.config.cycle.fix_timeout_s));
        let outcome = match &fix {
            None => FixOutcome::Missing,
            Some(fix) if previous.as_ref() == Some(fix) => FixOutcome::Stale,
            Some(_) => FixOutcome::Fresh,
        };
        (fix, outcome)
    }

    /// One cycle. Returns the number of measurements appended.
    pub fn scan_once(&mut self) -> usize {
        let (fix, outcome) = self.read_fix();
        match &fix {
            Some(fix) => self.logger.record(&format!("position: {}", fix)),
            None => self.logger.warn("no position available for this cycle"),
        }

        let results = self.scanner.scan_bands(&self.config.bands);
        for result in results.values() {
            self.metrics.record_band(!result.is_failed());
        }
        self.metrics.record_cycle(outcome);

        let appended = self.store.log_scan(fix.as_ref(), Utc::now(), &results);
        self.logger.record(&format!(
            "cycle {}: {} bands, {} measurements ({} total)",
            self.metrics.cycles(),
            results.len(),
            appended,
            self.store.len()
        ));
        appended
    }

    pub fn run_single(&mut self) -> anyhow::Result<SessionReport> {
        self.start()?;
        self.scan_once();
        self.finish()
    }

    /// Scans until Ctrl+C or the configured cycle limit, then flushes.
    ///
    /// The Ctrl+C handler is installed before start-up, so an interrupt
    /// during the initial fix wait still ends in `finish`.
    pub async fn run_continuous(&mut self) -> anyhow::Result<SessionReport> {
        let ctrl_c = signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut stopped = interrupted(ctrl_c.as_mut()).await?;

        self.start()?;
        let interval = seconds(self.config.cycle.interval_s);
        self.logger.record(&format!(
            "continuous scanning every {:.1}s (Ctrl+C to stop)",
            interval.as_secs_f64()
        ));

        loop {
            if stopped || interrupted(ctrl_c.as_mut()).await? {
                self.logger.record("interrupted; stopping scan loop");
                break;
            }
            self.scan_once();
            if let Some(limit) = self.config.cycle.max_cycles {
                if self.metrics.cycles() >= limit {
                    self.logger.record(&format!("reached {} cycles", limit));
                    break;
                }
            }
            tokio::select! {
                result = ctrl_c.as_mut() => {
                    result.context("awaiting Ctrl+C")?;
                    stopped = true;
                }
                _ = sleep(interval) => {}
            }
        }
        self.finish()
    }

    /// Releases devices, logs the session summary and writes the export.
    pub fn finish(&mut self) -> anyhow::Result<SessionReport> {
        self.position.disconnect();
        self.scanner.close();

        let summary = self.store.summary();
        match &summary {
            Some(summary) => self.logger.record(&format!(
                "session {}: {} measurements, bands {:?}, signal {:.1}..{:.1} dBm (mean {:.1}), {} with position",
                summary.session_id,
                summary.total_measurements,
                summary.bands_scanned,
                summary.signal_stats.min_dbm,
                summary.signal_stats.max_dbm,
                summary.signal_stats.mean_dbm,
                summary.spatial_coverage.with_position
            )),
            None => self.logger.warn("session recorded no measurements"),
        }
        let (cycles, fresh, stale, missing, sweeps, failed) = self.metrics.snapshot();
        self.logger.record(&format!(
            "cycles={} fixes fresh/stale/missing={}/{}/{} band sweeps={} failed={}",
            cycles, fresh, stale, missing, sweeps, failed
        ));

        let mut outputs = Vec::new();
        if self.config.export.enabled && !self.store.is_empty() {
            let dir = &self.config.export.output_dir;
            outputs.push(session::write_measurements(&self.store, dir).context("exporting measurements")?);
            if self.config.export.grids {
                let interpolator = SpatialInterpolator::new(self.config.grid.clone(), &self.logger);
                let grids = session::build_band_grids(&self.store, &interpolator, &self.logger);
                outputs.push(session::write_grids(&self.store, &grids, dir).context("exporting grids")?);
            }
            for path in &outputs {
                self.logger.record(&format!("wrote {}", path.display()));
            }
        }

        Ok(SessionReport {
            session_id: self.store.session_id().to_string(),
            summary,
            metrics: self.metrics.clone(),
            outputs,
        })
    }
}

/// Polls the Ctrl+C listener without waiting. The first poll also installs
/// the handler.
async fn interrupted<F>(ctrl_c: Pin<&mut F>) -> anyhow::Result<bool>
where
    F: Future<Output = io::Result<()>>,
{
    // Lets the driver pick up signals that arrived during blocking calls.
    tokio::task::yield_now().await;
    tokio::select! {
        biased;
        result = ctrl_c => {
            result.context("awaiting Ctrl+C")?;
            Ok(true)
        }
        _ = std::future::ready(()) => Ok(false),
    }
}
