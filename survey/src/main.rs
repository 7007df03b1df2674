use anyhow::Context;
use clap::{Parser, ValueEnum};
use generator::sweep::{SimulatedInstrument, SweepProfile};
use sigmapcore::prelude::{
    open_position_source, BackendKind, Instrument, LogManager, AUTOPILOT_AVAILABLE,
};
use sigmapcore::scanner::RtlPower;
use std::path::PathBuf;
use tokio::runtime::Builder as TokioBuilder;
use workflow::config::SurveyConfig;
use workflow::runner::{Runner, SessionReport};

mod export;
mod generator;
mod workflow;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// One position read and one scan of every enabled band
    Single,
    /// Repeat until Ctrl+C
    Continuous,
}

#[derive(Parser)]
#[command(author, version, about = "Geotagged signal-strength survey driver")]
struct Args {
    /// Load the survey config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Mode::Single)]
    mode: Mode,
    /// Seconds between continuous-mode scans
    #[arg(long)]
    interval: Option<f64>,
    /// Use the simulated position source
    #[arg(long, default_value_t = false)]
    mock_gps: bool,
    /// Use the simulated sweep instrument
    #[arg(long, default_value_t = false)]
    mock_scanner: bool,
    /// Directory for the session export
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn apply_overrides(config: &mut SurveyConfig, args: &Args) {
    if let Some(interval) = args.interval {
        config.cycle.interval_s = interval;
    }
    if args.mock_gps {
        config.gps.backend = BackendKind::Simulated;
        config.gps.enabled = true;
    }
    if let Some(dir) = &args.output_dir {
        config.export.output_dir = dir.clone();
    }
}

fn print_report(report: &SessionReport) {
    match &report.summary {
        Some(summary) => println!(
            "Session {} -> measurements {}, bands {:?}, min {:.1} dBm, max {:.1} dBm, positioned {}",
            report.session_id,
            summary.total_measurements,
            summary.bands_scanned,
            summary.signal_stats.min_dbm,
            summary.signal_stats.max_dbm,
            summary.spatial_coverage.with_position
        ),
        None => println!("Session {} -> no measurements", report.session_id),
    }
    for path in &report.outputs {
        println!("  wrote {}", path.display());
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SurveyConfig::load(path)?,
        None => SurveyConfig::default(),
    };
    apply_overrides(&mut config, &args);

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    let logger = LogManager::new("sigmap");
    logger.record(&format!(
        "survey starting: mode {:?}, {} enabled bands, autopilot backend {}",
        args.mode,
        config.enabled_bands(),
        if AUTOPILOT_AVAILABLE { "available" } else { "not built" }
    ));

    let position = open_position_source(&config.gps, &logger.child("position"));
    let instrument: Box<dyn Instrument> = if args.mock_scanner {
        Box::new(SimulatedInstrument::new(SweepProfile::default()))
    } else {
        Box::new(RtlPower::new(
            config.scanner.tool_path.as_ref().map(PathBuf::from),
            &logger.child("scanner"),
        ))
    };
    let mut runner = Runner::new(config, position, instrument, &logger);

    let report = match args.mode {
        Mode::Single => runner.run_single()?,
        Mode::Continuous => {
            let runtime = TokioBuilder::new_current_thread()
                .enable_all()
                .build()
                .context("creating runtime for signal handling")?;
            runtime.block_on(runner.run_continuous())?
        }
    };
    print_report(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "survey",
            "--mode",
            "continuous",
            "--interval",
            "2.5",
            "--mock-gps",
            "--output-dir",
            "/tmp/out",
        ]);
        assert_eq!(args.mode, Mode::Continuous);
        let mut config = SurveyConfig::default();
        config.gps.enabled = false;
        apply_overrides(&mut config, &args);
        assert_eq!(config.cycle.interval_s, 2.5);
        assert_eq!(config.gps.backend, BackendKind::Simulated);
        assert!(config.gps.enabled);
        assert_eq!(config.export.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn defaults_to_single_real_hardware() {
        let args = Args::parse_from(["survey"]);
        assert_eq!(args.mode, Mode::Single);
        assert!(!args.mock_gps && !args.mock_scanner);
    }
}
