use anyhow::Context;
use serde::Serialize;
use sigmapcore::prelude::{
    AltitudeLayer, InterpolationGrid, LogManager, Measurement, MeasurementStore,
    SpatialInterpolator, NO_SIGNAL_DBM,
};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct MeasurementFile<'a> {
    session_id: &'a str,
    num_measurements: usize,
    measurements: &'a [Measurement],
}

#[derive(Debug, Serialize)]
pub struct BandGrids {
    pub band: String,
    pub sample_count: usize,
    /// All altitudes together; absent when the band had no usable samples.
    pub combined: Option<InterpolationGrid>,
    pub layers: Vec<AltitudeLayer>,
}

#[derive(Serialize)]
struct GridFile<'a> {
    session_id: &'a str,
    bands: &'a [BandGrids],
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Writes every measurement to `signal_data_<session>.json`.
pub fn write_measurements(store: &MeasurementStore, dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating output dir {}", dir.display()))?;
    let path = dir.join(format!("signal_data_{}.json", store.session_id()));
    write_json(
        &path,
        &MeasurementFile {
            session_id: store.session_id(),
            num_measurements: store.len(),
            measurements: store.measurements(),
        },
    )?;
    Ok(path)
}

/// Interpolates each band, overall and per altitude layer. No-signal
/// readings are left out so they do not drag the surface down.
pub fn build_band_grids(
    store: &MeasurementStore,
    interpolator: &SpatialInterpolator,
    logger: &LogManager,
) -> Vec<BandGrids> {
    let bands = store
        .summary()
        .map(|summary| summary.bands_scanned)
        .unwrap_or_default();
    let config = interpolator.config();

    bands
        .into_iter()
        .map(|band| {
            let samples: Vec<_> = store
                .samples_for_band(&band)
                .into_iter()
                .filter(|sample| sample.value > NO_SIGNAL_DBM)
                .collect();
            let combined = if samples.is_empty() {
                None
            } else {
                match interpolator.build_grid(&samples, config.grid_resolution(), config.method) {
                    Ok(grid) => Some(grid),
                    Err(err) => {
                        logger.warn(&format!("no grid for {}: {}", band, err));
                        None
                    }
                }
            };
            let layers = interpolator.build_layers(&samples).unwrap_or_else(|err| {
                logger.warn(&format!("no altitude layers for {}: {}", band, err));
                Vec::new()
            });
            BandGrids {
                band,
                sample_count: samples.len(),
                combined,
                layers,
            }
        })
        .collect()
}

/// Writes the band grids to `grids_<session>.json`.
pub fn write_grids(store: &MeasurementStore, grids: &[BandGrids], dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating output dir {}", dir.display()))?;
    let path = dir.join(format!("grids_{}.json", store.session_id()));
    write_json(
        &path,
        &GridFile {
            session_id: store.session_id(),
            bands: grids,
        },
    )?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sigmapcore::prelude::{Fix, GridConfig};

    fn populated_store() -> MeasurementStore {
        let logger = LogManager::new("test");
        let mut store = MeasurementStore::with_session_id("20240115_103000", &logger);
        let positions = [
            (28.6139, 77.2090, 10.0),
            (28.6149, 77.2090, 11.0),
            (28.6139, 77.2100, 12.0),
            (28.6149, 77.2100, 19.0),
        ];
        for (i, (lat, lon, alt)) in positions.iter().enumerate() {
            let fix = Fix::new(*lat, *lon, Some(*alt), 8);
            store.log_measurement(Some(&fix), Utc::now(), "B5", 850e6, -70.0 - i as f64);
            store.log_measurement(Some(&fix), Utc::now(), "B5", 850.1e6, NO_SIGNAL_DBM);
        }
        store.log_measurement(None, Utc::now(), "B8", 925e6, -80.0);
        store
    }

    #[test]
    fn measurement_file_lists_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = populated_store();
        let path = write_measurements(&store, dir.path()).unwrap();
        assert!(path.ends_with("signal_data_20240115_103000.json"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["num_measurements"], 9);
        assert_eq!(json["measurements"].as_array().unwrap().len(), 9);
        assert_eq!(json["measurements"][0]["band"], "B5");
        assert!(json["measurements"][8]["latitude"].is_null());
    }

    #[test]
    fn grids_cover_bands_and_layers() {
        let dir = tempfile::tempdir().unwrap();
        let store = populated_store();
        let logger = LogManager::new("test");
        let interpolator = SpatialInterpolator::new(
            GridConfig {
                resolution: 6,
                ..Default::default()
            },
            &logger,
        );
        let grids = build_band_grids(&store, &interpolator, &logger);
        assert_eq!(grids.len(), 2);

        let b5 = &grids[0];
        assert_eq!(b5.band, "B5");
        assert_eq!(b5.sample_count, 4);
        let combined = b5.combined.as_ref().unwrap();
        assert_eq!(combined.shape(), (6, 6));
        let (lo, hi) = combined.value_range().unwrap();
        assert!(lo >= -73.5 && hi <= -69.5);
        let centres: Vec<i64> = b5.layers.iter().map(|l| l.altitude_m).collect();
        assert_eq!(centres, vec![10, 20]);

        let b8 = &grids[1];
        assert!(b8.combined.is_none());
        assert!(b8.layers.is_empty());

        let path = write_grids(&store, &grids, dir.path()).unwrap();
        assert!(path.ends_with("grids_20240115_103000.json"));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["bands"][0]["band"], "B5");
    }
}
