//! Append-only, in-memory ledger of geotagged signal measurements.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::interpolation::GeoSample;
use crate::math::geo::radius_to_degrees;
use crate::math::StatsHelper;
use crate::position::Fix;
use crate::scanner::BandScanResult;
use crate::telemetry::LogManager;

/// One (band, frequency) reading tagged with where and when it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub band: String,
    pub frequency_mhz: f64,
    pub signal_dbm: f64,
    pub session_id: String,
}

impl Measurement {
    /// Both coordinates, when the record carries a position.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalStats {
    pub min_dbm: f64,
    pub max_dbm: f64,
    pub mean_dbm: f64,
    pub median_dbm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialCoverage {
    pub with_position: usize,
    pub without_position: usize,
    pub lat_range: Option<(f64, f64)>,
    pub lon_range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub total_measurements: usize,
    /// Distinct band names in first-seen order.
    pub bands_scanned: Vec<String>,
    pub signal_stats: SignalStats,
    pub spatial_coverage: SpatialCoverage,
}

pub struct MeasurementStore {
    session_id: String,
    measurements: Vec<Measurement>,
    logger: LogManager,
}

impl MeasurementStore {
    /// New session identified by the local creation time.
    pub fn new(logger: &LogManager) -> Self {
        Self::with_session_id(&Local::now().format("%Y%m%d_%H%M%S").to_string(), logger)
    }

    pub fn with_session_id(session_id: &str, logger: &LogManager) -> Self {
        Self {
            session_id: session_id.to_string(),
            measurements: Vec::new(),
            logger: logger.child("store"),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Every record in insertion order.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Appends a single reading; `frequency_hz` is stored as MHz.
    pub fn log_measurement(
        &mut self,
        position: Option<&Fix>,
        timestamp: DateTime<Utc>,
        band: &str,
        frequency_hz: f64,
        signal_dbm: f64,
    ) {
        self.measurements.push(Measurement {
            timestamp,
            latitude: position.map(|fix| fix.latitude),
            longitude: position.map(|fix| fix.longitude),
            altitude: position.and_then(|fix| fix.altitude_m),
            band: band.to_string(),
            frequency_mhz: frequency_hz / 1e6,
            signal_dbm,
            session_id: self.session_id.clone(),
        });
    }

    /// Expands every sample of every band into a record sharing `position`
    /// and `timestamp`. Returns how many records were appended.
    pub fn log_scan(
        &mut self,
        position: Option<&Fix>,
        timestamp: DateTime<Utc>,
        results: &BTreeMap<String, BandScanResult>,
    ) -> usize {
        let before = self.measurements.len();
        for (band, result) in results {
            for &(frequency_hz, signal_dbm) in &result.samples {
                self.log_measurement(position, timestamp, band, frequency_hz, signal_dbm);
            }
        }
        let appended = self.measurements.len() - before;
        self.logger.debug(&format!(
            "logged {} measurements across {} bands",
            appended,
            results.len()
        ));
        appended
    }

    pub fn query_by_band(&self, band: &str) -> Vec<&Measurement> {
        self.measurements.iter().filter(|m| m.band == band).collect()
    }

    /// Records within roughly `radius_m` of the query point (a box in
    /// degrees, longitude widened by the cosine of the query latitude).
    pub fn query_by_location(&self, latitude: f64, longitude: f64, radius_m: f64) -> Vec<&Measurement> {
        let (lat_delta, lon_delta) = radius_to_degrees(latitude, radius_m);
        self.measurements
            .iter()
            .filter(|m| match m.coordinates() {
                Some((lat, lon)) => {
                    (lat - latitude).abs() <= lat_delta && (lon - longitude).abs() <= lon_delta
                }
                None => false,
            })
            .collect()
    }

    /// Positioned readings of one band, ready for interpolation.
    pub fn samples_for_band(&self, band: &str) -> Vec<GeoSample> {
        self.measurements
            .iter()
            .filter(|m| m.band == band)
            .filter_map(|m| {
                let (latitude, longitude) = m.coordinates()?;
                Some(GeoSample {
                    latitude,
                    longitude,
                    altitude: m.altitude,
                    value: m.signal_dbm,
                })
            })
            .collect()
    }

    /// Session statistics, `None` while the store is empty.
    pub fn summary(&self) -> Option<SessionSummary> {
        let powers: Vec<f64> = self.measurements.iter().map(|m| m.signal_dbm).collect();
        let (min_dbm, max_dbm) = StatsHelper::min_max(&powers)?;
        let mean_dbm = StatsHelper::mean(&powers)?;
        let median_dbm = StatsHelper::median(&powers)?;

        let mut seen = BTreeSet::new();
        let bands_scanned = self
            .measurements
            .iter()
            .filter(|m| seen.insert(m.band.as_str()))
            .map(|m| m.band.clone())
            .collect();

        let positioned: Vec<(f64, f64)> = self
            .measurements
            .iter()
            .filter_map(Measurement::coordinates)
            .collect();
        let lats: Vec<f64> = positioned.iter().map(|p| p.0).collect();
        let lons: Vec<f64> = positioned.iter().map(|p| p.1).collect();

        Some(SessionSummary {
            session_id: self.session_id.clone(),
            total_measurements: self.measurements.len(),
            bands_scanned,
            signal_stats: SignalStats {
                min_dbm,
                max_dbm,
                mean_dbm,
                median_dbm,
            },
            spatial_coverage: SpatialCoverage {
                with_position: positioned.len(),
                without_position: self.measurements.len() - positioned.len(),
                lat_range: StatsHelper::min_max(&lats),
                lon_range: StatsHelper::min_max(&lons),
            },
        })
    }

    /// Drops every record; the session id is kept.
    pub fn clear(&mut self) {
        self.measurements.clear();
        self.logger.record("cleared all measurements from memory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Sweep;
    use chrono::TimeZone;

    fn fix() -> Fix {
        Fix::new(28.6139, 77.2090, Some(10.0), 8)
    }

    fn b5() -> BTreeMap<String, BandScanResult> {
        let sweep = Sweep {
            frequencies_hz: vec![850.0e6, 850.1e6],
            powers_dbm: vec![-70.0, -95.0],
        };
        let mut results = BTreeMap::new();
        results.insert("B5".to_string(), BandScanResult::from_sweep(&sweep));
        results
    }

    fn store() -> MeasurementStore {
        MeasurementStore::with_session_id("20240115_103000", &LogManager::new("test"))
    }

    #[test]
    fn scan_is_logged_with_shared_position_and_time() {
        let mut store = store();
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(store.log_scan(Some(&fix()), at, &b5()), 2);

        let rows = store.query_by_band("B5");
        assert_eq!(rows.len(), 2);
        assert!((rows[0].frequency_mhz - 850.0).abs() < 1e-9);
        assert!((rows[1].frequency_mhz - 850.1).abs() < 1e-9);
        assert_eq!(rows[0].signal_dbm, -70.0);
        assert_eq!(rows[1].signal_dbm, -95.0);
        for row in &rows {
            assert_eq!(row.timestamp, at);
            assert_eq!(row.coordinates(), Some((28.6139, 77.2090)));
            assert_eq!(row.altitude, Some(10.0));
            assert_eq!(row.session_id, "20240115_103000");
        }

        let summary = store.summary().unwrap();
        assert_eq!(summary.signal_stats.min_dbm, -95.0);
        assert_eq!(summary.signal_stats.max_dbm, -70.0);
        assert_eq!(summary.signal_stats.median_dbm, -82.5);
        assert_eq!(summary.total_measurements, 2);
        assert_eq!(summary.bands_scanned, vec!["B5".to_string()]);
    }

    #[test]
    fn summary_counts_match_logged_samples() {
        let mut store = store();
        let mut results = b5();
        results.insert("B3".to_string(), BandScanResult::no_signal());
        let mut b8 = b5()["B5"].clone();
        b8.samples.push((925e6, -88.0));
        results.insert("B8".to_string(), b8);

        store.log_scan(Some(&fix()), Utc::now(), &results);
        store.log_scan(None, Utc::now(), &results);

        let expected: usize = results.values().map(|r| r.samples.len()).sum();
        let summary = store.summary().unwrap();
        assert_eq!(summary.total_measurements, 2 * expected);
        assert_eq!(summary.bands_scanned, vec!["B5".to_string(), "B8".to_string()]);
        assert_eq!(summary.spatial_coverage.with_position, expected);
        assert_eq!(summary.spatial_coverage.without_position, expected);
        assert_eq!(summary.spatial_coverage.lat_range, Some((28.6139, 28.6139)));
    }

    #[test]
    fn location_query_skips_unpositioned_records() {
        let mut store = store();
        let at = Utc::now();
        store.log_measurement(Some(&fix()), at, "B5", 850e6, -70.0);
        store.log_measurement(None, at, "B5", 850e6, -71.0);
        let far = Fix::new(28.7139, 77.2090, None, 8);
        store.log_measurement(Some(&far), at, "B5", 850e6, -72.0);

        let near = store.query_by_location(28.6139, 77.2091, 50.0);
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].signal_dbm, -70.0);
        assert_eq!(store.query_by_location(28.6139, 77.2090, 20_000.0).len(), 2);
    }

    #[test]
    fn polar_queries_stay_finite() {
        let mut store = store();
        store.log_measurement(Some(&Fix::new(90.0, 10.0, None, 8)), Utc::now(), "B5", 850e6, -70.0);
        assert_eq!(store.query_by_location(90.0, 10.5, 1000.0).len(), 1);
    }

    #[test]
    fn samples_for_band_needs_position() {
        let mut store = store();
        store.log_scan(Some(&fix()), Utc::now(), &b5());
        store.log_scan(None, Utc::now(), &b5());
        let samples = store.samples_for_band("B5");
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].altitude, Some(10.0));
        assert!(store.samples_for_band("B7").is_empty());
    }

    #[test]
    fn empty_store_and_clear() {
        let mut store = store();
        assert!(store.summary().is_none());
        store.log_scan(Some(&fix()), Utc::now(), &b5());
        assert_eq!(store.len(), 2);
        store.clear();
        assert!(store.is_empty());
        assert!(store.summary().is_none());
        assert_eq!(store.session_id(), "20240115_103000");
    }

    #[test]
    fn generated_session_id_is_timestamp_shaped() {
        let store = MeasurementStore::new(&LogManager::new("test"));
        assert_eq!(store.session_id().len(), 15);
        assert_eq!(&store.session_id()[8..9], "_");
    }
}
