use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::telemetry::LogManager;

/// Immutable position report from a position source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: Option<f64>,
    pub satellites: u8,
    pub heading_deg: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, altitude_m: Option<f64>, satellites: u8) -> Self {
        Self {
            latitude,
            longitude,
            altitude_m,
            satellites,
            heading_deg: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_heading(mut self, heading_deg: Option<f64>) -> Self {
        self.heading_deg = heading_deg;
        self
    }

    /// Nonzero coordinates and at least `min_satellites` in view.
    pub fn is_valid(&self, min_satellites: u8) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0 && self.satellites >= min_satellites
    }
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lat={:.6}, lon={:.6}", self.latitude, self.longitude)?;
        match self.altitude_m {
            Some(alt) => write!(f, ", alt={:.1}m", alt)?,
            None => write!(f, ", alt=n/a")?,
        }
        write!(f, ", sats={}", self.satellites)?;
        if let Some(heading) = self.heading_deg {
            write!(f, ", heading={:.1}deg", heading)?;
        }
        Ok(())
    }
}

/// Validity rule and last-valid cache shared by every backend.
#[derive(Debug, Clone)]
pub struct FixTracker {
    min_satellites: u8,
    last_valid: Option<Fix>,
    logger: LogManager,
}

impl FixTracker {
    pub fn new(min_satellites: u8, logger: LogManager) -> Self {
        Self {
            min_satellites,
            last_valid: None,
            logger,
        }
    }

    pub fn min_satellites(&self) -> u8 {
        self.min_satellites
    }

    /// Caches and returns `candidate` when it passes the validity rule.
    pub fn offer(&mut self, candidate: Fix) -> Option<Fix> {
        if candidate.is_valid(self.min_satellites) {
            self.logger.debug(&format!("fix accepted: {}", candidate));
            self.last_valid = Some(candidate.clone());
            Some(candidate)
        } else {
            self.logger.debug(&format!(
                "fix rejected: {} (need {} satellites, nonzero coordinates)",
                candidate, self.min_satellites
            ));
            None
        }
    }

    pub fn last_valid(&self) -> Option<&Fix> {
        self.last_valid.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satellites_below_minimum_are_never_valid() {
        for sats in 0..4 {
            let fix = Fix::new(28.6139, 77.2090, Some(10.0), sats);
            assert!(!fix.is_valid(4), "{} satellites accepted", sats);
        }
        for sats in 4..12 {
            assert!(Fix::new(28.6139, 77.2090, None, sats).is_valid(4));
        }
    }

    #[test]
    fn zero_coordinates_are_invalid() {
        assert!(!Fix::new(0.0, 77.2, None, 9).is_valid(4));
        assert!(!Fix::new(28.6, 0.0, None, 9).is_valid(4));
    }

    #[test]
    fn tracker_keeps_last_valid_fix_only() {
        let mut tracker = FixTracker::new(4, LogManager::new("test"));
        assert!(tracker.last_valid().is_none());

        let good = Fix::new(28.6139, 77.2090, Some(10.0), 8);
        assert!(tracker.offer(good.clone()).is_some());
        assert!(tracker.offer(Fix::new(28.7, 77.3, None, 2)).is_none());
        assert_eq!(tracker.last_valid(), Some(&good));
    }

    #[test]
    fn display_includes_heading_when_known() {
        let fix = Fix::new(1.5, 2.5, None, 5).with_heading(Some(90.0));
        let text = fix.to_string();
        assert!(text.contains("alt=n/a"));
        assert!(text.contains("heading=90.0deg"));
    }
}
