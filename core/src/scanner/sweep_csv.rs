//! Parser for sweep-tool CSV output.
//!
//! Each record reads `date, time, hz_low, hz_high, hz_step, samples, dB, dB, ...`.
//! A record describes one hop; wide ranges produce several hops per sweep.

use super::{Sweep, NO_SIGNAL_DBM};
use crate::math::StatsHelper;

/// Fixed leading fields before the power values.
pub const HEADER_FIELDS: usize = 6;

/// Readings at or beyond this magnitude are treated as garbage.
const MAX_PLAUSIBLE_DB: f64 = 1e10;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SweepParseError {
    #[error("sweep output contained no records")]
    NoRecords,
    #[error("record has {found} fields, need at least {} header fields and one value", HEADER_FIELDS)]
    TooFewFields { found: usize },
    #[error("header field {field} is not a number: {value:?}")]
    InvalidHeader { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepRecord {
    pub hz_low: f64,
    pub hz_high: f64,
    pub hz_step: f64,
    pub samples: u64,
    pub powers_dbm: Vec<f64>,
}

impl SweepRecord {
    /// Bin frequencies spread evenly over `[hz_low, hz_high]`.
    pub fn frequencies_hz(&self) -> Vec<f64> {
        StatsHelper::linspace(self.hz_low, self.hz_high, self.powers_dbm.len())
    }
}

/// A single power reading; anything unusable becomes the no-signal sentinel.
pub fn parse_power(field: &str) -> f64 {
    match field.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value.abs() < MAX_PLAUSIBLE_DB => value,
        _ => NO_SIGNAL_DBM,
    }
}

fn header_number(fields: &[&str], index: usize, field: &'static str) -> Result<f64, SweepParseError> {
    let raw = fields[index].trim();
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(SweepParseError::InvalidHeader {
            field,
            value: raw.to_string(),
        }),
    }
}

pub fn parse_record(line: &str) -> Result<SweepRecord, SweepParseError> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() <= HEADER_FIELDS {
        return Err(SweepParseError::TooFewFields {
            found: fields.len(),
        });
    }
    let samples = header_number(&fields, 5, "samples")?;
    Ok(SweepRecord {
        hz_low: header_number(&fields, 2, "hz_low")?,
        hz_high: header_number(&fields, 3, "hz_high")?,
        hz_step: header_number(&fields, 4, "hz_step")?,
        samples: samples.max(0.0) as u64,
        powers_dbm: fields[HEADER_FIELDS..].iter().map(|f| parse_power(f)).collect(),
    })
}

/// Parses every record and concatenates the hops in frequency order.
pub fn parse_sweep_output(text: &str) -> Result<Sweep, SweepParseError> {
    let mut records = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_record)
        .collect::<Result<Vec<_>, _>>()?;
    if records.is_empty() {
        return Err(SweepParseError::NoRecords);
    }
    records.sort_by(|a, b| a.hz_low.total_cmp(&b.hz_low));

    let mut sweep = Sweep::default();
    for record in &records {
        sweep.frequencies_hz.extend(record.frequencies_hz());
        sweep.powers_dbm.extend_from_slice(&record.powers_dbm);
    }
    Ok(sweep)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = "2024-01-15, 10:30:00, 869000000, 869300000, 100000.00, 12, -60.5, -55.0, -70.25, -80.0";

    #[test]
    fn clean_record_spreads_frequencies_inclusively() {
        let sweep = parse_sweep_output(CLEAN).unwrap();
        assert_eq!(sweep.powers_dbm, vec![-60.5, -55.0, -70.25, -80.0]);
        assert_eq!(
            sweep.frequencies_hz,
            vec![869_000_000.0, 869_100_000.0, 869_200_000.0, 869_300_000.0]
        );
    }

    #[test]
    fn bad_values_become_sentinels_without_changing_length() {
        let dirty = "2024-01-15, 10:30:00, 869000000, 869300000, 100000.00, 12, -60.5, abc, nan, 1e12";
        let clean = parse_sweep_output(CLEAN).unwrap();
        let sweep = parse_sweep_output(dirty).unwrap();
        assert_eq!(sweep.len(), clean.len());
        assert_eq!(sweep.powers_dbm, vec![-60.5, NO_SIGNAL_DBM, NO_SIGNAL_DBM, NO_SIGNAL_DBM]);
        assert_eq!(parse_power(" inf "), NO_SIGNAL_DBM);
        assert_eq!(parse_power(""), NO_SIGNAL_DBM);
    }

    #[test]
    fn hops_are_concatenated_in_frequency_order() {
        let text = "d, t, 870000000, 870100000, 50000, 4, -1, -2\n\
                    d, t, 869000000, 869100000, 50000, 4, -3, -4, -5\n";
        let sweep = parse_sweep_output(text).unwrap();
        assert_eq!(sweep.powers_dbm, vec![-3.0, -4.0, -5.0, -1.0, -2.0]);
        assert_eq!(sweep.frequencies_hz[0], 869_000_000.0);
        assert_eq!(sweep.frequencies_hz[4], 870_100_000.0);
    }

    #[test]
    fn malformed_layouts_are_errors() {
        assert_eq!(parse_sweep_output("\n  \n"), Err(SweepParseError::NoRecords));
        assert_eq!(
            parse_record("d, t, 1, 2, 3, 4"),
            Err(SweepParseError::TooFewFields { found: 6 })
        );
        assert!(matches!(
            parse_record("d, t, low, 2, 3, 4, -50"),
            Err(SweepParseError::InvalidHeader { field: "hz_low", .. })
        ));
    }

    #[test]
    fn single_value_sits_at_low_edge() {
        let record = parse_record("d, t, 100, 200, 100, 1, -42").unwrap();
        assert_eq!(record.frequencies_hz(), vec![100.0]);
        assert_eq!(record.samples, 1);
    }
}
