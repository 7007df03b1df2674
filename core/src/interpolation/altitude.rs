use std::collections::BTreeMap;

use super::GeoSample;

/// Centre of the altitude bin nearest to `altitude_m`; exact midpoints go to
/// the lower bin. `None` for unusable altitudes.
pub fn altitude_bin(altitude_m: f64, bin_size_m: u32) -> Option<i64> {
    if !altitude_m.is_finite() {
        return None;
    }
    let size = f64::from(bin_size_m.max(1));
    let scaled = altitude_m / size;
    let lower = scaled.floor();
    let index = if scaled - lower > 0.5 { lower + 1.0 } else { lower };
    Some((index * size) as i64)
}

/// Groups samples under their nearest bin centre. Samples without an
/// altitude are left out.
pub fn bin_by_altitude(samples: &[GeoSample], bin_size_m: u32) -> BTreeMap<i64, Vec<GeoSample>> {
    let mut bins: BTreeMap<i64, Vec<GeoSample>> = BTreeMap::new();
    for sample in samples {
        if let Some(center) = sample.altitude.and_then(|alt| altitude_bin(alt, bin_size_m)) {
            bins.entry(center).or_default().push(*sample);
        }
    }
    bins
}

/// Samples whose altitude lies within `half_width_m` of `center_m`, inclusive.
/// Neighbouring windows overlap.
pub fn altitude_window(samples: &[GeoSample], center_m: f64, half_width_m: f64) -> Vec<GeoSample> {
    samples
        .iter()
        .filter(|sample| match sample.altitude {
            Some(alt) => (alt - center_m).abs() <= half_width_m,
            None => false,
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(altitude: Option<f64>) -> GeoSample {
        GeoSample {
            latitude: 28.6,
            longitude: 77.2,
            altitude,
            value: -70.0,
        }
    }

    #[test]
    fn nearest_centre_wins() {
        let samples: Vec<GeoSample> = [101.0, 104.0, 106.0, 109.0]
            .iter()
            .map(|&alt| at(Some(alt)))
            .collect();
        let bins = bin_by_altitude(&samples, 5);
        let layout: Vec<(i64, Vec<f64>)> = bins
            .iter()
            .map(|(center, members)| {
                (*center, members.iter().filter_map(|s| s.altitude).collect())
            })
            .collect();
        assert_eq!(
            layout,
            vec![
                (100, vec![101.0]),
                (105, vec![104.0, 106.0]),
                (110, vec![109.0])
            ]
        );
    }

    #[test]
    fn midpoints_resolve_downward() {
        assert_eq!(altitude_bin(102.5, 5), Some(100));
        assert_eq!(altitude_bin(107.5, 5), Some(105));
        assert_eq!(altitude_bin(-2.5, 5), Some(-5));
        assert_eq!(altitude_bin(f64::NAN, 5), None);
    }

    #[test]
    fn missing_altitudes_are_never_binned() {
        let bins = bin_by_altitude(&[at(None), at(Some(12.0))], 5);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[&10].len(), 1);
    }

    #[test]
    fn windows_overlap() {
        let samples: Vec<GeoSample> = [101.0, 104.0, 106.0, 109.0, 116.0]
            .iter()
            .map(|&alt| at(Some(alt)))
            .collect();
        assert_eq!(altitude_window(&samples, 105.0, 5.0).len(), 4);
        assert_eq!(altitude_window(&samples, 110.0, 5.0).len(), 2);
    }
}
