//! Scattered-sample interpolation onto regular latitude/longitude grids.
//!
//! Grid nodes the data cannot support (outside the convex hull of the
//! samples) hold `None`; they are never filled with a default, since zero
//! is itself a plausible reading.

pub mod altitude;
pub mod clough_tocher;
pub mod delaunay;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::math::geo::span_to_meters;
use crate::math::StatsHelper;
use crate::telemetry::LogManager;
use clough_tocher::CloughTocher;
use delaunay::{barycentric, Point, Triangulation};

pub use altitude::{altitude_bin, altitude_window, bin_by_altitude};

/// Finest grid allowed when the resolution is derived from a ground spacing.
pub const MAX_DERIVED_RESOLUTION: usize = 2000;

/// Distance from the sample line (normalised units) still counted as on it.
const COLLINEAR_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    #[default]
    Cubic,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridResolution {
    /// Nodes per side.
    Cells(usize),
    /// Target ground spacing between nodes, metres.
    Spacing(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub resolution: usize,
    pub spacing_m: Option<f64>,
    /// Fraction of the sample extent added on every side.
    pub padding: f64,
    pub method: InterpolationMethod,
    pub altitude_bin_m: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            resolution: 100,
            spacing_m: None,
            padding: 0.1,
            method: InterpolationMethod::Cubic,
            altitude_bin_m: 5,
        }
    }
}

impl GridConfig {
    /// Ground spacing takes precedence over a fixed node count.
    pub fn grid_resolution(&self) -> GridResolution {
        match self.spacing_m {
            Some(spacing) => GridResolution::Spacing(spacing),
            None => GridResolution::Cells(self.resolution),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("no positioned samples to interpolate")]
    NoSamples,
    #[error("sample {0} has a non-finite coordinate or value")]
    NonFiniteSample(usize),
    #[error("grid needs at least 2 nodes per side, got {0}")]
    ResolutionTooSmall(usize),
    #[error("grid spacing must be positive, got {0} m")]
    InvalidSpacing(f64),
    #[error("padding must be a non-negative fraction, got {0}")]
    InvalidPadding(f64),
}

/// Regular mesh of estimates; `values[[row, col]]` sits at
/// `(latitudes[row], longitudes[col])`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterpolationGrid {
    pub method: InterpolationMethod,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub values: Array2<Option<f64>>,
}

impl InterpolationGrid {
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get([row, col]).copied().flatten()
    }

    pub fn estimated_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Smallest and largest estimate, if any node has one.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let estimates: Vec<f64> = self.values.iter().flatten().copied().collect();
        StatsHelper::min_max(&estimates)
    }
}

/// Grid for one altitude bin.
#[derive(Debug, Clone, Serialize)]
pub struct AltitudeLayer {
    pub altitude_m: i64,
    pub sample_count: usize,
    pub grid: InterpolationGrid,
}

/// Sample positions mapped into a unit-scale frame. Both axes share one
/// scale so Delaunay circles keep their shape.
struct Frame {
    origin: Point,
    scale: f64,
}

impl Frame {
    fn fit(positions: &[Point]) -> Frame {
        let xs: Vec<f64> = positions.iter().map(|p| p[0]).collect();
        let ys: Vec<f64> = positions.iter().map(|p| p[1]).collect();
        let (x0, x1) = StatsHelper::min_max(&xs).unwrap_or((0.0, 0.0));
        let (y0, y1) = StatsHelper::min_max(&ys).unwrap_or((0.0, 0.0));
        let span = (x1 - x0).max(y1 - y0);
        Frame {
            origin: [x0, y0],
            scale: if span > 0.0 { span } else { 1.0 },
        }
    }

    fn map(&self, p: Point) -> Point {
        [
            (p[0] - self.origin[0]) / self.scale,
            (p[1] - self.origin[1]) / self.scale,
        ]
    }
}

/// Averages readings that share an exact position.
fn merge_duplicates(samples: &[GeoSample]) -> (Vec<Point>, Vec<f64>) {
    let mut merged: BTreeMap<(u64, u64), (Point, f64, usize)> = BTreeMap::new();
    for sample in samples {
        let key = (sample.longitude.to_bits(), sample.latitude.to_bits());
        let entry = merged
            .entry(key)
            .or_insert(([sample.longitude, sample.latitude], 0.0, 0));
        entry.1 += sample.value;
        entry.2 += 1;
    }
    merged
        .into_values()
        .map(|(position, sum, count)| (position, sum / count as f64))
        .unzip()
}

/// Estimator over deduplicated samples in the normalised frame.
enum Support<'a> {
    Single(f64),
    /// All samples on one line: values by position along it.
    Line {
        origin: Point,
        direction: Point,
        stations: Vec<(f64, f64)>,
    },
    Linear(&'a Triangulation, &'a [f64]),
    Cubic(CloughTocher<'a>),
}

impl Support<'_> {
    fn estimate(&self, p: Point) -> Option<f64> {
        match self {
            Support::Single(value) => Some(*value),
            Support::Line {
                origin,
                direction,
                stations,
            } => {
                let rel = [p[0] - origin[0], p[1] - origin[1]];
                let offset = (direction[0] * rel[1] - direction[1] * rel[0]).abs();
                if offset > COLLINEAR_TOLERANCE {
                    return None;
                }
                let t = direction[0] * rel[0] + direction[1] * rel[1];
                let (first, last) = (stations.first()?, stations.last()?);
                if t < first.0 - COLLINEAR_TOLERANCE || t > last.0 + COLLINEAR_TOLERANCE {
                    return None;
                }
                let upper = stations.partition_point(|s| s.0 < t).min(stations.len() - 1);
                if upper == 0 {
                    return Some(first.1);
                }
                let (t0, v0) = stations[upper - 1];
                let (t1, v1) = stations[upper];
                if t1 <= t0 {
                    return Some(v1);
                }
                let f = ((t - t0) / (t1 - t0)).clamp(0.0, 1.0);
                Some(v0 + f * (v1 - v0))
            }
            Support::Linear(mesh, values) => {
                let (t, _) = mesh.locate(p)?;
                let tri = mesh.triangles[t];
                let weights = barycentric(
                    p,
                    mesh.points[tri[0]],
                    mesh.points[tri[1]],
                    mesh.points[tri[2]],
                )?;
                Some((0..3).map(|k| weights[k] * values[tri[k]]).sum())
            }
            Support::Cubic(ct) => ct.evaluate(p),
        }
    }
}

/// Unit direction of the line through every point, when they are collinear.
fn collinear_direction(points: &[Point]) -> Option<Point> {
    let origin = *points.first()?;
    let far = points.iter().copied().max_by(|a, b| {
        let da = (a[0] - origin[0]).hypot(a[1] - origin[1]);
        let db = (b[0] - origin[0]).hypot(b[1] - origin[1]);
        da.total_cmp(&db)
    })?;
    let length = (far[0] - origin[0]).hypot(far[1] - origin[1]);
    if length == 0.0 {
        return None;
    }
    let direction = [(far[0] - origin[0]) / length, (far[1] - origin[1]) / length];
    points
        .iter()
        .all(|p| {
            let rel = [p[0] - origin[0], p[1] - origin[1]];
            (direction[0] * rel[1] - direction[1] * rel[0]).abs() <= COLLINEAR_TOLERANCE
        })
        .then_some(direction)
}

/// Builds estimate grids from scattered samples.
pub struct SpatialInterpolator {
    config: GridConfig,
    logger: LogManager,
}

impl SpatialInterpolator {
    pub fn new(config: GridConfig, logger: &LogManager) -> Self {
        Self {
            config,
            logger: logger.child("interpolation"),
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    fn node_count(&self, resolution: GridResolution, lat_span: f64, lon_span: f64, mean_lat: f64) -> Result<usize, GridError> {
        match resolution {
            GridResolution::Cells(n) if n < 2 => Err(GridError::ResolutionTooSmall(n)),
            GridResolution::Cells(n) => Ok(n),
            GridResolution::Spacing(spacing) if !(spacing.is_finite() && spacing > 0.0) => {
                Err(GridError::InvalidSpacing(spacing))
            }
            GridResolution::Spacing(spacing) => {
                let (north_south, east_west) = span_to_meters(lat_span, lon_span, mean_lat);
                let intervals = (north_south.max(east_west) / spacing).ceil();
                let cells = intervals.min(MAX_DERIVED_RESOLUTION as f64) as usize + 1;
                Ok(cells.clamp(2, MAX_DERIVED_RESOLUTION))
            }
        }
    }

    /// Interpolates `samples` over their padded bounding box.
    pub fn build_grid(
        &self,
        samples: &[GeoSample],
        resolution: GridResolution,
        method: InterpolationMethod,
    ) -> Result<InterpolationGrid, GridError> {
        if samples.is_empty() {
            return Err(GridError::NoSamples);
        }
        if let Some(bad) = samples.iter().position(|s| {
            !(s.latitude.is_finite() && s.longitude.is_finite() && s.value.is_finite())
        }) {
            return Err(GridError::NonFiniteSample(bad));
        }
        let padding = self.config.padding;
        if !(padding.is_finite() && padding >= 0.0) {
            return Err(GridError::InvalidPadding(padding));
        }

        let lats: Vec<f64> = samples.iter().map(|s| s.latitude).collect();
        let lons: Vec<f64> = samples.iter().map(|s| s.longitude).collect();
        let (lat_min, lat_max) = StatsHelper::min_max(&lats).ok_or(GridError::NoSamples)?;
        let (lon_min, lon_max) = StatsHelper::min_max(&lons).ok_or(GridError::NoSamples)?;
        let lat_pad = (lat_max - lat_min) * padding;
        let lon_pad = (lon_max - lon_min) * padding;
        let mean_lat = (lat_min + lat_max) / 2.0;

        let n = self.node_count(
            resolution,
            lat_max - lat_min + 2.0 * lat_pad,
            lon_max - lon_min + 2.0 * lon_pad,
            mean_lat,
        )?;
        let latitudes = StatsHelper::linspace(lat_min - lat_pad, lat_max + lat_pad, n);
        let longitudes = StatsHelper::linspace(lon_min - lon_pad, lon_max + lon_pad, n);

        let (positions, values) = merge_duplicates(samples);
        let frame = Frame::fit(&positions);
        let points: Vec<Point> = positions.iter().map(|&p| frame.map(p)).collect();

        let mesh;
        let support = if points.len() == 1 {
            Support::Single(values[0])
        } else if let Some(direction) = collinear_direction(&points) {
            let origin = points[0];
            let mut stations: Vec<(f64, f64)> = points
                .iter()
                .zip(&values)
                .map(|(p, &v)| {
                    (direction[0] * (p[0] - origin[0]) + direction[1] * (p[1] - origin[1]), v)
                })
                .collect();
            stations.sort_by(|a, b| a.0.total_cmp(&b.0));
            Support::Line {
                origin,
                direction,
                stations,
            }
        } else {
            mesh = Triangulation::build(&points);
            match method {
                InterpolationMethod::Linear => Support::Linear(&mesh, &values),
                InterpolationMethod::Cubic => Support::Cubic(CloughTocher::new(&mesh, &values)),
            }
        };

        let grid = Array2::from_shape_fn((n, n), |(row, col)| {
            support.estimate(frame.map([longitudes[col], latitudes[row]]))
        });
        let grid = InterpolationGrid {
            method,
            latitudes,
            longitudes,
            values: grid,
        };
        self.logger.debug(&format!(
            "{:?} grid {}x{} from {} samples ({} distinct positions), {} nodes estimated",
            method,
            n,
            n,
            samples.len(),
            points.len(),
            grid.estimated_count()
        ));
        Ok(grid)
    }

    pub fn bin_by_altitude(&self, samples: &[GeoSample]) -> BTreeMap<i64, Vec<GeoSample>> {
        bin_by_altitude(samples, self.config.altitude_bin_m)
    }

    /// One grid per altitude bin. Each layer interpolates every sample within
    /// one bin size of its centre, so neighbouring layers share samples.
    pub fn build_layers(&self, samples: &[GeoSample]) -> Result<Vec<AltitudeLayer>, GridError> {
        let half_width = f64::from(self.config.altitude_bin_m.max(1));
        self.bin_by_altitude(samples)
            .into_keys()
            .map(|center| {
                let members = altitude_window(samples, center as f64, half_width);
                let grid = self.build_grid(
                    &members,
                    self.config.grid_resolution(),
                    self.config.method,
                )?;
                Ok(AltitudeLayer {
                    altitude_m: center,
                    sample_count: members.len(),
                    grid,
                })
            })
            .collect()
    }
}
