//! Types the driver needs to assemble an acquisition session.

pub use crate::interpolation::{
    AltitudeLayer, GeoSample, GridConfig, GridError, GridResolution, InterpolationGrid,
    InterpolationMethod, SpatialInterpolator,
};
pub use crate::position::{
    open_position_source, BackendKind, Fix, PositionConfig, PositionError, PositionSource,
    AUTOPILOT_AVAILABLE,
};
pub use crate::scanner::{
    BandConfig, BandScanResult, Diagnosis, Instrument, ScanError, ScannerConfig, SpectrumScanner,
    SweepRequest, NO_SIGNAL_DBM,
};
pub use crate::store::{Measurement, MeasurementStore, SessionSummary};
pub use crate::telemetry::{CycleMetrics, FixOutcome, LogManager};
