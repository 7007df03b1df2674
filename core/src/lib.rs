//! Acquisition and interpolation core for the signal-mapping platform.
//!
//! Position backends, the spectrum scanner, the measurement ledger and the
//! spatial interpolator are independent components; the driver wires them
//! into one sequential loop (position, then scan, then append).

pub mod interpolation;
pub mod math;
pub mod position;
pub mod prelude;
pub mod process;
pub mod scanner;
pub mod store;
pub mod telemetry;

pub use prelude::{MeasurementStore, PositionSource, SpatialInterpolator, SpectrumScanner};
