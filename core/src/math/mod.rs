pub mod geo;
pub mod stats;

pub use stats::StatsHelper;
