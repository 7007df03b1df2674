use log::{debug, error, info, warn};

/// Logging handle passed into every component constructor.
///
/// Records are emitted through the `log` facade under the handle's target, so
/// the driver decides where they end up.
#[derive(Debug, Clone)]
pub struct LogManager {
    target: String,
}

impl LogManager {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
        }
    }

    /// Handle for a sub-component, e.g. `position` -> `position.serial`.
    pub fn child(&self, name: &str) -> Self {
        Self {
            target: format!("{}.{}", self.target, name),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn debug(&self, message: &str) {
        debug!(target: self.target.as_str(), "{}", message);
    }

    pub fn record(&self, message: &str) {
        info!(target: self.target.as_str(), "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(target: self.target.as_str(), "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(target: self.target.as_str(), "{}", message);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new("sigmap")
    }
}
