/// Default number of parameter positions tracked per prepared statement.
pub const DEFAULT_MAX_TRACKED_PARAMS: usize = 30;

/// Configuration for statement monitoring.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Highest 1-based parameter position recorded in reports. Bindings past
    /// this position are still forwarded to the database but not captured.
    pub max_tracked_params: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_tracked_params: DEFAULT_MAX_TRACKED_PARAMS,
        }
    }
}

impl MonitorConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the highest parameter position recorded in reports.
    ///
    /// `0` disables parameter capture entirely.
    pub fn with_max_tracked_params(mut self, max: usize) -> Self {
        self.max_tracked_params = max;
        self
    }
}
