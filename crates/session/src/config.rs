// Session and control-service configuration

use std::time::Duration;

/// Position report cadence while playing (milliseconds)
pub const POSITION_UPDATE_INTERVAL_MS: u64 = 250;

/// Name of the thread that owns every session
pub const CONTROL_THREAD_NAME: &str = "audiofile-control";

/// Per-session tunables
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Interval between position reports
    pub position_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            position_interval: Duration::from_millis(POSITION_UPDATE_INTERVAL_MS),
        }
    }
}

impl SessionConfig {
    pub fn with_position_interval(mut self, interval: Duration) -> Self {
        self.position_interval = interval;
        self
    }
}

/// Control-service tunables
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub thread_name: String,
    pub session: SessionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            thread_name: CONTROL_THREAD_NAME.to_string(),
            session: SessionConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}
