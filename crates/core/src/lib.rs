// Core types and traits for audiofile sessions

pub mod analytics;
pub mod callback;
pub mod command;
pub mod engine;
pub mod error;
pub mod state;

// Re-export commonly used types
pub use analytics::{AnalyticsRecord, AnalyticsSink, AnalyticsValue};
pub use callback::{CallbackManager, HostCallback, SessionEvent, TestCallback};
pub use command::{Endpoint, PendingCommand, PendingQueue, PLAY_TO_END};
pub use engine::{EngineEvent, EngineEventSink, EngineFactory, MediaEngine, MediaSource, SessionKey};
pub use error::{AudioError, Result};
pub use state::{SessionKind, SessionOptions, SessionSnapshot, SessionState};

/// Milliseconds reported by engines to the seconds used on the host surface.
pub fn ms_to_seconds(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Host seconds to engine milliseconds; negative positions clamp to zero.
pub fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_nan() || seconds <= 0.0 {
        0
    } else {
        (seconds * 1000.0) as u64
    }
}
