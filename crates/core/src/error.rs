// Error handling for audio sessions

use std::fmt;

/// Failures surfaced by sessions, engines and the control service
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Output stream could not be built
    InitializationError(String),

    /// Source could not be opened or loaded
    LoadError(String),

    /// Output stream refused to start, or the engine lost its position
    PlaybackError(String),

    /// Engine call made before load or after release
    InvalidState(String),

    /// Caller passed an out-of-range or malformed argument
    InvalidArgument(String),

    /// Container, codec or device sample format not handled
    UnsupportedFormat(String),

    /// No usable output device
    DeviceError(String),

    /// Control, loader or output thread unavailable
    ThreadError(String),

    /// Codec failure while decoding packets
    DecodingError(String),

    /// Download failed or was rejected
    NetworkError(String),

    /// No session is registered under the given audio id
    SessionNotFound(String),
}

impl AudioError {
    /// True for lookups of unknown or already released audio ids.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AudioError::SessionNotFound(_))
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AudioError::InitializationError(msg) => write!(f, "Initialization error: {}", msg),
            AudioError::LoadError(msg) => write!(f, "Load error: {}", msg),
            AudioError::PlaybackError(msg) => write!(f, "Playback error: {}", msg),
            AudioError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            AudioError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            AudioError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            AudioError::DeviceError(msg) => write!(f, "Device error: {}", msg),
            AudioError::ThreadError(msg) => write!(f, "Thread error: {}", msg),
            AudioError::DecodingError(msg) => write!(f, "Decoding error: {}", msg),
            AudioError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            AudioError::SessionNotFound(id) => write!(f, "No session for audio id '{}'", id),
        }
    }
}

impl std::error::Error for AudioError {}

pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = AudioError::SessionNotFound("intro".to_string());
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "No session for audio id 'intro'");
    }

    #[test]
    fn test_other_errors_are_not_lookups() {
        let err = AudioError::InvalidArgument("volume 2 outside [0, 1]".to_string());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Invalid argument: volume 2 outside [0, 1]");
    }
}
