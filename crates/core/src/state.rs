// Session lifecycle states and per-session options

/// Lifecycle state of a managed playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Engine handle opened, waiting for readiness
    Loading,
    /// Loaded, not yet started (or rewound by a seek before any playback)
    Ready,
    /// Audio is currently playing
    Playing,
    /// Audio is paused (explicitly, at an endpoint, or at end of media)
    Paused,
    /// Load failed; terminal until released
    Failed,
    /// Resources released; terminal
    Released,
}

impl SessionState {
    /// True once the session no longer accepts playback commands.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Released)
    }

    /// True when the engine has reported readiness at some point.
    pub fn is_loaded(self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Playing | SessionState::Paused
        )
    }

    /// Whether `self -> to` is a legal lifecycle transition.
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;

        match (self, to) {
            (Loading, Ready) | (Loading, Failed) | (Loading, Released) => true,

            (Ready, Playing) | (Ready, Paused) | (Ready, Released) => true,

            (Playing, Paused) | (Playing, Released) => true,

            (Paused, Playing) | (Paused, Released) => true,

            (Failed, Released) => true,

            // Re-entering the same state (pause while paused, play while playing)
            (a, b) if a == b && !a.is_terminal() => true,

            _ => false,
        }
    }
}

/// Which loader produced the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// In-memory buffer or on-disk file
    Local,
    /// Network URL, loaded asynchronously
    Remote,
}

/// Flags supplied with a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
    pub looping: bool,
    pub play_in_background: bool,
}

impl SessionOptions {
    pub fn new(looping: bool, play_in_background: bool) -> Self {
        Self {
            looping,
            play_in_background,
        }
    }
}

/// Point-in-time view of a session, safe to hand across threads
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub audio_id: String,
    pub kind: SessionKind,
    pub state: SessionState,
    /// Known once the session is ready
    pub duration_seconds: Option<f64>,
    pub options: SessionOptions,
    /// Commands waiting for readiness
    pub pending_commands: usize,
    /// Whether an endpoint watchdog is currently armed
    pub watchdog_armed: bool,
}
