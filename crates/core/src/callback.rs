// Host-facing session events and callback fan-out
// Callbacks run on the control thread and must not block it

use parking_lot::Mutex;
use std::sync::Arc;

/// Events emitted to the host, one vocabulary for every session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Engine reported readiness; duration in seconds
    Loaded {
        audio_id: String,
        duration_seconds: f64,
    },

    /// Remote load failed
    LoadFailed { audio_id: String },

    /// Periodic position report while playing
    Position {
        audio_id: String,
        position_seconds: f64,
    },

    /// Natural end of media or endpoint reached
    Completion { audio_id: String },

    /// A host-issued seek finished
    SeekComplete { audio_id: String },
}

impl SessionEvent {
    pub fn audio_id(&self) -> &str {
        match self {
            SessionEvent::Loaded { audio_id, .. }
            | SessionEvent::LoadFailed { audio_id }
            | SessionEvent::Position { audio_id, .. }
            | SessionEvent::Completion { audio_id }
            | SessionEvent::SeekComplete { audio_id } => audio_id,
        }
    }
}

/// Host callback trait
/// Implementations should be lightweight and non-blocking
pub trait HostCallback: Send + Sync {
    /// Called on the control thread for every session event
    fn on_event(&self, event: SessionEvent);
}

/// Callback manager for handling multiple host callbacks
#[derive(Clone, Default)]
pub struct CallbackManager {
    callbacks: Arc<Mutex<Vec<Arc<dyn HostCallback>>>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&self, callback: Arc<dyn HostCallback>) {
        self.callbacks.lock().push(callback);
    }

    pub fn clear_callbacks(&self) {
        self.callbacks.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatch(&self, event: SessionEvent) {
        // Snapshot so a callback may register another without deadlocking
        let callbacks: Vec<_> = self.callbacks.lock().iter().cloned().collect();
        if callbacks.is_empty() {
            log::trace!("[{}] no callback registered for {:?}", event.audio_id(), event);
            return;
        }
        for callback in callbacks {
            callback.on_event(event.clone());
        }
    }
}

/// Callback that records every event, for tests and diagnostics
#[derive(Default)]
pub struct TestCallback {
    events: Mutex<Vec<SessionEvent>>,
}

impl TestCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, audio_id: &str) -> Vec<SessionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.audio_id() == audio_id)
            .cloned()
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl HostCallback for TestCallback {
    fn on_event(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}
