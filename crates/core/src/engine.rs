// Media engine capability
// Every platform engine implements MediaEngine; sessions depend on nothing else

use crate::error::Result;
use crate::state::SessionOptions;
use crossbeam_channel::Sender;
use std::fmt;
use std::path::PathBuf;

/// Where an engine reads its audio from
#[derive(Clone, PartialEq)]
pub enum MediaSource {
    /// On-disk resource
    File(PathBuf),
    /// In-memory encoded audio
    Bytes(Vec<u8>),
    /// Remote resource fetched by the engine
    Url(String),
}

impl MediaSource {
    pub fn is_remote(&self) -> bool {
        matches!(self, MediaSource::Url(_))
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::File(path) => write!(f, "File({})", path.display()),
            MediaSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            MediaSource::Url(url) => write!(f, "Url({})", url),
        }
    }
}

/// Asynchronous notifications from an engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Media is loaded and the duration is known
    Ready { duration_ms: u64 },
    /// Media could not be loaded
    LoadFailed { message: String },
    /// Playback reached the end of the media (never sent while looping)
    Ended,
    /// One previously requested seek finished
    SeekCompleted,
    /// Decode or output fault after load
    Error { message: String },
}

/// Non-owning reference to a session: audio id plus the creation serial
/// that tells a reloaded id apart from the session it replaced
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub audio_id: String,
    pub serial: u64,
}

impl SessionKey {
    pub fn new(audio_id: impl Into<String>, serial: u64) -> Self {
        Self {
            audio_id: audio_id.into(),
            serial,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.audio_id, self.serial)
    }
}

/// Handle an engine uses to post events back onto the control thread
#[derive(Clone)]
pub struct EngineEventSink {
    key: SessionKey,
    tx: Sender<(SessionKey, EngineEvent)>,
}

impl EngineEventSink {
    pub fn new(key: SessionKey, tx: Sender<(SessionKey, EngineEvent)>) -> Self {
        Self { key, tx }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Safe to call from any thread, including audio callbacks
    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send((self.key.clone(), event)).is_err() {
            log::debug!("[{}] control thread gone, dropping engine event", self.key);
        }
    }
}

/// Per-session engine handle
///
/// Calls arrive on the control thread only. Positions are milliseconds.
/// After `seek` returns, `current_position_ms` reflects the requested target
/// even though `SeekCompleted` is delivered later; exactly one
/// `SeekCompleted` follows every successful `seek`.
pub trait MediaEngine: Send {
    /// Start or resume playback
    fn play(&mut self) -> Result<()>;

    /// Pause playback, keeping the position
    fn pause(&mut self) -> Result<()>;

    /// Request a seek; completion is reported asynchronously
    fn seek(&mut self, position_ms: u64) -> Result<()>;

    /// Set volume (0.0 - 1.0); accepted before readiness
    fn set_volume(&mut self, volume: f32) -> Result<()>;

    /// Current playback position
    fn current_position_ms(&self) -> Result<u64>;

    /// Duration, once known
    fn duration_ms(&self) -> Option<u64>;

    /// Whether audio is actually being rendered
    fn is_playing(&self) -> bool;

    /// Stop playback and free every resource; must tolerate repeated calls
    fn release(&mut self);
}

/// Opens engine handles for new sessions
pub trait EngineFactory: Send {
    /// Open `source`. Runs on the control thread, so decoding and device
    /// setup belong on a loader thread. An engine that already knows its
    /// duration on return is ready; otherwise readiness arrives as
    /// `EngineEvent::Ready` or `EngineEvent::LoadFailed` through `events`.
    fn open(
        &mut self,
        source: MediaSource,
        options: &SessionOptions,
        events: EngineEventSink,
    ) -> Result<Box<dyn MediaEngine>>;
}
