// Scriptable engine used by the session, coordinator and service tests

use audiofile_core::{
    AudioError, EngineEvent, EngineEventSink, EngineFactory, MediaEngine, MediaSource, Result,
    SessionOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
pub struct ProbeState {
    pub calls: Vec<String>,
    pub playing: bool,
    pub position_ms: u64,
    pub volume: f32,
    pub duration_ms: Option<u64>,
    pub released: usize,
    pub fail_position: bool,
    pub auto_complete_seeks: bool,
}

impl Default for ProbeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            playing: false,
            position_ms: 0,
            volume: 1.0,
            duration_ms: None,
            released: 0,
            fail_position: false,
            auto_complete_seeks: true,
        }
    }
}

/// Test-side view of one fake engine
#[derive(Clone)]
pub struct EngineProbe {
    state: Arc<Mutex<ProbeState>>,
    sink: EngineEventSink,
    pub source: MediaSource,
    pub options: SessionOptions,
}

impl EngineProbe {
    pub fn emit(&self, event: EngineEvent) {
        self.sink.emit(event);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.lock().playing = playing;
    }

    pub fn position_ms(&self) -> u64 {
        self.state.lock().position_ms
    }

    pub fn set_position_ms(&self, position_ms: u64) {
        self.state.lock().position_ms = position_ms;
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().released
    }

    pub fn fail_position(&self, fail: bool) {
        self.state.lock().fail_position = fail;
    }

    pub fn auto_complete_seeks(&self, auto: bool) {
        self.state.lock().auto_complete_seeks = auto;
    }
}

pub struct FakeEngine {
    probe: EngineProbe,
}

impl MediaEngine for FakeEngine {
    fn play(&mut self) -> Result<()> {
        let mut state = self.probe.state.lock();
        state.calls.push("play".to_string());
        state.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut state = self.probe.state.lock();
        state.calls.push("pause".to_string());
        state.playing = false;
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        let auto = {
            let mut state = self.probe.state.lock();
            state.calls.push(format!("seek:{}", position_ms));
            state.position_ms = position_ms;
            state.auto_complete_seeks
        };
        if auto {
            self.probe.emit(EngineEvent::SeekCompleted);
        }
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        let mut state = self.probe.state.lock();
        state.calls.push(format!("volume:{}", volume));
        state.volume = volume;
        Ok(())
    }

    fn current_position_ms(&self) -> Result<u64> {
        let state = self.probe.state.lock();
        if state.fail_position {
            return Err(AudioError::PlaybackError("position unavailable".to_string()));
        }
        Ok(state.position_ms)
    }

    fn duration_ms(&self) -> Option<u64> {
        self.probe.state.lock().duration_ms
    }

    fn is_playing(&self) -> bool {
        self.probe.state.lock().playing
    }

    fn release(&mut self) {
        let mut state = self.probe.state.lock();
        state.calls.push("release".to_string());
        state.released += 1;
        state.playing = false;
    }
}

/// Factory handing out fake engines; clones share the opened probes
#[derive(Clone, Default)]
pub struct FakeEngineFactory {
    probes: Arc<Mutex<Vec<(String, EngineProbe)>>>,
    local_duration_ms: Option<u64>,
    fail_next_open: Arc<Mutex<bool>>,
}

impl FakeEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local sources open already loaded with this duration
    pub fn with_local_duration(mut self, duration_ms: u64) -> Self {
        self.local_duration_ms = Some(duration_ms);
        self
    }

    pub fn fail_next_open(&self) {
        *self.fail_next_open.lock() = true;
    }

    /// Most recently opened engine for `audio_id`
    pub fn probe(&self, audio_id: &str) -> EngineProbe {
        self.probes
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == audio_id)
            .map(|(_, probe)| probe.clone())
            .unwrap_or_else(|| panic!("no engine opened for {}", audio_id))
    }

    pub fn probes_for(&self, audio_id: &str) -> Vec<EngineProbe> {
        self.probes
            .lock()
            .iter()
            .filter(|(id, _)| id == audio_id)
            .map(|(_, probe)| probe.clone())
            .collect()
    }

    pub fn opened(&self) -> usize {
        self.probes.lock().len()
    }
}

impl EngineFactory for FakeEngineFactory {
    fn open(
        &mut self,
        source: MediaSource,
        options: &SessionOptions,
        events: EngineEventSink,
    ) -> Result<Box<dyn MediaEngine>> {
        if std::mem::take(&mut *self.fail_next_open.lock()) {
            return Err(AudioError::LoadError("scripted open failure".to_string()));
        }

        let state = ProbeState {
            duration_ms: if source.is_remote() {
                None
            } else {
                self.local_duration_ms
            },
            ..ProbeState::default()
        };
        let audio_id = events.key().audio_id.clone();
        let probe = EngineProbe {
            state: Arc::new(Mutex::new(state)),
            sink: events,
            source,
            options: *options,
        };
        self.probes.lock().push((audio_id, probe.clone()));
        Ok(Box::new(FakeEngine { probe }))
    }
}
