// Audio id -> session map

use crate::session::ManagedSession;
use audiofile_core::SessionKey;
use std::collections::HashMap;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, ManagedSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, returning the one previously registered under the
    /// same audio id.
    pub fn insert(&mut self, session: ManagedSession) -> Option<ManagedSession> {
        self.sessions.insert(session.audio_id().to_string(), session)
    }

    pub fn get(&self, audio_id: &str) -> Option<&ManagedSession> {
        self.sessions.get(audio_id)
    }

    pub fn get_mut(&mut self, audio_id: &str) -> Option<&mut ManagedSession> {
        self.sessions.get_mut(audio_id)
    }

    /// Resolve a timer or engine key; a stale serial resolves to nothing.
    pub fn resolve_mut(&mut self, key: &SessionKey) -> Option<&mut ManagedSession> {
        self.sessions
            .get_mut(&key.audio_id)
            .filter(|session| session.key().serial == key.serial)
    }

    pub fn remove(&mut self, audio_id: &str) -> Option<ManagedSession> {
        self.sessions.remove(audio_id)
    }

    pub fn contains(&self, audio_id: &str) -> bool {
        self.sessions.contains_key(audio_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn drain(&mut self) -> Vec<ManagedSession> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
