// Single-threaded coordinator: registry, timers and engine mailbox
//
// Every command, engine event and timer fire goes through `&mut self`; the
// owner (normally the control thread in `service`) is the only caller.

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::registry::SessionRegistry;
use crate::scheduler::{Scheduler, TimerKind};
use crate::session::{ManagedSession, SessionContext};
use audiofile_core::{
    AnalyticsRecord, AnalyticsSink, AudioError, CallbackManager, Endpoint, EngineEvent,
    EngineEventSink, EngineFactory, MediaSource, Result, SessionEvent, SessionKey, SessionKind,
    SessionOptions, SessionSnapshot,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

pub struct Coordinator {
    factory: Box<dyn EngineFactory>,
    registry: SessionRegistry,
    scheduler: Scheduler,
    callbacks: CallbackManager,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    events_tx: Sender<(SessionKey, EngineEvent)>,
    events_rx: Receiver<(SessionKey, EngineEvent)>,
    next_serial: u64,
}

impl Coordinator {
    pub fn new(factory: Box<dyn EngineFactory>, config: SessionConfig) -> Self {
        Self::with_clock(factory, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        factory: Box<dyn EngineFactory>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            factory,
            registry: SessionRegistry::new(),
            scheduler: Scheduler::new(),
            callbacks: CallbackManager::new(),
            analytics: None,
            config,
            clock,
            events_tx,
            events_rx,
            next_serial: 1,
        }
    }

    pub fn with_analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(sink);
        self
    }

    pub fn set_analytics(&mut self, sink: Option<Arc<dyn AnalyticsSink>>) {
        self.analytics = sink;
    }

    /// Host callbacks; clones share the same list
    pub fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Mailbox the engines post to; drained by `process_engine_events`
    pub fn engine_events(&self) -> Receiver<(SessionKey, EngineEvent)> {
        self.events_rx.clone()
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Open a local file or in-memory resource. Returns the duration in
    /// seconds when the engine knew it on open.
    pub fn load_local(
        &mut self,
        audio_id: &str,
        source: MediaSource,
        options: SessionOptions,
    ) -> Result<Option<f64>> {
        if source.is_remote() {
            return Err(AudioError::InvalidArgument(format!(
                "{:?} is not a local source",
                source
            )));
        }
        self.open_session(audio_id, source, SessionKind::Local, options)
    }

    /// Start an asynchronous load from `url`; readiness arrives as an event.
    pub fn load_remote(&mut self, audio_id: &str, url: &str, options: SessionOptions) -> Result<()> {
        if url.trim().is_empty() {
            return Err(AudioError::InvalidArgument("empty url".to_string()));
        }
        self.open_session(
            audio_id,
            MediaSource::Url(url.to_string()),
            SessionKind::Remote,
            options,
        )
        .map(|_| ())
    }

    fn open_session(
        &mut self,
        audio_id: &str,
        source: MediaSource,
        kind: SessionKind,
        options: SessionOptions,
    ) -> Result<Option<f64>> {
        if audio_id.is_empty() {
            return Err(AudioError::InvalidArgument("empty audio id".to_string()));
        }

        // A reload replaces the previous session outright
        if let Some(mut previous) = self.registry.remove(audio_id) {
            log::info!("[{}] replacing existing session {}", audio_id, previous.key());
            previous.teardown();
            self.scheduler.purge(previous.key());
        }

        let key = SessionKey::new(audio_id, self.next_serial);
        self.next_serial += 1;

        log::info!("[{}] loading {:?} ({:?})", audio_id, source, kind);
        let sink = EngineEventSink::new(key.clone(), self.events_tx.clone());
        let engine = match self.factory.open(source, &options, sink) {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("[{}] failed to open engine: {}", audio_id, e);
                self.callbacks.dispatch(SessionEvent::LoadFailed {
                    audio_id: audio_id.to_string(),
                });
                return Err(e);
            }
        };

        let mut ctx = SessionContext {
            scheduler: &mut self.scheduler,
            events: &self.callbacks,
            config: &self.config,
            now: self.clock.now(),
        };
        let session = ManagedSession::new(key, kind, options, engine, &mut ctx);
        let duration = session.duration_seconds();
        self.registry.insert(session);
        Ok(duration)
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    pub fn play(&mut self, audio_id: &str, from_start: bool, endpoint: Endpoint) -> Result<()> {
        if let Endpoint::At(seconds) = endpoint {
            if !seconds.is_finite() {
                return Err(AudioError::InvalidArgument(format!(
                    "endpoint {} is not finite",
                    seconds
                )));
            }
        }
        self.with_session(audio_id, |session, ctx| session.play(from_start, endpoint, ctx))
    }

    pub fn pause(&mut self, audio_id: &str) -> Result<()> {
        self.with_session(audio_id, |session, ctx| session.pause(ctx))
    }

    pub fn seek(&mut self, audio_id: &str, position_seconds: f64) -> Result<()> {
        if !position_seconds.is_finite() {
            return Err(AudioError::InvalidArgument(format!(
                "seek position {} is not finite",
                position_seconds
            )));
        }
        self.with_session(audio_id, |session, ctx| session.seek(position_seconds, ctx))
    }

    pub fn set_volume(&mut self, audio_id: &str, volume: f32) -> Result<()> {
        if !volume.is_finite() || !(0.0..=1.0).contains(&volume) {
            return Err(AudioError::InvalidArgument(format!(
                "volume {} outside [0, 1]",
                volume
            )));
        }
        self.with_session(audio_id, |session, _| session.set_volume(volume))
    }

    pub fn release(&mut self, audio_id: &str) -> Result<()> {
        self.with_session(audio_id, |session, ctx| session.release(ctx))
    }

    /// Forward the session to the analytics sink. Returns whether a report
    /// was made.
    pub fn report_analytics(&mut self, audio_id: &str, record: &AnalyticsRecord) -> Result<bool> {
        let Some(sink) = self.analytics.clone() else {
            log::debug!("[{}] no analytics sink configured", audio_id);
            return Ok(false);
        };
        self.with_session(audio_id, |session, _| {
            session.report_analytics(sink.as_ref(), record)
        })
    }

    pub fn snapshot(&self, audio_id: &str) -> Result<SessionSnapshot> {
        self.registry
            .get(audio_id)
            .map(ManagedSession::snapshot)
            .ok_or_else(|| AudioError::SessionNotFound(audio_id.to_string()))
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    fn with_session<R>(
        &mut self,
        audio_id: &str,
        f: impl FnOnce(&mut ManagedSession, &mut SessionContext) -> R,
    ) -> Result<R> {
        let now = self.clock.now();
        let session = self
            .registry
            .get_mut(audio_id)
            .ok_or_else(|| AudioError::SessionNotFound(audio_id.to_string()))?;

        let mut ctx = SessionContext {
            scheduler: &mut self.scheduler,
            events: &self.callbacks,
            config: &self.config,
            now,
        };
        let result = f(session, &mut ctx);
        let released = session.is_released();

        if released {
            self.reap(audio_id);
        }
        Ok(result)
    }

    fn reap(&mut self, audio_id: &str) {
        if let Some(session) = self.registry.remove(audio_id) {
            self.scheduler.purge(session.key());
            log::debug!("[{}] session removed from registry", audio_id);
        }
    }

    // ---------------------------------------------------------------------
    // Engine events and timers
    // ---------------------------------------------------------------------

    pub fn handle_engine_event(&mut self, key: SessionKey, event: EngineEvent) {
        let now = self.clock.now();
        let Some(session) = self.registry.resolve_mut(&key) else {
            log::debug!("[{}] event {:?} for stale session dropped", key, event);
            return;
        };

        let mut ctx = SessionContext {
            scheduler: &mut self.scheduler,
            events: &self.callbacks,
            config: &self.config,
            now,
        };
        session.on_engine_event(event, &mut ctx);
        let released = session.is_released();

        if released {
            self.reap(&key.audio_id);
        }
    }

    /// Drain every engine event already in the mailbox. Returns how many were
    /// handled.
    pub fn process_engine_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok((key, event)) = self.events_rx.try_recv() {
            self.handle_engine_event(key, event);
            handled += 1;
        }
        handled
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Fire every timer due by the clock's current time.
    pub fn fire_due_timers(&mut self) -> usize {
        let now = self.clock.now();
        let due = self.scheduler.pop_due(now);
        let fired = due.len();

        for timer in due {
            let Some(session) = self.registry.resolve_mut(&timer.key) else {
                log::trace!("[{}] timer for stale session skipped", timer.key);
                continue;
            };

            // Follow-up timers are anchored on the fire time, not the deadline
            let mut ctx = SessionContext {
                scheduler: &mut self.scheduler,
                events: &self.callbacks,
                config: &self.config,
                now,
            };
            match timer.kind {
                TimerKind::PositionTick => {
                    session.on_position_tick(&mut ctx);
                }
                TimerKind::Watchdog { token } => session.on_watchdog(token, &mut ctx),
            }
        }
        fired
    }

    /// Release every session (process teardown).
    pub fn shutdown(&mut self) {
        let sessions = self.registry.drain();
        if !sessions.is_empty() {
            log::info!("releasing {} sessions on shutdown", sessions.len());
        }
        for mut session in sessions {
            session.teardown();
        }
        self.scheduler.clear();
        while self.events_rx.try_recv().is_ok() {}
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::FakeEngineFactory;
    use audiofile_core::{AnalyticsValue, MediaEngine, SessionState, TestCallback};
    use parking_lot::Mutex;

    struct Fixture {
        coordinator: Coordinator,
        factory: FakeEngineFactory,
        clock: ManualClock,
        events: Arc<TestCallback>,
    }

    impl Fixture {
        fn new(factory: FakeEngineFactory) -> Self {
            let clock = ManualClock::new();
            let coordinator = Coordinator::with_clock(
                Box::new(factory.clone()),
                SessionConfig::default(),
                Arc::new(clock.clone()),
            );
            let events = Arc::new(TestCallback::new());
            coordinator.callbacks().add_callback(events.clone());
            Self {
                coordinator,
                factory,
                clock,
                events,
            }
        }

        /// Advance the clock in 50 ms steps, firing timers and pumping
        /// engine events as the control thread would.
        fn run_for(&mut self, ms: u64) {
            let mut elapsed = 0;
            while elapsed < ms {
                let step = 50.min(ms - elapsed);
                self.clock.advance_ms(step);
                elapsed += step;
                self.coordinator.fire_due_timers();
                self.coordinator.process_engine_events();
            }
        }

        fn completions(&self, id: &str) -> usize {
            self.events
                .count(|e| matches!(e, SessionEvent::Completion { audio_id } if audio_id == id))
        }

        fn positions(&self, id: &str) -> usize {
            self.events
                .count(|e| matches!(e, SessionEvent::Position { audio_id, .. } if audio_id == id))
        }
    }

    fn local_fixture(duration_ms: u64) -> Fixture {
        Fixture::new(FakeEngineFactory::new().with_local_duration(duration_ms))
    }

    fn bytes() -> MediaSource {
        MediaSource::Bytes(vec![0; 16])
    }

    const URL: &str = "https://example.com/track.mp3";

    #[test]
    fn test_local_load_reports_duration() {
        let mut f = local_fixture(10_000);
        let duration = f
            .coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();

        assert_eq!(duration, Some(10.0));
        assert_eq!(f.coordinator.snapshot("a").unwrap().state, SessionState::Ready);
        assert_eq!(
            f.events.get_events(),
            vec![SessionEvent::Loaded {
                audio_id: "a".to_string(),
                duration_seconds: 10.0
            }]
        );
    }

    #[test]
    fn test_load_local_rejects_url() {
        let mut f = local_fixture(1_000);
        let result = f.coordinator.load_local(
            "a",
            MediaSource::Url(URL.to_string()),
            SessionOptions::default(),
        );
        assert!(matches!(result, Err(AudioError::InvalidArgument(_))));
        assert_eq!(f.factory.opened(), 0);
    }

    #[test]
    fn test_remote_commands_replay_in_fifo_order() {
        let mut f = Fixture::new(FakeEngineFactory::new());
        f.coordinator
            .load_remote("r", URL, SessionOptions::default())
            .unwrap();

        f.coordinator.seek("r", 2.5).unwrap();
        f.coordinator.play("r", false, Endpoint::PlayToEnd).unwrap();
        f.coordinator.pause("r").unwrap();
        f.coordinator.seek("r", 1.0).unwrap();

        let probe = f.factory.probe("r");
        assert!(probe.calls().is_empty());
        assert_eq!(f.coordinator.snapshot("r").unwrap().pending_commands, 4);

        probe.emit(EngineEvent::Ready { duration_ms: 60_000 });
        f.coordinator.process_engine_events();

        assert_eq!(probe.calls(), vec!["seek:2500", "play", "pause", "seek:1000"]);
        assert_eq!(f.coordinator.snapshot("r").unwrap().state, SessionState::Paused);
        assert_eq!(
            f.events.events_for("r"),
            vec![
                SessionEvent::Loaded {
                    audio_id: "r".to_string(),
                    duration_seconds: 60.0
                },
                SessionEvent::SeekComplete {
                    audio_id: "r".to_string()
                },
                SessionEvent::SeekComplete {
                    audio_id: "r".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_loaded_and_load_failed_are_exclusive() {
        let mut f = Fixture::new(FakeEngineFactory::new());
        f.coordinator
            .load_remote("ok", URL, SessionOptions::default())
            .unwrap();
        f.coordinator
            .load_remote("bad", URL, SessionOptions::default())
            .unwrap();

        let ok = f.factory.probe("ok");
        let bad = f.factory.probe("bad");
        ok.emit(EngineEvent::Ready { duration_ms: 1_000 });
        ok.emit(EngineEvent::LoadFailed {
            message: "late".to_string(),
        });
        ok.emit(EngineEvent::Ready { duration_ms: 1_000 });
        bad.emit(EngineEvent::LoadFailed {
            message: "dns".to_string(),
        });
        bad.emit(EngineEvent::Ready { duration_ms: 1_000 });
        bad.emit(EngineEvent::LoadFailed {
            message: "dns".to_string(),
        });
        f.coordinator.process_engine_events();

        assert_eq!(
            f.events.events_for("ok"),
            vec![SessionEvent::Loaded {
                audio_id: "ok".to_string(),
                duration_seconds: 1.0
            }]
        );
        assert_eq!(
            f.events.events_for("bad"),
            vec![SessionEvent::LoadFailed {
                audio_id: "bad".to_string()
            }]
        );
        // Failed sessions stay registered until released
        assert_eq!(f.coordinator.snapshot("bad").unwrap().state, SessionState::Failed);
    }

    #[test]
    fn test_load_failure_drops_queued_commands() {
        let mut f = Fixture::new(FakeEngineFactory::new());
        f.coordinator
            .load_remote("r", URL, SessionOptions::default())
            .unwrap();
        f.coordinator.play("r", true, Endpoint::PlayToEnd).unwrap();
        f.coordinator.release("r").unwrap();

        let probe = f.factory.probe("r");
        probe.emit(EngineEvent::LoadFailed {
            message: "timeout".to_string(),
        });
        f.coordinator.process_engine_events();

        assert!(probe.calls().is_empty());
        assert_eq!(f.coordinator.session_ids(), vec!["r".to_string()]);

        // Explicit release still works after failure
        f.coordinator.release("r").unwrap();
        assert_eq!(probe.release_count(), 1);
        assert!(matches!(
            f.coordinator.snapshot("r"),
            Err(AudioError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_release_before_ready_is_queued() {
        let mut f = Fixture::new(FakeEngineFactory::new());
        f.coordinator
            .load_remote("r", URL, SessionOptions::default())
            .unwrap();
        f.coordinator.play("r", false, Endpoint::PlayToEnd).unwrap();
        f.coordinator.release("r").unwrap();
        f.coordinator.pause("r").unwrap();

        let probe = f.factory.probe("r");
        probe.emit(EngineEvent::Ready { duration_ms: 5_000 });
        f.coordinator.process_engine_events();

        assert_eq!(probe.calls(), vec!["play", "release"]);
        assert_eq!(f.coordinator.session_count(), 0);
        assert!(f.coordinator.next_deadline().is_none());
    }

    #[test]
    fn test_play_to_end_then_release_leaves_no_timers() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator.play("a", true, Endpoint::PlayToEnd).unwrap();

        let probe = f.factory.probe("a");
        f.run_for(600);
        assert!(f.positions("a") >= 2);

        f.coordinator.release("a").unwrap();
        let before = f.positions("a");
        f.run_for(2_000);

        assert_eq!(f.positions("a"), before);
        assert!(f.coordinator.next_deadline().is_none());
        assert_eq!(probe.release_count(), 1);
        assert!(matches!(f.coordinator.play("a", false, Endpoint::PlayToEnd), Err(e) if e.is_not_found()));
    }

    #[test]
    fn test_endpoint_pauses_and_completes_once() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator.play("a", true, Endpoint::At(3.0)).unwrap();

        let probe = f.factory.probe("a");
        assert!(f.coordinator.snapshot("a").unwrap().watchdog_armed);

        f.run_for(2_950);
        assert_eq!(f.completions("a"), 0);
        assert_eq!(f.coordinator.snapshot("a").unwrap().state, SessionState::Playing);

        f.run_for(50);
        assert_eq!(f.completions("a"), 1);
        assert_eq!(f.coordinator.snapshot("a").unwrap().state, SessionState::Paused);
        assert!(!probe.is_playing());

        f.run_for(5_000);
        assert_eq!(f.completions("a"), 1);
    }

    #[test]
    fn test_non_finite_endpoint_is_rejected() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        let probe = f.factory.probe("a");
        probe.clear_calls();

        for seconds in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                f.coordinator.play("a", false, Endpoint::At(seconds)),
                Err(AudioError::InvalidArgument(_))
            ));
        }
        assert!(probe.calls().is_empty());
        assert!(!f.coordinator.snapshot("a").unwrap().watchdog_armed);
        assert!(matches!(
            f.coordinator.play("missing", false, Endpoint::At(f64::NAN)),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_decoding_local_session_does_not_hold_up_others() {
        let mut f = Fixture::new(FakeEngineFactory::new());
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.factory
            .probe("a")
            .emit(EngineEvent::Ready { duration_ms: 10_000 });
        f.coordinator.process_engine_events();
        f.coordinator.play("a", false, Endpoint::At(0.1)).unwrap();

        let duration = f
            .coordinator
            .load_local("big", bytes(), SessionOptions::default())
            .unwrap();
        assert_eq!(duration, None);
        f.coordinator.play("big", true, Endpoint::PlayToEnd).unwrap();
        assert_eq!(f.coordinator.snapshot("big").unwrap().state, SessionState::Loading);

        f.run_for(100);
        assert_eq!(f.completions("a"), 1);
        assert_eq!(f.coordinator.snapshot("a").unwrap().state, SessionState::Paused);
        assert_eq!(f.coordinator.snapshot("big").unwrap().pending_commands, 1);

        f.factory
            .probe("big")
            .emit(EngineEvent::Ready { duration_ms: 600_000 });
        f.run_for(50);
        assert_eq!(f.coordinator.snapshot("big").unwrap().state, SessionState::Playing);
        assert_eq!(f.factory.probe("big").calls(), vec!["seek:0", "play"]);
        assert!(f.events.events_for("big").contains(&SessionEvent::Loaded {
            audio_id: "big".to_string(),
            duration_seconds: 600.0,
        }));
    }

    #[test]
    fn test_play_past_endpoint_is_noop() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator.seek("a", 5.0).unwrap();
        f.coordinator.process_engine_events();
        f.events.clear();

        let probe = f.factory.probe("a");
        probe.clear_calls();
        f.coordinator.play("a", false, Endpoint::At(2.0)).unwrap();
        f.run_for(1_000);

        assert!(probe.calls().is_empty());
        assert!(f.events.get_events().is_empty());
        assert_eq!(f.coordinator.snapshot("a").unwrap().state, SessionState::Ready);
        assert!(!f.coordinator.snapshot("a").unwrap().watchdog_armed);
    }

    #[test]
    fn test_pause_cancels_watchdog() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator.play("a", false, Endpoint::At(1.0)).unwrap();
        f.run_for(500);
        f.coordinator.pause("a").unwrap();
        f.run_for(2_000);

        assert_eq!(f.completions("a"), 0);
        assert_eq!(f.coordinator.snapshot("a").unwrap().state, SessionState::Paused);
    }

    #[test]
    fn test_seek_completions_in_call_order() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator
            .load_local("b", bytes(), SessionOptions::default())
            .unwrap();
        f.factory.probe("a").auto_complete_seeks(false);
        f.events.clear();

        // Second seek issued before the first completes
        f.coordinator.seek("a", 1.0).unwrap();
        f.coordinator.seek("a", 2.0).unwrap();
        f.coordinator.seek("b", 3.0).unwrap();
        let probe = f.factory.probe("a");
        probe.emit(EngineEvent::SeekCompleted);
        probe.emit(EngineEvent::SeekCompleted);
        f.coordinator.process_engine_events();

        assert_eq!(
            f.events.get_events(),
            vec![
                SessionEvent::SeekComplete {
                    audio_id: "b".to_string()
                },
                SessionEvent::SeekComplete {
                    audio_id: "a".to_string()
                },
                SessionEvent::SeekComplete {
                    audio_id: "a".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_natural_end_rewinds_and_completes() {
        let mut f = local_fixture(4_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator.play("a", false, Endpoint::PlayToEnd).unwrap();
        let probe = f.factory.probe("a");
        probe.set_position_ms(4_000);
        probe.emit(EngineEvent::Ended);
        f.coordinator.process_engine_events();

        assert_eq!(f.completions("a"), 1);
        assert_eq!(probe.position_ms(), 0);
        assert_eq!(f.coordinator.snapshot("a").unwrap().state, SessionState::Paused);
        // The rewind is not reported as a host seek
        assert_eq!(
            f.events.count(|e| matches!(e, SessionEvent::SeekComplete { .. })),
            0
        );
    }

    #[test]
    fn test_position_reported_only_while_playing() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.run_for(1_000);
        assert_eq!(f.positions("a"), 0);

        f.coordinator.play("a", false, Endpoint::PlayToEnd).unwrap();
        let probe = f.factory.probe("a");
        probe.set_position_ms(1_500);
        f.run_for(1_000);
        assert_eq!(f.positions("a"), 4);
        assert!(f.events.get_events().contains(&SessionEvent::Position {
            audio_id: "a".to_string(),
            position_seconds: 1.5
        }));

        f.coordinator.pause("a").unwrap();
        f.run_for(1_000);
        assert_eq!(f.positions("a"), 4);
    }

    #[test]
    fn test_position_error_keeps_reporter_alive() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator.play("a", false, Endpoint::PlayToEnd).unwrap();
        let probe = f.factory.probe("a");

        probe.fail_position(true);
        f.run_for(500);
        assert_eq!(f.positions("a"), 0);

        probe.fail_position(false);
        f.run_for(500);
        assert_eq!(f.positions("a"), 2);
    }

    #[test]
    fn test_set_volume_keeps_state_and_cadence() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator.play("a", false, Endpoint::PlayToEnd).unwrap();

        for step in 0..=10 {
            f.coordinator.set_volume("a", step as f32 / 10.0).unwrap();
        }
        f.run_for(1_000);

        assert_eq!(f.coordinator.snapshot("a").unwrap().state, SessionState::Playing);
        assert_eq!(f.positions("a"), 4);
        assert_eq!(f.factory.probe("a").volume(), 1.0);
    }

    #[test]
    fn test_set_volume_validation_and_pre_ready_forwarding() {
        let mut f = Fixture::new(FakeEngineFactory::new());
        f.coordinator
            .load_remote("r", URL, SessionOptions::default())
            .unwrap();

        assert!(matches!(
            f.coordinator.set_volume("r", 1.5),
            Err(AudioError::InvalidArgument(_))
        ));
        assert!(f.coordinator.set_volume("r", f32::NAN).is_err());

        f.coordinator.set_volume("r", 0.25).unwrap();
        assert_eq!(f.factory.probe("r").calls(), vec!["volume:0.25"]);
        assert_eq!(f.coordinator.snapshot("r").unwrap().pending_commands, 0);
    }

    #[test]
    fn test_reload_replaces_session_and_ignores_stale_events() {
        let mut f = Fixture::new(FakeEngineFactory::new());
        f.coordinator
            .load_remote("r", URL, SessionOptions::default())
            .unwrap();
        let first = f.factory.probe("r");
        f.coordinator
            .load_remote("r", URL, SessionOptions::new(true, false))
            .unwrap();
        let second = f.factory.probe("r");

        assert_eq!(first.release_count(), 1);
        assert_eq!(f.factory.probes_for("r").len(), 2);

        first.emit(EngineEvent::Ready { duration_ms: 1_000 });
        f.coordinator.process_engine_events();
        assert!(f.events.get_events().is_empty());
        assert_eq!(f.coordinator.snapshot("r").unwrap().state, SessionState::Loading);

        second.emit(EngineEvent::Ready { duration_ms: 2_000 });
        f.coordinator.process_engine_events();
        let snapshot = f.coordinator.snapshot("r").unwrap();
        assert_eq!(snapshot.state, SessionState::Ready);
        assert!(snapshot.options.looping);
        assert!(second.options.looping);
    }

    #[test]
    fn test_open_failure_reports_and_registers_nothing() {
        let mut f = Fixture::new(FakeEngineFactory::new());
        f.factory.fail_next_open();

        let result = f.coordinator.load_remote("r", URL, SessionOptions::default());
        assert!(matches!(result, Err(AudioError::LoadError(_))));
        assert_eq!(f.coordinator.session_count(), 0);
        assert_eq!(
            f.events.get_events(),
            vec![SessionEvent::LoadFailed {
                audio_id: "r".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let mut f = local_fixture(1_000);
        assert!(f.coordinator.pause("missing").unwrap_err().is_not_found());
        assert!(f.coordinator.seek("missing", 1.0).unwrap_err().is_not_found());
        assert!(f.coordinator.release("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_post_load_error_is_silent() {
        let mut f = local_fixture(10_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.events.clear();
        f.factory.probe("a").emit(EngineEvent::Error {
            message: "corrupt frame".to_string(),
        });
        f.coordinator.process_engine_events();

        assert!(f.events.get_events().is_empty());
        assert_eq!(f.coordinator.snapshot("a").unwrap().state, SessionState::Ready);
    }

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<(String, AnalyticsRecord, bool)>>,
    }

    impl AnalyticsSink for RecordingSink {
        fn report(&self, audio_id: &str, engine: &dyn MediaEngine, record: &AnalyticsRecord) {
            self.reports
                .lock()
                .push((audio_id.to_string(), record.clone(), engine.is_playing()));
        }
    }

    #[test]
    fn test_analytics_reported_once() {
        let mut f = local_fixture(10_000);
        let sink = Arc::new(RecordingSink::default());
        f.coordinator.set_analytics(Some(sink.clone()));
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator.play("a", false, Endpoint::PlayToEnd).unwrap();

        let record = AnalyticsRecord::new()
            .with("title", "Chapter 1")
            .with("length", 10.0);
        assert!(f.coordinator.report_analytics("a", &record).unwrap());
        assert!(!f.coordinator.report_analytics("a", &record).unwrap());

        let reports = sink.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "a");
        assert_eq!(
            reports[0].1.get("title"),
            Some(&AnalyticsValue::Text("Chapter 1".to_string()))
        );
        assert!(reports[0].2);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut f = local_fixture(1_000);
        f.coordinator
            .load_local("a", bytes(), SessionOptions::default())
            .unwrap();
        f.coordinator
            .load_remote("r", URL, SessionOptions::default())
            .unwrap();

        f.coordinator.shutdown();

        assert_eq!(f.coordinator.session_count(), 0);
        assert!(f.coordinator.next_deadline().is_none());
        assert_eq!(f.factory.probe("a").release_count(), 1);
        assert_eq!(f.factory.probe("r").release_count(), 1);
    }
}
