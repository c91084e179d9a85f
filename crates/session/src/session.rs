// Managed playback session: one audio track's lifecycle state machine
//
// Loading -> Ready -> {Playing, Paused} -> Released, with Failed reachable
// only from Loading. Commands issued while Loading are queued and replayed
// in arrival order on the first readiness event.

use crate::config::SessionConfig;
use crate::scheduler::{Scheduler, TimerKind};
use audiofile_core::{
    ms_to_seconds, seconds_to_ms, AnalyticsRecord, AnalyticsSink, CallbackManager, Endpoint,
    EngineEvent, MediaEngine, PendingCommand, PendingQueue, SessionEvent, SessionKey, SessionKind,
    SessionOptions, SessionSnapshot, SessionState,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Everything a session may touch besides itself, borrowed per call
pub struct SessionContext<'a> {
    pub scheduler: &'a mut Scheduler,
    pub events: &'a CallbackManager,
    pub config: &'a SessionConfig,
    pub now: Instant,
}

/// Who asked for a seek; only host seeks are reported back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekOrigin {
    Host,
    Internal,
}

pub struct ManagedSession {
    key: SessionKey,
    kind: SessionKind,
    options: SessionOptions,
    state: SessionState,
    engine: Box<dyn MediaEngine>,
    pending: PendingQueue,
    duration_ms: Option<u64>,
    /// Token of the armed endpoint watchdog
    watchdog: Option<u64>,
    next_watchdog_token: u64,
    /// Seeks handed to the engine and not yet completed, in call order
    seeks: VecDeque<SeekOrigin>,
    analytics_reported: bool,
}

impl ManagedSession {
    /// Wrap a freshly opened engine and start the position reporter. A local
    /// engine that already knows its duration makes the session ready here.
    pub fn new(
        key: SessionKey,
        kind: SessionKind,
        options: SessionOptions,
        engine: Box<dyn MediaEngine>,
        ctx: &mut SessionContext,
    ) -> Self {
        log::info!(
            "[{}] session created ({:?}, looping={}, background={})",
            key.audio_id,
            kind,
            options.looping,
            options.play_in_background
        );

        let mut session = Self {
            key,
            kind,
            options,
            state: SessionState::Loading,
            engine,
            pending: PendingQueue::new(),
            duration_ms: None,
            watchdog: None,
            next_watchdog_token: 1,
            seeks: VecDeque::new(),
            analytics_reported: false,
        };

        session.schedule_position_tick(ctx);

        if kind == SessionKind::Local {
            if let Some(duration_ms) = session.engine.duration_ms() {
                session.mark_ready(duration_ms, ctx);
            }
        }

        session
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn audio_id(&self) -> &str {
        &self.key.audio_id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_released(&self) -> bool {
        self.state == SessionState::Released
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_ms.map(ms_to_seconds)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            audio_id: self.key.audio_id.clone(),
            kind: self.kind,
            state: self.state,
            duration_seconds: self.duration_seconds(),
            options: self.options,
            pending_commands: self.pending.len(),
            watchdog_armed: self.watchdog.is_some(),
        }
    }

    // ---------------------------------------------------------------------
    // Host commands
    // ---------------------------------------------------------------------

    pub fn play(&mut self, from_start: bool, endpoint: Endpoint, ctx: &mut SessionContext) {
        self.submit(PendingCommand::Play { from_start, endpoint }, ctx);
    }

    pub fn pause(&mut self, ctx: &mut SessionContext) {
        self.submit(PendingCommand::Pause, ctx);
    }

    pub fn seek(&mut self, position_seconds: f64, ctx: &mut SessionContext) {
        self.submit(PendingCommand::Seek { position_seconds }, ctx);
    }

    pub fn release(&mut self, ctx: &mut SessionContext) {
        self.submit(PendingCommand::Release, ctx);
    }

    /// Volume is forwarded straight to the engine, even while loading.
    pub fn set_volume(&mut self, volume: f32) {
        if self.is_released() {
            log::warn!("[{}] set_volume on released session ignored", self.key.audio_id);
            return;
        }
        if let Err(e) = self.engine.set_volume(volume) {
            log::error!("[{}] set_volume({}) failed: {}", self.key.audio_id, volume, e);
        }
    }

    /// Hand the engine and metadata to the analytics sink, once per session.
    pub fn report_analytics(&mut self, sink: &dyn AnalyticsSink, record: &AnalyticsRecord) -> bool {
        if self.analytics_reported {
            log::debug!("[{}] analytics already reported", self.key.audio_id);
            return false;
        }
        if self.is_released() {
            log::warn!("[{}] analytics for released session ignored", self.key.audio_id);
            return false;
        }
        self.analytics_reported = true;
        sink.report(&self.key.audio_id, self.engine.as_ref(), record);
        true
    }

    fn submit(&mut self, command: PendingCommand, ctx: &mut SessionContext) {
        match self.state {
            SessionState::Loading => {
                if self.pending.push(command.clone()) {
                    log::debug!(
                        "[{}] deferred {:?} until ready ({} pending)",
                        self.key.audio_id,
                        command,
                        self.pending.len()
                    );
                }
            }
            SessionState::Failed => match command {
                PendingCommand::Release => self.do_release(ctx),
                other => log::warn!(
                    "[{}] {:?} ignored, load failed",
                    self.key.audio_id,
                    other
                ),
            },
            _ => self.apply(command, ctx),
        }
    }

    fn apply(&mut self, command: PendingCommand, ctx: &mut SessionContext) {
        if self.is_released() {
            log::debug!("[{}] {:?} ignored, already released", self.key.audio_id, command);
            return;
        }
        match command {
            PendingCommand::Play { from_start, endpoint } => self.do_play(from_start, endpoint, ctx),
            PendingCommand::Pause => self.do_pause(),
            PendingCommand::Seek { position_seconds } => {
                self.seek_engine(seconds_to_ms(position_seconds), SeekOrigin::Host)
            }
            PendingCommand::Release => self.do_release(ctx),
        }
    }

    fn do_play(&mut self, from_start: bool, endpoint: Endpoint, ctx: &mut SessionContext) {
        if from_start {
            self.seek_engine(0, SeekOrigin::Internal);
        }

        let Some(endpoint_ms) = endpoint.as_millis() else {
            self.disarm_watchdog();
            if let Err(e) = self.engine.play() {
                log::error!("[{}] play failed: {}", self.key.audio_id, e);
                return;
            }
            self.set_state(SessionState::Playing);
            return;
        };

        // Only start if the endpoint is still ahead of us
        let position_ms = match self.engine.current_position_ms() {
            Ok(position) => position as i64,
            Err(e) => {
                log::error!("[{}] cannot read position for play(): {}", self.key.audio_id, e);
                return;
            }
        };
        let remaining_ms = endpoint_ms - position_ms;
        log::info!(
            "[{}] play() at {} ms, to play for {} ms",
            self.key.audio_id,
            position_ms,
            remaining_ms
        );
        if remaining_ms <= 0 {
            log::warn!(
                "[{}] play() called at position after endpoint, no playback occurred",
                self.key.audio_id
            );
            return;
        }

        self.disarm_watchdog();
        if let Err(e) = self.engine.play() {
            log::error!("[{}] play failed: {}", self.key.audio_id, e);
            return;
        }
        self.set_state(SessionState::Playing);
        self.arm_watchdog(Duration::from_millis(remaining_ms as u64), ctx);
    }

    fn do_pause(&mut self) {
        self.disarm_watchdog();
        if let Err(e) = self.engine.pause() {
            log::error!("[{}] pause failed: {}", self.key.audio_id, e);
        }
        self.set_state(SessionState::Paused);
    }

    fn do_release(&mut self, ctx: &mut SessionContext) {
        if self.is_released() {
            return;
        }
        self.teardown();
        let purged = ctx.scheduler.purge(&self.key);
        log::info!("[{}] released ({} timers cancelled)", self.key.audio_id, purged);
    }

    /// Free the engine without a context; used by release, replacement and drop.
    pub(crate) fn teardown(&mut self) {
        if self.is_released() {
            return;
        }
        self.disarm_watchdog();
        self.engine.release();
        let dropped = self.pending.discard();
        if dropped > 0 {
            log::debug!("[{}] dropped {} pending commands on release", self.key.audio_id, dropped);
        }
        self.seeks.clear();
        self.set_state(SessionState::Released);
    }

    fn seek_engine(&mut self, position_ms: u64, origin: SeekOrigin) {
        match self.engine.seek(position_ms) {
            Ok(()) => self.seeks.push_back(origin),
            Err(e) => log::error!("[{}] seek to {} ms failed: {}", self.key.audio_id, position_ms, e),
        }
    }

    fn arm_watchdog(&mut self, after: Duration, ctx: &mut SessionContext) {
        let token = self.next_watchdog_token;
        self.next_watchdog_token += 1;
        self.watchdog = Some(token);
        ctx.scheduler
            .schedule(ctx.now + after, self.key.clone(), TimerKind::Watchdog { token });
        log::debug!("[{}] endpoint watchdog #{} armed for {:?}", self.key.audio_id, token, after);
    }

    fn disarm_watchdog(&mut self) {
        if let Some(token) = self.watchdog.take() {
            log::debug!("[{}] endpoint watchdog #{} cancelled", self.key.audio_id, token);
        }
    }

    fn schedule_position_tick(&self, ctx: &mut SessionContext) {
        ctx.scheduler.schedule(
            ctx.now + ctx.config.position_interval,
            self.key.clone(),
            TimerKind::PositionTick,
        );
    }

    fn set_state(&mut self, to: SessionState) {
        if !self.state.can_transition_to(to) {
            log::warn!(
                "[{}] unexpected transition {:?} -> {:?}",
                self.key.audio_id,
                self.state,
                to
            );
        }
        if self.state != to {
            log::debug!("[{}] {:?} -> {:?}", self.key.audio_id, self.state, to);
        }
        self.state = to;
    }

    fn emit(&self, ctx: &SessionContext, event: SessionEvent) {
        ctx.events.dispatch(event);
    }

    // ---------------------------------------------------------------------
    // Engine events and timers
    // ---------------------------------------------------------------------

    fn mark_ready(&mut self, duration_ms: u64, ctx: &mut SessionContext) {
        self.duration_ms = Some(duration_ms);
        self.set_state(SessionState::Ready);
        log::info!("[{}] ready, duration {} ms", self.key.audio_id, duration_ms);
        self.emit(
            ctx,
            SessionEvent::Loaded {
                audio_id: self.key.audio_id.clone(),
                duration_seconds: ms_to_seconds(duration_ms),
            },
        );

        let deferred = self.pending.drain();
        if !deferred.is_empty() {
            log::debug!("[{}] replaying {} deferred commands", self.key.audio_id, deferred.len());
        }
        for command in deferred {
            self.apply(command, ctx);
        }
    }

    pub fn on_engine_event(&mut self, event: EngineEvent, ctx: &mut SessionContext) {
        if self.is_released() {
            log::debug!("[{}] {:?} after release ignored", self.key.audio_id, event);
            return;
        }

        match event {
            EngineEvent::Ready { duration_ms } => {
                if self.state == SessionState::Loading {
                    self.mark_ready(duration_ms, ctx);
                } else {
                    log::debug!("[{}] duplicate ready event ignored", self.key.audio_id);
                }
            }
            EngineEvent::LoadFailed { message } => {
                if self.state == SessionState::Loading {
                    log::error!("[{}] load failed: {}", self.key.audio_id, message);
                    self.set_state(SessionState::Failed);
                    let dropped = self.pending.discard();
                    if dropped > 0 {
                        log::warn!(
                            "[{}] {} commands queued before the failure were dropped",
                            self.key.audio_id,
                            dropped
                        );
                    }
                    self.emit(
                        ctx,
                        SessionEvent::LoadFailed {
                            audio_id: self.key.audio_id.clone(),
                        },
                    );
                } else {
                    log::error!("[{}] engine error after load: {}", self.key.audio_id, message);
                }
            }
            EngineEvent::Ended => {
                if !self.state.is_loaded() {
                    log::debug!("[{}] end of media in {:?} ignored", self.key.audio_id, self.state);
                    return;
                }
                log::info!("[{}] playback completed", self.key.audio_id);
                self.disarm_watchdog();
                self.seek_engine(0, SeekOrigin::Internal);
                self.set_state(SessionState::Paused);
                self.emit(
                    ctx,
                    SessionEvent::Completion {
                        audio_id: self.key.audio_id.clone(),
                    },
                );
            }
            EngineEvent::SeekCompleted => match self.seeks.pop_front() {
                Some(SeekOrigin::Host) => self.emit(
                    ctx,
                    SessionEvent::SeekComplete {
                        audio_id: self.key.audio_id.clone(),
                    },
                ),
                Some(SeekOrigin::Internal) => {
                    log::trace!("[{}] internal seek done", self.key.audio_id)
                }
                None => log::debug!("[{}] unmatched seek completion", self.key.audio_id),
            },
            EngineEvent::Error { message } => {
                // Logged only; the session stays usable
                log::error!("[{}] playback error: {}", self.key.audio_id, message);
            }
        }
    }

    pub fn on_watchdog(&mut self, token: u64, ctx: &mut SessionContext) {
        if self.watchdog != Some(token) {
            log::debug!("[{}] stale watchdog #{} ignored", self.key.audio_id, token);
            return;
        }
        self.watchdog = None;
        if self.state != SessionState::Playing {
            return;
        }

        log::debug!("[{}] endpoint reached, pausing", self.key.audio_id);
        if let Err(e) = self.engine.pause() {
            log::error!("[{}] pause at endpoint failed: {}", self.key.audio_id, e);
        }
        self.set_state(SessionState::Paused);
        self.emit(
            ctx,
            SessionEvent::Completion {
                audio_id: self.key.audio_id.clone(),
            },
        );
    }

    /// Report the position if playing, then reschedule. Returns false once
    /// the session is released and the reporter has stopped.
    pub fn on_position_tick(&mut self, ctx: &mut SessionContext) -> bool {
        if self.is_released() {
            return false;
        }

        if self.state == SessionState::Playing && self.engine.is_playing() {
            match self.engine.current_position_ms() {
                Ok(position_ms) => self.emit(
                    ctx,
                    SessionEvent::Position {
                        audio_id: self.key.audio_id.clone(),
                        position_seconds: ms_to_seconds(position_ms),
                    },
                ),
                Err(e) => log::warn!(
                    "[{}] could not read position for update: {}",
                    self.key.audio_id,
                    e
                ),
            }
        }

        self.schedule_position_tick(ctx);
        true
    }
}

impl Drop for ManagedSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
