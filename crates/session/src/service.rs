// Control service: owns the coordinator on a dedicated thread
//
// Host calls become requests on a channel; the control thread selects over
// requests, engine events and the next timer deadline, so every session is
// only ever touched from that one thread.

use crate::config::ServiceConfig;
use crate::coordinator::Coordinator;
use audiofile_core::{
    AnalyticsRecord, AnalyticsSink, AudioError, CallbackManager, Endpoint, EngineFactory,
    HostCallback, MediaSource, Result, SessionOptions, SessionSnapshot,
};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

type Reply<T> = Sender<Result<T>>;

enum Request {
    LoadLocal {
        audio_id: String,
        source: MediaSource,
        options: SessionOptions,
        reply: Reply<Option<f64>>,
    },
    LoadRemote {
        audio_id: String,
        url: String,
        options: SessionOptions,
        reply: Reply<()>,
    },
    Play {
        audio_id: String,
        from_start: bool,
        endpoint: Endpoint,
        reply: Reply<()>,
    },
    Pause {
        audio_id: String,
        reply: Reply<()>,
    },
    Seek {
        audio_id: String,
        position_seconds: f64,
        reply: Reply<()>,
    },
    SetVolume {
        audio_id: String,
        volume: f32,
        reply: Reply<()>,
    },
    Release {
        audio_id: String,
        reply: Reply<()>,
    },
    ReportAnalytics {
        audio_id: String,
        record: AnalyticsRecord,
        reply: Reply<bool>,
    },
    SetAnalytics {
        sink: Option<Arc<dyn AnalyticsSink>>,
        reply: Reply<()>,
    },
    Snapshot {
        audio_id: String,
        reply: Reply<SessionSnapshot>,
    },
    SessionIds {
        reply: Reply<Vec<String>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Thread-safe handle to the control thread
pub struct PlayerService {
    requests: Sender<Request>,
    callbacks: CallbackManager,
    control_thread: ThreadId,
    join: Option<JoinHandle<()>>,
}

impl PlayerService {
    /// Spawn the control thread with a fresh coordinator around `factory`.
    pub fn start(factory: Box<dyn EngineFactory>, config: ServiceConfig) -> Result<Self> {
        let coordinator = Coordinator::new(factory, config.session.clone());
        Self::start_with_coordinator(coordinator, &config.thread_name)
    }

    /// Run an existing coordinator on the control thread. Its clock must be
    /// the wall clock, since deadlines are awaited in real time.
    pub fn start_with_coordinator(coordinator: Coordinator, thread_name: &str) -> Result<Self> {
        let (requests, requests_rx) = unbounded();
        let callbacks = coordinator.callbacks().clone();

        let join = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run_control_loop(coordinator, requests_rx))
            .map_err(|e| {
                AudioError::ThreadError(format!("failed to spawn control thread: {}", e))
            })?;

        Ok(Self {
            requests,
            callbacks,
            control_thread: join.thread().id(),
            join: Some(join),
        })
    }

    /// Register a host callback. Callbacks run on the control thread and must
    /// not call back into the service.
    pub fn add_callback(&self, callback: Arc<dyn HostCallback>) {
        self.callbacks.add_callback(callback);
    }

    pub fn clear_callbacks(&self) {
        self.callbacks.clear_callbacks();
    }

    pub fn load_local(
        &self,
        audio_id: &str,
        source: MediaSource,
        options: SessionOptions,
    ) -> Result<Option<f64>> {
        self.call(|reply| Request::LoadLocal {
            audio_id: audio_id.to_string(),
            source,
            options,
            reply,
        })
    }

    pub fn load_remote(&self, audio_id: &str, url: &str, options: SessionOptions) -> Result<()> {
        self.call(|reply| Request::LoadRemote {
            audio_id: audio_id.to_string(),
            url: url.to_string(),
            options,
            reply,
        })
    }

    pub fn play(&self, audio_id: &str, from_start: bool, endpoint: Endpoint) -> Result<()> {
        self.call(|reply| Request::Play {
            audio_id: audio_id.to_string(),
            from_start,
            endpoint,
            reply,
        })
    }

    pub fn pause(&self, audio_id: &str) -> Result<()> {
        self.call(|reply| Request::Pause {
            audio_id: audio_id.to_string(),
            reply,
        })
    }

    pub fn seek(&self, audio_id: &str, position_seconds: f64) -> Result<()> {
        self.call(|reply| Request::Seek {
            audio_id: audio_id.to_string(),
            position_seconds,
            reply,
        })
    }

    pub fn set_volume(&self, audio_id: &str, volume: f32) -> Result<()> {
        self.call(|reply| Request::SetVolume {
            audio_id: audio_id.to_string(),
            volume,
            reply,
        })
    }

    pub fn release(&self, audio_id: &str) -> Result<()> {
        self.call(|reply| Request::Release {
            audio_id: audio_id.to_string(),
            reply,
        })
    }

    pub fn set_analytics_sink(&self, sink: Option<Arc<dyn AnalyticsSink>>) -> Result<()> {
        self.call(|reply| Request::SetAnalytics { sink, reply })
    }

    pub fn report_analytics(&self, audio_id: &str, record: AnalyticsRecord) -> Result<bool> {
        self.call(|reply| Request::ReportAnalytics {
            audio_id: audio_id.to_string(),
            record,
            reply,
        })
    }

    pub fn session_snapshot(&self, audio_id: &str) -> Result<SessionSnapshot> {
        self.call(|reply| Request::Snapshot {
            audio_id: audio_id.to_string(),
            reply,
        })
    }

    pub fn session_ids(&self) -> Result<Vec<String>> {
        self.call(|reply| Request::SessionIds { reply })
    }

    /// Release every session and stop the control thread.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let result = self.call(|reply| Request::Shutdown { reply });
        if thread::current().id() != self.control_thread && join.join().is_err() {
            log::error!("control thread panicked");
        }
        result
    }

    fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        if thread::current().id() == self.control_thread {
            return Err(AudioError::ThreadError(
                "re-entrant call from the control thread".to_string(),
            ));
        }

        let (reply, response) = bounded(1);
        self.requests
            .send(build(reply))
            .map_err(|_| AudioError::ThreadError("control thread stopped".to_string()))?;
        response
            .recv()
            .map_err(|_| AudioError::ThreadError("control thread dropped the request".to_string()))?
    }
}

impl Drop for PlayerService {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::debug!("service shutdown on drop: {}", e);
        }
    }
}

fn run_control_loop(mut coordinator: Coordinator, requests: Receiver<Request>) {
    log::info!("control thread started");
    let engine_events = coordinator.engine_events();

    loop {
        let timer = match coordinator.next_deadline() {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => crossbeam_channel::never(),
        };

        select! {
            recv(requests) -> msg => {
                let Ok(request) = msg else { break };
                if handle_request(&mut coordinator, request) {
                    break;
                }
            }
            recv(engine_events) -> msg => {
                let Ok((key, event)) = msg else { break };
                coordinator.handle_engine_event(key, event);
            }
            recv(timer) -> _ => {
                coordinator.fire_due_timers();
            }
        }
    }

    coordinator.shutdown();
    log::info!("control thread exited");
}

/// Returns true when the loop should stop.
fn handle_request(coordinator: &mut Coordinator, request: Request) -> bool {
    // A dropped reply receiver only means the caller gave up waiting
    match request {
        Request::LoadLocal {
            audio_id,
            source,
            options,
            reply,
        } => {
            let _ = reply.send(coordinator.load_local(&audio_id, source, options));
        }
        Request::LoadRemote {
            audio_id,
            url,
            options,
            reply,
        } => {
            let _ = reply.send(coordinator.load_remote(&audio_id, &url, options));
        }
        Request::Play {
            audio_id,
            from_start,
            endpoint,
            reply,
        } => {
            let _ = reply.send(coordinator.play(&audio_id, from_start, endpoint));
        }
        Request::Pause { audio_id, reply } => {
            let _ = reply.send(coordinator.pause(&audio_id));
        }
        Request::Seek {
            audio_id,
            position_seconds,
            reply,
        } => {
            let _ = reply.send(coordinator.seek(&audio_id, position_seconds));
        }
        Request::SetVolume {
            audio_id,
            volume,
            reply,
        } => {
            let _ = reply.send(coordinator.set_volume(&audio_id, volume));
        }
        Request::Release { audio_id, reply } => {
            let _ = reply.send(coordinator.release(&audio_id));
        }
        Request::ReportAnalytics {
            audio_id,
            record,
            reply,
        } => {
            let _ = reply.send(coordinator.report_analytics(&audio_id, &record));
        }
        Request::SetAnalytics { sink, reply } => {
            coordinator.set_analytics(sink);
            let _ = reply.send(Ok(()));
        }
        Request::Snapshot { audio_id, reply } => {
            let _ = reply.send(coordinator.snapshot(&audio_id));
        }
        Request::SessionIds { reply } => {
            let _ = reply.send(Ok(coordinator.session_ids()));
        }
        Request::Shutdown { reply } => {
            coordinator.shutdown();
            let _ = reply.send(Ok(()));
            return true;
        }
    }
    false
}
