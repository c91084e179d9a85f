// Session lifecycle management for audiofile playback
//
// `ManagedSession` is the per-track state machine, `Coordinator` owns every
// session plus the timers and engine mailbox, and `PlayerService` runs a
// coordinator on its own control thread.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ServiceConfig, SessionConfig, CONTROL_THREAD_NAME, POSITION_UPDATE_INTERVAL_MS};
pub use coordinator::Coordinator;
pub use registry::SessionRegistry;
pub use scheduler::{Scheduler, Timer, TimerKind};
pub use service::PlayerService;
pub use session::{ManagedSession, SessionContext};
