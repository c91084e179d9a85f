// Session commands and the pre-readiness deferral queue

use std::collections::VecDeque;

/// Host sentinel for "no endpoint"
pub const PLAY_TO_END: f64 = -1.0;

/// Where a `play` request stops on its own
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Endpoint {
    /// Play until the media ends
    PlayToEnd,
    /// Pause and report completion at this position (seconds)
    At(f64),
}

impl Endpoint {
    /// Map a host value: any negative number means play to end.
    pub fn from_seconds(seconds: f64) -> Self {
        if seconds < 0.0 || seconds.is_nan() {
            Endpoint::PlayToEnd
        } else {
            Endpoint::At(seconds)
        }
    }

    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Endpoint::PlayToEnd => None,
            Endpoint::At(seconds) => Some((seconds * 1000.0) as i64),
        }
    }
}

/// Deferred session call, replayed verbatim once the session is ready
#[derive(Debug, Clone, PartialEq)]
pub enum PendingCommand {
    Play { from_start: bool, endpoint: Endpoint },
    Pause,
    Seek { position_seconds: f64 },
    Release,
}

/// FIFO of commands issued before readiness. Drained at most once.
#[derive(Debug, Default)]
pub struct PendingQueue {
    commands: VecDeque<PendingCommand>,
    closed: bool,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command. Returns false once the queue has been drained or
    /// discarded; the command is dropped in that case.
    pub fn push(&mut self, command: PendingCommand) -> bool {
        if self.closed {
            return false;
        }
        self.commands.push_back(command);
        true
    }

    /// Take every queued command in arrival order and close the queue.
    pub fn drain(&mut self) -> Vec<PendingCommand> {
        self.closed = true;
        self.commands.drain(..).collect()
    }

    /// Drop every queued command and close the queue; returns how many.
    pub fn discard(&mut self) -> usize {
        self.closed = true;
        let dropped = self.commands.len();
        self.commands.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
