// Deadline queue for position ticks and endpoint watchdogs
// Entries hold a SessionKey, never the session itself; the coordinator
// resolves the key at fire time and drops entries whose session is gone.

use audiofile_core::SessionKey;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Recurring position report; rescheduled by the session
    PositionTick,
    /// One-shot endpoint watchdog; `token` must match the armed one
    Watchdog { token: u64 },
}

/// A due timer handed back to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub deadline: Instant,
    pub key: SessionKey,
    pub kind: TimerKind,
}

#[derive(Debug)]
struct Entry {
    deadline: Instant,
    seq: u64,
    key: SessionKey,
    kind: TimerKind,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ties fire in scheduling order
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Instant, key: SessionKey, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            deadline,
            seq,
            key,
            kind,
        }));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Timer> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(Timer {
                    deadline: entry.deadline,
                    key: entry.key,
                    kind: entry.kind,
                });
            }
        }
        due
    }

    /// Drop every timer belonging to `key`.
    pub fn purge(&mut self, key: &SessionKey) -> usize {
        let before = self.heap.len();
        self.heap.retain(|Reverse(entry)| &entry.key != key);
        before - self.heap.len()
    }

    pub fn has_timers_for(&self, key: &SessionKey) -> bool {
        self.heap.iter().any(|Reverse(entry)| &entry.key == key)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let base = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(base + Duration::from_millis(300), SessionKey::new("b", 1), TimerKind::PositionTick);
        scheduler.schedule(base + Duration::from_millis(100), SessionKey::new("a", 1), TimerKind::Watchdog { token: 1 });
        scheduler.schedule(base + Duration::from_millis(900), SessionKey::new("c", 1), TimerKind::PositionTick);

        assert_eq!(scheduler.next_deadline(), Some(base + Duration::from_millis(100)));

        let due = scheduler.pop_due(base + Duration::from_millis(300));
        let ids: Vec<_> = due.iter().map(|t| t.key.audio_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_equal_deadlines_keep_schedule_order() {
        let at = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(at, SessionKey::new("first", 1), TimerKind::PositionTick);
        scheduler.schedule(at, SessionKey::new("second", 1), TimerKind::PositionTick);

        let due = scheduler.pop_due(at);
        assert_eq!(due[0].key.audio_id, "first");
        assert_eq!(due[1].key.audio_id, "second");
    }

    #[test]
    fn test_nothing_due_before_deadline() {
        let base = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(base + Duration::from_millis(50), SessionKey::new("a", 1), TimerKind::PositionTick);
        assert!(scheduler.pop_due(base).is_empty());
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_purge_only_matching_key() {
        let base = Instant::now();
        let mut scheduler = Scheduler::new();
        let old = SessionKey::new("a", 1);
        let new = SessionKey::new("a", 2);
        scheduler.schedule(base, old.clone(), TimerKind::PositionTick);
        scheduler.schedule(base, old.clone(), TimerKind::Watchdog { token: 3 });
        scheduler.schedule(base, new.clone(), TimerKind::PositionTick);

        assert_eq!(scheduler.purge(&old), 2);
        assert!(!scheduler.has_timers_for(&old));
        assert!(scheduler.has_timers_for(&new));
    }
}
