//! Deferred work.
//!
//! Everything the engine does "later" (countdown ticks, staggered spawns,
//! round advances, boss abilities, teardown) is an [`Action`] on a
//! [`TimerQueue`]. Actions carry ids, never state: whoever fires them looks
//! the session up again and drops the action if the session has moved on.
//!
//! The queue runs on a virtual clock (`Duration` since the engine started)
//! and is fully deterministic: entries fire in due-time order, ties in the
//! order they were scheduled.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use crate::host::EntityId;
use crate::session::SessionId;

/// Handle to a scheduled action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// One second of the pre-start countdown.
    CountdownTick { session: SessionId },
    /// Begin the round after `after_round`, if nothing else has already.
    NextRound { session: SessionId, after_round: u32 },
    /// One staggered spawn from a round manifest.
    SpawnMob {
        session: SessionId,
        round: u32,
        mob_id: String,
    },
    SpawnBoss {
        session: SessionId,
        round: u32,
        boss_id: String,
    },
    BossAbility {
        session: SessionId,
        boss: EntityId,
        ability: String,
    },
    /// Periodic status line during a run.
    StatusBroadcast { session: SessionId },
    /// Final teardown after the post-run grace delay.
    Cleanup { session: SessionId },
}

impl Action {
    pub fn session(&self) -> SessionId {
        match self {
            Action::CountdownTick { session }
            | Action::NextRound { session, .. }
            | Action::SpawnMob { session, .. }
            | Action::SpawnBoss { session, .. }
            | Action::BossAbility { session, .. }
            | Action::StatusBroadcast { session }
            | Action::Cleanup { session } => *session,
        }
    }
}

struct Entry {
    action: Action,
    period: Option<Duration>,
}

/// Virtual-time queue of one-shot and repeating actions.
#[derive(Default)]
pub struct TimerQueue {
    now: Duration,
    next_seq: u64,
    heap: BinaryHeap<Reverse<(Duration, u64, TaskId)>>,
    entries: HashMap<TaskId, Entry>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Run `action` once after `delay`.
    pub fn schedule(&mut self, delay: Duration, action: Action) -> TaskId {
        self.insert(delay, None, action)
    }

    /// Run `action` after `delay`, then every `period` until cancelled.
    pub fn schedule_repeating(&mut self, delay: Duration, period: Duration, action: Action) -> TaskId {
        self.insert(delay, Some(period.max(Duration::from_millis(1))), action)
    }

    fn insert(&mut self, delay: Duration, period: Option<Duration>, action: Action) -> TaskId {
        let id = TaskId(self.next_seq);
        self.push(id, self.now + delay);
        self.entries.insert(id, Entry { action, period });
        id
    }

    fn push(&mut self, id: TaskId, due: Duration) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((due, seq, id)));
    }

    /// Cancel a task. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Due time of the earliest live task.
    pub fn next_due(&mut self) -> Option<Duration> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Take the earliest task due at or before `until`, moving the clock to
    /// its due time. Repeating tasks are re-armed before being returned.
    pub fn pop_due(&mut self, until: Duration) -> Option<(TaskId, Action)> {
        self.discard_cancelled();
        let Reverse((due, _, id)) = *self.heap.peek()?;
        if due > until {
            return None;
        }
        self.heap.pop();
        self.now = self.now.max(due);

        let period = self.entries.get(&id)?.period;
        match period {
            Some(period) => {
                let action = self.entries.get(&id)?.action.clone();
                self.push(id, due + period);
                Some((id, action))
            }
            None => self.entries.remove(&id).map(|e| (id, e.action)),
        }
    }

    /// Move the clock forward without firing anything.
    pub fn advance_clock(&mut self, to: Duration) {
        self.now = self.now.max(to);
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, _, id))) = self.heap.peek() {
            if self.entries.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn drain(queue: &mut TimerQueue, until: Duration) -> Vec<(Duration, Action)> {
        let mut fired = Vec::new();
        while let Some((_, action)) = queue.pop_due(until) {
            fired.push((queue.now(), action));
        }
        queue.advance_clock(until);
        fired
    }

    #[test]
    fn test_fires_in_due_order_with_fifo_ties() {
        let session = SessionId::new();
        let mut queue = TimerQueue::new();
        queue.schedule(secs(2), Action::Cleanup { session });
        queue.schedule(secs(1), Action::StatusBroadcast { session });
        queue.schedule(secs(1), Action::CountdownTick { session });

        let fired: Vec<_> = drain(&mut queue, secs(5)).into_iter().map(|(_, a)| a).collect();
        assert_eq!(
            fired,
            vec![
                Action::StatusBroadcast { session },
                Action::CountdownTick { session },
                Action::Cleanup { session },
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repeating_until_cancelled() {
        let session = SessionId::new();
        let mut queue = TimerQueue::new();
        let id = queue.schedule_repeating(Duration::ZERO, secs(1), Action::CountdownTick { session });

        let fired = drain(&mut queue, secs(2));
        let times: Vec<_> = fired.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![secs(0), secs(1), secs(2)]);

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(drain(&mut queue, secs(10)).is_empty());
        assert_eq!(queue.next_due(), None);
    }

    #[test]
    fn test_cancelled_one_shot_never_fires() {
        let session = SessionId::new();
        let mut queue = TimerQueue::new();
        let id = queue.schedule(secs(1), Action::Cleanup { session });
        queue.cancel(id);
        assert!(!queue.is_scheduled(id));
        assert!(drain(&mut queue, secs(3)).is_empty());
    }

    #[test]
    fn test_not_due_yet() {
        let session = SessionId::new();
        let mut queue = TimerQueue::new();
        queue.schedule(secs(4), Action::Cleanup { session });
        assert!(queue.pop_due(secs(3)).is_none());
        assert_eq!(queue.next_due(), Some(secs(4)));
    }
}
