//! # Timer Registry
//!
//! Keeps one spawned sleep task per [`TimerKey`]. When a timer elapses it
//! posts [`SessionEvent::Timer`] into the session channel; the owner then
//! calls [`TimerRegistry::fired`] to learn whether that fire still belongs
//! to a live registration.
//!
//! Aborting a task cannot retract an event it already posted, so
//! [`fired`](TimerRegistry::fired) returning `false` is the normal way a
//! cancelled timer shows up.

use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::event::{EventTx, SessionEvent, TimerKey};

struct Entry {
    seq: u64,
    handle: JoinHandle<()>,
}

pub struct TimerRegistry {
    events: EventTx,
    entries: HashMap<TimerKey, Entry>,
    next_seq: u64,
}

impl TimerRegistry {
    pub fn new(events: EventTx) -> Self {
        Self {
            events,
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `key` to fire after `delay`, replacing any timer already
    /// registered under the same key.
    pub fn register(&mut self, key: TimerKey, delay: Duration) {
        self.cancel(&key);

        self.next_seq += 1;
        let seq = self.next_seq;
        let events = self.events.clone();
        let fire_key = key.clone();
        let deadline = tokio::time::Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = events.send(SessionEvent::Timer { key: fire_key, seq });
        });

        trace!("Timer {:?} registered for {:?}", key, delay);
        self.entries.insert(key, Entry { seq, handle });
    }

    /// Cancels the timer for `key`. Returns whether one was registered.
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.handle.abort();
        }
    }

    /// Consumes a fire event. Returns `true` exactly once per registration,
    /// and `false` for fires of cancelled or replaced timers.
    pub fn fired(&mut self, key: &TimerKey, seq: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.seq == seq => {
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, key: &TimerKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
