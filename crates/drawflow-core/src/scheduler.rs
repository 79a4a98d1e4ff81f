//! Debounced auto-save scheduling.
//!
//! Pure state machine deciding when an in-memory snapshot becomes a durable
//! write: `Idle -> Pending(deadline) -> Flushing -> Idle`. It owns no timers;
//! callers inject instants and drive sleeps, which keeps the machine fully
//! deterministic under test. Each qualifying change re-arms the single
//! per-conversation deadline instead of queuing a second write, and every
//! armed deadline carries a generation so a sleeper that was superseded by a
//! newer change (or a forced flush) wakes up, notices, and does nothing.

use std::time::{Duration, Instant};

use crate::fingerprint::ChangeFingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    Pending { deadline: Instant },
    Flushing,
}

/// Per-conversation debounce/flush state machine.
#[derive(Debug)]
pub struct PersistenceScheduler {
    debounce: Duration,
    state: SchedulerState,
    generation: u64,
    last_saved: Option<ChangeFingerprint>,
}

impl PersistenceScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: SchedulerState::Idle,
            generation: 0,
            last_saved: None,
        }
    }

    /// Registers a state change. Returns the generation of the (re)armed
    /// deadline, or `None` when the fingerprint equals the last saved one
    /// and the save is suppressed entirely.
    pub fn note_change(&mut self, fingerprint: ChangeFingerprint, now: Instant) -> Option<u64> {
        if self.last_saved == Some(fingerprint) {
            return None;
        }
        self.generation += 1;
        self.state = SchedulerState::Pending {
            deadline: now + self.debounce,
        };
        Some(self.generation)
    }

    /// The armed deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::Pending { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// A woken sleeper enters the flush only if its generation is still the
    /// current one; a re-arm or forced flush in between invalidates it.
    pub fn begin_flush_for(&mut self, generation: u64) -> bool {
        if generation != self.generation || !matches!(self.state, SchedulerState::Pending { .. }) {
            return false;
        }
        self.state = SchedulerState::Flushing;
        true
    }

    /// Enters a forced flush (conversation switch/delete/new chat or
    /// teardown): cancels any pending deadline and invalidates sleepers.
    pub fn begin_forced_flush(&mut self) {
        self.generation += 1;
        self.state = SchedulerState::Flushing;
    }

    /// Leaves the flushing state. `saved` carries the fingerprint that was
    /// durably written, or `None` when the write failed (failure is logged
    /// by the caller, not retried here). A change that arrived mid-flush has
    /// already re-armed `Pending` and is left alone.
    pub fn finish_flush(&mut self, saved: Option<ChangeFingerprint>) {
        if let Some(fingerprint) = saved {
            self.last_saved = Some(fingerprint);
        }
        if self.state == SchedulerState::Flushing {
            self.state = SchedulerState::Idle;
        }
    }

    /// Cancels any pending deadline without flushing (the conversation is
    /// being discarded) and invalidates sleepers.
    pub fn cancel(&mut self) {
        self.generation += 1;
        if matches!(self.state, SchedulerState::Pending { .. }) {
            self.state = SchedulerState::Idle;
        }
    }

    /// True while a deadline is armed.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, SchedulerState::Pending { .. })
    }

    /// Seeds the suppression fingerprint, e.g. right after loading a
    /// conversation whose durable state is known to match memory.
    pub fn mark_saved(&mut self, fingerprint: ChangeFingerprint) {
        self.last_saved = Some(fingerprint);
    }

    /// True when the fingerprint equals the last durably saved one.
    pub fn is_clean(&self, fingerprint: &ChangeFingerprint) -> bool {
        self.last_saved.as_ref() == Some(fingerprint)
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationPayload;

    fn fingerprint_of(xml: &str) -> ChangeFingerprint {
        let mut payload = ConversationPayload::empty();
        payload.xml = xml.to_string();
        ChangeFingerprint::of(&payload)
    }

    #[test]
    fn change_arms_deadline() {
        let mut scheduler = PersistenceScheduler::new(Duration::from_millis(300));
        let now = Instant::now();

        let generation = scheduler.note_change(fingerprint_of("a"), now);
        assert!(generation.is_some());
        assert_eq!(scheduler.deadline(), Some(now + Duration::from_millis(300)));
    }

    #[test]
    fn rearm_resets_deadline_and_invalidates_old_generation() {
        let mut scheduler = PersistenceScheduler::new(Duration::from_millis(300));
        let now = Instant::now();

        let first = scheduler.note_change(fingerprint_of("a"), now).unwrap();
        let later = now + Duration::from_millis(100);
        let second = scheduler.note_change(fingerprint_of("b"), later).unwrap();

        assert_eq!(scheduler.deadline(), Some(later + Duration::from_millis(300)));
        assert!(!scheduler.begin_flush_for(first));
        assert!(scheduler.begin_flush_for(second));
    }

    #[test]
    fn unchanged_fingerprint_is_suppressed() {
        let mut scheduler = PersistenceScheduler::new(Duration::from_millis(300));
        let now = Instant::now();
        let fingerprint = fingerprint_of("a");

        let generation = scheduler.note_change(fingerprint, now).unwrap();
        assert!(scheduler.begin_flush_for(generation));
        scheduler.finish_flush(Some(fingerprint));

        // Byte-identical state: no timer arm, no write.
        assert_eq!(scheduler.note_change(fingerprint, now), None);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn flush_returns_to_idle_on_failure_too() {
        let mut scheduler = PersistenceScheduler::new(Duration::from_millis(300));
        let now = Instant::now();
        let fingerprint = fingerprint_of("a");

        let generation = scheduler.note_change(fingerprint, now).unwrap();
        assert!(scheduler.begin_flush_for(generation));
        scheduler.finish_flush(None); // write failed

        assert!(!scheduler.is_pending());
        // Failure did not poison suppression: the same state arms again.
        assert!(scheduler.note_change(fingerprint, now).is_some());
    }

    #[test]
    fn change_during_flush_stays_pending() {
        let mut scheduler = PersistenceScheduler::new(Duration::from_millis(300));
        let now = Instant::now();

        let generation = scheduler.note_change(fingerprint_of("a"), now).unwrap();
        assert!(scheduler.begin_flush_for(generation));

        let mid_flush = scheduler.note_change(fingerprint_of("b"), now).unwrap();
        scheduler.finish_flush(Some(fingerprint_of("a")));

        // The mid-flush change survives the flush completion.
        assert!(scheduler.is_pending());
        assert!(scheduler.begin_flush_for(mid_flush));
    }

    #[test]
    fn forced_flush_invalidates_sleeper() {
        let mut scheduler = PersistenceScheduler::new(Duration::from_millis(300));
        let now = Instant::now();

        let generation = scheduler.note_change(fingerprint_of("a"), now).unwrap();
        scheduler.begin_forced_flush();
        scheduler.finish_flush(Some(fingerprint_of("a")));

        assert!(!scheduler.begin_flush_for(generation));
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn cancel_discards_pending_deadline() {
        let mut scheduler = PersistenceScheduler::new(Duration::from_millis(300));
        let now = Instant::now();

        let generation = scheduler.note_change(fingerprint_of("a"), now).unwrap();
        scheduler.cancel();

        assert!(!scheduler.is_pending());
        assert!(!scheduler.begin_flush_for(generation));
    }
}
