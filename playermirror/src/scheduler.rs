//! Per-target reload state machine.
//!
//! The scheduler only decides; it never talks to the player. The
//! reconciliation context feeds it change signals and completed reloads and
//! starts whatever [`Decision::Start`] or [`ReloadScheduler::due`] hands back.
//! Every started reload carries a revision so results arriving for a
//! forgotten target can be recognised and dropped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::adapter::ChangeFlags;
use crate::model::PlaylistId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReloadTarget {
    Playlist(PlaylistId),
    Queue,
}

/// How much of a target is re-read. An entries reload rewrites metadata too.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReloadScope {
    Metadata,
    Entries,
}

impl ReloadScope {
    /// Scope requested by native change flags, `None` for an empty set.
    pub fn from_flags(flags: ChangeFlags) -> Option<ReloadScope> {
        if flags.intersects(ChangeFlags::ENTRY_INFO | ChangeFlags::CONTENT) {
            Some(ReloadScope::Entries)
        } else if flags.intersects(ChangeFlags::NAME | ChangeFlags::STATISTICS) {
            Some(ReloadScope::Metadata)
        } else {
            None
        }
    }

    pub fn merge(self, other: ReloadScope) -> ReloadScope {
        self.max(other)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadPhase {
    Idle,
    PendingDebounce { due: Instant },
    Reloading,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Start a reload now.
    Start { scope: ReloadScope, revision: u64 },
    /// Held until `due`.
    Deferred { due: Instant },
    /// Folded into a pending or running reload.
    Merged,
}

#[derive(Debug)]
struct TargetState {
    phase: ReloadPhase,
    scope: ReloadScope,
    last_reload: Option<Instant>,
    follow_up: Option<ReloadScope>,
    revision: u64,
}

impl TargetState {
    fn new() -> Self {
        Self {
            phase: ReloadPhase::Idle,
            scope: ReloadScope::Metadata,
            last_reload: None,
            follow_up: None,
            revision: 0,
        }
    }
}

/// A reload whose debounce expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DueReload {
    pub target: ReloadTarget,
    pub scope: ReloadScope,
    pub revision: u64,
}

#[derive(Debug)]
pub struct ReloadScheduler {
    min_interval: Duration,
    poll_interval: Option<Duration>,
    next_poll: Option<Instant>,
    states: HashMap<ReloadTarget, TargetState>,
    revision: u64,
}

impl ReloadScheduler {
    /// `poll_interval` is only set for adapters without change notifications.
    pub fn new(min_interval: Duration, poll_interval: Option<Duration>, now: Instant) -> Self {
        Self {
            min_interval,
            poll_interval,
            next_poll: poll_interval.map(|interval| now + interval),
            states: HashMap::new(),
            revision: 0,
        }
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Handles one change signal for `target`.
    pub fn request(&mut self, target: ReloadTarget, scope: ReloadScope, now: Instant) -> Decision {
        let min_interval = self.min_interval;
        let state = self.states.entry(target).or_insert_with(TargetState::new);

        let decision = match state.phase {
            ReloadPhase::Idle => {
                let recent = state
                    .last_reload
                    .is_some_and(|last| now.duration_since(last) < min_interval);
                if scope == ReloadScope::Entries && recent {
                    let due = state.last_reload.map_or(now, |last| last + min_interval);
                    state.phase = ReloadPhase::PendingDebounce { due };
                    state.scope = scope;
                    Decision::Deferred { due }
                } else {
                    state.phase = ReloadPhase::Reloading;
                    state.scope = scope;
                    self.revision += 1;
                    state.revision = self.revision;
                    Decision::Start {
                        scope,
                        revision: state.revision,
                    }
                }
            }
            ReloadPhase::PendingDebounce { .. } => {
                state.scope = state.scope.merge(scope);
                Decision::Merged
            }
            ReloadPhase::Reloading => {
                state.follow_up = Some(state.follow_up.map_or(scope, |pending| pending.merge(scope)));
                Decision::Merged
            }
        };
        trace!(?target, ?scope, ?decision, "Reload requested");
        decision
    }

    /// Moves every expired debounce to `Reloading`, earliest first.
    pub fn due(&mut self, now: Instant) -> Vec<DueReload> {
        let mut expired: Vec<(Instant, ReloadTarget)> = self
            .states
            .iter()
            .filter_map(|(target, state)| match state.phase {
                ReloadPhase::PendingDebounce { due } if due <= now => Some((due, *target)),
                _ => None,
            })
            .collect();
        expired.sort_by_key(|(due, _)| *due);

        let mut started = Vec::with_capacity(expired.len());
        for (_, target) in expired {
            let revision = self.next_revision();
            if let Some(state) = self.states.get_mut(&target) {
                state.phase = ReloadPhase::Reloading;
                state.revision = revision;
                started.push(DueReload {
                    target,
                    scope: state.scope,
                    revision,
                });
            }
        }
        started
    }

    /// Whether a periodic catalog check is due. Advances the poll timer.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        match (self.next_poll, self.poll_interval) {
            (Some(next), Some(interval)) if next <= now => {
                self.next_poll = Some(now + interval);
                true
            }
            _ => false,
        }
    }

    /// Earliest instant at which [`due`](Self::due) or
    /// [`poll_due`](Self::poll_due) has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.states
            .values()
            .filter_map(|state| match state.phase {
                ReloadPhase::PendingDebounce { due } => Some(due),
                _ => None,
            })
            .chain(self.next_poll)
            .min()
    }

    /// Whether `revision` is the reload currently running for `target`.
    pub fn is_current(&self, target: ReloadTarget, revision: u64) -> bool {
        self.states.get(&target).is_some_and(|state| {
            state.phase == ReloadPhase::Reloading && state.revision == revision
        })
    }

    /// Ends the running reload of `target`. Requests merged while it ran are
    /// replayed and their decision returned.
    pub fn finish(&mut self, target: ReloadTarget, now: Instant, succeeded: bool) -> Option<Decision> {
        let state = self.states.get_mut(&target)?;
        if state.phase != ReloadPhase::Reloading {
            return None;
        }
        state.phase = ReloadPhase::Idle;
        if succeeded && state.scope == ReloadScope::Entries {
            state.last_reload = Some(now);
        }
        let follow_up = state.follow_up.take()?;
        Some(self.request(target, follow_up, now))
    }

    /// Drops all state of a target that no longer exists.
    pub fn forget(&mut self, target: ReloadTarget) {
        self.states.remove(&target);
    }

    pub fn phase(&self, target: ReloadTarget) -> ReloadPhase {
        self.states
            .get(&target)
            .map_or(ReloadPhase::Idle, |state| state.phase)
    }

    /// Whether any reload is held by a debounce.
    pub fn has_pending(&self) -> bool {
        self.states
            .values()
            .any(|state| matches!(state.phase, ReloadPhase::PendingDebounce { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_millis(1000);
    const P: ReloadTarget = ReloadTarget::Playlist(PlaylistId(1));

    fn scheduler(now: Instant) -> ReloadScheduler {
        ReloadScheduler::new(MIN, None, now)
    }

    fn start(scheduler: &mut ReloadScheduler, now: Instant) -> u64 {
        match scheduler.request(P, ReloadScope::Entries, now) {
            Decision::Start { revision, .. } => revision,
            other => panic!("expected a start, got {:?}", other),
        }
    }

    #[test]
    fn test_scope_from_flags() {
        assert_eq!(ReloadScope::from_flags(ChangeFlags::NAME), Some(ReloadScope::Metadata));
        assert_eq!(ReloadScope::from_flags(ChangeFlags::STATISTICS), Some(ReloadScope::Metadata));
        assert_eq!(ReloadScope::from_flags(ChangeFlags::ENTRY_INFO), Some(ReloadScope::Entries));
        assert_eq!(
            ReloadScope::from_flags(ChangeFlags::NAME | ChangeFlags::CONTENT),
            Some(ReloadScope::Entries)
        );
        assert_eq!(ReloadScope::from_flags(ChangeFlags::empty()), None);
    }

    #[test]
    fn test_idle_metadata_starts_immediately() {
        let now = Instant::now();
        let mut s = scheduler(now);
        start(&mut s, now);
        s.finish(P, now, true);

        // metadata is never debounced
        let decision = s.request(P, ReloadScope::Metadata, now + Duration::from_millis(10));
        assert!(matches!(decision, Decision::Start { scope: ReloadScope::Metadata, .. }));
    }

    #[test]
    fn test_recent_entries_reload_is_debounced() {
        let now = Instant::now();
        let mut s = scheduler(now);
        start(&mut s, now);
        assert_eq!(s.finish(P, now, true), None);

        let later = now + Duration::from_millis(200);
        assert_eq!(s.request(P, ReloadScope::Entries, later), Decision::Deferred { due: now + MIN });
        assert_eq!(s.phase(P), ReloadPhase::PendingDebounce { due: now + MIN });
        assert_eq!(s.next_deadline(), Some(now + MIN));

        assert!(s.due(now + Duration::from_millis(999)).is_empty());
        let due = s.due(now + MIN);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].scope, ReloadScope::Entries);
        assert!(s.is_current(P, due[0].revision));
    }

    #[test]
    fn test_burst_coalesces_into_one_reload() {
        let now = Instant::now();
        let mut s = scheduler(now);
        start(&mut s, now);
        s.finish(P, now, true);

        let mut deferred = 0;
        for i in 1..=20u64 {
            match s.request(P, ReloadScope::Entries, now + Duration::from_millis(i * 10)) {
                Decision::Deferred { .. } => deferred += 1,
                Decision::Merged => {}
                Decision::Start { .. } => panic!("burst started a reload"),
            }
        }
        assert_eq!(deferred, 1);
        assert_eq!(s.due(now + MIN).len(), 1);
        assert!(s.due(now + MIN * 2).is_empty());
    }

    #[test]
    fn test_pending_merges_scope() {
        let now = Instant::now();
        let mut s = scheduler(now);
        start(&mut s, now);
        s.finish(P, now, true);

        s.request(P, ReloadScope::Entries, now);
        assert_eq!(s.request(P, ReloadScope::Metadata, now), Decision::Merged);
        assert_eq!(s.due(now + MIN)[0].scope, ReloadScope::Entries);
    }

    #[test]
    fn test_at_most_one_reload_in_flight() {
        let now = Instant::now();
        let mut s = scheduler(now);
        let first = start(&mut s, now);

        assert_eq!(s.request(P, ReloadScope::Metadata, now), Decision::Merged);
        assert_eq!(s.request(P, ReloadScope::Entries, now), Decision::Merged);
        assert!(s.due(now + MIN * 10).is_empty());
        assert!(s.is_current(P, first));

        // the follow-up replays the merged scope once the first reload ends
        let follow_up = s.finish(P, now, true);
        assert_eq!(follow_up, Some(Decision::Deferred { due: now + MIN }));
        assert!(!s.is_current(P, first));
    }

    #[test]
    fn test_failed_reload_returns_to_idle_without_timestamp() {
        let now = Instant::now();
        let mut s = scheduler(now);
        start(&mut s, now);
        assert_eq!(s.finish(P, now, false), None);
        assert_eq!(s.phase(P), ReloadPhase::Idle);

        // no successful reload yet: the retry is not debounced
        let retry = s.request(P, ReloadScope::Entries, now + Duration::from_millis(1));
        assert!(matches!(retry, Decision::Start { .. }));
    }

    #[test]
    fn test_forgotten_target_drops_results() {
        let now = Instant::now();
        let mut s = scheduler(now);
        let revision = start(&mut s, now);
        s.forget(P);
        assert!(!s.is_current(P, revision));
        assert_eq!(s.finish(P, now, true), None);
    }

    #[test]
    fn test_due_orders_by_deadline() {
        let now = Instant::now();
        let mut s = scheduler(now);
        let q = ReloadTarget::Playlist(PlaylistId(2));
        for (target, offset) in [(q, 0u64), (P, 100)] {
            let at = now + Duration::from_millis(offset);
            s.request(target, ReloadScope::Entries, at);
            s.finish(target, at, true);
            s.request(target, ReloadScope::Entries, at);
        }
        let due: Vec<_> = s.due(now + MIN * 2).into_iter().map(|d| d.target).collect();
        assert_eq!(due, vec![q, P]);
    }

    #[test]
    fn test_poll_timer() {
        let now = Instant::now();
        let interval = Duration::from_secs(5);
        let mut s = ReloadScheduler::new(MIN, Some(interval), now);
        assert_eq!(s.next_deadline(), Some(now + interval));
        assert!(!s.poll_due(now + Duration::from_secs(1)));
        assert!(s.poll_due(now + interval));
        assert!(!s.poll_due(now + interval));
        assert_eq!(s.next_deadline(), Some(now + interval * 2));

        let push = ReloadScheduler::new(MIN, None, now);
        assert_eq!(push.next_deadline(), None);
    }
}
