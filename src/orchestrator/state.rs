//! Two-phase run state.
//!
//! Local intent (start/stop actions, request failures, the stop debounce) is
//! recorded as `desired`. Status events from the event channel are recorded as
//! `observed` and always win: observing clears any outstanding intent.
//! Every record bumps a shared epoch so a late response can tell whether the
//! intent it belongs to is still the current one.

use crate::models::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamped {
    state: RunState,
    epoch: u64,
}

/// Tracks desired vs. observed run state.
#[derive(Debug, Clone, Default)]
pub struct RunStateTracker {
    desired: Option<Stamped>,
    observed: Option<Stamped>,
    epoch: u64,
}

impl RunStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local intent and return its epoch.
    pub fn intend(&mut self, state: RunState) -> u64 {
        self.epoch += 1;
        self.desired = Some(Stamped {
            state,
            epoch: self.epoch,
        });
        self.epoch
    }

    /// Record an authoritative remote state. Outstanding intent is discarded.
    pub fn observe(&mut self, state: RunState) -> u64 {
        self.epoch += 1;
        self.observed = Some(Stamped {
            state,
            epoch: self.epoch,
        });
        self.desired = None;
        self.epoch
    }

    /// Displayed state: intent if it is newer than the last observation, else the observation.
    pub fn current(&self) -> RunState {
        match (self.desired, self.observed) {
            (Some(d), Some(o)) if d.epoch > o.epoch => d.state,
            (_, Some(o)) => o.state,
            (Some(d), None) => d.state,
            (None, None) => RunState::Idle,
        }
    }

    /// Epoch of the outstanding intent, if any.
    pub fn intent_epoch(&self) -> Option<u64> {
        self.desired.map(|d| d.epoch)
    }

    /// True when `epoch` still names the outstanding intent and it is `state`.
    pub fn is_current_intent(&self, epoch: u64, state: RunState) -> bool {
        matches!(self.desired, Some(d) if d.epoch == epoch && d.state == state)
    }

    pub fn observed(&self) -> Option<RunState> {
        self.observed.map(|o| o.state)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_idle() {
        assert_eq!(RunStateTracker::new().current(), RunState::Idle);
    }

    #[test]
    fn test_intent_shows_until_observed() {
        let mut tracker = RunStateTracker::new();
        let epoch = tracker.intend(RunState::Starting);
        assert_eq!(tracker.current(), RunState::Starting);
        assert!(tracker.is_current_intent(epoch, RunState::Starting));

        tracker.observe(RunState::Running);
        assert_eq!(tracker.current(), RunState::Running);
        assert_eq!(tracker.intent_epoch(), None);
        assert!(!tracker.is_current_intent(epoch, RunState::Starting));
    }

    #[test]
    fn test_remote_overrides_optimistic_state() {
        let mut tracker = RunStateTracker::new();
        tracker.intend(RunState::Starting);
        tracker.observe(RunState::Idle);
        assert_eq!(tracker.current(), RunState::Idle);
    }

    #[test]
    fn test_newer_intent_beats_older_observation() {
        let mut tracker = RunStateTracker::new();
        tracker.observe(RunState::Running);
        let epoch = tracker.intend(RunState::Stopping);
        assert_eq!(tracker.current(), RunState::Stopping);
        assert_eq!(tracker.observed(), Some(RunState::Running));
        assert_eq!(tracker.epoch(), epoch);
    }

    #[test]
    fn test_superseded_intent_is_stale() {
        let mut tracker = RunStateTracker::new();
        let start = tracker.intend(RunState::Starting);
        let stop = tracker.intend(RunState::Stopping);
        assert!(!tracker.is_current_intent(start, RunState::Starting));
        assert!(tracker.is_current_intent(stop, RunState::Stopping));
        assert_eq!(tracker.current(), RunState::Stopping);
    }
}
