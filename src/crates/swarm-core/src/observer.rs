//! Observer interface for swarm-side events.

use std::collections::BTreeSet;

use crate::graph::{RestrictionSetId, StateId};
use crate::manager::WorkerId;

/// Receives notifications about worker and swarm state changes.
///
/// All methods default to no-ops, so implementors override only what they
/// need. Observers run on the master's event loop and must be cheap; they
/// must not call back into the manager. For one worker, transitions are
/// delivered in the order they happen.
pub trait SwarmObserver {
    /// A worker moved from `from` to `to`. `from` is `None` for the
    /// registration event of a newly added worker.
    fn on_state_transition(&self, worker: WorkerId, from: Option<StateId>, to: StateId) {
        let _ = (worker, from, to);
    }

    /// No allowed transition led toward the target; the worker stays
    /// inactive until a target or restriction change re-wakes it.
    fn on_idle(&self, worker: WorkerId, state: StateId) {
        let _ = (worker, state);
    }

    /// The master is now steering workers toward `target`.
    fn on_target_changed(&self, target: StateId) {
        let _ = target;
    }

    /// The set of active restriction sets changed.
    fn on_restrictions_changed(&self, active: &BTreeSet<RestrictionSetId>) {
        let _ = active;
    }
}
