//! Next-hop search over the state graph.
//!
//! Given a worker's current state, the target the master is steering
//! toward and the active restriction sets, find the first state on a
//! shortest allowed path. Breadth-first over paths: the visited set only
//! ever contains states from *completed* levels, which is what lets a
//! self-loop be discovered when current equals target.

use std::collections::BTreeSet;

use crate::graph::{RestrictionSetId, StateGraph, StateId};

/// Returns the next state on a shortest path from `current` to `target`
/// that traverses no forbidden edge, or `None` when no such path exists.
///
/// Deterministic: paths within a level extend in insertion order and a
/// state's outgoing edges iterate in registration order, so ties between
/// equal-length paths resolve to the earliest-registered route.
pub fn next_allowed_hop(
    graph: &StateGraph,
    current: StateId,
    target: StateId,
    active_restrictions: &BTreeSet<RestrictionSetId>,
) -> Option<StateId> {
    let forbidden = |from: StateId, to: StateId| {
        active_restrictions
            .iter()
            .any(|set| graph.is_restricted(*set, from, to).unwrap_or(false))
    };

    let mut visited: BTreeSet<StateId> = BTreeSet::new();
    // Each frontier entry is (tail of the path, first hop after `current`);
    // the hop is None only for the initial zero-length path.
    let mut frontier: Vec<(StateId, Option<StateId>)> = vec![(current, None)];

    // The number of hops is bounded by the number of states.
    for _ in 0..graph.all_states().len() {
        let mut next_frontier: Vec<(StateId, Option<StateId>)> = Vec::new();
        for (tail, hop) in &frontier {
            for neighbor in graph.neighbors(*tail) {
                if forbidden(*tail, neighbor) || visited.contains(&neighbor) {
                    continue;
                }
                let hop = hop.unwrap_or(neighbor);
                if neighbor == target {
                    return Some(hop);
                }
                next_frontier.push((neighbor, Some(hop)));
            }
        }
        frontier = next_frontier;
        if frontier.is_empty() {
            break;
        }
        for (tail, _) in &frontier {
            visited.insert(*tail);
        }
    }
    None
}
