//! State graph: the immutable description of a distributed algorithm.
//!
//! Nodes are worker states, directed edges are state transitions, and each
//! edge is keyed by the message type that initiates it. Within one
//! originating state the target and the message type each determine the
//! edge uniquely, which gives dispatch tables on both ends an unambiguous
//! `(state, message type) -> next state` lookup.
//!
//! Three states exist in every graph: `start` (where every worker begins),
//! `stop` (successful terminal) and `failed` (error terminal). Transitions
//! into `failed` are implicitly permitted.
//!
//! Restriction sets are named sets of forbidden `(from, to)` pairs. Which
//! sets are *active* is runtime information owned by the master; the graph
//! only records their definitions. The graph is built once, then shared
//! immutably (behind an `Arc`) by the master and every in-process driver.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use swarm_wire::{MessageData, TypeCode};

use crate::error::{Result, SwarmError};

/// Identifier of a state within one [`StateGraph`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StateId(usize);

impl StateId {
    /// Dense index of this state, suitable for table lookups.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Identifier of a restriction set within one [`StateGraph`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RestrictionSetId(usize);

/// Name registry handing out dense ids.
#[derive(Debug, Default)]
struct IdSpace {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl IdSpace {
    /// Creates an id for `name`; `None` when the name is taken.
    fn create(&mut self, name: &str) -> Option<usize> {
        if self.by_name.contains_key(name) {
            return None;
        }
        let id = self.names.len();
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        Some(id)
    }

    fn get(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    fn contains(&self, id: usize) -> bool {
        id < self.names.len()
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

/// An outgoing edge; the originating state is the map key.
#[derive(Debug)]
struct Edge {
    to: StateId,
    message_type: TypeCode,
}

/// Immutable graph of states, typed transitions and restriction sets.
pub struct StateGraph {
    states: IdSpace,
    /// Outgoing edges per state, in registration order.
    transitions: BTreeMap<StateId, Vec<Edge>>,
    restriction_sets: IdSpace,
    restrictions: BTreeMap<RestrictionSetId, BTreeSet<(StateId, StateId)>>,
    start: StateId,
    stop: StateId,
    failed: StateId,
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StateGraph {
    /// Creates a graph holding only the predefined states `start`, `stop`
    /// and `failed`.
    pub fn new() -> Self {
        let mut states = IdSpace::default();
        let start = StateId(
            states
                .create("start")
                .expect("predefined state names are distinct"),
        );
        let stop = StateId(
            states
                .create("stop")
                .expect("predefined state names are distinct"),
        );
        let failed = StateId(
            states
                .create("failed")
                .expect("predefined state names are distinct"),
        );
        StateGraph {
            states,
            transitions: BTreeMap::new(),
            restriction_sets: IdSpace::default(),
            restrictions: BTreeMap::new(),
            start,
            stop,
            failed,
        }
    }

    /// Initial state of every worker.
    pub fn start_state(&self) -> StateId {
        self.start
    }

    /// Successful terminal state.
    pub fn stop_state(&self) -> StateId {
        self.stop
    }

    /// Error terminal state; workers never leave it.
    pub fn failed_state(&self) -> StateId {
        self.failed
    }

    /// Adds a state; the name must be unique within the graph.
    pub fn add_state(&mut self, name: &str) -> Result<StateId> {
        self.states
            .create(name)
            .map(StateId)
            .ok_or_else(|| SwarmError::DuplicateState(name.to_owned()))
    }

    /// Looks a state up by name.
    pub fn state(&self, name: &str) -> Result<StateId> {
        self.states
            .get(name)
            .map(StateId)
            .ok_or_else(|| SwarmError::UnknownState(name.to_owned()))
    }

    /// The name a state was registered under.
    pub fn state_name(&self, id: StateId) -> Result<&str> {
        self.states.name(id.0).ok_or(SwarmError::InvalidStateId)
    }

    /// All states, in creation order.
    pub fn all_states(&self) -> Vec<StateId> {
        (0..self.states.len()).map(StateId).collect()
    }

    fn check_state(&self, id: StateId) -> Result<()> {
        if self.states.contains(id.0) {
            Ok(())
        } else {
            Err(SwarmError::InvalidStateId)
        }
    }

    fn check_restriction_set(&self, id: RestrictionSetId) -> Result<()> {
        if self.restriction_sets.contains(id.0) {
            Ok(())
        } else {
            Err(SwarmError::InvalidRestrictionSetId)
        }
    }

    // Infallible variant for states already validated by `check_state`.
    fn display_name(&self, id: StateId) -> String {
        self.states.name(id.0).unwrap_or("<invalid>").to_owned()
    }

    /// Adds the transition `from -> to`, initiated by messages of type
    /// `message_type`. Fails when either state is unknown, or when `from`
    /// already has an outgoing edge with the same target or the same
    /// message type.
    pub fn add_transition(
        &mut self,
        from: StateId,
        to: StateId,
        message_type: TypeCode,
    ) -> Result<()> {
        self.check_state(from)?;
        self.check_state(to)?;
        let edges = self.transitions.entry(from).or_default();
        if edges
            .iter()
            .any(|e| e.to == to || e.message_type == message_type)
        {
            return Err(SwarmError::ConflictingTransition {
                from: self.display_name(from),
            });
        }
        edges.push(Edge { to, message_type });
        Ok(())
    }

    /// [`StateGraph::add_transition`] keyed by a message type's tag.
    pub fn add_transition_for<M: MessageData>(&mut self, from: StateId, to: StateId) -> Result<()> {
        let code = TypeCode::from_name(M::NAME)?;
        self.add_transition(from, to, code)
    }

    /// The outgoing neighborhood of `from`.
    pub fn next_states(&self, from: StateId) -> Result<BTreeSet<StateId>> {
        self.check_state(from)?;
        Ok(self
            .transitions
            .get(&from)
            .map(|edges| edges.iter().map(|e| e.to).collect())
            .unwrap_or_default())
    }

    /// Outgoing neighbors of `from` in edge registration order. States
    /// without edges yield nothing; unknown states are the caller's bug
    /// and also yield nothing.
    pub(crate) fn neighbors(&self, from: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.transitions
            .get(&from)
            .into_iter()
            .flat_map(|edges| edges.iter().map(|e| e.to))
    }

    /// The unique neighbor reached from `from` by a message of type
    /// `message_type`.
    pub fn next_state(&self, from: StateId, message_type: TypeCode) -> Result<StateId> {
        self.check_state(from)?;
        self.transitions
            .get(&from)
            .and_then(|edges| edges.iter().find(|e| e.message_type == message_type))
            .map(|e| e.to)
            .ok_or_else(|| SwarmError::NoTransitionFor {
                from: self.display_name(from),
                message_type: message_type.to_string(),
            })
    }

    /// [`StateGraph::next_state`] keyed by a message type's tag.
    pub fn next_state_for<M: MessageData>(&self, from: StateId) -> Result<StateId> {
        let code = TypeCode::from_name(M::NAME)?;
        self.next_state(from, code)
    }

    /// The message type keying the edge `from -> to`.
    pub fn transition_message_type(&self, from: StateId, to: StateId) -> Result<TypeCode> {
        self.check_state(from)?;
        self.check_state(to)?;
        self.transitions
            .get(&from)
            .and_then(|edges| edges.iter().find(|e| e.to == to))
            .map(|e| e.message_type)
            .ok_or_else(|| SwarmError::NoTransitionTo {
                from: self.display_name(from),
                to: self.display_name(to),
            })
    }

    /// Every transition as `(from, to, message_type)`, grouped by
    /// originating state.
    pub fn edges(&self) -> impl Iterator<Item = (StateId, StateId, TypeCode)> + '_ {
        self.transitions.iter().flat_map(|(from, edges)| {
            edges.iter().map(move |e| (*from, e.to, e.message_type))
        })
    }

    /// Adds a named restriction set; the name must be unique.
    pub fn add_restriction_set(&mut self, name: &str) -> Result<RestrictionSetId> {
        self.restriction_sets
            .create(name)
            .map(RestrictionSetId)
            .ok_or_else(|| SwarmError::DuplicateRestrictionSet(name.to_owned()))
    }

    /// Looks a restriction set up by name.
    pub fn restriction_set(&self, name: &str) -> Result<RestrictionSetId> {
        self.restriction_sets
            .get(name)
            .map(RestrictionSetId)
            .ok_or_else(|| SwarmError::UnknownRestrictionSet(name.to_owned()))
    }

    /// The name a restriction set was registered under.
    pub fn restriction_set_name(&self, id: RestrictionSetId) -> Result<&str> {
        self.restriction_sets
            .name(id.0)
            .ok_or(SwarmError::InvalidRestrictionSetId)
    }

    /// Forbids the transition `from -> to` while `set` is active. The
    /// transition does not need to exist in the graph.
    pub fn add_restriction(
        &mut self,
        set: RestrictionSetId,
        from: StateId,
        to: StateId,
    ) -> Result<()> {
        self.check_restriction_set(set)?;
        self.check_state(from)?;
        self.check_state(to)?;
        self.restrictions.entry(set).or_default().insert((from, to));
        Ok(())
    }

    /// True when `set` forbids `from -> to`.
    pub fn is_restricted(&self, set: RestrictionSetId, from: StateId, to: StateId) -> Result<bool> {
        self.check_restriction_set(set)?;
        self.check_state(from)?;
        self.check_state(to)?;
        Ok(self
            .restrictions
            .get(&set)
            .is_some_and(|pairs| pairs.contains(&(from, to))))
    }

    /// The forbidden pairs of `set`.
    pub fn restrictions(&self, set: RestrictionSetId) -> Result<BTreeSet<(StateId, StateId)>> {
        self.check_restriction_set(set)?;
        Ok(self.restrictions.get(&set).cloned().unwrap_or_default())
    }
}
