//! Error types for graph construction and swarm coordination
//!
//! Construction-time problems (duplicate names, conflicting edges, missing
//! connections) are programmer errors and surface as `Err` before any
//! message flows; steady-state failures are local to one worker and are
//! reported through the driver's error handler and the master's failed
//! handler rather than through these results.

use thiserror::Error;

use crate::driver::WorkerFault;

/// Result type for swarm operations
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Errors raised by the state graph, the worker driver and the swarm
/// manager.
#[derive(Error, Debug)]
pub enum SwarmError {
    /// Lookup of a state name that was never added
    #[error("unknown state '{0}'")]
    UnknownState(String),

    /// A state id that does not belong to this graph
    #[error("invalid state id")]
    InvalidStateId,

    /// `add_state` with a name that already exists
    #[error("state '{0}' already exists")]
    DuplicateState(String),

    /// Lookup of a restriction set name that was never added
    #[error("unknown restriction set '{0}'")]
    UnknownRestrictionSet(String),

    /// `add_restriction_set` with a name that already exists
    #[error("restriction set '{0}' already exists")]
    DuplicateRestrictionSet(String),

    /// A restriction set id that does not belong to this graph
    #[error("invalid restriction set id")]
    InvalidRestrictionSetId,

    /// A second outgoing edge from `from` with the same target or the same
    /// message type
    #[error("conflicting state transition out of '{from}'")]
    ConflictingTransition { from: String },

    /// No edge `from -> to` exists
    #[error("state transition {from} -> {to} does not exist")]
    NoTransitionTo { from: String, to: String },

    /// No edge out of `from` is keyed by this message type
    #[error("no state transition from '{from}' for message type '{message_type}'")]
    NoTransitionFor { from: String, message_type: String },

    /// `check_connections` found an edge without a callback or generator
    #[error("missing connection for state transition {from} -> {to}")]
    MissingConnection { from: String, to: String },

    /// `check_connections` ran before a target state was set
    #[error("no target state has been set")]
    NoTargetState,

    /// The worker driver entered the failed state
    #[error("worker failed: {0}")]
    WorkerFault(WorkerFault),

    /// Wire-level failure
    #[error(transparent)]
    Wire(#[from] swarm_wire::WireError),

    /// Application-defined error from a user callback
    #[error("{0}")]
    Custom(String),
}
