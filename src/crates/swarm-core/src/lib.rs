//! # swarm-core: state-graph driven master/worker dispatch
//!
//! A coordination fabric in which a single master steers many workers
//! through a shared finite-state machine. The algorithm is injected by
//! the application as a [`StateGraph`] (states, typed transitions,
//! restriction sets) plus callbacks: message generators and result
//! callbacks on the master, per-transition handlers on each worker.
//!
//! ## Roles
//!
//! - [`StateGraph`]: immutable description of the algorithm, shared via
//!   `Arc` by the master and every driver.
//! - [`WorkerDriver`]: worker-side loop: decode inbound message, run the
//!   callback for `(current state, message type)`, reply with a
//!   [`WorkerResponse`](swarm_wire::WorkerResponse) envelope.
//! - [`SwarmManager`]: master-side scheduler: picks each worker's next
//!   transition toward the current target (avoiding active restriction
//!   sets), dispatches generated messages, folds replies back, and
//!   survives individual worker failures.
//! - [`SwarmDisplay`]: optional periodic status tally.
//!
//! ## Concurrency model
//!
//! Single-threaded and cooperative: run the manager and any in-process
//! drivers on one current-thread runtime and `join!` their `run` futures.
//! The only suspension points are channel reads, channel writes and the
//! display timer. Worker failures are local; the failed handler decides
//! whether lost work is re-enqueued or the swarm aborts.
//!
//! ## Sketch
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swarm_core::{SwarmManager, StateGraph, WorkerDriver};
//! use swarm_wire::{Channel, MessageRegistry};
//!
//! # use swarm_wire::{Buffer, MessageData};
//! # #[derive(Default)] struct Job;
//! # impl MessageData for Job {
//! #     const NAME: &'static str = "job";
//! #     fn write_data(&self, _out: &mut Buffer) {}
//! #     fn read_data(&mut self, _i: &mut Buffer, _r: &MessageRegistry) -> swarm_wire::Result<()> { Ok(()) }
//! # }
//! # async fn demo() -> swarm_core::Result<()> {
//! let mut graph = StateGraph::new();
//! let work = graph.add_state("work")?;
//! graph.add_transition_for::<Job>(graph.start_state(), work)?;
//! let graph = Arc::new(graph);
//!
//! let mut registry = MessageRegistry::new();
//! registry.register::<Job>()?;
//! let registry = Arc::new(registry);
//!
//! let mut manager = SwarmManager::new(graph.clone(), |_swarm, worker, state| {
//!     eprintln!("worker {worker} failed in state {state:?}");
//! });
//! manager.connect_message_generator(graph.start_state(), work, |_swarm, _worker| {
//!     Box::new(Job)
//! })?;
//! manager.set_target_state(work);
//! manager.check_connections()?;
//!
//! let (master_end, worker_end) = tokio::net::UnixStream::pair().map_err(swarm_wire::WireError::from)?;
//! manager.add_worker(Channel::new(master_end, registry.clone()));
//!
//! let mut driver = WorkerDriver::new(graph.clone());
//! driver.connect::<Job, _>(graph.start_state(), |_job| Ok(None))?;
//! let (_, _) = tokio::join!(manager.run(), driver.run(Channel::new(worker_end, registry)));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod display;
pub mod driver;
pub mod error;
pub mod graph;
pub mod manager;
pub mod observer;
pub mod path;

pub use config::SwarmConfig;
pub use display::SwarmDisplay;
pub use driver::{StopHandle, WorkerDriver, WorkerFault};
pub use error::{Result, SwarmError};
pub use graph::{RestrictionSetId, StateGraph, StateId};
pub use manager::{Swarm, SwarmManager, WorkerId};
pub use observer::SwarmObserver;
pub use path::next_allowed_hop;
