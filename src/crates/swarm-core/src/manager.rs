//! Master-side swarm manager: drives every worker through the state
//! graph toward the current target.
//!
//! The manager owns one record per worker (current state, previous state,
//! active flag, latest requested state) plus the application-supplied
//! message generators and result callbacks. Each worker's channel is
//! serviced by a small conduit task that writes one outbound message,
//! awaits the reply and reports back over an event queue; the manager
//! task itself is single-threaded and handlers run to completion, so no
//! worker record is ever touched concurrently.
//!
//! Application callbacks receive [`&mut Swarm`](Swarm), the manager's
//! control surface. Target and restriction changes made from inside a
//! callback enqueue eligible workers on a wake queue which is drained
//! once the callback returns; called from outside a callback, the same
//! methods re-dispatch immediately.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use swarm_wire::{Channel, Message, RequestedState, WireError, WorkerResponse};

use crate::display::SwarmDisplay;
use crate::error::{Result, SwarmError};
use crate::graph::{RestrictionSetId, StateGraph, StateId};
use crate::observer::SwarmObserver;
use crate::path::next_allowed_hop;

/// Identifier of a worker within one [`SwarmManager`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instruction from the manager to a worker's conduit task.
enum Command {
    Send(Box<dyn Message>),
    Close,
}

/// Report from a conduit task to the manager.
enum SwarmEvent {
    /// Reply frame for a dispatched message (`None` is a null message).
    Inbound(WorkerId, Option<Box<dyn Message>>),
    /// The channel failed or the peer went away.
    Disconnected(WorkerId, WireError),
}

/// Master-side record of one worker.
struct WorkerEntry {
    outbound: UnboundedSender<Command>,
    state: StateId,
    last_state: StateId,
    /// True from the moment a message is handed to the channel until its
    /// reply has been processed.
    active: bool,
    requested: RequestedState,
}

/// The manager's control surface: worker records, target state, active
/// restrictions and observers.
///
/// Message generators, result callbacks and the failed handler receive
/// `&mut Swarm` so they can steer the swarm mid-dispatch (retarget,
/// activate or deactivate restriction sets, abort). Re-dispatch triggered
/// from inside a callback is deferred to a wake queue the manager drains
/// afterwards.
pub struct Swarm {
    graph: Arc<StateGraph>,
    workers: BTreeMap<WorkerId, WorkerEntry>,
    target: Option<StateId>,
    active_restrictions: BTreeSet<RestrictionSetId>,
    observers: Vec<Rc<dyn SwarmObserver>>,
    wake: VecDeque<WorkerId>,
    aborting: bool,
    next_worker: u64,
}

impl Swarm {
    fn new(graph: Arc<StateGraph>) -> Self {
        Swarm {
            graph,
            workers: BTreeMap::new(),
            target: None,
            active_restrictions: BTreeSet::new(),
            observers: Vec::new(),
            wake: VecDeque::new(),
            aborting: false,
            next_worker: 0,
        }
    }

    /// The graph this swarm runs over.
    pub fn graph(&self) -> &Arc<StateGraph> {
        &self.graph
    }

    /// The state the master is steering workers toward, once set.
    pub fn target_state(&self) -> Option<StateId> {
        self.target
    }

    /// The currently active restriction sets.
    pub fn active_restriction_sets(&self) -> &BTreeSet<RestrictionSetId> {
        &self.active_restrictions
    }

    /// `(state, active)` of a worker.
    pub fn state(&self, worker: WorkerId) -> Option<(StateId, bool)> {
        self.workers.get(&worker).map(|w| (w.state, w.active))
    }

    /// The state a worker was in before its current one.
    pub fn last_state(&self, worker: WorkerId) -> Option<StateId> {
        self.workers.get(&worker).map(|w| w.last_state)
    }

    /// All registered workers.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    /// Number of workers per `(state, active)` pair.
    pub fn worker_tally(&self) -> BTreeMap<(StateId, bool), usize> {
        let mut tally = BTreeMap::new();
        for w in self.workers.values() {
            *tally.entry((w.state, w.active)).or_insert(0) += 1;
        }
        tally
    }

    /// Declares the state to steer every worker toward. Changing the
    /// target re-wakes idle workers.
    pub fn set_target_state(&mut self, target: StateId) {
        if self.target == Some(target) {
            return;
        }
        self.target = Some(target);
        self.notify(|o| o.on_target_changed(target));
        self.wake_idle();
    }

    /// Adds `set` to the active restrictions.
    pub fn activate_restriction_set(&mut self, set: RestrictionSetId) {
        if self.active_restrictions.insert(set) {
            self.notify(|o| o.on_restrictions_changed(&self.active_restrictions));
        }
    }

    /// Removes `set` from the active restrictions. Loosened restrictions
    /// re-wake idle workers.
    pub fn deactivate_restriction_set(&mut self, set: RestrictionSetId) {
        if self.active_restrictions.remove(&set) {
            debug!(
                set = self.graph.restriction_set_name(set).unwrap_or("<invalid>"),
                "deactivated restriction set"
            );
            self.notify(|o| o.on_restrictions_changed(&self.active_restrictions));
            self.wake_idle();
        }
    }

    /// Hard-fails every non-terminal worker: the target becomes `failed`,
    /// channels close, and subsequent I/O events are dropped. Aborting is
    /// idempotent.
    pub fn abort(&mut self) {
        self.aborting = true;
        let failed = self.graph.failed_state();
        let stop = self.graph.stop_state();
        self.target = Some(failed);
        self.notify(|o| o.on_target_changed(failed));
        let ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        for worker in ids {
            let Some(entry) = self.workers.get_mut(&worker) else {
                continue;
            };
            if entry.active || (entry.state != failed && entry.state != stop) {
                entry.last_state = entry.state;
                entry.state = failed;
                entry.active = false;
                let _ = entry.outbound.send(Command::Close);
                let last = entry.last_state;
                self.notify(|o| o.on_state_transition(worker, Some(last), failed));
            }
        }
    }

    fn notify(&self, f: impl Fn(&dyn SwarmObserver)) {
        for observer in &self.observers {
            f(observer.as_ref());
        }
    }

    /// Queues every inactive, non-terminal worker for re-dispatch.
    fn wake_idle(&mut self) {
        let stop = self.graph.stop_state();
        let failed = self.graph.failed_state();
        for (worker, entry) in &self.workers {
            if !entry.active
                && entry.state != stop
                && entry.state != failed
                && !self.wake.contains(worker)
            {
                self.wake.push_back(*worker);
            }
        }
    }
}

type Generator = Box<dyn FnMut(&mut Swarm, WorkerId) -> Box<dyn Message>>;
type ResultCallback = Box<dyn FnMut(&mut Swarm, WorkerId, Option<Box<dyn Message>>)>;
type FailedHandler = Box<dyn FnMut(&mut Swarm, WorkerId, StateId)>;

/// Coordinates a swarm of workers over per-worker channels.
///
/// Failures are local to one worker: the failed handler passed to
/// [`SwarmManager::new`] is the single place where the application decides
/// whether to re-enqueue the lost work or abort the whole swarm. The
/// manager is single-threaded and not `Send`; drive it with
/// [`SwarmManager::run`] on the task that built it.
pub struct SwarmManager {
    swarm: Swarm,
    generators: HashMap<(StateId, StateId), Generator>,
    result_callbacks: HashMap<StateId, ResultCallback>,
    failed_handler: FailedHandler,
    events: UnboundedReceiver<SwarmEvent>,
    events_tx: UnboundedSender<SwarmEvent>,
    display: Option<SwarmDisplay>,
}

impl SwarmManager {
    /// Creates a manager over `graph`. `failed_handler` runs once per
    /// worker failure with the state the worker was in.
    pub fn new<F>(graph: Arc<StateGraph>, failed_handler: F) -> Self
    where
        F: FnMut(&mut Swarm, WorkerId, StateId) + 'static,
    {
        let (events_tx, events) = mpsc::unbounded_channel();
        SwarmManager {
            swarm: Swarm::new(graph),
            generators: HashMap::new(),
            result_callbacks: HashMap::new(),
            failed_handler: Box::new(failed_handler),
            events,
            events_tx,
            display: None,
        }
    }

    /// The control surface (read access).
    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    /// The graph this manager dispatches over.
    pub fn graph(&self) -> &Arc<StateGraph> {
        &self.swarm.graph
    }

    /// Registers the generator producing the outbound message for the
    /// transition `from -> to`; fails when no such edge exists.
    pub fn connect_message_generator<F>(
        &mut self,
        from: StateId,
        to: StateId,
        generator: F,
    ) -> Result<()>
    where
        F: FnMut(&mut Swarm, WorkerId) -> Box<dyn Message> + 'static,
    {
        self.swarm.graph.transition_message_type(from, to)?;
        self.generators.insert((from, to), Box::new(generator));
        Ok(())
    }

    /// Registers the callback invoked when a worker completes a transition
    /// *into* `state`; it receives the reply payload, which may be `None`.
    pub fn set_result_callback<F>(&mut self, state: StateId, callback: F) -> Result<()>
    where
        F: FnMut(&mut Swarm, WorkerId, Option<Box<dyn Message>>) + 'static,
    {
        self.swarm.graph.state_name(state)?;
        self.result_callbacks.insert(state, Box::new(callback));
        Ok(())
    }

    /// See [`Swarm::set_target_state`].
    pub fn set_target_state(&mut self, target: StateId) {
        self.swarm.set_target_state(target);
        self.drain_wakes();
    }

    /// See [`Swarm::activate_restriction_set`].
    pub fn activate_restriction_set(&mut self, set: RestrictionSetId) {
        self.swarm.activate_restriction_set(set);
        self.drain_wakes();
    }

    /// See [`Swarm::deactivate_restriction_set`].
    pub fn deactivate_restriction_set(&mut self, set: RestrictionSetId) {
        self.swarm.deactivate_restriction_set(set);
        self.drain_wakes();
    }

    /// See [`Swarm::abort`].
    pub fn abort(&mut self) {
        self.swarm.abort();
        self.drain_wakes();
    }

    /// Registers an observer for swarm events.
    pub fn register_observer(&mut self, observer: Rc<dyn SwarmObserver>) {
        self.swarm.observers.push(observer);
    }

    /// Enables the periodic status display.
    pub fn set_display(&mut self, display: SwarmDisplay) {
        self.display = Some(display);
    }

    /// Fails unless a target state is set and every transition in the
    /// graph has a message generator.
    pub fn check_connections(&self) -> Result<()> {
        if self.swarm.target.is_none() {
            return Err(SwarmError::NoTargetState);
        }
        for (from, to, _) in self.swarm.graph.edges() {
            if !self.generators.contains_key(&(from, to)) {
                return Err(SwarmError::MissingConnection {
                    from: self
                        .swarm
                        .graph
                        .state_name(from)
                        .unwrap_or("<invalid>")
                        .to_owned(),
                    to: self
                        .swarm
                        .graph
                        .state_name(to)
                        .unwrap_or("<invalid>")
                        .to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Registers a worker on `channel`, records it in the `start` state
    /// and immediately tries to give it work.
    pub fn add_worker<S>(&mut self, channel: Channel<S>) -> WorkerId
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let worker = WorkerId(self.swarm.next_worker);
        self.swarm.next_worker += 1;

        let (outbound, commands) = mpsc::unbounded_channel();
        tokio::spawn(conduit(worker, channel, commands, self.events_tx.clone()));

        let start = self.swarm.graph.start_state();
        self.swarm.workers.insert(
            worker,
            WorkerEntry {
                outbound,
                state: start,
                last_state: start,
                active: false,
                requested: RequestedState::Work,
            },
        );
        debug!(worker = %worker, "added worker");
        self.swarm
            .notify(|o| o.on_state_transition(worker, None, start));
        self.give_work_to(worker);
        self.drain_wakes();
        worker
    }

    /// Processes conduit events until no worker is active and nothing is
    /// queued; with every worker terminal (or parked idle) the swarm is
    /// quiescent and `run` returns. A periodic display, if set, prints
    /// between events and once more at the end.
    pub async fn run(&mut self) -> Result<()> {
        info!(workers = self.swarm.workers.len(), "swarm manager running");
        loop {
            while let Ok(event) = self.events.try_recv() {
                self.dispatch_event(event);
            }
            if self.swarm.workers.values().all(|w| !w.active) {
                break;
            }
            let event = match self.display.as_mut() {
                Some(display) => {
                    tokio::select! {
                        event = self.events.recv() => event,
                        _ = display.tick() => {
                            display.print(&self.swarm);
                            continue;
                        }
                    }
                }
                None => self.events.recv().await,
            };
            match event {
                Some(event) => self.dispatch_event(event),
                None => break,
            }
        }
        if let Some(display) = self.display.as_mut() {
            display.print(&self.swarm);
        }
        info!("swarm manager finished");
        Ok(())
    }

    fn dispatch_event(&mut self, event: SwarmEvent) {
        match event {
            SwarmEvent::Inbound(worker, message) => self.on_inbound(worker, message),
            SwarmEvent::Disconnected(worker, error) => self.on_channel_error(worker, error),
        }
        self.drain_wakes();
    }

    /// Re-dispatches workers queued by target or restriction changes.
    fn drain_wakes(&mut self) {
        let stop = self.swarm.graph.stop_state();
        let failed = self.swarm.graph.failed_state();
        while let Some(worker) = self.swarm.wake.pop_front() {
            let eligible = self
                .swarm
                .workers
                .get(&worker)
                .map(|w| !w.active && w.state != stop && w.state != failed)
                .unwrap_or(false);
            if eligible {
                self.give_work_to(worker);
            }
        }
    }

    /// Picks the next transition for `worker` and dispatches the generated
    /// message, or parks the worker idle when no allowed path leads to the
    /// target.
    fn give_work_to(&mut self, worker: WorkerId) {
        if self.swarm.aborting {
            warn!(worker = %worker, "give_work_to called while aborting");
        }
        let stop = self.swarm.graph.stop_state();
        let failed = self.swarm.graph.failed_state();
        let Some(entry) = self.swarm.workers.get(&worker) else {
            debug_assert!(false, "give_work_to for unknown worker");
            return;
        };
        debug_assert!(!entry.active && entry.state != stop && entry.state != failed);

        let current = entry.state;
        let target = if entry.requested == RequestedState::Stop {
            Some(stop)
        } else {
            self.swarm.target
        };
        let next = target.and_then(|target| {
            next_allowed_hop(
                &self.swarm.graph,
                current,
                target,
                &self.swarm.active_restrictions,
            )
        });

        let Some(next) = next else {
            debug!(
                worker = %worker,
                state = self.swarm.graph.state_name(current).unwrap_or("<invalid>"),
                "no allowed transition; leaving worker idle"
            );
            self.swarm.notify(|o| o.on_idle(worker, current));
            return;
        };

        debug!(
            worker = %worker,
            from = self.swarm.graph.state_name(current).unwrap_or("<invalid>"),
            to = self.swarm.graph.state_name(next).unwrap_or("<invalid>"),
            "initiating state transition"
        );
        if let Some(entry) = self.swarm.workers.get_mut(&worker) {
            entry.last_state = current;
            entry.state = next;
            entry.active = true;
        }
        let message = match self.generators.get_mut(&(current, next)) {
            Some(generator) => generator(&mut self.swarm, worker),
            None => {
                // check_connections makes this unreachable.
                error!(worker = %worker, "no generator for transition");
                self.set_failed(worker);
                return;
            }
        };
        if let Some(entry) = self.swarm.workers.get(&worker) {
            if entry.outbound.send(Command::Send(message)).is_err() {
                warn!(worker = %worker, "worker channel task is gone");
            }
        }
        self.swarm
            .notify(|o| o.on_state_transition(worker, Some(current), next));
    }

    /// Processes one reply: bookkeeping, result callback, next dispatch.
    fn on_inbound(&mut self, worker: WorkerId, message: Option<Box<dyn Message>>) {
        debug!(worker = %worker, "got message from worker");
        let stop = self.swarm.graph.stop_state();
        let failed = self.swarm.graph.failed_state();
        let Some(entry) = self.swarm.workers.get_mut(&worker) else {
            return;
        };
        if !entry.active {
            error!(worker = %worker, "message from worker that is not active");
            let _ = entry.outbound.send(Command::Close);
            self.set_failed(worker);
            return;
        }
        entry.active = false;

        let response = match message {
            Some(message) => {
                let message: Box<dyn Any> = message;
                match message.downcast::<WorkerResponse>() {
                    Ok(response) => *response,
                    Err(_) => {
                        error!(
                            worker = %worker,
                            "reply is not a worker response; closing and failing worker"
                        );
                        let _ = entry.outbound.send(Command::Close);
                        self.set_failed(worker);
                        return;
                    }
                }
            }
            None => {
                error!(worker = %worker, "null reply; closing and failing worker");
                let _ = entry.outbound.send(Command::Close);
                self.set_failed(worker);
                return;
            }
        };

        if entry.requested != response.requested_state {
            debug!(worker = %worker, requested = ?response.requested_state, "worker switched requested state");
        }
        entry.requested = response.requested_state;
        let state = entry.state;

        if let Some(callback) = self.result_callbacks.get_mut(&state) {
            debug!(worker = %worker, "calling result callback");
            callback(&mut self.swarm, worker, response.payload);
        }

        // The callback may have aborted or failed this worker; re-check.
        let Some(entry) = self.swarm.workers.get(&worker) else {
            return;
        };
        if entry.active {
            return;
        }
        if entry.state == stop || entry.state == failed {
            debug!(worker = %worker, "worker reached terminal state");
            let _ = entry.outbound.send(Command::Close);
            return;
        }
        self.give_work_to(worker);
    }

    /// Channel-level failure or disconnect for one worker.
    fn on_channel_error(&mut self, worker: WorkerId, error: WireError) {
        debug!(worker = %worker, error = %error, "channel event");
        if self.swarm.aborting {
            debug!(worker = %worker, "ignoring channel error while aborting");
            return;
        }
        let stop = self.swarm.graph.stop_state();
        let failed = self.swarm.graph.failed_state();
        let Some(entry) = self.swarm.workers.get(&worker) else {
            return;
        };
        if entry.state == failed {
            debug!(worker = %worker, "worker already failed; ignoring");
            return;
        }
        if !entry.active && entry.state == stop && error.is_disconnect() {
            debug!(worker = %worker, "worker stopped; ignoring close");
            return;
        }
        warn!(worker = %worker, error = %error, "worker channel failed");
        self.set_failed(worker);
    }

    /// Marks `worker` failed, notifies observers, runs the failed handler.
    fn set_failed(&mut self, worker: WorkerId) {
        let failed = self.swarm.graph.failed_state();
        let Some(entry) = self.swarm.workers.get_mut(&worker) else {
            return;
        };
        entry.active = false;
        let last = entry.state;
        entry.state = failed;
        let _ = entry.outbound.send(Command::Close);
        self.swarm
            .notify(|o| o.on_state_transition(worker, Some(last), failed));
        (self.failed_handler)(&mut self.swarm, worker, last);
    }
}

/// Services one worker's channel: writes each dispatched message, awaits
/// the reply, and reports inbound frames and failures to the manager.
async fn conduit<S>(
    worker: WorkerId,
    mut channel: Channel<S>,
    mut commands: UnboundedReceiver<Command>,
    events: UnboundedSender<SwarmEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    if let Err(e) = channel.write(Some(message.as_ref())).await {
                        let _ = events.send(SwarmEvent::Disconnected(worker, e));
                        return;
                    }
                    // Write completed; the reply is now the only thing the
                    // worker may send.
                    match channel.read().await {
                        Ok(reply) => {
                            let _ = events.send(SwarmEvent::Inbound(worker, reply));
                        }
                        Err(e) => {
                            let _ = events.send(SwarmEvent::Disconnected(worker, e));
                            return;
                        }
                    }
                }
                Some(Command::Close) | None => {
                    channel.close().await;
                    return;
                }
            },
            // The line is quiet between rounds; anything arriving here is
            // the peer closing or a protocol violation.
            result = channel.read() => {
                let error = match result {
                    Ok(_) => WireError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "unsolicited message from worker",
                    )),
                    Err(e) => e,
                };
                let _ = events.send(SwarmEvent::Disconnected(worker, error));
                channel.close().await;
                return;
            }
        }
    }
}
