//! Worker-side driver: dispatches inbound messages to registered
//! callbacks and writes the reply envelope.
//!
//! One driver manages one worker's end of a channel to the master. Each
//! inbound message selects the transition `(current state, message type)`
//! from the shared graph; the callback registered for that edge runs, its
//! result is wrapped in a [`WorkerResponse`] together with the worker's
//! requested state, and the reply is written back. Reaching `stop` or
//! `failed` closes the channel and ends the run.
//!
//! Faults are terminal: the channel is closed, the state becomes `failed`
//! and the optional error handler observes the fault kind. A disconnect
//! seen in the `stop` state is the master tearing down after our final
//! reply and is ignored.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use swarm_wire::{Channel, Message, MessageData, RequestedState, TypeCode, WorkerResponse};

use crate::error::{Result, SwarmError};
use crate::graph::{StateGraph, StateId};

/// Why a worker entered the failed state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WorkerFault {
    /// Transport failure mid-message.
    Io,
    /// A user callback returned an error.
    Aborted,
    /// Null, unknown, or unexpected message type for the current state.
    MessageType,
}

impl fmt::Display for WorkerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerFault::Io => write!(f, "io"),
            WorkerFault::Aborted => write!(f, "aborted"),
            WorkerFault::MessageType => write!(f, "messagetype"),
        }
    }
}

/// Cloneable handle that flips a driver's requested state to `stop`.
///
/// The flag travels in the *next* reply; the master decides when the
/// worker actually stops.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Requests that this worker stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once [`StopHandle::stop`] has been called.
    pub fn stop_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

type Callback = Box<dyn FnMut(&dyn Message) -> Result<Option<Box<dyn Message>>>>;
type ErrorHandler = Box<dyn FnMut(WorkerFault)>;

/// Drives one worker through the state graph by forwarding inbound
/// messages to registered callbacks.
pub struct WorkerDriver {
    graph: Arc<StateGraph>,
    current: StateId,
    /// Callback per transition, keyed `(from, to)`.
    callbacks: HashMap<(StateId, StateId), Callback>,
    error_handler: Option<ErrorHandler>,
    stop_flag: Arc<AtomicBool>,
}

impl WorkerDriver {
    /// Creates a driver in the `start` state.
    pub fn new(graph: Arc<StateGraph>) -> Self {
        let current = graph.start_state();
        WorkerDriver {
            graph,
            current,
            callbacks: HashMap::new(),
            error_handler: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers `callback` for the transition out of `from` initiated by
    /// messages of type `M`; the target state is implied by the graph.
    /// The callback's return value becomes the reply payload and may be
    /// `None`. Registering the same edge again replaces the callback.
    pub fn connect<M, F>(&mut self, from: StateId, mut callback: F) -> Result<()>
    where
        M: MessageData,
        F: FnMut(&M) -> Result<Option<Box<dyn Message>>> + 'static,
    {
        let code = TypeCode::from_name(M::NAME)?;
        let to = self.graph.next_state(from, code)?;
        let erased: Callback = Box::new(move |message: &dyn Message| {
            let typed = (message as &dyn Any)
                .downcast_ref::<M>()
                .ok_or_else(|| SwarmError::Custom("decoded message has unexpected type".into()))?;
            callback(typed)
        });
        self.callbacks.insert((from, to), erased);
        Ok(())
    }

    /// Fails unless every transition in the graph has a callback.
    pub fn check_connections(&self) -> Result<()> {
        for (from, to, _) in self.graph.edges() {
            if !self.callbacks.contains_key(&(from, to)) {
                return Err(SwarmError::MissingConnection {
                    from: self.graph.state_name(from).unwrap_or("<invalid>").to_owned(),
                    to: self.graph.state_name(to).unwrap_or("<invalid>").to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Current state of this worker.
    pub fn state(&self) -> StateId {
        self.current
    }

    /// The graph this driver dispatches over.
    pub fn graph(&self) -> &Arc<StateGraph> {
        &self.graph
    }

    /// Handle for requesting a stop from callbacks or other tasks.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_flag.clone())
    }

    /// Sets the error handler. The default actions (close the channel,
    /// enter `failed`) happen whether or not a handler is present.
    pub fn set_error_handler<F: FnMut(WorkerFault) + 'static>(&mut self, handler: F) {
        self.error_handler = Some(Box::new(handler));
    }

    /// Serves messages on `channel` until a terminal state is reached or a
    /// fault occurs. Fails fast if any transition lacks a callback.
    pub async fn run<S>(&mut self, mut channel: Channel<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.check_connections()?;
        info!("worker driver started");
        loop {
            let message = match channel.read().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    error!("received null message");
                    return self.fault(&mut channel, WorkerFault::MessageType).await;
                }
                Err(e) => {
                    warn!(error = %e, "channel read failed");
                    return self.fault(&mut channel, WorkerFault::Io).await;
                }
            };

            let next = match message
                .type_code()
                .map_err(SwarmError::from)
                .and_then(|code| self.graph.next_state(self.current, code))
            {
                Ok(next) => next,
                Err(e) => {
                    error!(error = %e, "no transition for inbound message");
                    return self.fault(&mut channel, WorkerFault::MessageType).await;
                }
            };

            debug!(
                from = self.graph.state_name(self.current).unwrap_or("<invalid>"),
                to = self.graph.state_name(next).unwrap_or("<invalid>"),
                "dispatching callback"
            );
            let reply = {
                let Some(callback) = self.callbacks.get_mut(&(self.current, next)) else {
                    // check_connections makes this unreachable.
                    error!("no callback for known transition");
                    return self.fault(&mut channel, WorkerFault::MessageType).await;
                };
                callback(message.as_ref())
            };
            let payload = match reply {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "callback failed");
                    return self.fault(&mut channel, WorkerFault::Aborted).await;
                }
            };

            self.current = next;
            let response = WorkerResponse {
                requested_state: if self.stop_flag.load(Ordering::Relaxed) {
                    RequestedState::Stop
                } else {
                    RequestedState::Work
                },
                payload,
            };
            if let Err(e) = channel.write(Some(&response)).await {
                // The master may tear the channel down as soon as it has
                // decided this worker is done; a disconnect on the reply
                // that takes us into `stop` is that teardown, not a fault.
                if e.is_disconnect() && self.current == self.graph.stop_state() {
                    debug!("peer closed while stopping; ignoring");
                    channel.close().await;
                    return Ok(());
                }
                warn!(error = %e, "channel write failed");
                return self.fault(&mut channel, WorkerFault::Io).await;
            }

            if self.current == self.graph.stop_state() || self.current == self.graph.failed_state()
            {
                debug!("terminal state reached; closing channel");
                channel.close().await;
                return Ok(());
            }
        }
    }

    /// Terminal fault handling: close, enter `failed`, inform the handler.
    async fn fault<S>(&mut self, channel: &mut Channel<S>, kind: WorkerFault) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        channel.close().await;
        self.current = self.graph.failed_state();
        if let Some(handler) = self.error_handler.as_mut() {
            debug!(kind = %kind, "calling user error handler");
            handler(kind);
        }
        Err(SwarmError::WorkerFault(kind))
    }
}
