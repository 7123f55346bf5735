//! End-to-end master/worker scenarios over in-process socket pairs.
//!
//! The graph under test:
//!
//! ```text
//! start ->[dowork] work ->[dowork] work
//! start ->[dostop] stop    work ->[dostop] stop
//! ```
//!
//! plus a `nowork` restriction set forbidding `start -> work` and
//! `work -> work`. The master hands out jobs from the back of a queue;
//! when the queue empties it activates `nowork` and retargets `stop`.
//! Workers square each job value.

#![cfg(unix)]

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::join_all;
use tokio::net::UnixStream;

use swarm_core::{
    RestrictionSetId, StateGraph, StateId, SwarmError, SwarmManager, SwarmObserver, WorkerDriver,
    WorkerFault, WorkerId,
};
use swarm_wire::{Buffer, Channel, Message, MessageData, MessageRegistry};

#[derive(Default)]
struct DoWork {
    value: i32,
}

impl MessageData for DoWork {
    const NAME: &'static str = "dowork";

    fn write_data(&self, out: &mut Buffer) {
        out.write_i32(self.value);
    }

    fn read_data(
        &mut self,
        input: &mut Buffer,
        _registry: &MessageRegistry,
    ) -> swarm_wire::Result<()> {
        self.value = input.read_i32()?;
        Ok(())
    }
}

#[derive(Default)]
struct DoStop;

impl MessageData for DoStop {
    const NAME: &'static str = "dostop";

    fn write_data(&self, _out: &mut Buffer) {}

    fn read_data(
        &mut self,
        _input: &mut Buffer,
        _registry: &MessageRegistry,
    ) -> swarm_wire::Result<()> {
        Ok(())
    }
}

/// Registered but not part of any transition.
#[derive(Default)]
struct Stray;

impl MessageData for Stray {
    const NAME: &'static str = "stray";

    fn write_data(&self, _out: &mut Buffer) {}

    fn read_data(
        &mut self,
        _input: &mut Buffer,
        _registry: &MessageRegistry,
    ) -> swarm_wire::Result<()> {
        Ok(())
    }
}

fn registry() -> Arc<MessageRegistry> {
    let mut registry = MessageRegistry::new();
    registry.register::<DoWork>().unwrap();
    registry.register::<DoStop>().unwrap();
    registry.register::<Stray>().unwrap();
    Arc::new(registry)
}

fn graph() -> Arc<StateGraph> {
    let mut g = StateGraph::new();
    let work = g.add_state("work").unwrap();
    let start = g.start_state();
    let stop = g.stop_state();

    g.add_transition_for::<DoWork>(start, work).unwrap();
    g.add_transition_for::<DoWork>(work, work).unwrap();
    g.add_transition_for::<DoStop>(start, stop).unwrap();
    g.add_transition_for::<DoStop>(work, stop).unwrap();

    let nowork = g.add_restriction_set("nowork").unwrap();
    g.add_restriction(nowork, work, work).unwrap();
    g.add_restriction(nowork, start, work).unwrap();

    Arc::new(g)
}

/// Test master: queue of jobs, collected results, recorded failures.
struct Master {
    manager: SwarmManager,
    work: Rc<RefCell<Vec<i32>>>,
    results: Rc<RefCell<Vec<i32>>>,
    failures: Rc<RefCell<Vec<WorkerId>>>,
}

impl Master {
    fn new(graph: &Arc<StateGraph>, jobs: Vec<i32>) -> Master {
        let work = Rc::new(RefCell::new(jobs));
        let results = Rc::new(RefCell::new(Vec::new()));
        let failures = Rc::new(RefCell::new(Vec::new()));

        let failure_log = failures.clone();
        let mut manager = SwarmManager::new(graph.clone(), move |_swarm, worker, _last| {
            failure_log.borrow_mut().push(worker);
        });

        let work_state = graph.state("work").unwrap();
        let start = graph.start_state();
        let stop = graph.stop_state();
        let nowork = graph.restriction_set("nowork").unwrap();

        for from in [start, work_state] {
            let queue = work.clone();
            manager
                .connect_message_generator(from, work_state, move |swarm, _worker| {
                    let mut queue = queue.borrow_mut();
                    let value = queue.pop().expect("generator called with work available");
                    if queue.is_empty() {
                        swarm.activate_restriction_set(nowork);
                        swarm.set_target_state(stop);
                    }
                    Box::new(DoWork { value })
                })
                .unwrap();
            manager
                .connect_message_generator(from, stop, |_swarm, _worker| Box::new(DoStop))
                .unwrap();
        }

        let sink = results.clone();
        manager
            .set_result_callback(work_state, move |_swarm, _worker, payload| {
                if let Some(payload) = payload {
                    let job: &DoWork = (payload.as_ref() as &dyn Any)
                        .downcast_ref()
                        .expect("work results are DoWork messages");
                    sink.borrow_mut().push(job.value);
                }
            })
            .unwrap();

        manager.set_target_state(work_state);
        manager.check_connections().unwrap();

        Master {
            manager,
            work,
            results,
            failures,
        }
    }

    fn sorted_results(&self) -> Vec<i32> {
        let mut results = self.results.borrow().clone();
        results.sort_unstable();
        results
    }
}

#[derive(Default, Clone, Copy)]
struct WorkerBehavior {
    /// Return an error from the n-th work callback.
    fail_at: Option<usize>,
    /// Return an error from the stop callback.
    fail_on_stop: bool,
    /// Request a stop after the n-th work callback.
    stop_after: Option<usize>,
}

fn make_worker(graph: &Arc<StateGraph>, behavior: WorkerBehavior) -> WorkerDriver {
    let mut driver = WorkerDriver::new(graph.clone());
    let stop_handle = driver.stop_handle();
    let work = graph.state("work").unwrap();
    let calls = Rc::new(Cell::new(0usize));

    for from in [graph.start_state(), work] {
        let calls = calls.clone();
        let stop_handle = stop_handle.clone();
        driver
            .connect::<DoWork, _>(from, move |job| {
                let n = calls.get() + 1;
                calls.set(n);
                if behavior.fail_at == Some(n) {
                    return Err(SwarmError::Custom("simulated worker failure".into()));
                }
                if behavior.stop_after == Some(n) {
                    stop_handle.stop();
                }
                Ok(Some(Box::new(DoWork {
                    value: job.value * job.value,
                }) as Box<dyn Message>))
            })
            .unwrap();
        driver
            .connect::<DoStop, _>(from, move |_stop| {
                if behavior.fail_on_stop {
                    return Err(SwarmError::Custom("failure while stopping".into()));
                }
                Ok(None)
            })
            .unwrap();
    }
    driver
}

#[tokio::test]
async fn single_worker_drains_work_queue() {
    let graph = graph();
    let registry = registry();
    let mut master = Master::new(&graph, vec![1, 2, 3]);
    let mut driver = make_worker(&graph, WorkerBehavior::default());

    let (master_end, worker_end) = UnixStream::pair().unwrap();
    let worker = master.manager.add_worker(Channel::new(master_end, registry.clone()));

    let (worker_result, master_result) = tokio::join!(
        driver.run(Channel::new(worker_end, registry)),
        master.manager.run(),
    );
    worker_result.unwrap();
    master_result.unwrap();

    assert!(master.work.borrow().is_empty());
    assert!(master.failures.borrow().is_empty());
    assert_eq!(master.sorted_results(), vec![1, 4, 9]);
    assert_eq!(driver.state(), graph.stop_state());
    assert_eq!(
        master.manager.swarm().state(worker),
        Some((graph.stop_state(), false))
    );
    assert_eq!(
        master.manager.swarm().last_state(worker),
        Some(graph.state("work").unwrap())
    );
}

#[tokio::test]
async fn two_workers_drain_work_queue() {
    let graph = graph();
    let registry = registry();
    let mut master = Master::new(&graph, vec![1, 2, 3]);
    let mut first = make_worker(&graph, WorkerBehavior::default());
    let mut second = make_worker(&graph, WorkerBehavior::default());

    let (m1, w1) = UnixStream::pair().unwrap();
    let (m2, w2) = UnixStream::pair().unwrap();
    master.manager.add_worker(Channel::new(m1, registry.clone()));
    master.manager.add_worker(Channel::new(m2, registry.clone()));

    let (r1, r2, master_result) = tokio::join!(
        first.run(Channel::new(w1, registry.clone())),
        second.run(Channel::new(w2, registry)),
        master.manager.run(),
    );
    r1.unwrap();
    r2.unwrap();
    master_result.unwrap();

    assert!(master.work.borrow().is_empty());
    assert!(master.failures.borrow().is_empty());
    assert_eq!(master.sorted_results(), vec![1, 4, 9]);
    assert_eq!(first.state(), graph.stop_state());
    assert_eq!(second.state(), graph.stop_state());
}

#[tokio::test]
async fn many_workers_consume_each_job_exactly_once() {
    const WORKERS: usize = 8;
    const JOBS: i32 = 50;

    let graph = graph();
    let registry = registry();
    let jobs: Vec<i32> = (1..=JOBS).collect();
    let mut master = Master::new(&graph, jobs);

    let mut drivers = Vec::new();
    let mut channels = Vec::new();
    for _ in 0..WORKERS {
        let (master_end, worker_end) = UnixStream::pair().unwrap();
        master.manager.add_worker(Channel::new(master_end, registry.clone()));
        drivers.push(make_worker(&graph, WorkerBehavior::default()));
        channels.push(Channel::new(worker_end, registry.clone()));
    }

    let worker_runs = drivers
        .iter_mut()
        .zip(channels)
        .map(|(driver, channel)| driver.run(channel));
    let (worker_results, master_result) =
        tokio::join!(join_all(worker_runs), master.manager.run());
    master_result.unwrap();
    for result in worker_results {
        result.unwrap();
    }

    assert!(master.work.borrow().is_empty());
    assert!(master.failures.borrow().is_empty());
    let expected: Vec<i32> = (1..=JOBS).map(|v| v * v).collect();
    assert_eq!(master.sorted_results(), expected);
    for driver in &drivers {
        assert_eq!(driver.state(), graph.stop_state());
    }
}

#[tokio::test]
async fn worker_failure_is_recorded_and_survived() {
    let graph = graph();
    let registry = registry();
    let mut master = Master::new(&graph, vec![1, 2, 3, 4, 5]);
    let mut driver = make_worker(
        &graph,
        WorkerBehavior {
            fail_at: Some(2),
            ..WorkerBehavior::default()
        },
    );

    let (master_end, worker_end) = UnixStream::pair().unwrap();
    let worker = master.manager.add_worker(Channel::new(master_end, registry.clone()));

    let (worker_result, master_result) = tokio::join!(
        driver.run(Channel::new(worker_end, registry)),
        master.manager.run(),
    );
    master_result.unwrap();

    assert!(matches!(
        worker_result,
        Err(SwarmError::WorkerFault(WorkerFault::Aborted))
    ));
    assert_eq!(master.failures.borrow().as_slice(), &[worker]);
    // Only the first job completed; the in-flight one was lost with the
    // worker and the rest stayed queued.
    assert_eq!(master.sorted_results(), vec![25]);
    assert_eq!(master.work.borrow().len(), 3);
    assert_eq!(
        master.manager.swarm().state(worker),
        Some((graph.failed_state(), false))
    );
}

#[tokio::test]
async fn failure_while_stopping_is_recorded() {
    let graph = graph();
    let registry = registry();
    let mut master = Master::new(&graph, vec![1, 2]);
    let mut driver = make_worker(
        &graph,
        WorkerBehavior {
            fail_on_stop: true,
            ..WorkerBehavior::default()
        },
    );

    let (master_end, worker_end) = UnixStream::pair().unwrap();
    let worker = master.manager.add_worker(Channel::new(master_end, registry.clone()));

    let (worker_result, master_result) = tokio::join!(
        driver.run(Channel::new(worker_end, registry)),
        master.manager.run(),
    );
    master_result.unwrap();

    assert!(matches!(
        worker_result,
        Err(SwarmError::WorkerFault(WorkerFault::Aborted))
    ));
    assert_eq!(master.failures.borrow().as_slice(), &[worker]);
    assert!(master.work.borrow().is_empty());
    assert_eq!(master.sorted_results(), vec![1, 4]);
}

#[tokio::test]
async fn unexpected_message_type_fails_worker() {
    let graph = graph();
    let registry = registry();
    let mut driver = make_worker(&graph, WorkerBehavior::default());
    let faults = Rc::new(RefCell::new(Vec::new()));
    let fault_log = faults.clone();
    driver.set_error_handler(move |kind| fault_log.borrow_mut().push(kind));

    let (master_end, worker_end) = UnixStream::pair().unwrap();
    let mut master_chan = Channel::new(master_end, registry.clone());

    // `stray` is a registered type but no transition out of `start` is
    // keyed by it.
    master_chan.write(Some(&Stray)).await.unwrap();
    let result = driver.run(Channel::new(worker_end, registry)).await;

    assert!(matches!(
        result,
        Err(SwarmError::WorkerFault(WorkerFault::MessageType))
    ));
    assert_eq!(*faults.borrow(), vec![WorkerFault::MessageType]);
    assert_eq!(driver.state(), graph.failed_state());
    // The worker closed its end without replying.
    assert!(master_chan.read().await.unwrap_err().is_disconnect());
}

#[tokio::test]
async fn worker_requested_stop_is_honoured() {
    let graph = graph();
    let registry = registry();
    let mut master = Master::new(&graph, vec![1, 2, 3]);
    let mut driver = make_worker(
        &graph,
        WorkerBehavior {
            stop_after: Some(1),
            ..WorkerBehavior::default()
        },
    );

    let (master_end, worker_end) = UnixStream::pair().unwrap();
    let worker = master.manager.add_worker(Channel::new(master_end, registry.clone()));

    let (worker_result, master_result) = tokio::join!(
        driver.run(Channel::new(worker_end, registry)),
        master.manager.run(),
    );
    worker_result.unwrap();
    master_result.unwrap();

    // The worker was steered to stop even though work remained.
    assert_eq!(driver.state(), graph.stop_state());
    assert_eq!(master.work.borrow().len(), 2);
    assert!(master.failures.borrow().is_empty());
    assert_eq!(
        master.manager.swarm().state(worker),
        Some((graph.stop_state(), false))
    );
}

/// Observer events, recorded by id.
#[derive(Debug, PartialEq, Eq, Clone)]
enum Event {
    Transition(WorkerId, Option<StateId>, StateId),
    Idle(WorkerId, StateId),
    Target(StateId),
    Restrictions(BTreeSet<RestrictionSetId>),
}

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<Event>>,
}

impl SwarmObserver for Recorder {
    fn on_state_transition(&self, worker: WorkerId, from: Option<StateId>, to: StateId) {
        self.events
            .borrow_mut()
            .push(Event::Transition(worker, from, to));
    }

    fn on_idle(&self, worker: WorkerId, state: StateId) {
        self.events.borrow_mut().push(Event::Idle(worker, state));
    }

    fn on_target_changed(&self, target: StateId) {
        self.events.borrow_mut().push(Event::Target(target));
    }

    fn on_restrictions_changed(&self, active: &BTreeSet<RestrictionSetId>) {
        self.events
            .borrow_mut()
            .push(Event::Restrictions(active.clone()));
    }
}

#[tokio::test]
async fn observers_see_transitions_in_order() {
    let graph = graph();
    let registry = registry();
    let work = graph.state("work").unwrap();
    let start = graph.start_state();
    let stop = graph.stop_state();
    let nowork = graph.restriction_set("nowork").unwrap();

    let mut master = Master::new(&graph, vec![7]);
    let recorder = Rc::new(Recorder::default());
    master.manager.register_observer(recorder.clone());
    let mut driver = make_worker(&graph, WorkerBehavior::default());

    let (master_end, worker_end) = UnixStream::pair().unwrap();
    let worker = master.manager.add_worker(Channel::new(master_end, registry.clone()));

    let (worker_result, master_result) = tokio::join!(
        driver.run(Channel::new(worker_end, registry)),
        master.manager.run(),
    );
    worker_result.unwrap();
    master_result.unwrap();

    // The only job is handed out during the very first dispatch, so the
    // queue empties inside the generator: restriction and target change
    // notifications land between the registration event and the
    // start -> work transition.
    let active: BTreeSet<_> = [nowork].into_iter().collect();
    assert_eq!(
        recorder.events.borrow().as_slice(),
        &[
            Event::Transition(worker, None, start),
            Event::Restrictions(active),
            Event::Target(stop),
            Event::Transition(worker, Some(start), work),
            Event::Transition(worker, Some(work), stop),
        ]
    );
}

#[tokio::test]
async fn idle_worker_rewakes_on_deactivated_restriction() {
    let graph = graph();
    let registry = registry();
    let work = graph.state("work").unwrap();
    let nowork = graph.restriction_set("nowork").unwrap();

    let mut master = Master::new(&graph, vec![3]);
    let recorder = Rc::new(Recorder::default());
    master.manager.register_observer(recorder.clone());
    let mut driver = make_worker(&graph, WorkerBehavior::default());

    // With `nowork` active and the target still `work`, the new worker has
    // nowhere to go and parks idle.
    master.manager.activate_restriction_set(nowork);
    let (master_end, worker_end) = UnixStream::pair().unwrap();
    let worker = master.manager.add_worker(Channel::new(master_end, registry.clone()));
    assert!(recorder
        .events
        .borrow()
        .contains(&Event::Idle(worker, graph.start_state())));
    assert_eq!(
        master.manager.swarm().state(worker),
        Some((graph.start_state(), false))
    );

    // Loosening the restrictions re-wakes it and the job flows.
    master.manager.deactivate_restriction_set(nowork);
    assert_eq!(
        master.manager.swarm().state(worker),
        Some((work, true))
    );

    let (worker_result, master_result) = tokio::join!(
        driver.run(Channel::new(worker_end, registry)),
        master.manager.run(),
    );
    worker_result.unwrap();
    master_result.unwrap();

    assert!(master.work.borrow().is_empty());
    assert!(master.failures.borrow().is_empty());
    assert_eq!(master.sorted_results(), vec![9]);
    assert_eq!(driver.state(), graph.stop_state());
}
