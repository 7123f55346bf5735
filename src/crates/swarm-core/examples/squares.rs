//! In-process demo: a master drives N workers through the
//! start/work/stop graph, squaring a queue of numbers.
//!
//! ```text
//! cargo run --example squares -- --workers 4 --jobs 32
//! ```
//!
//! `RUST_LOG=swarm_core=debug` shows every dispatch decision.

use std::any::Any;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use tokio::net::UnixStream;
use tracing_subscriber::EnvFilter;

use swarm_core::{StateGraph, SwarmConfig, SwarmDisplay, SwarmManager, WorkerDriver};
use swarm_wire::{Buffer, Channel, Message, MessageData, MessageRegistry};

#[derive(Default)]
struct Square {
    value: i64,
}

impl MessageData for Square {
    const NAME: &'static str = "square";

    fn write_data(&self, out: &mut Buffer) {
        out.write_i64(self.value);
    }

    fn read_data(
        &mut self,
        input: &mut Buffer,
        _registry: &MessageRegistry,
    ) -> swarm_wire::Result<()> {
        self.value = input.read_i64()?;
        Ok(())
    }
}

#[derive(Default)]
struct Finish;

impl MessageData for Finish {
    const NAME: &'static str = "finish";

    fn write_data(&self, _out: &mut Buffer) {}

    fn read_data(
        &mut self,
        _input: &mut Buffer,
        _registry: &MessageRegistry,
    ) -> swarm_wire::Result<()> {
        Ok(())
    }
}

#[derive(Parser)]
#[command(about = "Square a queue of numbers across a worker swarm")]
struct Args {
    /// Number of in-process workers.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Number of jobs to queue.
    #[arg(long, default_value_t = 32)]
    jobs: i64,

    /// Optional TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Display period in seconds; overrides the config file. 0 disables.
    #[arg(long)]
    display_interval: Option<f64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SwarmConfig::from_path(path).context("loading config")?,
        None => SwarmConfig::default(),
    };
    if let Some(interval) = args.display_interval {
        config.display_interval_secs = interval;
    }

    let mut registry = MessageRegistry::new();
    registry.register::<Square>()?;
    registry.register::<Finish>()?;
    let registry = Arc::new(registry);

    let mut graph = StateGraph::new();
    let work = graph.add_state("work")?;
    let start = graph.start_state();
    let stop = graph.stop_state();
    graph.add_transition_for::<Square>(start, work)?;
    graph.add_transition_for::<Square>(work, work)?;
    graph.add_transition_for::<Finish>(start, stop)?;
    graph.add_transition_for::<Finish>(work, stop)?;
    let nowork = graph.add_restriction_set("nowork")?;
    graph.add_restriction(nowork, start, work)?;
    graph.add_restriction(nowork, work, work)?;
    let graph = Arc::new(graph);

    let queue = Rc::new(RefCell::new((1..=args.jobs).collect::<Vec<i64>>()));
    let results = Rc::new(RefCell::new(Vec::<i64>::new()));

    let mut manager = SwarmManager::new(graph.clone(), |_swarm, worker, _last| {
        eprintln!("worker {worker} failed");
    });
    for from in [start, work] {
        let queue = queue.clone();
        manager.connect_message_generator(from, work, move |swarm, _worker| {
            let mut queue = queue.borrow_mut();
            let value = queue.pop().unwrap_or_default();
            if queue.is_empty() {
                swarm.activate_restriction_set(nowork);
                swarm.set_target_state(stop);
            }
            Box::new(Square { value })
        })?;
        manager.connect_message_generator(from, stop, |_swarm, _worker| Box::new(Finish))?;
    }
    let sink = results.clone();
    manager.set_result_callback(work, move |_swarm, _worker, payload| {
        if let Some(payload) = payload {
            if let Some(square) = (payload.as_ref() as &dyn Any).downcast_ref::<Square>() {
                sink.borrow_mut().push(square.value);
            }
        }
    })?;
    manager.set_target_state(work);
    manager.check_connections()?;
    if let Some(period) = config.display_interval() {
        manager.set_display(SwarmDisplay::new(period));
    }

    let mut drivers = Vec::new();
    let mut channels = Vec::new();
    for _ in 0..args.workers {
        let (master_end, worker_end) = UnixStream::pair()?;
        manager.add_worker(Channel::new(master_end, registry.clone()));

        let mut driver = WorkerDriver::new(graph.clone());
        for from in [start, work] {
            driver.connect::<Square, _>(from, |square| {
                Ok(Some(Box::new(Square {
                    value: square.value * square.value,
                }) as Box<dyn Message>))
            })?;
            driver.connect::<Finish, _>(from, |_finish| Ok(None))?;
        }
        drivers.push(driver);
        channels.push(Channel::new(worker_end, registry.clone()));
    }

    let worker_runs = drivers
        .iter_mut()
        .zip(channels)
        .map(|(driver, channel)| driver.run(channel));
    let (worker_results, master_result) = tokio::join!(join_all(worker_runs), manager.run());
    master_result?;
    for result in worker_results {
        result?;
    }

    let sum: i64 = results.borrow().iter().sum();
    println!(
        "{} workers squared {} numbers; sum of squares = {sum}",
        args.workers,
        results.borrow().len()
    );
    Ok(())
}
