//! Periodic terminal tally of the swarm.
//!
//! Prints one line per state with the number of active and inactive
//! workers in it, the current target, and real/user/system time since the
//! display was created. On a TTY the output rewrites itself in place; on
//! anything else it prints plainly and stretches the period tenfold.
//! Purely observational; the display never influences coordination.

use std::io::IsTerminal;
use std::time::{Duration, Instant};

use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::debug;

use crate::manager::Swarm;

/// Periodic status printer, attached with
/// [`SwarmManager::set_display`](crate::manager::SwarmManager::set_display).
pub struct SwarmDisplay {
    interval: Interval,
    started: Instant,
    user0: Duration,
    sys0: Duration,
    tty: bool,
    first: bool,
}

impl SwarmDisplay {
    /// Creates a display printing every `period` (10× that off-TTY).
    pub fn new(period: Duration) -> Self {
        let tty = std::io::stdout().is_terminal();
        let period = if tty { period } else { period * 10 };
        let mut interval = interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let (user0, sys0) = cpu_times();
        debug!(period_secs = period.as_secs_f32(), tty, "status display enabled");
        SwarmDisplay {
            interval,
            started: Instant::now(),
            user0,
            sys0,
            tty,
            first: true,
        }
    }

    /// Waits for the next print slot.
    pub(crate) async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Prints the current tally.
    pub(crate) fn print(&mut self, swarm: &Swarm) {
        let graph = swarm.graph();
        let tally = swarm.worker_tally();
        let states = graph.all_states();
        let width = states
            .iter()
            .map(|s| graph.state_name(*s).map(str::len).unwrap_or(0))
            .max()
            .unwrap_or(0);

        if self.first {
            self.first = false;
            if self.tty {
                print!("\x1b[2J");
            }
        }
        if self.tty {
            print!("\x1b[0;0H");
        }
        let clear = if self.tty { "\x1b[K" } else { "" };

        for state in states {
            let name = graph.state_name(state).unwrap_or("<invalid>");
            let active = tally.get(&(state, true)).copied().unwrap_or(0);
            let inactive = tally.get(&(state, false)).copied().unwrap_or(0);
            println!("{name:>width$} {active} {inactive}{clear}");
        }
        let target = swarm
            .target_state()
            .and_then(|t| graph.state_name(t).ok())
            .unwrap_or("-");
        println!("target: {target}{clear}");

        let (user, sys) = cpu_times();
        println!(
            "time: real {:.3}s; user {:.3}s; sys {:.3}s{clear}",
            self.started.elapsed().as_secs_f32(),
            user.saturating_sub(self.user0).as_secs_f32(),
            sys.saturating_sub(self.sys0).as_secs_f32(),
        );
    }
}

/// (user, system) CPU time of this process.
#[cfg(unix)]
fn cpu_times() -> (Duration, Duration) {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // getrusage only writes the struct; RUSAGE_SELF is always valid.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return (Duration::ZERO, Duration::ZERO);
    }
    let usage = unsafe { usage.assume_init() };
    (timeval(usage.ru_utime), timeval(usage.ru_stime))
}

#[cfg(not(unix))]
fn cpu_times() -> (Duration, Duration) {
    (Duration::ZERO, Duration::ZERO)
}

#[cfg(unix)]
fn timeval(t: libc::timeval) -> Duration {
    Duration::new(t.tv_sec.max(0) as u64, (t.tv_usec.max(0) as u32) * 1000)
}
