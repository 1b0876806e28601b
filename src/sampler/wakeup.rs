//! Wakeup sources driving the sampling loop
//!
//! Each `ClockMode` variant has one loop type here (the hardware interrupt
//! variant lives in `rtc.rs`). All of them produce a sequence of wakeup
//! events against a `TickTarget` and return when termination is requested:
//! a cooperative `Quit` command for the event loop, the abort flag for the
//! blocking loops.

use std::io;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::sampler::engine::TickTarget;
use crate::stats::SharedStats;

/// Commands injected into the cooperative event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
}

/// Termination plumbing handed to a wakeup source: the shared abort flag
/// plus the command queue for the cooperative variant.
pub struct RunControl {
    shared: Arc<SharedStats>,
    commands: Receiver<Command>,
}

impl RunControl {
    pub fn new(shared: Arc<SharedStats>, commands: Receiver<Command>) -> Self {
        Self { shared, commands }
    }

    pub fn abort_requested(&self) -> bool {
        self.shared.abort_requested()
    }

    /// Wait up to `timeout` for a command. Returns true when the loop
    /// should terminate (quit received or the controlling side went away).
    fn quit_within(&self, timeout: Duration) -> bool {
        match self.commands.recv_timeout(timeout) {
            Ok(Command::Quit) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Drain whatever is still queued. The event loop is synchronous, so
    /// once it has returned nothing is in flight; clearing the queue here
    /// is the explicit completion point that replaces a timed grace delay
    /// before resources are torn down.
    fn drain_commands(&self) {
        loop {
            match self.commands.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

/// How often the cooperative loop polls the ingest port while waiting for
/// its next deadline or, with the periodic source disabled, for commands.
const EVENT_POLL: Duration = Duration::from_millis(20);

/// Cooperative, event-driven wakeup source. Ticks are produced by a timer
/// deadline inside an event loop that also services inbound samples and the
/// command queue. Termination is a `Quit` command, not the abort flag.
pub struct TimerEventLoop {
    period: Option<Duration>,
}

impl TimerEventLoop {
    pub fn new(period: Option<Duration>) -> Self {
        Self { period }
    }

    pub fn drive<T: TickTarget>(&mut self, target: &mut T, ctrl: &RunControl) -> io::Result<()> {
        match self.period {
            // Periodic source disabled: only inbound samples drive ticks.
            None => loop {
                if ctrl.quit_within(EVENT_POLL) {
                    break;
                }
                target.drain_inbound();
            },
            Some(period) => {
                let mut next = Instant::now() + period;
                loop {
                    let now = Instant::now();
                    if now >= next {
                        target.tick();
                        next += period;
                        if next <= now {
                            // Fell behind by more than a full period;
                            // realign instead of bursting catch-up ticks.
                            next = now + period;
                        }
                        continue;
                    }
                    let wait = (next - now).min(EVENT_POLL);
                    if ctrl.quit_within(wait) {
                        break;
                    }
                    target.drain_inbound();
                }
            }
        }
        ctrl.drain_commands();
        Ok(())
    }
}

/// Settle sleeps performed before the steady periodic loop, giving the OS
/// scheduler time to stabilize the thread's timing.
pub const SETTLE_SLEEPS: u32 = 10;

/// Bounded readiness wait used when the periodic source is disabled.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Blocking sleep-loop wakeup source. With a period it sleeps and ticks;
/// without one it blocks on bounded ingest-port waits. The abort flag is
/// checked every iteration.
pub struct SleepWaitLoop {
    period: Option<Duration>,
}

impl SleepWaitLoop {
    pub fn new(period: Option<Duration>) -> Self {
        Self { period }
    }

    pub fn drive<T: TickTarget>(&mut self, target: &mut T, ctrl: &RunControl) -> io::Result<()> {
        match self.period {
            None => {
                while !ctrl.abort_requested() {
                    target.wait_inbound(IDLE_WAIT)?;
                }
            }
            Some(period) => {
                for _ in 0..SETTLE_SLEEPS {
                    if ctrl.abort_requested() {
                        return Ok(());
                    }
                    thread::sleep(period);
                }
                while !ctrl.abort_requested() {
                    thread::sleep(period);
                    target.tick();
                    target.drain_inbound();
                }
            }
        }
        Ok(())
    }
}
