//! Real-time sampling thread
//!
//! One dedicated OS thread owns everything a run touches: the run flags,
//! the statistics, the ingest socket and (in hardware mode) the RTC device
//! handle. All of it is constructed inside the thread's run function and
//! scoped to its lifetime; the caller only requests transitions and polls
//! snapshots.

pub mod config;
pub mod engine;
pub mod priority;
#[cfg(unix)]
pub mod rtc;
pub mod wakeup;

pub use config::{ClockMode, ProcessPriority, SamplingConfig, ThreadPriority};

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::stats::{SharedStats, StatsSnapshot};
use engine::{SampleIngestPort, TickEngine};
use wakeup::{Command, RunControl, SleepWaitLoop, TimerEventLoop};

/// How long `stop` waits for the thread to exit voluntarily.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Last-resort wait after escalation, before the thread is given up on.
pub const STOP_LAST_RESORT: Duration = Duration::from_secs(1);

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running; the call was a no-op.
    Idle,
    /// The thread exited within the grace period.
    Stopped,
    /// The thread did not exit in time and was detached. The degraded path:
    /// its resources remain held until the thread eventually dies with the
    /// process.
    Abandoned,
}

/// Lifecycle handle for the sampling thread: Idle → Starting → Running →
/// Stopping → Idle. Starting an already-running sampler stops the previous
/// run completely before the new one records anything.
pub struct SamplingThread {
    shared: Arc<SharedStats>,
    handle: Option<JoinHandle<()>>,
    commands: Option<Sender<Command>>,
    mode: Option<ClockMode>,
}

impl SamplingThread {
    pub fn new() -> Self {
        Self {
            shared: SharedStats::new(),
            handle: None,
            commands: None,
            mode: None,
        }
    }

    /// Launch a run with the given configuration. Every run gets a freshly
    /// zeroed stats block; there is no cross-run accumulation.
    pub fn start(&mut self, config: SamplingConfig) -> io::Result<()> {
        if self.handle.is_some() {
            self.stop();
        }
        // Fresh counters for every run. A thread abandoned by a previous
        // stop still holds the old block, where its abort flag stays set;
        // nothing reads that block anymore, so a zombie writer can neither
        // be revived nor leak ticks into this run.
        self.shared = SharedStats::new();
        self.shared.set_running(true);

        let (tx, rx) = mpsc::channel();
        let shared = self.shared.clone();
        let mode = config.mode;
        let handle = thread::Builder::new()
            .name("rt-sampler".to_string())
            .spawn(move || run_sampler(config, shared, rx))
            .map_err(|e| {
                self.shared.set_running(false);
                e
            })?;

        self.handle = Some(handle);
        self.commands = Some(tx);
        self.mode = Some(mode);
        Ok(())
    }

    /// Request termination and wait, bounded, for the thread to exit.
    /// A no-op returning immediately when nothing is running.
    pub fn stop(&mut self) -> StopOutcome {
        let Some(handle) = self.handle.take() else {
            return StopOutcome::Idle;
        };
        let commands = self.commands.take();

        // Signal termination the way the active variant expects it: a
        // cooperative quit for the event loop, the abort flag for the
        // blocking loops. Dropping the sender disconnects the command
        // channel, which the event loop also treats as quit.
        match self.mode.take() {
            Some(ClockMode::TimerEvent) => {
                if let Some(tx) = &commands {
                    let _ = tx.send(Command::Quit);
                }
            }
            _ => self.shared.request_abort(),
        }
        drop(commands);

        if wait_finished(&handle, STOP_GRACE) {
            let _ = handle.join();
            return StopOutcome::Stopped;
        }

        // Grace exceeded; escalate to the abort flag regardless of mode and
        // give the thread one last bounded chance.
        self.shared.request_abort();
        if wait_finished(&handle, STOP_LAST_RESORT) {
            let _ = handle.join();
            return StopOutcome::Stopped;
        }

        // A thread cannot be killed from outside; detaching it is the
        // documented degraded fallback.
        drop(handle);
        StopOutcome::Abandoned
    }

    pub fn is_running(&self) -> bool {
        self.shared.running()
    }

    /// Whether the current or most recent run raised the abort flag, either
    /// by request or because the thread hit an error.
    pub fn aborted(&self) -> bool {
        self.shared.abort_requested()
    }

    /// Read-only view of the run's statistics, valid at any time including
    /// mid-run.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.shared.snapshot()
    }
}

impl Default for SamplingThread {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SamplingThread {
    fn drop(&mut self) {
        // Callers should stop explicitly; this is the backstop.
        self.stop();
    }
}

fn wait_finished(handle: &JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if handle.is_finished() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    handle.is_finished()
}

fn run_sampler(config: SamplingConfig, shared: Arc<SharedStats>, commands: Receiver<Command>) {
    if let Err(e) = sampler_run(&config, &shared, commands) {
        // Startup and mid-run failures land here: flag the abort so the
        // caller can tell this run did not end by request.
        shared.request_abort();
        eprintln!("sampling run aborted: {e}");
    }
    shared.set_running(false);
}

/// The sampling thread's body. Every resource used by the run is created
/// here and dropped before return, on error paths included.
fn sampler_run(
    config: &SamplingConfig,
    shared: &Arc<SharedStats>,
    commands: Receiver<Command>,
) -> io::Result<()> {
    priority::elevate_current_thread(config.thread_priority)?;

    let destination = config.probe_destination()?;
    let port = SampleIngestPort::open(config.ingest_port, destination)?;
    let mut engine = TickEngine::new(port, shared.clone(), config.send_probe);
    let ctrl = RunControl::new(shared.clone(), commands);

    match config.mode {
        ClockMode::TimerEvent => TimerEventLoop::new(config.period()).drive(&mut engine, &ctrl),
        ClockMode::SleepWait => {
            #[cfg(windows)]
            let _resolution = priority::TimerResolutionGuard::raise(config.period_millis);
            SleepWaitLoop::new(config.period()).drive(&mut engine, &ctrl)
        }
        ClockMode::HardwareInterrupt => {
            #[cfg(unix)]
            {
                rtc::RtcWakeup::new(config.rtc_device.clone(), config.period_millis)
                    .drive(&mut engine, &ctrl)
            }
            #[cfg(not(unix))]
            {
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "hardware interrupt mode is not supported on this platform",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsAccumulator;

    fn idle_config(port: u16) -> SamplingConfig {
        SamplingConfig {
            mode: ClockMode::SleepWait,
            period_millis: 0,
            destination: None,
            send_probe: false,
            thread_priority: ThreadPriority::Normal,
            process_priority: ProcessPriority::Normal,
            ingest_port: port,
            ..SamplingConfig::default()
        }
    }

    #[test]
    fn restart_gives_a_stale_writer_no_path_into_the_new_run() {
        let mut sampler = SamplingThread::new();
        let stale = sampler.shared.clone();
        stale.request_abort();

        sampler.start(idle_config(42807)).unwrap();

        // The new run gets its own block; the one a lingering thread would
        // still hold is discarded, with its abort flag left set.
        assert!(!Arc::ptr_eq(&stale, &sampler.shared));
        assert!(stale.abort_requested());

        let mut acc = StatsAccumulator::new(stale.clone());
        for _ in 0..20 {
            acc.record_interval(0.005);
        }
        assert_eq!(sampler.snapshot().total_sample_count, 0);
        assert_eq!(sampler.stop(), StopOutcome::Stopped);
    }

    #[test]
    fn stop_on_idle_sampler_is_a_noop() {
        let mut sampler = SamplingThread::new();
        let start = Instant::now();
        assert_eq!(sampler.stop(), StopOutcome::Idle);
        assert_eq!(sampler.stop(), StopOutcome::Idle);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn snapshot_of_idle_sampler_is_zeroed() {
        let sampler = SamplingThread::new();
        let snap = sampler.snapshot();
        assert_eq!(snap.total_sample_count, 0);
        assert_eq!(snap.recorded_samples(), 0);
        assert!(!sampler.is_running());
    }
}
