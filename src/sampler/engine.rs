//! Sample ingest port and tick plumbing
//!
//! The ingest port is a datagram socket owned by the sampling thread. Every
//! inbound datagram counts as one timing sample; its payload is discarded,
//! only the arrival matters. The tick engine ties the high-resolution clock,
//! the accumulator and the port together behind the `TickTarget` seam so the
//! wakeup-source variants can be driven against fakes in tests.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::HighResClock;
use crate::stats::{SharedStats, StatsAccumulator};

/// Size of the outbound probe datagram. The content is never interpreted by
/// either side; only the arrival timing matters.
pub const PROBE_BYTES: usize = 64;

/// Non-blocking datagram receiver bound for the duration of one run.
pub struct SampleIngestPort {
    socket: UdpSocket,
    probe_destination: Option<SocketAddr>,
}

impl SampleIngestPort {
    /// Bind the ingest socket. A bind failure is fatal to the run.
    pub fn open(port: u16, probe_destination: Option<SocketAddr>) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            probe_destination,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Drain every pending datagram without blocking. Returns the number of
    /// arrivals, each of which the caller feeds in as one timing sample.
    pub fn drain_pending(&self) -> usize {
        let mut buf = [0u8; 512];
        let mut count = 0;
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok(_) => count += 1,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        count
    }

    /// Block up to `timeout` for at least one datagram. Returns 1 when a
    /// datagram arrived, 0 on timeout.
    pub fn wait_pending(&self, timeout: Duration) -> io::Result<usize> {
        self.socket.set_nonblocking(false)?;
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 512];
        let received = match self.socket.recv_from(&mut buf) {
            Ok(_) => Ok(1),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        };
        self.socket.set_nonblocking(true)?;
        received
    }

    /// Send one fixed-size probe datagram to the configured destination.
    /// Send failures are not a run-stopping condition and are ignored.
    pub fn send_probe(&self) {
        if let Some(dest) = self.probe_destination {
            let buf = [0u8; PROBE_BYTES];
            let _ = self.socket.send_to(&buf, dest);
        }
    }
}

/// The seam between the wakeup sources and the measurement plumbing.
/// Production code uses `TickEngine`; tests drive the sources with fakes.
pub trait TickTarget {
    /// One accepted timing event: measure the interval since the previous
    /// event and record it.
    fn tick(&mut self);

    /// Drain pending inbound datagrams, ticking once per arrival.
    fn drain_inbound(&mut self) -> usize;

    /// Wait up to `timeout` for inbound data, ticking once per arrival.
    fn wait_inbound(&mut self, timeout: Duration) -> io::Result<usize>;
}

/// Owns the clock, the accumulator and the ingest port for one run. Created
/// inside the sampling thread's run function and scoped to its lifetime.
pub struct TickEngine {
    clock: HighResClock,
    last_mark: f64,
    stats: StatsAccumulator,
    port: SampleIngestPort,
    send_probe: bool,
}

impl TickEngine {
    pub fn new(port: SampleIngestPort, shared: Arc<SharedStats>, send_probe: bool) -> Self {
        let mut clock = HighResClock::new();
        clock.reset();
        Self {
            clock,
            last_mark: 0.0,
            stats: StatsAccumulator::new(shared),
            port,
            send_probe,
        }
    }
}

impl TickTarget for TickEngine {
    fn tick(&mut self) {
        let now = self.clock.elapsed_seconds();
        let dt = now - self.last_mark;
        self.last_mark = now;
        self.stats.record_interval(dt);
        if self.send_probe {
            self.port.send_probe();
        }
    }

    fn drain_inbound(&mut self) -> usize {
        let arrivals = self.port.drain_pending();
        for _ in 0..arrivals {
            self.tick();
        }
        arrivals
    }

    fn wait_inbound(&mut self, timeout: Duration) -> io::Result<usize> {
        let mut arrivals = self.port.wait_pending(timeout)?;
        if arrivals > 0 {
            self.tick();
            arrivals += self.drain_inbound();
        }
        Ok(arrivals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::thread;
    use std::time::Instant;

    fn ephemeral_port() -> SampleIngestPort {
        SampleIngestPort::open(0, None).unwrap()
    }

    #[test]
    fn drain_counts_every_pending_datagram() {
        let port = ephemeral_port();
        let addr = port.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for _ in 0..5 {
            sender.send_to(b"x", ("127.0.0.1", addr.port())).unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(port.drain_pending(), 5);
        assert_eq!(port.drain_pending(), 0);
    }

    #[test]
    fn wait_pending_times_out_promptly_when_idle() {
        let port = ephemeral_port();
        let start = Instant::now();
        let n = port.wait_pending(Duration::from_millis(50)).unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn wait_pending_sees_an_arrival() {
        let port = ephemeral_port();
        let addr = port.local_addr().unwrap();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
            sender.send_to(b"x", ("127.0.0.1", addr.port())).unwrap();
        });
        let n = port.wait_pending(Duration::from_millis(500)).unwrap();
        handle.join().unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn probe_is_one_fixed_size_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let dest = receiver.local_addr().unwrap();
        let port = SampleIngestPort::open(0, Some(dest)).unwrap();

        port.send_probe();
        let mut buf = [0u8; 256];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(len, PROBE_BYTES);
    }

    #[test]
    fn engine_ticks_feed_the_accumulator() {
        let shared = SharedStats::new();
        let mut engine = TickEngine::new(ephemeral_port(), shared.clone(), false);
        for _ in 0..12 {
            engine.tick();
        }
        let snap = shared.snapshot();
        assert_eq!(snap.total_sample_count, 12);
        assert_eq!(snap.recorded_samples(), 2);
    }

    #[test]
    fn inbound_arrivals_tick_like_periodic_wakeups() {
        let shared = SharedStats::new();
        let port = ephemeral_port();
        let addr = port.local_addr().unwrap();
        let mut engine = TickEngine::new(port, shared.clone(), false);

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for _ in 0..3 {
            sender.send_to(b"x", ("127.0.0.1", addr.port())).unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.drain_inbound(), 3);
        assert_eq!(shared.snapshot().total_sample_count, 3);
    }
}
