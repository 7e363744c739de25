use std::collections::VecDeque;
use std::io;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossterm::event::{self, KeyEvent, KeyEventKind};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};

/// Longest we block while the terminal may have keys or a resize pending.
const TERMINAL_POLL: Duration = Duration::from_millis(50);

/// Longest we block at all, bounds how late a signal is noticed.
const MAX_POLL: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub enum Event {
    /// The recurring period timer fired
    Tick,
    /// Once a second: rates, clock and log window
    Clock,
    /// The `-W` deadline passed
    Deadline,
    /// Socket at this index in the slice handed to `next_event` is readable
    Readable(usize),
    Key(KeyEvent),
    Resize,
    /// SIGINT, SIGHUP or SIGTERM
    Shutdown,
}

/// Recurring timer that skips missed periods instead of bursting.
#[derive(Debug, Clone)]
pub struct Timer {
    period: Duration,
    next: Instant,
}

impl Timer {
    pub fn new(period: Duration, now: Instant) -> Self {
        Timer {
            period,
            next: now + period,
        }
    }

    /// Returns true at most once per period.
    pub fn fire(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
        true
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }
}

/// Single threaded event source: timers, readable sockets, terminal
/// input and signals, handed out one event at a time.
pub struct Reactor {
    tick: Timer,
    clock: Timer,
    deadline: Option<Instant>,
    shutdown: Arc<AtomicBool>,
    terminal: bool,
    pending: VecDeque<Event>,
}

impl Reactor {
    /// `shutdown` is the flag the signal handler sets, the reactor turns it
    /// into `Event::Shutdown`. Timers start counting now.
    pub fn new(
        period: Duration,
        deadline: Option<Duration>,
        terminal: bool,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let now = Instant::now();
        Reactor {
            tick: Timer::new(period, now),
            clock: Timer::new(Duration::from_secs(1), now),
            deadline: deadline.map(|d| now + d),
            shutdown,
            terminal,
            pending: VecDeque::new(),
        }
    }

    pub fn next_event(&mut self, sockets: &[BorrowedFd<'_>]) -> io::Result<Event> {
        loop {
            if self.shutdown.swap(false, Ordering::SeqCst) {
                return Ok(Event::Shutdown);
            }
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            let now = Instant::now();
            if self.deadline.is_some_and(|at| now >= at) {
                self.deadline = None;
                return Ok(Event::Deadline);
            }
            if self.tick.fire(now) {
                return Ok(Event::Tick);
            }
            if self.clock.fire(now) {
                return Ok(Event::Clock);
            }

            if self.terminal && event::poll(Duration::ZERO)? {
                match event::read()? {
                    event::Event::Key(key) if key.kind == KeyEventKind::Press => {
                        return Ok(Event::Key(key));
                    }
                    event::Event::Resize(..) => return Ok(Event::Resize),
                    _ => continue,
                }
            }

            self.wait_readable(sockets, self.timeout(now))?;
        }
    }

    fn timeout(&self, now: Instant) -> Duration {
        let mut timeout = self
            .tick
            .remaining(now)
            .min(self.clock.remaining(now))
            .min(MAX_POLL);
        if let Some(at) = self.deadline {
            timeout = timeout.min(at.saturating_duration_since(now));
        }
        if self.terminal {
            timeout = timeout.min(TERMINAL_POLL);
        }
        timeout
    }

    fn wait_readable(&mut self, sockets: &[BorrowedFd<'_>], timeout: Duration) -> io::Result<()> {
        let mut fds: Vec<PollFd<'_>> = sockets
            .iter()
            .map(|fd| PollFd::new(*fd, PollFlags::POLLIN))
            .collect();
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

        match poll(&mut fds, millis) {
            Ok(0) | Err(Errno::EINTR) => Ok(()),
            Ok(_) => {
                for (index, fd) in fds.iter().enumerate() {
                    if fd.revents().is_some_and(|r| !r.is_empty()) {
                        self.pending.push_back(Event::Readable(index));
                    }
                }
                Ok(())
            }
            Err(errno) => Err(io::Error::from(errno)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_once_per_period() {
        let start = Instant::now();
        let mut timer = Timer::new(Duration::from_millis(100), start);
        assert!(!timer.fire(start));
        assert!(!timer.fire(start + Duration::from_millis(99)));
        assert!(timer.fire(start + Duration::from_millis(100)));
        assert!(!timer.fire(start + Duration::from_millis(150)));
        assert!(timer.fire(start + Duration::from_millis(200)));
    }

    #[test]
    fn late_timer_skips_missed_periods() {
        let start = Instant::now();
        let mut timer = Timer::new(Duration::from_millis(100), start);
        let late = start + Duration::from_millis(1050);
        assert!(timer.fire(late));
        assert!(!timer.fire(late));
        assert_eq!(timer.remaining(late), Duration::from_millis(100));
    }

    fn reactor(period: Duration, deadline: Option<Duration>) -> (Reactor, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (Reactor::new(period, deadline, false, flag.clone()), flag)
    }

    #[test]
    fn shutdown_flag_becomes_event() {
        let (mut reactor, flag) = reactor(Duration::from_secs(60), None);
        flag.store(true, Ordering::SeqCst);
        assert!(matches!(reactor.next_event(&[]), Ok(Event::Shutdown)));
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn expired_deadline_fires_once() {
        let (mut reactor, flag) = reactor(Duration::from_secs(60), Some(Duration::ZERO));
        assert!(matches!(reactor.next_event(&[]), Ok(Event::Deadline)));
        flag.store(true, Ordering::SeqCst);
        assert!(matches!(reactor.next_event(&[]), Ok(Event::Shutdown)));
    }

    #[test]
    fn tick_arrives_after_period() {
        let (mut reactor, _flag) = reactor(Duration::from_millis(10), None);
        assert!(matches!(reactor.next_event(&[]), Ok(Event::Tick)));
    }

    #[test]
    fn readable_socket_is_reported_by_index() {
        let quiet = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind");
        let busy = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind");
        quiet
            .send_to(b"ping", busy.local_addr().expect("addr"))
            .expect("send");

        use std::os::fd::AsFd;
        let fds = [quiet.as_fd(), busy.as_fd()];
        let (mut reactor, _flag) = reactor(Duration::from_secs(60), None);
        assert!(matches!(reactor.next_event(&fds), Ok(Event::Readable(1))));
    }
}
