use std::io::{self, IsTerminal};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use common::analytics::{Role, StatsSnapshot};
use common::{Group, Interface};
use receiver::{AnalyticsManager, MulticastSocket};
use sender::{MulticastEmitter, SenderConfig, SenderEngine};
use tracing::{debug, info};

use crate::cli::{Args, Config, Mode};
use crate::display::Screen;
use crate::input::{InputCommand, handle_input};
use crate::logging::{LogBuffer, LogSink, SharedLog};
use crate::reactor::{Event, Reactor};

mod cli;
mod display;
mod input;
mod logging;
mod reactor;

/// Datagrams read per readable event, so timers are not starved.
const RECV_BATCH: usize = 64;

const RECV_BUF: usize = 65536;

enum Engine {
    Sender {
        engine: SenderEngine,
        /// Opened on the first tick
        emitter: Option<MulticastEmitter>,
    },
    Receiver {
        analytics: AnalyticsManager,
        /// Same index as the analytics groups
        sockets: Vec<MulticastSocket>,
    },
}

/// Everything the event handlers work on
struct App {
    engine: Engine,
    screen: Screen,
    iface: Interface,
    ttl: u32,
    buf: Vec<u8>,
}

impl App {
    fn groups(&self) -> &[Group] {
        match &self.engine {
            Engine::Sender { engine, .. } => engine.groups(),
            Engine::Receiver { analytics, .. } => analytics.groups(),
        }
    }

    fn uptime(&self) -> Duration {
        match &self.engine {
            Engine::Sender { engine, .. } => engine.uptime(),
            Engine::Receiver { analytics, .. } => analytics.uptime(),
        }
    }

    fn is_complete(&self) -> bool {
        match &self.engine {
            Engine::Sender { engine, .. } => engine.is_complete(),
            Engine::Receiver { analytics, .. } => analytics.is_complete(),
        }
    }

    fn fds(&self) -> Vec<BorrowedFd<'_>> {
        match &self.engine {
            Engine::Sender { .. } => Vec::new(),
            Engine::Receiver { sockets, .. } => sockets.iter().map(AsFd::as_fd).collect(),
        }
    }

    fn on_tick(&mut self) -> anyhow::Result<()> {
        match &mut self.engine {
            Engine::Sender { engine, emitter } => {
                if emitter.is_none() {
                    *emitter = Some(
                        MulticastEmitter::open(&engine.families(), &self.iface, self.ttl)
                            .context("failed opening send sockets")?,
                    );
                }
                if let Some(emitter) = emitter.as_mut() {
                    engine.tick(emitter);
                }
            }
            Engine::Receiver { analytics, .. } => analytics.on_tick(),
        }

        let groups = match &self.engine {
            Engine::Sender { engine, .. } => engine.groups(),
            Engine::Receiver { analytics, .. } => analytics.groups(),
        };
        self.screen.show_groups(groups)?;
        Ok(())
    }

    fn on_readable(&mut self, index: usize) {
        let Engine::Receiver { analytics, sockets } = &mut self.engine else {
            return;
        };
        let Some(socket) = sockets.get(index) else {
            return;
        };

        for _ in 0..RECV_BATCH {
            match socket.recv(&mut self.buf) {
                Ok(Some(received)) => {
                    analytics.on_packet_received(
                        index,
                        received.destination,
                        &self.buf[..received.len],
                    );
                }
                Ok(None) => break,
                Err(err) => {
                    analytics.on_receive_error(index, &err);
                    break;
                }
            }
        }
    }

    fn on_clock(&mut self) -> io::Result<()> {
        let now = Instant::now();
        match &mut self.engine {
            Engine::Sender { engine, .. } => engine.sample_rates(now),
            Engine::Receiver { analytics, .. } => analytics.sample_rates(now),
        }
        let uptime = self.uptime();
        let count = self.groups().len();
        self.screen.show_clock(uptime)?;
        self.screen.show_log(count)
    }

    fn redraw(&mut self, resized: bool) -> io::Result<()> {
        let uptime = self.uptime();
        let (screen, groups) = match &self.engine {
            Engine::Sender { engine, .. } => (&mut self.screen, engine.groups()),
            Engine::Receiver { analytics, .. } => (&mut self.screen, analytics.groups()),
        };
        if resized {
            screen.resize(groups, uptime)?;
        } else {
            screen.redraw(groups, uptime)?;
        }
        screen.show_log(groups.len())
    }

    fn export_snapshot(&self) -> StatsSnapshot {
        match &self.engine {
            Engine::Sender { engine, .. } => engine.export_snapshot(),
            Engine::Receiver { analytics, .. } => analytics.export_snapshot(),
        }
    }
}

/// Sleeps `wait`, cut short by a signal. Returns false when interrupted.
fn pause(wait: Duration, shutdown: &AtomicBool) -> bool {
    let until = Instant::now() + wait;
    while Instant::now() < until {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let left = until.saturating_duration_since(Instant::now());
        std::thread::sleep(left.min(Duration::from_millis(100)));
    }
    true
}

fn run(
    mut config: Config,
    log: SharedLog,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<Option<StatsSnapshot>> {
    let iface = Interface::resolve(config.iface.as_deref())?;

    if !config.wait.is_zero() {
        info!("Waiting {}s before opening sockets", config.wait.as_secs());
        if !pause(config.wait, &shutdown) {
            return Ok(None);
        }
    }

    let fullscreen = config.mode.is_fullscreen();
    let groups = std::mem::take(&mut config.groups);
    let engine = match config.role {
        Role::Sender => Engine::Sender {
            engine: SenderEngine::new(
                groups,
                SenderConfig {
                    payload_len: config.payload_len,
                    period: config.period,
                    count: config.count,
                    duplicate: config.duplicate,
                },
            ),
            emitter: None,
        },
        Role::Receiver => {
            let sockets = groups
                .iter()
                .map(|group| MulticastSocket::join(group, &iface))
                .collect::<Result<Vec<_>, _>>()?;
            Engine::Receiver {
                analytics: AnalyticsManager::new(groups, config.history, config.count),
                sockets,
            }
        }
    };

    let mut app = App {
        engine,
        screen: Screen::new(config.mode, config.role, &iface, log),
        iface,
        ttl: config.ttl,
        buf: vec![0; RECV_BUF],
    };

    let _guard = if fullscreen {
        Some(app.screen.enter().context("failed setting up terminal")?)
    } else {
        None
    };
    app.redraw(false)?;

    let mut reactor = Reactor::new(config.period, config.deadline, fullscreen, shutdown);
    loop {
        let event = {
            let fds = app.fds();
            reactor.next_event(&fds)?
        };

        match event {
            Event::Tick => app.on_tick()?,
            Event::Clock => app.on_clock()?,
            Event::Readable(index) => app.on_readable(index),
            Event::Key(key) => match handle_input(key) {
                Some(InputCommand::Quit) => break,
                Some(InputCommand::Redraw) => app.redraw(false)?,
                Some(InputCommand::ScrollUp) => {
                    let count = app.groups().len();
                    app.screen.scroll_log(true, count)?;
                }
                Some(InputCommand::ScrollDown) => {
                    let count = app.groups().len();
                    app.screen.scroll_log(false, count)?;
                }
                None => {}
            },
            Event::Resize => app.redraw(true)?,
            Event::Deadline => {
                info!("Deadline reached, exiting.");
                break;
            }
            Event::Shutdown => {
                debug!("Got signal, exiting.");
                break;
            }
        }

        if app.is_complete() {
            info!("All packets accounted for, exiting.");
            break;
        }
    }

    app.screen.finish()?;
    Ok(Some(app.export_snapshot()))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::from_args(args)?;

    if config.mode.is_fullscreen() && !io::stdout().is_terminal() {
        config.mode = Mode::Plain;
    }

    let log = LogBuffer::shared();
    let sink = if config.mode.is_fullscreen() {
        LogSink::Dashboard(log.clone())
    } else {
        LogSink::Stderr
    };
    let json = config.json;
    logging::init(config.log_level, sink)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed installing signal handler")?;

    // The terminal is restored by the time `run` returns.
    let Some(snapshot) = run(config, log, shutdown)? else {
        return Ok(());
    };

    if json {
        println!("{}", snapshot.to_json()?);
    } else {
        for line in snapshot.report_lines() {
            println!("{line}");
        }
    }
    Ok(())
}
