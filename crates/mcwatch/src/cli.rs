use std::time::Duration;

use clap::{Parser, ValueEnum};
use common::analytics::Role;
use common::{
    ConfigError, DEFAULT_PAYLOAD, DEFAULT_PERIOD_MS, DEFAULT_PORT, Group, HISTORY_LEN,
    MAX_HISTORY, MAX_PAYLOAD, expand_groups,
};

#[derive(Parser, Debug)]
#[command(name = "mcwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send or receive sequenced UDP multicast and watch delivery quality")]
pub struct Args {
    /// Act as sender, default is receiver
    #[arg(short, long)]
    pub sender: bool,

    /// Payload size in bytes
    #[arg(short, long, default_value_t = DEFAULT_PAYLOAD)]
    pub bytes: usize,

    /// Stop after COUNT packets per group, 0 runs forever
    #[arg(short, long, default_value_t = 0)]
    pub count: u64,

    /// Tick period
    #[arg(short = 'f', long, value_name = "MSEC", default_value_t = DEFAULT_PERIOD_MS)]
    pub period: u64,

    /// Interface, default is the one with the default route
    #[arg(short, long, value_name = "IFNAME")]
    pub iface: Option<String>,

    /// Log level, overridden by RUST_LOG
    #[arg(short, long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Presentation mode
    #[arg(short, long, value_enum, default_value_t = Mode::Plot)]
    pub mode: Mode,

    /// UDP port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Multicast TTL (IPv4) or hop limit (IPv6)
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=255))]
    pub ttl: u32,

    /// Initial wait before opening sockets
    #[arg(short, long, value_name = "SEC", default_value_t = 0)]
    pub wait: u64,

    /// Exit after SEC seconds
    #[arg(short = 'W', long, value_name = "SEC", default_value_t = 0)]
    pub deadline: u64,

    /// Sender: send every sequence number twice
    #[arg(short, long)]
    pub duplicate: bool,

    /// Duplicate detection window and plotter history
    #[arg(long, value_name = "N", default_value_t = HISTORY_LEN)]
    pub history: usize,

    /// Print final statistics as JSON
    #[arg(long)]
    pub json: bool,

    /// Groups to send to or join, a range of NUM groups with `+NUM`
    #[arg(value_name = "[SOURCE,]GROUP[+NUM]")]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Progress dots, no terminal control
    Plain,
    /// Activity plotter
    Plot,
    /// Throughput per group
    Rate,
    /// Counter table
    Table,
}

impl Mode {
    pub fn is_fullscreen(self) -> bool {
        self != Mode::Plain
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// As an `EnvFilter` directive.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Validated run configuration
#[derive(Debug)]
pub struct Config {
    pub role: Role,
    pub groups: Vec<Group>,
    pub payload_len: usize,
    pub period: Duration,
    pub count: u64,
    pub iface: Option<String>,
    pub log_level: LogLevel,
    pub mode: Mode,
    pub ttl: u32,
    pub wait: Duration,
    pub deadline: Option<Duration>,
    pub duplicate: bool,
    pub history: usize,
    pub json: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.bytes > MAX_PAYLOAD {
            return Err(ConfigError::PayloadTooLarge {
                bytes: args.bytes,
                max: MAX_PAYLOAD,
            });
        }
        if args.port == 0 {
            return Err(ConfigError::InvalidPort(args.port));
        }
        if args.period == 0 {
            return Err(ConfigError::InvalidPeriod);
        }
        if args.history == 0 || args.history > MAX_HISTORY {
            return Err(ConfigError::InvalidHistory(args.history));
        }

        let groups = expand_groups(&args.groups, args.port, args.history)?;

        Ok(Config {
            role: if args.sender { Role::Sender } else { Role::Receiver },
            groups,
            payload_len: args.bytes,
            period: Duration::from_millis(args.period),
            count: args.count,
            iface: args.iface,
            log_level: args.log_level,
            mode: args.mode,
            ttl: args.ttl,
            wait: Duration::from_secs(args.wait),
            deadline: (args.deadline > 0).then(|| Duration::from_secs(args.deadline)),
            duplicate: args.duplicate,
            history: args.history,
            json: args.json,
        })
    }
}
