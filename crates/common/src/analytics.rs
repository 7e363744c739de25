use crate::Group;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Running totals for one group.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupCounters {
    /// Packets accepted (receiver) or sent (sender)
    pub count: u64,

    /// Receiver: sequence gaps and stream restarts. Sender: failed sends.
    pub gaps: u64,

    /// Sequence numbers seen twice within the detection window
    pub dupes: u64,

    /// Late packets with a sequence number below the expected one
    pub order: u64,

    /// In-order packets that arrived after a silent tick
    pub delayed: u64,

    /// Payloads without a usable sequence number
    pub invalid: u64,

    pub bytes_total: u64,
}

impl GroupCounters {
    pub fn accumulate(&mut self, other: &GroupCounters) {
        self.count += other.count;
        self.gaps += other.gaps;
        self.dupes += other.dupes;
        self.order += other.order;
        self.delayed += other.delayed;
        self.invalid += other.invalid;
        self.bytes_total += other.bytes_total;
    }
}

/// Throughput derived from the growth of a byte counter between two
/// sampling instants.
#[derive(Debug, Clone)]
pub struct RateSampler {
    last_at: Instant,
    last_bytes: u64,
    rate: f64,
}

impl RateSampler {
    pub fn new(now: Instant) -> Self {
        RateSampler {
            last_at: now,
            last_bytes: 0,
            rate: 0.0,
        }
    }

    /// Closes the current window and returns bytes/sec over it. Sampling
    /// twice at the same instant keeps the previous rate.
    pub fn sample(&mut self, now: Instant, bytes_total: u64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f64();
        if elapsed > 0.0 {
            self.rate = bytes_total.saturating_sub(self.last_bytes) as f64 / elapsed;
            self.last_at = now;
            self.last_bytes = bytes_total;
        }
        self.rate
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

/// Final statistics, printed on exit or exported as JSON.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatsSnapshot {
    pub role: Role,

    /// Seconds since the run started
    pub uptime_secs: u64,

    pub groups: Vec<GroupSnapshot>,

    /// Sum over all groups
    pub totals: GroupCounters,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GroupSnapshot {
    pub source: Option<String>,
    pub group: String,
    pub port: u16,
    pub counters: GroupCounters,

    /// Bytes/sec over the last completed sampling window
    pub rate_bps: f64,
}

impl StatsSnapshot {
    pub fn from_groups(role: Role, groups: &[Group], uptime: Duration) -> Self {
        let mut totals = GroupCounters::default();
        let groups = groups
            .iter()
            .map(|g| {
                totals.accumulate(&g.stats);
                GroupSnapshot {
                    source: g.source.map(|s| s.to_string()),
                    group: g.group.to_string(),
                    port: g.port,
                    counters: g.stats,
                    rate_bps: g.rate.rate(),
                }
            })
            .collect();

        StatsSnapshot {
            role,
            uptime_secs: uptime.as_secs(),
            groups,
            totals,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human readable report, one line per group followed by totals.
    pub fn report_lines(&self) -> Vec<String> {
        let width = self.groups.iter().map(|g| g.group.len()).max().unwrap_or(0);
        let mut lines = Vec::with_capacity(self.groups.len() + 3);

        for g in &self.groups {
            let c = &g.counters;
            lines.push(match self.role {
                Role::Receiver => format!(
                    "Group {:<width$} received {} packets, invalid: {}, delayed: {}, gaps: {}, reorder: {}, dupes: {}, bytes: {}",
                    g.group, c.count, c.invalid, c.delayed, c.gaps, c.order, c.dupes, c.bytes_total
                ),
                Role::Sender => format!(
                    "Sent {} packets to group {:<width$} errors: {}, bytes: {}",
                    c.count, g.group, c.gaps, c.bytes_total
                ),
            });
        }

        lines.push(String::new());
        lines.push(match self.role {
            Role::Receiver => format!("Received total: {} packets", self.totals.count),
            Role::Sender => format!("Sent total: {} packets", self.totals.count),
        });
        lines.push(format!("Uptime: {}", format_uptime(self.uptime_secs)));
        lines
    }
}

/// `1d 02h 03m 04s`, dropping leading zero units.
pub fn format_uptime(secs: u64) -> String {
    let day = secs / 86_400;
    let hour = secs % 86_400 / 3_600;
    let min = secs % 3_600 / 60;
    let sec = secs % 60;

    if day > 0 {
        format!("{day}d {hour:02}h {min:02}m {sec:02}s")
    } else if hour > 0 {
        format!("{hour}h {min:02}m {sec:02}s")
    } else if min > 0 {
        format!("{min}m {sec:02}s")
    } else {
        format!("{sec}s")
    }
}
