use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use common::analytics::{Role, StatsSnapshot};
use common::{Activity, Family, Group, pack_data_packet};
use tracing::debug;

/// Where the engine hands its datagrams.
pub trait Emit {
    /// Whether datagrams for this family can be sent at all.
    fn supports(&self, family: Family) -> bool;

    fn send_to(&mut self, payload: &[u8], destination: SocketAddr) -> io::Result<usize>;
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub payload_len: usize,
    pub period: Duration,
    /// Ticks to run, 0 runs forever
    pub count: u64,
    /// Send every sequence number on two consecutive ticks
    pub duplicate: bool,
}

/// Per tick transmitter for all groups
pub struct SenderEngine {
    start_time: Instant,
    config: SenderConfig,
    pid: u32,
    groups: Vec<Group>,

    /// Next sequence number, same index as `groups`
    next_seq: Vec<u64>,

    /// In duplicate mode, set while the current numbers still owe a resend
    resend_pending: bool,

    ticks: u64,
}

impl SenderEngine {
    pub fn new(groups: Vec<Group>, config: SenderConfig) -> Self {
        let next_seq = vec![0; groups.len()];
        SenderEngine {
            start_time: Instant::now(),
            config,
            pid: std::process::id(),
            groups,
            next_seq,
            resend_pending: false,
            ticks: 0,
        }
    }

    /// Families the engine needs a socket for.
    pub fn families(&self) -> Vec<Family> {
        common::families(&self.groups)
    }

    /// Sends one packet to every group. Send failures are counted and
    /// plotted, never fatal.
    pub fn tick(&mut self, out: &mut impl Emit) {
        let freq_ms = u32::try_from(self.config.period.as_millis()).unwrap_or(u32::MAX);
        let advance = !self.config.duplicate || self.resend_pending;

        for (group, seq) in self.groups.iter_mut().zip(self.next_seq.iter_mut()) {
            if !out.supports(group.family()) {
                debug!("No {} socket, skipping group {}", group.family(), group.group);
                group.end_tick();
                continue;
            }

            let buf = pack_data_packet(self.pid, *seq, freq_ms, self.config.payload_len);
            match out.send_to(&buf, group.destination()) {
                Ok(sent) => group.record(Activity::InOrder, sent),
                Err(err) => {
                    debug!("Failed sending seq {} to group {}: {}", seq, group.group, err);
                    group.record_error();
                }
            }
            if advance {
                *seq += 1;
            }
            group.end_tick();
        }

        if self.config.duplicate {
            self.resend_pending = !self.resend_pending;
        }
        self.ticks += 1;
    }

    pub fn sample_rates(&mut self, now: Instant) {
        for group in &mut self.groups {
            group.sample_rate(now);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.config.count > 0 && self.ticks >= self.config.count
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn export_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::from_groups(Role::Sender, &self.groups, self.uptime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{expand_groups, parse_packet};

    #[derive(Default)]
    struct Capture {
        sent: Vec<(SocketAddr, Vec<u8>)>,
        v6: bool,
        fail_next: usize,
    }

    impl Emit for Capture {
        fn supports(&self, family: Family) -> bool {
            family == Family::V4 || self.v6
        }

        fn send_to(&mut self, payload: &[u8], destination: SocketAddr) -> io::Result<usize> {
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(io::Error::from(io::ErrorKind::HostUnreachable));
            }
            self.sent.push((destination, payload.to_vec()));
            Ok(payload.len())
        }
    }

    fn engine(args: &[&str], count: u64, duplicate: bool) -> SenderEngine {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let groups = expand_groups(&args, 1234, 16).expect("valid groups");
        SenderEngine::new(
            groups,
            SenderConfig {
                payload_len: 100,
                period: Duration::from_millis(100),
                count,
                duplicate,
            },
        )
    }

    fn seqs(capture: &Capture) -> Vec<u64> {
        capture
            .sent
            .iter()
            .map(|(_, buf)| parse_packet(buf).expect("valid payload").seq)
            .collect()
    }

    #[test]
    fn each_tick_sends_next_sequence_to_every_group() {
        let mut engine = engine(&["225.1.2.3+2"], 0, false);
        let mut out = Capture::default();
        for _ in 0..3 {
            engine.tick(&mut out);
        }

        assert_eq!(seqs(&out), vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(out.sent[1].0.to_string(), "225.1.2.4:1234");
        assert_eq!(out.sent[0].1.len(), 100);
        let stats = engine.groups()[0].stats;
        assert_eq!((stats.count, stats.bytes_total), (3, 300));
    }

    #[test]
    fn duplicate_mode_sends_every_number_twice() {
        let mut engine = engine(&["225.1.2.3"], 0, true);
        let mut out = Capture::default();
        for _ in 0..5 {
            engine.tick(&mut out);
        }
        assert_eq!(seqs(&out), vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn failed_send_counts_error_and_continues() {
        let mut engine = engine(&["225.1.2.3"], 0, false);
        let mut out = Capture {
            fail_next: 1,
            ..Default::default()
        };
        engine.tick(&mut out);
        engine.tick(&mut out);

        assert_eq!(seqs(&out), vec![1]);
        let group = &engine.groups()[0];
        assert_eq!((group.stats.count, group.stats.gaps), (1, 1));
        let plot: String = group.activity.iter().map(Activity::symbol).collect();
        assert_eq!(plot, "E.");
    }

    #[test]
    fn groups_without_socket_are_skipped() {
        let mut engine = engine(&["225.1.2.3", "ff2e::1"], 0, false);
        assert_eq!(engine.families(), vec![Family::V4, Family::V6]);

        let mut out = Capture::default();
        engine.tick(&mut out);
        assert_eq!(out.sent.len(), 1);
        assert_eq!(engine.groups()[1].stats.count, 0);
        assert_eq!(engine.groups()[1].activity.last(), Some(Activity::Idle));
    }

    #[test]
    fn stops_after_count_ticks() {
        let mut engine = engine(&["225.1.2.3"], 2, false);
        let mut out = Capture::default();
        engine.tick(&mut out);
        assert!(!engine.is_complete());
        engine.tick(&mut out);
        assert!(engine.is_complete());
        assert_eq!(engine.export_snapshot().totals.count, 2);
    }
}
