use std::io;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use common::analytics::{Role, StatsSnapshot};
use common::{Activity, Group, parse_packet};
use tracing::{debug, warn};

use crate::tracker::{Delivery, SequenceTracker};

/// What became of one datagram handed to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Classified(Delivery),
    /// Arrived on the group's socket but was addressed elsewhere. Not counted.
    WrongDestination { observed: Option<IpAddr> },
}

/// Receiver side bookkeeping for every joined group
pub struct AnalyticsManager {
    /// When the receiver started
    start_time: Instant,

    /// Groups in command line order
    groups: Vec<Group>,

    /// One sequence tracker per group, same index as `groups`
    trackers: Vec<SequenceTracker>,

    /// Stop once every group got this many packets, 0 runs forever
    count_target: u64,
}

impl AnalyticsManager {
    pub fn new(groups: Vec<Group>, history: usize, count_target: u64) -> Self {
        let trackers = groups
            .iter()
            .map(|_| SequenceTracker::new(history))
            .collect();

        AnalyticsManager {
            start_time: Instant::now(),
            groups,
            trackers,
            count_target,
        }
    }

    /// Checks the destination, classifies the payload and updates the
    /// group's counters and activity plot.
    pub fn on_packet_received(
        &mut self,
        index: usize,
        destination: Option<IpAddr>,
        payload: &[u8],
    ) -> Verdict {
        let group = &mut self.groups[index];
        if destination != Some(group.group) {
            warn!(
                "Packet for group {} received on socket for {}, dropping",
                destination.map_or_else(|| "<unknown>".to_string(), |d| d.to_string()),
                group.group
            );
            return Verdict::WrongDestination {
                observed: destination,
            };
        }

        let decoded = parse_packet(payload).map(|p| p.seq);
        if let Err(err) = &decoded {
            debug!("Invalid payload for group {}: {}", group.group, err);
        }

        let delivery = self.trackers[index].process_sequence(decoded);
        match delivery {
            Delivery::Gap => debug!(
                "Gap on group {}, now expecting {}",
                group.group,
                self.trackers[index].expected_seq()
            ),
            Delivery::Duplicate | Delivery::Reorder => {
                debug!("{} packet on group {}", Activity::from(delivery), group.group)
            }
            _ => {}
        }

        group.record(delivery.into(), payload.len());
        Verdict::Classified(delivery)
    }

    /// A failed read on the group's socket, counted and plotted as an error.
    pub fn on_receive_error(&mut self, index: usize, err: &io::Error) {
        let group = &mut self.groups[index];
        debug!("Failed receiving on group {}: {}", group.group, err);
        group.record_error();
    }

    /// Ends a tick for every group. Quiet groups get an idle plot cell and
    /// their next in-order packet counts as delayed.
    pub fn on_tick(&mut self) {
        for (group, tracker) in self.groups.iter_mut().zip(&mut self.trackers) {
            group.end_tick();
            tracker.on_tick();
        }
    }

    pub fn sample_rates(&mut self, now: Instant) {
        for group in &mut self.groups {
            group.sample_rate(now);
        }
    }

    /// True once every group reached the packet count target.
    pub fn is_complete(&self) -> bool {
        self.count_target > 0
            && self
                .groups
                .iter()
                .all(|g| g.stats.count >= self.count_target)
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn tracker(&self, index: usize) -> &SequenceTracker {
        &self.trackers[index]
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn export_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::from_groups(Role::Receiver, &self.groups, self.uptime())
    }
}
