use common::{Activity, Family, expand_groups};
use receiver::{AnalyticsManager, Delivery, Verdict};
use sender::{Emit, SenderConfig, SenderEngine};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Datagrams the sender handed over, waiting to be delivered.
#[derive(Default)]
struct Wire {
    queue: Vec<(SocketAddr, Vec<u8>)>,
}

impl Emit for Wire {
    fn supports(&self, _family: Family) -> bool {
        true
    }

    fn send_to(&mut self, payload: &[u8], destination: SocketAddr) -> io::Result<usize> {
        self.queue.push((destination, payload.to_vec()));
        Ok(payload.len())
    }
}

fn groups(args: &[&str]) -> Vec<common::Group> {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    expand_groups(&args, 1234, 64).expect("valid groups")
}

fn sender(args: &[&str], count: u64, duplicate: bool) -> SenderEngine {
    SenderEngine::new(
        groups(args),
        SenderConfig {
            payload_len: 100,
            period: Duration::from_millis(100),
            count,
            duplicate,
        },
    )
}

/// Hands every queued datagram to the receiver group with the matching
/// address, the way the kernel would demultiplex them.
fn deliver(wire: &mut Wire, receiver: &mut AnalyticsManager) -> Vec<Verdict> {
    wire.queue
        .drain(..)
        .map(|(dest, payload)| {
            let index = receiver
                .groups()
                .iter()
                .position(|g| g.group == dest.ip())
                .expect("datagram for a joined group");
            receiver.on_packet_received(index, Some(dest.ip()), &payload)
        })
        .collect()
}

fn run(sender: &mut SenderEngine, receiver: &mut AnalyticsManager) -> Vec<Verdict> {
    let mut wire = Wire::default();
    let mut verdicts = Vec::new();
    while !sender.is_complete() {
        sender.tick(&mut wire);
        verdicts.extend(deliver(&mut wire, receiver));
        receiver.on_tick();
    }
    verdicts
}

#[test]
fn lossless_two_groups_five_packets() {
    let args = ["225.1.2.3+2"];
    let mut tx = sender(&args, 5, false);
    let mut rx = AnalyticsManager::new(groups(&args), 64, 5);

    let verdicts = run(&mut tx, &mut rx);
    assert_eq!(verdicts.len(), 10);
    assert!(
        verdicts
            .iter()
            .all(|v| *v == Verdict::Classified(Delivery::InOrder))
    );

    assert!(rx.is_complete());
    for group in rx.groups() {
        assert_eq!(group.stats.count, 5);
        assert_eq!(group.stats.gaps, 0);
        assert_eq!(group.stats.dupes, 0);
        assert_eq!(group.stats.bytes_total, 500);
    }

    let snapshot = rx.export_snapshot();
    assert_eq!(snapshot.totals.count, 10);
    let lines = snapshot.report_lines();
    assert!(lines[1].starts_with("Group 225.1.2.4 received 5 packets"));
    assert_eq!(tx.export_snapshot().totals.count, 10);
}

#[test]
fn duplicate_mode_is_seen_as_duplicates() {
    let args = ["ff2e::42"];
    let mut tx = sender(&args, 6, true);
    let mut rx = AnalyticsManager::new(groups(&args), 64, 0);

    run(&mut tx, &mut rx);

    let group = &rx.groups()[0];
    assert_eq!(group.stats.count, 6);
    assert_eq!(group.stats.gaps, 0);
    // Sequence 0 starts an epoch and is never taken for a duplicate.
    assert_eq!(group.stats.order, 1);
    assert_eq!(group.stats.dupes, 2);
    let plot: String = group.activity.iter().map(Activity::symbol).collect();
    assert_eq!(plot, ".R.D.D");
}

#[test]
fn lost_packets_show_up_as_gap() {
    let args = ["225.1.2.3"];
    let mut tx = sender(&args, 6, false);
    let mut rx = AnalyticsManager::new(groups(&args), 64, 0);
    let mut wire = Wire::default();

    for tick in 0..6 {
        tx.tick(&mut wire);
        if tick == 2 || tick == 3 {
            wire.queue.clear();
        }
        deliver(&mut wire, &mut rx);
    }

    let stats = rx.groups()[0].stats;
    assert_eq!(stats.count, 4);
    assert_eq!(stats.gaps, 1);
    assert_eq!(rx.tracker(0).expected_seq(), 6);
}

#[test]
fn sender_restart_is_one_gap() {
    let args = ["225.1.2.3"];
    let mut rx = AnalyticsManager::new(groups(&args), 64, 0);
    let mut wire = Wire::default();

    let mut first = sender(&args, 4, false);
    while !first.is_complete() {
        first.tick(&mut wire);
    }
    let mut second = sender(&args, 3, false);
    while !second.is_complete() {
        second.tick(&mut wire);
    }
    deliver(&mut wire, &mut rx);

    let stats = rx.groups()[0].stats;
    assert_eq!(stats.count, 7);
    assert_eq!(stats.gaps, 1);
    assert_eq!(stats.dupes, 0);
    assert_eq!(rx.tracker(0).expected_seq(), 3);
}

#[test]
fn stray_datagram_is_not_counted() {
    let args = ["225.1.2.3"];
    let mut tx = sender(&["225.9.9.9"], 1, false);
    let mut rx = AnalyticsManager::new(groups(&args), 64, 0);
    let mut wire = Wire::default();
    tx.tick(&mut wire);

    let (dest, payload) = wire.queue.remove(0);
    let verdict = rx.on_packet_received(0, Some(dest.ip()), &payload);
    assert_eq!(
        verdict,
        Verdict::WrongDestination {
            observed: Some(dest.ip())
        }
    );
    assert_eq!(rx.groups()[0].stats.count, 0);
}
