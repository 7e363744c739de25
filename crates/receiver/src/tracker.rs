use common::{Activity, DecodeError, Ring};

/// How one received packet relates to the stream seen so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    InOrder,
    /// Packets were skipped, or the sender restarted its stream.
    Gap,
    Duplicate,
    Reorder,
    /// In order, but after a tick in which nothing arrived.
    Delayed,
    Invalid,
}

impl From<Delivery> for Activity {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::InOrder => Activity::InOrder,
            Delivery::Gap => Activity::Gap,
            Delivery::Duplicate => Activity::Duplicate,
            Delivery::Reorder => Activity::Reorder,
            Delivery::Delayed => Activity::Delayed,
            Delivery::Invalid => Activity::Invalid,
        }
    }
}

#[derive(Debug, Clone)]
/// Sequence state for one group
pub struct SequenceTracker {
    /// Next sequence number we expect, 0 until the first packet arrives
    expected_seq: u64,

    /// Recently seen sequence numbers, only used to spot duplicates
    history: Ring<u64>,

    /// Completed ticks in a row without any packet
    silent_ticks: u32,

    /// Whether a packet arrived since the last tick
    seen_this_tick: bool,
}

impl SequenceTracker {
    pub fn new(window: usize) -> Self {
        SequenceTracker {
            expected_seq: 0,
            history: Ring::new(window),
            silent_ticks: 0,
            seen_this_tick: false,
        }
    }

    pub fn expected_seq(&self) -> u64 {
        self.expected_seq
    }

    pub fn history(&self) -> &Ring<u64> {
        &self.history
    }

    /// Classifies one decoded payload. Rules are tried in order, first match
    /// wins:
    ///
    /// 1. undecodable payload: invalid, nothing else changes
    /// 2. first packet ever: in order, whatever its number
    /// 3. `0` once the stream has moved on: the sender restarted, so forget
    ///    the history and count a gap
    /// 4. the expected number: in order, or delayed after a silent tick
    /// 5. a number still in the history: duplicate
    /// 6. below the expected number: reorder
    /// 7. above it: gap, and resynchronize on the new number
    pub fn process_sequence(&mut self, decoded: Result<u64, DecodeError>) -> Delivery {
        let quiet = self.silent_ticks > 0;
        self.silent_ticks = 0;
        self.seen_this_tick = true;

        let seq = match decoded {
            Ok(seq) => seq,
            Err(_) => return Delivery::Invalid,
        };

        let delivery = if self.expected_seq == 0 {
            self.expected_seq = seq.saturating_add(1);
            Delivery::InOrder
        } else if seq == 0 && self.expected_seq > 1 {
            self.history.clear();
            self.expected_seq = 1;
            Delivery::Gap
        } else if seq == self.expected_seq {
            self.expected_seq = seq.saturating_add(1);
            if quiet {
                Delivery::Delayed
            } else {
                Delivery::InOrder
            }
        } else if self.seen_before(seq) {
            Delivery::Duplicate
        } else if seq < self.expected_seq {
            Delivery::Reorder
        } else {
            self.expected_seq = seq.saturating_add(1);
            Delivery::Gap
        };

        self.history.push(seq);
        delivery
    }

    /// Ages the tracker by one tick.
    pub fn on_tick(&mut self) {
        if !std::mem::take(&mut self.seen_this_tick) {
            self.silent_ticks = self.silent_ticks.saturating_add(1);
        }
    }

    // Sequence 0 marks the start of an epoch and never counts as a duplicate.
    fn seen_before(&self, seq: u64) -> bool {
        seq != 0 && self.history.contains(&seq)
    }
}
