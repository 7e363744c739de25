use thiserror::Error;

pub mod analytics;
pub mod group;
pub mod net;
pub mod ring;

pub use group::{Activity, Family, Group, GroupArg, expand_groups, families};
pub use net::{Interface, TransportError};
pub use ring::Ring;

/// Largest payload we agree to send, excluding the 42 bytes of IP/UDP overhead.
pub const MAX_PAYLOAD: usize = 1606;
pub const DEFAULT_PAYLOAD: usize = 100;
pub const MAX_GROUPS: usize = 2048;
pub const DEFAULT_GROUP: &str = "225.1.2.3";
pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_PERIOD_MS: u64 = 100;

/// Default size of the duplicate-detection window and of the activity plot.
pub const HISTORY_LEN: usize = 1024;
pub const MAX_HISTORY: usize = 1 << 20;

pub const MAGIC_KEY: &str = "Sender PID ";
pub const SEQ_KEY: &str = "count: ";
pub const FREQ_KEY: &str = "freq: ";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not a valid multicast group")]
    InvalidAddress(String),

    #[error("source {src} and group {group} are not of the same address family")]
    FamilyMismatch { src: String, group: String },

    #[error("invalid number of groups given in {0}")]
    InvalidRange(String),

    #[error("too many groups, max {max} allowed")]
    TooManyGroups { max: usize },

    #[error("too long payload ({bytes} bytes), max {max} bytes")]
    PayloadTooLarge { bytes: usize, max: usize },

    #[error("invalid port {0}")]
    InvalidPort(u16),

    #[error("invalid period, must be at least 1 msec")]
    InvalidPeriod,

    #[error("invalid history size {0}")]
    InvalidHistory(usize),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload has no sequence tag")]
    MissingSeqTag,

    #[error("payload has a sequence tag but no valid number after it")]
    MalformedSeq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub sender_pid: u32,
    pub seq: u64,
    pub freq_ms: Option<u32>,
}

/// Builds the text payload, zero padded (or cut) to exactly `payload_len` bytes.
///
/// A payload shorter than the text loses its tail, the same way a short
/// `sendto()` of a larger buffer would.
pub fn pack_data_packet(sender_pid: u32, seq: u64, freq_ms: u32, payload_len: usize) -> Vec<u8> {
    let text = format!("{MAGIC_KEY}{sender_pid}, {SEQ_KEY}{seq}, {FREQ_KEY}{freq_ms}");
    let mut buf = text.into_bytes();
    buf.resize(payload_len, 0);
    buf
}

pub fn parse_packet(buf: &[u8]) -> Result<Packet, DecodeError> {
    // Everything after the first NUL is padding.
    let text = buf.split(|&b| b == 0).next().unwrap_or_default();

    let seq_at = find_tag(text, SEQ_KEY).ok_or(DecodeError::MissingSeqTag)?;
    let seq = leading_number(&text[seq_at..]).ok_or(DecodeError::MalformedSeq)?;

    let sender_pid = find_tag(text, MAGIC_KEY)
        .and_then(|at| leading_number(&text[at..]))
        .and_then(|pid| u32::try_from(pid).ok())
        .unwrap_or(0);

    let freq_ms = find_tag(text, FREQ_KEY)
        .and_then(|at| leading_number(&text[at..]))
        .and_then(|freq| u32::try_from(freq).ok());

    Ok(Packet {
        sender_pid,
        seq,
        freq_ms,
    })
}

/// Returns the offset just past `tag`.
fn find_tag(buf: &[u8], tag: &str) -> Option<usize> {
    let tag = tag.as_bytes();
    buf.windows(tag.len())
        .position(|window| window == tag)
        .map(|pos| pos + tag.len())
}

fn leading_number(buf: &[u8]) -> Option<u64> {
    let digits = buf.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    std::str::from_utf8(&buf[..digits]).ok()?.parse().ok()
}
