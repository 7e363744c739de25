//! Receiving side: joins groups, reads datagrams and classifies each one
//! against the sequence it expected for that group.

pub mod analytics;
pub mod socket;
pub mod tracker;

pub use analytics::{AnalyticsManager, Verdict};
pub use socket::{MulticastSocket, Received};
pub use tracker::{Delivery, SequenceTracker};
