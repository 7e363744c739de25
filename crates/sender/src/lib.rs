//! Sending side: one sequenced datagram per group and tick.

pub mod engine;
pub mod socket;

pub use engine::{Emit, SenderConfig, SenderEngine};
pub use socket::MulticastEmitter;
