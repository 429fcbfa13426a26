//! Point-to-point channels carrying multi-part messages over TCP.
//!
//! A [`PushSocket`] sends and a [`PullSocket`] receives; either side may bind
//! or connect. Receiving blocks, sending can fail fast with
//! [`SendStatus::WouldBlock`] when the peer is absent or not draining.

use std::time::Duration;

use bytes::Bytes;

mod endpoint;
mod link;
mod pull;
mod push;
pub mod wire;

pub use endpoint::Endpoint;
pub use pull::{Part, PullSocket};
pub use push::{PushSocket, SendMode, SendStatus};

/// The parts of one message, in order.
pub type Message = Vec<Bytes>;

pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
