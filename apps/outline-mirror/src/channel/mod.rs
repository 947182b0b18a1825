//! A reliable-feeling channel over a transport that can die at any time.
//!
//! [`ConnectionManager`] owns at most one live [`transport_port::Port`]. It
//! reconnects with exponential backoff after transport-initiated
//! disconnects, keeps the port alive with heartbeat markers, and parks
//! outbound payloads in a bounded drop-oldest queue while no port is usable.
//! Nothing here returns errors to callers: faults become state transitions
//! and log events.

mod backoff;
mod listeners;
mod manager;
mod queue;

pub use backoff::ReconnectPolicy;
pub use listeners::{ListenerSet, Subscription};
pub use manager::ConnectionManager;
pub use queue::{OutboundQueue, QueueStats};

use std::fmt;

use thiserror::Error;
use transport_port::PortError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the channel left (or failed to reach) the connected state. Only
/// ever logged.
#[derive(Debug, Error)]
pub enum ChannelFault {
    #[error("transport acquisition failed: {0}")]
    Acquire(#[source] PortError),
    #[error("transport send failed: {0}")]
    Send(#[source] PortError),
    #[error("transport disconnected")]
    Disconnected,
    #[error("reconnect abandoned after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
}
