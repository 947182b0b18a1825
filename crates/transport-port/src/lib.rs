use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

mod loopback;

pub use loopback::{loopback, LoopbackAcceptor, LoopbackConnector, LoopbackPeer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("port `{name}` unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("port closed")]
    Closed,
}

pub type PortResult<T> = Result<T, PortError>;

/// A failed send hands the payload back so the caller can keep it.
#[derive(Debug, Error)]
#[error("send failed: {error}")]
pub struct SendError {
    pub payload: Value,
    #[source]
    pub error: PortError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    Message(Value),
    /// The remote end went away. No further events follow.
    Disconnected,
}

/// One end of a named duplex channel. Considered dead once a
/// [`PortEvent::Disconnected`] arrives or [`Port::send`] fails.
pub trait Port: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, payload: Value) -> Result<(), SendError>;
    fn close(&self);
}

/// A freshly acquired port plus the stream of events arriving on it.
pub struct PortLink {
    pub port: Arc<dyn Port>,
    pub events: mpsc::UnboundedReceiver<PortEvent>,
}

impl std::fmt::Debug for PortLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortLink")
            .field("port", &self.port.name())
            .finish_non_exhaustive()
    }
}

/// Connect-by-name acquisition of a [`Port`]. Acquisition may fail, and may
/// take arbitrarily long.
#[async_trait]
pub trait PortConnector: Send + Sync {
    async fn open(&self, name: &str) -> PortResult<PortLink>;
}
