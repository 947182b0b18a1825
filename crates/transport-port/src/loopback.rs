use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{Port, PortConnector, PortError, PortEvent, PortLink, PortResult, SendError};

/// In-process transport for tests and offline tooling. Every successful
/// [`PortConnector::open`] hands a [`LoopbackPeer`] to the acceptor, which
/// plays the background side.
pub fn loopback() -> (LoopbackConnector, LoopbackAcceptor) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let connector = LoopbackConnector {
        inner: Arc::new(Shared {
            accept_tx,
            pending_failures: Mutex::new(0),
            opened: AtomicUsize::new(0),
        }),
    };
    (connector, LoopbackAcceptor { rx: accept_rx })
}

struct Shared {
    accept_tx: mpsc::UnboundedSender<LoopbackPeer>,
    pending_failures: Mutex<u32>,
    opened: AtomicUsize,
}

#[derive(Clone)]
pub struct LoopbackConnector {
    inner: Arc<Shared>,
}

impl LoopbackConnector {
    /// Make the next `count` acquisitions fail.
    pub fn fail_next(&self, count: u32) {
        *self.inner.pending_failures.lock() += count;
    }

    /// Number of ports handed out so far.
    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PortConnector for LoopbackConnector {
    async fn open(&self, name: &str) -> PortResult<PortLink> {
        {
            let mut failures = self.inner.pending_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(PortError::Unavailable {
                    name: name.to_string(),
                    reason: "loopback refused connection".into(),
                });
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        let peer = LoopbackPeer {
            name: name.to_string(),
            inbox: outbound_rx,
            events: event_tx,
            alive: Arc::clone(&alive),
        };
        self.inner
            .accept_tx
            .send(peer)
            .map_err(|_| PortError::Unavailable {
                name: name.to_string(),
                reason: "no background listening".into(),
            })?;
        self.inner.opened.fetch_add(1, Ordering::AcqRel);

        let port = LoopbackPort {
            name: name.to_string(),
            outbound: outbound_tx,
            alive,
        };
        Ok(PortLink {
            port: Arc::new(port),
            events: event_rx,
        })
    }
}

struct LoopbackPort {
    name: String,
    outbound: mpsc::UnboundedSender<Value>,
    alive: Arc<AtomicBool>,
}

impl Port for LoopbackPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, payload: Value) -> Result<(), SendError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(SendError {
                payload,
                error: PortError::Closed,
            });
        }
        self.outbound.send(payload).map_err(|err| SendError {
            payload: err.0,
            error: PortError::Closed,
        })
    }

    fn close(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

pub struct LoopbackAcceptor {
    rx: mpsc::UnboundedReceiver<LoopbackPeer>,
}

impl LoopbackAcceptor {
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<LoopbackPeer> {
        self.rx.try_recv().ok()
    }
}

/// Background end of a loopback port.
pub struct LoopbackPeer {
    name: String,
    inbox: mpsc::UnboundedReceiver<Value>,
    events: mpsc::UnboundedSender<PortEvent>,
    alive: Arc<AtomicBool>,
}

impl LoopbackPeer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once either side closed, disconnected or severed the port.
    pub fn is_open(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn post(&self, payload: Value) -> PortResult<()> {
        if !self.is_open() {
            return Err(PortError::Closed);
        }
        self.events
            .send(PortEvent::Message(payload))
            .map_err(|_| PortError::Closed)
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.inbox.try_recv().ok()
    }

    /// Drain everything the view has sent so far.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(value) = self.try_recv() {
            out.push(value);
        }
        out
    }

    /// Tear the port down and signal it to the view side.
    pub fn disconnect(&self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.events.send(PortEvent::Disconnected);
    }

    /// Kill the port without signaling; the view only notices on its next send.
    pub fn sever(&self) {
        self.alive.store(false, Ordering::Release);
    }
}
