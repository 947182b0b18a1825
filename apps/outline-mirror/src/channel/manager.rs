use std::sync::{Arc, Weak};
use std::time::Duration;

use outline_proto::heartbeat_marker;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, info, trace, warn};
use transport_port::{Port, PortConnector, PortEvent, PortLink};

use super::{
    ChannelFault, ChannelState, ListenerSet, OutboundQueue, QueueStats, ReconnectPolicy,
    Subscription,
};
use crate::config::ConnectionConfig;

/// One logical channel to the background process.
///
/// Every background task spawned by the manager holds a [`Weak`] reference
/// plus the epoch it was started in. The epoch advances whenever the current
/// connection cycle is abandoned (manual disconnect, dispose, transport
/// loss), so a timer or pump that outlives its cycle observes the mismatch
/// and does nothing.
///
/// Must be used from within a tokio runtime.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    connector: Arc<dyn PortConnector>,
    policy: ReconnectPolicy,
    heartbeat: Option<Duration>,
    core: Mutex<Core>,
    messages: ListenerSet<Value>,
    states: ListenerSet<ChannelState>,
}

struct Core {
    state: ChannelState,
    disposed: bool,
    epoch: u64,
    attempt: u32,
    port: Option<Arc<dyn Port>>,
    queue: OutboundQueue<Value>,
    tasks: Tasks,
}

#[derive(Default)]
struct Tasks {
    pump: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_link(&mut self) {
        for handle in [self.pump.take(), self.heartbeat.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        self.abort_link();
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }
}

/// Record a state change, returning the new state if listeners must hear
/// about it. Emission happens after the core lock is released.
fn transition(core: &mut Core, next: ChannelState) -> Option<ChannelState> {
    if core.state == next {
        return None;
    }
    core.state = next;
    Some(next)
}

impl ConnectionManager {
    pub fn new(config: &ConnectionConfig, connector: Arc<dyn PortConnector>) -> Self {
        let inner = Inner {
            name: config.name.clone(),
            connector,
            policy: config.reconnect_policy(),
            heartbeat: config.heartbeat_interval(),
            core: Mutex::new(Core {
                state: ChannelState::Disconnected,
                disposed: false,
                epoch: 0,
                attempt: 0,
                port: None,
                queue: OutboundQueue::new(config.max_queue_size),
                tasks: Tasks::default(),
            }),
            messages: ListenerSet::new("message"),
            states: ListenerSet::new("state"),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ChannelState {
        self.inner.core.lock().state
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.lock().disposed
    }

    /// Number of failed cycles in the current outage.
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.core.lock().attempt
    }

    pub fn queued_len(&self) -> usize {
        self.inner.core.lock().queue.len()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.core.lock().queue.stats()
    }

    /// Open the channel. Resolves once the first acquisition attempt has
    /// finished; a failed attempt leaves the channel `Connecting` with a
    /// retry scheduled. No-op when disposed or not `Disconnected`.
    pub async fn connect(&self) {
        let (epoch, changed) = {
            let mut core = self.inner.core.lock();
            if core.disposed {
                trace!(target = "channel::connect", port = %self.inner.name, "connect ignored; channel disposed");
                return;
            }
            if core.state != ChannelState::Disconnected {
                trace!(
                    target = "channel::connect",
                    port = %self.inner.name,
                    state = %core.state,
                    "connect ignored; already active"
                );
                return;
            }
            core.epoch += 1;
            core.attempt = 0;
            (core.epoch, transition(&mut core, ChannelState::Connecting))
        };
        self.inner.emit_state(changed);
        self.inner.establish(epoch).await;
    }

    /// Drop the current port and cancel heartbeat and pending retries.
    /// Unlike [`dispose`](Self::dispose), `connect` keeps working.
    pub fn disconnect(&self) {
        let changed = {
            let mut core = self.inner.core.lock();
            if core.disposed {
                return;
            }
            Inner::teardown(&mut core);
            transition(&mut core, ChannelState::Disconnected)
        };
        if changed.is_some() {
            info!(target = "channel::connect", port = %self.inner.name, "channel disconnected");
        }
        self.inner.emit_state(changed);
    }

    /// Send `payload` now if connected, otherwise park it in the outbound
    /// queue. A send that fails on a supposedly live port also parks the
    /// payload and starts the reconnect cycle.
    pub fn post_message(&self, payload: Value) {
        let lost = {
            let mut core = self.inner.core.lock();
            if core.disposed {
                debug!(target = "channel::queue", port = %self.inner.name, "message posted after dispose dropped");
                return;
            }
            let mut lost = None;
            let payload = match (core.state, core.port.clone()) {
                (ChannelState::Connected, Some(port)) => match port.send(payload) {
                    Ok(()) => return,
                    Err(err) => {
                        lost = Some((core.epoch, ChannelFault::Send(err.error)));
                        err.payload
                    }
                },
                _ => payload,
            };
            if core.queue.push(payload).is_some() {
                warn!(
                    target = "channel::queue",
                    port = %self.inner.name,
                    dropped_total = core.queue.dropped(),
                    "outbound queue full; dropped oldest message"
                );
            } else {
                trace!(target = "channel::queue", port = %self.inner.name, queued = core.queue.len(), "message queued");
            }
            lost
        };
        if let Some((epoch, fault)) = lost {
            self.inner.on_link_lost(epoch, fault);
        }
    }

    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Subscription::inert();
        }
        self.inner.messages.add(callback)
    }

    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChannelState) + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Subscription::inert();
        }
        self.inner.states.add(callback)
    }

    /// Permanently shut the channel down. Listeners are removed first, so
    /// the final transition to `Disconnected` is not announced.
    pub fn dispose(&self) {
        self.inner.messages.clear();
        self.inner.states.clear();
        let mut core = self.inner.core.lock();
        if core.disposed {
            return;
        }
        core.disposed = true;
        Inner::teardown(&mut core);
        core.queue.clear();
        core.state = ChannelState::Disconnected;
        drop(core);
        debug!(target = "channel::connect", port = %self.inner.name, "channel disposed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    fn emit_state(&self, changed: Option<ChannelState>) {
        if let Some(state) = changed {
            self.states.emit(&state);
        }
    }

    fn teardown(core: &mut Core) {
        core.epoch += 1;
        core.attempt = 0;
        core.tasks.abort_all();
        if let Some(port) = core.port.take() {
            port.close();
        }
    }

    fn is_live(&self, epoch: u64) -> bool {
        let core = self.core.lock();
        !core.disposed && core.epoch == epoch && core.state == ChannelState::Connected
    }

    fn is_retry_due(&self, epoch: u64) -> bool {
        let core = self.core.lock();
        !core.disposed && core.epoch == epoch && core.state == ChannelState::Connecting
    }

    async fn establish(self: &Arc<Self>, epoch: u64) {
        debug!(target = "channel::connect", port = %self.name, epoch, "acquiring transport");
        match self.connector.open(&self.name).await {
            Ok(link) => self.on_link_opened(link, epoch),
            Err(err) => {
                warn!(
                    target = "channel::connect",
                    port = %self.name,
                    error = %ChannelFault::Acquire(err),
                    "transport acquisition failed"
                );
                self.schedule_reconnect(epoch);
            }
        }
    }

    fn on_link_opened(self: &Arc<Self>, link: PortLink, epoch: u64) {
        let PortLink { port, events } = link;
        let mut core = self.core.lock();
        if core.disposed || core.epoch != epoch {
            drop(core);
            port.close();
            debug!(target = "channel::connect", port = %self.name, epoch, "discarding transport from an abandoned cycle");
            return;
        }

        core.attempt = 0;
        core.tasks.reconnect.take();
        core.port = Some(Arc::clone(&port));

        let mut replayed = 0usize;
        let mut flush_fault = None;
        while let Some(payload) = core.queue.pop_front() {
            if let Err(err) = port.send(payload) {
                core.queue.push_front(err.payload);
                flush_fault = Some(ChannelFault::Send(err.error));
                break;
            }
            replayed += 1;
        }
        let changed = transition(&mut core, ChannelState::Connected);
        drop(core);

        info!(target = "channel::connect", port = %self.name, replayed, "channel connected");
        self.emit_state(changed);
        match flush_fault {
            Some(fault) => self.on_link_lost(epoch, fault),
            None => self.start_link_tasks(events, epoch),
        }
    }

    /// Pump and heartbeat start only after Connected has been announced, so
    /// a transport loss can never be reported ahead of it. Events that arrive
    /// in between stay buffered in `events`.
    fn start_link_tasks(self: &Arc<Self>, events: UnboundedReceiver<PortEvent>, epoch: u64) {
        let mut core = self.core.lock();
        if core.disposed || core.epoch != epoch || core.state != ChannelState::Connected {
            return;
        }
        core.tasks.pump = Some(self.spawn_pump(events, epoch));
        if let Some(period) = self.heartbeat {
            core.tasks.heartbeat = Some(self.spawn_heartbeat(period, epoch));
        }
    }

    fn on_link_lost(self: &Arc<Self>, epoch: u64, fault: ChannelFault) {
        let (next_epoch, changed) = {
            let mut core = self.core.lock();
            if core.disposed || core.epoch != epoch || core.state != ChannelState::Connected {
                return;
            }
            core.epoch += 1;
            core.tasks.abort_link();
            if let Some(port) = core.port.take() {
                port.close();
            }
            (core.epoch, transition(&mut core, ChannelState::Connecting))
        };
        warn!(target = "channel::reconnect", port = %self.name, error = %fault, "transport lost; reconnecting");
        self.emit_state(changed);
        self.schedule_reconnect(next_epoch);
    }

    fn schedule_reconnect(self: &Arc<Self>, epoch: u64) {
        let mut core = self.core.lock();
        if core.disposed || core.epoch != epoch {
            return;
        }

        if !self.policy.allows(core.attempt) {
            let attempts = core.attempt;
            core.tasks.reconnect.take();
            let changed = transition(&mut core, ChannelState::Disconnected);
            drop(core);
            warn!(
                target = "channel::reconnect",
                port = %self.name,
                error = %ChannelFault::RetryExhausted { attempts },
                "giving up; a manual connect is required"
            );
            self.emit_state(changed);
            return;
        }

        let delay = self.policy.delay_for(core.attempt);
        core.attempt += 1;
        let attempt = core.attempt;
        let weak = Arc::downgrade(self);
        core.tasks.reconnect = Some(tokio::spawn(async move {
            sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_retry_due(epoch) {
                return;
            }
            inner.establish(epoch).await;
        }));
        drop(core);

        debug!(
            target = "channel::reconnect",
            port = %self.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
    }

    fn spawn_pump(
        self: &Arc<Self>,
        mut events: UnboundedReceiver<PortEvent>,
        epoch: u64,
    ) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match event {
                    PortEvent::Message(payload) => {
                        if !inner.is_live(epoch) {
                            return;
                        }
                        trace!(target = "channel::pump", port = %inner.name, "message received");
                        inner.messages.emit(&payload);
                    }
                    PortEvent::Disconnected => {
                        inner.on_link_lost(epoch, ChannelFault::Disconnected);
                        return;
                    }
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.on_link_lost(epoch, ChannelFault::Disconnected);
            }
        })
    }

    fn spawn_heartbeat(self: &Arc<Self>, period: Duration, epoch: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.send_heartbeat(epoch) {
                    return;
                }
            }
        })
    }

    fn send_heartbeat(self: &Arc<Self>, epoch: u64) -> bool {
        let sent = {
            let core = self.core.lock();
            if core.disposed || core.epoch != epoch || core.state != ChannelState::Connected {
                return false;
            }
            match &core.port {
                Some(port) => port.send(heartbeat_marker()),
                None => return false,
            }
        };
        match sent {
            Ok(()) => {
                trace!(target = "channel::heartbeat", port = %self.name, "heartbeat sent");
                true
            }
            Err(err) => {
                self.on_link_lost(epoch, ChannelFault::Send(err.error));
                false
            }
        }
    }
}
