//! Per-view host wiring the channel, the reducer and published state.

use std::sync::{Arc, Weak};

use outline_proto::{ProtocolMessage, Request, decode_message};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use transport_port::PortConnector;

use crate::channel::{ChannelState, ConnectionManager, Subscription};
use crate::config::ConnectionConfig;
use crate::tree::{MirrorState, TreeSyncReducer};

/// One foreground view. Owns its channel and mirror; nothing is shared
/// between sessions.
pub struct ViewSession {
    inner: Arc<SessionInner>,
    subscriptions: Vec<Subscription>,
}

struct SessionInner {
    channel: ConnectionManager,
    mirror: Mutex<Mirror>,
    published: watch::Sender<Arc<MirrorState>>,
}

#[derive(Default)]
struct Mirror {
    reducer: TreeSyncReducer,
    refresh_requested: bool,
}

impl ViewSession {
    /// Builds the channel without connecting it; call [`ViewSession::start`].
    pub fn attach(config: &ConnectionConfig, connector: Arc<dyn PortConnector>) -> Self {
        let (published, _) = watch::channel(Arc::new(MirrorState::default()));
        let inner = Arc::new(SessionInner {
            channel: ConnectionManager::new(config, connector),
            mirror: Mutex::new(Mirror::default()),
            published,
        });

        let weak = Arc::downgrade(&inner);
        let on_message = inner.channel.on_message(move |value| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_inbound(value);
            }
        });
        let weak = Arc::downgrade(&inner);
        let on_state = inner.channel.on_state_change(move |state| {
            if *state != ChannelState::Connected {
                return;
            }
            if let Some(inner) = Weak::upgrade(&weak) {
                // Nothing missed while disconnected is replayed.
                inner.send(Request::GetTree);
            }
        });

        Self {
            inner,
            subscriptions: vec![on_message, on_state],
        }
    }

    pub async fn start(&self) {
        self.inner.channel.connect().await;
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MirrorState>> {
        self.inner.published.subscribe()
    }

    pub fn current(&self) -> Arc<MirrorState> {
        Arc::clone(&self.inner.published.borrow())
    }

    pub fn channel(&self) -> &ConnectionManager {
        &self.inner.channel
    }

    pub fn channel_state(&self) -> ChannelState {
        self.inner.channel.state()
    }

    pub fn request_tree(&self) {
        self.inner.send(Request::GetTree);
    }

    pub fn activate_node(&self, node_id: impl Into<String>) {
        self.inner.send(Request::ActivateNode {
            target_node_id: node_id.into(),
        });
    }

    pub fn toggle_collapse(&self, node_id: impl Into<String>) {
        self.inner.send(Request::ToggleCollapse {
            target_node_id: node_id.into(),
        });
    }

    pub fn execute_action(&self, node_id: impl Into<String>, action: impl Into<String>) {
        self.inner.send(Request::ExecuteAction {
            target_node_id: node_id.into(),
            action: action.into(),
        });
    }

    pub fn import_tree(&self, tree_json: impl Into<String>) {
        self.inner.send(Request::ImportTree {
            tree_json: tree_json.into(),
        });
    }

    pub fn export_tree(&self) {
        self.inner.send(Request::ExportTree);
    }

    /// Tells the background the view is going away (best effort), then
    /// disposes the channel and drops the mirror.
    pub fn detach(self) {
        let global_view_id = self.current().global_view_id();
        self.inner.send(Request::NotifyUnload { global_view_id });
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
        self.inner.channel.dispose();
        self.inner.mirror.lock().reducer.reset();
        self.inner
            .published
            .send_replace(Arc::new(MirrorState::default()));
        debug!(target = "session::view", port = %self.inner.channel.name(), "view detached");
    }
}

impl SessionInner {
    fn send(&self, request: Request) {
        trace!(target = "session::view", request = request.name(), "posting request");
        self.channel.post_message(request.to_value());
    }

    fn on_inbound(&self, value: &Value) {
        let message = match decode_message(value.clone()) {
            Ok(ProtocolMessage::Heartbeat) => return,
            Ok(message) => message,
            Err(err) => {
                warn!(target = "session::view", error = %err, "dropping undecodable message");
                return;
            }
        };

        let (next, wants_refresh) = {
            let mut mirror = self.mirror.lock();
            let next = Arc::clone(mirror.reducer.apply(message));
            let wants_refresh = if next.needs_full_refresh() {
                !std::mem::replace(&mut mirror.refresh_requested, true)
            } else {
                mirror.refresh_requested = false;
                false
            };
            (next, wants_refresh)
        };

        self.published.send_if_modified(|current| {
            if Arc::ptr_eq(current, &next) {
                return false;
            }
            *current = next;
            true
        });

        if wants_refresh {
            debug!(target = "session::view", "mirror out of sync; requesting full tree");
            self.send(Request::GetTree);
        }
    }
}
