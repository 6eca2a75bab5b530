//! Real-time side of minichat: connection binding, group membership, and
//! message routing to live WebSocket connections.

pub mod connection;
pub mod groups;
pub mod handshake;
mod locks;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use minichat_auth::{AuthenticatedUser, Authenticator};
use minichat_db::Database;
use minichat_types::events::GatewayEvent;
use minichat_types::models::Group;

use crate::groups::GroupDirectory;
use crate::handshake::HandshakeMode;
use crate::locks::KeyedLocks;
use crate::registry::{ConnectionRegistry, Frame, encode};
use crate::router::MessageRouter;
use crate::store::PresenceStore;

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub handshake_mode: HandshakeMode,
    /// Capacity of each connection's outbound queue.
    pub session_queue: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handshake_mode: HandshakeMode::default(),
            session_queue: 64,
        }
    }
}

/// Everything a connection needs, cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    pub registry: ConnectionRegistry,
    pub router: MessageRouter,
    pub groups: GroupDirectory,
    pub authenticator: Authenticator,
    presence: Arc<dyn PresenceStore>,
    /// Per-username; covers session bookkeeping plus the presence write and
    /// announcement it triggers.
    presence_locks: Arc<KeyedLocks>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(db: Arc<Database>, authenticator: Authenticator, config: GatewayConfig) -> Self {
        let registry = ConnectionRegistry::new(config.session_queue);
        let groups = GroupDirectory::new(db.clone());
        let router = MessageRouter::new(db.clone(), groups.clone(), registry.clone());

        Self {
            registry,
            router,
            groups,
            authenticator,
            presence: db,
            presence_locks: Arc::new(KeyedLocks::default()),
            config,
        }
    }

    pub fn handshake_mode(&self) -> HandshakeMode {
        self.config.handshake_mode
    }

    /// Tell every live member of a freshly created group about it.
    pub async fn notify_group_created(&self, group: &Group) {
        let Some(frame) = encode(&GatewayEvent::GroupCreated {
            group: group.clone(),
        }) else {
            return;
        };
        for member in &group.members {
            self.registry.send_to_user(member, &frame).await;
        }
    }

    /// Register a bound connection for delivery. The user's first session
    /// marks them online.
    pub(crate) async fn attach(&self, user: &AuthenticatedUser, conn_id: Uuid, tx: mpsc::Sender<Frame>) {
        let _guard = self.presence_locks.acquire(&user.username).await;
        if self.registry.register(&user.username, conn_id, tx).await {
            self.presence_changed(user, true).await;
        }
    }

    /// Drop a connection from delivery. The user's last session marks them
    /// offline.
    pub(crate) async fn detach(&self, user: &AuthenticatedUser, conn_id: Uuid) {
        let _guard = self.presence_locks.acquire(&user.username).await;
        if self.registry.unregister(&user.username, conn_id).await {
            self.presence_changed(user, false).await;
        }
    }

    /// Record and announce a presence change. Callers hold the user's
    /// presence lock.
    async fn presence_changed(&self, user: &AuthenticatedUser, online: bool) {
        let presence = self.presence.clone();
        let username = user.username.clone();
        let stored = tokio::task::spawn_blocking(move || {
            presence.set_online(&username, online, Utc::now())
        })
        .await;

        match stored {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to record presence for {}: {}", user.username, e),
            Err(e) => warn!("Presence task for {} failed: {}", user.username, e),
        }

        if let Some(frame) = encode(&GatewayEvent::PresenceUpdate {
            username: user.username.clone(),
            online,
        }) {
            self.registry.publish(None, frame);
        }
    }
}
