use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, error};
use uuid::Uuid;

use minichat_types::events::GatewayEvent;

/// A serialized event, encoded once and shared by every recipient.
pub type Frame = Arc<str>;

/// A frame on the shared broadcast bus. `topic: None` reaches every
/// connection; otherwise only connections subscribed to that topic.
#[derive(Debug, Clone)]
pub struct TopicFrame {
    pub topic: Option<String>,
    pub json: Frame,
}

/// Result of pushing one frame to every live session of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Live sessions found for the user.
    pub attempted: usize,
    /// Sessions whose queue accepted the frame.
    pub delivered: usize,
}

pub fn encode(event: &GatewayEvent) -> Option<Frame> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            None
        }
    }
}

/// Tracks every live connection and fans frames out to them.
///
/// Pushes go into bounded per-connection queues with `try_send`, so a slow
/// or dead peer never blocks the caller and no lock is held across a
/// socket write.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Topic bus: every connection receives every frame and filters by topic
    broadcast_tx: broadcast::Sender<TopicFrame>,

    /// username -> (conn_id -> outbound queue)
    sessions: RwLock<HashMap<String, HashMap<Uuid, mpsc::Sender<Frame>>>>,

    queue_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RegistryInner {
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Outbound queue for a new connection.
    pub fn channel(&self) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        mpsc::channel(self.inner.queue_capacity)
    }

    /// Subscribe to the topic bus.
    pub fn subscribe(&self) -> broadcast::Receiver<TopicFrame> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a frame on the topic bus. Returns the number of connections
    /// that will see it before topic filtering.
    pub fn publish(&self, topic: Option<&str>, json: Frame) -> usize {
        self.inner
            .broadcast_tx
            .send(TopicFrame {
                topic: topic.map(str::to_string),
                json,
            })
            .unwrap_or(0)
    }

    /// Add a session for `username`. Returns `true` if it is the user's first
    /// live session.
    pub async fn register(&self, username: &str, conn_id: Uuid, tx: mpsc::Sender<Frame>) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        let user_sessions = sessions.entry(username.to_string()).or_default();
        user_sessions.insert(conn_id, tx);
        user_sessions.len() == 1
    }

    /// Remove a session. Returns `true` if the user has no live session left.
    pub async fn unregister(&self, username: &str, conn_id: Uuid) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        let Some(user_sessions) = sessions.get_mut(username) else {
            return false;
        };
        if user_sessions.remove(&conn_id).is_none() {
            return false;
        }
        if user_sessions.is_empty() {
            sessions.remove(username);
            true
        } else {
            false
        }
    }

    /// Call `f` with each live session of `username`. Returns how many there
    /// were. `f` runs under a read lock and must not block.
    pub async fn for_each_live<F>(&self, username: &str, mut f: F) -> usize
    where
        F: FnMut(Uuid, &mpsc::Sender<Frame>),
    {
        let sessions = self.inner.sessions.read().await;
        match sessions.get(username) {
            Some(user_sessions) => {
                for (conn_id, tx) in user_sessions {
                    f(*conn_id, tx);
                }
                user_sessions.len()
            }
            None => 0,
        }
    }

    /// Push a frame to every live session of `username` without waiting.
    pub async fn send_to_user(&self, username: &str, frame: &Frame) -> Delivery {
        let mut delivered = 0;
        let attempted = self
            .for_each_live(username, |conn_id, tx| match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Drop frame for {} on {}: {}", username, conn_id, e),
            })
            .await;

        Delivery {
            attempted,
            delivered,
        }
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.inner.sessions.read().await.contains_key(username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Arc::from(text)
    }

    #[tokio::test]
    async fn first_and_last_session_are_reported() {
        let registry = ConnectionRegistry::new(8);
        let (tx1, _rx1) = registry.channel();
        let (tx2, _rx2) = registry.channel();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(registry.register("alice", c1, tx1).await);
        assert!(!registry.register("alice", c2, tx2).await);
        assert!(registry.is_online("alice").await);

        assert!(!registry.unregister("alice", c1).await);
        assert!(registry.unregister("alice", c2).await);
        assert!(!registry.is_online("alice").await);
        assert!(!registry.unregister("alice", c2).await);
    }

    #[tokio::test]
    async fn send_reaches_every_session() {
        let registry = ConnectionRegistry::new(8);
        let (tx1, mut rx1) = registry.channel();
        let (tx2, mut rx2) = registry.channel();
        registry.register("alice", Uuid::new_v4(), tx1).await;
        registry.register("alice", Uuid::new_v4(), tx2).await;

        let delivery = registry.send_to_user("alice", &frame("hi")).await;
        assert_eq!(delivery, Delivery { attempted: 2, delivered: 2 });
        assert_eq!(&*rx1.recv().await.unwrap(), "hi");
        assert_eq!(&*rx2.recv().await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn offline_user_gets_no_attempt() {
        let registry = ConnectionRegistry::new(8);
        let delivery = registry.send_to_user("bob", &frame("hi")).await;
        assert_eq!(delivery, Delivery::default());
    }

    #[tokio::test]
    async fn full_or_closed_queue_does_not_block() {
        let registry = ConnectionRegistry::new(1);
        let (full_tx, _full_rx) = registry.channel();
        let (dead_tx, dead_rx) = registry.channel();
        drop(dead_rx);
        registry.register("alice", Uuid::new_v4(), full_tx).await;
        registry.register("alice", Uuid::new_v4(), dead_tx).await;

        let first = registry.send_to_user("alice", &frame("1")).await;
        assert_eq!(first, Delivery { attempted: 2, delivered: 1 });
        let second = registry.send_to_user("alice", &frame("2")).await;
        assert_eq!(second, Delivery { attempted: 2, delivered: 0 });
    }

    #[tokio::test]
    async fn topic_frames_carry_their_topic() {
        let registry = ConnectionRegistry::new(8);
        let mut bus = registry.subscribe();

        assert_eq!(registry.publish(Some("alice_bob"), frame("m")), 1);
        let received = bus.recv().await.unwrap();
        assert_eq!(received.topic.as_deref(), Some("alice_bob"));
        assert_eq!(&*received.json, "m");
    }
}
