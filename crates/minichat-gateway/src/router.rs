use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use minichat_auth::AuthenticatedUser;
use minichat_types::events::GatewayEvent;
use minichat_types::models::{Message, group_chat_id, group_id_from_chat_id};

use crate::groups::{GroupDirectory, GroupError};
use crate::locks::KeyedLocks;
use crate::registry::{ConnectionRegistry, encode};
use crate::store::{MessageStore, NewMessage};

/// Where an inbound chat message is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Two-party chat; delivered on the shared topic named by `chat_id`.
    Private { chat_id: String },
    /// Group chat; delivered to each member individually.
    Group { group_id: i64 },
}

impl Target {
    pub fn chat_id(&self) -> String {
        match self {
            Self::Private { chat_id } => chat_id.clone(),
            Self::Group { group_id } => group_chat_id(*group_id),
        }
    }

    pub fn group_id(&self) -> Option<i64> {
        match self {
            Self::Private { .. } => None,
            Self::Group { group_id } => Some(*group_id),
        }
    }
}

/// What happened after the message was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    /// Published on a private-chat topic.
    Topic { topic: String, receivers: usize },
    /// Pushed to each live session of each group member.
    Fanout {
        recipients: usize,
        attempted: usize,
        delivered: usize,
    },
    /// The message was stored but the group does not exist.
    GroupNotFound { group_id: i64 },
    /// The message was stored but membership could not be read.
    MembershipUnavailable { group_id: i64 },
}

#[derive(Debug, Clone)]
pub struct Routed {
    pub message: Message,
    pub delivery: DeliveryReport,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("connection is not authenticated")]
    Unauthorized,
    #[error("invalid destination: {0}")]
    InvalidTarget(String),
    #[error("failed to store message: {0}")]
    Storage(anyhow::Error),
}

impl RouteError {
    /// Machine-readable code sent back to the client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidTarget(_) => "invalid_target",
            Self::Storage(_) => "storage_error",
        }
    }
}

/// Stores inbound chat messages and delivers them to live connections.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn MessageStore>,
    groups: GroupDirectory,
    registry: ConnectionRegistry,
    locks: Arc<KeyedLocks>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        groups: GroupDirectory,
        registry: ConnectionRegistry,
    ) -> Self {
        Self {
            store,
            groups,
            registry,
            locks: Arc::new(KeyedLocks::default()),
        }
    }

    /// Accept one chat message.
    ///
    /// The sender and timestamp are stamped here and the id comes from
    /// storage. The message is stored exactly once before any delivery;
    /// storage failure fails the call, delivery failure never does.
    /// Messages to one destination are stored and delivered in acceptance
    /// order.
    pub async fn route(
        &self,
        target: Target,
        sender: Option<&AuthenticatedUser>,
        content: String,
    ) -> Result<Routed, RouteError> {
        let sender = sender.ok_or(RouteError::Unauthorized)?;

        if let Target::Private { chat_id } = &target {
            if chat_id.trim().is_empty() {
                return Err(RouteError::InvalidTarget("chat id is empty".into()));
            }
            // Group conversations are only reachable through Target::Group.
            if group_id_from_chat_id(chat_id).is_some() {
                return Err(RouteError::InvalidTarget(format!(
                    "{} is a group chat id",
                    chat_id
                )));
            }
        }

        let chat_id = target.chat_id();
        let _guard = self.locks.acquire(&chat_id).await;

        let accepted = NewMessage {
            chat_id,
            group_id: target.group_id(),
            sender: sender.username.clone(),
            content,
            timestamp: Utc::now(),
        };

        let store = self.store.clone();
        let message = tokio::task::spawn_blocking(move || store.append_message(&accepted))
            .await
            .map_err(|e| RouteError::Storage(e.into()))?
            .map_err(|e| {
                error!("Failed to store message from {}: {}", sender.username, e);
                RouteError::Storage(e)
            })?;

        let delivery = self.deliver(&target, &message).await;
        debug!("Message {} on {}: {:?}", message.id, message.chat_id, delivery);

        Ok(Routed { message, delivery })
    }

    async fn deliver(&self, target: &Target, message: &Message) -> DeliveryReport {
        match target {
            Target::Private { chat_id } => {
                let event = GatewayEvent::ChatMessage {
                    chat_id: chat_id.clone(),
                    message: message.clone(),
                };
                let receivers = encode(&event)
                    .map(|frame| self.registry.publish(Some(chat_id), frame))
                    .unwrap_or(0);
                DeliveryReport::Topic {
                    topic: chat_id.clone(),
                    receivers,
                }
            }
            Target::Group { group_id } => self.fan_out(*group_id, message).await,
        }
    }

    async fn fan_out(&self, group_id: i64, message: &Message) -> DeliveryReport {
        let groups = self.groups.clone();
        let members = match tokio::task::spawn_blocking(move || groups.members_of(group_id)).await {
            Ok(Ok(members)) => members,
            Ok(Err(GroupError::NotFound(_))) => {
                warn!("Group {} not found, message {} stored but not delivered", group_id, message.id);
                return DeliveryReport::GroupNotFound { group_id };
            }
            Ok(Err(e)) => {
                error!("Membership lookup for group {} failed: {}", group_id, e);
                return DeliveryReport::MembershipUnavailable { group_id };
            }
            Err(e) => {
                error!("Membership lookup for group {} panicked: {}", group_id, e);
                return DeliveryReport::MembershipUnavailable { group_id };
            }
        };

        let event = GatewayEvent::GroupMessage {
            group_id,
            message: message.clone(),
        };
        let Some(frame) = encode(&event) else {
            return DeliveryReport::Fanout {
                recipients: members.len(),
                attempted: 0,
                delivered: 0,
            };
        };

        let mut attempted = 0;
        let mut delivered = 0;
        for member in &members {
            let delivery = self.registry.send_to_user(member, &frame).await;
            attempted += delivery.attempted;
            delivered += delivery.delivered;
        }

        info!(
            "Group message {} sent to {}/{} sessions across {} members",
            message.id,
            delivered,
            attempted,
            members.len()
        );

        DeliveryReport::Fanout {
            recipients: members.len(),
            attempted,
            delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GroupStore;
    use minichat_db::Database;
    use minichat_types::models::Role;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Fixture {
        db: Arc<Database>,
        registry: ConnectionRegistry,
        groups: GroupDirectory,
        router: MessageRouter,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = ConnectionRegistry::new(16);
        let groups = GroupDirectory::new(db.clone());
        let router = MessageRouter::new(db.clone(), groups.clone(), registry.clone());
        Fixture {
            db,
            registry,
            groups,
            router,
        }
    }

    fn user(name: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            username: name.to_string(),
            role: Role::User,
        }
    }

    async fn connect(registry: &ConnectionRegistry, name: &str) -> mpsc::Receiver<crate::registry::Frame> {
        let (tx, rx) = registry.channel();
        registry.register(name, Uuid::new_v4(), tx).await;
        rx
    }

    fn decode(frame: &str) -> GatewayEvent {
        serde_json::from_str(frame).unwrap()
    }

    struct FailingStore;

    impl MessageStore for FailingStore {
        fn append_message(&self, _message: &NewMessage) -> anyhow::Result<Message> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn private_message_is_stamped_stored_and_published() {
        let fx = fixture();
        let mut bus = fx.registry.subscribe();

        let routed = fx
            .router
            .route(
                Target::Private { chat_id: "alice_bob".into() },
                Some(&user("alice")),
                "hello".into(),
            )
            .await
            .unwrap();

        let message = &routed.message;
        assert_eq!(message.sender, "alice");
        assert_eq!(message.content, "hello");
        assert_eq!(message.chat_id, "alice_bob");
        assert_eq!(message.group_id, None);
        assert!(message.id > 0);

        let stored = fx.db.get_message(message.id).unwrap().unwrap();
        assert_eq!(stored.content, "hello");
        assert_eq!(fx.db.messages_for_chat("alice_bob").unwrap().len(), 1);

        let published = bus.recv().await.unwrap();
        assert_eq!(published.topic.as_deref(), Some("alice_bob"));
        match decode(&published.json) {
            GatewayEvent::ChatMessage { chat_id, message: pushed } => {
                assert_eq!(chat_id, "alice_bob");
                assert_eq!(&pushed, message);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(routed.delivery, DeliveryReport::Topic { receivers: 1, .. }));
    }

    #[tokio::test]
    async fn unbound_sender_is_rejected_before_storage() {
        let fx = fixture();
        let err = fx
            .router
            .route(Target::Private { chat_id: "alice_bob".into() }, None, "hi".into())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Unauthorized));
        assert!(fx.db.messages_for_chat("alice_bob").unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_chat_id_is_rejected() {
        let fx = fixture();
        let err = fx
            .router
            .route(Target::Private { chat_id: " ".into() }, Some(&user("alice")), "hi".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_target");
    }

    #[tokio::test]
    async fn group_message_reaches_each_connected_member_once() {
        let fx = fixture();
        let group = fx
            .groups
            .create(Some("team".into()), Some(vec!["b".into(), "c".into()]), "a")
            .unwrap();

        let mut rx_a = connect(&fx.registry, "a").await;
        let mut rx_b = connect(&fx.registry, "b").await;
        // c is offline

        let routed = fx
            .router
            .route(Target::Group { group_id: group.id }, Some(&user("a")), "hey".into())
            .await
            .unwrap();

        assert_eq!(routed.message.group_id, Some(group.id));
        assert_eq!(routed.message.chat_id, group.chat_id());
        assert_eq!(
            routed.delivery,
            DeliveryReport::Fanout { recipients: 3, attempted: 2, delivered: 2 }
        );
        assert_eq!(fx.db.messages_for_chat(&group.chat_id()).unwrap().len(), 1);

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.recv().await.unwrap();
            match decode(&frame) {
                GatewayEvent::GroupMessage { group_id, message } => {
                    assert_eq!(group_id, group.id);
                    assert_eq!(message.id, routed.message.id);
                }
                other => panic!("unexpected event: {:?}", other),
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn missing_group_still_stores_message() {
        let fx = fixture();
        let routed = fx
            .router
            .route(Target::Group { group_id: 77 }, Some(&user("a")), "lost".into())
            .await
            .unwrap();

        assert_eq!(routed.delivery, DeliveryReport::GroupNotFound { group_id: 77 });
        let stored = fx.db.get_message(routed.message.id).unwrap().unwrap();
        assert_eq!(stored.group_id, Some(77));
        assert_eq!(stored.chat_id, "group_77");
    }

    #[tokio::test]
    async fn fan_out_uses_membership_at_send_time() {
        let fx = fixture();
        let mut group = fx
            .groups
            .create(Some("team".into()), Some(vec!["b".into()]), "a")
            .unwrap();
        let mut rx_c = connect(&fx.registry, "c").await;

        group.members = vec!["a".into(), "c".into()];
        fx.db.update_group(&group).unwrap();

        fx.router
            .route(Target::Group { group_id: group.id }, Some(&user("a")), "now".into())
            .await
            .unwrap();
        assert!(rx_c.recv().await.is_some());
    }

    #[tokio::test]
    async fn storage_failure_fails_the_call() {
        let fx = fixture();
        let router = MessageRouter::new(Arc::new(FailingStore), fx.groups.clone(), fx.registry.clone());
        let mut bus = fx.registry.subscribe();

        let err = router
            .route(Target::Private { chat_id: "alice_bob".into() }, Some(&user("alice")), "x".into())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Storage(_)));
        assert!(bus.try_recv().is_err());
    }

    #[tokio::test]
    async fn stored_ids_follow_the_target() {
        let fx = fixture();
        for target in [
            Target::Private { chat_id: "alice_bob".into() },
            Target::Group { group_id: 5 },
        ] {
            let routed = fx.router.route(target.clone(), Some(&user("alice")), "m".into()).await.unwrap();
            assert_eq!(routed.message.chat_id, target.chat_id());
            assert_eq!(routed.message.group_id, target.group_id());
        }
    }

    #[tokio::test]
    async fn private_send_cannot_target_a_group_conversation() {
        let fx = fixture();
        let group = fx
            .groups
            .create(Some("team".into()), Some(vec!["b".into()]), "a")
            .unwrap();
        let mut bus = fx.registry.subscribe();

        let err = fx
            .router
            .route(
                Target::Private { chat_id: group.chat_id() },
                Some(&user("mallory")),
                "injected".into(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "invalid_target");
        assert!(fx.db.messages_for_chat(&group.chat_id()).unwrap().is_empty());
        assert!(bus.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_destination_keeps_acceptance_order() {
        let fx = fixture();
        let mut bus = fx.registry.subscribe();

        for i in 0..20 {
            fx.router
                .route(Target::Private { chat_id: "room".into() }, Some(&user("alice")), i.to_string())
                .await
                .unwrap();
        }

        let stored: Vec<String> = fx
            .db
            .messages_for_chat("room")
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        let mut pushed = Vec::new();
        while let Ok(frame) = bus.try_recv() {
            if let GatewayEvent::ChatMessage { message, .. } = decode(&frame.json) {
                pushed.push(message.content);
            }
        }
        assert_eq!(stored, pushed);
        assert_eq!(stored.len(), 20);
        assert_eq!(fx.router.locks.len(), 0);
    }
}
