use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use minichat_auth::AuthenticatedUser;
use minichat_types::events::{GatewayCommand, GatewayEvent};

use crate::Gateway;
use crate::registry::{Frame, TopicFrame, encode};
use crate::router::Target;
use crate::session::ConnectionState;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type Subscriptions = Arc<RwLock<HashSet<String>>>;

/// Serve one WebSocket connection until either side goes away.
///
/// `identity` is the result of the connection-time handshake; `None` leaves
/// the connection anonymous. Anonymous connections may subscribe to topics
/// but cannot send until an `Identify` command binds them.
pub async fn handle_connection(
    socket: WebSocket,
    gateway: Gateway,
    identity: Option<AuthenticatedUser>,
) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();
    let state = Arc::new(Mutex::new(ConnectionState::default()));
    let (direct_tx, mut direct_rx) = gateway.registry.channel();

    // Subscribe before Ready so nothing published afterwards is missed
    let mut broadcast_rx = gateway.registry.subscribe();

    if let Some(user) = identity {
        bind(&gateway, &state, conn_id, &direct_tx, user).await;
    }

    let username = lock(&state).identity().map(|u| u.username.clone());
    match &username {
        Some(name) => info!("{} connected to gateway ({})", name, conn_id),
        None => info!("Anonymous connection {} opened", conn_id),
    }

    let ready = encode(&GatewayEvent::Ready { username });
    if let Some(frame) = ready {
        if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
            disconnect(&gateway, &state, conn_id).await;
            return;
        }
    }

    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward topic frames + direct frames -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !wants(&send_subscriptions, &msg) {
                        continue;
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                result = direct_rx.recv() => {
                    let Some(frame) = result else { break };
                    if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_gateway = gateway.clone();
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(cmd) => {
                        handle_command(
                            &recv_gateway,
                            &recv_state,
                            conn_id,
                            &direct_tx,
                            &subscriptions,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        let raw: String = text.as_str().chars().take(200).collect();
                        warn!("Connection {} bad command: {} -- raw: {}", conn_id, e, raw);
                        reply(
                            &direct_tx,
                            GatewayEvent::Error {
                                code: "bad_command".into(),
                                detail: e.to_string(),
                            },
                        )
                        .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    disconnect(&gateway, &state, conn_id).await;
}

async fn handle_command(
    gateway: &Gateway,
    state: &Mutex<ConnectionState>,
    conn_id: Uuid,
    direct_tx: &mpsc::Sender<Frame>,
    subscriptions: &Subscriptions,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { token } => {
            if !lock(state).is_unauthenticated() {
                debug!("Connection {} already bound, ignoring Identify", conn_id);
                return;
            }

            let authenticator = gateway.authenticator.clone();
            let user = tokio::task::spawn_blocking(move || authenticator.authenticate_token(&token))
                .await
                .ok()
                .flatten();

            match user {
                Some(user) => {
                    let username = user.username.clone();
                    if bind(gateway, state, conn_id, direct_tx, user).await {
                        info!("{} identified on connection {}", username, conn_id);
                        reply(direct_tx, GatewayEvent::Ready { username: Some(username) }).await;
                    }
                }
                None => {
                    reply(
                        direct_tx,
                        GatewayEvent::Error {
                            code: "unauthenticated".into(),
                            detail: "invalid or expired token".into(),
                        },
                    )
                    .await;
                }
            }
        }

        GatewayCommand::Subscribe { chat_id } => {
            debug!("Connection {} subscribing to {}", conn_id, chat_id);
            subscriptions
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(chat_id);
        }

        GatewayCommand::Unsubscribe { chat_id } => {
            subscriptions
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&chat_id);
        }

        GatewayCommand::SendPrivate { chat_id, content } => {
            route(gateway, state, direct_tx, Target::Private { chat_id }, content).await;
        }

        GatewayCommand::SendGroup { group_id, content } => {
            route(gateway, state, direct_tx, Target::Group { group_id }, content).await;
        }
    }
}

async fn route(
    gateway: &Gateway,
    state: &Mutex<ConnectionState>,
    direct_tx: &mpsc::Sender<Frame>,
    target: Target,
    content: String,
) {
    let sender = lock(state).identity().cloned();

    match gateway.router.route(target, sender.as_ref(), content).await {
        Ok(routed) => {
            reply(direct_tx, GatewayEvent::MessageSent { message: routed.message }).await;
        }
        Err(e) => {
            warn!("Rejected message: {}", e);
            reply(
                direct_tx,
                GatewayEvent::Error {
                    code: e.code().into(),
                    detail: e.to_string(),
                },
            )
            .await;
        }
    }
}

/// Bind `user` to this connection (first wins) and register it for
/// delivery. Returns whether the bind happened.
async fn bind(
    gateway: &Gateway,
    state: &Mutex<ConnectionState>,
    conn_id: Uuid,
    direct_tx: &mpsc::Sender<Frame>,
    user: AuthenticatedUser,
) -> bool {
    if !lock(state).bind(user.clone()) {
        return false;
    }
    gateway.attach(&user, conn_id, direct_tx.clone()).await;
    true
}

async fn disconnect(gateway: &Gateway, state: &Mutex<ConnectionState>, conn_id: Uuid) {
    let user = lock(state).close();
    match user {
        Some(user) => {
            gateway.detach(&user, conn_id).await;
            info!("{} disconnected from gateway ({})", user.username, conn_id);
        }
        None => info!("Anonymous connection {} closed", conn_id),
    }
}

/// Whether a bus frame should be forwarded to this connection: global
/// frames always, topic frames only when subscribed.
fn wants(subscriptions: &Subscriptions, frame: &TopicFrame) -> bool {
    match &frame.topic {
        None => true,
        Some(topic) => subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(topic),
    }
}

/// Queue an event for this connection only.
async fn reply(direct_tx: &mpsc::Sender<Frame>, event: GatewayEvent) {
    if let Some(frame) = encode(&event) {
        let _ = direct_tx.send(frame).await;
    }
}

fn lock(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
