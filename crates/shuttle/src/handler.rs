//! Per-connection handler: upgrade, authorization, registration, message
//! loop, and teardown.
//!
//! ```text
//! Upgrading ──(no upgrade within the handshake timeout)──→ dropped
//!     ▼
//! Connecting ──(no identity)──────────→ Rejected 401
//!     │      ──(not a shuttle member)──→ Rejected 404
//!     ▼
//!   Open ──(read error, close, idle, superseded)──→ Closed
//! ```
//!
//! While open the task `select!`s over the socket, its outbound queue and
//! an idle timer, so broadcasts from other members and close signals are
//! written by the task that owns the socket. The idle timer is armed once
//! and pushed back only by frames the client sends; traffic the server
//! pushes to a silent client does not keep it alive.
//!
//! Presence is published per user under [`PresenceLocks`], and each write
//! re-checks the connection registry first: `Online` only while this
//! connection is the user's live one, `Offline` only once the user has no
//! live connection at all.
//!
//! [`PresenceLocks`]: crate::presence::PresenceLocks

use std::sync::Arc;
use std::time::SystemTime;

use shuttle_protocol::{
    Codec, GroupKey, Identity, LocationBroadcast, Presence, ProtocolError, Route,
    ServerMessage, StatusResponse,
};
use shuttle_registry::{LiveConnection, Outbound};
use shuttle_session::RefreshTokenStore;
use shuttle_transport::{
    Connection, ConnectionId, Handshake, PendingUpgrade, TransportError, WebSocketConnection,
};
use tokio::time::Instant;

use crate::server::ServerState;
use crate::{Directory, ShuttleError};

const MSG_CONNECTED: &str = "Connected";
const MSG_UNAUTHORIZED: &str = "Unauthorized access";
const MSG_NOT_MEMBER: &str = "User not found in shuttle";
const MSG_ROUTE_NOT_FOUND: &str = "Route not found";
const MSG_INVALID_FORMAT: &str = "Invalid request format";
const MSG_BROADCASTED: &str = "Message broadcasted";
const MSG_RECEIVED: &str = "Data received successfully";
const MSG_UNAVAILABLE: &str = "Service unavailable";

/// Cleans up registrations when the handler exits.
///
/// Created right after the connection is registered, so every way out of
/// the open state passes through it:
///
/// - The normal path calls [`finish`](Self::finish), which deregisters
///   and awaits the offline presence update before the task ends.
/// - An early `?` return or a panic unwinds through `Drop`, which still
///   deregisters synchronously and publishes the offline update on a
///   spawned task, since `Drop` cannot await.
///
/// Deregistering is keyed by this connection's id. A connection that was
/// superseded finds its entries already taken over and removes nothing,
/// and its offline write is skipped because the user is still connected.
struct Teardown<D: Directory, S: RefreshTokenStore> {
    state: Arc<ServerState<D, S>>,
    identity: Identity,
    conn_id: ConnectionId,
    group: Option<GroupKey>,
    armed: bool,
}

impl<D: Directory, S: RefreshTokenStore> Teardown<D, S> {
    /// Removes this connection from both registries. Returns `true` if
    /// it was still the user's live connection.
    fn deregister(&self) -> bool {
        let user_uuid = self.identity.user_uuid;
        if let Some(group) = &self.group {
            self.state.groups.leave(group, user_uuid, self.conn_id);
        }
        self.state.connections.unregister(user_uuid, self.conn_id)
    }

    async fn finish(mut self) {
        self.armed = false;
        if self.deregister() {
            publish_presence(&self.state, &self.identity, self.conn_id, Presence::Offline).await;
        } else {
            tracing::debug!(
                user_uuid = %self.identity.user_uuid,
                conn_id = %self.conn_id,
                "superseded connection closed, presence left to its replacement"
            );
        }
        tracing::info!(
            user_uuid = %self.identity.user_uuid,
            conn_id = %self.conn_id,
            "connection closed"
        );
    }
}

impl<D: Directory, S: RefreshTokenStore> Drop for Teardown<D, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.deregister() {
            let state = Arc::clone(&self.state);
            let identity = self.identity.clone();
            let conn_id = self.conn_id;
            tokio::spawn(async move {
                publish_presence(&state, &identity, conn_id, Presence::Offline).await;
            });
        }
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<D, S>(
    pending: PendingUpgrade,
    state: Arc<ServerState<D, S>>,
) -> Result<(), ShuttleError>
where
    D: Directory,
    S: RefreshTokenStore,
{
    // --- Upgrading ---
    let conn_id = pending.id();
    let peer = pending.peer_addr();
    let limit = state.handshake_timeout;
    let conn = match tokio::time::timeout(limit, pending.upgrade()).await {
        Ok(upgraded) => upgraded?,
        Err(_) => {
            tracing::warn!(%conn_id, %peer, ?limit, "handshake timed out, dropping peer");
            return Err(TransportError::HandshakeTimeout(limit).into());
        }
    };
    tracing::debug!(%conn_id, path = %conn.request().path, "handling new connection");

    // --- Connecting ---
    let Some((identity, route)) = authorize(&conn, &state).await? else {
        let _ = conn.close().await;
        return Ok(());
    };
    let user_uuid = identity.user_uuid;
    let group = route.group().cloned();

    // --- Open ---
    let (handle, mut outbound) =
        LiveConnection::channel(identity.clone(), conn_id, group.clone());
    state.connections.register(handle.clone());
    if let Some(key) = &group {
        state.groups.join(key, handle.clone());
    }
    let teardown = Teardown {
        state: Arc::clone(&state),
        identity: identity.clone(),
        conn_id,
        group: group.clone(),
        armed: true,
    };

    publish_presence(&state, &identity, conn_id, Presence::Online).await;
    tracing::info!(%user_uuid, %conn_id, group = ?group.as_ref().map(GroupKey::as_str), "connection open");
    send_status(&conn, &state.codec, StatusResponse::ok(MSG_CONNECTED)).await?;

    let idle_limit = state.idle_timeout;
    let idle = tokio::time::sleep(idle_limit.unwrap_or_default());
    tokio::pin!(idle);

    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = conn.send_text(&frame).await {
                        tracing::debug!(%user_uuid, error = %e, "write failed");
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    tracing::info!(%user_uuid, %conn_id, %reason, "connection superseded");
                    break;
                }
                None => break,
            },
            inbound = conn.recv() => match inbound {
                Ok(Some(data)) => {
                    if let Some(limit) = idle_limit {
                        idle.as_mut().reset(Instant::now() + limit);
                    }
                    handle_frame(&conn, &state, &identity, group.as_ref(), &data).await?;
                }
                Ok(None) => {
                    tracing::debug!(%user_uuid, "client closed connection");
                    break;
                }
                Err(e) => {
                    tracing::debug!(%user_uuid, error = %e, "recv error");
                    break;
                }
            },
            () = &mut idle, if idle_limit.is_some() => {
                tracing::info!(%user_uuid, %conn_id, "connection idle, closing");
                break;
            }
        }
    }

    // --- Closed ---
    drop(handle);
    let _ = conn.close().await;
    teardown.finish().await;
    Ok(())
}

/// Resolves who is connecting and where to.
///
/// Returns `None` after sending a rejection frame.
async fn authorize<D, S>(
    conn: &WebSocketConnection,
    state: &ServerState<D, S>,
) -> Result<Option<(Identity, Route)>, ShuttleError>
where
    D: Directory,
    S: RefreshTokenStore,
{
    let conn_id = conn.id();
    let request = conn.request();

    let route = match Route::parse(&request.path) {
        Ok(route) => route,
        Err(e) => {
            tracing::warn!(%conn_id, error = %e, "rejected connection");
            send_status(conn, &state.codec, StatusResponse::not_found(MSG_ROUTE_NOT_FOUND))
                .await?;
            return Ok(None);
        }
    };

    let Some(credential) = request.credential() else {
        tracing::warn!(%conn_id, "rejected connection without credentials");
        send_status(conn, &state.codec, StatusResponse::unauthorized(MSG_UNAUTHORIZED)).await?;
        return Ok(None);
    };

    let claims = match state.sessions.authenticate(credential) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(%conn_id, error = %e, "rejected connection");
            send_status(conn, &state.codec, StatusResponse::unauthorized(MSG_UNAUTHORIZED))
                .await?;
            return Ok(None);
        }
    };

    let identity = match state.directory.lookup_identity(&claims).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(%conn_id, user_uuid = %claims.user_uuid, error = %e, "identity unresolved");
            send_status(conn, &state.codec, StatusResponse::unauthorized(MSG_UNAUTHORIZED))
                .await?;
            return Ok(None);
        }
    };

    if let Route::Group(key) = &route {
        match state.directory.is_group_member(&identity, key).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%conn_id, user_uuid = %identity.user_uuid, group = %key, "not a shuttle member");
                send_status(conn, &state.codec, StatusResponse::not_found(MSG_NOT_MEMBER))
                    .await?;
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(%conn_id, group = %key, error = %e, "membership check failed");
                send_status(conn, &state.codec, StatusResponse::unavailable(MSG_UNAVAILABLE))
                    .await?;
                return Ok(None);
            }
        }
    }

    tracing::info!(%conn_id, user_uuid = %identity.user_uuid, role = %identity.role, "connection authorized");
    Ok(Some((identity, route)))
}

/// Handles one inbound frame. A malformed frame is answered with 400 and
/// the connection stays open.
async fn handle_frame<D, S>(
    conn: &WebSocketConnection,
    state: &ServerState<D, S>,
    identity: &Identity,
    group: Option<&GroupKey>,
    data: &[u8],
) -> Result<(), ShuttleError>
where
    D: Directory,
    S: RefreshTokenStore,
{
    let user_uuid = identity.user_uuid;
    let update = match state.codec.decode_location(data) {
        Ok(update) => update,
        Err(e) => {
            tracing::debug!(%user_uuid, error = %e, "invalid frame");
            return send_status(conn, &state.codec, StatusResponse::bad_request(MSG_INVALID_FORMAT))
                .await;
        }
    };

    let Some(key) = group else {
        tracing::debug!(%user_uuid, lat = update.latitude, lon = update.longitude, "location received");
        return send_status(conn, &state.codec, StatusResponse::ok(MSG_RECEIVED)).await;
    };

    let broadcast = ServerMessage::Location(LocationBroadcast::from_update(user_uuid, update));
    let frame = encode_text(&state.codec, &broadcast)?;
    let delivered = state.groups.broadcast_except(key, user_uuid, &frame);
    tracing::debug!(%user_uuid, group = %key, delivered, "location broadcast");

    send_status(conn, &state.codec, StatusResponse::ok(MSG_BROADCASTED)).await
}

/// Publishes presence for `conn_id` if it still describes the user.
///
/// Runs under the user's presence lock: `Online` is written only while
/// `conn_id` is the registered connection, `Offline` only when none is.
/// A skipped write is left to whichever connection is live.
async fn publish_presence<D, S>(
    state: &ServerState<D, S>,
    identity: &Identity,
    conn_id: ConnectionId,
    presence: Presence,
) where
    D: Directory,
    S: RefreshTokenStore,
{
    let user_uuid = identity.user_uuid;
    state
        .presence
        .serialize(user_uuid, async {
            let current = state.connections.lookup(user_uuid).map(|c| c.conn_id());
            let applies = match presence {
                Presence::Online => current == Some(conn_id),
                Presence::Offline => current.is_none(),
            };
            if applies {
                set_presence(state, identity, presence).await;
            } else {
                tracing::debug!(%user_uuid, %conn_id, %presence, "presence left to the live connection");
            }
        })
        .await;
}

/// Records presence. Directory failures are logged, never fatal.
async fn set_presence<D, S>(state: &ServerState<D, S>, identity: &Identity, presence: Presence)
where
    D: Directory,
    S: RefreshTokenStore,
{
    let at = SystemTime::now();
    match state.directory.update_presence(identity, presence, at).await {
        Ok(()) => tracing::debug!(user_uuid = %identity.user_uuid, %presence, "presence updated"),
        Err(e) => tracing::warn!(
            user_uuid = %identity.user_uuid,
            %presence,
            error = %e,
            "presence update failed"
        ),
    }
}

async fn send_status(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    response: StatusResponse,
) -> Result<(), ShuttleError> {
    let text = encode_text(codec, &ServerMessage::status(response))?;
    conn.send_text(&text).await?;
    Ok(())
}

fn encode_text(codec: &impl Codec, msg: &ServerMessage) -> Result<String, ShuttleError> {
    let bytes = codec.encode(msg)?;
    String::from_utf8(bytes)
        .map_err(|e| ProtocolError::InvalidMessage(format!("non-UTF-8 frame: {e}")).into())
}
